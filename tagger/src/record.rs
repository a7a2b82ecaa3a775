use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// collection NSIDs the ingester acts on
pub mod nsid {
    pub const FEED_POST: &str = "app.bsky.feed.post";
    pub const FEED_LIKE: &str = "app.bsky.feed.like";
    pub const GRAPH_FOLLOW: &str = "app.bsky.graph.follow";
    pub const ACTOR_PROFILE: &str = "app.bsky.actor.profile";

    pub const EMBED_IMAGES: &str = "app.bsky.embed.images";
    pub const EMBED_VIDEO: &str = "app.bsky.embed.video";
    pub const EMBED_RECORD_WITH_MEDIA: &str = "app.bsky.embed.recordWithMedia";
    pub const FACET_TAG: &str = "app.bsky.richtext.facet#tag";
    pub const SELF_LABELS: &str = "com.atproto.label.defs#selfLabels";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub langs: Vec<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<Facet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<SelfLabels>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    #[serde(default)]
    pub cid: String,
}

/// Flattened view over the embed union.
///
/// Only the parts classification looks at are kept: the union tag, image alt
/// texts, and the nested media of a record-with-media embed. Blob refs are
/// skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(rename = "$type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<EmbedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Box<Embed>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedImage {
    #[serde(default)]
    pub alt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    pub index: ByteSlice,
    #[serde(default)]
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteSlice {
    pub byte_start: usize,
    pub byte_end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetFeature {
    #[serde(rename = "$type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelfLabels {
    #[serde(rename = "$type", default)]
    pub kind: String,
    #[serde(default)]
    pub values: Vec<SelfLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfLabel {
    pub val: String,
}

impl SelfLabels {
    pub fn vals(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|l| l.val.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedLike {
    pub subject: StrongRef,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphFollow {
    /// followed DID
    pub subject: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorProfile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Option<SelfLabels>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ActorProfile {
    pub fn self_labels(&self) -> Vec<String> {
        self.labels
            .iter()
            .flat_map(|l| l.vals())
            .map(str::to_string)
            .collect()
    }
}

/// Parse a record's claimed `createdAt`.
///
/// Claimed timestamps are client-supplied and only ever used as data, never
/// for ordering ingestion.
pub fn parse_created_at(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}
