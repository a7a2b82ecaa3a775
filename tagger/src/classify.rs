use std::collections::BTreeSet;

use crate::hashtags::extract_hashtags;
use crate::record::{nsid, Embed, FeedPost};

/// hashtags that mark a post as adult content
pub const NSFW_HASHTAGS: &[&str] = &["nsfw", "murrsuit", "mursuit", "nsfwfurry", "furrynsfw"];
/// self-labels that mark a post as adult content
pub const NSFW_SELF_LABELS: &[&str] = &["porn", "sexual", "nudity", "graphic-media"];

const FURSUIT_HASHTAGS: &[&str] = &["fursuit", "murrsuit", "mursuit", "fursuitfriday"];
const ART_HASHTAGS: &[&str] = &["art", "furryart", "furart"];
const COMMISSIONS_HASHTAGS: &[&str] = &["commsopen", "commissionsopen"];

/// Feed tags derived from a post's attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeedTag {
    FursuitMedia,
    Art,
    Nsfw,
    CommissionsOpen,
}

impl FeedTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedTag::FursuitMedia => "fursuit-media",
            FeedTag::Art => "art",
            FeedTag::Nsfw => "nsfw",
            FeedTag::CommissionsOpen => "commissions-open",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostClassification {
    pub hashtags: BTreeSet<String>,
    pub self_labels: Vec<String>,
    pub has_media: bool,
    pub has_video: bool,
    pub is_nsfw: bool,
    pub is_reply: bool,
    pub tags: BTreeSet<FeedTag>,
}

impl PostClassification {
    pub fn tag_names(&self) -> Vec<String> {
        self.tags.iter().map(|t| t.as_str().to_string()).collect()
    }
}

pub fn has_media(post: &FeedPost) -> bool {
    post.embed.as_ref().is_some_and(embed_has_images)
}

fn embed_has_images(embed: &Embed) -> bool {
    match embed.kind.as_str() {
        nsid::EMBED_IMAGES => !embed.images.is_empty(),
        nsid::EMBED_RECORD_WITH_MEDIA => embed.media.as_deref().is_some_and(embed_has_images),
        _ => false,
    }
}

pub fn has_video(post: &FeedPost) -> bool {
    post.embed.as_ref().is_some_and(embed_has_video)
}

fn embed_has_video(embed: &Embed) -> bool {
    match embed.kind.as_str() {
        nsid::EMBED_VIDEO => true,
        nsid::EMBED_RECORD_WITH_MEDIA => embed.media.as_deref().is_some_and(embed_has_video),
        _ => false,
    }
}

pub fn is_reply(post: &FeedPost) -> bool {
    post.reply.is_some()
}

fn self_labels(post: &FeedPost) -> Vec<String> {
    post.labels
        .iter()
        .filter(|l| l.kind.is_empty() || l.kind == nsid::SELF_LABELS)
        .flat_map(|l| l.vals())
        .map(str::to_string)
        .collect()
}

pub fn is_nsfw(hashtags: &BTreeSet<String>, self_labels: &[String]) -> bool {
    NSFW_HASHTAGS.iter().any(|t| hashtags.contains(*t))
        || self_labels
            .iter()
            .any(|l| NSFW_SELF_LABELS.contains(&l.as_str()))
}

fn any_of(hashtags: &BTreeSet<String>, wanted: &[&str]) -> bool {
    wanted.iter().any(|t| hashtags.contains(*t))
}

/// Everything the ingester stores about a post besides its address.
pub fn classify_post(post: &FeedPost) -> PostClassification {
    let hashtags = extract_hashtags(post);
    let self_labels = self_labels(post);
    let has_media = has_media(post);
    let has_video = has_video(post);
    let is_nsfw = is_nsfw(&hashtags, &self_labels);

    let mut tags = BTreeSet::new();
    if has_media && any_of(&hashtags, FURSUIT_HASHTAGS) {
        tags.insert(FeedTag::FursuitMedia);
    }
    if has_media && any_of(&hashtags, ART_HASHTAGS) {
        tags.insert(FeedTag::Art);
    }
    if is_nsfw {
        tags.insert(FeedTag::Nsfw);
    }
    if any_of(&hashtags, COMMISSIONS_HASHTAGS) {
        tags.insert(FeedTag::CommissionsOpen);
    }

    PostClassification {
        hashtags,
        self_labels,
        has_media,
        has_video,
        is_nsfw,
        is_reply: is_reply(post),
        tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EmbedImage, ReplyRef, SelfLabel, SelfLabels, StrongRef};

    fn post(text: &str) -> FeedPost {
        FeedPost {
            text: text.to_string(),
            created_at: "2025-01-26T17:11:03.522Z".into(),
            ..Default::default()
        }
    }

    fn images(alts: &[&str]) -> Embed {
        Embed {
            kind: nsid::EMBED_IMAGES.into(),
            images: alts
                .iter()
                .map(|a| EmbedImage { alt: a.to_string() })
                .collect(),
            media: None,
        }
    }

    #[test]
    fn test_plain_post() {
        let c = classify_post(&post("paws paws paws"));
        assert!(c.hashtags.is_empty());
        assert!(c.tags.is_empty());
        assert!(!c.has_media);
        assert!(!c.has_video);
        assert!(!c.is_nsfw);
        assert!(!c.is_reply);
    }

    #[test]
    fn test_media_and_hashtags() {
        let mut p = post("i love to poast #fursuit #murrsuit #furryart #commsopen #nsfw #bigBurgers");
        p.embed = Some(images(&["some alt text"]));
        let c = classify_post(&p);
        assert!(c.has_media);
        assert!(c.is_nsfw);
        assert_eq!(
            c.hashtags.iter().map(String::as_str).collect::<BTreeSet<_>>(),
            BTreeSet::from(["fursuit", "murrsuit", "furryart", "commsopen", "nsfw", "bigburgers"])
        );
        assert_eq!(
            c.tag_names(),
            vec!["fursuit-media", "art", "nsfw", "commissions-open"]
        );
    }

    #[test]
    fn test_media_tags_need_media() {
        let c = classify_post(&post("#fursuit #furryart"));
        assert!(c.tags.is_empty());
    }

    #[test]
    fn test_alt_text_hashtag_with_media() {
        let mut p = post("look");
        p.embed = Some(images(&["#fursuit"]));
        let c = classify_post(&p);
        assert!(c.has_media);
        assert!(c.hashtags.contains("fursuit"));
        assert!(c.tags.contains(&FeedTag::FursuitMedia));
    }

    #[test]
    fn test_images_embed_without_images() {
        let mut p = post("look");
        p.embed = Some(images(&[]));
        assert!(!has_media(&p));
    }

    #[test]
    fn test_record_with_media() {
        let mut p = post("quote with pics");
        p.embed = Some(Embed {
            kind: nsid::EMBED_RECORD_WITH_MEDIA.into(),
            images: vec![],
            media: Some(Box::new(images(&["x"]))),
        });
        assert!(has_media(&p));
        assert!(!has_video(&p));

        p.embed = Some(Embed {
            kind: nsid::EMBED_RECORD_WITH_MEDIA.into(),
            images: vec![],
            media: Some(Box::new(Embed {
                kind: nsid::EMBED_VIDEO.into(),
                ..Default::default()
            })),
        });
        assert!(!has_media(&p));
        assert!(has_video(&p));
    }

    #[test]
    fn test_video() {
        let mut p = post("clip");
        p.embed = Some(Embed {
            kind: nsid::EMBED_VIDEO.into(),
            ..Default::default()
        });
        assert!(has_video(&p));
        assert!(!has_media(&p));
    }

    #[test]
    fn test_nsfw_from_self_label() {
        let mut p = post("nothing to see");
        p.labels = Some(SelfLabels {
            kind: nsid::SELF_LABELS.into(),
            values: vec![SelfLabel { val: "porn".into() }],
        });
        let c = classify_post(&p);
        assert!(c.is_nsfw);
        assert_eq!(c.self_labels, vec!["porn"]);
        assert!(c.tags.contains(&FeedTag::Nsfw));
    }

    #[test]
    fn test_unrelated_self_label() {
        let mut p = post("fine");
        p.labels = Some(SelfLabels {
            kind: nsid::SELF_LABELS.into(),
            values: vec![SelfLabel {
                val: "!no-unauthenticated".into(),
            }],
        });
        assert!(!classify_post(&p).is_nsfw);
    }

    #[test]
    fn test_reply() {
        let mut p = post("@someone yes");
        let r = StrongRef {
            uri: "at://did:plc:a/app.bsky.feed.post/0".into(),
            cid: "bafyreib".into(),
        };
        p.reply = Some(ReplyRef {
            root: r.clone(),
            parent: r,
        });
        assert!(classify_post(&p).is_reply);
    }
}
