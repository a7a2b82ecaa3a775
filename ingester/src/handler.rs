//! Per-event commit handling.
//!
//! Every event is gated on the actor cache first; payloads are decoded only
//! when the event can actually produce a write.

use crate::actor::{Actor, ActorStatus};
use crate::cache::ActorCache;
use crate::error::HandleError;
use crate::store::{Follow, Like, Post, Profile, Store};
use chrono::{DateTime, Utc};
use firehose::{CommitEvent, CommitOp, RecordOpener};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tagger::record::{nsid, parse_created_at, ActorProfile, FeedLike, FeedPost, GraphFollow};
use tagger::{classify_post, did::is_did, RecordUri};
use tracing::{debug, info};

/// The account whose followers become tracked actors.
pub const DEFAULT_SUBJECT_DID: &str = "did:plc:jdkvwye2lf4mingzk7qdebzc";

/// Short name for the event's collection, used as a metric label.
pub fn event_type(event: &CommitEvent) -> &'static str {
    match event.collection.as_str() {
        nsid::FEED_POST => "post",
        nsid::FEED_LIKE => "like",
        nsid::GRAPH_FOLLOW => "follow",
        nsid::ACTOR_PROFILE => "profile",
        _ => "other",
    }
}

pub struct CommitHandler {
    store: Arc<dyn Store>,
    cache: Arc<ActorCache>,
    opener: RecordOpener,
    subject_did: String,
}

impl CommitHandler {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<ActorCache>,
        opener: RecordOpener,
        subject_did: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cache,
            opener,
            subject_did: subject_did.into(),
        }
    }

    pub async fn handle(&self, event: &CommitEvent) -> Result<(), HandleError> {
        let kind = event_type(event);
        if kind == "other" {
            return Ok(());
        }
        if !is_did(&event.did) {
            return Err(HandleError::BadDid(event.did.clone()));
        }
        let actor = self.cache.get(&event.did);

        match (kind, event.op) {
            ("follow", CommitOp::Create) => self.follow_created(event, actor).await,
            ("follow", CommitOp::Delete) => self.follow_deleted(event, actor).await,
            ("post", CommitOp::Create) => self.post_created(event, actor).await,
            ("like", CommitOp::Create) => self.like_created(event, actor).await,
            ("post" | "like", CommitOp::Delete) => self.record_deleted(event, actor).await,
            ("profile", CommitOp::Create | CommitOp::Update) => {
                self.profile_written(event, actor).await
            }
            _ => Ok(()),
        }
    }

    fn uri(event: &CommitEvent) -> String {
        RecordUri::new(&event.did, &event.collection, &event.rkey).to_string()
    }

    fn open<T: DeserializeOwned>(&self, event: &CommitEvent) -> Result<T, HandleError> {
        let payload = event.payload.as_ref().ok_or(HandleError::MissingRecord)?;
        Ok(self.opener.open(payload)?)
    }

    async fn follow_created(
        &self,
        event: &CommitEvent,
        actor: Option<Actor>,
    ) -> Result<(), HandleError> {
        let follow: GraphFollow = self.open(event)?;
        let targets_subject = follow.subject == self.subject_did;

        if targets_subject {
            match actor {
                None => {
                    let actor = self.cache.create_pending(&event.did).await?;
                    info!(did = %event.did, status = %actor.status, "new actor followed the subject");
                }
                Some(actor) => {
                    if let Some(next) = actor.status.after_subject_follow() {
                        self.cache.set_status(&event.did, next).await?;
                        info!(did = %event.did, from = %actor.status, to = %next, "actor followed the subject");
                    }
                }
            }
        } else if !actor.as_ref().is_some_and(Actor::is_approved) {
            return Ok(());
        }

        self.store
            .create_follow(Follow {
                uri: Self::uri(event),
                actor_did: event.did.clone(),
                subject_did: follow.subject,
                created_at: claimed_time(&follow.created_at)?,
                indexed_at: Utc::now(),
                deleted_at: None,
            })
            .await?;
        Ok(())
    }

    async fn follow_deleted(
        &self,
        event: &CommitEvent,
        actor: Option<Actor>,
    ) -> Result<(), HandleError> {
        let Some(actor) = actor else {
            return Ok(());
        };
        let uri = Self::uri(event);
        let Some(follow) = self.store.get_follow(&uri).await? else {
            debug!(%uri, "unfollow of an unknown follow record");
            return Ok(());
        };
        self.store.soft_delete_follow(&uri).await?;

        if follow.subject_did == self.subject_did {
            if let Some(next) = actor.status.after_subject_unfollow() {
                self.cache.set_status(&event.did, next).await?;
                info!(did = %event.did, from = %actor.status, to = %next, "actor unfollowed the subject");
            }
        }
        Ok(())
    }

    async fn post_created(
        &self,
        event: &CommitEvent,
        actor: Option<Actor>,
    ) -> Result<(), HandleError> {
        if !actor.as_ref().is_some_and(Actor::is_approved) {
            return Ok(());
        }
        let payload = event.payload.as_ref().ok_or(HandleError::MissingRecord)?;
        let (post, raw): (FeedPost, _) = self.opener.open_with_raw(payload)?;
        let classified = classify_post(&post);
        if classified.is_reply {
            return Ok(());
        }
        let tags = classified.tag_names();
        self.store
            .create_post(Post {
                uri: Self::uri(event),
                actor_did: event.did.clone(),
                created_at: claimed_time(&post.created_at)?,
                indexed_at: Utc::now(),
                hashtags: classified.hashtags.into_iter().collect(),
                self_labels: classified.self_labels,
                tags,
                has_media: classified.has_media,
                has_video: classified.has_video,
                is_nsfw: classified.is_nsfw,
                raw,
                deleted_at: None,
            })
            .await?;
        Ok(())
    }

    async fn like_created(
        &self,
        event: &CommitEvent,
        actor: Option<Actor>,
    ) -> Result<(), HandleError> {
        if !actor.as_ref().is_some_and(Actor::is_approved) {
            return Ok(());
        }
        let like: FeedLike = self.open(event)?;
        let subject = RecordUri::parse(&like.subject.uri)
            .ok_or_else(|| HandleError::BadSubject(like.subject.uri.clone()))?;
        self.store
            .create_like(Like {
                uri: Self::uri(event),
                actor_did: event.did.clone(),
                subject_uri: subject.to_string(),
                created_at: claimed_time(&like.created_at)?,
                indexed_at: Utc::now(),
                deleted_at: None,
            })
            .await?;
        Ok(())
    }

    async fn record_deleted(
        &self,
        event: &CommitEvent,
        actor: Option<Actor>,
    ) -> Result<(), HandleError> {
        if actor.is_none() {
            return Ok(());
        }
        let uri = Self::uri(event);
        match event.collection.as_str() {
            nsid::FEED_POST => self.store.soft_delete_post(&uri).await?,
            nsid::FEED_LIKE => self.store.soft_delete_like(&uri).await?,
            _ => {}
        }
        Ok(())
    }

    async fn profile_written(
        &self,
        event: &CommitEvent,
        actor: Option<Actor>,
    ) -> Result<(), HandleError> {
        let tracked = actor.is_some_and(|a| {
            matches!(a.status, ActorStatus::Pending | ActorStatus::Approved)
        });
        if !tracked {
            return Ok(());
        }
        let commit_cid = event.cid.clone().ok_or(HandleError::MissingCid)?;
        let profile: ActorProfile = self.open(event)?;
        let self_labels = profile.self_labels();
        let created_at = profile
            .created_at
            .as_deref()
            .map(claimed_time)
            .transpose()?;
        self.store
            .create_or_update_profile(Profile {
                actor_did: event.did.clone(),
                commit_cid,
                display_name: profile.display_name,
                description: profile.description,
                self_labels,
                created_at,
                indexed_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

fn claimed_time(s: &str) -> Result<DateTime<Utc>, HandleError> {
    parse_created_at(s).map_err(|e| HandleError::BadTimestamp(s.to_string(), e))
}

#[cfg(test)]
pub(crate) mod testing {
    use firehose::{CommitEvent, CommitOp, Payload};
    use serde_json::value::RawValue;

    pub const ALICE: &str = "did:plc:hdhoaan3xa3jiuq4fg4mefid";
    pub const BOB: &str = "did:plc:z72i7hdynmk6r22z27h6tvur";
    pub const SUBJECT: &str = "did:plc:jdkvwye2lf4mingzk7qdebzc";

    pub fn event(
        seq: i64,
        did: &str,
        op: CommitOp,
        collection: &str,
        rkey: &str,
        record: Option<serde_json::Value>,
    ) -> CommitEvent {
        CommitEvent {
            seq,
            did: did.into(),
            op,
            collection: collection.into(),
            rkey: rkey.into(),
            cid: record
                .as_ref()
                .map(|_| format!("bafyreicid{seq}")),
            payload: record.map(|r| {
                Payload::Json(RawValue::from_string(r.to_string()).unwrap())
            }),
        }
    }

    pub fn follow(seq: i64, did: &str, rkey: &str, subject: &str) -> CommitEvent {
        event(
            seq,
            did,
            CommitOp::Create,
            "app.bsky.graph.follow",
            rkey,
            Some(serde_json::json!({
                "$type": "app.bsky.graph.follow",
                "subject": subject,
                "createdAt": "2025-01-26T17:11:03.522Z",
            })),
        )
    }

    pub fn post(seq: i64, did: &str, rkey: &str, text: &str) -> CommitEvent {
        event(
            seq,
            did,
            CommitOp::Create,
            "app.bsky.feed.post",
            rkey,
            Some(serde_json::json!({
                "$type": "app.bsky.feed.post",
                "text": text,
                "langs": ["en"],
                "createdAt": "2025-01-26T17:11:03.522Z",
                "embed": {
                    "$type": "app.bsky.embed.images",
                    "images": [{"alt": "", "image": {"$type": "blob"}}],
                },
            })),
        )
    }

    pub fn delete(seq: i64, did: &str, collection: &str, rkey: &str) -> CommitEvent {
        event(seq, did, CommitOp::Delete, collection, rkey, None)
    }
}
