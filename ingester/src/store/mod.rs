use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::actor::{Actor, ActorStatus};
use crate::error::StoreResult;

pub mod mem_store;
pub mod sqlite_store;

pub use mem_store::MemStore;
pub use sqlite_store::SqliteStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub uri: String,
    pub actor_did: String,
    /// claimed by the author
    pub created_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    pub hashtags: Vec<String>,
    pub self_labels: Vec<String>,
    pub tags: Vec<String>,
    pub has_media: bool,
    pub has_video: bool,
    pub is_nsfw: bool,
    pub raw: serde_json::Value,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Like {
    pub uri: String,
    pub actor_did: String,
    pub subject_uri: String,
    pub created_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Follow {
    pub uri: String,
    pub actor_did: String,
    pub subject_did: String,
    pub created_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One snapshot of an actor's profile record, keyed by the commit that wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub actor_did: String,
    pub commit_cid: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub self_labels: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub indexed_at: DateTime<Utc>,
}

/// Durable state shared by the ingester and its downstream consumers.
///
/// Record creates are insert-if-absent by URI, so replaying an event after a
/// restart is harmless. Soft deletes keep the first deletion time and do
/// nothing for unknown URIs.
#[async_trait]
pub trait Store: Send + Sync {
    /// last flushed stream position, if any
    async fn get_cursor(&self) -> StoreResult<Option<i64>>;
    async fn set_cursor(&self, cursor: i64) -> StoreResult<()>;

    /// all actors, or only those with the given status
    async fn list_actors(&self, status: Option<ActorStatus>) -> StoreResult<Vec<Actor>>;
    async fn get_actor(&self, did: &str) -> StoreResult<Option<Actor>>;
    /// fails with [crate::error::StoreError::ActorExists] if the DID is taken
    async fn create_actor(&self, actor: Actor) -> StoreResult<Actor>;
    async fn update_actor_status(&self, did: &str, status: ActorStatus) -> StoreResult<Actor>;
    async fn hold_actor_until(
        &self,
        did: &str,
        until: Option<DateTime<Utc>>,
    ) -> StoreResult<Actor>;

    async fn create_post(&self, post: Post) -> StoreResult<()>;
    async fn get_post(&self, uri: &str) -> StoreResult<Option<Post>>;
    async fn soft_delete_post(&self, uri: &str) -> StoreResult<()>;

    async fn create_like(&self, like: Like) -> StoreResult<()>;
    async fn get_like(&self, uri: &str) -> StoreResult<Option<Like>>;
    async fn soft_delete_like(&self, uri: &str) -> StoreResult<()>;

    async fn create_follow(&self, follow: Follow) -> StoreResult<()>;
    async fn get_follow(&self, uri: &str) -> StoreResult<Option<Follow>>;
    async fn soft_delete_follow(&self, uri: &str) -> StoreResult<()>;

    /// Record a profile snapshot and point the actor at it.
    async fn create_or_update_profile(&self, profile: Profile) -> StoreResult<()>;
    async fn get_latest_profile(&self, did: &str) -> StoreResult<Option<Profile>>;
    /// oldest first
    async fn list_profile_history(&self, did: &str) -> StoreResult<Vec<Profile>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::StoreError;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Semaphore;

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_737_911_463 + secs, 0).unwrap()
    }

    pub fn post(uri: &str, did: &str) -> Post {
        Post {
            uri: uri.into(),
            actor_did: did.into(),
            created_at: at(0),
            indexed_at: at(1),
            hashtags: vec!["fursuit".into()],
            self_labels: vec![],
            tags: vec!["fursuit-media".into()],
            has_media: true,
            has_video: false,
            is_nsfw: false,
            raw: serde_json::json!({"text": "#fursuit"}),
            deleted_at: None,
        }
    }

    pub fn like(uri: &str, did: &str, subject: &str) -> Like {
        Like {
            uri: uri.into(),
            actor_did: did.into(),
            subject_uri: subject.into(),
            created_at: at(0),
            indexed_at: at(1),
            deleted_at: None,
        }
    }

    pub fn follow(uri: &str, did: &str, subject: &str) -> Follow {
        Follow {
            uri: uri.into(),
            actor_did: did.into(),
            subject_did: subject.into(),
            created_at: at(0),
            indexed_at: at(1),
            deleted_at: None,
        }
    }

    pub fn profile(did: &str, cid: &str, name: &str, indexed: i64) -> Profile {
        Profile {
            actor_did: did.into(),
            commit_cid: cid.into(),
            display_name: Some(name.into()),
            description: None,
            self_labels: vec!["!no-unauthenticated".into()],
            created_at: Some(at(0)),
            indexed_at: at(indexed),
        }
    }

    /// A [MemStore] that can be told to fail cursor writes, and to hold
    /// back post writes whose uri ends with a given suffix until released.
    pub struct HookedStore {
        pub inner: MemStore,
        pub fail_cursor_writes: AtomicBool,
        hold_posts_ending: Option<String>,
        released: Semaphore,
    }

    impl HookedStore {
        pub fn new() -> Self {
            Self {
                inner: MemStore::new(),
                fail_cursor_writes: AtomicBool::new(false),
                hold_posts_ending: None,
                released: Semaphore::new(0),
            }
        }

        pub fn holding_posts_ending(suffix: &str) -> Self {
            Self {
                hold_posts_ending: Some(suffix.into()),
                ..Self::new()
            }
        }

        /// Let one held post write through.
        pub fn release_one(&self) {
            self.released.add_permits(1);
        }
    }

    #[async_trait]
    impl Store for HookedStore {
        async fn get_cursor(&self) -> StoreResult<Option<i64>> {
            self.inner.get_cursor().await
        }
        async fn set_cursor(&self, cursor: i64) -> StoreResult<()> {
            if self.fail_cursor_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Poisoned);
            }
            self.inner.set_cursor(cursor).await
        }
        async fn list_actors(&self, status: Option<ActorStatus>) -> StoreResult<Vec<Actor>> {
            self.inner.list_actors(status).await
        }
        async fn get_actor(&self, did: &str) -> StoreResult<Option<Actor>> {
            self.inner.get_actor(did).await
        }
        async fn create_actor(&self, actor: Actor) -> StoreResult<Actor> {
            self.inner.create_actor(actor).await
        }
        async fn update_actor_status(&self, did: &str, status: ActorStatus) -> StoreResult<Actor> {
            self.inner.update_actor_status(did, status).await
        }
        async fn hold_actor_until(
            &self,
            did: &str,
            until: Option<DateTime<Utc>>,
        ) -> StoreResult<Actor> {
            self.inner.hold_actor_until(did, until).await
        }
        async fn create_post(&self, post: Post) -> StoreResult<()> {
            if let Some(suffix) = &self.hold_posts_ending {
                if post.uri.ends_with(suffix.as_str()) {
                    self.released.acquire().await.unwrap().forget();
                }
            }
            self.inner.create_post(post).await
        }
        async fn get_post(&self, uri: &str) -> StoreResult<Option<Post>> {
            self.inner.get_post(uri).await
        }
        async fn soft_delete_post(&self, uri: &str) -> StoreResult<()> {
            self.inner.soft_delete_post(uri).await
        }
        async fn create_like(&self, like: Like) -> StoreResult<()> {
            self.inner.create_like(like).await
        }
        async fn get_like(&self, uri: &str) -> StoreResult<Option<Like>> {
            self.inner.get_like(uri).await
        }
        async fn soft_delete_like(&self, uri: &str) -> StoreResult<()> {
            self.inner.soft_delete_like(uri).await
        }
        async fn create_follow(&self, follow: Follow) -> StoreResult<()> {
            self.inner.create_follow(follow).await
        }
        async fn get_follow(&self, uri: &str) -> StoreResult<Option<Follow>> {
            self.inner.get_follow(uri).await
        }
        async fn soft_delete_follow(&self, uri: &str) -> StoreResult<()> {
            self.inner.soft_delete_follow(uri).await
        }
        async fn create_or_update_profile(&self, profile: Profile) -> StoreResult<()> {
            self.inner.create_or_update_profile(profile).await
        }
        async fn get_latest_profile(&self, did: &str) -> StoreResult<Option<Profile>> {
            self.inner.get_latest_profile(did).await
        }
        async fn list_profile_history(&self, did: &str) -> StoreResult<Vec<Profile>> {
            self.inner.list_profile_history(did).await
        }
    }
}
