use super::{Follow, Like, Post, Profile, Store};
use crate::actor::{Actor, ActorStatus};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

// simple hashmap version, for tests and for running without a database
#[derive(Debug, Clone, Default)]
pub struct MemStore(Arc<Mutex<MemStoreData>>);

#[derive(Debug, Default)]
struct MemStoreData {
    cursor: Option<i64>,
    actors: HashMap<String, Actor>,
    posts: HashMap<String, Post>,
    likes: HashMap<String, Like>,
    follows: HashMap<String, Follow>,
    profiles: HashMap<String, Vec<Profile>>, // did -> snapshots, oldest first
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> StoreResult<MutexGuard<'_, MemStoreData>> {
        self.0.lock().map_err(|_| StoreError::Poisoned)
    }

    fn update_actor(
        &self,
        did: &str,
        f: impl FnOnce(&mut Actor),
    ) -> StoreResult<Actor> {
        let mut data = self.data()?;
        let actor = data
            .actors
            .get_mut(did)
            .ok_or_else(|| StoreError::ActorNotFound(did.to_string()))?;
        f(actor);
        Ok(actor.clone())
    }
}

fn mark_deleted(deleted_at: &mut Option<DateTime<Utc>>) {
    deleted_at.get_or_insert_with(Utc::now);
}

#[async_trait]
impl Store for MemStore {
    async fn get_cursor(&self) -> StoreResult<Option<i64>> {
        Ok(self.data()?.cursor)
    }

    async fn set_cursor(&self, cursor: i64) -> StoreResult<()> {
        self.data()?.cursor = Some(cursor);
        Ok(())
    }

    async fn list_actors(&self, status: Option<ActorStatus>) -> StoreResult<Vec<Actor>> {
        let data = self.data()?;
        let mut actors: Vec<Actor> = data
            .actors
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        actors.sort_by(|a, b| a.did.cmp(&b.did));
        Ok(actors)
    }

    async fn get_actor(&self, did: &str) -> StoreResult<Option<Actor>> {
        Ok(self.data()?.actors.get(did).cloned())
    }

    async fn create_actor(&self, actor: Actor) -> StoreResult<Actor> {
        let mut data = self.data()?;
        if data.actors.contains_key(&actor.did) {
            return Err(StoreError::ActorExists(actor.did));
        }
        data.actors.insert(actor.did.clone(), actor.clone());
        Ok(actor)
    }

    async fn update_actor_status(&self, did: &str, status: ActorStatus) -> StoreResult<Actor> {
        self.update_actor(did, |a| a.status = status)
    }

    async fn hold_actor_until(
        &self,
        did: &str,
        until: Option<DateTime<Utc>>,
    ) -> StoreResult<Actor> {
        self.update_actor(did, |a| a.held_until = until)
    }

    async fn create_post(&self, post: Post) -> StoreResult<()> {
        self.data()?.posts.entry(post.uri.clone()).or_insert(post);
        Ok(())
    }

    async fn get_post(&self, uri: &str) -> StoreResult<Option<Post>> {
        Ok(self.data()?.posts.get(uri).cloned())
    }

    async fn soft_delete_post(&self, uri: &str) -> StoreResult<()> {
        if let Some(post) = self.data()?.posts.get_mut(uri) {
            mark_deleted(&mut post.deleted_at);
        }
        Ok(())
    }

    async fn create_like(&self, like: Like) -> StoreResult<()> {
        self.data()?.likes.entry(like.uri.clone()).or_insert(like);
        Ok(())
    }

    async fn get_like(&self, uri: &str) -> StoreResult<Option<Like>> {
        Ok(self.data()?.likes.get(uri).cloned())
    }

    async fn soft_delete_like(&self, uri: &str) -> StoreResult<()> {
        if let Some(like) = self.data()?.likes.get_mut(uri) {
            mark_deleted(&mut like.deleted_at);
        }
        Ok(())
    }

    async fn create_follow(&self, follow: Follow) -> StoreResult<()> {
        self.data()?
            .follows
            .entry(follow.uri.clone())
            .or_insert(follow);
        Ok(())
    }

    async fn get_follow(&self, uri: &str) -> StoreResult<Option<Follow>> {
        Ok(self.data()?.follows.get(uri).cloned())
    }

    async fn soft_delete_follow(&self, uri: &str) -> StoreResult<()> {
        if let Some(follow) = self.data()?.follows.get_mut(uri) {
            mark_deleted(&mut follow.deleted_at);
        }
        Ok(())
    }

    async fn create_or_update_profile(&self, profile: Profile) -> StoreResult<()> {
        let mut data = self.data()?;
        let history = data.profiles.entry(profile.actor_did.clone()).or_default();
        if history.iter().any(|p| p.commit_cid == profile.commit_cid) {
            return Ok(());
        }
        let (did, cid) = (profile.actor_did.clone(), profile.commit_cid.clone());
        history.push(profile);
        if let Some(actor) = data.actors.get_mut(&did) {
            actor.current_profile_commit_cid = Some(cid);
        }
        Ok(())
    }

    async fn get_latest_profile(&self, did: &str) -> StoreResult<Option<Profile>> {
        let data = self.data()?;
        let Some(history) = data.profiles.get(did) else {
            return Ok(None);
        };
        let pointer = data
            .actors
            .get(did)
            .and_then(|a| a.current_profile_commit_cid.as_deref());
        let latest = pointer
            .and_then(|cid| history.iter().find(|p| p.commit_cid == cid))
            .or_else(|| history.last());
        Ok(latest.cloned())
    }

    async fn list_profile_history(&self, did: &str) -> StoreResult<Vec<Profile>> {
        Ok(self
            .data()?
            .profiles
            .get(did)
            .cloned()
            .unwrap_or_default())
    }
}
