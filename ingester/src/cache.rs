use crate::actor::{Actor, ActorStatus};
use crate::error::{StoreError, StoreResult};
use crate::telemetry::ACTOR_CACHE_SIZE;
use crate::store::Store;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type Snapshot = Arc<HashMap<String, Actor>>;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// In-memory allow-list of tracked actors.
///
/// Reads go against an immutable snapshot and never wait on the store.
/// Every replacement of the snapshot (full refresh, newly discovered actor,
/// status change) is serialized by `swap_lock`, which is held across a
/// refresh's store read so a refresh cannot wipe a concurrent local write.
pub struct ActorCache {
    store: Arc<dyn Store>,
    snapshot: RwLock<Snapshot>,
    swap_lock: Mutex<()>,
    refresh_timeout: Duration,
}

impl ActorCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            swap_lock: Mutex::new(()),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    fn current(&self) -> Snapshot {
        // a poisoned lock still holds a complete snapshot
        match self.snapshot.read() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, next: HashMap<String, Actor>) {
        metrics::gauge!(ACTOR_CACHE_SIZE).set(next.len() as f64);
        let next = Arc::new(next);
        match self.snapshot.write() {
            Ok(mut s) => *s = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    fn upsert_local(&self, actor: Actor) {
        let mut next = HashMap::clone(&self.current());
        next.insert(actor.did.clone(), actor);
        self.replace(next);
    }

    pub fn get(&self, did: &str) -> Option<Actor> {
        self.current().get(did).cloned()
    }

    /// Reload every actor from the store and swap the snapshot.
    pub async fn sync(&self) -> StoreResult<usize> {
        let _guard = self.swap_lock.lock().await;
        let actors = self.store.list_actors(None).await?;
        let next: HashMap<String, Actor> = actors
            .into_iter()
            .map(|a| (a.did.clone(), a))
            .collect();
        let count = next.len();
        self.replace(next);
        Ok(count)
    }

    /// Start tracking a newly seen actor as pending.
    ///
    /// Visible to `get` as soon as this returns. If the store already knows
    /// the DID (the snapshot was stale), the stored actor is loaded instead.
    pub async fn create_pending(&self, did: &str) -> StoreResult<Actor> {
        let _guard = self.swap_lock.lock().await;
        let actor = match self
            .store
            .create_actor(Actor::new(did, ActorStatus::Pending, "added by system"))
            .await
        {
            Ok(actor) => actor,
            Err(StoreError::ActorExists(_)) => self
                .store
                .get_actor(did)
                .await?
                .ok_or_else(|| StoreError::ActorNotFound(did.to_string()))?,
            Err(e) => return Err(e),
        };
        self.upsert_local(actor.clone());
        Ok(actor)
    }

    /// Change an actor's status in the store and in the snapshot.
    pub async fn set_status(&self, did: &str, status: ActorStatus) -> StoreResult<Actor> {
        let _guard = self.swap_lock.lock().await;
        let actor = self.store.update_actor_status(did, status).await?;
        self.upsert_local(actor.clone());
        Ok(actor)
    }

    /// Refresh every `interval` until cancelled. Run [ActorCache::sync] once
    /// before starting, so the first tick isn't the first load.
    pub async fn start(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // immediate first tick
        info!(?interval, "actor cache refresh started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match tokio::time::timeout(self.refresh_timeout, self.sync()).await {
                Ok(Ok(count)) => debug!(count, "actor cache refreshed"),
                Ok(Err(e)) => error!(error = %e, "actor cache refresh failed"),
                Err(_) => error!(timeout = ?self.refresh_timeout, "actor cache refresh timed out"),
            }
        }
        info!("actor cache refresh stopped");
    }
}
