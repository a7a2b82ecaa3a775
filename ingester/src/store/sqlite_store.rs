use super::{Follow, Like, Post, Profile, Store};
use crate::actor::{Actor, ActorStatus};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS firehose_cursor (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    cursor INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS actors (
    did TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    comment TEXT NOT NULL,
    is_artist INTEGER NOT NULL,
    roles TEXT NOT NULL,
    held_until TEXT,
    current_profile_commit_cid TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS actors_status ON actors (status);
CREATE TABLE IF NOT EXISTS posts (
    uri TEXT PRIMARY KEY,
    actor_did TEXT NOT NULL,
    created_at TEXT NOT NULL,
    indexed_at TEXT NOT NULL,
    hashtags TEXT NOT NULL,
    self_labels TEXT NOT NULL,
    tags TEXT NOT NULL,
    has_media INTEGER NOT NULL,
    has_video INTEGER NOT NULL,
    is_nsfw INTEGER NOT NULL,
    raw TEXT NOT NULL,
    deleted_at TEXT
);
CREATE TABLE IF NOT EXISTS likes (
    uri TEXT PRIMARY KEY,
    actor_did TEXT NOT NULL,
    subject_uri TEXT NOT NULL,
    created_at TEXT NOT NULL,
    indexed_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE TABLE IF NOT EXISTS follows (
    uri TEXT PRIMARY KEY,
    actor_did TEXT NOT NULL,
    subject_did TEXT NOT NULL,
    created_at TEXT NOT NULL,
    indexed_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE TABLE IF NOT EXISTS profiles (
    actor_did TEXT NOT NULL,
    commit_cid TEXT NOT NULL,
    display_name TEXT,
    description TEXT,
    self_labels TEXT NOT NULL,
    created_at TEXT,
    indexed_at TEXT NOT NULL,
    PRIMARY KEY (actor_did, commit_cid)
);
";

const ACTOR_COLUMNS: &str =
    "did, status, comment, is_artist, roles, held_until, current_profile_commit_cid, created_at";
const PROFILE_COLUMNS: &str =
    "p.actor_did, p.commit_cid, p.display_name, p.description, p.self_labels, p.created_at, p.indexed_at";

/// SQLite-backed store. One connection behind a mutex; every call runs on
/// the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await?
    }
}

fn to_json_list(items: &[String]) -> String {
    serde_json::Value::from(items.to_vec()).to_string()
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn actor_from_row(row: &Row) -> rusqlite::Result<Actor> {
    let status: String = row.get(1)?;
    Ok(Actor {
        did: row.get(0)?,
        status: status
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?,
        comment: row.get(2)?,
        is_artist: row.get(3)?,
        roles: json_column(row, 4)?,
        held_until: row.get(5)?,
        current_profile_commit_cid: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn post_from_row(row: &Row) -> rusqlite::Result<Post> {
    Ok(Post {
        uri: row.get(0)?,
        actor_did: row.get(1)?,
        created_at: row.get(2)?,
        indexed_at: row.get(3)?,
        hashtags: json_column(row, 4)?,
        self_labels: json_column(row, 5)?,
        tags: json_column(row, 6)?,
        has_media: row.get(7)?,
        has_video: row.get(8)?,
        is_nsfw: row.get(9)?,
        raw: json_column(row, 10)?,
        deleted_at: row.get(11)?,
    })
}

fn like_from_row(row: &Row) -> rusqlite::Result<Like> {
    Ok(Like {
        uri: row.get(0)?,
        actor_did: row.get(1)?,
        subject_uri: row.get(2)?,
        created_at: row.get(3)?,
        indexed_at: row.get(4)?,
        deleted_at: row.get(5)?,
    })
}

fn follow_from_row(row: &Row) -> rusqlite::Result<Follow> {
    Ok(Follow {
        uri: row.get(0)?,
        actor_did: row.get(1)?,
        subject_did: row.get(2)?,
        created_at: row.get(3)?,
        indexed_at: row.get(4)?,
        deleted_at: row.get(5)?,
    })
}

fn profile_from_row(row: &Row) -> rusqlite::Result<Profile> {
    Ok(Profile {
        actor_did: row.get(0)?,
        commit_cid: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        self_labels: json_column(row, 4)?,
        created_at: row.get(5)?,
        indexed_at: row.get(6)?,
    })
}

fn select_actor(conn: &Connection, did: &str) -> StoreResult<Option<Actor>> {
    Ok(conn
        .query_row(
            &format!("SELECT {ACTOR_COLUMNS} FROM actors WHERE did = ?1"),
            params![did],
            actor_from_row,
        )
        .optional()?)
}

fn update_actor(
    conn: &Connection,
    did: &str,
    sql: &str,
    value: &dyn rusqlite::ToSql,
) -> StoreResult<Actor> {
    let changed = conn.execute(sql, params![did, value])?;
    if changed == 0 {
        return Err(StoreError::ActorNotFound(did.to_string()));
    }
    select_actor(conn, did)?.ok_or_else(|| StoreError::ActorNotFound(did.to_string()))
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_cursor(&self) -> StoreResult<Option<i64>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT cursor FROM firehose_cursor WHERE id = 0", [], |r| {
                    r.get(0)
                })
                .optional()?)
        })
        .await
    }

    async fn set_cursor(&self, cursor: i64) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO firehose_cursor (id, cursor) VALUES (0, ?1)
                 ON CONFLICT (id) DO UPDATE SET cursor = excluded.cursor",
                params![cursor],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_actors(&self, status: Option<ActorStatus>) -> StoreResult<Vec<Actor>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACTOR_COLUMNS} FROM actors
                 WHERE ?1 IS NULL OR status = ?1
                 ORDER BY did"
            ))?;
            let actors = stmt
                .query_map(params![status.map(|s| s.as_str())], actor_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(actors)
        })
        .await
    }

    async fn get_actor(&self, did: &str) -> StoreResult<Option<Actor>> {
        let did = did.to_string();
        self.with_conn(move |conn| select_actor(conn, &did)).await
    }

    async fn create_actor(&self, actor: Actor) -> StoreResult<Actor> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            if select_actor(&tx, &actor.did)?.is_some() {
                return Err(StoreError::ActorExists(actor.did));
            }
            tx.execute(
                &format!("INSERT INTO actors ({ACTOR_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    actor.did,
                    actor.status.as_str(),
                    actor.comment,
                    actor.is_artist,
                    to_json_list(&actor.roles),
                    actor.held_until,
                    actor.current_profile_commit_cid,
                    actor.created_at,
                ],
            )?;
            tx.commit()?;
            Ok(actor)
        })
        .await
    }

    async fn update_actor_status(&self, did: &str, status: ActorStatus) -> StoreResult<Actor> {
        let did = did.to_string();
        self.with_conn(move |conn| {
            update_actor(
                conn,
                &did,
                "UPDATE actors SET status = ?2 WHERE did = ?1",
                &status.as_str(),
            )
        })
        .await
    }

    async fn hold_actor_until(
        &self,
        did: &str,
        until: Option<DateTime<Utc>>,
    ) -> StoreResult<Actor> {
        let did = did.to_string();
        self.with_conn(move |conn| {
            update_actor(
                conn,
                &did,
                "UPDATE actors SET held_until = ?2 WHERE did = ?1",
                &until,
            )
        })
        .await
    }

    async fn create_post(&self, post: Post) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO posts (uri, actor_did, created_at, indexed_at, hashtags, self_labels, tags, has_media, has_video, is_nsfw, raw, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT (uri) DO NOTHING",
                params![
                    post.uri,
                    post.actor_did,
                    post.created_at,
                    post.indexed_at,
                    to_json_list(&post.hashtags),
                    to_json_list(&post.self_labels),
                    to_json_list(&post.tags),
                    post.has_media,
                    post.has_video,
                    post.is_nsfw,
                    post.raw.to_string(),
                    post.deleted_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_post(&self, uri: &str) -> StoreResult<Option<Post>> {
        let uri = uri.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT uri, actor_did, created_at, indexed_at, hashtags, self_labels, tags, has_media, has_video, is_nsfw, raw, deleted_at
                     FROM posts WHERE uri = ?1",
                    params![uri],
                    post_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn soft_delete_post(&self, uri: &str) -> StoreResult<()> {
        let uri = uri.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE posts SET deleted_at = COALESCE(deleted_at, ?2) WHERE uri = ?1",
                params![uri, Utc::now()],
            )?;
            Ok(())
        })
        .await
    }

    async fn create_like(&self, like: Like) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO likes (uri, actor_did, subject_uri, created_at, indexed_at, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (uri) DO NOTHING",
                params![
                    like.uri,
                    like.actor_did,
                    like.subject_uri,
                    like.created_at,
                    like.indexed_at,
                    like.deleted_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_like(&self, uri: &str) -> StoreResult<Option<Like>> {
        let uri = uri.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT uri, actor_did, subject_uri, created_at, indexed_at, deleted_at
                     FROM likes WHERE uri = ?1",
                    params![uri],
                    like_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn soft_delete_like(&self, uri: &str) -> StoreResult<()> {
        let uri = uri.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE likes SET deleted_at = COALESCE(deleted_at, ?2) WHERE uri = ?1",
                params![uri, Utc::now()],
            )?;
            Ok(())
        })
        .await
    }

    async fn create_follow(&self, follow: Follow) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO follows (uri, actor_did, subject_did, created_at, indexed_at, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (uri) DO NOTHING",
                params![
                    follow.uri,
                    follow.actor_did,
                    follow.subject_did,
                    follow.created_at,
                    follow.indexed_at,
                    follow.deleted_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_follow(&self, uri: &str) -> StoreResult<Option<Follow>> {
        let uri = uri.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT uri, actor_did, subject_did, created_at, indexed_at, deleted_at
                     FROM follows WHERE uri = ?1",
                    params![uri],
                    follow_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn soft_delete_follow(&self, uri: &str) -> StoreResult<()> {
        let uri = uri.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE follows SET deleted_at = COALESCE(deleted_at, ?2) WHERE uri = ?1",
                params![uri, Utc::now()],
            )?;
            Ok(())
        })
        .await
    }

    async fn create_or_update_profile(&self, profile: Profile) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT INTO profiles (actor_did, commit_cid, display_name, description, self_labels, created_at, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (actor_did, commit_cid) DO NOTHING",
                params![
                    profile.actor_did,
                    profile.commit_cid,
                    profile.display_name,
                    profile.description,
                    to_json_list(&profile.self_labels),
                    profile.created_at,
                    profile.indexed_at,
                ],
            )?;
            if inserted > 0 {
                tx.execute(
                    "UPDATE actors SET current_profile_commit_cid = ?2 WHERE did = ?1",
                    params![profile.actor_did, profile.commit_cid],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_latest_profile(&self, did: &str) -> StoreResult<Option<Profile>> {
        let did = did.to_string();
        self.with_conn(move |conn| {
            let pointed = conn
                .query_row(
                    &format!(
                        "SELECT {PROFILE_COLUMNS} FROM profiles p
                         JOIN actors a ON a.did = p.actor_did AND a.current_profile_commit_cid = p.commit_cid
                         WHERE p.actor_did = ?1"
                    ),
                    params![did],
                    profile_from_row,
                )
                .optional()?;
            if pointed.is_some() {
                return Ok(pointed);
            }
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {PROFILE_COLUMNS} FROM profiles p WHERE p.actor_did = ?1
                         ORDER BY p.indexed_at DESC, p.rowid DESC LIMIT 1"
                    ),
                    params![did],
                    profile_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn list_profile_history(&self, did: &str) -> StoreResult<Vec<Profile>> {
        let did = did.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROFILE_COLUMNS} FROM profiles p WHERE p.actor_did = ?1
                 ORDER BY p.indexed_at, p.rowid"
            ))?;
            let history = stmt
                .query_map(params![did], profile_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(history)
        })
        .await
    }
}
