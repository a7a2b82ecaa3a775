use firehose::error::OpenError;
use firehose::{ConnectionError, StreamError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("actor {0} already exists")]
    ActorExists(String),
    #[error("actor {0} not found")]
    ActorNotFound(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure handling a single commit event. The event is dropped.
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("create/update commit operation missing record data")]
    MissingRecord,
    #[error("commit operation missing record cid")]
    MissingCid,
    #[error("repo did is not valid: {0:?}")]
    BadDid(String),
    #[error("bad record timestamp {0:?}: {1}")]
    BadTimestamp(String, chrono::ParseError),
    #[error("like subject is not a record uri: {0:?}")]
    BadSubject(String),
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error("storage: {0}")]
    Store(#[from] StoreError),
}

impl HandleError {
    /// Integrity failures mean the relay sent content that is not what it
    /// claims to be, which deserves louder reporting than a decode miss.
    pub fn is_integrity(&self) -> bool {
        matches!(self, HandleError::Open(OpenError::Integrity(_)))
    }
}

/// Failures that end an ingester run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("reading the resume cursor: {0}")]
    Cursor(StoreError),
    #[error("connecting upstream: {0}")]
    Connect(#[from] ConnectionError),
    #[error("upstream stream failed: {0}")]
    Stream(#[from] StreamError),
    #[error("upstream stream ended")]
    StreamEnded,
    #[error("all workers exited")]
    WorkersGone,
}
