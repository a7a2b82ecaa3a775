use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Possible errors related to connection configuration.
#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("too many wanted collections: {0} > 100")]
    TooManyWantedCollections(usize),
    #[error("too many wanted DIDs: {0} > 10,000")]
    TooManyDids(usize),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

/// Errors opening a connection to an upstream source.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("invalid connection config: {0}")]
    InvalidConfig(ConfigValidationError),
    #[error("invalid endpoint url: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("invalid request uri: {0}")]
    InvalidUri(#[from] tungstenite::http::uri::InvalidUri),
    #[error("websocket connect failed: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// Errors that end an open stream.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("upstream sent an error frame: {error} ({message:?})")]
    Upstream {
        error: String,
        message: Option<String>,
    },
}

/// A single frame that could not be decoded. Never fatal for the stream.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("bad frame header: {0}")]
    Header(String),
    #[error("bad frame body: {0}")]
    Body(String),
    #[error("unknown frame op {0}")]
    UnknownOp(i64),
    #[error("unknown repo op action {0:?}")]
    UnknownAction(String),
    #[error("repo op path is not collection/rkey: {0:?}")]
    BadPath(String),
    #[error("bad block archive: {0}")]
    Car(#[from] CarError),
}

#[derive(Error, Debug)]
pub enum CarError {
    #[error("archive is truncated")]
    Truncated,
    #[error("varint is too long")]
    VarintOverflow,
    #[error("bad block cid: {0}")]
    Cid(#[from] cid::Error),
}

/// A block did not match the hash its CID claims.
#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("unsupported multihash code 0x{0:x}")]
    UnsupportedHash(u64),
    #[error("block content does not hash to claimed cid {claimed} (got {computed})")]
    Mismatch { claimed: String, computed: String },
}

/// Failure turning an event payload into a typed record.
#[derive(Error, Debug)]
pub enum OpenError {
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error("record json did not decode: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record cbor did not decode: {0}")]
    Cbor(String),
}
