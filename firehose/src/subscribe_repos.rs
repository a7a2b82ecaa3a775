//! `com.atproto.sync.subscribeRepos` over websocket.
//!
//! Every binary message is two concatenated DAG-CBOR objects: a header
//! `{op, t}` and a body. `op == 1` is a message of type `t`, `op == -1` an
//! error. Record contents arrive as blocks inside the commit's CAR archive
//! and are left encoded; [crate::verify::RecordOpener] opens them.

use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use cid::Cid;
use serde::Deserialize;
use tokio_tungstenite::{
    connect_async,
    tungstenite::Message,
};

use crate::{
    build_request,
    car,
    error::{
        ConnectionError,
        FrameError,
        StreamError,
    },
    events::{
        Commit,
        CommitEvent,
        CommitOp,
        Payload,
    },
    next_data,
    EventSource,
    EventStream,
    Socket,
};

pub const DEFAULT_RELAY: &str = "wss://bsky.network/xrpc/com.atproto.sync.subscribeRepos";

#[derive(Debug, Deserialize)]
struct FrameHeader {
    op: i64,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoBody {
    name: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitBody {
    pub seq: i64,
    pub repo: String,
    #[serde(default)]
    pub rev: String,
    pub ops: Vec<RepoOp>,
    #[serde(with = "serde_bytes")]
    pub blocks: Vec<u8>,
    #[serde(default)]
    pub too_big: bool,
}

#[derive(Debug, Deserialize)]
pub struct RepoOp {
    pub action: String,
    pub path: String,
    pub cid: Option<Cid>,
}

#[derive(Debug)]
pub enum Frame {
    Commit(CommitBody),
    Info { name: String, message: Option<String> },
    Error { error: String, message: Option<String> },
    /// identity, account, sync and anything newer
    Other(Option<String>),
}

fn body<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, FrameError> {
    serde_ipld_dagcbor::from_slice(bytes).map_err(|e| FrameError::Body(e.to_string()))
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    let mut reader = Cursor::new(bytes);
    let header: FrameHeader =
        ciborium::from_reader(&mut reader).map_err(|e| FrameError::Header(e.to_string()))?;
    let rest = bytes
        .get(reader.position() as usize..)
        .ok_or_else(|| FrameError::Header("header ran past the frame".into()))?;

    match (header.op, header.t.as_deref()) {
        (-1, _) => {
            let e: ErrorBody = body(rest)?;
            Ok(Frame::Error {
                error: e.error,
                message: e.message,
            })
        }
        (1, Some("#commit")) => Ok(Frame::Commit(body(rest)?)),
        (1, Some("#info")) => {
            let info: InfoBody = body(rest)?;
            Ok(Frame::Info {
                name: info.name,
                message: info.message,
            })
        }
        (1, t) => Ok(Frame::Other(t.map(str::to_string))),
        (op, _) => Err(FrameError::UnknownOp(op)),
    }
}

/// Split a commit into one event per op.
///
/// Create and update ops get their block from the archive when the relay
/// shipped it. Ops with an unknown action or a malformed path are dropped
/// with a warning; a broken archive fails the whole commit.
pub fn commit_events(commit: CommitBody) -> Result<Vec<CommitEvent>, FrameError> {
    let blocks = if commit.blocks.is_empty() {
        HashMap::new()
    } else {
        car::read_blocks(&commit.blocks)?
    };
    if commit.too_big {
        log::debug!("commit {} is too big, records are not included", commit.seq);
    }

    let mut events = Vec::with_capacity(commit.ops.len());
    for op in commit.ops {
        let Some(action) = CommitOp::from_action(&op.action) else {
            log::warn!("commit {}: {}", commit.seq, FrameError::UnknownAction(op.action));
            continue;
        };
        let Some((collection, rkey)) = op.path.split_once('/') else {
            log::warn!("commit {}: {}", commit.seq, FrameError::BadPath(op.path.clone()));
            continue;
        };
        let payload = match (action, op.cid) {
            (CommitOp::Delete, _) | (_, None) => None,
            (_, Some(cid)) => blocks.get(&cid).map(|bytes| Payload::Block {
                cid,
                bytes: bytes.clone(),
            }),
        };
        events.push(CommitEvent {
            seq: commit.seq,
            did: commit.repo.clone(),
            op: action,
            collection: collection.to_string(),
            rkey: rkey.to_string(),
            cid: op.cid.map(|c| c.to_string()),
            payload,
        });
    }
    Ok(events)
}

pub struct SubscribeReposConfig {
    pub endpoint: String,
    pub user_agent: Option<String>,
}

impl Default for SubscribeReposConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_RELAY.to_string(),
            user_agent: None,
        }
    }
}

pub struct SubscribeReposSource {
    config: SubscribeReposConfig,
}

impl SubscribeReposSource {
    pub fn new(config: SubscribeReposConfig) -> Result<Self, ConnectionError> {
        let _ = config.endpoint.parse::<url::Url>()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl EventSource for SubscribeReposSource {
    async fn connect(&self, cursor: Option<i64>) -> Result<Box<dyn EventStream>, ConnectionError> {
        let req = build_request(
            &self.config.endpoint,
            vec![],
            cursor,
            self.config.user_agent.as_deref(),
        )?;
        let (socket, _) = connect_async(req).await?;
        log::info!(
            "relay connected at {} (cursor: {cursor:?})",
            self.config.endpoint
        );
        Ok(Box::new(SubscribeReposStream {
            socket,
            last_seq: None,
        }))
    }
}

pub struct SubscribeReposStream {
    socket: Socket,
    last_seq: Option<i64>,
}

/// Turn one binary frame into a commit. `Ok(None)` for frames that carry no
/// commit, are undecodable, or are at or behind `last_seq`; error frames end
/// the stream.
pub(crate) fn accept_frame(
    bytes: &[u8],
    last_seq: &mut Option<i64>,
) -> Result<Option<Commit>, StreamError> {
    let commit = match decode_frame(bytes) {
        Ok(Frame::Commit(commit)) => commit,
        Ok(Frame::Error { error, message }) => {
            return Err(StreamError::Upstream { error, message })
        }
        Ok(Frame::Info { name, message }) => {
            log::info!("relay info: {name} ({message:?})");
            return Ok(None);
        }
        Ok(Frame::Other(t)) => {
            log::trace!("skipping {t:?} frame");
            return Ok(None);
        }
        Err(e) => {
            log::warn!("dropping undecodable frame: {e}");
            return Ok(None);
        }
    };

    if let Some(last) = *last_seq {
        if commit.seq <= last {
            log::warn!(
                "commit seq {} was older than the last one: {last}. dropping commit.",
                commit.seq
            );
            return Ok(None);
        }
    }
    *last_seq = Some(commit.seq);

    let seq = commit.seq;
    match commit_events(commit) {
        Ok(ops) => Ok(Some(Commit { seq, ops })),
        Err(e) => {
            log::warn!("dropping commit {seq}: {e}");
            Ok(None)
        }
    }
}

#[async_trait]
impl EventStream for SubscribeReposStream {
    async fn next_commit(&mut self) -> Result<Option<Commit>, StreamError> {
        loop {
            let Some(message) = next_data(&mut self.socket).await? else {
                return Ok(None);
            };
            match message {
                Message::Binary(bytes) => {
                    if let Some(commit) = accept_frame(&bytes, &mut self.last_seq)? {
                        return Ok(Some(commit));
                    }
                }
                _ => log::warn!("unexpected text message on the relay stream, skipping"),
            }
        }
    }
}
