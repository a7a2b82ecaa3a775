use cid::Cid;
use serde::Deserialize;
use serde_json::value::RawValue;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommitOp {
    Create,
    Update,
    Delete,
}

impl CommitOp {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "create" => Some(CommitOp::Create),
            "update" => Some(CommitOp::Update),
            "delete" => Some(CommitOp::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommitOp::Create => "create",
            CommitOp::Update => "update",
            CommitOp::Delete => "delete",
        }
    }
}

/// The record body carried by a create or update.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Pre-decoded JSON from a trusted relay. Nothing to verify.
    Json(Box<RawValue>),
    /// Raw DAG-CBOR block as shipped in a commit's block archive, together
    /// with the CID the commit claims for it.
    Block { cid: Cid, bytes: Vec<u8> },
}

/// One record mutation from the upstream stream.
///
/// `seq` is monotonic per connection but not dense. A single upstream commit
/// touching several records becomes several events sharing one `seq`.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    pub seq: i64,
    pub did: String,
    pub op: CommitOp,
    pub collection: String,
    pub rkey: String,
    /// claimed record CID, absent for deletes
    pub cid: Option<String>,
    /// absent for deletes and for records the relay did not ship
    pub payload: Option<Payload>,
}

/// Every record mutation from one upstream commit.
///
/// This is the unit of work downstream: a position only counts as processed
/// once all of its ops have been handled, since they share one `seq`.
#[derive(Debug, Clone)]
pub struct Commit {
    pub seq: i64,
    pub ops: Vec<CommitEvent>,
}

impl From<CommitEvent> for Commit {
    fn from(event: CommitEvent) -> Self {
        Commit {
            seq: event.seq,
            ops: vec![event],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JetstreamEvent {
    #[serde(rename = "time_us")]
    pub cursor: i64,
    pub did: String,
    pub kind: EventKind,
    #[serde(default)]
    pub commit: Option<JetstreamCommit>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Commit,
    Identity,
    Account,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct JetstreamCommit {
    #[serde(default)]
    pub rev: String,
    pub operation: CommitOp,
    pub collection: String,
    pub rkey: String,
    #[serde(default)]
    pub record: Option<Box<RawValue>>,
    #[serde(default)]
    pub cid: Option<String>,
}

impl JetstreamEvent {
    /// Identity and account events carry no record, so they map to nothing.
    pub fn into_commit_event(self) -> Option<CommitEvent> {
        if self.kind != EventKind::Commit {
            return None;
        }
        let commit = self.commit?;
        Some(CommitEvent {
            seq: self.cursor,
            did: self.did,
            op: commit.operation,
            collection: commit.collection,
            rkey: commit.rkey,
            cid: commit.cid,
            payload: commit.record.map(Payload::Json),
        })
    }
}
