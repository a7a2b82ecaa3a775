use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Moderation status of a tracked account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorStatus {
    None,
    Pending,
    Approved,
    Banned,
    OptedOut,
    Rejected,
}

#[derive(Debug, Error)]
#[error("unknown actor status {0:?}")]
pub struct UnknownStatus(pub String);

impl ActorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorStatus::None => "none",
            ActorStatus::Pending => "pending",
            ActorStatus::Approved => "approved",
            ActorStatus::Banned => "banned",
            ActorStatus::OptedOut => "opted_out",
            ActorStatus::Rejected => "rejected",
        }
    }

    /// Status after the actor follows the subject account, if it changes.
    ///
    /// Following is how accounts ask to be included: a fresh account goes to
    /// the moderation queue, an account that opted out earlier comes straight
    /// back. Moderator decisions (banned, rejected) are never undone here.
    pub fn after_subject_follow(self) -> Option<ActorStatus> {
        match self {
            ActorStatus::None => Some(ActorStatus::Pending),
            ActorStatus::OptedOut => Some(ActorStatus::Approved),
            _ => None,
        }
    }

    /// Status after the actor unfollows the subject account, if it changes.
    pub fn after_subject_unfollow(self) -> Option<ActorStatus> {
        match self {
            ActorStatus::Approved => Some(ActorStatus::OptedOut),
            ActorStatus::Pending => Some(ActorStatus::None),
            _ => None,
        }
    }
}

impl fmt::Display for ActorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "none" => ActorStatus::None,
            "pending" => ActorStatus::Pending,
            "approved" => ActorStatus::Approved,
            "banned" => ActorStatus::Banned,
            "opted_out" => ActorStatus::OptedOut,
            "rejected" => ActorStatus::Rejected,
            other => return Err(UnknownStatus(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub did: String,
    pub status: ActorStatus,
    pub comment: String,
    pub is_artist: bool,
    pub roles: Vec<String>,
    /// moderator hold; recorded but not consulted by ingestion
    pub held_until: Option<DateTime<Utc>>,
    pub current_profile_commit_cid: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Actor {
    pub fn new(did: &str, status: ActorStatus, comment: &str) -> Self {
        Self {
            did: did.to_string(),
            status,
            comment: comment.to_string(),
            is_artist: false,
            roles: vec![],
            held_until: None,
            current_profile_commit_cid: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == ActorStatus::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ActorStatus; 6] = [
        ActorStatus::None,
        ActorStatus::Pending,
        ActorStatus::Approved,
        ActorStatus::Banned,
        ActorStatus::OptedOut,
        ActorStatus::Rejected,
    ];

    #[test]
    fn test_status_strings() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<ActorStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
        assert!("approve".parse::<ActorStatus>().is_err());
    }

    #[test]
    fn test_follow_transitions() {
        for (from, expected) in [
            (ActorStatus::None, Some(ActorStatus::Pending)),
            (ActorStatus::Pending, None),
            (ActorStatus::Approved, None),
            (ActorStatus::Banned, None),
            (ActorStatus::OptedOut, Some(ActorStatus::Approved)),
            (ActorStatus::Rejected, None),
        ] {
            assert_eq!(from.after_subject_follow(), expected, "{from}");
        }
    }

    #[test]
    fn test_unfollow_transitions() {
        for (from, expected) in [
            (ActorStatus::None, None),
            (ActorStatus::Pending, Some(ActorStatus::None)),
            (ActorStatus::Approved, Some(ActorStatus::OptedOut)),
            (ActorStatus::Banned, None),
            (ActorStatus::OptedOut, None),
            (ActorStatus::Rejected, None),
        ] {
            assert_eq!(from.after_subject_unfollow(), expected, "{from}");
        }
    }
}
