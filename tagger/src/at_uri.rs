use std::fmt;

use crate::did::parse_did;

/// A record address: `at://{did}/{collection}/{rkey}`
///
/// Only the DID-authority form is handled. Handles as authority and URIs that
/// stop at the collection are rejected, since every stored record is keyed by
/// the full three-part form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordUri {
    pub did: String,
    pub collection: String,
    pub rkey: String,
}

impl RecordUri {
    pub fn new(did: &str, collection: &str, rkey: &str) -> Self {
        Self {
            did: did.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        // 8 KB max in atproto
        if !s.is_ascii() || s.len() > 8 * 1024 {
            return None;
        }
        let rest = s.strip_prefix("at://")?;
        let rest = rest.split(|c| c == '?' || c == '#').next()?;
        let mut parts = rest.splitn(3, '/');
        let did = parse_did(parts.next()?)?;
        let collection = parts.next().filter(|c| is_nsid_ish(c))?;
        let rkey = parts.next().filter(|r| is_rkey(r))?;
        Some(Self::new(did, collection, rkey))
    }
}

impl fmt::Display for RecordUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.did, self.collection, self.rkey)
    }
}

fn is_nsid_ish(s: &str) -> bool {
    s.split('.').count() >= 3
        && s.split('.').all(|seg| {
            !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// see https://atproto.com/specs/record-key
fn is_rkey(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 512
        && s != "."
        && s != ".."
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '~'))
}
