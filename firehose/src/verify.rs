use std::sync::Arc;

use base64::Engine;
use cid::Cid;
use ipld_core::ipld::Ipld;
use multihash_codetable::{Code, MultihashDigest};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{IntegrityError, OpenError};
use crate::events::Payload;

const SHA2_256: u64 = 0x12;

/// Decides whether a block may be trusted to be what its CID says.
pub trait BlockVerifier: Send + Sync {
    fn verify(&self, cid: &Cid, block: &[u8]) -> Result<(), IntegrityError>;
}

/// Recompute the block's sha2-256 and compare with the claimed digest.
pub struct Sha256Verifier;

impl BlockVerifier for Sha256Verifier {
    fn verify(&self, cid: &Cid, block: &[u8]) -> Result<(), IntegrityError> {
        let claimed = cid.hash();
        if claimed.code() != SHA2_256 {
            return Err(IntegrityError::UnsupportedHash(claimed.code()));
        }
        let computed = Code::Sha2_256.digest(block);
        if computed.digest() != claimed.digest() {
            return Err(IntegrityError::Mismatch {
                claimed: cid.to_string(),
                computed: Cid::new_v1(cid.codec(), computed).to_string(),
            });
        }
        Ok(())
    }
}

/// Accept every block as-is, for relays that are trusted to have checked.
pub struct TrustRelay;

impl BlockVerifier for TrustRelay {
    fn verify(&self, _cid: &Cid, _block: &[u8]) -> Result<(), IntegrityError> {
        Ok(())
    }
}

/// Turns event payloads into typed records.
///
/// JSON payloads come from a trusted transport and are decoded directly.
/// Blocks go through the configured verifier first.
#[derive(Clone)]
pub struct RecordOpener {
    verifier: Arc<dyn BlockVerifier>,
}

impl RecordOpener {
    pub fn new(verifier: impl BlockVerifier + 'static) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }

    pub fn verifying() -> Self {
        Self::new(Sha256Verifier)
    }

    pub fn trusting() -> Self {
        Self::new(TrustRelay)
    }

    pub fn open<T: DeserializeOwned>(&self, payload: &Payload) -> Result<T, OpenError> {
        match payload {
            Payload::Json(raw) => Ok(serde_json::from_str(raw.get())?),
            Payload::Block { cid, bytes } => {
                self.verifier.verify(cid, bytes)?;
                decode_block(bytes)
            }
        }
    }

    /// Like [RecordOpener::open], but also hand back the whole record as
    /// JSON, fields the typed record does not model included.
    pub fn open_with_raw<T: DeserializeOwned>(
        &self,
        payload: &Payload,
    ) -> Result<(T, Value), OpenError> {
        match payload {
            Payload::Json(raw) => {
                let record = serde_json::from_str(raw.get())?;
                Ok((record, serde_json::from_str(raw.get())?))
            }
            Payload::Block { cid, bytes } => {
                self.verifier.verify(cid, bytes)?;
                let record = decode_block(bytes)?;
                let ipld: Ipld = decode_block(bytes)?;
                Ok((record, ipld_to_json(ipld)))
            }
        }
    }
}

fn decode_block<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, OpenError> {
    serde_ipld_dagcbor::from_slice(bytes).map_err(|e| OpenError::Cbor(e.to_string()))
}

/// DAG-CBOR data model to the atproto JSON encoding: links become
/// `{"$link": cid}` and byte strings `{"$bytes": base64}`.
fn ipld_to_json(ipld: Ipld) -> Value {
    match ipld {
        Ipld::Null => Value::Null,
        Ipld::Bool(b) => Value::Bool(b),
        Ipld::Integer(i) => {
            if let Ok(n) = i64::try_from(i) {
                Value::from(n)
            } else if let Ok(n) = u64::try_from(i) {
                Value::from(n)
            } else {
                // atproto integers are 64 bit, so this does not come up
                Value::String(i.to_string())
            }
        }
        Ipld::Float(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        Ipld::String(s) => Value::String(s),
        Ipld::Bytes(b) => {
            json!({ "$bytes": base64::engine::general_purpose::STANDARD_NO_PAD.encode(b) })
        }
        Ipld::List(items) => Value::Array(items.into_iter().map(ipld_to_json).collect()),
        Ipld::Map(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, ipld_to_json(v)))
                .collect(),
        ),
        Ipld::Link(cid) => json!({ "$link": cid.to_string() }),
    }
}

impl Default for RecordOpener {
    fn default() -> Self {
        Self::verifying()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::testing::cid_for;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Post {
        text: String,
        created_at: String,
    }

    fn block() -> Vec<u8> {
        serde_ipld_dagcbor::to_vec(&serde_json::json!({
            "$type": "app.bsky.feed.post",
            "createdAt": "2025-01-26T17:11:03.522Z",
            "text": "#fursuit friday",
        }))
        .unwrap()
    }

    #[test]
    fn test_verifier_accepts_matching_block() {
        let bytes = block();
        assert!(Sha256Verifier.verify(&cid_for(&bytes), &bytes).is_ok());
    }

    #[test]
    fn test_verifier_rejects_tampered_block() {
        let bytes = block();
        let cid = cid_for(&bytes);
        let mut tampered = bytes.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(matches!(
            Sha256Verifier.verify(&cid, &tampered),
            Err(IntegrityError::Mismatch { .. })
        ));
        assert!(TrustRelay.verify(&cid, &tampered).is_ok());
    }

    #[test]
    fn test_verifier_rejects_other_hashes() {
        let bytes = block();
        let cid = Cid::new_v1(0x71, Code::Sha2_512.digest(&bytes));
        assert!(matches!(
            Sha256Verifier.verify(&cid, &bytes),
            Err(IntegrityError::UnsupportedHash(0x13))
        ));
    }

    #[test]
    fn test_open_block() {
        let bytes = block();
        let payload = Payload::Block {
            cid: cid_for(&bytes),
            bytes,
        };
        let post: Post = RecordOpener::verifying().open(&payload).unwrap();
        assert_eq!(post.text, "#fursuit friday");
    }

    #[test]
    fn test_open_tampered_block_fails_only_when_verifying() {
        let bytes = block();
        let cid = cid_for(&bytes);
        let other = serde_ipld_dagcbor::to_vec(&serde_json::json!({
            "createdAt": "2025-01-26T17:11:03.522Z",
            "text": "swapped",
        }))
        .unwrap();
        let payload = Payload::Block { cid, bytes: other };
        assert!(matches!(
            RecordOpener::verifying().open::<Post>(&payload),
            Err(OpenError::Integrity(_))
        ));
        let post: Post = RecordOpener::trusting().open(&payload).unwrap();
        assert_eq!(post.text, "swapped");
    }

    #[test]
    fn test_open_json() {
        let raw = serde_json::value::RawValue::from_string(
            r#"{"createdAt":"2025-01-26T17:11:03.522Z","text":"hi"}"#.to_string(),
        )
        .unwrap();
        let post: Post = RecordOpener::verifying().open(&Payload::Json(raw)).unwrap();
        assert_eq!(
            post,
            Post {
                text: "hi".into(),
                created_at: "2025-01-26T17:11:03.522Z".into()
            }
        );
        let bad = serde_json::value::RawValue::from_string(r#"{"text":1}"#.to_string()).unwrap();
        assert!(matches!(
            RecordOpener::verifying().open::<Post>(&Payload::Json(bad)),
            Err(OpenError::Json(_))
        ));
    }

    #[test]
    fn test_open_with_raw_keeps_unmodelled_fields() {
        let image = cid_for(b"some jpeg");
        let bytes = serde_ipld_dagcbor::to_vec(&Ipld::Map(
            [
                ("$type".to_string(), Ipld::String("app.bsky.feed.post".into())),
                ("createdAt".to_string(), Ipld::String("2025-01-26T17:11:03.522Z".into())),
                ("text".to_string(), Ipld::String("#fursuit friday".into())),
                ("via".to_string(), Ipld::String("some client".into())),
                ("langs".to_string(), Ipld::List(vec![Ipld::String("en".into())])),
                ("ratio".to_string(), Ipld::Float(1.5)),
                ("salt".to_string(), Ipld::Bytes(vec![0xde, 0xad])),
                (
                    "image".to_string(),
                    Ipld::Map(
                        [
                            ("$type".to_string(), Ipld::String("blob".into())),
                            ("ref".to_string(), Ipld::Link(image)),
                            ("size".to_string(), Ipld::Integer(477460)),
                        ]
                        .into(),
                    ),
                ),
            ]
            .into(),
        ))
        .unwrap();
        let payload = Payload::Block {
            cid: cid_for(&bytes),
            bytes,
        };

        let (post, raw): (Post, Value) = RecordOpener::verifying().open_with_raw(&payload).unwrap();
        assert_eq!(post.text, "#fursuit friday");
        assert_eq!(
            raw,
            json!({
                "$type": "app.bsky.feed.post",
                "createdAt": "2025-01-26T17:11:03.522Z",
                "text": "#fursuit friday",
                "via": "some client",
                "langs": ["en"],
                "ratio": 1.5,
                "salt": { "$bytes": "3q0" },
                "image": {
                    "$type": "blob",
                    "ref": { "$link": image.to_string() },
                    "size": 477460,
                },
            })
        );
    }

    #[test]
    fn test_open_with_raw_json_is_verbatim() {
        let text = r#"{"createdAt":"2025-01-26T17:11:03.522Z","text":"hi","via":{"app":"x","n":3}}"#;
        let raw = serde_json::value::RawValue::from_string(text.to_string()).unwrap();
        let (post, value): (Post, Value) =
            RecordOpener::trusting().open_with_raw(&Payload::Json(raw)).unwrap();
        assert_eq!(post.text, "hi");
        assert_eq!(value, serde_json::from_str::<Value>(text).unwrap());
    }
}
