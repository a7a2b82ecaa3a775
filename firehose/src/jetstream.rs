use async_trait::async_trait;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        handshake::client::Request,
        Message,
    },
};
use url::Url;

use crate::{
    build_request,
    error::{
        ConfigValidationError,
        ConnectionError,
        StreamError,
    },
    events::{
        Commit,
        CommitEvent,
        JetstreamEvent,
    },
    next_data,
    EventSource,
    EventStream,
    Socket,
};

/// The Jetstream endpoints officially provided by Bluesky themselves.
pub enum DefaultJetstreamEndpoints {
    /// `jetstream1.us-east.bsky.network`
    USEastOne,
    /// `jetstream2.us-east.bsky.network`
    USEastTwo,
    /// `jetstream1.us-west.bsky.network`
    USWestOne,
    /// `jetstream2.us-west.bsky.network`
    USWestTwo,
}

impl DefaultJetstreamEndpoints {
    /// Rewrite one of the shortcuts `us-east-1`, `us-east-2`, `us-west-1`,
    /// `us-west-2` to its bluesky-operated endpoint; pass anything else through.
    pub fn endpoint_or_shortcut(s: &str) -> String {
        match s {
            "us-east-1" => DefaultJetstreamEndpoints::USEastOne.into(),
            "us-east-2" => DefaultJetstreamEndpoints::USEastTwo.into(),
            "us-west-1" => DefaultJetstreamEndpoints::USWestOne.into(),
            "us-west-2" => DefaultJetstreamEndpoints::USWestTwo.into(),
            custom => custom.into(),
        }
    }
}

impl From<DefaultJetstreamEndpoints> for String {
    fn from(endpoint: DefaultJetstreamEndpoints) -> Self {
        match endpoint {
            DefaultJetstreamEndpoints::USEastOne => {
                "wss://jetstream1.us-east.bsky.network/subscribe".to_owned()
            }
            DefaultJetstreamEndpoints::USEastTwo => {
                "wss://jetstream2.us-east.bsky.network/subscribe".to_owned()
            }
            DefaultJetstreamEndpoints::USWestOne => {
                "wss://jetstream1.us-west.bsky.network/subscribe".to_owned()
            }
            DefaultJetstreamEndpoints::USWestTwo => {
                "wss://jetstream2.us-west.bsky.network/subscribe".to_owned()
            }
        }
    }
}

/// The maximum number of wanted collections that can be requested on a single Jetstream connection.
const MAX_WANTED_COLLECTIONS: usize = 100;
/// The maximum number of wanted DIDs that can be requested on a single Jetstream connection.
const MAX_WANTED_DIDS: usize = 10_000;

pub struct JetstreamConfig {
    /// A Jetstream endpoint to connect to with a WebSocket Scheme i.e.
    /// `wss://jetstream1.us-east.bsky.network/subscribe`.
    pub endpoint: String,
    /// Collection NSIDs to filter events for. Empty means all collections.
    pub wanted_collections: Vec<String>,
    /// Repo DIDs to filter events for. Empty means all repos.
    pub wanted_dids: Vec<String>,
    /// User agent string to include with the connection request
    pub user_agent: Option<String>,
}

impl Default for JetstreamConfig {
    fn default() -> Self {
        JetstreamConfig {
            endpoint: DefaultJetstreamEndpoints::USEastOne.into(),
            wanted_collections: Vec::new(),
            wanted_dids: Vec::new(),
            user_agent: None,
        }
    }
}

impl JetstreamConfig {
    pub fn request(&self, cursor: Option<i64>) -> Result<Request, ConnectionError> {
        let params = self
            .wanted_dids
            .iter()
            .map(|s| ("wantedDids", s.to_string()))
            .chain(
                self.wanted_collections
                    .iter()
                    .map(|s| ("wantedCollections", s.to_string())),
            )
            .chain(std::iter::once(("compress", "false".to_string())))
            .collect();
        build_request(&self.endpoint, params, cursor, self.user_agent.as_deref())
    }

    /// Check the configuration against the Jetstream API limits, and parse
    /// the endpoint so a bad one fails early.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let collections = self.wanted_collections.len();
        let dids = self.wanted_dids.len();

        if collections > MAX_WANTED_COLLECTIONS {
            return Err(ConfigValidationError::TooManyWantedCollections(collections));
        }

        if dids > MAX_WANTED_DIDS {
            return Err(ConfigValidationError::TooManyDids(dids));
        }

        let _ = self.endpoint.parse::<Url>()?;

        Ok(())
    }
}

/// Jetstream as an [EventSource]. The `time_us` cursor is used as the
/// sequence number.
pub struct JetstreamSource {
    config: JetstreamConfig,
}

impl JetstreamSource {
    pub fn new(config: JetstreamConfig) -> Result<Self, ConfigValidationError> {
        config.validate()?;
        Ok(JetstreamSource { config })
    }
}

#[async_trait]
impl EventSource for JetstreamSource {
    async fn connect(&self, cursor: Option<i64>) -> Result<Box<dyn EventStream>, ConnectionError> {
        self.config
            .validate()
            .map_err(ConnectionError::InvalidConfig)?;
        let req = self.config.request(cursor)?;
        let (socket, _) = connect_async(req).await?;
        log::info!(
            "jetstream connected to {} (cursor: {cursor:?})",
            self.config.endpoint
        );
        Ok(Box::new(JetstreamStream {
            socket,
            last_cursor: None,
        }))
    }
}

pub struct JetstreamStream {
    socket: Socket,
    last_cursor: Option<i64>,
}

/// Decode one jetstream text message. `None` for malformed messages, events
/// at or behind `last_cursor`, and non-commit events; `last_cursor` moves
/// forward for every well-formed in-order event.
pub(crate) fn accept_message(json: &str, last_cursor: &mut Option<i64>) -> Option<CommitEvent> {
    let event: JetstreamEvent = match serde_json::from_str(json) {
        Ok(ev) => ev,
        Err(e) => {
            log::warn!(
                "failed to parse json: {e:?} (from {})",
                json.get(..24).unwrap_or(json)
            );
            return None;
        }
    };
    if let Some(last) = *last_cursor {
        if event.cursor <= last {
            log::warn!(
                "event cursor {} was older than the last one: {last}. dropping event.",
                event.cursor
            );
            return None;
        }
    }
    *last_cursor = Some(event.cursor);
    event.into_commit_event()
}

#[async_trait]
impl EventStream for JetstreamStream {
    /// Jetstream splits commits into one message per op, each with its own
    /// `time_us`, so every message is a commit of one op.
    async fn next_commit(&mut self) -> Result<Option<Commit>, StreamError> {
        loop {
            let Some(message) = next_data(&mut self.socket).await? else {
                return Ok(None);
            };
            match message {
                Message::Text(json) => {
                    if let Some(event) = accept_message(&json, &mut self.last_cursor) {
                        return Ok(Some(event.into()));
                    }
                }
                Message::Binary(_) => {
                    log::warn!("unexpected binary message on an uncompressed jetstream, skipping")
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_shortcuts() {
        assert_eq!(
            DefaultJetstreamEndpoints::endpoint_or_shortcut("us-west-2"),
            "wss://jetstream2.us-west.bsky.network/subscribe"
        );
        assert_eq!(
            DefaultJetstreamEndpoints::endpoint_or_shortcut("ws://localhost:6008/subscribe"),
            "ws://localhost:6008/subscribe"
        );
    }

    #[test]
    fn test_request_params() {
        let config = JetstreamConfig {
            wanted_collections: vec!["app.bsky.feed.post".into(), "app.bsky.feed.like".into()],
            ..Default::default()
        };
        let req = config.request(Some(1732206349000167)).unwrap();
        assert_eq!(
            req.uri().query(),
            Some("wantedCollections=app.bsky.feed.post&wantedCollections=app.bsky.feed.like&compress=false&cursor=1732206349000167")
        );
    }

    #[test]
    fn test_validate_limits() {
        let config = JetstreamConfig {
            wanted_collections: (0..101).map(|i| format!("a.b.c{i}")).collect(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::TooManyWantedCollections(101))
        ));
        let config = JetstreamConfig {
            endpoint: "nope".into(),
            ..Default::default()
        };
        assert!(matches!(
            JetstreamSource::new(config),
            Err(ConfigValidationError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_accept_message_ordering() {
        let post = |t: i64| {
            format!(
                r#"{{"did":"did:plc:a","time_us":{t},"kind":"commit","commit":{{"rev":"x","operation":"delete","collection":"app.bsky.feed.post","rkey":"r{t}"}}}}"#
            )
        };
        let mut last = None;
        assert_eq!(accept_message(&post(10), &mut last).unwrap().seq, 10);
        assert!(accept_message(&post(10), &mut last).is_none());
        assert!(accept_message(&post(9), &mut last).is_none());
        assert!(accept_message("{not json", &mut last).is_none());
        assert_eq!(last, Some(10));
        assert_eq!(accept_message(&post(11), &mut last).unwrap().seq, 11);

        let account = r#"{"did":"did:plc:a","time_us":12,"kind":"account"}"#;
        assert!(accept_message(account, &mut last).is_none());
        assert_eq!(last, Some(12));
    }
}
