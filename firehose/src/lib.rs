//! Upstream commit streams for atproto relays.
//!
//! Two transports feed the same [Commit] shape, one [CommitEvent] per record
//! op:
//!
//! - [jetstream::JetstreamSource]: JSON over websocket, pre-decoded records,
//!   trusted as-is.
//! - [subscribe_repos::SubscribeReposSource]: the relay's DAG-CBOR frames with
//!   CAR-packed record blocks, opened through a [verify::RecordOpener] that
//!   checks block hashes.

pub mod car;
pub mod error;
pub mod events;
pub mod jetstream;
pub mod subscribe_repos;
pub mod verify;

use async_trait::async_trait;
use futures_util::{
    SinkExt,
    StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{
        client::{
            ClientRequestBuilder,
            IntoClientRequest,
        },
        handshake::client::Request,
        Message,
    },
    MaybeTlsStream,
    WebSocketStream,
};
use url::Url;

pub use crate::{
    error::{
        ConnectionError,
        StreamError,
    },
    events::{
        Commit,
        CommitEvent,
        CommitOp,
        Payload,
    },
    verify::RecordOpener,
};

/// Opens commit streams.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Connect, replaying from `cursor` (inclusive) when given, otherwise
    /// tailing live.
    async fn connect(&self, cursor: Option<i64>) -> Result<Box<dyn EventStream>, ConnectionError>;
}

/// An open, ordered stream of commits.
#[async_trait]
pub trait EventStream: Send {
    /// The next commit with all of its ops, or `None` once the upstream
    /// closes.
    async fn next_commit(&mut self) -> Result<Option<Commit>, StreamError>;
}

pub(crate) type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) fn build_request(
    endpoint: &str,
    mut params: Vec<(&'static str, String)>,
    cursor: Option<i64>,
    user_agent: Option<&str>,
) -> Result<Request, ConnectionError> {
    if let Some(cursor) = cursor {
        params.push(("cursor", cursor.to_string()));
    }
    // parse_with_params leaves a bare `?` behind when there is nothing to add
    let url = if params.is_empty() {
        Url::parse(endpoint)?
    } else {
        Url::parse_with_params(endpoint, params)?
    };

    let client_info = concat!("firehose/v", env!("CARGO_PKG_VERSION"));
    let ua = match user_agent {
        Some(ua) => format!("{ua} {client_info}"),
        None => client_info.to_string(),
    };
    let req = ClientRequestBuilder::new(url.as_str().parse()?).with_header("user-agent", ua);
    Ok(req.into_client_request()?)
}

/// Next text or binary message. Control frames are handled here; `None` once
/// the socket closes.
pub(crate) async fn next_data(socket: &mut Socket) -> Result<Option<Message>, StreamError> {
    loop {
        match socket.next().await {
            None => return Ok(None),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(message)) => match message {
                Message::Text(_) | Message::Binary(_) => return Ok(Some(message)),
                Message::Ping(payload) => {
                    log::trace!("ping received, responding");
                    socket.send(Message::Pong(payload)).await?;
                }
                Message::Close(frame) => {
                    if let Some(frame) = frame {
                        log::info!(
                            "upstream closed the connection: {} ({})",
                            frame.reason,
                            frame.code
                        );
                    } else {
                        log::info!("upstream closed the connection");
                    }
                    return Ok(None);
                }
                Message::Pong(_) | Message::Frame(_) => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request() {
        let req = build_request(
            "wss://relay.example.com/xrpc/com.atproto.sync.subscribeRepos",
            vec![],
            Some(1234),
            Some("bff-ingester"),
        )
        .unwrap();
        assert_eq!(
            req.uri().to_string(),
            "wss://relay.example.com/xrpc/com.atproto.sync.subscribeRepos?cursor=1234"
        );
        let ua = req.headers().get("user-agent").unwrap().to_str().unwrap();
        assert!(ua.starts_with("bff-ingester firehose/v"));
    }

    #[test]
    fn test_build_request_live_tail() {
        let req = build_request("wss://relay.example.com/subscribe", vec![], None, None).unwrap();
        assert_eq!(req.uri().query(), None);
        assert!(req
            .headers()
            .get("user-agent")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("firehose/v"));
    }

    #[test]
    fn test_build_request_bad_endpoint() {
        assert!(matches!(
            build_request("not a url", vec![], None, None),
            Err(ConnectionError::InvalidEndpoint(_))
        ));
    }
}
