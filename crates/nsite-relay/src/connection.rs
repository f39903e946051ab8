//! A single WebSocket connection to a relay.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::error::RelayError;
use crate::message::{ClientMessage, RelayMessage};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open relay connection speaking JSON frames.
pub(crate) struct RelayConnection {
    url: String,
    socket: Socket,
}

impl RelayConnection {
    /// Connect to `url`, giving up after `timeout`.
    pub(crate) async fn open(url: &str, timeout: Duration) -> Result<Self, RelayError> {
        validate_url(url)?;
        let (socket, _response) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| RelayError::Timeout(timeout))??;
        debug!(relay = url, "connected");
        Ok(Self {
            url: url.to_string(),
            socket,
        })
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) async fn send(&mut self, msg: &ClientMessage) -> Result<(), RelayError> {
        let text = msg.to_json();
        trace!(relay = %self.url, frame = %text, "send");
        self.socket.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Next protocol message, or `None` once the relay hangs up.
    ///
    /// Frames that do not parse are logged and skipped.
    pub(crate) async fn recv(&mut self) -> Result<Option<RelayMessage>, RelayError> {
        while let Some(frame) = self.socket.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => return Ok(None),
                // Pings are answered by tungstenite on the next read or write.
                _ => continue,
            };
            match RelayMessage::from_json(text.as_str()) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => debug!(relay = %self.url, error = %e, "ignoring unparseable frame"),
            }
        }
        Ok(None)
    }

    /// Close the connection, ignoring errors from an already-dead socket.
    pub(crate) async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}

/// Accept only `ws://` and `wss://` URLs.
pub(crate) fn validate_url(relay: &str) -> Result<url::Url, RelayError> {
    let parsed = url::Url::parse(relay).map_err(|e| RelayError::InvalidUrl {
        url: relay.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(RelayError::InvalidUrl {
            url: relay.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

/// The HTTP URL serving a relay's information document.
pub(crate) fn info_url(relay: &str) -> Result<url::Url, RelayError> {
    let mut parsed = validate_url(relay)?;
    let scheme = if parsed.scheme() == "wss" { "https" } else { "http" };
    parsed
        .set_scheme(scheme)
        .map_err(|()| RelayError::InvalidUrl {
            url: relay.to_string(),
            reason: "cannot rewrite scheme".into(),
        })?;
    Ok(parsed)
}
