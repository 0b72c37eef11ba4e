//! WebSocket transport for the realtime link.
//!
//! The connection driver only sees a [`Connector`] that yields a text frame
//! sink and a text frame stream, so tests can substitute in-memory channels
//! for a real socket.

use async_trait::async_trait;
use futures::future;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info};
use url::Url;

/// Path of the realtime endpoint on the server
pub const WEBSOCKET_PATH: &str = "/ws";

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not establish the connection
    #[error("connect failed: {0}")]
    Connect(String),
    /// Origin scheme has no WebSocket equivalent
    #[error("unsupported origin scheme: {0}")]
    Scheme(String),
    /// Error raised by the WebSocket implementation
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Peer went away
    #[error("connection closed")]
    Closed,
}

/// Outbound half of a link: accepts encoded text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a link: yields text frames until the peer closes
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Opens bidirectional text links to the realtime endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a link to `url`
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), TransportError>;
}

/// Production connector over `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), TransportError> {
        let (ws, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!("WebSocket established to {} (status {})", url, response.status());

        let (sink, stream) = ws.split();

        let sink = sink.with(|text: String| {
            future::ready(Ok::<Message, TransportError>(Message::text(text)))
        });

        let stream = stream.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!("Received close frame: {:?}", frame);
                    None
                }
                // Ping/pong are answered by tungstenite; binary frames are not part of the protocol
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Derive the realtime endpoint from the application origin.
///
/// `http` maps to `ws` and `https` to `wss`; the path is always [`WEBSOCKET_PATH`].
pub fn websocket_url(origin: &Url) -> Result<Url, TransportError> {
    let scheme = match origin.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(TransportError::Scheme(other.to_string())),
    };

    let mut url = origin.clone();
    url.set_scheme(scheme)
        .map_err(|()| TransportError::Scheme(origin.scheme().to_string()))?;
    url.set_path(WEBSOCKET_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
