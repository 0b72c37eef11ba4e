//! WebSocket link lifecycle, auth handshake, reconnection and live state.
//!
//! This crate keeps a single authenticated socket to the realtime endpoint,
//! reduces inbound frames into an observable [`LiveState`], and reconnects
//! automatically after the link drops.
//!
//! ## Features
//!
//! - **Connection Manager**: one driver task per client, commanded through cheap handles
//! - **Auth Handshake**: `auth` frame sent first on every open
//! - **Reconnect**: fixed 3 second delay by default, with optional growth and attempt caps
//! - **Live State**: messages, presence and typing indicators with timed expiry
//!
//! ## Example
//!
//! ```rust,no_run
//! use realtime_connection::{ConnectionConfig, ConnectionManager, WsConnector};
//! use std::sync::Arc;
//! use url::Url;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let origin = Url::parse("https://app.example.com")?;
//! let config = ConnectionConfig::from_origin(&origin)?;
//! let manager = ConnectionManager::spawn(config, Arc::new(WsConnector));
//!
//! manager.connect("access-token").await;
//! manager.send_message("42", "hello");
//!
//! let mut live = manager.live_state();
//! while live.changed().await.is_ok() {
//!     let state = live.borrow();
//!     println!("{} conversations, {} users online", state.messages.len(), state.online_users.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod reconnect;
pub mod state;
pub mod transport;

mod timer;

// Re-export main types
pub use connection::{ConnectionConfig, ConnectionControl, ConnectionManager, ConnectionStatus};
pub use reconnect::{ReconnectPolicy, DEFAULT_RECONNECT_DELAY};
pub use state::{LiveState, LiveStateStore, TypingExpiry, DEFAULT_TYPING_EXPIRY};
pub use transport::{
    websocket_url, Connector, FrameSink, FrameStream, TransportError, WsConnector, WEBSOCKET_PATH,
};
