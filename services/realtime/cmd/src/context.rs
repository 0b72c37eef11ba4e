//! Wiring of the credential store, request client, connection driver and
//! session store for one client process.

use crate::commands::{Command, HELP};
use crate::config::ClientConfig;
use crate::{component_debug, component_info, component_warn};
use anyhow::{Context, Result};
use realtime_auth::{HttpApiClient, SessionStore};
use realtime_connection::{ConnectionManager, ConnectionStatus, LiveState, WsConnector};
use realtime_storage::CredentialStore;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Everything a running client needs
pub struct ClientContext {
    pub credentials: Arc<dyn CredentialStore>,
    pub connection: ConnectionManager,
    pub session: SessionStore,
    watchers: Vec<JoinHandle<()>>,
}

impl ClientContext {
    /// Build the client from configuration; nothing connects yet
    pub async fn new(config: &ClientConfig) -> Result<Self> {
        let origin = config.origin_url()?;
        let credentials = realtime_storage::open(config.storage_mode())
            .await
            .context("failed to open credential store")?;
        let api = Arc::new(HttpApiClient::with_timeout(origin, config.request_timeout)?);
        let connection = ConnectionManager::spawn(config.connection_config()?, Arc::new(WsConnector));
        let session = SessionStore::new(api, credentials.clone(), Arc::new(connection.clone()));

        Ok(Self {
            credentials,
            connection,
            session,
            watchers: Vec::new(),
        })
    }

    /// Log in with the given credentials, or resume a stored session
    pub async fn sign_in(&self, email: Option<&str>, password: Option<&str>) -> Result<bool> {
        match (email, password) {
            (Some(email), Some(password)) => {
                if self.session.login(email, password).await {
                    return Ok(true);
                }
                let error = self.session.snapshot().error.unwrap_or_default();
                component_warn!("session", "Login failed: {}", error);
                Ok(false)
            }
            (Some(_), None) | (None, Some(_)) => {
                anyhow::bail!("--email and --password must be given together")
            }
            (None, None) => {
                let restored = self.session.restore().await;
                if !restored {
                    component_info!("session", "No usable stored session; pass --email and --password");
                }
                Ok(restored)
            }
        }
    }

    /// Log connection status and live state changes until shutdown
    pub fn spawn_watchers(&mut self) {
        let mut status = self.connection.status();
        self.watchers.push(tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = status.borrow_and_update().clone();
                match current {
                    ConnectionStatus::GaveUp { attempts } => {
                        component_warn!("link", "Gave up reconnecting after {} attempts", attempts)
                    }
                    other => component_info!("link", "Connection status: {:?}", other),
                }
            }
        }));

        let mut live = self.connection.live_state();
        self.watchers.push(tokio::spawn(async move {
            let mut previous = live.borrow_and_update().clone();
            while live.changed().await.is_ok() {
                let next = live.borrow_and_update().clone();
                for line in describe_changes(&previous, &next) {
                    component_info!("live", "{}", line);
                }
                previous = next;
            }
        }));
    }

    /// Run one command; returns `false` when the client should exit
    pub async fn execute(&self, command: Command) -> bool {
        match command {
            Command::Send { conversation, text } => {
                if !self.connection.is_connected() {
                    component_warn!("link", "Not connected; message to {} dropped", conversation);
                }
                self.connection.send_message(conversation, text);
            }
            Command::Typing { conversation } => self.connection.send_typing(conversation),
            Command::Refresh => {
                if !self.session.refresh().await {
                    component_warn!("session", "Token refresh failed; logged out");
                }
            }
            Command::Logout => {
                self.session.logout().await;
                component_info!("session", "Logged out; stored tokens removed");
            }
            Command::Help => component_info!("cli", "{}", HELP),
            Command::Quit => return false,
        }
        true
    }

    /// Disconnect without forgetting stored tokens
    pub async fn shutdown(self) {
        component_info!("cli", "Shutting down");
        self.connection.disconnect().await;
        for watcher in self.watchers {
            watcher.abort();
        }
        component_debug!("cli", "Shutdown complete");
    }
}

/// Human-readable summary of what changed between two live states
pub fn describe_changes(previous: &LiveState, next: &LiveState) -> Vec<String> {
    let mut lines = Vec::new();

    let mut conversations: Vec<_> = next.messages.keys().collect();
    conversations.sort();
    for conversation in conversations {
        let seen = previous.messages_for(conversation).len();
        for message in next.messages_for(conversation).iter().skip(seen) {
            let sender = message
                .sender_id
                .as_ref()
                .map(|id| id.as_str())
                .unwrap_or("?");
            lines.push(format!(
                "[{}] {}: {}",
                conversation,
                sender,
                message.message.as_deref().unwrap_or_default()
            ));
        }
    }

    let mut came_online: Vec<_> = next.online_users.difference(&previous.online_users).collect();
    came_online.sort();
    for user in came_online {
        lines.push(format!("{} is online", user));
    }
    let mut went_offline: Vec<_> = previous.online_users.difference(&next.online_users).collect();
    went_offline.sort();
    for user in went_offline {
        lines.push(format!("{} went offline", user));
    }

    let mut typing: Vec<_> = next.typing.iter().collect();
    typing.sort();
    for (conversation, user) in typing {
        if previous.typing.get(conversation) != Some(user) {
            lines.push(format!("[{}] {} is typing...", conversation, user));
        }
    }

    lines
}
