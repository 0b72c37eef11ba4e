//! Login, live traffic and logout across the session store, the HTTP client
//! and a running connection driver.

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use realtime_auth::{AuthSession, HttpApiClient, SessionStore, LOGIN_PATH, ME_PATH};
use realtime_connection::{
    ConnectionConfig, ConnectionManager, ConnectionStatus, Connector, FrameSink, FrameStream,
    ReconnectPolicy, TransportError,
};
use realtime_storage::{CredentialStore, MemoryCredentialStore, ACCESS_TOKEN_KEY};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct ServerLink {
    sent: fmpsc::UnboundedReceiver<String>,
    push: fmpsc::UnboundedSender<Result<String, TransportError>>,
}

impl ServerLink {
    async fn next_frame(&mut self) -> Option<Value> {
        let text = self.sent.next().await?;
        Some(serde_json::from_str(&text).unwrap())
    }
}

struct ChannelConnector {
    links: mpsc::UnboundedSender<ServerLink>,
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, _url: &Url) -> Result<(FrameSink, FrameStream), TransportError> {
        let (sent_tx, sent_rx) = fmpsc::unbounded();
        let (push_tx, push_rx) = fmpsc::unbounded();
        self.links
            .send(ServerLink {
                sent: sent_rx,
                push: push_tx,
            })
            .map_err(|_| TransportError::Closed)?;

        let sink: FrameSink = Box::pin(sent_tx.sink_map_err(|_| TransportError::Closed));
        let stream: FrameStream = Box::pin(push_rx);
        Ok((sink, stream))
    }
}

struct Client {
    session: SessionStore,
    manager: ConnectionManager,
    credentials: Arc<MemoryCredentialStore>,
    links: mpsc::UnboundedReceiver<ServerLink>,
}

fn client(server: &MockServer) -> Client {
    let origin = Url::parse(&server.uri()).unwrap();
    let (links_tx, links) = mpsc::unbounded_channel();

    let mut config = ConnectionConfig::from_origin(&origin).unwrap();
    config.reconnect = ReconnectPolicy::fixed(Duration::from_millis(100));
    let manager = ConnectionManager::spawn(config, Arc::new(ChannelConnector { links: links_tx }));

    let credentials = Arc::new(MemoryCredentialStore::new());
    let session = SessionStore::new(
        Arc::new(HttpApiClient::new(origin).unwrap()),
        credentials.clone(),
        Arc::new(manager.clone()),
    );

    Client {
        session,
        manager,
        credentials,
        links,
    }
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {"id": 1, "email": "a@b.c"},
            "tokens": {"access_token": "T1", "refresh_token": "R1"}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_connects_and_logout_clears_all_state() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    let mut c = client(&server);

    assert!(c.session.login("a@b.c", "pw").await);

    let mut link = c.links.recv().await.unwrap();
    assert_eq!(
        link.next_frame().await.unwrap(),
        json!({"type": "auth", "token": "T1"})
    );

    link.push
        .unbounded_send(Ok(json!({
            "type": "new_message",
            "match_id": "m-1",
            "data": {"id": "1", "message": "hi"}
        })
        .to_string()))
        .unwrap();
    link.push
        .unbounded_send(Ok(json!({
            "type": "user_status",
            "user_id": 2,
            "data": {"status": "online"}
        })
        .to_string()))
        .unwrap();

    let mut live = c.manager.live_state();
    live.wait_for(|s| !s.messages.is_empty() && !s.online_users.is_empty())
        .await
        .unwrap();

    c.session.logout().await;

    assert_eq!(c.session.snapshot(), AuthSession::default());
    assert!(c.manager.live_state().borrow().is_empty());
    assert_eq!(*c.manager.status().borrow(), ConnectionStatus::Disconnected);
    assert_eq!(c.credentials.get(ACCESS_TOKEN_KEY).await.unwrap(), None);

    // Link closed by the client, and nothing reconnects afterwards
    assert!(link.next_frame().await.is_none());
    assert!(tokio::time::timeout(Duration::from_millis(500), c.links.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn test_server_close_reconnects_with_login_token() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    let mut c = client(&server);

    assert!(c.session.login("a@b.c", "pw").await);
    let first = c.links.recv().await.unwrap();
    drop(first);

    let mut second = tokio::time::timeout(Duration::from_secs(5), c.links.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        second.next_frame().await.unwrap(),
        json!({"type": "auth", "token": "T1"})
    );
}

#[tokio::test]
async fn test_restore_with_rejected_token_stays_disconnected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ME_PATH))
        .and(header("authorization", "Bearer expired"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Invalid token"})))
        .mount(&server)
        .await;
    let mut c = client(&server);
    c.credentials.set(ACCESS_TOKEN_KEY, "expired").await.unwrap();

    assert!(!c.session.restore().await);

    assert_eq!(c.session.snapshot(), AuthSession::default());
    assert!(c.credentials.is_empty());
    assert!(tokio::time::timeout(Duration::from_millis(300), c.links.recv())
        .await
        .is_err());
}
