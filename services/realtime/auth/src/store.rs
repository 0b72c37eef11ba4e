//! Session store: authentication state and the decision to connect.

use crate::api::{ApiClient, ApiError, LOGIN_PATH, ME_PATH, REFRESH_PATH, REGISTER_PATH};
use crate::model::{AuthResponse, AuthTokens, MeResponse, RefreshResponse, Registration, UserRecord};
use realtime_connection::ConnectionControl;
use realtime_storage::{CredentialStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Fallback error shown when a login fails without a server message
pub const LOGIN_FAILED: &str = "Login failed";
/// Fallback error shown when a registration fails without a server message
pub const REGISTRATION_FAILED: &str = "Registration failed";

/// Observable authentication state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSession {
    /// Access token, present exactly while a credential is installed
    pub token: Option<String>,
    /// Account, set after a successful login, registration or verification
    pub user: Option<UserRecord>,
    /// A login or registration is in flight
    pub loading: bool,
    /// Last user-facing failure
    pub error: Option<String>,
}

impl AuthSession {
    /// True when a token and a verified user are both present
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some() && self.user.is_some()
    }
}

/// Owner of [`AuthSession`].
///
/// Successful authentication connects the realtime link; logout tears it
/// down. Operations never return errors: failures land in
/// [`AuthSession::error`] or escalate to [`SessionStore::logout`].
pub struct SessionStore {
    api: Arc<dyn ApiClient>,
    credentials: Arc<dyn CredentialStore>,
    connection: Arc<dyn ConnectionControl>,
    session: watch::Sender<AuthSession>,
}

impl SessionStore {
    /// Create an empty session
    pub fn new(
        api: Arc<dyn ApiClient>,
        credentials: Arc<dyn CredentialStore>,
        connection: Arc<dyn ConnectionControl>,
    ) -> Self {
        let (session, _) = watch::channel(AuthSession::default());
        Self {
            api,
            credentials,
            connection,
            session,
        }
    }

    /// Observe session changes
    pub fn subscribe(&self) -> watch::Receiver<AuthSession> {
        self.session.subscribe()
    }

    /// Copy of the current session
    pub fn snapshot(&self) -> AuthSession {
        self.session.borrow().clone()
    }

    /// Log in with email and password; connects on success
    pub async fn login(&self, email: &str, password: &str) -> bool {
        info!("Logging in as {}", email);
        let body = json!({ "email": email, "password": password });
        self.authenticate(LOGIN_PATH, body, LOGIN_FAILED).await
    }

    /// Create an account and log into it; connects on success
    pub async fn register(&self, registration: &Registration) -> bool {
        info!("Registering {}", registration.email);
        match serde_json::to_value(registration) {
            Ok(body) => {
                self.authenticate(REGISTER_PATH, body, REGISTRATION_FAILED)
                    .await
            }
            Err(e) => {
                warn!("Could not encode registration: {}", e);
                self.fail(REGISTRATION_FAILED.to_string());
                false
            }
        }
    }

    async fn authenticate(&self, path: &str, body: Value, fallback: &str) -> bool {
        self.session.send_modify(|session| {
            session.loading = true;
            session.error = None;
        });

        let result = match self.api.request(Method::POST, path, Some(body)).await {
            Ok(value) => decode::<AuthResponse>(value),
            Err(e) => Err(e),
        };

        match result {
            Ok(AuthResponse { user, tokens }) => {
                info!("Authenticated as user {}", user.id);
                self.install_tokens(&tokens).await;
                self.session.send_modify(|session| {
                    session.user = Some(user);
                    session.loading = false;
                });
                self.connection.connect(&tokens.access_token).await;
                true
            }
            Err(e) => {
                warn!("{}: {}", fallback, e);
                self.fail(e.server_message().unwrap_or_else(|| fallback.to_string()));
                false
            }
        }
    }

    /// Install `token` as the credential and re-verify it; does not connect
    pub async fn set_token(&self, token: &str) -> bool {
        self.api.set_credential(Some(token.to_string())).await;
        self.session.send_modify(|session| session.token = Some(token.to_string()));
        self.verify_token().await
    }

    /// Ask the server who the installed credential belongs to.
    ///
    /// Failure logs out.
    pub async fn verify_token(&self) -> bool {
        let result = match self.api.request(Method::GET, ME_PATH, None).await {
            Ok(value) => decode::<MeResponse>(value),
            Err(e) => Err(e),
        };

        match result {
            Ok(MeResponse { user }) => {
                debug!("Token verified for user {}", user.id);
                self.session.send_modify(|session| session.user = Some(user));
                true
            }
            Err(e) => {
                warn!("Token verification failed: {}", e);
                self.logout().await;
                false
            }
        }
    }

    /// Exchange the stored refresh token for a new pair and reconnect with it.
    ///
    /// A missing refresh token or a rejected exchange logs out.
    pub async fn refresh(&self) -> bool {
        let refresh_token = match self.credentials.get(REFRESH_TOKEN_KEY).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                warn!("No refresh token stored, logging out");
                self.logout().await;
                return false;
            }
            Err(e) => {
                warn!("Could not read refresh token: {}", e);
                self.logout().await;
                return false;
            }
        };

        let body = json!({ "refresh_token": refresh_token });
        let result = match self.api.request(Method::POST, REFRESH_PATH, Some(body)).await {
            Ok(value) => decode::<RefreshResponse>(value),
            Err(e) => Err(e),
        };

        match result {
            Ok(RefreshResponse { tokens }) => {
                info!("Access token refreshed");
                self.install_tokens(&tokens).await;
                self.connection.connect(&tokens.access_token).await;
                true
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.logout().await;
                false
            }
        }
    }

    /// Resume the session persisted by a previous run.
    ///
    /// Returns whether a stored token was found, verified and connected.
    pub async fn restore(&self) -> bool {
        let token = match self.credentials.get(ACCESS_TOKEN_KEY).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("No stored session");
                return false;
            }
            Err(e) => {
                warn!("Could not read stored session: {}", e);
                return false;
            }
        };

        info!("Restoring stored session");
        if !self.set_token(&token).await {
            return false;
        }
        self.connection.connect(&token).await;
        true
    }

    /// Forget tokens, remove the credential, disconnect and reset the session.
    ///
    /// Safe to call repeatedly.
    pub async fn logout(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.credentials.remove(key).await {
                warn!("Could not remove stored {}: {}", key, e);
            }
        }
        self.api.set_credential(None).await;
        self.connection.disconnect().await;

        let changed = self.session.send_if_modified(|session| {
            if *session == AuthSession::default() {
                false
            } else {
                *session = AuthSession::default();
                true
            }
        });
        if changed {
            info!("Logged out");
        }
    }

    /// Clear the last error only
    pub fn clear_error(&self) {
        self.session
            .send_if_modified(|session| session.error.take().is_some());
    }

    /// Persist tokens, then install the access token as credential and in the session
    async fn install_tokens(&self, tokens: &AuthTokens) {
        for (key, value) in [
            (ACCESS_TOKEN_KEY, &tokens.access_token),
            (REFRESH_TOKEN_KEY, &tokens.refresh_token),
        ] {
            if let Err(e) = self.credentials.set(key, value).await {
                warn!("Could not persist {}: {}", key, e);
            }
        }

        self.api
            .set_credential(Some(tokens.access_token.clone()))
            .await;
        self.session
            .send_modify(|session| session.token = Some(tokens.access_token.clone()));
    }

    fn fail(&self, message: String) {
        self.session.send_modify(|session| {
            session.loading = false;
            session.error = Some(message);
        });
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use realtime_storage::{MemoryCredentialStore, StorageError};
    use realtime_wire::UserId;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Reply {
        Json(Value),
        Status(u16, Value),
        Unreachable,
    }

    #[derive(Default)]
    struct MockApi {
        replies: Mutex<HashMap<&'static str, Reply>>,
        requests: Mutex<Vec<(Method, String, Option<Value>)>>,
        credential: Mutex<Option<String>>,
    }

    impl MockApi {
        fn reply(&self, path: &'static str, reply: Reply) {
            self.replies.lock().unwrap().insert(path, reply);
        }

        fn credential(&self) -> Option<String> {
            self.credential.lock().unwrap().clone()
        }

        fn requests_to(&self, path: &str) -> Vec<Option<Value>> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, p, _)| p == path)
                .map(|(_, _, body)| body.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ApiClient for MockApi {
        async fn request(
            &self,
            method: Method,
            path: &str,
            body: Option<Value>,
        ) -> Result<Value, ApiError> {
            self.requests
                .lock()
                .unwrap()
                .push((method, path.to_string(), body));
            let reply = self.replies.lock().unwrap().get(path).cloned();
            match reply {
                Some(Reply::Json(value)) => Ok(value),
                Some(Reply::Status(status, body)) => Err(ApiError::Status {
                    status,
                    body: body.to_string(),
                }),
                Some(Reply::Unreachable) | None => {
                    Err(ApiError::Transport("connection refused".to_string()))
                }
            }
        }

        async fn set_credential(&self, token: Option<String>) {
            *self.credential.lock().unwrap() = token;
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum LinkCall {
        Connect(String),
        Disconnect,
    }

    #[derive(Default)]
    struct MockConnection {
        calls: Mutex<Vec<LinkCall>>,
    }

    impl MockConnection {
        fn calls(&self) -> Vec<LinkCall> {
            self.calls.lock().unwrap().clone()
        }

        fn connects(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    LinkCall::Connect(token) => Some(token),
                    LinkCall::Disconnect => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ConnectionControl for MockConnection {
        async fn connect(&self, token: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(LinkCall::Connect(token.to_string()));
        }

        async fn disconnect(&self) {
            self.calls.lock().unwrap().push(LinkCall::Disconnect);
        }
    }

    /// Store whose writes always fail
    struct BrokenStore;

    #[async_trait]
    impl CredentialStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Backend("disk on fire".to_string()))
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Backend("disk on fire".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Backend("disk on fire".to_string()))
        }
    }

    struct Fixture {
        store: SessionStore,
        api: Arc<MockApi>,
        credentials: Arc<MemoryCredentialStore>,
        connection: Arc<MockConnection>,
    }

    fn fixture() -> Fixture {
        let api = Arc::new(MockApi::default());
        let credentials = Arc::new(MemoryCredentialStore::new());
        let connection = Arc::new(MockConnection::default());
        let store = SessionStore::new(api.clone(), credentials.clone(), connection.clone());
        Fixture {
            store,
            api,
            credentials,
            connection,
        }
    }

    fn auth_reply(access: &str, refresh: &str) -> Reply {
        Reply::Json(json!({
            "user": {"id": 1, "email": "a@b.c"},
            "tokens": {"access_token": access, "refresh_token": refresh}
        }))
    }

    fn registration() -> Registration {
        Registration {
            email: "a@b.c".to_string(),
            password: "pw".to_string(),
            display_name: "Ada".to_string(),
            age: 30,
            gender: "female".to_string(),
            gdpr_consent: true,
        }
    }

    #[tokio::test]
    async fn test_login_success_persists_and_connects_once() {
        let f = fixture();
        f.api.reply(LOGIN_PATH, auth_reply("T1", "R1"));

        assert!(f.store.login("a@b.c", "pw").await);

        let session = f.store.snapshot();
        assert_eq!(session.token.as_deref(), Some("T1"));
        assert_eq!(session.user.as_ref().map(|u| u.id.clone()), Some(UserId::from("1")));
        assert!(!session.loading);
        assert_eq!(session.error, None);
        assert!(session.is_authenticated());

        assert_eq!(f.api.credential().as_deref(), Some("T1"));
        assert_eq!(f.credentials.get(ACCESS_TOKEN_KEY).await.unwrap().as_deref(), Some("T1"));
        assert_eq!(f.credentials.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(), Some("R1"));
        assert_eq!(f.connection.calls(), vec![LinkCall::Connect("T1".to_string())]);
        assert_eq!(
            f.api.requests_to(LOGIN_PATH),
            vec![Some(json!({"email": "a@b.c", "password": "pw"}))]
        );
    }

    #[tokio::test]
    async fn test_login_failure_uses_server_message() {
        let f = fixture();
        f.api.reply(
            LOGIN_PATH,
            Reply::Status(401, json!({"error": "Invalid credentials"})),
        );

        assert!(!f.store.login("a@b.c", "wrong").await);

        let session = f.store.snapshot();
        assert_eq!(session.token, None);
        assert_eq!(session.error.as_deref(), Some("Invalid credentials"));
        assert!(!session.loading);
        assert!(f.connection.calls().is_empty());
        assert_eq!(f.api.credential(), None);
        assert!(f.credentials.is_empty());
    }

    #[tokio::test]
    async fn test_login_failure_without_message_uses_fallback() {
        let f = fixture();
        f.api.reply(LOGIN_PATH, Reply::Unreachable);

        assert!(!f.store.login("a@b.c", "pw").await);
        assert_eq!(f.store.snapshot().error.as_deref(), Some(LOGIN_FAILED));
    }

    #[tokio::test]
    async fn test_failed_login_keeps_existing_token() {
        let f = fixture();
        f.api.reply(ME_PATH, Reply::Json(json!({"user": {"id": 1}})));
        assert!(f.store.set_token("T0").await);

        f.api.reply(LOGIN_PATH, Reply::Status(500, json!({})));
        assert!(!f.store.login("a@b.c", "pw").await);

        let session = f.store.snapshot();
        assert_eq!(session.token.as_deref(), Some("T0"));
        assert_eq!(session.error.as_deref(), Some(LOGIN_FAILED));
    }

    #[tokio::test]
    async fn test_malformed_login_response_is_a_failure() {
        let f = fixture();
        f.api.reply(LOGIN_PATH, Reply::Json(json!({"user": {"id": 1}})));

        assert!(!f.store.login("a@b.c", "pw").await);
        assert_eq!(f.store.snapshot().error.as_deref(), Some(LOGIN_FAILED));
        assert!(f.connection.calls().is_empty());
    }

    #[tokio::test]
    async fn test_new_attempt_clears_previous_error() {
        let f = fixture();
        f.api.reply(LOGIN_PATH, Reply::Unreachable);
        assert!(!f.store.login("a@b.c", "pw").await);

        f.api.reply(LOGIN_PATH, auth_reply("T1", "R1"));
        assert!(f.store.login("a@b.c", "pw").await);
        assert_eq!(f.store.snapshot().error, None);
    }

    #[tokio::test]
    async fn test_register_success_connects() {
        let f = fixture();
        f.api.reply(REGISTER_PATH, auth_reply("T1", "R1"));

        assert!(f.store.register(&registration()).await);
        assert_eq!(f.store.snapshot().token.as_deref(), Some("T1"));
        assert_eq!(f.connection.connects(), vec!["T1".to_string()]);

        let body = f.api.requests_to(REGISTER_PATH).remove(0).unwrap();
        assert_eq!(body["display_name"], "Ada");
        assert_eq!(body["gdpr_consent"], true);
    }

    #[tokio::test]
    async fn test_register_failure_fallback_message() {
        let f = fixture();
        f.api.reply(REGISTER_PATH, Reply::Status(400, json!({"detail": "nope"})));

        assert!(!f.store.register(&registration()).await);
        let session = f.store.snapshot();
        assert_eq!(session.error.as_deref(), Some(REGISTRATION_FAILED));
        assert_eq!(session.token, None);
        assert!(f.connection.calls().is_empty());
    }

    #[tokio::test]
    async fn test_set_token_verifies_without_connecting() {
        let f = fixture();
        f.api.reply(ME_PATH, Reply::Json(json!({"user": {"id": "u-9"}})));

        assert!(f.store.set_token("T5").await);

        let session = f.store.snapshot();
        assert_eq!(session.token.as_deref(), Some("T5"));
        assert_eq!(session.user.map(|u| u.id), Some(UserId::from("u-9")));
        assert_eq!(f.api.credential().as_deref(), Some("T5"));
        assert!(f.connection.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_verification_logs_out() {
        let f = fixture();
        f.credentials.set(ACCESS_TOKEN_KEY, "stale").await.unwrap();
        f.api.reply(ME_PATH, Reply::Status(401, json!({"error": "Invalid token"})));

        assert!(!f.store.set_token("stale").await);

        assert_eq!(f.store.snapshot(), AuthSession::default());
        assert_eq!(f.api.credential(), None);
        assert!(f.credentials.is_empty());
        assert_eq!(f.connection.calls(), vec![LinkCall::Disconnect]);
    }

    #[tokio::test]
    async fn test_logout_resets_everything_and_is_idempotent() {
        let f = fixture();
        f.api.reply(LOGIN_PATH, auth_reply("T1", "R1"));
        assert!(f.store.login("a@b.c", "pw").await);

        f.store.logout().await;
        let once = f.store.snapshot();
        f.store.logout().await;

        assert_eq!(once, AuthSession::default());
        assert_eq!(f.store.snapshot(), once);
        assert_eq!(f.api.credential(), None);
        assert!(f.credentials.is_empty());
        assert_eq!(
            f.connection.calls(),
            vec![
                LinkCall::Connect("T1".to_string()),
                LinkCall::Disconnect,
                LinkCall::Disconnect
            ]
        );
    }

    #[tokio::test]
    async fn test_clear_error_touches_only_error() {
        let f = fixture();
        f.api.reply(ME_PATH, Reply::Json(json!({"user": {"id": 1}})));
        assert!(f.store.set_token("T1").await);
        f.api.reply(LOGIN_PATH, Reply::Unreachable);
        assert!(!f.store.login("a@b.c", "pw").await);

        let before = f.store.snapshot();
        f.store.clear_error();
        let after = f.store.snapshot();

        assert_eq!(after.error, None);
        assert_eq!(after.token, before.token);
        assert_eq!(after.user, before.user);
        assert_eq!(after.loading, before.loading);
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens_and_reconnects() {
        let f = fixture();
        f.api.reply(LOGIN_PATH, auth_reply("T1", "R1"));
        assert!(f.store.login("a@b.c", "pw").await);
        f.api.reply(
            REFRESH_PATH,
            Reply::Json(json!({"tokens": {"access_token": "T2", "refresh_token": "R2"}})),
        );

        assert!(f.store.refresh().await);

        assert_eq!(
            f.api.requests_to(REFRESH_PATH),
            vec![Some(json!({"refresh_token": "R1"}))]
        );
        assert_eq!(f.store.snapshot().token.as_deref(), Some("T2"));
        assert_eq!(f.api.credential().as_deref(), Some("T2"));
        assert_eq!(f.credentials.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(), Some("R2"));
        assert_eq!(f.connection.connects(), vec!["T1".to_string(), "T2".to_string()]);
    }

    #[tokio::test]
    async fn test_refresh_without_stored_token_logs_out() {
        let f = fixture();

        assert!(!f.store.refresh().await);
        assert!(f.api.requests_to(REFRESH_PATH).is_empty());
        assert_eq!(f.connection.calls(), vec![LinkCall::Disconnect]);
    }

    #[tokio::test]
    async fn test_rejected_refresh_logs_out() {
        let f = fixture();
        f.api.reply(LOGIN_PATH, auth_reply("T1", "R1"));
        assert!(f.store.login("a@b.c", "pw").await);
        f.api.reply(
            REFRESH_PATH,
            Reply::Status(401, json!({"error": "Invalid refresh token"})),
        );

        assert!(!f.store.refresh().await);
        assert_eq!(f.store.snapshot(), AuthSession::default());
        assert!(f.credentials.is_empty());
    }

    #[tokio::test]
    async fn test_restore_verifies_and_connects() {
        let f = fixture();
        f.credentials.set(ACCESS_TOKEN_KEY, "T7").await.unwrap();
        f.api.reply(ME_PATH, Reply::Json(json!({"user": {"id": 7}})));

        assert!(f.store.restore().await);
        assert!(f.store.snapshot().is_authenticated());
        assert_eq!(f.connection.connects(), vec!["T7".to_string()]);
    }

    #[tokio::test]
    async fn test_restore_without_stored_token_does_nothing() {
        let f = fixture();

        assert!(!f.store.restore().await);
        assert!(f.api.requests.lock().unwrap().is_empty());
        assert!(f.connection.calls().is_empty());
        assert_eq!(f.store.snapshot(), AuthSession::default());
    }

    #[tokio::test]
    async fn test_storage_failure_does_not_fail_login() {
        let api = Arc::new(MockApi::default());
        let connection = Arc::new(MockConnection::default());
        let store = SessionStore::new(api.clone(), Arc::new(BrokenStore), connection.clone());
        api.reply(LOGIN_PATH, auth_reply("T1", "R1"));

        assert!(store.login("a@b.c", "pw").await);
        assert_eq!(store.snapshot().token.as_deref(), Some("T1"));
        assert_eq!(connection.connects(), vec!["T1".to_string()]);

        store.logout().await;
        assert_eq!(store.snapshot(), AuthSession::default());
    }

    #[tokio::test]
    async fn test_subscribers_see_loading_cleared() {
        let f = fixture();
        let mut rx = f.store.subscribe();
        f.api.reply(LOGIN_PATH, auth_reply("T1", "R1"));

        assert!(f.store.login("a@b.c", "pw").await);
        assert!(rx.has_changed().unwrap());
        let session = rx.borrow_and_update().clone();
        assert!(!session.loading);
        assert_eq!(session.token.as_deref(), Some("T1"));
    }
}
