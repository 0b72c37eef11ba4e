//! Session store and account request client for the realtime client.
//!
//! [`SessionStore`] owns the authentication state. It talks to the account
//! endpoints through an [`ApiClient`], keeps tokens in a
//! [`realtime_storage::CredentialStore`], and connects or disconnects the
//! realtime link through a [`realtime_connection::ConnectionControl`] handed
//! to it at construction.
//!
//! ## Endpoints
//!
//! ```text
//! POST /api/v1/login     {email, password}        -> {user, tokens}
//! POST /api/v1/register  {email, password, ...}   -> {user, tokens}
//! POST /api/v1/refresh   {refresh_token}          -> {tokens}
//! GET  /api/v1/me                                 -> {user}
//! ```
//!
//! Failed requests carry `{"error": "..."}` bodies; that message is surfaced
//! in [`AuthSession::error`] when present.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod model;
pub mod store;

// Re-export main types
pub use api::{
    ApiClient, ApiError, HttpApiClient, DEFAULT_REQUEST_TIMEOUT, LOGIN_PATH, ME_PATH, REFRESH_PATH,
    REGISTER_PATH,
};
pub use model::{AuthResponse, AuthTokens, MeResponse, RefreshResponse, Registration, UserRecord};
pub use store::{AuthSession, SessionStore, LOGIN_FAILED, REGISTRATION_FAILED};
