//! Request and response bodies of the account endpoints.

use chrono::{DateTime, Utc};
use realtime_wire::UserId;
use serde::{Deserialize, Serialize};

/// Account as returned by the server; unknown fields are ignored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Account identifier
    pub id: UserId,
    /// Login email
    #[serde(default)]
    pub email: Option<String>,
    /// Account status, e.g. `active`
    #[serde(default)]
    pub status: Option<String>,
    /// Whether the user consented to data processing
    #[serde(default)]
    pub gdpr_consent: bool,
    /// Last activity
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
    /// Creation time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Public profile, passed through untouched
    #[serde(default)]
    pub profile: Option<serde_json::Value>,
}

/// Access and refresh token pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    /// Short-lived bearer token
    pub access_token: String,
    /// Long-lived token exchanged for a new pair
    pub refresh_token: String,
}

impl std::fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Body of a successful login or registration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthResponse {
    /// The authenticated account
    pub user: UserRecord,
    /// Fresh tokens for the account
    pub tokens: AuthTokens,
}

/// Body of a successful token refresh
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RefreshResponse {
    /// Replacement tokens
    pub tokens: AuthTokens,
}

/// Body of `GET /api/v1/me`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MeResponse {
    /// The account owning the installed credential
    pub user: UserRecord,
}

/// New account details
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Registration {
    /// Login email
    pub email: String,
    /// Plain-text password, only ever sent over the request client
    pub password: String,
    /// Name shown to other users
    pub display_name: String,
    /// Age in years
    pub age: u32,
    /// Self-described gender
    pub gender: String,
    /// Consent to data processing
    pub gdpr_consent: bool,
}
