//! Frame and record structures exchanged over the realtime socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Accept identifiers encoded either as JSON strings or integers.
///
/// The server emits UUID strings; fixtures and older builds use integers.
fn string_or_int<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Int(value) => value.to_string(),
    })
}

/// Identifier of a user account
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(#[serde(deserialize_with = "string_or_int")] pub String);

/// Identifier of a conversation (a match between two users)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(#[serde(deserialize_with = "string_or_int")] pub String);

macro_rules! impl_id {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl $name {
            /// Borrow the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_id!(UserId);
impl_id!(ConversationId);

/// A chat message delivered inside a `new_message` frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Server-assigned message ID
    #[serde(default, deserialize_with = "optional_string_or_int")]
    pub id: Option<String>,
    /// Conversation the message belongs to
    #[serde(default)]
    pub match_id: Option<ConversationId>,
    /// Author of the message
    #[serde(default)]
    pub sender_id: Option<UserId>,
    /// Message body
    #[serde(default)]
    pub message: Option<String>,
    /// Message kind (e.g. "text")
    #[serde(default)]
    pub message_type: Option<String>,
    /// Whether the recipient has read the message
    #[serde(default)]
    pub is_read: bool,
    /// Creation time as recorded by the server
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn optional_string_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "string_or_int")] String);

    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|wrapped| wrapped.0))
}

/// Presence derived from a `user_status` frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    /// User has an open connection
    Online,
    /// Any status other than `online`
    Offline,
}

/// Payload of a `user_status` frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusData {
    /// Raw status string reported by the server; absent or null counts as offline
    #[serde(default)]
    pub status: Option<String>,
}

impl StatusData {
    /// Interpret the raw status; only `online` counts as present
    pub fn presence(&self) -> PresenceStatus {
        if self.status.as_deref() == Some("online") {
            PresenceStatus::Online
        } else {
            PresenceStatus::Offline
        }
    }
}

/// Frames received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// A message was posted to a conversation
    NewMessage {
        /// Target conversation
        match_id: ConversationId,
        /// The message itself
        data: MessageRecord,
    },
    /// A user's presence changed
    UserStatus {
        /// User whose presence changed
        user_id: UserId,
        /// New status
        data: StatusData,
    },
    /// A user is typing in a conversation
    Typing {
        /// Conversation being typed in
        match_id: ConversationId,
        /// User who is typing
        user_id: UserId,
    },
    /// Any frame type this client does not understand
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Short name of the frame type for logging
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::NewMessage { .. } => "new_message",
            InboundFrame::UserStatus { .. } => "user_status",
            InboundFrame::Typing { .. } => "typing",
            InboundFrame::Unknown => "unknown",
        }
    }
}

/// Frames sent to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Authenticate the socket with an access token
    Auth {
        /// Bearer access token
        token: String,
    },
    /// Post a message to a conversation
    SendMessage {
        /// Target conversation
        match_id: ConversationId,
        /// Message body
        message: String,
    },
    /// Signal that the local user is typing
    Typing {
        /// Conversation being typed in
        match_id: ConversationId,
    },
}

impl OutboundFrame {
    /// Short name of the frame type for logging
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Auth { .. } => "auth",
            OutboundFrame::SendMessage { .. } => "send_message",
            OutboundFrame::Typing { .. } => "typing",
        }
    }
}
