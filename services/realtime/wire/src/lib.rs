//! JSON frame model and codec for the realtime messaging socket.
//!
//! Every frame on the socket is a single JSON text message carrying a `type`
//! discriminator next to its payload fields.
//!
//! ## Wire Format
//!
//! ```text
//! client -> server
//!   {"type":"auth","token":"..."}
//!   {"type":"send_message","match_id":"...","message":"..."}
//!   {"type":"typing","match_id":"..."}
//!
//! server -> client
//!   {"type":"new_message","match_id":"...","data":{...}}
//!   {"type":"user_status","user_id":"...","data":{"status":"online"}}
//!   {"type":"typing","match_id":"...","user_id":"..."}
//! ```
//!
//! Unknown inbound `type` values decode to [`InboundFrame::Unknown`] so newer
//! servers can add frame kinds without breaking older clients.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;

// Re-export main types
pub use codec::{decode_inbound, encode_outbound, MAX_FRAME_BYTES};
pub use error::WireError;
pub use frame::{
    ConversationId, InboundFrame, MessageRecord, OutboundFrame, PresenceStatus, StatusData,
    UserId,
};
