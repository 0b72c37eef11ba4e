//! Encoding and decoding of socket text frames.

use crate::error::WireError;
use crate::frame::{InboundFrame, OutboundFrame};
use tracing::trace;

/// Largest text frame accepted in either direction (1 MiB)
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Encode an outbound frame as a JSON text message
pub fn encode_outbound(frame: &OutboundFrame) -> Result<String, WireError> {
    let text = serde_json::to_string(frame)?;
    if text.len() > MAX_FRAME_BYTES {
        return Err(WireError::Size(text.len()));
    }
    Ok(text)
}

/// Decode an inbound JSON text message
pub fn decode_inbound(text: &str) -> Result<InboundFrame, WireError> {
    if text.len() > MAX_FRAME_BYTES {
        return Err(WireError::Size(text.len()));
    }
    let frame: InboundFrame = serde_json::from_str(text)?;
    trace!("Decoded {} frame ({} bytes)", frame.kind(), text.len());
    Ok(frame)
}
