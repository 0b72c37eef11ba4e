//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Frame is not valid JSON or does not match any known shape
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}
