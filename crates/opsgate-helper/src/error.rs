//! Helper RPC error types.

use thiserror::Error;

/// Errors from the helper socket transport and service.
#[derive(Debug, Error)]
pub enum HelperError {
    #[error("connect to helper socket failed: {0}")]
    Connect(std::io::Error),

    #[error("helper socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("invalid JSON payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("helper closed the connection without responding")]
    EmptyResponse,

    #[error("socket path exists and is not a socket: {0}")]
    NotASocket(std::path::PathBuf),
}

pub type HelperResult<T> = Result<T, HelperError>;
