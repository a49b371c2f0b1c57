//! Runtime-layer error type wrapping engine and transport failures.

use thiserror::Error;

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the async tunnel driver.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine rejected the operation.
    #[error(transparent)]
    Tunnel(#[from] bintun_core::TunnelError),

    /// The driver task has stopped; no further commands can be served.
    #[error("tunnel task is closed")]
    Closed,
}
