use thiserror::Error;

/// Errors surfaced by the relay library.
///
/// Per-connection transport failures never show up here: a connection worker
/// logs them and exits on its own.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Failed to bind the listening socket
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Handshake did not yield a usable username
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The hub's request channel is closed
    #[error("hub is not accepting requests")]
    HubClosed,

    /// Operation requires a started gateway
    #[error("gateway is not running")]
    NotRunning,

    /// `start` called twice
    #[error("gateway is already running")]
    AlreadyRunning,
}
