use thiserror::Error;

/// Errors that can occur within any channel adapter.
///
/// Note that a failed message send is NOT an error — adapters report it as
/// a [`SendResult`](crate::types::SendResult) value so the pipeline can
/// surface it without unwinding.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying transport could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The channel rejected the supplied credentials or token.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// An operation exceeded its allowed time budget.
    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The channel-specific configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The requested contact does not exist on this transport.
    #[error("Unknown contact: {0}")]
    UnknownContact(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
