/// Failure reported by a transport when initiating or completing an operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("no active connection")]
    NotConnected,
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("service discovery failed: {0}")]
    Discovery(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("notification update failed: {0}")]
    Notify(String),
    #[error("socket error: {0}")]
    Socket(String),
}

/// Failure talking to a session actor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session has shut down")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {field} UUID '{value}': {reason}")]
    InvalidUuid {
        field: &'static str,
        value: String,
        reason: String,
    },
}
