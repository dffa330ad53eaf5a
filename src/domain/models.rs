use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Link state carried by every successful status update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Status published by a session to its observers.
///
/// Every lifecycle transition produces exactly one of these. Disconnection is
/// reported as `Success` with a disconnected payload, not as `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus<P> {
    Loading { message: String },
    Success { payload: P },
    Error { message: String },
}

impl<P> SessionStatus<P> {
    pub fn loading(message: impl Into<String>) -> Self {
        Self::Loading {
            message: message.into(),
        }
    }

    pub fn success(payload: P) -> Self {
        Self::Success { payload }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Loading { message } | Self::Error { message } => Some(message),
            Self::Success { .. } => None,
        }
    }
}

/// Result data for the radio transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioPayload {
    pub connection: ConnectionState,
    /// Last sensor reading, empty for control-only updates
    pub sensors: String,
}

impl RadioPayload {
    pub fn connected() -> Self {
        Self::with_sensors(String::new())
    }

    pub fn disconnected() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            sensors: String::new(),
        }
    }

    pub fn with_sensors(sensors: impl Into<String>) -> Self {
        Self {
            connection: ConnectionState::Connected,
            sensors: sensors.into(),
        }
    }
}

/// Result data for the socket transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketPayload {
    pub connection: ConnectionState,
    pub sensors: String,
    /// Decoded photo bytes, when the frame carried one
    pub image: Option<Vec<u8>>,
}

impl SocketPayload {
    pub fn connected() -> Self {
        Self {
            connection: ConnectionState::Connected,
            sensors: String::new(),
            image: None,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            sensors: String::new(),
            image: None,
        }
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting,
    Discovering,
    Ready,
    Retrying,
    Disconnected,
    Failed,
}

impl SessionState {
    /// True while a start request is being worked on or the link is up
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Scanning | Self::Connecting | Self::Discovering | Self::Ready | Self::Retrying
        )
    }

    /// States in which a link to the device may be open
    pub fn has_link(self) -> bool {
        matches!(self, Self::Connecting | Self::Discovering | Self::Ready)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Discovering => "discovering",
            Self::Ready => "ready",
            Self::Retrying => "retrying",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Directive for the vehicle. Delivered at most once, never acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    Capture,
    Measure,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Self::Forward,
        Self::Backward,
        Self::Left,
        Self::Right,
        Self::Stop,
        Self::Capture,
        Self::Measure,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" | "f" => Ok(Self::Forward),
            "backward" | "b" => Ok(Self::Backward),
            "left" | "l" => Ok(Self::Left),
            "right" | "r" => Ok(Self::Right),
            "stop" | "s" => Ok(Self::Stop),
            "capture" | "photo" => Ok(Self::Capture),
            "measure" => Ok(Self::Measure),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

/// Failure taxonomy of a session.
///
/// Only the connection-level variants change session state; read and write
/// failures are reported once and otherwise ignored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionFailure {
    #[error("transient connection failure: {0}")]
    TransientConnectionFailure(String),
    #[error("required endpoint missing after discovery")]
    DiscoveryMismatch,
    #[error("gave up after {0} attempts")]
    RetryBudgetExhausted(u32),
    #[error("write failed: {0}")]
    WriteFailure(String),
    #[error("read failed: {0}")]
    ReadFailure(String),
    #[error("transport closed by remote")]
    TransportClosedRemotely,
}

impl SessionFailure {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DiscoveryMismatch | Self::RetryBudgetExhausted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert_eq!("forward".parse::<Command>(), Ok(Command::Forward));
        assert_eq!(" Photo ".parse::<Command>(), Ok(Command::Capture));
        assert_eq!("s".parse::<Command>(), Ok(Command::Stop));
        assert!("jump".parse::<Command>().is_err());
    }

    #[test]
    fn test_active_states() {
        assert!(SessionState::Retrying.is_active());
        assert!(!SessionState::Failed.is_active());
        assert!(!SessionState::Idle.has_link());
        assert!(SessionState::Discovering.has_link());
    }

    #[test]
    fn test_status_message() {
        let status: SessionStatus<RadioPayload> = SessionStatus::loading("scanning");
        assert_eq!(status.message(), Some("scanning"));
        assert_eq!(SessionStatus::success(RadioPayload::connected()).message(), None);
        assert!(SessionFailure::DiscoveryMismatch.is_fatal());
        assert!(!SessionFailure::TransportClosedRemotely.is_fatal());
    }
}
