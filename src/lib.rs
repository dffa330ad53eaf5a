//! Client for a remote-controlled vehicle reachable over BLE or a WebSocket.
//!
//! The [`infrastructure`] layer owns the connection sessions; [`domain`]
//! holds the data model, retry policy, settings and input transforms.

pub mod domain;
pub mod infrastructure;
