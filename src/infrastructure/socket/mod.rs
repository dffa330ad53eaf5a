//! Socket Module
//!
//! WebSocket link to the vehicle's on-board access point. Mirrors the
//! bluetooth session without the scan and discovery phases.
//!
//! - [`protocol`] - Command words and inbound frame parsing
//! - [`session`] - Connection actor with retry

pub mod protocol;
pub mod session;

pub use session::{SocketConfig, SocketSessionHandle};
