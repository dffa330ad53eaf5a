//! Bluetooth Module
//!
//! BLE session management for the vehicle.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   RadioSessionHandle                     │
//! │      (requests in, status stream out - public API)       │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ request queue
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                 RadioSession (actor)                     │
//! │  state machine - retry policy - endpoint registry        │
//! └─────────────────────┬───────────────────────────────────┘
//!          calls        │        ▲ event queue
//!                       ▼        │
//! ┌─────────────────────────────────────────────────────────┐
//! │            RadioTransport (WinRT, mock, ...)             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Vehicle UUIDs, device name and command encoding
//! - [`registry`] - Endpoint lookup by service/characteristic pair
//! - [`transport`] - Platform seam and the events it raises
//! - [`session`] - Session state machine actor

#[cfg(test)]
pub(crate) mod mock;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;
#[cfg(windows)]
pub mod winrt;

// Re-export main session for convenience
pub use session::{RadioSessionHandle, SessionConfig};
