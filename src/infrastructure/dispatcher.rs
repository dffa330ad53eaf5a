//! Command Dispatcher
//!
//! Forwards drive commands to whichever link is active. Commands are never
//! queued: anything issued while the link is not ready is dropped.

use crate::domain::models::Command;
use crate::infrastructure::error::SessionError;
use tracing::{debug, warn};

/// Operations a UI can request from a vehicle session, whatever the transport
pub trait VehicleLink {
    fn is_ready(&self) -> bool;
    fn start(&self) -> Result<(), SessionError>;
    fn reconnect(&self) -> Result<(), SessionError>;
    fn disconnect(&self) -> Result<(), SessionError>;
    fn close(&self) -> Result<(), SessionError>;
    fn send_command(&self, command: Command) -> Result<(), SessionError>;
    fn read_sensor(&self) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Dropped,
}

pub struct CommandDispatcher<L> {
    link: L,
}

impl<L: VehicleLink> CommandDispatcher<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn dispatch(&self, command: Command) -> DispatchOutcome {
        if !self.link.is_ready() {
            debug!("Dropping {:?}: link not ready", command);
            return DispatchOutcome::Dropped;
        }

        match self.link.send_command(command) {
            Ok(()) => DispatchOutcome::Sent,
            Err(e) => {
                warn!("Dropping {:?}: {}", command, e);
                DispatchOutcome::Dropped
            }
        }
    }
}
