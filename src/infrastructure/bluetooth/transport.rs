//! Radio transport seam
//!
//! A platform BLE stack is reduced to the handful of operations the session
//! needs. Every call only initiates work; completions are reported later as
//! [`RadioEvent`]s on the sender handed over in [`RadioTransport::attach`],
//! so the session consumes a single ordered event queue no matter which
//! callback context the platform uses.

use crate::infrastructure::bluetooth::registry::{
    DiscoveredService, EndpointAddress, EndpointHandle,
};
use crate::infrastructure::error::TransportError;
use tokio::sync::mpsc;

/// Opaque platform identifier of a scanned device
pub type DeviceId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub id: DeviceId,
    pub name: Option<String>,
    pub signal_strength: Option<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

/// Identifies one connection attempt. The session hands a fresh value to
/// every `connect`; the transport stamps it on each event that belongs to
/// that link so completions from an abandoned link can be told apart.
pub type Generation = u64;

#[derive(Debug, Clone)]
pub enum RadioEvent {
    DeviceFound(ScannedDevice),
    /// `success` is false when the stack reported a non-success GATT status
    ConnectionChanged {
        generation: Generation,
        success: bool,
        link: LinkStatus,
    },
    ServicesDiscovered {
        generation: Generation,
        result: Result<Vec<DiscoveredService>, TransportError>,
    },
    ReadCompleted {
        generation: Generation,
        endpoint: EndpointAddress,
        result: Result<Vec<u8>, TransportError>,
    },
    WriteCompleted {
        generation: Generation,
        endpoint: EndpointAddress,
        result: Result<(), TransportError>,
    },
    /// Outcome of a subscription change started by `set_notifications`
    NotificationsChanged {
        generation: Generation,
        endpoint: EndpointAddress,
        enabled: bool,
        result: Result<(), TransportError>,
    },
    Notification {
        generation: Generation,
        endpoint: EndpointAddress,
        value: Vec<u8>,
    },
}

impl RadioEvent {
    /// Link the event belongs to; `None` for scan results
    pub fn generation(&self) -> Option<Generation> {
        match self {
            Self::DeviceFound(_) => None,
            Self::ConnectionChanged { generation, .. }
            | Self::ServicesDiscovered { generation, .. }
            | Self::ReadCompleted { generation, .. }
            | Self::WriteCompleted { generation, .. }
            | Self::NotificationsChanged { generation, .. }
            | Self::Notification { generation, .. } => Some(*generation),
        }
    }
}

pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;

pub trait RadioTransport: Send + 'static {
    /// Install the queue that completions are reported on
    fn attach(&mut self, events: RadioEventSender);

    fn start_scan(&mut self) -> Result<(), TransportError>;

    fn stop_scan(&mut self) -> Result<(), TransportError>;

    /// Begin connecting; completes with `ConnectionChanged`. Every later
    /// event of this link carries `generation`.
    fn connect(&mut self, device: &DeviceId, generation: Generation) -> Result<(), TransportError>;

    /// Completes with `ServicesDiscovered`
    fn discover_services(&mut self, generation: Generation) -> Result<(), TransportError>;

    /// Completes with `ReadCompleted`
    fn read(&mut self, endpoint: &EndpointHandle) -> Result<(), TransportError>;

    /// Fire-and-forget write; may complete with `WriteCompleted`
    fn write(&mut self, endpoint: &EndpointHandle, value: &[u8]) -> Result<(), TransportError>;

    /// Completes with `NotificationsChanged`. Must not block on the radio.
    fn set_notifications(
        &mut self,
        endpoint: &EndpointHandle,
        enabled: bool,
    ) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Drop the connection handle and everything attached to it
    fn release(&mut self);
}

impl<T: RadioTransport + ?Sized> RadioTransport for Box<T> {
    fn attach(&mut self, events: RadioEventSender) {
        (**self).attach(events)
    }

    fn start_scan(&mut self) -> Result<(), TransportError> {
        (**self).start_scan()
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        (**self).stop_scan()
    }

    fn connect(&mut self, device: &DeviceId, generation: Generation) -> Result<(), TransportError> {
        (**self).connect(device, generation)
    }

    fn discover_services(&mut self, generation: Generation) -> Result<(), TransportError> {
        (**self).discover_services(generation)
    }

    fn read(&mut self, endpoint: &EndpointHandle) -> Result<(), TransportError> {
        (**self).read(endpoint)
    }

    fn write(&mut self, endpoint: &EndpointHandle, value: &[u8]) -> Result<(), TransportError> {
        (**self).write(endpoint, value)
    }

    fn set_notifications(
        &mut self,
        endpoint: &EndpointHandle,
        enabled: bool,
    ) -> Result<(), TransportError> {
        (**self).set_notifications(endpoint, enabled)
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        (**self).disconnect()
    }

    fn release(&mut self) {
        (**self).release()
    }
}
