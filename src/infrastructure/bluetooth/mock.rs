//! Scripted radio transport for session tests

use crate::infrastructure::bluetooth::registry::{EndpointAddress, EndpointHandle};
use crate::infrastructure::bluetooth::transport::{
    DeviceId, Generation, RadioEvent, RadioEventSender, RadioTransport,
};
use crate::infrastructure::error::TransportError;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    StartScan,
    StopScan,
    Connect(DeviceId),
    Discover,
    Read(EndpointAddress),
    Write(EndpointAddress, Vec<u8>),
    Notify(EndpointAddress, bool),
    Disconnect,
    Release,
}

#[derive(Default)]
struct Inner {
    calls: Vec<MockCall>,
    events: Option<RadioEventSender>,
    generation: Generation,
    fail_writes: bool,
}

/// Records every call and lets the test play the platform's callbacks
#[derive(Clone, Default)]
pub struct MockRadio {
    inner: Arc<Mutex<Inner>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn emit(&self, event: RadioEvent) {
        let inner = self.inner.lock().unwrap();
        inner
            .events
            .as_ref()
            .expect("transport not attached")
            .send(event)
            .expect("session stopped");
    }

    /// Generation handed to the most recent `connect`
    pub fn generation(&self) -> Generation {
        self.inner.lock().unwrap().generation
    }

    pub fn fail_writes(&self) {
        self.inner.lock().unwrap().fail_writes = true;
    }

    fn record(&self, call: MockCall) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

impl RadioTransport for MockRadio {
    fn attach(&mut self, events: RadioEventSender) {
        self.inner.lock().unwrap().events = Some(events);
    }

    fn start_scan(&mut self) -> Result<(), TransportError> {
        self.record(MockCall::StartScan);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        self.record(MockCall::StopScan);
        Ok(())
    }

    fn connect(&mut self, device: &DeviceId, generation: Generation) -> Result<(), TransportError> {
        self.record(MockCall::Connect(device.clone()));
        self.inner.lock().unwrap().generation = generation;
        Ok(())
    }

    fn discover_services(&mut self, _generation: Generation) -> Result<(), TransportError> {
        self.record(MockCall::Discover);
        Ok(())
    }

    fn read(&mut self, endpoint: &EndpointHandle) -> Result<(), TransportError> {
        self.record(MockCall::Read(endpoint.address));
        Ok(())
    }

    fn write(&mut self, endpoint: &EndpointHandle, value: &[u8]) -> Result<(), TransportError> {
        self.record(MockCall::Write(endpoint.address, value.to_vec()));
        if self.inner.lock().unwrap().fail_writes {
            return Err(TransportError::Write("busy".to_string()));
        }
        Ok(())
    }

    fn set_notifications(
        &mut self,
        endpoint: &EndpointHandle,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.record(MockCall::Notify(endpoint.address, enabled));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.record(MockCall::Disconnect);
        Ok(())
    }

    fn release(&mut self) {
        self.record(MockCall::Release);
    }
}
