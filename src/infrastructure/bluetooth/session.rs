//! Radio Session
//!
//! Single-writer actor that owns the BLE lifecycle:
//!
//! ```text
//! Idle -> Scanning -> Connecting -> Discovering -> Ready -> Disconnected
//!            ^            |              |
//!            |            v              v
//!            +------- Retrying <---------+        (budget spent -> Failed)
//! ```
//!
//! Requests from the UI and completions from the transport arrive on two
//! queues; only the actor task touches the state, the attempt counter and
//! the endpoint registry. Observers learn about transitions exclusively
//! through the [`StatusChannel`].

use crate::domain::models::{
    Command, RadioPayload, SessionFailure, SessionState, SessionStatus,
};
use crate::domain::retry::{RetryDecision, RetryPolicy};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::registry::{
    DiscoveredService, EndpointAddress, EndpointRegistry,
};
use crate::infrastructure::bluetooth::transport::{
    Generation, LinkStatus, RadioEvent, RadioTransport, ScannedDevice,
};
use crate::infrastructure::dispatcher::VehicleLink;
use crate::infrastructure::error::{ConfigError, SessionError, TransportError};
use crate::infrastructure::status::{StatusChannel, StatusStream};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

pub const CONNECT_FAILED_MESSAGE: &str = "Could not connect to ble device";
pub const CONTROL_MISSING_MESSAGE: &str = "control characteristic not found";
pub const SENSOR_MISSING_MESSAGE: &str = "Sensor characteristic not found";
pub const READ_FAILED_MESSAGE: &str = "Read characteristic failed";
pub const WRITE_FAILED_MESSAGE: &str = "Write characteristic failed";

/// Configuration for a radio session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Advertised name that selects the vehicle during a scan
    pub target_name: String,
    pub service_uuid: Uuid,
    pub control_uuid: Uuid,
    pub sensor_uuid: Uuid,
    pub retry: RetryPolicy,
    pub scan_timeout: Duration,
    /// Limit for each of the connect and discover phases
    pub connect_timeout: Duration,
    pub enable_sensor_notifications: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_name: protocol::DEVICE_NAME.to_string(),
            service_uuid: Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b),
            control_uuid: Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8),
            sensor_uuid: Uuid::from_u128(0x12345678_1234_1234_1234_123456789abc),
            retry: RetryPolicy::default(),
            scan_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            enable_sensor_notifications: true,
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            target_name: settings.device_name.clone(),
            service_uuid: protocol::parse_uuid("service", &settings.ble_service_uuid)?,
            control_uuid: protocol::parse_uuid("control", &settings.ble_control_char_uuid)?,
            sensor_uuid: protocol::parse_uuid("sensor", &settings.ble_sensor_char_uuid)?,
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                base_delay: Duration::from_millis(settings.retry_base_delay_ms),
                max_delay: Duration::from_millis(settings.retry_max_delay_ms),
            },
            scan_timeout: Duration::from_millis(settings.scan_timeout_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            enable_sensor_notifications: settings.enable_sensor_notifications,
        })
    }

    pub fn control_address(&self) -> EndpointAddress {
        EndpointAddress::new(self.service_uuid, self.control_uuid)
    }

    pub fn sensor_address(&self) -> EndpointAddress {
        EndpointAddress::new(self.service_uuid, self.sensor_uuid)
    }
}

#[derive(Debug)]
enum SessionRequest {
    Start,
    Reconnect,
    Disconnect,
    Close,
    Send(Command),
    ReadSensor,
}

/// Cloneable front door to a running radio session
#[derive(Clone)]
pub struct RadioSessionHandle {
    requests: mpsc::UnboundedSender<SessionRequest>,
    status: StatusChannel<RadioPayload>,
    state: watch::Receiver<SessionState>,
}

impl RadioSessionHandle {
    /// Spawn the session actor on the current tokio runtime.
    ///
    /// The actor stops, releasing the transport, once every handle is dropped.
    pub fn spawn<T: RadioTransport>(mut transport: T, config: SessionConfig) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let status = StatusChannel::default();

        transport.attach(event_tx);

        let session = RadioSession {
            transport,
            config,
            status: status.clone(),
            state_tx,
            state: SessionState::Idle,
            attempt: 1,
            generation: 0,
            registry: EndpointRegistry::new(),
            connect_pending: false,
            link_open: false,
            notifying: Vec::new(),
            deadline: None,
        };
        tokio::spawn(session.run(request_rx, event_rx));

        Self {
            requests: request_tx,
            status,
            state: state_rx,
        }
    }

    pub fn subscribe(&self) -> StatusStream<RadioPayload> {
        self.status.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn start(&self) -> Result<(), SessionError> {
        self.request(SessionRequest::Start)
    }

    pub fn reconnect(&self) -> Result<(), SessionError> {
        self.request(SessionRequest::Reconnect)
    }

    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.request(SessionRequest::Disconnect)
    }

    pub fn close(&self) -> Result<(), SessionError> {
        self.request(SessionRequest::Close)
    }

    /// Queue a command; it is dropped unless the session is ready when processed
    pub fn send_command(&self, command: Command) -> Result<(), SessionError> {
        self.request(SessionRequest::Send(command))
    }

    /// Request a sensor read; the value arrives as a `Success` status
    pub fn read_sensor(&self) -> Result<(), SessionError> {
        self.request(SessionRequest::ReadSensor)
    }

    fn request(&self, request: SessionRequest) -> Result<(), SessionError> {
        self.requests
            .send(request)
            .map_err(|_| SessionError::Closed)
    }
}

impl VehicleLink for RadioSessionHandle {
    fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    fn start(&self) -> Result<(), SessionError> {
        RadioSessionHandle::start(self)
    }

    fn reconnect(&self) -> Result<(), SessionError> {
        RadioSessionHandle::reconnect(self)
    }

    fn disconnect(&self) -> Result<(), SessionError> {
        RadioSessionHandle::disconnect(self)
    }

    fn close(&self) -> Result<(), SessionError> {
        RadioSessionHandle::close(self)
    }

    fn send_command(&self, command: Command) -> Result<(), SessionError> {
        RadioSessionHandle::send_command(self, command)
    }

    fn read_sensor(&self) -> Result<(), SessionError> {
        RadioSessionHandle::read_sensor(self)
    }
}

struct RadioSession<T> {
    transport: T,
    config: SessionConfig,
    status: StatusChannel<RadioPayload>,
    state_tx: watch::Sender<SessionState>,
    state: SessionState,
    /// Number of the next retry; 1 at every fresh start
    attempt: u32,
    /// Tag of the current link; events carrying any other value are stale
    generation: Generation,
    registry: EndpointRegistry,
    /// Set once a scan match has been acted on, so a scan yields one connect
    connect_pending: bool,
    link_open: bool,
    notifying: Vec<EndpointAddress>,
    /// Phase timeout, or the end of the backoff while retrying
    deadline: Option<Instant>,
}

impl<T: RadioTransport> RadioSession<T> {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<SessionRequest>,
        mut events: mpsc::UnboundedReceiver<RadioEvent>,
    ) {
        loop {
            tokio::select! {
                biased;

                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
                _ = wait_for(self.deadline) => self.handle_deadline(),
            }
        }

        self.close();
        debug!("Radio session stopped");
    }

    fn handle_request(&mut self, request: SessionRequest) {
        trace!("Request {:?} in state {}", request, self.state);
        match request {
            SessionRequest::Start | SessionRequest::Reconnect => self.fresh_start(),
            SessionRequest::Disconnect => self.disconnect(),
            SessionRequest::Close => self.close(),
            SessionRequest::Send(command) => self.send_command(command),
            SessionRequest::ReadSensor => self.read_sensor(),
        }
    }

    fn handle_event(&mut self, event: RadioEvent) {
        if let Some(generation) = event.generation() {
            if generation != self.generation {
                trace!(
                    "Ignoring event from link {} (current {})",
                    generation,
                    self.generation
                );
                return;
            }
        }

        match event {
            RadioEvent::DeviceFound(device) => self.on_device_found(device),
            RadioEvent::ConnectionChanged { success, link, .. } => {
                self.on_connection_changed(success, link)
            }
            RadioEvent::ServicesDiscovered { result, .. } => self.on_services_discovered(result),
            RadioEvent::ReadCompleted {
                endpoint, result, ..
            } => self.on_read_completed(endpoint, result),
            RadioEvent::WriteCompleted {
                endpoint, result, ..
            } => self.on_write_completed(endpoint, result),
            RadioEvent::NotificationsChanged {
                endpoint,
                enabled,
                result,
                ..
            } => self.on_notifications_changed(endpoint, enabled, result),
            RadioEvent::Notification {
                endpoint, value, ..
            } => self.on_notification(endpoint, value),
        }
    }

    fn handle_deadline(&mut self) {
        self.deadline = None;
        match self.state {
            SessionState::Retrying => self.begin_scan(false),
            SessionState::Scanning => self.on_transient_failure("scan timed out".to_string()),
            SessionState::Connecting | SessionState::Discovering => {
                self.on_transient_failure(format!("{} timed out", self.state))
            }
            _ => {}
        }
    }

    fn fresh_start(&mut self) {
        if self.state.is_active() {
            warn!("Session already {}, ignoring start", self.state);
            return;
        }

        info!("Starting radio session for '{}'", self.config.target_name);
        self.attempt = 1;
        self.begin_scan(true);
    }

    fn begin_scan(&mut self, announce: bool) {
        self.connect_pending = false;
        self.set_state(SessionState::Scanning);
        if announce {
            self.publish(SessionStatus::loading("scanning"));
        }
        self.deadline = Some(Instant::now() + self.config.scan_timeout);

        if let Err(e) = self.transport.start_scan() {
            self.on_transient_failure(e.to_string());
        }
    }

    fn on_device_found(&mut self, device: ScannedDevice) {
        if self.state != SessionState::Scanning || self.connect_pending {
            return;
        }
        if device.name.as_deref() != Some(self.config.target_name.as_str()) {
            trace!("Ignoring device {} ({:?})", device.id, device.name);
            return;
        }

        info!(
            "Found '{}' at {} (rssi {:?})",
            self.config.target_name, device.id, device.signal_strength
        );
        self.connect_pending = true;
        if let Err(e) = self.transport.stop_scan() {
            warn!("Failed to stop scan: {}", e);
        }

        self.set_state(SessionState::Connecting);
        self.publish(SessionStatus::loading("connecting"));
        self.deadline = Some(Instant::now() + self.config.connect_timeout);
        self.link_open = true;
        self.generation += 1;

        if let Err(e) = self.transport.connect(&device.id, self.generation) {
            self.on_transient_failure(e.to_string());
        }
    }

    fn on_connection_changed(&mut self, success: bool, link: LinkStatus) {
        match (self.state, success, link) {
            (SessionState::Connecting, true, LinkStatus::Connected) => {
                info!("Connected, discovering services");
                self.set_state(SessionState::Discovering);
                self.publish(SessionStatus::loading("discovering services"));
                self.deadline = Some(Instant::now() + self.config.connect_timeout);

                if let Err(e) = self.transport.discover_services(self.generation) {
                    self.on_transient_failure(e.to_string());
                }
            }
            (SessionState::Ready, _, LinkStatus::Disconnected) => {
                info!("{}", SessionFailure::TransportClosedRemotely);
                self.enter_disconnected();
            }
            (SessionState::Connecting | SessionState::Discovering, _, _) => {
                self.on_transient_failure(format!(
                    "connection changed to {:?} (success: {}) while {}",
                    link, success, self.state
                ));
            }
            (state, _, _) => debug!("Ignoring {:?} link change while {}", link, state),
        }
    }

    fn on_services_discovered(&mut self, result: Result<Vec<DiscoveredService>, TransportError>) {
        if self.state != SessionState::Discovering {
            debug!("Ignoring discovery result while {}", self.state);
            return;
        }

        let services = match result {
            Ok(services) => services,
            Err(e) => {
                error!("Service discovery failed: {}", e);
                self.on_transient_failure(e.to_string());
                return;
            }
        };

        self.registry.populate(&services);
        self.deadline = None;

        if self.registry.resolve(&self.config.control_address()).is_err() {
            error!("{}", SessionFailure::DiscoveryMismatch);
            self.release_link();
            self.set_state(SessionState::Failed);
            self.publish(SessionStatus::error(CONTROL_MISSING_MESSAGE));
            return;
        }

        self.attempt = 1;
        self.set_state(SessionState::Ready);
        self.publish(SessionStatus::success(RadioPayload::connected()));
        self.subscribe_sensor();
    }

    fn subscribe_sensor(&mut self) {
        let address = self.config.sensor_address();
        let handle = match self.registry.resolve(&address) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Sensor endpoint unavailable: {}", e);
                return;
            }
        };

        if !self.config.enable_sensor_notifications || !handle.properties.notify {
            return;
        }

        match self.transport.set_notifications(handle, true) {
            Ok(()) => {
                debug!("Subscribing to {}", address);
                self.notifying.push(address);
            }
            Err(e) => warn!("Could not enable sensor notifications: {}", e),
        }
    }

    fn on_read_completed(&mut self, endpoint: EndpointAddress, result: Result<Vec<u8>, TransportError>) {
        if self.state != SessionState::Ready {
            return;
        }

        match result {
            Ok(value) => {
                let sensors = protocol::decode_sensor_value(&value);
                debug!("Read {} from {}", sensors, endpoint);
                self.publish(SessionStatus::success(RadioPayload::with_sensors(sensors)));
            }
            Err(e) => {
                warn!("{}", SessionFailure::ReadFailure(e.to_string()));
                self.publish(SessionStatus::error(READ_FAILED_MESSAGE));
            }
        }
    }

    fn on_write_completed(&mut self, endpoint: EndpointAddress, result: Result<(), TransportError>) {
        match result {
            Ok(()) => trace!("Write to {} completed", endpoint),
            Err(e) => {
                warn!("{}", SessionFailure::WriteFailure(e.to_string()));
                if self.state == SessionState::Ready {
                    self.publish(SessionStatus::error(WRITE_FAILED_MESSAGE));
                }
            }
        }
    }

    fn on_notifications_changed(
        &mut self,
        endpoint: EndpointAddress,
        enabled: bool,
        result: Result<(), TransportError>,
    ) {
        match result {
            Ok(()) => debug!("Notifications {} for {}", if enabled { "on" } else { "off" }, endpoint),
            Err(e) if enabled => {
                warn!("Could not enable sensor notifications: {}", e);
                self.notifying.retain(|address| *address != endpoint);
            }
            Err(e) => debug!("Unsubscribe {} reported: {}", endpoint, e),
        }
    }

    fn on_notification(&mut self, endpoint: EndpointAddress, value: Vec<u8>) {
        if self.state != SessionState::Ready || !self.notifying.contains(&endpoint) {
            return;
        }
        let sensors = protocol::decode_sensor_value(&value);
        self.publish(SessionStatus::success(RadioPayload::with_sensors(sensors)));
    }

    fn send_command(&mut self, command: Command) {
        if self.state != SessionState::Ready {
            debug!("Dropping {:?}: session {}", command, self.state);
            return;
        }

        let handle = match self.registry.resolve(&self.config.control_address()) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Dropping {:?}: {}", command, e);
                return;
            }
        };

        // Session stays ready whatever the outcome
        if let Err(e) = self
            .transport
            .write(handle, protocol::command_bytes(command))
        {
            warn!("{}", SessionFailure::WriteFailure(e.to_string()));
            self.publish(SessionStatus::error(WRITE_FAILED_MESSAGE));
        }
    }

    fn read_sensor(&mut self) {
        let handle = match self.registry.resolve(&self.config.sensor_address()) {
            Ok(handle) => handle,
            Err(_) => {
                self.publish(SessionStatus::error(SENSOR_MISSING_MESSAGE));
                return;
            }
        };

        if let Err(e) = self.transport.read(handle) {
            warn!("{}", SessionFailure::ReadFailure(e.to_string()));
            self.publish(SessionStatus::error(READ_FAILED_MESSAGE));
        }
    }

    fn on_transient_failure(&mut self, reason: String) {
        warn!(
            attempt = self.attempt,
            "{}",
            SessionFailure::TransientConnectionFailure(reason)
        );

        if self.state == SessionState::Scanning {
            if let Err(e) = self.transport.stop_scan() {
                warn!("Failed to stop scan: {}", e);
            }
        }
        self.release_link();

        match self.config.retry.decide(self.attempt) {
            RetryDecision::Retry => {
                let delay = self.config.retry.delay_for(self.attempt);
                self.publish(SessionStatus::loading(
                    self.config.retry.progress(self.attempt),
                ));
                self.attempt += 1;
                self.set_state(SessionState::Retrying);
                self.deadline = Some(Instant::now() + delay);
            }
            RetryDecision::GiveUp => {
                error!(
                    "{}",
                    SessionFailure::RetryBudgetExhausted(self.config.retry.max_attempts)
                );
                self.deadline = None;
                self.set_state(SessionState::Failed);
                self.publish(SessionStatus::error(CONNECT_FAILED_MESSAGE));
            }
        }
    }

    fn disconnect(&mut self) {
        if !self.state.has_link() {
            debug!("Nothing to disconnect while {}", self.state);
            return;
        }
        info!("Disconnecting on request");
        self.enter_disconnected();
    }

    fn enter_disconnected(&mut self) {
        self.release_link();
        self.deadline = None;
        self.attempt = 1;
        self.set_state(SessionState::Disconnected);
        self.publish(SessionStatus::success(RadioPayload::disconnected()));
    }

    /// Tear down from any state. Emits nothing and is safe to repeat.
    fn close(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }

        if self.state == SessionState::Scanning {
            if let Err(e) = self.transport.stop_scan() {
                warn!("Failed to stop scan: {}", e);
            }
        }
        self.release_link();
        self.deadline = None;
        self.attempt = 1;
        self.set_state(SessionState::Idle);
        info!("Radio session closed");
    }

    /// Unsubscribe notifications, then disconnect and drop the connection.
    /// Anything still in flight for the old link becomes stale.
    fn release_link(&mut self) {
        for address in self.notifying.drain(..) {
            if let Ok(handle) = self.registry.resolve(&address) {
                if let Err(e) = self.transport.set_notifications(handle, false) {
                    warn!("Failed to unsubscribe {}: {}", address, e);
                }
            }
        }

        if self.link_open {
            if let Err(e) = self.transport.disconnect() {
                debug!("Disconnect reported: {}", e);
            }
            self.transport.release();
            self.link_open = false;
        }

        self.registry.clear();
        self.connect_pending = false;
        self.generation += 1;
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state {} -> {}", self.state, state);
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn publish(&self, status: SessionStatus<RadioPayload>) {
        self.status.publish(status);
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
