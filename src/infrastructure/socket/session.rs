//! Socket Session
//!
//! WebSocket counterpart of the radio session: one actor owns the
//! connection, retries failed opens under the same [`RetryPolicy`] and
//! publishes on a [`StatusChannel`]. The connect attempt and the reader run
//! as tasks that report back on the actor's event queue, tagged with the
//! connection epoch so that anything from a torn-down connection is ignored.

use crate::domain::models::{
    Command, SessionFailure, SessionState, SessionStatus, SocketPayload,
};
use crate::domain::retry::{RetryDecision, RetryPolicy};
use crate::domain::settings::Settings;
use crate::infrastructure::dispatcher::VehicleLink;
use crate::infrastructure::error::{SessionError, TransportError};
use crate::infrastructure::socket::protocol;
use crate::infrastructure::status::{StatusChannel, StatusStream};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

pub const CONNECT_FAILED_MESSAGE: &str = "Could not connect to websocket";
pub const SEND_FAILED_MESSAGE: &str = "Send message failed";
pub const NOT_CONNECTED_MESSAGE: &str = "Socket not connected";

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub url: String,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: protocol::DEFAULT_URL.to_string(),
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl SocketConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            url: settings.socket_url.clone(),
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                base_delay: Duration::from_millis(settings.retry_base_delay_ms),
                max_delay: Duration::from_millis(settings.retry_max_delay_ms),
            },
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        }
    }
}

#[derive(Debug)]
enum SocketRequest {
    Start,
    Reconnect,
    Disconnect,
    Close,
    Send(Command),
    ReadSensor,
}

enum SocketEvent {
    Opened(Box<WsStream>),
    OpenFailed(String),
    Received(Message),
    Closed(Option<String>),
}

struct Tagged {
    epoch: u64,
    event: SocketEvent,
}

/// Cloneable front door to a running socket session
#[derive(Clone)]
pub struct SocketSessionHandle {
    requests: mpsc::UnboundedSender<SocketRequest>,
    status: StatusChannel<SocketPayload>,
    state: watch::Receiver<SessionState>,
}

impl SocketSessionHandle {
    pub fn spawn(config: SocketConfig) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let status = StatusChannel::default();

        let session = SocketSession {
            config,
            status: status.clone(),
            state_tx,
            state: SessionState::Idle,
            attempt: 1,
            epoch: 0,
            events: event_tx,
            sink: None,
            connect_task: None,
            reader_task: None,
            deadline: None,
        };
        tokio::spawn(session.run(request_rx, event_rx));

        Self {
            requests: request_tx,
            status,
            state: state_rx,
        }
    }

    pub fn subscribe(&self) -> StatusStream<SocketPayload> {
        self.status.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    fn request(&self, request: SocketRequest) -> Result<(), SessionError> {
        self.requests
            .send(request)
            .map_err(|_| SessionError::Closed)
    }
}

impl VehicleLink for SocketSessionHandle {
    fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    fn start(&self) -> Result<(), SessionError> {
        self.request(SocketRequest::Start)
    }

    fn reconnect(&self) -> Result<(), SessionError> {
        self.request(SocketRequest::Reconnect)
    }

    fn disconnect(&self) -> Result<(), SessionError> {
        self.request(SocketRequest::Disconnect)
    }

    fn close(&self) -> Result<(), SessionError> {
        self.request(SocketRequest::Close)
    }

    fn send_command(&self, command: Command) -> Result<(), SessionError> {
        self.request(SocketRequest::Send(command))
    }

    /// Asks the vehicle to measure; the reading arrives as an inbound frame
    fn read_sensor(&self) -> Result<(), SessionError> {
        self.request(SocketRequest::ReadSensor)
    }
}

struct SocketSession {
    config: SocketConfig,
    status: StatusChannel<SocketPayload>,
    state_tx: watch::Sender<SessionState>,
    state: SessionState,
    attempt: u32,
    /// Bumped for every connection attempt and teardown
    epoch: u64,
    events: mpsc::UnboundedSender<Tagged>,
    sink: Option<WsSink>,
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    /// End of the backoff while retrying
    deadline: Option<Instant>,
}

impl SocketSession {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<SocketRequest>,
        mut events: mpsc::UnboundedReceiver<Tagged>,
    ) {
        loop {
            tokio::select! {
                biased;

                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
                Some(tagged) = events.recv() => self.handle_event(tagged),
                _ = wait_for(self.deadline) => {
                    self.deadline = None;
                    if self.state == SessionState::Retrying {
                        self.begin_connect(false);
                    }
                }
            }
        }

        self.close().await;
        debug!("Socket session stopped");
    }

    async fn handle_request(&mut self, request: SocketRequest) {
        trace!("Request {:?} in state {}", request, self.state);
        match request {
            SocketRequest::Start | SocketRequest::Reconnect => self.fresh_start(),
            SocketRequest::Disconnect => {
                if self.state.has_link() {
                    info!("Disconnecting on request");
                    self.teardown().await;
                    self.enter_disconnected();
                }
            }
            SocketRequest::Close => self.close().await,
            SocketRequest::Send(command) => self.send_command(command).await,
            SocketRequest::ReadSensor => {
                if self.state == SessionState::Ready {
                    self.send_command(Command::Measure).await;
                } else {
                    self.publish(SessionStatus::error(NOT_CONNECTED_MESSAGE));
                }
            }
        }
    }

    fn handle_event(&mut self, tagged: Tagged) {
        if tagged.epoch != self.epoch {
            trace!("Ignoring event from connection epoch {}", tagged.epoch);
            return;
        }

        match tagged.event {
            SocketEvent::Opened(stream) if self.state == SessionState::Connecting => {
                self.on_opened(*stream)
            }
            SocketEvent::OpenFailed(reason) if self.state == SessionState::Connecting => {
                self.on_transient_failure(reason)
            }
            SocketEvent::Received(message) if self.state == SessionState::Ready => {
                self.on_message(message)
            }
            SocketEvent::Closed(reason) if self.state == SessionState::Ready => {
                info!(
                    "{} ({})",
                    SessionFailure::TransportClosedRemotely,
                    reason.as_deref().unwrap_or("closed")
                );
                self.abort_tasks();
                self.sink = None;
                self.epoch += 1;
                self.enter_disconnected();
            }
            _ => debug!("Ignoring socket event while {}", self.state),
        }
    }

    fn fresh_start(&mut self) {
        if self.state.is_active() {
            warn!("Session already {}, ignoring start", self.state);
            return;
        }

        info!("Starting socket session to {}", self.config.url);
        self.attempt = 1;
        self.begin_connect(true);
    }

    fn begin_connect(&mut self, announce: bool) {
        self.set_state(SessionState::Connecting);
        if announce {
            self.publish(SessionStatus::loading("connecting"));
        }

        self.epoch += 1;
        let epoch = self.epoch;
        let url = self.config.url.clone();
        let timeout = self.config.connect_timeout;
        let events = self.events.clone();

        self.connect_task = Some(tokio::spawn(async move {
            let event = match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
                Ok(Ok((stream, _response))) => SocketEvent::Opened(Box::new(stream)),
                Ok(Err(e)) => SocketEvent::OpenFailed(e.to_string()),
                Err(_) => SocketEvent::OpenFailed("connect timed out".to_string()),
            };
            let _ = events.send(Tagged { epoch, event });
        }));
    }

    fn on_opened(&mut self, stream: WsStream) {
        info!("Connected to {}", self.config.url);
        self.connect_task = None;

        let (sink, mut source) = stream.split();
        let epoch = self.epoch;
        let events = self.events.clone();

        self.reader_task = Some(tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let event = match message {
                    Ok(Message::Close(frame)) => {
                        SocketEvent::Closed(frame.map(|f| f.reason.to_string()))
                    }
                    Ok(message) => SocketEvent::Received(message),
                    Err(e) => SocketEvent::Closed(Some(e.to_string())),
                };
                let closing = matches!(event, SocketEvent::Closed(_));
                if events.send(Tagged { epoch, event }).is_err() || closing {
                    return;
                }
            }
            let _ = events.send(Tagged {
                epoch,
                event: SocketEvent::Closed(None),
            });
        }));

        self.sink = Some(sink);
        self.attempt = 1;
        self.set_state(SessionState::Ready);
        self.publish(SessionStatus::success(SocketPayload::connected()));
    }

    fn on_message(&mut self, message: Message) {
        let payload = match message {
            Message::Text(text) => protocol::parse_frame(&text),
            Message::Binary(bytes) => SocketPayload {
                image: Some(bytes),
                ..SocketPayload::connected()
            },
            other => {
                trace!("Ignoring control frame {:?}", other);
                return;
            }
        };
        self.publish(SessionStatus::success(payload));
    }

    async fn send_command(&mut self, command: Command) {
        if self.state != SessionState::Ready {
            debug!("Dropping {:?}: session {}", command, self.state);
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        let text = protocol::command_message(command).to_string();
        if let Err(e) = sink.send(Message::Text(text)).await {
            let e = TransportError::Socket(e.to_string());
            warn!("{}", SessionFailure::WriteFailure(e.to_string()));
            self.publish(SessionStatus::error(SEND_FAILED_MESSAGE));
        }
    }

    fn on_transient_failure(&mut self, reason: String) {
        warn!(
            attempt = self.attempt,
            "{}",
            SessionFailure::TransientConnectionFailure(reason)
        );
        self.abort_tasks();
        self.sink = None;

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

    fn enter_disconnected(&mut self) {
        self.deadline = None;
        self.attempt = 1;
        self.set_state(SessionState::Disconnected);
        self.publish(SessionStatus::success(SocketPayload::disconnected()));
    }

    async fn close(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        self.teardown().await;
        self.deadline = None;
        self.attempt = 1;
        self.set_state(SessionState::Idle);
        info!("Socket session closed");
    }

    /// Cancel in-flight work and close the connection, if any
    async fn teardown(&mut self) {
        self.epoch += 1;
        self.abort_tasks();

        if let Some(mut sink) = self.sink.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => debug!("Socket closed"),
                Ok(Err(e)) => debug!("Socket close reported: {}", e),
                Err(_) => debug!("Socket close timed out"),
            }
        }
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state {} -> {}", self.state, state);
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn publish(&self, status: SessionStatus<SocketPayload>) {
        self.status.publish(status);
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ConnectionState;
    use tokio::net::TcpListener;

    type Status = SessionStatus<SocketPayload>;

    /// One-connection echo-less vehicle: reports what it receives, sends what
    /// it is given and closes when the sender is dropped
    async fn spawn_vehicle() -> (
        String,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<Message>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let (mut sink, mut source) = ws.split();
            loop {
                tokio::select! {
                    message = source.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            let _ = inbound_tx.send(text);
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                    outbound = outbound_rx.recv() => match outbound {
                        Some(message) => {
                            if sink.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                }
            }
        });

        (format!("ws://{}", addr), inbound_rx, outbound_tx)
    }

    fn config(url: String, max_attempts: u32) -> SocketConfig {
        SocketConfig {
            url,
            retry: RetryPolicy::immediate(max_attempts),
            connect_timeout: Duration::from_secs(5),
        }
    }

    async fn next(stream: &mut StatusStream<SocketPayload>) -> Status {
        tokio::time::timeout(Duration::from_secs(10), stream.recv())
            .await
            .expect("timed out waiting for status")
            .expect("status channel closed")
    }

    #[tokio::test]
    async fn test_session_lifecycle_against_vehicle() {
        let (url, mut inbound, outbound) = spawn_vehicle().await;
        let handle = SocketSessionHandle::spawn(config(url, 3));
        let mut stream = handle.subscribe();

        handle.start().unwrap();
        assert_eq!(next(&mut stream).await, SessionStatus::loading("connecting"));
        assert_eq!(
            next(&mut stream).await,
            SessionStatus::success(SocketPayload::connected())
        );
        assert!(handle.is_ready());

        handle.send_command(Command::Forward).unwrap();
        handle.send_command(Command::Capture).unwrap();
        handle.read_sensor().unwrap();
        assert_eq!(inbound.recv().await.as_deref(), Some("forward"));
        assert_eq!(inbound.recv().await.as_deref(), Some("photo"));
        assert_eq!(inbound.recv().await.as_deref(), Some("measure"));

        outbound
            .send(Message::Text(r#"{"sensors": "31cm"}"#.to_string()))
            .unwrap();
        let status = next(&mut stream).await;
        match status {
            SessionStatus::Success { payload } => assert_eq!(payload.sensors, "31cm"),
            other => panic!("unexpected status {:?}", other),
        }

        // Vehicle hangs up
        drop(outbound);
        let status = next(&mut stream).await;
        assert_eq!(status, SessionStatus::success(SocketPayload::disconnected()));
        if let SessionStatus::Success { payload } = status {
            assert_eq!(payload.connection, ConnectionState::Disconnected);
        }
        assert_eq!(handle.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unreachable_vehicle_exhausts_retries() {
        // Reserve a port, then free it so connects are refused
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let handle = SocketSessionHandle::spawn(config(format!("ws://{}", addr), 2));
        let mut stream = handle.subscribe();

        handle.start().unwrap();
        assert_eq!(next(&mut stream).await, SessionStatus::loading("connecting"));
        assert_eq!(next(&mut stream).await, SessionStatus::loading("attempt 1/2"));
        assert_eq!(next(&mut stream).await, SessionStatus::loading("attempt 2/2"));
        assert_eq!(
            next(&mut stream).await,
            SessionStatus::error(CONNECT_FAILED_MESSAGE)
        );
        assert_eq!(handle.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_commands_dropped_before_connect_and_close_is_quiet() {
        let handle = SocketSessionHandle::spawn(config("ws://127.0.0.1:1".to_string(), 1));
        let mut stream = handle.subscribe();

        handle.send_command(Command::Forward).unwrap();
        handle.close().unwrap();
        handle.close().unwrap();
        handle.read_sensor().unwrap();

        assert_eq!(
            next(&mut stream).await,
            SessionStatus::error(NOT_CONNECTED_MESSAGE)
        );
        assert_eq!(handle.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_user_disconnect_closes_socket() {
        let (url, _inbound, _outbound) = spawn_vehicle().await;
        let handle = SocketSessionHandle::spawn(config(url, 1));
        let mut stream = handle.subscribe();

        handle.start().unwrap();
        next(&mut stream).await;
        assert_eq!(
            next(&mut stream).await,
            SessionStatus::success(SocketPayload::connected())
        );

        handle.disconnect().unwrap();
        assert_eq!(
            next(&mut stream).await,
            SessionStatus::success(SocketPayload::disconnected())
        );

        handle.read_sensor().unwrap();
        assert_eq!(
            next(&mut stream).await,
            SessionStatus::error(NOT_CONNECTED_MESSAGE)
        );
    }
}
