//! Control session client.
//!
//! A session sends requests to the control endpoint and then watches the
//! inbound messages until the appliance either reports its directory state or
//! refuses the change. Once a configuration change settles, the appliance
//! emits a fixed idle-chatter sequence; seeing it is the signal that
//! re-querying directory state is safe.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use sortlink_protocol::message::{
    config_change_request, directory_info_request, status_alert_request,
};
use sortlink_protocol::{DirectoryInfo, Frame, MessageType, ProtocolError, TextByteOrder};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Number of recent message types kept for pattern matching.
pub const CHATTER_WINDOW_SIZE: usize = 4;

/// Idle chatter emitted once the appliance has settled, oldest first.
pub const IDLE_CHATTER_PATTERN: [MessageType; CHATTER_WINDOW_SIZE] = [
    MessageType::Broadcast,
    MessageType::Broadcast,
    MessageType::GenericEvent,
    MessageType::Ack,
];

/// Directory probes allowed before a session gives up.
pub const DEFAULT_MAX_PROBE_ATTEMPTS: u32 = 10;

/// Pause after each directory probe.
pub const DEFAULT_PROBE_DELAY: Duration = Duration::from_secs(1);

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Pause after each directory probe.
    pub probe_delay: Duration,
    /// Probes allowed before failing with an unexpected-sequence error.
    pub max_probe_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            probe_delay: DEFAULT_PROBE_DELAY,
            max_probe_attempts: DEFAULT_MAX_PROBE_ATTEMPTS,
        }
    }
}

impl SessionConfig {
    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub fn with_max_probe_attempts(mut self, attempts: u32) -> Self {
        self.max_probe_attempts = attempts.max(1);
        self
    }
}

/// Fixed-size ring buffer of the most recent chatter message types.
#[derive(Debug, Clone, Default)]
pub struct ChatterWindow {
    slots: [Option<MessageType>; CHATTER_WINDOW_SIZE],
    /// Index of the slot the next push writes.
    next: usize,
    len: usize,
}

impl ChatterWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message type, evicting the oldest once full.
    pub fn push(&mut self, kind: MessageType) {
        self.slots[self.next] = Some(kind);
        self.next = (self.next + 1) % CHATTER_WINDOW_SIZE;
        self.len = (self.len + 1).min(CHATTER_WINDOW_SIZE);
    }

    /// Recorded types, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = MessageType> + '_ {
        let start = (self.next + CHATTER_WINDOW_SIZE - self.len) % CHATTER_WINDOW_SIZE;
        (0..self.len).filter_map(move |i| self.slots[(start + i) % CHATTER_WINDOW_SIZE])
    }

    /// Whether the window is full and equals `pattern`, oldest first.
    pub fn matches(&self, pattern: &[MessageType; CHATTER_WINDOW_SIZE]) -> bool {
        self.len == CHATTER_WINDOW_SIZE && self.iter().eq(pattern.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Terminal result of a control session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The appliance reports an active directory.
    AlreadyOnKnownConfiguration { directory: String },
    /// The appliance refused the request with a negative acknowledgement.
    KnownConfigurationUnreachable,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::AlreadyOnKnownConfiguration { .. })
    }

    pub fn reason(&self) -> &'static str {
        match self {
            SessionOutcome::AlreadyOnKnownConfiguration { .. } => {
                "already on known-good configuration"
            }
            SessionOutcome::KnownConfigurationUnreachable => "known configuration unreachable",
        }
    }
}

/// Session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next inbound frame.
    AwaitingData,
    /// A frame has arrived and is being classified.
    Classifying(Frame),
    /// Idle chatter seen; re-query directory state.
    Probing,
    /// Terminal: success.
    Succeeded(SessionOutcome),
    /// Terminal: the appliance refused.
    Failed(SessionOutcome),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Succeeded(_) | SessionState::Failed(_))
    }
}

/// Classification and probe accounting, independent of I/O.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    window: ChatterWindow,
    probe_attempts: u32,
    max_probe_attempts: u32,
    text_byte_order: TextByteOrder,
}

impl SessionMachine {
    pub fn new(max_probe_attempts: u32, text_byte_order: TextByteOrder) -> Self {
        Self {
            window: ChatterWindow::new(),
            probe_attempts: 0,
            max_probe_attempts,
            text_byte_order,
        }
    }

    /// Classifies one inbound frame and returns the next state.
    pub fn classify(&mut self, frame: &Frame) -> SessionState {
        match frame.kind() {
            MessageType::Nak => {
                tracing::info!("Appliance refused the request (NAK)");
                SessionState::Failed(SessionOutcome::KnownConfigurationUnreachable)
            }
            MessageType::DirectoryInfoReply => {
                match DirectoryInfo::from_frame(frame, self.text_byte_order) {
                    Some(info) if info.is_on_known_configuration() => {
                        tracing::info!("Appliance reports directory {}", info.directory);
                        SessionState::Succeeded(SessionOutcome::AlreadyOnKnownConfiguration {
                            directory: info.directory,
                        })
                    }
                    _ => {
                        tracing::debug!("Directory-info reply without an active directory");
                        SessionState::AwaitingData
                    }
                }
            }
            kind @ (MessageType::Broadcast | MessageType::GenericEvent | MessageType::Ack) => {
                self.window.push(kind);
                if self.window.matches(&IDLE_CHATTER_PATTERN) {
                    // One probe per occurrence.
                    self.window.clear();
                    SessionState::Probing
                } else {
                    SessionState::AwaitingData
                }
            }
            other => {
                tracing::debug!("Ignoring message type {}", other.code());
                SessionState::AwaitingData
            }
        }
    }

    /// Counts a completed probe, failing once the ceiling is reached.
    pub fn record_probe(&mut self) -> Result<(), ProtocolError> {
        self.probe_attempts += 1;
        if self.probe_attempts >= self.max_probe_attempts {
            return Err(ProtocolError::UnexpectedSequence {
                probes: self.probe_attempts,
            });
        }
        Ok(())
    }

    pub fn probe_attempts(&self) -> u32 {
        self.probe_attempts
    }

    pub fn window(&self) -> &ChatterWindow {
        &self.window
    }
}

/// Client for the appliance control endpoint.
pub struct ControlSession {
    conn: Connection,
    config: SessionConfig,
    text_byte_order: TextByteOrder,
    machine: SessionMachine,
}

impl ControlSession {
    /// Connects with the default session tuning.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        Self::connect_with(config, SessionConfig::default()).await
    }

    pub async fn connect_with(
        config: ConnectionConfig,
        session: SessionConfig,
    ) -> Result<Self, ClientError> {
        let conn = Connection::connect(&config).await?;
        tracing::info!("Control session connected to {}", conn.addr());
        Ok(Self {
            conn,
            machine: SessionMachine::new(session.max_probe_attempts, config.text_byte_order),
            text_byte_order: config.text_byte_order,
            config: session,
        })
    }

    /// Sends the directory-info query.
    pub async fn request_directory_info(&mut self) -> Result<(), ClientError> {
        tracing::debug!("Requesting directory info");
        self.conn.send(&directory_info_request()).await
    }

    /// Subscribes to status alerts.
    pub async fn request_status_alerts(&mut self) -> Result<(), ClientError> {
        tracing::debug!("Subscribing to status alerts");
        self.conn.send(&status_alert_request()).await
    }

    /// Requests a switch to configuration `name`. The name is validated
    /// before anything is written.
    pub async fn request_config_change(&mut self, name: &str) -> Result<(), ClientError> {
        let request = config_change_request(name)?;
        tracing::info!("Requesting configuration change to {}", name);
        self.conn.send(&request).await
    }

    /// Runs the receive loop until a terminal state.
    ///
    /// A NAK is returned as an `Ok` failed outcome; exhausting the probe
    /// budget is a protocol error.
    pub async fn run_session(&mut self) -> Result<SessionOutcome, ClientError> {
        let mut state = SessionState::AwaitingData;
        loop {
            state = match state {
                SessionState::AwaitingData => {
                    SessionState::Classifying(self.conn.next_frame().await?)
                }
                SessionState::Classifying(frame) => self.machine.classify(&frame),
                SessionState::Probing => {
                    tracing::debug!(
                        "Idle chatter observed, probing directory ({} of {})",
                        self.machine.probe_attempts() + 1,
                        self.config.max_probe_attempts
                    );
                    self.request_directory_info().await?;
                    tokio::time::sleep(self.config.probe_delay).await;
                    if let Err(e) = self.machine.record_probe() {
                        tracing::warn!("Giving up: {}", e);
                        return Err(e.into());
                    }
                    SessionState::AwaitingData
                }
                SessionState::Succeeded(outcome) | SessionState::Failed(outcome) => {
                    tracing::info!("Control session finished: {}", outcome.reason());
                    return Ok(outcome);
                }
            };
        }
    }

    /// Subscribes to alerts, requests configuration `name`, and waits for the
    /// session outcome.
    pub async fn apply_configuration(&mut self, name: &str) -> Result<SessionOutcome, ClientError> {
        // Validate before the first write.
        let request = config_change_request(name)?;
        self.request_status_alerts().await?;
        tracing::info!("Requesting configuration change to {}", name);
        self.conn.send(&request).await?;
        self.run_session().await
    }

    /// Queries directory state once and returns the first reply.
    pub async fn query_directory_info(&mut self) -> Result<DirectoryInfo, ClientError> {
        self.request_directory_info().await?;
        loop {
            let frame = self.conn.next_frame().await?;
            if let Some(info) = DirectoryInfo::from_frame(&frame, self.text_byte_order) {
                return Ok(info);
            }
            tracing::debug!(
                "Skipping message type {} while awaiting directory info",
                frame.message_type
            );
        }
    }

    /// Probes sent so far by `run_session`.
    pub fn probe_attempts(&self) -> u32 {
        self.machine.probe_attempts()
    }

    /// Moves the session onto a background task that runs `run_session`.
    pub fn spawn(mut self) -> SessionHandle {
        let task = tokio::spawn(async move {
            let outcome = self.run_session().await;
            if let Err(e) = self.conn.close().await {
                tracing::debug!("Error closing control connection: {}", e);
            }
            outcome
        });
        SessionHandle { task: Some(task) }
    }

    /// Closes the connection.
    pub async fn close(self) -> Result<(), ClientError> {
        self.conn.close().await
    }
}

/// Handle to a control session running on a background task. Dropping the
/// handle aborts the session and closes its socket.
pub struct SessionHandle {
    task: Option<JoinHandle<Result<SessionOutcome, ClientError>>>,
}

impl SessionHandle {
    /// Waits for the session outcome.
    pub async fn outcome(mut self) -> Result<SessionOutcome, ClientError> {
        match self.task.take() {
            Some(task) => task.await?,
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Stops the session; the socket is dropped with the task.
    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};
    use sortlink_protocol::message::{
        CONFIG_CHANGE_REQUEST, DIRECTORY_INFO_QUERY, DIRECTORY_NAME_SECTION,
        STATUS_ALERT_SUBSCRIBE,
    };
    use sortlink_protocol::Decoder;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn frame(kind: MessageType) -> Frame {
        Frame::new(kind)
    }

    fn directory_reply(name: &[u8]) -> Frame {
        Frame::new(MessageType::DirectoryInfoReply)
            .with_section(DIRECTORY_NAME_SECTION, Bytes::copy_from_slice(name))
    }

    fn idle_chatter() -> Vec<Frame> {
        IDLE_CHATTER_PATTERN.iter().map(|k| frame(*k)).collect()
    }

    /// Fake control endpoint: writes `script`, then records the message types
    /// the client sends until it disconnects.
    async fn fake_appliance(script: Vec<Frame>) -> (u16, JoinHandle<Vec<u32>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut out = BytesMut::new();
            for f in &script {
                out.extend_from_slice(&f.encode().unwrap());
            }
            socket.write_all(&out).await.unwrap();

            let mut decoder = Decoder::new();
            let mut received = Vec::new();
            let mut buf = [0u8; 512];
            loop {
                let n = socket.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                decoder.extend(&buf[..n]);
                while let Some(f) = decoder.decode_frame().unwrap() {
                    received.push(f.message_type);
                }
            }
            received
        });

        (port, task)
    }

    async fn session(port: u16) -> ControlSession {
        ControlSession::connect_with(
            ConnectionConfig::new("127.0.0.1", port),
            SessionConfig::default().with_probe_delay(Duration::ZERO),
        )
        .await
        .unwrap()
    }

    fn probes(received: &[u32]) -> usize {
        received
            .iter()
            .filter(|t| **t == DIRECTORY_INFO_QUERY)
            .count()
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = ChatterWindow::new();
        assert!(window.is_empty());

        for kind in [
            MessageType::Ack,
            MessageType::Broadcast,
            MessageType::Broadcast,
            MessageType::GenericEvent,
        ] {
            window.push(kind);
        }
        assert_eq!(window.len(), 4);
        assert!(!window.matches(&IDLE_CHATTER_PATTERN));

        window.push(MessageType::Ack);
        assert_eq!(window.len(), 4);
        assert!(window.matches(&IDLE_CHATTER_PATTERN));
        assert_eq!(window.iter().collect::<Vec<_>>(), IDLE_CHATTER_PATTERN.to_vec());
    }

    #[test]
    fn test_window_partial_never_matches() {
        let mut window = ChatterWindow::new();
        window.push(MessageType::Broadcast);
        window.push(MessageType::GenericEvent);
        window.push(MessageType::Ack);
        assert!(!window.matches(&IDLE_CHATTER_PATTERN));
    }

    #[test]
    fn test_machine_probes_once_per_occurrence() {
        let mut machine = SessionMachine::new(10, TextByteOrder::Reversed);
        let mut probing = 0;

        for kind in [
            MessageType::Broadcast,
            MessageType::Broadcast,
            MessageType::GenericEvent,
            MessageType::Ack,
            MessageType::Ack,
            MessageType::Ack,
        ] {
            if machine.classify(&frame(kind)) == SessionState::Probing {
                probing += 1;
            }
        }

        assert_eq!(probing, 1);
        assert_eq!(machine.window().len(), 2);
    }

    #[test]
    fn test_machine_out_of_order_chatter() {
        let mut machine = SessionMachine::new(10, TextByteOrder::Reversed);
        for kind in [
            MessageType::Broadcast,
            MessageType::GenericEvent,
            MessageType::Broadcast,
            MessageType::Ack,
        ] {
            assert_eq!(machine.classify(&frame(kind)), SessionState::AwaitingData);
        }
    }

    #[test]
    fn test_machine_terminal_states() {
        let mut machine = SessionMachine::new(10, TextByteOrder::Reversed);

        let state = machine.classify(&frame(MessageType::Nak));
        assert_eq!(
            state,
            SessionState::Failed(SessionOutcome::KnownConfigurationUnreachable)
        );
        assert!(state.is_terminal());

        assert_eq!(
            machine.classify(&directory_reply(b"")),
            SessionState::AwaitingData
        );

        let state = machine.classify(&directory_reply(b"3202AS"));
        assert_eq!(
            state,
            SessionState::Succeeded(SessionOutcome::AlreadyOnKnownConfiguration {
                directory: "SA2023".to_string()
            })
        );

        assert_eq!(
            machine.classify(&frame(MessageType::Other(7000))),
            SessionState::AwaitingData
        );
    }

    #[test]
    fn test_machine_probe_ceiling() {
        let mut machine = SessionMachine::new(10, TextByteOrder::Reversed);
        for _ in 0..9 {
            machine.record_probe().unwrap();
        }
        assert!(matches!(
            machine.record_probe(),
            Err(ProtocolError::UnexpectedSequence { probes: 10 })
        ));
        assert_eq!(machine.probe_attempts(), 10);
    }

    #[test]
    fn test_outcome_reasons() {
        let ok = SessionOutcome::AlreadyOnKnownConfiguration {
            directory: "SA2023".into(),
        };
        assert!(ok.is_success());
        assert_eq!(ok.reason(), "already on known-good configuration");

        let nak = SessionOutcome::KnownConfigurationUnreachable;
        assert!(!nak.is_success());
        assert_eq!(nak.reason(), "known configuration unreachable");
    }

    #[tokio::test]
    async fn test_nak_is_failed_outcome() {
        let (port, appliance) =
            fake_appliance(vec![frame(MessageType::Ack), frame(MessageType::Nak)]).await;

        let mut session = session(port).await;
        let outcome = session.run_session().await.unwrap();
        assert_eq!(outcome, SessionOutcome::KnownConfigurationUnreachable);
        assert!(!outcome.is_success());

        session.close().await.unwrap();
        assert_eq!(probes(&appliance.await.unwrap()), 0);
    }

    #[tokio::test]
    async fn test_idle_chatter_triggers_single_probe() {
        let mut script = vec![directory_reply(b"")];
        script.extend(idle_chatter());
        script.push(directory_reply(b"3202AS"));
        let (port, appliance) = fake_appliance(script).await;

        let mut session = session(port).await;
        let outcome = session.run_session().await.unwrap();
        assert_eq!(
            outcome,
            SessionOutcome::AlreadyOnKnownConfiguration {
                directory: "SA2023".into()
            }
        );
        assert_eq!(session.probe_attempts(), 1);

        session.close().await.unwrap();
        assert_eq!(probes(&appliance.await.unwrap()), 1);
    }

    #[tokio::test]
    async fn test_probe_ceiling_fails_session() {
        let mut script = Vec::new();
        for _ in 0..DEFAULT_MAX_PROBE_ATTEMPTS {
            script.extend(idle_chatter());
        }
        let (port, appliance) = fake_appliance(script).await;

        let mut session = session(port).await;
        let result = session.run_session().await;
        assert!(matches!(
            result,
            Err(ClientError::Protocol(ProtocolError::UnexpectedSequence { probes: 10 }))
        ));

        session.close().await.unwrap();
        assert_eq!(probes(&appliance.await.unwrap()), 10);
    }

    #[tokio::test]
    async fn test_connection_drop_mid_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let chatter = frame(MessageType::Broadcast).encode().unwrap();
            socket.write_all(&chatter).await.unwrap();
        });

        let mut session = session(port).await;
        let result = session.run_session().await;
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_apply_configuration_sends_requests_in_order() {
        let (port, appliance) = fake_appliance(vec![frame(MessageType::Nak)]).await;

        let mut session = session(port).await;
        let outcome = session.apply_configuration("SA2024").await.unwrap();
        assert_eq!(outcome, SessionOutcome::KnownConfigurationUnreachable);

        session.close().await.unwrap();
        assert_eq!(
            appliance.await.unwrap(),
            vec![STATUS_ALERT_SUBSCRIBE, CONFIG_CHANGE_REQUEST]
        );
    }

    #[tokio::test]
    async fn test_invalid_name_sends_nothing() {
        let (port, appliance) = fake_appliance(Vec::new()).await;

        let mut session = session(port).await;
        let result = session.apply_configuration(&"x".repeat(256)).await;
        assert!(matches!(result, Err(ClientError::Validation(_))));

        session.close().await.unwrap();
        assert!(appliance.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_directory_info_skips_chatter() {
        let (port, appliance) = fake_appliance(vec![
            frame(MessageType::Broadcast),
            directory_reply(b"3202AS"),
        ])
        .await;

        let mut session = session(port).await;
        let info = session.query_directory_info().await.unwrap();
        assert_eq!(info.directory, "SA2023");

        session.close().await.unwrap();
        assert_eq!(appliance.await.unwrap(), vec![DIRECTORY_INFO_QUERY]);
    }

    #[tokio::test]
    async fn test_spawned_session_outcome() {
        let (port, appliance) = fake_appliance(vec![directory_reply(b"1202AS")]).await;

        let handle = session(port).await.spawn();
        let outcome = handle.outcome().await.unwrap();
        assert!(outcome.is_success());
        assert!(appliance.await.unwrap().is_empty());
    }

    /// Accepts one connection and stays silent. Resolves with the byte count
    /// of the first read, 0 once the client side is closed.
    async fn silent_appliance() -> (u16, JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            socket.read(&mut buf).await.unwrap_or(0)
        });
        (port, task)
    }

    #[tokio::test]
    async fn test_dropping_session_handle_closes_socket() {
        let (port, appliance) = silent_appliance().await;

        let handle = session(port).await.spawn();
        assert!(!handle.is_finished());
        drop(handle);

        let n = tokio::time::timeout(Duration::from_secs(5), appliance)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_abort_session_handle() {
        let (port, appliance) = silent_appliance().await;

        let handle = session(port).await.spawn();
        handle.abort();

        let result = tokio::time::timeout(Duration::from_secs(5), handle.outcome())
            .await
            .unwrap();
        match result {
            Err(ClientError::Task(e)) => assert!(e.is_cancelled()),
            other => panic!("expected cancelled task, got {:?}", other),
        }

        let n = tokio::time::timeout(Duration::from_secs(5), appliance)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
