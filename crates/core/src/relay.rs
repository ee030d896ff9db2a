//! Per-connection coordinator between a client and one upstream session.
//!
//! A relay owns a single event loop. Client frames, upstream events and the
//! completion of an in-flight connect all arrive through it, so every
//! mutation of the session and its turn state has exactly one writer and
//! upstream events reach the client in the order the transport delivered them.

use crate::error::{ConnectError, RelayError};
use crate::generic_types::UpstreamEvent;
use crate::protocol::{ClientCommand, ClientFrame, RelayMessage, StartConfig};
use crate::realtime_api::{Connection, RealtimeApi, RealtimeConnector};
use crate::session_state::{Session, SessionDefaults};
use crate::turn_state::TurnEvent;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use voice_relay_audio::audio;

type PendingConnect<A> =
    Pin<Box<dyn Future<Output = Result<Connection<A>, ConnectError>> + Send + 'static>>;

pub struct SessionRelay<C: RealtimeConnector> {
    connector: Arc<C>,
    defaults: Arc<SessionDefaults>,
    outbound: mpsc::UnboundedSender<RelayMessage>,
    session: Option<Session<C::Api>>,
    pending: Option<PendingConnect<C::Api>>,
    upstream: Option<mpsc::Receiver<UpstreamEvent>>,
}

impl<C: RealtimeConnector> SessionRelay<C> {
    pub fn new(
        connector: Arc<C>,
        defaults: Arc<SessionDefaults>,
        outbound: mpsc::UnboundedSender<RelayMessage>,
    ) -> Self {
        Self {
            connector,
            defaults,
            outbound,
            session: None,
            pending: None,
            upstream: None,
        }
    }

    /// Runs until the client side of `inbound` is dropped, then tears down
    /// whatever session is still open.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<ClientFrame>) {
        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(frame) => self.handle_frame(frame),
                    None => break,
                },
                result = wait_connect(&mut self.pending) => {
                    self.pending = None;
                    self.on_connected(result);
                }
                event = recv_upstream(&mut self.upstream) => match event {
                    Some(event) => self.on_upstream(event),
                    None => self.on_upstream(UpstreamEvent::Disconnected(None)),
                },
            }
        }

        tracing::info!("Client disconnected, cleaning up");
        self.stop();
    }

    /// Handles a single client frame, reporting any failure back to the client.
    pub fn handle_frame(&mut self, frame: ClientFrame) {
        let result = match frame {
            ClientFrame::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => self.handle_command(command),
                Err(e) => Err(RelayError::Malformed(e.to_string())),
            },
            ClientFrame::Binary(pcm) => self.forward_audio(pcm),
        };

        if let Err(e) = result {
            tracing::warn!("Client command failed: {}", e);
            self.emit(RelayMessage::error(&e));
        }
    }

    fn handle_command(&mut self, command: ClientCommand) -> Result<(), RelayError> {
        match command {
            ClientCommand::Start { config } => self.start(config),
            ClientCommand::Audio { audio } => {
                let pcm = audio::decode_bytes(&audio)
                    .map_err(|e| RelayError::InvalidAudio(e.to_string()))?;
                self.forward_audio(pcm)
            }
            ClientCommand::Text { text } => self.forward_text(text),
            ClientCommand::Stop => {
                self.stop();
                Ok(())
            }
        }
    }

    fn start(&mut self, requested: StartConfig) -> Result<(), RelayError> {
        if self.session.is_some() {
            return Err(RelayError::AlreadyStarted);
        }

        let config = self.defaults.resolve(requested);
        let mut session: Session<C::Api> = Session::new(config.clone());
        session.begin_connecting();
        tracing::info!(
            "Starting session {} (language: {})",
            session.id(),
            session.config().language
        );

        let connector = self.connector.clone();
        self.pending = Some(Box::pin(async move { connector.connect(config).await }));
        self.session = Some(session);
        Ok(())
    }

    fn forward_audio(&mut self, pcm: Vec<u8>) -> Result<(), RelayError> {
        let session = self.session.as_mut().ok_or(RelayError::NoActiveSession)?;
        let api = session.api_mut().ok_or(RelayError::NotConnected)?;
        api.send_audio(pcm)?;
        session.mark_active();
        Ok(())
    }

    fn forward_text(&mut self, text: String) -> Result<(), RelayError> {
        let session = self.session.as_mut().ok_or(RelayError::NoActiveSession)?;
        let api = session.api_mut().ok_or(RelayError::NotConnected)?;
        api.send_text(text)?;
        session.mark_active();
        Ok(())
    }

    /// Ends the session, cancelling a connect that is still in flight.
    /// Does nothing when no session exists.
    pub fn stop(&mut self) {
        if self.pending.take().is_some() {
            tracing::info!("Cancelled in-flight upstream connect");
        }
        self.upstream = None;
        match self.session.take() {
            Some(mut session) => {
                for transition in session.close() {
                    self.emit(transition_message(transition));
                }
                tracing::info!("Session {} stopped", session.id());
            }
            None => tracing::debug!("Stop requested with no active session"),
        }
    }

    fn on_connected(&mut self, result: Result<Connection<C::Api>, ConnectError>) {
        let Some(session) = self.session.as_mut() else {
            // The session was stopped while connecting; drop the connection.
            if let Ok(mut connection) = result {
                connection.api.close();
            }
            return;
        };

        match result {
            Ok(Connection { api, events }) => {
                session.attach(api);
                self.upstream = Some(events);
                tracing::info!("Session {} ready", session.id());
                self.emit(RelayMessage::Ready);
            }
            Err(e) => {
                tracing::error!("Session {} failed to connect: {}", session.id(), e);
                self.teardown(RelayError::Connect(e));
            }
        }
    }

    fn on_upstream(&mut self, event: UpstreamEvent) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("Dropping upstream event with no session: {:?}", event);
            return;
        };

        let transitions = session.turn_mut().apply(&event, Instant::now());
        if !matches!(event, UpstreamEvent::Unknown | UpstreamEvent::SetupComplete) {
            session.mark_active();
        }
        for transition in transitions {
            self.emit(transition_message(transition));
        }

        match event {
            UpstreamEvent::ModelTurnText(text) => self.emit(RelayMessage::response(text)),
            UpstreamEvent::ModelTurnAudio { data, mime_type } => {
                self.emit(RelayMessage::Audio {
                    data: audio::encode_bytes(&data),
                    mime_type,
                });
            }
            UpstreamEvent::UpstreamError(detail) => {
                tracing::error!("Upstream reported an error: {}", detail);
                self.teardown(RelayError::Upstream(detail));
            }
            UpstreamEvent::Disconnected(reason) => {
                let reason = reason.unwrap_or_else(|| "connection closed".to_string());
                tracing::warn!("Upstream connection lost: {}", reason);
                self.teardown(RelayError::Transport(reason));
            }
            UpstreamEvent::SetupComplete => {
                tracing::debug!("Ignoring repeated setup acknowledgement");
            }
            UpstreamEvent::Unknown => {
                tracing::debug!("Ignoring unrecognized upstream event");
            }
            UpstreamEvent::TurnComplete
            | UpstreamEvent::Interrupted
            | UpstreamEvent::ActivityStart
            | UpstreamEvent::ActivityEnd => {}
        }
    }

    /// Reports `error` and discards the session; a new `start` is required.
    fn teardown(&mut self, error: RelayError) {
        self.emit(RelayMessage::error(&error));
        self.pending = None;
        self.upstream = None;
        if let Some(mut session) = self.session.take() {
            for transition in session.close() {
                self.emit(transition_message(transition));
            }
        }
    }

    fn emit(&self, message: RelayMessage) {
        if self.outbound.send(message).is_err() {
            tracing::debug!("Client receiver dropped, discarding outbound message");
        }
    }
}

fn transition_message(transition: TurnEvent) -> RelayMessage {
    match transition {
        TurnEvent::UserSpeakingChanged(speaking) => RelayMessage::UserSpeaking { speaking },
        TurnEvent::AiSpeakingChanged(speaking) => RelayMessage::AiSpeaking { speaking },
        TurnEvent::TurnCompleted => RelayMessage::TurnComplete,
        TurnEvent::Interrupted => RelayMessage::AiInterrupted,
    }
}

async fn wait_connect<A>(
    pending: &mut Option<PendingConnect<A>>,
) -> Result<Connection<A>, ConnectError> {
    match pending {
        Some(connect) => connect.await,
        None => std::future::pending().await,
    }
}

async fn recv_upstream(upstream: &mut Option<mpsc::Receiver<UpstreamEvent>>) -> Option<UpstreamEvent> {
    match upstream {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SendError;
    use crate::generic_types::SessionConfig;
    use crate::realtime_api::MockRealtimeApi;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    /// Hands out pre-built connections, or hangs forever when none is queued.
    ///
    /// A hanging connect holds a oneshot sender, so its receiver in
    /// `hanging` reports `Closed` once the connect future is dropped.
    #[derive(Default)]
    struct ScriptedConnector {
        outcomes: Mutex<Vec<Result<Connection<MockRealtimeApi>, ConnectError>>>,
        configs: Mutex<Vec<SessionConfig>>,
        hanging: Mutex<Vec<oneshot::Receiver<()>>>,
        attempts: AtomicUsize,
    }

    impl ScriptedConnector {
        fn with(outcome: Result<Connection<MockRealtimeApi>, ConnectError>) -> Self {
            let connector = Self::default();
            connector.outcomes.lock().unwrap().push(outcome);
            connector
        }

        /// Waits until a connect attempt is parked and returns its guard.
        async fn parked(&self) -> oneshot::Receiver<()> {
            tokio::time::timeout(Duration::from_secs(1), async {
                loop {
                    if let Some(guard) = self.hanging.lock().unwrap().pop() {
                        return guard;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("connect was never attempted")
        }
    }

    /// Asserts the connect future owning `guard` has been dropped.
    async fn assert_cancelled(guard: oneshot::Receiver<()>) {
        let result = tokio::time::timeout(Duration::from_secs(1), guard)
            .await
            .expect("in-flight connect was not cancelled");
        assert!(result.is_err());
    }

    #[async_trait]
    impl RealtimeConnector for ScriptedConnector {
        type Api = MockRealtimeApi;

        async fn connect(
            &self,
            config: SessionConfig,
        ) -> Result<Connection<MockRealtimeApi>, ConnectError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.configs.lock().unwrap().push(config);
            let outcome = self.outcomes.lock().unwrap().pop();
            match outcome {
                Some(outcome) => outcome,
                None => {
                    let (guard, parked) = oneshot::channel::<()>();
                    self.hanging.lock().unwrap().push(parked);
                    let _guard = guard;
                    std::future::pending().await
                }
            }
        }
    }

    struct Harness {
        connector: Arc<ScriptedConnector>,
        frames: mpsc::Sender<ClientFrame>,
        outbound: mpsc::UnboundedReceiver<RelayMessage>,
        task: JoinHandle<()>,
    }

    impl Harness {
        fn spawn(connector: ScriptedConnector) -> Self {
            let connector = Arc::new(connector);
            let (out_tx, outbound) = mpsc::unbounded_channel();
            let (frames, frames_rx) = mpsc::channel(16);
            let relay = SessionRelay::new(
                connector.clone(),
                Arc::new(SessionDefaults::default()),
                out_tx,
            );
            let task = tokio::spawn(relay.run(frames_rx));
            Self {
                connector,
                frames,
                outbound,
                task,
            }
        }

        async fn send(&self, json: &str) {
            self.frames
                .send(ClientFrame::Text(json.to_string()))
                .await
                .unwrap();
        }

        async fn next(&mut self) -> RelayMessage {
            tokio::time::timeout(Duration::from_secs(1), self.outbound.recv())
                .await
                .expect("timed out waiting for relay message")
                .expect("relay closed its outbound channel")
        }

        async fn expect_error_containing(&mut self, needle: &str) {
            match self.next().await {
                RelayMessage::Error { message } => {
                    assert!(message.contains(needle), "unexpected error: {message}")
                }
                other => panic!("expected error, got {other:?}"),
            }
        }

        /// Disconnects the client and waits for cleanup, surfacing mock panics.
        async fn finish(self) {
            drop(self.frames);
            self.task.await.unwrap();
        }
    }

    fn connection(api: MockRealtimeApi) -> (Connection<MockRealtimeApi>, mpsc::Sender<UpstreamEvent>) {
        let (tx, events) = mpsc::channel(16);
        (Connection { api, events }, tx)
    }

    fn idle_api() -> MockRealtimeApi {
        let mut api = MockRealtimeApi::new();
        api.expect_close().return_const(());
        api
    }

    #[tokio::test]
    async fn scenario_start_audio_turn_and_stop() {
        let mut api = MockRealtimeApi::new();
        api.expect_send_audio()
            .withf(|pcm| pcm == &vec![1u8, 2, 3, 4])
            .times(1)
            .returning(|_| Ok(()));
        api.expect_close().times(1).return_const(());
        let (conn, upstream) = connection(api);
        let mut h = Harness::spawn(ScriptedConnector::with(Ok(conn)));

        h.send(r#"{"type": "start", "config": {"systemPrompt": "X", "language": "sq"}}"#)
            .await;
        assert_eq!(h.next().await, RelayMessage::Ready);
        let config = h.connector.configs.lock().unwrap()[0].clone();
        assert_eq!(config.system_prompt, "X");
        assert_eq!(config.language, "sq");

        // "AQIDBA==" is [1, 2, 3, 4].
        h.send(r#"{"type": "audio", "audio": "AQIDBA=="}"#).await;

        upstream.send(UpstreamEvent::ActivityStart).await.unwrap();
        assert_eq!(h.next().await, RelayMessage::UserSpeaking { speaking: true });

        upstream
            .send(UpstreamEvent::ModelTurnAudio {
                data: vec![0, 0, 255, 127],
                mime_type: "audio/pcm;rate=24000".to_string(),
            })
            .await
            .unwrap();
        upstream.send(UpstreamEvent::TurnComplete).await.unwrap();

        assert_eq!(h.next().await, RelayMessage::AiSpeaking { speaking: true });
        assert_eq!(
            h.next().await,
            RelayMessage::Audio {
                data: "AAD/fw==".to_string(),
                mime_type: "audio/pcm;rate=24000".to_string()
            }
        );
        assert_eq!(h.next().await, RelayMessage::AiSpeaking { speaking: false });
        assert_eq!(h.next().await, RelayMessage::TurnComplete);

        // The user never stopped speaking, so stopping lowers the flag.
        h.send(r#"{"type": "stop"}"#).await;
        assert_eq!(h.next().await, RelayMessage::UserSpeaking { speaking: false });
        h.send(r#"{"type": "stop"}"#).await;
        h.send(r#"{"type": "text", "text": "still there?"}"#).await;
        h.expect_error_containing("no active session").await;

        h.finish().await;
    }

    #[tokio::test]
    async fn commands_before_start_touch_nothing_upstream() {
        let mut h = Harness::spawn(ScriptedConnector::default());

        h.send(r#"{"type": "audio", "audio": "AAAA"}"#).await;
        h.expect_error_containing("no active session").await;
        h.send(r#"{"type": "text", "text": "hello"}"#).await;
        h.expect_error_containing("no active session").await;
        h.frames.send(ClientFrame::Binary(vec![0, 0])).await.unwrap();
        h.expect_error_containing("no active session").await;

        assert_eq!(h.connector.attempts.load(Ordering::SeqCst), 0);
        h.finish().await;
    }

    #[tokio::test]
    async fn commands_while_connecting_are_rejected() {
        // No scripted outcome: connect never resolves.
        let mut h = Harness::spawn(ScriptedConnector::default());

        h.send(r#"{"type": "start"}"#).await;
        h.send(r#"{"type": "audio", "audio": "AAAA"}"#).await;
        h.expect_error_containing("not connected").await;
        h.send(r#"{"type": "start"}"#).await;
        h.expect_error_containing("already started").await;

        // Stopping cancels the hanging connect and allows a fresh start.
        let first = h.connector.parked().await;
        h.send(r#"{"type": "stop"}"#).await;
        assert_cancelled(first).await;

        h.send(r#"{"type": "start"}"#).await;
        h.send(r#"{"type": "text", "text": "hi"}"#).await;
        h.expect_error_containing("not connected").await;
        h.finish().await;
    }

    #[tokio::test]
    async fn client_disconnect_cancels_in_flight_connect() {
        let h = Harness::spawn(ScriptedConnector::default());

        h.send(r#"{"type": "start"}"#).await;
        let parked = h.connector.parked().await;

        let connector = h.connector.clone();
        drop(h.frames);
        tokio::time::timeout(Duration::from_secs(1), h.task)
            .await
            .expect("relay did not exit")
            .unwrap();
        assert_cancelled(parked).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_failure_is_reported_and_session_discarded() {
        let mut h = Harness::spawn(ScriptedConnector::with(Err(ConnectError::Rejected(
            "bad model".to_string(),
        ))));

        h.send(r#"{"type": "start"}"#).await;
        h.expect_error_containing("bad model").await;

        h.send(r#"{"type": "text", "text": "hi"}"#).await;
        h.expect_error_containing("no active session").await;
        h.finish().await;
    }

    #[tokio::test]
    async fn upstream_error_closes_session_but_not_connection() {
        let mut api = MockRealtimeApi::new();
        api.expect_close().times(1).return_const(());
        let (conn, upstream) = connection(api);
        let (second, _second_upstream) = connection(idle_api());
        let connector = ScriptedConnector::default();
        // Outcomes are popped from the back.
        connector.outcomes.lock().unwrap().push(Ok(second));
        connector.outcomes.lock().unwrap().push(Ok(conn));
        let mut h = Harness::spawn(connector);

        h.send(r#"{"type": "start"}"#).await;
        assert_eq!(h.next().await, RelayMessage::Ready);

        upstream
            .send(UpstreamEvent::ModelTurnText("Mirëdita".to_string()))
            .await
            .unwrap();
        assert_eq!(h.next().await, RelayMessage::AiSpeaking { speaking: true });
        assert!(matches!(h.next().await, RelayMessage::Response { content, .. } if content == "Mirëdita"));

        upstream
            .send(UpstreamEvent::UpstreamError("quota exceeded".to_string()))
            .await
            .unwrap();
        // Speaker transitions are flushed before the error itself.
        assert_eq!(h.next().await, RelayMessage::AiSpeaking { speaking: false });
        h.expect_error_containing("quota exceeded").await;

        h.send(r#"{"type": "audio", "audio": "AAAA"}"#).await;
        h.expect_error_containing("no active session").await;

        h.send(r#"{"type": "start"}"#).await;
        assert_eq!(h.next().await, RelayMessage::Ready);
        h.finish().await;
    }

    #[tokio::test]
    async fn upstream_disconnect_is_a_transport_error() {
        let (conn, upstream) = connection(idle_api());
        let mut h = Harness::spawn(ScriptedConnector::with(Ok(conn)));

        h.send(r#"{"type": "start"}"#).await;
        assert_eq!(h.next().await, RelayMessage::Ready);

        drop(upstream);
        h.expect_error_containing("upstream connection lost").await;

        h.send(r#"{"type": "text", "text": "hi"}"#).await;
        h.expect_error_containing("no active session").await;
        h.finish().await;
    }

    #[tokio::test]
    async fn interruption_reaches_client_before_completion() {
        let (conn, upstream) = connection(idle_api());
        let mut h = Harness::spawn(ScriptedConnector::with(Ok(conn)));
        h.send(r#"{"type": "start"}"#).await;
        assert_eq!(h.next().await, RelayMessage::Ready);

        for event in [
            UpstreamEvent::ModelTurnText("long answer".to_string()),
            UpstreamEvent::ActivityStart,
            UpstreamEvent::Interrupted,
            UpstreamEvent::ModelTurnText("trailing".to_string()),
            UpstreamEvent::TurnComplete,
        ] {
            upstream.send(event).await.unwrap();
        }

        let mut received = Vec::new();
        for _ in 0..7 {
            received.push(h.next().await);
        }
        let kinds: Vec<&str> = received
            .iter()
            .map(|m| match m {
                RelayMessage::AiSpeaking { speaking: true } => "ai-on",
                RelayMessage::AiSpeaking { speaking: false } => "ai-off",
                RelayMessage::Response { .. } => "response",
                RelayMessage::UserSpeaking { .. } => "user",
                RelayMessage::AiInterrupted => "interrupted",
                RelayMessage::TurnComplete => "complete",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["ai-on", "response", "user", "interrupted", "response", "ai-off", "complete"]
        );
        h.finish().await;
    }

    #[tokio::test]
    async fn malformed_frames_are_reported_and_connection_survives() {
        let (conn, _upstream) = connection(idle_api());
        let mut h = Harness::spawn(ScriptedConnector::with(Ok(conn)));

        h.send("{not json").await;
        h.expect_error_containing("malformed message").await;
        h.send(r#"{"type": "teleport"}"#).await;
        h.expect_error_containing("malformed message").await;

        h.send(r#"{"type": "start"}"#).await;
        assert_eq!(h.next().await, RelayMessage::Ready);
        h.send(r#"{"type": "audio", "audio": "***"}"#).await;
        h.expect_error_containing("invalid audio payload").await;
        h.finish().await;
    }

    #[tokio::test]
    async fn send_failures_are_surfaced() {
        let mut api = MockRealtimeApi::new();
        api.expect_send_audio()
            .times(1)
            .returning(|_| Err(SendError::Backpressure));
        api.expect_close().return_const(());
        let (conn, _upstream) = connection(api);
        let mut h = Harness::spawn(ScriptedConnector::with(Ok(conn)));

        h.send(r#"{"type": "start"}"#).await;
        assert_eq!(h.next().await, RelayMessage::Ready);
        h.frames.send(ClientFrame::Binary(vec![0, 0])).await.unwrap();
        h.expect_error_containing("queue is full").await;
        h.finish().await;
    }

    #[tokio::test]
    async fn client_disconnect_closes_upstream() {
        let mut api = MockRealtimeApi::new();
        api.expect_close().times(1).return_const(());
        let (conn, _upstream) = connection(api);
        let mut h = Harness::spawn(ScriptedConnector::with(Ok(conn)));

        h.send(r#"{"type": "start"}"#).await;
        assert_eq!(h.next().await, RelayMessage::Ready);

        // `finish` drops the client side; the mock verifies close() ran once.
        h.finish().await;
    }
}
