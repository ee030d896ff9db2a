use async_trait::async_trait;
use gemini_live::types::ServerError;
use gemini_live::{ClientMessage, GeminiClient, GeminiReader, GeminiWriter, ServerFrame, ServerMessage, Setup};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use voice_relay_audio::audio::{self, INPUT_MIME_TYPE, OUTPUT_MIME_TYPE};
use voice_relay_core::{
    ConnectError, Connection, RealtimeApi, RealtimeConnector, SendError, SessionConfig,
    UpstreamEvent,
};

/// Outgoing messages buffered per session before sends report backpressure.
const WRITE_QUEUE_CAPACITY: usize = 256;
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Opens Gemini Live sessions on behalf of the relay.
pub struct GeminiConnector {
    config: gemini_live::Config,
}

impl GeminiConnector {
    pub fn new(config: gemini_live::Config) -> Self {
        Self { config }
    }

    /// Builds the one setup message sent when a session opens.
    pub fn setup_for(&self, session: &SessionConfig) -> Setup {
        let voice = session.voice.as_deref().unwrap_or(self.config.voice());
        Setup::new(self.config.model())
            .with_system_prompt(&session.system_prompt)
            .with_voice(voice)
            .with_activity_detection(self.config.activity_detection().to_wire())
    }
}

#[async_trait]
impl RealtimeConnector for GeminiConnector {
    type Api = GeminiSession;

    async fn connect(&self, session: SessionConfig) -> Result<Connection<GeminiSession>, ConnectError> {
        let mut client = gemini_live::connect(&self.config, session.token.as_deref())
            .await
            .map_err(|e| ConnectError::Transport(format!("{:#}", e)))?;

        client
            .send(&ClientMessage::Setup(self.setup_for(&session)))
            .await
            .map_err(|e| ConnectError::Transport(format!("{:#}", e)))?;
        tracing::debug!("Sent setup for model {}", self.config.model());

        let timeout = self.config.setup_timeout();
        tokio::time::timeout(timeout, await_setup_complete(&mut client))
            .await
            .map_err(|_| ConnectError::Timeout(timeout))??;
        tracing::info!("Gemini acknowledged session setup");

        let (writer, reader) = client.split();
        Ok(GeminiSession::spawn(writer, reader))
    }
}

async fn await_setup_complete(client: &mut GeminiClient) -> Result<(), ConnectError> {
    loop {
        match client.next_frame().await {
            Ok(ServerFrame::Message(message)) => {
                if let Some(error) = message.error {
                    return Err(ConnectError::Rejected(describe_error(&error)));
                }
                if message.setup_complete.is_some() {
                    return Ok(());
                }
                tracing::debug!("Ignoring message received before setup completed");
            }
            Ok(ServerFrame::Unrecognized(text)) => {
                tracing::warn!("Unrecognized message before setup completed: {}", text);
            }
            Ok(ServerFrame::Closed(reason)) => {
                return Err(ConnectError::Rejected(reason.unwrap_or_else(|| {
                    "connection closed before setup was acknowledged".to_string()
                })));
            }
            Err(e) => return Err(ConnectError::Transport(format!("{:#}", e))),
        }
    }
}

/// A live Gemini session. Sends enqueue onto a writer task; a reader task
/// translates server messages into [`UpstreamEvent`]s.
pub struct GeminiSession {
    outgoing: Option<mpsc::Sender<ClientMessage>>,
    reader: Option<JoinHandle<()>>,
}

impl GeminiSession {
    fn spawn(mut writer: GeminiWriter, mut frames: GeminiReader) -> Connection<GeminiSession> {
        let (outgoing, mut outgoing_rx) = mpsc::channel::<ClientMessage>(WRITE_QUEUE_CAPACITY);
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = writer.send(&message).await {
                    tracing::error!("Failed to write to Gemini: {:#}", e);
                    break;
                }
            }
            writer.close().await;
            tracing::debug!("Gemini writer task finished");
        });

        let reader = tokio::spawn(async move {
            loop {
                let (batch, done) = match frames.next_frame().await {
                    Ok(ServerFrame::Message(message)) => (translate(message), false),
                    Ok(ServerFrame::Unrecognized(_)) => (vec![UpstreamEvent::Unknown], false),
                    Ok(ServerFrame::Closed(reason)) => (vec![UpstreamEvent::Disconnected(reason)], true),
                    Err(e) => (vec![UpstreamEvent::Disconnected(Some(e.to_string()))], true),
                };
                for event in batch {
                    if events_tx.send(event).await.is_err() {
                        tracing::debug!("Relay dropped the event stream, stopping reader");
                        return;
                    }
                }
                if done {
                    return;
                }
            }
        });

        Connection {
            api: GeminiSession {
                outgoing: Some(outgoing),
                reader: Some(reader),
            },
            events,
        }
    }

    fn enqueue(&mut self, message: ClientMessage) -> Result<(), SendError> {
        let outgoing = self.outgoing.as_ref().ok_or(SendError::NotConnected)?;
        outgoing.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Backpressure,
            TrySendError::Closed(_) => SendError::NotConnected,
        })
    }
}

impl RealtimeApi for GeminiSession {
    fn send_audio(&mut self, pcm: Vec<u8>) -> Result<(), SendError> {
        self.enqueue(ClientMessage::audio_chunk(&pcm, INPUT_MIME_TYPE))
    }

    fn send_text(&mut self, text: String) -> Result<(), SendError> {
        self.enqueue(ClientMessage::user_text(&text))
    }

    fn close(&mut self) {
        // Dropping the sender lets the writer flush and send a close frame.
        if self.outgoing.take().is_some() {
            tracing::info!("Closing Gemini session");
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for GeminiSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Splits one server message into relay events, in the order the relay
/// must observe them.
pub fn translate(message: ServerMessage) -> Vec<UpstreamEvent> {
    if let Some(error) = message.error {
        return vec![UpstreamEvent::UpstreamError(describe_error(&error))];
    }

    let mut events = Vec::new();
    if message.setup_complete.is_some() {
        events.push(UpstreamEvent::SetupComplete);
    }

    if let Some(content) = message.server_content {
        for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                events.push(UpstreamEvent::ModelTurnText(text));
            }
            if let Some(blob) = part.inline_data {
                let mime_type = if blob.mime_type.is_empty() {
                    OUTPUT_MIME_TYPE.to_string()
                } else {
                    blob.mime_type
                };
                if !mime_type.starts_with("audio/") {
                    tracing::debug!("Skipping non-audio inline data ({})", mime_type);
                    continue;
                }
                match audio::decode_bytes(&blob.data) {
                    Ok(data) => events.push(UpstreamEvent::ModelTurnAudio { data, mime_type }),
                    Err(e) => tracing::warn!("Dropping undecodable inline audio: {:#}", e),
                }
            }
        }
        if content.interrupted {
            events.push(UpstreamEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(UpstreamEvent::TurnComplete);
        }
    }

    if message.activity_start.is_some() {
        events.push(UpstreamEvent::ActivityStart);
    }
    if message.activity_end.is_some() {
        events.push(UpstreamEvent::ActivityEnd);
    }

    if let Some(go_away) = &message.go_away {
        tracing::debug!("Gemini will close the session soon: {:?}", go_away.time_left);
    }
    if message.tool_call.is_some() || message.tool_call_cancellation.is_some() {
        tracing::debug!("Ignoring tool call message");
    }
    if message.usage_metadata.is_some() {
        tracing::debug!("Usage metadata: {:?}", message.usage_metadata);
    }

    if events.is_empty() {
        events.push(UpstreamEvent::Unknown);
    }
    events
}

fn describe_error(error: &ServerError) -> String {
    match (&error.status, error.code) {
        (Some(status), _) => format!("{} ({})", error.message, status),
        (None, Some(code)) => format!("{} (code {})", error.message, code),
        (None, None) => error.message.clone(),
    }
}
