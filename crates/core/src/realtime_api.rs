use crate::error::{ConnectError, SendError};
use crate::generic_types::{SessionConfig, UpstreamEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A live, bidirectional session with an AI provider.
///
/// Sends are fire-and-forget: they enqueue and return without waiting for the
/// upstream to acknowledge anything.
#[cfg_attr(test, mockall::automock)]
pub trait RealtimeApi: Send {
    /// Appends a chunk of raw 16-bit PCM audio to the upstream input stream.
    fn send_audio(&mut self, pcm: Vec<u8>) -> Result<(), SendError>;

    /// Sends a complete user turn consisting of `text`.
    fn send_text(&mut self, text: String) -> Result<(), SendError>;

    /// Tears down the transport. Calling it again does nothing.
    fn close(&mut self);
}

/// A session that has acknowledged setup, plus its event stream.
pub struct Connection<A> {
    pub api: A,
    pub events: mpsc::Receiver<UpstreamEvent>,
}

/// Opens upstream sessions. One connector is shared by every client connection.
#[async_trait]
pub trait RealtimeConnector: Send + Sync + 'static {
    type Api: RealtimeApi + 'static;

    /// Connects, sends the setup message and resolves once the provider has
    /// acknowledged it. Dropping the returned future abandons the attempt.
    async fn connect(&self, config: SessionConfig) -> Result<Connection<Self::Api>, ConnectError>;
}
