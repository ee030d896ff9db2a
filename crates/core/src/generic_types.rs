/// Fully resolved configuration for one upstream session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionConfig {
    pub system_prompt: String,
    pub language: String,
    /// Preferred upstream voice; the adapter's default is used when absent.
    pub voice: Option<String>,
    /// Opaque credential supplied by the client, passed through untouched.
    pub token: Option<String>,
}

/// Events any upstream provider emits back to the relay, in transport order.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    SetupComplete,
    ModelTurnText(String),
    ModelTurnAudio { data: Vec<u8>, mime_type: String },
    TurnComplete,
    Interrupted,
    ActivityStart,
    ActivityEnd,
    UpstreamError(String),
    /// The transport ended, with the close reason if one was given.
    Disconnected(Option<String>),
    /// Anything the relay does not understand. Logged and ignored.
    Unknown,
}

impl UpstreamEvent {
    /// True for events carrying model output.
    pub fn is_model_content(&self) -> bool {
        matches!(self, Self::ModelTurnText(_) | Self::ModelTurnAudio { .. })
    }
}
