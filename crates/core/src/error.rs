use std::time::Duration;

/// Failure to bring an upstream session to the ready state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to reach upstream: {0}")]
    Transport(String),
    #[error("upstream rejected session setup: {0}")]
    Rejected(String),
    #[error("upstream did not acknowledge setup within {0:?}")]
    Timeout(Duration),
}

/// Failure to hand a message to an upstream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("upstream session is not connected")]
    NotConnected,
    #[error("upstream send queue is full")]
    Backpressure,
}

/// Everything that can go wrong while relaying one client connection.
///
/// The display text is what the client receives in an `error` message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RelayError {
    #[error("a session is already started on this connection")]
    AlreadyStarted,
    #[error("no active session, send a start command first")]
    NoActiveSession,
    #[error("session is not connected yet")]
    NotConnected,
    #[error("upstream send queue is full, audio was not forwarded")]
    Backpressure,
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("invalid audio payload: {0}")]
    InvalidAudio(String),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("upstream connection lost: {0}")]
    Transport(String),
}

impl From<SendError> for RelayError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::NotConnected => Self::NotConnected,
            SendError::Backpressure => Self::Backpressure,
        }
    }
}
