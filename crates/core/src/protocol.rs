//! The JSON protocol spoken between the browser client and the relay.
//!
//! Every message is an object with a `type` discriminator. Audio travels as
//! base64 encoded mono PCM16 in both directions.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};

/// A raw WebSocket frame from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// A JSON command.
    Text(String),
    /// Raw PCM16 audio, equivalent to an `audio` command.
    Binary(Vec<u8>),
}

/// Commands accepted from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientCommand {
    Start {
        #[serde(default)]
        config: StartConfig,
    },
    Audio {
        audio: String,
    },
    Text {
        text: String,
    },
    Stop,
}

/// Session options a client may request. Anything omitted falls back to the
/// server's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Messages the relay sends to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelayMessage {
    Ready,
    Response {
        content: String,
        /// Milliseconds since the Unix epoch.
        timestamp: i64,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    TurnComplete,
    UserSpeaking {
        speaking: bool,
    },
    AiSpeaking {
        speaking: bool,
    },
    AiInterrupted,
    Error {
        message: String,
    },
}

impl RelayMessage {
    pub fn response(content: String) -> Self {
        Self::Response {
            content,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn error(e: &RelayError) -> Self {
        Self::Error {
            message: e.to_string(),
        }
    }
}
