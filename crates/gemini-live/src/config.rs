use crate::consts;
use crate::types::{AutomaticActivityDetection, EndSensitivity, StartSensitivity};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

/// Voice activity detection parameters sent with every session setup.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityDetection {
    pub start_sensitivity: StartSensitivity,
    pub end_sensitivity: EndSensitivity,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for ActivityDetection {
    fn default() -> Self {
        Self {
            start_sensitivity: StartSensitivity::High,
            end_sensitivity: EndSensitivity::Low,
            prefix_padding_ms: consts::DEFAULT_PREFIX_PADDING_MS,
            silence_duration_ms: consts::DEFAULT_SILENCE_DURATION_MS,
        }
    }
}

impl ActivityDetection {
    pub fn to_wire(&self) -> AutomaticActivityDetection {
        AutomaticActivityDetection {
            disabled: false,
            start_of_speech_sensitivity: Some(self.start_sensitivity),
            end_of_speech_sensitivity: Some(self.end_sensitivity),
            prefix_padding_ms: Some(self.prefix_padding_ms),
            silence_duration_ms: Some(self.silence_duration_ms),
        }
    }
}

pub struct Config {
    base_url: String,
    api_key: SecretString,
    model: String,
    voice: String,
    activity_detection: ActivityDetection,
    setup_timeout: Duration,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.config.api_key = SecretString::from(api_key.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_voice(mut self, voice: &str) -> Self {
        self.config.voice = voice.to_string();
        self
    }

    pub fn with_activity_detection(mut self, activity_detection: ActivityDetection) -> Self {
        self.config.activity_detection = activity_detection;
        self
    }

    pub fn with_setup_timeout(mut self, setup_timeout: Duration) -> Self {
        self.config.setup_timeout = setup_timeout;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    // Sets the default values.
    pub fn new() -> Self {
        Self {
            base_url: consts::BASE_URL.to_string(),
            api_key: std::env::var(consts::GEMINI_API_KEY)
                .unwrap_or_default()
                .into(),
            model: consts::DEFAULT_MODEL.to_string(),
            voice: consts::DEFAULT_VOICE.to_string(),
            activity_detection: ActivityDetection::default(),
            setup_timeout: Duration::from_secs(consts::DEFAULT_SETUP_TIMEOUT_SECS),
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn activity_detection(&self) -> &ActivityDetection {
        &self.activity_detection
    }

    pub fn setup_timeout(&self) -> Duration {
        self.setup_timeout
    }

    /// Builds the WebSocket endpoint.
    ///
    /// An ephemeral token, when given, takes the constrained endpoint and is
    /// passed as `access_token`; otherwise the configured API key is used.
    pub fn endpoint(&self, token: Option<&str>) -> Result<Url> {
        let (path, param, credential) = match token {
            Some(token) => (consts::BIDI_CONSTRAINED_PATH, "access_token", token),
            None => (consts::BIDI_PATH, "key", self.api_key.expose_secret()),
        };
        let base = format!("{}/{}", self.base_url, path);
        Url::parse_with_params(&base, &[(param, credential)])
            .with_context(|| format!("Invalid Gemini endpoint: {}", base))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
