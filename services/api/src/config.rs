use gemini_live::ActivityDetection;
use gemini_live::consts;
use gemini_live::types::{EndSensitivity, StartSensitivity};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini: gemini_live::Config,
    /// `None` allows any origin.
    pub cors_origin: Option<String>,
    pub prompts_dir: PathBuf,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory
    /// and load the following variables:
    ///
    /// *   `BIND_ADDRESS`: The address and port to bind the server to. Defaults to "0.0.0.0:3001".
    /// *   `GEMINI_API_KEY`: Your secret key for the Gemini API. Required.
    /// *   `GEMINI_MODEL`: (Optional) The Live model to open sessions with.
    /// *   `GEMINI_BASE_URL`: (Optional) Overrides the Live WebSocket endpoint.
    /// *   `GEMINI_VOICE`: (Optional) The prebuilt voice. Defaults to "Kore".
    /// *   `VAD_START_SENSITIVITY` / `VAD_END_SENSITIVITY`: (Optional) "high" or "low".
    /// *   `VAD_SILENCE_MS`, `VAD_PREFIX_PADDING_MS`: (Optional) Activity detection timing.
    /// *   `SETUP_TIMEOUT_SECS`: (Optional) How long to wait for the setup acknowledgement.
    /// *   `CORS_ORIGIN`: (Optional) Allowed browser origin. Defaults to "*".
    /// *   `PROMPTS_DIR`: (Optional) Directory of `<language>.md` prompts. Defaults to "prompts".
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_address: SocketAddr =
            parse_or(&var, "BIND_ADDRESS", "0.0.0.0:3001".parse().ok())?;

        let api_key = var(consts::GEMINI_API_KEY)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar(consts::GEMINI_API_KEY.to_string()))?;

        let defaults = ActivityDetection::default();
        let activity_detection = ActivityDetection {
            start_sensitivity: match var("VAD_START_SENSITIVITY") {
                Some(value) => match parse_level("VAD_START_SENSITIVITY", &value)? {
                    true => StartSensitivity::High,
                    false => StartSensitivity::Low,
                },
                None => defaults.start_sensitivity,
            },
            end_sensitivity: match var("VAD_END_SENSITIVITY") {
                Some(value) => match parse_level("VAD_END_SENSITIVITY", &value)? {
                    true => EndSensitivity::High,
                    false => EndSensitivity::Low,
                },
                None => defaults.end_sensitivity,
            },
            silence_duration_ms: parse_or(&var, "VAD_SILENCE_MS", Some(defaults.silence_duration_ms))?,
            prefix_padding_ms: parse_or(
                &var,
                "VAD_PREFIX_PADDING_MS",
                Some(defaults.prefix_padding_ms),
            )?,
        };

        let setup_timeout = parse_or(
            &var,
            "SETUP_TIMEOUT_SECS",
            Some(consts::DEFAULT_SETUP_TIMEOUT_SECS),
        )?;

        let mut gemini = gemini_live::Config::builder()
            .with_api_key(&api_key)
            .with_model(&var("GEMINI_MODEL").unwrap_or_else(|| consts::DEFAULT_MODEL.to_string()))
            .with_voice(&var("GEMINI_VOICE").unwrap_or_else(|| consts::DEFAULT_VOICE.to_string()))
            .with_activity_detection(activity_detection)
            .with_setup_timeout(Duration::from_secs(setup_timeout));
        if let Some(base_url) = var("GEMINI_BASE_URL") {
            gemini = gemini.with_base_url(&base_url);
        }

        let cors_origin = var("CORS_ORIGIN").filter(|o| o.trim() != "*" && !o.trim().is_empty());
        let prompts_dir = PathBuf::from(var("PROMPTS_DIR").unwrap_or_else(|| "prompts".to_string()));

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            gemini: gemini.build(),
            cors_origin,
            prompts_dir,
            log_level,
        })
    }
}

fn parse_or<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Option<T>,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => default.ok_or_else(|| ConfigError::MissingVar(name.to_string())),
    }
}

/// `true` for "high", `false` for "low".
fn parse_level(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "high" => Ok(true),
        "low" => Ok(false),
        other => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not one of high, low", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_key_is_set() {
        let config = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "secret")])).unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:3001".parse::<SocketAddr>().unwrap());
        assert_eq!(config.gemini.model(), consts::DEFAULT_MODEL);
        assert_eq!(config.gemini.voice(), "Kore");
        assert_eq!(config.gemini.activity_detection(), &ActivityDetection::default());
        assert_eq!(config.gemini.setup_timeout(), Duration::from_secs(10));
        assert_eq!(config.cors_origin, None);
        assert_eq!(config.prompts_dir, PathBuf::from("prompts"));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let result = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")]));
        assert!(matches!(result, Err(ConfigError::MissingVar(name)) if name == "GEMINI_API_KEY"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "secret"),
            ("BIND_ADDRESS", "127.0.0.1:9000"),
            ("GEMINI_VOICE", "Puck"),
            ("VAD_START_SENSITIVITY", "LOW"),
            ("VAD_END_SENSITIVITY", "high"),
            ("VAD_SILENCE_MS", "800"),
            ("SETUP_TIMEOUT_SECS", "3"),
            ("CORS_ORIGIN", "https://app.example"),
            ("RUST_LOG", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address.port(), 9000);
        assert_eq!(config.gemini.voice(), "Puck");
        let vad = config.gemini.activity_detection();
        assert_eq!(vad.start_sensitivity, StartSensitivity::Low);
        assert_eq!(vad.end_sensitivity, EndSensitivity::High);
        assert_eq!(vad.silence_duration_ms, 800);
        assert_eq!(vad.prefix_padding_ms, 200);
        assert_eq!(config.gemini.setup_timeout(), Duration::from_secs(3));
        assert_eq!(config.cors_origin.as_deref(), Some("https://app.example"));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        for (name, value) in [
            ("BIND_ADDRESS", "nowhere"),
            ("VAD_END_SENSITIVITY", "medium"),
            ("VAD_SILENCE_MS", "-5"),
            ("RUST_LOG", "chatty"),
        ] {
            let result = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "secret"), (name, value)]));
            assert!(
                matches!(&result, Err(ConfigError::InvalidValue(var, _)) if var == name),
                "{name}={value} should be rejected"
            );
        }
    }
}
