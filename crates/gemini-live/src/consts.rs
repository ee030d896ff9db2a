pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";

pub const BASE_URL: &str = "wss://generativelanguage.googleapis.com/ws";
pub const BIDI_PATH: &str = "google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";
pub const BIDI_CONSTRAINED_PATH: &str =
    "google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContentConstrained";

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_VOICE: &str = "Kore";
pub const DEFAULT_SETUP_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_SILENCE_DURATION_MS: u32 = 1500;
pub const DEFAULT_PREFIX_PADDING_MS: u32 = 200;
