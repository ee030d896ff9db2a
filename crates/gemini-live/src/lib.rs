mod client;
mod config;
pub mod consts;
pub mod types;

pub use client::{GeminiClient, GeminiReader, GeminiWriter, ServerFrame, connect};
pub use config::{ActivityDetection, Config, ConfigBuilder};
pub use types::{ClientMessage, ServerMessage, Setup};
