use crate::generic_types::SessionConfig;
use crate::protocol::StartConfig;
use crate::realtime_api::RealtimeApi;
use crate::turn_state::{TurnEvent, TurnStateMachine};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Connecting,
    Ready,
    Active,
    Closing,
    Closed,
}

/// Server-side fallbacks used to resolve a client's `start` request.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub system_prompt: String,
    pub language: String,
    pub voice: Option<String>,
    /// System prompts keyed by language code.
    pub prompts: HashMap<String, String>,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful Albanian AI assistant. Speak naturally and conversationally."
                .to_string(),
            language: "sq".to_string(),
            voice: None,
            prompts: HashMap::new(),
        }
    }
}

impl SessionDefaults {
    /// Resolves the effective configuration for a session.
    ///
    /// An explicit system prompt wins, then the prompt registered for the
    /// requested language, then the default prompt.
    pub fn resolve(&self, requested: StartConfig) -> SessionConfig {
        let language = requested
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| self.language.clone());
        let system_prompt = requested
            .system_prompt
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.prompts.get(&language).cloned())
            .unwrap_or_else(|| self.system_prompt.clone());

        SessionConfig {
            system_prompt,
            language,
            voice: requested.voice_hint.or_else(|| self.voice.clone()),
            token: requested.token,
        }
    }
}

/// One client-to-upstream conversation.
///
/// Owns at most one upstream connection, attached once setup is acknowledged.
pub struct Session<A: RealtimeApi> {
    id: Uuid,
    lifecycle: Lifecycle,
    config: SessionConfig,
    api: Option<A>,
    turn: TurnStateMachine,
}

impl<A: RealtimeApi> Session<A> {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            lifecycle: Lifecycle::Idle,
            config,
            api: None,
            turn: TurnStateMachine::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn turn(&self) -> &TurnStateMachine {
        &self.turn
    }

    pub fn turn_mut(&mut self) -> &mut TurnStateMachine {
        &mut self.turn
    }

    pub fn begin_connecting(&mut self) {
        self.lifecycle = Lifecycle::Connecting;
    }

    /// Attaches the acknowledged upstream connection.
    pub fn attach(&mut self, api: A) {
        if let Some(mut previous) = self.api.replace(api) {
            tracing::warn!("Session {} replaced an existing upstream connection", self.id);
            previous.close();
        }
        self.lifecycle = Lifecycle::Ready;
    }

    /// The upstream connection, if the session has one and is still open.
    pub fn api_mut(&mut self) -> Option<&mut A> {
        match self.lifecycle {
            Lifecycle::Ready | Lifecycle::Active => self.api.as_mut(),
            _ => None,
        }
    }

    /// Records that traffic has flowed in either direction.
    pub fn mark_active(&mut self) {
        if self.lifecycle == Lifecycle::Ready {
            self.lifecycle = Lifecycle::Active;
        }
    }

    /// Releases the upstream connection and finalizes turn state. Idempotent.
    pub fn close(&mut self) -> Vec<TurnEvent> {
        if self.lifecycle == Lifecycle::Closed {
            return Vec::new();
        }
        self.lifecycle = Lifecycle::Closing;
        if let Some(mut api) = self.api.take() {
            api.close();
        }
        self.lifecycle = Lifecycle::Closed;
        self.turn.close(Instant::now())
    }
}

impl<A: RealtimeApi> Drop for Session<A> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime_api::MockRealtimeApi;

    #[test]
    fn resolve_prefers_explicit_prompt_then_language_prompt() {
        let mut defaults = SessionDefaults::default();
        defaults
            .prompts
            .insert("en".to_string(), "Speak English.".to_string());

        let explicit = defaults.resolve(StartConfig {
            system_prompt: Some("X".to_string()),
            language: Some("en".to_string()),
            ..Default::default()
        });
        assert_eq!(explicit.system_prompt, "X");
        assert_eq!(explicit.language, "en");

        let by_language = defaults.resolve(StartConfig {
            language: Some("en".to_string()),
            ..Default::default()
        });
        assert_eq!(by_language.system_prompt, "Speak English.");

        let fallback = defaults.resolve(StartConfig {
            system_prompt: Some("   ".to_string()),
            ..Default::default()
        });
        assert_eq!(fallback.language, "sq");
        assert_eq!(fallback.system_prompt, defaults.system_prompt);
    }

    #[test]
    fn resolve_passes_voice_and_token_through() {
        let defaults = SessionDefaults {
            voice: Some("Kore".to_string()),
            ..Default::default()
        };

        let config = defaults.resolve(StartConfig {
            token: Some("opaque".to_string()),
            ..Default::default()
        });
        assert_eq!(config.voice.as_deref(), Some("Kore"));
        assert_eq!(config.token.as_deref(), Some("opaque"));

        let config = defaults.resolve(StartConfig {
            voice_hint: Some("Puck".to_string()),
            ..Default::default()
        });
        assert_eq!(config.voice.as_deref(), Some("Puck"));
    }

    #[test]
    fn api_is_unavailable_until_attached() {
        let mut session: Session<MockRealtimeApi> = Session::new(SessionConfig::default());
        session.begin_connecting();
        assert!(session.api_mut().is_none());

        let mut api = MockRealtimeApi::new();
        api.expect_close().times(1).return_const(());
        session.attach(api);
        assert_eq!(session.lifecycle(), Lifecycle::Ready);
        assert!(session.api_mut().is_some());

        session.mark_active();
        assert_eq!(session.lifecycle(), Lifecycle::Active);
    }

    #[test]
    fn close_is_idempotent_and_closes_upstream_once() {
        let mut session: Session<MockRealtimeApi> = Session::new(SessionConfig::default());
        let mut api = MockRealtimeApi::new();
        api.expect_close().times(1).return_const(());
        session.attach(api);

        session.close();
        session.close();
        assert_eq!(session.lifecycle(), Lifecycle::Closed);
        assert!(session.api_mut().is_none());
        assert!(session.turn().is_closed());
    }
}
