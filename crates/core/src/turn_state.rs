//! Turn-taking projection over upstream events.
//!
//! The machine is a pure fold: it owns no timers, performs no I/O, and its
//! state after a sequence of events depends only on that sequence (and the
//! instants the caller stamps them with).

use crate::generic_types::UpstreamEvent;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    UserSpeaking,
    AiSpeaking,
    /// Transient overlap, typically just before an interruption.
    BothSpeaking,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnState {
    pub user_speaking: bool,
    pub ai_speaking: bool,
    pub last_transition: Option<Instant>,
}

/// Notifications produced by a transition, in the order they must reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    UserSpeakingChanged(bool),
    AiSpeakingChanged(bool),
    TurnCompleted,
    Interrupted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnStateMachine {
    state: TurnState,
    // Model output has been seen since the last turn completion.
    ai_turn_open: bool,
    // The current model turn was interrupted; its remaining output must not
    // raise `ai_speaking` again.
    interrupted: bool,
    closed: bool,
}

impl TurnStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn phase(&self) -> TurnPhase {
        match (self.closed, self.state.user_speaking, self.state.ai_speaking) {
            (true, _, _) => TurnPhase::Closed,
            (false, true, true) => TurnPhase::BothSpeaking,
            (false, true, false) => TurnPhase::UserSpeaking,
            (false, false, true) => TurnPhase::AiSpeaking,
            (false, false, false) => TurnPhase::Idle,
        }
    }

    /// Applies one upstream event and returns the notifications it produced.
    pub fn apply(&mut self, event: &UpstreamEvent, at: Instant) -> Vec<TurnEvent> {
        if self.closed {
            return Vec::new();
        }

        let mut emitted = Vec::new();
        match event {
            UpstreamEvent::ActivityStart => {
                self.state.user_speaking = true;
                emitted.push(TurnEvent::UserSpeakingChanged(true));
            }
            UpstreamEvent::ActivityEnd => {
                self.state.user_speaking = false;
                emitted.push(TurnEvent::UserSpeakingChanged(false));
                if self.interrupted {
                    // Whatever the model says next answers this new user turn.
                    self.interrupted = false;
                    self.ai_turn_open = false;
                }
            }
            event if event.is_model_content() => {
                if !self.ai_turn_open && !self.interrupted {
                    self.state.ai_speaking = true;
                    emitted.push(TurnEvent::AiSpeakingChanged(true));
                }
                self.ai_turn_open = true;
            }
            UpstreamEvent::TurnComplete => {
                self.state.ai_speaking = false;
                self.ai_turn_open = false;
                self.interrupted = false;
                emitted.push(TurnEvent::AiSpeakingChanged(false));
                emitted.push(TurnEvent::TurnCompleted);
            }
            UpstreamEvent::Interrupted => {
                self.state.ai_speaking = false;
                self.interrupted = true;
                emitted.push(TurnEvent::Interrupted);
            }
            UpstreamEvent::UpstreamError(_) | UpstreamEvent::Disconnected(_) => {
                emitted = self.close_inner();
            }
            _ => {}
        }

        if !emitted.is_empty() {
            self.state.last_transition = Some(at);
        }
        emitted
    }

    /// Moves to the terminal state, reporting any speaker that was still active.
    pub fn close(&mut self, at: Instant) -> Vec<TurnEvent> {
        if self.closed {
            return Vec::new();
        }
        let emitted = self.close_inner();
        self.state.last_transition = Some(at);
        emitted
    }

    fn close_inner(&mut self) -> Vec<TurnEvent> {
        let mut emitted = Vec::new();
        if self.state.user_speaking {
            self.state.user_speaking = false;
            emitted.push(TurnEvent::UserSpeakingChanged(false));
        }
        if self.state.ai_speaking {
            self.state.ai_speaking = false;
            emitted.push(TurnEvent::AiSpeakingChanged(false));
        }
        self.closed = true;
        emitted
    }
}
