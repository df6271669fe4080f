//! Conversation State Machine
//!
//! Gates the conversation behind wake and termination keywords found in
//! transcribed user speech. The machine decides whether each transcript is
//! persisted and which spoken acknowledgement, if any, the runtime should
//! request.

use crate::{Command, state::SessionState};
use serde::Serialize;
use tracing::{debug, info};

/// Spoken acknowledgement when a wake word activates the conversation.
pub const GREETING: &str = "yes. master?";
/// Spoken acknowledgement when a termination word ends the conversation.
pub const FAREWELL: &str = "Goodbye.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConversationState {
    #[default]
    Idle,
    Active,
}

/// A set of keywords matched case-insensitively anywhere in a transcript.
#[derive(Debug, Clone, Default)]
pub struct Keywords {
    words: Vec<String>,
}

impl Keywords {
    /// Normalizes the given words, dropping blanks.
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self { words }
    }

    /// Returns the first keyword contained in `text`.
    pub fn find(&self, text: &str) -> Option<&str> {
        let normalized = text.to_lowercase();
        self.words
            .iter()
            .find(|w| normalized.contains(w.as_str()))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }
}

/// The outcome of feeding one transcript to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: ConversationState,
    pub to: ConversationState,
    /// Whether the transcript that produced this transition is persisted.
    pub persist: bool,
    pub command: Option<Command>,
}

pub struct ConversationMachine {
    state: SessionState,
    wake_words: Keywords,
    termination_words: Keywords,
}

impl ConversationMachine {
    pub fn new(state: SessionState, wake_words: Keywords, termination_words: Keywords) -> Self {
        Self {
            state,
            wake_words,
            termination_words,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state.conversation()
    }

    /// Evaluates a completed user transcript.
    ///
    /// At most one transition happens per transcript. The wake rule is checked
    /// before the termination rule, so an idle transcript holding both kinds of
    /// keyword activates the conversation and an active one ends it.
    pub fn observe(&self, transcript: &str) -> Transition {
        let wake = self.wake_words.find(transcript);
        let termination = self.termination_words.find(transcript);

        let (from, to) = self.state.transition_conversation(|current| match current {
            ConversationState::Idle if wake.is_some() => ConversationState::Active,
            ConversationState::Active if termination.is_some() => ConversationState::Idle,
            unchanged => unchanged,
        });

        let command = match (from, to) {
            (ConversationState::Idle, ConversationState::Active) => {
                info!(wake_word = wake, transcript, "wake word detected, conversation active");
                Some(Command::Speak(GREETING.to_string()))
            }
            (ConversationState::Active, ConversationState::Idle) => {
                info!(
                    termination_word = termination,
                    transcript, "termination word detected, conversation idle"
                );
                Some(Command::Speak(FAREWELL.to_string()))
            }
            _ => {
                debug!(state = ?to, transcript, "no conversation transition");
                None
            }
        };

        Transition {
            from,
            to,
            persist: from == ConversationState::Active || to == ConversationState::Active,
            command,
        }
    }
}
