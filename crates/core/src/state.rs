//! Shared Session State
//!
//! The connection loop, the capture consumer and the playback task all read
//! and write the same handful of fields. They live together behind one mutex
//! so every context observes a consistent view.

use crate::conversation::ConversationState;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Lifecycle of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Disconnected,
    Connecting,
    Active,
    /// Terminal: reconnect attempts ran out.
    Exhausted,
}

/// A point-in-time copy of every shared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub lifecycle: Lifecycle,
    pub conversation: ConversationState,
    pub speaking: bool,
    /// When the speaking flag last went from set to clear.
    pub speech_ended_at: Option<Instant>,
    pub reconnect_attempts: u32,
}

impl Snapshot {
    /// Whether audio captured at `captured_at` overlaps agent speech.
    pub fn overlaps_speech(&self, captured_at: Instant) -> bool {
        self.speaking || self.speech_ended_at.is_some_and(|ended| captured_at <= ended)
    }
}

/// Cloneable handle to the state of one session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    inner: Arc<Mutex<Snapshot>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        // Every critical section leaves the fields consistent, so a panic
        // elsewhere doesn't invalidate them.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.lock()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    /// Moves to `lifecycle` unless the session is already exhausted.
    pub fn set_lifecycle(&self, lifecycle: Lifecycle) {
        let mut inner = self.lock();
        if inner.lifecycle != Lifecycle::Exhausted {
            inner.lifecycle = lifecycle;
        }
    }

    /// Records a confirmed successful connection.
    pub fn mark_connected(&self) {
        let mut inner = self.lock();
        if inner.lifecycle != Lifecycle::Exhausted {
            inner.lifecycle = Lifecycle::Active;
            inner.reconnect_attempts = 0;
        }
    }

    /// Claims the next reconnect attempt.
    ///
    /// Returns the attempt number when one is still available, or `None` after
    /// switching to [`Lifecycle::Exhausted`].
    pub fn begin_reconnect(&self, max_attempts: u32) -> Option<u32> {
        let mut inner = self.lock();
        if inner.lifecycle == Lifecycle::Exhausted {
            return None;
        }
        if inner.reconnect_attempts < max_attempts {
            inner.reconnect_attempts += 1;
            inner.lifecycle = Lifecycle::Disconnected;
            Some(inner.reconnect_attempts)
        } else {
            inner.lifecycle = Lifecycle::Exhausted;
            None
        }
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    pub fn conversation(&self) -> ConversationState {
        self.lock().conversation
    }

    pub fn is_conversation_active(&self) -> bool {
        self.lock().conversation == ConversationState::Active
    }

    /// Applies `step` to the conversation state atomically, returning the
    /// previous and new values.
    pub(crate) fn transition_conversation(
        &self,
        step: impl FnOnce(ConversationState) -> ConversationState,
    ) -> (ConversationState, ConversationState) {
        let mut inner = self.lock();
        let from = inner.conversation;
        inner.conversation = step(from);
        (from, inner.conversation)
    }

    pub fn is_speaking(&self) -> bool {
        self.lock().speaking
    }

    pub fn set_speaking(&self, speaking: bool) {
        let mut inner = self.lock();
        if inner.speaking && !speaking {
            inner.speech_ended_at = Some(Instant::now());
        }
        inner.speaking = speaking;
    }
}
