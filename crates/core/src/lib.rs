pub mod audio;
pub mod conversation;
pub mod state;
pub mod transcript;

pub use conversation::{ConversationMachine, ConversationState, Keywords, Transition};
pub use state::{Lifecycle, SessionState, Snapshot};
pub use transcript::{MemoryTranscriptSink, Role, TranscriptEntry, TranscriptSink};

/// Represents commands that the core logic issues to an external runtime.
///
/// The conversation machine decides *what* should happen; the session
/// controller turns each command into wire traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the remote service to speak the given text.
    Speak(String),
}
