//! Wire types for the OpenAI Realtime API.
//!
//! Outbound messages are modelled as [`ClientEvent`] and inbound messages as
//! [`ServerEvent`]. Both are tagged by the JSON `type` discriminant. Audio is
//! carried as base64 PCM16, see [`pcm`].

mod client;
pub mod pcm;
mod server;

pub use client::{
    AudioFormat, ClientEvent, ContentPart, InputAudioTranscription, Modality, ResponseRequest,
    SessionConfig, TurnDetection,
};
pub use server::{ApiError, ConversationItem, ItemContent, ServerEvent};

/// Errors raised while encoding or decoding realtime messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed server event: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode client event: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("invalid audio payload: {0}")]
    Audio(#[from] base64::DecodeError),
}
