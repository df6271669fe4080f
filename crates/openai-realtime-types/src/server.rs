//! Events received from the realtime service.

use crate::ProtocolError;
use serde::Deserialize;

/// An inbound event, keyed by its `type` discriminant.
///
/// Only the kinds the client acts on are modelled; every other discriminant
/// decodes to [`ServerEvent::Unrecognized`]. A recognized kind that lacks one of
/// its required fields fails to decode.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {},
    #[serde(rename = "session.updated")]
    SessionUpdated {},
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated { item: ConversationItem },
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted {},
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {},
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted { transcript: String },
    #[serde(rename = "response.created")]
    ResponseCreated {},
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone {},
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone { transcript: String },
    #[serde(rename = "response.done")]
    ResponseDone {},
    #[serde(rename = "error")]
    Error { error: ApiError },
    #[serde(other)]
    Unrecognized,
}

impl ServerEvent {
    /// Decodes a single JSON text frame.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::Malformed)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionCreated {} => "session.created",
            Self::SessionUpdated {} => "session.updated",
            Self::ConversationItemCreated { .. } => "conversation.item.created",
            Self::InputAudioBufferSpeechStarted {} => "input_audio_buffer.speech_started",
            Self::InputAudioBufferCommitted {} => "input_audio_buffer.committed",
            Self::InputAudioTranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            Self::ResponseCreated {} => "response.created",
            Self::ResponseAudioDelta { .. } => "response.audio.delta",
            Self::ResponseAudioDone {} => "response.audio.done",
            Self::ResponseAudioTranscriptDone { .. } => "response.audio_transcript.done",
            Self::ResponseDone {} => "response.done",
            Self::Error { .. } => "error",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// A conversation item as announced by `conversation.item.created`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<ItemContent>,
}

impl ConversationItem {
    /// First text part of a message item, if any.
    pub fn text(&self) -> Option<&str> {
        if self.kind != "message" {
            return None;
        }
        self.content
            .iter()
            .filter(|c| c.kind == "text" || c.kind == "input_text")
            .find_map(|c| c.text.as_deref())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ItemContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Error detail carried by an `error` event.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
