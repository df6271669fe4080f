//! Messages sent from the client to the realtime service.

use crate::{ProtocolError, pcm};
use serde::Serialize;

/// A control or audio message sent over the realtime socket.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Configures the session. Sent once after every successful connect.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    /// Appends a frame of base64 PCM16 audio to the server's input buffer.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    /// Asks the server to produce a response from the given content.
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseRequest },
}

impl ClientEvent {
    /// Frames a block of PCM16 samples as an `input_audio_buffer.append` message.
    pub fn append_audio(samples: &[i16]) -> Self {
        Self::InputAudioBufferAppend {
            audio: pcm::encode_i16(samples),
        }
    }

    /// Builds a `response.create` request carrying a single text part.
    pub fn respond_with(text: impl Into<String>) -> Self {
        Self::ResponseCreate {
            response: ResponseRequest {
                content: vec![ContentPart::Text { text: text.into() }],
            },
        }
    }

    /// The wire discriminant, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            Self::ResponseCreate { .. } => "response.create",
        }
    }

    /// Serializes the event into a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Payload of `session.update`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub modalities: Vec<Modality>,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub input_audio_transcription: InputAudioTranscription,
    pub voice: String,
    pub turn_detection: TurnDetection,
    pub instructions: String,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    #[default]
    #[serde(rename = "pcm16")]
    Pcm16,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct InputAudioTranscription {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Server-side voice activity detection settings.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum TurnDetection {
    #[serde(rename = "server_vad")]
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
    },
}

/// Payload of `response.create`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ResponseRequest {
    pub content: Vec<ContentPart>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
}
