use openai_realtime_types::{
    AudioFormat, ClientEvent, InputAudioTranscription, Modality, SessionConfig, TurnDetection,
};
use parley_core::Keywords;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "wss://api.openai.com/v1/realtime?model=";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini-realtime-preview-2024-12-17";
pub const DEFAULT_VOICE: &str = "alloy";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);
pub const DEFAULT_FRAME_QUEUE: usize = 64;

/// What happens to captured audio while the conversation is idle.
///
/// Wake words are spotted in the server's transcripts, so discarding idle
/// audio also disables waking by voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdleCapture {
    #[default]
    Transmit,
    Discard,
}

/// Server-side voice activity detection tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadSettings {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Everything a session needs except the API key, which only the connector sees.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub transcription_model: String,
    pub transcription_language: Option<String>,
    pub instructions: String,
    pub vad: VadSettings,
    pub wake_words: Keywords,
    pub termination_words: Keywords,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub idle_capture: IdleCapture,
    /// Capacity of the queue between the capture callback and the session.
    pub frame_queue: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            transcription_language: None,
            instructions: String::new(),
            vad: VadSettings::default(),
            wake_words: Keywords::default(),
            termination_words: Keywords::default(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            idle_capture: IdleCapture::default(),
            frame_queue: DEFAULT_FRAME_QUEUE,
        }
    }
}

impl RealtimeConfig {
    /// The socket URL: the endpoint with the model appended as a query parameter.
    pub fn url(&self) -> String {
        if self.endpoint.ends_with("model=") {
            format!("{}{}", self.endpoint, self.model)
        } else if self.endpoint.contains('?') {
            format!("{}&model={}", self.endpoint, self.model)
        } else {
            format!("{}?model={}", self.endpoint, self.model)
        }
    }

    /// The `session.update` sent after every successful connect.
    pub fn session_update(&self) -> ClientEvent {
        ClientEvent::SessionUpdate {
            session: SessionConfig {
                modalities: vec![Modality::Text, Modality::Audio],
                input_audio_format: AudioFormat::Pcm16,
                output_audio_format: AudioFormat::Pcm16,
                input_audio_transcription: InputAudioTranscription {
                    model: self.transcription_model.clone(),
                    language: self.transcription_language.clone(),
                },
                voice: self.voice.clone(),
                turn_detection: TurnDetection::ServerVad {
                    threshold: self.vad.threshold,
                    prefix_padding_ms: self.vad.prefix_padding_ms,
                    silence_duration_ms: self.vad.silence_duration_ms,
                },
                instructions: self.instructions.clone(),
            },
        }
    }
}
