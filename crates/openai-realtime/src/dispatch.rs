//! Routes decoded server events to their consumers.

use crate::pipeline::PlaybackHandle;
use openai_realtime_types::{ClientEvent, ServerEvent, pcm};
use parley_core::{
    Command, ConversationMachine, Role, SessionState, TranscriptEntry, TranscriptSink,
};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

pub(crate) struct Dispatcher {
    conversation: ConversationMachine,
    state: SessionState,
    playback: PlaybackHandle,
    transcripts: Arc<dyn TranscriptSink>,
}

impl Dispatcher {
    pub(crate) fn new(
        conversation: ConversationMachine,
        state: SessionState,
        playback: PlaybackHandle,
        transcripts: Arc<dyn TranscriptSink>,
    ) -> Self {
        Self {
            conversation,
            state,
            playback,
            transcripts,
        }
    }

    /// Handles one inbound text frame, returning the reply to send, if any.
    ///
    /// Frames that fail to decode are logged and dropped.
    pub(crate) async fn dispatch(&self, raw: &str) -> Option<ClientEvent> {
        let event = match ServerEvent::decode(raw) {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "dropping malformed server event");
                return None;
            }
        };
        trace!(kind = event.kind(), "server event");

        match event {
            ServerEvent::SessionCreated {} | ServerEvent::SessionUpdated {} => {
                info!("realtime session ready");
            }
            ServerEvent::ConversationItemCreated { item } => {
                if let Some(text) = item.text() {
                    debug!(
                        role = item.role.as_deref().unwrap_or("unknown"),
                        text, "conversation item created"
                    );
                }
            }
            ServerEvent::InputAudioBufferSpeechStarted {} => debug!("speech started"),
            ServerEvent::InputAudioBufferCommitted {} => debug!("speech committed"),
            ServerEvent::InputAudioTranscriptionCompleted { transcript } => {
                return self.on_user_transcript(transcript).await;
            }
            ServerEvent::ResponseCreated {} => debug!("response started"),
            ServerEvent::ResponseAudioDelta { delta } => self.on_audio_delta(&delta),
            ServerEvent::ResponseAudioDone {} => {
                debug!("response audio complete");
                self.playback.finish();
            }
            ServerEvent::ResponseAudioTranscriptDone { transcript } => {
                info!(transcript = %transcript, "agent transcript");
                if self.state.is_conversation_active() {
                    self.persist(Role::Agent, transcript).await;
                }
            }
            ServerEvent::ResponseDone {} => debug!("response done"),
            ServerEvent::Error { error } => {
                error!(
                    kind = error.kind.as_deref().unwrap_or("unknown"),
                    code = error.code.as_deref().unwrap_or("none"),
                    message = error.message.as_deref().unwrap_or(""),
                    "realtime service reported an error"
                );
            }
            ServerEvent::Unrecognized => {}
        }
        None
    }

    async fn on_user_transcript(&self, transcript: String) -> Option<ClientEvent> {
        info!(transcript = %transcript, "user transcript");
        let transition = self.conversation.observe(&transcript);
        if transition.persist {
            self.persist(Role::User, transcript).await;
        }
        transition
            .command
            .map(|Command::Speak(text)| ClientEvent::respond_with(text))
    }

    fn on_audio_delta(&self, delta: &str) {
        if !self.state.is_conversation_active() {
            trace!("conversation idle, ignoring audio delta");
            return;
        }
        match pcm::decode_i16(delta) {
            Ok(samples) => self.playback.play(samples),
            Err(error) => warn!(%error, "dropping undecodable audio delta"),
        }
    }

    async fn persist(&self, role: Role, text: String) {
        if let Err(error) = self.transcripts.append(TranscriptEntry::now(role, text)).await {
            warn!(error = ?error, %role, "failed to persist transcript");
        }
    }
}
