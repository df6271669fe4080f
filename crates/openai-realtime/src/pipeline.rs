//! Audio Pipeline
//!
//! Capture frames flow from the device callback through a bounded queue to a
//! consumer task that forwards them to the session. Playback chunks flow from
//! the dispatcher to a task that writes them to the output device in order.
//! The playback task owns the speaking flag: it sets it on the first chunk and
//! clears it once a finished response has drained from the device, or once an
//! interrupted response has been discarded.

use crate::config::IdleCapture;
use crate::session::SessionHandle;
use openai_realtime_types::ClientEvent;
use parley_core::{
    ConversationState, SessionState, Snapshot,
    audio::{
        AudioDeviceError, AudioFrame, AudioInput, AudioOutput, Direction, FaultSender, FrameSender,
        SAMPLE_RATE,
    },
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Send,
    Speaking,
    Idle,
}

/// Decides whether a captured frame goes to the service.
pub(crate) fn admit(snapshot: &Snapshot, frame: &AudioFrame, policy: IdleCapture) -> Admission {
    if snapshot.overlaps_speech(frame.captured_at()) {
        Admission::Speaking
    } else if policy == IdleCapture::Discard && snapshot.conversation == ConversationState::Idle {
        Admission::Idle
    } else {
        Admission::Send
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlaybackCommand {
    Chunk { samples: Vec<i16>, generation: u64 },
    /// The current response has no more audio.
    Finish,
    /// Everything queued before this command is discarded.
    Abort,
}

/// Counters shared by the handle and the playback task.
#[derive(Debug, Default)]
pub(crate) struct PlaybackShared {
    /// Chunks handed over but not yet written to the device.
    queued: AtomicUsize,
    /// Bumped on every abort; chunks from an older generation are skipped.
    generation: AtomicU64,
}

/// Queues decoded response audio for the playback task.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    commands: mpsc::UnboundedSender<PlaybackCommand>,
    shared: Arc<PlaybackShared>,
    state: SessionState,
}

impl PlaybackHandle {
    pub(crate) fn channel(state: SessionState) -> (Self, mpsc::UnboundedReceiver<PlaybackCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = Self {
            commands,
            shared: Arc::default(),
            state,
        };
        (handle, rx)
    }

    pub fn play(&self, samples: Vec<i16>) {
        self.state.set_speaking(true);
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        let generation = self.shared.generation.load(Ordering::SeqCst);
        if self
            .commands
            .send(PlaybackCommand::Chunk { samples, generation })
            .is_err()
        {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            trace!("playback stopped, dropping chunk");
        }
    }

    pub fn finish(&self) {
        let _ = self.commands.send(PlaybackCommand::Finish);
    }

    /// Drops the response in flight: queued chunks are skipped, the device
    /// buffer is emptied and the speaking flag clears.
    pub fn abort(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if self.commands.send(PlaybackCommand::Abort).is_err() {
            self.state.set_speaking(false);
        }
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }
}

/// Owns both audio directions for one session.
pub struct AudioPipeline<I: AudioInput> {
    input: Arc<Mutex<I>>,
    frames: FrameSender,
    faults: FaultSender,
    fault_rx: mpsc::UnboundedReceiver<AudioDeviceError>,
    playback: PlaybackHandle,
    capture_cancel: CancellationToken,
    playback_cancel: CancellationToken,
    capture_task: Option<JoinHandle<()>>,
    playback_task: Option<JoinHandle<()>>,
}

impl<I: AudioInput> AudioPipeline<I> {
    /// Opens the output device and spawns the pipeline tasks. Capture stays
    /// off until [`start_capture`](Self::start_capture).
    ///
    /// Must be called within a Tokio runtime.
    pub fn start<O: AudioOutput>(
        input: I,
        mut output: O,
        session: SessionHandle,
        policy: IdleCapture,
        frame_queue: usize,
    ) -> Result<Self, AudioDeviceError> {
        let (faults, fault_rx) = mpsc::unbounded_channel();
        output.start(faults.clone())?;

        let state = session.state().clone();
        let (frames, frame_rx) = mpsc::channel(frame_queue.max(1));
        let (playback, commands) = PlaybackHandle::channel(state.clone());

        let capture_cancel = CancellationToken::new();
        let playback_cancel = CancellationToken::new();

        let capture_task = tokio::spawn(
            forward_capture(frame_rx, session, policy, capture_cancel.clone())
                .instrument(info_span!("capture")),
        );
        let playback_task = tokio::spawn(
            run_playback(
                output,
                commands,
                state,
                playback.shared.clone(),
                playback_cancel.clone(),
            )
            .instrument(info_span!("playback")),
        );

        Ok(Self {
            input: Arc::new(Mutex::new(input)),
            frames,
            faults,
            fault_rx,
            playback,
            capture_cancel,
            playback_cancel,
            capture_task: Some(capture_task),
            playback_task: Some(playback_task),
        })
    }

    pub fn playback(&self) -> PlaybackHandle {
        self.playback.clone()
    }

    /// Starts the input device on the blocking pool. A no-op when it is
    /// already running.
    pub async fn start_capture(&mut self) -> Result<(), AudioDeviceError> {
        if lock(&self.input).is_running() {
            return Ok(());
        }
        let input = self.input.clone();
        let frames = self.frames.clone();
        let faults = self.faults.clone();
        tokio::task::spawn_blocking(move || lock(&input).start(frames, faults))
            .await
            .map_err(|e| AudioDeviceError::Init {
                direction: Direction::Capture,
                reason: e.to_string(),
            })??;
        info!("capture started");
        Ok(())
    }

    /// Stops the input device on the blocking pool.
    pub async fn stop_capture(&mut self) {
        if !lock(&self.input).is_running() {
            return;
        }
        let input = self.input.clone();
        match tokio::task::spawn_blocking(move || lock(&input).stop()).await {
            Ok(()) => info!("capture stopped"),
            Err(e) => warn!(error = %e, "capture stop ended abnormally"),
        }
    }

    /// Abandons the response being played, if any.
    pub fn interrupt_playback(&self) {
        self.playback.abort();
    }

    /// Waits for the next unrecoverable device error.
    pub async fn next_fault(&mut self) -> Option<AudioDeviceError> {
        self.fault_rx.recv().await
    }

    /// Stops the playback task, which closes the output device.
    pub async fn stop_playback(&mut self) {
        self.playback_cancel.cancel();
        if let Some(task) = self.playback_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "playback task ended abnormally");
            }
        }
    }

    /// Stops both directions and waits for the pipeline tasks.
    pub async fn shutdown(&mut self) {
        self.stop_capture().await;
        self.stop_playback().await;
        self.capture_cancel.cancel();
        if let Some(task) = self.capture_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "capture task ended abnormally");
            }
        }
    }
}

fn lock<I>(input: &Mutex<I>) -> MutexGuard<'_, I> {
    input.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn forward_capture(
    mut frames: mpsc::Receiver<AudioFrame>,
    session: SessionHandle,
    policy: IdleCapture,
    cancel: CancellationToken,
) {
    let mut suppressed: u64 = 0;
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match admit(&session.state().snapshot(), &frame, policy) {
            Admission::Send => {
                if suppressed > 0 {
                    debug!(suppressed, "resuming capture after agent speech");
                    suppressed = 0;
                }
                if let Err(e) = session.send(ClientEvent::append_audio(frame.samples())).await {
                    trace!(error = %e, "dropping captured frame");
                }
            }
            Admission::Speaking => suppressed += 1,
            Admission::Idle => trace!("conversation idle, dropping captured frame"),
        }
    }
    debug!("capture consumer stopped");
}

async fn run_playback<O: AudioOutput>(
    mut output: O,
    mut commands: mpsc::UnboundedReceiver<PlaybackCommand>,
    state: SessionState,
    shared: Arc<PlaybackShared>,
    cancel: CancellationToken,
) {
    'commands: loop {
        let command = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            PlaybackCommand::Chunk { samples, generation } => {
                let stale = || shared.generation.load(Ordering::SeqCst) != generation;
                if stale() {
                    shared.queued.fetch_sub(1, Ordering::SeqCst);
                    trace!("skipping chunk of an interrupted response");
                    continue;
                }
                state.set_speaking(true);
                let mut offset = 0;
                while offset < samples.len() && !stale() {
                    match output.write(&samples[offset..]) {
                        Ok(accepted) => offset += accepted,
                        Err(e) => {
                            warn!(error = %e, "dropping playback chunk");
                            break;
                        }
                    }
                    if offset < samples.len() {
                        // Ring full
                        tokio::select! {
                            _ = cancel.cancelled() => break 'commands,
                            _ = sleep(POLL_INTERVAL) => {}
                        }
                    }
                }
                shared.queued.fetch_sub(1, Ordering::SeqCst);
            }
            PlaybackCommand::Finish => {
                let pending = output.pending();
                let deadline = Instant::now()
                    + Duration::from_secs_f64(pending as f64 / f64::from(SAMPLE_RATE))
                    + DRAIN_GRACE;
                while output.pending() > 0 && Instant::now() < deadline {
                    tokio::select! {
                        _ = cancel.cancelled() => break 'commands,
                        _ = sleep(POLL_INTERVAL) => {}
                    }
                }
                if output.pending() > 0 {
                    warn!(pending = output.pending(), "output did not drain in time");
                }
                // A newer response may already be queued behind this one
                if shared.queued.load(Ordering::SeqCst) == 0 {
                    state.set_speaking(false);
                    debug!("playback drained");
                }
            }
            PlaybackCommand::Abort => {
                output.clear();
                if shared.queued.load(Ordering::SeqCst) == 0 {
                    state.set_speaking(false);
                }
                debug!("playback interrupted");
            }
        }
    }
    output.stop();
    state.set_speaking(false);
    debug!("playback stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeOutput, wait_until};

    fn snapshot(speaking: bool, conversation: ConversationState) -> Snapshot {
        Snapshot {
            speaking,
            conversation,
            ..Snapshot::default()
        }
    }

    #[test]
    fn test_admission() {
        let frame = AudioFrame::new(vec![0; 4]);
        let idle = snapshot(false, ConversationState::Idle);
        let active = snapshot(false, ConversationState::Active);
        let speaking = snapshot(true, ConversationState::Active);

        assert_eq!(admit(&idle, &frame, IdleCapture::Transmit), Admission::Send);
        assert_eq!(admit(&idle, &frame, IdleCapture::Discard), Admission::Idle);
        assert_eq!(admit(&active, &frame, IdleCapture::Discard), Admission::Send);
        assert_eq!(admit(&speaking, &frame, IdleCapture::Transmit), Admission::Speaking);
    }

    #[test]
    fn test_frame_captured_before_speech_ended_is_suppressed() {
        let state = SessionState::new();
        state.set_speaking(true);
        let frame = AudioFrame::new(vec![0; 4]);
        state.set_speaking(false);

        assert_eq!(
            admit(&state.snapshot(), &frame, IdleCapture::Transmit),
            Admission::Speaking
        );
    }

    #[tokio::test]
    async fn test_playback_writes_in_order_and_clears_after_drain() {
        let state = SessionState::new();
        let (playback, commands) = PlaybackHandle::channel(state.clone());
        let output = FakeOutput::new();
        let speaker = output.view();
        speaker.hold_pending(true);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_playback(
            output,
            commands,
            state.clone(),
            playback.shared.clone(),
            cancel.clone(),
        ));

        playback.play(vec![1, 2, 3]);
        playback.play(vec![4, 5]);
        playback.finish();
        assert!(state.is_speaking());

        wait_until(|| speaker.written().len() == 5).await;
        assert_eq!(speaker.written(), vec![1, 2, 3, 4, 5]);
        // Still draining
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(state.is_speaking());

        speaker.hold_pending(false);
        wait_until(|| !state.is_speaking()).await;

        cancel.cancel();
        task.await.unwrap();
        assert!(speaker.stopped());
    }

    #[tokio::test]
    async fn test_playback_retries_when_ring_is_full() {
        let state = SessionState::new();
        let (playback, commands) = PlaybackHandle::channel(state.clone());
        let output = FakeOutput::with_capacity(2);
        let speaker = output.view();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_playback(
            output,
            commands,
            state.clone(),
            playback.shared.clone(),
            cancel.clone(),
        ));

        playback.play(vec![9, 8, 7, 6, 5]);
        playback.finish();

        wait_until(|| !state.is_speaking()).await;
        assert_eq!(speaker.written(), vec![9, 8, 7, 6, 5]);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_finish_keeps_speaking_while_newer_chunks_are_queued() {
        let state = SessionState::new();
        let (playback, commands) = PlaybackHandle::channel(state.clone());
        let output = FakeOutput::new();
        let speaker = output.view();
        speaker.hold_pending(true);
        let cancel = CancellationToken::new();

        // Queue a second response behind the first before the task runs
        playback.play(vec![1]);
        playback.finish();
        playback.play(vec![2]);
        assert_eq!(playback.queued(), 2);

        let task = tokio::spawn(run_playback(
            output,
            commands,
            state.clone(),
            playback.shared.clone(),
            cancel.clone(),
        ));
        wait_until(|| speaker.written() == vec![1, 2]).await;
        speaker.hold_pending(false);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(state.is_speaking());

        playback.finish();
        wait_until(|| !state.is_speaking()).await;

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_discards_queued_audio_and_clears_speaking() {
        let state = SessionState::new();
        let (playback, commands) = PlaybackHandle::channel(state.clone());
        let output = FakeOutput::new();
        let speaker = output.view();
        speaker.hold_pending(true);
        let cancel = CancellationToken::new();

        // Queued before the task runs, so none of it reaches the device
        playback.play(vec![1, 2]);
        playback.play(vec![3]);
        playback.abort();
        assert!(state.is_speaking());

        let task = tokio::spawn(run_playback(
            output,
            commands,
            state.clone(),
            playback.shared.clone(),
            cancel.clone(),
        ));
        wait_until(|| !state.is_speaking()).await;
        assert!(speaker.written().is_empty());
        assert_eq!(speaker.clears(), 1);
        assert_eq!(playback.queued(), 0);

        // The next response plays normally
        playback.play(vec![4]);
        wait_until(|| speaker.written() == vec![4]).await;
        assert!(state.is_speaking());

        cancel.cancel();
        task.await.unwrap();
    }
}
