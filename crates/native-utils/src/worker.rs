//! Dedicated thread that owns one cpal stream.
//!
//! The stream is closed by dropping it.
//!
//! The stream is reopened once after a runtime error. A second error is
//! reported on the fault channel and the thread exits.

use crate::device::init_error;
use parley_core::audio::{AudioDeviceError, Direction, FaultSender};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

pub(crate) enum StreamEvent {
    Error(String),
    Stop,
}

pub(crate) struct Worker {
    control: Sender<StreamEvent>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Opens the stream on a new thread, returning once it is playing.
    pub(crate) fn spawn<F, S>(
        direction: Direction,
        faults: FaultSender,
        open: F,
    ) -> Result<Self, AudioDeviceError>
    where
        F: FnMut(Sender<StreamEvent>) -> Result<S, AudioDeviceError> + Send + 'static,
        S: 'static,
    {
        let (control, events) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let stream_events = control.clone();

        let thread = thread::Builder::new()
            .name(format!("parley-{direction}"))
            .spawn(move || run(direction, open, stream_events, events, ready_tx, faults))
            .map_err(|e| init_error(direction, e))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                control,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(AudioDeviceError::Init {
                direction,
                reason: "audio worker exited during startup".to_string(),
            }),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Closes the stream and waits for the thread.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.control.send(StreamEvent::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("audio worker panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<F, S>(
    direction: Direction,
    mut open: F,
    stream_events: Sender<StreamEvent>,
    events: Receiver<StreamEvent>,
    ready: mpsc::SyncSender<Result<(), AudioDeviceError>>,
    faults: FaultSender,
) where
    F: FnMut(Sender<StreamEvent>) -> Result<S, AudioDeviceError>,
{
    let mut stream = match open(stream_events.clone()) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            Some(stream)
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    info!(%direction, "audio stream started");

    let mut restarted = false;
    while let Ok(event) = events.recv() {
        let reason = match event {
            StreamEvent::Stop => break,
            StreamEvent::Error(reason) => reason,
        };
        if restarted {
            error!(%direction, %reason, "audio stream failed again");
            let _ = faults.send(AudioDeviceError::Stream { direction, reason });
            break;
        }

        warn!(%direction, %reason, "audio stream error, restarting");
        restarted = true;
        drop(stream.take());
        // Errors queued by the closed stream don't count against the new one
        let mut stop = false;
        while let Ok(queued) = events.try_recv() {
            stop |= matches!(queued, StreamEvent::Stop);
        }
        if stop {
            break;
        }

        match open(stream_events.clone()) {
            Ok(reopened) => stream = Some(reopened),
            Err(e) => {
                error!(%direction, error = %e, "audio stream restart failed");
                let _ = faults.send(AudioDeviceError::Stream {
                    direction,
                    reason: e.to_string(),
                });
                break;
            }
        }
    }

    drop(stream);
    debug!(%direction, "audio stream closed");
}
