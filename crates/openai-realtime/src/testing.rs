//! In-memory devices and sockets for the session tests.

use crate::error::TransportError;
use crate::transport::{Connector, FrameSink, FrameStream, Inbound};
use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use parley_core::audio::{
    AudioDeviceError, AudioFrame, AudioInput, AudioOutput, Direction, FaultSender, FrameSender,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

/// Polls `condition` until it holds, panicking after a couple of seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let result = tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not reached in time");
}

#[derive(Default)]
struct InputShared {
    frames: Option<FrameSender>,
    faults: Option<FaultSender>,
    starts: u32,
}

pub struct FakeInput {
    shared: Arc<Mutex<InputShared>>,
}

/// Test-side view of a [`FakeInput`].
#[derive(Clone)]
pub struct MicView {
    shared: Arc<Mutex<InputShared>>,
}

impl FakeInput {
    pub fn new() -> Self {
        Self {
            shared: Arc::default(),
        }
    }

    pub fn view(&self) -> MicView {
        MicView {
            shared: self.shared.clone(),
        }
    }
}

impl AudioInput for FakeInput {
    fn start(&mut self, frames: FrameSender, faults: FaultSender) -> Result<(), AudioDeviceError> {
        let mut shared = self.shared.lock().unwrap();
        shared.frames = Some(frames);
        shared.faults = Some(faults);
        shared.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.lock().unwrap().frames = None;
    }

    fn is_running(&self) -> bool {
        self.shared.lock().unwrap().frames.is_some()
    }
}

impl MicView {
    pub fn is_running(&self) -> bool {
        self.shared.lock().unwrap().frames.is_some()
    }

    pub fn starts(&self) -> u32 {
        self.shared.lock().unwrap().starts
    }

    /// Delivers one frame the way a device callback would.
    pub fn capture(&self, samples: Vec<i16>) {
        let shared = self.shared.lock().unwrap();
        let frames = shared.frames.as_ref().expect("capture is not running");
        frames.try_send(AudioFrame::new(samples)).unwrap();
    }

    pub fn fail(&self, reason: &str) {
        let shared = self.shared.lock().unwrap();
        let faults = shared.faults.as_ref().expect("capture never started");
        faults
            .send(AudioDeviceError::Stream {
                direction: Direction::Capture,
                reason: reason.to_string(),
            })
            .unwrap();
    }
}

#[derive(Default)]
struct OutputShared {
    written: Vec<i16>,
    hold: bool,
    stopped: bool,
    clears: u32,
}

pub struct FakeOutput {
    shared: Arc<Mutex<OutputShared>>,
    capacity: usize,
    fail_start: bool,
}

#[derive(Clone)]
pub struct SpeakerView {
    shared: Arc<Mutex<OutputShared>>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Accepts at most `capacity` samples per write.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shared: Arc::default(),
            capacity,
            fail_start: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::new()
        }
    }

    pub fn view(&self) -> SpeakerView {
        SpeakerView {
            shared: self.shared.clone(),
        }
    }
}

impl AudioOutput for FakeOutput {
    fn start(&mut self, _faults: FaultSender) -> Result<(), AudioDeviceError> {
        if self.fail_start {
            return Err(AudioDeviceError::NoDevice(Direction::Playback));
        }
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize, AudioDeviceError> {
        let accepted = samples.len().min(self.capacity);
        self.shared
            .lock()
            .unwrap()
            .written
            .extend_from_slice(&samples[..accepted]);
        Ok(accepted)
    }

    fn pending(&self) -> usize {
        let shared = self.shared.lock().unwrap();
        if shared.hold { shared.written.len() } else { 0 }
    }

    fn clear(&mut self) {
        let mut shared = self.shared.lock().unwrap();
        shared.hold = false;
        shared.clears += 1;
    }

    fn stop(&mut self) {
        self.shared.lock().unwrap().stopped = true;
    }
}

impl SpeakerView {
    /// While held, everything written counts as not yet played.
    pub fn hold_pending(&self, hold: bool) {
        self.shared.lock().unwrap().hold = hold;
    }

    pub fn written(&self) -> Vec<i16> {
        self.shared.lock().unwrap().written.clone()
    }

    pub fn stopped(&self) -> bool {
        self.shared.lock().unwrap().stopped
    }

    pub fn clears(&self) -> u32 {
        self.shared.lock().unwrap().clears
    }
}

/// The service end of one in-memory connection.
pub struct FakeServer {
    sent: fmpsc::UnboundedReceiver<String>,
    inbound: fmpsc::UnboundedSender<Result<Inbound, TransportError>>,
}

impl FakeServer {
    pub fn link() -> (Self, (FrameSink, FrameStream)) {
        let (sent_tx, sent) = fmpsc::unbounded::<String>();
        let (inbound, inbound_rx) = fmpsc::unbounded::<Result<Inbound, TransportError>>();
        let sink: FrameSink =
            Box::pin(sent_tx.sink_map_err(|e| TransportError::Send(e.to_string())));
        let stream: FrameStream = Box::pin(inbound_rx);
        (Self { sent, inbound }, (sink, stream))
    }

    /// The next frame written by the client, parsed as JSON.
    pub async fn next_sent(&mut self) -> Value {
        let frame = tokio::time::timeout(WAIT, self.sent.next())
            .await
            .expect("client sent nothing")
            .expect("client closed the connection");
        serde_json::from_str(&frame).unwrap()
    }

    /// Skips audio appends until a frame of another kind arrives.
    pub async fn next_control(&mut self) -> Value {
        loop {
            let value = self.next_sent().await;
            if value["type"] != "input_audio_buffer.append" {
                return value;
            }
        }
    }

    pub fn push(&self, event: Value) {
        self.inbound
            .unbounded_send(Ok(Inbound::Text(event.to_string())))
            .unwrap();
    }

    pub fn close(&self, code: u16) {
        self.inbound
            .unbounded_send(Ok(Inbound::Close {
                code: Some(code),
                reason: "server closing".to_string(),
            }))
            .unwrap();
    }

    /// True once the client has closed its sink.
    pub async fn client_closed(&mut self) -> bool {
        tokio::time::timeout(WAIT, async {
            while self.sent.next().await.is_some() {}
        })
        .await
        .is_ok()
    }
}

/// Hands out scripted connections in order, failing once they run out.
#[derive(Default)]
pub struct FakeConnector {
    links: Mutex<VecDeque<(FrameSink, FrameStream)>>,
    calls: Arc<AtomicU32>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link(self, link: (FrameSink, FrameStream)) -> Self {
        self.links.lock().unwrap().push_back(link);
        self
    }

    /// Shared count of `connect` calls.
    pub fn calls(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.links
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Connect("connection refused".to_string()))
    }
}
