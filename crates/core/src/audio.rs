//! Audio frame model and the device contract.
//!
//! Both directions run at 24kHz, mono, 16-bit signed PCM. Capture delivers
//! frames of exactly [`BLOCK_SIZE`] samples.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

pub const SAMPLE_RATE: u32 = 24_000;
pub const BLOCK_SIZE: usize = 1024;

/// An immutable block of captured PCM16 samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Arc<[i16]>,
    captured_at: Instant,
}

impl AudioFrame {
    /// Wraps samples, stamping them with the current time.
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into(),
            captured_at: Instant::now(),
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Capture,
    Playback,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Capture => write!(f, "capture"),
            Direction::Playback => write!(f, "playback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioDeviceError {
    #[error("no {0} device available")]
    NoDevice(Direction),
    #[error("{direction} device cannot run {rate}Hz mono: {reason}", rate = SAMPLE_RATE)]
    Unsupported { direction: Direction, reason: String },
    #[error("failed to open {direction} stream: {reason}")]
    Init { direction: Direction, reason: String },
    #[error("{direction} stream failed again after restart: {reason}")]
    Stream { direction: Direction, reason: String },
}

impl AudioDeviceError {
    pub fn direction(&self) -> Direction {
        match self {
            Self::NoDevice(direction) => *direction,
            Self::Unsupported { direction, .. }
            | Self::Init { direction, .. }
            | Self::Stream { direction, .. } => *direction,
        }
    }
}

/// Bounded queue from the capture callback to the pipeline.
pub type FrameSender = mpsc::Sender<AudioFrame>;
/// Unrecoverable runtime errors reported by a device.
pub type FaultSender = mpsc::UnboundedSender<AudioDeviceError>;

/// Microphone side of the audio device.
///
/// Implementations deliver frames from the platform callback with
/// `try_send`, dropping a frame rather than blocking when the queue is full.
pub trait AudioInput: Send + 'static {
    fn start(&mut self, frames: FrameSender, faults: FaultSender) -> Result<(), AudioDeviceError>;
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

/// Speaker side of the audio device.
pub trait AudioOutput: Send + 'static {
    fn start(&mut self, faults: FaultSender) -> Result<(), AudioDeviceError>;
    /// Queues samples for playback in order, returning how many were accepted.
    fn write(&mut self, samples: &[i16]) -> Result<usize, AudioDeviceError>;
    /// Samples accepted but not yet played.
    fn pending(&self) -> usize;
    /// Discards every sample not yet played.
    fn clear(&mut self);
    fn stop(&mut self);
}

/// Re-chunks arbitrarily sized callback buffers into fixed-size frames.
#[derive(Debug)]
pub struct FrameAssembler {
    block_size: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Appends samples, calling `emit` for every completed frame.
    pub fn push<I>(&mut self, samples: I, mut emit: impl FnMut(AudioFrame))
    where
        I: IntoIterator<Item = i16>,
    {
        for sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.block_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                emit(AudioFrame::new(full));
            }
        }
    }
}
