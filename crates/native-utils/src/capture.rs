//! Microphone capture.
//!
//! A cpal stream is not `Send`, so each capture session lives on its own
//! worker thread. The callback downmixes to mono, resamples when the device
//! cannot run at the pipeline rate, and hands fixed-size frames to the
//! session queue with `try_send`.

use crate::device::{self, init_error};
use crate::worker::{StreamEvent, Worker};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use openai_realtime_types::pcm::f32_to_i16;
use parley_core::audio::{
    AudioDeviceError, AudioFrame, AudioInput, BLOCK_SIZE, Direction, FaultSender, FrameAssembler,
    FrameSender, SAMPLE_RATE,
};
use rubato::{FftFixedIn, Resampler};
use std::sync::mpsc::Sender;
use tracing::{debug, error, warn};

const RESAMPLER_CHUNK: usize = 1024;

/// The default (or named) input device.
#[derive(Default)]
pub struct CpalInput {
    device_name: Option<String>,
    worker: Option<Worker>,
}

impl CpalInput {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            worker: None,
        }
    }
}

impl AudioInput for CpalInput {
    fn start(&mut self, frames: FrameSender, faults: FaultSender) -> Result<(), AudioDeviceError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let device_name = self.device_name.clone();
        let worker = Worker::spawn(Direction::Capture, faults, move |events| {
            open_stream(device_name.as_deref(), frames.clone(), events)
        })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_alive)
    }
}

fn open_stream(
    device_name: Option<&str>,
    frames: FrameSender,
    events: Sender<StreamEvent>,
) -> Result<Stream, AudioDeviceError> {
    let host = cpal::default_host();
    let device = device::find_device(&host, Direction::Capture, device_name)?;
    let config = device::input_config(&device)?;
    debug!(
        device = device::device_name(&device),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "opening capture stream"
    );

    let mut callback = CaptureCallback::new(&config, frames)?;
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| callback.process(data),
            move |err| {
                let _ = events.send(StreamEvent::Error(err.to_string()));
            },
            None,
        )
        .map_err(|e| init_error(Direction::Capture, e))?;
    stream.play().map_err(|e| init_error(Direction::Capture, e))?;
    Ok(stream)
}

struct Resampling {
    resampler: FftFixedIn<f32>,
    input: Vec<f32>,
}

struct CaptureCallback {
    channels: usize,
    resampling: Option<Resampling>,
    assembler: FrameAssembler,
    frames: FrameSender,
    dropped: u64,
}

impl CaptureCallback {
    fn new(config: &StreamConfig, frames: FrameSender) -> Result<Self, AudioDeviceError> {
        let native_rate = config.sample_rate.0;
        let resampling = if native_rate == SAMPLE_RATE {
            None
        } else {
            debug!(native_rate, target_rate = SAMPLE_RATE, "resampling capture");
            let resampler = FftFixedIn::<f32>::new(
                native_rate as usize,
                SAMPLE_RATE as usize,
                RESAMPLER_CHUNK,
                2,
                1,
            )
            .map_err(|e| AudioDeviceError::Unsupported {
                direction: Direction::Capture,
                reason: e.to_string(),
            })?;
            Some(Resampling {
                resampler,
                input: Vec::with_capacity(RESAMPLER_CHUNK * 2),
            })
        };
        Ok(Self {
            channels: usize::from(config.channels.max(1)),
            resampling,
            assembler: FrameAssembler::new(BLOCK_SIZE),
            frames,
            dropped: 0,
        })
    }

    fn process(&mut self, data: &[f32]) {
        let channels = self.channels;
        let mono = data
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32);

        let frames = &self.frames;
        let dropped = &mut self.dropped;
        let mut deliver = |frame: AudioFrame| {
            if frames.try_send(frame).is_err() {
                *dropped += 1;
                if *dropped % 100 == 1 {
                    warn!(dropped = *dropped, "capture queue full, dropping frames");
                }
            }
        };

        match &mut self.resampling {
            None => self.assembler.push(mono.map(f32_to_i16), &mut deliver),
            Some(resampling) => {
                resampling.input.extend(mono);
                loop {
                    let needed = resampling.resampler.input_frames_next();
                    if resampling.input.len() < needed {
                        break;
                    }
                    match resampling.resampler.process(&[&resampling.input[..needed]], None) {
                        Ok(output) => {
                            let samples = output.into_iter().next().unwrap_or_default();
                            self.assembler
                                .push(samples.into_iter().map(f32_to_i16), &mut deliver);
                        }
                        Err(e) => {
                            error!(error = %e, "capture resampling failed");
                        }
                    }
                    resampling.input.drain(..needed);
                }
            }
        }
    }
}
