//! Speaker playback through a lock-free ring.
//!
//! `write` pushes samples into the producer side; the device callback pops
//! them and pads with silence on underrun.

use crate::device::{self, init_error};
use crate::worker::{StreamEvent, Worker};
use cpal::Stream;
use cpal::traits::{DeviceTrait, StreamTrait};
use openai_realtime_types::pcm::i16_to_f32;
use parley_core::audio::{AudioDeviceError, AudioOutput, Direction, FaultSender, SAMPLE_RATE};
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::*};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Two seconds of audio.
pub const DEFAULT_BUFFER_SAMPLES: usize = SAMPLE_RATE as usize * 2;

/// The default (or named) output device.
pub struct CpalOutput {
    device_name: Option<String>,
    buffer_samples: usize,
    producer: Option<HeapProd<i16>>,
    consumer: Option<Arc<Mutex<HeapCons<i16>>>>,
    pending: Arc<AtomicUsize>,
    worker: Option<Worker>,
}

impl CpalOutput {
    pub fn new(device_name: Option<String>) -> Self {
        Self::with_buffer(device_name, DEFAULT_BUFFER_SAMPLES)
    }

    pub fn with_buffer(device_name: Option<String>, buffer_samples: usize) -> Self {
        Self {
            device_name,
            buffer_samples: buffer_samples.max(1),
            producer: None,
            consumer: None,
            pending: Arc::new(AtomicUsize::new(0)),
            worker: None,
        }
    }
}

impl AudioOutput for CpalOutput {
    fn start(&mut self, faults: FaultSender) -> Result<(), AudioDeviceError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (producer, consumer) = HeapRb::<i16>::new(self.buffer_samples).split();
        let consumer = Arc::new(Mutex::new(consumer));
        self.pending.store(0, Ordering::SeqCst);

        let device_name = self.device_name.clone();
        let pending = self.pending.clone();
        let stream_consumer = consumer.clone();
        let worker = Worker::spawn(Direction::Playback, faults, move |events| {
            open_stream(device_name.as_deref(), stream_consumer.clone(), pending.clone(), events)
        })?;
        self.producer = Some(producer);
        self.consumer = Some(consumer);
        self.worker = Some(worker);
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize, AudioDeviceError> {
        let producer = self.producer.as_mut().ok_or_else(|| AudioDeviceError::Init {
            direction: Direction::Playback,
            reason: "output is not started".to_string(),
        })?;
        // Counted before the callback can see them, so it never subtracts first
        self.pending.fetch_add(samples.len(), Ordering::SeqCst);
        let accepted = producer.push_slice(samples);
        self.pending.fetch_sub(samples.len() - accepted, Ordering::SeqCst);
        Ok(accepted)
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn clear(&mut self) {
        if let Some(consumer) = &self.consumer {
            let mut consumer = consumer.lock().unwrap_or_else(PoisonError::into_inner);
            let dropped = consumer.clear();
            self.pending.fetch_sub(dropped, Ordering::SeqCst);
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        self.producer = None;
        self.consumer = None;
        self.pending.store(0, Ordering::SeqCst);
    }
}

fn open_stream(
    device_name: Option<&str>,
    consumer: Arc<Mutex<HeapCons<i16>>>,
    pending: Arc<AtomicUsize>,
    events: Sender<StreamEvent>,
) -> Result<Stream, AudioDeviceError> {
    let host = cpal::default_host();
    let device = device::find_device(&host, Direction::Playback, device_name)?;
    let config = device::output_config(&device)?;
    let channels = usize::from(config.channels.max(1));
    debug!(
        device = device::device_name(&device),
        sample_rate = config.sample_rate.0,
        channels,
        "opening playback stream"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                match consumer.try_lock() {
                    Ok(mut consumer) => {
                        let played = fill(data, channels, &mut *consumer);
                        if played > 0 {
                            pending.fetch_sub(played, Ordering::SeqCst);
                        }
                    }
                    Err(_) => data.fill(0.0),
                }
            },
            move |err| {
                let _ = events.send(StreamEvent::Error(err.to_string()));
            },
            None,
        )
        .map_err(|e| init_error(Direction::Playback, e))?;
    stream.play().map_err(|e| init_error(Direction::Playback, e))?;
    Ok(stream)
}

/// Copies queued samples to every channel of `data`, returning how many were
/// consumed.
fn fill(data: &mut [f32], channels: usize, consumer: &mut impl Consumer<Item = i16>) -> usize {
    let mut played = 0;
    for frame in data.chunks_mut(channels) {
        let sample = match consumer.try_pop() {
            Some(sample) => {
                played += 1;
                i16_to_f32(sample)
            }
            None => 0.0,
        };
        frame.fill(sample);
    }
    played
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_duplicates_channels_and_pads_silence() {
        let (mut producer, mut consumer) = HeapRb::<i16>::new(8).split();
        producer.push_slice(&[16384, -16384]);

        let mut data = [1.0f32; 6];
        let played = fill(&mut data, 2, &mut consumer);

        assert_eq!(played, 2);
        assert_eq!(data, [0.5, 0.5, -0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_write_requires_started_output() {
        let mut output = CpalOutput::new(None);
        assert!(output.write(&[1, 2, 3]).is_err());
        assert_eq!(output.pending(), 0);
    }

    /// An output with its ring in place but no device behind it.
    fn detached(capacity: usize) -> CpalOutput {
        let mut output = CpalOutput::with_buffer(None, capacity);
        let (producer, consumer) = HeapRb::<i16>::new(capacity).split();
        output.producer = Some(producer);
        output.consumer = Some(Arc::new(Mutex::new(consumer)));
        output
    }

    #[test]
    fn test_pending_counts_only_accepted_samples() {
        let mut output = detached(4);

        assert_eq!(output.write(&[1, 2, 3, 4, 5, 6]).unwrap(), 4);
        assert_eq!(output.pending(), 4);
        assert_eq!(output.write(&[7]).unwrap(), 0);
        assert_eq!(output.pending(), 4);
    }

    #[test]
    fn test_clear_discards_unplayed_samples() {
        let mut output = detached(4);
        output.write(&[1, 2, 3]).unwrap();

        output.clear();
        assert_eq!(output.pending(), 0);

        assert_eq!(output.write(&[16384, 16384, 16384, 16384]).unwrap(), 4);
        let consumer = output.consumer.clone().unwrap();
        let mut data = [0.0f32; 4];
        assert_eq!(fill(&mut data, 1, &mut *consumer.lock().unwrap()), 4);
        assert_eq!(data, [0.5; 4]);
    }
}
