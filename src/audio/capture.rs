//! Microphone capture using cpal with a lock-free ring buffer
//!
//! The cpal stream lives on its own thread for its whole lifetime; the audio
//! callback only copies into an `AudioRingBuffer`. The consumer side
//! (`MicrophoneStream`) mixes to mono and resamples to the detector's rate.
//! Dropping the stream stops capture and releases the device.

use super::device::{device_display_name, resolve_input_device};
use super::format::{mix_to_mono, AudioConverter};
use super::ring_buffer::AudioRingBuffer;
use crate::error::VoiceError;
use cpal::traits::{DeviceTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

/// Frames handed to the resampler per call
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// A claimed capture device producing mono samples at a fixed rate
pub trait InputStream: Send {
    /// Rate of the samples returned by `read`
    fn sample_rate(&self) -> u32;

    /// Copy buffered samples into `out` without blocking.
    ///
    /// `Ok(0)` means nothing is buffered yet; callers should wait and retry.
    fn read(&mut self, out: &mut [f32]) -> Result<usize, VoiceError>;
}

/// Something that can claim the microphone
pub trait AudioInput: Send + Sync {
    /// Claim the device and start capturing at `sample_rate`.
    ///
    /// The claim lasts until the returned stream is dropped.
    fn open(&self, sample_rate: u32) -> Result<Box<dyn InputStream>, VoiceError>;
}

/// The platform microphone
#[derive(Debug, Clone, Default)]
pub struct MicrophoneInput {
    device_id: Option<String>,
}

impl MicrophoneInput {
    pub fn new(device_id: Option<String>) -> Self {
        Self { device_id }
    }
}

impl AudioInput for MicrophoneInput {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn InputStream>, VoiceError> {
        let stream = MicrophoneStream::start(self.device_id.clone(), sample_rate)?;
        Ok(Box::new(stream))
    }
}

/// Details reported by the capture thread once the stream is running
struct StreamInfo {
    source_rate: u32,
    source_channels: usize,
}

/// Live microphone capture
pub struct MicrophoneStream {
    ring_buffer: Arc<AudioRingBuffer>,
    stop_signal: Arc<AtomicBool>,
    stream_error: Arc<AtomicBool>,
    capture_thread: Option<JoinHandle<()>>,
    source_channels: usize,
    target_rate: u32,
    converter: Option<AudioConverter>,
    pending: Vec<f32>,
    ready: VecDeque<f32>,
    scratch: Vec<f32>,
}

impl MicrophoneStream {
    /// Open the device and block until the stream is playing (or failed)
    pub fn start(device_id: Option<String>, target_rate: u32) -> Result<Self, VoiceError> {
        let ring_buffer = Arc::new(AudioRingBuffer::default());
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stream_error = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<StreamInfo, VoiceError>>();

        let callback_buffer = ring_buffer.clone();
        let thread_stop = stop_signal.clone();
        let thread_error = stream_error.clone();

        let capture_thread = std::thread::Builder::new()
            .name("colloquy-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(device_id.as_deref(), callback_buffer, thread_error)
                {
                    Ok((stream, info)) => {
                        let _ = ready_tx.send(Ok(info));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while !thread_stop.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(10));
                }
                drop(stream);
                tracing::debug!("Capture thread released the input device");
            })?;

        let info = ready_rx.recv().map_err(|_| {
            VoiceError::DeviceUnavailable("capture thread exited before starting".to_string())
        })??;

        let converter = if info.source_rate != target_rate {
            Some(
                AudioConverter::new(
                    info.source_rate,
                    target_rate,
                    info.source_channels,
                    RESAMPLE_CHUNK_FRAMES,
                )
                .map_err(|e| VoiceError::DeviceUnavailable(format!("resampler: {}", e)))?,
            )
        } else {
            None
        };

        tracing::info!(
            "Capture started: {}Hz {}ch -> {}Hz mono",
            info.source_rate,
            info.source_channels,
            target_rate
        );

        Ok(Self {
            ring_buffer,
            stop_signal,
            stream_error,
            capture_thread: Some(capture_thread),
            source_channels: info.source_channels,
            target_rate,
            converter,
            pending: Vec::new(),
            ready: VecDeque::new(),
            scratch: vec![0.0; 4096],
        })
    }

    /// Move raw device samples through mixdown/resampling into `ready`
    fn pump(&mut self) -> Result<(), VoiceError> {
        loop {
            let read = self.ring_buffer.read(&mut self.scratch);
            if read == 0 {
                break;
            }
            self.pending.extend_from_slice(&self.scratch[..read]);
        }

        match self.converter.as_mut() {
            Some(converter) => {
                let chunk_len = converter.input_len();
                while self.pending.len() >= chunk_len {
                    let chunk: Vec<f32> = self.pending.drain(..chunk_len).collect();
                    let resampled = converter
                        .process(&chunk)
                        .map_err(|e| VoiceError::DeviceUnavailable(format!("resample: {}", e)))?;
                    self.ready.extend(resampled);
                }
            }
            None => {
                let whole = self.pending.len() - self.pending.len() % self.source_channels;
                let frames: Vec<f32> = self.pending.drain(..whole).collect();
                self.ready.extend(mix_to_mono(&frames, self.source_channels));
            }
        }
        Ok(())
    }
}

impl InputStream for MicrophoneStream {
    fn sample_rate(&self) -> u32 {
        self.target_rate
    }

    fn read(&mut self, out: &mut [f32]) -> Result<usize, VoiceError> {
        if self.stream_error.load(Ordering::Relaxed) {
            return Err(VoiceError::DeviceUnavailable(
                "input stream reported an error".to_string(),
            ));
        }
        self.pump()?;

        let count = out.len().min(self.ready.len());
        for (slot, sample) in out.iter_mut().zip(self.ready.drain(..count)) {
            *slot = sample;
        }
        Ok(count)
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = self.capture_thread.take() {
            if handle.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
        }
    }
}

fn build_stream(
    device_id: Option<&str>,
    ring_buffer: Arc<AudioRingBuffer>,
    stream_error: Arc<AtomicBool>,
) -> Result<(cpal::Stream, StreamInfo), VoiceError> {
    let device = resolve_input_device(device_id)?;
    let supported_config = device.default_input_config()?;
    let source_rate = supported_config.sample_rate();
    let source_channels = supported_config.channels() as usize;

    tracing::debug!(
        "Building input stream on '{}': {}Hz, {}ch, format={:?}",
        device_display_name(&device),
        source_rate,
        source_channels,
        supported_config.sample_format()
    );

    let stream = device.build_input_stream(
        &supported_config.into(),
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let written = ring_buffer.write(data);
            if written < data.len() {
                tracing::warn!("Capture buffer overflow: dropped {} samples", data.len() - written);
            }
        },
        move |err| {
            tracing::error!("Input stream error: {}", err);
            stream_error.store(true, Ordering::Relaxed);
        },
        None,
    )?;
    stream.play()?;

    Ok((
        stream,
        StreamInfo {
            source_rate,
            source_channels,
        },
    ))
}
