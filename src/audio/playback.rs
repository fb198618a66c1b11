//! Decode-and-play pipeline for backend audio
//!
//! `AudioPipeline::start` runs the decoder chain off the async thread, hands
//! the clip to any registered lip-sync adapters and starts playback on a
//! blocking task. The staged file backing the clip moves into that task, so
//! it is removed when playback ends however it ends.

use super::decode::{DecodeAttempt, DecodeReport, DecodeStrategy, DecodedClip, Decoder};
use crate::backend::types::{AudioAsset, WordTiming};
use crate::error::{VoiceError, VoiceResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Interval at which a playing sink checks for completion or stop
const SINK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The single audio output device
pub trait AudioOutput: Send + Sync {
    /// Play `clip` to the end, or until `stop` is set. Blocks the caller.
    fn play(&self, clip: &DecodedClip, stop: &AtomicBool) -> VoiceResult<()>;
}

/// Optional animation hook driven by what is being spoken
pub trait LipSync: Send + Sync {
    /// Called once per clip, just before playback starts
    fn accept(&self, clip: &DecodedClip, text: &str, duration_secs: f64, timings: &[WordTiming]);
}

/// Default speaker via rodio
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeakerOutput;

impl AudioOutput for SpeakerOutput {
    fn play(&self, clip: &DecodedClip, stop: &AtomicBool) -> VoiceResult<()> {
        let (_stream, handle) = rodio::OutputStream::try_default()
            .map_err(|e| VoiceError::DeviceUnavailable(format!("no output device: {}", e)))?;
        let sink = rodio::Sink::try_new(&handle).map_err(|e| VoiceError::Playback(e.to_string()))?;

        sink.append(rodio::buffer::SamplesBuffer::new(
            clip.channels,
            clip.sample_rate,
            clip.samples.clone(),
        ));

        while !sink.empty() {
            if stop.load(Ordering::Relaxed) {
                sink.stop();
                tracing::debug!("Playback stopped early");
                break;
            }
            std::thread::sleep(SINK_POLL_INTERVAL);
        }
        Ok(())
    }
}

/// Outcome of [`AudioPipeline::play`]
#[derive(Debug)]
pub enum PlayOutcome {
    Played {
        duration_secs: f64,
        strategy: DecodeStrategy,
    },
    AllFormatsFailed {
        attempts: Vec<DecodeAttempt>,
    },
}

/// Playback in progress
///
/// Dropping the task stops playback; `stop` may be called any number of times.
pub struct PlaybackTask {
    handle: Option<JoinHandle<VoiceResult<()>>>,
    stop: Arc<AtomicBool>,
    duration_secs: f64,
    strategy: DecodeStrategy,
}

impl PlaybackTask {
    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn strategy(&self) -> DecodeStrategy {
        self.strategy
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait until the device has finished playing.
    ///
    /// Dropping this future before it completes stops playback.
    pub async fn wait(mut self) -> VoiceResult<()> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        let joined = handle.await;
        self.handle = None;
        joined.map_err(|e| VoiceError::Playback(format!("playback task failed: {}", e)))?
    }
}

impl Drop for PlaybackTask {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

/// Decoder chain plus output device plus lip-sync adapters
#[derive(Clone)]
pub struct AudioPipeline {
    decoder: Decoder,
    output: Arc<dyn AudioOutput>,
    lip_sync: Vec<Arc<dyn LipSync>>,
}

impl AudioPipeline {
    pub fn new(decoder: Decoder, output: Arc<dyn AudioOutput>) -> Self {
        Self {
            decoder,
            output,
            lip_sync: Vec::new(),
        }
    }

    /// Register a lip-sync adapter
    pub fn with_lip_sync(mut self, adapter: Arc<dyn LipSync>) -> Self {
        self.lip_sync.push(adapter);
        self
    }

    async fn decode(&self, bytes: Vec<u8>) -> VoiceResult<DecodeReport> {
        let decoder = self.decoder.clone();
        tokio::task::spawn_blocking(move || decoder.decode(&bytes))
            .await
            .map_err(|e| VoiceError::Decode(format!("decode task failed: {}", e)))
    }

    /// Decode `asset` and begin playback
    pub async fn start(&self, asset: AudioAsset) -> VoiceResult<PlaybackTask> {
        match self.decode(asset.raw_bytes.clone()).await? {
            DecodeReport::Decoded {
                clip,
                strategy,
                staged,
                ..
            } => Ok(self.spawn(&asset, clip, strategy, staged)),
            DecodeReport::AllFormatsFailed { attempts } => Err(VoiceError::Decode(format!(
                "all {} decode attempts failed",
                attempts.len()
            ))),
        }
    }

    /// Decode and play `asset` to completion
    pub async fn play(&self, asset: AudioAsset) -> VoiceResult<PlayOutcome> {
        match self.decode(asset.raw_bytes.clone()).await? {
            DecodeReport::Decoded {
                clip,
                strategy,
                staged,
                ..
            } => {
                let task = self.spawn(&asset, clip, strategy, staged);
                let duration_secs = task.duration_secs();
                task.wait().await?;
                Ok(PlayOutcome::Played {
                    duration_secs,
                    strategy,
                })
            }
            DecodeReport::AllFormatsFailed { attempts } => {
                Ok(PlayOutcome::AllFormatsFailed { attempts })
            }
        }
    }

    fn spawn<S: Send + 'static>(
        &self,
        asset: &AudioAsset,
        clip: DecodedClip,
        strategy: DecodeStrategy,
        staged: S,
    ) -> PlaybackTask {
        let duration_secs = clip.duration_secs();
        for adapter in &self.lip_sync {
            adapter.accept(&clip, &asset.text, duration_secs, &asset.word_timings);
        }

        tracing::info!(
            "Playing {:.2}s of audio ({}): \"{}\"",
            duration_secs,
            strategy,
            asset.text
        );

        let stop = Arc::new(AtomicBool::new(false));
        let output = self.output.clone();
        let task_stop = stop.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let result = output.play(&clip, &task_stop);
            drop(staged);
            result
        });

        PlaybackTask {
            handle: Some(handle),
            stop,
            duration_secs,
            strategy,
        }
    }
}
