//! Energy-based voice activity detection with pre-speech buffering
//!
//! Each fixed-size chunk is scored by its mean absolute amplitude and compared
//! directly against `silence_threshold`. There is no decibel conversion, so
//! threshold tuning is linear in amplitude.
//!
//! Timing is counted in samples and converted with the sample rate, so every
//! limit is a duration of captured audio rather than a number of chunks. For a
//! live device this tracks wall-clock time.
//!
//! ```text
//!            energy > T                        silence >= S or length >= max
//! AwaitingOnset ──────────► TrackingSilence ─────────────────────────────────► Segment
//!      │
//!      │ waited >= max_wait (hands-free only)
//!      ▼
//! NoSpeechDetected
//! ```

use super::capture::AudioInput;
use super::format::mean_abs_energy;
use crate::config::ListeningConfig;
use crate::error::VoiceError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// How the end of a capture is decided
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureMode {
    /// Stop after sustained silence following speech onset
    Dynamic,
    /// Record for a fixed length regardless of energy
    Fixed { seconds: f32 },
}

/// Configuration for the detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Rate requested from the capture device
    pub sample_rate: u32,
    /// Samples per analysis chunk
    pub chunk_size: usize,
    /// Mean absolute amplitude separating speech from silence
    pub silence_threshold: f32,
    /// Accumulated silence after onset that ends the recording
    pub silence_time_to_stop_secs: f32,
    /// Hard cap on recording length after onset
    pub max_recording_secs: f32,
    /// Give up waiting for onset after this long (None waits indefinitely)
    pub max_wait_secs: Option<f32>,
    /// Length of the rolling pre-speech buffer
    pub pre_buffer_secs: f32,
    /// Dynamic or fixed-length capture
    pub mode: CaptureMode,
    /// Log every chunk's energy at debug level
    pub debug_audio_levels: bool,
    /// Sleep between reads when the device has nothing buffered
    pub idle_poll: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self::from(&ListeningConfig::default())
    }
}

impl From<&ListeningConfig> for VadConfig {
    fn from(listening: &ListeningConfig) -> Self {
        Self {
            sample_rate: listening.sample_rate,
            chunk_size: listening.chunk_size,
            silence_threshold: listening.silence_threshold,
            silence_time_to_stop_secs: listening.silence_time_to_stop_secs,
            max_recording_secs: listening.max_recording_secs,
            // The onset deadline only applies to the hands-free loop
            max_wait_secs: listening
                .use_automatic_listening
                .then_some(listening.max_wait_secs),
            pre_buffer_secs: listening.pre_buffer_secs,
            mode: if listening.use_dynamic_listening {
                CaptureMode::Dynamic
            } else {
                CaptureMode::Fixed {
                    seconds: listening.fixed_recording_secs,
                }
            },
            debug_audio_levels: listening.debug_audio_levels,
            idle_poll: Duration::from_millis(10),
        }
    }
}

/// Why a recording stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Silence lasted `silence_time_to_stop`
    Silence,
    /// The recording reached `max_recording`
    MaxDuration,
    /// A fixed-length capture completed
    FixedDuration,
}

/// A finished, endpointed recording
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// Samples from onset to the stop point
    pub samples: Vec<f32>,
    /// Samples captured just before onset
    pub pre_buffer_samples: Vec<f32>,
    /// Rate of both sample sequences
    pub sample_rate: u32,
    /// Seconds from onset to the stop point
    pub duration_seconds: f64,
    pub stop_reason: StopReason,
}

impl SpeechSegment {
    /// Pre-buffer followed by the captured samples, as uploaded
    pub fn contiguous_samples(&self) -> Vec<f32> {
        let mut all = Vec::with_capacity(self.pre_buffer_samples.len() + self.samples.len());
        all.extend_from_slice(&self.pre_buffer_samples);
        all.extend_from_slice(&self.samples);
        all
    }
}

/// Result of one listening pass
#[derive(Debug, Clone)]
pub enum ListenOutcome {
    Segment(SpeechSegment),
    NoSpeechDetected,
}

/// Boundary notifications raised while listening
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadEvent {
    /// First chunk above threshold
    SpeechStart {
        /// Seconds spent waiting before onset
        waited_secs: f64,
    },
    /// Capture stopped with a segment
    SpeechEnd {
        duration_secs: f64,
        reason: StopReason,
    },
}

/// Phase of the endpoint tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadPhase {
    AwaitingOnset,
    TrackingSilence,
}

/// What the caller should do after feeding a chunk
#[derive(Debug)]
pub enum ChunkVerdict {
    Continue,
    Onset,
    Finished(ListenOutcome),
}

/// Chunk-driven endpointing state, independent of any device
pub struct EndpointTracker {
    threshold: f32,
    mode: CaptureMode,
    sample_rate: u32,
    debug_levels: bool,
    phase: VadPhase,
    pre_buffer: VecDeque<f32>,
    pre_buffer_capacity: usize,
    captured: Vec<f32>,
    waited_samples: u64,
    silence_samples: u64,
    stop_silence_samples: u64,
    max_recording_samples: u64,
    max_wait_samples: Option<u64>,
    fixed_samples: u64,
    heard_speech: bool,
}

fn secs_to_samples(secs: f32, rate: u32) -> u64 {
    (secs.max(0.0) as f64 * rate as f64).round() as u64
}

impl EndpointTracker {
    pub fn new(config: &VadConfig, sample_rate: u32) -> Self {
        let pre_buffer_capacity = secs_to_samples(config.pre_buffer_secs, sample_rate) as usize;
        let fixed_samples = match config.mode {
            CaptureMode::Fixed { seconds } => secs_to_samples(seconds, sample_rate),
            CaptureMode::Dynamic => 0,
        };

        Self {
            threshold: config.silence_threshold,
            mode: config.mode,
            sample_rate,
            debug_levels: config.debug_audio_levels,
            phase: VadPhase::AwaitingOnset,
            pre_buffer: VecDeque::with_capacity(pre_buffer_capacity),
            pre_buffer_capacity,
            captured: Vec::new(),
            waited_samples: 0,
            silence_samples: 0,
            stop_silence_samples: secs_to_samples(config.silence_time_to_stop_secs, sample_rate)
                .max(1),
            max_recording_samples: secs_to_samples(config.max_recording_secs, sample_rate).max(1),
            max_wait_samples: config
                .max_wait_secs
                .map(|secs| secs_to_samples(secs, sample_rate)),
            fixed_samples,
            heard_speech: false,
        }
    }

    pub fn phase(&self) -> VadPhase {
        self.phase
    }

    fn secs(&self, samples: u64) -> f64 {
        samples as f64 / self.sample_rate as f64
    }

    /// Feed one chunk and advance the state machine
    pub fn process_chunk(&mut self, chunk: &[f32]) -> ChunkVerdict {
        let energy = mean_abs_energy(chunk);
        let is_speech = energy > self.threshold;

        if self.debug_levels {
            tracing::debug!(
                "VAD level: energy={:.5} threshold={:.5} phase={:?} speech={}",
                energy,
                self.threshold,
                self.phase,
                is_speech
            );
        }

        match self.mode {
            CaptureMode::Dynamic => self.process_dynamic(chunk, is_speech),
            CaptureMode::Fixed { .. } => self.process_fixed(chunk, is_speech),
        }
    }

    fn process_dynamic(&mut self, chunk: &[f32], is_speech: bool) -> ChunkVerdict {
        match self.phase {
            VadPhase::AwaitingOnset if is_speech => {
                self.phase = VadPhase::TrackingSilence;
                self.heard_speech = true;
                self.silence_samples = 0;
                tracing::debug!(
                    "Speech onset after {:.2}s ({} pre-buffer samples)",
                    self.secs(self.waited_samples),
                    self.pre_buffer.len()
                );
                match self.capture(chunk, false) {
                    Some(outcome) => ChunkVerdict::Finished(outcome),
                    None => ChunkVerdict::Onset,
                }
            }
            VadPhase::AwaitingOnset => {
                self.push_pre_buffer(chunk);
                self.waited_samples += chunk.len() as u64;
                match self.max_wait_samples {
                    Some(limit) if self.waited_samples >= limit => {
                        tracing::info!(
                            "No speech within {:.1}s, abandoning capture",
                            self.secs(self.waited_samples)
                        );
                        ChunkVerdict::Finished(ListenOutcome::NoSpeechDetected)
                    }
                    _ => ChunkVerdict::Continue,
                }
            }
            VadPhase::TrackingSilence => match self.capture(chunk, !is_speech) {
                Some(outcome) => ChunkVerdict::Finished(outcome),
                None => ChunkVerdict::Continue,
            },
        }
    }

    /// Append a post-onset chunk, trimming it at whichever deadline it crosses
    fn capture(&mut self, chunk: &[f32], silent: bool) -> Option<ListenOutcome> {
        let len = chunk.len() as u64;
        let recorded = self.captured.len() as u64;

        let until_max = self.max_recording_samples.saturating_sub(recorded);
        let until_silence = if silent {
            self.stop_silence_samples.saturating_sub(self.silence_samples)
        } else {
            u64::MAX
        };

        if until_silence <= len && until_silence <= until_max {
            self.captured.extend_from_slice(&chunk[..until_silence as usize]);
            return Some(self.finish(StopReason::Silence));
        }
        if until_max <= len {
            self.captured.extend_from_slice(&chunk[..until_max as usize]);
            return Some(self.finish(StopReason::MaxDuration));
        }

        self.captured.extend_from_slice(chunk);
        if silent {
            self.silence_samples += len;
        } else {
            self.silence_samples = 0;
        }
        None
    }

    fn process_fixed(&mut self, chunk: &[f32], is_speech: bool) -> ChunkVerdict {
        let remaining = self
            .fixed_samples
            .saturating_sub(self.captured.len() as u64) as usize;
        let take = remaining.min(chunk.len());
        self.captured.extend_from_slice(&chunk[..take]);

        let onset = is_speech && !self.heard_speech;
        if is_speech {
            self.heard_speech = true;
            self.phase = VadPhase::TrackingSilence;
        }

        if self.captured.len() as u64 >= self.fixed_samples {
            if self.heard_speech {
                return ChunkVerdict::Finished(self.finish(StopReason::FixedDuration));
            }
            tracing::info!("Fixed capture contained no speech, discarding");
            return ChunkVerdict::Finished(ListenOutcome::NoSpeechDetected);
        }

        if onset {
            ChunkVerdict::Onset
        } else {
            ChunkVerdict::Continue
        }
    }

    fn push_pre_buffer(&mut self, chunk: &[f32]) {
        if self.pre_buffer_capacity == 0 {
            return;
        }
        self.pre_buffer.extend(chunk.iter().copied());
        let excess = self.pre_buffer.len().saturating_sub(self.pre_buffer_capacity);
        self.pre_buffer.drain(..excess);
    }

    fn finish(&mut self, reason: StopReason) -> ListenOutcome {
        let samples = std::mem::take(&mut self.captured);
        let pre_buffer_samples: Vec<f32> = self.pre_buffer.drain(..).collect();
        let duration_seconds = self.secs(samples.len() as u64);

        tracing::info!(
            "Speech segment complete: {:.2}s (+{:.2}s pre-buffer), stopped by {:?}",
            duration_seconds,
            self.secs(pre_buffer_samples.len() as u64),
            reason
        );

        ListenOutcome::Segment(SpeechSegment {
            samples,
            pre_buffer_samples,
            sample_rate: self.sample_rate,
            duration_seconds,
            stop_reason: reason,
        })
    }
}

/// Voice activity detector driving a capture device
pub struct VoiceActivityDetector {
    config: VadConfig,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Claim the microphone and listen until a segment ends or onset times out.
    ///
    /// The device is released when this future completes or is dropped, so
    /// cancelling a listen is just dropping it.
    pub async fn listen(
        &mut self,
        input: &dyn AudioInput,
        on_event: &mut (dyn FnMut(VadEvent) + Send),
    ) -> Result<ListenOutcome, VoiceError> {
        let chunk_size = self.config.chunk_size.max(1);
        let mut stream = input.open(self.config.sample_rate)?;
        let mut tracker = EndpointTracker::new(&self.config, stream.sample_rate());
        let mut chunk = vec![0.0f32; chunk_size];
        let mut filled = 0usize;
        let mut onset_reported = false;

        tracing::debug!(
            "Listening: chunk={} threshold={} mode={:?}",
            chunk_size,
            self.config.silence_threshold,
            self.config.mode
        );

        loop {
            let read = stream.read(&mut chunk[filled..])?;
            if read == 0 {
                tokio::time::sleep(self.config.idle_poll).await;
                continue;
            }

            filled += read;
            if filled < chunk_size {
                continue;
            }
            filled = 0;

            match tracker.process_chunk(&chunk) {
                ChunkVerdict::Continue => {}
                ChunkVerdict::Onset => {
                    onset_reported = true;
                    on_event(VadEvent::SpeechStart {
                        waited_secs: tracker.secs(tracker.waited_samples),
                    });
                }
                ChunkVerdict::Finished(outcome) => {
                    if let ListenOutcome::Segment(ref segment) = outcome {
                        // A segment can finish on its onset chunk
                        if !onset_reported {
                            on_event(VadEvent::SpeechStart {
                                waited_secs: tracker.secs(tracker.waited_samples),
                            });
                        }
                        on_event(VadEvent::SpeechEnd {
                            duration_secs: segment.duration_seconds,
                            reason: segment.stop_reason,
                        });
                    }
                    return Ok(outcome);
                }
            }

            // Let pause/speak commands interleave with a busy device
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::InputStream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const RATE: u32 = 16000;
    const CHUNK: usize = 1024;

    fn config(threshold: f32, stop_secs: f32) -> VadConfig {
        VadConfig {
            sample_rate: RATE,
            chunk_size: CHUNK,
            silence_threshold: threshold,
            silence_time_to_stop_secs: stop_secs,
            max_recording_secs: 30.0,
            max_wait_secs: Some(10.0),
            pre_buffer_secs: 0.5,
            mode: CaptureMode::Dynamic,
            debug_audio_levels: false,
            idle_poll: Duration::from_millis(10),
        }
    }

    /// Constant-amplitude speech followed by digital silence
    fn trace(speech_secs: f32, silence_secs: f32, amplitude: f32) -> Vec<f32> {
        let speech = (speech_secs * RATE as f32) as usize;
        let silence = (silence_secs * RATE as f32) as usize;
        let mut samples: Vec<f32> = (0..speech)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect();
        samples.extend(std::iter::repeat(0.0).take(silence));
        samples
    }

    fn run_tracker(tracker: &mut EndpointTracker, samples: &[f32]) -> (usize, Option<ListenOutcome>) {
        let mut onsets = 0;
        for chunk in samples.chunks(CHUNK) {
            match tracker.process_chunk(chunk) {
                ChunkVerdict::Continue => {}
                ChunkVerdict::Onset => onsets += 1,
                ChunkVerdict::Finished(outcome) => return (onsets, Some(outcome)),
            }
        }
        (onsets, None)
    }

    #[test]
    fn test_silence_timeout_emits_one_segment() {
        let cfg = config(0.005, 5.0);
        let mut tracker = EndpointTracker::new(&cfg, RATE);
        let (onsets, outcome) = run_tracker(&mut tracker, &trace(2.0, 10.0, 0.1));

        assert_eq!(onsets, 1);
        let chunk_secs = CHUNK as f64 / RATE as f64;
        match outcome {
            Some(ListenOutcome::Segment(segment)) => {
                assert!(
                    (segment.duration_seconds - 7.0).abs() <= chunk_secs,
                    "Expected ~7.0s, got {}",
                    segment.duration_seconds
                );
                assert_eq!(segment.stop_reason, StopReason::Silence);
            }
            other => panic!("expected a segment, got {:?}", other),
        }
    }

    #[test]
    fn test_duration_tracks_thresholds() {
        for (threshold, stop) in [(0.01f32, 1.0f32), (0.05, 2.5), (0.002, 0.5)] {
            let cfg = config(threshold, stop);
            let mut tracker = EndpointTracker::new(&cfg, RATE);
            let (_, outcome) = run_tracker(&mut tracker, &trace(1.0, stop + 2.0, threshold * 4.0));

            let Some(ListenOutcome::Segment(segment)) = outcome else {
                panic!("expected a segment for threshold {}", threshold);
            };
            let chunk_secs = CHUNK as f64 / RATE as f64;
            let expected = 1.0 + stop as f64;
            assert!(
                (segment.duration_seconds - expected).abs() <= chunk_secs,
                "threshold {} stop {}: expected ~{}, got {}",
                threshold,
                stop,
                expected,
                segment.duration_seconds
            );
        }
    }

    #[test]
    fn test_no_onset_reports_no_speech() {
        let cfg = config(0.005, 5.0);
        let mut tracker = EndpointTracker::new(&cfg, RATE);
        let quiet = vec![0.001f32; RATE as usize * 12];
        let (onsets, outcome) = run_tracker(&mut tracker, &quiet);

        assert_eq!(onsets, 0);
        assert!(matches!(outcome, Some(ListenOutcome::NoSpeechDetected)));
    }

    #[test]
    fn test_manual_mode_waits_past_max_wait() {
        let mut cfg = config(0.005, 5.0);
        cfg.max_wait_secs = None;
        let mut tracker = EndpointTracker::new(&cfg, RATE);
        let quiet = vec![0.0f32; RATE as usize * 20];
        let (_, outcome) = run_tracker(&mut tracker, &quiet);

        assert!(outcome.is_none());
        assert_eq!(tracker.phase(), VadPhase::AwaitingOnset);
    }

    #[test]
    fn test_speech_resets_silence_accumulator() {
        let cfg = config(0.005, 1.0);
        let mut tracker = EndpointTracker::new(&cfg, RATE);
        let mut samples = trace(0.5, 0.8, 0.1);
        samples.extend(trace(0.5, 3.0, 0.1));
        let (onsets, outcome) = run_tracker(&mut tracker, &samples);

        assert_eq!(onsets, 1);
        let Some(ListenOutcome::Segment(segment)) = outcome else {
            panic!("expected a segment");
        };
        // 0.5 speech + 0.8 pause + 0.5 speech + 1.0 silence
        assert!((segment.duration_seconds - 2.8).abs() <= 2.0 * CHUNK as f64 / RATE as f64);
    }

    #[test]
    fn test_pre_buffer_is_bounded_and_prepended() {
        let cfg = config(0.005, 0.5);
        let mut tracker = EndpointTracker::new(&cfg, RATE);
        let mut samples = vec![0.001f32; RATE as usize * 2];
        samples.extend(trace(0.5, 1.0, 0.2));
        let (_, outcome) = run_tracker(&mut tracker, &samples);

        let Some(ListenOutcome::Segment(segment)) = outcome else {
            panic!("expected a segment");
        };
        assert_eq!(segment.pre_buffer_samples.len(), RATE as usize / 2);
        let all = segment.contiguous_samples();
        assert_eq!(
            all.len(),
            segment.pre_buffer_samples.len() + segment.samples.len()
        );
        assert!((all[0] - 0.001).abs() < 1e-6);
    }

    #[test]
    fn test_max_recording_caps_segment() {
        let mut cfg = config(0.005, 5.0);
        cfg.max_recording_secs = 3.0;
        let mut tracker = EndpointTracker::new(&cfg, RATE);
        let (_, outcome) = run_tracker(&mut tracker, &trace(10.0, 0.0, 0.1));

        let Some(ListenOutcome::Segment(segment)) = outcome else {
            panic!("expected a segment");
        };
        assert_eq!(segment.stop_reason, StopReason::MaxDuration);
        assert!((segment.duration_seconds - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_fixed_mode_records_fixed_length() {
        let mut cfg = config(0.005, 5.0);
        cfg.mode = CaptureMode::Fixed { seconds: 5.0 };
        let mut tracker = EndpointTracker::new(&cfg, RATE);
        let (onsets, outcome) = run_tracker(&mut tracker, &trace(1.0, 10.0, 0.1));

        assert_eq!(onsets, 1);
        let Some(ListenOutcome::Segment(segment)) = outcome else {
            panic!("expected a segment");
        };
        assert_eq!(segment.stop_reason, StopReason::FixedDuration);
        assert!((segment.duration_seconds - 5.0).abs() < 1e-9);
        assert!(segment.pre_buffer_samples.is_empty());
    }

    #[test]
    fn test_fixed_mode_without_speech_is_discarded() {
        let mut cfg = config(0.005, 5.0);
        cfg.mode = CaptureMode::Fixed { seconds: 2.0 };
        let mut tracker = EndpointTracker::new(&cfg, RATE);
        let (_, outcome) = run_tracker(&mut tracker, &vec![0.0; RATE as usize * 3]);

        assert!(matches!(outcome, Some(ListenOutcome::NoSpeechDetected)));
    }

    #[test]
    fn test_config_from_listening_manual_mode() {
        let listening = ListeningConfig {
            use_automatic_listening: false,
            use_dynamic_listening: false,
            fixed_recording_secs: 4.0,
            ..Default::default()
        };
        let cfg = VadConfig::from(&listening);
        assert!(cfg.max_wait_secs.is_none());
        assert_eq!(cfg.mode, CaptureMode::Fixed { seconds: 4.0 });
    }

    struct ScriptedStream {
        samples: Vec<f32>,
        position: usize,
        claimed: Arc<AtomicBool>,
    }

    impl InputStream for ScriptedStream {
        fn sample_rate(&self) -> u32 {
            RATE
        }

        fn read(&mut self, out: &mut [f32]) -> Result<usize, VoiceError> {
            // Past the script the room is silent
            for slot in out.iter_mut() {
                *slot = self.samples.get(self.position).copied().unwrap_or(0.0);
                self.position += 1;
            }
            Ok(out.len())
        }
    }

    impl Drop for ScriptedStream {
        fn drop(&mut self) {
            self.claimed.store(false, Ordering::SeqCst);
        }
    }

    struct ScriptedInput {
        samples: Vec<f32>,
        claimed: Arc<AtomicBool>,
    }

    impl AudioInput for ScriptedInput {
        fn open(&self, _sample_rate: u32) -> Result<Box<dyn InputStream>, VoiceError> {
            self.claimed.store(true, Ordering::SeqCst);
            Ok(Box::new(ScriptedStream {
                samples: self.samples.clone(),
                position: 0,
                claimed: self.claimed.clone(),
            }))
        }
    }

    struct NoDevice;

    impl AudioInput for NoDevice {
        fn open(&self, _sample_rate: u32) -> Result<Box<dyn InputStream>, VoiceError> {
            Err(VoiceError::DeviceUnavailable("no input device present".to_string()))
        }
    }

    #[tokio::test]
    async fn test_listen_emits_events_and_releases_device() {
        let claimed = Arc::new(AtomicBool::new(false));
        let input = ScriptedInput {
            samples: trace(2.0, 0.0, 0.1),
            claimed: claimed.clone(),
        };
        let mut vad = VoiceActivityDetector::new(config(0.005, 5.0));
        let mut events = Vec::new();

        let outcome = vad
            .listen(&input, &mut |event| events.push(event))
            .await
            .unwrap();

        assert!(matches!(outcome, ListenOutcome::Segment(_)));
        assert!(matches!(events[0], VadEvent::SpeechStart { .. }));
        assert!(matches!(
            events.last(),
            Some(VadEvent::SpeechEnd {
                reason: StopReason::Silence,
                ..
            })
        ));
        assert!(!claimed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_listen_without_device_fails_immediately() {
        let mut vad = VoiceActivityDetector::new(config(0.005, 5.0));
        let mut events = Vec::new();
        let result = vad.listen(&NoDevice, &mut |event| events.push(event)).await;

        assert!(matches!(result, Err(VoiceError::DeviceUnavailable(_))));
        assert!(events.is_empty());
    }
}
