//! Response audio decoding with a format fallback chain
//!
//! The backend does not say what container it sends, so each configured
//! format is tried in priority order. A format is only handed to symphonia
//! when the bytes carry its signature; the staged file then goes through the
//! probe with a matching extension hint. When every structured attempt fails
//! the fixed-offset WAV parser gets a last try.

use super::staging::{StagedFile, StagingArea};
use super::wav::parse_wav_manually;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Container formats the decoder knows how to try
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Mp3,
    Wav,
    Ogg,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
        }
    }

    /// Whether `bytes` start with this format's signature
    pub fn matches_signature(&self, bytes: &[u8]) -> bool {
        match self {
            AudioFormat::Mp3 => {
                bytes.starts_with(b"ID3")
                    || (bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0)
            }
            AudioFormat::Wav => {
                bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
            }
            AudioFormat::Ogg => bytes.starts_with(b"OggS"),
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// PCM audio ready for the output device
#[derive(Debug, Clone)]
pub struct DecodedClip {
    /// Interleaved samples in [-1, 1]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedClip {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// One rung of the fallback ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    Format(AudioFormat),
    ManualWav,
}

impl fmt::Display for DecodeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeStrategy::Format(format) => write!(f, "{}", format),
            DecodeStrategy::ManualWav => f.write_str("manual wav"),
        }
    }
}

/// Record of a single decode attempt
#[derive(Debug, Clone)]
pub struct DecodeAttempt {
    pub strategy: DecodeStrategy,
    /// `None` when the attempt succeeded
    pub error: Option<String>,
}

/// Result of running the whole chain
#[derive(Debug)]
pub enum DecodeReport {
    Decoded {
        clip: DecodedClip,
        strategy: DecodeStrategy,
        /// Backing file, kept alive until playback finishes
        staged: Option<StagedFile>,
        attempts: Vec<DecodeAttempt>,
    },
    AllFormatsFailed {
        attempts: Vec<DecodeAttempt>,
    },
}

impl DecodeReport {
    pub fn attempts(&self) -> &[DecodeAttempt] {
        match self {
            DecodeReport::Decoded { attempts, .. } => attempts,
            DecodeReport::AllFormatsFailed { attempts } => attempts,
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self, DecodeReport::Decoded { .. })
    }
}

/// Fallback decoder over a fixed priority list
#[derive(Debug, Clone)]
pub struct Decoder {
    priority: Vec<AudioFormat>,
    manual_wav_fallback: bool,
    staging: StagingArea,
}

impl Decoder {
    pub fn new(priority: Vec<AudioFormat>, manual_wav_fallback: bool, staging: StagingArea) -> Self {
        Self {
            priority,
            manual_wav_fallback,
            staging,
        }
    }

    pub fn priority(&self) -> &[AudioFormat] {
        &self.priority
    }

    /// Try every configured format in order, then the manual parser
    pub fn decode(&self, bytes: &[u8]) -> DecodeReport {
        let mut attempts = Vec::with_capacity(self.priority.len() + 1);

        for &format in &self.priority {
            let strategy = DecodeStrategy::Format(format);
            match self.try_format(bytes, format) {
                Ok((clip, staged)) => {
                    attempts.push(DecodeAttempt {
                        strategy,
                        error: None,
                    });
                    tracing::info!(
                        "Decoded {} bytes as {}: {:.2}s at {}Hz, {}ch",
                        bytes.len(),
                        format,
                        clip.duration_secs(),
                        clip.sample_rate,
                        clip.channels
                    );
                    return DecodeReport::Decoded {
                        clip,
                        strategy,
                        staged: Some(staged),
                        attempts,
                    };
                }
                Err(error) => {
                    tracing::debug!("Decode as {} failed: {}", format, error);
                    attempts.push(DecodeAttempt {
                        strategy,
                        error: Some(error),
                    });
                }
            }
        }

        if self.manual_wav_fallback {
            match parse_wav_manually(bytes) {
                Ok(clip) => {
                    tracing::warn!("Structured decoders failed, recovered audio by manual WAV parse");
                    attempts.push(DecodeAttempt {
                        strategy: DecodeStrategy::ManualWav,
                        error: None,
                    });
                    return DecodeReport::Decoded {
                        clip,
                        strategy: DecodeStrategy::ManualWav,
                        staged: None,
                        attempts,
                    };
                }
                Err(e) => attempts.push(DecodeAttempt {
                    strategy: DecodeStrategy::ManualWav,
                    error: Some(e.to_string()),
                }),
            }
        }

        tracing::error!(
            "All decode attempts failed for {} bytes: [{}]",
            bytes.len(),
            attempts
                .iter()
                .map(|a| format!("{}: {}", a.strategy, a.error.as_deref().unwrap_or("ok")))
                .collect::<Vec<_>>()
                .join("; ")
        );
        DecodeReport::AllFormatsFailed { attempts }
    }

    fn try_format(
        &self,
        bytes: &[u8],
        format: AudioFormat,
    ) -> Result<(DecodedClip, StagedFile), String> {
        if !format.matches_signature(bytes) {
            return Err(format!("no {} signature", format));
        }
        // A failed attempt drops its staged file here
        let staged = self
            .staging
            .stage(bytes, format.extension())
            .map_err(|e| format!("staging failed: {}", e))?;
        let clip = decode_file(staged.path(), format)?;
        Ok((clip, staged))
    }
}

/// Decode a whole file to interleaved f32 with symphonia
fn decode_file(path: &Path, format: AudioFormat) -> Result<DecodedClip, String> {
    let file = std::fs::File::open(path).map_err(|e| format!("Failed to open staged audio: {}", e))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format.extension());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| format!("Unsupported audio format: {}", e))?;

    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| "No supported audio track found".to_string())?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut sample_rate = codec_params.sample_rate;
    let mut channels = codec_params.channels.map(|c| c.count() as u16);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| format!("Unsupported audio codec: {}", e))?;

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(format!("Error reading audio: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(format!("Decode error: {}", e)),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count() as u16);
        let num_frames = decoded.capacity();

        let sbuf =
            sample_buf.get_or_insert_with(|| SampleBuffer::<f32>::new(num_frames as u64, spec));
        if sbuf.capacity() < num_frames {
            *sbuf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        }

        sbuf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sbuf.samples());
    }

    let sample_rate = sample_rate.ok_or_else(|| "Cannot determine sample rate".to_string())?;
    if samples.is_empty() {
        return Err("No audio frames decoded".to_string());
    }

    Ok(DecodedClip {
        samples,
        sample_rate,
        channels: channels.unwrap_or(1).max(1),
    })
}
