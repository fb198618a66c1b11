//! WAV encoding for uploads and the fixed-offset header parser
//!
//! Captured segments are uploaded as 16-bit mono PCM. The manual parser is
//! the last decode strategy: it trusts the canonical 44-byte RIFF layout and
//! converts the data chunk directly, which recovers files with header quirks
//! that structured readers reject.

use super::decode::DecodedClip;
use super::format::f32_to_i16;
use super::vad::SpeechSegment;
use crate::error::VoiceError;
use std::io::Cursor;

/// Size of the canonical RIFF/WAVE header
pub const CANONICAL_HEADER_LEN: usize = 44;

const CHANNELS_OFFSET: usize = 22;
const SAMPLE_RATE_OFFSET: usize = 24;
const BITS_PER_SAMPLE_OFFSET: usize = 34;

/// Encode pre-buffer plus captured samples as a 16-bit mono WAV file
pub fn encode_wav(segment: &SpeechSegment) -> Result<Vec<u8>, VoiceError> {
    encode_samples(&segment.contiguous_samples(), segment.sample_rate)
}

/// Encode mono f32 samples as a 16-bit WAV file in memory
pub fn encode_samples(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, VoiceError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(
        CANONICAL_HEADER_LEN + samples.len() * 2,
    ));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in f32_to_i16(samples) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    let bytes = cursor.into_inner();
    tracing::debug!(
        "Encoded {} samples at {}Hz into {} WAV bytes",
        samples.len(),
        sample_rate,
        bytes.len()
    );
    Ok(bytes)
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Parse a WAV file by reading its header at fixed offsets.
///
/// Supports 8-bit unsigned and 16/24/32-bit signed integer PCM. Anything
/// after byte 44 is treated as interleaved sample data.
pub fn parse_wav_manually(bytes: &[u8]) -> Result<DecodedClip, VoiceError> {
    if bytes.len() < CANONICAL_HEADER_LEN {
        return Err(VoiceError::Decode(format!(
            "{} bytes is too short for a WAV header",
            bytes.len()
        )));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(VoiceError::Decode("missing RIFF/WAVE signature".to_string()));
    }

    let channels = read_u16(bytes, CHANNELS_OFFSET);
    let sample_rate = read_u32(bytes, SAMPLE_RATE_OFFSET);
    let bits = read_u16(bytes, BITS_PER_SAMPLE_OFFSET);

    if channels == 0 || sample_rate == 0 {
        return Err(VoiceError::Decode(format!(
            "invalid header: {} channels at {}Hz",
            channels, sample_rate
        )));
    }

    let data = &bytes[CANONICAL_HEADER_LEN..];
    let samples: Vec<f32> = match bits {
        8 => data.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        16 => data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
        24 => data
            .chunks_exact(3)
            .map(|b| {
                // Sign-extend via the top byte of an i32
                let value = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                value as f32 / 8_388_608.0
            })
            .collect(),
        32 => data
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0)
            .collect(),
        other => {
            return Err(VoiceError::Decode(format!(
                "unsupported bit depth: {}",
                other
            )))
        }
    };

    if samples.is_empty() {
        return Err(VoiceError::Decode("WAV data chunk is empty".to_string()));
    }

    tracing::debug!(
        "Manual WAV parse: {}Hz, {}ch, {}-bit, {} samples",
        sample_rate,
        channels,
        bits,
        samples.len()
    );

    Ok(DecodedClip {
        samples,
        sample_rate,
        channels,
    })
}
