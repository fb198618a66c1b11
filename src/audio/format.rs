//! Sample format conversion
//!
//! Capture devices usually run at 44.1 or 48kHz with two channels; the
//! detector and the upload format want 16kHz mono. `AudioConverter` wraps a
//! rubato sinc resampler that consumes fixed-size chunks.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Resampler with built-in mono mixdown
pub struct AudioConverter {
    resampler: SincFixedIn<f32>,
    source_channels: usize,
    chunk_frames: usize,
}

impl AudioConverter {
    /// Create a converter that takes `chunk_frames` interleaved frames per call
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        source_channels: usize,
        chunk_frames: usize,
    ) -> Result<Self, rubato::ResamplerConstructionError> {
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };

        let resampler = SincFixedIn::new(
            target_rate as f64 / source_rate as f64,
            2.0,
            params,
            chunk_frames,
            1,
        )?;

        Ok(Self {
            resampler,
            source_channels: source_channels.max(1),
            chunk_frames,
        })
    }

    /// Interleaved samples consumed by one `process` call
    pub fn input_len(&self) -> usize {
        self.chunk_frames * self.source_channels
    }

    /// Mix `input` (exactly `input_len()` samples) to mono and resample it
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, rubato::ResampleError> {
        let mono = mix_to_mono(input, self.source_channels);
        let waves_out = self.resampler.process(&[mono], None)?;
        Ok(waves_out.into_iter().next().unwrap_or_default())
    }
}

/// Average interleaved frames down to one channel
pub fn mix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Convert f32 samples to i16 with clamping
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Mean absolute amplitude of a chunk.
///
/// Compared directly against the silence threshold, so tuning is linear.
pub fn mean_abs_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}
