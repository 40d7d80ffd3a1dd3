//! PCM buffer and preprocessing (`§4.1`).

use crate::config::Config;
use crate::errors::{AlignError, AlignResult};

/// Mono float PCM, immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Rejects empty, non-finite, or zero/negative-sample-rate input.
    pub fn construct(samples: Vec<f32>, sample_rate: u32) -> AlignResult<Self> {
        if samples.is_empty() {
            return Err(AlignError::InvalidInput("samples are empty".to_string()));
        }
        if sample_rate == 0 {
            return Err(AlignError::InvalidInput(
                "sample_rate must be positive".to_string(),
            ));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(AlignError::InvalidInput(
                "samples contain NaN or infinite values".to_string(),
            ));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn duration_s(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Applies DC-block high-pass, peak normalization, and a 50ms-window
    /// noise gate, in that order. Output length equals input length.
    #[must_use]
    pub fn preprocess(&self, cfg: &Config) -> Self {
        let mut samples = self.samples.clone();

        dc_block(&mut samples);
        peak_normalize(&mut samples);
        noise_gate(&mut samples, self.sample_rate, cfg.noise_gate_db);

        Self {
            samples,
            sample_rate: self.sample_rate,
        }
    }

    /// `true` once preprocessed and every sample magnitude is below the
    /// "effectively silent" threshold used to trigger `InsufficientData`.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| s.abs() < 1e-6)
    }
}

/// First-order DC-blocking high-pass, cutoff ≈ 20 Hz at typical audio rates:
/// `y[n] = x[n] - x[n-1] + r*y[n-1]`, `r` close to 1.
fn dc_block(samples: &mut [f32]) {
    const R: f32 = 0.995;
    let mut prev_x = 0.0f32;
    let mut prev_y = 0.0f32;
    for s in samples.iter_mut() {
        let x = *s;
        let y = x - prev_x + R * prev_y;
        prev_x = x;
        prev_y = y;
        *s = y;
    }
}

/// Scales so that `max(|x|) == 1`. Skipped (left untouched) when the signal
/// is already effectively silent, per `§4.1`.
fn peak_normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    if peak < 1e-6 {
        return;
    }
    let scale = 1.0 / peak;
    for s in samples.iter_mut() {
        *s *= scale;
    }
}

/// Zeroes 50ms frames whose RMS in dB falls below `noise_gate_db`.
fn noise_gate(samples: &mut [f32], sample_rate: u32, noise_gate_db: f64) {
    let frame_len = ((f64::from(sample_rate) * 0.05) as usize).max(1);
    for frame in samples.chunks_mut(frame_len) {
        let rms = {
            let sum_sq: f64 = frame.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
            (sum_sq / frame.len() as f64).sqrt()
        };
        let rms_db = crate::utils::amplitude_to_db(rms, -240.0);
        if rms_db < noise_gate_db {
            for s in frame.iter_mut() {
                *s = 0.0;
            }
        }
    }
}
