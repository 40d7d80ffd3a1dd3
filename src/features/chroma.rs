//! 12-bin chroma extractor (`§4.2`): best for harmonic content.

use crate::buffer::AudioBuffer;
use crate::config::Config;
use crate::errors::{is_cancelled, AlignError, AlignResult, CancelToken};
use crate::utils::stft;

use super::{
    check_minimum_length, FeatureExtractor, FeatureFrame, FeatureKind, FeatureSequence,
    CANCEL_CHECK_INTERVAL,
};

const N_CHROMA: usize = 12;
/// Relative tolerance for "near an integer multiple" harmonic weighting.
const HARMONIC_TOLERANCE: f64 = 0.05;

pub struct ChromaExtractor;

impl FeatureExtractor for ChromaExtractor {
    fn kind(&self) -> FeatureKind {
        FeatureKind::Chroma
    }

    fn extract(
        &self,
        buffer: &AudioBuffer,
        cfg: &Config,
        cancel: Option<&CancelToken>,
    ) -> AlignResult<FeatureSequence> {
        check_minimum_length(buffer, self.kind())?;

        let spec = stft(buffer.samples(), cfg.window_size, cfg.hop_size);
        let n_bins = spec.shape()[0];
        let n_frames = spec.shape()[1];
        if n_frames == 0 {
            return Err(AlignError::ProcessingFailed(
                "chroma: STFT produced zero frames".to_string(),
            ));
        }

        let bin_hz = f64::from(buffer.sample_rate()) / cfg.window_size as f64;

        let mut frames = Vec::with_capacity(n_frames);
        for t in 0..n_frames {
            if t % CANCEL_CHECK_INTERVAL == 0 && is_cancelled(cancel) {
                return Err(AlignError::cancelled());
            }
            let mut chroma = vec![0.0f64; N_CHROMA];

            let mut k_max = 1;
            let mut max_mag = 0.0;
            for k in 1..n_bins {
                let m = spec[[k, t]];
                if m > max_mag {
                    max_mag = m;
                    k_max = k;
                }
            }
            let f0 = k_max as f64 * bin_hz;

            for k in 1..n_bins {
                let freq = k as f64 * bin_hz;
                let mut magnitude = spec[[k, t]];

                if cfg.use_harmonic_weighting && f0 > 0.0 {
                    let ratio = freq / f0;
                    let nearest = ratio.round();
                    if nearest >= 1.0 && (ratio - nearest).abs() / nearest < HARMONIC_TOLERANCE {
                        magnitude *= 1.5;
                    }
                }

                let pc = pitch_class(freq);
                chroma[pc] += magnitude;
            }

            crate::utils::l2_normalize(&mut chroma);
            frames.push(FeatureFrame {
                kind: self.kind(),
                values: chroma,
                frame_index: t,
                hop_samples: cfg.hop_size,
            });
        }

        Ok(FeatureSequence {
            kind: self.kind(),
            frames,
            hop_samples: cfg.hop_size,
            source_sample_rate: buffer.sample_rate(),
        })
    }
}

/// `round(12*log2(f/440)) mod 12`, per `§4.2`.
fn pitch_class(freq_hz: f64) -> usize {
    if freq_hz <= 0.0 {
        return 0;
    }
    let semitone = (12.0 * (freq_hz / 440.0).log2()).round() as i64;
    semitone.rem_euclid(12) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, duration_s: f64, sample_rate: u32) -> AudioBuffer {
        let n = (duration_s * f64::from(sample_rate)) as usize;
        let samples: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / f64::from(sample_rate)).sin() as f32 * 0.5)
            .collect();
        AudioBuffer::construct(samples, sample_rate).unwrap()
    }

    #[test]
    fn pitch_class_of_a440_is_zero() {
        assert_eq!(pitch_class(440.0), 0);
    }

    #[test]
    fn pitch_class_wraps_mod_12() {
        // one octave above A440 should also map to pitch class 0
        assert_eq!(pitch_class(880.0), 0);
    }

    #[test]
    fn frames_are_unit_norm() {
        let buf = sine(440.0, 5.0, 44100);
        let cfg = Config::music();
        let seq = ChromaExtractor.extract(&buf, &cfg, None).unwrap();
        assert!(!seq.is_empty());
        for frame in &seq.frames {
            let norm: f64 = frame.values.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6 || norm == 0.0);
        }
    }

    #[test]
    fn rejects_too_short() {
        let buf = sine(440.0, 1.0, 44100);
        let cfg = Config::default();
        assert!(ChromaExtractor.extract(&buf, &cfg, None).is_err());
    }
}
