//! Short-time energy envelope extractor (`§4.2`): best for ambient/dynamics
//! content where spectral shape matters less than level over time.

use crate::buffer::AudioBuffer;
use crate::config::Config;
use crate::errors::{is_cancelled, AlignError, AlignResult, CancelToken};
use crate::utils::amplitude_to_db;

use super::{
    check_minimum_length, FeatureExtractor, FeatureFrame, FeatureKind, FeatureSequence,
    CANCEL_CHECK_INTERVAL,
};

const FLOOR_DB: f64 = -120.0;

pub struct EnergyExtractor;

impl FeatureExtractor for EnergyExtractor {
    fn kind(&self) -> FeatureKind {
        FeatureKind::Energy
    }

    fn extract(
        &self,
        buffer: &AudioBuffer,
        cfg: &Config,
        cancel: Option<&CancelToken>,
    ) -> AlignResult<FeatureSequence> {
        check_minimum_length(buffer, self.kind())?;

        let samples = buffer.samples();
        let window = cfg.window_size;
        let hop = cfg.hop_size;
        if samples.len() < window {
            return Err(AlignError::InsufficientData(
                "energy: audio shorter than one analysis window".to_string(),
            ));
        }

        let mut raw_db = Vec::new();
        let mut start = 0;
        let mut frame_index = 0usize;
        while start + window <= samples.len() {
            if frame_index % CANCEL_CHECK_INTERVAL == 0 && is_cancelled(cancel) {
                return Err(AlignError::cancelled());
            }
            let frame = &samples[start..start + window];
            let rms = {
                let sum_sq: f64 = frame.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
                (sum_sq / frame.len() as f64).sqrt()
            };
            raw_db.push(amplitude_to_db(rms, FLOOR_DB));
            start += hop;
            frame_index += 1;
        }
        if raw_db.is_empty() {
            return Err(AlignError::ProcessingFailed(
                "energy: no frames produced".to_string(),
            ));
        }

        let smoothed = moving_average(&raw_db, cfg.smoothing_window_size.max(1));
        let normalized = min_max_normalize(&smoothed);

        let frames = normalized
            .into_iter()
            .enumerate()
            .map(|(frame_index, value)| FeatureFrame {
                kind: self.kind(),
                values: vec![value],
                frame_index,
                hop_samples: hop,
            })
            .collect();

        Ok(FeatureSequence {
            kind: self.kind(),
            frames,
            hop_samples: hop,
            source_sample_rate: buffer.sample_rate(),
        })
    }
}

fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let half = window / 2;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(n);
        let slice = &values[lo..hi];
        out.push(slice.iter().sum::<f64>() / slice.len() as f64);
    }
    out
}

fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    if span < 1e-12 {
        return values.iter().map(|_| 0.0).collect();
    }
    values.iter().map(|&v| (v - min) / span).collect()
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
    fn values_are_in_unit_range() {
        let buf = sine(440.0, 3.0, 44100);
        let cfg = Config::ambient();
        let seq = EnergyExtractor.extract(&buf, &cfg, None).unwrap();
        assert!(!seq.is_empty());
        for frame in &seq.frames {
            assert!((0.0..=1.0).contains(&frame.values[0]));
        }
    }

    #[test]
    fn rejects_too_short() {
        let buf = sine(440.0, 0.5, 44100);
        let cfg = Config::default();
        assert!(EnergyExtractor.extract(&buf, &cfg, None).is_err());
    }

    #[test]
    fn constant_signal_normalizes_to_zero() {
        let flat_db = vec![-20.0; 10];
        let normalized = min_max_normalize(&flat_db);
        assert!(normalized.iter().all(|&v| v == 0.0));
    }
}
