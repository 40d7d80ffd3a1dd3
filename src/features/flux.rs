//! Spectral flux extractor (`§4.2`): best for transient-rich content.

use crate::buffer::AudioBuffer;
use crate::config::Config;
use crate::errors::{is_cancelled, AlignError, AlignResult, CancelToken};
use crate::utils::stft;

use super::{
    check_minimum_length, FeatureExtractor, FeatureFrame, FeatureKind, FeatureSequence,
    CANCEL_CHECK_INTERVAL,
};

const PRE_EMPHASIS_ALPHA: f64 = 0.97;

pub struct FluxExtractor;

impl FeatureExtractor for FluxExtractor {
    fn kind(&self) -> FeatureKind {
        FeatureKind::SpectralFlux
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
                "spectral flux: STFT produced zero frames".to_string(),
            ));
        }

        let mut raw = Vec::with_capacity(n_frames);
        let mut prev = vec![0.0f64; n_bins];
        for t in 0..n_frames {
            if t % CANCEL_CHECK_INTERVAL == 0 && is_cancelled(cancel) {
                return Err(AlignError::cancelled());
            }
            let mut flux = 0.0;
            for k in 0..n_bins {
                let m = spec[[k, t]];
                let emphasized = m - PRE_EMPHASIS_ALPHA * prev[k];
                flux += emphasized.max(0.0);
                prev[k] = m;
            }
            raw.push(flux);
        }

        let filtered = median_filter3(&raw);
        let mut rectified: Vec<f64> = filtered.into_iter().map(|v| v.max(0.0)).collect();
        crate::utils::l2_normalize(&mut rectified);

        let frames = rectified
            .into_iter()
            .enumerate()
            .map(|(frame_index, value)| FeatureFrame {
                kind: self.kind(),
                values: vec![value],
                frame_index,
                hop_samples: cfg.hop_size,
            })
            .collect();

        Ok(FeatureSequence {
            kind: self.kind(),
            frames,
            hop_samples: cfg.hop_size,
            source_sample_rate: buffer.sample_rate(),
        })
    }
}

/// Kernel-3 median filter with edge replication.
fn median_filter3(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 3 {
        return values.to_vec();
    }
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let a = values[i.saturating_sub(1)];
        let b = values[i];
        let c = values[(i + 1).min(n - 1)];
        out.push(median3(a, b, c));
    }
    out
}

fn median3(a: f64, b: f64, c: f64) -> f64 {
    a.max(b).min(a.min(b).max(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBuffer;

    fn sine(freq: f64, duration_s: f64, sample_rate: u32) -> AudioBuffer {
        let n = (duration_s * f64::from(sample_rate)) as usize;
        let samples: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / f64::from(sample_rate)).sin() as f32 * 0.5)
            .collect();
        AudioBuffer::construct(samples, sample_rate).unwrap()
    }

    #[test]
    fn extracts_unit_norm_sequence() {
        let buf = sine(440.0, 3.0, 44100);
        let cfg = Config::default();
        let seq = FluxExtractor.extract(&buf, &cfg, None).unwrap();
        assert!(!seq.is_empty());
        let norm: f64 = seq.frames.iter().map(|f| f.values[0].powi(2)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6 || norm == 0.0);
    }

    #[test]
    fn rejects_too_short() {
        let buf = sine(440.0, 0.5, 44100);
        let cfg = Config::default();
        assert!(FluxExtractor.extract(&buf, &cfg, None).is_err());
    }

    #[test]
    fn pre_cancelled_token_aborts_extraction() {
        let buf = sine(440.0, 3.0, 44100);
        let cfg = Config::default();
        let token: crate::errors::CancelToken =
            std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let result = FluxExtractor.extract(&buf, &cfg, Some(&token));
        assert!(matches!(result, Err(crate::errors::AlignError::InsufficientData(ref msg)) if msg == "cancelled"));
    }

    #[test]
    fn median3_matches_sort() {
        assert_eq!(median3(3.0, 1.0, 2.0), 2.0);
        assert_eq!(median3(1.0, 2.0, 3.0), 2.0);
        assert_eq!(median3(5.0, 5.0, 5.0), 5.0);
    }
}
