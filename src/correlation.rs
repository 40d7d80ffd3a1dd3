//! Cross-correlation of two same-kind feature sequences (`§4.3`).

use rayon::prelude::*;

use crate::config::Config;
use crate::errors::{is_cancelled, AlignError, AlignResult, CancelToken};
use crate::features::FeatureSequence;

/// Lags are scanned in chunks of this size so cancellation is checked at a
/// coarse, bounded granularity rather than only before/after the whole scan
/// (`§5`).
const CANCEL_CHECK_CHUNK: usize = 1024;

/// Ordered correlation values indexed by lag in frames, `lag ∈ [-lag_max, +lag_max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationSeries {
    pub values: Vec<f64>,
    pub lag_max: i64,
}

impl CorrelationSeries {
    #[must_use]
    pub fn value_at_lag(&self, lag: i64) -> f64 {
        self.values[(lag + self.lag_max) as usize]
    }

    #[must_use]
    pub fn lag_of_index(&self, index: usize) -> i64 {
        index as i64 - self.lag_max
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Computes the lag range `L_max` per `§4.3`: either the configured bound
/// (converted from samples to frames) or an auto-computed half-overlap bound.
#[must_use]
pub fn lag_max_frames(m: usize, n: usize, cfg: &Config) -> i64 {
    let shortest = m.min(n);
    if shortest == 0 {
        return 0;
    }
    if cfg.max_offset_samples == 0 {
        return (shortest as f64 * 0.5).floor() as i64;
    }
    let max_offset_frames = (cfg.max_offset_samples as usize / cfg.hop_size.max(1)) as i64;
    max_offset_frames.min(shortest as i64 - 1).max(0)
}

/// Normalized cross-correlation between `reference` and `target`, which must
/// share a [`crate::features::FeatureKind`] (not checked here; the caller
/// only ever correlates like-kind sequences).
pub fn correlate(
    reference: &FeatureSequence,
    target: &FeatureSequence,
    cfg: &Config,
    cancel: Option<&CancelToken>,
) -> AlignResult<CorrelationSeries> {
    let m = reference.len();
    let n = target.len();
    if m == 0 || n == 0 {
        return Err(AlignError::InsufficientData(
            "correlation: empty feature sequence".to_string(),
        ));
    }

    let lag_max = lag_max_frames(m, n, cfg);
    if lag_max == 0 && m.min(n) > 1 {
        return Err(AlignError::ProcessingFailed(
            "correlation: lag range collapsed to zero".to_string(),
        ));
    }

    let lags: Vec<i64> = (-lag_max..=lag_max).collect();
    let mut values = Vec::with_capacity(lags.len());
    for chunk in lags.chunks(CANCEL_CHECK_CHUNK) {
        if is_cancelled(cancel) {
            return Err(AlignError::cancelled());
        }
        let chunk_values: Vec<f64> = if reference.kind.is_vector() {
            chunk
                .par_iter()
                .map(|&lag| cosine_correlation_at_lag(reference, target, lag))
                .collect()
        } else {
            chunk
                .par_iter()
                .map(|&lag| scalar_correlation_at_lag(reference, target, lag))
                .collect()
        };
        values.extend(chunk_values);
    }

    if values.iter().any(|v| v.is_nan()) {
        return Err(AlignError::ProcessingFailed(
            "correlation: NaN produced during correlation".to_string(),
        ));
    }

    Ok(CorrelationSeries { values, lag_max })
}

/// `i` ranges over reference indices where `target[i - lag]` also exists.
fn overlap_range(m: usize, n: usize, lag: i64) -> (usize, usize) {
    let i_start = lag.max(0) as usize;
    let i_end = ((n as i64 + lag).min(m as i64)).max(0) as usize;
    (i_start, i_end.min(m))
}

fn scalar_correlation_at_lag(reference: &FeatureSequence, target: &FeatureSequence, lag: i64) -> f64 {
    let (start, end) = overlap_range(reference.len(), target.len(), lag);
    if end <= start {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut sum_r2 = 0.0;
    let mut sum_t2 = 0.0;
    for i in start..end {
        let j = (i as i64 - lag) as usize;
        let r = reference.scalar(i);
        let t = target.scalar(j);
        dot += r * t;
        sum_r2 += r * r;
        sum_t2 += t * t;
    }
    let denom = (sum_r2 * sum_t2).sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        dot / denom
    }
}

fn cosine_correlation_at_lag(reference: &FeatureSequence, target: &FeatureSequence, lag: i64) -> f64 {
    let (start, end) = overlap_range(reference.len(), target.len(), lag);
    if end <= start {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for i in start..end {
        let j = (i as i64 - lag) as usize;
        let r = reference.vector(i);
        let t = target.vector(j);
        sum += cosine_similarity(r, t);
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    let denom = norm_a * norm_b;
    if denom < 1e-12 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureFrame, FeatureKind};

    fn scalar_seq(kind: FeatureKind, values: &[f64]) -> FeatureSequence {
        FeatureSequence {
            kind,
            frames: values
                .iter()
                .enumerate()
                .map(|(i, &v)| FeatureFrame {
                    kind,
                    values: vec![v],
                    frame_index: i,
                    hop_samples: 256,
                })
                .collect(),
            hop_samples: 256,
            source_sample_rate: 44100,
        }
    }

    #[test]
    fn self_correlation_peaks_at_zero_lag() {
        let seq = scalar_seq(
            FeatureKind::SpectralFlux,
            &[0.1, 0.5, 0.9, 0.2, 0.7, 0.3, 0.6, 0.1, 0.4, 0.8],
        );
        let cfg = Config::default();
        let series = correlate(&seq, &seq, &cfg, None).unwrap();
        let best = (0..series.len())
            .max_by(|&a, &b| series.values[a].partial_cmp(&series.values[b]).unwrap())
            .unwrap();
        assert_eq!(series.lag_of_index(best), 0);
        assert!(series.value_at_lag(0) > 0.99);
    }

    #[test]
    fn shifted_sequence_peaks_at_shift() {
        let base = vec![0.1, 0.5, 0.9, 0.2, 0.7, 0.3, 0.6, 0.1, 0.4, 0.8, 0.2, 0.9];
        let reference = scalar_seq(FeatureKind::SpectralFlux, &base);
        let mut shifted = vec![0.0, 0.0];
        shifted.extend_from_slice(&base);
        let target = scalar_seq(FeatureKind::SpectralFlux, &shifted);

        let cfg = Config {
            max_offset_samples: 256 * 6,
            ..Config::default()
        };
        let series = correlate(&reference, &target, &cfg, None).unwrap();
        let best = (0..series.len())
            .max_by(|&a, &b| series.values[a].partial_cmp(&series.values[b]).unwrap())
            .unwrap();
        assert_eq!(series.lag_of_index(best), -2);
    }

    #[test]
    fn pre_cancelled_token_aborts_before_scanning() {
        let seq = scalar_seq(FeatureKind::SpectralFlux, &[0.1, 0.5, 0.9, 0.2, 0.7]);
        let cfg = Config::default();
        let token: CancelToken = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let result = correlate(&seq, &seq, &cfg, Some(&token));
        assert!(matches!(result, Err(AlignError::InsufficientData(ref msg)) if msg == "cancelled"));
    }
}
