//! Peak selection and confidence scoring (`§4.4`).
//!
//! Sign convention: [`CorrelationSeries`] is indexed by a lag `ℓ` satisfying
//! `C(ℓ) = Σ R[i]·T[i-ℓ]` (`§4.3`); a target produced by delaying the
//! reference by `k` frames peaks at `ℓ = -k`. The reported
//! [`PeakResult::offset_samples`] is therefore `-(ℓ* + δ)·hop_samples`, so
//! that a positive offset means the target begins *after* the reference, as
//! required by `§4.4`'s sign convention and the shift-recovery scenario in
//! `§8`.

use crate::config::Config;
use crate::correlation::CorrelationSeries;
use crate::utils::{amplitude_to_db, logistic, median};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakResult {
    pub lag_frames: i64,
    pub sub_frame_delta: f64,
    pub offset_samples: i64,
    pub peak_correlation: f64,
    pub secondary_peak_ratio: f64,
    pub noise_floor_db: f64,
    pub snr_estimate_db: f64,
    pub confidence: f64,
    /// The best peak sits at the edge of the searched lag range: the result
    /// did not actually resolve an offset within the search window.
    pub pinned: bool,
}

const EPS: f64 = 1e-12;

#[must_use]
pub fn analyze(series: &CorrelationSeries, hop_samples: usize, window_size: usize, cfg: &Config) -> PeakResult {
    let best_idx = best_peak_index(series);
    let lag_frames = series.lag_of_index(best_idx);
    let peak_value = series.values[best_idx];

    let sub_frame_delta = parabolic_interpolation(series, best_idx);
    let refined_lag = lag_frames as f64 + sub_frame_delta;
    let offset_samples = (-refined_lag * hop_samples as f64).round() as i64;

    let guard_frames = cfg_guard_frames(window_size, hop_samples);
    let (secondary_value, noise_floor) = secondary_and_noise_floor(series, best_idx, guard_frames);

    let secondary_peak_ratio = if peak_value.abs() < EPS {
        0.0
    } else {
        (secondary_value / peak_value.abs()).clamp(0.0, 1.0)
    };

    let noise_floor_db = amplitude_to_db(noise_floor, -240.0);
    let snr_estimate_db = amplitude_to_db(peak_value.abs() / (noise_floor + EPS), -240.0);

    let weights = cfg.confidence_weights;
    let confidence = (weights.w1() * peak_value
        + weights.w2() * (1.0 - secondary_peak_ratio)
        + weights.w3() * logistic(snr_estimate_db / 10.0))
    .clamp(0.0, 1.0);

    let pinned = lag_frames.unsigned_abs() as i64 >= series.lag_max;

    PeakResult {
        lag_frames,
        sub_frame_delta,
        offset_samples,
        peak_correlation: peak_value.clamp(-1.0, 1.0),
        secondary_peak_ratio,
        noise_floor_db,
        snr_estimate_db,
        confidence,
        pinned,
    }
}

/// Guard window half-width in frames, per `§4.4`.
fn cfg_guard_frames(window_size: usize, hop_samples: usize) -> usize {
    (window_size / hop_samples.max(1)).max(3)
}

/// Linear scan for the maximum, tie-broken by smallest `|lag|`.
fn best_peak_index(series: &CorrelationSeries) -> usize {
    let mut best = 0usize;
    for i in 1..series.len() {
        let current = series.values[i];
        let current_lag_abs = series.lag_of_index(i).abs();
        let best_val = series.values[best];
        let best_lag_abs = series.lag_of_index(best).abs();
        if current > best_val || (current == best_val && current_lag_abs < best_lag_abs) {
            best = i;
        }
    }
    best
}

/// Sub-frame refinement via parabolic interpolation on the three samples
/// around `idx`; `0.0` at either boundary (no neighbor to interpolate with).
fn parabolic_interpolation(series: &CorrelationSeries, idx: usize) -> f64 {
    if idx == 0 || idx + 1 >= series.len() {
        return 0.0;
    }
    let y_minus = series.values[idx - 1];
    let y0 = series.values[idx];
    let y_plus = series.values[idx + 1];
    let denom = y_minus - 2.0 * y0 + y_plus;
    if denom.abs() < EPS {
        return 0.0;
    }
    (0.5 * (y_minus - y_plus) / denom).clamp(-0.5, 0.5)
}

fn secondary_and_noise_floor(series: &CorrelationSeries, best_idx: usize, guard_frames: usize) -> (f64, f64) {
    let lo = best_idx.saturating_sub(guard_frames);
    let hi = (best_idx + guard_frames + 1).min(series.len());

    let mut outside_abs = Vec::with_capacity(series.len());
    let mut secondary = f64::NEG_INFINITY;
    for (i, &v) in series.values.iter().enumerate() {
        if i >= lo && i < hi {
            continue;
        }
        outside_abs.push(v.abs());
        secondary = secondary.max(v);
    }
    if !secondary.is_finite() {
        secondary = 0.0;
    }
    let noise_floor = median(&outside_abs);
    (secondary, noise_floor)
}
