//! Drift detection (`§4.5`, optional, gated by `cfg.enable_drift_correction`).
//!
//! Splits the reference into `K` segments, estimates a local offset per
//! segment against a small window of the target centered on the global
//! offset, then fits `local_offset ~ segment_center_time` by least squares.
//! The slope (samples/second), divided by the sample rate, is the drift in
//! parts per million.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::correlation::correlate;
use crate::errors::{is_cancelled, AlignError, AlignResult, CancelToken};
use crate::features::{FeatureFrame, FeatureSequence};
use crate::peak;
use crate::utils::linear_regression;

/// Result of a drift-detection pass (`§3`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftInfo {
    pub detected: bool,
    pub ppm: f64,
    pub r_squared: f64,
    pub correction_applied: bool,
}

impl DriftInfo {
    #[must_use]
    pub fn none() -> Self {
        Self {
            detected: false,
            ppm: 0.0,
            r_squared: 0.0,
            correction_applied: false,
        }
    }
}

const DRIFT_PPM_THRESHOLD: f64 = 10.0;
const DRIFT_R2_THRESHOLD: f64 = 0.8;
/// Slack, in frames, added on either side of the global offset when
/// searching for each segment's local offset.
const LOCAL_SLACK_FRAMES: i64 = 32;

/// Estimates drift between `reference` and `target` given the global offset
/// (samples, same sign convention as [`crate::peak::PeakResult::offset_samples`])
/// already found for the whole-signal alignment.
pub fn detect(
    reference: &FeatureSequence,
    target: &FeatureSequence,
    global_offset_samples: i64,
    sample_rate: u32,
    cfg: &Config,
    cancel: Option<&CancelToken>,
) -> AlignResult<DriftInfo> {
    if is_cancelled(cancel) {
        return Err(AlignError::cancelled());
    }
    let hop = reference.hop_samples.max(1);
    let m = reference.len();
    let duration_s = (m as f64 * hop as f64) / f64::from(sample_rate);
    let segments = segment_bounds(m, duration_s);
    if segments.len() < 3 {
        return Ok(DriftInfo::none());
    }

    // global lag, in frames, consistent with `peak`'s sign convention:
    // offset = -(lag + delta) * hop  =>  lag ≈ -offset / hop
    let global_lag_frames = (-global_offset_samples as f64 / hop as f64).round() as i64;

    let mut centers = Vec::with_capacity(segments.len());
    let mut local_offsets = Vec::with_capacity(segments.len());

    for &(start, end) in &segments {
        if is_cancelled(cancel) {
            return Err(AlignError::cancelled());
        }
        if let Some(local_offset) = local_offset_for_segment(
            reference,
            target,
            start,
            end,
            global_lag_frames,
            hop,
            cfg,
            cancel,
        ) {
            let center_frame = (start + end) as f64 / 2.0;
            centers.push(center_frame * hop as f64 / f64::from(sample_rate));
            local_offsets.push(local_offset as f64);
        }
    }

    if centers.len() < 3 {
        return Ok(DriftInfo::none());
    }

    let (slope, _intercept, r_squared) = linear_regression(&centers, &local_offsets);
    let ppm = (slope / f64::from(sample_rate)) * 1_000_000.0;

    let detected = ppm.abs() > DRIFT_PPM_THRESHOLD && r_squared >= DRIFT_R2_THRESHOLD;
    Ok(DriftInfo {
        detected,
        ppm,
        r_squared,
        correction_applied: false,
    })
}

fn segment_bounds(m: usize, duration_s: f64) -> Vec<(usize, usize)> {
    let k = (duration_s / 30.0).floor().max(3.0) as usize;
    if m == 0 {
        return Vec::new();
    }
    let k = k.min(m).max(1);
    let len = m / k;
    if len == 0 {
        return Vec::new();
    }
    let mut bounds = Vec::with_capacity(k);
    for s in 0..k {
        let start = s * len;
        let end = if s == k - 1 { m } else { start + len };
        if end > start {
            bounds.push((start, end));
        }
    }
    bounds
}

fn local_offset_for_segment(
    reference: &FeatureSequence,
    target: &FeatureSequence,
    start: usize,
    end: usize,
    global_lag_frames: i64,
    hop: usize,
    cfg: &Config,
    cancel: Option<&CancelToken>,
) -> Option<i64> {
    let ref_segment = reindex(reference, start, end);

    let n = target.len() as i64;
    let window_start = (start as i64 + global_lag_frames - LOCAL_SLACK_FRAMES).clamp(0, n);
    let window_end = ((end as i64) + global_lag_frames + LOCAL_SLACK_FRAMES).clamp(0, n);
    if window_end <= window_start {
        return None;
    }
    let tgt_window = reindex(target, window_start as usize, window_end as usize);

    let series = correlate(&ref_segment, &tgt_window, cfg, cancel).ok()?;
    let result = peak::analyze(&series, hop, cfg.window_size, cfg);
    if result.pinned {
        return None;
    }

    // translate the subset-local lag back into the reference's absolute frame space
    let local_lag_abs = result.lag_frames as f64 + result.sub_frame_delta
        + (start as i64 - window_start) as f64;
    Some((-local_lag_abs * hop as f64).round() as i64)
}

/// Re-slices `[start, end)` of `seq` into a standalone sequence with
/// frame indices restarting at 0, for use as a correlation operand.
fn reindex(seq: &FeatureSequence, start: usize, end: usize) -> FeatureSequence {
    let frames: Vec<FeatureFrame> = seq.frames[start..end]
        .iter()
        .enumerate()
        .map(|(i, f)| FeatureFrame {
            kind: f.kind,
            values: f.values.clone(),
            frame_index: i,
            hop_samples: f.hop_samples,
        })
        .collect();
    FeatureSequence {
        kind: seq.kind,
        frames,
        hop_samples: seq.hop_samples,
        source_sample_rate: seq.source_sample_rate,
    }
}
