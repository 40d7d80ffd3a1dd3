//! Alignment orchestrator (`§4.6`): sequences preprocessing, extraction,
//! correlation, peak analysis, and optional drift correction into one
//! [`crate::AlignmentResult`].

use std::collections::HashMap;

use log::{debug, warn};

use crate::buffer::AudioBuffer;
use crate::config::Config;
use crate::correlation::correlate;
use crate::drift::{self, DriftInfo};
pub use crate::errors::CancelToken;
use crate::errors::{is_cancelled, AlignError, AlignResult, ErrorLog, Recovery, Severity};
use crate::features::{extractor_for, FeatureExtractor, FeatureKind, FeatureSequence};
use crate::peak;
use crate::{AlignmentResult, Method};

#[must_use]
pub fn new_cancel_token() -> CancelToken {
    std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false))
}

/// `(stage_name, percent_complete)`, invoked synchronously from the calling
/// thread; must be fast and non-blocking (`§5`).
pub type ProgressCallback<'a> = dyn Fn(&str, u8) + Send + Sync + 'a;

fn check_cancelled(cancel: Option<&CancelToken>) -> AlignResult<()> {
    if is_cancelled(cancel) {
        Err(AlignError::cancelled())
    } else {
        Ok(())
    }
}

fn report(progress: Option<&ProgressCallback>, stage: &str, pct: u8) {
    if let Some(cb) = progress {
        cb(stage, pct);
    }
}

fn record_error(error_log: Option<&ErrorLog>, error: &AlignError) {
    if let Some(log) = error_log {
        if !error.is_cancelled() {
            log.record(Severity::Error, error.to_string(), Recovery::None);
        }
    }
}

/// `align(ref_samples, tgt_samples, sample_rate, method, cfg) → Result` (`§6`),
/// without progress reporting or cancellation. Reference and target are
/// assumed to share `sample_rate`; use [`align_full`] when they might not.
#[must_use]
pub fn align(
    reference_pcm: &[f32],
    target_pcm: &[f32],
    sample_rate: u32,
    method: Method,
    cfg: &Config,
) -> AlignmentResult {
    align_full(reference_pcm, sample_rate, target_pcm, sample_rate, method, cfg, None, None, None)
}

/// Full-featured entry point with progress reporting, cancellation, and an
/// opt-in error log, used by the batch runner and by callers that want
/// staged feedback. `reference_sample_rate != target_sample_rate` yields
/// `InvalidInput` (`§6`: "mismatched sample rates yield `InvalidInput`").
/// `error_log` is only written to when `cfg.enable_error_log` is set; it has
/// no effect otherwise (`§7`).
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn align_full(
    reference_pcm: &[f32],
    reference_sample_rate: u32,
    target_pcm: &[f32],
    target_sample_rate: u32,
    method: Method,
    cfg: &Config,
    progress: Option<&ProgressCallback>,
    cancel: Option<&CancelToken>,
    error_log: Option<&ErrorLog>,
) -> AlignmentResult {
    let error_log = error_log.filter(|_| cfg.enable_error_log);
    match run(
        reference_pcm,
        reference_sample_rate,
        target_pcm,
        target_sample_rate,
        method,
        cfg,
        progress,
        cancel,
        error_log,
    ) {
        Ok(result) => result,
        Err(error) => {
            let cancelled = error.is_cancelled();
            record_error(error_log, &error);
            AlignmentResult::failed(method, error, cancelled)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    reference_pcm: &[f32],
    reference_sample_rate: u32,
    target_pcm: &[f32],
    target_sample_rate: u32,
    method: Method,
    cfg: &Config,
    progress: Option<&ProgressCallback>,
    cancel: Option<&CancelToken>,
    error_log: Option<&ErrorLog>,
) -> AlignResult<AlignmentResult> {
    report(progress, "Loading", 0);
    check_cancelled(cancel)?;
    let prepared = PreparedReference::prepare(reference_pcm, reference_sample_rate, method, cfg)?;
    report(progress, "Loading", 10);
    align_against(&prepared, target_pcm, target_sample_rate, method, cfg, progress, cancel, error_log)
}

/// The reference side of an alignment: a preprocessed [`AudioBuffer`] plus
/// every [`FeatureSequence`] `method` needs from it, extracted once.
///
/// Building this once and sharing it across many targets is what lets batch
/// alignment (`§4.7`) avoid re-extracting the reference's features per
/// target; [`PreparedReference::prepare`] is the single-alignment path's
/// entry point too, so the two paths share one implementation.
pub(crate) struct PreparedReference {
    buffer: AudioBuffer,
    kinds: Vec<FeatureKind>,
    features: HashMap<FeatureKind, FeatureSequence>,
}

impl PreparedReference {
    pub(crate) fn prepare(
        reference_pcm: &[f32],
        sample_rate: u32,
        method: Method,
        cfg: &Config,
    ) -> AlignResult<Self> {
        crate::config::validate_config(cfg)?;
        let buffer = AudioBuffer::construct(reference_pcm.to_vec(), sample_rate)?.preprocess(cfg);
        if buffer.is_silent() {
            return Err(AlignError::InsufficientData(
                "reference is silent after preprocessing".to_string(),
            ));
        }

        let kinds = method_kinds(method, &buffer);
        let mut features = HashMap::with_capacity(kinds.len());
        for &kind in &kinds {
            let extractor = extractor_for(kind);
            let sequence = extractor.extract(&buffer, cfg, None)?;
            features.insert(kind, sequence);
        }

        Ok(Self { buffer, kinds, features })
    }
}

/// The feature kinds a method needs extracted from the reference: one for
/// any single method, or flux+MFCC (plus chroma when the reference is long
/// enough for it) for `Hybrid` (`§4.6`).
fn method_kinds(method: Method, reference: &AudioBuffer) -> Vec<FeatureKind> {
    match method {
        Method::Hybrid => {
            let mut kinds = vec![FeatureKind::SpectralFlux, FeatureKind::MFCC];
            if reference.duration_s() >= FeatureKind::Chroma.min_duration_s() {
                kinds.push(FeatureKind::Chroma);
            }
            kinds
        }
        _ => vec![method
            .feature_kind()
            .expect("non-hybrid methods always map to a feature kind")],
    }
}

/// Aligns one target against an already-[`PreparedReference::prepare`]d
/// reference. This is what both [`run`] (one target) and the batch runner
/// (many targets sharing one `prepared`) dispatch into.
#[allow(clippy::too_many_arguments)]
pub(crate) fn align_against(
    prepared: &PreparedReference,
    target_pcm: &[f32],
    target_sample_rate: u32,
    method: Method,
    cfg: &Config,
    progress: Option<&ProgressCallback>,
    cancel: Option<&CancelToken>,
    error_log: Option<&ErrorLog>,
) -> AlignResult<AlignmentResult> {
    if prepared.buffer.sample_rate() != target_sample_rate {
        return Err(AlignError::InvalidInput(format!(
            "sample rate mismatch: reference={}Hz, target={target_sample_rate}Hz",
            prepared.buffer.sample_rate()
        )));
    }

    check_cancelled(cancel)?;
    let target = AudioBuffer::construct(target_pcm.to_vec(), target_sample_rate)?.preprocess(cfg);
    if target.is_silent() {
        return Err(AlignError::InsufficientData(
            "signal is silent after preprocessing".to_string(),
        ));
    }
    report(progress, "Preprocessing", 30);

    check_cancelled(cancel)?;
    let (mut result, drift_info) = match method {
        Method::Hybrid => align_hybrid(prepared, &target, cfg, progress, cancel, error_log)?,
        _ => {
            let kind = method
                .feature_kind()
                .expect("non-hybrid methods always map to a feature kind");
            let ref_features = prepared
                .features
                .get(&kind)
                .expect("PreparedReference::prepare extracted this method's kind");
            let outcome = align_single(
                kind,
                extractor_for(kind).as_ref(),
                &prepared.buffer,
                ref_features,
                &target,
                cfg,
                progress,
                cancel,
            )?;
            (outcome, None)
        }
    };
    result.method = method;

    report(progress, "Finalizing", 100);
    result.drift = drift_info;
    Ok(result)
}

/// Runs one feature kind end to end: extract target → correlate → peak-analyze
/// → optional one-shot drift detect/correct-and-rerun (`§4.5`, `§4.6`) →
/// validity gate (`§4.4`: confidence and boundary-pin both must pass).
#[allow(clippy::too_many_arguments)]
fn align_single(
    kind: FeatureKind,
    extractor: &(dyn FeatureExtractor + Send + Sync),
    reference: &AudioBuffer,
    ref_features: &FeatureSequence,
    target: &AudioBuffer,
    cfg: &Config,
    progress: Option<&ProgressCallback>,
    cancel: Option<&CancelToken>,
) -> AlignResult<AlignmentResult> {
    check_cancelled(cancel)?;
    let tgt_features = extractor.extract(target, cfg, cancel)?;
    report(progress, "Analyzing", 70);

    check_cancelled(cancel)?;
    let series = correlate(ref_features, &tgt_features, cfg, cancel)?;
    let peak_result = peak::analyze(&series, ref_features.hop_samples, cfg.window_size, cfg);
    report(progress, "Correlating", 95);

    if peak_result.pinned {
        return Err(AlignError::InsufficientData(
            "best correlation peak is pinned to the search boundary".to_string(),
        ));
    }

    let mut drift_info = DriftInfo::none();
    let mut final_peak = peak_result;
    if cfg.enable_drift_correction {
        if let Ok(info) = drift::detect(
            ref_features,
            &tgt_features,
            final_peak.offset_samples,
            reference.sample_rate(),
            cfg,
            cancel,
        ) {
            drift_info = info;
            if drift_info.detected {
                if let Some(corrected) = rerun_with_drift_correction(
                    extractor,
                    reference,
                    target,
                    ref_features,
                    &drift_info,
                    cfg,
                    cancel,
                ) {
                    final_peak = corrected;
                    drift_info.correction_applied = true;
                }
            }
        }
    }

    // Validity per §4.4: both the confidence threshold and the
    // not-pinned-to-the-boundary check must hold, or the result is
    // InsufficientData rather than a (silently unreliable) success.
    if final_peak.confidence < cfg.confidence_threshold {
        return Err(AlignError::InsufficientData(format!(
            "{}: confidence {:.3} is below the configured threshold {:.3}",
            kind.name(),
            final_peak.confidence,
            cfg.confidence_threshold
        )));
    }

    Ok(AlignmentResult {
        offset_samples: final_peak.offset_samples,
        confidence: final_peak.confidence,
        peak_correlation: final_peak.peak_correlation,
        secondary_peak_ratio: final_peak.secondary_peak_ratio,
        snr_estimate_db: final_peak.snr_estimate_db,
        noise_floor_db: final_peak.noise_floor_db,
        method: Method::SpectralFlux, // overwritten by the caller
        error: None,
        drift: if drift_info.detected { Some(drift_info) } else { None },
        cancelled: false,
    })
}

/// Resamples the target by `1 + ppm*1e-6` and re-runs correlation/peak once
/// against the unchanged reference features (`§4.5`: at most one pass).
#[allow(clippy::too_many_arguments)]
fn rerun_with_drift_correction(
    extractor: &(dyn FeatureExtractor + Send + Sync),
    reference: &AudioBuffer,
    target: &AudioBuffer,
    ref_features: &FeatureSequence,
    drift_info: &DriftInfo,
    cfg: &Config,
    cancel: Option<&CancelToken>,
) -> Option<peak::PeakResult> {
    let factor = 1.0 + drift_info.ppm * 1e-6;
    let resampled = crate::utils::resample_cubic(target.samples(), factor);
    let resampled_target = AudioBuffer::construct(resampled, reference.sample_rate()).ok()?;

    let corrected_features = extractor.extract(&resampled_target, cfg, cancel).ok()?;
    let series = correlate(ref_features, &corrected_features, cfg, cancel).ok()?;
    let result = peak::analyze(&series, ref_features.hop_samples, cfg.window_size, cfg);
    if result.pinned {
        None
    } else {
        Some(result)
    }
}

/// Runs flux, chroma (unless the reference is too short for it), and MFCC,
/// and fuses them by confidence-weighted median of offsets (`§4.6`).
fn align_hybrid(
    prepared: &PreparedReference,
    target: &AudioBuffer,
    cfg: &Config,
    progress: Option<&ProgressCallback>,
    cancel: Option<&CancelToken>,
    error_log: Option<&ErrorLog>,
) -> AlignResult<(AlignmentResult, Option<DriftInfo>)> {
    let mut candidates = Vec::new();
    let mut drift_info = None;
    for &kind in &prepared.kinds {
        check_cancelled(cancel)?;
        let ref_features = prepared
            .features
            .get(&kind)
            .expect("PreparedReference::prepare extracted every kind in `kinds`");
        match align_single(
            kind,
            extractor_for(kind).as_ref(),
            &prepared.buffer,
            ref_features,
            target,
            cfg,
            progress,
            cancel,
        ) {
            Ok(result) => {
                if drift_info.is_none() {
                    drift_info = result.drift;
                }
                candidates.push(result);
            }
            Err(error) => {
                warn!("hybrid: {kind:?} failed: {error}");
                if let Some(log) = error_log {
                    log.record(
                        Severity::Warning,
                        format!("hybrid: {kind:?} failed: {error}"),
                        Recovery::Degrade,
                    );
                }
            }
        }
    }

    if candidates.is_empty() {
        return Err(AlignError::ProcessingFailed(
            "hybrid: every constituent method failed".to_string(),
        ));
    }

    Ok((combine_hybrid(candidates), drift_info))
}

/// Confidence-weighted median of offsets, per `§4.6`.
fn combine_hybrid(mut candidates: Vec<AlignmentResult>) -> AlignmentResult {
    candidates.sort_by_key(|c| c.offset_samples);

    let total_weight: f64 = candidates.iter().map(|c| c.confidence).sum();
    let mut cumulative = 0.0;
    let mut median_idx = candidates.len() - 1;
    for (i, c) in candidates.iter().enumerate() {
        cumulative += c.confidence;
        if total_weight < 1e-12 || cumulative >= total_weight * 0.5 {
            median_idx = i;
            break;
        }
    }

    let combined_offset = candidates[median_idx].offset_samples;
    // Self-weighted mean (weight_i = confidence_i / total_weight), so a
    // candidate with higher confidence counts for more than a plain average
    // of the confidences would give it.
    let weighted_confidence = if total_weight < 1e-12 {
        0.0
    } else {
        candidates.iter().map(|c| c.confidence * c.confidence).sum::<f64>() / total_weight
    };

    let closest = candidates
        .iter()
        .min_by_key(|c| (c.offset_samples - combined_offset).abs())
        .expect("candidates is non-empty");

    debug!(
        "hybrid: combined offset {combined_offset} from {} candidates",
        candidates.len()
    );

    AlignmentResult {
        offset_samples: combined_offset,
        confidence: weighted_confidence,
        peak_correlation: closest.peak_correlation,
        secondary_peak_ratio: closest.secondary_peak_ratio,
        snr_estimate_db: closest.snr_estimate_db,
        noise_floor_db: closest.noise_floor_db,
        method: Method::Hybrid,
        error: None,
        drift: None,
        cancelled: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AlignError;

    fn sine(freq: f64, duration_s: f64, sample_rate: u32) -> Vec<f32> {
        let n = (duration_s * f64::from(sample_rate)) as usize;
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / f64::from(sample_rate)).sin() as f32 * 0.4)
            .collect()
    }

    fn pink_like(duration_s: f64, sample_rate: u32, seed: u64) -> Vec<f32> {
        let n = (duration_s * f64::from(sample_rate)) as usize;
        let mut state = seed.max(1);
        (0..n)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                ((state % 2000) as f32 / 1000.0 - 1.0) * 0.3
            })
            .collect()
    }

    #[test]
    fn identity_self_alignment_has_zero_offset() {
        // a pure tone is nearly time-invariant and yields a degenerate (flat)
        // correlation surface; pink-noise-like content localizes sharply.
        let signal = pink_like(10.0, 44100, 1);
        let cfg = Config::default();
        let result = align(&signal, &signal, 44100, Method::SpectralFlux, &cfg);
        assert!(result.is_success());
        assert_eq!(result.offset_samples, 0);
        assert!(result.confidence >= 0.95, "confidence {} too low", result.confidence);
    }

    #[test]
    fn known_shift_recovers_positive_offset() {
        let reference = pink_like(10.0, 44100, 7);
        let mut target = vec![0.0f32; 4410];
        target.extend_from_slice(&reference[..reference.len() - 4410]);
        let cfg = Config::default();
        let result = align(&reference, &target, 44100, Method::SpectralFlux, &cfg);
        assert!(result.is_success());
        assert!(
            (result.offset_samples - 4410).abs() <= 256,
            "offset {} should be near +4410",
            result.offset_samples
        );
        assert!(result.confidence >= 0.8);
    }

    #[test]
    fn silent_target_is_insufficient_data() {
        let reference = pink_like(10.0, 44100, 3);
        let target = vec![0.0f32; reference.len()];
        let cfg = Config::default();
        let result = align(&reference, &target, 44100, Method::SpectralFlux, &cfg);
        assert!(matches!(result.error, Some(AlignError::InsufficientData(_))));
    }

    #[test]
    fn sample_rate_mismatch_is_invalid_input() {
        let reference = sine(440.0, 10.0, 44100);
        let target = sine(440.0, 10.0, 48000);
        let cfg = Config::default();
        let result = align_full(&reference, 44100, &target, 48000, Method::SpectralFlux, &cfg, None, None, None);
        assert!(matches!(result.error, Some(AlignError::InvalidInput(_))));
    }

    #[test]
    fn short_input_below_chroma_minimum_is_insufficient_data() {
        let reference = sine(440.0, 0.5, 44100);
        let target = sine(440.0, 0.5, 44100);
        let cfg = Config::default();
        let result = align(&reference, &target, 44100, Method::Chroma, &cfg);
        assert!(matches!(result.error, Some(AlignError::InsufficientData(_))));
    }

    #[test]
    fn hybrid_runs_to_completion_and_self_aligns() {
        let signal = pink_like(10.0, 44100, 5);
        let cfg = Config::default();
        let result = align(&signal, &signal, 44100, Method::Hybrid, &cfg);
        assert!(result.is_success());
        assert_eq!(result.offset_samples, 0);
    }

    #[test]
    fn cancellation_short_circuits_promptly() {
        let reference = pink_like(10.0, 44100, 11);
        let cfg = Config::default();
        let token = new_cancel_token();
        token.store(true, std::sync::atomic::Ordering::Relaxed);
        let result = align_full(&reference, 44100, &reference, 44100, Method::SpectralFlux, &cfg, None, Some(&token), None);
        assert!(result.cancelled);
        assert!(matches!(result.error, Some(AlignError::InsufficientData(_))));
    }

    #[test]
    fn low_confidence_nonpinned_peak_is_insufficient_data() {
        // a threshold above 1.0 can never be met by a real (<=1.0) confidence,
        // so every otherwise-successful alignment must be downgraded to
        // InsufficientData rather than reported as a low-confidence success.
        let reference = pink_like(10.0, 44100, 21);
        let cfg = Config {
            confidence_threshold: 1.0,
            ..Config::default()
        };
        let result = align(&reference, &reference, 44100, Method::SpectralFlux, &cfg);
        assert!(matches!(result.error, Some(AlignError::InsufficientData(_))));
    }

    #[test]
    fn enabled_error_log_records_a_failure() {
        let reference = pink_like(10.0, 44100, 31);
        let target = vec![0.0f32; reference.len()];
        let cfg = Config {
            enable_error_log: true,
            ..Config::default()
        };
        let log = crate::errors::ErrorLog::default();
        let result = align_full(&reference, 44100, &target, 44100, Method::SpectralFlux, &cfg, None, None, Some(&log));
        assert!(!result.is_success());
        assert_eq!(log.snapshot().len(), 1);
    }

    #[test]
    fn disabled_error_log_stays_empty() {
        let reference = pink_like(10.0, 44100, 32);
        let target = vec![0.0f32; reference.len()];
        let cfg = Config {
            enable_error_log: false,
            ..Config::default()
        };
        let log = crate::errors::ErrorLog::default();
        let result = align_full(&reference, 44100, &target, 44100, Method::SpectralFlux, &cfg, None, None, Some(&log));
        assert!(!result.is_success());
        assert!(log.snapshot().is_empty());
    }
}
