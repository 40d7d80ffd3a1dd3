//! Batch alignment (`§4.7`): one reference against many targets.
//!
//! Results are returned in submission order regardless of completion order,
//! and a failure on one target never affects another's result (invariant 6,
//! `§8`: batch results equal running each target through `align` alone).
//! The reference is preprocessed and its features extracted exactly once
//! ([`crate::orchestrator::PreparedReference`]) and shared read-only across
//! every target, rather than redone per target.

use rayon::ThreadPoolBuilder;

use crate::config::Config;
use crate::errors::{AlignError, ErrorLog};
use crate::orchestrator::{self, CancelToken, PreparedReference, ProgressCallback};
use crate::{AlignmentResult, Method};

/// Aligns `targets` against `reference` one at a time, up to
/// `min(targets.len(), available parallelism)` at once.
#[must_use]
pub fn align_batch(
    reference_pcm: &[f32],
    targets: &[Vec<f32>],
    sample_rate: u32,
    method: Method,
    cfg: &Config,
) -> Vec<AlignmentResult> {
    align_batch_full(reference_pcm, targets, sample_rate, method, cfg, None, None, None)
}

/// Full-featured batch entry point; `cancel`, if set, is shared across every
/// target and checked at each one's stage boundaries. `error_log`, if set and
/// `cfg.enable_error_log` is true, receives one entry per failed target.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn align_batch_full(
    reference_pcm: &[f32],
    targets: &[Vec<f32>],
    sample_rate: u32,
    method: Method,
    cfg: &Config,
    progress: Option<&ProgressCallback>,
    cancel: Option<&CancelToken>,
    error_log: Option<&ErrorLog>,
) -> Vec<AlignmentResult> {
    if targets.is_empty() {
        return Vec::new();
    }
    let error_log = error_log.filter(|_| cfg.enable_error_log);

    let prepared = match PreparedReference::prepare(reference_pcm, sample_rate, method, cfg) {
        Ok(prepared) => prepared,
        Err(error) => {
            if let Some(log) = error_log {
                log.record(
                    crate::errors::Severity::Error,
                    format!("batch: reference preparation failed: {error}"),
                    crate::errors::Recovery::None,
                );
            }
            return targets
                .iter()
                .map(|_| AlignmentResult::failed(method, error.clone(), false))
                .collect();
        }
    };

    let worker_count = targets.len().min(rayon::current_num_threads()).max(1);
    let pool = ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .build()
        .expect("thread pool with a bounded, positive thread count");

    pool.install(|| {
        use rayon::prelude::*;
        targets
            .par_iter()
            .map(|target| {
                match orchestrator::align_against(
                    &prepared,
                    target,
                    sample_rate,
                    method,
                    cfg,
                    progress,
                    cancel,
                    error_log,
                ) {
                    Ok(result) => result,
                    Err(error) => {
                        let cancelled = error.is_cancelled();
                        if let Some(log) = error_log {
                            if !cancelled {
                                log.record(
                                    crate::errors::Severity::Error,
                                    error.to_string(),
                                    crate::errors::Recovery::None,
                                );
                            }
                        }
                        AlignmentResult::failed(method, error, cancelled)
                    }
                }
            })
            .collect()
    })
}
