//! Configuration surface and validation (`§4.8`).
//!
//! Config values are always clamped to their valid range at construction
//! (`Config::new`, presets, `Default`); out-of-range values reaching an API
//! boundary directly (`validate_config`) are reported as `InvalidInput`
//! instead of silently clamped, per invariant 8 in `§8`.

use serde::{Deserialize, Serialize};

use crate::errors::{AlignError, AlignResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub w1: u32, // stored as milli-units to keep the struct Eq-able; see `as_f64`
    pub w2: u32,
    pub w3: u32,
}

impl ConfidenceWeights {
    #[must_use]
    pub fn new(w1: f64, w2: f64, w3: f64) -> Self {
        Self {
            w1: (w1 * 1000.0).round() as u32,
            w2: (w2 * 1000.0).round() as u32,
            w3: (w3 * 1000.0).round() as u32,
        }
    }

    #[must_use]
    pub fn w1(&self) -> f64 {
        f64::from(self.w1) / 1000.0
    }

    #[must_use]
    pub fn w2(&self) -> f64 {
        f64::from(self.w2) / 1000.0
    }

    #[must_use]
    pub fn w3(&self) -> f64 {
        f64::from(self.w3) / 1000.0
    }
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self::new(0.5, 0.3, 0.2)
    }
}

/// Immutable, clamped configuration for one `align`/`align_batch` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub confidence_threshold: f64,
    /// `0` means "auto-compute `L_max`" per `§4.3`.
    pub max_offset_samples: u64,
    pub window_size: usize,
    pub hop_size: usize,
    pub noise_gate_db: f64,
    pub enable_drift_correction: bool,
    pub use_harmonic_weighting: bool,
    pub smoothing_window_size: usize,
    pub num_mel_filters: usize,
    pub num_coeffs: usize,
    pub include_c0: bool,
    pub confidence_weights: ConfidenceWeights,
    /// Enables the bounded in-memory error log (`§7`); off by default.
    pub enable_error_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            max_offset_samples: 0,
            window_size: 1024,
            hop_size: 256,
            noise_gate_db: -40.0,
            enable_drift_correction: true,
            use_harmonic_weighting: false,
            smoothing_window_size: 5,
            num_mel_filters: 26,
            num_coeffs: 13,
            include_c0: false,
            confidence_weights: ConfidenceWeights::default(),
            enable_error_log: false,
        }
    }
}

impl Config {
    /// Builds a config, clamping every field into its valid range (`§4.8`).
    /// This path never fails: out-of-range inputs are silently clamped.
    #[must_use]
    pub fn new(mut self) -> Self {
        self.confidence_threshold = self.confidence_threshold.clamp(0.0, 1.0);
        self.window_size = clamp_power_of_two(self.window_size, 256, 8192);
        self.hop_size = self.hop_size.clamp(64, (self.window_size / 2).max(64));
        self.noise_gate_db = self.noise_gate_db.clamp(-80.0, 0.0);
        self
    }

    /// Hop size implied by `window_size` when the caller does not override it.
    #[must_use]
    pub fn default_hop_size(window_size: usize) -> usize {
        (window_size / 4).max(64)
    }

    pub fn standard() -> Self {
        Self::default().new()
    }

    pub fn high_accuracy() -> Self {
        Self {
            window_size: 4096,
            hop_size: Self::default_hop_size(4096),
            confidence_threshold: 0.85,
            ..Self::default()
        }
        .new()
    }

    pub fn fast() -> Self {
        Self {
            window_size: 512,
            hop_size: Self::default_hop_size(512),
            confidence_threshold: 0.5,
            ..Self::default()
        }
        .new()
    }

    pub fn music() -> Self {
        Self {
            window_size: 8192,
            hop_size: Self::default_hop_size(8192),
            use_harmonic_weighting: true,
            ..Self::default()
        }
        .new()
    }

    pub fn speech() -> Self {
        Self {
            window_size: 1024,
            hop_size: Self::default_hop_size(1024),
            num_mel_filters: 26,
            num_coeffs: 13,
            ..Self::default()
        }
        .new()
    }

    pub fn ambient() -> Self {
        Self {
            window_size: 2048,
            hop_size: Self::default_hop_size(2048),
            smoothing_window_size: 9,
            noise_gate_db: -60.0,
            ..Self::default()
        }
        .new()
    }
}

/// `config_for_use_case` per `§6`. Unknown use cases fall back to `Standard`.
#[must_use]
pub fn config_for_use_case(use_case: &str) -> Config {
    match use_case {
        "music" => Config::music(),
        "speech" => Config::speech(),
        "ambient" => Config::ambient(),
        _ => Config::standard(),
    }
}

#[must_use]
pub fn default_config() -> Config {
    Config::standard()
}

fn clamp_power_of_two(value: usize, min: usize, max: usize) -> usize {
    let clamped = value.clamp(min, max);
    clamped.next_power_of_two().min(max).max(min)
}

/// API-boundary validation (`§8` invariant 8): rejects rather than clamps.
pub fn validate_config(cfg: &Config) -> AlignResult<()> {
    if !(0.0..=1.0).contains(&cfg.confidence_threshold) {
        return Err(AlignError::InvalidInput(
            "confidence_threshold out of [0, 1]".to_string(),
        ));
    }
    if cfg.window_size < 256 || cfg.window_size > 8192 || !cfg.window_size.is_power_of_two() {
        return Err(AlignError::InvalidInput(
            "window_size must be a power of two in [256, 8192]".to_string(),
        ));
    }
    if cfg.hop_size < 64 || cfg.hop_size > cfg.window_size / 2 {
        return Err(AlignError::InvalidInput(format!(
            "hop_size must be in [64, {}]",
            cfg.window_size / 2
        )));
    }
    if !(-80.0..=0.0).contains(&cfg.noise_gate_db) {
        return Err(AlignError::InvalidInput(
            "noise_gate_db out of [-80, 0]".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[rstest]
    #[case(Config::standard())]
    #[case(Config::high_accuracy())]
    #[case(Config::fast())]
    #[case(Config::music())]
    #[case(Config::speech())]
    #[case(Config::ambient())]
    fn presets_are_valid(#[case] cfg: Config) {
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn clamping_never_fails() {
        let cfg = Config {
            confidence_threshold: 5.0,
            window_size: 100_000,
            hop_size: 1,
            noise_gate_db: 100.0,
            ..Config::default()
        }
        .new();
        assert!(validate_config(&cfg).is_ok());
        assert_eq!(cfg.confidence_threshold, 1.0);
        assert_eq!(cfg.noise_gate_db, 0.0);
    }

    #[test]
    fn validate_rejects_bad_threshold() {
        let cfg = Config {
            confidence_threshold: 1.5,
            ..Config::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn validate_rejects_non_power_of_two_window() {
        let cfg = Config {
            window_size: 1000,
            ..Config::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn confidence_weights_roundtrip() {
        let w = ConfidenceWeights::new(0.5, 0.3, 0.2);
        assert!((w.w1() - 0.5).abs() < 1e-9);
        assert!((w.w2() - 0.3).abs() < 1e-9);
        assert!((w.w3() - 0.2).abs() < 1e-9);
    }
}
