//! Audio alignment: estimates the temporal offset (and, optionally, clock
//! drift) between a reference and a target recording of the same underlying
//! event, by cross-correlating extracted features (`§1`–`§2`).

pub mod batch;
pub mod buffer;
pub mod config;
pub mod correlation;
pub mod drift;
pub mod errors;
pub mod features;
pub mod logger;
pub mod orchestrator;
pub mod peak;
pub mod utils;

use serde::{Deserialize, Serialize};

pub use batch::align_batch;
pub use config::{config_for_use_case, default_config, Config};
pub use drift::DriftInfo;
pub use errors::{error_description, AlignError, ErrorLog, Recovery, Severity};
pub use orchestrator::{align, align_full, new_cancel_token, CancelToken, ProgressCallback};

use features::FeatureKind;

/// Selects which feature family drives correlation (`§3`, `§6`). Wire values
/// are stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    SpectralFlux = 0,
    Chroma = 1,
    Energy = 2,
    MFCC = 3,
    Hybrid = 4,
}

impl Method {
    #[must_use]
    pub fn wire_value(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_wire_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::SpectralFlux),
            1 => Some(Self::Chroma),
            2 => Some(Self::Energy),
            3 => Some(Self::MFCC),
            4 => Some(Self::Hybrid),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SpectralFlux => "SpectralFlux",
            Self::Chroma => "Chroma",
            Self::Energy => "Energy",
            Self::MFCC => "MFCC",
            Self::Hybrid => "Hybrid",
        }
    }

    /// The [`FeatureKind`] this method runs; `None` for `Hybrid`, which runs
    /// several (`§4.6`).
    #[must_use]
    pub fn feature_kind(self) -> Option<FeatureKind> {
        match self {
            Self::SpectralFlux => Some(FeatureKind::SpectralFlux),
            Self::Chroma => Some(FeatureKind::Chroma),
            Self::Energy => Some(FeatureKind::Energy),
            Self::MFCC => Some(FeatureKind::MFCC),
            Self::Hybrid => None,
        }
    }
}

/// The outcome of one `align` call (`§3`, `§6`). `error.is_none()` is success;
/// when it's `Some`, every numeric field is `0.0`/`0` and should be ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub offset_samples: i64,
    pub confidence: f64,
    pub peak_correlation: f64,
    pub secondary_peak_ratio: f64,
    pub snr_estimate_db: f64,
    pub noise_floor_db: f64,
    pub method: Method,
    pub error: Option<AlignError>,
    pub drift: Option<DriftInfo>,
    /// `true` if this result is the product of a caller-requested
    /// cancellation rather than an ordinary processing failure.
    pub cancelled: bool,
}

impl AlignmentResult {
    #[must_use]
    pub fn failed(method: Method, error: AlignError, cancelled: bool) -> Self {
        Self {
            offset_samples: 0,
            confidence: 0.0,
            peak_correlation: 0.0,
            secondary_peak_ratio: 0.0,
            snr_estimate_db: 0.0,
            noise_floor_db: 0.0,
            method,
            error: Some(error),
            drift: None,
            cancelled,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Minimum audio length, in samples, that `method` needs to produce a result
/// (`§4.2`); `Hybrid` takes the largest of its constituent methods' minimums.
#[must_use]
pub fn min_audio_length(method: Method, sample_rate: u32) -> u64 {
    match method.feature_kind() {
        Some(kind) => kind.min_samples(sample_rate),
        None => [FeatureKind::SpectralFlux, FeatureKind::Chroma, FeatureKind::MFCC]
            .iter()
            .map(|k| k.min_samples(sample_rate))
            .max()
            .unwrap_or(0),
    }
}

#[must_use]
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
