//! Feature extraction (`§4.2`): spectral flux, 12-bin chroma, energy
//! envelope, and MFCC, each behind the [`FeatureExtractor`] trait so the
//! orchestrator can select one by tag without runtime polymorphism beyond
//! one virtual call per stage (`§9`).

pub mod chroma;
pub mod energy;
pub mod flux;
pub mod mfcc;

use crate::buffer::AudioBuffer;
use crate::config::Config;
use crate::errors::{AlignError, AlignResult, CancelToken};

/// Extractors check cancellation every this many frames inside their
/// per-frame loop (`§5`).
pub(crate) const CANCEL_CHECK_INTERVAL: usize = 1024;

/// The four extractable feature families (`§3`). `Method::Hybrid` is not a
/// `FeatureKind`: it runs several of these and fuses the results (`§4.6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    SpectralFlux,
    Chroma,
    Energy,
    MFCC,
}

impl FeatureKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SpectralFlux => "SpectralFlux",
            Self::Chroma => "Chroma",
            Self::Energy => "Energy",
            Self::MFCC => "MFCC",
        }
    }

    /// `true` for features compared via cosine similarity per overlapping
    /// frame (`§4.3`); `false` for the scalar 1-D features.
    #[must_use]
    pub fn is_vector(self) -> bool {
        matches!(self, Self::Chroma | Self::MFCC)
    }

    /// Recommended minimum audio duration, in seconds (`§4.2`).
    #[must_use]
    pub fn min_duration_s(self) -> f64 {
        match self {
            Self::SpectralFlux | Self::Energy => 2.0,
            Self::Chroma => 4.0,
            Self::MFCC => 3.0,
        }
    }

    #[must_use]
    pub fn min_samples(self, sample_rate: u32) -> u64 {
        (self.min_duration_s() * f64::from(sample_rate)).ceil() as u64
    }
}

/// One analysis frame (`§3`).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    pub kind: FeatureKind,
    pub values: Vec<f64>,
    pub frame_index: usize,
    pub hop_samples: usize,
}

/// An ordered sequence of same-kind [`FeatureFrame`]s (`§3`).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSequence {
    pub kind: FeatureKind,
    pub frames: Vec<FeatureFrame>,
    pub hop_samples: usize,
    pub source_sample_rate: u32,
}

impl FeatureSequence {
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Scalar value of frame `i` (feature dimension 0); used by the
    /// scalar-feature correlator.
    #[must_use]
    pub fn scalar(&self, i: usize) -> f64 {
        self.frames[i].values[0]
    }

    #[must_use]
    pub fn vector(&self, i: usize) -> &[f64] {
        &self.frames[i].values
    }
}

/// Implemented once per [`FeatureKind`]. The orchestrator dispatches through
/// this trait instead of matching on the kind at every call site.
pub trait FeatureExtractor {
    fn kind(&self) -> FeatureKind;

    fn extract(
        &self,
        buffer: &AudioBuffer,
        cfg: &Config,
        cancel: Option<&CancelToken>,
    ) -> AlignResult<FeatureSequence>;
}

/// Shared frame-count/minimum-length bookkeeping used by every extractor
/// before it does any real work.
pub(crate) fn check_minimum_length(
    buffer: &AudioBuffer,
    kind: FeatureKind,
) -> AlignResult<()> {
    if buffer.len() as u64 >= kind.min_samples(buffer.sample_rate()) {
        Ok(())
    } else {
        Err(AlignError::InsufficientData(format!(
            "{} requires at least {}s of audio, got {:.2}s",
            kind.name(),
            kind.min_duration_s(),
            buffer.duration_s()
        )))
    }
}

/// Returns a concrete extractor for the given kind.
#[must_use]
pub fn extractor_for(kind: FeatureKind) -> Box<dyn FeatureExtractor + Send + Sync> {
    match kind {
        FeatureKind::SpectralFlux => Box::new(flux::FluxExtractor),
        FeatureKind::Chroma => Box::new(chroma::ChromaExtractor),
        FeatureKind::Energy => Box::new(energy::EnergyExtractor),
        FeatureKind::MFCC => Box::new(mfcc::MfccExtractor),
    }
}
