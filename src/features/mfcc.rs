//! MFCC extractor (`§4.2`): best for timbral content.

use crate::buffer::AudioBuffer;
use crate::config::Config;
use crate::errors::{is_cancelled, AlignError, AlignResult, CancelToken};
use crate::utils::stft;

use super::{
    check_minimum_length, FeatureExtractor, FeatureFrame, FeatureKind, FeatureSequence,
    CANCEL_CHECK_INTERVAL,
};

pub struct MfccExtractor;

impl FeatureExtractor for MfccExtractor {
    fn kind(&self) -> FeatureKind {
        FeatureKind::MFCC
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
                "mfcc: STFT produced zero frames".to_string(),
            ));
        }

        let filterbank = mel_filterbank(
            cfg.num_mel_filters,
            n_bins,
            f64::from(buffer.sample_rate()),
        );

        let first_coeff = if cfg.include_c0 { 0 } else { 1 };
        let num_coeffs = cfg.num_coeffs.max(first_coeff + 1);

        let mut raw_frames = Vec::with_capacity(n_frames);
        for t in 0..n_frames {
            if t % CANCEL_CHECK_INTERVAL == 0 && is_cancelled(cancel) {
                return Err(AlignError::cancelled());
            }
            let mut mel_energies = vec![0.0f64; cfg.num_mel_filters];
            for (m, filter) in filterbank.iter().enumerate() {
                let mut energy = 0.0;
                for (k, &weight) in filter.iter().enumerate() {
                    energy += weight * spec[[k, t]];
                }
                mel_energies[m] = (energy.max(1e-10)).ln();
            }
            let cepstrum = dct2(&mel_energies);
            raw_frames.push(cepstrum[first_coeff..first_coeff + num_coeffs - first_coeff].to_vec());
        }

        cepstral_mean_normalize(&mut raw_frames);

        let frames = raw_frames
            .into_iter()
            .enumerate()
            .map(|(frame_index, values)| FeatureFrame {
                kind: self.kind(),
                values,
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

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank spanning 0..Nyquist, `num_filters` rows by
/// `n_bins` columns, each row summing to roughly unit area.
fn mel_filterbank(num_filters: usize, n_bins: usize, sample_rate: f64) -> Vec<Vec<f64>> {
    let nyquist = sample_rate / 2.0;
    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(nyquist);

    let points: Vec<f64> = (0..num_filters + 2)
        .map(|i| {
            let mel = mel_min + (mel_max - mel_min) * i as f64 / (num_filters + 1) as f64;
            mel_to_hz(mel)
        })
        .collect();

    let bin_hz = nyquist / (n_bins - 1) as f64;

    (0..num_filters)
        .map(|m| {
            let left = points[m];
            let center = points[m + 1];
            let right = points[m + 2];
            (0..n_bins)
                .map(|k| {
                    let f = k as f64 * bin_hz;
                    if f < left || f > right {
                        0.0
                    } else if f <= center {
                        if center - left < 1e-9 {
                            0.0
                        } else {
                            (f - left) / (center - left)
                        }
                    } else if right - center < 1e-9 {
                        0.0
                    } else {
                        (right - f) / (right - center)
                    }
                })
                .collect()
        })
        .collect()
}

/// Unnormalized DCT-II.
fn dct2(input: &[f64]) -> Vec<f64> {
    let n = input.len();
    (0..n)
        .map(|k| {
            input
                .iter()
                .enumerate()
                .map(|(i, &x)| x * (std::f64::consts::PI / n as f64 * (i as f64 + 0.5) * k as f64).cos())
                .sum()
        })
        .collect()
}

/// Subtracts the per-coefficient mean across the whole sequence (CMN).
fn cepstral_mean_normalize(frames: &mut [Vec<f64>]) {
    if frames.is_empty() {
        return;
    }
    let dim = frames[0].len();
    let mut means = vec![0.0; dim];
    for frame in frames.iter() {
        for (m, &v) in means.iter_mut().zip(frame.iter()) {
            *m += v;
        }
    }
    for m in means.iter_mut() {
        *m /= frames.len() as f64;
    }
    for frame in frames.iter_mut() {
        for (v, &m) in frame.iter_mut().zip(means.iter()) {
            *v -= m;
        }
    }
}
