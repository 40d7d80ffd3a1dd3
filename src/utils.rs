//! Shared DSP primitives used by more than one feature extractor.

use ndarray::{arr1, s, Array, Array2};
use ndarray_stats::interpolate::Midpoint;
use ndarray_stats::Quantile1dExt;
use noisy_float::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f32::consts::PI;

/// Mirror-pad `array` by `pad` samples on each side, reflecting about the
/// edge sample (excluding it), the way `librosa`-style STFT padding does.
#[must_use]
pub fn reflect_pad(array: &[f32], pad: usize) -> Vec<f32> {
    debug_assert!(pad < array.len(), "padding is too large");
    let prefix = array[1..=pad].iter().rev().copied().collect::<Vec<f32>>();
    let suffix = array[(array.len() - 2) - pad + 1..array.len() - 1]
        .iter()
        .rev()
        .copied()
        .collect::<Vec<f32>>();
    let mut output = Vec::with_capacity(prefix.len() + array.len() + suffix.len());
    output.extend(prefix);
    output.extend(array);
    output.extend(suffix);
    output
}

/// Hann-windowed short-time Fourier transform magnitude spectrum.
///
/// Returns an `(n_bins, n_frames)` matrix: `n_bins = window_length / 2 + 1`,
/// `n_frames = ceil(signal.len() / hop_length)`.
#[must_use]
pub fn stft(signal: &[f32], window_length: usize, hop_length: usize) -> Array2<f64> {
    debug_assert!(window_length % 2 == 0, "window length must be even");
    debug_assert!(window_length < signal.len(), "signal is too short");
    debug_assert!(hop_length < window_length, "hop length is too large");

    let mut stft = Array2::zeros((signal.len().div_ceil(hop_length), window_length / 2 + 1));
    let signal = reflect_pad(signal, window_length / 2);

    let mut hann_window = Array::zeros(window_length + 1);
    for n in 0..window_length {
        hann_window[[n]] =
            0.5f32.mul_add(-f32::cos(2. * n as f32 * PI / window_length as f32), 0.5);
    }
    let hann_window = hann_window.slice_move(s![0..window_length]);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(window_length);

    for (window, mut stft_col) in signal
        .windows(window_length)
        .step_by(hop_length)
        .zip(stft.rows_mut())
    {
        let mut windowed = (arr1(window) * &hann_window).mapv(|x| Complex::new(x, 0.));
        if let Some(s) = windowed.as_slice_mut() {
            fft.process(s);
        } else {
            fft.process(&mut windowed.to_vec());
        }
        stft_col.assign(
            &windowed
                .slice(s![..=window_length / 2])
                .mapv(|x| f64::from(x.re.hypot(x.im))),
        );
    }
    stft.permuted_axes((1, 0))
}

/// `20*log10(value + eps)`, used throughout the noise-floor/SNR/energy math.
#[must_use]
pub fn amplitude_to_db(value: f64, floor_db: f64) -> f64 {
    const EPS: f64 = 1e-12;
    (20.0 * (value.abs() + EPS).log10()).max(floor_db)
}

/// Logistic sigmoid, `1 / (1 + e^-x)`, used by the confidence composite (`§4.4`).
#[must_use]
pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Median of a slice of `f64`, via `ndarray-stats`'s midpoint-interpolated
/// quantile. `NaN`s are not expected in practice; `quantile_mut` requires
/// the totally-ordered `N64` wrapper, so values are mapped through `n64`.
#[must_use]
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    arr1(values)
        .mapv(n64)
        .quantile_mut(n64(0.5), &Midpoint)
        .map(f64::from)
        .unwrap_or(0.0)
}

#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// L2-normalize a vector in place; no-op on an all-zero vector.
pub fn l2_normalize(values: &mut [f64]) {
    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 1e-12 {
        for v in values {
            *v /= norm;
        }
    }
}

/// Least-squares linear regression `y = slope*x + intercept`, returning
/// `(slope, intercept, r_squared)`. Used by the drift detector (`§4.5`).
#[must_use]
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> (f64, f64, f64) {
    debug_assert_eq!(xs.len(), ys.len());
    let n = xs.len() as f64;
    if xs.len() < 2 {
        return (0.0, ys.first().copied().unwrap_or(0.0), 0.0);
    }
    let mean_x = mean(xs);
    let mean_y = mean(ys);
    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (&x, &y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
    }
    if var_x < 1e-12 {
        return (0.0, mean_y, 0.0);
    }
    let slope = cov / var_x;
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (&x, &y) in xs.iter().zip(ys) {
        let pred = slope * x + intercept;
        ss_res += (y - pred).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }
    let r_squared = if ss_tot < 1e-12 { 1.0 } else { 1.0 - ss_res / ss_tot };
    let _ = n;
    (slope, intercept, r_squared)
}

/// Cubic (Catmull-Rom) resampling of `signal` by `factor`: output length is
/// `round(signal.len() / factor)`. `factor > 1` shortens (speeds up), `factor
/// < 1` lengthens (slows down), matching the drift-correction convention in
/// `§4.5` where the target is resampled by `1 + ppm*1e-6`.
#[must_use]
pub fn resample_cubic(signal: &[f32], factor: f64) -> Vec<f32> {
    if signal.is_empty() || factor <= 0.0 {
        return signal.to_vec();
    }
    let out_len = ((signal.len() as f64) / factor).round().max(1.0) as usize;
    let mut output = Vec::with_capacity(out_len);
    let last = signal.len() - 1;
    for i in 0..out_len {
        let src_pos = i as f64 * factor;
        let i0f = src_pos.floor();
        let frac = src_pos - i0f;
        let i1 = (i0f as isize).clamp(0, last as isize) as usize;
        let i0 = i1.saturating_sub(1);
        let i2 = (i1 + 1).min(last);
        let i3 = (i1 + 2).min(last);
        output.push(catmull_rom(
            signal[i0] as f64,
            signal[i1] as f64,
            signal[i2] as f64,
            signal[i3] as f64,
            frac,
        ) as f32);
    }
    output
}

fn catmull_rom(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let a0 = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let a1 = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let a2 = -0.5 * p0 + 0.5 * p2;
    let a3 = p1;
    ((a0 * t + a1) * t + a2) * t + a3
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reflect_pad() {
        let array: Vec<f32> = (0..100_000).map(|x| x as f32).collect();
        let output = reflect_pad(&array, 3);
        assert_eq!(&output[..4], &[3.0, 2.0, 1.0, 0.]);
        assert_eq!(&output[3..100_003], array.as_slice());
        assert_eq!(&output[100_003..100_006], &[99998.0, 99997.0, 99996.0]);
    }

    #[test]
    fn test_median_odd_even() {
        assert!((median(&[1.0, 3.0, 2.0]) - 2.0).abs() < 1e-12);
        assert!((median(&[1.0, 2.0, 3.0, 4.0]) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_logistic_bounds() {
        assert!(logistic(-100.0) < 0.01);
        assert!(logistic(100.0) > 0.99);
        assert!((logistic(0.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_linear_regression_perfect_fit() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [1.0, 3.0, 5.0, 7.0];
        let (slope, intercept, r2) = linear_regression(&xs, &ys);
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept - 1.0).abs() < 1e-9);
        assert!((r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_resample_cubic_identity() {
        let signal: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin()).collect();
        let resampled = resample_cubic(&signal, 1.0);
        assert_eq!(resampled.len(), signal.len());
        for (a, b) in signal.iter().zip(resampled.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_stft_shape() {
        let signal: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.1).sin()).collect();
        let spec = stft(&signal, 512, 128);
        assert_eq!(spec.shape()[0], 512 / 2 + 1);
    }
}
