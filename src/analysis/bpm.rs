//! Spectral-flux autocorrelation BPM + first-beat-offset estimator,
//! downmixing to mono before analysis so it can operate on the
//! stereo `AudioBuffer` this crate stores decks' audio in.

use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;
use rustfft::FftPlanner;
use thiserror::Error;

use crate::buffer::AudioBuffer;
use crate::config::{BPM_DOWNSAMPLE_FACTOR, BPM_FRAME_SIZE, BPM_HOP_SIZE, BPM_MAX, BPM_MIN};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("no samples to analyze")]
    EmptySamples,
    #[error("not enough samples after downsampling")]
    EmptyAfterDownsample,
    #[error("spectral flux is empty")]
    EmptyFlux,
    #[error("invalid lag range for sample rate {sample_rate} Hz")]
    InvalidLagRange { sample_rate: f32 },
    #[error("autocorrelation produced no usable peak")]
    NoAutocorrelationPeak,
}

fn to_mono(buffer: &AudioBuffer) -> Vec<f32> {
    let samples = buffer.as_slice();
    samples.chunks_exact(2).map(|f| (f[0] + f[1]) * 0.5).collect()
}

fn normalize_in_place(samples: &mut [f32]) {
    let peak = samples.par_iter().map(|&x| x.abs()).reduce(|| 0.0f32, f32::max);
    if peak > 1e-6 {
        samples.par_iter_mut().for_each(|x| *x /= peak);
    }
}

fn downsample_in_place(samples: &mut Vec<f32>, factor: usize) {
    if factor <= 1 || samples.is_empty() {
        return;
    }
    let new_len = samples.len() / factor;
    if new_len == 0 {
        samples.clear();
        return;
    }
    for i in 0..new_len {
        samples[i] = samples[i * factor];
    }
    samples.truncate(new_len);
}

fn compute_spectral_flux(samples: &[f32], frame_size: usize, hop_size: usize) -> Vec<f32> {
    if samples.len() < frame_size {
        return Vec::new();
    }
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(frame_size);
    let num_frames = (samples.len() - frame_size) / hop_size + 1;

    let hann: Vec<f32> = (0..frame_size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (frame_size - 1) as f32).cos()))
        .collect();

    let spectra: Vec<Vec<f32>> = (0..num_frames)
        .into_par_iter()
        .map(|i| {
            let start = i * hop_size;
            let end = (start + frame_size).min(samples.len());
            let frame = &samples[start..end];
            let mut buffer: Vec<Complex<f32>> = vec![Complex::zero(); frame_size];
            for ((b, &s), &w) in buffer.iter_mut().zip(frame.iter()).zip(hann.iter()) {
                *b = Complex { re: s * w, im: 0.0 };
            }
            fft.process(&mut buffer);
            buffer[..frame_size / 2 + 1].iter().map(|c| c.norm()).collect()
        })
        .collect();

    if spectra.is_empty() {
        return Vec::new();
    }

    let mut flux = vec![0.0; num_frames];
    if num_frames > 1 {
        flux[1..].par_iter_mut().enumerate().for_each(|(idx, f)| {
            let i = idx + 1;
            *f = spectra[i]
                .iter()
                .zip(spectra[i - 1].iter())
                .map(|(&curr, &prev)| (curr - prev).max(0.0))
                .sum();
        });
    }

    let mean = flux.iter().sum::<f32>() / num_frames as f32;
    if mean > 1e-6 {
        flux.par_iter_mut().for_each(|f| *f /= mean);
    }
    flux
}

fn fft_autocorrelation(signal: &[f32], max_lag: usize) -> Vec<f32> {
    if signal.is_empty() || max_lag == 0 {
        return Vec::new();
    }
    let n = (signal.len() + max_lag).next_power_of_two();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);

    let mut buffer: Vec<Complex<f32>> = signal
        .iter()
        .map(|&x| Complex { re: x, im: 0.0 })
        .chain(std::iter::repeat(Complex::zero()).take(n - signal.len()))
        .collect();

    fft.process(&mut buffer);
    buffer.par_iter_mut().for_each(|c| *c = c.norm_sqr().into());
    ifft.process(&mut buffer);

    buffer[..max_lag.min(buffer.len())]
        .par_iter()
        .map(|c| c.re / n as f32)
        .collect()
}

fn estimate_bpm(flux: &[f32], sample_rate: f32, hop_size: usize) -> Result<f32, AnalysisError> {
    if flux.is_empty() {
        return Err(AnalysisError::EmptyFlux);
    }
    let max_lag = (60.0 * sample_rate / (BPM_MIN * hop_size as f32)).ceil() as usize;
    let min_lag = (60.0 * sample_rate / (BPM_MAX * hop_size as f32)).floor() as usize;
    if min_lag == 0 || max_lag <= min_lag {
        return Err(AnalysisError::InvalidLagRange { sample_rate });
    }
    let effective_max_lag = max_lag.min(flux.len());
    if effective_max_lag <= min_lag {
        return Err(AnalysisError::InvalidLagRange { sample_rate });
    }

    let ac = fft_autocorrelation(flux, effective_max_lag);
    if ac.len() <= min_lag {
        return Err(AnalysisError::NoAutocorrelationPeak);
    }

    let smoothed = if ac.len() >= 3 {
        let mut s = vec![0.0; ac.len()];
        s[0] = ac[0];
        s[ac.len() - 1] = ac[ac.len() - 1];
        s[1..ac.len() - 1].par_iter_mut().enumerate().for_each(|(i, v)| {
            *v = (ac[i] + ac[i + 1] + ac[i + 2]) / 3.0;
        });
        s
    } else {
        ac
    };

    let peak = smoothed
        .par_iter()
        .enumerate()
        .skip(min_lag)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let (peak_lag, _) = peak.ok_or(AnalysisError::NoAutocorrelationPeak)?;
    if peak_lag == 0 {
        return Err(AnalysisError::NoAutocorrelationPeak);
    }

    let refined_lag = if peak_lag > min_lag && peak_lag < smoothed.len() - 1 {
        let y_minus = smoothed[peak_lag - 1];
        let y_zero = smoothed[peak_lag];
        let y_plus = smoothed[peak_lag + 1];
        let denom = y_minus - 2.0 * y_zero + y_plus;
        if denom.abs() > 1e-6 {
            let p = (0.5 * (y_minus - y_plus) / denom).clamp(-0.7, 0.7);
            peak_lag as f32 + p
        } else {
            peak_lag as f32
        }
    } else {
        peak_lag as f32
    };

    let period_secs = refined_lag * hop_size as f32 / sample_rate;
    if period_secs <= 1e-6 {
        return Err(AnalysisError::NoAutocorrelationPeak);
    }
    Ok((60.0 / period_secs).clamp(BPM_MIN, BPM_MAX))
}

/// Estimates BPM and the first downbeat's offset, in seconds, from a
/// decoded stereo buffer in one pass: onset-strength peak-picking with
/// parabolic interpolation locates the first downbeat once the dominant
/// autocorrelation period is known.
pub fn analyze(buffer: &AudioBuffer) -> Result<(f32, f64), AnalysisError> {
    if buffer.total_frames() == 0 {
        return Err(AnalysisError::EmptySamples);
    }
    let mut mono = to_mono(buffer);
    normalize_in_place(&mut mono);
    downsample_in_place(&mut mono, BPM_DOWNSAMPLE_FACTOR);
    let effective_rate = buffer.sample_rate() as f32 / BPM_DOWNSAMPLE_FACTOR as f32;
    if mono.is_empty() {
        return Err(AnalysisError::EmptyAfterDownsample);
    }

    let flux = compute_spectral_flux(&mono, BPM_FRAME_SIZE, BPM_HOP_SIZE);
    if flux.is_empty() {
        return Err(AnalysisError::EmptyFlux);
    }
    let bpm = estimate_bpm(&flux, effective_rate, BPM_HOP_SIZE)?;

    let smoothed_flux = if flux.len() >= 3 {
        let mut s = vec![0.0; flux.len()];
        s[0] = flux[0];
        s[flux.len() - 1] = flux[flux.len() - 1];
        s[1..flux.len() - 1].par_iter_mut().enumerate().for_each(|(i, v)| {
            *v = (flux[i] + flux[i + 1] + flux[i + 2]) / 3.0;
        });
        s
    } else {
        flux.clone()
    };

    let mean = smoothed_flux.iter().sum::<f32>() / smoothed_flux.len() as f32;
    let threshold = mean * 1.05;
    let peaks: Vec<usize> = (1..smoothed_flux.len().saturating_sub(1))
        .filter(|&i| {
            smoothed_flux[i] > threshold
                && smoothed_flux[i] > smoothed_flux[i - 1]
                && smoothed_flux[i] > smoothed_flux[i + 1]
        })
        .collect();
    if peaks.is_empty() {
        return Err(AnalysisError::EmptyFlux);
    }

    const MAX_FIRST_BEAT_CANDIDATE_SECONDS: f32 = 45.0;
    let max_candidate_index =
        (MAX_FIRST_BEAT_CANDIDATE_SECONDS * effective_rate / BPM_HOP_SIZE as f32).round() as usize;
    let best_peak = peaks
        .iter()
        .find(|&&p| p <= max_candidate_index)
        .copied()
        .unwrap_or(peaks[0]);

    let refined_peak = if best_peak > 0 && best_peak < smoothed_flux.len() - 1 {
        let y_minus = smoothed_flux[best_peak - 1];
        let y_zero = smoothed_flux[best_peak];
        let y_plus = smoothed_flux[best_peak + 1];
        let denom = y_minus - 2.0 * y_zero + y_plus;
        if denom.abs() > 1e-6 {
            let p = (0.5 * (y_minus - y_plus) / denom).clamp(-0.5, 0.5);
            best_peak as f32 + p
        } else {
            best_peak as f32
        }
    } else {
        best_peak as f32
    };

    let offset_seconds = (refined_peak * BPM_HOP_SIZE as f32 / effective_rate) as f64;
    Ok((bpm, offset_seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(bpm: f32, seconds: f64, rate: u32) -> AudioBuffer {
        let total_frames = (seconds * rate as f64) as usize;
        let spb = 60.0 / bpm as f64;
        let mut samples = vec![0.0_f32; total_frames * 2];
        let mut t = 0.0;
        while t < seconds {
            let frame = (t * rate as f64).round() as usize;
            for i in 0..200.min(total_frames.saturating_sub(frame)) {
                let decay = 1.0 - i as f32 / 200.0;
                let v = decay * 0.9;
                samples[(frame + i) * 2] = v;
                samples[(frame + i) * 2 + 1] = v;
            }
            t += spb;
        }
        AudioBuffer::new(samples, rate)
    }

    #[test]
    fn analyze_estimates_bpm_within_tolerance_on_click_track() {
        let buffer = click_track(128.0, 8.0, 44_100);
        let (bpm, _offset) = analyze(&buffer).expect("analysis should succeed on a clean click track");
        assert!((bpm - 128.0).abs() < 2.0, "estimated bpm {bpm} too far from 128");
    }

    #[test]
    fn analyze_rejects_empty_buffer() {
        let buffer = AudioBuffer::new(Vec::new(), 44_100);
        assert!(analyze(&buffer).is_err());
    }
}
