//! The tempo/pitch-shifting DSP is treated as an external collaborator
//! specified only by its contract: a streaming time-scaling
//! filter with its own internal latency buffer that the deck pushes
//! source frames into and pulls tempo/pitch-adjusted frames out of.
//!
//! `TempoPitchFilter` is that contract. `RubatoTempoFilter` is a concrete,
//! reservoir-buffered `rubato`-backed implementation, following the
//! push/collect/reservoir pattern used for streaming time stretching
//! elsewhere in this domain (`sujay_audio`'s `TimeStretcher`, which wraps
//! SoundTouch the same way). `rubato` itself is a sample-rate converter,
//! not an independent pitch/tempo engine, so here pitch and tempo are
//! combined into a single resampling ratio before being handed to it — a
//! documented simplification (DESIGN.md); DJ hardware historically ties
//! pitch to tempo the same way ("vari-speed").

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::collections::VecDeque;

use crate::config::{TEMPO_FILTER_SOURCE_CHUNK_FRAMES, TEMPO_MAX, TEMPO_MIN};

/// A streaming, interleaved-stereo time-scaling filter.
pub trait TempoPitchFilter: Send {
    /// Set the tempo ratio (1.0 = unchanged). Takes effect on already
    /// unconsumed input at the next `push`.
    fn set_tempo(&mut self, ratio: f32);
    /// Set the pitch shift, in semitones (0 = unchanged).
    fn set_pitch(&mut self, semitones: f32);
    /// Discard all buffered input/output state. Must not allocate.
    fn clear(&mut self);
    /// Feed interleaved stereo source frames in.
    fn push(&mut self, interleaved_stereo: &[f32]);
    /// Frames of tempo/pitch-adjusted output currently available via `pull`.
    fn available_frames(&self) -> usize;
    /// Draw up to `frames` interleaved stereo frames out. Returns the
    /// number of frames actually written (may be less than `frames`).
    fn pull(&mut self, out: &mut [f32], frames: usize) -> usize;
}

fn semitones_to_ratio(semitones: f32) -> f32 {
    2f32.powf(semitones / 12.0)
}

/// `rubato`-backed implementation. Combines the deck's tempo ratio and
/// pitch semitone shift into one playback-rate multiplier.
pub struct RubatoTempoFilter {
    resampler: SincFixedIn<f32>,
    chunk_frames: usize,
    channels: usize,
    tempo_ratio: f32,
    pitch_semitones: f32,
    applied_ratio: f32,
    input_staging: Vec<Vec<f32>>,
    reservoir: VecDeque<f32>,
}

impl RubatoTempoFilter {
    pub fn new(channels: usize) -> Self {
        let chunk_frames = TEMPO_FILTER_SOURCE_CHUNK_FRAMES;
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let resampler = SincFixedIn::<f32>::new(
            1.0,
            TEMPO_MAX as f64 / TEMPO_MIN as f64,
            params,
            chunk_frames,
            channels,
        )
        .expect("valid rubato resampler parameters");

        RubatoTempoFilter {
            resampler,
            chunk_frames,
            channels,
            tempo_ratio: 1.0,
            pitch_semitones: 0.0,
            applied_ratio: 1.0,
            input_staging: vec![Vec::with_capacity(chunk_frames); channels],
            reservoir: VecDeque::new(),
        }
    }

    fn target_ratio(&self) -> f32 {
        (self.tempo_ratio * semitones_to_ratio(self.pitch_semitones))
            .clamp(TEMPO_MIN * 0.5, TEMPO_MAX * 2.0)
    }

    fn sync_ratio_if_needed(&mut self) {
        let target = self.target_ratio();
        if (target - self.applied_ratio).abs() > 1e-4 {
            // rubato resamples at 1/ratio: a ratio > 1 (faster) maps to an
            // output/input ratio below 1 (fewer output frames per input frame).
            let resample_ratio = 1.0 / target as f64;
            if self
                .resampler
                .set_resample_ratio(resample_ratio, true)
                .is_ok()
            {
                self.applied_ratio = target;
            }
        }
    }

    fn process_staged_chunk(&mut self) {
        if self.input_staging[0].len() < self.chunk_frames {
            return;
        }
        self.sync_ratio_if_needed();
        let chunk: Vec<Vec<f32>> = self
            .input_staging
            .iter_mut()
            .map(|ch| ch.drain(..self.chunk_frames).collect())
            .collect();
        if let Ok(output) = self.resampler.process(&chunk, None) {
            let out_frames = output[0].len();
            for frame in 0..out_frames {
                for ch in 0..self.channels {
                    self.reservoir.push_back(output[ch][frame]);
                }
            }
        }
    }
}

impl TempoPitchFilter for RubatoTempoFilter {
    fn set_tempo(&mut self, ratio: f32) {
        self.tempo_ratio = ratio.clamp(TEMPO_MIN, TEMPO_MAX);
    }

    fn set_pitch(&mut self, semitones: f32) {
        self.pitch_semitones = semitones;
    }

    fn clear(&mut self) {
        self.resampler.reset();
        for ch in self.input_staging.iter_mut() {
            ch.clear();
        }
        self.reservoir.clear();
    }

    fn push(&mut self, interleaved_stereo: &[f32]) {
        let frames = interleaved_stereo.len() / self.channels;
        for f in 0..frames {
            for ch in 0..self.channels {
                self.input_staging[ch].push(interleaved_stereo[f * self.channels + ch]);
            }
        }
        while self.input_staging[0].len() >= self.chunk_frames {
            self.process_staged_chunk();
        }
    }

    fn available_frames(&self) -> usize {
        self.reservoir.len() / self.channels
    }

    fn pull(&mut self, out: &mut [f32], frames: usize) -> usize {
        let available = self.available_frames();
        let to_pull = frames.min(available);
        for f in 0..to_pull {
            for ch in 0..self.channels {
                out[f * self.channels + ch] = self.reservoir.pop_front().unwrap_or(0.0);
            }
        }
        to_pull
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ratio_preserves_frame_count_roughly() {
        let mut filter = RubatoTempoFilter::new(2);
        let chunk = TEMPO_FILTER_SOURCE_CHUNK_FRAMES;
        let input: Vec<f32> = (0..chunk * 2).map(|i| (i % 2) as f32).collect();
        filter.push(&input);
        assert!(filter.available_frames() > 0);
    }

    #[test]
    fn clear_drops_buffered_state() {
        let mut filter = RubatoTempoFilter::new(2);
        let chunk = TEMPO_FILTER_SOURCE_CHUNK_FRAMES;
        filter.push(&vec![0.1; chunk * 2]);
        assert!(filter.available_frames() > 0);
        filter.clear();
        assert_eq!(filter.available_frames(), 0);
    }

    #[test]
    fn semitone_to_ratio_is_identity_at_zero() {
        assert!((semitones_to_ratio(0.0) - 1.0).abs() < 1e-6);
    }
}
