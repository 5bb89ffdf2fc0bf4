//! Equal-power crossfade of the two decks, plus a soft clip on the
//! combined output.

use std::sync::atomic::Ordering;

use crate::atomic_float::AtomicF32;
use crate::config::{CROSSFADER_MAX, CROSSFADER_MIN};
use crate::deck::Deck;

pub struct Mixer {
    crossfader: AtomicF32,
}

impl Default for Mixer {
    fn default() -> Self {
        Mixer {
            crossfader: AtomicF32::new(0.5),
        }
    }
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_crossfader(&self, position: f32) {
        let clamped = position.clamp(CROSSFADER_MIN, CROSSFADER_MAX);
        self.crossfader.store(clamped, Ordering::Relaxed);
    }

    pub fn crossfader(&self) -> f32 {
        self.crossfader.load(Ordering::Relaxed)
    }

    /// Equal-power gain pair for the current crossfader position:
    /// `g_a^2 + g_b^2 == 1` everywhere.
    pub fn equal_power_gains(&self) -> (f32, f32) {
        let x = self.crossfader();
        let theta = x * std::f32::consts::FRAC_PI_2;
        (theta.cos(), theta.sin())
    }

    /// Reads `frames` frames from each deck into `scratch_a`/`scratch_b`,
    /// blends them under the equal-power law, soft-clips, and writes the
    /// result into `output` (all interleaved stereo, `frames * 2` floats).
    pub fn mix(
        &self,
        deck_a: &Deck,
        deck_b: &Deck,
        output: &mut [f32],
        scratch_a: &mut [f32],
        scratch_b: &mut [f32],
        frames: usize,
    ) {
        debug_assert_eq!(output.len(), frames * 2);
        debug_assert_eq!(scratch_a.len(), frames * 2);
        debug_assert_eq!(scratch_b.len(), frames * 2);

        deck_a.read(scratch_a, frames);
        deck_b.read(scratch_b, frames);

        let (gain_a, gain_b) = self.equal_power_gains();

        for i in 0..frames * 2 {
            let mixed = scratch_a[i] * gain_a + scratch_b[i] * gain_b;
            output[i] = soft_clip(mixed);
        }
    }
}

/// Folds magnitudes above 1.0 toward ±1 via an exponential curve so
/// saturation is continuous (no hard clipping discontinuity).
#[inline]
pub fn soft_clip(sample: f32) -> f32 {
    let mag = sample.abs();
    if mag <= 1.0 {
        sample
    } else {
        sample.signum() * (1.0 - (1.0 - mag).exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_power_holds_across_sweep() {
        let mixer = Mixer::new();
        let mut x = 0.0f32;
        while x <= 1.0 {
            mixer.set_crossfader(x);
            let (ga, gb) = mixer.equal_power_gains();
            let power = ga * ga + gb * gb;
            assert!((power - 1.0).abs() < 1e-6, "x={x} power={power}");
            x += 0.01;
        }
    }

    #[test]
    fn crossfader_endpoints_isolate_each_deck() {
        let mixer = Mixer::new();
        mixer.set_crossfader(0.0);
        let (ga, gb) = mixer.equal_power_gains();
        assert!((ga - 1.0).abs() < 1e-6);
        assert!(gb.abs() < 1e-6);

        mixer.set_crossfader(1.0);
        let (ga, gb) = mixer.equal_power_gains();
        assert!(ga.abs() < 1e-6);
        assert!((gb - 1.0).abs() < 1e-6);
    }

    #[test]
    fn soft_clip_is_monotonic_and_bounded() {
        let xs: Vec<f32> = (-300..=300).map(|i| i as f32 / 100.0).collect();
        let mut prev = f32::NEG_INFINITY;
        for &x in &xs {
            let y = soft_clip(x);
            assert!(y.abs() <= 1.0 + 1e-6, "y={y} out of bounds for x={x}");
            assert!(y >= prev - 1e-6, "not monotonic at x={x}: prev={prev} y={y}");
            prev = y;
        }
    }

    #[test]
    fn soft_clip_identity_within_unit_range() {
        for x in [-1.0, -0.5, 0.0, 0.5, 1.0] {
            assert!((soft_clip(x) - x).abs() < 1e-6);
        }
    }
}
