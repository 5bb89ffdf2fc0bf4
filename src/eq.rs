//! Three-band EQ: low-shelf, mid-peak, high-shelf biquads cascaded in
//! series per channel. Cascading (rather than summing three independently
//! filtered copies and dividing by three, which attenuates even the
//! flat-response case) means unity gains on every band already reproduce
//! the input exactly.

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type};

use crate::config::{
    EQ_RECALC_THRESHOLD, EQ_SMOOTHING_FACTOR, LOW_MID_CROSSOVER_HZ, MID_CENTER_HZ,
    MID_HIGH_CROSSOVER_HZ, MID_PEAK_Q_FACTOR, SHELF_Q_FACTOR,
};

fn linear_to_db(linear_gain: f32) -> f32 {
    if linear_gain <= 1e-4 {
        -80.0
    } else {
        20.0 * linear_gain.log10()
    }
}

fn low_shelf_coeffs(sample_rate: f32, linear_gain: f32) -> Coefficients<f32> {
    Coefficients::<f32>::from_params(
        Type::LowShelf(linear_to_db(linear_gain)),
        sample_rate.hz(),
        LOW_MID_CROSSOVER_HZ.hz(),
        SHELF_Q_FACTOR,
    )
    .unwrap_or(Coefficients {
        a1: 0.0,
        a2: 0.0,
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
    })
}

fn mid_peak_coeffs(sample_rate: f32, linear_gain: f32) -> Coefficients<f32> {
    Coefficients::<f32>::from_params(
        Type::PeakingEQ(linear_to_db(linear_gain)),
        sample_rate.hz(),
        MID_CENTER_HZ.hz(),
        MID_PEAK_Q_FACTOR,
    )
    .unwrap_or(Coefficients {
        a1: 0.0,
        a2: 0.0,
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
    })
}

fn high_shelf_coeffs(sample_rate: f32, linear_gain: f32) -> Coefficients<f32> {
    Coefficients::<f32>::from_params(
        Type::HighShelf(linear_to_db(linear_gain)),
        sample_rate.hz(),
        MID_HIGH_CROSSOVER_HZ.hz(),
        SHELF_Q_FACTOR,
    )
    .unwrap_or(Coefficients {
        a1: 0.0,
        a2: 0.0,
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
    })
}

struct ChannelChain {
    low: DirectForm1<f32>,
    mid: DirectForm1<f32>,
    high: DirectForm1<f32>,
}

impl ChannelChain {
    fn new(sample_rate: f32) -> Self {
        ChannelChain {
            low: DirectForm1::<f32>::new(low_shelf_coeffs(sample_rate, 1.0)),
            mid: DirectForm1::<f32>::new(mid_peak_coeffs(sample_rate, 1.0)),
            high: DirectForm1::<f32>::new(high_shelf_coeffs(sample_rate, 1.0)),
        }
    }

    #[inline]
    fn process(&mut self, sample: f32) -> f32 {
        let s = self.low.run(sample);
        let s = self.mid.run(s);
        self.high.run(s)
    }

    fn update(&mut self, sample_rate: f32, low: f32, mid: f32, high: f32) {
        self.low.update_coefficients(low_shelf_coeffs(sample_rate, low));
        self.mid.update_coefficients(mid_peak_coeffs(sample_rate, mid));
        self.high
            .update_coefficients(high_shelf_coeffs(sample_rate, high));
    }
}

/// Per-deck three-band EQ. Target gains are owned by the caller (`Deck`
/// keeps them as lock-free atomics so they can be set without contending
/// with the audio thread); this struct only holds the filter state that
/// the audio thread mutates while applying them.
pub struct ThreeBandEq {
    sample_rate: f32,
    applied_low: f32,
    applied_mid: f32,
    applied_high: f32,
    left: ChannelChain,
    right: ChannelChain,
}

impl ThreeBandEq {
    pub fn new(sample_rate: f32) -> Self {
        ThreeBandEq {
            sample_rate,
            applied_low: 1.0,
            applied_mid: 1.0,
            applied_high: 1.0,
            left: ChannelChain::new(sample_rate),
            right: ChannelChain::new(sample_rate),
        }
    }

    /// Snap both channels to the given gains with no smoothing ramp.
    /// Used on load/seek alongside the tempo filter's `clear` so a fresh
    /// track starts without residual filter ringing from the previous one.
    pub fn reset_to(&mut self, low: f32, mid: f32, high: f32) {
        self.applied_low = low;
        self.applied_mid = mid;
        self.applied_high = high;
        self.left.update(self.sample_rate, low, mid, high);
        self.right.update(self.sample_rate, low, mid, high);
    }

    fn smooth_toward_targets(&mut self, target_low: f32, target_mid: f32, target_high: f32) {
        let new_low = self.applied_low + (target_low - self.applied_low) * EQ_SMOOTHING_FACTOR;
        let new_mid = self.applied_mid + (target_mid - self.applied_mid) * EQ_SMOOTHING_FACTOR;
        let new_high = self.applied_high + (target_high - self.applied_high) * EQ_SMOOTHING_FACTOR;

        let changed = (new_low - self.applied_low).abs() > EQ_RECALC_THRESHOLD
            || (new_mid - self.applied_mid).abs() > EQ_RECALC_THRESHOLD
            || (new_high - self.applied_high).abs() > EQ_RECALC_THRESHOLD;

        self.applied_low = new_low;
        self.applied_mid = new_mid;
        self.applied_high = new_high;

        if changed {
            self.left
                .update(self.sample_rate, self.applied_low, self.applied_mid, self.applied_high);
            self.right
                .update(self.sample_rate, self.applied_low, self.applied_mid, self.applied_high);
        }
    }

    /// Apply the EQ in place to an interleaved stereo buffer, smoothing
    /// applied gains toward `target_*` once per call.
    pub fn process_block(
        &mut self,
        interleaved_stereo: &mut [f32],
        target_low: f32,
        target_mid: f32,
        target_high: f32,
    ) {
        self.smooth_toward_targets(target_low, target_mid, target_high);
        let frames = interleaved_stereo.len() / 2;
        for f in 0..frames {
            let l = interleaved_stereo[f * 2];
            let r = interleaved_stereo[f * 2 + 1];
            interleaved_stereo[f * 2] = self.left.process(l);
            interleaved_stereo[f * 2 + 1] = self.right.process(r);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_gains_are_passband_identity() {
        let mut eq = ThreeBandEq::new(44_100.0);
        eq.reset_to(1.0, 1.0, 1.0);
        let mut buf = vec![0.3_f32, -0.3, 0.1, -0.1, 0.5, -0.5];
        let input = buf.clone();
        // Run several blocks so any IIR transient settles.
        for _ in 0..8 {
            eq.process_block(&mut buf, 1.0, 1.0, 1.0);
        }
        for (out, inp) in buf.iter().zip(input.iter()) {
            assert!((out - inp).abs() < 1e-3, "out={out} inp={inp}");
        }
    }

    #[test]
    fn gain_changes_ramp_toward_target_not_snap() {
        let mut eq = ThreeBandEq::new(44_100.0);
        eq.reset_to(1.0, 1.0, 1.0);
        let before = eq.applied_low;
        let mut buf = vec![0.0_f32; 4];
        eq.process_block(&mut buf, 0.0, 1.0, 1.0);
        assert!(eq.applied_low < before);
        assert!(eq.applied_low > 0.0, "should not jump straight to target");
    }
}
