use std::sync::Arc;

/// An immutable, in-memory array of interleaved stereo float PCM, plus its
/// source sample rate. Produced by an external decoder and shared
/// read-only by a deck once loaded.
#[derive(Clone)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// `samples` must be interleaved stereo (an even number of channel
    /// values per frame); `sample_rate` is the rate the samples were
    /// produced at.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        assert_eq!(
            samples.len() % 2,
            0,
            "AudioBuffer requires an even number of interleaved stereo samples"
        );
        AudioBuffer {
            samples: Arc::from(samples),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn total_frames(&self) -> i64 {
        (self.samples.len() / 2) as i64
    }

    pub fn duration_seconds(&self) -> f64 {
        self.total_frames() as f64 / self.sample_rate as f64
    }

    /// Interleaved L/R pair at `frame`, or silence if out of range.
    #[inline]
    pub fn frame_at(&self, frame: i64) -> [f32; 2] {
        if frame < 0 || frame >= self.total_frames() {
            return [0.0, 0.0];
        }
        let base = (frame as usize) * 2;
        [self.samples[base], self.samples[base + 1]]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_at_out_of_range_is_silence() {
        let buf = AudioBuffer::new(vec![1.0, -1.0, 0.5, -0.5], 44_100);
        assert_eq!(buf.total_frames(), 2);
        assert_eq!(buf.frame_at(-1), [0.0, 0.0]);
        assert_eq!(buf.frame_at(2), [0.0, 0.0]);
        assert_eq!(buf.frame_at(0), [1.0, -1.0]);
        assert_eq!(buf.frame_at(1), [0.5, -0.5]);
    }

    #[test]
    fn duration_matches_frames_over_rate() {
        let buf = AudioBuffer::new(vec![0.0; 2 * 44_100], 44_100);
        assert!((buf.duration_seconds() - 1.0).abs() < 1e-9);
    }
}
