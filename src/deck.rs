//! A single playback unit: sample cursor, tempo/pitch filter, three-band
//! EQ, and the scalar parameters the audio callback reads lock-free.
//!
//! The mutable, larger state (loaded buffer, cursor, filter, EQ filter
//! state) lives behind one short-held `Mutex` per deck (`DeckInner`),
//! shared by `load`/`seek`/`play`/`stop`/`read` — the only operations
//! that mutate it. Scalar parameters that the callback must read without
//! ever blocking (tempo, pitch, volume, EQ targets, BPM, beat offset, the
//! playing flag) are top-level lock-free atomics on `Deck` itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::{debug, info, warn};

use crate::atomic_float::{AtomicF32, AtomicF64};
use crate::buffer::AudioBuffer;
use crate::config::{
    EQ_GAIN_MAX, EQ_GAIN_MIN, FAST_PATH_PITCH_TOLERANCE_SEMITONES, FAST_PATH_TEMPO_TOLERANCE,
    PITCH_MAX_SEMITONES, PITCH_MIN_SEMITONES, TEMPO_FILTER_SOURCE_CHUNK_FRAMES, TEMPO_MAX,
    TEMPO_MIN, VOLUME_MAX, VOLUME_MIN,
};
use crate::eq::ThreeBandEq;
use crate::tempo::{RubatoTempoFilter, TempoPitchFilter};
use crate::types::{DeckId, EndOfTrack, EndOfTrackCallback};

/// Mutex-guarded state: only touched by `load`, `seek`, `play`, `stop`,
/// and `read` — never by the scalar parameter setters.
struct DeckInner {
    buffer: Option<AudioBuffer>,
    cursor: i64,
    filter: RubatoTempoFilter,
    eq: ThreeBandEq,
    end_of_track_notified: bool,
}

impl DeckInner {
    fn new(sample_rate: u32) -> Self {
        DeckInner {
            buffer: None,
            cursor: 0,
            filter: RubatoTempoFilter::new(2),
            eq: ThreeBandEq::new(sample_rate as f32),
            end_of_track_notified: false,
        }
    }
}

pub struct Deck {
    id: DeckId,
    sample_rate: u32,
    inner: Mutex<DeckInner>,

    playing: AtomicBool,
    tempo_ratio: AtomicF32,
    pitch_semitones: AtomicF32,
    volume: AtomicF32,
    eq_low: AtomicF32,
    eq_mid: AtomicF32,
    eq_high: AtomicF32,
    bpm: AtomicF32,
    beat_offset_seconds: AtomicF64,

    end_of_track_callback: Mutex<Option<EndOfTrackCallback>>,
}

impl Deck {
    pub fn new(id: DeckId, sample_rate: u32) -> Self {
        Deck {
            id,
            sample_rate,
            inner: Mutex::new(DeckInner::new(sample_rate)),
            playing: AtomicBool::new(false),
            tempo_ratio: AtomicF32::new(1.0),
            pitch_semitones: AtomicF32::new(0.0),
            volume: AtomicF32::new(1.0),
            eq_low: AtomicF32::new(1.0),
            eq_mid: AtomicF32::new(1.0),
            eq_high: AtomicF32::new(1.0),
            bpm: AtomicF32::new(0.0),
            beat_offset_seconds: AtomicF64::new(0.0),
            end_of_track_callback: Mutex::new(None),
        }
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    pub fn set_end_of_track_callback(&self, callback: Option<EndOfTrackCallback>) {
        if let Ok(mut slot) = self.end_of_track_callback.lock() {
            *slot = callback;
        }
    }

    /// Replace the loaded buffer. Resets cursor to 0, clears the tempo
    /// filter and EQ state, and leaves the deck paused. Fails if the
    /// buffer's sample rate doesn't match the engine's configured rate
    /// or it isn't stereo.
    pub fn load(&self, buffer: AudioBuffer) -> Result<(), crate::errors::ConfigError> {
        if buffer.sample_rate() != self.sample_rate {
            return Err(crate::errors::ConfigError::InvalidSampleRate(buffer.sample_rate()));
        }
        self.playing.store(false, Ordering::Relaxed);
        let mut inner = self.inner.lock().expect("deck mutex poisoned");
        inner.buffer = Some(buffer);
        inner.cursor = 0;
        inner.filter.clear();
        inner.eq.reset_to(
            self.eq_low.load(Ordering::Relaxed),
            self.eq_mid.load(Ordering::Relaxed),
            self.eq_high.load(Ordering::Relaxed),
        );
        inner.end_of_track_notified = false;
        info!("deck {:?}: loaded track, {} frames", self.id, inner.buffer.as_ref().unwrap().total_frames());
        Ok(())
    }

    pub fn unload(&self) {
        self.playing.store(false, Ordering::Relaxed);
        let mut inner = self.inner.lock().expect("deck mutex poisoned");
        inner.buffer = None;
        inner.cursor = 0;
        inner.filter.clear();
        info!("deck {:?}: unloaded", self.id);
    }

    /// Resume from the current cursor (`start_frame` is `None`), or jump
    /// to `start_frame` and clear the filter before raising the playing
    /// flag, atomically with respect to the callback.
    pub fn play(&self, start_frame: Option<i64>) {
        let mut inner = self.inner.lock().expect("deck mutex poisoned");
        if let Some(frame) = start_frame {
            let total = inner.buffer.as_ref().map(|b| b.total_frames()).unwrap_or(0);
            inner.cursor = frame.clamp(0, total);
            inner.filter.clear();
            inner.end_of_track_notified = false;
        }
        self.playing.store(true, Ordering::Release);
        info!("deck {:?}: play (start_frame={:?})", self.id, start_frame);
    }

    pub fn pause(&self) {
        self.playing.store(false, Ordering::Release);
        info!("deck {:?}: pause", self.id);
    }

    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
        let mut inner = self.inner.lock().expect("deck mutex poisoned");
        inner.cursor = 0;
        inner.filter.clear();
        inner.end_of_track_notified = false;
        info!("deck {:?}: stop", self.id);
    }

    /// Seek to an absolute source-time position, clamped to the buffer's
    /// extent. Clears the filter; any in-flight filtered samples are
    /// discarded (a click is acceptable and expected).
    pub fn seek(&self, seconds: f64) {
        let mut inner = self.inner.lock().expect("deck mutex poisoned");
        self.seek_locked(&mut inner, seconds);
    }

    fn seek_locked(&self, inner: &mut DeckInner, seconds: f64) {
        let total = inner.buffer.as_ref().map(|b| b.total_frames()).unwrap_or(0);
        let frame = (seconds * self.sample_rate as f64).round() as i64;
        inner.cursor = frame.clamp(0, total);
        inner.filter.clear();
        inner.end_of_track_notified = false;
        debug!("deck {:?}: seek to {:.3}s (frame {})", self.id, seconds, inner.cursor);
    }

    /// Set the source cursor directly to a frame index (used by the sync
    /// manager's `align_now`/`play_synced`), clearing the filter the same
    /// way a seek does.
    pub(crate) fn set_cursor_frame(&self, frame: i64) {
        let mut inner = self.inner.lock().expect("deck mutex poisoned");
        let total = inner.buffer.as_ref().map(|b| b.total_frames()).unwrap_or(0);
        inner.cursor = frame.clamp(0, total);
        inner.filter.clear();
        inner.end_of_track_notified = false;
    }

    /// Nudge the cursor by a signed number of frames without clearing the
    /// filter — used by the sync manager's steady-state phase corrector,
    /// which must not introduce an audible discontinuity.
    pub(crate) fn nudge_cursor_frames(&self, delta_frames: i64) {
        let mut inner = self.inner.lock().expect("deck mutex poisoned");
        let total = inner.buffer.as_ref().map(|b| b.total_frames()).unwrap_or(0);
        inner.cursor = (inner.cursor + delta_frames).clamp(0, total);
    }

    pub(crate) fn cursor_frame(&self) -> i64 {
        let inner = self.inner.lock().expect("deck mutex poisoned");
        inner.cursor
    }

    pub fn get_position(&self) -> f64 {
        self.cursor_frame() as f64 / self.sample_rate as f64
    }

    pub fn get_duration(&self) -> f64 {
        let inner = self.inner.lock().expect("deck mutex poisoned");
        inner.buffer.as_ref().map(|b| b.duration_seconds()).unwrap_or(0.0)
    }

    /// Clones the `Arc`-backed sample handle of whatever is currently
    /// loaded, for off-the-real-time-path analysis (BPM/beat detection).
    pub(crate) fn snapshot_buffer(&self) -> Option<AudioBuffer> {
        let inner = self.inner.lock().expect("deck mutex poisoned");
        inner.buffer.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_tempo(&self, ratio: f32) {
        let clamped = ratio.clamp(TEMPO_MIN, TEMPO_MAX);
        self.tempo_ratio.store(clamped, Ordering::Relaxed);
        debug!("deck {:?}: set_tempo {:.4}", self.id, clamped);
    }

    pub fn get_tempo(&self) -> f32 {
        self.tempo_ratio.load(Ordering::Relaxed)
    }

    pub fn set_pitch(&self, semitones: f32) {
        let clamped = semitones.clamp(PITCH_MIN_SEMITONES, PITCH_MAX_SEMITONES);
        self.pitch_semitones.store(clamped, Ordering::Relaxed);
        debug!("deck {:?}: set_pitch {:.2}", self.id, clamped);
    }

    pub fn get_pitch(&self) -> f32 {
        self.pitch_semitones.load(Ordering::Relaxed)
    }

    pub fn set_volume(&self, volume: f32) {
        let clamped = volume.clamp(VOLUME_MIN, VOLUME_MAX);
        self.volume.store(clamped, Ordering::Relaxed);
        debug!("deck {:?}: set_volume {:.3}", self.id, clamped);
    }

    pub fn get_volume(&self) -> f32 {
        self.volume.load(Ordering::Relaxed)
    }

    pub fn set_eq_low(&self, gain: f32) {
        self.eq_low.store(gain.clamp(EQ_GAIN_MIN, EQ_GAIN_MAX), Ordering::Relaxed);
    }
    pub fn set_eq_mid(&self, gain: f32) {
        self.eq_mid.store(gain.clamp(EQ_GAIN_MIN, EQ_GAIN_MAX), Ordering::Relaxed);
    }
    pub fn set_eq_high(&self, gain: f32) {
        self.eq_high.store(gain.clamp(EQ_GAIN_MIN, EQ_GAIN_MAX), Ordering::Relaxed);
    }

    pub fn get_eq_low(&self) -> f32 {
        self.eq_low.load(Ordering::Relaxed)
    }
    pub fn get_eq_mid(&self) -> f32 {
        self.eq_mid.load(Ordering::Relaxed)
    }
    pub fn get_eq_high(&self) -> f32 {
        self.eq_high.load(Ordering::Relaxed)
    }

    pub fn set_bpm(&self, bpm: f32) {
        self.bpm.store(bpm.max(0.0), Ordering::Relaxed);
    }

    pub fn get_bpm(&self) -> f32 {
        self.bpm.load(Ordering::Relaxed)
    }

    pub fn set_beat_offset(&self, seconds: f64) {
        self.beat_offset_seconds.store(seconds, Ordering::Relaxed);
    }

    pub fn get_beat_offset(&self) -> f64 {
        self.beat_offset_seconds.load(Ordering::Relaxed)
    }

    /// Writes `frames` interleaved stereo frames into `dest` (length
    /// `frames * 2`) and returns `frames`. Always fully written; the
    /// silent tail (no buffer, paused, or end-of-track) stays zeroed.
    pub fn read(&self, dest: &mut [f32], frames: usize) -> usize {
        debug_assert_eq!(dest.len(), frames * 2);
        for sample in dest.iter_mut() {
            *sample = 0.0;
        }

        if !self.is_playing() {
            return frames;
        }

        let mut inner = self.inner.lock().expect("deck mutex poisoned");
        if inner.buffer.is_none() {
            return frames;
        }

        let tempo = self.tempo_ratio.load(Ordering::Relaxed);
        let pitch = self.pitch_semitones.load(Ordering::Relaxed);
        let near_identity = (tempo - 1.0).abs() <= FAST_PATH_TEMPO_TOLERANCE
            && pitch.abs() <= FAST_PATH_PITCH_TOLERANCE_SEMITONES;

        let written = if near_identity {
            self.read_fast_path(&mut inner, dest, frames)
        } else {
            self.read_filtered_path(&mut inner, dest, frames, tempo, pitch)
        };

        let active = &mut dest[..written * 2];

        let eq_low = self.eq_low.load(Ordering::Relaxed);
        let eq_mid = self.eq_mid.load(Ordering::Relaxed);
        let eq_high = self.eq_high.load(Ordering::Relaxed);
        inner.eq.process_block(active, eq_low, eq_mid, eq_high);

        let volume = self.volume.load(Ordering::Relaxed);
        if (volume - 1.0).abs() > f32::EPSILON {
            for sample in active.iter_mut() {
                *sample *= volume;
            }
        }

        drop(inner);
        if written < frames {
            self.notify_end_of_track_if_needed();
        }

        frames
    }

    /// Copies directly from the source buffer with no filter involvement
    /// at all, so it is bit-identical to the source — the sync-critical
    /// path relied on for sample-exact alignment.
    fn read_fast_path(&self, inner: &mut DeckInner, dest: &mut [f32], frames: usize) -> usize {
        let buffer = inner.buffer.as_ref().expect("checked by caller");
        let total = buffer.total_frames();
        let mut written = 0usize;
        for f in 0..frames {
            let source_frame = inner.cursor + f as i64;
            if source_frame >= total {
                break;
            }
            let [l, r] = buffer.frame_at(source_frame);
            dest[f * 2] = l;
            dest[f * 2 + 1] = r;
            written += 1;
        }
        inner.cursor += written as i64;
        if inner.cursor >= total {
            self.playing.store(false, Ordering::Release);
        }
        written
    }

    /// Pulls source chunks into the tempo/pitch filter until it has at
    /// least `frames` of output buffered, then drains `frames` out.
    fn read_filtered_path(
        &self,
        inner: &mut DeckInner,
        dest: &mut [f32],
        frames: usize,
        tempo: f32,
        pitch: f32,
    ) -> usize {
        inner.filter.set_tempo(tempo);
        inner.filter.set_pitch(pitch);

        let buffer = inner.buffer.as_ref().expect("checked by caller").clone();
        let total = buffer.total_frames();
        let mut source_exhausted = inner.cursor >= total;

        let mut chunk = [0.0f32; TEMPO_FILTER_SOURCE_CHUNK_FRAMES * 2];
        while inner.filter.available_frames() < frames && !source_exhausted {
            let remaining = (total - inner.cursor).max(0) as usize;
            let take = remaining.min(TEMPO_FILTER_SOURCE_CHUNK_FRAMES);
            if take == 0 {
                source_exhausted = true;
                break;
            }
            for f in 0..take {
                let [l, r] = buffer.frame_at(inner.cursor + f as i64);
                chunk[f * 2] = l;
                chunk[f * 2 + 1] = r;
            }
            inner.filter.push(&chunk[..take * 2]);
            inner.cursor += take as i64;
            if inner.cursor >= total {
                source_exhausted = true;
            }
        }

        let written = inner.filter.pull(dest, frames);
        if source_exhausted && inner.filter.available_frames() == 0 {
            self.playing.store(false, Ordering::Release);
        }
        written
    }

    fn notify_end_of_track_if_needed(&self) {
        let mut inner = self.inner.lock().expect("deck mutex poisoned");
        if inner.end_of_track_notified || self.playing.load(Ordering::Acquire) {
            return;
        }
        inner.end_of_track_notified = true;
        drop(inner);
        if let Ok(slot) = self.end_of_track_callback.lock() {
            if let Some(callback) = slot.as_ref() {
                callback(EndOfTrack { deck_id: self.id });
            } else {
                warn!("deck {:?}: end-of-track with no registered callback", self.id);
            }
        }
    }
}
