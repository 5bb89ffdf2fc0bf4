//! Owns exactly one output stream, the two decks, the mixer, and the
//! sync manager; exposes the flat command surface and runs the
//! real-time callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error, info, warn};

use crate::analysis;
use crate::config::POSITION_UPDATE_INTERVAL_MS;
use crate::decoding;
use crate::deck::Deck;
use crate::errors::{ConfigError, DeviceError, EngineError};
use crate::mixer::Mixer;
use crate::sync::SyncManager;
use crate::types::{DeckId, EqParams, PositionCallback, PositionUpdate};

struct Notifications {
    position: Mutex<Option<PositionCallback>>,
}

impl Default for Notifications {
    fn default() -> Self {
        Notifications {
            position: Mutex::new(None),
        }
    }
}

/// The mixing state the audio callback touches, held behind an `Arc` so
/// `start` can clone a handle into the `cpal` closure without requiring
/// `Engine` itself to be `'static` — grounded on `sujay_audio`'s
/// `Arc::clone(&state)` pattern for the same problem.
struct EngineCore {
    sample_rate: u32,
    deck_a: Deck,
    deck_b: Deck,
    mixer: Mixer,
    sync: Mutex<SyncManager>,
    callback_counter: AtomicU64,
    notifications: Notifications,
}

impl EngineCore {
    fn deck(&self, id: DeckId) -> &Deck {
        match id {
            DeckId::Zero => &self.deck_a,
            DeckId::One => &self.deck_b,
        }
    }

    /// The pure, device-independent callback body: sync update, mix,
    /// soft-clip, and the position-update/notification tick.
    fn process(&self, output: &mut [f32], frames: usize) {
        if let Ok(mut sync) = self.sync.try_lock() {
            sync.update(&self.deck_a, &self.deck_b);
        }

        let mut scratch_a = vec![0.0f32; frames * 2];
        let mut scratch_b = vec![0.0f32; frames * 2];
        self.mixer.mix(&self.deck_a, &self.deck_b, output, &mut scratch_a, &mut scratch_b, frames);

        let previous = self.callback_counter.fetch_add(1, Ordering::Relaxed);
        let callbacks_per_tick =
            ((POSITION_UPDATE_INTERVAL_MS as f64 / 1000.0) * self.sample_rate as f64 / frames.max(1) as f64)
                .round()
                .max(1.0) as u64;
        if (previous + 1) % callbacks_per_tick == 0 {
            self.emit_position_updates();
        }
    }

    fn emit_position_updates(&self) {
        if let Ok(slot) = self.notifications.position.lock() {
            if let Some(callback) = slot.as_ref() {
                callback(PositionUpdate {
                    deck_id: DeckId::Zero,
                    position_seconds: self.deck_a.get_position(),
                });
                callback(PositionUpdate {
                    deck_id: DeckId::One,
                    position_seconds: self.deck_b.get_position(),
                });
            }
        }
    }
}

/// `cpal::Stream` is only ever touched from the control thread that calls
/// `start`/`stop` (the audio callback thread only ever sees the `Arc<EngineCore>`
/// captured at stream-build time), so it's safe to store behind a `Mutex`
/// shared across threads even on backends where `Stream` itself isn't `Sync`.
struct StreamHandle(cpal::Stream);
unsafe impl Send for StreamHandle {}
unsafe impl Sync for StreamHandle {}

/// The real-time mixing core. `init` opens an audio device; `process`
/// is the pure callback body, callable directly in tests with no
/// device at all.
pub struct Engine {
    buffer_size: u32,
    core: Arc<EngineCore>,
    stream: Mutex<Option<StreamHandle>>,
}

impl Engine {
    /// Constructs the core with no device opened yet: decks, mixer, and
    /// sync manager, but no host/device/stream — those are acquired in
    /// `start`.
    pub fn init(sample_rate: u32, buffer_size: u32) -> Result<Self, EngineError> {
        if sample_rate == 0 {
            return Err(EngineError::Config(ConfigError::InvalidSampleRate(sample_rate)));
        }
        if buffer_size == 0 {
            return Err(EngineError::Config(ConfigError::ZeroBufferSize));
        }
        info!("engine: init sample_rate={sample_rate} buffer_size={buffer_size}");
        let core = EngineCore {
            sample_rate,
            deck_a: Deck::new(DeckId::Zero, sample_rate),
            deck_b: Deck::new(DeckId::One, sample_rate),
            mixer: Mixer::new(),
            sync: Mutex::new(SyncManager::new()),
            callback_counter: AtomicU64::new(0),
            notifications: Notifications::default(),
        };
        Ok(Engine {
            buffer_size,
            core: Arc::new(core),
            stream: Mutex::new(None),
        })
    }

    pub fn set_position_callback(&self, callback: Option<PositionCallback>) {
        if let Ok(mut slot) = self.core.notifications.position.lock() {
            *slot = callback;
        }
    }

    pub fn set_end_of_track_callback(&self, deck_id: DeckId, callback: Option<crate::types::EndOfTrackCallback>) {
        self.core.deck(deck_id).set_end_of_track_callback(callback);
    }

    /// Registers an output device (preferring a low-latency/ASIO host
    /// where `cpal`'s build exposes one, else the platform default) and
    /// opens a stereo float32 output stream at the configured rate and
    /// buffer size, wiring `process` in as the data callback.
    pub fn start(&self) -> Result<(), EngineError> {
        {
            let guard = self.stream.lock().expect("stream mutex poisoned");
            if guard.is_some() {
                return Err(EngineError::Device(DeviceError::AlreadyInitialized));
            }
        }

        let host = preferred_host();
        let device = host
            .default_output_device()
            .ok_or(EngineError::Device(DeviceError::NoDeviceAvailable))?;

        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(self.core.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.buffer_size),
        };

        let error_callback = |err: cpal::StreamError| {
            error!("engine: cpal stream error: {err}");
        };

        let core_for_callback = Arc::clone(&self.core);
        let stream = device
            .build_output_stream(
                &config,
                move |output: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let frames = output.len() / 2;
                    core_for_callback.process(output, frames);
                },
                error_callback,
                None,
            )
            .map_err(|e| EngineError::Device(DeviceError::StreamOpenFailed(e.to_string())))?;

        stream
            .play()
            .map_err(|e| EngineError::Device(DeviceError::StreamOpenFailed(e.to_string())))?;

        *self.stream.lock().expect("stream mutex poisoned") = Some(StreamHandle(stream));
        info!("engine: started output stream");
        Ok(())
    }

    /// Blocks until the driver has drained and closed the stream.
    pub fn stop(&self) {
        let mut guard = self.stream.lock().expect("stream mutex poisoned");
        if let Some(StreamHandle(stream)) = guard.take() {
            if let Err(e) = stream.pause() {
                warn!("engine: error pausing stream on stop: {e}");
            }
        }
        info!("engine: stopped");
    }

    pub fn shutdown(&self) {
        self.stop();
        self.core.deck_a.unload();
        self.core.deck_b.unload();
        info!("engine: shutdown");
    }

    /// The pure, device-independent callback body: sync update, mix,
    /// soft-clip, and the position-update/notification tick. `start`
    /// wires this into a real `cpal` stream; tests call it directly
    /// without opening an audio device.
    pub fn process(&self, output: &mut [f32], frames: usize) {
        self.core.process(output, frames);
    }

    // --- Per-deck command surface ---

    pub fn load(&self, deck_id: DeckId, path: &str) -> Result<(), EngineError> {
        let buffer = decoding::load_to_engine_rate(path, self.core.sample_rate)?;
        self.core.deck(deck_id).load(buffer)?;
        Ok(())
    }

    /// Loads an already-decoded buffer directly, bypassing the file
    /// decoder. Useful for hosts that decode out of band, and for tests
    /// that need fixture PCM without touching the filesystem.
    pub fn load_buffer(&self, deck_id: DeckId, buffer: crate::buffer::AudioBuffer) -> Result<(), EngineError> {
        self.core.deck(deck_id).load(buffer)?;
        Ok(())
    }

    pub fn unload(&self, deck_id: DeckId) {
        self.core.deck(deck_id).unload();
    }

    pub fn play(&self, deck_id: DeckId) {
        self.core.deck(deck_id).play(None);
    }

    pub fn play_synced(&self, deck_id: DeckId, master_id: DeckId) {
        debug_assert_eq!(deck_id.other(), master_id);
        let mut sync = self.core.sync.lock().expect("sync mutex poisoned");
        sync.enable(deck_id, master_id);
        let slave = self.core.deck(deck_id);
        let master = self.core.deck(master_id);
        sync.play_synced(slave, master);
    }

    pub fn pause(&self, deck_id: DeckId) {
        self.core.deck(deck_id).pause();
    }

    pub fn deck_stop(&self, deck_id: DeckId) {
        self.core.deck(deck_id).stop();
    }

    pub fn set_position(&self, deck_id: DeckId, seconds: f64) {
        self.core.deck(deck_id).seek(seconds);
    }

    pub fn get_position(&self, deck_id: DeckId) -> f64 {
        self.core.deck(deck_id).get_position()
    }

    pub fn get_duration(&self, deck_id: DeckId) -> f64 {
        self.core.deck(deck_id).get_duration()
    }

    pub fn is_playing(&self, deck_id: DeckId) -> bool {
        self.core.deck(deck_id).is_playing()
    }

    pub fn set_volume(&self, deck_id: DeckId, volume: f32) {
        self.core.deck(deck_id).set_volume(volume);
    }

    pub fn set_tempo(&self, deck_id: DeckId, ratio: f32) {
        self.core.deck(deck_id).set_tempo(ratio);
    }

    pub fn get_tempo(&self, deck_id: DeckId) -> f32 {
        self.core.deck(deck_id).get_tempo()
    }

    pub fn set_pitch(&self, deck_id: DeckId, semitones: f32) {
        self.core.deck(deck_id).set_pitch(semitones);
    }

    pub fn set_bpm(&self, deck_id: DeckId, bpm: f32) {
        self.core.deck(deck_id).set_bpm(bpm);
    }

    pub fn get_bpm(&self, deck_id: DeckId) -> f32 {
        self.core.deck(deck_id).get_bpm()
    }

    pub fn set_beat_offset(&self, deck_id: DeckId, seconds: f64) {
        self.core.deck(deck_id).set_beat_offset(seconds);
    }

    pub fn set_eq_low(&self, deck_id: DeckId, gain: f32) {
        self.core.deck(deck_id).set_eq_low(gain);
    }
    pub fn set_eq_mid(&self, deck_id: DeckId, gain: f32) {
        self.core.deck(deck_id).set_eq_mid(gain);
    }
    pub fn set_eq_high(&self, deck_id: DeckId, gain: f32) {
        self.core.deck(deck_id).set_eq_high(gain);
    }

    /// Sets all three bands at once from a single `EqParams` value.
    pub fn set_eq(&self, deck_id: DeckId, params: EqParams) {
        let deck = self.core.deck(deck_id);
        deck.set_eq_low(params.low_gain);
        deck.set_eq_mid(params.mid_gain);
        deck.set_eq_high(params.high_gain);
    }

    pub fn set_crossfader(&self, position: f32) {
        self.core.mixer.set_crossfader(position);
        debug!("engine: set_crossfader {position:.3}");
    }

    // --- Sync command surface ---

    pub fn sync_enable(&self, slave_id: DeckId, master_id: DeckId) {
        self.core.sync.lock().expect("sync mutex poisoned").enable(slave_id, master_id);
    }

    pub fn sync_disable(&self, id: DeckId) {
        self.core.sync.lock().expect("sync mutex poisoned").disable(id);
    }

    pub fn sync_align_now(&self, slave_id: DeckId, master_id: DeckId) {
        debug_assert_eq!(slave_id.other(), master_id);
        let mut sync = self.core.sync.lock().expect("sync mutex poisoned");
        let slave = self.core.deck(slave_id);
        let master = self.core.deck(master_id);
        sync.align_now(slave, master);
    }

    // --- Analysis hooks (external collaborator) ---

    /// Returns the estimated BPM for the deck's currently loaded track,
    /// or 0 if nothing is loaded or analysis fails.
    pub fn analyze_bpm(&self, deck_id: DeckId) -> f32 {
        match self.deck_buffer_snapshot(deck_id) {
            Some(buffer) => match analysis::analyze(&buffer) {
                Ok((bpm, _offset)) => bpm,
                Err(e) => {
                    warn!("engine: bpm analysis failed for {deck_id:?}: {e}");
                    0.0
                }
            },
            None => 0.0,
        }
    }

    /// Returns the estimated first-downbeat offset in seconds for the
    /// deck's currently loaded track, given an already-known BPM.
    pub fn analyze_beat_offset(&self, deck_id: DeckId, _bpm: f32) -> f64 {
        match self.deck_buffer_snapshot(deck_id) {
            Some(buffer) => match analysis::analyze(&buffer) {
                Ok((_bpm, offset)) => offset,
                Err(e) => {
                    warn!("engine: beat offset analysis failed for {deck_id:?}: {e}");
                    0.0
                }
            },
            None => 0.0,
        }
    }

    fn deck_buffer_snapshot(&self, deck_id: DeckId) -> Option<crate::buffer::AudioBuffer> {
        // Analysis reads the whole buffer, which is immutable once loaded;
        // a brief lock to clone the `Arc`-backed samples is not on the
        // real-time path (this is a control-thread-only operation).
        self.core.deck(deck_id).snapshot_buffer()
    }
}

fn preferred_host() -> cpal::Host {
    #[cfg(target_os = "windows")]
    {
        if let Ok(host) = cpal::host_from_id(cpal::HostId::Asio) {
            return host;
        }
    }
    cpal::default_host()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_scenario_produces_all_zero_output() {
        let engine = Engine::init(44_100, 512).unwrap();
        let mut output = vec![1.234_f32; 512 * 2];
        for _ in 0..20 {
            engine.process(&mut output, 512);
            assert!(output.iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn crossfader_sweep_keeps_unity_power_with_constant_signals() {
        let engine = Engine::init(44_100, 256).unwrap();
        let one_second: Vec<f32> = vec![1.0; 44_100 * 2];
        engine
            .load_buffer(DeckId::Zero, crate::buffer::AudioBuffer::new(one_second.clone(), 44_100))
            .unwrap();
        engine
            .load_buffer(DeckId::One, crate::buffer::AudioBuffer::new(one_second, 44_100))
            .unwrap();
        engine.play(DeckId::Zero);
        engine.play(DeckId::One);

        let mut output = vec![0.0_f32; 256 * 2];
        let mut x = 0.0_f32;
        while x <= 1.0 {
            engine.set_crossfader(x);
            engine.process(&mut output, 256);
            for &sample in output.iter() {
                assert!(sample.abs() <= 1.001, "sample {sample} out of bound at x={x}");
            }
            x += 0.05;
        }
    }

    #[test]
    fn set_eq_applies_all_three_bands_at_once() {
        let engine = Engine::init(44_100, 256).unwrap();
        engine
            .load_buffer(DeckId::Zero, crate::buffer::AudioBuffer::new(vec![1.0; 44_100 * 2], 44_100))
            .unwrap();
        engine.set_eq(
            DeckId::Zero,
            EqParams {
                low_gain: 0.5,
                mid_gain: 1.5,
                high_gain: 0.75,
            },
        );
        assert!((engine.core.deck(DeckId::Zero).get_eq_low() - 0.5).abs() < 1e-6);
        assert!((engine.core.deck(DeckId::Zero).get_eq_mid() - 1.5).abs() < 1e-6);
        assert!((engine.core.deck(DeckId::Zero).get_eq_high() - 0.75).abs() < 1e-6);
    }
}
