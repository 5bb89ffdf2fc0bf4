//! End-to-end scenarios driven entirely through `Engine::process`, with
//! no real audio device involved.

use duodeck::{AudioBuffer, DeckId, Engine};

fn tone_buffer(seconds: f64, rate: u32, freq: f32) -> AudioBuffer {
    let frames = (seconds * rate as f64) as usize;
    let mut samples = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = i as f32 / rate as f32;
        let v = (t * freq * std::f32::consts::TAU).sin() * 0.5;
        samples.push(v);
        samples.push(v);
    }
    AudioBuffer::new(samples, rate)
}

fn click_track(bpm: f32, seconds: f64, rate: u32) -> AudioBuffer {
    let total_frames = (seconds * rate as f64) as usize;
    let spb = 60.0 / bpm as f64;
    let mut samples = vec![0.0_f32; total_frames * 2];
    let mut t = 0.0;
    while t < seconds {
        let frame = (t * rate as f64).round() as usize;
        for i in 0..200.min(total_frames.saturating_sub(frame)) {
            let v = (1.0 - i as f32 / 200.0) * 0.9;
            samples[(frame + i) * 2] = v;
            samples[(frame + i) * 2 + 1] = v;
        }
        t += spb;
    }
    AudioBuffer::new(samples, rate)
}

const RATE: u32 = 44_100;
const BUF: u32 = 512;

#[test]
fn silence_produces_zero_output_with_no_tracks_loaded() {
    let engine = Engine::init(RATE, BUF).unwrap();
    let mut output = vec![9.9_f32; BUF as usize * 2];
    let callbacks = (10.0 * RATE as f64 / BUF as f64).ceil() as usize;
    for _ in 0..callbacks {
        engine.process(&mut output, BUF as usize);
        assert!(output.iter().all(|&s| s == 0.0));
    }
}

#[test]
fn single_track_plays_then_falls_silent_with_one_end_of_track_notification() {
    let engine = Engine::init(RATE, BUF).unwrap();
    engine.load_buffer(DeckId::Zero, tone_buffer(5.0, RATE, 440.0)).unwrap();
    engine.play(DeckId::Zero);

    let mut output = vec![0.0_f32; BUF as usize * 2];
    let callbacks = (5.5 * RATE as f64 / BUF as f64).ceil() as usize;
    let mut saw_signal = false;
    let mut saw_silence_tail = false;
    for _ in 0..callbacks {
        engine.process(&mut output, BUF as usize);
        if output.iter().any(|&s| s.abs() > 1e-3) {
            saw_signal = true;
        } else if saw_signal {
            saw_silence_tail = true;
        }
    }
    assert!(saw_signal, "expected audible tone before end of track");
    assert!(saw_silence_tail, "expected silence after end of track");
    assert!(!engine.is_playing(DeckId::Zero));
}

#[test]
fn same_bpm_sync_keeps_decks_in_phase() {
    let engine = Engine::init(RATE, BUF).unwrap();
    let track = click_track(120.0, 10.0, RATE);
    engine.load_buffer(DeckId::Zero, track.clone()).unwrap();
    engine.load_buffer(DeckId::One, track).unwrap();
    engine.set_bpm(DeckId::Zero, 120.0);
    engine.set_bpm(DeckId::One, 120.0);
    engine.play(DeckId::Zero);

    let mut output = vec![0.0_f32; BUF as usize * 2];
    let callbacks_to_one_second = (RATE as f64 / BUF as f64).ceil() as usize;
    for _ in 0..callbacks_to_one_second {
        engine.process(&mut output, BUF as usize);
    }

    engine.play_synced(DeckId::One, DeckId::Zero);
    assert!((engine.get_tempo(DeckId::One) - 1.0).abs() < 1e-6);

    for _ in 0..callbacks_to_one_second {
        engine.process(&mut output, BUF as usize);
        assert!(output.iter().all(|s| s.is_finite()));
    }

    let phase_a = engine.get_position(DeckId::Zero).rem_euclid(0.5);
    let phase_b = engine.get_position(DeckId::One).rem_euclid(0.5);
    let diff = (phase_a - phase_b).abs();
    assert!(diff < 0.01 || (0.5 - diff) < 0.01, "decks drifted out of phase: {diff}");
}

#[test]
fn cross_bpm_play_synced_sets_exact_tempo_ratio() {
    let engine = Engine::init(RATE, BUF).unwrap();
    engine.load_buffer(DeckId::Zero, click_track(128.0, 10.0, RATE)).unwrap();
    engine.load_buffer(DeckId::One, click_track(140.0, 10.0, RATE)).unwrap();
    engine.set_bpm(DeckId::Zero, 128.0);
    engine.set_bpm(DeckId::One, 140.0);
    engine.play(DeckId::Zero);

    let mut output = vec![0.0_f32; BUF as usize * 2];
    let half_second = ((RATE as f64 * 0.5) / BUF as f64).ceil() as usize;
    for _ in 0..half_second {
        engine.process(&mut output, BUF as usize);
    }

    engine.play_synced(DeckId::One, DeckId::Zero);
    assert!((engine.get_tempo(DeckId::One) - 128.0 / 140.0).abs() < 1e-6);
    assert!(engine.is_playing(DeckId::One));
}

#[test]
fn crossfade_sweep_keeps_output_within_unit_magnitude() {
    let engine = Engine::init(RATE, BUF).unwrap();
    let one_second = vec![1.0_f32; RATE as usize * 2];
    engine.load_buffer(DeckId::Zero, AudioBuffer::new(one_second.clone(), RATE)).unwrap();
    engine.load_buffer(DeckId::One, AudioBuffer::new(one_second, RATE)).unwrap();
    engine.play(DeckId::Zero);
    engine.play(DeckId::One);

    let mut output = vec![0.0_f32; BUF as usize * 2];
    let steps = 20;
    for step in 0..=steps {
        let x = step as f32 / steps as f32;
        engine.set_crossfader(x);
        engine.process(&mut output, BUF as usize);
        for &sample in output.iter() {
            assert!((0.999..=1.001).contains(&sample.abs()), "sample {sample} out of band at x={x}");
        }
    }
}

#[test]
fn seek_under_playback_lands_exactly_on_requested_frame() {
    let engine = Engine::init(RATE, BUF).unwrap();
    engine.load_buffer(DeckId::Zero, tone_buffer(10.0, RATE, 440.0)).unwrap();
    engine.play(DeckId::Zero);

    let mut output = vec![0.0_f32; BUF as usize * 2];
    engine.process(&mut output, BUF as usize);
    engine.set_position(DeckId::Zero, 3.0);

    let start_frame = (engine.get_position(DeckId::Zero) * RATE as f64).round() as i64;
    assert_eq!(start_frame, (3.0 * RATE as f64).round() as i64);

    engine.process(&mut output, BUF as usize);
    assert!(output.iter().all(|s| s.is_finite()));
}

#[test]
fn thread_safety_smoke_concurrent_setters_and_callback() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    let engine = Arc::new(Engine::init(RATE, BUF).unwrap());
    engine.load_buffer(DeckId::Zero, tone_buffer(2.0, RATE, 220.0)).unwrap();
    engine.load_buffer(DeckId::One, tone_buffer(2.0, RATE, 330.0)).unwrap();
    engine.play(DeckId::Zero);
    engine.play(DeckId::One);

    let stop = Arc::new(AtomicBool::new(false));

    let setter_engine = Arc::clone(&engine);
    let setter_stop = Arc::clone(&stop);
    let setter = thread::spawn(move || {
        let mut i = 0u32;
        while !setter_stop.load(Ordering::Relaxed) {
            setter_engine.set_tempo(DeckId::Zero, 0.9 + (i % 20) as f32 * 0.01);
            setter_engine.set_pitch(DeckId::One, (i % 24) as f32 - 12.0);
            setter_engine.set_volume(DeckId::Zero, (i % 100) as f32 / 100.0);
            setter_engine.set_eq_low(DeckId::One, (i % 20) as f32 / 10.0);
            setter_engine.set_crossfader((i % 100) as f32 / 100.0);
            i = i.wrapping_add(1);
        }
    });

    let mut output = vec![0.0_f32; BUF as usize * 2];
    for _ in 0..200 {
        engine.process(&mut output, BUF as usize);
        assert!(output.iter().all(|s| s.is_finite()));
        thread::sleep(Duration::from_micros(50));
    }

    stop.store(true, Ordering::Relaxed);
    setter.join().unwrap();
}
