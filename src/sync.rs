//! Maintains a single master/slave relation between the two decks:
//! tempo-matches the slave every callback, performs one-shot phase
//! alignment on `align_now`/`play_synced`, and optionally nudges the
//! slave's cursor in small, inaudible steps to hold steady-state phase.

use log::{debug, info};

use crate::config::{PHASE_CORRECTION_KP, PHASE_CORRECTION_MAX_MS, PHASE_CORRECTION_PERIOD_CALLBACKS};
use crate::deck::Deck;
use crate::types::DeckId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Idle,
    Armed,
    Aligned,
}

struct SyncRelation {
    slave: DeckId,
    master: DeckId,
    state: SyncState,
}

/// `frames_per_beat = round(60 * rate / bpm)`.
fn frames_per_beat(bpm: f32, rate: u32) -> i64 {
    if bpm <= 0.0 {
        return 0;
    }
    (60.0 * rate as f64 / bpm as f64).round() as i64
}

/// Beat phase: fractional position within a beat in [0, 1), where 0 is a
/// beat onset. `offset` and `frame` are in source frames/seconds at `rate`.
fn beat_phase(frame: i64, offset_seconds: f64, bpm: f32, rate: u32) -> f64 {
    let fpb = frames_per_beat(bpm, rate);
    if fpb <= 0 {
        return 0.0;
    }
    let offset_frames = (offset_seconds * rate as f64).round() as i64;
    let delta = frame - offset_frames;
    let modulo = delta.rem_euclid(fpb);
    modulo as f64 / fpb as f64
}

pub struct SyncManager {
    relation: Option<SyncRelation>,
    callback_counter: u64,
}

impl Default for SyncManager {
    fn default() -> Self {
        SyncManager {
            relation: None,
            callback_counter: 0,
        }
    }
}

impl SyncManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the slave/master relation. No immediate side effect; tempo
    /// matching begins on the next `update`.
    pub fn enable(&mut self, slave: DeckId, master: DeckId) {
        self.relation = Some(SyncRelation {
            slave,
            master,
            state: SyncState::Armed,
        });
        info!("sync: enabled slave={:?} master={:?}", slave, master);
    }

    /// Clears the relation if `id` is the recorded slave.
    pub fn disable(&mut self, id: DeckId) {
        if let Some(rel) = &self.relation {
            if rel.slave == id {
                self.relation = None;
                info!("sync: disabled for {:?}", id);
            }
        }
    }

    pub fn is_slave(&self, id: DeckId) -> bool {
        self.relation.as_ref().map(|r| r.slave == id).unwrap_or(false)
    }

    /// Immediate one-shot alignment: sets the slave's tempo ratio to
    /// `master_bpm / slave_bpm` and moves its cursor so its beat phase
    /// equals the master's current beat phase. Forces a filter clear
    /// (click acceptable).
    pub fn align_now(&mut self, slave: &Deck, master: &Deck) {
        let bpm_m = master.get_bpm();
        let bpm_s = slave.get_bpm();
        if bpm_m <= 0.0 || bpm_s <= 0.0 {
            return;
        }
        slave.set_tempo((bpm_m / bpm_s).clamp(
            crate::config::TEMPO_MIN,
            crate::config::TEMPO_MAX,
        ));

        let rate = slave.sample_rate();
        let master_frame = master.cursor_frame();
        let master_phase = beat_phase(master_frame, master.get_beat_offset(), bpm_m, rate);

        let fpb_s = frames_per_beat(bpm_s, rate);
        let offset_frames_s = (slave.get_beat_offset() * rate as f64).round() as i64;
        let slave_frame = slave.cursor_frame();
        let current_beat_index = if fpb_s > 0 {
            (slave_frame - offset_frames_s).div_euclid(fpb_s)
        } else {
            0
        };
        let target_frame = offset_frames_s + current_beat_index * fpb_s
            + (master_phase * fpb_s as f64).round() as i64;

        slave.set_cursor_frame(target_frame);

        if let Some(rel) = &mut self.relation {
            if rel.slave == slave.id() {
                rel.state = SyncState::Aligned;
            }
        }
        debug!("sync: align_now slave={:?} -> frame {}", slave.id(), target_frame);
    }

    /// Chooses a start cursor for the slave such that its first downbeat
    /// emerges at the same wall-clock moment as the master's next
    /// downbeat, then invokes `play(start_frame)` on the slave.
    pub fn play_synced(&mut self, slave: &Deck, master: &Deck) {
        let bpm_m = master.get_bpm();
        let bpm_s = slave.get_bpm();
        if bpm_m <= 0.0 || bpm_s <= 0.0 {
            slave.play(None);
            return;
        }
        let spb_m = 60.0 / bpm_m as f64;
        let spb_s = 60.0 / bpm_s as f64;
        let r = (bpm_m / bpm_s) as f64;

        let rate = slave.sample_rate();
        let master_position_s = master.cursor_frame() as f64 / rate as f64;
        let t_since_offset = master_position_s - master.get_beat_offset();
        let t_next = spb_m - t_since_offset.rem_euclid(spb_m);

        let mut start_s = slave.get_beat_offset() - t_next * r;
        while start_s < 0.0 {
            start_s += spb_s;
        }
        let start_frame = (start_s * rate as f64).round() as i64;

        slave.set_tempo((bpm_m / bpm_s).clamp(
            crate::config::TEMPO_MIN,
            crate::config::TEMPO_MAX,
        ));
        slave.play(Some(start_frame));

        if let Some(rel) = &mut self.relation {
            if rel.slave == slave.id() {
                rel.state = SyncState::Aligned;
            }
        }
        info!(
            "sync: play_synced slave={:?} -> start_frame {} (t_next={:.4}s)",
            slave.id(),
            start_frame,
            t_next
        );
    }

    /// Called from the audio callback before mixing. If sync is enabled
    /// and both decks are playing: tempo-matches the slave every
    /// callback, and every `PHASE_CORRECTION_PERIOD_CALLBACKS` callbacks
    /// applies a small, bounded phase nudge. Does nothing while either
    /// deck is paused (state falls back to `Armed` and waits for the next
    /// `align_now`/`play_synced`).
    pub fn update(&mut self, deck_a: &Deck, deck_b: &Deck) {
        self.callback_counter = self.callback_counter.wrapping_add(1);

        let Some(rel) = &mut self.relation else { return };
        debug_assert_eq!(rel.slave.other(), rel.master);
        let (slave, master) = if rel.slave == deck_a.id() {
            (deck_a, deck_b)
        } else {
            (deck_b, deck_a)
        };

        if !slave.is_playing() || !master.is_playing() {
            if rel.state == SyncState::Aligned {
                rel.state = SyncState::Armed;
            }
            return;
        }

        let bpm_m = master.get_bpm();
        let bpm_s = slave.get_bpm();
        if bpm_m > 0.0 && bpm_s > 0.0 {
            slave.set_tempo((bpm_m / bpm_s).clamp(
                crate::config::TEMPO_MIN,
                crate::config::TEMPO_MAX,
            ));
        }

        if rel.state != SyncState::Aligned {
            return;
        }
        if bpm_m <= 0.0 || bpm_s <= 0.0 {
            return;
        }
        if self.callback_counter % PHASE_CORRECTION_PERIOD_CALLBACKS != 0 {
            return;
        }

        let rate = slave.sample_rate();
        let master_phase = beat_phase(master.cursor_frame(), master.get_beat_offset(), bpm_m, rate);
        let slave_phase = beat_phase(slave.cursor_frame(), slave.get_beat_offset(), bpm_s, rate);

        // Normalize the phase error to (-0.5, 0.5] beats, then convert to
        // slave frames via the slave's own beat length.
        let mut error = master_phase - slave_phase;
        if error > 0.5 {
            error -= 1.0;
        } else if error <= -0.5 {
            error += 1.0;
        }

        let fpb_s = frames_per_beat(bpm_s, rate) as f64;
        let nudge_frames_ideal = error * fpb_s * PHASE_CORRECTION_KP;

        let max_nudge_frames = (PHASE_CORRECTION_MAX_MS / 1000.0) * rate as f64;
        let nudge_frames = nudge_frames_ideal.clamp(-max_nudge_frames, max_nudge_frames);

        if nudge_frames.abs() >= 1.0 {
            slave.nudge_cursor_frames(nudge_frames.round() as i64);
            debug!(
                "sync: phase correction slave={:?} error={:.4} nudge={:.1}f",
                slave.id(),
                error,
                nudge_frames
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBuffer;

    fn loaded_deck(id: DeckId, rate: u32, bpm: f32, seconds: f64) -> Deck {
        let deck = Deck::new(id, rate);
        let frames = (seconds * rate as f64) as usize;
        let samples = vec![0.0_f32; frames * 2];
        deck.load(AudioBuffer::new(samples, rate)).unwrap();
        deck.set_bpm(bpm);
        deck
    }

    #[test]
    fn align_now_matches_phase_for_identical_bpm() {
        let master = loaded_deck(DeckId::Zero, 44_100, 120.0, 10.0);
        let slave = loaded_deck(DeckId::One, 44_100, 120.0, 10.0);
        master.play(None);
        slave.play(None);
        master.set_cursor_frame(12_345);

        let mut sync = SyncManager::new();
        sync.enable(DeckId::One, DeckId::Zero);
        sync.align_now(&slave, &master);

        let rate = 44_100;
        let mp = beat_phase(master.cursor_frame(), 0.0, 120.0, rate);
        let sp = beat_phase(slave.cursor_frame(), 0.0, 120.0, rate);
        assert!((mp - sp).abs() < 1e-6 || (mp - sp).abs() > 1.0 - 1e-6);
    }

    #[test]
    fn play_synced_sets_matching_tempo_ratio() {
        let master = loaded_deck(DeckId::Zero, 44_100, 128.0, 10.0);
        let slave = loaded_deck(DeckId::One, 44_100, 140.0, 10.0);
        master.play(None);

        let mut sync = SyncManager::new();
        sync.enable(DeckId::One, DeckId::Zero);
        sync.play_synced(&slave, &master);

        assert!((slave.get_tempo() - 128.0 / 140.0).abs() < 1e-6);
        assert!(slave.is_playing());
    }

    #[test]
    fn disable_clears_relation_only_for_recorded_slave() {
        let mut sync = SyncManager::new();
        sync.enable(DeckId::One, DeckId::Zero);
        sync.disable(DeckId::Zero); // not the slave, no-op
        assert!(sync.is_slave(DeckId::One));
        sync.disable(DeckId::One);
        assert!(!sync.is_slave(DeckId::One));
    }
}
