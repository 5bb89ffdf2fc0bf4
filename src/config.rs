//! Tunable constants for the mixing core.

/// Clamp range for per-deck tempo ratio.
pub const TEMPO_MIN: f32 = 0.5;
pub const TEMPO_MAX: f32 = 2.0;

/// Clamp range for per-deck pitch, in semitones.
pub const PITCH_MIN_SEMITONES: f32 = -12.0;
pub const PITCH_MAX_SEMITONES: f32 = 12.0;

/// Clamp range for volume and EQ band gains.
pub const VOLUME_MIN: f32 = 0.0;
pub const VOLUME_MAX: f32 = 1.0;
pub const EQ_GAIN_MIN: f32 = 0.0;
pub const EQ_GAIN_MAX: f32 = 2.0;

/// Crossfader position range.
pub const CROSSFADER_MIN: f32 = 0.0;
pub const CROSSFADER_MAX: f32 = 1.0;

// --- Fast-path identity tolerances (Deck::read) ---
/// Tempo must be within this of 1.0 to take the fast (filter-bypass) path.
pub const FAST_PATH_TEMPO_TOLERANCE: f32 = 0.001;
/// Pitch must be within this many semitones of 0 to take the fast path.
pub const FAST_PATH_PITCH_TOLERANCE_SEMITONES: f32 = 0.1;

/// Frames pulled from the source buffer per push into the tempo filter.
pub const TEMPO_FILTER_SOURCE_CHUNK_FRAMES: usize = 4096;

// --- EQ filter constants ---
pub const LOW_MID_CROSSOVER_HZ: f32 = 250.0;
pub const MID_HIGH_CROSSOVER_HZ: f32 = 3000.0;
pub const MID_CENTER_HZ: f32 = 1000.0;
pub const MID_PEAK_Q_FACTOR: f32 = std::f32::consts::FRAC_1_SQRT_2;
pub const SHELF_Q_FACTOR: f32 = 0.5;

/// Per-callback smoothing factor for EQ gain ramping (applied gain moves
/// this fraction of the way toward the target gain each callback).
pub const EQ_SMOOTHING_FACTOR: f32 = 0.08;
/// Minimum dB-equivalent gain delta before a coefficient recalculation is
/// worth doing; below this the smoothed gain is treated as settled.
pub const EQ_RECALC_THRESHOLD: f32 = 0.001;

// --- BPM / beat-offset analysis ---
pub const BPM_MIN: f32 = 60.0;
pub const BPM_MAX: f32 = 200.0;
pub const BPM_FRAME_SIZE: usize = 1024;
pub const BPM_HOP_SIZE: usize = BPM_FRAME_SIZE / 4;
pub const BPM_DOWNSAMPLE_FACTOR: usize = 2;

// --- Engine callback cadence ---
/// Position-update notification cadence, in callbacks, at a nominal
/// 512-frame buffer and 44.1kHz (~100ms).
pub const POSITION_UPDATE_INTERVAL_MS: u64 = 100;

// --- Sync manager ---
/// Steady-state phase corrector: how many callbacks between corrections.
pub const PHASE_CORRECTION_PERIOD_CALLBACKS: u64 = 50;
/// Hard bound on a single phase correction nudge (inaudible-seek bound).
pub const PHASE_CORRECTION_MAX_MS: f64 = 50.0;
/// Proportional gain applied to normalized phase error when deriving a
/// bounded per-callback nudge.
pub const PHASE_CORRECTION_KP: f64 = 0.25;

pub const DEFAULT_MONO_SAMPLE_CAPACITY: usize = 1024 * 512;
