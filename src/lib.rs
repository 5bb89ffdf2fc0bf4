//! Real-time two-deck DJ mixing core.
//!
//! [`Engine`] owns two decks, a mixer, and a sync manager, and drives them
//! from a single `cpal` output callback. Everything the callback touches
//! is either a lock-free atomic or guarded by a short-held,
//! never-blocked-on-in-the-callback mutex; loading, decoding, and BPM
//! analysis all happen off the real-time path.

mod atomic_float;
mod buffer;
mod config;
mod deck;
mod decoding;
mod engine;
mod eq;
mod errors;
mod mixer;
mod sync;
mod tempo;
mod types;

pub mod analysis;

pub use buffer::AudioBuffer;
pub use engine::Engine;
pub use errors::{ConfigError, DecodeError, DeviceError, EngineError, StatusCode};
pub use types::{DeckId, EndOfTrack, EndOfTrackCallback, EqParams, PositionCallback, PositionUpdate};
