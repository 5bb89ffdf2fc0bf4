//! BPM and first-downbeat analysis. Treated elsewhere as an external
//! collaborator specified only by its contract; a concrete
//! implementation is supplied here so the crate is self-contained and
//! testable end-to-end: spectral-flux autocorrelation over an FFT via
//! `rustfft`, extended to report a first-beat estimate alongside BPM.

mod bpm;

pub use bpm::{analyze, AnalysisError};
