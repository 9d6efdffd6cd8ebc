//! Amplitude-based voice activity detection.
//!
//! Per block, the processing thread:
//!
//! 1. measures [`amplitude::block_amplitude`] and pushes it into a
//!    [`history::RollingHistory`],
//! 2. asks the [`calibration::NoiseFloorCalibrator`] for the current trigger
//!    threshold (refreshing it from the history when due),
//! 3. feeds the block to the [`segmenter::UtteranceSegmenter`].

pub mod amplitude;
pub mod calibration;
pub mod history;
pub mod segmenter;

pub use amplitude::{block_amplitude, AmplitudeMeter};
pub use calibration::{CalibrationState, NoiseFloorCalibrator};
pub use history::RollingHistory;
pub use segmenter::{SegmenterParams, SegmenterState, Transition, UtteranceSegmenter};
