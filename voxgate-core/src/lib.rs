//! # voxgate-core
//!
//! Voice-activity-gated audio capture: listens to a microphone, decides when
//! someone is speaking, and hands over each complete utterance with a short
//! pre-roll before the detection point.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource ─► voxgate-capture ─► bounded channel (drop oldest) ─► voxgate-process
//!                                                                        │
//!                          amplitude → history → calibrator ─────────────┤
//!                          pre-roll window → utterance segmenter ────────┤
//!                                                                        ▼
//!                                                                 SpeechHandler
//! ```
//!
//! The cpal audio callback never locks; all pipeline state is owned by the
//! processing thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{list_input_devices, AudioSource, AudioStream, BlockRead, StreamSpec, WavSource};
pub use config::{CalibrationConfig, PipelineConfig, VadConfig};
pub use engine::{Callbacks, ParameterUpdate, SpeechHandler, VoxGate};
pub use error::{Result, VoxError};
pub use events::{
    BufferInfo, EndReason, PipelineStats, PipelineStatus, PipelineStatusEvent, SpeechSegment,
};
pub use vad::CalibrationState;

#[cfg(feature = "audio-cpal")]
pub use audio::CpalSource;
