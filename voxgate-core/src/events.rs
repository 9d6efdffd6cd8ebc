//! Event and report types handed to callers.
//!
//! | Type | Produced by |
//! |------|-------------|
//! | `SpeechSegment` | `SpeechHandler::on_speech_end` payload |
//! | `PipelineStats` | `VoxGate::get_stats` |
//! | `BufferInfo` | `VoxGate::get_buffer_info` |
//! | `PipelineStatusEvent` | `VoxGate::subscribe_status` broadcast |
//!
//! Report types serialise with camelCase field names so hosts can forward
//! them as JSON unchanged.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::pipeline::DiagnosticsSnapshot;

// ---------------------------------------------------------------------------
// Speech segments
// ---------------------------------------------------------------------------

/// Why an utterance was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The speaker went quiet for `max_silence`.
    Silence,
    /// The utterance hit `max_recording` while still going.
    MaxLength,
}

impl EndReason {
    pub fn label(self) -> &'static str {
        match self {
            EndReason::Silence => "silence",
            EndReason::MaxLength => "max_length",
        }
    }
}

/// A completed utterance, pre-roll included.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    /// Concatenated mono i16 samples, oldest first.
    pub audio: Vec<i16>,
    pub sample_rate: u32,
    /// Stream time at which speech was detected.
    pub started_at: Duration,
    /// Time from detection to the block that closed the segment.
    pub duration: Duration,
    pub reason: EndReason,
}

impl SpeechSegment {
    /// Duration of the audio actually delivered (pre-roll and kept tail
    /// included).
    pub fn audio_duration(&self) -> Duration {
        crate::buffering::block::samples_to_duration(self.audio.len(), self.sample_rate)
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Snapshot returned by `VoxGate::get_stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub noise_floor: f64,
    pub vad_threshold: f64,
    /// Most recent amplitude sample (0 before the first block).
    pub current_amplitude: f64,
    pub last_calibration: Option<DateTime<Utc>>,
    pub running: bool,
    pub speech_active: bool,
    pub diagnostics: DiagnosticsSnapshot,
}

/// Pre-roll geometry returned by `VoxGate::get_buffer_info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferInfo {
    /// Configured pre-roll duration in seconds.
    pub duration_secs: f64,
    pub capacity_blocks: usize,
    pub current_blocks: usize,
    /// Bytes held by a full window of i16 blocks.
    pub memory_estimate_bytes: usize,
    /// Audio actually held right now, in seconds.
    pub actual_duration_secs: f64,
    pub sample_rate: u32,
    pub block_size: usize,
    pub blocks_per_second: f64,
}

// ---------------------------------------------------------------------------
// Status events
// ---------------------------------------------------------------------------

/// Lifecycle state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    /// Acquired, not started.
    Idle,
    /// Explicit noise-floor calibration in progress.
    Calibrating,
    /// Capture and processing threads are running.
    Listening,
    /// Stopped by the caller or because a finite source ran dry; may be
    /// restarted.
    Stopped,
    /// The source could not be opened.
    Error,
}

/// Broadcast on every status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatusEvent {
    pub status: PipelineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}
