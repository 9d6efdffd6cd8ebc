//! Pipeline configuration.
//!
//! All types derive serde with `#[serde(default)]`, so a host can persist a
//! partial JSON object and get defaults for everything it left out. Call
//! [`PipelineConfig::normalize`] after deserialising: it clamps every field
//! into a band the pipeline can run with.

use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default receive timeout of the processing thread.
const DEFAULT_RECV_TIMEOUT_MS: u64 = 100;

/// Top-level configuration for a `VoxGate` pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PipelineConfig {
    /// Sample rate of produced blocks (Hz). Sources resample to this.
    pub sample_rate: u32,
    /// Samples per block. Smaller blocks mean lower detection latency.
    pub block_size: usize,
    /// Channel count requested from the device; blocks are always mono.
    pub channels: u16,
    /// Capacity of the capture → processing channel, in blocks.
    pub channel_capacity: usize,
    /// Input device name to prefer over the system default.
    pub preferred_input_device: Option<String>,
    /// Audio retained ahead of a detection trigger (seconds).
    pub pre_roll_secs: f64,
    pub vad: VadConfig,
    pub calibration: CalibrationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            block_size: 1024,
            channels: 1,
            channel_capacity: 64,
            preferred_input_device: None,
            pre_roll_secs: 0.5,
            vad: VadConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

/// Utterance segmentation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct VadConfig {
    /// Start threshold used until the first calibration.
    pub initial_threshold: f64,
    /// Fraction of the start threshold that keeps an utterance alive.
    pub continue_ratio: f64,
    /// Utterances shorter than this are discarded (seconds).
    pub min_speech_secs: f64,
    /// Silence that ends an utterance (seconds).
    pub max_silence_secs: f64,
    /// Hard cap on utterance length (seconds).
    pub max_recording_secs: f64,
    /// Silence kept after the last voiced block on a silence end (seconds).
    pub trailing_silence_secs: f64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 50.0,
            continue_ratio: 0.4,
            min_speech_secs: 0.3,
            max_silence_secs: 1.0,
            max_recording_secs: 8.0,
            trailing_silence_secs: 0.2,
        }
    }
}

impl VadConfig {
    pub fn min_speech(&self) -> Duration {
        secs(self.min_speech_secs)
    }

    pub fn max_silence(&self) -> Duration {
        secs(self.max_silence_secs)
    }

    pub fn max_recording(&self) -> Duration {
        secs(self.max_recording_secs)
    }

    pub fn trailing_silence(&self) -> Duration {
        secs(self.trailing_silence_secs)
    }
}

/// Noise-floor calibration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct CalibrationConfig {
    /// Noise floor assumed until the first calibration.
    pub initial_noise_floor: f64,
    /// Length of an explicit calibration pass (seconds).
    pub duration_secs: f64,
    /// Threshold = noise floor × this, before clamping.
    pub threshold_multiplier: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    /// Minimum stream time between automatic recalibrations (seconds).
    pub recalibration_interval_secs: f64,
    /// History samples required before auto-recalibrating.
    pub min_history_samples: usize,
    /// Capacity of the rolling amplitude history.
    pub history_capacity: usize,
    /// Auto-recalibration is considered every this many processed blocks.
    pub check_every_blocks: u64,
    /// Percentile of the history taken as the ambient level.
    pub noise_percentile: f64,
    /// Run an explicit calibration on `start` when none has happened yet.
    pub calibrate_on_start: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            initial_noise_floor: 10.0,
            duration_secs: 3.0,
            threshold_multiplier: 5.0,
            min_threshold: 15.0,
            max_threshold: 150.0,
            recalibration_interval_secs: 300.0,
            min_history_samples: 50,
            history_capacity: 100,
            check_every_blocks: 50,
            noise_percentile: 25.0,
            calibrate_on_start: true,
        }
    }
}

impl CalibrationConfig {
    pub fn duration(&self) -> Duration {
        secs(self.duration_secs)
    }

    pub fn recalibration_interval(&self) -> Duration {
        secs(self.recalibration_interval_secs)
    }

    /// Clamp `threshold` into `[min_threshold, max_threshold]`.
    pub fn clamp_threshold(&self, threshold: f64) -> f64 {
        if threshold.is_nan() {
            return self.min_threshold;
        }
        threshold.clamp(self.min_threshold, self.max_threshold)
    }
}

impl PipelineConfig {
    /// Clamp every field into its supported band.
    pub fn normalize(&mut self) {
        self.sample_rate = self.sample_rate.clamp(8_000, 192_000);
        self.block_size = self.block_size.clamp(64, 16_384);
        self.channels = self.channels.clamp(1, 8);
        self.channel_capacity = self.channel_capacity.clamp(2, 1_024);
        self.pre_roll_secs = crate::buffering::preroll::clamp_duration(self.pre_roll_secs);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let cal = &mut self.calibration;
        cal.min_threshold = finite_or(cal.min_threshold, 15.0).clamp(0.0, 1_000.0);
        cal.max_threshold = finite_or(cal.max_threshold, 150.0).clamp(cal.min_threshold, 1_000.0);
        cal.initial_noise_floor = finite_or(cal.initial_noise_floor, 10.0).clamp(0.0, 1_000.0);
        cal.duration_secs = finite_or(cal.duration_secs, 3.0).clamp(0.1, 60.0);
        cal.threshold_multiplier = finite_or(cal.threshold_multiplier, 5.0).clamp(1.0, 50.0);
        cal.recalibration_interval_secs =
            finite_or(cal.recalibration_interval_secs, 300.0).clamp(1.0, 86_400.0);
        cal.history_capacity = cal.history_capacity.clamp(1, 10_000);
        cal.min_history_samples = cal.min_history_samples.clamp(1, cal.history_capacity);
        cal.check_every_blocks = cal.check_every_blocks.max(1);
        cal.noise_percentile = finite_or(cal.noise_percentile, 25.0).clamp(0.0, 100.0);

        let vad = &mut self.vad;
        vad.initial_threshold = self
            .calibration
            .clamp_threshold(finite_or(vad.initial_threshold, 50.0));
        vad.continue_ratio = finite_or(vad.continue_ratio, 0.4).clamp(0.05, 1.0);
        vad.min_speech_secs = finite_or(vad.min_speech_secs, 0.3).clamp(0.0, 10.0);
        vad.max_silence_secs = finite_or(vad.max_silence_secs, 1.0).clamp(0.05, 30.0);
        vad.max_recording_secs = finite_or(vad.max_recording_secs, 8.0)
            .clamp(0.5, 300.0)
            .max(vad.min_speech_secs);
        vad.trailing_silence_secs =
            finite_or(vad.trailing_silence_secs, 0.2).clamp(0.0, vad.max_silence_secs);
    }

    /// Parse a JSON object, filling gaps with defaults, then normalise.
    pub fn from_json(raw: &str) -> crate::error::Result<Self> {
        let mut config: Self = serde_json::from_str(raw)
            .map_err(|e| crate::error::VoxError::InvalidConfig(e.to_string()))?;
        config.normalize();
        Ok(config)
    }
}

/// Processing-thread receive timeout; `VOXGATE_RECV_TIMEOUT_MS` overrides it
/// (clamped to 10–500 ms).
pub fn recv_timeout() -> Duration {
    static RECV_TIMEOUT_MS: OnceLock<u64> = OnceLock::new();
    Duration::from_millis(*RECV_TIMEOUT_MS.get_or_init(|| {
        std::env::var("VOXGATE_RECV_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(10, 500))
            .unwrap_or(DEFAULT_RECV_TIMEOUT_MS)
    }))
}

pub(crate) fn secs(value: f64) -> Duration {
    if !value.is_finite() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(value)
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
