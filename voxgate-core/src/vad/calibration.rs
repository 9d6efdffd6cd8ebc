//! Noise-floor calibration and trigger-threshold derivation.
//!
//! Both paths share one contract: given a silence-only reference level `L`,
//! `noise_floor = L` and `vad_threshold = clamp(L × multiplier, min, max)`.
//!
//! - **Explicit**: the mean of amplitude samples collected while the room is
//!   kept quiet ([`NoiseFloorCalibrator::calibrate_from_samples`]).
//! - **Periodic**: the lower quartile of the rolling history, assuming speech
//!   fills a minority of recent time ([`NoiseFloorCalibrator::maybe_recalibrate`]).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::history::{mean, RollingHistory};
use crate::config::CalibrationConfig;
use crate::error::{Result, VoxError};

/// Current noise floor and trigger threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationState {
    pub noise_floor: f64,
    /// Always within `[min_threshold, max_threshold]`.
    pub vad_threshold: f64,
    pub last_calibration: Option<DateTime<Utc>>,
}

/// Owns the [`CalibrationState`] and decides when to refresh it.
#[derive(Debug, Clone)]
pub struct NoiseFloorCalibrator {
    config: CalibrationConfig,
    state: CalibrationState,
    /// Stream time after which the periodic path is due; `None` means due
    /// now.
    due_at: Option<Duration>,
}

impl NoiseFloorCalibrator {
    pub fn new(config: CalibrationConfig, initial_threshold: f64) -> Self {
        let state = CalibrationState {
            noise_floor: config.initial_noise_floor,
            vad_threshold: config.clamp_threshold(initial_threshold),
            last_calibration: None,
        };
        Self {
            config,
            state,
            due_at: None,
        }
    }

    /// Resume from a previously published state (e.g. an explicit
    /// calibration run before the stream started).
    ///
    /// The wall-clock age of `last_calibration` carries over: the periodic
    /// path becomes due once the interval has elapsed since that moment,
    /// which may already be the case at `now`.
    pub fn resume(config: CalibrationConfig, state: CalibrationState, now: Duration) -> Self {
        let due_at = state.last_calibration.and_then(|at| {
            let age = (Utc::now() - at).to_std().unwrap_or(Duration::ZERO);
            config
                .recalibration_interval()
                .checked_sub(age)
                .map(|left| now + left)
        });
        let state = CalibrationState {
            vad_threshold: config.clamp_threshold(state.vad_threshold),
            ..state
        };
        Self {
            config,
            state,
            due_at,
        }
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn threshold(&self) -> f64 {
        self.state.vad_threshold
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Apply a reference level measured at stream time `now` (or outside any
    /// stream when `None`).
    pub fn apply_reference(&mut self, level: f64, now: Option<Duration>) -> &CalibrationState {
        let level = if level.is_finite() { level.max(0.0) } else { 0.0 };
        let raw = level * self.config.threshold_multiplier;
        self.state = CalibrationState {
            noise_floor: level,
            vad_threshold: self.config.clamp_threshold(raw),
            last_calibration: Some(Utc::now()),
        };
        self.due_at = now.map(|at| at + self.config.recalibration_interval());
        &self.state
    }

    /// Explicit calibration from amplitude samples captured in silence.
    ///
    /// # Errors
    /// `VoxError::CalibrationFailed` when `samples` is empty; the previous
    /// state is kept.
    pub fn calibrate_from_samples(&mut self, samples: &[f64]) -> Result<CalibrationState> {
        let Some(level) = mean(samples) else {
            warn!("calibration collected no samples; keeping previous threshold");
            return Err(VoxError::CalibrationFailed(
                "no audio received during calibration".into(),
            ));
        };
        let state = self.apply_reference(level, None).clone();
        info!(
            noise_floor = format_args!("{:.1}", state.noise_floor),
            vad_threshold = format_args!("{:.1}", state.vad_threshold),
            samples = samples.len(),
            "calibration complete"
        );
        Ok(state)
    }

    /// Whether the periodic path is due at stream time `now`.
    pub fn is_due(&self, now: Duration) -> bool {
        self.due_at.map_or(true, |at| now > at)
    }

    /// Re-estimate the noise floor from `history` if due and enough samples
    /// are available. Returns the new state when it changed.
    pub fn maybe_recalibrate(
        &mut self,
        history: &RollingHistory,
        now: Duration,
    ) -> Option<CalibrationState> {
        if !self.is_due(now) || history.len() < self.config.min_history_samples {
            return None;
        }
        let level = history.percentile(self.config.noise_percentile)?;
        let state = self.apply_reference(level, Some(now)).clone();
        info!(
            noise_floor = format_args!("{:.1}", state.noise_floor),
            vad_threshold = format_args!("{:.1}", state.vad_threshold),
            history = history.len(),
            "auto-recalibrated"
        );
        Some(state)
    }

    /// Manual threshold override, clamped like every other threshold.
    pub fn set_threshold(&mut self, threshold: f64) -> f64 {
        let clamped = self.config.clamp_threshold(threshold);
        if clamped != threshold {
            warn!(requested = threshold, applied = clamped, "threshold clamped");
        }
        self.state.vad_threshold = clamped;
        clamped
    }
}
