//! Persistent host settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use voxgate_core::PipelineConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub pipeline: PipelineConfig,
    /// Run the segmenter; with `false` only amplitude telemetry is produced.
    pub vad_enabled: bool,
    pub record_utterances: bool,
    /// Where utterance WAVs go. `None` means next to the settings file.
    pub recordings_dir: Option<PathBuf>,
    /// Keep at most this many WAV files; older ones are deleted.
    pub max_recordings: usize,
    /// Console telemetry period in seconds; 0 disables it.
    pub stats_interval_secs: f64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            vad_enabled: true,
            record_utterances: true,
            recordings_dir: None,
            max_recordings: 20,
            stats_interval_secs: 10.0,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.pipeline.normalize();
        self.max_recordings = self.max_recordings.clamp(1, 10_000);
        self.stats_interval_secs = if self.stats_interval_secs.is_finite() {
            self.stats_interval_secs.clamp(0.0, 3600.0)
        } else {
            0.0
        };
        self.recordings_dir = self
            .recordings_dir
            .take()
            .filter(|dir| !dir.as_os_str().is_empty());
    }

    /// Directory recordings are written to.
    pub fn recordings_dir(&self, settings_path: &Path) -> PathBuf {
        self.recordings_dir.clone().unwrap_or_else(|| {
            settings_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("recordings")
        })
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voxgate")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("voxgate")
            .join("settings.json")
    }
}

/// Missing or unreadable files yield defaults; the result is always normalised.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
