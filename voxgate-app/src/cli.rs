//! Command-line options. Anything given here overrides the settings file for
//! this run only.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser, Clone)]
#[command(about = "Voice-activity-gated recorder", author, version)]
pub struct Cli {
    /// Settings file (defaults to the platform data directory)
    #[arg(long, env = "VOXGATE_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Read audio from a WAV file instead of the microphone
    #[arg(long, value_name = "PATH")]
    pub wav: Option<PathBuf>,

    /// Feed the WAV file at its natural rate instead of as fast as possible
    #[arg(long, default_value_t = false, requires = "wav")]
    pub realtime: bool,

    /// Preferred audio input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Calibrate the noise floor for this many seconds before listening
    #[arg(long, value_name = "SECS")]
    pub calibrate: Option<f64>,

    /// Start threshold to use until the first calibration
    #[arg(long, value_name = "AMPLITUDE")]
    pub threshold: Option<f64>,

    /// Pre-roll kept ahead of each utterance (seconds)
    #[arg(long, value_name = "SECS")]
    pub pre_roll: Option<f64>,

    /// Only report amplitude; do not segment utterances
    #[arg(long = "no-vad", default_value_t = false)]
    pub no_vad: bool,

    /// Do not write utterances to disk
    #[arg(long = "no-record", default_value_t = false)]
    pub no_record: bool,

    /// Directory for utterance WAV files
    #[arg(long, value_name = "DIR")]
    pub recordings_dir: Option<PathBuf>,

    /// Write the effective settings back to the settings file
    #[arg(long = "save-settings", default_value_t = false)]
    pub save_settings: bool,
}

impl Cli {
    /// Fold command-line overrides into `settings`, then re-normalise.
    pub fn apply(&self, settings: &mut crate::settings::AppSettings) {
        if let Some(device) = &self.input_device {
            settings.pipeline.preferred_input_device = Some(device.clone());
        }
        if let Some(threshold) = self.threshold {
            settings.pipeline.vad.initial_threshold = threshold;
        }
        if let Some(pre_roll) = self.pre_roll {
            settings.pipeline.pre_roll_secs = pre_roll;
        }
        if let Some(dir) = &self.recordings_dir {
            settings.recordings_dir = Some(dir.clone());
        }
        if self.calibrate.is_some() {
            settings.pipeline.calibration.calibrate_on_start = false;
        }
        if self.no_vad {
            settings.vad_enabled = false;
        }
        if self.no_record {
            settings.record_utterances = false;
        }
        settings.normalize();
    }
}
