use thiserror::Error;

/// All errors produced by voxgate-core.
#[derive(Debug, Error)]
pub enum VoxError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("calibration failed: {0}")]
    CalibrationFailed(String),

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoxError>;
