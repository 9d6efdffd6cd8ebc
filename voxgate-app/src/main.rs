//! voxgate host entry point.
//!
//! Listens on the microphone (or a WAV file), writes every utterance to the
//! recordings directory and logs pipeline telemetry until Ctrl-C or until a
//! finite source runs dry.
//!
//! ## Runtime note
//!
//! The pipeline runs on its own OS threads. Its control methods block for at
//! most a couple of seconds, so they are called through `spawn_blocking` to
//! keep the Tokio workers free for the status and telemetry tasks.

mod cli;
mod recorder;
mod settings;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use voxgate_core::{
    list_input_devices, PipelineConfig, PipelineStatus, SpeechHandler, SpeechSegment, VoxGate,
    WavSource,
};

use cli::Cli;
use recorder::Recorder;
use settings::{default_settings_path, load_settings, save_settings, AppSettings};

/// Receives pipeline callbacks on the processing thread.
struct HostHandler {
    recorder: Option<Recorder>,
}

impl SpeechHandler for HostHandler {
    fn on_speech_start(&mut self, amplitude: f64) -> anyhow::Result<()> {
        info!(amplitude = format_args!("{amplitude:.1}"), "speech started");
        Ok(())
    }

    fn on_speech_end(&mut self, segment: SpeechSegment) -> anyhow::Result<()> {
        info!(
            reason = segment.reason.label(),
            at_secs = format_args!("{:.2}", segment.started_at.as_secs_f64()),
            audio_secs = format_args!("{:.2}", segment.audio_duration().as_secs_f64()),
            "utterance captured"
        );
        if let Some(recorder) = self.recorder.as_mut() {
            let path = recorder.save(&segment)?;
            info!(path = %path.display(), "utterance saved");
        }
        Ok(())
    }
}

fn acquire(cli: &Cli, config: PipelineConfig) -> anyhow::Result<VoxGate> {
    if let Some(path) = &cli.wav {
        info!(path = %path.display(), realtime = cli.realtime, "using WAV source");
        let source = WavSource::new(path).paced(cli.realtime);
        return Ok(VoxGate::acquire(source, config));
    }
    acquire_microphone(config)
}

#[cfg(feature = "audio-cpal")]
fn acquire_microphone(config: PipelineConfig) -> anyhow::Result<VoxGate> {
    let source = voxgate_core::CpalSource::new(config.preferred_input_device.clone());
    Ok(VoxGate::acquire(source, config))
}

#[cfg(not(feature = "audio-cpal"))]
fn acquire_microphone(_config: PipelineConfig) -> anyhow::Result<VoxGate> {
    anyhow::bail!("built without microphone support; pass --wav <PATH>")
}

fn print_devices() {
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("no audio input devices found");
        return;
    }
    for device in devices {
        let mut tags = Vec::new();
        if device.is_default {
            tags.push("default");
        }
        if device.is_usb {
            tags.push("usb");
        }
        if device.is_loopback_like {
            tags.push("loopback");
        }
        if device.is_recommended {
            tags.push("recommended");
        }
        if tags.is_empty() {
            println!("{}", device.name);
        } else {
            println!("{} [{}]", device.name, tags.join(", "));
        }
    }
}

fn recorder_for(settings: &AppSettings, settings_path: &Path) -> anyhow::Result<Option<Recorder>> {
    if !settings.record_utterances {
        return Ok(None);
    }
    let recorder = Recorder::new(settings.recordings_dir(settings_path), settings.max_recordings)?;
    info!(
        dir = %recorder.dir().display(),
        keep = settings.max_recordings,
        "recording utterances"
    );
    Ok(Some(recorder))
}

fn log_stats(gate: &VoxGate) {
    let stats = gate.get_stats();
    let d = &stats.diagnostics;
    info!(
        amplitude = format_args!("{:.1}", stats.current_amplitude),
        noise_floor = format_args!("{:.1}", stats.noise_floor),
        threshold = format_args!("{:.1}", stats.vad_threshold),
        speech = stats.speech_active,
        processed = d.blocks_processed,
        dropped = d.blocks_dropped,
        segments = d.segments_emitted,
        discarded = d.segments_discarded,
        faults = d.stream_faults,
        "pipeline stats"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("voxgate=info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.list_input_devices {
        print_devices();
        return Ok(());
    }

    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);
    cli.apply(&mut app_settings);
    info!(path = %settings_path.display(), "settings loaded");
    if cli.save_settings {
        save_settings(&settings_path, &app_settings)
            .with_context(|| format!("saving {}", settings_path.display()))?;
        info!("settings saved");
    }

    let gate = Arc::new(acquire(&cli, app_settings.pipeline.clone())?);
    let handler = HostHandler {
        recorder: recorder_for(&app_settings, &settings_path)?,
    };

    if let Some(secs) = cli.calibrate {
        let secs = if secs.is_finite() {
            secs.clamp(0.1, 60.0)
        } else {
            app_settings.pipeline.calibration.duration_secs
        };
        info!(secs, "calibrating, keep quiet");
        let g = Arc::clone(&gate);
        let state = tokio::task::spawn_blocking(move || g.calibrate(Duration::from_secs_f64(secs)))
            .await??;
        info!(
            noise_floor = format_args!("{:.1}", state.noise_floor),
            threshold = format_args!("{:.1}", state.vad_threshold),
            "calibration complete"
        );
    }

    let mut status_rx = gate.subscribe_status();
    {
        let g = Arc::clone(&gate);
        let vad_enabled = app_settings.vad_enabled;
        tokio::task::spawn_blocking(move || g.start(Box::new(handler), vad_enabled)).await??;
    }

    // ── Telemetry ─────────────────────────────────────────────────────────
    let telemetry = (app_settings.stats_interval_secs > 0.0).then(|| {
        let g = Arc::clone(&gate);
        let period = Duration::from_secs_f64(app_settings.stats_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                log_stats(&g);
            }
        })
    });

    // ── Run until interrupted or the source ends ──────────────────────────
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("ctrl-c handler failed: {e}");
                }
                info!("interrupted");
                break;
            }
            event = status_rx.recv() => match event {
                Ok(event) => {
                    info!(status = ?event.status, detail = ?event.detail, "status changed");
                    if matches!(event.status, PipelineStatus::Stopped | PipelineStatus::Error) {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Some(task) = telemetry {
        task.abort();
    }
    let g = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || g.stop()).await?;
    log_stats(&gate);
    info!("voxgate exiting");
    Ok(())
}
