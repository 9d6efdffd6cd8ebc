//! Processing loop: the single consumer of the block channel.
//!
//! ## Stages (per block)
//!
//! ```text
//! 1. amplitude → rolling history → published meter
//! 2. on_amplitude_update
//! 3. pre-roll push (always)
//! 4. segmenter (VAD enabled) → on_speech_start / on_speech_end
//! 5. every N blocks (VAD enabled): periodic recalibration
//! ```
//!
//! All pipeline state lives in [`Processor`] and is touched by this thread
//! only. Other threads see it through [`SharedState`] and
//! [`PipelineDiagnostics`]; reconfiguration arrives as [`ControlMessage`]s
//! drained between blocks.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use super::handler::{guarded, SpeechHandler};
use super::StatusBoard;
use crate::{
    buffering::{block::AudioBlock, channel::BlockReceiver, preroll::PreRollWindow},
    config::{recv_timeout, secs, PipelineConfig},
    events::PipelineStatus,
    vad::{
        block_amplitude, AmplitudeMeter, CalibrationState, NoiseFloorCalibrator, RollingHistory,
        SegmenterParams, Transition, UtteranceSegmenter,
    },
};

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub blocks_captured: AtomicU64,
    pub blocks_dropped: AtomicU64,
    pub blocks_processed: AtomicU64,
    pub stream_faults: AtomicU64,
    pub callback_errors: AtomicU64,
    pub segments_emitted: AtomicU64,
    pub segments_discarded: AtomicU64,
    pub recalibrations: AtomicU64,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.blocks_captured.store(0, Ordering::Relaxed);
        self.blocks_dropped.store(0, Ordering::Relaxed);
        self.blocks_processed.store(0, Ordering::Relaxed);
        self.stream_faults.store(0, Ordering::Relaxed);
        self.callback_errors.store(0, Ordering::Relaxed);
        self.segments_emitted.store(0, Ordering::Relaxed);
        self.segments_discarded.store(0, Ordering::Relaxed);
        self.recalibrations.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_captured: self.blocks_captured.load(Ordering::Relaxed),
            blocks_dropped: self.blocks_dropped.load(Ordering::Relaxed),
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            stream_faults: self.stream_faults.load(Ordering::Relaxed),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
            segments_emitted: self.segments_emitted.load(Ordering::Relaxed),
            segments_discarded: self.segments_discarded.load(Ordering::Relaxed),
            recalibrations: self.recalibrations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub blocks_captured: u64,
    pub blocks_dropped: u64,
    pub blocks_processed: u64,
    pub stream_faults: u64,
    pub callback_errors: u64,
    pub segments_emitted: u64,
    pub segments_discarded: u64,
    pub recalibrations: u64,
}

// ---------------------------------------------------------------------------
// Shared state and control
// ---------------------------------------------------------------------------

/// Values the processing thread publishes for `get_stats` / `get_buffer_info`.
pub struct SharedState {
    pub amplitude: AmplitudeMeter,
    pub calibration: Mutex<CalibrationState>,
    pub speech_active: AtomicBool,
    pub pre_roll_blocks: AtomicUsize,
}

impl SharedState {
    pub fn new(calibration: CalibrationState) -> Self {
        Self {
            amplitude: AmplitudeMeter::new(),
            calibration: Mutex::new(calibration),
            speech_active: AtomicBool::new(false),
            pre_roll_blocks: AtomicUsize::new(0),
        }
    }
}

/// Runtime tuning; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterUpdate {
    /// Start threshold (clamped like calibrated thresholds).
    pub threshold: Option<f64>,
    pub min_speech_secs: Option<f64>,
    pub max_silence_secs: Option<f64>,
}

impl ParameterUpdate {
    pub fn is_empty(&self) -> bool {
        self.threshold.is_none() && self.min_speech_secs.is_none() && self.max_silence_secs.is_none()
    }
}

/// Reconfiguration delivered to the processing thread between blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Parameters(ParameterUpdate),
    PreRollDuration(f64),
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Per-block pipeline logic, independent of threads and channels.
pub struct Processor {
    config: PipelineConfig,
    vad_enabled: bool,
    history: RollingHistory,
    calibrator: NoiseFloorCalibrator,
    pre_roll: PreRollWindow,
    segmenter: UtteranceSegmenter,
    handler: Box<dyn SpeechHandler>,
    processed: u64,
    shared: Arc<SharedState>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl Processor {
    /// Build a processor for a fresh stream, resuming the currently
    /// published calibration.
    pub fn new(
        config: PipelineConfig,
        vad_enabled: bool,
        handler: Box<dyn SpeechHandler>,
        shared: Arc<SharedState>,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Self {
        let published = shared.calibration.lock().clone();
        let calibrator = NoiseFloorCalibrator::resume(
            config.calibration.clone(),
            published,
            std::time::Duration::ZERO,
        );
        let pre_roll =
            PreRollWindow::with_duration(config.pre_roll_secs, config.sample_rate, config.block_size);
        shared.pre_roll_blocks.store(0, Ordering::Relaxed);
        shared.speech_active.store(false, Ordering::Relaxed);

        Self {
            history: RollingHistory::new(config.calibration.history_capacity),
            segmenter: UtteranceSegmenter::new(SegmenterParams::from(&config.vad)),
            calibrator,
            pre_roll,
            config,
            vad_enabled,
            handler,
            processed: 0,
            shared,
            diagnostics,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.calibrator.threshold()
    }

    pub fn is_speech_active(&self) -> bool {
        self.segmenter.is_active()
    }

    pub fn pre_roll(&self) -> &PreRollWindow {
        &self.pre_roll
    }

    pub fn process_block(&mut self, block: AudioBlock) {
        let now = block.offset;

        // 1. Level
        let amplitude = block_amplitude(&block);
        self.history.push(amplitude);
        self.shared.amplitude.set(amplitude);

        // 2. Telemetry callback
        let handler = &mut self.handler;
        guarded(&self.diagnostics, "on_amplitude_update", || {
            handler.on_amplitude_update(amplitude)
        });

        // 3. Pre-roll, always
        self.pre_roll.push(block.clone());
        self.shared
            .pre_roll_blocks
            .store(self.pre_roll.len(), Ordering::Relaxed);

        self.processed += 1;
        self.diagnostics
            .blocks_processed
            .fetch_add(1, Ordering::Relaxed);

        if !self.vad_enabled {
            return;
        }

        // 4. Segmentation
        let threshold = self.calibrator.threshold();
        match self
            .segmenter
            .advance(amplitude, threshold, &block, &self.pre_roll)
        {
            Transition::Started { amplitude } => {
                self.shared.speech_active.store(true, Ordering::Relaxed);
                let handler = &mut self.handler;
                guarded(&self.diagnostics, "on_speech_start", || {
                    handler.on_speech_start(amplitude)
                });
            }
            Transition::Ended(segment) => {
                self.shared.speech_active.store(false, Ordering::Relaxed);
                self.diagnostics
                    .segments_emitted
                    .fetch_add(1, Ordering::Relaxed);
                let span = info_span!(
                    "utterance",
                    started_ms = segment.started_at.as_millis() as u64,
                    reason = segment.reason.label(),
                );
                let _enter = span.enter();
                info!(
                    duration_ms = segment.duration.as_millis() as u64,
                    audio_ms = segment.audio_duration().as_millis() as u64,
                    "speech segment complete"
                );
                let handler = &mut self.handler;
                guarded(&self.diagnostics, "on_speech_end", || {
                    handler.on_speech_end(segment)
                });
            }
            Transition::Discarded { .. } => {
                self.shared.speech_active.store(false, Ordering::Relaxed);
                self.diagnostics
                    .segments_discarded
                    .fetch_add(1, Ordering::Relaxed);
            }
            Transition::Idle | Transition::Voiced | Transition::Silent => {}
        }

        // 5. Periodic recalibration
        if self.processed % self.config.calibration.check_every_blocks.max(1) == 0 {
            if let Some(state) = self.calibrator.maybe_recalibrate(&self.history, now) {
                *self.shared.calibration.lock() = state;
                self.diagnostics
                    .recalibrations
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn apply(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Parameters(update) => {
                if let Some(threshold) = update.threshold {
                    let applied = self.calibrator.set_threshold(threshold);
                    self.shared.calibration.lock().vad_threshold = applied;
                }
                if let Some(min_speech) = update.min_speech_secs {
                    self.config.vad.min_speech_secs = min_speech;
                    self.segmenter.params_mut().min_speech = secs(min_speech);
                }
                if let Some(max_silence) = update.max_silence_secs {
                    self.config.vad.max_silence_secs = max_silence;
                    self.segmenter.params_mut().max_silence = secs(max_silence);
                }
                info!(
                    threshold = self.calibrator.threshold(),
                    min_speech_secs = self.config.vad.min_speech_secs,
                    max_silence_secs = self.config.vad.max_silence_secs,
                    "parameters updated"
                );
            }
            ControlMessage::PreRollDuration(duration) => {
                self.pre_roll = self.pre_roll.rebuilt(duration);
                self.config.pre_roll_secs = self.pre_roll.duration_secs();
                self.shared.pre_roll_blocks.store(0, Ordering::Relaxed);
                info!(
                    duration_secs = self.pre_roll.duration_secs(),
                    capacity_blocks = self.pre_roll.capacity(),
                    "pre-roll rebuilt"
                );
            }
        }
    }

    /// End of stream: drop any in-progress segment.
    pub fn finish(&mut self) {
        if self.segmenter.reset() {
            debug!("stream ended during speech, active segment discarded");
        }
        self.shared.speech_active.store(false, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Why [`run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingExit {
    Stopped,
    SourceExhausted,
}

/// Everything the processing thread owns.
pub struct ProcessingContext {
    pub processor: Processor,
    pub blocks: BlockReceiver,
    pub control: Receiver<ControlMessage>,
    pub running: Arc<AtomicBool>,
    pub capture_done: Arc<AtomicBool>,
    pub status: StatusBoard,
}

/// Run until the running flag clears or a finite source is fully consumed.
pub fn run(mut ctx: ProcessingContext) -> ProcessingExit {
    info!(
        vad_enabled = ctx.processor.vad_enabled,
        threshold = format_args!("{:.1}", ctx.processor.threshold()),
        "processing started"
    );
    let timeout = recv_timeout();
    let mut exit = ProcessingExit::Stopped;

    while ctx.running.load(Ordering::Acquire) {
        for msg in ctx.control.try_iter() {
            ctx.processor.apply(msg);
        }

        match ctx.blocks.recv_timeout(timeout) {
            Some(block) => {
                if !ctx.running.load(Ordering::Acquire) {
                    break;
                }
                ctx.processor.process_block(block);
            }
            None => {
                if ctx.capture_done.load(Ordering::Acquire) && ctx.blocks.is_empty() {
                    exit = ProcessingExit::SourceExhausted;
                    break;
                }
            }
        }
    }

    ctx.processor.finish();

    if exit == ProcessingExit::SourceExhausted {
        ctx.running.store(false, Ordering::Release);
        ctx.status
            .set(PipelineStatus::Stopped, Some("audio source exhausted".into()));
    }
    info!(?exit, "processing stopped");
    exit
}
