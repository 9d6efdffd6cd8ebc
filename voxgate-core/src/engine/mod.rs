//! `VoxGate`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! VoxGate::acquire(source, config)      status = Idle
//!     ├─► calibrate(duration)           status = Calibrating → Idle
//!     └─► start(handler, vad_enabled)   source opened, threads spawned, status = Listening
//!             └─► stop()                threads joined, channel cleared, status = Stopped
//! ```
//!
//! `start()` and `stop()` are idempotent: a second `start()` while running
//! and a `stop()` while stopped both return quietly.
//!
//! ## Threading
//!
//! Two named threads per run: `voxgate-capture` opens the source *on that
//! thread* (a cpal stream is `!Send`) and reports the open result back to
//! `start()` over a sync oneshot; `voxgate-process` owns all pipeline state.
//! Everything else reads published snapshots.

pub mod capture;
pub mod handler;
pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    audio::{AudioSource, AudioStream, BlockRead, StreamSpec},
    buffering::{
        block::samples_to_duration,
        channel::{block_channel, BlockReceiver},
        preroll::{buffer_info, capacity_for, clamp_duration},
    },
    config::PipelineConfig,
    error::{Result, VoxError},
    events::{BufferInfo, PipelineStats, PipelineStatus, PipelineStatusEvent},
    vad::{amplitude::amplitude as samples_amplitude, CalibrationState, NoiseFloorCalibrator},
};

pub use handler::{Callbacks, SpeechHandler};
pub use pipeline::{ControlMessage, DiagnosticsSnapshot, ParameterUpdate, PipelineDiagnostics};

/// Status events buffered for slow subscribers.
const STATUS_BROADCAST_CAP: usize = 64;
/// How long `stop()` waits for both threads.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const JOIN_POLL: Duration = Duration::from_millis(5);
/// Extra wall time an explicit calibration may take beyond its duration.
const CALIBRATION_GRACE: Duration = Duration::from_secs(2);

/// Current status plus its broadcast channel.
#[derive(Clone)]
pub struct StatusBoard {
    current: Arc<Mutex<PipelineStatus>>,
    tx: broadcast::Sender<PipelineStatusEvent>,
}

impl StatusBoard {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(STATUS_BROADCAST_CAP);
        Self {
            current: Arc::new(Mutex::new(PipelineStatus::Idle)),
            tx,
        }
    }

    pub fn get(&self) -> PipelineStatus {
        *self.current.lock()
    }

    pub fn set(&self, status: PipelineStatus, detail: Option<String>) {
        *self.current.lock() = status;
        let _ = self.tx.send(PipelineStatusEvent { status, detail });
    }

    fn subscribe(&self) -> broadcast::Receiver<PipelineStatusEvent> {
        self.tx.subscribe()
    }
}

/// Thread handles and channel ends of one run.
struct Workers {
    capture: JoinHandle<()>,
    process: JoinHandle<()>,
    control: Sender<ControlMessage>,
    blocks: BlockReceiver,
}

/// Exclusive owner of one audio source and the pipeline running on it.
///
/// Not `Clone`: the source moves in on [`VoxGate::acquire`] and is released
/// when the handle drops. All methods take `&self`, so the handle can be
/// shared behind an `Arc`.
pub struct VoxGate {
    source: Arc<Mutex<Box<dyn AudioSource>>>,
    config: Mutex<PipelineConfig>,
    running: Arc<AtomicBool>,
    capture_done: Arc<AtomicBool>,
    shared: Arc<pipeline::SharedState>,
    diagnostics: Arc<PipelineDiagnostics>,
    status: StatusBoard,
    /// Also serialises `start` / `stop` / `calibrate`.
    workers: Mutex<Option<Workers>>,
}

impl VoxGate {
    /// Take ownership of `source`. Nothing is opened until `calibrate` or
    /// `start`.
    pub fn acquire(source: impl AudioSource + 'static, mut config: PipelineConfig) -> Self {
        config.normalize();
        let initial = NoiseFloorCalibrator::new(
            config.calibration.clone(),
            config.vad.initial_threshold,
        )
        .state()
        .clone();
        info!(source = source.describe().as_str(), "audio source acquired");

        Self {
            source: Arc::new(Mutex::new(Box::new(source))),
            config: Mutex::new(config),
            running: Arc::new(AtomicBool::new(false)),
            capture_done: Arc::new(AtomicBool::new(false)),
            shared: Arc::new(pipeline::SharedState::new(initial)),
            diagnostics: Arc::new(PipelineDiagnostics::default()),
            status: StatusBoard::new(),
            workers: Mutex::new(None),
        }
    }

    /// Measure the noise floor over `duration` of quiet input.
    ///
    /// # Errors
    /// - `VoxError::AlreadyRunning` while the pipeline runs.
    /// - `VoxError::CalibrationFailed` when no audio arrived; the previous
    ///   calibration is kept.
    /// - Device errors from opening the source.
    pub fn calibrate(&self, duration: Duration) -> Result<CalibrationState> {
        let _guard = self.workers.lock();
        if self.running.load(Ordering::SeqCst) {
            return Err(VoxError::AlreadyRunning);
        }
        self.run_calibration(duration)
    }

    /// Open the source and start the capture and processing threads.
    ///
    /// With `vad_enabled`, an explicit calibration runs first when none has
    /// happened yet and `calibrate_on_start` is set. Without it only
    /// amplitude updates are delivered.
    ///
    /// # Errors
    /// Only failures to open the source (or spawn threads) are returned.
    pub fn start(&self, handler: Box<dyn SpeechHandler>, vad_enabled: bool) -> Result<()> {
        let mut workers = self.workers.lock();
        if self.running.load(Ordering::SeqCst) {
            info!("start requested while running, ignoring");
            return Ok(());
        }
        if let Some(finished) = workers.take() {
            // Previous run ended on its own (finite source).
            join_workers(finished);
        }

        let config = self.config.lock().clone();
        let never_calibrated = self.shared.calibration.lock().last_calibration.is_none();
        if vad_enabled && never_calibrated && config.calibration.calibrate_on_start {
            match self.run_calibration(config.calibration.duration()) {
                Ok(_) => {}
                Err(VoxError::CalibrationFailed(reason)) => {
                    warn!("startup calibration skipped: {reason}");
                }
                Err(e) => return Err(e),
            }
        }

        self.diagnostics.reset();
        self.capture_done.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let spec = StreamSpec::from(&config);
        let (block_tx, block_rx) = block_channel(config.channel_capacity);
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (open_tx, open_rx) = mpsc::channel::<Result<()>>();

        let capture = {
            let source = Arc::clone(&self.source);
            let running = Arc::clone(&self.running);
            let capture_done = Arc::clone(&self.capture_done);
            let diagnostics = Arc::clone(&self.diagnostics);
            let spec = spec.clone();
            thread::Builder::new()
                .name("voxgate-capture".into())
                .spawn(move || {
                    // Open on this thread: the stream must be dropped here too.
                    let opened = source.lock().open(&spec);
                    let stream = match opened {
                        Ok(stream) => {
                            let _ = open_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = open_tx.send(Err(e));
                            capture_done.store(true, Ordering::Release);
                            return;
                        }
                    };
                    capture::run(capture::CaptureContext {
                        stream,
                        blocks: block_tx,
                        running,
                        capture_done,
                        diagnostics,
                        sample_rate: spec.sample_rate,
                    });
                })
        };
        let capture = match capture {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        match open_rx.recv() {
            Ok(Ok(())) => self.status.set(PipelineStatus::Listening, None),
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = capture.join();
                self.status.set(PipelineStatus::Error, Some(e.to_string()));
                return Err(e);
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = capture.join();
                self.status
                    .set(PipelineStatus::Error, Some("capture thread died".into()));
                return Err(VoxError::Other(anyhow::anyhow!(
                    "capture thread exited before opening the source"
                )));
            }
        }

        let processor = pipeline::Processor::new(
            config.clone(),
            vad_enabled,
            handler,
            Arc::clone(&self.shared),
            Arc::clone(&self.diagnostics),
        );
        let ctx = pipeline::ProcessingContext {
            processor,
            blocks: block_rx.clone(),
            control: control_rx,
            running: Arc::clone(&self.running),
            capture_done: Arc::clone(&self.capture_done),
            status: self.status.clone(),
        };
        let process = thread::Builder::new()
            .name("voxgate-process".into())
            .spawn(move || {
                pipeline::run(ctx);
            });
        let process = match process {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = capture.join();
                self.status.set(PipelineStatus::Error, Some(e.to_string()));
                return Err(e.into());
            }
        };

        *workers = Some(Workers {
            capture,
            process,
            control: control_tx,
            blocks: block_rx,
        });
        info!(
            sample_rate = config.sample_rate,
            block_size = config.block_size,
            vad_enabled,
            "pipeline started, listening"
        );
        Ok(())
    }

    /// Stop both threads and discard queued audio. No-op when stopped.
    pub fn stop(&self) {
        let Some(workers) = self.workers.lock().take() else {
            return;
        };
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let discarded = join_workers(workers);
        self.shared.speech_active.store(false, Ordering::Relaxed);
        if was_running {
            self.status.set(PipelineStatus::Stopped, None);
        }
        info!(discarded_blocks = discarded, "pipeline stopped");
    }

    /// Update threshold and segmentation timing. Applied between blocks when
    /// running; stored for the next run otherwise.
    pub fn set_parameters(&self, update: ParameterUpdate) {
        if update.is_empty() {
            return;
        }
        {
            let mut config = self.config.lock();
            if let Some(min_speech) = update.min_speech_secs {
                config.vad.min_speech_secs = min_speech;
            }
            if let Some(max_silence) = update.max_silence_secs {
                config.vad.max_silence_secs = max_silence;
            }
            config.normalize();
        }
        let config = self.config.lock().clone();
        let update = ParameterUpdate {
            min_speech_secs: update.min_speech_secs.map(|_| config.vad.min_speech_secs),
            max_silence_secs: update.max_silence_secs.map(|_| config.vad.max_silence_secs),
            ..update
        };

        if !self.send_control(ControlMessage::Parameters(update.clone())) {
            if let Some(threshold) = update.threshold {
                let applied = config.calibration.clamp_threshold(threshold);
                self.shared.calibration.lock().vad_threshold = applied;
            }
            info!(?update, "parameters stored for next run");
        }
    }

    /// Rebuild the pre-roll window for `secs` (clamped to 0.1–5 s). The
    /// window restarts empty.
    pub fn set_pre_roll_duration(&self, secs: f64) -> BufferInfo {
        let secs = clamp_duration(secs);
        self.config.lock().pre_roll_secs = secs;
        self.shared.pre_roll_blocks.store(0, Ordering::Relaxed);
        if !self.send_control(ControlMessage::PreRollDuration(secs)) {
            info!(duration_secs = secs, "pre-roll duration stored for next run");
        }
        self.get_buffer_info()
    }

    pub fn get_buffer_info(&self) -> BufferInfo {
        let config = self.config.lock();
        let capacity = capacity_for(config.pre_roll_secs, config.sample_rate, config.block_size);
        let current = self.shared.pre_roll_blocks.load(Ordering::Relaxed).min(capacity);
        buffer_info(
            config.pre_roll_secs,
            capacity,
            current,
            config.sample_rate,
            config.block_size,
        )
    }

    pub fn get_stats(&self) -> PipelineStats {
        let calibration = self.shared.calibration.lock().clone();
        PipelineStats {
            noise_floor: calibration.noise_floor,
            vad_threshold: calibration.vad_threshold,
            current_amplitude: self.shared.amplitude.get(),
            last_calibration: calibration.last_calibration,
            running: self.is_running(),
            speech_active: self.shared.speech_active.load(Ordering::Relaxed),
            diagnostics: self.diagnostics.snapshot(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.get()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<PipelineStatusEvent> {
        self.status.subscribe()
    }

    pub fn config(&self) -> PipelineConfig {
        self.config.lock().clone()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    /// `true` when a running processing thread accepted the message.
    fn send_control(&self, msg: ControlMessage) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.workers.lock().as_ref() {
            Some(workers) => workers.control.send(msg).is_ok(),
            None => false,
        }
    }

    /// Caller holds the `workers` lock.
    fn run_calibration(&self, duration: Duration) -> Result<CalibrationState> {
        let config = self.config.lock().clone();
        let previous = self.status.get();
        self.status.set(
            PipelineStatus::Calibrating,
            Some(format!("measuring background for {:.1}s", duration.as_secs_f64())),
        );
        info!(duration_ms = duration.as_millis() as u64, "calibration started");

        let spec = StreamSpec::from(&config);
        let opened = self.source.lock().open(&spec);
        let amplitudes = match opened {
            Ok(mut stream) => collect_amplitudes(stream.as_mut(), &spec, duration),
            Err(e) => {
                self.status.set(PipelineStatus::Error, Some(e.to_string()));
                return Err(e);
            }
        };

        let current = self.shared.calibration.lock().clone();
        let mut calibrator =
            NoiseFloorCalibrator::resume(config.calibration.clone(), current, Duration::ZERO);
        let result = calibrator.calibrate_from_samples(&amplitudes);
        if let Ok(state) = &result {
            *self.shared.calibration.lock() = state.clone();
        }
        if let Some(last) = amplitudes.last() {
            self.shared.amplitude.set(*last);
        }

        let after = match previous {
            PipelineStatus::Calibrating | PipelineStatus::Error => PipelineStatus::Idle,
            other => other,
        };
        self.status.set(after, None);
        result
    }
}

impl Drop for VoxGate {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read blocks for `duration` of stream time and return their amplitudes.
///
/// Stops early at end of stream or when the wall-clock budget runs out.
fn collect_amplitudes(
    stream: &mut dyn AudioStream,
    spec: &StreamSpec,
    duration: Duration,
) -> Vec<f64> {
    let deadline = Instant::now() + duration + CALIBRATION_GRACE;
    let block_duration = samples_to_duration(spec.block_size, spec.sample_rate);
    let mut collected = Duration::ZERO;
    let mut amplitudes = Vec::new();

    while collected < duration && Instant::now() < deadline {
        match stream.read_block(Duration::from_millis(100)) {
            Ok(BlockRead::Block(samples)) => {
                amplitudes.push(samples_amplitude(&samples));
                collected += block_duration;
            }
            Ok(BlockRead::Timeout) => {}
            Ok(BlockRead::EndOfStream) => break,
            Err(e) => warn!("audio read failed during calibration: {e}"),
        }
    }
    amplitudes
}

/// Join both threads within [`STOP_JOIN_TIMEOUT`], then clear the channel.
/// Returns the number of discarded blocks.
fn join_workers(workers: Workers) -> usize {
    let Workers {
        capture,
        process,
        control,
        blocks,
    } = workers;
    drop(control);

    let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
    for (name, handle) in [("capture", capture), ("process", process)] {
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(JOIN_POLL);
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                warn!(thread = name, "pipeline thread panicked");
            }
        } else {
            warn!(thread = name, "pipeline thread did not stop in time, detaching");
        }
    }
    blocks.clear()
}
