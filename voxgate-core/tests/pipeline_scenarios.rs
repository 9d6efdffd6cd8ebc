use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast::error::TryRecvError;
use voxgate_core::{
    AudioSource, AudioStream, BlockRead, EndReason, ParameterUpdate, PipelineConfig,
    PipelineStatus, Result, SpeechHandler, SpeechSegment, StreamSpec, VoxError, VoxGate,
    WavSource,
};

const RATE: u32 = 16_000;
const BLOCK: usize = 1600; // 100 ms

// ── Sources ──────────────────────────────────────────────────────────────────

/// Serves one script of blocks per `open`, then end of stream.
struct ClipSource {
    scripts: VecDeque<Vec<Vec<i16>>>,
}

struct ClipStream {
    blocks: VecDeque<Vec<i16>>,
}

impl AudioSource for ClipSource {
    fn open(&mut self, _spec: &StreamSpec) -> Result<Box<dyn AudioStream>> {
        let blocks = self.scripts.pop_front().unwrap_or_default();
        Ok(Box::new(ClipStream {
            blocks: blocks.into(),
        }))
    }
}

impl AudioStream for ClipStream {
    fn read_block(&mut self, _timeout: Duration) -> Result<BlockRead> {
        Ok(match self.blocks.pop_front() {
            Some(block) => BlockRead::Block(block),
            None => BlockRead::EndOfStream,
        })
    }
}

/// Never-ending constant-level input released every `pace`.
struct EndlessSource {
    level: i16,
    pace: Duration,
}

struct EndlessStream {
    level: i16,
    pace: Duration,
    block_size: usize,
}

impl AudioSource for EndlessSource {
    fn open(&mut self, spec: &StreamSpec) -> Result<Box<dyn AudioStream>> {
        Ok(Box::new(EndlessStream {
            level: self.level,
            pace: self.pace,
            block_size: spec.block_size,
        }))
    }
}

impl AudioStream for EndlessStream {
    fn read_block(&mut self, _timeout: Duration) -> Result<BlockRead> {
        thread::sleep(self.pace);
        Ok(BlockRead::Block(vec![self.level; self.block_size]))
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorded {
    starts: Vec<f64>,
    segments: Vec<SpeechSegment>,
    amplitudes: Vec<f64>,
}

struct RecordingHandler {
    log: Arc<Mutex<Recorded>>,
    amplitude_delay: Duration,
}

impl SpeechHandler for RecordingHandler {
    fn on_speech_start(&mut self, amplitude: f64) -> anyhow::Result<()> {
        self.log.lock().starts.push(amplitude);
        Ok(())
    }

    fn on_speech_end(&mut self, segment: SpeechSegment) -> anyhow::Result<()> {
        self.log.lock().segments.push(segment);
        Ok(())
    }

    fn on_amplitude_update(&mut self, amplitude: f64) -> anyhow::Result<()> {
        if !self.amplitude_delay.is_zero() {
            thread::sleep(self.amplitude_delay);
        }
        self.log.lock().amplitudes.push(amplitude);
        Ok(())
    }
}

struct FaultyHandler {
    amplitude_calls: Arc<AtomicUsize>,
}

impl SpeechHandler for FaultyHandler {
    fn on_speech_start(&mut self, _amplitude: f64) -> anyhow::Result<()> {
        anyhow::bail!("downstream queue unavailable")
    }

    fn on_speech_end(&mut self, _segment: SpeechSegment) -> anyhow::Result<()> {
        panic!("consumer bug while handling segment");
    }

    fn on_amplitude_update(&mut self, _amplitude: f64) -> anyhow::Result<()> {
        self.amplitude_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn level(amplitude: f64) -> i16 {
    (amplitude * 32.767).round() as i16
}

fn blocks_at(amplitude: f64, count: usize) -> Vec<Vec<i16>> {
    vec![vec![level(amplitude); BLOCK]; count]
}

/// 1 s silence (5), 2 s speech (80), 2 s silence (5).
fn five_second_clip() -> Vec<Vec<i16>> {
    let mut clip = blocks_at(5.0, 10);
    clip.extend(blocks_at(80.0, 20));
    clip.extend(blocks_at(5.0, 20));
    clip
}

fn config() -> PipelineConfig {
    let mut cfg = PipelineConfig {
        sample_rate: RATE,
        block_size: BLOCK,
        channel_capacity: 256,
        ..PipelineConfig::default()
    };
    cfg.calibration.calibrate_on_start = false;
    cfg
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn recording_handler(delay: Duration) -> (Box<dyn SpeechHandler>, Arc<Mutex<Recorded>>) {
    let log = Arc::new(Mutex::new(Recorded::default()));
    let handler = RecordingHandler {
        log: Arc::clone(&log),
        amplitude_delay: delay,
    };
    (Box::new(handler), log)
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[test]
fn five_second_clip_yields_one_utterance() {
    let source = ClipSource {
        scripts: VecDeque::from(vec![blocks_at(5.0, 30), five_second_clip()]),
    };
    let gate = VoxGate::acquire(source, config());

    let calibration = gate.calibrate(Duration::from_secs(3)).expect("calibrate");
    assert!((calibration.noise_floor - 5.0).abs() < 0.05);
    assert!((calibration.vad_threshold - 25.0).abs() < 0.2);

    let mut status = gate.subscribe_status();
    let (handler, log) = recording_handler(Duration::ZERO);
    gate.start(handler, true).expect("start");

    assert!(
        wait_until(Duration::from_secs(5), || !gate.is_running()),
        "finite source should end the run"
    );
    gate.stop();

    let log = log.lock();
    assert_eq!(log.starts.len(), 1);
    assert_eq!(log.segments.len(), 1);
    assert_eq!(log.amplitudes.len(), 50);

    let segment = &log.segments[0];
    assert_eq!(segment.reason, EndReason::Silence);
    assert_eq!(segment.started_at, Duration::from_secs(1));
    // Closed at t = 3.9 s, one second after the last voiced block.
    assert_eq!(segment.started_at + segment.duration, Duration::from_millis(3900));
    let audio = segment.audio_duration().as_secs_f64();
    assert!((2.4..=3.0).contains(&audio), "audio covers {audio}s");
    // Segment opens with pre-roll silence, not with the trigger block.
    assert_eq!(segment.audio[0], level(5.0));

    let stats = gate.get_stats();
    assert_eq!(stats.diagnostics.segments_emitted, 1);
    assert_eq!(stats.diagnostics.blocks_dropped, 0);
    assert!(!stats.running);

    let mut statuses = Vec::new();
    loop {
        match status.try_recv() {
            Ok(event) => statuses.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    assert_eq!(statuses.first().map(|e| e.status), Some(PipelineStatus::Listening));
    let last = statuses.last().expect("stop event");
    assert_eq!(last.status, PipelineStatus::Stopped);
    assert_eq!(last.detail.as_deref(), Some("audio source exhausted"));
}

#[test]
fn slow_consumer_drops_oldest_and_sees_newest() {
    // Each block carries a distinct level so the last one is recognisable.
    let script: Vec<Vec<i16>> = (0..200).map(|i| vec![(i * 10) as i16; BLOCK]).collect();
    let newest: i16 = 199 * 10;
    let source = ClipSource {
        scripts: VecDeque::from(vec![script]),
    };
    let gate = VoxGate::acquire(
        source,
        PipelineConfig {
            channel_capacity: 4,
            ..config()
        },
    );

    let (handler, log) = recording_handler(Duration::from_millis(5));
    gate.start(handler, false).expect("start");
    assert!(wait_until(Duration::from_secs(10), || !gate.is_running()));
    gate.stop();

    let stats = gate.get_stats().diagnostics;
    assert_eq!(stats.blocks_captured, 200);
    assert!(stats.blocks_dropped > 0, "expected drops: {stats:?}");
    assert_eq!(stats.blocks_processed + stats.blocks_dropped, 200);

    let log = log.lock();
    let last = *log.amplitudes.last().expect("at least one block processed");
    let expected = newest as f64 / 32.767;
    assert!((last - expected).abs() < 1e-9, "last={last} expected={expected}");
    // Delivered levels are strictly increasing: gaps, never reordering.
    assert!(log.amplitudes.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn failing_handler_does_not_stop_the_pipeline() {
    let source = ClipSource {
        scripts: VecDeque::from(vec![five_second_clip()]),
    };
    let gate = VoxGate::acquire(source, config());
    gate.set_parameters(ParameterUpdate {
        threshold: Some(25.0),
        ..ParameterUpdate::default()
    });

    let calls = Arc::new(AtomicUsize::new(0));
    gate.start(
        Box::new(FaultyHandler {
            amplitude_calls: Arc::clone(&calls),
        }),
        true,
    )
    .expect("start");
    assert!(wait_until(Duration::from_secs(5), || !gate.is_running()));
    gate.stop();

    assert_eq!(calls.load(Ordering::SeqCst), 50);
    let stats = gate.get_stats().diagnostics;
    assert_eq!(stats.callback_errors, 2);
    assert_eq!(stats.segments_emitted, 1);
    assert_eq!(stats.blocks_processed, 50);
}

#[test]
fn control_surface_is_idempotent() {
    let mut cfg = config();
    cfg.calibration.calibrate_on_start = true;
    cfg.calibration.duration_secs = 0.5;
    let gate = VoxGate::acquire(
        EndlessSource {
            level: level(4.0),
            pace: Duration::from_millis(2),
        },
        cfg,
    );

    gate.stop();
    let (handler, _log) = recording_handler(Duration::ZERO);
    gate.start(handler, true).expect("first start");
    let (handler, _log) = recording_handler(Duration::ZERO);
    gate.start(handler, true).expect("second start is a no-op");
    assert!(gate.is_running());
    assert_eq!(gate.status(), PipelineStatus::Listening);

    // Startup calibration ran against the 4.0 background.
    let stats = gate.get_stats();
    assert!(stats.last_calibration.is_some());
    assert!((stats.noise_floor - 4.0).abs() < 0.05);
    assert!((stats.vad_threshold - 20.0).abs() < 0.2);

    assert!(matches!(
        gate.calibrate(Duration::from_secs(1)),
        Err(VoxError::AlreadyRunning)
    ));

    gate.set_pre_roll_duration(1.0);
    assert!(wait_until(Duration::from_secs(2), || {
        gate.get_buffer_info().current_blocks == 10
    }));
    let info = gate.get_buffer_info();
    assert_eq!(info.capacity_blocks, 10);
    assert_eq!(info.memory_estimate_bytes, 10 * BLOCK * 2);

    gate.set_parameters(ParameterUpdate {
        threshold: Some(500.0),
        ..ParameterUpdate::default()
    });
    assert!(wait_until(Duration::from_secs(2), || {
        gate.get_stats().vad_threshold == 150.0
    }));

    gate.stop();
    gate.stop();
    assert!(!gate.is_running());
    assert_eq!(gate.status(), PipelineStatus::Stopped);
    assert!(!gate.get_stats().speech_active);

    let (handler, _log) = recording_handler(Duration::ZERO);
    gate.start(handler, true).expect("restart");
    assert!(gate.is_running());
    gate.stop();
}

#[test]
fn wav_file_runs_through_the_pipeline() {
    let path = std::env::temp_dir().join(format!("voxgate-scenario-{}.wav", std::process::id()));
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
    for sample in five_second_clip().into_iter().flatten() {
        writer.write_sample(sample).expect("write sample");
    }
    writer.finalize().expect("finalize wav");

    let gate = VoxGate::acquire(WavSource::new(&path), config());
    gate.set_parameters(ParameterUpdate {
        threshold: Some(25.0),
        ..ParameterUpdate::default()
    });
    let (handler, log) = recording_handler(Duration::ZERO);
    gate.start(handler, true).expect("start");
    assert!(wait_until(Duration::from_secs(5), || !gate.is_running()));
    gate.stop();
    let _ = std::fs::remove_file(&path);

    let log = log.lock();
    assert_eq!(log.segments.len(), 1);
    assert_eq!(log.segments[0].started_at, Duration::from_secs(1));
    assert_eq!(log.segments[0].sample_rate, RATE);
}
