//! System microphone capture via cpal.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** block on a mutex, perform I/O, or allocate once warmed up.
//! It down-mixes into a reused buffer and writes into an SPSC ring producer
//! whose `push_slice` is lock-free. Everything else (resampling, quantising,
//! cutting blocks) happens on the thread that calls
//! [`AudioStream::read_block`].

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
use tracing::{error, info, warn};

use super::{
    device::select_input_index, downmix_into, resample::RateConverter, AudioSource, AudioStream,
    BlockAssembler, BlockRead, StreamSpec,
};
use crate::buffering::{create_sample_ring, Consumer, Producer, SampleConsumer, SampleProducer};
use crate::error::{Result, VoxError};

/// Samples pulled from the ring per drain step.
const DRAIN_CHUNK: usize = 4096;
/// Sleep between empty ring polls.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// The system input device, optionally a named one.
#[derive(Debug, Clone, Default)]
pub struct CpalSource {
    preferred_device: Option<String>,
}

impl CpalSource {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

impl AudioSource for CpalSource {
    fn open(&mut self, spec: &StreamSpec) -> Result<Box<dyn AudioStream>> {
        let stream = CpalStream::open(spec, self.preferred_device.as_deref())?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        match &self.preferred_device {
            Some(name) => format!("input device '{name}'"),
            None => "default input device".to_string(),
        }
    }
}

/// Live cpal stream plus the capture-thread half of the sample ring.
///
/// **Not `Send`**: create and drop it on the same OS thread.
struct CpalStream {
    /// Kept alive so the stream is not dropped prematurely.
    _stream: Stream,
    consumer: SampleConsumer,
    converter: RateConverter,
    assembler: BlockAssembler,
    scratch: Vec<f32>,
    converted: Vec<f32>,
    errors: Arc<AtomicU64>,
    overruns: Arc<AtomicU64>,
    seen_errors: u64,
    seen_overruns: u64,
}

impl CpalStream {
    fn open(spec: &StreamSpec, preferred: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let mut devices: Vec<cpal::Device> = host
            .input_devices()
            .map_err(|e| VoxError::AudioDevice(e.to_string()))?
            .collect();
        let names: Vec<String> = devices
            .iter()
            .map(|d| d.name().unwrap_or_default())
            .collect();

        let device = match select_input_index(&names, default_name.as_deref(), preferred) {
            Some(idx) => devices.swap_remove(idx),
            None => host
                .default_input_device()
                .ok_or(VoxError::NoDefaultInputDevice)?,
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| VoxError::AudioDevice(e.to_string()))?;
        let device_rate = supported.sample_rate().0;
        let channels = supported.channels();
        if channels != spec.channels {
            info!(
                requested = spec.channels,
                actual = channels,
                "device channel count differs, down-mixing to mono"
            );
        }
        info!(sample_rate = device_rate, channels, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(device_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (producer, consumer) = create_sample_ring();
        let errors = Arc::new(AtomicU64::new(0));
        let overruns = Arc::new(AtomicU64::new(0));
        let ch = channels as usize;

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_input::<f32>(
                &device,
                &config,
                ch,
                producer,
                Arc::clone(&errors),
                Arc::clone(&overruns),
                |s| s,
            ),
            SampleFormat::I16 => build_input::<i16>(
                &device,
                &config,
                ch,
                producer,
                Arc::clone(&errors),
                Arc::clone(&overruns),
                |s| s as f32 / 32_768.0,
            ),
            SampleFormat::U16 => build_input::<u16>(
                &device,
                &config,
                ch,
                producer,
                Arc::clone(&errors),
                Arc::clone(&overruns),
                |s| (s as f32 - 32_768.0) / 32_768.0,
            ),
            SampleFormat::U8 => build_input::<u8>(
                &device,
                &config,
                ch,
                producer,
                Arc::clone(&errors),
                Arc::clone(&overruns),
                |s| (s as f32 - 128.0) / 128.0,
            ),
            fmt => {
                return Err(VoxError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| VoxError::AudioStream(e.to_string()))?;

        // ~20 ms of device audio per rubato call.
        let chunk = (device_rate as usize / 50).max(64);
        let converter = RateConverter::new(device_rate, spec.sample_rate, chunk)?;

        Ok(Self {
            _stream: stream,
            consumer,
            converter,
            assembler: BlockAssembler::new(spec.block_size),
            scratch: vec![0.0; DRAIN_CHUNK],
            converted: Vec::with_capacity(DRAIN_CHUNK),
            errors,
            overruns,
            seen_errors: 0,
            seen_overruns: 0,
        })
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    mut producer: SampleProducer,
    errors: Arc<AtomicU64>,
    overruns: Arc<AtomicU64>,
    to_f32: fn(T) -> f32,
) -> Result<Stream>
where
    T: SizedSample + Send + 'static,
{
    let mut mix_buf: Vec<f32> = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                downmix_into(data, channels, &mut mix_buf, to_f32);
                let written = producer.push_slice(&mix_buf);
                if written < mix_buf.len() {
                    overruns.fetch_add((mix_buf.len() - written) as u64, Ordering::Relaxed);
                }
            },
            move |err| {
                errors.fetch_add(1, Ordering::Relaxed);
                error!("audio stream error: {err}");
            },
            None,
        )
        .map_err(|e| VoxError::AudioStream(e.to_string()))
}

impl AudioStream for CpalStream {
    fn read_block(&mut self, timeout: Duration) -> Result<BlockRead> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(block) = self.assembler.pop() {
                return Ok(BlockRead::Block(block));
            }

            let n = self.consumer.pop_slice(&mut self.scratch);
            if n > 0 {
                self.converted.clear();
                self.converter
                    .process_into(&self.scratch[..n], &mut self.converted);
                self.assembler.push_f32(&self.converted);
                continue;
            }

            if Instant::now() >= deadline {
                return Ok(BlockRead::Timeout);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn take_faults(&mut self) -> u64 {
        let overruns = self.overruns.load(Ordering::Relaxed);
        if overruns > self.seen_overruns {
            warn!(
                dropped_samples = overruns - self.seen_overruns,
                "sample ring full, audio dropped"
            );
            self.seen_overruns = overruns;
        }
        let errors = self.errors.load(Ordering::Relaxed);
        let fresh = errors.saturating_sub(self.seen_errors);
        self.seen_errors = errors;
        fresh
    }
}
