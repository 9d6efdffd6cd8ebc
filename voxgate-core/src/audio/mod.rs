//! Audio sources.
//!
//! An [`AudioSource`] is the microphone (or file) a pipeline owns for its
//! lifetime. Opening it yields an [`AudioStream`] that hands out fixed-size,
//! mono, i16 blocks at the requested sample rate by blocking pull. Closing a
//! stream is dropping it.
//!
//! | Source | Backend |
//! |--------|---------|
//! | `CpalSource` | system input device via cpal (feature `audio-cpal`) |
//! | [`WavSource`] | 16-bit or float WAV file via hound |
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), so [`AudioStream`] is not `Send` either. Streams are opened on the
//! thread that reads them and dropped there too; only the source itself
//! crosses threads.

#[cfg(feature = "audio-cpal")]
pub mod cpal_source;
pub mod device;
pub mod resample;
pub mod wav;

use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::vad::amplitude::f32_to_i16;

#[cfg(feature = "audio-cpal")]
pub use cpal_source::CpalSource;
pub use device::{list_input_devices, DeviceInfo};
pub use wav::WavSource;

/// Stream geometry requested from a source, fixed for the stream's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    /// Rate of delivered blocks (Hz).
    pub sample_rate: u32,
    /// Channels requested from the device; delivered blocks are always mono.
    pub channels: u16,
    /// Samples per delivered block.
    pub block_size: usize,
}

impl From<&PipelineConfig> for StreamSpec {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            sample_rate: cfg.sample_rate,
            channels: cfg.channels,
            block_size: cfg.block_size,
        }
    }
}

/// Result of one [`AudioStream::read_block`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRead {
    /// Exactly `block_size` mono samples.
    Block(Vec<i16>),
    /// Nothing arrived within the timeout.
    Timeout,
    /// A finite source ran out.
    EndOfStream,
}

/// An open capture stream.
pub trait AudioStream {
    /// Wait up to `timeout` for the next block.
    ///
    /// # Errors
    /// A transient fault (driver dropout, decode error). Callers log it and
    /// keep reading.
    fn read_block(&mut self, timeout: Duration) -> Result<BlockRead>;

    /// Faults reported asynchronously by the backend since the last call.
    fn take_faults(&mut self) -> u64 {
        0
    }
}

/// Something that can be opened as an [`AudioStream`].
pub trait AudioSource: Send {
    /// # Errors
    /// The device or file cannot be opened with the requested geometry.
    fn open(&mut self, spec: &StreamSpec) -> Result<Box<dyn AudioStream>>;

    /// Short human-readable label for logs.
    fn describe(&self) -> String {
        "audio source".to_string()
    }
}

/// Cuts an arbitrary stream of normalised f32 samples into fixed-size i16
/// blocks.
#[derive(Debug)]
pub struct BlockAssembler {
    block_size: usize,
    pending: Vec<i16>,
}

impl BlockAssembler {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size * 2),
        }
    }

    pub fn push_f32(&mut self, samples: &[f32]) {
        self.pending.extend(samples.iter().copied().map(f32_to_i16));
    }

    pub fn push_i16(&mut self, samples: &[i16]) {
        self.pending.extend_from_slice(samples);
    }

    /// Next complete block, if one is buffered.
    pub fn pop(&mut self) -> Option<Vec<i16>> {
        if self.pending.len() < self.block_size {
            return None;
        }
        let rest = self.pending.split_off(self.block_size);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    /// Remaining partial block, zero-padded to full size. `None` when empty.
    pub fn flush_padded(&mut self) -> Option<Vec<i16>> {
        if self.pending.is_empty() {
            return None;
        }
        let mut block = std::mem::take(&mut self.pending);
        block.resize(self.block_size, 0);
        Some(block)
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Average interleaved frames down to mono into `out` (cleared first).
pub fn downmix_into<T, F>(data: &[T], channels: usize, out: &mut Vec<f32>, to_f32: F)
where
    T: Copy,
    F: Fn(T) -> f32,
{
    out.clear();
    let ch = channels.max(1);
    if ch == 1 {
        out.extend(data.iter().map(|s| to_f32(*s)));
        return;
    }
    out.extend(data.chunks_exact(ch).map(|frame| {
        let sum: f32 = frame.iter().map(|s| to_f32(*s)).sum();
        sum / ch as f32
    }));
}
