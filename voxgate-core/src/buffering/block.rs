//! Typed audio block handed from the capture thread to the processing thread.

use std::time::Duration;

/// One fixed-length block of mono 16-bit PCM.
///
/// Blocks are immutable once produced and are moved, never shared: the
/// channel, the pre-roll window and an in-progress segment each own the
/// blocks they hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlock {
    /// Producer sequence number, starting at 0 for each stream.
    pub seq: u64,
    /// Stream time of the first sample in this block.
    pub offset: Duration,
    /// Mono i16 samples.
    pub samples: Vec<i16>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioBlock {
    pub fn new(seq: u64, offset: Duration, samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            seq,
            offset,
            samples,
            sample_rate,
        }
    }

    /// Duration covered by this block's samples.
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Convert a sample count at `sample_rate` into an exact `Duration`.
///
/// Uses integer nanosecond arithmetic so block offsets never drift.
pub fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = (samples as u128 * 1_000_000_000u128) / sample_rate as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

/// Concatenate blocks into one contiguous sample buffer, preserving order.
pub fn concat_blocks<'a, I>(blocks: I) -> Vec<i16>
where
    I: IntoIterator<Item = &'a AudioBlock>,
{
    let mut out = Vec::new();
    for block in blocks {
        out.extend_from_slice(&block.samples);
    }
    out
}
