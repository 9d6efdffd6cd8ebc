//! Pre-roll window: the last N blocks, kept so speech onset is never clipped.

use super::{block::AudioBlock, ring::FixedRing};
use crate::events::BufferInfo;

/// Shortest pre-roll accepted by [`PreRollWindow::with_duration`] (seconds).
pub const MIN_PRE_ROLL_SECS: f64 = 0.1;
/// Longest pre-roll accepted by [`PreRollWindow::with_duration`] (seconds).
pub const MAX_PRE_ROLL_SECS: f64 = 5.0;

/// Number of whole blocks needed to cover `secs` of audio (at least one).
pub fn capacity_for(secs: f64, sample_rate: u32, block_size: usize) -> usize {
    if block_size == 0 {
        return 1;
    }
    let blocks = secs * sample_rate as f64 / block_size as f64;
    (blocks.floor() as usize).max(1)
}

/// Fixed-capacity FIFO of recent blocks, fed on every processed block.
#[derive(Debug)]
pub struct PreRollWindow {
    blocks: FixedRing<AudioBlock>,
    duration_secs: f64,
    sample_rate: u32,
    block_size: usize,
}

impl PreRollWindow {
    /// Build a window covering `duration_secs`, clamped to
    /// [`MIN_PRE_ROLL_SECS`, `MAX_PRE_ROLL_SECS`].
    pub fn with_duration(duration_secs: f64, sample_rate: u32, block_size: usize) -> Self {
        let duration_secs = clamp_duration(duration_secs);
        let capacity = capacity_for(duration_secs, sample_rate, block_size);
        Self {
            blocks: FixedRing::new(capacity),
            duration_secs,
            sample_rate,
            block_size,
        }
    }

    /// Rebuild with a new duration. The current contents are discarded.
    pub fn rebuilt(&self, duration_secs: f64) -> Self {
        Self::with_duration(duration_secs, self.sample_rate, self.block_size)
    }

    pub fn push(&mut self, block: AudioBlock) {
        self.blocks.push(block);
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<AudioBlock> {
        self.blocks.snapshot()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.blocks.capacity()
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }
}

pub(crate) fn clamp_duration(secs: f64) -> f64 {
    if secs.is_nan() {
        return MIN_PRE_ROLL_SECS;
    }
    secs.clamp(MIN_PRE_ROLL_SECS, MAX_PRE_ROLL_SECS)
}

/// Assemble a [`BufferInfo`] from window geometry.
pub fn buffer_info(
    duration_secs: f64,
    capacity_blocks: usize,
    current_blocks: usize,
    sample_rate: u32,
    block_size: usize,
) -> BufferInfo {
    let blocks_per_second = if block_size == 0 {
        0.0
    } else {
        sample_rate as f64 / block_size as f64
    };
    let actual_duration_secs = if blocks_per_second > 0.0 {
        current_blocks as f64 / blocks_per_second
    } else {
        0.0
    };
    BufferInfo {
        duration_secs,
        capacity_blocks,
        current_blocks,
        memory_estimate_bytes: capacity_blocks * block_size * std::mem::size_of::<i16>(),
        actual_duration_secs,
        sample_rate,
        block_size,
        blocks_per_second,
    }
}
