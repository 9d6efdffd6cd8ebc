//! Block loudness in the pipeline's canonical amplitude unit.
//!
//! ## Unit
//!
//! Mean absolute sample value, rescaled so that a full-scale signal reads
//! 1000: `mean(|s|) / 32.767` for i16 samples, which equals
//! `mean(|x|) * 1000` for normalised f32 samples. Streaming detection and
//! explicit calibration both go through [`block_amplitude`], so thresholds
//! and noise floors are always comparable.
//!
//! Typical readings: quiet room 2–10, normal speech 20–100, loud speech
//! 100–500.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::buffering::block::AudioBlock;

/// Divisor mapping mean |i16| onto the 0–1000 reference range.
pub const I16_AMPLITUDE_DIVISOR: f64 = 32.767;

/// Canonical amplitude of a block of i16 samples. Empty input reads 0.
pub fn amplitude(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: u64 = samples.iter().map(|s| s.unsigned_abs() as u64).sum();
    (sum as f64 / samples.len() as f64) / I16_AMPLITUDE_DIVISOR
}

/// Canonical amplitude of an [`AudioBlock`].
pub fn block_amplitude(block: &AudioBlock) -> f64 {
    amplitude(&block.samples)
}

/// Quantise a normalised f32 sample to i16, saturating out-of-range input.
pub fn f32_to_i16(sample: f32) -> i16 {
    let scaled = (sample * i16::MAX as f32).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Lock-free cell publishing the latest amplitude to other threads.
#[derive(Clone, Debug, Default)]
pub struct AmplitudeMeter {
    bits: Arc<AtomicU64>,
}

impl AmplitudeMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, amplitude: f64) {
        self.bits.store(amplitude.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}
