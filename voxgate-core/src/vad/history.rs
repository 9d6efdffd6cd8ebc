//! Rolling amplitude history used for live level readout and recalibration.

use crate::buffering::ring::FixedRing;

/// Default number of amplitude samples retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Bounded FIFO of recent amplitude samples; oldest evicted on overflow.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    samples: FixedRing<f64>,
}

impl RollingHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: FixedRing::new(capacity),
        }
    }

    pub fn push(&mut self, amplitude: f64) {
        self.samples.push(amplitude);
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    /// `p`-th percentile (0–100) with linear interpolation between the
    /// closest ranks. `None` when empty.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let values: Vec<f64> = self.samples.iter().copied().collect();
        percentile(&values, p)
    }
}

/// Percentile of `values` with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let p = if p.is_nan() { 50.0 } else { p.clamp(0.0, 100.0) };
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Arithmetic mean, `None` when empty.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
