//! Fixed-ratio sample-rate conversion on top of rubato's `FastFixedIn`.
//!
//! Live capture calls [`RateConverter::process_into`] as device buffers
//! arrive; a finite source additionally calls [`RateConverter::finish_into`]
//! once the input is exhausted. The interpolator's output delay is dropped
//! from the head of the stream and `finish_into` drains the tail, so a
//! complete conversion yields `round(input_len × ratio)` samples that line up
//! with the input in time.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{Result, VoxError};

/// Flush rounds allowed to drain the interpolator after the last input.
const MAX_DRAIN_ROUNDS: usize = 4;

/// Mono f32 converter between two fixed rates. Equal rates copy through.
pub struct RateConverter {
    resampler: Option<FastFixedIn<f32>>,
    ratio: f64,
    chunk_size: usize,
    /// Input not yet handed to rubato (always shorter than `chunk_size`
    /// between calls).
    pending: Vec<f32>,
    /// One-channel scratch output, sized to `output_frames_max`.
    scratch: Vec<Vec<f32>>,
    /// Output frames still to discard for the interpolator delay.
    delay_left: usize,
    consumed: u64,
    emitted: u64,
}

impl RateConverter {
    /// # Errors
    /// `VoxError::AudioDevice` if rubato rejects the ratio or chunk size.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        let ratio = f64::from(to_rate) / f64::from(from_rate.max(1));
        let mut converter = Self {
            resampler: None,
            ratio,
            chunk_size: chunk_size.max(1),
            pending: Vec::new(),
            scratch: Vec::new(),
            delay_left: 0,
            consumed: 0,
            emitted: 0,
        };
        if from_rate == to_rate {
            return Ok(converter);
        }

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Cubic,
            converter.chunk_size,
            1,
        )
        .map_err(|e| VoxError::AudioDevice(format!("resampler init: {e}")))?;
        converter.scratch = vec![vec![0f32; resampler.output_frames_max()]];
        converter.delay_left = resampler.output_delay();
        converter.pending.reserve(converter.chunk_size);
        debug!(
            from_rate,
            to_rate,
            chunk_size = converter.chunk_size,
            delay = converter.delay_left,
            "resampler ready"
        );
        converter.resampler = Some(resampler);
        Ok(converter)
    }

    /// Convert `samples`, appending whatever full chunks produce to `out`.
    /// A remainder shorter than one chunk waits for the next call.
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        if self.resampler.is_none() {
            out.extend_from_slice(samples);
            return;
        }
        self.consumed += samples.len() as u64;
        self.pending.extend_from_slice(samples);

        let Self {
            resampler: Some(resampler),
            chunk_size,
            pending,
            scratch,
            delay_left,
            emitted,
            ..
        } = self
        else {
            return;
        };
        let mut start = 0;
        while pending.len() - start >= *chunk_size {
            let chunk = &pending[start..start + *chunk_size];
            match resampler.process_into_buffer(&[chunk], scratch, None) {
                Ok((_, produced)) => {
                    emit(&scratch[0][..produced], delay_left, emitted, u64::MAX, out)
                }
                Err(e) => error!("resampler chunk failed: {e}"),
            }
            start += *chunk_size;
        }
        pending.drain(..start);
    }

    /// Convert the pending remainder and drain the interpolator. Call once,
    /// after the last [`process_into`](Self::process_into).
    pub fn finish_into(&mut self, out: &mut Vec<f32>) {
        let expected = (self.consumed as f64 * self.ratio).round() as u64;
        let Self {
            resampler: Some(resampler),
            pending,
            scratch,
            delay_left,
            emitted,
            ..
        } = self
        else {
            return;
        };

        if !pending.is_empty() {
            let tail: &[&[f32]] = &[pending.as_slice()];
            match resampler.process_partial_into_buffer(Some(tail), scratch, None) {
                Ok((_, produced)) => {
                    emit(&scratch[0][..produced], delay_left, emitted, expected, out)
                }
                Err(e) => error!("resampler tail failed: {e}"),
            }
            pending.clear();
        }

        let mut rounds = 0;
        while *emitted < expected && rounds < MAX_DRAIN_ROUNDS {
            match resampler.process_partial_into_buffer(None::<&[&[f32]]>, scratch, None) {
                Ok((_, produced)) => {
                    emit(&scratch[0][..produced], delay_left, emitted, expected, out)
                }
                Err(e) => {
                    error!("resampler drain failed: {e}");
                    break;
                }
            }
            rounds += 1;
        }
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        self.process_into(samples, &mut out);
        out
    }
}

/// Append `produced` to `out`, skipping the remaining delay and stopping at
/// `cap` total emitted frames.
fn emit(
    produced: &[f32],
    delay_left: &mut usize,
    emitted: &mut u64,
    cap: u64,
    out: &mut Vec<f32>,
) {
    let skip = (*delay_left).min(produced.len());
    *delay_left -= skip;
    let room = cap.saturating_sub(*emitted);
    let take = ((produced.len() - skip) as u64).min(room) as usize;
    out.extend_from_slice(&produced[skip..skip + take]);
    *emitted += take as u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rates_copy_through() {
        let mut rc = RateConverter::new(16_000, 16_000, 480).expect("passthrough");
        let samples: Vec<f32> = (0..700).map(|i| i as f32 * 0.001).collect();
        let mut out = rc.process(&samples);
        rc.finish_into(&mut out);
        assert_eq!(out, samples);
    }

    #[test]
    fn remainder_waits_for_a_full_chunk() {
        let mut rc = RateConverter::new(44_100, 16_000, 441).expect("resampler");
        let mut out = Vec::new();
        rc.process_into(&[0.0; 300], &mut out);
        assert!(out.is_empty());
        rc.process_into(&[0.0; 300], &mut out);
        assert!(!out.is_empty(), "second push completes a chunk");
    }

    #[test]
    fn finished_conversion_has_exact_length() {
        let mut rc = RateConverter::new(44_100, 16_000, 882).expect("resampler");
        // Not a multiple of the chunk size, so the tail needs flushing.
        let input = vec![0.5f32; 44_100 + 300];
        let mut out = rc.process(&input);
        assert!(out.len() < 16_108);
        rc.finish_into(&mut out);

        assert_eq!(out.len(), 16_109);
        assert!(
            out[200..15_900].iter().all(|s| (s - 0.5).abs() < 1e-3),
            "constant input stays constant"
        );
    }

    #[test]
    fn upsampling_doubles_length() {
        let mut rc = RateConverter::new(8_000, 16_000, 160).expect("resampler");
        let mut out = rc.process(&vec![0.25f32; 1_000]);
        rc.finish_into(&mut out);
        assert_eq!(out.len(), 2_000);
    }
}
