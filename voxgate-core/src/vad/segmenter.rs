//! Hysteresis state machine turning amplitude samples into utterances.
//!
//! ```text
//!            amp > threshold
//!   Idle ───────────────────────► Active ──┐ amp > threshold × ratio: voiced
//!    ▲                              │  ▲   │ otherwise: silent (block kept)
//!    │  silence ≥ max_silence       │  └───┘
//!    └──── or length ≥ max_recording┘
//! ```
//!
//! The continue threshold is lower than the start threshold, so a sustained
//! utterance does not fragment across brief dips. A segment is seeded with the
//! pre-roll window at the moment of detection; every later block is appended
//! until the segment ends. Segments whose voiced span (detection to the end
//! of the last voiced block) is shorter than `min_speech` are discarded; the
//! silence that closes a segment does not count towards it.
//!
//! Time is stream time (`AudioBlock::offset`), never wall-clock time.

use std::time::Duration;

use tracing::debug;

use crate::buffering::{
    block::{concat_blocks, AudioBlock},
    preroll::PreRollWindow,
};
use crate::config::VadConfig;
use crate::events::{EndReason, SpeechSegment};

/// Segmenter timing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterParams {
    pub continue_ratio: f64,
    pub min_speech: Duration,
    pub max_silence: Duration,
    pub max_recording: Duration,
    pub trailing_silence: Duration,
}

impl From<&VadConfig> for SegmenterParams {
    fn from(cfg: &VadConfig) -> Self {
        Self {
            continue_ratio: cfg.continue_ratio,
            min_speech: cfg.min_speech(),
            max_silence: cfg.max_silence(),
            max_recording: cfg.max_recording(),
            trailing_silence: cfg.trailing_silence(),
        }
    }
}

impl Default for SegmenterParams {
    fn default() -> Self {
        Self::from(&VadConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    Idle,
    Active,
}

/// Outcome of feeding one block to the segmenter.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Idle and the block did not cross the start threshold.
    Idle,
    /// Idle → Active on this block.
    Started { amplitude: f64 },
    /// Active, block above the continue threshold.
    Voiced,
    /// Active, block below the continue threshold but within bounds.
    Silent,
    /// Active → Idle with a deliverable segment.
    Ended(SpeechSegment),
    /// Active → Idle, but the voiced span was shorter than `min_speech`.
    Discarded {
        duration: Duration,
        voiced: Duration,
        reason: EndReason,
    },
}

#[derive(Debug)]
struct ActiveSegment {
    started_at: Duration,
    last_voiced_at: Duration,
    /// Stream time at which the most recent voiced block ends.
    voiced_until: Duration,
    blocks: Vec<AudioBlock>,
    /// `blocks.len()` right after the most recent voiced block.
    voiced_len: usize,
}

/// Idle/Active utterance state machine.
#[derive(Debug)]
pub struct UtteranceSegmenter {
    params: SegmenterParams,
    active: Option<ActiveSegment>,
}

impl UtteranceSegmenter {
    pub fn new(params: SegmenterParams) -> Self {
        Self {
            params,
            active: None,
        }
    }

    pub fn params(&self) -> &SegmenterParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut SegmenterParams {
        &mut self.params
    }

    pub fn state(&self) -> SegmenterState {
        if self.active.is_some() {
            SegmenterState::Active
        } else {
            SegmenterState::Idle
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Drop any in-progress segment without emitting it.
    pub fn reset(&mut self) -> bool {
        self.active.take().is_some()
    }

    /// Feed one block.
    ///
    /// `pre_roll` must already contain `block` as its newest entry when the
    /// caller follows the usual order (pre-roll first, then segmenter); if it
    /// does not, the block is appended to the seed so it is never lost.
    pub fn advance(
        &mut self,
        amplitude: f64,
        threshold: f64,
        block: &AudioBlock,
        pre_roll: &PreRollWindow,
    ) -> Transition {
        let now = block.offset;

        let Some(active) = self.active.as_mut() else {
            if amplitude <= threshold {
                return Transition::Idle;
            }
            let mut blocks = pre_roll.snapshot();
            if blocks.last().map(|b| b.seq) != Some(block.seq) {
                blocks.push(block.clone());
            }
            debug!(
                amplitude = format_args!("{:.1}", amplitude),
                pre_roll_blocks = blocks.len(),
                at_ms = now.as_millis() as u64,
                "speech started"
            );
            let voiced_len = blocks.len();
            self.active = Some(ActiveSegment {
                started_at: now,
                last_voiced_at: now,
                voiced_until: now + block.duration(),
                blocks,
                voiced_len,
            });
            return Transition::Started { amplitude };
        };

        active.blocks.push(block.clone());
        let voiced = amplitude > threshold * self.params.continue_ratio;
        if voiced {
            active.last_voiced_at = now;
            active.voiced_until = now + block.duration();
            active.voiced_len = active.blocks.len();
        }

        let silence = now.saturating_sub(active.last_voiced_at);
        let length = now.saturating_sub(active.started_at);
        let hit_max_length = length >= self.params.max_recording;
        let hit_silence = silence >= self.params.max_silence;

        if !hit_max_length && !hit_silence {
            return if voiced {
                Transition::Voiced
            } else {
                Transition::Silent
            };
        }

        let reason = if hit_max_length {
            EndReason::MaxLength
        } else {
            EndReason::Silence
        };

        let Some(mut finished) = self.active.take() else {
            return Transition::Idle;
        };

        let voiced = finished.voiced_until.saturating_sub(finished.started_at);
        if voiced < self.params.min_speech {
            debug!(
                voiced_ms = voiced.as_millis() as u64,
                duration_ms = length.as_millis() as u64,
                reason = reason.label(),
                "speech too short, discarded"
            );
            return Transition::Discarded {
                duration: length,
                voiced,
                reason,
            };
        }

        if reason == EndReason::Silence {
            trim_trailing_silence(
                &mut finished.blocks,
                finished.voiced_len,
                self.params.trailing_silence,
            );
        }

        let sample_rate = finished
            .blocks
            .first()
            .map_or(block.sample_rate, |b| b.sample_rate);
        let segment = SpeechSegment {
            audio: concat_blocks(&finished.blocks),
            sample_rate,
            started_at: finished.started_at,
            duration: length,
            reason,
        };
        debug!(
            duration_ms = length.as_millis() as u64,
            blocks = finished.blocks.len(),
            reason = reason.label(),
            "speech ended"
        );
        Transition::Ended(segment)
    }
}

/// Keep at most `keep` of silence after the last voiced block.
fn trim_trailing_silence(blocks: &mut Vec<AudioBlock>, voiced_len: usize, keep: Duration) {
    let mut kept = voiced_len;
    let mut acc = Duration::ZERO;
    for block in blocks.iter().skip(voiced_len) {
        if acc >= keep {
            break;
        }
        acc += block.duration();
        kept += 1;
    }
    blocks.truncate(kept);
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;
    const BLOCK: usize = 1600; // 100 ms

    fn block(seq: u64) -> AudioBlock {
        AudioBlock::new(
            seq,
            Duration::from_millis(seq * 100),
            vec![seq as i16; BLOCK],
            RATE,
        )
    }

    struct Harness {
        seg: UtteranceSegmenter,
        pre_roll: PreRollWindow,
        seq: u64,
    }

    impl Harness {
        fn new(params: SegmenterParams) -> Self {
            Self {
                seg: UtteranceSegmenter::new(params),
                pre_roll: PreRollWindow::with_duration(0.5, RATE, BLOCK),
                seq: 0,
            }
        }

        fn feed(&mut self, amplitude: f64) -> Transition {
            let b = block(self.seq);
            self.seq += 1;
            self.pre_roll.push(b.clone());
            self.seg.advance(amplitude, 25.0, &b, &self.pre_roll)
        }
    }

    #[test]
    fn stays_idle_below_start_threshold() {
        let mut h = Harness::new(SegmenterParams::default());
        for _ in 0..20 {
            assert_eq!(h.feed(25.0), Transition::Idle);
        }
        assert_eq!(h.seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn decaying_signal_holds_active_until_silence_timeout() {
        let mut h = Harness::new(SegmenterParams::default());
        assert!(matches!(h.feed(80.0), Transition::Started { .. }));

        // Decays monotonically but stays above 25 × 0.4 = 10.
        for amp in [60.0, 40.0, 30.0, 20.0, 15.0, 11.0] {
            assert_eq!(h.feed(amp), Transition::Voiced);
        }
        // Below the continue threshold: nine silent blocks (0.1 s .. 0.9 s).
        for _ in 0..9 {
            assert_eq!(h.feed(9.0), Transition::Silent);
            assert!(h.seg.is_active());
        }
        // The tenth silent block reaches 1.0 s of silence.
        match h.feed(9.0) {
            Transition::Ended(segment) => assert_eq!(segment.reason, EndReason::Silence),
            other => panic!("expected segment end, got {other:?}"),
        }
        assert!(!h.seg.is_active());
    }

    #[test]
    fn segment_starts_with_pre_roll_contents() {
        let mut h = Harness::new(SegmenterParams::default());
        for _ in 0..8 {
            h.feed(5.0);
        }
        let expected: Vec<i16> = h
            .pre_roll
            .snapshot()
            .iter()
            .skip(1)
            .flat_map(|b| b.samples.clone())
            .chain(block(8).samples)
            .collect();

        assert!(matches!(h.feed(80.0), Transition::Started { .. }));
        for _ in 0..5 {
            h.feed(80.0);
        }
        let segment = loop {
            if let Transition::Ended(segment) = h.feed(5.0) {
                break segment;
            }
        };
        assert_eq!(&segment.audio[..expected.len()], &expected[..]);
        // Seed = blocks 4..=8, the trigger block exactly once.
        assert_eq!(segment.audio[0], 4);
        assert_eq!(segment.audio[4 * BLOCK], 8);
        assert_eq!(segment.audio[5 * BLOCK], 9);
    }

    #[test]
    fn short_spike_is_discarded() {
        let mut h = Harness::new(SegmenterParams {
            max_silence: Duration::from_millis(200),
            ..SegmenterParams::default()
        });
        assert!(matches!(h.feed(90.0), Transition::Started { .. }));
        assert_eq!(h.feed(2.0), Transition::Silent);
        match h.feed(2.0) {
            Transition::Discarded {
                duration,
                voiced,
                reason,
            } => {
                assert_eq!(duration, Duration::from_millis(200));
                assert_eq!(voiced, Duration::from_millis(100));
                assert_eq!(reason, EndReason::Silence);
            }
            other => panic!("expected discard, got {other:?}"),
        }
    }

    #[test]
    fn single_block_spike_opens_then_is_discarded() {
        let mut h = Harness::new(SegmenterParams::default());
        assert!(matches!(h.feed(90.0), Transition::Started { .. }));
        for _ in 0..9 {
            assert_eq!(h.feed(1.0), Transition::Silent);
        }
        // The closing second of silence does not count as speech.
        match h.feed(1.0) {
            Transition::Discarded {
                duration, voiced, ..
            } => {
                assert_eq!(duration, Duration::from_secs(1));
                assert_eq!(voiced, Duration::from_millis(100));
            }
            other => panic!("expected discard, got {other:?}"),
        }
        assert!(!h.seg.is_active());
    }

    #[test]
    fn voiced_span_at_min_speech_is_delivered() {
        let mut h = Harness::new(SegmenterParams::default());
        // Three voiced blocks: 0.3 s of speech.
        assert!(matches!(h.feed(90.0), Transition::Started { .. }));
        h.feed(90.0);
        h.feed(90.0);
        let outcome = loop {
            match h.feed(1.0) {
                Transition::Silent => continue,
                other => break other,
            }
        };
        assert!(matches!(outcome, Transition::Ended(_)), "{outcome:?}");
    }

    #[test]
    fn continuous_speech_is_cut_at_max_recording() {
        let mut h = Harness::new(SegmenterParams::default());
        assert!(matches!(h.feed(80.0), Transition::Started { .. }));
        let mut ended = None;
        for i in 1..200 {
            if let Transition::Ended(segment) = h.feed(80.0) {
                ended = Some((i, segment));
                break;
            }
        }
        let (blocks_after_start, segment) = ended.expect("max length cut");
        assert_eq!(blocks_after_start, 80);
        assert_eq!(segment.reason, EndReason::MaxLength);
        assert_eq!(segment.duration, Duration::from_secs(8));
    }

    #[test]
    fn trailing_silence_is_trimmed_to_configured_tail() {
        let mut h = Harness::new(SegmenterParams::default());
        h.feed(80.0); // seed: just this block (pre-roll held only it)
        for _ in 0..4 {
            h.feed(80.0);
        }
        let segment = loop {
            if let Transition::Ended(segment) = h.feed(1.0) {
                break segment;
            }
        };
        // 5 voiced blocks + 0.2 s tail = 7 blocks.
        assert_eq!(segment.audio.len(), 7 * BLOCK);
    }

    #[test]
    fn inner_silence_is_preserved() {
        let mut h = Harness::new(SegmenterParams::default());
        h.feed(80.0);
        for _ in 0..5 {
            assert_eq!(h.feed(2.0), Transition::Silent);
        }
        assert_eq!(h.feed(80.0), Transition::Voiced);
        let segment = loop {
            if let Transition::Ended(segment) = h.feed(1.0) {
                break segment;
            }
        };
        // 1 + 5 inner silent + 1 voiced + 2 tail blocks.
        assert_eq!(segment.audio.len(), 9 * BLOCK);
    }

    #[test]
    fn reset_discards_active_segment() {
        let mut h = Harness::new(SegmenterParams::default());
        h.feed(80.0);
        assert!(h.seg.reset());
        assert!(!h.seg.reset());
        assert_eq!(h.seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn trim_keeps_nothing_with_zero_tail() {
        let mut blocks: Vec<AudioBlock> = (0..5).map(block).collect();
        trim_trailing_silence(&mut blocks, 2, Duration::ZERO);
        assert_eq!(blocks.len(), 2);
    }
}
