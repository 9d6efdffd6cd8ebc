//! Bounded block channel with a drop-oldest overflow policy.
//!
//! The producer side keeps its own receiver clone so it can evict the oldest
//! queued block when the channel is full. Freshness wins over completeness:
//! the capture thread never blocks, and blocks are never reordered.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use super::block::AudioBlock;

/// Result of a [`BlockSender::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Block queued without displacing anything.
    Queued,
    /// Block queued after evicting this many older blocks.
    DroppedOldest(usize),
    /// The consumer is gone; the block was discarded.
    Disconnected,
}

/// Producer half.
#[derive(Debug, Clone)]
pub struct BlockSender {
    tx: Sender<AudioBlock>,
    evict: Receiver<AudioBlock>,
}

/// Consumer half.
#[derive(Debug, Clone)]
pub struct BlockReceiver {
    rx: Receiver<AudioBlock>,
}

/// Create a matched sender/receiver pair holding at most `capacity` blocks.
pub fn block_channel(capacity: usize) -> (BlockSender, BlockReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        BlockSender {
            tx,
            evict: rx.clone(),
        },
        BlockReceiver { rx },
    )
}

impl BlockSender {
    /// Queue `block`, evicting the oldest queued blocks if the channel is full.
    pub fn send(&self, block: AudioBlock) -> SendOutcome {
        let mut pending = block;
        let mut dropped = 0usize;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => {
                    return if dropped == 0 {
                        SendOutcome::Queued
                    } else {
                        SendOutcome::DroppedOldest(dropped)
                    };
                }
                Err(TrySendError::Full(back)) => {
                    // The consumer may have drained the slot in between; only
                    // count an eviction that actually happened.
                    if self.evict.try_recv().is_ok() {
                        dropped += 1;
                    }
                    pending = back;
                }
                Err(TrySendError::Disconnected(_)) => return SendOutcome::Disconnected,
            }
        }
    }
}

impl BlockReceiver {
    /// Wait up to `timeout` for the next block. `None` on timeout or
    /// disconnect.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<AudioBlock> {
        match self.rx.recv_timeout(timeout) {
            Ok(block) => Some(block),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Discard every queued block, returning how many were dropped.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(seq: u64) -> AudioBlock {
        AudioBlock::new(seq, Duration::from_millis(seq * 64), vec![0; 4], 16_000)
    }

    #[test]
    fn queues_in_order_below_capacity() {
        let (tx, rx) = block_channel(4);
        for seq in 0..3 {
            assert_eq!(tx.send(block(seq)), SendOutcome::Queued);
        }
        let seqs: Vec<u64> = std::iter::from_fn(|| rx.recv_timeout(Duration::from_millis(1)))
            .map(|b| b.seq)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn full_channel_drops_oldest_and_keeps_newest() {
        let (tx, rx) = block_channel(3);
        for seq in 0..3 {
            tx.send(block(seq));
        }
        assert_eq!(tx.send(block(3)), SendOutcome::DroppedOldest(1));
        assert_eq!(tx.send(block(4)), SendOutcome::DroppedOldest(1));
        assert!(rx.len() <= 3);

        let seqs: Vec<u64> = std::iter::from_fn(|| rx.recv_timeout(Duration::from_millis(1)))
            .map(|b| b.seq)
            .collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn clear_discards_everything() {
        let (tx, rx) = block_channel(8);
        for seq in 0..5 {
            tx.send(block(seq));
        }
        assert_eq!(rx.clear(), 5);
        assert!(rx.is_empty());
    }

    #[test]
    fn recv_times_out_when_empty() {
        let (_tx, rx) = block_channel(2);
        assert!(rx.recv_timeout(Duration::from_millis(5)).is_none());
    }
}
