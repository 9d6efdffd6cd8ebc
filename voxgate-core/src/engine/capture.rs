//! Capture loop: the single producer of the block channel.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::pipeline::PipelineDiagnostics;
use crate::{
    audio::{AudioStream, BlockRead},
    buffering::{
        block::{samples_to_duration, AudioBlock},
        channel::{BlockSender, SendOutcome},
    },
};

/// Longest a single `read_block` may wait before the stop flag is rechecked.
const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Back-off after a failed read so a dead device does not spin a core.
const FAULT_BACKOFF: Duration = Duration::from_millis(50);

/// Why [`run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureExit {
    Stopped,
    EndOfStream,
}

pub struct CaptureContext {
    pub stream: Box<dyn AudioStream>,
    pub blocks: BlockSender,
    pub running: Arc<AtomicBool>,
    /// Set on return so the consumer can tell "no data yet" from "no more data".
    pub capture_done: Arc<AtomicBool>,
    pub diagnostics: Arc<PipelineDiagnostics>,
    pub sample_rate: u32,
}

/// Pull blocks until stopped or the source runs dry. The stream is dropped
/// on this thread before returning.
pub fn run(ctx: CaptureContext) -> CaptureExit {
    let CaptureContext {
        mut stream,
        blocks,
        running,
        capture_done,
        diagnostics,
        sample_rate,
    } = ctx;

    info!(sample_rate, "capture started");
    let mut seq = 0u64;
    let mut samples_sent = 0usize;
    let mut exit = CaptureExit::Stopped;

    while running.load(Ordering::Acquire) {
        match stream.read_block(READ_TIMEOUT) {
            Ok(BlockRead::Block(samples)) => {
                if !running.load(Ordering::Acquire) {
                    break;
                }
                let offset = samples_to_duration(samples_sent, sample_rate);
                samples_sent += samples.len();
                let block = AudioBlock::new(seq, offset, samples, sample_rate);
                seq += 1;
                diagnostics.blocks_captured.fetch_add(1, Ordering::Relaxed);

                match blocks.send(block) {
                    SendOutcome::Queued => {}
                    SendOutcome::DroppedOldest(n) => {
                        let total = diagnostics
                            .blocks_dropped
                            .fetch_add(n as u64, Ordering::Relaxed)
                            + n as u64;
                        if total.is_power_of_two() {
                            warn!(dropped_total = total, "consumer lagging, dropped oldest blocks");
                        }
                    }
                    SendOutcome::Disconnected => {
                        debug!("block channel closed");
                        break;
                    }
                }
            }
            Ok(BlockRead::Timeout) => {}
            Ok(BlockRead::EndOfStream) => {
                info!(blocks = seq, "audio source reached end of stream");
                exit = CaptureExit::EndOfStream;
                break;
            }
            Err(e) => {
                diagnostics.stream_faults.fetch_add(1, Ordering::Relaxed);
                warn!("audio read failed, continuing: {e}");
                std::thread::sleep(FAULT_BACKOFF);
            }
        }

        let faults = stream.take_faults();
        if faults > 0 {
            diagnostics
                .stream_faults
                .fetch_add(faults, Ordering::Relaxed);
            warn!(faults, "audio backend reported stream faults");
        }
    }

    drop(stream);
    capture_done.store(true, Ordering::Release);
    info!(?exit, blocks = seq, "capture stopped");
    exit
}
