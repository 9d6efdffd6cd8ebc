//! Buffering primitives.
//!
//! - [`create_sample_ring`]: lock-free SPSC `f32` ring between the real-time
//!   audio callback and the capture thread (`ringbuf::HeapRb<f32>`, whose
//!   `push_slice` is wait-free).
//! - [`channel`]: bounded, drop-oldest block channel between the capture and
//!   processing threads.
//! - [`ring::FixedRing`] / [`preroll::PreRollWindow`]: fixed-capacity FIFOs
//!   owned by the processing thread.

pub mod block;
pub mod channel;
pub mod preroll;
pub mod ring;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the audio callback thread.
pub type SampleProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the capture thread.
pub type SampleConsumer = ringbuf::HeapCons<f32>;

/// Ring capacity: 2^18 = 262 144 f32 samples ≈ 5.5 s at 48 kHz.
/// The capture thread drains it every few milliseconds; the headroom only
/// matters when that thread is descheduled.
pub const SAMPLE_RING_CAPACITY: usize = 1 << 18;

/// Create a matched producer/consumer pair backed by a heap-allocated ring.
pub fn create_sample_ring() -> (SampleProducer, SampleConsumer) {
    HeapRb::<f32>::new(SAMPLE_RING_CAPACITY).split()
}
