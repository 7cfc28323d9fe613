//! Single-producer/single-consumer packet ring
//!
//! Transport frames travel from the blocking reader thread to the UI-driven
//! decoder through a fixed 128-slot ring. The producer owns the tail cursor
//! and the overflow counter, the consumer owns the head cursor; publication
//! uses release/acquire ordering so a consumer that observes an advanced
//! tail also observes the slot contents written before it.
//!
//! The ring drops the newest frame when full ("drop-newest"): during live
//! viewing a contiguous recent history matters more than completeness, and
//! the trace stream is lossy by nature anyway. Dropped frames are counted
//! so the UI can show an overflow indicator.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Maximum payload of a single transport frame (USB bulk packet size)
pub const FRAME_CAPACITY: usize = 64;

/// Number of ring slots; one slot stays reserved to distinguish full from empty
pub const RING_CAPACITY: usize = 128;

/// One transport frame, stamped on arrival
#[derive(Debug, Clone, Copy)]
pub struct PacketFrame {
    /// Raw frame bytes; only the first `len` are valid
    pub bytes: [u8; FRAME_CAPACITY],
    /// Number of valid bytes
    pub len: u8,
    /// Arrival time in seconds (monotonic within one reader lifetime)
    pub timestamp: f64,
}

impl PacketFrame {
    const EMPTY: PacketFrame = PacketFrame {
        bytes: [0; FRAME_CAPACITY],
        len: 0,
        timestamp: 0.0,
    };

    /// The valid portion of the frame
    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

struct RingShared {
    slots: [UnsafeCell<PacketFrame>; RING_CAPACITY],
    head: AtomicUsize,
    tail: AtomicUsize,
    overflow: AtomicU32,
}

// The producer writes only slots in [tail, head), the consumer reads only
// slots in [head, tail), and cursor publication is release/acquire, so the
// two sides never access a slot concurrently.
unsafe impl Sync for RingShared {}
unsafe impl Send for RingShared {}

/// Producer half of the packet ring, held by the reader thread
pub struct FrameProducer {
    shared: Arc<RingShared>,
}

/// Consumer half of the packet ring, held by the decoder
pub struct FrameConsumer {
    shared: Arc<RingShared>,
}

/// Create a connected producer/consumer pair over a fresh ring
pub fn frame_ring() -> (FrameProducer, FrameConsumer) {
    let shared = Arc::new(RingShared {
        slots: std::array::from_fn(|_| UnsafeCell::new(PacketFrame::EMPTY)),
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        overflow: AtomicU32::new(0),
    });
    (
        FrameProducer {
            shared: Arc::clone(&shared),
        },
        FrameConsumer { shared },
    )
}

impl FrameProducer {
    /// Enqueue one frame with its arrival timestamp.
    ///
    /// Returns `false` (and counts an overflow) when the ring is full; the
    /// frame is dropped in that case. `data` must fit in
    /// [`FRAME_CAPACITY`] bytes.
    pub fn push(&mut self, data: &[u8], timestamp: f64) -> bool {
        assert!(data.len() <= FRAME_CAPACITY);
        let tail = self.shared.tail.load(Ordering::Relaxed);
        let next = (tail + 1) % RING_CAPACITY;
        if next == self.shared.head.load(Ordering::Acquire) {
            self.shared.overflow.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        // Sole writer of this slot until tail is published below.
        unsafe {
            let slot = &mut *self.shared.slots[tail].get();
            slot.bytes[..data.len()].copy_from_slice(data);
            slot.len = data.len() as u8;
            slot.timestamp = timestamp;
        }
        self.shared.tail.store(next, Ordering::Release);
        true
    }
}

impl FrameConsumer {
    /// Dequeue the oldest frame, if any
    pub fn pop(&mut self) -> Option<PacketFrame> {
        let head = self.shared.head.load(Ordering::Relaxed);
        if head == self.shared.tail.load(Ordering::Acquire) {
            return None;
        }
        // The producer cannot touch this slot until head advances.
        let frame = unsafe { *self.shared.slots[head].get() };
        self.shared
            .head
            .store((head + 1) % RING_CAPACITY, Ordering::Release);
        Some(frame)
    }

    /// Whether the ring currently holds no frames
    pub fn is_empty(&self) -> bool {
        self.shared.head.load(Ordering::Relaxed) == self.shared.tail.load(Ordering::Acquire)
    }

    /// Number of frames currently queued
    pub fn len(&self) -> usize {
        let head = self.shared.head.load(Ordering::Relaxed);
        let tail = self.shared.tail.load(Ordering::Acquire);
        (tail + RING_CAPACITY - head) % RING_CAPACITY
    }

    /// Number of frames dropped because the ring was full.
    ///
    /// With `reset` the counter restarts at zero, so a paused viewer does
    /// not accrue misleading overflow counts.
    pub fn overflow_errors(&self, reset: bool) -> u32 {
        if reset {
            self.shared.overflow.swap(0, Ordering::Relaxed)
        } else {
            self.shared.overflow.load(Ordering::Relaxed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(byte: u8) -> [u8; 4] {
        [byte, byte, byte, byte]
    }

    #[test]
    fn test_fifo_order() {
        let (mut producer, mut consumer) = frame_ring();
        for i in 0..100u8 {
            assert!(producer.push(&frame_of(i), i as f64));
        }
        assert_eq!(consumer.len(), 100);
        for i in 0..100u8 {
            let frame = consumer.pop().expect("frame present");
            assert_eq!(frame.data(), &frame_of(i));
            assert_eq!(frame.timestamp, i as f64);
        }
        assert!(consumer.pop().is_none());
    }

    #[test]
    fn test_overflow_drops_newest() {
        let (mut producer, mut consumer) = frame_ring();
        let mut accepted = 0;
        for i in 0..200usize {
            if producer.push(&[(i & 0xff) as u8], 0.0) {
                accepted += 1;
            }
        }
        // one slot stays reserved
        assert_eq!(accepted, RING_CAPACITY - 1);
        assert_eq!(consumer.overflow_errors(false), 73);

        // the oldest frames survived, the newest were dropped
        assert_eq!(consumer.pop().unwrap().data(), &[0]);
        let mut last = 0;
        while let Some(frame) = consumer.pop() {
            last = frame.data()[0];
        }
        assert_eq!(last as usize, RING_CAPACITY - 2);
    }

    #[test]
    fn test_overflow_reset() {
        let (mut producer, consumer) = frame_ring();
        for _ in 0..RING_CAPACITY + 5 {
            producer.push(&[0], 0.0);
        }
        assert_eq!(consumer.overflow_errors(true), 6);
        assert_eq!(consumer.overflow_errors(false), 0);
    }

    #[test]
    fn test_cross_thread_transfer() {
        let (mut producer, mut consumer) = frame_ring();
        let handle = std::thread::spawn(move || {
            for i in 0..1000u32 {
                let bytes = i.to_le_bytes();
                while !producer.push(&bytes, 0.0) {
                    std::thread::yield_now();
                }
            }
        });
        let mut expected = 0u32;
        while expected < 1000 {
            if let Some(frame) = consumer.pop() {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(frame.data());
                assert_eq!(u32::from_le_bytes(bytes), expected);
                expected += 1;
            }
        }
        handle.join().unwrap();
    }
}
