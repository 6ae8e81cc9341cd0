//! Lock-free ring buffer for real-time audio processing
//!
//! One [`Producer`] and one [`Consumer`] share a fixed power-of-two slot
//! array. Each cursor is a monotonically increasing frame count written only
//! by its owner, so the fill level is always `write - read` and the two
//! handles never contend on the same cache line.
//!
//! The producer cannot move the read cursor, but it can post a discard mark:
//! the consumer skips everything written before the mark on its next access.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const NO_MARK: usize = usize::MAX;

struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    mask: usize,
    write_pos: CachePadded<AtomicUsize>,
    read_pos: CachePadded<AtomicUsize>,
    discard_to: CachePadded<AtomicUsize>,
}

// SAFETY: a slot is written only by the producer while it lies outside
// `read..write`, and read only by the consumer while it lies inside. The
// Release store of a cursor publishes the slot accesses that preceded it.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Create a ring holding at least `capacity` items
///
/// Capacity is rounded up to the next power of two; every slot is usable.
pub fn ring_buffer<T: Copy + Default>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let capacity = capacity.max(2).next_power_of_two();
    let slots = (0..capacity).map(|_| UnsafeCell::new(T::default())).collect();
    let shared = Arc::new(Shared {
        slots,
        mask: capacity - 1,
        write_pos: CachePadded::new(AtomicUsize::new(0)),
        read_pos: CachePadded::new(AtomicUsize::new(0)),
        discard_to: CachePadded::new(AtomicUsize::new(NO_MARK)),
    });
    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

/// Writing half. Not `Clone`: there is exactly one.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> Producer<T> {
    /// Copy as many items as fit and return how many were written
    pub fn write(&mut self, items: &[T]) -> usize {
        let write = self.shared.write_pos.load(Ordering::Relaxed);
        let read = self.shared.read_pos.load(Ordering::Acquire);
        let free = self.shared.capacity() - write.wrapping_sub(read);
        let n = items.len().min(free);

        for (i, &item) in items[..n].iter().enumerate() {
            let slot = &self.shared.slots[(write.wrapping_add(i)) & self.shared.mask];
            // SAFETY: the slot is outside read..write so the consumer is not
            // looking at it, and we are the only producer.
            unsafe {
                *slot.get() = item;
            }
        }

        self.shared
            .write_pos
            .store(write.wrapping_add(n), Ordering::Release);
        n
    }

    /// Free slots
    pub fn free_len(&self) -> usize {
        let write = self.shared.write_pos.load(Ordering::Relaxed);
        let read = self.shared.read_pos.load(Ordering::Acquire);
        self.shared.capacity() - write.wrapping_sub(read)
    }

    /// Total items ever written; doubles as the position of the next write
    pub fn written(&self) -> usize {
        self.shared.write_pos.load(Ordering::Relaxed)
    }

    /// Ask the consumer to drop everything written so far
    pub fn discard(&mut self) {
        let write = self.shared.write_pos.load(Ordering::Relaxed);
        self.shared.discard_to.store(write, Ordering::Release);
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

/// Reading half. Not `Clone`: there is exactly one.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy + Default> Consumer<T> {
    /// Apply a pending discard mark and return the read cursor
    #[inline]
    fn settle(&mut self) -> usize {
        let read = self.shared.read_pos.load(Ordering::Relaxed);
        let mark = self.shared.discard_to.swap(NO_MARK, Ordering::Acquire);
        if mark != NO_MARK && mark.wrapping_sub(read) as isize > 0 {
            self.shared.read_pos.store(mark, Ordering::Release);
            return mark;
        }
        read
    }

    /// Fill `out` with queued items, zero the remainder and return how many
    /// items were real
    pub fn read(&mut self, out: &mut [T]) -> usize {
        self.read_until(usize::MAX, out)
    }

    /// Like [`read`](Self::read) but never past the absolute position `limit`
    pub fn read_until(&mut self, limit: usize, out: &mut [T]) -> usize {
        let read = self.settle();
        let write = self.shared.write_pos.load(Ordering::Acquire);
        let end = if limit == usize::MAX || limit.wrapping_sub(write) as isize > 0 {
            write
        } else {
            limit
        };
        let available = (end.wrapping_sub(read) as isize).max(0) as usize;
        let n = out.len().min(available);

        for (i, item) in out[..n].iter_mut().enumerate() {
            let slot = &self.shared.slots[(read.wrapping_add(i)) & self.shared.mask];
            // SAFETY: the slot is inside read..write, published by the
            // producer's Release store and not rewritten until we advance.
            *item = unsafe { *slot.get() };
        }
        out[n..].fill(T::default());

        self.shared
            .read_pos
            .store(read.wrapping_add(n), Ordering::Release);
        n
    }

    /// Drop queued items up to the absolute position `pos`
    pub fn skip_to(&mut self, pos: usize) {
        let read = self.settle();
        let write = self.shared.write_pos.load(Ordering::Acquire);
        let target = if pos.wrapping_sub(write) as isize > 0 {
            write
        } else {
            pos
        };
        if target.wrapping_sub(read) as isize > 0 {
            self.shared.read_pos.store(target, Ordering::Release);
        }
    }

    /// Drop everything queued
    pub fn clear(&mut self) {
        self.settle();
        let write = self.shared.write_pos.load(Ordering::Acquire);
        self.shared.read_pos.store(write, Ordering::Release);
    }

    /// Queued items, ignoring a pending discard mark
    pub fn len(&self) -> usize {
        let read = self.shared.read_pos.load(Ordering::Relaxed);
        let write = self.shared.write_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total items ever consumed
    pub fn position(&self) -> usize {
        self.shared.read_pos.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_basic_read_write() {
        let (mut tx, mut rx) = ring_buffer::<f32>(16);

        let input = vec![1.0, 2.0, 3.0, 4.0];
        let mut output = vec![0.0; 4];

        assert_eq!(tx.write(&input), 4);
        assert_eq!(rx.len(), 4);
        assert_eq!(rx.read(&mut output), 4);
        assert_eq!(output, input);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_wraparound() {
        let (mut tx, mut rx) = ring_buffer::<f32>(8);

        assert_eq!(tx.write(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), 6);

        let mut output1 = vec![0.0; 4];
        assert_eq!(rx.read(&mut output1), 4);
        assert_eq!(output1, vec![1.0, 2.0, 3.0, 4.0]);

        // every slot is usable, so six free slots remain
        assert_eq!(tx.write(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0]), 6);

        let mut output2 = vec![-1.0; 10];
        assert_eq!(rx.read(&mut output2), 8);
        assert_eq!(
            output2,
            vec![5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_capacity_rounding() {
        let (tx, rx) = ring_buffer::<f32>(10);
        assert_eq!(tx.capacity(), 16);
        assert_eq!(rx.capacity(), 16);
        assert_eq!(tx.free_len(), 16);
    }

    #[test]
    fn test_underrun_is_zero_filled() {
        let (mut tx, mut rx) = ring_buffer::<[f32; 2]>(8);
        tx.write(&[[0.5, -0.5]]);
        let mut out = [[9.0, 9.0]; 3];
        assert_eq!(rx.read(&mut out), 1);
        assert_eq!(out, [[0.5, -0.5], [0.0, 0.0], [0.0, 0.0]]);
    }

    #[test]
    fn test_discard_mark_keeps_later_writes() {
        let (mut tx, mut rx) = ring_buffer::<f32>(16);
        tx.write(&[1.0, 2.0, 3.0]);
        tx.discard();
        tx.write(&[4.0, 5.0]);

        // len ignores the mark until the consumer acts on it
        assert_eq!(rx.len(), 5);
        let mut out = [0.0; 4];
        assert_eq!(rx.read(&mut out), 2);
        assert_eq!(out, [4.0, 5.0, 0.0, 0.0]);
    }

    #[test]
    fn test_stale_discard_mark_is_ignored() {
        let (mut tx, mut rx) = ring_buffer::<f32>(16);
        tx.write(&[1.0, 2.0]);
        let mut out = [0.0; 2];
        assert_eq!(rx.read(&mut out), 2);
        tx.discard();
        tx.write(&[3.0]);
        assert_eq!(rx.read(&mut out), 1);
        assert_eq!(out[0], 3.0);
    }

    #[test]
    fn test_read_until_limit() {
        let (mut tx, mut rx) = ring_buffer::<f32>(16);
        tx.write(&[1.0, 2.0, 3.0]);
        let limit = tx.written();
        tx.write(&[4.0, 5.0]);

        let mut out = [0.0; 8];
        assert_eq!(rx.read_until(limit, &mut out), 3);
        assert_eq!(&out[..4], &[1.0, 2.0, 3.0, 0.0]);
        assert_eq!(rx.read_until(limit, &mut out), 0);
        assert_eq!(rx.read(&mut out), 2);
    }

    #[test]
    fn test_skip_and_clear() {
        let (mut tx, mut rx) = ring_buffer::<f32>(16);
        tx.write(&[1.0, 2.0, 3.0, 4.0]);
        rx.skip_to(2);
        assert_eq!(rx.len(), 2);
        rx.skip_to(100);
        assert!(rx.is_empty());
        tx.write(&[5.0]);
        rx.clear();
        assert!(rx.is_empty());
        assert_eq!(rx.position(), 5);
    }

    #[test]
    fn test_threaded_order() {
        let (mut tx, mut rx) = ring_buffer::<u32>(64);
        let total = 20_000u32;
        let writer = std::thread::spawn(move || {
            let mut next = 1u32;
            while next <= total {
                let chunk: Vec<u32> = (next..(next + 17).min(total + 1)).collect();
                let n = tx.write(&chunk);
                next += n as u32;
                if n == 0 {
                    std::thread::yield_now();
                }
            }
        });

        let mut expected = 1u32;
        let mut buf = [0u32; 23];
        while expected <= total {
            let n = rx.read(&mut buf);
            for &v in &buf[..n] {
                assert_eq!(v, expected);
                expected += 1;
            }
            if n == 0 {
                std::thread::yield_now();
            }
        }
        writer.join().unwrap();
    }

    proptest! {
        #[test]
        fn prop_reads_observe_writes_in_order(
            chunks in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 0..20), 0..10),
            read_size in 1usize..40,
        ) {
            let (mut tx, mut rx) = ring_buffer::<f32>(256);
            let mut written = Vec::new();
            for chunk in &chunks {
                let n = tx.write(chunk);
                prop_assert_eq!(n, chunk.len());
                written.extend_from_slice(chunk);
            }

            let mut seen = Vec::new();
            let mut buf = vec![0.0; read_size];
            loop {
                let n = rx.read(&mut buf);
                prop_assert!(buf[n..].iter().all(|&s| s == 0.0));
                seen.extend_from_slice(&buf[..n]);
                if n < read_size {
                    break;
                }
            }
            prop_assert_eq!(seen, written);
        }
    }
}
