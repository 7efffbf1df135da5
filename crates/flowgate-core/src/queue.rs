//! `WorkQueue`: bounded multi-producer multi-consumer ring.
//!
//! I/O threads push pending compute tasks; worker threads (and the reaper)
//! pop them. The ring never grows: `try_push` fails once `capacity` tasks are
//! pending, which is what admission control builds on.
//!
//! # Positions and ids
//!
//! `head` and `tail` pack a slot index in their low bits and a lap counter
//! above them. A lap is `one_lap = (capacity + 1).next_power_of_two()`, so
//! the index bits can never carry into the lap bits. A successful push
//! returns the sequence id `lap * capacity + index`, which is strictly
//! increasing per queue, in push order.
//!
//! # Slot stamps
//!
//! Each slot carries a stamp telling both sides whose turn it is:
//!
//! ```text
//! stamp == pos            slot is free for the producer at pos
//! stamp == pos + 1        slot holds the value pushed at pos
//! stamp == pos + one_lap  slot was consumed, free for the next lap
//! ```
//!
//! Since `one_lap > capacity >= 1`, a full stamp (`pos + 1`) never equals
//! any producer position of the following lap, including for a single
//! slot. Producers CAS `tail` to claim a position, write the value, then
//! publish it by storing the stamp with Release. Consumers CAS `head`
//! after seeing the published stamp with Acquire. No operation allocates.
//!
//! # Expiry
//!
//! Every slot also stores a `reap_at` nanosecond timestamp next to the
//! value. `try_pop_expired` only claims the head slot when that timestamp
//! has passed, so the reaper can drop stale tasks without ever touching
//! fresh ones.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ops::Deref;
use std::sync::atomic::{self, AtomicU64, Ordering};

/// Cache-line aligned wrapper so head and tail do not share a line
#[repr(C, align(64))]
struct CachePadded<T>(T);

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

struct Slot<T> {
    stamp: AtomicU64,
    reap_at: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded FIFO of pending tasks
pub struct WorkQueue<T> {
    /// Next position to pop (consumers CAS)
    head: CachePadded<AtomicU64>,
    /// Next position to push (producers CAS)
    tail: CachePadded<AtomicU64>,
    slots: Box<[Slot<T>]>,
    capacity: u64,
    one_lap: u64,
}

// Safety: a slot's value is only accessed by the thread that won the CAS for
// its position, and hand-over between threads goes through the stamp.
unsafe impl<T: Send> Send for WorkQueue<T> {}
unsafe impl<T: Send> Sync for WorkQueue<T> {}

impl<T> WorkQueue<T> {
    /// Create a queue holding at most `capacity` items
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0. Settings validation rejects that earlier.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "WorkQueue capacity must be non-zero");
        let slots = (0..capacity)
            .map(|i| Slot {
                stamp: AtomicU64::new(i as u64),
                reap_at: AtomicU64::new(u64::MAX),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            head: CachePadded(AtomicU64::new(0)),
            tail: CachePadded(AtomicU64::new(0)),
            slots,
            capacity: capacity as u64,
            one_lap: (capacity as u64 + 1).next_power_of_two(),
        }
    }

    #[inline]
    fn index(&self, pos: u64) -> usize {
        (pos & (self.one_lap - 1)) as usize
    }

    /// Position following `pos`, wrapping into the next lap at the end
    #[inline]
    fn next_pos(&self, pos: u64) -> u64 {
        if (self.index(pos) as u64) + 1 < self.capacity {
            pos + 1
        } else {
            (pos & !(self.one_lap - 1)).wrapping_add(self.one_lap)
        }
    }

    /// Sequence id of a position
    #[inline]
    fn seq(&self, pos: u64) -> u64 {
        (pos / self.one_lap) * self.capacity + self.index(pos) as u64
    }

    /// Push an item that never expires
    #[inline]
    pub fn try_push(&self, item: T) -> Result<u64, T> {
        self.try_push_with_deadline(item, u64::MAX)
    }

    /// Push an item that `try_pop_expired` may reap once `reap_at_ns` passes
    ///
    /// Returns the item's sequence id, or hands the item back when the
    /// queue is full. Never blocks, never grows.
    pub fn try_push_with_deadline(&self, item: T, reap_at_ns: u64) -> Result<u64, T> {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[self.index(tail)];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == tail {
                match self.tail.compare_exchange_weak(
                    tail,
                    self.next_pos(tail),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe {
                            (*slot.value.get()).write(item);
                        }
                        slot.reap_at.store(reap_at_ns, Ordering::Relaxed);
                        slot.stamp.store(tail + 1, Ordering::Release);
                        return Ok(self.seq(tail));
                    }
                    Err(current) => {
                        tail = current;
                        std::hint::spin_loop();
                    }
                }
            } else if stamp.wrapping_add(self.one_lap) == tail + 1 {
                // Slot still holds the value from one lap ago
                atomic::fence(Ordering::SeqCst);
                let head = self.head.load(Ordering::Relaxed);
                if head.wrapping_add(self.one_lap) == tail {
                    return Err(item);
                }
                std::hint::spin_loop();
                tail = self.tail.load(Ordering::Relaxed);
            } else {
                // Another producer claimed this position already
                std::hint::spin_loop();
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Pop the oldest item with its sequence id
    pub fn try_pop(&self) -> Option<(u64, T)> {
        self.pop_where(|_| true)
    }

    /// Pop the oldest item only if its reap timestamp is at or before `now_ns`
    ///
    /// Items behind a live head are never inspected, so this is cheap to
    /// call on every reaper tick.
    pub fn try_pop_expired(&self, now_ns: u64) -> Option<(u64, T)> {
        self.pop_where(|reap_at| reap_at <= now_ns)
    }

    fn pop_where<F>(&self, ready: F) -> Option<(u64, T)>
    where
        F: Fn(u64) -> bool,
    {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[self.index(head)];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == head + 1 {
                // A stale read here is harmless: if the slot was recycled,
                // head has moved and the CAS below fails.
                if !ready(slot.reap_at.load(Ordering::Relaxed)) {
                    return None;
                }
                match self.head.compare_exchange_weak(
                    head,
                    self.next_pos(head),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let item = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.stamp
                            .store(head.wrapping_add(self.one_lap), Ordering::Release);
                        return Some((self.seq(head), item));
                    }
                    Err(current) => {
                        head = current;
                        std::hint::spin_loop();
                    }
                }
            } else if stamp == head {
                // Empty, or the producer for `head` has not published yet
                return None;
            } else {
                std::hint::spin_loop();
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Approximate number of pending items
    pub fn len(&self) -> usize {
        loop {
            let tail = self.tail.load(Ordering::SeqCst);
            let head = self.head.load(Ordering::SeqCst);
            if self.tail.load(Ordering::SeqCst) == tail {
                return self.seq(tail).saturating_sub(self.seq(head)).min(self.capacity) as usize;
            }
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }
}

impl<T> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capacity_and_ids() {
        let q = WorkQueue::new(4);
        let ids: Vec<u64> = (0..4).map(|i| q.try_push(i).unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        // N+1th push fails and hands the item back
        assert_eq!(q.try_push(99), Err(99));
        assert_eq!(q.len(), 4);

        // One pop frees exactly one slot
        assert_eq!(q.try_pop(), Some((ids[0], 0)));
        let id = q.try_push(5).unwrap();
        assert!(id > ids[3]);
        assert_eq!(q.try_push(6), Err(6));
    }

    #[test]
    fn test_single_slot_queue() {
        let q = WorkQueue::new(1);
        assert_eq!(q.try_push("a"), Ok(0));
        // The live task is never overwritten
        assert_eq!(q.try_push("b"), Err("b"));
        assert_eq!(q.len(), 1);

        assert_eq!(q.try_pop(), Some((0, "a")));
        assert!(q.try_pop().is_none());
        assert!(q.is_empty());

        for round in 1..5u64 {
            assert_eq!(q.try_push("c"), Ok(round));
            assert_eq!(q.try_push("d"), Err("d"));
            assert_eq!(q.try_pop(), Some((round, "c")));
        }
    }

    #[test]
    fn test_single_slot_pop_expired() {
        let q = WorkQueue::new(1);
        q.try_push_with_deadline(1, 100).unwrap();
        assert!(q.try_pop_expired(99).is_none());
        assert_eq!(q.try_pop_expired(100), Some((0, 1)));
        q.try_push_with_deadline(2, 100).unwrap();
        assert_eq!(q.try_push_with_deadline(3, 100), Err(3));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_fifo_across_laps() {
        let q = WorkQueue::new(3);
        let mut expected = 0;
        for round in 0..10 {
            q.try_push(round * 2).unwrap();
            q.try_push(round * 2 + 1).unwrap();
            for _ in 0..2 {
                let (id, v) = q.try_pop().unwrap();
                assert_eq!(id, expected);
                assert_eq!(v, expected);
                expected += 1;
            }
        }
        assert!(q.try_pop().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn test_pop_expired_only_takes_stale_head() {
        let q = WorkQueue::new(4);
        q.try_push_with_deadline("old", 100).unwrap();
        q.try_push_with_deadline("fresh", 10_000).unwrap();

        assert!(q.try_pop_expired(50).is_none());
        assert_eq!(q.try_pop_expired(150).map(|(_, v)| v), Some("old"));
        // Fresh head blocks further reaping
        assert!(q.try_pop_expired(150).is_none());
        assert_eq!(q.try_pop().map(|(_, v)| v), Some("fresh"));
    }

    #[test]
    fn test_drop_releases_items() {
        let item = Arc::new(());
        {
            let q = WorkQueue::new(2);
            q.try_push(Arc::clone(&item)).unwrap();
            q.try_push(Arc::clone(&item)).unwrap();
            assert_eq!(Arc::strong_count(&item), 3);
        }
        assert_eq!(Arc::strong_count(&item), 1);
    }

    #[test]
    fn test_concurrent_producers_consumers() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 2_000;

        let q = Arc::new(WorkQueue::new(64));
        let mut handles = Vec::new();

        for p in 0..PRODUCERS {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut v = p * PER_PRODUCER + i;
                    loop {
                        match q.try_push(v) {
                            Ok(_) => break,
                            Err(back) => {
                                v = back;
                                thread::yield_now();
                            }
                        }
                    }
                }
            }));
        }

        let consumed = Arc::new(AtomicUsize::new(0));
        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let q = Arc::clone(&q);
                let consumed = Arc::clone(&consumed);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    let mut last_id = None;
                    while consumed.load(Ordering::Acquire) < PRODUCERS * PER_PRODUCER {
                        if let Some((id, v)) = q.try_pop() {
                            // Ids observed by one consumer are increasing
                            assert!(last_id.map_or(true, |l| id > l));
                            last_id = Some(id);
                            seen.push(v);
                            consumed.fetch_add(1, Ordering::AcqRel);
                        } else {
                            thread::yield_now();
                        }
                    }
                    seen
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        let mut all = HashSet::new();
        for c in consumers {
            for v in c.join().unwrap() {
                assert!(all.insert(v), "duplicate {v}");
            }
        }
        assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
        assert!(q.is_empty());
    }
}
