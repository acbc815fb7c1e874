//! Single-producer, multi-consumer broadcast ring buffer.
//!
//! One [`Writer`] publishes fixed-size records into a bounded slot array;
//! any number of [`Reader`]s observe the stream independently, each at its
//! own pace. The writer is wait-free and never inspects reader state: a
//! reader that falls more than one ring revolution behind is lapped and
//! silently skips ahead to the oldest record still present.
//!
//! # Protocol
//!
//! Each slot carries a 32-bit sequence number, initially `0`. The slot at
//! ring index `i` only ever holds the sequence values
//! `i + 1, i + 1 + N, i + 1 + 2N, …` (one per writer revolution). A write
//! claims the next sequence, fills the payload in place, then
//! release-stores the sequence into the slot. A reader acquire-loads the
//! slot's sequence and compares it against the sequence it expects next:
//!
//! ```text
//! (observed - next_idx) as i32  < 0   not yet produced -> None
//!                               = 0   the expected record
//!                               > 0   lapped; skip ahead to observed
//! ```
//!
//! The signed comparison keeps the test correct across the wrap that
//! occurs every 2³² writes.
//!
//! # Memory ordering
//!
//! The payload write is ordinary memory; publication is the release-store
//! on `seq`. An acquire-load that observes the new sequence therefore
//! happens-after the entire payload write, so the subsequent copy-out is
//! well defined. A reader that observes an old sequence takes no
//! dependency on the new payload. Because per-slot sequences strictly
//! increase, no retry loop is needed to detect "no data": the only retry
//! is the overwrite check after the copy (see [`Reader::read`]).
//!
//! # False sharing
//!
//! Every slot and the writer cursor are wrapped in
//! [`CachePadded`](crossbeam_utils::CachePadded), so no two slot sequence
//! words share a cache line and reader acquire-loads never contend with
//! the cursor's line.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// One ring cell: a sequence word plus payload storage.
#[repr(C)]
struct Slot<T> {
    seq: AtomicU32,
    payload: UnsafeCell<T>,
}

/// Bounded broadcast ring of `N` slots (`N` a power of two).
///
/// The ring owns the slot storage and the writer cursor. It is shared via
/// [`Arc`]: [`SpmcRing::writer`] hands out the single producing handle,
/// [`SpmcRing::reader`] any number of observing handles.
///
/// `T` must be `Copy`: records are duplicated out of slots with plain
/// memory copies, and an overwrite must never run drop glue under a
/// concurrent reader.
pub struct SpmcRing<T, const N: usize> {
    slots: Box<[CachePadded<Slot<T>>]>,
    /// Writer cursor, on its own cache line, disjoint from every slot.
    ///
    /// Only the producer stores to it (Relaxed; the single-producer
    /// contract makes the increment uncontended). The reader factory
    /// acquire-loads it once per handle; record publication rides the
    /// per-slot `seq` release-store, never this cursor.
    write_idx: CachePadded<AtomicU32>,
    writer_taken: AtomicBool,
}

// The UnsafeCell payloads are raced deliberately: the single producer
// mutates them, readers copy them out and validate `seq` afterwards.
unsafe impl<T: Copy + Send, const N: usize> Send for SpmcRing<T, N> {}
unsafe impl<T: Copy + Send, const N: usize> Sync for SpmcRing<T, N> {}

impl<T: Copy + Default, const N: usize> SpmcRing<T, N> {
    const MASK: u32 = (N - 1) as u32;

    /// Allocates a ring with every slot sequence at `0` and a
    /// default-initialised payload.
    ///
    /// The capacity check is a const assertion: a non-power-of-two `N`
    /// fails at compile time, not at run time.
    pub fn new() -> Arc<Self> {
        const {
            assert!(
                N.is_power_of_two() && N <= 1 << 31,
                "ring capacity must be a power of two that fits the 32-bit sequence space",
            )
        };
        let mut slots = Vec::with_capacity(N);
        slots.resize_with(N, || {
            CachePadded::new(Slot {
                seq: AtomicU32::new(0),
                payload: UnsafeCell::new(T::default()),
            })
        });
        Arc::new(Self {
            slots: slots.into_boxed_slice(),
            write_idx: CachePadded::new(AtomicU32::new(0)),
            writer_taken: AtomicBool::new(false),
        })
    }

    /// Hands out the producing handle.
    ///
    /// A ring supports exactly one producer. [`Writer`] is move-only and
    /// non-clonable; obtaining a second handle is a contract violation,
    /// caught in debug builds.
    pub fn writer(self: &Arc<Self>) -> Writer<T, N> {
        debug_assert!(
            !self.writer_taken.swap(true, Ordering::Relaxed),
            "an SpmcRing supports at most one writer handle",
        );
        Writer {
            ring: Arc::clone(self),
        }
    }

    /// Creates a reader positioned on the next future write.
    ///
    /// The handle starts at `write_idx + 1`, so records already in the
    /// ring are skipped: a reader never observes history published
    /// strictly before its creation. Creation is constant-time and safe
    /// to race with concurrent writes.
    pub fn reader(self: &Arc<Self>) -> Reader<T, N> {
        Reader {
            next_idx: self.write_idx.load(Ordering::Acquire).wrapping_add(1),
            lagged: 0,
            ring: Arc::clone(self),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline(always)]
    fn slot(&self, seq: u32) -> &Slot<T> {
        &self.slots[(seq & Self::MASK) as usize]
    }

    #[inline(always)]
    fn write_with(&self, fill: impl FnOnce(&mut T)) -> u32 {
        let seq = self.write_idx.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let slot = self.slot(seq);
        // SAFETY: the single-producer contract gives this thread exclusive
        // mutable access to the payload. A concurrent reader may be
        // copying the previous revolution out of this slot; it re-checks
        // `seq` after the copy and discards the torn value.
        unsafe { fill(&mut *slot.payload.get()) };
        slot.seq.store(seq, Ordering::Release);
        seq
    }

    /// Test-only cursor preset, used to exercise the 2³² sequence wrap
    /// without performing four billion writes. Slots keep their stale
    /// sequences, so callers must push one full revolution of records
    /// before attaching readers.
    #[cfg(test)]
    pub(crate) fn set_write_idx(&self, idx: u32) {
        self.write_idx.store(idx, Ordering::Release);
    }
}

/// The ring's producing handle.
///
/// Move-only and non-clonable: holding a `Writer` is holding the ring's
/// single write right. Writes are wait-free and never look at reader
/// state; the handle is `Send` but must not be driven from more than one
/// thread at a time.
pub struct Writer<T, const N: usize> {
    ring: Arc<SpmcRing<T, N>>,
}

impl<T: Copy + Default, const N: usize> Writer<T, N> {
    /// Publishes one record by filling the claimed slot in place.
    ///
    /// `fill` is invoked exactly once, on the slot payload. Whatever the
    /// previous revolution left there may still be visible to `fill`;
    /// overwrite every field that matters. Returns the record's sequence
    /// number (the first write of a ring returns `1`).
    #[inline(always)]
    pub fn write(&self, fill: impl FnOnce(&mut T)) -> u32 {
        self.ring.write_with(fill)
    }

    /// Publishes one record by value.
    #[inline(always)]
    pub fn send(&self, value: T) -> u32 {
        self.write(|payload| *payload = value)
    }
}

/// An independent observing cursor over a ring.
///
/// Readers carry no link to each other and the ring does not track them:
/// creating or dropping a handle is invisible to the writer and to every
/// other reader. Cloning a reader clones its position; the clones then
/// advance independently.
pub struct Reader<T, const N: usize> {
    ring: Arc<SpmcRing<T, N>>,
    /// Sequence number this reader expects to observe next.
    next_idx: u32,
    /// Total records skipped over by lapping, since creation.
    lagged: u64,
}

impl<T: Copy + Default, const N: usize> Reader<T, N> {
    /// Returns the next available record, or `None` when the reader has
    /// seen everything published so far.
    ///
    /// Lock-free; a `None` costs one acquire-load. If the writer lapped
    /// this reader, the cursor jumps to the newest published record and
    /// the intervening gap is added to [`lagged`](Self::lagged); slow
    /// readers lose records, by contract.
    ///
    /// The record is copied out of the slot and the slot sequence is
    /// re-checked afterwards; a copy torn by a concurrent overwrite is
    /// discarded and the scan restarts on the same position, which by
    /// then holds a newer sequence.
    #[inline]
    pub fn read(&mut self) -> Option<T> {
        loop {
            let slot = self.ring.slot(self.next_idx);
            let observed = slot.seq.load(Ordering::Acquire);
            if (observed.wrapping_sub(self.next_idx) as i32) < 0 {
                return None;
            }
            // SAFETY: `T: Copy`, and the value is only kept if the slot
            // sequence is unchanged after the copy, i.e. the producer did
            // not reclaim the slot while we were reading it.
            let value = unsafe { *slot.payload.get() };
            if slot.seq.load(Ordering::Acquire) != observed {
                continue;
            }
            self.lagged += u64::from(observed.wrapping_sub(self.next_idx));
            self.next_idx = observed.wrapping_add(1);
            return Some(value);
        }
    }

    /// Drains everything currently available and returns the most recent
    /// record, or `None` if nothing new was published.
    ///
    /// For coalescing consumers that only care about current state.
    pub fn read_last(&mut self) -> Option<T> {
        let mut last = None;
        while let Some(value) = self.read() {
            last = Some(value);
        }
        last
    }

    /// Total records this reader skipped because the writer lapped it.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }
}

impl<T, const N: usize> Clone for Reader<T, N> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
            next_idx: self.next_idx,
            lagged: self.lagged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn read_before_any_write_returns_none() {
        let ring = SpmcRing::<u64, 8>::new();
        let mut rx = ring.reader();
        assert_eq!(rx.read(), None);
        assert_eq!(rx.read_last(), None);
    }

    #[test]
    fn first_write_is_sequence_one() {
        let ring = SpmcRing::<u64, 8>::new();
        assert_eq!(ring.capacity(), 8);
        let tx = ring.writer();
        let mut rx = ring.reader();

        assert_eq!(tx.send(42), 1);
        assert_eq!(rx.read(), Some(42));
        assert_eq!(rx.read(), None);
        assert_eq!(rx.lagged(), 0);
    }

    #[test]
    fn in_order_delivery_without_lapping() {
        let ring = SpmcRing::<u64, 16>::new();
        let tx = ring.writer();
        let mut rx = ring.reader();

        for i in 1..=10u64 {
            tx.send(i);
        }
        let got: Vec<u64> = std::iter::from_fn(|| rx.read()).collect();
        assert_eq!(got, (1..=10).collect::<Vec<_>>());
        assert_eq!(rx.lagged(), 0);
    }

    #[test]
    fn write_via_closure_fills_in_place() {
        let ring = SpmcRing::<[u64; 2], 4>::new();
        let tx = ring.writer();
        let mut rx = ring.reader();

        let seq = tx.write(|payload| {
            payload[0] = 7;
            payload[1] = 9;
        });
        assert_eq!(seq, 1);
        assert_eq!(rx.read(), Some([7, 9]));
    }

    #[test]
    fn reader_skips_history_present_at_creation() {
        let ring = SpmcRing::<u64, 8>::new();
        let tx = ring.writer();

        tx.send(1);
        tx.send(2);
        tx.send(3);

        let mut rx = ring.reader();
        assert_eq!(rx.read(), None);

        tx.send(4);
        assert_eq!(rx.read(), Some(4));
        assert_eq!(rx.read(), None);
    }

    #[test]
    fn lapped_reader_skips_ahead_and_counts_the_gap() {
        let ring = SpmcRing::<u64, 4>::new();
        let tx = ring.writer();
        let mut rx = ring.reader();

        // Ten writes over a four-slot ring: sequences 1..=6 are gone by
        // the time the reader looks at slot 1, which now holds 9.
        for i in 1..=10u64 {
            tx.send(i);
        }
        assert_eq!(rx.read(), Some(9));
        assert_eq!(rx.lagged(), 8);
        assert_eq!(rx.read(), Some(10));
        assert_eq!(rx.read(), None);
        assert_eq!(rx.lagged(), 8);
    }

    #[test]
    fn capacity_one_ring_keeps_only_the_latest() {
        let ring = SpmcRing::<u64, 1>::new();
        let tx = ring.writer();
        let mut rx = ring.reader();

        for i in 1..=5u64 {
            tx.send(i);
        }
        assert_eq!(rx.read(), Some(5));
        assert_eq!(rx.lagged(), 4);
        assert_eq!(rx.read(), None);
    }

    #[test]
    fn read_last_coalesces_to_newest() {
        let ring = SpmcRing::<u64, 8>::new();
        let tx = ring.writer();
        let mut rx = ring.reader();

        tx.send(1);
        tx.send(2);
        tx.send(3);
        assert_eq!(rx.read_last(), Some(3));
        assert_eq!(rx.read(), None);

        tx.send(4);
        assert_eq!(rx.read_last(), Some(4));
    }

    #[test]
    fn readers_are_independent() {
        let ring = SpmcRing::<u64, 8>::new();
        let tx = ring.writer();
        let mut a = ring.reader();
        let mut b = ring.reader();

        tx.send(1);
        tx.send(2);

        assert_eq!(a.read(), Some(1));
        assert_eq!(a.read(), Some(2));
        // `b` is untouched by `a`'s progress.
        assert_eq!(b.read(), Some(1));

        let mut c = a.clone();
        tx.send(3);
        assert_eq!(a.read(), Some(3));
        assert_eq!(c.read(), Some(3));
        assert_eq!(b.read(), Some(2));
    }

    #[test]
    fn sequences_survive_the_u32_wrap() {
        const N: usize = 8;
        let ring = SpmcRing::<u64, N>::new();
        let tx = ring.writer();

        // Park the cursor a little short of the wrap, then push one full
        // revolution so every slot holds a sequence consistent with the
        // preset before any reader looks at the ring.
        ring.set_write_idx(u32::MAX - 12);
        for i in 0..N as u64 {
            tx.send(i);
        }

        let mut rx = ring.reader();
        assert_eq!(rx.read(), None);

        // These eight writes carry the sequence across u32::MAX into 0.
        for i in 100..100 + N as u64 {
            tx.send(i);
        }
        let got: Vec<u64> = std::iter::from_fn(|| rx.read()).collect();
        assert_eq!(got, (100..100 + N as u64).collect::<Vec<_>>());
        assert_eq!(rx.lagged(), 0);
    }

    #[test]
    fn concurrent_readers_observe_monotonic_subsequences() {
        const TOTAL: u64 = 100_000;
        let ring = SpmcRing::<u64, 512>::new();
        let tx = ring.writer();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let mut rx = ring.reader();
                thread::spawn(move || {
                    let mut prev = 0u64;
                    let mut count = 0u64;
                    loop {
                        let Some(v) = rx.read() else {
                            std::hint::spin_loop();
                            continue;
                        };
                        assert!(v > prev, "went backwards: {v} after {prev}");
                        prev = v;
                        count += 1;
                        if v == TOTAL {
                            break;
                        }
                    }
                    (prev, count, rx.lagged())
                })
            })
            .collect();

        for i in 1..=TOTAL {
            tx.send(i);
        }

        for handle in readers {
            let (last, count, lagged) = handle.join().unwrap();
            // Every reader reaches the final record, and what it skipped
            // is exactly what it did not observe.
            assert_eq!(last, TOTAL);
            assert_eq!(count + lagged, TOTAL);
        }
    }
}
