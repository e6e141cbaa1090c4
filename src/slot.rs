//! Lock-free multi-producer/single-consumer slotted buffer.
//!
//! A stream's buffer is divided into a power-of-two number of slots, each
//! an independently synchronized region of `capacity` raw records with its
//! own allocation and commit counter. Producers reserve write regions with
//! an atomic add on the allocation counter, write their records, then
//! publish them with an atomic add on the commit counter. No lock is ever
//! taken on this path; the consumer is the only reader and the only party
//! that resets counters.
//!
//! Capacity sizing is a build-time contract: producers must never request
//! more than [`HEADROOM`] records in one collective write, and they must
//! back off while a slot is producer-full. Overflow is prevented by that
//! contract, not by per-record checks.

use std::cell::UnsafeCell;
use std::hint;
use std::io;
use std::sync::atomic::{fence, AtomicU32, Ordering};

use crate::record::{RawRecord, RAW_RECORD_SIZE, WARP_WIDTH};

/// Reserved capacity margin, in records. At least the largest possible
/// single collective write (one full warp).
pub const HEADROOM: u32 = WARP_WIDTH as u32;

/// How a drain pass treats the drainable threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Stream still active: drain only slots whose committed region has
    /// crossed the producer-full threshold.
    Active,
    /// Stream stopped, no producers remain: drain unconditionally.
    Inactive,
}

/// Raw view of a stream's buffers for external producer code.
///
/// Mirrors what producer-side instrumentation is handed: base addresses of
/// the counter arrays and the record region, plus the per-slot byte size.
/// Counters and records for slot `i` live at index `i` and byte offset
/// `i * slot_size` respectively.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TraceInfo {
    pub allocs: *mut u32,
    pub commits: *mut u32,
    pub records: *mut u8,
    pub slot_size: u32,
}

pub struct SlotBuffer {
    allocs: Box<[AtomicU32]>,
    commits: Box<[AtomicU32]>,
    records: UnsafeCell<Box<[u8]>>,
    slot_capacity: u32,
}

// Producers write disjoint regions handed out by the allocation counter;
// the consumer reads only committed regions. See the module docs for the
// protocol that makes this sound.
unsafe impl Sync for SlotBuffer {}
unsafe impl Send for SlotBuffer {}

impl SlotBuffer {
    /// Creates a buffer of `slot_count` slots holding `slot_capacity` raw
    /// records each.
    ///
    /// # Panics
    ///
    /// Panics unless `slot_count` is a nonzero power of two and
    /// `slot_capacity` clears the headroom margin. Both are configuration
    /// contracts (validated earlier by `TraceConfig`).
    pub fn new(slot_count: usize, slot_capacity: u32) -> Self {
        assert!(
            slot_count > 0 && slot_count.is_power_of_two(),
            "slot count must be a power of two"
        );
        assert!(
            slot_capacity > HEADROOM,
            "slot capacity must exceed the headroom margin"
        );
        let bytes = slot_count * slot_capacity as usize * RAW_RECORD_SIZE;
        SlotBuffer {
            allocs: (0..slot_count).map(|_| AtomicU32::new(0)).collect(),
            commits: (0..slot_count).map(|_| AtomicU32::new(0)).collect(),
            records: UnsafeCell::new(vec![0u8; bytes].into_boxed_slice()),
            slot_capacity,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.allocs.len()
    }

    pub fn slot_capacity(&self) -> u32 {
        self.slot_capacity
    }

    /// Borrows slot `index`.
    pub fn slot(&self, index: usize) -> Slot<'_> {
        let slot_bytes = self.slot_capacity as usize * RAW_RECORD_SIZE;
        Slot {
            allocs: &self.allocs[index],
            commits: &self.commits[index],
            base: unsafe { (*self.records.get()).as_mut_ptr().add(index * slot_bytes) },
            capacity: self.slot_capacity,
        }
    }

    /// Slot assignment for a physical execution unit.
    pub fn slot_for_unit(&self, smid: u8) -> Slot<'_> {
        self.slot(smid as usize & (self.slot_count() - 1))
    }

    /// Resets every slot to empty. Consumer-only, and only while no
    /// producers are running (an epoch boundary).
    pub fn clear(&self) {
        for i in 0..self.slot_count() {
            self.commits[i].store(0, Ordering::Relaxed);
        }
        fence(Ordering::Release);
        for i in 0..self.slot_count() {
            self.allocs[i].store(0, Ordering::Relaxed);
        }
    }

    /// Raw buffer view for external producer code.
    pub fn fill_info(&self) -> TraceInfo {
        TraceInfo {
            allocs: self.allocs.as_ptr() as *mut u32,
            commits: self.commits.as_ptr() as *mut u32,
            records: unsafe { (*self.records.get()).as_mut_ptr() },
            slot_size: self.slot_capacity * RAW_RECORD_SIZE as u32,
        }
    }
}

/// One slot of a [`SlotBuffer`]: an allocation counter, a commit counter,
/// and a fixed-capacity record region.
pub struct Slot<'a> {
    allocs: &'a AtomicU32,
    commits: &'a AtomicU32,
    base: *mut u8,
    capacity: u32,
}

impl Slot<'_> {
    /// Reserves `n` records and returns the index of the first.
    ///
    /// The region `[index, index + n)` is exclusively the caller's to write
    /// until committed. Callers must respect the headroom contract: check
    /// [`Slot::is_full`] first and never request more than [`HEADROOM`]
    /// records at once.
    pub fn allocate(&self, n: u32) -> u32 {
        self.allocs.fetch_add(n, Ordering::Relaxed)
    }

    /// Publishes `n` written records to the consumer.
    pub fn commit(&self, n: u32) {
        self.commits.fetch_add(n, Ordering::Release);
    }

    /// True once the allocation counter has crossed `capacity - headroom`.
    /// Producers must back off until the consumer drains the slot.
    pub fn is_full(&self) -> bool {
        self.allocs.load(Ordering::Relaxed) > self.capacity - HEADROOM
    }

    /// Whether a drain pass should visit this slot.
    pub fn is_drainable(&self, mode: DrainMode) -> bool {
        match mode {
            DrainMode::Active => self.commits.load(Ordering::Acquire) > self.capacity - HEADROOM,
            DrainMode::Inactive => true,
        }
    }

    /// Current committed record count. Test/diagnostic aid.
    pub fn committed(&self) -> u32 {
        self.commits.load(Ordering::Acquire)
    }

    /// Current allocated record count. Test/diagnostic aid.
    pub fn allocated(&self) -> u32 {
        self.allocs.load(Ordering::Acquire)
    }

    /// Writes one packed raw record at record index `index`.
    ///
    /// # Safety
    ///
    /// `index` must lie inside a region obtained from [`Slot::allocate`]
    /// that has not yet been committed, so that no other producer and not
    /// the consumer can touch those bytes.
    pub unsafe fn write_record(&self, index: u32, record: &RawRecord) {
        debug_assert!(index < self.capacity, "record index outside slot region");
        let dst = self.base.add(index as usize * RAW_RECORD_SIZE);
        let buf = std::slice::from_raw_parts_mut(dst, RAW_RECORD_SIZE);
        record.pack_into(buf);
    }

    /// Drains the committed region `[0, commit)` through `f`, then resets
    /// the slot for the next epoch.
    ///
    /// The reset order is load-bearing: commit first, release fence, then
    /// allocation. A producer observing the allocation reset may immediately
    /// write into the region, so the commit counter must already be clear.
    pub fn drain(&self, mut f: impl FnMut(RawRecord) -> io::Result<()>) -> io::Result<u32> {
        let committed = self.commits.load(Ordering::Acquire);
        for i in 0..committed {
            let src = unsafe {
                std::slice::from_raw_parts(
                    self.base.add(i as usize * RAW_RECORD_SIZE),
                    RAW_RECORD_SIZE,
                )
            };
            let record = RawRecord::unpack_from(src)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            f(record)?;
        }
        self.commits.store(0, Ordering::Relaxed);
        fence(Ordering::Release);
        self.allocs.store(0, Ordering::Relaxed);
        Ok(committed)
    }
}

/// Safe producer-side handle used by in-process producers.
///
/// Follows the same sequence the instrumented producer code follows: pick
/// the slot for the executing unit, spin while it is producer-full,
/// allocate, write, commit.
#[derive(Clone, Copy)]
pub struct ProducerHandle<'a> {
    buffer: &'a SlotBuffer,
}

impl<'a> ProducerHandle<'a> {
    pub fn new(buffer: &'a SlotBuffer) -> Self {
        ProducerHandle { buffer }
    }

    /// Emits a single record.
    pub fn emit(&self, record: &RawRecord) {
        self.emit_group(std::slice::from_ref(record));
    }

    /// Emits up to one warp's worth of records as one collective write.
    ///
    /// # Panics
    ///
    /// Panics if `records` is empty, exceeds [`HEADROOM`], or mixes
    /// physical units (a collective write comes from one unit).
    pub fn emit_group(&self, records: &[RawRecord]) {
        assert!(
            !records.is_empty() && records.len() <= HEADROOM as usize,
            "collective write must be 1..={} records",
            HEADROOM
        );
        let smid = records[0].smid;
        debug_assert!(records.iter().all(|r| r.smid == smid));
        let slot = self.buffer.slot_for_unit(smid);
        loop {
            while slot.is_full() {
                hint::spin_loop();
            }
            let base = slot.allocate(records.len() as u32);
            // A racing allocation can still overshoot the region; back off
            // and wait for the consumer to reset the slot.
            if base as usize + records.len() <= slot.capacity as usize {
                for (i, r) in records.iter().enumerate() {
                    unsafe { slot.write_record(base + i as u32, r) };
                }
                slot.commit(records.len() as u32);
                return;
            }
        }
    }
}
