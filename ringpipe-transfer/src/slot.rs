//! Sequence headers embedded at the base of each ring slot.
//!
//! The header doubles as the arrival signal: the producer writes the
//! transfer number before issuing the slot, the consumer busy-polls the same
//! word until it matches the index it expects. The value lands through an
//! uncoordinated remote memory write, so access is atomic with
//! acquire/release ordering and never a plain load through a cast pointer at
//! call sites.

use std::sync::atomic::{AtomicU64, Ordering};

/// All-ones marker: slot is empty (or already consumed and reclaimed).
pub const SEQ_SENTINEL: u64 = u64::MAX;

/// The 8-byte sequence word at a slot's base address.
#[derive(Clone, Copy, Debug)]
pub struct SlotHeader {
    addr: u64,
}

impl SlotHeader {
    /// Caller guarantees `addr` points at 8 writable, 8-aligned bytes that
    /// outlive every use of this header.
    pub fn new(addr: u64) -> Self {
        debug_assert_eq!(addr % 8, 0, "slot header must be 8-aligned");
        Self { addr }
    }

    fn word(&self) -> &AtomicU64 {
        unsafe { AtomicU64::from_ptr(self.addr as *mut u64) }
    }

    /// Current header value; `SEQ_SENTINEL` means no transfer has arrived.
    pub fn read(&self) -> u64 {
        self.word().load(Ordering::Acquire)
    }

    /// Stamp a transfer number into the slot.
    pub fn write(&self, seq: u64) {
        self.word().store(seq, Ordering::Release);
    }

    /// Return the slot to the empty state.
    pub fn reset(&self) {
        self.write(SEQ_SENTINEL);
    }
}
