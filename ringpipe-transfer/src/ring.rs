//! Ring geometry: configuration and the slot-carved memory region.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::descriptor::{Descriptor, DescriptorSet};
use crate::error::{Result, TransferError};
use crate::slot::SlotHeader;

/// Parameters of one streaming run. No hidden defaults: every knob is
/// explicit, validation happens once up front.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingConfig {
    /// Ring size `N`: number of slots.
    pub num_buffers: usize,
    /// Slot size `B` in bytes, including the 8-byte sequence header.
    pub buffer_size: usize,
    /// Total transfer count `T` for the run.
    pub num_transfers: u64,
    /// Backpressure threshold `K`: maximum slots the producer may be ahead
    /// of acknowledged consumer progress. Must satisfy `0 < K < N`.
    pub backpressure_threshold: u64,
    /// Progress-report interval `P`: the consumer acknowledges every `P`th
    /// accepted transfer.
    pub progress_interval: u64,
}

impl RingConfig {
    /// Build a config with the recommended derived knobs:
    /// `K = max(1, N - 4)`, `P = max(1, N / 4)`.
    pub fn new(num_buffers: usize, buffer_size: usize, num_transfers: u64) -> Self {
        Self {
            num_buffers,
            buffer_size,
            num_transfers,
            backpressure_threshold: (num_buffers.saturating_sub(4)).max(1) as u64,
            progress_interval: (num_buffers / 4).max(1) as u64,
        }
    }

    pub fn with_backpressure_threshold(mut self, threshold: u64) -> Self {
        self.backpressure_threshold = threshold;
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_buffers == 0 {
            return Err(TransferError::InvalidConfig("ring must have slots"));
        }
        if self.buffer_size < 8 || self.buffer_size % 8 != 0 {
            return Err(TransferError::InvalidConfig(
                "buffer size must be a multiple of 8 and hold the sequence header",
            ));
        }
        if self.backpressure_threshold == 0
            || self.backpressure_threshold >= self.num_buffers as u64
        {
            return Err(TransferError::InvalidConfig(
                "backpressure threshold must satisfy 0 < K < N",
            ));
        }
        if self.progress_interval == 0 {
            return Err(TransferError::InvalidConfig(
                "progress interval must be positive",
            ));
        }
        Ok(())
    }
}

impl Default for RingConfig {
    /// The streaming defaults of the reference drivers: 64 slots of 16 MiB,
    /// 1000 transfers.
    fn default() -> Self {
        Self::new(64, 16 * 1024 * 1024, 1000)
    }
}

/// Owned, registration-ready backing memory for a ring of slots.
///
/// Slots are contiguous, each starting with its 8-byte sequence header. The
/// buffer hands out raw addresses for the engine and [`SlotHeader`] views
/// for the protocol; it stays alive for the whole session.
pub struct RingBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    num_slots: usize,
    slot_len: usize,
}

// Raw addresses are handed to the engine and polled across threads; the
// protocol guarantees one writer and one reader per slot in strict
// round-robin.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Page-aligned so registration-friendly engines get well-placed ranges.
    const ALIGN: usize = 4096;

    pub fn allocate(num_slots: usize, slot_len: usize) -> Result<Self> {
        if num_slots == 0 || slot_len < 8 || slot_len % 8 != 0 {
            return Err(TransferError::InvalidConfig("invalid ring geometry"));
        }
        let total = num_slots
            .checked_mul(slot_len)
            .ok_or(TransferError::InvalidConfig("ring size overflows"))?;
        let layout = Layout::from_size_align(total, Self::ALIGN)
            .map_err(|_| TransferError::InvalidConfig("unrepresentable ring layout"))?;
        // Zeroed so headers start in a defined (if not yet sentinel) state.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(TransferError::InvalidConfig("allocation failed"))?;
        Ok(Self {
            ptr,
            layout,
            num_slots,
            slot_len,
        })
    }

    /// Allocate the geometry a config describes.
    pub fn for_config(cfg: &RingConfig) -> Result<Self> {
        cfg.validate()?;
        Self::allocate(cfg.num_buffers, cfg.buffer_size)
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn slot_len(&self) -> usize {
        self.slot_len
    }

    pub fn base_addr(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    pub fn total_len(&self) -> usize {
        self.num_slots * self.slot_len
    }

    pub fn slot_addr(&self, slot: usize) -> u64 {
        debug_assert!(slot < self.num_slots);
        self.base_addr() + (slot * self.slot_len) as u64
    }

    pub fn header(&self, slot: usize) -> SlotHeader {
        SlotHeader::new(self.slot_addr(slot))
    }

    /// Mark every slot empty. The consuming side does this before announcing
    /// its descriptors.
    pub fn reset_headers(&self) {
        for slot in 0..self.num_slots {
            self.header(slot).reset();
        }
    }

    /// One descriptor covering the whole allocation, for memory
    /// registration.
    pub fn registration_descs(&self, device_id: u32) -> DescriptorSet {
        DescriptorSet::new(vec![Descriptor::new(
            self.base_addr(),
            self.total_len() as u64,
            device_id,
        )])
    }

    /// Per-slot descriptors, for naming transfer sources/targets.
    pub fn slot_descs(&self, device_id: u32) -> DescriptorSet {
        (0..self.num_slots)
            .map(|slot| Descriptor::new(self.slot_addr(slot), self.slot_len as u64, device_id))
            .collect()
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::{RingBuffer, RingConfig};
    use crate::slot::SEQ_SENTINEL;

    #[test]
    fn derived_knobs_follow_recommendations() {
        let cfg = RingConfig::new(64, 1024, 1000);
        assert_eq!(cfg.backpressure_threshold, 60);
        assert_eq!(cfg.progress_interval, 16);

        // Tiny rings still get valid knobs.
        let cfg = RingConfig::new(2, 1024, 10);
        assert_eq!(cfg.backpressure_threshold, 1);
        assert_eq!(cfg.progress_interval, 1);
        cfg.validate().expect("valid");
    }

    #[test]
    fn validation_rejects_bad_geometry() {
        assert!(RingConfig::new(0, 1024, 1).validate().is_err());
        assert!(RingConfig::new(4, 4, 1).validate().is_err());
        assert!(RingConfig::new(4, 1001, 1).validate().is_err());
        assert!(
            RingConfig::new(4, 1024, 1)
                .with_backpressure_threshold(4)
                .validate()
                .is_err()
        );
        assert!(
            RingConfig::new(4, 1024, 1)
                .with_progress_interval(0)
                .validate()
                .is_err()
        );
        RingConfig::new(4, 1024, 10).validate().expect("valid");
    }

    #[test]
    fn slots_are_contiguous_and_aligned() {
        let ring = RingBuffer::allocate(4, 256).expect("allocate");
        assert_eq!(ring.base_addr() % 4096, 0);
        assert_eq!(ring.total_len(), 1024);
        for slot in 0..4 {
            assert_eq!(ring.slot_addr(slot), ring.base_addr() + slot as u64 * 256);
        }
    }

    #[test]
    fn reset_headers_marks_every_slot_empty() {
        let ring = RingBuffer::allocate(3, 64).expect("allocate");
        ring.header(1).write(7);
        ring.reset_headers();
        for slot in 0..3 {
            assert_eq!(ring.header(slot).read(), SEQ_SENTINEL);
        }
    }

    #[test]
    fn descriptor_sets_describe_the_allocation() {
        let ring = RingBuffer::allocate(4, 128).expect("allocate");

        let reg = ring.registration_descs(0);
        assert_eq!(reg.len(), 1);
        let region = reg.get(0).expect("region");
        assert_eq!(region.addr, ring.base_addr());
        assert_eq!(region.len, 512);

        let slots = ring.slot_descs(0);
        assert_eq!(slots.len(), 4);
        for (i, desc) in slots.iter().enumerate() {
            assert_eq!(desc.addr, ring.slot_addr(i));
            assert_eq!(desc.len, 128);
        }
    }
}
