//! Transfer engine adapter: the boundary behind which actual data movement
//! happens.
//!
//! The engine is treated as a black box that registers memory, builds
//! transfers from descriptor pairs, issues them synchronously and completes
//! them asynchronously. Handles are opaque tokens owned by the side that
//! created them and released exactly once.

use crate::descriptor::DescriptorSet;
use crate::error::Result;

/// Tri-state outcome of an issued transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XferState {
    Processing,
    Done,
    Error,
}

impl XferState {
    /// Whether a slot guarded by this handle may be reused.
    pub fn is_resolved(self) -> bool {
        !matches!(self, XferState::Processing)
    }
}

/// Direction of a transfer relative to the local peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XferDir {
    Read,
    Write,
}

/// Token for a registered memory range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegHandle(pub u64);

/// Token for a prepared descriptor list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PrepHandle(pub u64);

/// Token for one pre-built transfer. At most one use of a handle may be in
/// flight at a time; reuse requires the previous use to have resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct XferHandle(pub u64);

pub trait TransferEngine {
    /// Register memory regions, making them valid transfer sources/targets.
    fn register_memory(&self, regions: &DescriptorSet) -> Result<RegHandle>;

    /// Release a registration. Outstanding transfers against the region must
    /// be resolved first.
    fn deregister_memory(&self, handle: RegHandle) -> Result<()>;

    /// Build a one-shot transfer from full descriptor lists.
    fn build_transfer(
        &self,
        dir: XferDir,
        local: &DescriptorSet,
        remote: &DescriptorSet,
        remote_peer: &str,
        tag: &[u8],
    ) -> Result<XferHandle>;

    /// Pre-resolve a descriptor list for repeated use.
    fn prepare_transfer_list(&self, peer: &str, regions: &DescriptorSet) -> Result<PrepHandle>;

    /// Build a transfer naming entries of two prepared lists by index.
    fn build_prepped_transfer(
        &self,
        dir: XferDir,
        local: PrepHandle,
        local_indices: &[usize],
        remote: PrepHandle,
        remote_indices: &[usize],
        tag: &[u8],
    ) -> Result<XferHandle>;

    /// Issue a built transfer. Synchronous issue, asynchronous completion:
    /// the returned state may be `Processing`.
    fn issue(&self, handle: XferHandle) -> Result<XferState>;

    /// Query the completion state of a handle. A built-but-never-issued
    /// handle reports `Done` (nothing in flight).
    fn poll_state(&self, handle: XferHandle) -> Result<XferState>;

    /// Release a transfer handle. Exactly once, after its final use resolved.
    fn release_transfer(&self, handle: XferHandle) -> Result<()>;

    /// Release a prepared list.
    fn release_prep(&self, handle: PrepHandle) -> Result<()>;
}

impl<E: TransferEngine + ?Sized> TransferEngine for &E {
    fn register_memory(&self, regions: &DescriptorSet) -> Result<RegHandle> {
        (**self).register_memory(regions)
    }

    fn deregister_memory(&self, handle: RegHandle) -> Result<()> {
        (**self).deregister_memory(handle)
    }

    fn build_transfer(
        &self,
        dir: XferDir,
        local: &DescriptorSet,
        remote: &DescriptorSet,
        remote_peer: &str,
        tag: &[u8],
    ) -> Result<XferHandle> {
        (**self).build_transfer(dir, local, remote, remote_peer, tag)
    }

    fn prepare_transfer_list(&self, peer: &str, regions: &DescriptorSet) -> Result<PrepHandle> {
        (**self).prepare_transfer_list(peer, regions)
    }

    fn build_prepped_transfer(
        &self,
        dir: XferDir,
        local: PrepHandle,
        local_indices: &[usize],
        remote: PrepHandle,
        remote_indices: &[usize],
        tag: &[u8],
    ) -> Result<XferHandle> {
        (**self).build_prepped_transfer(dir, local, local_indices, remote, remote_indices, tag)
    }

    fn issue(&self, handle: XferHandle) -> Result<XferState> {
        (**self).issue(handle)
    }

    fn poll_state(&self, handle: XferHandle) -> Result<XferState> {
        (**self).poll_state(handle)
    }

    fn release_transfer(&self, handle: XferHandle) -> Result<()> {
        (**self).release_transfer(handle)
    }

    fn release_prep(&self, handle: PrepHandle) -> Result<()> {
        (**self).release_prep(handle)
    }
}
