//! In-process transfer engine that moves bytes between registered regions of
//! the local address space.
//!
//! This is the engine used by tests and the single-process demo; a fabric
//! engine implementing [`TransferEngine`] over real hardware slots in behind
//! the same trait. Two knobs make completion behavior testable: an optional
//! completion delay (issued transfers report `Processing` until it elapses)
//! and a fault injection point that forces `Error` outcomes after a set
//! number of issues.
//!
//! When a transferred region is at least 8 bytes long, the leading 8 bytes
//! are stored atomically with release ordering *after* the body has been
//! copied, so a sequence header embedded at the region base never becomes
//! visible before the payload it announces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::descriptor::{Descriptor, DescriptorSet};
use crate::engine::{PrepHandle, RegHandle, TransferEngine, XferDir, XferHandle, XferState};
use crate::error::{Result, TransferError};

enum Progress {
    Idle,
    Processing { ready_at: Instant },
    Done,
    Error,
}

struct Xfer {
    pairs: Vec<(Descriptor, Descriptor)>,
    dir: XferDir,
    #[allow(dead_code)]
    tag: Vec<u8>,
    progress: Progress,
}

#[derive(Default)]
struct Inner {
    next_token: u64,
    regions: HashMap<u64, DescriptorSet>,
    preps: HashMap<u64, DescriptorSet>,
    xfers: HashMap<u64, Xfer>,
    issues: u64,
}

impl Inner {
    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn assert_registered(&self, desc: &Descriptor) -> Result<()> {
        let covered = self
            .regions
            .values()
            .flat_map(|set| set.iter())
            .any(|region| region.contains(desc.addr, desc.len));
        if covered {
            Ok(())
        } else {
            Err(TransferError::MemoryNotRegistered { ptr: desc.addr })
        }
    }

    fn build(
        &mut self,
        dir: XferDir,
        pairs: Vec<(Descriptor, Descriptor)>,
        tag: &[u8],
    ) -> Result<XferHandle> {
        for (local, remote) in &pairs {
            if local.len != remote.len {
                return Err(TransferError::TransferFault(format!(
                    "region length mismatch: local={}, remote={}",
                    local.len, remote.len
                )));
            }
            self.assert_registered(local)?;
            self.assert_registered(remote)?;
        }
        let token = self.token();
        self.xfers.insert(
            token,
            Xfer {
                pairs,
                dir,
                tag: tag.to_vec(),
                progress: Progress::Idle,
            },
        );
        Ok(XferHandle(token))
    }
}

/// Memcpy-backed [`TransferEngine`] over the local address space.
#[derive(Default)]
pub struct LoopbackEngine {
    inner: Mutex<Inner>,
    completion_delay: Option<Duration>,
    fail_after: Option<u64>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issued transfers report `Processing` until `delay` has elapsed.
    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = Some(delay);
        self
    }

    /// Every issue after the first `count` reports an `Error` outcome.
    pub fn with_fail_after(mut self, count: u64) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Copy one region pair. Payload first, then the leading word with
    /// release ordering so an embedded arrival header trails its data.
    ///
    /// Safety: both regions were validated against registered memory, which
    /// the caller guarantees stays alive and writable for the registration
    /// lifetime.
    unsafe fn copy_region(src: u64, dst: u64, len: usize) {
        unsafe {
            if len < 8 {
                std::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, len);
                return;
            }
            std::ptr::copy_nonoverlapping(
                (src as *const u8).add(8),
                (dst as *mut u8).add(8),
                len - 8,
            );
            let head = AtomicU64::from_ptr(src as *mut u64).load(Ordering::Acquire);
            AtomicU64::from_ptr(dst as *mut u64).store(head, Ordering::Release);
        }
    }
}

impl TransferEngine for LoopbackEngine {
    fn register_memory(&self, regions: &DescriptorSet) -> Result<RegHandle> {
        if regions.is_empty() {
            return Err(TransferError::InvalidConfig("empty registration"));
        }
        let mut inner = self.inner.lock();
        let token = inner.token();
        inner.regions.insert(token, regions.clone());
        Ok(RegHandle(token))
    }

    fn deregister_memory(&self, handle: RegHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .regions
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(TransferError::InvalidHandle(handle.0))
    }

    fn build_transfer(
        &self,
        dir: XferDir,
        local: &DescriptorSet,
        remote: &DescriptorSet,
        _remote_peer: &str,
        tag: &[u8],
    ) -> Result<XferHandle> {
        if local.len() != remote.len() {
            return Err(TransferError::BatchLengthMismatch {
                local: local.len(),
                remote: remote.len(),
            });
        }
        let pairs = local.iter().copied().zip(remote.iter().copied()).collect();
        self.inner.lock().build(dir, pairs, tag)
    }

    fn prepare_transfer_list(&self, _peer: &str, regions: &DescriptorSet) -> Result<PrepHandle> {
        let mut inner = self.inner.lock();
        for desc in regions.iter() {
            inner.assert_registered(desc)?;
        }
        let token = inner.token();
        inner.preps.insert(token, regions.clone());
        Ok(PrepHandle(token))
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
        if local_indices.len() != remote_indices.len() {
            return Err(TransferError::BatchLengthMismatch {
                local: local_indices.len(),
                remote: remote_indices.len(),
            });
        }
        let mut inner = self.inner.lock();
        let local_set = inner
            .preps
            .get(&local.0)
            .ok_or(TransferError::InvalidHandle(local.0))?;
        let remote_set = inner
            .preps
            .get(&remote.0)
            .ok_or(TransferError::InvalidHandle(remote.0))?;

        let mut pairs = Vec::with_capacity(local_indices.len());
        for (&li, &ri) in local_indices.iter().zip(remote_indices) {
            let l = *local_set
                .get(li)
                .ok_or(TransferError::InvalidConfig("local index out of range"))?;
            let r = *remote_set
                .get(ri)
                .ok_or(TransferError::InvalidConfig("remote index out of range"))?;
            pairs.push((l, r));
        }
        inner.build(dir, pairs, tag)
    }

    fn issue(&self, handle: XferHandle) -> Result<XferState> {
        let mut inner = self.inner.lock();
        inner.issues += 1;
        let issues = inner.issues;
        let fail = self.fail_after.is_some_and(|after| issues > after);
        let xfer = inner
            .xfers
            .get_mut(&handle.0)
            .ok_or(TransferError::InvalidHandle(handle.0))?;

        if let Progress::Processing { ready_at } = xfer.progress {
            if Instant::now() < ready_at {
                return Err(TransferError::HandleBusy(handle.0));
            }
        }
        if fail {
            xfer.progress = Progress::Error;
            return Ok(XferState::Error);
        }

        for (local, remote) in &xfer.pairs {
            let (src, dst) = match xfer.dir {
                XferDir::Write => (local.addr, remote.addr),
                XferDir::Read => (remote.addr, local.addr),
            };
            unsafe { Self::copy_region(src, dst, local.len as usize) };
        }

        match self.completion_delay {
            Some(delay) => {
                xfer.progress = Progress::Processing {
                    ready_at: Instant::now() + delay,
                };
                Ok(XferState::Processing)
            }
            None => {
                xfer.progress = Progress::Done;
                Ok(XferState::Done)
            }
        }
    }

    fn poll_state(&self, handle: XferHandle) -> Result<XferState> {
        let mut inner = self.inner.lock();
        let xfer = inner
            .xfers
            .get_mut(&handle.0)
            .ok_or(TransferError::InvalidHandle(handle.0))?;
        Ok(match xfer.progress {
            Progress::Idle => XferState::Done,
            Progress::Processing { ready_at } => {
                if Instant::now() >= ready_at {
                    xfer.progress = Progress::Done;
                    XferState::Done
                } else {
                    XferState::Processing
                }
            }
            Progress::Done => XferState::Done,
            Progress::Error => XferState::Error,
        })
    }

    fn release_transfer(&self, handle: XferHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.xfers.get(&handle.0) {
            None => return Err(TransferError::InvalidHandle(handle.0)),
            Some(xfer) => {
                if let Progress::Processing { ready_at } = xfer.progress {
                    if Instant::now() < ready_at {
                        return Err(TransferError::HandleBusy(handle.0));
                    }
                }
            }
        }
        inner.xfers.remove(&handle.0);
        Ok(())
    }

    fn release_prep(&self, handle: PrepHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .preps
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(TransferError::InvalidHandle(handle.0))
    }
}
