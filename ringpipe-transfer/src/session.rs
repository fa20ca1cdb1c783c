//! End-to-end session drivers for one streaming run.
//!
//! A session owns the whole lifecycle of one side: allocate and register the
//! ring, rendezvous with the peer through the metadata channel, exchange
//! descriptors over notifications, run the pipeline loop, then tear
//! everything down in reverse order. The engine, notifier and channel are
//! all injected, so the same driver runs against the in-process loopback
//! stack and against a fabric deployment.

use std::time::Duration;

use log::{info, warn};

use crate::channel::{DEFAULT_TIMEOUT, MetadataChannel};
use crate::descriptor::DescriptorSet;
use crate::engine::{TransferEngine, XferDir, XferHandle};
use crate::error::{Result, TransferError};
use crate::handshake;
use crate::notify::Notifier;
use crate::pipeline::{self, ReceiverStats, SenderStats};
use crate::ring::{RingBuffer, RingConfig};

/// Directory key under which the producing side publishes its identity.
pub const SENDER_METADATA_KEY: &str = "sender_metadata";
/// Directory key under which the consuming side publishes its identity.
pub const RECEIVER_METADATA_KEY: &str = "receiver_metadata";

fn peer_name_from_identity(blob: &[u8]) -> Result<String> {
    let name = std::str::from_utf8(blob)
        .map_err(|_| TransferError::Handshake("peer identity is not valid UTF-8".to_string()))?;
    if name.is_empty() {
        return Err(TransferError::Handshake("peer identity is empty".to_string()));
    }
    Ok(name.to_string())
}

/// Producing side of a streaming session.
pub struct SenderSession<E, N, C> {
    engine: E,
    notifier: N,
    channel: C,
    name: String,
    cfg: RingConfig,
    device_id: u32,
    timeout: Duration,
}

impl<E, N, C> SenderSession<E, N, C>
where
    E: TransferEngine,
    N: Notifier,
    C: MetadataChannel,
{
    pub fn new(engine: E, notifier: N, channel: C, name: impl Into<String>, cfg: RingConfig) -> Self {
        Self {
            engine,
            notifier,
            channel,
            name: name.into(),
            cfg,
            device_id: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_device_id(mut self, device_id: u32) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drive one full run: rendezvous, stream `T` transfers, tear down.
    pub fn run(&self) -> Result<SenderStats> {
        self.cfg.validate()?;
        let ring = RingBuffer::for_config(&self.cfg)?;
        let reg = self.engine.register_memory(&ring.registration_descs(self.device_id))?;

        handshake::publish_identity(&self.channel, SENDER_METADATA_KEY, self.name.as_bytes())?;
        let identity =
            handshake::resolve_identity(&self.channel, RECEIVER_METADATA_KEY, self.timeout)?;
        let peer = peer_name_from_identity(&identity)?;
        info!("'{}' streaming to '{peer}'", self.name);

        let remote_descs = handshake::exchange_as_sink(&self.notifier, &peer)?;
        if remote_descs.len() != self.cfg.num_buffers {
            return Err(TransferError::BatchLengthMismatch {
                local: self.cfg.num_buffers,
                remote: remote_descs.len(),
            });
        }

        let outcome = self.stream(&ring, &peer, &remote_descs);
        // Registration outlives every transfer; released last.
        if let Err(err) = self.engine.deregister_memory(reg) {
            warn!("deregister failed during teardown: {err}");
        }
        outcome
    }

    /// Prepare per-slot transfers and run the producer loop. All engine
    /// resources built here are released here, on success and on fault.
    fn stream(
        &self,
        ring: &RingBuffer,
        peer: &str,
        remote_descs: &DescriptorSet,
    ) -> Result<SenderStats> {
        let local_prep = self
            .engine
            .prepare_transfer_list(&self.name, &ring.slot_descs(self.device_id))?;
        let remote_prep = match self.engine.prepare_transfer_list(peer, remote_descs) {
            Ok(prep) => prep,
            Err(err) => {
                let _ = self.engine.release_prep(local_prep);
                return Err(err);
            }
        };

        let mut handles: Vec<XferHandle> = Vec::with_capacity(self.cfg.num_buffers);
        let mut build_err = None;
        for slot in 0..self.cfg.num_buffers {
            match self.engine.build_prepped_transfer(
                XferDir::Write,
                local_prep,
                &[slot],
                remote_prep,
                &[slot],
                format!("BUF_{slot}").as_bytes(),
            ) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    build_err = Some(err);
                    break;
                }
            }
        }

        let outcome = match build_err {
            Some(err) => Err(err),
            None => pipeline::run_sender(
                &self.engine,
                &self.notifier,
                peer,
                &self.cfg,
                ring,
                &handles,
            ),
        };

        // The pipeline drained all in-flight work before returning, so
        // releases cannot race an active transfer.
        for handle in handles {
            if let Err(err) = self.engine.release_transfer(handle) {
                warn!("release of transfer {} failed: {err}", handle.0);
            }
        }
        if let Err(err) = self.engine.release_prep(remote_prep) {
            warn!("release of remote prep failed: {err}");
        }
        if let Err(err) = self.engine.release_prep(local_prep) {
            warn!("release of local prep failed: {err}");
        }
        outcome
    }
}

/// Consuming side of a streaming session.
pub struct ReceiverSession<E, N, C> {
    engine: E,
    notifier: N,
    channel: C,
    name: String,
    cfg: RingConfig,
    device_id: u32,
    timeout: Duration,
}

impl<E, N, C> ReceiverSession<E, N, C>
where
    E: TransferEngine,
    N: Notifier,
    C: MetadataChannel,
{
    pub fn new(engine: E, notifier: N, channel: C, name: impl Into<String>, cfg: RingConfig) -> Self {
        Self {
            engine,
            notifier,
            channel,
            name: name.into(),
            cfg,
            device_id: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_device_id(mut self, device_id: u32) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drive one full run: rendezvous, accept `T` transfers, tear down.
    pub fn run(&self) -> Result<ReceiverStats> {
        self.cfg.validate()?;
        let ring = RingBuffer::for_config(&self.cfg)?;
        // Every slot must read as empty before its address is announced.
        ring.reset_headers();
        let reg = self.engine.register_memory(&ring.registration_descs(self.device_id))?;

        handshake::publish_identity(&self.channel, RECEIVER_METADATA_KEY, self.name.as_bytes())?;
        let identity =
            handshake::resolve_identity(&self.channel, SENDER_METADATA_KEY, self.timeout)?;
        let peer = peer_name_from_identity(&identity)?;
        info!("'{}' accepting from '{peer}'", self.name);

        let outcome = handshake::exchange_as_source(
            &self.notifier,
            &peer,
            &ring.slot_descs(self.device_id),
        )
        .and_then(|()| pipeline::run_receiver(&self.notifier, &peer, &self.cfg, &ring));

        if let Err(err) = self.engine.deregister_memory(reg) {
            warn!("deregister failed during teardown: {err}");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::{ReceiverSession, SenderSession, peer_name_from_identity};
    use crate::channel::NotifyChannel;
    use crate::loopback::LoopbackEngine;
    use crate::notify::InProcHub;
    use crate::ring::RingConfig;

    #[test]
    fn identity_blob_must_be_utf8_and_nonempty() {
        assert_eq!(peer_name_from_identity(b"receiver").unwrap(), "receiver");
        assert!(peer_name_from_identity(b"\xff\xfe").is_err());
        assert!(peer_name_from_identity(b"").is_err());
    }

    #[test]
    fn loopback_session_streams_in_order() {
        let hub = InProcHub::new();
        let engine = LoopbackEngine::new();
        let cfg = RingConfig::new(4, 1024, 10);

        let (sender_stats, receiver_stats) = thread::scope(|scope| {
            let sender = scope.spawn(|| {
                SenderSession::new(
                    &engine,
                    hub.endpoint("sender"),
                    NotifyChannel::new(hub.endpoint("sender"), "receiver"),
                    "sender",
                    cfg,
                )
                .run()
                .expect("sender run")
            });
            let receiver = scope.spawn(|| {
                ReceiverSession::new(
                    &engine,
                    hub.endpoint("receiver"),
                    NotifyChannel::new(hub.endpoint("receiver"), "sender"),
                    "receiver",
                    cfg,
                )
                .run()
                .expect("receiver run")
            });
            (sender.join().expect("join"), receiver.join().expect("join"))
        });

        assert_eq!(sender_stats.sent, 10);
        assert_eq!(receiver_stats.received, 10);
        assert_eq!(receiver_stats.sequence_mismatches, 0);
    }
}
