//! Startup rendezvous between two peers.
//!
//! Phase one exchanges opaque identity blobs through the metadata channel,
//! bounded by a timeout. Phase two moves the consuming side's descriptor set
//! across the notification substrate with an asymmetric retry rule: whoever
//! needs the data retries until satisfied, whoever has the data sends it once
//! it has seen proof the peer's notification path is live. A peer's `READY`
//! is that proof; the single `DESCS:` reply lands in a mailbox the peer is
//! already parked on.
//!
//! The two roles are modeled as explicit state machines whose transition
//! function consumes one drained notification batch and yields the payloads
//! to send, so the protocol is testable without any real channel.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info};

use crate::channel::MetadataChannel;
use crate::descriptor::DescriptorSet;
use crate::error::{Result, TransferError};
use crate::messages;
use crate::notify::Notifier;

/// Sink-side READY throttle: one READY every this many polls.
const READY_THROTTLE: usize = 5;
/// Sink-side drains per outer iteration before sleeping.
const DRAIN_ATTEMPTS: usize = 3;
/// Sleep between polls while the exchange is incomplete.
const POLL_SLEEP: Duration = Duration::from_millis(10);

/// Publish this peer's identity blob under its well-known key.
pub fn publish_identity<C: MetadataChannel + ?Sized>(
    channel: &C,
    key: &str,
    identity: &[u8],
) -> Result<()> {
    channel.publish(key, identity)
}

/// Resolve the remote peer's identity blob, bounded by `timeout`.
///
/// A timeout here is a fatal startup error for the caller; no retry happens
/// at this layer.
pub fn resolve_identity<C: MetadataChannel + ?Sized>(
    channel: &C,
    key: &str,
    timeout: Duration,
) -> Result<Bytes> {
    let identity = channel.retrieve(key, timeout)?;
    info!("resolved peer identity under '{key}' ({} bytes)", identity.len());
    Ok(identity)
}

fn peer_payloads<'a>(
    drained: &'a HashMap<String, Vec<Bytes>>,
    peer: &str,
) -> impl Iterator<Item = &'a Bytes> {
    drained
        .iter()
        .filter(move |(sender, _)| sender.as_str() == peer)
        .flat_map(|(_, payloads)| payloads.iter())
}

/// Descriptor-holding side of the exchange.
///
/// Re-sends `READY` every poll until the peer's `READY` arrives, then sends
/// the descriptor payload exactly once and completes. Late or duplicate
/// `READY`s after completion are no-ops.
pub struct DescSource {
    peer: String,
    payload: Bytes,
    complete: bool,
}

impl DescSource {
    pub fn new(peer: impl Into<String>, descs: &DescriptorSet) -> Self {
        Self {
            peer: peer.into(),
            payload: messages::encode_descs(&descs.encode()),
            complete: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Consume one drained batch; returns the payloads to send to the peer.
    pub fn on_poll(&mut self, drained: &HashMap<String, Vec<Bytes>>) -> Vec<Bytes> {
        if self.complete {
            return Vec::new();
        }
        if peer_payloads(drained, &self.peer).any(|p| messages::is_ready(p)) {
            debug!("peer '{}' is live, sending descriptors", self.peer);
            self.complete = true;
            return vec![self.payload.clone()];
        }
        vec![Bytes::from_static(messages::READY)]
    }
}

/// Descriptor-requesting side of the exchange.
///
/// Sends `READY` on every [`READY_THROTTLE`]th poll and scans every drained
/// payload for the `DESCS:` prefix. Duplicate descriptor deliveries after
/// completion are ignored.
pub struct DescSink {
    peer: String,
    polls: usize,
    descs: Option<DescriptorSet>,
}

impl DescSink {
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            polls: 0,
            descs: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.descs.is_some()
    }

    pub fn take_descs(&mut self) -> Option<DescriptorSet> {
        self.descs.take()
    }

    /// Consume one drained batch; returns the payloads to send to the peer.
    pub fn on_poll(&mut self, drained: &HashMap<String, Vec<Bytes>>) -> Result<Vec<Bytes>> {
        for payload in peer_payloads(drained, &self.peer) {
            let Some(blob) = messages::parse_descs(payload) else {
                continue;
            };
            if self.descs.is_some() {
                // Duplicate delivery - already satisfied.
                continue;
            }
            let set = DescriptorSet::decode(blob).ok_or_else(|| {
                TransferError::Handshake(format!(
                    "undecodable descriptor payload from '{}'",
                    self.peer
                ))
            })?;
            debug!("received {} descriptors from '{}'", set.len(), self.peer);
            self.descs = Some(set);
        }
        if self.descs.is_some() {
            return Ok(Vec::new());
        }
        let throttled = self.polls % READY_THROTTLE == 0;
        self.polls += 1;
        if throttled {
            Ok(vec![Bytes::from_static(messages::READY)])
        } else {
            Ok(Vec::new())
        }
    }
}

/// Blocking driver for the descriptor-holding side.
pub fn exchange_as_source<N: Notifier>(
    notifier: &N,
    peer: &str,
    descs: &DescriptorSet,
) -> Result<()> {
    let mut source = DescSource::new(peer, descs);
    info!("waiting for '{peer}' READY (retrying)");
    while !source.is_complete() {
        let drained = notifier.drain()?;
        for payload in source.on_poll(&drained) {
            notifier.send(peer, payload)?;
        }
        if !source.is_complete() {
            thread::sleep(POLL_SLEEP);
        }
    }
    info!("sent descriptors to '{peer}'");
    Ok(())
}

/// Blocking driver for the descriptor-requesting side.
pub fn exchange_as_sink<N: Notifier>(notifier: &N, peer: &str) -> Result<DescriptorSet> {
    let mut sink = DescSink::new(peer);
    info!("waiting for '{peer}' descriptors (sending READY)");
    loop {
        for _ in 0..DRAIN_ATTEMPTS {
            let drained = notifier.drain()?;
            for payload in sink.on_poll(&drained)? {
                notifier.send(peer, payload)?;
            }
            if sink.is_complete() {
                break;
            }
        }
        if let Some(descs) = sink.take_descs() {
            info!("received {} descriptors from '{peer}'", descs.len());
            return Ok(descs);
        }
        thread::sleep(POLL_SLEEP);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;

    use super::{DescSink, DescSource};
    use crate::descriptor::{Descriptor, DescriptorSet};
    use crate::messages;

    fn sample_descs() -> DescriptorSet {
        DescriptorSet::new(vec![
            Descriptor::new(0x1000, 1024, 0),
            Descriptor::new(0x2000, 1024, 0),
        ])
    }

    fn batch(sender: &str, payloads: Vec<Bytes>) -> HashMap<String, Vec<Bytes>> {
        let mut map = HashMap::new();
        map.insert(sender.to_string(), payloads);
        map
    }

    #[test]
    fn source_retries_ready_until_peer_ready() {
        let mut source = DescSource::new("peer", &sample_descs());

        for _ in 0..4 {
            let out = source.on_poll(&HashMap::new());
            assert_eq!(out, vec![Bytes::from_static(b"READY")]);
            assert!(!source.is_complete());
        }
    }

    #[test]
    fn source_sends_descs_exactly_once_on_peer_ready() {
        let mut source = DescSource::new("peer", &sample_descs());

        let out = source.on_poll(&batch("peer", vec![Bytes::from_static(b"READY")]));
        assert_eq!(out.len(), 1);
        assert_eq!(
            messages::parse_descs(&out[0]),
            Some(sample_descs().encode().as_ref())
        );
        assert!(source.is_complete());

        // Duplicate READY after completion is a no-op.
        let out = source.on_poll(&batch("peer", vec![Bytes::from_static(b"READY")]));
        assert!(out.is_empty());
    }

    #[test]
    fn source_ignores_ready_from_other_peers() {
        let mut source = DescSource::new("peer", &sample_descs());
        let out = source.on_poll(&batch("stranger", vec![Bytes::from_static(b"READY")]));
        assert_eq!(out, vec![Bytes::from_static(b"READY")]);
        assert!(!source.is_complete());
    }

    #[test]
    fn sink_throttles_ready_sends() {
        let mut sink = DescSink::new("peer");

        let mut sent = 0;
        for _ in 0..10 {
            sent += sink.on_poll(&HashMap::new()).expect("poll").len();
        }
        // Polls 0 and 5 emit READY.
        assert_eq!(sent, 2);
    }

    #[test]
    fn sink_completes_on_descs_and_ignores_duplicates() {
        let mut sink = DescSink::new("peer");
        let descs_payload = messages::encode_descs(&sample_descs().encode());

        let out = sink
            .on_poll(&batch("peer", vec![descs_payload.clone()]))
            .expect("poll");
        assert!(out.is_empty());
        assert!(sink.is_complete());

        // Replayed DESCS must not alter the resolved set or error.
        let out = sink
            .on_poll(&batch("peer", vec![descs_payload]))
            .expect("poll");
        assert!(out.is_empty());
        assert_eq!(sink.take_descs(), Some(sample_descs()));
    }

    #[test]
    fn sink_skips_unrelated_payloads() {
        let mut sink = DescSink::new("peer");
        let out = sink
            .on_poll(&batch(
                "peer",
                vec![Bytes::from_static(b"READY"), Bytes::from_static(b"P:5")],
            ))
            .expect("poll");
        assert_eq!(out.len(), 1);
        assert!(!sink.is_complete());
    }

    #[test]
    fn sink_rejects_undecodable_descs() {
        let mut sink = DescSink::new("peer");
        let bad = messages::encode_descs(b"\xff\xff\xff\xff");
        assert!(sink.on_poll(&batch("peer", vec![bad])).is_err());
    }

    #[test]
    fn sink_ignores_descs_from_other_peers() {
        let mut sink = DescSink::new("peer");
        let payload = messages::encode_descs(&sample_descs().encode());
        sink.on_poll(&batch("stranger", vec![payload])).expect("poll");
        assert!(!sink.is_complete());
    }
}
