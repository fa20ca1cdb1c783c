//! The notification substrate: at-least-once, unordered, poll-drained
//! messaging between two named peers.
//!
//! Delivery guarantees are deliberately weak - a receiver drains *all*
//! pending payloads on each poll and must handle duplicates idempotently.
//! [`InProcHub`] is the in-process implementation used by tests and the
//! loopback demo; a fabric-backed notifier lives with the transfer engine and
//! is outside this crate.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Result, TransferError};

/// Send/drain primitive between named peers.
pub trait Notifier {
    /// Queue a payload for `peer`. Fire-and-forget; safe to call before the
    /// peer ever polls.
    fn send(&self, peer: &str, payload: Bytes) -> Result<()>;

    /// Take every pending payload, grouped by sending peer, clearing the
    /// queue. Order within a group is not guaranteed by the contract.
    fn drain(&self) -> Result<HashMap<String, Vec<Bytes>>>;
}

/// Mailbox state shared by every endpoint of one hub.
#[derive(Default)]
struct HubState {
    // peer name -> (sender name -> pending payloads)
    mailboxes: HashMap<String, HashMap<String, Vec<Bytes>>>,
}

/// In-process notification hub handing out named endpoints.
#[derive(Clone, Default)]
pub struct InProcHub {
    state: Arc<Mutex<HubState>>,
}

impl InProcHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the endpoint through which `name` sends and drains.
    pub fn endpoint(&self, name: impl Into<String>) -> InProcNotifier {
        InProcNotifier {
            name: name.into(),
            state: self.state.clone(),
        }
    }
}

/// One peer's handle on an [`InProcHub`].
#[derive(Clone)]
pub struct InProcNotifier {
    name: String,
    state: Arc<Mutex<HubState>>,
}

impl InProcNotifier {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Notifier for InProcNotifier {
    fn send(&self, peer: &str, payload: Bytes) -> Result<()> {
        if peer.is_empty() {
            return Err(TransferError::Channel("empty peer name".to_string()));
        }
        let mut state = self.state.lock();
        state
            .mailboxes
            .entry(peer.to_string())
            .or_default()
            .entry(self.name.clone())
            .or_default()
            .push(payload);
        Ok(())
    }

    fn drain(&self) -> Result<HashMap<String, Vec<Bytes>>> {
        let mut state = self.state.lock();
        let Some(mailbox) = state.mailboxes.get_mut(&self.name) else {
            return Ok(HashMap::new());
        };
        let drained = std::mem::take(mailbox);
        Ok(drained
            .into_iter()
            .filter(|(_, payloads)| !payloads.is_empty())
            .collect())
    }
}
