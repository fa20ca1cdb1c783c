//! Peer-coordination and streaming-transfer protocol over a pluggable
//! transfer engine.
//!
//! The crate splits into three layers:
//!
//! - **Rendezvous**: [`channel`] resolves peer identities through a metadata
//!   directory (or the notification substrate itself), [`handshake`] then
//!   exchanges descriptor sets over [`notify`] with an asymmetric retry rule
//!   that tolerates lost and duplicated notifications.
//! - **Streaming**: [`ring`] carves a registered allocation into slots whose
//!   leading word is a [`slot`] sequence header; [`pipeline`] runs the
//!   producer and consumer loops with soft backpressure and batched progress
//!   acknowledgements.
//! - **Engine boundary**: [`engine`] is the trait actual data movement hides
//!   behind; [`loopback`] is the in-process implementation used by tests and
//!   the demo.
//!
//! [`session`] wires all of it together into one-call drivers for each side.

pub mod channel;
pub mod descriptor;
pub mod engine;
pub mod error;
mod logging;
pub mod handshake;
pub mod loopback;
pub mod messages;
pub mod notify;
pub mod pipeline;
pub mod ring;
pub mod session;
pub mod slot;

pub use channel::{DEFAULT_TIMEOUT, DirectoryChannel, MetadataChannel, NotifyChannel};
pub use descriptor::{Descriptor, DescriptorSet};
pub use engine::{PrepHandle, RegHandle, TransferEngine, XferDir, XferHandle, XferState};
pub use error::{Result, TransferError};
pub use loopback::LoopbackEngine;
pub use notify::{InProcHub, InProcNotifier, Notifier};
pub use pipeline::{ReceiverStats, SenderStats};
pub use ring::{RingBuffer, RingConfig};
pub use session::{
    RECEIVER_METADATA_KEY, ReceiverSession, SENDER_METADATA_KEY, SenderSession,
};

/// Install the process-wide logger. Idempotent; demos and binaries call this
/// once at startup, libraries never need to.
pub fn init_logging() {
    logging::ensure_initialized();
}
