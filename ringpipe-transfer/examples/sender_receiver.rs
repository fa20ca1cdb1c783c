//! Single-process streaming demo: two threads, one loopback engine.
//!
//! The sender and receiver rendezvous over the notification substrate (no
//! directory service needed), then stream a small ring of transfers through
//! the in-process engine. Run with:
//!
//! ```text
//! cargo run --example sender_receiver
//! ```

use std::thread;

use ringpipe_transfer::{
    InProcHub, LoopbackEngine, NotifyChannel, ReceiverSession, RingConfig, SenderSession,
};

fn main() {
    ringpipe_transfer::init_logging();

    let hub = InProcHub::new();
    let engine = LoopbackEngine::new();
    let cfg = RingConfig::new(16, 4096, 200);

    thread::scope(|scope| {
        scope.spawn(|| {
            let session = SenderSession::new(
                &engine,
                hub.endpoint("sender"),
                NotifyChannel::new(hub.endpoint("sender"), "receiver"),
                "sender",
                cfg,
            );
            match session.run() {
                Ok(stats) => println!(
                    "sender: {} transfers, {:.2} MB/s, max ahead {}",
                    stats.sent, stats.mb_per_sec, stats.max_ahead
                ),
                Err(err) => eprintln!("sender failed: {err}"),
            }
        });
        scope.spawn(|| {
            let session = ReceiverSession::new(
                &engine,
                hub.endpoint("receiver"),
                NotifyChannel::new(hub.endpoint("receiver"), "sender"),
                "receiver",
                cfg,
            );
            match session.run() {
                Ok(stats) => println!(
                    "receiver: {} transfers, {:.2} MB/s, {} mismatches",
                    stats.received, stats.mb_per_sec, stats.sequence_mismatches
                ),
                Err(err) => eprintln!("receiver failed: {err}"),
            }
        });
    });
}
