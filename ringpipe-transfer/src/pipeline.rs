//! The streaming ring pipeline: producer and consumer loops.
//!
//! Both peers walk the ring round-robin, coordinated only by the sequence
//! header each slot carries and by small progress notifications. The
//! producer may run at most `K` transfers ahead of acknowledged consumer
//! progress; the consumer polls headers, acknowledges every `P`th accepted
//! transfer, and counts (but survives) overruns. All waits are busy-polls:
//! there is no blocking wake-up from a remote memory write.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::engine::{TransferEngine, XferHandle, XferState};
use crate::error::{Result, TransferError};
use crate::messages;
use crate::notify::Notifier;
use crate::ring::{RingBuffer, RingConfig};
use crate::slot::SEQ_SENTINEL;

/// Pause while the backpressure gate is waiting on consumer progress.
const BACKPRESSURE_SLEEP: Duration = Duration::from_micros(100);

/// Producer-side counters for one run.
#[derive(Clone, Debug, Default)]
pub struct SenderStats {
    /// Transfers issued.
    pub sent: u64,
    /// Last acknowledged consumer progress. A lower bound: lost
    /// notifications only make the producer more conservative.
    pub peer_progress: u64,
    /// Iterations that hit the backpressure gate.
    pub backpressure_checks: u64,
    /// Sleeps taken inside the gate.
    pub backpressure_waits: u64,
    /// Maximum observed lead over acknowledged progress.
    pub max_ahead: u64,
    /// Wall time from first issue through in-flight drain.
    pub elapsed: Duration,
    pub mb_per_sec: f64,
}

/// Consumer-side counters for one run.
#[derive(Clone, Debug, Default)]
pub struct ReceiverStats {
    /// Transfers accepted.
    pub received: u64,
    /// Progress acknowledgements sent.
    pub progress_updates_sent: u64,
    /// Headers observed with an unexpected sequence number - each one means
    /// the producer wrapped into an undrained slot.
    pub sequence_mismatches: u64,
    /// Wall time from first arrival through the last acceptance.
    pub elapsed: Duration,
    pub mb_per_sec: f64,
}

/// Fold every pending `P:<count>` acknowledgement from `peer` into
/// `peer_progress`, keeping the maximum. Non-progress payloads and other
/// senders are left alone; counts never move backwards.
fn absorb_progress<N: Notifier>(notifier: &N, peer: &str, peer_progress: &mut u64) -> Result<()> {
    let drained = notifier.drain()?;
    for (sender, payloads) in drained {
        if sender != peer {
            continue;
        }
        for payload in payloads {
            if let Some(count) = messages::parse_progress(&payload) {
                if count > *peer_progress {
                    *peer_progress = count;
                }
            }
        }
    }
    Ok(())
}

fn throughput(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / secs) / (1024.0 * 1024.0)
    } else {
        0.0
    }
}

/// Run the producer side of the pipeline.
///
/// `handles` holds one pre-built transfer per ring slot, local slot `s`
/// writing to remote slot `s`. An engine error aborts issuing but already
/// in-flight transfers are still drained before returning.
pub fn run_sender<E: TransferEngine, N: Notifier>(
    engine: &E,
    notifier: &N,
    peer: &str,
    cfg: &RingConfig,
    ring: &RingBuffer,
    handles: &[XferHandle],
) -> Result<SenderStats> {
    cfg.validate()?;
    if handles.len() != cfg.num_buffers || ring.num_slots() != cfg.num_buffers {
        return Err(TransferError::InvalidConfig(
            "ring and handle count must match the configured slot count",
        ));
    }

    let ring_len = cfg.num_buffers as u64;
    let mut stats = SenderStats::default();
    let mut fault: Option<TransferError> = None;
    let mut first_issue: Option<Instant> = None;

    for i in 0..cfg.num_transfers {
        let slot = (i % ring_len) as usize;

        // Backpressure gate: never run more than K transfers past the
        // consumer's acknowledged progress.
        let mut ahead = i.saturating_sub(stats.peer_progress);
        stats.max_ahead = stats.max_ahead.max(ahead);
        if ahead >= cfg.backpressure_threshold {
            stats.backpressure_checks += 1;
            while ahead >= cfg.backpressure_threshold {
                absorb_progress(notifier, peer, &mut stats.peer_progress)?;
                ahead = i.saturating_sub(stats.peer_progress);
                if ahead >= cfg.backpressure_threshold {
                    stats.backpressure_waits += 1;
                    thread::sleep(BACKPRESSURE_SLEEP);
                }
            }
        }

        // Slot gate: the previous transfer against this slot must have
        // resolved before the slot is touched again.
        loop {
            match engine.poll_state(handles[slot]) {
                Ok(state) if state.is_resolved() => break,
                Ok(_) => std::hint::spin_loop(),
                Err(err) => {
                    fault = Some(err);
                    break;
                }
            }
        }
        if fault.is_some() {
            break;
        }

        ring.header(slot).write(i);
        if first_issue.is_none() {
            first_issue = Some(Instant::now());
        }

        match engine.issue(handles[slot]) {
            Ok(XferState::Error) => {
                error!("transfer {i} failed at issue, aborting send loop");
                fault = Some(TransferError::TransferFault(format!(
                    "engine reported error issuing transfer {i}"
                )));
                break;
            }
            Ok(_) => {}
            Err(err) => {
                error!("transfer {i} could not be issued: {err}");
                fault = Some(err);
                break;
            }
        }
        stats.sent += 1;

        // Opportunistic, non-blocking progress refresh off the hot path.
        if stats.sent % cfg.progress_interval == 0 {
            absorb_progress(notifier, peer, &mut stats.peer_progress)?;
        }
        if stats.sent % 100 == 0 {
            info!(
                "sent {}/{} (peer at {})",
                stats.sent, cfg.num_transfers, stats.peer_progress
            );
        }
    }

    // Every issued transfer must resolve before resources can be released;
    // no dangling in-flight work at shutdown.
    for (slot, handle) in handles.iter().enumerate() {
        loop {
            match engine.poll_state(*handle) {
                Ok(XferState::Processing) => std::hint::spin_loop(),
                Ok(XferState::Error) => {
                    warn!("slot {slot} resolved with an error during drain");
                    break;
                }
                Ok(XferState::Done) => break,
                Err(err) => {
                    warn!("slot {slot} poll failed during drain: {err}");
                    break;
                }
            }
        }
    }

    if let Some(started) = first_issue {
        stats.elapsed = started.elapsed();
        stats.mb_per_sec = throughput(stats.sent * cfg.buffer_size as u64, stats.elapsed);
    }
    info!(
        "sender done: {} transfers, {:.2} MB/s, backpressure {} checks / {} waits, max ahead {}/{}",
        stats.sent,
        stats.mb_per_sec,
        stats.backpressure_checks,
        stats.backpressure_waits,
        stats.max_ahead,
        cfg.num_buffers
    );

    match fault {
        Some(err) => Err(err),
        None => Ok(stats),
    }
}

/// Run the consumer side of the pipeline.
///
/// Accepts `T` transfers in sequence order, acknowledging every `P`th one to
/// `peer`. A header that is neither the sentinel nor the expected index is
/// an overrun: counted, logged, and then accepted so the stream continues -
/// detection is advisory, the backpressure gate is the preventive layer.
pub fn run_receiver<N: Notifier>(
    notifier: &N,
    peer: &str,
    cfg: &RingConfig,
    ring: &RingBuffer,
) -> Result<ReceiverStats> {
    cfg.validate()?;
    if ring.num_slots() != cfg.num_buffers {
        return Err(TransferError::InvalidConfig(
            "ring must match the configured slot count",
        ));
    }

    let ring_len = cfg.num_buffers as u64;
    let mut stats = ReceiverStats::default();
    let mut first_arrival: Option<Instant> = None;

    for i in 0..cfg.num_transfers {
        let header = ring.header((i % ring_len) as usize);

        // Busy-poll for arrival; the writing side cannot wake us.
        loop {
            let seq = header.read();
            if seq == SEQ_SENTINEL {
                std::hint::spin_loop();
                continue;
            }
            if seq != i {
                error!("sequence mismatch: expected {i}, got {seq} (buffer overrun)");
                stats.sequence_mismatches += 1;
            }
            break;
        }
        if first_arrival.is_none() {
            first_arrival = Some(Instant::now());
        }

        // Distinguish "not yet arrived" from "consumed" on the next wrap.
        header.reset();
        stats.received += 1;

        if stats.received % cfg.progress_interval == 0 {
            notifier.send(peer, messages::encode_progress(stats.received))?;
            stats.progress_updates_sent += 1;
        }
        if stats.received % 100 == 0 {
            info!("processed {}/{}", stats.received, cfg.num_transfers);
        }
    }

    if let Some(started) = first_arrival {
        stats.elapsed = started.elapsed();
        stats.mb_per_sec = throughput(stats.received * cfg.buffer_size as u64, stats.elapsed);
    }
    if stats.sequence_mismatches == 0 {
        info!(
            "receiver done: {} transfers, {:.2} MB/s, no buffer overrun",
            stats.received, stats.mb_per_sec
        );
    } else {
        error!(
            "receiver done with {} sequence mismatches (buffer overrun)",
            stats.sequence_mismatches
        );
    }
    debug!(
        "receiver sent {} progress updates",
        stats.progress_updates_sent
    );

    Ok(stats)
}
