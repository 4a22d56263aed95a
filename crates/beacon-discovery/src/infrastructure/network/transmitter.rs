//! Jittered, repeated multicast transmission.
//!
//! UDP multicast is unreliable and devices randomise their own answer delay,
//! so the request is sent more than once: immediately, then `resend_count`
//! more times at delays drawn uniformly from `[min_delay, timeout]`.  Every
//! round sends the same datagram from every socket.
//!
//! ```text
//! t=0        t=d1          t=d2                    t=timeout
//! │ send ×N  │ send ×N     │ send ×N               │ session closes
//! ```
//!
//! A failed send on one socket is logged and skipped; the other sockets and
//! later rounds are unaffected.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::socket_pool::{is_closed_error, BoundSocket};

/// Counters reported when the schedule finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmitReport {
    /// Rounds that ran (cancelled rounds are not counted).
    pub rounds: usize,
    /// Datagrams handed to the OS across all sockets and rounds.
    pub datagrams_sent: usize,
    /// Sends that failed.
    pub send_failures: usize,
}

/// Computes the send offsets, relative to the start of transmission.
///
/// The first offset is always zero.  The others are uniform in
/// `[min_delay, timeout]` (or exactly `min_delay` when the timeout is
/// shorter), in milliseconds, returned in ascending order.  Durations past
/// `u64::MAX` milliseconds saturate.
pub fn schedule(timeout: Duration, resend_count: usize, min_delay: Duration) -> Vec<Duration> {
    let min_ms = u64::try_from(min_delay.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(timeout.as_millis())
        .unwrap_or(u64::MAX)
        .max(min_ms);
    let mut rng = rand::rng();

    let mut delays = Vec::with_capacity(resend_count + 1);
    delays.push(Duration::ZERO);
    for _ in 0..resend_count {
        delays.push(Duration::from_millis(rng.random_range(min_ms..=max_ms)));
    }
    delays.sort();
    delays
}

/// Runs the schedule until it completes or `cancel` fires.
pub async fn transmit(
    sockets: Vec<BoundSocket>,
    payload: Arc<[u8]>,
    target: SocketAddr,
    delays: Vec<Duration>,
    cancel: CancellationToken,
) -> TransmitReport {
    let start = Instant::now();
    let mut report = TransmitReport::default();

    for delay in delays {
        let Some(at) = start.checked_add(delay) else {
            debug!("send offset {delay:?} is beyond the clock, ending schedule");
            break;
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("transmission cancelled after {} round(s)", report.rounds);
                return report;
            }
            _ = sleep_until(at) => {}
        }
        send_round(&sockets, &payload, target, &mut report);
        report.rounds += 1;
    }

    debug!(
        "transmission finished: {} round(s), {} datagram(s)",
        report.rounds, report.datagrams_sent
    );
    report
}

/// Sends the payload once from every socket.
fn send_round(
    sockets: &[BoundSocket],
    payload: &[u8],
    target: SocketAddr,
    report: &mut TransmitReport,
) {
    for socket in sockets {
        match socket.send_to(payload, target) {
            Ok(_) => {
                report.datagrams_sent += 1;
                info!("sent discovery datagram to {target} from {}", socket.local_addr());
            }
            Err(e) if is_closed_error(&e) => {
                report.send_failures += 1;
                debug!(
                    "socket {} closed, skipping datagram to {target}",
                    socket.local_addr()
                );
            }
            Err(e) => {
                report.send_failures += 1;
                warn!(
                    "failed to send discovery datagram to {target} from {}: {e}",
                    socket.local_addr()
                );
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
