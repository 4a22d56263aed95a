//! Per-socket receive loop.
//!
//! Every bound socket gets its own OS thread running a blocking `recv_from`
//! loop, so one slow or silent interface never stalls another.  Each datagram
//! is wrapped with its sender address into a [`DiscoveryResponse`] and pushed
//! into the session's bounded channel.
//!
//! # Read timeout
//!
//! The socket is configured with a short read timeout (250 ms by default).
//! A timeout is not an error: it is the moment the loop checks whether its
//! socket was closed or its deadline passed.  Closing the socket is how the
//! session stops a receiver.
//!
//! # Backpressure
//!
//! The loop never blocks on a full channel, because while it is blocked the
//! kernel would silently drop datagrams arriving on the socket.  Instead it
//! keeps undelivered responses in a local FIFO queue and retries delivery on
//! every iteration.  If the queue grows past `max_pending` the receiver stops
//! with [`DiscoveryError::Overflow`], so a stalled consumer learns that data
//! was lost instead of losing it silently.
//!
//! When the loop ends gracefully (socket closed or deadline passed) nothing
//! more can arrive, so the queue is handed over with blocking sends.  Only a
//! consumer that has gone away cuts that short.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::thread::JoinHandle;
use std::time::Instant;

use beacon_core::{DiscoveryError, DiscoveryResponse};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, trace};

use super::is_timeout_error;
use super::socket_pool::{is_closed_error, BoundSocket};

/// Settings for one receive loop.
#[derive(Debug, Clone, Copy)]
pub struct ReceiverConfig {
    /// Size of the reusable receive buffer; longer datagrams are truncated.
    pub buffer_size: usize,
    /// Most responses buffered locally while the channel is full.
    pub max_pending: usize,
    /// Optional instant after which the loop ends gracefully.
    pub deadline: Option<Instant>,
}

/// Why a receive loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverExit {
    /// The socket was closed (normal session shutdown).
    Closed,
    /// The configured deadline passed.
    DeadlinePassed,
    /// The consumer dropped the response channel.
    ConsumerGone,
}

/// Starts the receive loop for `socket` on a dedicated thread.
///
/// A fatal error is sent on `faults` before the thread ends.  The socket is
/// closed when the loop ends, whatever the reason.
///
/// # Errors
///
/// Returns [`DiscoveryError::Runtime`] if the thread cannot be spawned.
pub fn spawn_receiver(
    socket: BoundSocket,
    sink: mpsc::Sender<DiscoveryResponse>,
    faults: mpsc::UnboundedSender<DiscoveryError>,
    config: ReceiverConfig,
) -> Result<JoinHandle<Option<ReceiverExit>>, DiscoveryError> {
    let local = socket.local_addr();
    std::thread::Builder::new()
        .name(format!("beacon-rx-{local}"))
        .spawn(move || {
            let result = receive_loop(&socket, &sink, &config);
            socket.close();
            match result {
                Ok(exit) => {
                    debug!("receiver on {local} stopped: {exit:?}");
                    Some(exit)
                }
                Err(e) => {
                    error!("receiver on {local} failed: {e}");
                    let _ = faults.send(e);
                    None
                }
            }
        })
        .map_err(|e| DiscoveryError::Runtime(format!("failed to spawn receiver thread: {e}")))
}

/// The blocking receive loop executed on a receiver thread.
///
/// # Errors
///
/// Returns [`DiscoveryError::Receive`] for unexpected socket errors and
/// [`DiscoveryError::Overflow`] when the local queue exceeds `max_pending`.
pub fn receive_loop(
    socket: &BoundSocket,
    sink: &mpsc::Sender<DiscoveryResponse>,
    config: &ReceiverConfig,
) -> Result<ReceiverExit, DiscoveryError> {
    let mut pending: VecDeque<DiscoveryResponse> = VecDeque::new();
    let exit = receive_into(socket, sink, config, &mut pending)?;
    if exit != ReceiverExit::ConsumerGone && !drain(&mut pending, sink) {
        return Ok(ReceiverExit::ConsumerGone);
    }
    Ok(exit)
}

fn receive_into(
    socket: &BoundSocket,
    sink: &mpsc::Sender<DiscoveryResponse>,
    config: &ReceiverConfig,
    pending: &mut VecDeque<DiscoveryResponse>,
) -> Result<ReceiverExit, DiscoveryError> {
    let local = socket.local_addr();
    let mut buf = vec![0u8; config.buffer_size.max(1)];

    loop {
        if !flush(pending, sink) {
            return Ok(ReceiverExit::ConsumerGone);
        }
        if config.deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(ReceiverExit::DeadlinePassed);
        }

        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                trace!("received {len} bytes on {local} from {from}");
                pending.push_back(DiscoveryResponse::new(&buf[..len], from));
                if !flush(pending, sink) {
                    return Ok(ReceiverExit::ConsumerGone);
                }
                if pending.len() > config.max_pending {
                    return Err(DiscoveryError::Overflow {
                        addr: local,
                        pending: pending.len(),
                    });
                }
            }
            Err(e) if is_closed_error(&e) => return Ok(ReceiverExit::Closed),
            Err(e) if is_timeout_error(&e) => continue,
            // Windows reports ICMP port-unreachable for earlier sends here.
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!("ignoring connection reset on {local}");
                continue;
            }
            Err(e) => return Err(receive_error(local, e)),
        }
    }
}

fn receive_error(addr: SocketAddr, source: std::io::Error) -> DiscoveryError {
    DiscoveryError::Receive { addr, source }
}

/// Moves queued responses into the channel until it is full.
///
/// Returns `false` once the consumer has gone away.
fn flush(pending: &mut VecDeque<DiscoveryResponse>, sink: &mpsc::Sender<DiscoveryResponse>) -> bool {
    while let Some(response) = pending.pop_front() {
        match sink.try_send(response) {
            Ok(()) => {}
            Err(TrySendError::Full(response)) => {
                pending.push_front(response);
                return true;
            }
            Err(TrySendError::Closed(_)) => return false,
        }
    }
    true
}

/// Hands every queued response to the channel, waiting for room.
///
/// Must run on a plain thread, never inside the async runtime.  Returns
/// `false` once the consumer has gone away.
fn drain(pending: &mut VecDeque<DiscoveryResponse>, sink: &mpsc::Sender<DiscoveryResponse>) -> bool {
    if !pending.is_empty() {
        debug!("delivering {} queued response(s) after receive ended", pending.len());
    }
    while let Some(response) = pending.pop_front() {
        if sink.blocking_send(response).is_err() {
            return false;
        }
    }
    true
}

// ── Tests ─────────────────────────────────────────────────────────────────────
