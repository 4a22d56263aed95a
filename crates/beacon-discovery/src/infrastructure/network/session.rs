//! One multicast discovery run.
//!
//! A [`DiscoverySession`] validates the request, binds one socket per local
//! interface, starts a receiver thread per socket and the transmitter task, and
//! hands back a [`DiscoveryStream`] that yields every response until the run
//! ends.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──► SocketsBinding ──► Active ──► Draining ──► Closed
//!              │                 │
//!              │ (no sockets)    ├─ listening window elapsed
//!              └──► Closed       ├─ consumer cancelled / dropped the stream
//!                                └─ receiver or transmitter fault
//! ```
//!
//! The listening window starts when transmission starts, not when the session
//! was created.  Whichever terminal event comes first wins; the supervisor
//! task then closes every socket exactly once, which ends every receiver loop.
//! A guard owned by the supervisor closes the sockets as well if the task
//! panics or is dropped by a shutting-down runtime.
//!
//! # Fan-in
//!
//! ```text
//! receiver thread (socket 1) ─┐
//! receiver thread (socket 2) ─┼─► bounded channel ─► DiscoveryStream::recv()
//! receiver thread (socket N) ─┘
//!            ▲      faults ──► supervisor ── closes all sockets
//!            │                     ▲
//!            └── transmitter task ─┘ (shares the cancellation token)
//! ```
//!
//! Responses are not de-duplicated; decoders that want that use
//! `beacon_core::Distinct`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use beacon_core::{DiscoveryError, DiscoveryRequest, DiscoveryResponse};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::interfaces::{InterfaceSource, SystemInterfaces};
use super::receiver::{spawn_receiver, ReceiverConfig, ReceiverExit};
use super::socket_pool::{bind_all, close_all, BoundSocket, SocketOptions};
use super::transmitter::{schedule, transmit, TransmitReport};

/// Tunables of a discovery run that are not part of the request itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Settings applied to every bound socket.
    pub socket: SocketOptions,
    /// Retransmissions after the immediate first send.
    pub resend_count: usize,
    /// Lower bound of the randomised retransmission delay.
    pub min_resend_delay: Duration,
    /// Capacity of the channel between receivers and the consumer.
    pub channel_capacity: usize,
    /// Responses a receiver may queue while the channel is full.
    pub max_pending: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            socket: SocketOptions::default(),
            resend_count: 2,
            min_resend_delay: Duration::from_millis(200),
            channel_capacity: 256,
            max_pending: 1024,
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing started.
    Idle,
    /// Request validated, sockets being created and bound.
    SocketsBinding,
    /// Receivers and transmitter running.
    Active,
    /// A terminal event occurred; sockets are being closed.
    Draining,
    /// Every socket is closed.
    Closed,
}

/// Starts a discovery run for `request` on every usable local interface.
///
/// # Errors
///
/// See [`DiscoverySession::start`].
pub async fn discover(request: DiscoveryRequest) -> Result<DiscoveryStream, DiscoveryError> {
    DiscoverySession::new(request).start().await
}

/// Builder for one discovery run.
pub struct DiscoverySession<S = SystemInterfaces> {
    request: DiscoveryRequest,
    options: SessionOptions,
    interfaces: S,
}

impl DiscoverySession<SystemInterfaces> {
    /// Creates a session that binds every usable interface of this host.
    pub fn new(request: DiscoveryRequest) -> Self {
        Self::with_interfaces(request, SystemInterfaces)
    }
}

impl<S: InterfaceSource> DiscoverySession<S> {
    /// Creates a session that binds the addresses reported by `interfaces`.
    pub fn with_interfaces(request: DiscoveryRequest, interfaces: S) -> Self {
        Self {
            request,
            options: SessionOptions::default(),
            interfaces,
        }
    }

    /// Replaces the session options.
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Binds the sockets, starts receiving and transmitting, and returns the
    /// response stream.
    ///
    /// When no interface is usable the returned stream is already complete.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidMulticastAddress`] or
    /// [`DiscoveryError::InvalidTimeout`] before any socket is created, and
    /// [`DiscoveryError::Runtime`] if a worker thread cannot be started (all
    /// sockets bound so far are closed first).
    pub async fn start(self) -> Result<DiscoveryStream, DiscoveryError> {
        let span = info_span!(
            "discovery",
            group = %self.request.multicast_address,
            port = self.request.port
        );
        self.run().instrument(span).await
    }

    async fn run(self) -> Result<DiscoveryStream, DiscoveryError> {
        let DiscoverySession {
            request,
            options,
            interfaces,
        } = self;
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        // ── Idle → SocketsBinding ─────────────────────────────────────────────
        let target = SocketAddr::V4(request.validate()?);
        set_state(&state_tx, SessionState::SocketsBinding);

        let addresses = interfaces.local_addresses();
        let socket_options = options.socket;
        let bound = tokio::task::spawn_blocking(move || bind_all(&addresses, &socket_options))
            .await
            .map_err(|e| DiscoveryError::Runtime(format!("socket binding task failed: {e}")))?;
        let sockets = match bound {
            Ok(sockets) if sockets.is_empty() => {
                info!("no usable network interface; discovery completes empty");
                set_state(&state_tx, SessionState::Closed);
                return Ok(DiscoveryStream::empty(state_rx));
            }
            Ok(sockets) => sockets,
            Err(DiscoveryError::NoUsableInterface) => {
                warn!("{}; discovery completes empty", DiscoveryError::NoUsableInterface);
                set_state(&state_tx, SessionState::Closed);
                return Ok(DiscoveryStream::empty(state_rx));
            }
            Err(e) => return Err(e),
        };

        // ── SocketsBinding → Active ───────────────────────────────────────────
        let guard = CloseGuard(sockets.clone());
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let receiver_config = ReceiverConfig {
            buffer_size: request.max_response_size,
            max_pending: options.max_pending,
            deadline: None,
        };

        let mut receivers = Vec::with_capacity(sockets.len());
        for socket in &sockets {
            let handle =
                spawn_receiver(socket.clone(), tx.clone(), fault_tx.clone(), receiver_config)?;
            receivers.push(handle);
        }
        // Only the receivers hold senders now, so the channel closes once
        // every receiver has ended.
        drop(tx);
        drop(fault_tx);

        let cancel = CancellationToken::new();
        let delays = schedule(request.timeout, options.resend_count, options.min_resend_delay);
        // Dropping the guard on this error closes the sockets and ends the
        // receivers.
        let deadline = Instant::now()
            .checked_add(request.timeout)
            .ok_or(DiscoveryError::InvalidTimeout)?;
        let transmitter = tokio::spawn(
            transmit(
                sockets.clone(),
                Arc::from(request.payload.as_slice()),
                target,
                delays,
                cancel.child_token(),
            )
            .in_current_span(),
        );
        set_state(&state_tx, SessionState::Active);
        info!(
            "discovery active on {} socket(s) for {:?}",
            sockets.len(),
            request.timeout
        );

        let local_addrs = sockets.iter().map(BoundSocket::local_addr).collect();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let supervisor = Supervisor {
            guard,
            cancel: cancel.clone(),
            deadline,
            faults: fault_rx,
            transmitter,
            receivers,
            state: state_tx,
        };
        tokio::spawn(
            async move {
                let outcome = supervisor.run().await;
                let _ = outcome_tx.send(outcome);
            }
            .in_current_span(),
        );

        Ok(DiscoveryStream {
            responses: rx,
            outcome: Some(outcome_rx),
            cancel,
            local_addrs,
            state: state_rx,
            finished: false,
        })
    }
}

fn set_state(state: &watch::Sender<SessionState>, next: SessionState) {
    let prev = state.send_replace(next);
    debug!("session state {prev:?} → {next:?}");
}

/// Closes every socket when dropped.
struct CloseGuard(Vec<BoundSocket>);

impl CloseGuard {
    fn close(&self) -> usize {
        close_all(&self.0)
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        let closed = self.close();
        if closed > 0 {
            debug!("close guard released {closed} socket(s)");
        }
    }
}

/// Owns the sockets of an active run and ends it on the first terminal event.
struct Supervisor {
    guard: CloseGuard,
    cancel: CancellationToken,
    deadline: Instant,
    faults: mpsc::UnboundedReceiver<DiscoveryError>,
    transmitter: tokio::task::JoinHandle<TransmitReport>,
    receivers: Vec<JoinHandle<Option<ReceiverExit>>>,
    state: watch::Sender<SessionState>,
}

impl Supervisor {
    /// Returns the fault that ended the run, if any.
    async fn run(mut self) -> Option<DiscoveryError> {
        let mut transmitter_done = false;

        // ── Active ────────────────────────────────────────────────────────────
        let fault = loop {
            tokio::select! {
                biased;
                Some(fault) = self.faults.recv() => break Some(fault),
                joined = &mut self.transmitter, if !transmitter_done => {
                    transmitter_done = true;
                    if let Some(fault) = transmitter_fault(joined) {
                        break Some(fault);
                    }
                }
                _ = self.cancel.cancelled() => {
                    debug!("discovery cancelled by consumer");
                    break None;
                }
                _ = sleep_until(self.deadline) => {
                    info!("discovery window elapsed");
                    break None;
                }
            }
        };

        // ── Draining ──────────────────────────────────────────────────────────
        set_state(&self.state, SessionState::Draining);
        if let Some(fault) = &fault {
            error!("discovery aborted: {fault}");
        }
        self.cancel.cancel();
        let closed = self.guard.close();
        debug!("closed {closed} socket(s)");

        if !transmitter_done {
            if let Some(late) = transmitter_fault((&mut self.transmitter).await) {
                warn!("transmitter failed while draining: {late}");
            }
        }
        let receivers = std::mem::take(&mut self.receivers);
        let joined = tokio::task::spawn_blocking(move || {
            receivers
                .into_iter()
                .map(|handle| handle.join().ok().flatten())
                .collect::<Vec<_>>()
        })
        .await;
        match joined {
            Ok(exits) => debug!("receivers stopped: {exits:?}"),
            Err(e) => warn!("failed to join receiver threads: {e}"),
        }

        // ── Closed ────────────────────────────────────────────────────────────
        set_state(&self.state, SessionState::Closed);
        fault
    }
}

/// Maps a finished transmitter task to a fault, if it ended abnormally.
fn transmitter_fault(
    joined: Result<TransmitReport, tokio::task::JoinError>,
) -> Option<DiscoveryError> {
    match joined {
        Ok(report) => {
            debug!("transmitter finished: {report:?}");
            None
        }
        Err(e) if e.is_panic() => Some(DiscoveryError::Transmission(format!(
            "transmitter panicked: {e}"
        ))),
        Err(_) => None,
    }
}

/// Response stream of one discovery run.
///
/// Dropping the stream cancels the run.
pub struct DiscoveryStream {
    responses: mpsc::Receiver<DiscoveryResponse>,
    outcome: Option<oneshot::Receiver<Option<DiscoveryError>>>,
    cancel: CancellationToken,
    local_addrs: Vec<SocketAddr>,
    state: watch::Receiver<SessionState>,
    finished: bool,
}

impl DiscoveryStream {
    /// An already-completed stream with no responses.
    fn empty(state: watch::Receiver<SessionState>) -> Self {
        let (_, responses) = mpsc::channel(1);
        Self {
            responses,
            outcome: None,
            cancel: CancellationToken::new(),
            local_addrs: Vec::new(),
            state,
            finished: true,
        }
    }

    /// Waits for the next response.
    ///
    /// Returns `None` once the run has ended normally (window elapsed or
    /// cancelled).  A run ended by a fault yields `Some(Err(_))` once, then
    /// `None`.
    pub async fn recv(&mut self) -> Option<Result<DiscoveryResponse, DiscoveryError>> {
        if self.finished {
            return None;
        }
        if let Some(response) = self.responses.recv().await {
            return Some(Ok(response));
        }

        // Every receiver has ended; make sure the supervisor does not keep
        // waiting for the window, then collect its verdict.
        self.finished = true;
        self.cancel.cancel();
        let outcome = self.outcome.take()?;
        outcome.await.ok().flatten().map(Err)
    }

    /// Ends the run now.  No response is yielded after this call.
    pub fn cancel(&mut self) {
        self.finished = true;
        self.responses.close();
        self.cancel.cancel();
    }

    /// Drains the stream into a vector.
    ///
    /// # Errors
    ///
    /// Returns the fault that ended the run, if any.
    pub async fn collect(mut self) -> Result<Vec<DiscoveryResponse>, DiscoveryError> {
        let mut responses = Vec::new();
        while let Some(item) = self.recv().await {
            responses.push(item?);
        }
        Ok(responses)
    }

    /// Addresses of the sockets bound for this run.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Current lifecycle state of the run.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Waits until the run has released all of its sockets.
    pub async fn closed(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state == SessionState::Closed)
            .await;
    }
}

impl Drop for DiscoveryStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::interfaces::StaticInterfaces;
    use std::net::{Ipv4Addr, UdpSocket};

    fn loopback_session(request: DiscoveryRequest) -> DiscoverySession<StaticInterfaces> {
        DiscoverySession::with_interfaces(request, StaticInterfaces(vec![Ipv4Addr::LOCALHOST]))
    }

    fn request(timeout: Duration) -> DiscoveryRequest {
        DiscoveryRequest::new("PING").with_timeout(timeout)
    }

    #[tokio::test]
    async fn test_start_rejects_unicast_target_before_binding() {
        // Arrange
        let req = request(Duration::from_secs(1)).with_target("10.1.2.3", 1900);

        // Act
        let result = loopback_session(req).start().await;

        // Assert
        assert!(matches!(
            result,
            Err(DiscoveryError::InvalidMulticastAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_no_interfaces_yields_empty_completed_stream() {
        // Arrange
        let session =
            DiscoverySession::with_interfaces(request(Duration::from_secs(5)), StaticInterfaces::default());

        // Act
        let mut stream = session.start().await.expect("start");

        // Assert
        assert!(stream.recv().await.is_none());
        assert_eq!(stream.state(), SessionState::Closed);
        assert!(stream.local_addrs().is_empty());
    }

    #[tokio::test]
    async fn test_all_binds_failing_yields_empty_stream() {
        // Arrange
        let session = DiscoverySession::with_interfaces(
            request(Duration::from_secs(5)),
            StaticInterfaces(vec![Ipv4Addr::new(192, 0, 2, 1)]),
        );

        // Act
        let stream = session.start().await.expect("start");

        // Assert
        assert!(stream.collect().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_ends_after_timeout_without_responses() {
        // Arrange: a short poll interval keeps socket shutdown quick.
        let options = SessionOptions {
            socket: SocketOptions {
                read_timeout: Duration::from_millis(50),
                ..Default::default()
            },
            ..Default::default()
        };
        let started = std::time::Instant::now();

        // Act
        let mut stream = loopback_session(request(Duration::from_secs(1)))
            .with_options(options)
            .start()
            .await
            .expect("start");
        assert_eq!(stream.state(), SessionState::Active);
        let next = stream.recv().await;

        // Assert
        assert!(next.is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(950), "ended early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1300), "ended late: {elapsed:?}");
        stream.closed().await;
        assert_eq!(stream.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_start_rejects_timeout_beyond_the_clock() {
        // Arrange
        let req = request(Duration::from_secs(u64::MAX));

        // Act
        let result = loopback_session(req).start().await;

        // Assert
        assert!(matches!(result, Err(DiscoveryError::InvalidTimeout)));
    }

    #[tokio::test]
    async fn test_responses_queued_behind_slow_consumer_survive_window_end() {
        // Arrange: the channel holds two, the receiver queues the rest.
        let options = SessionOptions {
            channel_capacity: 2,
            max_pending: 100,
            ..Default::default()
        };
        let stream = loopback_session(request(Duration::from_secs(1)))
            .with_options(options)
            .start()
            .await
            .expect("start");
        let local = stream.local_addrs()[0];
        let responder = UdpSocket::bind("127.0.0.1:0").unwrap();

        // Act: nobody reads until the window has closed.
        for i in 0..20u8 {
            responder.send_to(&[i], local).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let responses = stream.collect().await.expect("no fault");

        // Assert
        let order: Vec<u8> = responses.iter().map(|r| r.data[0]).collect();
        assert_eq!(order, (0..20).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_unicast_reply_is_delivered() {
        // Arrange
        let mut stream = loopback_session(request(Duration::from_secs(1)))
            .start()
            .await
            .expect("start");
        let responder = UdpSocket::bind("127.0.0.1:0").unwrap();
        let local = stream.local_addrs()[0];

        // Act
        responder.send_to(b"PONG", local).unwrap();
        let first = stream.recv().await;

        // Assert
        let response = first.expect("one response").expect("not an error");
        assert_eq!(response.data, b"PONG");
        assert_eq!(response.sender, responder.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_cancel_closes_stream_and_stops_responses() {
        // Arrange
        let mut stream = loopback_session(request(Duration::from_secs(30)))
            .start()
            .await
            .expect("start");
        let local = stream.local_addrs()[0];
        let started = std::time::Instant::now();

        // Act
        stream.cancel();
        let responder = UdpSocket::bind("127.0.0.1:0").unwrap();
        let _ = responder.send_to(b"LATE", local);

        // Assert
        assert!(stream.recv().await.is_none());
        tokio::time::timeout(Duration::from_secs(2), stream.closed())
            .await
            .expect("sockets must close promptly");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_drop_cancels_run() {
        // Arrange
        let stream = loopback_session(request(Duration::from_secs(30)))
            .start()
            .await
            .expect("start");
        let mut state = stream.state.clone();

        // Act
        drop(stream);

        // Assert
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == SessionState::Closed),
        )
        .await
        .expect("dropping the stream must close the session")
        .expect("state sender alive until closed");
    }

    #[tokio::test]
    async fn test_receiver_overflow_surfaces_as_terminal_error() {
        // Arrange: a tiny channel and no local queue.
        let options = SessionOptions {
            channel_capacity: 1,
            max_pending: 0,
            ..Default::default()
        };
        let mut stream = loopback_session(request(Duration::from_secs(5)))
            .with_options(options)
            .start()
            .await
            .expect("start");
        let local = stream.local_addrs()[0];
        let responder = UdpSocket::bind("127.0.0.1:0").unwrap();

        // Act – flood without reading.
        for _ in 0..16 {
            responder.send_to(b"x", local).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut items = Vec::new();
        while let Some(item) = stream.recv().await {
            items.push(item);
        }

        // Assert
        assert!(matches!(items.first(), Some(Ok(_))));
        assert!(matches!(
            items.last(),
            Some(Err(DiscoveryError::Overflow { .. }))
        ));
    }
}
