//! Per-interface UDP sockets.
//!
//! One socket is created for every local address and bound to `addr:0`
//! (an ephemeral port).  Binding to a specific address, instead of
//! `0.0.0.0`, pins both the source address of outgoing multicast and the
//! interface unicast answers come back on.  The socket never binds the
//! protocol port (1900, 3702): devices answer the sender's ephemeral port, and
//! binding the well-known port would compete with local servers for traffic.
//!
//! Sockets are bound eagerly, before anything is transmitted, so a bind failure
//! surfaces before any irreversible network activity.
//!
//! # Closing
//!
//! A [`BoundSocket`] is shared between its receiver thread (reads) and the
//! transmitter (writes).  [`BoundSocket::close`] may be called by either of
//! them or by the session, concurrently and any number of times.  The first
//! call marks the socket closed and shuts it down so a `recv_from` blocked in
//! another thread returns; later calls do nothing.  The file descriptor itself
//! is released when the last clone is dropped.

use std::io;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::DiscoveryError;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::{debug, info, warn};

/// Socket-level settings applied to every bound socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Poll interval of the blocking receive; bounds how long a receiver takes
    /// to notice that its socket was closed.
    pub read_timeout: Duration,
    /// IP TTL of outgoing multicast datagrams.
    pub multicast_ttl: u32,
    /// Whether our own multicast is looped back to local listeners.
    pub multicast_loop: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(250),
            multicast_ttl: 4,
            multicast_loop: true,
        }
    }
}

#[derive(Debug)]
struct SocketHandle {
    interface: Ipv4Addr,
    local_addr: SocketAddr,
    socket: UdpSocket,
    closed: AtomicBool,
}

/// A UDP socket bound to one local interface address, owned by one session.
#[derive(Debug, Clone)]
pub struct BoundSocket {
    inner: Arc<SocketHandle>,
}

impl BoundSocket {
    /// Creates a socket and binds it to `interface` on an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::SocketBind`] if any step of socket setup fails.
    pub fn bind(interface: Ipv4Addr, options: &SocketOptions) -> Result<Self, DiscoveryError> {
        let addr = SocketAddrV4::new(interface, 0);
        let bind_err = |source: io::Error| DiscoveryError::SocketBind {
            addr: SocketAddr::V4(addr),
            source,
        };

        let socket =
            Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
        socket.set_multicast_if_v4(&interface).map_err(bind_err)?;
        socket
            .set_multicast_ttl_v4(options.multicast_ttl)
            .map_err(bind_err)?;
        socket
            .set_multicast_loop_v4(options.multicast_loop)
            .map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;

        let socket: UdpSocket = socket.into();
        socket
            .set_read_timeout(Some(options.read_timeout))
            .map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;

        info!("bound discovery socket on {local_addr}");
        Ok(Self {
            inner: Arc::new(SocketHandle {
                interface,
                local_addr,
                socket,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// The interface address this socket is bound to.
    pub fn interface(&self) -> Ipv4Addr {
        self.inner.interface
    }

    /// The bound address, including the OS-assigned port.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Sends one datagram to `target`.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::NotConnected` once the socket is closed, or the OS
    /// error of the send.
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        if self.is_closed() {
            return Err(closed_error());
        }
        self.inner.socket.send_to(buf, target)
    }

    /// Blocks for at most the configured read timeout waiting for a datagram.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::NotConnected` once the socket is closed, a
    /// timeout error when nothing arrived, or the OS error of the receive.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let result = self.inner.socket.recv_from(buf);
        // A close racing with the read wakes it with an empty or failed read.
        if self.is_closed() {
            return Err(closed_error());
        }
        result
    }

    /// Closes the socket.  Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Unconnected UDP sockets report ENOTCONN here even though the
        // shutdown still wakes blocked readers on Linux.
        if let Err(e) = SockRef::from(&self.inner.socket).shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                debug!("shutdown of {} failed: {e}", self.inner.local_addr);
            }
        }
        debug!("closed discovery socket on {}", self.inner.local_addr);
        true
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Returns `true` for the error [`BoundSocket`] reports after it was closed.
pub fn is_closed_error(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotConnected
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "discovery socket closed")
}

/// Binds one socket per address.
///
/// Addresses that fail to bind are logged and skipped.  An empty address list
/// yields an empty pool.
///
/// # Errors
///
/// Returns [`DiscoveryError::NoUsableInterface`] when there was at least one
/// candidate address and none of them could be bound.
pub fn bind_all(
    addresses: &[Ipv4Addr],
    options: &SocketOptions,
) -> Result<Vec<BoundSocket>, DiscoveryError> {
    let mut sockets = Vec::with_capacity(addresses.len());
    for &addr in addresses {
        match BoundSocket::bind(addr, options) {
            Ok(socket) => sockets.push(socket),
            Err(e) => warn!("{e}; excluding {addr} from discovery"),
        }
    }

    if sockets.is_empty() && !addresses.is_empty() {
        return Err(DiscoveryError::NoUsableInterface);
    }
    Ok(sockets)
}

/// Closes every socket in `sockets`; returns how many this call closed.
pub fn close_all(sockets: &[BoundSocket]) -> usize {
    sockets.iter().filter(|s| s.close()).count()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
