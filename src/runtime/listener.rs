//! Listening socket and accept draining.

use mio::net::{TcpListener, TcpStream};
use std::fs::File;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, error, warn};

/// Result of a single accept attempt.
#[derive(Debug)]
pub enum Accepted {
    /// A new non-blocking stream.
    Stream(TcpStream, SocketAddr),
    /// The backlog is empty.
    Drained,
}

/// Counters for one `accept_ready` drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AcceptSummary {
    pub accepted: usize,
    /// Pending connections closed because no descriptor was available.
    pub shed: usize,
    /// Per-connection accept failures that were skipped.
    pub failed: usize,
}

/// The bound, listening, non-blocking socket.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    /// Spare descriptor released when the process runs out, so a pending
    /// connection can be accepted and closed instead of sitting in the
    /// backlog.
    reserve: Option<File>,
}

impl Listener {
    /// Bind and listen on `addr`.
    ///
    /// `reuse_port` lets several reactors bind the same address and have the
    /// kernel spread connections between them.
    pub fn bind_and_listen(addr: SocketAddr, backlog: i32, reuse_port: bool) -> io::Result<Self> {
        let socket = socket2::Socket::new(
            match addr {
                SocketAddr::V4(_) => socket2::Domain::IPV4,
                SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        if reuse_port {
            socket.set_reuse_port(true)?;
        }
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;

        let inner = TcpListener::from_std(socket.into());
        let local_addr = inner.local_addr()?;

        Ok(Self {
            inner,
            local_addr,
            reserve: open_reserve(),
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn source_mut(&mut self) -> &mut TcpListener {
        &mut self.inner
    }

    /// Accept one pending connection. The stream comes back non-blocking.
    pub fn try_accept(&mut self) -> io::Result<Accepted> {
        loop {
            match self.inner.accept() {
                Ok((stream, peer)) => return Ok(Accepted::Stream(stream, peer)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Accepted::Drained)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Accept every pending connection, handing each to `on_accept`.
    ///
    /// Stops once the backlog is empty. Failures tied to one connection are
    /// logged and skipped; descriptor exhaustion sheds the pending
    /// connection; anything else ends the drain.
    pub fn accept_ready<F>(&mut self, mut on_accept: F) -> AcceptSummary
    where
        F: FnMut(TcpStream, SocketAddr),
    {
        let mut summary = AcceptSummary::default();

        if self.reserve.is_none() {
            self.reserve = open_reserve();
        }

        loop {
            match self.try_accept() {
                Ok(Accepted::Stream(stream, peer)) => {
                    summary.accepted += 1;
                    on_accept(stream, peer);
                }
                Ok(Accepted::Drained) => break,
                Err(ref e) if is_descriptor_exhaustion(e) => {
                    if self.reserve.is_none() {
                        warn!(error = %e, "Out of descriptors and no reserve, pausing accepts");
                        break;
                    }
                    if !self.shed_one() {
                        break;
                    }
                    summary.shed += 1;
                }
                Err(ref e) if is_connection_error(e) => {
                    debug!(error = %e, "Accept failed for one connection, skipping");
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Accept error");
                    break;
                }
            }
        }

        summary
    }

    /// Release the reserve, accept and close one pending connection, then
    /// take the reserve back. Returns whether a connection was closed.
    fn shed_one(&mut self) -> bool {
        if self.reserve.take().is_none() {
            return false;
        }

        let shed = match self.inner.accept() {
            Ok((stream, peer)) => {
                drop(stream);
                warn!(peer = %peer, "Descriptor limit reached, rejected connection");
                true
            }
            Err(e) => {
                debug!(error = %e, "Shedding accept failed");
                false
            }
        };

        self.reserve = open_reserve();
        if self.reserve.is_none() {
            error!("Could not reopen reserve descriptor, retrying on the next accept");
        }
        shed
    }
}

fn open_reserve() -> Option<File> {
    File::open("/dev/null").ok()
}

fn is_descriptor_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::PermissionDenied
    ) || matches!(e.raw_os_error(), Some(libc::EPROTO))
}
