//! Custom runtime for readiness-driven networking.
//!
//! Each reactor is single-threaded and owns its listener, its poller and
//! every connection it accepted; nothing is shared between reactors except
//! the shutdown flag. With more than one worker, each reactor binds the same
//! address with `SO_REUSEPORT` and the kernel spreads connections across
//! them.
//!
//! Shared pieces:
//! - `OutputBuffer`: transformed bytes awaiting a write
//! - `Connection`: per-client state machine
//! - `ConnectionTable`: stable ids for live connections
//! - `Listener`: bind, listen, accept draining
//! - `ShutdownSignal`: process-wide termination flag

mod buffer;
mod connection;
mod listener;
mod mio_impl;
mod shutdown;
mod table;

pub use shutdown::ShutdownSignal;

use listener::Listener;
use mio_impl::EventLoop;

use crate::config::Config;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use tracing::{error, info};

/// Bind every worker's listener, then run the reactors until shutdown.
///
/// Binding happens before any reactor starts, so an unusable address fails
/// the whole call instead of a single worker.
pub fn run(config: Config, shutdown: ShutdownSignal) -> io::Result<()> {
    let requested = resolve(&config.listen_addr())?;
    let reuse_port = config.workers > 1;

    let mut reactors = Vec::with_capacity(config.workers);
    let mut addr = requested;
    for worker_id in 0..config.workers {
        let listener = Listener::bind_and_listen(addr, config.backlog, reuse_port)?;
        // Port 0 resolves on the first bind; the rest share that port.
        addr = listener.local_addr();
        reactors.push(EventLoop::new(worker_id, &config, listener, shutdown.clone())?);
    }

    info!(
        addr = %addr,
        workers = config.workers,
        transform = ?config.transform,
        "Listening"
    );

    if reactors.len() == 1 {
        return reactors[0].run();
    }

    let mut handles = Vec::with_capacity(reactors.len());
    for (worker_id, mut reactor) in reactors.into_iter().enumerate() {
        let handle = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || reactor.run())?;
        handles.push((worker_id, handle));
    }

    let mut result = Ok(());
    for (worker_id, handle) in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(worker = worker_id, error = %e, "Worker failed");
                // Take the other workers down with it.
                shutdown.trigger();
                if result.is_ok() {
                    result = Err(e);
                }
            }
            Err(_) => {
                error!(worker = worker_id, "Worker panicked");
                shutdown.trigger();
                if result.is_ok() {
                    result = Err(io::Error::new(io::ErrorKind::Other, "worker panicked"));
                }
            }
        }
    }
    result
}

fn resolve(addr: &str) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{addr} did not resolve to an address"),
        )
    })
}
