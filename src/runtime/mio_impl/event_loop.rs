//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! mio notifications are edge-triggered, so every handler drains its socket
//! until the kernel reports "would block". A socket whose interest is
//! re-armed while it is still ready is reported again on the next poll,
//! which is what resumes a connection after a backpressure pause.
//!
//! ## Shutdown
//!
//! Once the shutdown flag is observed the listener is closed, every
//! connection stops reading, and connections with pending output get until
//! the drain deadline to flush it. Whatever is left after that is closed.

use crate::config::Config;
use crate::runtime::connection::{ConnSettings, Connection};
use crate::runtime::listener::Listener;
use crate::runtime::shutdown::ShutdownSignal;
use crate::runtime::table::{ConnId, ConnectionTable};
use mio::event::Event;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Registry, Token};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Longest gap between idle sweeps.
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Lifetime counters for one reactor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReactorStats {
    pub accepted: u64,
    /// Connections closed on accept (connection cap or no descriptors).
    pub rejected: u64,
    pub closed: u64,
    /// Connections closed because of an I/O error.
    pub errors: u64,
    /// Connections still draining when the shutdown deadline passed.
    pub forced: u64,
    pub idle_evicted: u64,
}

/// A single-threaded reactor owning one listener and its connections.
pub struct EventLoop {
    worker_id: usize,
    poll: Poll,
    events_capacity: usize,
    listener: Option<Listener>,
    connections: ConnectionTable,
    settings: ConnSettings,
    shutdown: ShutdownSignal,
    poll_timeout: Duration,
    drain_timeout: Duration,
    idle_timeout: Option<Duration>,
    /// Set once shutdown has begun.
    drain_deadline: Option<Instant>,
    last_sweep: Instant,
    stats: ReactorStats,
}

impl EventLoop {
    /// Create a reactor and register `listener` for accept readiness.
    pub fn new(
        worker_id: usize,
        config: &Config,
        mut listener: Listener,
        shutdown: ShutdownSignal,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(listener.source_mut(), LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            worker_id,
            poll,
            events_capacity: config.events_capacity,
            listener: Some(listener),
            connections: ConnectionTable::new(config.max_connections),
            settings: ConnSettings {
                read_chunk: config.read_chunk,
                high_watermark: config.high_watermark,
                low_watermark: config.low_watermark,
                transform: config.transform.resolve(),
            },
            shutdown,
            poll_timeout: config.poll_timeout,
            drain_timeout: config.drain_timeout,
            idle_timeout: config.idle_timeout,
            drain_deadline: None,
            last_sweep: Instant::now(),
            stats: ReactorStats::default(),
        })
    }

    /// Listening address, until shutdown closes the listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(Listener::local_addr)
    }

    pub fn stats(&self) -> ReactorStats {
        self.stats
    }

    pub fn live_connections(&self) -> usize {
        self.connections.live()
    }

    /// Run until shutdown is requested and the drain completes.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.events_capacity);

        info!(
            worker = self.worker_id,
            addr = ?self.local_addr(),
            transform = self.settings.transform.name(),
            "Reactor started"
        );

        while self.turn(&mut events)? {}

        info!(
            worker = self.worker_id,
            accepted = self.stats.accepted,
            rejected = self.stats.rejected,
            closed = self.stats.closed,
            errors = self.stats.errors,
            forced = self.stats.forced,
            "Reactor stopped"
        );
        Ok(())
    }

    /// One loop iteration: check shutdown, wait, dispatch, reap.
    ///
    /// Returns `false` once the loop should exit.
    pub fn turn(&mut self, events: &mut Events) -> io::Result<bool> {
        if self.drain_deadline.is_none() && self.shutdown.is_set() {
            self.begin_shutdown();
        }

        let timeout = match self.drain_deadline {
            Some(deadline) => {
                if self.connections.is_empty() {
                    return Ok(false);
                }
                let now = Instant::now();
                if now >= deadline {
                    self.force_close_all();
                    return Ok(false);
                }
                self.poll_timeout.min(deadline - now)
            }
            None => self.poll_timeout,
        };

        if let Err(e) = self.poll.poll(events, Some(timeout)) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(true);
            }
            return Err(e);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => self.accept(),
                Token(conn_id) => self.handle_connection_event(conn_id, event),
            }
        }

        self.connections.reap();

        if let Some(idle) = self.idle_timeout {
            if self.drain_deadline.is_none() {
                self.sweep_idle(idle);
            }
        }

        Ok(true)
    }

    fn accept(&mut self) {
        let Some(listener) = self.listener.as_mut() else {
            return;
        };
        let registry = self.poll.registry();
        let connections = &mut self.connections;
        let stats = &mut self.stats;
        let settings = self.settings;
        let worker = self.worker_id;

        let summary = listener.accept_ready(|stream, peer| {
            let Some(conn_id) = connections.insert(Connection::new(stream, settings, Some(peer)))
            else {
                stats.rejected += 1;
                warn!(worker, peer = %peer, "Connection limit reached, rejecting");
                return;
            };

            let Some(conn) = connections.get_mut(conn_id) else {
                return;
            };
            if let Err(e) = registry.register(conn.stream_mut(), Token(conn_id), Interest::READABLE)
            {
                warn!(worker, conn_id, error = %e, "Failed to register connection");
                conn.close();
                connections.schedule_reap(conn_id);
                stats.rejected += 1;
                return;
            }
            conn.set_registered(Some(Interest::READABLE));

            stats.accepted += 1;
            debug!(worker, conn_id, peer = %peer, "Accepted connection");
        });

        self.stats.rejected += summary.shed as u64;
        trace!(
            worker,
            accepted = summary.accepted,
            shed = summary.shed,
            failed = summary.failed,
            live = self.connections.live(),
            "Accept drain finished"
        );
    }

    fn handle_connection_event(&mut self, conn_id: ConnId, event: &Event) {
        let registry = self.poll.registry();

        let result = {
            // Already reaped, or closed earlier in this batch.
            let Some(conn) = self.connections.get_mut(conn_id) else {
                return;
            };
            if conn.is_closed() {
                return;
            }

            if event.is_error() {
                Err(socket_error(conn.stream_mut()))
            } else {
                let readable = event.is_readable() || event.is_read_closed();
                let writable = event.is_writable() || event.is_write_closed();
                service(conn, conn_id, readable, writable).and_then(|()| {
                    if conn.is_closed() {
                        Ok(false)
                    } else {
                        sync_interest(registry, conn_id, conn).map(|()| true)
                    }
                })
            }
        };

        match result {
            Ok(true) => {}
            Ok(false) => self.close_connection(conn_id),
            Err(e) => {
                debug!(worker = self.worker_id, conn_id, error = %e, "Connection error");
                self.stats.errors += 1;
                self.close_connection(conn_id);
            }
        }
    }

    /// Deregister, discard output, and queue the connection for removal.
    fn close_connection(&mut self, conn_id: ConnId) {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };

        let from = conn.state();
        let discarded = conn.pending_output();
        conn.close();
        if conn.registered().is_some() {
            let _ = self.poll.registry().deregister(conn.stream_mut());
            conn.set_registered(None);
        }
        debug!(
            worker = self.worker_id,
            conn_id,
            peer = ?conn.peer(),
            ?from,
            discarded,
            "Connection closed"
        );

        self.connections.schedule_reap(conn_id);
        self.stats.closed += 1;
    }

    fn begin_shutdown(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            let _ = self.poll.registry().deregister(listener.source_mut());
            info!(
                worker = self.worker_id,
                addr = %listener.local_addr(),
                "Stopped accepting connections"
            );
        }

        for conn_id in self.connections.ids() {
            let keep = match self.connections.get_mut(conn_id) {
                Some(conn) if !conn.is_closed() => {
                    conn.begin_shutdown();
                    !conn.is_closed() && sync_interest(self.poll.registry(), conn_id, conn).is_ok()
                }
                _ => continue,
            };
            if !keep {
                self.close_connection(conn_id);
            }
        }
        self.connections.reap();

        self.drain_deadline = Some(Instant::now() + self.drain_timeout);
        info!(
            worker = self.worker_id,
            draining = self.connections.live(),
            timeout_ms = self.drain_timeout.as_millis() as u64,
            "Shutdown requested"
        );
    }

    fn force_close_all(&mut self) {
        for conn_id in self.connections.ids() {
            if let Some(conn) = self.connections.get(conn_id) {
                if conn.is_closed() {
                    continue;
                }
                warn!(
                    worker = self.worker_id,
                    conn_id,
                    pending = conn.pending_output(),
                    "Drain deadline passed, closing"
                );
            }
            self.stats.forced += 1;
            self.close_connection(conn_id);
        }
        self.connections.reap();
    }

    fn sweep_idle(&mut self, idle: Duration) {
        let now = Instant::now();
        if now.saturating_duration_since(self.last_sweep) < idle.min(IDLE_SWEEP_INTERVAL) {
            return;
        }
        self.last_sweep = now;

        let expired: Vec<ConnId> = self
            .connections
            .ids()
            .into_iter()
            .filter(|&conn_id| {
                self.connections
                    .get(conn_id)
                    .is_some_and(|c| !c.is_closed() && c.idle_for(now) >= idle)
            })
            .collect();

        for conn_id in expired {
            debug!(worker = self.worker_id, conn_id, "Closing idle connection");
            self.stats.idle_evicted += 1;
            self.close_connection(conn_id);
        }
        self.connections.reap();
    }
}

/// Flush pending output, then drain input and flush what it produced.
///
/// Writing first frees room under the high watermark before reading more.
fn service(
    conn: &mut Connection<TcpStream>,
    conn_id: ConnId,
    readable: bool,
    writable: bool,
) -> io::Result<()> {
    if writable && conn.pending_output() > 0 {
        let outcome = conn.try_write()?;
        trace!(conn_id, ?outcome, "write");
    }

    if readable && conn.wants_read() {
        let outcome = conn.try_read()?;
        trace!(conn_id, ?outcome, "read");

        if conn.pending_output() > 0 {
            let outcome = conn.try_write()?;
            trace!(conn_id, ?outcome, "write");
        }
    }

    Ok(())
}

/// Bring the poller's interest in line with what the connection wants:
/// register, modify, or unregister as needed.
fn sync_interest(
    registry: &Registry,
    conn_id: ConnId,
    conn: &mut Connection<TcpStream>,
) -> io::Result<()> {
    let desired = conn.desired_interest();
    let rearm = conn.take_rearm_read();
    match (conn.registered(), desired) {
        (None, Some(interest)) => {
            registry.register(conn.stream_mut(), Token(conn_id), interest)?;
        }
        // Modifying even an unchanged interest makes the poller report
        // readiness the paused reads left behind.
        (Some(current), Some(interest)) if current != interest || rearm => {
            registry.reregister(conn.stream_mut(), Token(conn_id), interest)?;
        }
        (Some(_), None) => registry.deregister(conn.stream_mut())?,
        _ => {}
    }
    conn.set_registered(desired);
    Ok(())
}

fn socket_error(stream: &TcpStream) -> io::Error {
    match stream.take_error() {
        Ok(Some(e)) | Err(e) => e,
        Ok(None) => io::Error::new(io::ErrorKind::Other, "socket error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpStream as StdStream};
    use std::thread;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn test_config() -> Config {
        Config {
            poll_timeout: Duration::from_millis(20),
            ..Config::default()
        }
    }

    fn new_loop(config: &Config) -> (EventLoop, SocketAddr, ShutdownSignal) {
        let listener = Listener::bind_and_listen(loopback(), config.backlog, false).unwrap();
        let addr = listener.local_addr();
        let shutdown = ShutdownSignal::new();
        let event_loop = EventLoop::new(0, config, listener, shutdown.clone()).unwrap();
        (event_loop, addr, shutdown)
    }

    /// A reactor running on its own thread.
    struct TestServer {
        addr: SocketAddr,
        shutdown: ShutdownSignal,
        handle: Option<thread::JoinHandle<io::Result<EventLoop>>>,
    }

    impl TestServer {
        fn start(config: Config) -> Self {
            let (mut event_loop, addr, shutdown) = new_loop(&config);
            let handle = thread::spawn(move || event_loop.run().map(|()| event_loop));
            Self {
                addr,
                shutdown,
                handle: Some(handle),
            }
        }

        /// Signal shutdown and wait for the reactor to return.
        fn stop(mut self) -> (EventLoop, Duration) {
            let started = Instant::now();
            self.shutdown.trigger();
            let handle = self.handle.take().unwrap();
            let event_loop = handle.join().unwrap().unwrap();
            (event_loop, started.elapsed())
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            if let Some(handle) = self.handle.take() {
                self.shutdown.trigger();
                let _ = handle.join();
            }
        }
    }

    fn connect(addr: SocketAddr) -> StdStream {
        let stream = StdStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        stream.set_nodelay(true).unwrap();
        stream
    }

    /// Send `payload` from a second thread while reading the echo here.
    fn round_trip(addr: SocketAddr, payload: Vec<u8>) -> Vec<u8> {
        let mut stream = connect(addr);
        let mut writer = stream.try_clone().unwrap();
        let len = payload.len();
        let sender = thread::spawn(move || writer.write_all(&payload).unwrap());

        let mut received = vec![0u8; len];
        stream.read_exact(&mut received).unwrap();
        sender.join().unwrap();
        received
    }

    #[test]
    fn test_hello_world() {
        let server = TestServer::start(test_config());
        let mut stream = connect(server.addr);

        stream.write_all(b"hello world").unwrap();
        let mut buf = [0u8; 11];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"HELLO WORLD");
    }

    #[test]
    fn test_one_mib_unchanged() {
        let server = TestServer::start(test_config());
        let payload = vec![b'X'; 1024 * 1024];
        let received = round_trip(server.addr, payload.clone());
        assert_eq!(received.len(), payload.len());
        assert!(received == payload);
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let server = TestServer::start(test_config());
        let mut stream = connect(server.addr);

        for b in b"ABCDEFGHIJKLMNOPQRSTUVWXYZ" {
            stream.write_all(&[*b]).unwrap();
            thread::sleep(Duration::from_millis(5));
        }

        let mut buf = [0u8; 26];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ABCDEFGHIJKLMNOPQRSTUVWXYZ");
    }

    #[test]
    fn test_fragmented_reads_and_writes() {
        let server = TestServer::start(test_config());
        let payload: Vec<u8> = (0..200_000u32).map(|i| b"abcXYZ019 \n"[(i % 11) as usize]).collect();
        let expected: Vec<u8> = payload.iter().map(|b| b.to_ascii_uppercase()).collect();

        let mut stream = connect(server.addr);
        let mut writer = stream.try_clone().unwrap();
        let sender = thread::spawn(move || {
            for (i, chunk) in payload.chunks(997).enumerate() {
                writer.write_all(chunk).unwrap();
                if i % 50 == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        });

        let mut received = Vec::with_capacity(expected.len());
        let mut buf = [0u8; 333];
        while received.len() < expected.len() {
            let n = stream.read(&mut buf).unwrap();
            assert_ne!(n, 0, "unexpected EOF");
            received.extend_from_slice(&buf[..n]);
        }
        sender.join().unwrap();
        assert!(received == expected);
    }

    #[test]
    fn test_backpressure_preserves_stream() {
        let config = Config {
            high_watermark: 64 * 1024,
            low_watermark: 16 * 1024,
            read_chunk: 4096,
            ..test_config()
        };
        let server = TestServer::start(config);

        let payload: Vec<u8> = (0..1024 * 1024u32).map(|i| b'a' + (i % 26) as u8).collect();
        let expected: Vec<u8> = payload.iter().map(|b| b.to_ascii_uppercase()).collect();
        assert!(round_trip(server.addr, payload) == expected);
    }

    #[test]
    fn test_paused_input_resumes_without_new_data() {
        let config = Config {
            high_watermark: 16,
            low_watermark: 8,
            read_chunk: 4,
            ..test_config()
        };
        let server = TestServer::start(config);

        // One send, then nothing: every byte past the first pause must be
        // picked up without a fresh readiness edge from the client.
        let mut stream = connect(server.addr);
        stream
            .set_read_timeout(Some(Duration::from_secs(3)))
            .unwrap();
        stream.write_all(&[b'a'; 100]).unwrap();

        let mut received = [0u8; 100];
        stream.read_exact(&mut received).unwrap();
        assert!(received.iter().all(|&b| b == b'A'));
    }

    #[test]
    fn test_half_close_drains_then_closes() {
        let server = TestServer::start(test_config());
        let mut stream = connect(server.addr);

        stream.write_all(b"last words").unwrap();
        stream.shutdown(Shutdown::Write).unwrap();

        let mut received = Vec::new();
        stream.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"LAST WORDS");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_hundred_concurrent_clients() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let server = TestServer::start(test_config());
        let addr = server.addr;

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..100 {
            tasks.spawn(async move {
                let exchange = async {
                    let mut stream = tokio::net::TcpStream::connect(addr).await?;
                    let msg = format!("client{i}");
                    stream.write_all(msg.as_bytes()).await?;
                    let mut buf = vec![0u8; msg.len()];
                    stream.read_exact(&mut buf).await?;
                    Ok::<_, io::Error>(buf == msg.to_uppercase().into_bytes())
                };
                matches!(
                    tokio::time::timeout(Duration::from_secs(10), exchange).await,
                    Ok(Ok(true))
                )
            });
        }

        let mut succeeded = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                succeeded += 1;
            }
        }
        assert!(succeeded >= 95, "only {succeeded}/100 clients succeeded");
    }

    #[test]
    fn test_rapid_connect_close_cycles() {
        let (mut event_loop, addr, _shutdown) = new_loop(&test_config());
        let mut events = Events::with_capacity(64);

        for _ in 0..100 {
            drop(StdStream::connect(addr).unwrap());
            event_loop.turn(&mut events).unwrap();
        }

        for _ in 0..500 {
            if event_loop.stats().accepted == 100 && event_loop.live_connections() == 0 {
                break;
            }
            event_loop.turn(&mut events).unwrap();
        }

        let stats = event_loop.stats();
        assert_eq!(stats.accepted, 100);
        assert_eq!(stats.closed, 100);
        assert_eq!(event_loop.live_connections(), 0);
        assert!(event_loop.connections.is_empty());

        // Still serving afterwards.
        let client = thread::spawn(move || {
            let mut stream = connect(addr);
            stream.write_all(b"still here").unwrap();
            let mut buf = [0u8; 10];
            stream.read_exact(&mut buf).unwrap();
            buf
        });
        while !client.is_finished() {
            event_loop.turn(&mut events).unwrap();
        }
        assert_eq!(&client.join().unwrap(), b"STILL HERE");
    }

    #[test]
    fn test_reset_does_not_affect_others() {
        let server = TestServer::start(test_config());

        let mut rude = connect(server.addr);
        rude.write_all(&vec![b'q'; 256 * 1024]).unwrap();
        socket2::SockRef::from(&rude)
            .set_linger(Some(Duration::ZERO))
            .unwrap();
        drop(rude);

        let received = round_trip(server.addr, b"polite".to_vec());
        assert_eq!(received, b"POLITE");
    }

    #[test]
    fn test_connection_cap_rejects_extra() {
        let config = Config {
            max_connections: 1,
            ..test_config()
        };
        let server = TestServer::start(config);

        let mut first = connect(server.addr);
        first.write_all(b"one").unwrap();
        let mut buf = [0u8; 3];
        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ONE");

        let mut second = connect(server.addr);
        let mut byte = [0u8; 1];
        match second.read(&mut byte) {
            Ok(0) => {}
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            Ok(n) => panic!("rejected connection returned {n} bytes"),
        }

        first.write_all(b"two").unwrap();
        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"TWO");

        let (event_loop, _) = server.stop();
        assert_eq!(event_loop.stats().rejected, 1);
    }

    #[test]
    fn test_idle_connection_evicted() {
        let config = Config {
            idle_timeout: Some(Duration::from_millis(200)),
            ..test_config()
        };
        let server = TestServer::start(config);

        let mut stream = connect(server.addr);
        let started = Instant::now();
        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert!(started.elapsed() < Duration::from_secs(5));

        let (event_loop, _) = server.stop();
        assert_eq!(event_loop.stats().idle_evicted, 1);
    }

    #[test]
    fn test_shutdown_is_prompt_with_idle_clients() {
        let server = TestServer::start(test_config());
        let mut idle: Vec<StdStream> = (0..10).map(|_| connect(server.addr)).collect();

        // Make sure every client has been accepted before signalling.
        let mut marker = connect(server.addr);
        marker.write_all(b"x").unwrap();
        marker.read_exact(&mut [0u8; 1]).unwrap();

        let (event_loop, elapsed) = server.stop();
        assert!(elapsed < Duration::from_secs(2), "shutdown took {elapsed:?}");
        assert_eq!(event_loop.live_connections(), 0);
        assert_eq!(event_loop.stats().forced, 0);
        assert!(event_loop.local_addr().is_none());

        for stream in idle.iter_mut() {
            let mut buf = [0u8; 1];
            assert_eq!(stream.read(&mut buf).unwrap(), 0);
        }
    }

    #[test]
    fn test_shutdown_drains_pending_output() {
        let config = Config {
            high_watermark: 64 * 1024 * 1024,
            low_watermark: 16 * 1024 * 1024,
            drain_timeout: Duration::from_secs(5),
            ..test_config()
        };
        let server = TestServer::start(config);

        let len = 16 * 1024 * 1024;
        let mut stream = connect(server.addr);
        let mut writer = stream.try_clone().unwrap();
        thread::spawn(move || writer.write_all(&vec![b'a'; len]).unwrap())
            .join()
            .unwrap();
        // Let the reactor read everything before it stops reading.
        thread::sleep(Duration::from_millis(300));

        let shutdown = server.shutdown.clone();
        shutdown.trigger();

        let mut received = Vec::with_capacity(len);
        stream.read_to_end(&mut received).unwrap();
        assert_eq!(received.len(), len);
        assert!(received.iter().all(|&b| b == b'A'));

        let (event_loop, _) = server.stop();
        assert_eq!(event_loop.stats().forced, 0);
    }

    #[test]
    fn test_shutdown_forces_close_after_deadline() {
        let config = Config {
            high_watermark: 128 * 1024 * 1024,
            low_watermark: 32 * 1024 * 1024,
            drain_timeout: Duration::from_millis(200),
            ..test_config()
        };
        let server = TestServer::start(config);

        // Client never reads, so output can never drain.
        let stream = connect(server.addr);
        let mut writer = stream.try_clone().unwrap();
        thread::spawn(move || writer.write_all(&vec![b'z'; 32 * 1024 * 1024]).unwrap())
            .join()
            .unwrap();
        thread::sleep(Duration::from_millis(300));

        let (event_loop, elapsed) = server.stop();
        assert!(elapsed < Duration::from_secs(2), "shutdown took {elapsed:?}");
        assert_eq!(event_loop.stats().forced, 1);
        assert_eq!(event_loop.live_connections(), 0);
        drop(stream);
    }
}
