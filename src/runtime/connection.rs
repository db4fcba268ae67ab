//! Connection state machine for managing TCP connections.
//!
//! A connection reads whatever the peer sends, runs it through the
//! configured transform straight into its output buffer, and flushes that
//! buffer back. Reads and writes are non-blocking and always drain until
//! the socket says "would block", so an edge-triggered poller never misses
//! work.
//!
//! ```text
//!  Active --EOF, output empty------------------> Closed
//!  Active --EOF, output pending--> Draining --flushed--> Closed
//!  Active | Draining --I/O error---------------> Closed (output discarded)
//! ```

use crate::runtime::buffer::OutputBuffer;
use crate::transform::Transform;
use mio::Interest;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Both directions may still carry data.
    Active,
    /// Peer finished sending; flushing the remaining output.
    Draining,
    /// Terminal. The connection is waiting to be removed from its table.
    Closed,
}

/// Why a read drain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Socket has nothing more right now.
    WouldBlock(usize),
    /// Peer closed its sending side.
    Eof(usize),
    /// Pending output reached the high watermark; reading is paused.
    Paused(usize),
}

/// Why a write drain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Socket send buffer is full; output remains.
    WouldBlock(usize),
    /// Output buffer is empty.
    Flushed(usize),
}

/// Per-connection limits and the transform every connection is set up with.
#[derive(Clone, Copy)]
pub struct ConnSettings {
    pub read_chunk: usize,
    pub high_watermark: usize,
    pub low_watermark: usize,
    pub transform: &'static dyn Transform,
}

/// A single client connection.
pub struct Connection<S> {
    stream: S,
    state: ConnState,
    output: OutputBuffer,
    /// Peer may still send.
    read_open: bool,
    /// Reading suspended until output drops to the low watermark.
    paused: bool,
    /// Reading resumed after a pause. Input left in the kernel while paused
    /// raises no new edge, so the poller has to be re-armed.
    rearm_read: bool,
    /// Interest currently held with the poller.
    registered: Option<Interest>,
    settings: ConnSettings,
    peer: Option<SocketAddr>,
    last_active: Instant,
}

impl<S: Read + Write> Connection<S> {
    /// Create a new connection in the `Active` state.
    pub fn new(stream: S, settings: ConnSettings, peer: Option<SocketAddr>) -> Self {
        Self {
            stream,
            state: ConnState::Active,
            output: OutputBuffer::with_capacity(settings.read_chunk),
            read_open: true,
            paused: false,
            rearm_read: false,
            registered: None,
            settings,
            peer,
            last_active: Instant::now(),
        }
    }

    /// Drain readable bytes into the output buffer.
    ///
    /// Stops at would-block, end-of-stream, or the high watermark. An error
    /// closes the connection and discards its output.
    pub fn try_read(&mut self) -> io::Result<ReadOutcome> {
        let mut total = 0;

        if !self.wants_read() {
            return Ok(ReadOutcome::WouldBlock(0));
        }

        loop {
            if self.output.pending() >= self.settings.high_watermark {
                self.paused = true;
                return Ok(ReadOutcome::Paused(total));
            }

            match self.output.read_from(
                &mut self.stream,
                self.settings.read_chunk,
                self.settings.transform,
            ) {
                Ok(0) => {
                    self.read_open = false;
                    self.state = if self.output.is_empty() {
                        ConnState::Closed
                    } else {
                        ConnState::Draining
                    };
                    self.last_active = Instant::now();
                    return Ok(ReadOutcome::Eof(total));
                }
                Ok(n) => {
                    total += n;
                    self.last_active = Instant::now();
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::WouldBlock(total));
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }
    }

    /// Write as much pending output as the socket accepts.
    ///
    /// Only bytes the socket actually took are marked sent. Flushing the last
    /// byte after end-of-stream closes the connection.
    pub fn try_write(&mut self) -> io::Result<WriteOutcome> {
        let mut total = 0;

        while !self.output.is_empty() {
            match self.stream.write(self.output.unsent()) {
                Ok(0) => {
                    self.close();
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => {
                    self.output.consume(n);
                    total += n;
                    self.last_active = Instant::now();
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.maybe_resume();
                    return Ok(WriteOutcome::WouldBlock(total));
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }

        self.maybe_resume();
        if !self.read_open {
            self.state = ConnState::Closed;
        }
        Ok(WriteOutcome::Flushed(total))
    }

    fn maybe_resume(&mut self) {
        if self.paused && self.output.pending() <= self.settings.low_watermark {
            self.paused = false;
            self.rearm_read = true;
        }
    }
}

impl<S> Connection<S> {
    /// Abrupt close: discard unflushed output.
    pub fn close(&mut self) {
        self.state = ConnState::Closed;
        self.read_open = false;
        self.output.clear();
    }

    /// Stop reading for shutdown. Connections with nothing left to send
    /// close at once; the rest drain.
    pub fn begin_shutdown(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        self.read_open = false;
        self.paused = false;
        self.state = if self.output.is_empty() {
            ConnState::Closed
        } else {
            ConnState::Draining
        };
    }

    /// Interest the poller should hold: readable while the peer may send and
    /// reading is not paused, writable while output is pending.
    pub fn desired_interest(&self) -> Option<Interest> {
        if self.state == ConnState::Closed {
            return None;
        }
        let read = self.wants_read().then_some(Interest::READABLE);
        let write = (!self.output.is_empty()).then_some(Interest::WRITABLE);
        match (read, write) {
            (Some(r), Some(w)) => Some(r.add(w)),
            (r, w) => r.or(w),
        }
    }

    /// Whether reading resumed since the last call. Clears the flag.
    pub fn take_rearm_read(&mut self) -> bool {
        std::mem::take(&mut self.rearm_read)
    }

    pub fn wants_read(&self) -> bool {
        self.state == ConnState::Active && self.read_open && !self.paused
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    #[cfg(test)]
    pub fn read_open(&self) -> bool {
        self.read_open
    }

    #[cfg(test)]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pending_output(&self) -> usize {
        self.output.pending()
    }

    pub fn registered(&self) -> Option<Interest> {
        self.registered
    }

    pub fn set_registered(&mut self, interest: Option<Interest>) {
        self.registered = interest;
    }

    #[cfg(test)]
    pub fn write_registered(&self) -> bool {
        self.registered.is_some_and(|i| i.is_writable())
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Time since the last read or write made progress.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active)
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    #[cfg(test)]
    pub fn stream(&self) -> &S {
        &self.stream
    }
}
