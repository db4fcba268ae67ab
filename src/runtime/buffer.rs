//! Per-connection output buffer.
//!
//! Transformed bytes are appended at the tail and written from the head.
//! A `sent` offset marks how much of the head has already been accepted by
//! the socket, so a partial write never shifts the remaining bytes. The sent
//! prefix is dropped once it is large enough to be worth reclaiming, which
//! keeps the buffer from growing without bound on long-lived connections.
//!
//! Reads land in initialized scratch space past the last transformed byte.
//! That space is kept between calls, so a drain that ends in "would block"
//! does not pay for zeroing a fresh chunk every time.

use crate::transform::Transform;
use bytes::{Buf, BytesMut};
use std::io::{self, Read};

/// Sent prefix size at which a partially flushed buffer is compacted.
const COMPACT_THRESHOLD: usize = 64 * 1024;

/// Capacity retained after the buffer empties. Anything larger is released.
const RETAIN_CAPACITY: usize = 256 * 1024;

/// Ordered transformed bytes awaiting a write.
#[derive(Debug)]
pub struct OutputBuffer {
    /// Transformed bytes in `..filled`, read scratch after that.
    buf: BytesMut,
    filled: usize,
    /// Bytes at the head of `buf` already written to the socket.
    sent: usize,
    initial_capacity: usize,
}

impl OutputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            filled: 0,
            sent: 0,
            initial_capacity: capacity,
        }
    }

    /// Bytes not yet written.
    pub fn pending(&self) -> usize {
        self.filled - self.sent
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// The unsent tail, in arrival order.
    pub fn unsent(&self) -> &[u8] {
        &self.buf[self.sent..self.filled]
    }

    /// Offset of the first unsent byte.
    #[cfg(test)]
    pub fn sent(&self) -> usize {
        self.sent
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Initialized bytes available to the next read without zeroing.
    #[cfg(test)]
    pub fn scratch(&self) -> usize {
        self.buf.len() - self.filled
    }

    /// Read up to `chunk` bytes from `reader`, transform them and append them.
    ///
    /// Returns the number of bytes read; `Ok(0)` is end-of-stream. On error
    /// the buffer is left as it was.
    pub fn read_from<R: Read>(
        &mut self,
        reader: &mut R,
        chunk: usize,
        transform: &dyn Transform,
    ) -> io::Result<usize> {
        let start = self.filled;
        let end = start + chunk;
        if self.buf.len() < end {
            // Only the part of the chunk never handed out before is zeroed.
            self.buf.resize(end, 0);
        }

        let n = reader.read(&mut self.buf[start..end])?;
        transform.apply(&mut self.buf[start..start + n]);
        self.filled += n;
        Ok(n)
    }

    /// Append already-transformed bytes.
    #[cfg(test)]
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.truncate(self.filled);
        self.buf.extend_from_slice(bytes);
        self.filled = self.buf.len();
    }

    /// Mark `n` more bytes as written.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.pending(), "consumed past end of buffer");
        self.sent = (self.sent + n).min(self.filled);
        self.compact();
    }

    /// Drop everything, sent or not.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.filled = 0;
        self.sent = 0;
        self.release_excess();
    }

    fn compact(&mut self) {
        if self.sent == self.filled {
            // Fully written: rewind, keeping the initialized bytes as scratch.
            self.filled = 0;
            self.sent = 0;
            self.release_excess();
        } else if self.sent >= COMPACT_THRESHOLD && self.sent * 2 >= self.filled {
            self.buf.advance(self.sent);
            self.filled -= self.sent;
            self.sent = 0;
        }
    }

    fn release_excess(&mut self) {
        if self.buf.capacity() > RETAIN_CAPACITY {
            self.buf = BytesMut::with_capacity(self.initial_capacity);
        }
    }
}
