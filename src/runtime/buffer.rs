//! Fixed-capacity connection buffers.
//!
//! Each connection owns one read buffer and one write buffer, both sized to
//! hold exactly one maximal frame. Memory per connection is therefore bounded
//! regardless of how much a peer pipelines.

/// Inbound bytes with a "filled" watermark.
///
/// Valid unconsumed bytes always sit at the front of the buffer.
#[derive(Debug)]
pub struct ReadBuffer {
    buf: Box<[u8]>,
    filled: usize,
}

impl ReadBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    /// Buffered bytes not yet consumed.
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Free space after the filled region, for the next read.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Mark `n` freshly read bytes as filled.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.filled + n <= self.buf.len());
        self.filled += n;
    }

    /// Drop the first `n` bytes and shift the remainder to the front.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.filled);
        if n < self.filled {
            self.buf.copy_within(n..self.filled, 0);
        }
        self.filled -= n;
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.buf.len()
    }
}

/// Outbound bytes with a "sent" offset for resuming partial writes.
#[derive(Debug)]
pub struct WriteBuffer {
    buf: Box<[u8]>,
    len: usize,
    sent: usize,
}

impl WriteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            sent: 0,
        }
    }

    /// Whole buffer, for encoding a response. Only valid while empty.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        debug_assert!(self.len == 0, "write buffer holds an unsent response");
        &mut self.buf[..]
    }

    /// Mark `len` encoded bytes as ready to send.
    pub fn commit(&mut self, len: usize) {
        debug_assert!(len <= self.buf.len());
        self.len = len;
        self.sent = 0;
    }

    /// Bytes still waiting to be written.
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.sent..self.len]
    }

    /// Record `n` bytes accepted by the socket.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.sent + n <= self.len);
        self.sent += n;
    }

    pub fn is_flushed(&self) -> bool {
        self.sent == self.len
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.sent = 0;
    }
}
