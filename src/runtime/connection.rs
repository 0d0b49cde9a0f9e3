//! Connection state machine.
//!
//! A connection alternates between reading requests and writing the single
//! response produced by each one. All progress is carried in the connection
//! itself so the event loop can suspend it whenever a read or write would
//! block and resume it on the next readiness notification.
//!
//! ```text
//!            frame decoded
//!   Request ---------------> Response
//!      ^                        |
//!      +------------------------+
//!          response flushed
//!
//!   any state --(EOF, I/O error, protocol violation)--> Closed
//! ```

use crate::protocol::codec::{self, FrameError, FRAME_CAPACITY};
use crate::protocol::handler;
use crate::runtime::buffer::{ReadBuffer, WriteBuffer};
use crate::storage::Storage;
use slab::Slab;
use std::fmt;
use std::io::{self, Read, Write};

/// Why a connection reached `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly close with nothing buffered.
    PeerClosed,
    /// Peer closed in the middle of a frame.
    UnexpectedEof,
    /// Read or write failed.
    Io(io::ErrorKind),
    /// Peer sent an invalid frame.
    Protocol(FrameError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "closed by peer"),
            CloseReason::UnexpectedEof => write!(f, "unexpected EOF"),
            CloseReason::Io(kind) => write!(f, "I/O error: {kind}"),
            CloseReason::Protocol(e) => write!(f, "protocol error: {e}"),
        }
    }
}

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Reading and processing requests.
    Request,
    /// Flushing the response in the write buffer. No reads happen here.
    Response,
    /// Terminal; the connection must be retired.
    Closed(CloseReason),
}

/// Readiness a connection is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoInterest {
    Readable,
    Writable,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    state: ConnState,
    read_buf: ReadBuffer,
    write_buf: WriteBuffer,
}

impl<S: Read + Write> Connection<S> {
    /// Create a new connection in the initial `Request` state.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            state: ConnState::Request,
            read_buf: ReadBuffer::new(FRAME_CAPACITY),
            write_buf: WriteBuffer::new(FRAME_CAPACITY),
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnState::Closed(_))
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        match self.state {
            ConnState::Closed(reason) => Some(reason),
            _ => None,
        }
    }

    /// What to wait for before driving this connection again.
    pub fn interest(&self) -> Option<IoInterest> {
        match self.state {
            ConnState::Request => Some(IoInterest::Readable),
            ConnState::Response => Some(IoInterest::Writable),
            ConnState::Closed(_) => None,
        }
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Make as much progress as possible without blocking.
    ///
    /// Returns once a read or write would block or the connection closes.
    pub fn drive(&mut self, storage: &mut Storage) {
        loop {
            let progressed = match self.state {
                ConnState::Request => {
                    self.try_one_request(storage) || (!self.is_closed() && self.try_fill_buffer())
                }
                ConnState::Response => self.try_flush_buffer(),
                ConnState::Closed(_) => false,
            };

            if !progressed {
                break;
            }
        }
    }

    fn close(&mut self, reason: CloseReason) {
        self.state = ConnState::Closed(reason);
    }

    /// Read once into the spare part of the read buffer.
    ///
    /// Returns true if bytes were added.
    fn try_fill_buffer(&mut self) -> bool {
        // A full buffer always holds a complete frame or an oversized header,
        // both handled before we get here.
        debug_assert!(!self.read_buf.is_full());

        loop {
            match self.stream.read(self.read_buf.spare_mut()) {
                Ok(0) => {
                    let reason = if self.read_buf.is_empty() {
                        CloseReason::PeerClosed
                    } else {
                        CloseReason::UnexpectedEof
                    };
                    self.close(reason);
                    return false;
                }
                Ok(n) => {
                    self.read_buf.advance(n);
                    return true;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(e) => {
                    self.close(CloseReason::Io(e.kind()));
                    return false;
                }
            }
        }
    }

    /// Process the frame at the front of the read buffer, if complete.
    ///
    /// On success the encoded reply sits in the write buffer, the frame is
    /// compacted out of the read buffer and the state is `Response`.
    fn try_one_request(&mut self, storage: &mut Storage) -> bool {
        let frame_len = match codec::frame_len(self.read_buf.filled()) {
            Ok(Some(len)) => len,
            Ok(None) => return false,
            Err(e) => {
                self.close(CloseReason::Protocol(e));
                return false;
            }
        };

        let frame = &self.read_buf.filled()[..frame_len];
        let encoded = codec::decode_request(frame).and_then(|args| {
            let reply = handler::execute(&args, storage);
            codec::encode_response_into(self.write_buf.spare_mut(), reply.status, &reply.payload)
        });

        match encoded {
            Ok(len) => self.write_buf.commit(len),
            Err(e) => {
                self.close(CloseReason::Protocol(e));
                return false;
            }
        }

        self.read_buf.consume(frame_len);
        self.state = ConnState::Response;
        true
    }

    /// Write the pending response, resuming from the sent offset.
    ///
    /// Returns true once the response is fully flushed and the connection is
    /// back in `Request`.
    fn try_flush_buffer(&mut self) -> bool {
        loop {
            match self.stream.write(self.write_buf.pending()) {
                Ok(0) => {
                    self.close(CloseReason::Io(io::ErrorKind::WriteZero));
                    return false;
                }
                Ok(n) => {
                    self.write_buf.advance(n);
                    if self.write_buf.is_flushed() {
                        self.write_buf.reset();
                        self.state = ConnState::Request;
                        return true;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(e) => {
                    self.close(CloseReason::Io(e.kind()));
                    return false;
                }
            }
        }
    }
}

/// Registry of active connections using slab allocation.
///
/// Connection ids are slab keys, not file descriptors, so a reused
/// descriptor number can never alias a retired connection.
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
    max_connections: usize,
}

impl<S> ConnectionRegistry<S> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity; the connection is
    /// dropped, closing its socket.
    pub fn insert(&mut self, conn: Connection<S>) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        self.connections.try_remove(id)
    }

    /// Number of active connections.
    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    /// Iterate over all connections.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection<S>)> {
        self.connections.iter()
    }
}
