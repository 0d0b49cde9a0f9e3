//! Frame codec.
//!
//! Works on raw byte slices so the event loop can decode straight out of a
//! connection's read buffer and encode straight into its write buffer.

use super::Status;
use bytes::{Buf, BufMut, BytesMut};

/// Length of the little-endian `u32` prefixes used throughout the protocol.
pub const HEADER_LEN: usize = 4;

/// Largest frame body, excluding the leading length prefix. For responses
/// this includes the status code.
pub const MAX_MSG: usize = 4096;

/// Largest argument count accepted in a request.
pub const MAX_ARGS: usize = 1024;

/// Largest response payload (the status code takes the first four bytes).
pub const MAX_PAYLOAD: usize = MAX_MSG - HEADER_LEN;

/// Size of a buffer able to hold one complete frame.
pub const FRAME_CAPACITY: usize = HEADER_LEN + MAX_MSG;

/// Frame-level protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the fixed headers require.
    TooShort,
    /// Declared frame length above `MAX_MSG`.
    FrameTooLong(usize),
    /// Declared argument count above `MAX_ARGS`.
    TooManyArgs(usize),
    /// An argument length runs past the end of the frame.
    ArgumentOverrun,
    /// Bytes left over after the last argument.
    TrailingBytes(usize),
    /// Response payload above `MAX_PAYLOAD`.
    PayloadTooLarge(usize),
    /// Response carried a status code outside the known set.
    UnknownStatus(u32),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::TooShort => write!(f, "frame too short"),
            FrameError::FrameTooLong(len) => {
                write!(f, "frame length {len} exceeds limit of {MAX_MSG}")
            }
            FrameError::TooManyArgs(n) => {
                write!(f, "argument count {n} exceeds limit of {MAX_ARGS}")
            }
            FrameError::ArgumentOverrun => write!(f, "argument runs past end of frame"),
            FrameError::TrailingBytes(n) => write!(f, "{n} trailing bytes after arguments"),
            FrameError::PayloadTooLarge(len) => {
                write!(f, "payload length {len} exceeds limit of {MAX_PAYLOAD}")
            }
            FrameError::UnknownStatus(code) => write!(f, "unknown status code {code}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Size of the complete frame at the front of `buf`, prefix included.
///
/// Returns `Ok(None)` while the frame is still incomplete. An oversized
/// length prefix is rejected as soon as it has been buffered.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, FrameError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let len = (&buf[..HEADER_LEN]).get_u32_le() as usize;
    if len > MAX_MSG {
        return Err(FrameError::FrameTooLong(len));
    }

    if HEADER_LEN + len > buf.len() {
        Ok(None)
    } else {
        Ok(Some(HEADER_LEN + len))
    }
}

/// Decode one complete request frame, length prefix included.
///
/// Returned arguments borrow from `frame`; argument 0 is the command name.
pub fn decode_request(frame: &[u8]) -> Result<Vec<&[u8]>, FrameError> {
    if frame.len() < 2 * HEADER_LEN {
        return Err(FrameError::TooShort);
    }

    let declared = (&frame[..HEADER_LEN]).get_u32_le() as usize;
    if declared > MAX_MSG {
        return Err(FrameError::FrameTooLong(declared));
    }

    let body = &frame[HEADER_LEN..];
    if body.len() < declared {
        return Err(FrameError::TooShort);
    }
    if body.len() > declared {
        return Err(FrameError::TrailingBytes(body.len() - declared));
    }

    let mut cursor = body;
    let count = cursor.get_u32_le() as usize;
    if count > MAX_ARGS {
        return Err(FrameError::TooManyArgs(count));
    }

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        if cursor.remaining() < HEADER_LEN {
            return Err(FrameError::ArgumentOverrun);
        }
        let len = cursor.get_u32_le() as usize;
        if len > cursor.remaining() {
            return Err(FrameError::ArgumentOverrun);
        }
        let (arg, rest) = cursor.split_at(len);
        args.push(arg);
        cursor = rest;
    }

    if !cursor.is_empty() {
        return Err(FrameError::TrailingBytes(cursor.len()));
    }

    Ok(args)
}

/// Encode a request frame.
pub fn encode_request(args: &[&[u8]]) -> Result<BytesMut, FrameError> {
    if args.len() > MAX_ARGS {
        return Err(FrameError::TooManyArgs(args.len()));
    }

    let body_len = HEADER_LEN + args.iter().map(|a| HEADER_LEN + a.len()).sum::<usize>();
    if body_len > MAX_MSG {
        return Err(FrameError::FrameTooLong(body_len));
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
    buf.put_u32_le(body_len as u32);
    buf.put_u32_le(args.len() as u32);
    for arg in args {
        buf.put_u32_le(arg.len() as u32);
        buf.put_slice(arg);
    }
    Ok(buf)
}

/// Encode a response frame. The payload is bounded by the caller.
pub fn encode_response(status: Status, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(2 * HEADER_LEN + payload.len());
    buf.put_u32_le((HEADER_LEN + payload.len()) as u32);
    buf.put_u32_le(status.code());
    buf.put_slice(payload);
    buf
}

/// Encode a response frame into a fixed output buffer.
///
/// Returns the number of bytes written.
pub fn encode_response_into(
    output: &mut [u8],
    status: Status,
    payload: &[u8],
) -> Result<usize, FrameError> {
    let total = 2 * HEADER_LEN + payload.len();
    if payload.len() > MAX_PAYLOAD || total > output.len() {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let mut out = &mut output[..total];
    out.put_u32_le((HEADER_LEN + payload.len()) as u32);
    out.put_u32_le(status.code());
    out.put_slice(payload);
    Ok(total)
}

/// Decode one complete response frame, length prefix included.
pub fn decode_response(frame: &[u8]) -> Result<(Status, &[u8]), FrameError> {
    if frame.len() < 2 * HEADER_LEN {
        return Err(FrameError::TooShort);
    }

    let mut cursor = frame;
    let declared = cursor.get_u32_le() as usize;
    if declared > MAX_MSG {
        return Err(FrameError::FrameTooLong(declared));
    }
    if declared < HEADER_LEN || cursor.len() < declared {
        return Err(FrameError::TooShort);
    }
    if cursor.len() > declared {
        return Err(FrameError::TrailingBytes(cursor.len() - declared));
    }

    let status = Status::try_from(cursor.get_u32_le())?;
    Ok((status, cursor))
}
