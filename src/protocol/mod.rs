//! Binary key-value protocol.
//!
//! All integers on the wire are little-endian `u32`:
//!
//! ```text
//! Request:  total_len | arg_count | (arg_len | arg bytes) * arg_count
//! Response: total_len | status    | payload
//! ```
//!
//! `total_len` never counts its own four bytes and never exceeds
//! [`codec::MAX_MSG`].
//!
//! - `codec`: frame encoding and decoding
//! - `handler`: command dispatch against the store

pub mod codec;
pub mod handler;

pub use codec::FrameError;

/// Response status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    Err = 1,
    /// Key not found.
    Nx = 2,
}

impl Status {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Status {
    type Error = FrameError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Err),
            2 => Ok(Status::Nx),
            other => Err(FrameError::UnknownStatus(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::Err.code(), 1);
        assert_eq!(Status::Nx.code(), 2);
        assert_eq!(Status::try_from(2).unwrap(), Status::Nx);
        assert_eq!(Status::try_from(7), Err(FrameError::UnknownStatus(7)));
    }
}
