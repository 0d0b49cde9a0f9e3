//! Command dispatch.
//!
//! Interprets a decoded argument list against the store. Unknown commands
//! and wrong arity are answered with `ERR` and never close the connection.

use super::codec::MAX_PAYLOAD;
use super::Status;
use crate::storage::Storage;
use std::borrow::Cow;
use tracing::trace;

/// Longest slice of an unknown command name echoed back in an error.
const MAX_ECHOED_NAME: usize = 64;

/// Parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Get { key: &'a [u8] },
    Set { key: &'a [u8], value: &'a [u8] },
    Del { key: &'a [u8] },
}

impl<'a> Command<'a> {
    /// Parse an argument list. The command name is matched case-insensitively.
    ///
    /// The error is the human-readable message sent back with `ERR`.
    pub fn parse(args: &[&'a [u8]]) -> Result<Self, String> {
        let (name, rest) = match args.split_first() {
            Some(split) => split,
            None => return Err("empty command".to_string()),
        };

        if name.eq_ignore_ascii_case(b"get") {
            match rest {
                &[key] => Ok(Command::Get { key }),
                _ => Err(wrong_arity("get")),
            }
        } else if name.eq_ignore_ascii_case(b"set") {
            match rest {
                &[key, value] => Ok(Command::Set { key, value }),
                _ => Err(wrong_arity("set")),
            }
        } else if name.eq_ignore_ascii_case(b"del") {
            match rest {
                &[key] => Ok(Command::Del { key }),
                _ => Err(wrong_arity("del")),
            }
        } else {
            let shown = &name[..name.len().min(MAX_ECHOED_NAME)];
            Err(format!(
                "unknown command '{}'",
                String::from_utf8_lossy(shown)
            ))
        }
    }
}

fn wrong_arity(name: &str) -> String {
    format!("wrong number of arguments for '{name}' command")
}

/// Status and payload produced by one command.
#[derive(Debug, PartialEq, Eq)]
pub struct Reply<'a> {
    pub status: Status,
    pub payload: Cow<'a, [u8]>,
}

impl<'a> Reply<'a> {
    fn ok(payload: &'a [u8]) -> Self {
        Self {
            status: Status::Ok,
            payload: Cow::Borrowed(payload),
        }
    }

    fn nx() -> Self {
        Self {
            status: Status::Nx,
            payload: Cow::Borrowed(&[]),
        }
    }

    fn err(message: String) -> Self {
        Self {
            status: Status::Err,
            payload: Cow::Owned(message.into_bytes()),
        }
    }
}

/// Execute a decoded request against the store.
pub fn execute<'s>(args: &[&[u8]], storage: &'s mut Storage) -> Reply<'s> {
    let command = match Command::parse(args) {
        Ok(command) => command,
        Err(message) => {
            trace!(%message, "Rejected command");
            return Reply::err(message);
        }
    };

    trace!(?command, "Processing command");

    match command {
        Command::Get { key } => match storage.get(key) {
            // A SET frame cannot carry a value this long, but the store itself
            // has no such bound.
            Some(value) if value.len() > MAX_PAYLOAD => {
                Reply::err("value exceeds response size limit".to_string())
            }
            Some(value) => Reply::ok(value),
            None => Reply::nx(),
        },
        Command::Set { key, value } => {
            let result = storage.set(key, value);
            trace!(?result, "SET applied");
            Reply::ok(&[])
        }
        Command::Del { key } => {
            // Deleting an absent key still answers OK
            let result = storage.delete(key);
            trace!(?result, "DEL applied");
            Reply::ok(&[])
        }
    }
}
