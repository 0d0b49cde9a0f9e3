//! pollkv: a single-threaded key-value server
//!
//! Serves an in-memory map over a length-prefixed binary protocol with
//! request pipelining. One thread multiplexes every connection through a
//! readiness reactor; no connection ever blocks another.
//!
//! Features:
//! - `GET`, `SET` and `DEL` over binary-safe keys and values
//! - Pipelined requests answered strictly in order per connection
//! - Bounded memory: one frame of input and one of output per connection
//! - `poll(2)` or mio (epoll/kqueue) readiness backends
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod protocol;
pub mod runtime;
pub mod storage;
