//! mio-based event loop implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS). Same
//! connection state machine as the poll backend; interest is re-registered
//! only when a connection switches between `Request` and `Response`.

mod event_loop;

pub use event_loop::run;
