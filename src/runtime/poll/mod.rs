//! Level-triggered `poll(2)` event loop.
//!
//! The interest list is rebuilt from the connection table on every
//! iteration, so a connection is only ever asked about the direction its
//! state allows: readable in `Request`, writable in `Response`.

mod event_loop;

pub use event_loop::run;
