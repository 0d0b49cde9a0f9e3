//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! mio readiness is edge-triggered, which the state machine tolerates
//! because it always runs a connection until a read or write would block.

use crate::config::Config;
use crate::runtime::accept::{self, AcceptFailure, AcceptThrottle, ACCEPT_PAUSE};
use crate::runtime::connection::{Connection, ConnectionRegistry, IoInterest};
use crate::runtime::log_closed;
use crate::storage::Storage;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Run the mio-based server until `shutdown` is set.
///
/// `listener` must already be bound, listening and non-blocking.
pub fn run(
    listener: std::net::TcpListener,
    config: &Config,
    storage: &mut Storage,
    shutdown: &AtomicBool,
) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(config.events_capacity);
    let timeout = Duration::from_millis(config.poll_timeout_ms);
    let mut throttle = AcceptThrottle::new(ACCEPT_PAUSE);

    let mut listener = TcpListener::from_std(listener);
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut connections: ConnectionRegistry<TcpStream> =
        ConnectionRegistry::new(config.max_connections);

    info!(
        addr = %listener.local_addr()?,
        max_connections = config.max_connections,
        events_capacity = config.events_capacity,
        "Starting mio runtime"
    );

    while !shutdown.load(Ordering::Relaxed) {
        let wait = throttle.wait_bound(timeout, Instant::now());
        if let Err(e) = poll.poll(&mut events, Some(wait)) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            error!(error = %e, "poll() failed");
            return Err(e);
        }

        // Readiness is edge-triggered, so peers left in the backlog by a
        // paused accept are not reported again.
        if throttle.resume_if_elapsed(Instant::now()) {
            accept_connections(&listener, &poll, &mut connections, &mut throttle);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    if !throttle.is_paused(Instant::now()) {
                        accept_connections(&listener, &poll, &mut connections, &mut throttle);
                    }
                }
                Token(conn_id) => {
                    handle_connection_event(conn_id, &poll, &mut connections, storage);
                }
            }
        }
    }

    let stats = storage.stats();
    info!(
        open_connections = connections.len(),
        items = stats.item_count,
        bytes_used = stats.bytes_used,
        "Shutting down mio runtime"
    );
    Ok(())
}

fn accept_connections(
    listener: &TcpListener,
    poll: &Poll,
    connections: &mut ConnectionRegistry<TcpStream>,
    throttle: &mut AcceptThrottle,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                let conn_id = match connections.insert(Connection::new(stream)) {
                    Some(conn_id) => conn_id,
                    None => {
                        warn!(peer = %peer_addr, "Connection limit reached");
                        continue;
                    }
                };

                let registered = match connections.get_mut(conn_id) {
                    Some(conn) => poll.registry().register(
                        conn.stream_mut(),
                        Token(conn_id),
                        Interest::READABLE,
                    ),
                    None => continue,
                };

                if let Err(e) = registered {
                    warn!(conn_id, peer = %peer_addr, error = %e, "Failed to register connection");
                    connections.remove(conn_id);
                    continue;
                }

                debug!(conn_id, peer = %peer_addr, "Accepted connection");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => match accept::classify(&e) {
                AcceptFailure::Skip => debug!(error = %e, "Skipping failed accept"),
                AcceptFailure::Pause => {
                    throttle.pause(&e, Instant::now());
                    break;
                }
            },
        }
    }
}

fn handle_connection_event(
    conn_id: usize,
    poll: &Poll,
    connections: &mut ConnectionRegistry<TcpStream>,
    storage: &mut Storage,
) {
    let conn = match connections.get_mut(conn_id) {
        Some(conn) => conn,
        None => return,
    };

    let before = conn.interest();
    conn.drive(storage);

    let reregistered = match conn.interest() {
        None => Ok(()),
        Some(after) if Some(after) == before => Ok(()),
        Some(after) => {
            let interest = match after {
                IoInterest::Readable => Interest::READABLE,
                IoInterest::Writable => Interest::WRITABLE,
            };
            poll.registry()
                .reregister(conn.stream_mut(), Token(conn_id), interest)
        }
    };

    if let Err(e) = reregistered {
        debug!(conn_id, error = %e, "Failed to update interest");
        close_connection(poll, connections, conn_id);
        return;
    }

    if conn.is_closed() {
        close_connection(poll, connections, conn_id);
    }
}

fn close_connection(poll: &Poll, connections: &mut ConnectionRegistry<TcpStream>, conn_id: usize) {
    if let Some(mut conn) = connections.remove(conn_id) {
        let _ = poll.registry().deregister(conn.stream_mut());
        log_closed(conn_id, conn.close_reason());
    }
}
