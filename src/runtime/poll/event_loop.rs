//! poll(2) event loop implementation.
//!
//! Each iteration:
//! 1. build the `pollfd` list: the listener first, then every connection
//!    with the direction its state wants (plus errors)
//! 2. block once, bounded by the configured timeout
//! 3. drive every ready connection until it would block or closes, and
//!    retire the closed ones
//! 4. accept all pending peers if the listener is ready

use crate::config::Config;
use crate::runtime::accept::{self, AcceptFailure, AcceptThrottle, ACCEPT_PAUSE};
use crate::runtime::connection::{Connection, ConnectionRegistry, IoInterest};
use crate::runtime::log_closed;
use crate::storage::Storage;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Run the poll-based server until `shutdown` is set.
///
/// `listener` must already be bound, listening and non-blocking.
pub fn run(
    listener: TcpListener,
    config: &Config,
    storage: &mut Storage,
    shutdown: &AtomicBool,
) -> io::Result<()> {
    let timeout = Duration::from_millis(config.poll_timeout_ms);
    let mut throttle = AcceptThrottle::new(ACCEPT_PAUSE);
    let mut connections: ConnectionRegistry<TcpStream> =
        ConnectionRegistry::new(config.max_connections);

    // Reused across iterations; `conn_ids[i]` owns `poll_args[i + 1]`.
    let mut poll_args: Vec<libc::pollfd> = Vec::new();
    let mut conn_ids: Vec<usize> = Vec::new();

    info!(
        addr = %listener.local_addr()?,
        max_connections = config.max_connections,
        timeout_ms = config.poll_timeout_ms,
        "Starting poll runtime"
    );

    while !shutdown.load(Ordering::Relaxed) {
        poll_args.clear();
        conn_ids.clear();

        let now = Instant::now();
        throttle.resume_if_elapsed(now);

        // poll(2) ignores negative descriptors, which keeps the listener in
        // slot 0 while accepting is paused.
        let listener_fd = if throttle.is_paused(now) {
            -1
        } else {
            listener.as_raw_fd()
        };
        poll_args.push(libc::pollfd {
            fd: listener_fd,
            events: libc::POLLIN,
            revents: 0,
        });

        for (conn_id, conn) in connections.iter() {
            let events = match conn.interest() {
                Some(IoInterest::Readable) => libc::POLLIN,
                Some(IoInterest::Writable) => libc::POLLOUT,
                None => continue,
            };
            poll_args.push(libc::pollfd {
                fd: conn.stream().as_raw_fd(),
                events: events | libc::POLLERR,
                revents: 0,
            });
            conn_ids.push(conn_id);
        }

        // SAFETY: `poll_args` is a live, initialized slice of `pollfd` whose
        // length is passed alongside it; the kernel only writes `revents`.
        let rv = unsafe {
            libc::poll(
                poll_args.as_mut_ptr(),
                poll_args.len() as libc::nfds_t,
                poll_timeout_ms(throttle.wait_bound(timeout, now)),
            )
        };
        if rv < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            error!(error = %err, "poll() failed");
            return Err(err);
        }

        for (pfd, &conn_id) in poll_args[1..].iter().zip(conn_ids.iter()) {
            if pfd.revents == 0 {
                continue;
            }

            let closed = match connections.get_mut(conn_id) {
                Some(conn) => {
                    conn.drive(storage);
                    conn.is_closed()
                }
                None => false,
            };

            if closed {
                if let Some(conn) = connections.remove(conn_id) {
                    log_closed(conn_id, conn.close_reason());
                }
            }
        }

        if poll_args[0].revents != 0 {
            accept_connections(&listener, &mut connections, &mut throttle);
        }
    }

    let stats = storage.stats();
    info!(
        open_connections = connections.len(),
        items = stats.item_count,
        bytes_used = stats.bytes_used,
        "Shutting down poll runtime"
    );
    Ok(())
}

/// Round a wait up to whole milliseconds so a pending pause never turns into
/// a zero-timeout spin.
fn poll_timeout_ms(wait: Duration) -> libc::c_int {
    let ms = wait.as_micros().div_ceil(1000);
    libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
}

/// Accept every pending peer. Failures are logged and never stop the loop.
fn accept_connections(
    listener: &TcpListener,
    connections: &mut ConnectionRegistry<TcpStream>,
    throttle: &mut AcceptThrottle,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    warn!(peer = %peer_addr, error = %e, "Failed to set socket non-blocking");
                    continue;
                }

                match connections.insert(Connection::new(stream)) {
                    Some(conn_id) => {
                        debug!(conn_id, peer = %peer_addr, "Accepted connection");
                    }
                    None => {
                        warn!(peer = %peer_addr, "Connection limit reached");
                    }
                }
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
