//! Single-threaded reactor runtime.
//!
//! Backends:
//! - `poll`: level-triggered `poll(2)` with the interest list rebuilt each
//!   iteration (default)
//! - `mio`: epoll on Linux, kqueue on macOS
//!
//! Both share common abstractions:
//! - `Connection`: per-connection buffered state machine
//! - `ConnectionRegistry`: slab-backed connection table
//! - `ReadBuffer` / `WriteBuffer`: fixed one-frame buffers

pub mod buffer;
pub mod connection;
pub mod listener;

#[cfg(unix)]
mod accept;
#[cfg(unix)]
mod mio_impl;
#[cfg(unix)]
mod poll;

use crate::config::{Config, RuntimeType};
use crate::storage::Storage;
use connection::CloseReason;
use std::net::TcpListener;
use std::sync::atomic::AtomicBool;
use tracing::{debug, warn};

/// Serve connections on `listener` until `shutdown` is set.
///
/// The store is only touched from the calling thread.
pub fn run(
    listener: TcpListener,
    config: &Config,
    storage: &mut Storage,
    shutdown: &AtomicBool,
) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        match config.runtime {
            RuntimeType::Poll => poll::run(listener, config, storage, shutdown),
            RuntimeType::Mio => mio_impl::run(listener, config, storage, shutdown),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (listener, config, storage, shutdown);
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Unsupported platform: only unix targets are supported",
        ))
    }
}

/// Log a retired connection. Protocol violations are the peer's fault and
/// worth a warning; everything else is routine.
pub(crate) fn log_closed(conn_id: usize, reason: Option<CloseReason>) {
    match reason {
        Some(CloseReason::Protocol(e)) => {
            warn!(conn_id, error = %e, "Closing connection after protocol violation");
        }
        Some(reason) => debug!(conn_id, %reason, "Connection closed"),
        None => debug!(conn_id, "Connection closed"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::protocol::codec::{decode_response, encode_request, MAX_MSG};
    use crate::protocol::Status;
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    struct TestServer {
        addr: SocketAddr,
        shutdown: Arc<AtomicBool>,
        handle: Option<JoinHandle<Storage>>,
    }

    impl TestServer {
        fn start(runtime: RuntimeType) -> Self {
            let listener = listener::bind("127.0.0.1:0".parse().unwrap(), 128).unwrap();
            let addr = listener.local_addr().unwrap();
            let shutdown = Arc::new(AtomicBool::new(false));
            let config = Config {
                runtime,
                poll_timeout_ms: 20,
                ..Config::default()
            };

            let flag = Arc::clone(&shutdown);
            let handle = thread::spawn(move || {
                let mut storage = Storage::new();
                run(listener, &config, &mut storage, &flag).unwrap();
                storage
            });

            Self {
                addr,
                shutdown,
                handle: Some(handle),
            }
        }

        fn connect(&self) -> TcpStream {
            let stream = TcpStream::connect(self.addr).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            stream.set_nodelay(true).unwrap();
            stream
        }

        fn stop(mut self) -> Storage {
            self.shutdown.store(true, Ordering::Relaxed);
            self.handle.take().unwrap().join().unwrap()
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.shutdown.store(true, Ordering::Relaxed);
        }
    }

    fn request(args: &[&[u8]]) -> Vec<u8> {
        encode_request(args).unwrap().to_vec()
    }

    fn read_response(stream: &mut TcpStream) -> (Status, Vec<u8>) {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).unwrap();
        let len = u32::from_le_bytes(header) as usize;
        let mut frame = header.to_vec();
        frame.resize(4 + len, 0);
        stream.read_exact(&mut frame[4..]).unwrap();
        let (status, payload) = decode_response(&frame).unwrap();
        (status, payload.to_vec())
    }

    fn assert_closed_by_server(stream: &mut TcpStream) {
        let mut buf = [0u8; 16];
        match stream.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => panic!("expected close, got {n} bytes"),
            // a read timeout means the server kept the connection open
            Err(e) => assert!(
                !matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ),
                "connection still open: {e}"
            ),
        }
    }

    fn pipelined_scenario(runtime: RuntimeType) {
        let server = TestServer::start(runtime);
        let mut client = server.connect();

        let batch = [
            request(&[b"set", b"k", b"v"]),
            request(&[b"get", b"k"]),
            request(&[b"del", b"k"]),
            request(&[b"get", b"k"]),
        ]
        .concat();
        client.write_all(&batch).unwrap();

        assert_eq!(read_response(&mut client), (Status::Ok, vec![]));
        assert_eq!(read_response(&mut client), (Status::Ok, b"v".to_vec()));
        assert_eq!(read_response(&mut client), (Status::Ok, vec![]));
        assert_eq!(read_response(&mut client), (Status::Nx, vec![]));

        drop(client);
        server.stop();
    }

    #[test]
    fn test_pipelined_scenario_poll() {
        pipelined_scenario(RuntimeType::Poll);
    }

    #[test]
    fn test_pipelined_scenario_mio() {
        pipelined_scenario(RuntimeType::Mio);
    }

    #[test]
    fn test_byte_at_a_time_request() {
        for runtime in [RuntimeType::Poll, RuntimeType::Mio] {
            let server = TestServer::start(runtime);
            let mut client = server.connect();

            for byte in request(&[b"SET", b"slow", b"value"]) {
                client.write_all(&[byte]).unwrap();
                thread::sleep(Duration::from_millis(1));
            }
            assert_eq!(read_response(&mut client), (Status::Ok, vec![]));

            client.write_all(&request(&[b"GET", b"slow"])).unwrap();
            assert_eq!(read_response(&mut client), (Status::Ok, b"value".to_vec()));

            drop(client);
            let storage = server.stop();
            assert_eq!(storage.get(b"slow"), Some(&b"value"[..]));
        }
    }

    #[test]
    fn test_max_frame_split_across_reads() {
        // 4 (arg count) + 7 ("set") + 5 ("k") + 4 + value == MAX_MSG
        let value = vec![b'x'; MAX_MSG - 20];
        let frame = request(&[b"set", b"k", &value]);
        assert_eq!(frame.len(), 4 + MAX_MSG);

        for runtime in [RuntimeType::Poll, RuntimeType::Mio] {
            let server = TestServer::start(runtime);
            let mut client = server.connect();

            for chunk in frame.chunks(777) {
                client.write_all(chunk).unwrap();
                thread::sleep(Duration::from_millis(2));
            }
            assert_eq!(read_response(&mut client), (Status::Ok, vec![]));

            client.write_all(&request(&[b"get", b"k"])).unwrap();
            assert_eq!(read_response(&mut client), (Status::Ok, value.clone()));

            server.stop();
        }
    }

    #[test]
    fn test_store_shared_across_connections() {
        for runtime in [RuntimeType::Poll, RuntimeType::Mio] {
            let server = TestServer::start(runtime);
            let mut writer = server.connect();
            let mut reader = server.connect();

            writer.write_all(&request(&[b"set", b"shared", b"1"])).unwrap();
            assert_eq!(read_response(&mut writer), (Status::Ok, vec![]));

            reader.write_all(&request(&[b"get", b"shared"])).unwrap();
            assert_eq!(read_response(&mut reader), (Status::Ok, b"1".to_vec()));

            server.stop();
        }
    }

    #[test]
    fn test_unknown_command_keeps_connection() {
        let server = TestServer::start(RuntimeType::Poll);
        let mut client = server.connect();

        client.write_all(&request(&[b"ping"])).unwrap();
        let (status, payload) = read_response(&mut client);
        assert_eq!(status, Status::Err);
        assert!(!payload.is_empty());

        client.write_all(&request(&[b"get", b"x"])).unwrap();
        assert_eq!(read_response(&mut client), (Status::Nx, vec![]));

        server.stop();
    }

    #[test]
    fn test_oversized_frame_closes_connection() {
        for runtime in [RuntimeType::Poll, RuntimeType::Mio] {
            let server = TestServer::start(runtime);
            let mut bad = server.connect();
            let mut good = server.connect();

            bad.write_all(&((MAX_MSG + 1) as u32).to_le_bytes()).unwrap();
            assert_closed_by_server(&mut bad);

            // other connections are unaffected
            good.write_all(&request(&[b"get", b"k"])).unwrap();
            assert_eq!(read_response(&mut good), (Status::Nx, vec![]));

            server.stop();
        }
    }

    #[test]
    fn test_many_pipelined_requests() {
        for runtime in [RuntimeType::Poll, RuntimeType::Mio] {
            let server = TestServer::start(runtime);
            let mut client = server.connect();

            let mut batch = Vec::new();
            for i in 0..500u32 {
                let key = format!("key{i}");
                batch.extend(request(&[b"set", key.as_bytes(), &i.to_le_bytes()]));
            }
            batch.extend(request(&[b"get", b"key499"]));

            let mut writer = client.try_clone().unwrap();
            let sender = thread::spawn(move || writer.write_all(&batch).unwrap());

            for _ in 0..500 {
                assert_eq!(read_response(&mut client), (Status::Ok, vec![]));
            }
            assert_eq!(
                read_response(&mut client),
                (Status::Ok, 499u32.to_le_bytes().to_vec())
            );
            sender.join().unwrap();

            let storage = server.stop();
            assert_eq!(storage.len(), 500);
        }
    }

    #[test]
    fn test_large_replies_with_slow_reader() {
        const REQUESTS: usize = 3000;
        let value = vec![b'v'; 4000];

        for runtime in [RuntimeType::Poll, RuntimeType::Mio] {
            let server = TestServer::start(runtime);
            let mut client = server.connect();

            client.write_all(&request(&[b"set", b"big", &value])).unwrap();
            assert_eq!(read_response(&mut client), (Status::Ok, vec![]));

            // About 12 MB of replies: far more than the socket buffers hold,
            // so the server must park on writability and resume.
            let batch = request(&[b"get", b"big"]).repeat(REQUESTS);
            let mut writer = client.try_clone().unwrap();
            let sender = thread::spawn(move || writer.write_all(&batch).unwrap());

            thread::sleep(Duration::from_millis(300));
            for _ in 0..REQUESTS {
                assert_eq!(read_response(&mut client), (Status::Ok, value.clone()));
            }
            sender.join().unwrap();

            // Still responsive afterwards
            client.write_all(&request(&[b"del", b"big"])).unwrap();
            assert_eq!(read_response(&mut client), (Status::Ok, vec![]));

            server.stop();
        }
    }
}
