//! pollkv command-line client.
//!
//! Sends one command and prints the reply:
//!
//! ```text
//! $ pollkv-client set greeting hello
//! (ok)
//! $ pollkv-client get greeting
//! (ok) hello
//! $ pollkv-client get nothing
//! (nx)
//! ```

use clap::Parser;
use pollkv::protocol::codec::{decode_response, encode_request, HEADER_LEN, MAX_MSG};
use pollkv::protocol::{FrameError, Status};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// A simple pollkv client
#[derive(Debug, Parser)]
#[command(name = "pollkv-client")]
#[command(about = "Send a single command to a pollkv server", long_about = None)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:1234")]
    addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Command name followed by its arguments, e.g. `set key value`
    #[arg(required = true, num_args = 1..)]
    command: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut stream = TcpStream::connect(&args.addr).await?;
    debug!(
        peer = %stream.peer_addr()?,
        local = %stream.local_addr()?,
        "Connected to server"
    );

    let words: Vec<&[u8]> = args.command.iter().map(|w| w.as_bytes()).collect();
    let request = encode_request(&words)?;
    stream.write_all(&request).await?;

    let (status, payload) = read_response(&mut stream).await?;
    let text = String::from_utf8_lossy(&payload);
    match status {
        Status::Ok if payload.is_empty() => println!("(ok)"),
        Status::Ok => println!("(ok) {text}"),
        Status::Nx => println!("(nx)"),
        Status::Err => println!("(err) {text}"),
    }

    Ok(())
}

/// Read exactly one response frame.
async fn read_response(
    stream: &mut TcpStream,
) -> Result<(Status, Vec<u8>), Box<dyn std::error::Error>> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await?;

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_MSG {
        return Err(FrameError::FrameTooLong(len).into());
    }

    let mut frame = vec![0u8; HEADER_LEN + len];
    frame[..HEADER_LEN].copy_from_slice(&header);
    stream.read_exact(&mut frame[HEADER_LEN..]).await?;

    let (status, payload) = decode_response(&frame)?;
    Ok((status, payload.to_vec()))
}
