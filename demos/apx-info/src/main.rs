//! Connects to an APX endpoint, exchanges the greeting handshake, and logs every
//! remote file announcement, acknowledgement, and error the peer sends. Wires a real
//! `TcpStream` to a bare `FileManager` — no node manager, no routing, just the protocol
//! traffic a connection produces.

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use apx_core::{ConnectionBase, File, FileManager, FileManagerObserver, Greeting, RuntimeLimits};

#[derive(Parser)]
#[command(version, author)]
struct Args {
    /// Address of the peer to connect to, e.g. 127.0.0.1:7700.
    address: String,
}

struct Logger;

impl FileManagerObserver for Logger {
    fn remote_file_published(&self, file: Arc<File>) {
        log::info!(
            "file published: {:?} at 0x{:08x}, {} bytes, kind {:?}",
            String::from_utf8_lossy(&file.name),
            file.address,
            file.size,
            file.kind,
        );
    }

    fn ack_received(&self) {
        log::info!("peer sent ack");
    }

    fn error_received(&self, code: u32, data: &[u8]) {
        log::warn!("peer reported error {code}: {:?}", String::from_utf8_lossy(data));
    }

    fn heartbeat_acknowledged(&self) {
        log::debug!("heartbeat acknowledged");
    }

    fn ping_acknowledged(&self) {
        log::debug!("ping acknowledged");
    }
}

/// Read bytes off `stream` until a complete greeting has arrived, parse it, and return
/// it along with any framed bytes that arrived attached to the same read.
async fn read_greeting(stream: &mut TcpStream) -> std::io::Result<(Greeting, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        match Greeting::decode(&buf) {
            Ok((greeting, consumed)) => return Ok((greeting, buf.split_off(consumed))),
            Err(_) => {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed during greeting",
                    ));
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut stream = TcpStream::connect(&args.address).await?;
    log::info!("connected to {}", args.address);

    let ours = Greeting::default();
    stream.write_all(&ours.encode()).await?;
    let (theirs, leftover) = read_greeting(&mut stream).await?;
    if !ours.is_compatible_with(&theirs) {
        log::error!("peer greeting {theirs:?} is incompatible with ours {ours:?}");
        return Ok(());
    }
    log::info!("greeting exchanged: {theirs:?}");

    let limits = RuntimeLimits::default();
    let file_manager = Arc::new(FileManager::new(&limits));
    file_manager.set_observer(Arc::new(Logger));
    let (connection, mut outbound) = ConnectionBase::start(file_manager.clone(), &limits);

    if !leftover.is_empty() {
        connection
            .message_received(leftover)
            .map_err(std::io::Error::other)?;
    }

    let (mut read_half, mut write_half) = stream.into_split();

    let writer = tokio::spawn(async move {
        while let Some(bytes) = outbound.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut chunk = [0u8; 4096];
    loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if connection.message_received(chunk[..n].to_vec()).is_err() {
            break;
        }
    }

    log::info!("connection closed");
    connection.stop().await;
    writer.abort();
    Ok(())
}
