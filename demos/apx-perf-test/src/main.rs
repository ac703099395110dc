//! Measures round-trip latency between one producer node and one consumer node,
//! matched and routed by a local server exactly as two unrelated processes would be,
//! just colocated in one binary for ease of measurement. The producer publishes
//! successive counter values on a provide port; the consumer observes each one arrive
//! on its matching require port and the time between write and arrival is recorded.

mod definitions;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use apx_core::{
    ConnectionBase, FileManager, FixedWidthProgramFactory, GlobalLock, Greeting, NodeInstance, NodeManager, NodeMode,
    PortValueObserver, RuntimeLimits,
};

use definitions::LineDefinitionParser;

#[derive(Parser)]
#[command(version, author)]
struct Args {
    /// Number of counter values the producer publishes.
    #[arg(long, default_value_t = 1000)]
    iterations: u32,
}

/// Read bytes off `stream` until a complete greeting has arrived, parse it, and return
/// any framed bytes that arrived attached to the same read.
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

async fn exchange_greeting(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let ours = Greeting::default();
    stream.write_all(&ours.encode()).await?;
    let (theirs, leftover) = read_greeting(stream).await?;
    if !ours.is_compatible_with(&theirs) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("peer greeting {theirs:?} is incompatible with ours {ours:?}"),
        ));
    }
    Ok(leftover)
}

/// Wire a started connection to a real socket: one task drains the outbound channel to
/// the socket, another feeds inbound bytes to `message_received`. Both are left to run
/// until the socket or the connection closes; this demo's process lifetime is the
/// cleanup boundary.
fn run_connection(file_manager: Arc<FileManager>, stream: TcpStream, leftover: Vec<u8>, limits: &RuntimeLimits) -> Arc<ConnectionBase> {
    let (connection, mut outbound) = ConnectionBase::start(file_manager, limits);
    if !leftover.is_empty() {
        let _ = connection.message_received(leftover);
    }

    let (mut read_half, mut write_half) = stream.into_split();

    tokio::spawn(async move {
        while let Some(bytes) = outbound.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let reader_conn = connection.clone();
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            let n = match read_half.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if reader_conn.message_received(chunk[..n].to_vec()).is_err() {
                break;
            }
        }
    });

    connection
}

async fn handle_server_connection(mut stream: TcpStream, global_lock: Arc<GlobalLock>, limits: RuntimeLimits) -> std::io::Result<()> {
    let leftover = exchange_greeting(&mut stream).await?;
    let file_manager = Arc::new(FileManager::new(&limits));
    let node_manager = Arc::new(NodeManager::with_global_lock(
        NodeMode::Server,
        Arc::new(LineDefinitionParser),
        Arc::new(FixedWidthProgramFactory),
        file_manager.clone(),
        Some(global_lock),
    ));
    file_manager.set_observer(node_manager.clone());
    file_manager.send_ack();
    let _connection = run_connection(file_manager, stream, leftover, &limits);
    // Keep the node manager and connection alive for the life of this task; the demo
    // process exit is what tears everything down.
    std::future::pending::<()>().await;
    Ok(())
}

async fn accept_loop(listener: TcpListener, global_lock: Arc<GlobalLock>, limits: RuntimeLimits) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("accept failed: {e}");
                continue;
            }
        };
        let global_lock = global_lock.clone();
        let limits = limits.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_server_connection(stream, global_lock, limits).await {
                log::debug!("connection from {peer} ended: {e}");
            }
        });
    }
}

async fn wait_until_open(node: &Arc<NodeInstance>) {
    loop {
        if let Some(file) = node.provide_file() {
            if file.is_open() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

struct LatencyObserver {
    tx: tokio::sync::mpsc::UnboundedSender<(u32, Instant)>,
}

impl PortValueObserver for LatencyObserver {
    fn on_require_port_value(&self, _port_id: u32, data: &[u8]) {
        if let Ok(bytes) = data.try_into() {
            let _ = self.tx.send((u32::from_le_bytes(bytes), Instant::now()));
        }
    }
}

fn report(rtts: &[Duration]) {
    let mut sorted = rtts.to_vec();
    sorted.sort();
    let n = sorted.len();
    let p50 = sorted[n / 2];
    let p99 = sorted[(n * 99) / 100];
    let total: Duration = sorted.iter().sum();
    log::info!(
        "{n} round trips — min {:?} p50 {:?} p99 {:?} max {:?} mean {:?}",
        sorted[0],
        p50,
        p99,
        sorted[n - 1],
        total / n as u32,
    );
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let limits = RuntimeLimits::default();
    let global_lock = Arc::new(GlobalLock::new());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    log::info!("server listening on {addr}");
    tokio::spawn(accept_loop(listener, global_lock, limits.clone()));

    let mut producer_stream = TcpStream::connect(addr).await?;
    let producer_leftover = exchange_greeting(&mut producer_stream).await?;
    let producer_fm = Arc::new(FileManager::new(&limits));
    let producer_nodes = Arc::new(NodeManager::new(
        NodeMode::Client,
        Arc::new(LineDefinitionParser),
        Arc::new(FixedWidthProgramFactory),
        producer_fm.clone(),
    ));
    producer_fm.set_observer(producer_nodes.clone());
    let producer_node = producer_nodes.build_node(b"Producer:Counter:provide:u32").unwrap();
    producer_nodes
        .publish_local(&producer_node, b"Producer:Counter:provide:u32")
        .unwrap();
    let producer_conn = run_connection(producer_fm, producer_stream, producer_leftover, &limits);

    let mut consumer_stream = TcpStream::connect(addr).await?;
    let consumer_leftover = exchange_greeting(&mut consumer_stream).await?;
    let consumer_fm = Arc::new(FileManager::new(&limits));
    let consumer_nodes = Arc::new(NodeManager::new(
        NodeMode::Client,
        Arc::new(LineDefinitionParser),
        Arc::new(FixedWidthProgramFactory),
        consumer_fm.clone(),
    ));
    consumer_fm.set_observer(consumer_nodes.clone());
    let consumer_node = consumer_nodes.build_node(b"Consumer:Counter:require:u32").unwrap();
    consumer_nodes
        .publish_local(&consumer_node, b"Consumer:Counter:require:u32")
        .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    consumer_node.set_value_observer(Arc::new(LatencyObserver { tx }));
    let consumer_conn = run_connection(consumer_fm, consumer_stream, consumer_leftover, &limits);

    log::info!("waiting for the server to match the producer and consumer ports");
    wait_until_open(&producer_node).await;

    log::info!("publishing {} values", args.iterations);
    let mut rtts = Vec::with_capacity(args.iterations as usize);
    for i in 0..args.iterations {
        let start = Instant::now();
        producer_node.write_provide_value(0, &i.to_le_bytes()).unwrap();
        let (value, arrived) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no value arrived within the timeout")
            .expect("observer channel closed early");
        assert_eq!(value, i, "require port observed values out of order");
        rtts.push(arrived.duration_since(start));
    }

    report(&rtts);

    producer_conn.stop().await;
    consumer_conn.stop().await;
    Ok(())
}
