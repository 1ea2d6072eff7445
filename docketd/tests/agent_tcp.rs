mod common;

use common::{init_test_logging, parse_tar, test_config, test_context};
use docketd::server::serve;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::info;

async fn start_agent(max_connections: usize) -> (std::net::SocketAddr, oneshot::Sender<()>) {
    let mut config = test_config();
    config.max_connections = max_connections;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    tokio::spawn(serve(listener, test_context(config), async move {
        let _ = stop_rx.await;
    }));
    (addr, stop_tx)
}

#[tokio::test]
async fn test_tcp_session_round_trip() {
    init_test_logging();
    info!(test = "test_tcp_session_round_trip", phase = "setup");

    let (addr, stop) = start_agent(4).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"PREFIX|tcp-host\nEXEC|.|/bin/echo|over tcp\nEOF\n")
        .await
        .unwrap();

    let mut output = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut output))
        .await
        .expect("agent should close the stream")
        .unwrap();

    let entries = parse_tar(&output);
    info!(
        test = "test_tcp_session_round_trip",
        phase = "assert",
        entries = entries.len()
    );
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "./tcp-host/./_bin_echo_over_tcp.out");
    assert_eq!(entries[0].body, b"over tcp\n");
    assert_eq!(entries[1].name, "./tcp-host/./docket.log");

    let _ = stop.send(());
}

#[tokio::test]
async fn test_connection_over_capacity_is_refused() {
    init_test_logging();
    info!(test = "test_connection_over_capacity_is_refused", phase = "setup");

    let (addr, stop) = start_agent(1).await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    first.write_all(b"PREFIX|first\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    let mut refused = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), second.read_to_end(&mut refused))
        .await
        .expect("refused connection should be closed");
    // Either a clean close or a reset, but never any data.
    assert!(read.is_err() || refused.is_empty());

    first.write_all(b"EOF\n").await.unwrap();
    let mut output = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), first.read_to_end(&mut output))
        .await
        .unwrap()
        .unwrap();
    let entries = parse_tar(&output);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "./first/./docket.log");

    let _ = stop.send(());
}
