//! Integration tests for the paired TCP + UDP endpoint.
//!
//! These run over real localhost sockets: one side accepts, the other
//! connects, and bytes are pushed through both transports.

use std::time::Duration;

use bytes::BytesMut;
use tidewire_transport::{
    DEFAULT_MAX_DATAGRAM_SIZE, TransportEndpoint, TransportError,
    TransportListener,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Binds a listener on an OS-assigned port and connects one peer to it.
async fn endpoint_pair() -> (TransportEndpoint, TransportEndpoint) {
    let listener = TransportListener::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = listener.local_addr().expect("local addr");

    let server = tokio::spawn(async move {
        listener.accept().await.expect("should accept")
    });
    let client = TransportEndpoint::connect(addr)
        .await
        .expect("should connect");
    let server = server.await.expect("accept task");
    (client, server)
}

#[tokio::test]
async fn test_handshake_exchanges_datagram_ports() {
    let (client, server) = endpoint_pair().await;

    assert_eq!(
        client.peer_datagram_addr(),
        server.local_datagram_addr().unwrap()
    );
    assert_eq!(
        server.peer_datagram_addr(),
        client.local_datagram_addr().unwrap()
    );
    assert_ne!(client.id(), server.id());
}

#[tokio::test]
async fn test_reliable_bytes_flow_both_ways() {
    let (client, server) = endpoint_pair().await;
    let mut client = client.into_split(DEFAULT_MAX_DATAGRAM_SIZE);
    let mut server = server.into_split(DEFAULT_MAX_DATAGRAM_SIZE);

    client.reliable_tx.send(b"ping").await.unwrap();
    client.reliable_tx.flush().await.unwrap();

    let mut buf = BytesMut::new();
    while buf.len() < 4 {
        let n = server.reliable_rx.receive(&mut buf).await.unwrap();
        assert!(n > 0, "stream closed early");
    }
    assert_eq!(&buf[..], b"ping");

    server.reliable_tx.send(b"pong").await.unwrap();
    let mut buf = BytesMut::new();
    while buf.len() < 4 {
        client.reliable_rx.receive(&mut buf).await.unwrap();
    }
    assert_eq!(&buf[..], b"pong");
}

#[tokio::test]
async fn test_datagrams_reach_the_paired_socket() {
    let (client, server) = endpoint_pair().await;
    let mut client = client.into_split(DEFAULT_MAX_DATAGRAM_SIZE);
    let mut server = server.into_split(DEFAULT_MAX_DATAGRAM_SIZE);

    client.unreliable_tx.send(&[0, 0, 0, 7]).await.unwrap();
    let datagram = tokio::time::timeout(
        Duration::from_secs(2),
        server.unreliable_rx.receive(),
    )
    .await
    .expect("datagram should arrive on localhost")
    .unwrap();
    assert_eq!(&datagram[..], &[0, 0, 0, 7]);
}

#[tokio::test]
async fn test_receive_returns_zero_after_peer_close() {
    let (client, server) = endpoint_pair().await;
    let client = client.into_split(DEFAULT_MAX_DATAGRAM_SIZE);
    let mut server = server.into_split(DEFAULT_MAX_DATAGRAM_SIZE);

    client.reliable_tx.close().await.unwrap();

    let mut buf = BytesMut::new();
    let n = server.reliable_rx.receive(&mut buf).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_accept_fails_when_peer_hangs_up_mid_handshake() {
    let listener = TransportListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept = tokio::spawn(async move { listener.accept().await });

    // A raw stream that sends one byte of a two-byte port, then hangs up.
    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(&[0x1f]).await.unwrap();
    drop(raw);

    let result = accept.await.unwrap();
    assert!(matches!(result, Err(TransportError::ConnectionClosed(_))));
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    // Bind then drop so the port is (very likely) unused.
    let listener = TransportListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = TransportEndpoint::connect(addr).await;
    assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
}
