use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use udp_transport::{
    resolve_destination, Exchange, TransportConfig, TransportError, UdpTransport,
    DEFAULT_TIMEOUT_MS,
};

#[tokio::test]
async fn exchange_returns_single_reply_datagram() {
    let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind server");
    let addr = server.local_addr().expect("server addr");

    let responder = tokio::spawn(async move {
        let mut buf = [0u8; 128];
        let (len, peer) = server.recv_from(&mut buf).await.expect("recv");
        assert_eq!(&buf[..len], b"report 1");
        server
            .send_to(br#"{"ID": "1", "Product": "KC-P30"}"#, peer)
            .await
            .expect("reply");
    });

    let transport = transport_for(addr, Duration::from_secs(2));
    let reply = transport.exchange("report 1").await.expect("exchange");
    assert_eq!(reply, br#"{"ID": "1", "Product": "KC-P30"}"#.to_vec());
    responder.await.expect("responder");
}

#[tokio::test]
async fn silent_destination_times_out_after_deadline() {
    let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind server");
    let addr = server.local_addr().expect("server addr");

    let transport = transport_for(addr, Duration::from_millis(DEFAULT_TIMEOUT_MS));
    let started = Instant::now();
    let err = transport.exchange("report 2").await.expect_err("must time out");
    let elapsed = started.elapsed();

    assert!(matches!(err, TransportError::Timeout { timeout_ms: 2_000 }));
    assert!(elapsed >= Duration::from_secs(2), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2_500), "returned late: {elapsed:?}");
    drop(server);
}

#[tokio::test]
async fn concurrent_exchanges_are_serialized() {
    let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind server");
    let addr = server.local_addr().expect("server addr");

    let responder = tokio::spawn(async move {
        let mut overlapped = false;
        let mut buf = [0u8; 128];
        for _ in 0..2 {
            let (_, peer) = server.recv_from(&mut buf).await.expect("recv");
            tokio::time::sleep(Duration::from_millis(150)).await;
            match server.try_recv_from(&mut buf) {
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                _ => overlapped = true,
            }
            server.send_to(b"{}", peer).await.expect("reply");
        }
        overlapped
    });

    let transport = Arc::new(transport_for(addr, Duration::from_secs(2)));
    let first = {
        let transport = transport.clone();
        async move { transport.exchange("report 2").await }
    };
    let second = {
        let transport = transport.clone();
        async move { transport.exchange("report 3").await }
    };
    let (a, b) = tokio::join!(first, second);
    a.expect("first exchange");
    b.expect("second exchange");

    assert!(!responder.await.expect("responder"), "second command sent before first reply");
}

#[tokio::test]
async fn resolve_accepts_literal_addresses() {
    let addr = resolve_destination("192.168.1.40", 7090).await.expect("literal");
    assert_eq!(addr, "192.168.1.40:7090".parse::<SocketAddr>().expect("addr"));

    let addr = resolve_destination("::1", 7090).await.expect("literal v6");
    assert!(addr.is_ipv6());
}

#[tokio::test]
async fn resolve_reports_unknown_hosts() {
    let err = UdpTransport::resolve(TransportConfig {
        host: "wallbox.invalid".to_string(),
        ..TransportConfig::default()
    })
    .await
    .expect_err("must not resolve");
    assert!(matches!(
        err,
        TransportError::Resolve { .. } | TransportError::NoAddress(_)
    ));
}

fn transport_for(addr: SocketAddr, timeout: Duration) -> UdpTransport {
    UdpTransport::with_destination(addr, None, timeout)
}
