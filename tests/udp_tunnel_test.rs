//! Loopback integration tests for the UDP tunnel driver.

use bintun_tokio::{ErrorCode, TunnelConfig, TunnelEvent, UdpTunnel};
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

/// Wait for the next event matching `pred`, skipping the rest.
async fn next_matching<F>(events: &mut UnboundedReceiver<TunnelEvent>, mut pred: F) -> TunnelEvent
where
    F: FnMut(&TunnelEvent) -> bool,
{
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_message_and_disconnect_over_loopback() {
    let config = TunnelConfig::default();
    let (alpha, mut alpha_events) =
        UdpTunnel::bind("127.0.0.1:0".parse().unwrap(), 7, config.clone())
            .await
            .expect("failed to bind alpha");
    let (beta, mut beta_events) = UdpTunnel::bind("127.0.0.1:0".parse().unwrap(), 9, config)
        .await
        .expect("failed to bind beta");

    alpha.connect(beta.local_addr()).await.expect("connect failed");

    let event = next_matching(&mut alpha_events, |e| {
        matches!(e, TunnelEvent::Connected { .. })
    })
    .await;
    let TunnelEvent::Connected { device, .. } = event else {
        unreachable!()
    };
    assert_eq!(device, 9);

    let event = next_matching(&mut beta_events, |e| {
        matches!(e, TunnelEvent::Connected { .. })
    })
    .await;
    let TunnelEvent::Connected { device, info } = event else {
        unreachable!()
    };
    assert_eq!(device, 7);
    assert_eq!(info.addr(), alpha.local_addr());

    assert!(alpha.is_connected(9).await);
    assert!(beta.is_connected(7).await);

    alpha
        .send(9, Bytes::from_static(b"over the wire"))
        .await
        .expect("send failed");
    let event = next_matching(&mut beta_events, |e| {
        matches!(e, TunnelEvent::Message { .. })
    })
    .await;
    let TunnelEvent::Message { device, payload } = event else {
        unreachable!()
    };
    assert_eq!(device, 7);
    assert_eq!(&payload[..], b"over the wire");

    alpha.disconnect(9).await.expect("disconnect failed");
    let event = next_matching(&mut beta_events, |e| {
        matches!(e, TunnelEvent::Disconnected { .. })
    })
    .await;
    let TunnelEvent::Disconnected { device } = event else {
        unreachable!()
    };
    assert_eq!(device, 7);
    assert!(!beta.is_connected(7).await);

    alpha.close();
    beta.close();
}

#[tokio::test]
async fn send_to_unknown_device_errors() {
    let (tunnel, mut events) =
        UdpTunnel::bind("127.0.0.1:0".parse().unwrap(), 7, TunnelConfig::default())
            .await
            .expect("failed to bind");

    let err = tunnel
        .send(9, Bytes::from_static(b"nobody home"))
        .await
        .expect_err("send to a stranger should fail");
    assert!(matches!(err, bintun_tokio::Error::Tunnel(_)));

    let event = next_matching(&mut events, |e| matches!(e, TunnelEvent::Error { .. })).await;
    let TunnelEvent::Error { device, code, .. } = event else {
        unreachable!()
    };
    assert_eq!(device, 9);
    assert_eq!(code, ErrorCode::DeviceNotConnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stats_reflect_traffic() {
    let config = TunnelConfig::default();
    let (alpha, mut alpha_events) =
        UdpTunnel::bind("127.0.0.1:0".parse().unwrap(), 7, config.clone())
            .await
            .expect("failed to bind alpha");
    let (beta, _beta_events) = UdpTunnel::bind("127.0.0.1:0".parse().unwrap(), 9, config)
        .await
        .expect("failed to bind beta");

    alpha.connect(beta.local_addr()).await.expect("connect failed");
    next_matching(&mut alpha_events, |e| {
        matches!(e, TunnelEvent::Connected { .. })
    })
    .await;

    let stats = alpha.stats().await.expect("stats failed");
    assert_eq!(stats.handshakes_completed, 1);
    assert!(stats.frames_sent >= 2);
    assert!(stats.frames_received >= 1);
}
