//! Datagram shim behaviour over real UDP loopback sockets.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{init_tracing, udp_pair, IO_TIMEOUT};
use serial_test::serial;
use simnet::telemetry::{
    CollectingObserver, CompositeObserver, EventKind, EventObserver, Severity, TracingObserver,
};
use simnet::{ConditionProfile, SimnetError, SimulatedUdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn collect_for(socket: &SimulatedUdpSocket, quiet: Duration) -> Vec<Vec<u8>> {
    let mut packets = Vec::new();
    let mut buf = [0u8; 2048];
    while let Ok(Ok((n, _))) = tokio::time::timeout(quiet, socket.recv_from(&mut buf)).await {
        packets.push(buf[..n].to_vec());
    }
    packets
}

#[tokio::test]
async fn test_hello_datagram_round_trip() {
    init_tracing();
    let profile = Arc::new(ConditionProfile::passthrough());
    let (sender, receiver) = udp_pair(profile.clone(), profile).await;

    let sent = sender
        .send_to(b"Hello, simnet!", receiver.local_addr())
        .await
        .unwrap();
    assert_eq!(sent, 14);

    let mut buf = [0u8; 1024];
    let (n, from) = tokio::time::timeout(IO_TIMEOUT, receiver.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 14);
    assert_eq!(&buf[..n], b"Hello, simnet!");
    assert_eq!(from, sender.local_addr());
}

#[tokio::test]
async fn test_loss_rate_one_delivers_nothing() {
    init_tracing();
    let (sender, receiver) = udp_pair(
        Arc::new(ConditionProfile::lossy(1.0)),
        Arc::new(ConditionProfile::passthrough()),
    )
    .await;

    for i in 0..10u8 {
        assert_eq!(sender.send(&[i; 4]).await.unwrap(), 4);
    }
    assert!(collect_for(&receiver, Duration::from_millis(200)).await.is_empty());
    assert_eq!(sender.stats().units_dropped, 10);
}

#[tokio::test]
async fn test_inbound_loss_drops_before_delivery() {
    init_tracing();
    let (sender, receiver) = udp_pair(
        Arc::new(ConditionProfile::passthrough()),
        Arc::new(ConditionProfile::lossy(1.0)),
    )
    .await;

    sender.send(b"inbound").await.unwrap();
    assert!(collect_for(&receiver, Duration::from_millis(200)).await.is_empty());
    assert_eq!(receiver.stats().units_dropped, 1);
}

#[tokio::test]
async fn test_duplicate_rate_one_delivers_each_packet_at_least_twice() {
    init_tracing();
    let (sender, receiver) = udp_pair(
        Arc::new(ConditionProfile::builder().duplicate_rate(1.0).build()),
        Arc::new(ConditionProfile::passthrough()),
    )
    .await;

    for label in [b"one", b"two"] {
        sender.send(label).await.unwrap();
    }

    let packets = collect_for(&receiver, Duration::from_millis(300)).await;
    for label in [&b"one"[..], &b"two"[..]] {
        let copies = packets.iter().filter(|p| p.as_slice() == label).count();
        assert!(copies >= 2, "{:?} arrived {} times", label, copies);
    }
}

#[tokio::test]
#[serial]
async fn test_latency_applies_on_both_sides() {
    init_tracing();
    let profile = Arc::new(ConditionProfile::high_latency(50));
    let (sender, receiver) = udp_pair(profile.clone(), profile).await;

    let start = Instant::now();
    sender.send(b"slow").await.unwrap();
    let mut buf = [0u8; 16];
    tokio::time::timeout(IO_TIMEOUT, receiver.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
#[serial]
async fn test_reordered_packet_arrives_after_later_one() {
    init_tracing();
    let sender_profile = Arc::new(ConditionProfile::builder().latency_ms(150).build());
    let (sender, receiver) =
        udp_pair(sender_profile.clone(), Arc::new(ConditionProfile::passthrough())).await;

    sender_profile.set_reorder_rate(1.0);
    sender.send(b"first").await.unwrap();
    sender_profile.set_reorder_rate(0.0);
    sender_profile.set_latency(Duration::ZERO);
    sender.send(b"second").await.unwrap();

    let packets = collect_for(&receiver, Duration::from_millis(500)).await;
    assert_eq!(packets, vec![b"second".to_vec(), b"first".to_vec()]);
    assert_eq!(sender.stats().units_reordered, 1);
}

#[tokio::test]
async fn test_burst_larger_than_queue_is_delivered() {
    init_tracing();
    let profile = Arc::new(ConditionProfile::passthrough());
    let (sender, receiver) = udp_pair(profile.clone(), profile).await;
    let receiver = Arc::new(receiver);

    let total = simnet::QUEUE_CAPACITY + 50;
    let collector = {
        let receiver = receiver.clone();
        tokio::spawn(async move {
            let mut count = 0;
            let mut buf = [0u8; 16];
            while count < total {
                match tokio::time::timeout(IO_TIMEOUT, receiver.recv_from(&mut buf)).await {
                    Ok(Ok(_)) => count += 1,
                    _ => break,
                }
            }
            count
        })
    };

    for i in 0..total {
        sender.send(&(i as u32).to_be_bytes()).await.unwrap();
    }
    assert_eq!(collector.await.unwrap(), total);
}

#[tokio::test]
async fn test_closed_socket_rejects_operations() {
    init_tracing();
    let profile = Arc::new(ConditionProfile::passthrough());
    let (sender, receiver) = udp_pair(profile.clone(), profile).await;

    sender.close().await.unwrap();
    assert!(matches!(sender.send(b"x").await, Err(SimnetError::Closed)));
    let mut buf = [0u8; 4];
    assert!(matches!(
        sender.recv_from(&mut buf).await,
        Err(SimnetError::Closed)
    ));
    drop(receiver);
}

#[tokio::test]
async fn test_observers_see_lifecycle_but_no_errors_on_clean_run() {
    init_tracing();
    let collecting = Arc::new(CollectingObserver::new());
    let observers: Vec<Arc<dyn EventObserver>> = vec![Arc::new(TracingObserver), collecting.clone()];
    let composite = CompositeObserver::from_observers(observers);
    let profile = Arc::new(
        ConditionProfile::builder()
            .observer(Arc::new(composite))
            .build(),
    );
    let (sender, receiver) = udp_pair(profile.clone(), profile).await;

    sender.send(b"quiet").await.unwrap();
    assert_eq!(collect_for(&receiver, Duration::from_millis(200)).await.len(), 1);
    assert!(!collecting.has_event(EventKind::Transmission));
    assert!(!collecting.has_event(EventKind::Reception));

    let sender_addr = sender.local_addr();
    receiver.close().await.unwrap();
    drop(receiver);
    drop(sender);

    // Only the socket left unclosed is reported
    let lifecycle = collecting.events_of_kind(EventKind::Lifecycle);
    assert_eq!(lifecycle.len(), 1);
    assert_eq!(lifecycle[0].severity, Severity::Info);
    assert_eq!(lifecycle[0].context["local"], sender_addr.to_string());
}
