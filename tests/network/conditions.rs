//! Stream shim behaviour over real TCP loopback connections.
//!
//! Only the client is shimmed in most tests so each effect is observed in one
//! direction against a plain `TcpStream`.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{init_tracing, read_until_eof, shimmed_client, shimmed_pair, IO_TIMEOUT};
use serial_test::serial;
use simnet::{ConditionProfile, ShimStats};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn test_passthrough_is_transparent() {
    init_tracing();
    let (client, mut server) = shimmed_client(ConditionProfile::passthrough().into()).await;

    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    for chunk in payload.chunks(1000) {
        client.write_all(chunk).await.unwrap();
    }
    client.close().await.unwrap();

    assert_eq!(read_until_eof(&mut server).await, payload);
    let stats = client.stats();
    assert_eq!(stats.units_sent, 10);
    assert_eq!(stats.units_dropped, 0);
    assert_eq!(stats.units_duplicated, 0);
    assert_eq!(stats.units_reordered, 0);
}

#[tokio::test]
async fn test_passthrough_both_directions() {
    init_tracing();
    let (client, server) = shimmed_pair(ConditionProfile::passthrough().into()).await;

    client.write_all(b"request").await.unwrap();
    let mut buf = [0u8; 32];
    let n = tokio::time::timeout(IO_TIMEOUT, server.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"request");

    server.write_all(b"response").await.unwrap();
    let n = tokio::time::timeout(IO_TIMEOUT, client.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"response");

    client.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_loss_rate_one_delivers_nothing() {
    init_tracing();
    let (client, mut server) = shimmed_client(ConditionProfile::lossy(1.0).into()).await;

    for i in 0..20u8 {
        assert_eq!(client.write(&[i; 8]).await.unwrap(), 8);
    }
    client.close().await.unwrap();

    assert!(read_until_eof(&mut server).await.is_empty());
    assert_eq!(client.stats().units_dropped, 20);
}

#[tokio::test]
async fn test_duplicate_rate_one_delivers_every_unit_twice() {
    init_tracing();
    let profile = ConditionProfile::builder().duplicate_rate(1.0).build();
    let (client, mut server) = shimmed_client(profile.into()).await;

    for unit in [b"A", b"B", b"C"] {
        client.write(unit).await.unwrap();
    }
    client.close().await.unwrap();

    assert_eq!(read_until_eof(&mut server).await, b"AABBCC");
    assert_eq!(client.stats().units_duplicated, 3);
}

#[tokio::test]
#[serial]
async fn test_ping_not_received_before_latency() {
    init_tracing();
    let profile = ConditionProfile::builder()
        .latency(Duration::from_millis(100))
        .build();
    let (client, server) = shimmed_pair(profile.into()).await;

    client.write(b"PING").await.unwrap();
    let written = Instant::now();

    let mut received = Vec::new();
    let mut buf = [0u8; 4];
    while received.len() < 4 {
        let n = tokio::time::timeout(IO_TIMEOUT, server.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(n, 0, "connection ended before PING arrived");
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, b"PING");
    assert!(
        written.elapsed() >= Duration::from_millis(100),
        "PING arrived {:?} after write returned",
        written.elapsed()
    );

    client.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_bandwidth_cap_delays_transfer() {
    init_tracing();
    let profile = ConditionProfile::builder().bandwidth(1024).build();
    let (client, mut server) = shimmed_client(profile.into()).await;

    let payload = vec![7u8; 1024];
    let start = Instant::now();
    client.write(&payload).await.unwrap();

    let mut received = vec![0u8; 1024];
    tokio::time::timeout(IO_TIMEOUT, server.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, payload);
    assert!(
        start.elapsed() >= Duration::from_secs(1),
        "1 KiB at 1 KiB/s took only {:?}",
        start.elapsed()
    );
}

#[tokio::test]
#[serial]
async fn test_reordered_write_is_overtaken_by_later_write() {
    init_tracing();
    let profile = Arc::new(ConditionProfile::builder().latency_ms(200).build());
    let (client, mut server) = shimmed_client(profile.clone()).await;

    profile.set_reorder_rate(1.0);
    client.write(b"late").await.unwrap();
    profile.set_reorder_rate(0.0);
    profile.set_latency(Duration::ZERO);
    client.write(b"early").await.unwrap();

    let mut buf = [0u8; 9];
    tokio::time::timeout(IO_TIMEOUT, server.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"earlylate");
}

#[tokio::test]
async fn test_seeded_runs_make_identical_decisions() {
    init_tracing();

    async fn run(seed: u64) -> (ShimStats, usize) {
        let profile = ConditionProfile::builder()
            .loss_rate(0.3)
            .duplicate_rate(0.3)
            .reorder_rate(0.3)
            .seed(seed)
            .build();
        let (client, mut server) = shimmed_client(profile.into()).await;
        for i in 0..40u8 {
            client.write(&[i]).await.unwrap();
        }
        // Let deferred writes land before closing
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.close().await.unwrap();
        let received = read_until_eof(&mut server).await;
        (client.stats(), received.len())
    }

    let first = run(1234).await;
    let second = run(1234).await;
    assert_eq!(first, second);
    assert!(first.0.units_dropped > 0);
    assert!(first.0.units_duplicated > 0);
}

#[tokio::test]
async fn test_conditions_change_mid_connection() {
    init_tracing();
    let profile = Arc::new(ConditionProfile::passthrough());
    let (client, mut server) = shimmed_client(profile.clone()).await;

    client.write(b"kept").await.unwrap();
    profile.set_loss_rate(1.0);
    client.write(b"lost").await.unwrap();
    profile.set_loss_rate(0.0);
    client.write(b"kept").await.unwrap();
    client.close().await.unwrap();

    assert_eq!(read_until_eof(&mut server).await, b"keptkept");
}

#[tokio::test]
async fn test_close_flushes_queued_writes() {
    init_tracing();
    let (client, mut server) = shimmed_client(ConditionProfile::passthrough().into()).await;

    for _ in 0..50 {
        client.write(b"0123456789").await.unwrap();
    }
    client.close().await.unwrap();

    assert_eq!(read_until_eof(&mut server).await.len(), 500);
}

#[tokio::test]
async fn test_peer_shutdown_reads_as_end_of_stream() {
    init_tracing();
    let (client, mut server) = shimmed_client(ConditionProfile::passthrough().into()).await;

    server.shutdown().await.unwrap();
    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(IO_TIMEOUT, client.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}
