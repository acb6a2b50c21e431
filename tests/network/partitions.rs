//! Partition behaviour on dial, accept and datagram send.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{init_tracing, loopback, shimmed_client, udp_pair, IO_TIMEOUT};
use simnet::{ConditionProfile, Dialer, SimnetError, SimulatedListener};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

#[tokio::test]
async fn test_dial_to_partitioned_address_never_touches_network() {
    init_tracing();
    let listener = TcpListener::bind(loopback()).await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let profile = Arc::new(ConditionProfile::builder().partition(address.clone()).build());
    let dialer = Dialer::new(profile);

    match dialer.dial(&address).await {
        Err(SimnetError::Partitioned { address: refused }) => assert_eq!(refused, address),
        other => panic!("expected partition error, got {:?}", other),
    }
    let accepted = tokio::time::timeout(Duration::from_millis(150), listener.accept()).await;
    assert!(accepted.is_err(), "a connection reached the listener");
}

#[tokio::test]
async fn test_partition_error_maps_to_host_unreachable() {
    init_tracing();
    let dialer = Dialer::new(Arc::new(
        ConditionProfile::builder().partition("10.1.2.3:80").build(),
    ));
    let err = dialer
        .dial_timeout("10.1.2.3:80", Duration::from_secs(1))
        .await
        .unwrap_err();
    let io_err: io::Error = err.into();
    assert_eq!(io_err.kind(), io::ErrorKind::HostUnreachable);
    assert!(io_err.to_string().contains("10.1.2.3:80"));
}

#[tokio::test]
async fn test_removing_partition_restores_reachability() {
    init_tracing();
    let listener = TcpListener::bind(loopback()).await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let profile = Arc::new(ConditionProfile::passthrough());
    let dialer = Dialer::new(profile.clone());

    profile.add_partition(address.clone());
    assert!(dialer.dial(&address).await.unwrap_err().is_partitioned());

    profile.remove_partition(&address);
    let (client, accepted) = tokio::join!(dialer.dial(&address), listener.accept());
    let client = client.unwrap();
    accepted.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_partition_is_not_retroactive() {
    init_tracing();
    let profile = Arc::new(ConditionProfile::passthrough());
    let (client, mut server) = shimmed_client(profile.clone()).await;

    profile.add_partition(client.peer_addr().unwrap().to_string());
    client.write_all(b"still flowing").await.unwrap();

    let mut buf = [0u8; 13];
    tokio::time::timeout(IO_TIMEOUT, server.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"still flowing");
}

#[tokio::test]
async fn test_accept_does_not_check_partitions() {
    init_tracing();
    let profile = Arc::new(ConditionProfile::passthrough());
    let listener = SimulatedListener::bind(loopback(), profile.clone()).await.unwrap();
    let address = listener.local_addr().unwrap();
    profile.add_partition(address.to_string());

    let (client, accepted) = tokio::join!(TcpStream::connect(address), listener.accept());
    let client = client.unwrap();
    let (server, peer) = accepted.unwrap();
    assert_eq!(peer, client.local_addr().unwrap());
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_datagram_send_to_partitioned_address_fails() {
    init_tracing();
    let profile = Arc::new(ConditionProfile::passthrough());
    let (sender, receiver) = udp_pair(profile.clone(), profile.clone()).await;
    profile.add_partition(receiver.local_addr().to_string());

    let err = sender.send(b"blocked").await.unwrap_err();
    assert!(err.is_partitioned());
    assert_eq!(sender.stats().units_sent, 0);

    profile.remove_partition(&receiver.local_addr().to_string());
    assert_eq!(sender.send(b"open").await.unwrap(), 4);
    let mut buf = [0u8; 8];
    let (n, _) = tokio::time::timeout(IO_TIMEOUT, receiver.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"open");
}
