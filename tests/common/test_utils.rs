//! Shared test utilities for integration tests.
//!
//! Every helper binds to `127.0.0.1:0`, so tests never fight over fixed ports.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use simnet::{ConditionProfile, SimulatedListener, SimulatedStream, SimulatedUdpSocket};
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

/// Upper bound for any single network operation in a test.
#[allow(dead_code)]
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber, honouring `RUST_LOG`.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// An ephemeral loopback address.
#[allow(dead_code)]
pub fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

/// A shimmed client connected to a raw server, so only the client side
/// experiences the profile.
#[allow(dead_code)]
pub async fn shimmed_client(
    profile: Arc<ConditionProfile>,
) -> (SimulatedStream<TcpStream>, TcpStream) {
    let listener = TcpListener::bind(loopback()).await.expect("bind listener");
    let address = listener.local_addr().expect("listener address").to_string();

    let dialer = simnet::Dialer::new(profile);
    let (client, accepted) = tokio::join!(dialer.dial(&address), listener.accept());
    let client = client.expect("dial");
    let (server, _) = accepted.expect("accept");
    (client, server)
}

/// A client and server that both experience `profile`.
#[allow(dead_code)]
pub async fn shimmed_pair(
    profile: Arc<ConditionProfile>,
) -> (SimulatedStream<TcpStream>, SimulatedStream<TcpStream>) {
    let listener = SimulatedListener::bind(loopback(), profile.clone())
        .await
        .expect("bind listener");
    let address = listener.local_addr().expect("listener address").to_string();

    let dialer = simnet::Dialer::new(profile);
    let (client, accepted) = tokio::join!(dialer.dial(&address), listener.accept());
    let client = client.expect("dial");
    let (server, _) = accepted.expect("accept");
    (client, server)
}

/// A sender and receiver on loopback; the sender's default remote is the receiver.
#[allow(dead_code)]
pub async fn udp_pair(
    sender_profile: Arc<ConditionProfile>,
    receiver_profile: Arc<ConditionProfile>,
) -> (SimulatedUdpSocket, SimulatedUdpSocket) {
    let receiver = SimulatedUdpSocket::bind(receiver_profile, loopback(), None)
        .await
        .expect("bind receiver");
    let sender = SimulatedUdpSocket::bind(sender_profile, loopback(), Some(receiver.local_addr()))
        .await
        .expect("bind sender");
    (sender, receiver)
}

/// Reads a raw stream until the peer shuts down.
#[allow(dead_code)]
pub async fn read_until_eof(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .expect("peer never shut down")
        .expect("read");
    received
}
