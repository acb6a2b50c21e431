//! # simnet
//!
//! simnet emulates adverse network conditions (latency, jitter, bandwidth
//! limits, packet loss, duplication, reordering and partitions) by wrapping
//! real Tokio transports. Applications keep using an ordinary byte stream or
//! datagram socket and observe the effects of a bad network without one being
//! present.
//!
//! - [`ConditionProfile`] holds the conditions and the shared random source.
//! - [`Dialer`] and [`SimulatedListener`] produce [`SimulatedStream`]s over TCP.
//! - [`SimulatedUdpSocket`] wraps a UDP socket.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use simnet::{ConditionProfile, Dialer, SimulatedListener};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), simnet::SimnetError> {
//! let profile = ConditionProfile::builder()
//!     .latency(Duration::from_millis(100))
//!     .jitter(Duration::from_millis(50))
//!     .bandwidth(256 * 1024)
//!     .loss_rate(0.05)
//!     .seed(42)
//!     .build_shared();
//!
//! let listener = SimulatedListener::bind("127.0.0.1:0", profile.clone()).await?;
//! let address = listener.local_addr()?.to_string();
//!
//! let dialer = Dialer::new(profile);
//! let client = dialer.dial(&address).await?;
//! let (server, _) = listener.accept().await?;
//!
//! client.write_all(b"Hello, simnet!").await?;
//! let mut buf = [0u8; 64];
//! let n = server.read(&mut buf).await?;
//! # let _ = n;
//! # Ok(())
//! # }
//! ```
//!
//! With a non-zero seed every loss, duplication, reordering and jitter
//! decision is reproducible, as long as the same calls happen in the same
//! order.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use error::{SimnetError, SimnetResult};
pub use network::datagram::SimulatedUdpSocket;
pub use network::dialer::Dialer;
pub use network::listener::SimulatedListener;
pub use network::stats::ShimStats;
pub use network::stream::SimulatedStream;
pub use network::transport::Transport;
pub use profile::{ConditionProfile, ConditionProfileBuilder};

#[doc(hidden)]
pub mod error;
pub mod prelude;
pub mod profile;
/// Random number generator based on PCG32.
///
/// Every condition decision is drawn from one of these, owned by the profile.
/// See the module documentation for usage details.
pub mod rng;
pub mod telemetry;
#[doc(hidden)]
pub mod test_config;
#[doc(hidden)]
pub mod network {
    pub mod datagram;
    pub mod dialer;
    pub(crate) mod lifecycle;
    pub mod listener;
    pub mod stats;
    pub mod stream;
    pub mod transport;
}

/// Capacity of every per-connection queue (stream transmit queue, datagram
/// delivery and transmission queues). Producers wait when a queue is full.
pub const QUEUE_CAPACITY: usize = 100;

// ###################
// # UNIT TESTS      #
// ###################
