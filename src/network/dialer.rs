//! Outbound TCP connections through a shared profile.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{SimnetError, SimnetResult};
use crate::network::stream::SimulatedStream;
use crate::profile::ConditionProfile;

/// Originates TCP connections that experience the conditions of a [`ConditionProfile`].
///
/// Partitioned addresses fail with [`SimnetError::Partitioned`] before any real
/// connection attempt is made.
#[derive(Debug, Clone)]
pub struct Dialer {
    profile: Arc<ConditionProfile>,
}

impl Dialer {
    /// Creates a dialer whose connections all share `profile`.
    #[must_use]
    pub fn new(profile: Arc<ConditionProfile>) -> Self {
        Self { profile }
    }

    /// Connects to `address` (`host:port`) and wraps the connection.
    ///
    /// The partition check compares `address` exactly as given.
    pub async fn dial(&self, address: &str) -> SimnetResult<SimulatedStream<TcpStream>> {
        if self.profile.is_partitioned(address) {
            debug!(address, "dial refused: partitioned");
            return Err(SimnetError::Partitioned {
                address: address.to_owned(),
            });
        }

        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| SimnetError::DialFailed {
                address: address.to_owned(),
                source,
            })?;
        debug!(address, "dialed");
        Ok(SimulatedStream::new(stream, self.profile.clone()))
    }

    /// Like [`dial`](Self::dial), but gives up with [`SimnetError::TimedOut`] after `timeout`.
    pub async fn dial_timeout(
        &self,
        address: &str,
        timeout: Duration,
    ) -> SimnetResult<SimulatedStream<TcpStream>> {
        tokio::time::timeout(timeout, self.dial(address))
            .await
            .map_err(|_elapsed| SimnetError::TimedOut)?
    }

    /// The profile handed to every connection this dialer makes.
    #[must_use]
    pub fn profile(&self) -> &Arc<ConditionProfile> {
        &self.profile
    }
}
