//! Inbound TCP connections through a shared profile.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::error::{SimnetError, SimnetResult};
use crate::network::stream::SimulatedStream;
use crate::profile::ConditionProfile;

/// Accepts TCP connections and wraps each in a [`SimulatedStream`].
///
/// Accepting does not consult the partition set: a partition means "I cannot
/// reach you" from the originating side only.
#[derive(Debug)]
pub struct SimulatedListener {
    listener: TcpListener,
    profile: Arc<ConditionProfile>,
}

impl SimulatedListener {
    /// Decorates an existing listener.
    #[must_use]
    pub fn new(listener: TcpListener, profile: Arc<ConditionProfile>) -> Self {
        Self { listener, profile }
    }

    /// Binds a new listener at `address`.
    pub async fn bind(
        address: impl ToSocketAddrs,
        profile: Arc<ConditionProfile>,
    ) -> SimnetResult<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| SimnetError::io("bind listener", e))?;
        Ok(Self::new(listener, profile))
    }

    /// Waits for the next inbound connection.
    pub async fn accept(&self) -> SimnetResult<(SimulatedStream<TcpStream>, SocketAddr)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|source| SimnetError::AcceptFailed { source })?;
        debug!(%peer, "accepted");
        Ok((SimulatedStream::new(stream, self.profile.clone()), peer))
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SimnetResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| SimnetError::io("local address", e))
    }

    /// The profile handed to every accepted connection.
    #[must_use]
    pub fn profile(&self) -> &Arc<ConditionProfile> {
        &self.profile
    }

    /// Returns the real listener. Dropping it closes the listener.
    #[must_use]
    pub fn into_inner(self) -> TcpListener {
        self.listener
    }
}
