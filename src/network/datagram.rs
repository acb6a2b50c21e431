//! Condition-applying wrapper around a UDP socket.
//!
//! Every datagram is one unit and passes through the same pipeline in both
//! directions: loss, then duplication (an extra placement after its own
//! latency), then reordering (placement deferred on an independent timer) or
//! a regular placement after the computed latency.
//!
//! Outbound packets are placed on the transmission queue drained by the
//! outbound task. Inbound packets are read by the inbound task and placed on
//! the delivery queue consumed by [`SimulatedUdpSocket::recv_from`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{SimnetError, SimnetResult};
use crate::network::lifecycle::{with_deadline, CloseSignal, Deadlines};
use crate::network::stats::{ShimStats, StatsCell};
use crate::profile::ConditionProfile;
use crate::report_event_to;
use crate::telemetry::{EventKind, Severity};
use crate::QUEUE_CAPACITY;

/// Largest payload a UDP datagram can carry.
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// First pause after a failed receive; doubles per consecutive failure.
const RECEIVE_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Upper bound for the pause between failed receives.
const RECEIVE_BACKOFF_MAX: Duration = Duration::from_secs(1);

fn next_receive_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(RECEIVE_BACKOFF_MAX)
}

/// One datagram and the peer it came from or goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Packet {
    data: Vec<u8>,
    addr: SocketAddr,
}

/// Everything the pipeline needs, cloneable into timers and tasks.
#[derive(Clone)]
struct Pipeline {
    profile: Arc<ConditionProfile>,
    close: CloseSignal,
    stats: StatsCell,
}

impl Pipeline {
    /// Applies loss, duplication, reordering and latency, then places `packet` on `queue`.
    async fn run(&self, packet: Packet, queue: &mpsc::Sender<Packet>) {
        if self.profile.should_drop() {
            trace!(len = packet.data.len(), peer = %packet.addr, "datagram lost");
            self.stats.update(|s| s.units_dropped += 1);
            return;
        }

        if self.profile.should_duplicate() {
            trace!(len = packet.data.len(), peer = %packet.addr, "datagram duplicated");
            self.stats.update(|s| s.units_duplicated += 1);
            self.place(packet.clone(), queue).await;
        }

        if self.profile.should_reorder() {
            let delay = self.profile.delay_for(packet.data.len());
            trace!(len = packet.data.len(), ?delay, "datagram deferred");
            self.stats.update(|s| s.units_reordered += 1);

            let close = self.close.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                if close.sleep(delay).await {
                    close.send(&queue, packet).await;
                }
            });
        } else {
            self.place(packet, queue).await;
        }
    }

    async fn place(&self, packet: Packet, queue: &mpsc::Sender<Packet>) {
        let delay = self.profile.delay_for(packet.data.len());
        if self.close.sleep(delay).await {
            self.close.send(queue, packet).await;
        }
    }
}

/// A UDP endpoint that experiences the conditions of a [`ConditionProfile`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use simnet::{ConditionProfile, SimulatedUdpSocket};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), simnet::SimnetError> {
/// let profile = Arc::new(ConditionProfile::passthrough());
/// let any: std::net::SocketAddr = ([127, 0, 0, 1], 0).into();
///
/// let receiver = SimulatedUdpSocket::bind(profile.clone(), any, None).await?;
/// let sender = SimulatedUdpSocket::bind(profile, any, Some(receiver.local_addr())).await?;
///
/// sender.send(b"Hello, simnet!").await?;
///
/// let mut buf = [0u8; 64];
/// let (n, from) = receiver.recv_from(&mut buf).await?;
/// assert_eq!(&buf[..n], b"Hello, simnet!");
/// assert_eq!(from, sender.local_addr());
/// # Ok(())
/// # }
/// ```
pub struct SimulatedUdpSocket {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    pipeline: Pipeline,
    outbound: mpsc::Sender<Packet>,
    delivered: AsyncMutex<mpsc::Receiver<Packet>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    deadlines: Deadlines,
    local_addr: SocketAddr,
    peer_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for SimulatedUdpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedUdpSocket")
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.pipeline.close.is_closed())
            .finish_non_exhaustive()
    }
}

impl SimulatedUdpSocket {
    /// Binds a real UDP socket at `local` and wraps it.
    ///
    /// `remote`, if given, is the default destination for [`send`](Self::send).
    pub async fn bind(
        profile: Arc<ConditionProfile>,
        local: SocketAddr,
        remote: Option<SocketAddr>,
    ) -> SimnetResult<Self> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| SimnetError::io(format!("bind {}", local), e))?;
        Self::from_socket(socket, profile, remote)
    }

    /// Wraps an already bound socket and starts the inbound and outbound tasks.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn from_socket(
        socket: UdpSocket,
        profile: Arc<ConditionProfile>,
        remote: Option<SocketAddr>,
    ) -> SimnetResult<Self> {
        let local_addr = socket
            .local_addr()
            .map_err(|e| SimnetError::io("local address", e))?;
        let socket = Arc::new(socket);
        let pipeline = Pipeline {
            profile,
            close: CloseSignal::new(),
            stats: StatsCell::default(),
        };

        let (outbound, transmissions) = mpsc::channel(QUEUE_CAPACITY);
        let (deliveries, delivered) = mpsc::channel(QUEUE_CAPACITY);

        let tasks = vec![
            tokio::spawn(inbound_loop(socket.clone(), deliveries, pipeline.clone())),
            tokio::spawn(outbound_loop(socket.clone(), transmissions, pipeline.clone())),
        ];

        debug!(%local_addr, ?remote, "datagram socket wrapped");

        Ok(Self {
            socket: Mutex::new(Some(socket)),
            pipeline,
            outbound,
            delivered: AsyncMutex::new(delivered),
            tasks: Mutex::new(tasks),
            deadlines: Deadlines::default(),
            local_addr,
            peer_addr: remote,
        })
    }

    /// Sends `data` to `addr` as one datagram.
    ///
    /// Fails with [`SimnetError::Partitioned`] if `addr` is partitioned, without
    /// consuming any random draw. A lost datagram still reports success.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> SimnetResult<usize> {
        if self.pipeline.close.is_closed() {
            return Err(SimnetError::Closed);
        }

        let address = addr.to_string();
        if self.pipeline.profile.is_partitioned(&address) {
            return Err(SimnetError::Partitioned { address });
        }

        self.pipeline.stats.update(|s| s.units_sent += 1);
        let packet = Packet {
            data: data.to_vec(),
            addr,
        };
        with_deadline(self.deadlines.write(), async {
            self.pipeline.run(packet, &self.outbound).await;
            if self.pipeline.close.is_closed() {
                return Err(SimnetError::Closed);
            }
            Ok(data.len())
        })
        .await
    }

    /// Sends `data` to the default remote given at construction.
    pub async fn send(&self, data: &[u8]) -> SimnetResult<usize> {
        let addr = self.peer_addr.ok_or_else(|| {
            SimnetError::io(
                "send",
                std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "no default remote address",
                ),
            )
        })?;
        self.send_to(data, addr).await
    }

    /// Waits for the next delivered datagram and copies it into `buf`.
    ///
    /// A datagram longer than `buf` is truncated. Fails with
    /// [`SimnetError::Closed`] once the socket is closed.
    pub async fn recv_from(&self, buf: &mut [u8]) -> SimnetResult<(usize, SocketAddr)> {
        if self.pipeline.close.is_closed() {
            return Err(SimnetError::Closed);
        }

        with_deadline(self.deadlines.read(), async {
            let mut delivered = self.delivered.lock().await;
            let packet = tokio::select! {
                packet = delivered.recv() => packet.ok_or(SimnetError::Closed)?,
                () = self.pipeline.close.closed() => return Err(SimnetError::Closed),
            };
            let n = packet.data.len().min(buf.len());
            buf[..n].copy_from_slice(&packet.data[..n]);
            self.pipeline.stats.update(|s| s.units_received += 1);
            Ok((n, packet.addr))
        })
        .await
    }

    /// Closes the socket, stopping both background tasks. Only the first call has any effect.
    pub async fn close(&self) -> SimnetResult<()> {
        if !self.pipeline.close.close() {
            return Ok(());
        }
        debug!(local_addr = %self.local_addr, "closing datagram socket");

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                report_event_to!(
                    self.pipeline.profile.observer(),
                    Severity::Error,
                    EventKind::Lifecycle,
                    "datagram task ended abnormally: {}",
                    err
                );
            }
        }
        // Dropping the last handle closes the real socket
        self.socket.lock().take();
        Ok(())
    }

    /// Returns `true` once [`close`](Self::close) has been called or the socket dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pipeline.close.is_closed()
    }

    /// The local address of the real socket.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The default remote address, if one was given.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Sets both the receive and send deadline (`None` clears them).
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.set_both(deadline);
    }

    /// Sets the receive deadline (`None` clears it).
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.set_read(deadline);
    }

    /// Sets the send deadline (`None` clears it).
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.set_write(deadline);
    }

    /// A snapshot of this socket's counters.
    #[must_use]
    pub fn stats(&self) -> ShimStats {
        self.pipeline.stats.snapshot()
    }

    /// The profile this socket draws its conditions from.
    #[must_use]
    pub fn profile(&self) -> &Arc<ConditionProfile> {
        &self.pipeline.profile
    }
}

impl Drop for SimulatedUdpSocket {
    fn drop(&mut self) {
        if self.pipeline.close.close() {
            report_event_to!(
                self.pipeline.profile.observer(),
                Severity::Info,
                EventKind::Lifecycle,
                { "local" => self.local_addr },
                "datagram socket dropped without close"
            );
        }
    }
}

async fn inbound_loop(
    socket: Arc<UdpSocket>,
    deliveries: mpsc::Sender<Packet>,
    pipeline: Pipeline,
) {
    let local = socket
        .local_addr()
        .map_or_else(|err| format!("unavailable ({err})"), |addr| addr.to_string());
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut backoff = RECEIVE_BACKOFF_MIN;
    loop {
        let received = tokio::select! {
            received = socket.recv_from(&mut buf) => received,
            () = pipeline.close.closed() => break,
        };
        match received {
            Ok((n, addr)) => {
                backoff = RECEIVE_BACKOFF_MIN;
                let packet = Packet {
                    data: buf[..n].to_vec(),
                    addr,
                };
                pipeline.run(packet, &deliveries).await;
            },
            Err(err) => {
                pipeline.stats.update(|s| s.receive_errors += 1);
                report_event_to!(
                    pipeline.profile.observer(),
                    Severity::Warning,
                    EventKind::Reception,
                    { "local" => local, "retry_in" => format!("{backoff:?}") },
                    "datagram receive failed: {}",
                    err
                );
                if !pipeline.close.sleep(backoff).await {
                    break;
                }
                backoff = next_receive_backoff(backoff);
            },
        }
    }
}

async fn outbound_loop(
    socket: Arc<UdpSocket>,
    mut transmissions: mpsc::Receiver<Packet>,
    pipeline: Pipeline,
) {
    loop {
        let next = tokio::select! {
            biased;
            packet = transmissions.recv() => packet,
            () = pipeline.close.closed() => None,
        };
        let Some(packet) = next else { break };

        if let Err(err) = socket.send_to(&packet.data, packet.addr).await {
            pipeline.stats.update(|s| s.transmit_errors += 1);
            report_event_to!(
                pipeline.profile.observer(),
                Severity::Warning,
                EventKind::Transmission,
                { "peer" => packet.addr },
                "datagram transmit of {} bytes to {} failed: {}",
                packet.data.len(),
                packet.addr,
                err
            );
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn pair(
        profile: Arc<ConditionProfile>,
    ) -> (SimulatedUdpSocket, SimulatedUdpSocket) {
        let receiver = SimulatedUdpSocket::bind(profile.clone(), loopback(), None)
            .await
            .unwrap();
        let sender = SimulatedUdpSocket::bind(
            profile,
            loopback(),
            Some(receiver.local_addr()),
        )
        .await
        .unwrap();
        (sender, receiver)
    }

    async fn recv_within(
        socket: &SimulatedUdpSocket,
        wait: Duration,
    ) -> Option<(Vec<u8>, SocketAddr)> {
        let mut buf = [0u8; 2048];
        match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, addr))) => Some((buf[..n].to_vec(), addr)),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_passthrough_delivers_payload_and_sender() {
        let (sender, receiver) = pair(Arc::new(ConditionProfile::passthrough())).await;

        assert_eq!(sender.send(b"Hello, simnet!").await.unwrap(), 14);

        let (data, from) = recv_within(&receiver, Duration::from_secs(2)).await.unwrap();
        assert_eq!(data, b"Hello, simnet!");
        assert_eq!(from, sender.local_addr());
        assert_eq!(receiver.stats().units_received, 1);
    }

    #[tokio::test]
    async fn test_sent_datagram_is_not_looped_back() {
        let (sender, receiver) = pair(Arc::new(ConditionProfile::passthrough())).await;

        sender.send(b"one way").await.unwrap();
        assert!(recv_within(&receiver, Duration::from_secs(2)).await.is_some());
        assert!(recv_within(&sender, Duration::from_millis(100)).await.is_none());
    }

    #[tokio::test]
    async fn test_partitioned_destination_fails_fast() {
        let profile = Arc::new(ConditionProfile::builder().loss_rate(0.5).seed(3).build());
        let (sender, receiver) = pair(profile.clone()).await;
        let target = receiver.local_addr();
        profile.add_partition(target.to_string());

        let err = sender.send_to(b"blocked", target).await.unwrap_err();
        assert!(err.is_partitioned());
        assert_eq!(sender.stats().units_sent, 0);

        // No draw was consumed by the rejected send
        let reference = ConditionProfile::builder().loss_rate(0.5).seed(3).build();
        for _ in 0..16 {
            assert_eq!(profile.should_drop(), reference.should_drop());
        }
    }

    #[tokio::test]
    async fn test_lossy_send_reports_success_but_never_arrives() {
        let profile = Arc::new(ConditionProfile::lossy(1.0));
        let (sender, receiver) = pair(profile).await;

        for _ in 0..5 {
            assert_eq!(sender.send(b"void").await.unwrap(), 4);
        }
        assert!(recv_within(&receiver, Duration::from_millis(200)).await.is_none());
        assert_eq!(sender.stats().units_dropped, 5);
    }

    #[tokio::test]
    async fn test_duplicate_rate_one_delivers_at_least_twice() {
        let sender_profile = Arc::new(ConditionProfile::builder().duplicate_rate(1.0).build());
        let receiver = SimulatedUdpSocket::bind(
            Arc::new(ConditionProfile::passthrough()),
            loopback(),
            None,
        )
        .await
        .unwrap();
        let sender = SimulatedUdpSocket::bind(
            sender_profile,
            loopback(),
            Some(receiver.local_addr()),
        )
        .await
        .unwrap();

        sender.send(b"twice").await.unwrap();

        let mut copies = 0;
        while let Some((data, _)) = recv_within(&receiver, Duration::from_millis(300)).await {
            assert_eq!(data, b"twice");
            copies += 1;
        }
        assert!(copies >= 2, "expected at least two copies, got {}", copies);
    }

    #[tokio::test]
    async fn test_short_buffer_truncates() {
        let (sender, receiver) = pair(Arc::new(ConditionProfile::passthrough())).await;
        sender.send(b"0123456789").await.unwrap();

        let mut buf = [0u8; 4];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, b"0123");
    }

    #[tokio::test]
    async fn test_close_unblocks_receive_and_is_idempotent() {
        let (_sender, receiver) = pair(Arc::new(ConditionProfile::passthrough())).await;
        let receiver = Arc::new(receiver);

        let waiting = {
            let receiver = receiver.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 8];
                receiver.recv_from(&mut buf).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        receiver.close().await.unwrap();
        receiver.close().await.unwrap();

        assert!(matches!(waiting.await.unwrap(), Err(SimnetError::Closed)));
        assert!(receiver.is_closed());
        let target = receiver.local_addr();
        assert!(matches!(
            receiver.send_to(b"late", target).await,
            Err(SimnetError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_send_without_remote_fails() {
        let socket = SimulatedUdpSocket::bind(
            Arc::new(ConditionProfile::passthrough()),
            loopback(),
            None,
        )
        .await
        .unwrap();
        let err = socket.send(b"nowhere").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
        assert!(socket.peer_addr().is_none());
    }

    #[tokio::test]
    async fn test_receive_deadline_times_out() {
        let (_sender, receiver) = pair(Arc::new(ConditionProfile::passthrough())).await;
        receiver.set_read_deadline(Some(Instant::now() + Duration::from_millis(30)));

        let mut buf = [0u8; 8];
        let result = receiver.recv_from(&mut buf).await;
        assert!(matches!(result, Err(SimnetError::TimedOut)));
    }

    #[tokio::test]
    async fn test_latency_delays_send() {
        let profile = Arc::new(ConditionProfile::high_latency(60));
        let (sender, receiver) = pair(profile).await;

        let start = Instant::now();
        sender.send(b"slow").await.unwrap();
        // Outbound latency is paid by the sender, inbound latency by the receiver
        let (data, _) = recv_within(&receiver, Duration::from_secs(2)).await.unwrap();
        assert_eq!(data, b"slow");
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_receive_backoff_doubles_up_to_cap() {
        let mut backoff = RECEIVE_BACKOFF_MIN;
        let mut steps = 0;
        while backoff < RECEIVE_BACKOFF_MAX {
            let next = next_receive_backoff(backoff);
            assert!(next > backoff);
            backoff = next;
            steps += 1;
        }
        assert_eq!(backoff, RECEIVE_BACKOFF_MAX);
        assert_eq!(next_receive_backoff(backoff), RECEIVE_BACKOFF_MAX);
        assert!(steps < 16);
    }

    // Linux reports ICMP port-unreachable to connected UDP sockets as a
    // failed receive.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_receive_failure_is_reported_and_paced() {
        use crate::telemetry::CollectingObserver;

        let dead = std::net::UdpSocket::bind(loopback()).unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let observer = Arc::new(CollectingObserver::new());
        let profile = ConditionProfile::builder()
            .observer(observer.clone())
            .build();
        let socket = UdpSocket::bind(loopback()).await.unwrap();
        socket.connect(dead_addr).await.unwrap();
        let shim = SimulatedUdpSocket::from_socket(socket, Arc::new(profile), Some(dead_addr))
            .unwrap();

        for _ in 0..3 {
            shim.send(b"anyone?").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let failures = observer.events_of_kind(EventKind::Reception);
        assert!(!failures.is_empty());
        assert_eq!(failures[0].context["local"], shim.local_addr().to_string());
        // Each failure is followed by a pause, so a handful of sends cannot
        // produce a flood of reports
        assert!(shim.stats().receive_errors <= 3);

        tokio::time::timeout(Duration::from_secs(1), shim.close())
            .await
            .expect("close waits on a backing-off receive loop")
            .unwrap();
    }
}
