//! Condition-applying wrapper around an ordered byte-stream connection.
//!
//! # Write path
//!
//! Each `write` call is one unit. Loss reports success without transmitting.
//! Duplication queues an extra copy. Reordering defers the enqueue behind the
//! computed latency on an independent timer so later writes can overtake it;
//! otherwise the caller waits out the latency and the payload is queued. A
//! single drain task transmits the queue strictly in enqueue order.
//!
//! # Read path
//!
//! Loss reports end-of-stream. Otherwise the freshly read bytes are delivered
//! after the computed latency, except that duplication keeps a copy in a
//! one-slot stash and a reorder decision with a non-empty stash delivers the
//! stash first and keeps the fresh bytes for later. Only adjacent reads can be
//! swapped.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{SimnetError, SimnetResult};
use crate::network::lifecycle::{with_deadline, CloseSignal, Deadlines};
use crate::network::stats::{ShimStats, StatsCell};
use crate::network::transport::Transport;
use crate::profile::ConditionProfile;
use crate::report_event_to;
use crate::telemetry::{EventKind, Severity};
use crate::QUEUE_CAPACITY;

/// How long closing lets the drain task flush before abandoning the rest.
pub(crate) const CLOSE_FLUSH_GRACE: Duration = Duration::from_millis(500);

/// A byte-stream connection that experiences the conditions of a [`ConditionProfile`].
///
/// Reads and writes take `&self`, so one task can read while another writes
/// (share the stream through an [`Arc`]).
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use simnet::{ConditionProfile, SimulatedStream};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), simnet::SimnetError> {
/// let (near, mut far) = tokio::io::duplex(1024);
/// let stream = SimulatedStream::new(near, Arc::new(ConditionProfile::passthrough()));
///
/// stream.write_all(b"PING").await?;
///
/// let mut buf = [0u8; 4];
/// tokio::io::AsyncReadExt::read_exact(&mut far, &mut buf).await.map_err(|e| simnet::SimnetError::io("read", e))?;
/// assert_eq!(&buf, b"PING");
/// stream.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct SimulatedStream<S: Transport> {
    reader: AsyncMutex<Option<ReadHalf<S>>>,
    stash: Mutex<Vec<u8>>,
    queue: mpsc::Sender<Vec<u8>>,
    drain: Mutex<Option<JoinHandle<()>>>,
    close: CloseSignal,
    deadlines: Deadlines,
    stats: StatsCell,
    profile: Arc<ConditionProfile>,
    local_addr: Result<SocketAddr, io::ErrorKind>,
    peer_addr: Result<SocketAddr, io::ErrorKind>,
}

impl<S: Transport> std::fmt::Debug for SimulatedStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedStream")
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.close.is_closed())
            .finish_non_exhaustive()
    }
}

impl<S: Transport> SimulatedStream<S> {
    /// Wraps `stream` and starts its drain task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(stream: S, profile: Arc<ConditionProfile>) -> Self {
        let local_addr = stream.local_addr().map_err(|e| e.kind());
        let peer_addr = stream.peer_addr().map_err(|e| e.kind());
        let (reader, writer) = tokio::io::split(stream);
        let (queue, pending) = mpsc::channel(QUEUE_CAPACITY);
        let close = CloseSignal::new();
        let stats = StatsCell::default();

        let drain = tokio::spawn(drain_queue(
            writer,
            pending,
            close.clone(),
            stats.clone(),
            profile.clone(),
            peer_label(peer_addr),
        ));

        debug!(?local_addr, ?peer_addr, "stream wrapped");

        Self {
            reader: AsyncMutex::new(Some(reader)),
            stash: Mutex::new(Vec::new()),
            queue,
            drain: Mutex::new(Some(drain)),
            close,
            deadlines: Deadlines::default(),
            stats,
            profile,
            local_addr,
            peer_addr,
        }
    }

    /// Reads into `buf`, applying loss, duplication, reordering and latency.
    ///
    /// Returns `Ok(0)` at end-of-stream, which is also how a lost read shows up.
    pub async fn read(&self, buf: &mut [u8]) -> SimnetResult<usize> {
        if self.close.is_closed() {
            return Err(SimnetError::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        with_deadline(self.deadlines.read(), self.read_conditioned(buf)).await
    }

    async fn read_conditioned(&self, buf: &mut [u8]) -> SimnetResult<usize> {
        if self.profile.should_drop() {
            trace!("read lost");
            self.stats.update(|s| s.units_dropped += 1);
            return Ok(0);
        }

        let mut fresh = vec![0u8; buf.len()];
        let n = {
            let mut guard = self.reader.lock().await;
            let reader = guard.as_mut().ok_or(SimnetError::Closed)?;
            tokio::select! {
                read = reader.read(&mut fresh) => read.map_err(|e| SimnetError::io("read", e))?,
                () = self.close.closed() => return Err(SimnetError::Closed),
            }
        };
        if n == 0 {
            return Ok(0);
        }
        fresh.truncate(n);

        let delivered = {
            let duplicate = self.profile.should_duplicate();
            let reorder = self.profile.should_reorder();
            let mut stash = self.stash.lock();

            if duplicate {
                stash.extend_from_slice(&fresh);
                self.stats.update(|s| s.units_duplicated += 1);
            }

            if reorder && !stash.is_empty() {
                let count = stash.len().min(buf.len());
                let mut held = std::mem::take(&mut *stash);
                let tail = held.split_off(count);
                buf[..count].copy_from_slice(&held);
                // Undelivered stash bytes stay ahead of the fresh ones
                *stash = tail;
                stash.extend_from_slice(&fresh);
                trace!(count, stashed = stash.len(), "read swapped with stash");
                self.stats.update(|s| s.units_reordered += 1);
                count
            } else {
                buf[..n].copy_from_slice(&fresh);
                n
            }
        };

        let delay = self.profile.delay_for(n);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.stats.update(|s| s.units_received += 1);
        Ok(delivered)
    }

    /// Writes `buf` as one unit, applying loss, duplication, reordering and latency.
    ///
    /// Always reports the full length as written unless the stream is closed or
    /// the write deadline passes; a lost write looks successful.
    pub async fn write(&self, buf: &[u8]) -> SimnetResult<usize> {
        if self.close.is_closed() {
            return Err(SimnetError::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        with_deadline(self.deadlines.write(), self.write_conditioned(buf)).await
    }

    async fn write_conditioned(&self, buf: &[u8]) -> SimnetResult<usize> {
        self.stats.update(|s| s.units_sent += 1);

        if self.profile.should_drop() {
            trace!(len = buf.len(), "write lost");
            self.stats.update(|s| s.units_dropped += 1);
            return Ok(buf.len());
        }

        if self.profile.should_duplicate() {
            trace!(len = buf.len(), "write duplicated");
            self.stats.update(|s| s.units_duplicated += 1);
            self.enqueue(buf.to_vec()).await?;
        }

        if self.profile.should_reorder() {
            let delay = self.profile.delay_for(buf.len());
            trace!(len = buf.len(), ?delay, "write deferred");
            self.stats.update(|s| s.units_reordered += 1);

            let payload = buf.to_vec();
            let queue = self.queue.clone();
            let close = self.close.clone();
            tokio::spawn(async move {
                if close.sleep(delay).await {
                    close.send(&queue, payload).await;
                }
            });
            return Ok(buf.len());
        }

        let delay = self.profile.delay_for(buf.len());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.enqueue(buf.to_vec()).await?;
        Ok(buf.len())
    }

    async fn enqueue(&self, payload: Vec<u8>) -> SimnetResult<()> {
        if self.close.send(&self.queue, payload).await {
            Ok(())
        } else {
            Err(SimnetError::Closed)
        }
    }

    /// Writes every byte of `buf`, one unit per underlying `write` call.
    pub async fn write_all(&self, mut buf: &[u8]) -> SimnetResult<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Closes the connection.
    ///
    /// Releases every task blocked on the connection's queue and gives the
    /// drain task a short grace period to transmit what was already queued.
    /// A drain stalled on a peer that stopped reading is aborted, so the real
    /// connection is always released. Only the first call has any effect.
    pub async fn close(&self) -> SimnetResult<()> {
        if !self.close.close() {
            return Ok(());
        }
        debug!(peer_addr = ?self.peer_addr, "closing stream");

        let drain = self.drain.lock().take();
        if let Some(drain) = drain {
            settle_drain(drain, &self.profile).await;
        }
        self.reader.lock().await.take();
        self.stash.lock().clear();
        Ok(())
    }

    /// Returns `true` once [`close`](Self::close) has been called or the stream dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }

    /// The local address of the wrapped connection.
    pub fn local_addr(&self) -> SimnetResult<SocketAddr> {
        self.local_addr
            .map_err(|kind| SimnetError::io("local address", kind.into()))
    }

    /// The remote address of the wrapped connection.
    pub fn peer_addr(&self) -> SimnetResult<SocketAddr> {
        self.peer_addr
            .map_err(|kind| SimnetError::io("peer address", kind.into()))
    }

    /// Sets both the read and write deadline (`None` clears them).
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.set_both(deadline);
    }

    /// Sets the read deadline (`None` clears it).
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.set_read(deadline);
    }

    /// Sets the write deadline (`None` clears it).
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.set_write(deadline);
    }

    /// A snapshot of this connection's counters.
    #[must_use]
    pub fn stats(&self) -> ShimStats {
        self.stats.snapshot()
    }

    /// The profile this connection draws its conditions from.
    #[must_use]
    pub fn profile(&self) -> &Arc<ConditionProfile> {
        &self.profile
    }
}

impl<S: Transport> Drop for SimulatedStream<S> {
    fn drop(&mut self) {
        if !self.close.close() {
            return;
        }
        report_event_to!(
            self.profile.observer(),
            Severity::Info,
            EventKind::Lifecycle,
            { "peer" => peer_label(self.peer_addr) },
            "stream dropped without close"
        );
        let Some(drain) = self.drain.get_mut().take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let profile = self.profile.clone();
                runtime.spawn(async move { settle_drain(drain, &profile).await });
            }
            Err(_no_runtime) => drain.abort(),
        }
    }
}

fn peer_label(peer_addr: Result<SocketAddr, io::ErrorKind>) -> String {
    peer_addr.map_or_else(|kind| format!("unavailable ({kind})"), |addr| addr.to_string())
}

/// Waits out the flush grace period, then aborts a drain that is still stuck.
///
/// Aborting drops the write half, which releases the real connection once
/// the read half is gone too.
async fn settle_drain(mut drain: JoinHandle<()>, profile: &ConditionProfile) {
    let flushed = tokio::time::timeout(CLOSE_FLUSH_GRACE, &mut drain).await;
    let joined = match flushed {
        Ok(joined) => joined,
        Err(_elapsed) => {
            drain.abort();
            report_event_to!(
                profile.observer(),
                Severity::Warning,
                EventKind::Lifecycle,
                "stream drain stalled for {:?}, queued payloads abandoned",
                CLOSE_FLUSH_GRACE
            );
            drain.await
        }
    };
    if let Err(err) = joined {
        if !err.is_cancelled() {
            report_event_to!(
                profile.observer(),
                Severity::Error,
                EventKind::Lifecycle,
                "stream drain task ended abnormally: {}",
                err
            );
        }
    }
}

async fn drain_queue<S: Transport>(
    mut writer: WriteHalf<S>,
    mut pending: mpsc::Receiver<Vec<u8>>,
    close: CloseSignal,
    stats: StatsCell,
    profile: Arc<ConditionProfile>,
    peer: String,
) {
    loop {
        let next = tokio::select! {
            biased;
            payload = pending.recv() => payload,
            () = close.closed() => None,
        };
        let Some(payload) = next else { break };
        transmit(&mut writer, &payload, &stats, &profile, &peer).await;
    }

    // Anything queued before the close still goes out
    pending.close();
    while let Ok(payload) = pending.try_recv() {
        transmit(&mut writer, &payload, &stats, &profile, &peer).await;
    }

    if let Err(err) = writer.shutdown().await {
        trace!(%err, "stream shutdown failed");
    }
}

async fn transmit<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    stats: &StatsCell,
    profile: &ConditionProfile,
    peer: &str,
) {
    if let Err(err) = writer.write_all(payload).await {
        stats.update(|s| s.transmit_errors += 1);
        report_event_to!(
            profile.observer(),
            Severity::Warning,
            EventKind::Transmission,
            { "peer" => peer },
            "stream transmit of {} bytes failed: {}",
            payload.len(),
            err
        );
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
    use crate::telemetry::CollectingObserver;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn shared(profile: ConditionProfile) -> Arc<ConditionProfile> {
        Arc::new(profile)
    }

    fn pipe(profile: Arc<ConditionProfile>) -> (SimulatedStream<DuplexStream>, DuplexStream) {
        let (near, far) = duplex(64 * 1024);
        (SimulatedStream::new(near, profile), far)
    }

    async fn read_available(far: &mut DuplexStream, wait: Duration) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        while let Ok(Ok(n)) = tokio::time::timeout(wait, far.read(&mut buf)).await {
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[tokio::test]
    async fn test_passthrough_write_is_transparent() {
        let (stream, mut far) = pipe(shared(ConditionProfile::passthrough()));

        assert_eq!(stream.write(b"hello").await.unwrap(), 5);
        stream.write_all(b" world").await.unwrap();
        stream.close().await.unwrap();

        let mut received = Vec::new();
        far.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello world");

        let stats = stream.stats();
        assert_eq!(stats.units_sent, 2);
        assert_eq!(stats.units_dropped, 0);
    }

    #[tokio::test]
    async fn test_passthrough_read_is_transparent() {
        let (stream, mut far) = pipe(shared(ConditionProfile::passthrough()));
        far.write_all(b"abc").await.unwrap();

        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abc");
        assert_eq!(stream.stats().units_received, 1);
    }

    #[tokio::test]
    async fn test_lost_write_reports_success() {
        let (stream, mut far) = pipe(shared(ConditionProfile::lossy(1.0)));

        for _ in 0..10 {
            assert_eq!(stream.write(b"gone").await.unwrap(), 4);
        }
        stream.close().await.unwrap();

        let mut received = Vec::new();
        far.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
        assert_eq!(stream.stats().units_dropped, 10);
    }

    #[tokio::test]
    async fn test_lost_read_is_end_of_stream() {
        let (stream, mut far) = pipe(shared(ConditionProfile::lossy(1.0)));
        far.write_all(b"never seen").await.unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicated_write_arrives_twice() {
        let profile = ConditionProfile::builder().duplicate_rate(1.0).build();
        let (stream, mut far) = pipe(shared(profile));

        stream.write(b"dup").await.unwrap();
        stream.close().await.unwrap();

        let mut received = Vec::new();
        far.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"dupdup");
        assert_eq!(stream.stats().units_duplicated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reordered_write_is_overtaken() {
        let profile = shared(ConditionProfile::builder().latency_ms(50).build());
        let (stream, mut far) = pipe(profile.clone());

        profile.set_reorder_rate(1.0);
        stream.write(b"first").await.unwrap();
        profile.set_reorder_rate(0.0);
        profile.set_latency(Duration::ZERO);
        stream.write(b"second").await.unwrap();

        let received = read_available(&mut far, Duration::from_millis(200)).await;
        assert_eq!(received, b"secondfirst");
        assert_eq!(stream.stats().units_reordered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_waits_out_latency() {
        let profile = ConditionProfile::builder().latency_ms(100).build();
        let (stream, _far) = pipe(shared(profile));

        let start = Instant::now();
        stream.write(b"PING").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_read_swaps_with_stash() {
        let profile = shared(ConditionProfile::builder().duplicate_rate(1.0).build());
        let (stream, mut far) = pipe(profile.clone());

        // First read: duplicated into the stash, delivered normally
        far.write_all(b"AA").await.unwrap();
        let mut buf = [0u8; 8];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"AA");

        // Second read: reordered, so the stash comes out first
        profile.set_duplicate_rate(0.0);
        profile.set_reorder_rate(1.0);
        far.write_all(b"BB").await.unwrap();
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"AA");

        // Third read: the swapped bytes now sit in the stash
        far.write_all(b"CC").await.unwrap();
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"BB");
    }

    #[tokio::test]
    async fn test_stash_tail_is_kept() {
        let profile = shared(ConditionProfile::builder().duplicate_rate(1.0).build());
        let (stream, mut far) = pipe(profile.clone());

        far.write_all(b"abcdef").await.unwrap();
        let mut big = [0u8; 16];
        let n = stream.read(&mut big).await.unwrap();
        assert_eq!(&big[..n], b"abcdef");

        profile.set_duplicate_rate(0.0);
        profile.set_reorder_rate(1.0);
        far.write_all(b"xy").await.unwrap();
        let mut small = [0u8; 4];
        let n = stream.read(&mut small).await.unwrap();
        assert_eq!(&small[..n], b"abcd");

        far.write_all(b"z").await.unwrap();
        let n = stream.read(&mut big).await.unwrap();
        assert_eq!(&big[..n], b"efxy");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_terminal() {
        let (stream, _far) = pipe(shared(ConditionProfile::passthrough()));

        stream.close().await.unwrap();
        stream.close().await.unwrap();
        assert!(stream.is_closed());

        assert!(matches!(stream.write(b"x").await, Err(SimnetError::Closed)));
        let mut buf = [0u8; 4];
        assert!(matches!(stream.read(&mut buf).await, Err(SimnetError::Closed)));
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        let (stream, _far) = pipe(shared(ConditionProfile::passthrough()));
        let stream = Arc::new(stream);

        let reader = {
            let stream = stream.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4];
                stream.read(&mut buf).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.close().await.unwrap();
        let result = reader.await.unwrap();
        assert!(matches!(result, Err(SimnetError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline_times_out() {
        let (stream, _far) = pipe(shared(ConditionProfile::passthrough()));
        stream.set_read_deadline(Some(Instant::now() + Duration::from_millis(30)));

        let mut buf = [0u8; 4];
        let result = stream.read(&mut buf).await;
        assert!(matches!(result, Err(SimnetError::TimedOut)));

        stream.set_deadline(None);
        stream.write(b"ok").await.unwrap();
    }

    #[tokio::test]
    async fn test_duplex_has_no_addresses() {
        let (stream, _far) = pipe(shared(ConditionProfile::passthrough()));
        let err = stream.local_addr().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert!(stream.peer_addr().is_err());
    }

    #[tokio::test]
    async fn test_transmit_failure_is_reported_not_returned() {
        let observer = Arc::new(CollectingObserver::new());
        let profile = ConditionProfile::builder()
            .observer(observer.clone())
            .build();
        let (stream, far) = pipe(shared(profile));
        drop(far);

        // The enqueue succeeds even though the peer is gone
        assert_eq!(stream.write(b"orphan").await.unwrap(), 6);
        stream.close().await.unwrap();

        assert_eq!(stream.stats().transmit_errors, 1);
        let failures = observer.events_of_kind(EventKind::Transmission);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].context["peer"].starts_with("unavailable"));
    }

    #[tokio::test]
    async fn test_close_releases_stalled_peer() {
        let observer = Arc::new(CollectingObserver::new());
        let profile = ConditionProfile::builder()
            .observer(observer.clone())
            .build();
        let (near, mut far) = duplex(16);
        let stream = SimulatedStream::new(near, shared(profile));

        // Far more than the pipe holds, and nobody reads yet
        stream.write(&[1u8; 64]).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), stream.close())
            .await
            .expect("close must not wait on a stalled drain")
            .unwrap();
        assert!(observer.has_event(EventKind::Lifecycle));

        // The real connection is gone: the far end sees what fit, then EOF
        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), far.read_to_end(&mut received))
            .await
            .expect("far end never saw end-of-stream")
            .unwrap();
        assert!(received.len() < 64);
    }

    #[tokio::test]
    async fn test_drop_releases_stalled_peer() {
        let (near, mut far) = duplex(16);
        let stream = SimulatedStream::new(near, shared(ConditionProfile::passthrough()));
        stream.write(&[2u8; 64]).await.unwrap();
        drop(stream);

        // Stay stalled past the flush grace period
        tokio::time::sleep(CLOSE_FLUSH_GRACE * 2).await;

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), far.read_to_end(&mut received))
            .await
            .expect("dropped stream kept the connection open")
            .unwrap();
        assert!(received.len() < 64);
    }

    #[tokio::test]
    async fn test_seeded_streams_make_identical_decisions() {
        async fn run(seed: u64) -> ShimStats {
            let profile = ConditionProfile::builder()
                .loss_rate(0.3)
                .duplicate_rate(0.3)
                .seed(seed)
                .build();
            let (stream, _far) = pipe(shared(profile));
            for i in 0..50u8 {
                stream.write(&[i]).await.unwrap();
            }
            stream.close().await.unwrap();
            stream.stats()
        }

        assert_eq!(run(42).await, run(42).await);
    }
}
