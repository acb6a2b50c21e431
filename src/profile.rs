//! The shared set of network conditions applied by every shim.
//!
//! A [`ConditionProfile`] is built once, wrapped in an [`Arc`], and handed to
//! every [`Dialer`](crate::Dialer), [`SimulatedListener`](crate::SimulatedListener)
//! and [`SimulatedUdpSocket`](crate::SimulatedUdpSocket) that should experience
//! the same network. It can be changed while connections are live to simulate
//! conditions degrading (or recovering) mid-test.
//!
//! # Example
//!
//! ```rust
//! use simnet::ConditionProfile;
//! use std::time::Duration;
//!
//! let profile = ConditionProfile::builder()
//!     .latency(Duration::from_millis(50))
//!     .jitter(Duration::from_millis(20))
//!     .bandwidth(256 * 1024)
//!     .loss_rate(0.05)
//!     .partition("10.0.0.7:443")
//!     .seed(42)
//!     .build();
//!
//! assert!(profile.is_partitioned("10.0.0.7:443"));
//! profile.remove_partition("10.0.0.7:443");
//! assert!(!profile.is_partitioned("10.0.0.7:443"));
//! ```
//!
//! # Determinism
//!
//! All decisions are drawn from one [`Pcg32`] created on first use. With a
//! non-zero seed the sequence of decisions is fully reproducible. A rate of
//! zero never consumes randomness, so enabling or disabling one effect does
//! not shift the draws seen by the others.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::rng::{Pcg32, Rng, SeedableRng};
use crate::telemetry::{EventObserver, TracingObserver};

/// Everything guarded by the profile lock.
#[derive(Debug, Clone)]
struct Conditions {
    latency: Duration,
    jitter: Duration,
    bandwidth: u64,
    loss_rate: f64,
    reorder_rate: f64,
    duplicate_rate: f64,
    partitions: BTreeSet<String>,
    seed: u64,
    rng: Option<Pcg32>,
}

impl Default for Conditions {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            bandwidth: 0,
            loss_rate: 0.0,
            reorder_rate: 0.0,
            duplicate_rate: 0.0,
            partitions: BTreeSet::new(),
            seed: 0,
            rng: None,
        }
    }
}

impl Conditions {
    fn rng(&mut self) -> &mut Pcg32 {
        let seed = self.seed;
        self.rng.get_or_insert_with(|| {
            if seed != 0 {
                Pcg32::seed_from_u64(seed)
            } else {
                Pcg32::from_entropy()
            }
        })
    }

    /// Bernoulli draw; a non-positive rate returns without touching the RNG.
    fn draw(&mut self, rate: f64) -> bool {
        if rate > 0.0 {
            self.rng().gen::<f64>() < rate
        } else {
            false
        }
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

/// Simulated network conditions shared by every connection built from it.
///
/// All durations default to zero and all rates default to 0.0 (effect
/// disabled). A bandwidth of `0` means unlimited and a seed of `0` means an
/// unpredictable seed.
pub struct ConditionProfile {
    inner: Mutex<Conditions>,
    observer: Arc<dyn EventObserver>,
}

impl fmt::Debug for ConditionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.inner.lock();
        f.debug_struct("ConditionProfile")
            .field("latency", &c.latency)
            .field("jitter", &c.jitter)
            .field("bandwidth", &c.bandwidth)
            .field("loss_rate", &c.loss_rate)
            .field("reorder_rate", &c.reorder_rate)
            .field("duplicate_rate", &c.duplicate_rate)
            .field("partitions", &c.partitions)
            .field("seed", &c.seed)
            .finish_non_exhaustive()
    }
}

impl Default for ConditionProfile {
    fn default() -> Self {
        Self::passthrough()
    }
}

impl ConditionProfile {
    /// Creates a new builder for fluent configuration.
    #[must_use]
    pub fn builder() -> ConditionProfileBuilder {
        ConditionProfileBuilder::new()
    }

    /// Creates a profile with no effects (transparent shims).
    #[must_use]
    pub fn passthrough() -> Self {
        ConditionProfileBuilder::new().build()
    }

    /// Creates a profile simulating high latency conditions.
    #[must_use]
    pub fn high_latency(latency_ms: u64) -> Self {
        ConditionProfileBuilder::new().latency_ms(latency_ms).build()
    }

    /// Creates a profile simulating packet loss.
    #[must_use]
    pub fn lossy(loss_rate: f64) -> Self {
        ConditionProfileBuilder::new().loss_rate(loss_rate).build()
    }

    /// Creates a profile simulating typical poor network conditions.
    #[must_use]
    pub fn poor_network() -> Self {
        ConditionProfileBuilder::new()
            .latency_ms(100)
            .jitter_ms(50)
            .loss_rate(0.05)
            .build()
    }

    /// Creates a profile simulating very bad network conditions.
    #[must_use]
    pub fn terrible_network() -> Self {
        ConditionProfileBuilder::new()
            .latency_ms(250)
            .jitter_ms(100)
            .bandwidth(64 * 1024)
            .loss_rate(0.15)
            .duplicate_rate(0.02)
            .reorder_rate(0.1)
            .build()
    }

    fn lock(&self) -> MutexGuard<'_, Conditions> {
        self.inner.lock()
    }

    /// Forces creation of the shared random source.
    ///
    /// The source is created on first use under the profile lock, seeded from
    /// [`seed`](Self::seed) when non-zero. Calling this again has no effect.
    pub fn init_random_source(&self) {
        let _ = self.lock().rng();
    }

    /// Runs `f` with exclusive access to the shared random source.
    ///
    /// The profile lock is held for the duration of `f`, so draws made here
    /// are serialized with every shim decision.
    pub fn effective_random_source<T>(&self, f: impl FnOnce(&mut Pcg32) -> T) -> T {
        let mut conditions = self.lock();
        f(conditions.rng())
    }

    /// Returns `true` if `address` is currently partitioned (unreachable).
    #[must_use]
    pub fn is_partitioned(&self, address: &str) -> bool {
        self.lock().partitions.contains(address)
    }

    /// Marks `address` as unreachable for subsequent dials and sends.
    ///
    /// Data already past the partition check is not affected.
    pub fn add_partition(&self, address: impl Into<String>) {
        let address = address.into();
        trace!(%address, "partition added");
        self.lock().partitions.insert(address);
    }

    /// Makes `address` reachable again.
    pub fn remove_partition(&self, address: &str) {
        trace!(address, "partition removed");
        self.lock().partitions.remove(address);
    }

    /// Returns the currently partitioned addresses, sorted.
    #[must_use]
    pub fn partitions(&self) -> Vec<String> {
        self.lock().partitions.iter().cloned().collect()
    }

    /// Draws the loss decision for one unit of data.
    #[must_use]
    pub fn should_drop(&self) -> bool {
        let mut c = self.lock();
        let rate = c.loss_rate;
        c.draw(rate)
    }

    /// Draws the duplication decision for one unit of data.
    #[must_use]
    pub fn should_duplicate(&self) -> bool {
        let mut c = self.lock();
        let rate = c.duplicate_rate;
        c.draw(rate)
    }

    /// Draws the reordering decision for one unit of data.
    #[must_use]
    pub fn should_reorder(&self) -> bool {
        let mut c = self.lock();
        let rate = c.reorder_rate;
        c.draw(rate)
    }

    /// Computes the delivery delay for a unit of `len` bytes.
    ///
    /// `latency + uniform[0, jitter) + len / bandwidth` seconds. The jitter
    /// term consumes one draw only when the jitter bound is non-zero and the
    /// bandwidth term is omitted when bandwidth is unlimited.
    #[must_use]
    pub fn delay_for(&self, len: usize) -> Duration {
        let mut c = self.lock();
        let mut delay = c.latency;

        let jitter_ns = u64::try_from(c.jitter.as_nanos()).unwrap_or(u64::MAX);
        if jitter_ns > 0 {
            let offset = c.rng().gen_range_u64(0..jitter_ns);
            delay = delay.saturating_add(Duration::from_nanos(offset));
        }

        if c.bandwidth > 0 && len > 0 {
            let transfer = Duration::from_secs_f64(len as f64 / c.bandwidth as f64);
            delay = delay.saturating_add(transfer);
        }

        delay
    }

    /// Base latency added to every unit.
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.lock().latency
    }

    /// Upper bound (exclusive) of the random extra latency.
    #[must_use]
    pub fn jitter(&self) -> Duration {
        self.lock().jitter
    }

    /// Bandwidth cap in bytes per second (`0` = unlimited).
    #[must_use]
    pub fn bandwidth(&self) -> u64 {
        self.lock().bandwidth
    }

    /// Probability of dropping a unit.
    #[must_use]
    pub fn loss_rate(&self) -> f64 {
        self.lock().loss_rate
    }

    /// Probability of reordering a unit.
    #[must_use]
    pub fn reorder_rate(&self) -> f64 {
        self.lock().reorder_rate
    }

    /// Probability of duplicating a unit.
    #[must_use]
    pub fn duplicate_rate(&self) -> f64 {
        self.lock().duplicate_rate
    }

    /// The configured seed (`0` = unpredictable).
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.lock().seed
    }

    /// Sets the base latency.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Sets the jitter bound.
    pub fn set_jitter(&self, jitter: Duration) {
        self.lock().jitter = jitter;
    }

    /// Sets the bandwidth cap in bytes per second (`0` = unlimited).
    pub fn set_bandwidth(&self, bytes_per_sec: u64) {
        self.lock().bandwidth = bytes_per_sec;
    }

    /// Sets the loss rate, clamped into `[0, 1]`.
    pub fn set_loss_rate(&self, rate: f64) {
        self.lock().loss_rate = clamp_rate(rate);
    }

    /// Sets the reorder rate, clamped into `[0, 1]`.
    pub fn set_reorder_rate(&self, rate: f64) {
        self.lock().reorder_rate = clamp_rate(rate);
    }

    /// Sets the duplicate rate, clamped into `[0, 1]`.
    pub fn set_duplicate_rate(&self, rate: f64) {
        self.lock().duplicate_rate = clamp_rate(rate);
    }

    /// The observer receiving background delivery diagnostics.
    #[must_use]
    pub fn observer(&self) -> &dyn EventObserver {
        &*self.observer
    }
}

/// Builder for [`ConditionProfile`].
#[derive(Clone)]
pub struct ConditionProfileBuilder {
    conditions: Conditions,
    observer: Option<Arc<dyn EventObserver>>,
}

impl fmt::Debug for ConditionProfileBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionProfileBuilder")
            .field("conditions", &self.conditions)
            .field("custom_observer", &self.observer.is_some())
            .finish()
    }
}

impl Default for ConditionProfileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionProfileBuilder {
    /// Creates a new builder with every effect disabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            conditions: Conditions::default(),
            observer: None,
        }
    }

    /// Sets the base latency for all units.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.conditions.latency = latency;
        self
    }

    /// Sets the latency in milliseconds (convenience method).
    #[must_use]
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.conditions.latency = Duration::from_millis(ms);
        self
    }

    /// Sets the jitter bound; extra latency is drawn uniformly from `[0, jitter)`.
    #[must_use]
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.conditions.jitter = jitter;
        self
    }

    /// Sets the jitter bound in milliseconds (convenience method).
    #[must_use]
    pub fn jitter_ms(mut self, ms: u64) -> Self {
        self.conditions.jitter = Duration::from_millis(ms);
        self
    }

    /// Sets the bandwidth cap in bytes per second (`0` = unlimited).
    #[must_use]
    pub fn bandwidth(mut self, bytes_per_sec: u64) -> Self {
        self.conditions.bandwidth = bytes_per_sec;
        self
    }

    /// Sets the loss rate.
    #[must_use]
    pub fn loss_rate(mut self, rate: f64) -> Self {
        self.conditions.loss_rate = clamp_rate(rate);
        self
    }

    /// Sets the reorder rate.
    #[must_use]
    pub fn reorder_rate(mut self, rate: f64) -> Self {
        self.conditions.reorder_rate = clamp_rate(rate);
        self
    }

    /// Sets the duplicate rate.
    #[must_use]
    pub fn duplicate_rate(mut self, rate: f64) -> Self {
        self.conditions.duplicate_rate = clamp_rate(rate);
        self
    }

    /// Adds one partitioned (unreachable) address.
    #[must_use]
    pub fn partition(mut self, address: impl Into<String>) -> Self {
        self.conditions.partitions.insert(address.into());
        self
    }

    /// Adds several partitioned addresses.
    #[must_use]
    pub fn partitions<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions
            .partitions
            .extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Sets the random seed (`0` = unpredictable).
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.conditions.seed = seed;
        self
    }

    /// Routes background diagnostics to `observer` instead of tracing.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Builds the profile.
    #[must_use]
    pub fn build(self) -> ConditionProfile {
        ConditionProfile {
            inner: Mutex::new(self.conditions),
            observer: self
                .observer
                .unwrap_or_else(|| Arc::new(TracingObserver::new())),
        }
    }

    /// Builds the profile ready to be shared.
    #[must_use]
    pub fn build_shared(self) -> Arc<ConditionProfile> {
        Arc::new(self.build())
    }
}
