//! Structured diagnostics for background delivery failures and lifecycle events.
//!
//! Shims run background tasks whose failures cannot be returned to any caller:
//! the enqueue that fed them already reported success. Those failures are
//! recorded here as structured [`NetEvent`]s instead of being silently dropped.
//! Events can be:
//!
//! - Logged via tracing (default behavior)
//! - Collected programmatically for testing
//! - Sent to custom observers (metrics, alerting, etc.)
//!
//! # Example
//!
//! ```
//! use simnet::telemetry::{CollectingObserver, EventKind};
//! use simnet::ConditionProfile;
//! use std::sync::Arc;
//!
//! let observer = Arc::new(CollectingObserver::new());
//! let profile = ConditionProfile::builder()
//!     .observer(observer.clone())
//!     .build();
//!
//! // ... run traffic through shims built from `profile` ...
//! assert!(!observer.has_event(EventKind::Transmission));
//! # drop(profile);
//! ```

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Severity of a recorded event.
///
/// Severities are ordered from least to most severe, allowing filtering
/// and comparison operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational, nothing went wrong.
    Info,
    /// Unexpected but recoverable; delivery of one unit may have failed.
    Warning,
    /// Serious issue; the connection may no longer deliver anything.
    Error,
}

impl Severity {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of recorded events.
///
/// # Forward Compatibility
///
/// This enum is marked `#[non_exhaustive]` because new categories
/// may be added in future versions. Always include a wildcard arm when matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum EventKind {
    /// The real transport rejected an outbound write or send.
    Transmission,
    /// The real transport failed while receiving.
    Reception,
    /// A profile parameter was unusable and a fallback was applied.
    Configuration,
    /// A connection was wrapped, closed, or its background task stopped.
    Lifecycle,
}

impl EventKind {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transmission => "transmission",
            Self::Reception => "reception",
            Self::Configuration => "configuration",
            Self::Lifecycle => "lifecycle",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded diagnostic event.
///
/// # Example
///
/// ```
/// use simnet::telemetry::{NetEvent, Severity, EventKind};
///
/// let event = NetEvent::new(
///     Severity::Warning,
///     EventKind::Transmission,
///     "send failed",
///     "stream.rs:42",
/// ).with_context("peer", "127.0.0.1:9000");
///
/// let json = serde_json::to_string(&event).unwrap();
/// assert!(json.contains(r#""severity":"warning""#));
/// assert!(json.contains(r#""kind":"transmission""#));
/// ```
#[derive(Debug, Clone, serde::Serialize)]
pub struct NetEvent {
    /// The severity level of this event.
    pub severity: Severity,
    /// The category of this event.
    pub kind: EventKind,
    /// Human-readable description.
    pub message: String,
    /// Source location where the event was raised (file:line).
    pub location: &'static str,
    /// Additional structured context as key-value pairs.
    pub context: BTreeMap<String, String>,
}

impl NetEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(
        severity: Severity,
        kind: EventKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            context: BTreeMap::new(),
        }
    }

    /// Adds a context key-value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Serializes this event to a JSON string.
    ///
    /// Returns `None` if serialization fails.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }

    /// Like [`to_json`](Self::to_json), but with indentation for readability.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json_pretty(&self) -> Option<String> {
        serde_json::to_string_pretty(self).ok()
    }
}

impl std::fmt::Display for NetEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {} (at {}",
            self.severity, self.kind, self.message, self.location
        )?;
        if !self.context.is_empty() {
            write!(f, ", context={:?}", self.context)?;
        }
        write!(f, ")")
    }
}

/// Trait for observing diagnostic events.
///
/// Observers are shared with background tasks, so they must be `Send + Sync`.
///
/// # Example
///
/// ```
/// use simnet::telemetry::{EventObserver, NetEvent};
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// #[derive(Default)]
/// struct FailureCounter(AtomicU64);
///
/// impl EventObserver for FailureCounter {
///     fn on_event(&self, _event: &NetEvent) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
pub trait EventObserver: Send + Sync {
    /// Called when an event is raised.
    ///
    /// This runs on the raising task, so it should return quickly.
    fn on_event(&self, event: &NetEvent);
}

/// Built-in observer that logs events via the `tracing` crate.
///
/// # Log Levels
///
/// - `Info` severity → `tracing::debug!`
/// - `Warning` severity → `tracing::warn!`
/// - `Error` severity → `tracing::error!`
///
/// All fields are output as structured tracing fields (`severity`, `kind`,
/// `location`, `context`), compatible with `tracing-subscriber`'s JSON layer.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EventObserver for TracingObserver {
    fn on_event(&self, event: &NetEvent) {
        let severity = event.severity.as_str();
        let kind = event.kind.as_str();
        let location = event.location;

        let context_str = if event.context.is_empty() {
            "{}".to_owned()
        } else {
            let pairs: Vec<String> = event
                .context
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            format!("{{{}}}", pairs.join(", "))
        };

        match event.severity {
            Severity::Info => {
                tracing::debug!(severity, kind, location, context = %context_str, "{}", event.message);
            },
            Severity::Warning => {
                tracing::warn!(severity, kind, location, context = %context_str, "{}", event.message);
            },
            Severity::Error => {
                tracing::error!(severity, kind, location, context = %context_str, "{}", event.message);
            },
        }
    }
}

/// Built-in observer that collects events for testing.
///
/// # Example
///
/// ```
/// use simnet::telemetry::{CollectingObserver, EventKind, EventObserver, NetEvent, Severity};
///
/// let observer = CollectingObserver::new();
/// observer.on_event(&NetEvent::new(
///     Severity::Warning,
///     EventKind::Transmission,
///     "test event",
///     "test.rs:1",
/// ));
///
/// assert_eq!(observer.events().len(), 1);
/// assert!(observer.has_event(EventKind::Transmission));
/// ```
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<NetEvent>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer with an empty event list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<NetEvent> {
        self.events.lock().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Checks if any event of the specified kind has been collected.
    #[must_use]
    pub fn has_event(&self, kind: EventKind) -> bool {
        self.events.lock().iter().any(|e| e.kind == kind)
    }

    /// Returns all events matching the specified kind.
    #[must_use]
    pub fn events_of_kind(&self, kind: EventKind) -> Vec<NetEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Returns all events at or above the specified severity.
    #[must_use]
    pub fn events_at_severity(&self, min_severity: Severity) -> Vec<NetEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.severity >= min_severity)
            .cloned()
            .collect()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventObserver for CollectingObserver {
    fn on_event(&self, event: &NetEvent) {
        self.events.lock().push(event.clone());
    }
}

/// A composite observer that forwards events to multiple observers.
///
/// Useful to both log events and collect them in a test.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn EventObserver>>,
}

impl CompositeObserver {
    /// Creates a new composite observer with no child observers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Adds an observer to the composite.
    pub fn add(&mut self, observer: Arc<dyn EventObserver>) {
        self.observers.push(observer);
    }

    /// Creates a composite observer from a list of observers.
    #[must_use]
    pub fn from_observers(observers: Vec<Arc<dyn EventObserver>>) -> Self {
        Self { observers }
    }
}

impl EventObserver for CompositeObserver {
    fn on_event(&self, event: &NetEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

impl std::fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("num_observers", &self.observers.len())
            .finish()
    }
}

/// Reports an event via tracing, capturing the current file and line.
///
/// Used where no profile (and therefore no configured observer) is in reach.
///
/// ```text
/// report_event!(severity, kind, "message");
/// report_event!(severity, kind, "message with {}", format_args);
/// ```
#[macro_export]
macro_rules! report_event {
    ($severity:expr, $kind:expr, $msg:literal) => {{
        use $crate::telemetry::EventObserver as _;
        let event = $crate::telemetry::NetEvent::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_event(&event);
    }};

    ($severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        use $crate::telemetry::EventObserver as _;
        let event = $crate::telemetry::NetEvent::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_event(&event);
    }};
}

/// Reports an event to a specific observer, capturing the current file and line.
///
/// The observer expression must dereference to `dyn EventObserver`
/// (e.g. `Arc<dyn EventObserver>`).
///
/// ```text
/// report_event_to!(observer, severity, kind, "message");
/// report_event_to!(observer, severity, kind, "message with {}", format_args);
/// report_event_to!(observer, severity, kind, { "peer" => addr }, "message with {}", format_args);
/// ```
///
/// Context values only need to implement `Display`.
#[macro_export]
macro_rules! report_event_to {
    ($observer:expr, $severity:expr, $kind:expr, { $($key:literal => $value:expr),+ }, $fmt:literal $(, $arg:expr)*) => {{
        let event = $crate::telemetry::NetEvent::new(
            $severity,
            $kind,
            format!($fmt $(, $arg)*),
            concat!(file!(), ":", line!()),
        )
        $(.with_context($key, $value.to_string()))+;
        $crate::telemetry::EventObserver::on_event(&*$observer, &event);
    }};

    ($observer:expr, $severity:expr, $kind:expr, $msg:literal) => {{
        let event = $crate::telemetry::NetEvent::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::EventObserver::on_event(&*$observer, &event);
    }};

    ($observer:expr, $severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        let event = $crate::telemetry::NetEvent::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::EventObserver::on_event(&*$observer, &event);
    }};
}
