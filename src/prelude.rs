//! Convenient re-exports for common usage.
//!
//! This module provides a "prelude" that re-exports the most commonly used types
//! from simnet, allowing you to import them all at once.
//!
//! # Usage
//!
//! ```rust
//! use simnet::prelude::*;
//! ```
//!
//! # What's Included
//!
//! - **Conditions**: [`ConditionProfile`], [`ConditionProfileBuilder`]
//! - **Stream shims**: [`Dialer`], [`SimulatedListener`], [`SimulatedStream`], [`Transport`]
//! - **Datagram shim**: [`SimulatedUdpSocket`]
//! - **Monitoring**: [`ShimStats`], [`EventObserver`], [`CollectingObserver`]
//! - **Error handling**: [`SimnetError`], [`SimnetResult`]
//!
//! # Example
//!
//! ```rust
//! use simnet::prelude::*;
//!
//! let profile = ConditionProfile::builder()
//!     .latency_ms(20)
//!     .loss_rate(0.01)
//!     .build_shared();
//! let dialer = Dialer::new(profile);
//! assert_eq!(dialer.profile().loss_rate(), 0.01);
//! ```

// Conditions
pub use crate::profile::{ConditionProfile, ConditionProfileBuilder};

// Stream shims
pub use crate::{Dialer, SimulatedListener, SimulatedStream, Transport};

// Datagram shim
pub use crate::SimulatedUdpSocket;

// Monitoring
pub use crate::telemetry::{CollectingObserver, EventObserver};
pub use crate::ShimStats;

// Error handling
pub use crate::{SimnetError, SimnetResult};
