//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `test_utils`: tracing setup, loopback connection helpers and timeouts
//!
//! # Usage
//!
//! From any integration test file:
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::test_utils::{shimmed_client, IO_TIMEOUT};
//! ```

pub mod test_utils;

// Re-export commonly used items for convenience.
#[allow(unused_imports)]
pub use test_utils::{
    init_tracing, loopback, read_until_eof, shimmed_client, shimmed_pair, udp_pair, IO_TIMEOUT,
};
