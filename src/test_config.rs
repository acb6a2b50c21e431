//! Shared configuration for property-based tests.
//!
//! Keeps proptest case counts consistent across the profile and RNG test
//! modules, and shrinks them under Miri where every case is expensive.
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_config::miri_case_count;
//!
//! proptest! {
//!     #![proptest_config(ProptestConfig {
//!         cases: miri_case_count(),
//!         ..ProptestConfig::default()
//!     })]
//!     #[test]
//!     fn prop_delay_never_below_latency(latency_ms in 0u64..1000) {
//!         // test body
//!     }
//! }
//! ```

/// Returns the number of cases each property test should run.
///
/// 5 under Miri, 256 otherwise.
#[must_use]
pub const fn miri_case_count() -> u32 {
    if cfg!(miri) {
        5
    } else {
        256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miri_case_count_matches_interpreter() {
        let expected = if cfg!(miri) { 5 } else { 256 };
        assert_eq!(miri_case_count(), expected);
    }
}
