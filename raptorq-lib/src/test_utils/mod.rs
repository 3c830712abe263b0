//! Test utilities for the premium engine.
//!
//! This module is only available with the `test-utils` feature or in test builds.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use raptorq_lib::test_utils::ManualClock;
//!
//! let clock = ManualClock::at_unix(1_700_000_000);
//! clock.advance(chrono::Duration::days(31));
//! ```

mod clock;

pub use clock::ManualClock;
