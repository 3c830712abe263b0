//! RaptorQ core library.
//!
//! Stateless building blocks shared by the premium engine:
//!
//! - **Errors**: one taxonomy ([`EngineError`]) used by every component
//! - **Clock**: injected time source so expiry logic is testable
//! - **Credential envelope**: two-layer password encryption of wallet secrets
//! - **Signatures**: time-salted SHAKE256 digests bound to created artifacts
//!
//! # Example
//!
//! ```ignore
//! use raptorq_lib::envelope::{CredentialEnvelope, KdfParams};
//!
//! let sealer = CredentialEnvelope::new(KdfParams::default())?;
//! let envelope = sealer.protect(b"private key", "password")?;
//! let secret = sealer.reveal(&envelope, "password")?;
//! assert_eq!(secret, b"private key");
//! ```

pub mod clock;
pub mod envelope;
pub mod errors;
pub mod prelude;
pub mod signature;

/// Test utilities (manual clock).
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use clock::{Clock, SystemClock};
pub use envelope::{CredentialEnvelope, Envelope, KdfParams};
pub use errors::{EngineError, EngineErrorCode, ErrorKind};
pub use signature::{SignatureGenerator, SignatureRecord};

/// Common result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
