//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use raptorq_lib::prelude::*;
//! ```

// Error handling
pub use crate::errors::{EngineError, EngineErrorCode, ErrorKind};
pub use crate::Result;

// Time
pub use crate::clock::{Clock, SystemClock};

// Cryptography
pub use crate::envelope::{CredentialEnvelope, Envelope, KdfParams};
pub use crate::signature::{SignatureGenerator, SignatureRecord};
