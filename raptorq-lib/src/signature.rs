//! Time-salted artifact signatures.
//!
//! A signature is SHAKE256 over `payload ∥ protocol tag ∥ unix seconds`,
//! squeezed to 2048 bits and hex-encoded (512 characters). There is no key:
//! the output binds the payload to the second it was created, nothing more.
//!
//! Two calls with the same payload inside the same second produce the same
//! signature. Callers that need uniqueness must put a nonce in the payload.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha3::{
    digest::{ExtendableOutput, Update, XofReader},
    Shake256,
};
use subtle::ConstantTimeEq;

use crate::clock::{Clock, SystemClock};

/// Domain tag mixed into every signature.
pub const SIGNATURE_TAG: &str = "RAPTORQ_QUANTUM_SIGNATURE_V1";

/// Output length in bytes (2048 bits).
pub const SIGNATURE_BYTES: usize = 256;

/// Algorithm label reported in [`SignatureRecord`].
pub const SIGNATURE_ALGORITHM: &str = "SHAKE256-2048";

/// Signature plus the metadata needed to recompute it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    /// Hex-encoded digest (512 characters).
    pub digest_hex: String,
    /// Unix timestamp (seconds) mixed into the digest.
    pub signed_at: i64,
    /// Algorithm label.
    pub algorithm: String,
    /// Digest length in bits.
    pub output_bits: usize,
}

/// Produces time-salted signatures for created assets and messages.
#[derive(Clone)]
pub struct SignatureGenerator {
    clock: Arc<dyn Clock>,
}

impl Default for SignatureGenerator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl SignatureGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Sign `payload` at the current second.
    pub fn sign(&self, payload: &str) -> String {
        sign_at(payload, self.clock.unix_now())
    }

    /// Sign `payload` and return the digest with its metadata.
    pub fn sign_record(&self, payload: &str) -> SignatureRecord {
        let signed_at = self.clock.unix_now();
        SignatureRecord {
            digest_hex: sign_at(payload, signed_at),
            signed_at,
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            output_bits: SIGNATURE_BYTES * 8,
        }
    }

    /// Recompute the signature for `payload` at `signed_at` and compare.
    pub fn verify(&self, payload: &str, signed_at: i64, digest_hex: &str) -> bool {
        let expected = sign_at(payload, signed_at);
        expected.len() == digest_hex.len()
            && bool::from(expected.as_bytes().ct_eq(digest_hex.as_bytes()))
    }
}

/// Deterministic signature of `payload` at a given unix second.
pub fn sign_at(payload: &str, unix_secs: i64) -> String {
    let mut hasher = Shake256::default();
    hasher.update(payload.as_bytes());
    hasher.update(SIGNATURE_TAG.as_bytes());
    hasher.update(unix_secs.to_string().as_bytes());

    let mut out = [0u8; SIGNATURE_BYTES];
    hasher.finalize_xof().read(&mut out);
    hex::encode(out)
}
