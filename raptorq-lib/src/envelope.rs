//! Two-layer password envelope for wallet secrets and message bodies.
//!
//! # Layering
//!
//! 1. `key1 = Argon2id(password, salt1)`; the secret is sealed with
//!    AES-256-GCM under `key1`, producing the inner ciphertext
//!    (`nonce1 ∥ ct ∥ tag`).
//! 2. `inner_digest = SHA-256(inner ciphertext)` and
//!    `key2 = Argon2id(inner_digest, salt2)`; the inner ciphertext is sealed
//!    again under `key2`.
//!
//! The second key is bound to the first layer's output rather than to the
//! password. Opening the envelope needs that binding material before the
//! outer layer is removed, so the digest travels in the header and is
//! re-checked (constant time) once the outer layer is open. Secrecy rests on
//! the password layer; the outer layer binds the inner ciphertext to its
//! digest and salt.
//!
//! # Wire Format
//!
//! ```text
//! [1 version][4 m_cost][4 t_cost][4 p_cost][32 salt1][32 salt2]
//! [32 inner_digest][12 nonce2][N outer ciphertext + 16 tag]
//! ```
//!
//! KDF cost parameters are stored big-endian so envelopes stay openable
//! after the configured cost changes.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{EngineError, Result};

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Size of each salt in bytes.
pub const SALT_SIZE: usize = 32;

const DIGEST_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32;

const HEADER_SIZE: usize = 1 + 4 * 3 + SALT_SIZE * 2 + DIGEST_SIZE + NONCE_SIZE;

/// Smallest possible outer ciphertext: an empty secret sealed twice.
const MIN_OUTER_SIZE: usize = NONCE_SIZE + TAG_SIZE + TAG_SIZE;

/// Upper bound on the memory cost an envelope may request (1 GiB).
pub const MAX_MEMORY_KIB: u32 = 1024 * 1024;

/// Upper bound on the passes an envelope may request.
pub const MAX_ITERATIONS: u32 = 64;

/// Upper bound on the lanes an envelope may request.
pub const MAX_PARALLELISM: u32 = 64;

/// Argon2id cost parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    /// Number of passes over memory.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Degree of parallelism.
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

fn default_memory_kib() -> u32 {
    Params::DEFAULT_M_COST
}

fn default_iterations() -> u32 {
    Params::DEFAULT_T_COST
}

fn default_parallelism() -> u32 {
    Params::DEFAULT_P_COST
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

impl KdfParams {
    /// Minimal cost parameters. Only suitable for tests.
    pub fn low_cost() -> Self {
        Self {
            memory_kib: Params::MIN_M_COST,
            iterations: Params::MIN_T_COST,
            parallelism: Params::MIN_P_COST,
        }
    }

    /// Set the memory cost.
    pub fn with_memory_kib(mut self, memory_kib: u32) -> Self {
        self.memory_kib = memory_kib;
        self
    }

    /// Set the iteration count.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Whether the costs are within what this crate will spend on one key.
    ///
    /// Envelope headers are untrusted, so this runs before any derivation.
    pub fn within_limits(&self) -> bool {
        self.memory_kib <= MAX_MEMORY_KIB
            && self.iterations <= MAX_ITERATIONS
            && self.parallelism <= MAX_PARALLELISM
    }

    fn to_argon2(self) -> std::result::Result<Params, argon2::Error> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
    }

    /// Check the parameters are accepted by Argon2.
    pub fn validate(&self) -> Result<()> {
        if !self.within_limits() {
            return Err(EngineError::invalid(
                "kdf_params",
                format!(
                    "costs above {} KiB, {} iterations or {} lanes",
                    MAX_MEMORY_KIB, MAX_ITERATIONS, MAX_PARALLELISM
                ),
            ));
        }
        self.to_argon2()
            .map(|_| ())
            .map_err(|e| EngineError::invalid("kdf_params", e.to_string()))
    }
}

/// Self-contained encrypted representation of a protected secret.
///
/// Immutable once built; a password change produces a new envelope.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Envelope {
    params: KdfParams,
    salt1: [u8; SALT_SIZE],
    salt2: [u8; SALT_SIZE],
    inner_digest: [u8; DIGEST_SIZE],
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("params", &self.params)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

impl Envelope {
    /// KDF parameters the envelope was sealed with.
    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Salt of the password layer.
    pub fn salt1(&self) -> &[u8; SALT_SIZE] {
        &self.salt1
    }

    /// Salt of the outer layer.
    pub fn salt2(&self) -> &[u8; SALT_SIZE] {
        &self.salt2
    }

    /// Encode to the binary wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.ciphertext.len());
        out.push(ENVELOPE_VERSION);
        out.extend_from_slice(&self.params.memory_kib.to_be_bytes());
        out.extend_from_slice(&self.params.iterations.to_be_bytes());
        out.extend_from_slice(&self.params.parallelism.to_be_bytes());
        out.extend_from_slice(&self.salt1);
        out.extend_from_slice(&self.salt2);
        out.extend_from_slice(&self.inner_digest);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Decode from the binary wire format.
    ///
    /// Malformed input is reported as [`EngineError::DecryptionFailed`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE + MIN_OUTER_SIZE {
            return Err(EngineError::DecryptionFailed);
        }
        if bytes[0] != ENVELOPE_VERSION {
            return Err(EngineError::DecryptionFailed);
        }

        let mut cursor = Cursor { bytes, pos: 1 };
        let params = KdfParams {
            memory_kib: u32::from_be_bytes(cursor.take()),
            iterations: u32::from_be_bytes(cursor.take()),
            parallelism: u32::from_be_bytes(cursor.take()),
        };
        let salt1 = cursor.take();
        let salt2 = cursor.take();
        let inner_digest = cursor.take();
        let nonce = cursor.take();
        let ciphertext = bytes[cursor.pos..].to_vec();

        Ok(Self {
            params,
            salt1,
            salt2,
            inner_digest,
            nonce,
            ciphertext,
        })
    }

    /// Hex encoding for document storage.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse the hex encoding.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).map_err(|_| EngineError::DecryptionFailed)?;
        Self::from_bytes(&bytes)
    }
}

impl From<Envelope> for String {
    fn from(envelope: Envelope) -> Self {
        envelope.to_hex()
    }
}

impl TryFrom<String> for Envelope {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    // Callers check the total length before reading the header.
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }
}

/// Seals and opens [`Envelope`]s.
#[derive(Clone, Debug)]
pub struct CredentialEnvelope {
    params: KdfParams,
}

impl Default for CredentialEnvelope {
    fn default() -> Self {
        Self {
            params: KdfParams::default(),
        }
    }
}

impl CredentialEnvelope {
    /// Create an envelope sealer with the given KDF cost.
    pub fn new(params: KdfParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Cost parameters used for new envelopes.
    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Seal `secret` under `password`.
    pub fn protect(&self, secret: &[u8], password: &str) -> Result<Envelope> {
        if password.is_empty() {
            return Err(EngineError::invalid("password", "must not be empty"));
        }

        let mut rng = rand::thread_rng();
        let mut salt1 = [0u8; SALT_SIZE];
        let mut salt2 = [0u8; SALT_SIZE];
        rng.fill_bytes(&mut salt1);
        rng.fill_bytes(&mut salt2);

        let key1 = derive_key(password.as_bytes(), &salt1, self.params)
            .map_err(|e| EngineError::invalid("kdf_params", e.to_string()))?;
        let inner = seal(&key1, secret)?;

        let inner_digest: [u8; DIGEST_SIZE] = Sha256::digest(&inner).into();
        let key2 = derive_key(&inner_digest, &salt2, self.params)
            .map_err(|e| EngineError::invalid("kdf_params", e.to_string()))?;
        let outer = seal(&key2, &inner)?;

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&outer[..NONCE_SIZE]);

        tracing::debug!(
            secret_len = secret.len(),
            envelope_len = HEADER_SIZE + outer.len() - NONCE_SIZE,
            "sealed credential envelope"
        );

        Ok(Envelope {
            params: self.params,
            salt1,
            salt2,
            inner_digest,
            nonce,
            ciphertext: outer[NONCE_SIZE..].to_vec(),
        })
    }

    /// Open an envelope with `password`.
    ///
    /// Any mismatch (wrong password, tampering, bad parameters) yields
    /// [`EngineError::DecryptionFailed`].
    pub fn reveal(&self, envelope: &Envelope, password: &str) -> Result<Vec<u8>> {
        if !envelope.params.within_limits() {
            tracing::warn!(params = ?envelope.params, "envelope requests excessive KDF cost");
            return Err(EngineError::DecryptionFailed);
        }
        let key2 = derive_key(&envelope.inner_digest, &envelope.salt2, envelope.params)
            .map_err(|_| EngineError::DecryptionFailed)?;
        let inner = open(&key2, &envelope.nonce, &envelope.ciphertext)?;

        let digest: [u8; DIGEST_SIZE] = Sha256::digest(&inner[..]).into();
        if !bool::from(digest[..].ct_eq(&envelope.inner_digest[..])) {
            return Err(EngineError::DecryptionFailed);
        }
        if inner.len() < NONCE_SIZE + TAG_SIZE {
            return Err(EngineError::DecryptionFailed);
        }

        let key1 = derive_key(password.as_bytes(), &envelope.salt1, envelope.params)
            .map_err(|_| EngineError::DecryptionFailed)?;
        let (nonce1, ct) = inner.split_at(NONCE_SIZE);
        let secret = open(&key1, nonce1, ct)?;
        Ok(secret.to_vec())
    }

    /// Replace an envelope with one sealed under a new password.
    pub fn reencrypt(
        &self,
        envelope: &Envelope,
        old_password: &str,
        new_password: &str,
    ) -> Result<Envelope> {
        let secret = Zeroizing::new(self.reveal(envelope, old_password)?);
        self.protect(&secret, new_password)
    }
}

fn derive_key(
    input: &[u8],
    salt: &[u8],
    params: KdfParams,
) -> std::result::Result<Zeroizing<[u8; KEY_SIZE]>, argon2::Error> {
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon.hash_password_into(input, salt, &mut key[..])?;
    Ok(key)
}

/// AES-256-GCM seal with a random nonce; output is `nonce ∥ ct ∥ tag`.
fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| EngineError::invalid("key", e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| EngineError::invalid("plaintext", "encryption failed"))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open(key: &[u8; KEY_SIZE], nonce: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EngineError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| EngineError::DecryptionFailed)
}
