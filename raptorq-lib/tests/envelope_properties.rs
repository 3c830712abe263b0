//! Property-based tests for the credential envelope.
//!
//! Argon2 runs at minimum cost here; the case count is kept low because
//! every case still derives four keys.

use proptest::prelude::*;
use raptorq_lib::envelope::{CredentialEnvelope, Envelope, KdfParams};
use raptorq_lib::EngineError;

// version, three cost fields, two salts, digest, outer nonce
const HEADER_SIZE: usize = 1 + 12 + 64 + 32 + 12;

fn sealer() -> CredentialEnvelope {
    CredentialEnvelope::new(KdfParams::low_cost()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Reveal inverts Protect for any secret and non-empty password
    #[test]
    fn reveal_inverts_protect(
        secret in proptest::collection::vec(any::<u8>(), 0..512),
        password in "[ -~]{1,32}"
    ) {
        let sealer = sealer();
        let envelope = sealer.protect(&secret, &password).unwrap();
        prop_assert_eq!(sealer.reveal(&envelope, &password).unwrap(), secret);
    }

    /// A different password never yields plaintext
    #[test]
    fn wrong_password_never_reveals(
        secret in proptest::collection::vec(any::<u8>(), 1..128),
        password in "[a-z]{4,12}",
        suffix in "[0-9]{1,4}"
    ) {
        let sealer = sealer();
        let envelope = sealer.protect(&secret, &password).unwrap();
        let wrong = format!("{}{}", password, suffix);
        prop_assert!(matches!(
            sealer.reveal(&envelope, &wrong),
            Err(EngineError::DecryptionFailed)
        ));
    }

    /// Flipping any ciphertext byte breaks authentication
    #[test]
    fn bit_flip_detected(flip_at in 0usize..64) {
        let sealer = sealer();
        let envelope = sealer.protect(b"wallet private key", "pw").unwrap();
        let mut bytes = envelope.to_bytes();
        let idx = HEADER_SIZE + flip_at % (bytes.len() - HEADER_SIZE);
        bytes[idx] ^= 0x80;

        let result = Envelope::from_bytes(&bytes)
            .and_then(|e| sealer.reveal(&e, "pw"));
        prop_assert!(matches!(result, Err(EngineError::DecryptionFailed)));
    }
}

#[test]
fn wire_encoding_survives_storage() {
    let sealer = sealer();
    let envelope = sealer.protect(b"message body", "pw").unwrap();

    let stored = serde_json::json!({ "encrypted_private_key": envelope });
    let loaded: Envelope =
        serde_json::from_value(stored["encrypted_private_key"].clone()).unwrap();

    assert_eq!(sealer.reveal(&loaded, "pw").unwrap(), b"message body");
}
