//! Payload decryption and the "looks encrypted" heuristic.
//!
//! Every failure in the decrypt chain collapses into
//! [`ClientError::Decryption`]. Do not add detail here: distinguishing a bad
//! key from a bad ciphertext would turn this into a decryption oracle.

use std::sync::LazyLock;

use regex::Regex;

use super::codec;
use super::keys::{ImportedPrivateKey, import_private_key};
use crate::error::ClientError;

static BASE64_SHAPE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").ok());

/// Decrypts base64 ciphertext with a base64 PKCS#8 private key and decodes
/// the result as UTF-8.
///
/// # Errors
///
/// Returns [`ClientError::Decryption`] on any failure: key import,
/// base64 decoding, OAEP decryption or UTF-8 decoding.
pub fn decrypt(ciphertext_base64: &str, private_key_base64: &str) -> Result<String, ClientError> {
    let key = import_private_key(private_key_base64).map_err(|_| ClientError::Decryption)?;
    decrypt_with(&key, ciphertext_base64)
}

/// Decrypts base64 ciphertext with an already imported key.
///
/// # Errors
///
/// Returns [`ClientError::Decryption`] on any failure.
pub fn decrypt_with(key: &ImportedPrivateKey, ciphertext_base64: &str) -> Result<String, ClientError> {
    let ciphertext = codec::decode(ciphertext_base64).map_err(|_| ClientError::Decryption)?;
    let plaintext = key.decrypt_raw(&ciphertext)?;
    String::from_utf8(plaintext).map_err(|_| ClientError::Decryption)
}

/// Returns `true` if `text` is made of base64 alphabet characters with at
/// most two trailing `=`.
///
/// Only a hint for whether decryption is worth attempting.
#[must_use]
pub fn looks_encrypted(text: &str) -> bool {
    BASE64_SHAPE.as_ref().is_some_and(|re| re.is_match(text))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::crypto::keys::{encrypt_for, fixtures};

    #[test]
    fn round_trip_through_generated_pair() {
        let pair = fixtures::pair();
        let Ok(ciphertext) = encrypt_for(&pair.public_key, "Subject: hello\r\n\r\nbody ✓") else {
            panic!("encryption failed");
        };
        assert!(looks_encrypted(&ciphertext));
        assert_eq!(
            decrypt(&ciphertext, &pair.private_key),
            Ok("Subject: hello\r\n\r\nbody ✓".to_string())
        );
    }

    #[test]
    fn cached_key_decrypts_repeatedly() {
        let pair = fixtures::pair();
        let Ok(key) = import_private_key(&pair.private_key) else {
            panic!("import failed");
        };
        for text in ["one", "two"] {
            let Ok(ciphertext) = encrypt_for(&pair.public_key, text) else {
                panic!("encryption failed");
            };
            assert_eq!(decrypt_with(&key, &ciphertext), Ok(text.to_string()));
        }
    }

    #[test]
    fn wrong_key_fails_with_decryption_error() {
        let Ok(ciphertext) = encrypt_for(&fixtures::pair().public_key, "secret") else {
            panic!("encryption failed");
        };
        let result = decrypt(&ciphertext, &fixtures::other_pair().private_key);
        assert_eq!(result, Err(ClientError::Decryption));
    }

    #[test]
    fn every_failure_is_indistinguishable() {
        let pair = fixtures::pair();
        let Ok(ciphertext) = encrypt_for(&pair.public_key, "secret") else {
            panic!("encryption failed");
        };
        let failures = [
            decrypt(&ciphertext, "not-a-key"),
            decrypt("!!!", &pair.private_key),
            decrypt("Zm9v", &pair.private_key),
            decrypt(&ciphertext, &pair.public_key),
        ];
        for failure in failures {
            assert_eq!(failure, Err(ClientError::Decryption));
        }
    }

    #[test]
    fn heuristic_accepts_base64_shapes() {
        assert!(looks_encrypted("Zm9v"));
        assert!(looks_encrypted("Zm9vYg=="));
        assert!(looks_encrypted("a+b/c="));
    }

    #[test]
    fn heuristic_rejects_plain_text() {
        assert!(!looks_encrypted(""));
        assert!(!looks_encrypted("hello world"));
        assert!(!looks_encrypted("a@b.com"));
        assert!(!looks_encrypted("Zm9v==="));
        assert!(!looks_encrypted("=Zm9v"));
    }
}
