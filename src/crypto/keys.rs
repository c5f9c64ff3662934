//! RSA-OAEP key generation, import and sender-side encryption.

use std::fmt;
use std::sync::Arc;

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::codec;
use crate::error::ClientError;

/// Modulus length of generated keys.
pub const MODULUS_BITS: usize = 2048;

/// A freshly generated key pair in its interchange form.
///
/// `public_key` is base64 SPKI DER, `private_key` is base64 PKCS#8 DER.
/// Whoever holds `private_key` can read the inbox; it is never sent to the
/// backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    /// Base64-encoded SPKI public key.
    pub public_key: String,
    /// Base64-encoded PKCS#8 private key.
    pub private_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// An imported, decrypt-only private key.
///
/// The handle is opaque: the key material cannot be read back out of it.
/// Cloning is cheap, so callers may cache one handle per inbox.
#[derive(Clone)]
pub struct ImportedPrivateKey {
    key: Arc<RsaPrivateKey>,
}

impl ImportedPrivateKey {
    /// Decrypts raw OAEP ciphertext.
    pub(crate) fn decrypt_raw(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ClientError> {
        self.key
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|_| ClientError::Decryption)
    }
}

impl fmt::Debug for ImportedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ImportedPrivateKey(..)")
    }
}

/// Generates a fresh RSA-2048 key pair for OAEP/SHA-256.
///
/// # Errors
///
/// Returns [`ClientError::KeyGeneration`] if generation or export fails.
/// The underlying cause is logged at debug level only.
pub fn generate_key_pair() -> Result<KeyPair, ClientError> {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, MODULUS_BITS).map_err(|e| {
        tracing::debug!(error = %e, "rsa key generation failed");
        ClientError::KeyGeneration
    })?;
    let public = RsaPublicKey::from(&private);

    let spki = public
        .to_public_key_der()
        .map_err(|_| ClientError::KeyGeneration)?;
    let pkcs8 = private
        .to_pkcs8_der()
        .map_err(|_| ClientError::KeyGeneration)?;

    Ok(KeyPair {
        public_key: codec::encode(spki.as_bytes()),
        private_key: codec::encode(pkcs8.as_bytes()),
    })
}

/// Imports a base64 PKCS#8 private key for decryption.
///
/// # Errors
///
/// Returns [`ClientError::InvalidKey`] if the input is not base64, not
/// PKCS#8, or not an RSA key.
pub fn import_private_key(private_key_base64: &str) -> Result<ImportedPrivateKey, ClientError> {
    let der = codec::decode(private_key_base64).map_err(|_| ClientError::InvalidKey)?;
    let key = RsaPrivateKey::from_pkcs8_der(&der).map_err(|_| ClientError::InvalidKey)?;
    Ok(ImportedPrivateKey { key: Arc::new(key) })
}

/// Encrypts `plaintext` for the holder of the matching private key and
/// returns base64 ciphertext.
///
/// This is what the mail server does for reserved, encrypted inboxes.
/// OAEP/SHA-256 over a 2048-bit modulus fits at most 190 bytes.
///
/// # Errors
///
/// Returns [`ClientError::InvalidPublicKey`] if the key cannot be imported
/// and [`ClientError::Encryption`] if the plaintext does not fit.
pub fn encrypt_for(public_key_base64: &str, plaintext: &str) -> Result<String, ClientError> {
    let der = codec::decode(public_key_base64).map_err(|_| ClientError::InvalidPublicKey)?;
    let public = RsaPublicKey::from_public_key_der(&der).map_err(|_| ClientError::InvalidPublicKey)?;
    let mut rng = rand::thread_rng();
    let ciphertext = public
        .encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext.as_bytes())
        .map_err(|_| ClientError::Encryption)?;
    Ok(codec::encode(&ciphertext))
}


#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn generated_halves_are_distinct_base64() {
        let pair = fixtures::pair();
        assert_ne!(pair.public_key, pair.private_key);
        assert!(codec::decode(&pair.public_key).is_ok());
        assert!(codec::decode(&pair.private_key).is_ok());
    }

    #[test]
    fn generated_public_key_is_spki() {
        let pair = fixtures::pair();
        let Ok(der) = codec::decode(&pair.public_key) else {
            panic!("public key is not base64");
        };
        let Ok(public) = RsaPublicKey::from_public_key_der(&der) else {
            panic!("public key is not SPKI");
        };
        assert_eq!(rsa::traits::PublicKeyParts::size(&public) * 8, MODULUS_BITS);
    }

    #[test]
    fn import_accepts_generated_private_key() {
        assert!(import_private_key(&fixtures::pair().private_key).is_ok());
    }

    #[test]
    fn import_rejects_garbage() {
        assert!(matches!(import_private_key("%%%"), Err(ClientError::InvalidKey)));
        assert!(matches!(import_private_key("Zm9v"), Err(ClientError::InvalidKey)));
    }

    #[test]
    fn import_rejects_public_key() {
        let result = import_private_key(&fixtures::pair().public_key);
        assert!(matches!(result, Err(ClientError::InvalidKey)));
    }

    #[test]
    fn encrypt_rejects_private_key_as_public() {
        let result = encrypt_for(&fixtures::pair().private_key, "hi");
        assert_eq!(result, Err(ClientError::InvalidPublicKey));
    }

    #[test]
    fn encrypt_rejects_oversized_plaintext() {
        let big = "x".repeat(191);
        let result = encrypt_for(&fixtures::pair().public_key, &big);
        assert_eq!(result, Err(ClientError::Encryption));
    }

    #[test]
    fn debug_output_redacts_private_material() {
        let pair = fixtures::pair();
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains(&pair.private_key));
        let Ok(key) = import_private_key(&pair.private_key) else {
            panic!("import failed");
        };
        assert_eq!(format!("{key:?}"), "ImportedPrivateKey(..)");
    }
}
