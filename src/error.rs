//! Client error types with stable numeric codes.
//!
//! [`ClientError`] is the single error type of the crate. The cryptographic
//! variants are deliberately coarse: they never carry the underlying cause,
//! so a caller (or an attacker driving the caller) cannot tell a bad key
//! from bad ciphertext.

/// Client-side error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category       |
/// |-----------|----------------|
/// | 1000–1999 | Cryptography   |
/// | 2000–2999 | Transport      |
/// | 3000–3999 | Configuration  |
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Key pair generation or export failed.
    #[error("failed to generate encryption keys")]
    KeyGeneration,

    /// A private key could not be decoded or imported.
    #[error("invalid private key")]
    InvalidKey,

    /// A public key could not be decoded or imported.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Encrypting a payload for a public key failed.
    #[error("failed to encrypt message")]
    Encryption,

    /// Any failure while decrypting a payload.
    #[error("failed to decrypt email: invalid key or corrupted data")]
    Decryption,

    /// Input was not valid base64.
    #[error("invalid base64 encoding")]
    Encoding,

    /// Transport-level failure (non-fatal for the connection manager).
    #[error("transport error: {0}")]
    Transport(String),

    /// An outbound frame was requested while no connection is open.
    #[error("not connected")]
    NotConnected,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::KeyGeneration => 1001,
            Self::InvalidKey => 1002,
            Self::InvalidPublicKey => 1003,
            Self::Encryption => 1004,
            Self::Decryption => 1005,
            Self::Encoding => 1006,
            Self::Transport(_) => 2001,
            Self::NotConnected => 2002,
            Self::Config(_) => 3001,
        }
    }

    /// Returns `true` for errors raised by the cryptographic pipeline.
    #[must_use]
    pub const fn is_crypto(&self) -> bool {
        self.error_code() < 2000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_fall_in_their_ranges() {
        assert!(ClientError::Decryption.is_crypto());
        assert!(ClientError::KeyGeneration.is_crypto());
        assert!(!ClientError::NotConnected.is_crypto());
        assert_eq!(ClientError::Transport("x".into()).error_code(), 2001);
        assert_eq!(ClientError::Config("x".into()).error_code(), 3001);
    }

    #[test]
    fn crypto_messages_carry_no_detail() {
        assert_eq!(
            ClientError::Decryption.to_string(),
            "failed to decrypt email: invalid key or corrupted data"
        );
        assert_eq!(ClientError::InvalidKey.to_string(), "invalid private key");
    }
}
