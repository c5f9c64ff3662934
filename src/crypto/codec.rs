//! Base64 conversions shared by the crypto operations and the URL
//! capability transport.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::ClientError;

/// Encodes raw bytes as standard (padded) base64.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes standard base64 into raw bytes.
///
/// # Errors
///
/// Returns [`ClientError::Encoding`] if `text` is not valid base64.
pub fn decode(text: &str) -> Result<Vec<u8>, ClientError> {
    STANDARD.decode(text.trim()).map_err(|_| ClientError::Encoding)
}
