//! End-to-end encryption pipeline.
//!
//! Keys are RSA-2048 with OAEP padding over SHA-256. Public keys travel as
//! base64 SPKI, private keys as base64 PKCS#8. The private half is a
//! capability: it is handed to the reader through the page address
//! fragment and never sent to the backend (see [`crate::capability`]).

pub mod codec;
pub mod decrypt;
pub mod keys;

pub use decrypt::{decrypt, decrypt_with, looks_encrypted};
pub use keys::{ImportedPrivateKey, KeyPair, encrypt_for, generate_key_pair, import_private_key};
