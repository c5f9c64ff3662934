//! # ephimail-client
//!
//! Client core for the ephimail disposable-inbox service: realtime inbox
//! notifications over a reconnecting socket, and end-to-end encrypted
//! mailboxes whose private key lives only in the page address fragment.
//!
//! ## Architecture
//!
//! ```text
//! Caller (UI, CLI)
//!     │
//!     ├── CapabilityTransport (capability/)   (email, key) ⇄ #/<email>?key=…
//!     ├── crypto/                              RSA-OAEP key pairs, decrypt
//!     │
//!     ├── SubscriptionManager (ws/)            subscribe / unsubscribe intents
//!     ├── ConnectionManager (ws/)              socket lifecycle, backoff, routing
//!     ├── EventBus (ws/)                       named listeners, once semantics
//!     │
//!     └── Transport (ws/)                      tokio-tungstenite socket
//! ```
//!
//! Every service is an explicitly constructed value; nothing is global.

pub mod capability;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ws;
