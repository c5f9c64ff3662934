//! Realtime layer: socket lifecycle, reconnection, event routing and inbox
//! subscriptions.
//!
//! The backend endpoint at `/ws` pushes `new_email` / `email_deleted`
//! notifications for every inbox the client subscribed to.

pub mod connection;
pub mod event_bus;
pub mod messages;
pub mod reconnect;
pub mod subscription;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState, WeakConnectionManager};
pub use event_bus::{Callback, EventBus, ListenerId, ListenerOptions};
pub use messages::{InboxNotice, WireMessage};
pub use reconnect::ReconnectPolicy;
pub use subscription::SubscriptionManager;
pub use transport::{SocketHandle, Transport, TransportEvent, TransportEvents, WsTransport};
