//! Inbox subscriptions.
//!
//! Turns "watch this inbox" into `subscribe` / `unsubscribe` frames. A
//! subscribe requested before the socket is open is parked as a one-shot
//! `connect` listener and sent as soon as the connection opens.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

use super::connection::ConnectionManager;
use super::event_bus::{ListenerOptions, callback};
use super::messages::{self, WireMessage};
use crate::error::ClientError;

/// Maps inbox addresses to subscription frames on a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    connection: ConnectionManager,
}

impl SubscriptionManager {
    /// Creates a subscription manager on top of `connection`.
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Subscribes to `email`.
    ///
    /// Sends the frame right away when connected. Otherwise the intent
    /// waits for the next `connect` event, and a connection is opened if
    /// none is already in progress.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the open socket refuses the
    /// frame.
    pub fn subscribe(&self, email: &str) -> Result<(), ClientError> {
        if self.connection.is_connected() {
            tracing::debug!(email, "subscribing to inbox");
            return self.connection.send(&WireMessage::subscribe(email));
        }

        // Exactly one of the deferred listener and the re-check below sends.
        let claimed = Arc::new(AtomicBool::new(false));
        let weak = self.connection.downgrade();
        let email_owned = email.to_string();
        let listener_claim = Arc::clone(&claimed);
        let id = self.connection.events().add_listener(
            messages::CONNECT,
            callback(move |_: &Value| {
                if listener_claim.swap(true, Ordering::SeqCst) {
                    return;
                }
                let Some(connection) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = SubscriptionManager::new(connection).subscribe(&email_owned) {
                    tracing::warn!(email = %email_owned, error = %e, "deferred subscribe failed");
                }
            }),
            ListenerOptions::once(),
        );

        // The socket may have opened, and `connect` been dispatched, between
        // the first check and the registration above.
        if self.connection.is_connected() && !claimed.swap(true, Ordering::SeqCst) {
            self.connection.events().remove_by_id(messages::CONNECT, id);
            tracing::debug!(email, "socket opened while deferring; subscribing now");
            return self.connection.send(&WireMessage::subscribe(email));
        }
        tracing::debug!(email, "subscribe deferred until connected");

        if !self.connection.has_socket() {
            self.connection.connect();
        }
        Ok(())
    }

    /// Unsubscribes from `email`. A no-op while disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the open socket refuses the
    /// frame.
    pub fn unsubscribe(&self, email: &str) -> Result<(), ClientError> {
        if !self.connection.is_connected() {
            return Ok(());
        }
        tracing::debug!(email, "unsubscribing from inbox");
        self.connection.send(&WireMessage::unsubscribe(email))
    }
}
