//! ephimail-watch entry point.
//!
//! Watches the inbox named in the `PAGE_URL` fragment and logs every
//! notification, decrypting bodies when the fragment carries a key.

use std::sync::Arc;

use serde_json::Value;
use tracing_subscriber::EnvFilter;

use ephimail_client::capability::{AddressBar, CapabilityTransport, MemoryAddressBar};
use ephimail_client::config::ClientConfig;
use ephimail_client::crypto::{generate_key_pair, import_private_key};
use ephimail_client::error::ClientError;
use ephimail_client::ws::event_bus::callback;
use ephimail_client::ws::messages;
use ephimail_client::ws::{ConnectionManager, InboxNotice, ListenerOptions, SubscriptionManager, WsTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut capability = CapabilityTransport::new(MemoryAddressBar::new(config.page_url.clone()));
    let cap = capability.read_capability();
    let Some(email) = cap.email else {
        anyhow::bail!("PAGE_URL fragment does not name an inbox (expected #/<email>)");
    };

    let key = match cap.key {
        Some(key) => Some(key),
        None if config.generate_keypair => {
            let key = provision_key(&mut capability, &email)?;
            println!("{}", capability.address().current());
            Some(key)
        }
        None => None,
    };

    let connection = ConnectionManager::from_config(&config, Arc::new(WsTransport::new()));
    match key.as_deref().map(import_private_key).transpose()? {
        Some(imported) => connection.set_decryption_key(Some(imported)),
        None => tracing::info!(%email, "no key in address fragment, viewing inbox without decryption"),
    }

    register_loggers(&connection);

    let subscriptions = SubscriptionManager::new(connection.clone());
    subscriptions.subscribe(&email)?;
    tracing::info!(%email, endpoint = %connection.endpoint(), "watching inbox");

    tokio::signal::ctrl_c().await?;
    subscriptions.unsubscribe(&email)?;
    connection.disconnect();
    tracing::info!("stopped");

    Ok(())
}

/// Generates a key pair for `email` and writes the private half into the
/// address fragment. Returns the private key.
fn provision_key(
    capability: &mut CapabilityTransport<MemoryAddressBar>,
    email: &str,
) -> Result<String, ClientError> {
    let pair = generate_key_pair()?;
    capability.write_capability(email, Some(&pair.private_key));
    tracing::info!(public_key = %pair.public_key, "generated key pair; register the public key with the inbox reservation");
    Ok(pair.private_key)
}

fn register_loggers(connection: &ConnectionManager) {
    let events = connection.events();
    let persistent = ListenerOptions::default();

    events.add_listener(
        messages::NEW_EMAIL,
        callback(|payload: &Value| match InboxNotice::from_payload(payload) {
            Ok(notice) => {
                tracing::info!(email = %notice.email, decrypted = notice.decrypted, "new email");
                match serde_json::to_string(&notice) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "could not render notice"),
                }
            }
            Err(e) => tracing::warn!(error = %e, "unrecognized new_email payload"),
        }),
        persistent,
    );
    events.add_listener(
        messages::EMAIL_DELETED,
        callback(|payload: &Value| tracing::info!(%payload, "email deleted")),
        persistent,
    );
    events.add_listener(
        messages::DISCONNECT,
        callback(|_: &Value| tracing::warn!("connection lost")),
        persistent,
    );
    events.add_listener(
        messages::RECONNECT_EXHAUSTED,
        callback(|_: &Value| tracing::error!("giving up on reconnecting; restart to retry")),
        persistent,
    );
}
