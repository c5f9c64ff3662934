//! End-to-end tests of the tokio-tungstenite transport against an
//! in-process WebSocket server.

#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use ephimail_client::config::ClientConfig;
use ephimail_client::crypto::{encrypt_for, generate_key_pair, import_private_key};
use ephimail_client::ws::event_bus::callback;
use ephimail_client::ws::messages;
use ephimail_client::ws::{
    ConnectionManager, ListenerOptions, ReconnectPolicy, SubscriptionManager, WsTransport,
};

const WAIT: Duration = Duration::from_secs(10);

async fn bind() -> (TcpListener, SocketAddr) {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind failed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("no local addr");
    };
    (listener, addr)
}

fn config_for(addr: SocketAddr) -> ClientConfig {
    let page = format!("http://{addr}/#/a@b.com");
    let Ok(config) = ClientConfig::from_lookup(|key| (key == "PAGE_URL").then(|| page.clone())) else {
        panic!("config should parse");
    };
    config
}

fn forward(connection: &ConnectionManager, event: &str) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    connection.events().add_listener(
        event,
        callback(move |payload: &Value| {
            let _ = tx.send(payload.clone());
        }),
        ListenerOptions::default(),
    );
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    match timeout(WAIT, rx.recv()).await {
        Ok(Some(value)) => value,
        _ => panic!("event did not arrive in time"),
    }
}

#[tokio::test]
async fn subscribe_then_receive_decrypted_mail() {
    let Ok(pair) = generate_key_pair() else {
        panic!("key generation failed");
    };
    let Ok(ciphertext) = encrypt_for(&pair.public_key, "your code is 424242") else {
        panic!("encryption failed");
    };
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.ok()?;
        let mut ws = tokio_tungstenite::accept_async(stream).await.ok()?;
        let first = loop {
            match ws.next().await? {
                Ok(Message::Text(text)) => break text.as_str().to_owned(),
                Ok(_) => {}
                Err(_) => return None,
            }
        };
        let notice = serde_json::json!({
            "type": "new_email",
            "payload": { "email": "a@b.com", "body": ciphertext },
        });
        ws.send(Message::text(notice.to_string())).await.ok()?;
        // Hold the socket open until the client hangs up.
        while let Some(Ok(_)) = ws.next().await {}
        Some(first)
    });

    let config = config_for(addr);
    let connection = ConnectionManager::from_config(&config, Arc::new(WsTransport::new()));
    assert_eq!(connection.endpoint(), format!("ws://{addr}/ws"));
    let Ok(key) = import_private_key(&pair.private_key) else {
        panic!("import failed");
    };
    connection.set_decryption_key(Some(key));
    let mut mail = forward(&connection, messages::NEW_EMAIL);

    let subscriptions = SubscriptionManager::new(connection.clone());
    assert_eq!(subscriptions.subscribe("a@b.com"), Ok(()));

    let payload = next(&mut mail).await;
    assert_eq!(payload["body"], "your code is 424242");
    assert_eq!(payload["decrypted"], true);

    connection.disconnect();
    match timeout(WAIT, server).await {
        Ok(Ok(Some(first))) => {
            assert_eq!(first, r#"{"type":"subscribe","payload":{"email":"a@b.com"}}"#);
        }
        _ => panic!("server did not see a subscribe frame"),
    }
}

#[tokio::test]
async fn reconnects_after_server_drop() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let (stream, _) = listener.accept().await.ok()?;
            let ws = tokio_tungstenite::accept_async(stream).await.ok()?;
            drop(ws);
        }
        Some(())
    });

    let connection = ConnectionManager::new(
        format!("ws://{addr}/ws"),
        Arc::new(WsTransport::new()),
        ReconnectPolicy::new(5, Duration::from_secs(1)),
    );
    let mut connects = forward(&connection, messages::CONNECT);
    let mut disconnects = forward(&connection, messages::DISCONNECT);

    connection.connect();
    next(&mut connects).await;
    next(&mut disconnects).await;
    next(&mut connects).await;

    connection.disconnect();
    assert!(matches!(timeout(WAIT, server).await, Ok(Ok(Some(())))));
}

#[tokio::test]
async fn refused_connection_reports_error_then_disconnect() {
    let (listener, addr) = bind().await;
    drop(listener);

    let connection = ConnectionManager::new(
        format!("ws://{addr}/ws"),
        Arc::new(WsTransport::new()),
        ReconnectPolicy::new(0, Duration::from_secs(1)),
    );
    let mut errors = forward(&connection, messages::ERROR);
    let mut disconnects = forward(&connection, messages::DISCONNECT);
    let mut exhausted = forward(&connection, messages::RECONNECT_EXHAUSTED);

    connection.connect();
    assert!(next(&mut errors).await.is_string());
    next(&mut disconnects).await;
    next(&mut exhausted).await;
    assert!(connection.reconnect_exhausted());
    assert!(!connection.has_socket());
}
