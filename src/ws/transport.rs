//! Socket transport abstraction and its `tokio-tungstenite` implementation.
//!
//! A [`Transport`] opens sockets; each open socket reports its lifecycle
//! through [`TransportEvents`] and is driven through a [`SocketHandle`].
//! The connection manager only ever talks to these traits, which lets
//! tests replace the network with an in-memory double.

use std::fmt;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::ClientError;

/// Lifecycle notification of one socket.
///
/// A socket reports at most one `Open`, any number of `Frame` / `Error`,
/// and exactly one final `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket is open and can carry frames.
    Open,
    /// A text frame arrived.
    Frame(String),
    /// A transport-level error; the socket is not closed by it.
    Error(String),
    /// The socket is gone, cleanly or not.
    Closed,
}

/// Everything the connection pump reacts to.
#[derive(Debug)]
pub(crate) enum Signal {
    Transport { socket_id: u64, event: TransportEvent },
    ReconnectDue { timer_id: u64 },
}

/// Event sink handed to a socket when it is opened.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    socket_id: u64,
    tx: mpsc::UnboundedSender<Signal>,
}

impl TransportEvents {
    pub(crate) fn new(socket_id: u64, tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { socket_id, tx }
    }

    /// Reports an event. Returns `false` if the manager is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Signal::Transport {
                socket_id: self.socket_id,
                event,
            })
            .is_ok()
    }

    /// Generation number of the socket these events belong to.
    #[must_use]
    pub fn socket_id(&self) -> u64 {
        self.socket_id
    }
}

/// Control handle for one open (or opening) socket.
pub trait SocketHandle: Send + fmt::Debug {
    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the socket can no longer send.
    fn send(&self, text: String) -> Result<(), ClientError>;

    /// Starts closing the socket. Idempotent.
    fn close(&self);
}

/// Opens sockets.
///
/// `open` must not block and must not call back into the connection
/// manager; all outcomes, including failure to connect, are reported
/// through `events`.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Opens a socket to `url`.
    fn open(&self, url: &str, events: TransportEvents) -> Box<dyn SocketHandle>;
}

/// Outgoing command from a [`WsSocket`] handle to its socket task.
#[derive(Debug)]
enum WsOutgoing {
    Text(String),
    Close,
}

/// WebSocket transport backed by `tokio-tungstenite`.
///
/// Each socket runs on its own task on the current tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Creates the transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str, events: TransportEvents) -> Box<dyn SocketHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(run_socket(url.to_string(), rx, events));
            }
            Err(e) => {
                events.emit(TransportEvent::Error(e.to_string()));
                events.emit(TransportEvent::Closed);
            }
        }
        Box::new(WsSocket { tx })
    }
}

/// Handle to a socket task spawned by [`WsTransport`].
#[derive(Debug)]
struct WsSocket {
    tx: mpsc::UnboundedSender<WsOutgoing>,
}

impl SocketHandle for WsSocket {
    fn send(&self, text: String) -> Result<(), ClientError> {
        self.tx
            .send(WsOutgoing::Text(text))
            .map_err(|_| ClientError::Transport("socket closed".to_string()))
    }

    fn close(&self) {
        let _ = self.tx.send(WsOutgoing::Close);
    }
}

/// Connects, then pumps frames both ways until either side closes.
async fn run_socket(url: String, mut outgoing: mpsc::UnboundedReceiver<WsOutgoing>, events: TransportEvents) {
    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::debug!(%url, error = %e, "socket connect failed");
            events.emit(TransportEvent::Error(e.to_string()));
            events.emit(TransportEvent::Closed);
            return;
        }
    };
    events.emit(TransportEvent::Open);

    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        events.emit(TransportEvent::Frame(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(data))) => match binary_frame_text(&data) {
                        Some(text) => {
                            events.emit(TransportEvent::Frame(text));
                        }
                        None => tracing::debug!(len = data.len(), "dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    // Pings are answered by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        events.emit(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            command = outgoing.recv() => {
                match command {
                    Some(WsOutgoing::Text(text)) => {
                        if let Err(e) = sink.send(Message::text(text)).await {
                            events.emit(TransportEvent::Error(e.to_string()));
                            break;
                        }
                    }
                    Some(WsOutgoing::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    events.emit(TransportEvent::Closed);
}

/// Text of a binary frame, or `None` unless it is valid UTF-8.
fn binary_frame_text(data: &[u8]) -> Option<String> {
    std::str::from_utf8(data).ok().map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_binary_frame_becomes_text() {
        assert_eq!(
            binary_frame_text(br#"{"type":"new_email"}"#).as_deref(),
            Some(r#"{"type":"new_email"}"#)
        );
    }

    #[test]
    fn invalid_utf8_binary_frame_is_dropped() {
        assert_eq!(binary_frame_text(&[b'{', 0xff, 0xfe, b'}']), None);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport double.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    use tokio::time::Instant;

    use super::{SocketHandle, Transport, TransportEvent, TransportEvents};
    use crate::error::ClientError;

    /// Records every open, frame and close; never touches the network.
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        refuse: bool,
        opened: Mutex<Vec<(TransportEvents, Instant)>>,
        sent: Arc<Mutex<Vec<String>>>,
        closes: Arc<AtomicUsize>,
    }

    impl MockTransport {
        /// A transport whose sockets fail right away, like an unreachable host.
        pub(crate) fn refusing() -> Self {
            Self {
                refuse: true,
                ..Self::default()
            }
        }

        pub(crate) fn open_count(&self) -> usize {
            self.opened.lock().unwrap_or_else(PoisonError::into_inner).len()
        }

        pub(crate) fn open_times(&self) -> Vec<Instant> {
            let opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
            opened.iter().map(|(_, at)| *at).collect()
        }

        /// Emits `event` on the most recently opened socket.
        pub(crate) fn emit(&self, event: TransportEvent) {
            let opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((events, _)) = opened.last() {
                events.emit(event);
            }
        }

        /// Emits `event` on the socket opened `index`-th (0-based).
        pub(crate) fn emit_on(&self, index: usize, event: TransportEvent) {
            let opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((events, _)) = opened.get(index) {
                events.emit(event);
            }
        }

        pub(crate) fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        pub(crate) fn close_count(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    impl Transport for MockTransport {
        fn open(&self, _url: &str, events: TransportEvents) -> Box<dyn SocketHandle> {
            if self.refuse {
                events.emit(TransportEvent::Error("connection refused".to_string()));
                events.emit(TransportEvent::Closed);
            }
            self.opened
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((events, Instant::now()));
            Box::new(MockSocket {
                sent: Arc::clone(&self.sent),
                closes: Arc::clone(&self.closes),
            })
        }
    }

    #[derive(Debug)]
    struct MockSocket {
        sent: Arc<Mutex<Vec<String>>>,
        closes: Arc<AtomicUsize>,
    }

    impl SocketHandle for MockSocket {
        fn send(&self, text: String) -> Result<(), ClientError> {
            self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(text);
            Ok(())
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Lets spawned tasks (the connection pump) drain their queues without
    /// advancing a paused clock.
    pub(crate) async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }
}
