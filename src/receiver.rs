//! Receiver (server) side: accept producer connections, run one handler task
//! per connection, forward data lines to the sink and react to the in-band
//! control commands.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::protocol::{line_codec, Message, CLOSING_NOTICE, SHUTDOWN_COMMAND};
use crate::registry::{ConnectionId, ConnectionRegistry, PeerCommand};

/// Downstream consumer of accepted data lines (e.g. a broker producer).
///
/// `on_message` is invoked for every accepted non-control line, in the order
/// the lines arrived on their connection. `on_shutdown` is invoked once when
/// a shutdown command is processed.
pub trait MessageSink: Send + Sync + 'static {
    fn on_message(&self, message: &str);
    fn on_shutdown(&self);
}

impl<T: MessageSink + ?Sized> MessageSink for Arc<T> {
    fn on_message(&self, message: &str) {
        (**self).on_message(message);
    }

    fn on_shutdown(&self) {
        (**self).on_shutdown();
    }
}

/// State shared between the accept loop and every connection handler.
struct Shared<S> {
    registry: Arc<ConnectionRegistry>,
    sink: S,
    cancel: CancellationToken,
    sink_notified: AtomicBool,
    host: String,
}

/// The listening side. `bind` claims the port; `run` accepts until a local
/// or command-triggered shutdown closes the listener.
pub struct DataReceiver<S> {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared<S>>,
}

impl<S: MessageSink> DataReceiver<S> {
    /// Bind the listening socket. Port 0 picks a free port, see
    /// [`DataReceiver::local_addr`].
    pub async fn bind(port: u16, sink: S) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        let host = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| local_addr.to_string());
        Ok(Self {
            listener,
            local_addr,
            shared: Arc::new(Shared {
                registry: Arc::new(ConnectionRegistry::new()),
                sink,
                cancel: CancellationToken::new(),
                sink_notified: AtomicBool::new(false),
                host,
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registry of live connections, shared with every handler.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.shared.registry)
    }

    /// Token that stops the accept loop when cancelled. Cancelling an
    /// already-cancelled token is a no-op.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Accept connections until shutdown, spawning one handler task per
    /// accepted socket. Blocks the caller for the listener's whole lifetime;
    /// the listening socket is released on return.
    pub async fn run(self) -> Result<(), TransportError> {
        tracing::info!("Accepting connections at {}", self.local_addr);
        loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => {
                    tracing::info!("Shutdown requested, closing listener");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    tracing::debug!("Accepted connection from {}", peer);
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(shared, stream).await {
                            tracing::warn!("Connection from {} failed: {}", peer, err);
                        }
                    });
                }
            }
        }
        Ok(())
    }
}

/// Handler lifecycle. `Detached` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerState {
    Attached,
    Active,
    Detached,
}

/// Per-connection state machine: current state, the connection id and a
/// reference to the shared registry. The socket itself is owned by the
/// driving task, which is also the only writer on it.
struct ConnectionHandler<S> {
    id: ConnectionId,
    state: HandlerState,
    shared: Arc<Shared<S>>,
}

impl<S: MessageSink> ConnectionHandler<S> {
    /// Register in the registry and produce the greeting line.
    fn attach(shared: Arc<Shared<S>>, mailbox: mpsc::Sender<PeerCommand>) -> Self {
        let id = shared.registry.allocate_id();
        shared.registry.insert(id, mailbox);
        tracing::debug!("Adding connection {}", id);
        Self {
            id,
            state: HandlerState::Attached,
            shared,
        }
    }

    fn greeting(&self) -> String {
        format!("Connected to: {}", self.shared.host)
    }

    fn activate(&mut self) {
        self.state = HandlerState::Active;
    }

    fn on_data(&self, line: &str) {
        self.shared.sink.on_message(line);
    }

    /// Shutdown command: tell every registered connection (the issuer
    /// included) to write a shutdown notice and close, notify the sink once,
    /// then stop the listener. Broadcast is best-effort per peer: a closed
    /// or stalled-full mailbox is logged and skipped, never waited on.
    fn on_shutdown(&self) {
        tracing::info!("Shutting down");
        for (id, peer) in self.shared.registry.peers() {
            let notified = peer
                .try_send(PeerCommand::Line(SHUTDOWN_COMMAND.to_string()))
                .is_ok();
            if !notified || peer.try_send(PeerCommand::Close).is_err() {
                tracing::warn!("Could not deliver shutdown to connection {}", id);
            }
        }
        if !self.shared.sink_notified.swap(true, Ordering::SeqCst) {
            self.shared.sink.on_shutdown();
        }
        self.shared.cancel.cancel();
    }

    /// Deregister. Safe to call on any path out of the drive loop; the
    /// registry removal is idempotent.
    fn detach(&mut self) {
        if self.state != HandlerState::Detached {
            self.state = HandlerState::Detached;
            self.shared.registry.remove(self.id);
            tracing::debug!("Removing connection {}", self.id);
        }
    }
}

async fn handle_connection<S: MessageSink>(
    shared: Arc<Shared<S>>,
    stream: TcpStream,
) -> Result<(), TransportError> {
    let mut framed = Framed::new(stream, line_codec());
    let (mailbox_tx, mut mailbox) = mpsc::channel(16);

    let mut handler = ConnectionHandler::attach(shared, mailbox_tx);
    let result = match framed.send(handler.greeting()).await {
        Ok(()) => {
            handler.activate();
            drive(&mut handler, &mut framed, &mut mailbox).await
        }
        Err(err) => Err(err.into()),
    };
    handler.detach();
    result
}

/// Handle events on one connection until it closes: inbound frames from the
/// peer, and commands other handlers dropped into the mailbox.
async fn drive<S: MessageSink>(
    handler: &mut ConnectionHandler<S>,
    framed: &mut Framed<TcpStream, LinesCodec>,
    mailbox: &mut mpsc::Receiver<PeerCommand>,
) -> Result<(), TransportError> {
    loop {
        tokio::select! {
            command = mailbox.recv() => match command {
                Some(PeerCommand::Line(line)) => framed.send(line).await?,
                Some(PeerCommand::Close) | None => return Ok(()),
            },
            inbound = framed.next() => match inbound {
                Some(Ok(line)) => match Message::classify(line) {
                    Message::Data(line) => handler.on_data(&line),
                    Message::Disconnect => {
                        tracing::info!("Closing connection {}", handler.id);
                        // Best effort; the connection is going away anyway.
                        let _ = framed.send(CLOSING_NOTICE.to_string()).await;
                        return Ok(());
                    }
                    Message::Shutdown => handler.on_shutdown(),
                },
                Some(Err(err)) => return Err(err.into()),
                None => return Ok(()),
            },
        }
    }
}
