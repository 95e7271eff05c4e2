//! The relay server: accept loop and per-connection frame handling.
//!
//! One task per accepted connection; frames are read with a per-frame
//! deadline and handed synchronously to the node processor. Forwarding
//! applies the processor's advisory jitter before opening the outbound
//! connection. Dropped packets get no response of any kind — silence is
//! the defense.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::net::TcpListener;

use anemochory_onion::exit::ExitHandler;
use anemochory_onion::processor::{Decision, RelayNode};

use crate::framing::read_frame;
use crate::sender::PacketSender;
use crate::{Result, TransportError};

/// Per-frame read deadline.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Server-side counters, shared across connection tasks.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Frames successfully read and handed to the processor.
    pub packets_received: AtomicU64,
    /// Packets forwarded to a next hop.
    pub packets_forwarded: AtomicU64,
    /// Payloads delivered to the exit handler.
    pub packets_exited: AtomicU64,
    /// Framing and forwarding failures.
    pub errors: AtomicU64,
}

impl ServerStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// A relay's network front end.
pub struct NodeServer {
    node: Mutex<RelayNode>,
    exit_handler: Mutex<ExitHandler>,
    sender: PacketSender,
    read_timeout: Duration,
    stats: ServerStats,
}

impl NodeServer {
    /// Wrap a processor in a server with default timeouts.
    pub fn new(node: RelayNode) -> Arc<Self> {
        Self::with_read_timeout(node, DEFAULT_READ_TIMEOUT)
    }

    /// Wrap a processor with an explicit per-frame read deadline.
    pub fn with_read_timeout(node: RelayNode, read_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            node: Mutex::new(node),
            exit_handler: Mutex::new(ExitHandler::new()),
            sender: PacketSender::new(),
            read_timeout,
            stats: ServerStats::default(),
        })
    }

    /// Server counters.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Run a closure against the wrapped processor (key registration).
    pub fn with_node<T>(&self, f: impl FnOnce(&mut RelayNode) -> T) -> T {
        let mut node = self.node.lock().expect("node lock poisoned");
        f(&mut node)
    }

    /// Run a closure against the exit handler (stats inspection).
    pub fn with_exit_handler<T>(&self, f: impl FnOnce(&mut ExitHandler) -> T) -> T {
        let mut handler = self.exit_handler.lock().expect("exit handler lock poisoned");
        f(&mut handler)
    }

    /// Accept connections forever, spawning one task per connection.
    ///
    /// Cancel by dropping the future (see [`NodeServer::serve_with_shutdown`]);
    /// in-flight connection tasks terminate at their next read deadline.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectFailed`] if the accept loop itself
    /// fails fatally.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local = listener
            .local_addr()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        tracing::info!(%local, "relay server listening");

        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
            tracing::debug!(%peer, "connection accepted");

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.handle_connection(stream, &peer.to_string()).await;
            });
        }
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve_with_shutdown(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl std::future::Future<Output = ()>,
    ) {
        tokio::select! {
            result = Arc::clone(&self).serve(listener) => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "accept loop failed");
                }
            }
            () = shutdown => {
                tracing::info!("relay server shutting down");
            }
        }
    }

    /// Read and process frames from one connection until timeout, EOF, or
    /// a framing error.
    pub async fn handle_connection<S>(&self, mut stream: S, peer: &str)
    where
        S: AsyncRead + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(self.read_timeout, read_frame(&mut stream)).await;
            let (session_tag, packet) = match frame {
                Err(_) => {
                    tracing::debug!(peer, "read timeout, closing connection");
                    break;
                }
                Ok(Err(TransportError::ConnectionClosed)) => break,
                Ok(Err(e)) => {
                    ServerStats::bump(&self.stats.errors);
                    tracing::warn!(peer, error = %e, "framing error, closing connection");
                    break;
                }
                Ok(Ok(frame)) => frame,
            };

            ServerStats::bump(&self.stats.packets_received);

            // The lock spans exactly the synchronous processing call, so
            // the replay check-and-mark never straddles an await.
            let decision = {
                let mut node = self.node.lock().expect("node lock poisoned");
                node.process_packet(&packet, &session_tag)
            };

            match decision {
                Decision::Forward {
                    packet_data,
                    next_address,
                    next_port,
                    jitter_ms,
                } => {
                    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                    match self
                        .sender
                        .send_packet(&packet_data, &session_tag, next_address, next_port)
                        .await
                    {
                        Ok(()) => ServerStats::bump(&self.stats.packets_forwarded),
                        Err(e) => {
                            ServerStats::bump(&self.stats.errors);
                            tracing::warn!(peer, error = %e, "forward failed");
                        }
                    }
                }
                Decision::Exit { payload } => {
                    let response = {
                        let mut handler =
                            self.exit_handler.lock().expect("exit handler lock poisoned");
                        handler.handle_payload(&payload)
                    };
                    if response.success {
                        ServerStats::bump(&self.stats.packets_exited);
                    } else {
                        ServerStats::bump(&self.stats.errors);
                    }
                }
                Decision::Drop { reason } => {
                    // Deliberately no response to the peer.
                    tracing::debug!(peer, %reason, "packet dropped");
                }
            }
        }
    }
}
