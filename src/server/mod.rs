//! TCP server: accept loop, per-connection tasks, and command dispatch.
//!
//! Each accepted socket gets its own task running the handshake and then
//! exactly one command. A handler error aborts only that connection.
//! Ordinary transfers run concurrently; sync rounds and removal tracking
//! serialize on the shared node state.

pub mod handlers;

use crate::config::Settings;
use crate::error::Result;
use crate::storage::Storage;
use crate::sync;
use crate::tracker::RemovalTracker;
use crate::wire::{Channel, ServerConnection};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// State shared between the command handlers and the sync engine. The
/// mutex around it serializes sync rounds and tracker mutation; bulk
/// transfers deliberately run outside it.
pub struct NodeState {
    pub storage: Storage,
    pub tracker: RemovalTracker,
}

pub type SharedNode = Arc<Mutex<NodeState>>;

pub struct Server {
    listener: TcpListener,
    storage: Storage,
    node: SharedNode,
    settings: Arc<Settings>,
    shutdown: CancellationToken,
}

impl Server {
    pub async fn bind(
        settings: Arc<Settings>,
        storage: Storage,
        node: SharedNode,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&settings.server.listen).await?;
        info!(addr = %settings.server.listen, "listening");
        Ok(Self {
            listener,
            storage,
            node,
            settings,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until shutdown, then drain in-flight connections. A janitor
    /// tick reaps finished connection tasks so the set stays small.
    pub async fn run(self) -> Result<()> {
        let mut connections: JoinSet<()> = JoinSet::new();
        let mut janitor = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = janitor.tick() => {
                    while let Some(finished) = connections.try_join_next() {
                        if let Err(e) = finished {
                            error!(error = %e, "connection task panicked");
                        }
                    }
                }
                accepted = self.listener.accept() => {
                    // A failed accept (client aborting mid-handshake, fd
                    // exhaustion) costs only that attempt; keep listening.
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    debug!(%addr, "accepted connection");
                    let storage = self.storage.clone();
                    let node = Arc::clone(&self.node);
                    let settings = Arc::clone(&self.settings);
                    connections.spawn(async move {
                        if let Err(e) = serve_connection(stream, storage, node, settings).await {
                            if e.is_fatal() {
                                warn!(%addr, error = %e, "connection torn down");
                            } else {
                                info!(%addr, error = %e, "connection ended with error");
                            }
                        }
                    });
                }
            }
        }

        info!(in_flight = connections.len(), "shutting down, draining connections");
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

/// Handshake, then exactly one command.
async fn serve_connection(
    stream: TcpStream,
    storage: Storage,
    node: SharedNode,
    settings: Arc<Settings>,
) -> Result<()> {
    let mut conn = ServerConnection::new(stream);
    conn.init().await?;

    let command = conn.receive_internal().await?;
    debug!(%command, "dispatching");

    match command.as_str() {
        "command:UPLOAD" => handlers::handle_upload(&mut conn, &storage, &settings).await,
        "command:DOWNLOAD" => handlers::handle_download(&mut conn, &storage).await,
        "command:REMOVE" => handlers::handle_remove(&mut conn, &node, &settings).await,
        "command:LIST" => handlers::handle_list(&mut conn, &storage, &settings).await,
        "command:SYNC" => {
            // Credentials are checked before the node lock so a stranger
            // cannot hold up a real sync round for the read timeout.
            sync::authenticate_slave(&mut conn, &settings.auth).await?;
            let mut node = node.lock().await;
            sync::sync_as_slave(&mut conn, &mut node).await
        }
        other => Err(crate::error::HikupError::Protocol(format!(
            "unknown command: {other}"
        ))),
    }
}
