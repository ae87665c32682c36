use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal;

use sandcell_common::ShareWriter;
use sandcell_common::protocol::error::Result;

use crate::config::ServerConfig;
use crate::runtime::CapabilityRegistry;
use crate::state::ServerState;
use crate::worker::SessionWorker;

/// Printed on stdout every time the socket is bound, so a supervising
/// process can tell when the server accepts connections.
pub const READY_LINE: &str = "server started";

/// sandcell server - accepts connections on a Unix socket and runs their
/// scripts in per-connection sandboxes.
///
/// The record store is created when the server is constructed, before the
/// socket is bound. If binding or accepting fails, the listener is dropped
/// and bound again after the configured delay, forever.
pub struct SandboxServer {
    state: Arc<ServerState>,
    next_connection: AtomicU64,
}

impl SandboxServer {
    /// Creates the server and its record store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store cannot
    /// be created, including when another process already owns it.
    pub fn new(config: ServerConfig, capabilities: CapabilityRegistry) -> Result<Self> {
        let state = ServerState::open(config, capabilities)?;
        Ok(Self {
            state: Arc::new(state),
            next_connection: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn config(&self) -> &ServerConfig {
        self.state.config()
    }

    /// Runs the server until SIGINT or SIGTERM.
    ///
    /// On either signal the store files and the socket file are removed and
    /// the process exits.
    pub async fn run(self) -> Result<()> {
        spawn_signal_handlers(self.config().clone());
        self.serve().await
    }

    /// Runs the accept loop without installing signal handlers.
    pub async fn serve(self) -> Result<()> {
        let config = self.config().clone();
        loop {
            match bind(&config.socket_path) {
                Ok(listener) => {
                    tracing::info!("sandcell server listening on {}", config.socket_path.display());
                    println!("{READY_LINE}");
                    if let Err(e) = self.accept_loop(&listener).await {
                        tracing::error!("accept failed: {}", e);
                    }
                }
                Err(e) => {
                    tracing::error!("failed to bind {}: {}", config.socket_path.display(), e);
                }
            }
            tracing::info!("restarting listener in {:?}", config.restart_delay);
            tokio::time::sleep(config.restart_delay).await;
        }
    }

    async fn accept_loop(&self, listener: &UnixListener) -> io::Result<()> {
        loop {
            let (stream, _) = listener.accept().await?;
            let connection_id = self.next_connection.fetch_add(1, Ordering::Relaxed);
            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                tracing::debug!(connection_id, "connection accepted");
                if let Err(e) = handle_connection(stream, state, connection_id).await {
                    tracing::warn!(connection_id, "connection error: {}", e);
                }
                tracing::debug!(connection_id, "connection closed");
            });
        }
    }
}

/// Reads message lines until the peer hangs up, replying with one
/// identifier per line for every record the message produced.
async fn handle_connection(
    stream: UnixStream,
    state: Arc<ServerState>,
    connection_id: u64,
) -> Result<()> {
    let worker = SessionWorker::spawn(state, connection_id)?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        // Non-UTF-8 bytes survive as replacement characters and are then
        // rejected by the parser as non-ASCII.
        let line = String::from_utf8_lossy(&buf).into_owned();

        let replies = worker.submit(line).await?;
        for id in replies {
            write_half.write_all(format!("{id}\n").as_bytes()).await?;
        }
        write_half.flush().await?;
    }

    let _ = write_half.shutdown().await;
    Ok(())
}

/// Binds the socket, removing a leftover socket file nobody listens on.
fn bind(path: &Path) -> io::Result<UnixListener> {
    match UnixListener::bind(path) {
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                return Err(e);
            }
            tracing::warn!("removing stale socket file {}", path.display());
            std::fs::remove_file(path)?;
            UnixListener::bind(path)
        }
        other => other,
    }
}

fn spawn_signal_handlers(config: ServerConfig) {
    let on_interrupt = config.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("received SIGINT, shutting down");
            shutdown(&on_interrupt);
        }
    });

    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("failed to install SIGTERM handler: {}", e);
            return;
        }
    };
    tokio::spawn(async move {
        if sigterm.recv().await.is_some() {
            tracing::info!("received SIGTERM, shutting down");
            shutdown(&config);
        }
    });
}

fn shutdown(config: &ServerConfig) -> ! {
    ShareWriter::remove_files(&config.mmap_path);
    remove_socket(&config.socket_path);
    std::process::exit(0);
}

fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("removed socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("failed to remove socket {}: {}", path.display(), e),
    }
}
