//! TCP Server
//!
//! Binds the listener, runs the accept loop in its own task, and hands
//! every accepted socket to an independent connection task sharing the
//! single cache. Also owns the background GC sweeper.
//!
//! `stop()` signals the accept loop - which drops the listener, so
//! pending accepts fail cleanly - and stops the GC timer. Connections
//! already in flight keep running until their peer disconnects.

use crate::commands::Dispatcher;
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::{Cache, GcConfig, GcHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// A running cinderkv server.
#[derive(Debug)]
pub struct Server {
    local_addr: SocketAddr,
    cache: Arc<Cache>,
    stats: Arc<ConnectionStats>,
    shutdown_tx: watch::Sender<bool>,
    gc: GcHandle,
}

impl Server {
    /// Binds `0.0.0.0:<port>` and starts serving.
    ///
    /// `size_limit` is the cache byte budget; `0` disables eviction.
    /// Port `0` binds an ephemeral port, see [`Server::local_addr`].
    pub async fn start(port: u16, size_limit: usize) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;

        let cache = Arc::new(Cache::new(size_limit));
        let stats = Arc::new(ConnectionStats::new());
        let gc = GcHandle::start(Arc::clone(&cache), GcConfig::default());

        let dispatcher = Dispatcher::new(Arc::clone(&cache), Arc::clone(&stats), local_addr.port());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(accept_loop(
            listener,
            dispatcher,
            Arc::clone(&stats),
            shutdown_rx,
        ));

        info!(addr = %local_addr, size_limit, "listening");
        Ok(Self {
            local_addr,
            cache,
            stats,
            shutdown_tx,
            gc,
        })
    }

    /// The bound address (useful when started on port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// The shared connection counters.
    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Closes the listener and stops the GC timer.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.gc.stop();
        info!("server stopped");
    }
}

/// Accepts connections until told to shut down.
async fn accept_loop(
    listener: TcpListener,
    dispatcher: Dispatcher,
    stats: Arc<ConnectionStats>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    tokio::spawn(handle_connection(
                        stream,
                        addr,
                        dispatcher.clone(),
                        Arc::clone(&stats),
                    ));
                }
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                }
            },
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("accept loop stopped");
                    return;
                }
            }
        }
    }
}
