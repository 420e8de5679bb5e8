//! Server front door
//!
//! Binds the listening socket, spawns the registry actor, and accepts
//! connections until asked to shut down. Bind failures surface here and
//! abort startup; accept failures are logged and survived.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::error::AppError;
use crate::handler::handle_connection;
use crate::server::ChatServer;
use crate::types::ConnId;

/// Channel buffer size for server commands
const CHANNEL_BUFFER_SIZE: usize = 256;

/// A bound, not-yet-running chat server.
pub struct Server {
    listener: TcpListener,
    name: String,
}

impl Server {
    /// Bind the listening socket. Failing to bind is fatal for startup.
    pub async fn bind(addr: &str, name: impl Into<String>) -> Result<Self, AppError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            name: name.into(),
        })
    }

    /// The bound address, useful when binding to port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Every per-connection task observes the stop signal through a watch
    /// channel; the call returns once the registry actor has drained the
    /// command queue.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, name } = self;

        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let actor = tokio::spawn(ChatServer::new(name, cmd_rx).run());
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut next_conn: u64 = 1;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let conn = ConnId(next_conn);
                            next_conn += 1;
                            info!(%conn, %addr, "connection accepted");
                            let cmd_tx = cmd_tx.clone();
                            let stop_rx = stop_rx.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, conn, cmd_tx, stop_rx).await
                                {
                                    warn!(%conn, error = %e, "connection handler error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }

        // Wake every connection task, then wait for the actor to finish
        // draining; it ends once the last command sender is dropped.
        let _ = stop_tx.send(true);
        drop(cmd_tx);
        let _ = actor.await;

        Ok(())
    }

    /// Run until ctrl-c.
    pub async fn run_until_ctrl_c(self) -> Result<(), AppError> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// Convenience used by tests and embedders: run the server on a
/// background task and return its address plus a stop handle.
pub fn spawn(server: Server) -> Result<(SocketAddr, ServerGuard), AppError> {
    let addr = server.listener.local_addr()?;
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
    let task = tokio::spawn(async move {
        if let Err(e) = server
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await
        {
            warn!(error = %e, "server ended with error");
        }
    });
    Ok((
        addr,
        ServerGuard {
            stop: Some(stop_tx),
            task,
        },
    ))
}

/// Stops the spawned server when asked or when dropped.
pub struct ServerGuard {
    stop: Option<tokio::sync::oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl ServerGuard {
    /// Signal shutdown and wait for the server to drain.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
