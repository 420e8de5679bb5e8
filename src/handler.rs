//! Per-connection handling on the server side
//!
//! Each accepted socket gets a read task and a write task. The read task
//! decodes wire records and enqueues them on the server's command queue;
//! the write task drains the connection's outbox back onto the socket and
//! honors the is-last flag. Neither task ever touches the registry.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::codec::{decode_request, encode_response, split_records};
use crate::error::AppError;
use crate::protocol::Response;
use crate::server::ServerCommand;
use crate::types::ConnId;

/// Drive one accepted socket until it closes, errors, sends a final
/// response, or the server shuts down.
///
/// Registers the socket with the actor (which binds it to a fresh guest
/// identity) and always reports the disconnect afterwards so the registry
/// can release the identity.
pub async fn handle_connection(
    stream: TcpStream,
    conn: ConnId,
    cmd_tx: mpsc::Sender<ServerCommand>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), AppError> {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    debug!(%conn, %peer, "new tcp connection");

    let (read_half, write_half) = stream.into_split();

    // The connection's outbox: the actor holds the sender, the write task
    // drains the receiver.
    let (resp_tx, resp_rx) = mpsc::unbounded_channel();
    if cmd_tx
        .send(ServerCommand::Connect {
            conn,
            sender: resp_tx,
        })
        .await
        .is_err()
    {
        return Err(AppError::ChannelSend);
    }

    let mut read_task = tokio::spawn(read_loop(read_half, conn, cmd_tx.clone(), shutdown.clone()));
    let mut write_task = tokio::spawn(write_loop(write_half, conn, resp_rx, shutdown));

    // Either side ending tears the whole connection down.
    tokio::select! {
        _ = &mut read_task => {
            debug!(%conn, "read task completed");
            write_task.abort();
        }
        _ = &mut write_task => {
            debug!(%conn, "write task completed");
            read_task.abort();
        }
    }

    let _ = cmd_tx.send(ServerCommand::Disconnect { conn }).await;
    info!(%conn, %peer, "connection closed");

    Ok(())
}

/// Socket → command queue.
async fn read_loop(
    read_half: OwnedReadHalf,
    conn: ConnId,
    cmd_tx: mpsc::Sender<ServerCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        tokio::select! {
            read = reader.read_line(&mut line) => {
                match read {
                    Ok(0) => {
                        debug!(%conn, "peer closed the connection");
                        break;
                    }
                    Ok(_) => {
                        // A read may carry two coalesced records.
                        for record in split_records(line.trim_end_matches(['\r', '\n'])) {
                            match decode_request(record) {
                                Ok(request) => {
                                    if cmd_tx
                                        .send(ServerCommand::Request { conn, request })
                                        .await
                                        .is_err()
                                    {
                                        debug!(%conn, "server gone, ending read task");
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!(%conn, error = %e, "dropping undecodable record");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(%conn, error = %e, "read failed");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!(%conn, "shutdown observed by read task");
                break;
            }
        }
    }
}

/// Outbox → socket. A response flagged last stops the connection after
/// it is written.
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    conn: ConnId,
    mut resp_rx: mpsc::UnboundedReceiver<Response>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            resp = resp_rx.recv() => {
                let Some(resp) = resp else {
                    debug!(%conn, "outbox closed, ending write task");
                    break;
                };
                let last = resp.last;
                let mut line = encode_response(&resp);
                line.push('\n');
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    debug!(%conn, error = %e, "write failed, ending write task");
                    break;
                }
                if last {
                    debug!(%conn, "final response delivered");
                    break;
                }
            }
            _ = shutdown.changed() => {
                debug!(%conn, "shutdown observed by write task");
                break;
            }
        }
    }

    let _ = write_half.shutdown().await;
}
