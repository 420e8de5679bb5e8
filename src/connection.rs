//! Client connection manager
//!
//! Owns one socket to the server and two background loops:
//!
//! - the **receiver loop** reads and decodes records, routing chat
//!   messages to the message queue and everything else to the response
//!   queue;
//! - the **delivery loop** drains both queues: it applies cache updates,
//!   fulfils the pending synchronous call, and forwards chat messages to
//!   the caller's feed while the session is authenticated.
//!
//! `request` supports exactly one outstanding call at a time; the gate is
//! held across send and receive, so two calls can never race for each
//! other's reply.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, warn};

use crate::codec::{decode_response, encode_request, split_records, RECORD_SEPARATOR};
use crate::error::AppError;
use crate::protocol::{Request, Response, ResponseBody};
use crate::session::{Account, RoomMessage, SessionState};
use crate::types::{ClientId, RoomId};

/// Slot for the reply channel of the one outstanding request.
type PendingSlot = Arc<Mutex<Option<oneshot::Sender<Response>>>>;

/// A client's connection to the chat server.
pub struct ServerConnection {
    writer: Mutex<OwnedWriteHalf>,
    /// Held across one full send+receive round trip.
    request_gate: Mutex<()>,
    pending: PendingSlot,
    state: Arc<SessionState>,
    /// Set once the delivery loop exits; requests fail fast afterwards.
    closed: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl ServerConnection {
    /// Connect to a server and start the receiver and delivery loops.
    ///
    /// Returns the manager plus the asynchronous message feed carrying
    /// chat messages that arrive outside any request.
    pub async fn connect(
        addr: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RoomMessage>), AppError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        let state = Arc::new(SessionState::new());
        let pending: PendingSlot = Arc::new(Mutex::new(None));
        let closed = Arc::new(AtomicBool::new(false));
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(receiver_loop(
            read_half,
            resp_tx,
            msg_tx,
            shutdown_rx.clone(),
        ));
        tokio::spawn(delivery_loop(
            resp_rx,
            msg_rx,
            event_tx,
            Arc::clone(&pending),
            Arc::clone(&state),
            Arc::clone(&closed),
            shutdown_rx,
        ));

        Ok((
            Self {
                writer: Mutex::new(write_half),
                request_gate: Mutex::new(()),
                pending,
                state,
                closed,
                shutdown: shutdown_tx,
            },
            event_rx,
        ))
    }

    /// The session cache: account, known rooms, received messages.
    pub fn session(&self) -> &SessionState {
        &self.state
    }

    /// Synchronous round trip: send one request, wait for its reply.
    pub async fn request(&self, request: Request) -> Result<Response, AppError> {
        let _gate = self.request_gate.lock().await;

        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        *self.pending.lock().await = Some(tx);

        let mut line = encode_request(&request);
        line.push('\n');
        if let Err(e) = self.writer.lock().await.write_all(line.as_bytes()).await {
            // Nothing is coming back for this call.
            self.pending.lock().await.take();
            return Err(AppError::Io(e));
        }

        // The delivery loop flags `closed` before its final drain of the
        // pending slot; re-checking here means a call registered after
        // that drain cannot wait forever.
        if self.closed.load(Ordering::Acquire) {
            self.pending.lock().await.take();
            return Err(AppError::ConnectionClosed);
        }

        rx.await.map_err(|_| AppError::ConnectionClosed)
    }

    /// Create an account. Returns the id the server assigned.
    pub async fn register(&self, key: &str, display_name: &str) -> Result<ClientId, AppError> {
        validate_token(display_name, "display name")?;
        validate_token(key, "key")?;

        let resp = self
            .request(Request::Register {
                display_name: display_name.to_string(),
                key: key.to_string(),
            })
            .await?;
        match resp.body {
            ResponseBody::Registered { id } => Ok(id),
            ResponseBody::Failure { reason } => Err(AppError::Rejected(reason)),
            other => Err(AppError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Log in as an existing account and mark the session authenticated.
    pub async fn login(&self, id: ClientId, key: &str) -> Result<(), AppError> {
        validate_token(key, "key")?;

        let resp = self
            .request(Request::Login {
                id,
                key: key.to_string(),
            })
            .await?;
        match resp.body {
            ResponseBody::Success { detail } => {
                debug!(%id, %detail, "logged in");
                self.state.set_account(Account {
                    id,
                    key: key.to_string(),
                });
                self.state.set_logged_in(true);
                Ok(())
            }
            ResponseBody::Failure { reason } => Err(AppError::Rejected(reason)),
            other => Err(AppError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Optionally register, then log in: the one-call session setup.
    pub async fn authenticate(
        &self,
        registering: bool,
        id: Option<ClientId>,
        key: &str,
        display_name: &str,
    ) -> Result<ClientId, AppError> {
        let id = if registering {
            self.register(key, display_name).await?
        } else {
            id.ok_or_else(|| {
                AppError::InvalidInput("an account id is required to log in".to_string())
            })?
        };
        self.login(id, key).await?;
        Ok(id)
    }

    /// Create a chatroom; the caller becomes admin and sole member.
    pub async fn create_room(&self, name: &str) -> Result<RoomId, AppError> {
        validate_token(name, "room name")?;
        let account = self.account()?;

        let resp = self
            .request(Request::CreateRoom {
                id: account.id,
                key: account.key,
                name: name.to_string(),
            })
            .await?;
        match resp.body {
            ResponseBody::Joined { room, .. } => Ok(room),
            ResponseBody::Failure { reason } => Err(AppError::Rejected(reason)),
            other => Err(AppError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Remove a chatroom (admin only).
    pub async fn remove_room(&self, room: RoomId) -> Result<(), AppError> {
        let account = self.account()?;

        let resp = self
            .request(Request::RemoveRoom {
                id: account.id,
                key: account.key,
                room,
            })
            .await?;
        match resp.body {
            ResponseBody::Left { .. } => Ok(()),
            ResponseBody::Failure { reason } => Err(AppError::Rejected(reason)),
            other => Err(AppError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Add a registered client to a chatroom (admin only).
    pub async fn add_member(&self, room: RoomId, member: ClientId) -> Result<(), AppError> {
        let account = self.account()?;

        let resp = self
            .request(Request::AddMember {
                id: account.id,
                key: account.key,
                room,
                member,
            })
            .await?;
        match resp.body {
            ResponseBody::Success { .. } => Ok(()),
            ResponseBody::Failure { reason } => Err(AppError::Rejected(reason)),
            other => Err(AppError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Remove a member: the admin removing someone, or removing yourself.
    pub async fn remove_member(&self, room: RoomId, member: ClientId) -> Result<(), AppError> {
        let account = self.account()?;

        let resp = self
            .request(Request::RemoveMember {
                id: account.id,
                key: account.key,
                room,
                member,
            })
            .await?;
        match resp.body {
            // Self-removal answers with the Left notification itself.
            ResponseBody::Success { .. } | ResponseBody::Left { .. } => Ok(()),
            ResponseBody::Failure { reason } => Err(AppError::Rejected(reason)),
            other => Err(AppError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Send a chat message to a room this client is a member of.
    pub async fn send_message(&self, room: RoomId, text: &str) -> Result<(), AppError> {
        validate_text(text)?;
        let account = self.account()?;

        let resp = self
            .request(Request::SendMessage {
                id: account.id,
                key: account.key,
                room,
                text: text.to_string(),
            })
            .await?;
        match resp.body {
            ResponseBody::Success { .. } => Ok(()),
            ResponseBody::Failure { reason } => Err(AppError::Rejected(reason)),
            other => Err(AppError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Log out; the server closes the connection after the reply.
    pub async fn logout(&self) -> Result<(), AppError> {
        let account = self.account()?;

        let resp = self
            .request(Request::Logout {
                id: account.id,
                key: account.key,
            })
            .await?;
        match resp.body {
            ResponseBody::Success { .. } => {
                self.state.set_logged_in(false);
                Ok(())
            }
            ResponseBody::Failure { reason } => Err(AppError::Rejected(reason)),
            other => Err(AppError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Stop both loops and release the socket.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    fn account(&self) -> Result<Account, AppError> {
        self.state
            .account()
            .ok_or_else(|| AppError::InvalidInput("not logged in".to_string()))
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Socket → queues. Chat messages and responses part ways here.
async fn receiver_loop(
    read_half: OwnedReadHalf,
    resp_tx: mpsc::UnboundedSender<Response>,
    msg_tx: mpsc::UnboundedSender<RoomMessage>,
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
                        debug!("server closed the connection");
                        break;
                    }
                    Ok(_) => {
                        for record in split_records(line.trim_end_matches(['\r', '\n'])) {
                            match decode_response(record) {
                                Ok(resp) => {
                                    if !route_response(resp, &resp_tx, &msg_tx) {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "dropping undecodable record");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "read failed");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!("receiver loop stopping");
                break;
            }
        }
    }
}

/// Returns false when a queue is gone and the loop should end.
fn route_response(
    resp: Response,
    resp_tx: &mpsc::UnboundedSender<Response>,
    msg_tx: &mpsc::UnboundedSender<RoomMessage>,
) -> bool {
    match resp.body {
        ResponseBody::Message { room, sender, text } => msg_tx
            .send(RoomMessage { room, sender, text })
            .is_ok(),
        _ => resp_tx.send(resp).is_ok(),
    }
}

/// Queues → caller. Applies cache updates, answers the pending call, and
/// feeds chat messages to the presentation layer.
///
/// Chat messages are held in their queue while the session is not
/// authenticated and drained once it is; the login watch wakes the loop
/// when the flag flips.
async fn delivery_loop(
    mut resp_rx: mpsc::UnboundedReceiver<Response>,
    mut msg_rx: mpsc::UnboundedReceiver<RoomMessage>,
    event_tx: mpsc::UnboundedSender<RoomMessage>,
    pending: PendingSlot,
    state: Arc<SessionState>,
    closed: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut auth = state.watch_login();

    loop {
        let authenticated = *auth.borrow_and_update();
        tokio::select! {
            resp = resp_rx.recv() => {
                let Some(resp) = resp else { break };
                handle_response(resp, &pending, &state).await;
            }
            msg = msg_rx.recv(), if authenticated => {
                let Some(msg) = msg else { break };
                state.push_message(msg.clone());
                let _ = event_tx.send(msg);
            }
            _ = auth.changed() => {}
            _ = shutdown.changed() => break,
        }
    }

    // Unblock callers: flag the link dead, then drain the pending slot
    // so a waiting `request` observes the closed channel.
    closed.store(true, Ordering::Release);
    pending.lock().await.take();
}

async fn handle_response(resp: Response, pending: &PendingSlot, state: &SessionState) {
    // Cache updates apply whether or not anyone asked.
    match &resp.body {
        ResponseBody::Joined { room, name } => {
            state.remember_room(name.clone(), *room);
        }
        ResponseBody::Left { room, .. } => {
            state.forget_room(*room);
        }
        _ => {}
    }
    if resp.last {
        state.set_logged_in(false);
    }

    match pending.lock().await.take() {
        Some(reply) => {
            let _ = reply.send(resp);
        }
        None => {
            debug!(kind = resp.body.action_type(), "unsolicited response");
        }
    }
}

fn validate_token(value: &str, what: &str) -> Result<(), AppError> {
    if value.is_empty()
        || value.contains(char::is_whitespace)
        || value.contains(RECORD_SEPARATOR)
    {
        return Err(AppError::InvalidInput(format!(
            "{what} must be a single token without '{RECORD_SEPARATOR}'"
        )));
    }
    Ok(())
}

fn validate_text(text: &str) -> Result<(), AppError> {
    if text.contains(RECORD_SEPARATOR) || text.contains('\n') {
        return Err(AppError::InvalidInput(format!(
            "message text may not contain '{RECORD_SEPARATOR}' or newlines"
        )));
    }
    Ok(())
}
