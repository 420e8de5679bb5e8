//! Registry entry for one account
//!
//! `RegisteredClient` is the server's view of an identity: credentials,
//! connection status, and the pending-response outbox.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::protocol::Response;
use crate::types::ClientId;

/// Display name given to the provisional identity of a fresh socket.
pub const GUEST_NAME: &str = "Guest";

/// An account as seen by the server
///
/// Created on registration with no socket; bound to a live connection on
/// login. Guests are ordinary entries flagged as such, discarded once
/// their socket logs in or disappears.
#[derive(Debug)]
pub struct RegisteredClient {
    /// Unique identifier, never reused
    pub id: ClientId,
    /// Human-readable name (single token on the wire)
    pub display_name: String,
    /// Shared-secret credential, compared verbatim
    pub login_key: String,
    /// True only between a successful login and logout/disconnect
    pub connected: bool,
    /// Provisional pre-login identity bound to a socket
    pub guest: bool,
    /// Live outbox while a socket is bound to this identity
    sender: Option<mpsc::UnboundedSender<Response>>,
    /// Responses pushed while offline, flushed in order on the next bind
    parked: VecDeque<Response>,
}

impl RegisteredClient {
    /// Create a registered account (offline, no socket).
    pub fn new(id: ClientId, display_name: String, login_key: String) -> Self {
        Self {
            id,
            display_name,
            login_key,
            connected: false,
            guest: false,
            sender: None,
            parked: VecDeque::new(),
        }
    }

    /// Create the provisional identity for a freshly accepted socket.
    pub fn new_guest(id: ClientId, sender: mpsc::UnboundedSender<Response>) -> Self {
        Self {
            id,
            display_name: GUEST_NAME.to_string(),
            login_key: String::new(),
            connected: false,
            guest: true,
            sender: Some(sender),
            parked: VecDeque::new(),
        }
    }

    /// Queue a response for this client.
    ///
    /// While a socket is bound the response goes straight to its write
    /// task; while offline it parks and is flushed on the next bind.
    /// Returns an error only when a bound outbox turns out to be closed.
    pub fn push_response(&mut self, resp: Response) -> Result<(), SendError> {
        match &self.sender {
            Some(tx) => tx.send(resp).map_err(|_| SendError::ChannelClosed),
            None => {
                self.parked.push_back(resp);
                Ok(())
            }
        }
    }

    /// Bind a live outbox to this identity.
    ///
    /// Parked responses stay parked until [`flush_parked`] so the caller
    /// can slot a login reply in front of them.
    ///
    /// [`flush_parked`]: RegisteredClient::flush_parked
    pub fn bind(&mut self, sender: mpsc::UnboundedSender<Response>) {
        self.sender = Some(sender);
    }

    /// Drain responses parked while offline through the bound outbox.
    pub fn flush_parked(&mut self) -> Result<(), SendError> {
        let Some(sender) = &self.sender else {
            return Ok(());
        };
        for resp in self.parked.drain(..) {
            sender.send(resp).map_err(|_| SendError::ChannelClosed)?;
        }
        Ok(())
    }

    /// Drop the outbox; subsequent responses park until the next bind.
    pub fn unbind(&mut self) {
        self.sender = None;
    }

    /// Take the outbox, e.g. to move it to another identity on login.
    pub fn take_sender(&mut self) -> Option<mpsc::UnboundedSender<Response>> {
        self.sender.take()
    }

    pub fn key_matches(&self, key: &str) -> bool {
        self.login_key == key
    }

    #[cfg(test)]
    pub(crate) fn parked_len(&self) -> usize {
        self.parked.len()
    }
}
