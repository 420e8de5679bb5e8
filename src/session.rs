//! Client-side session cache
//!
//! The client owns only this local cache: the account it logged in as,
//! the room names it knows, and the messages it received. Registry state
//! belongs exclusively to the server.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::watch;

use crate::types::{ClientId, RoomId};

/// Credentials for the account this session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: ClientId,
    pub key: String,
}

/// One chat message as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMessage {
    pub room: RoomId,
    pub sender: ClientId,
    pub text: String,
}

/// Shared state of one client session, updated by the delivery loop and
/// read by the caller.
#[derive(Debug)]
pub struct SessionState {
    account: RwLock<Option<Account>>,
    /// Known room name → id map, fed by joined/left notifications
    rooms: RwLock<HashMap<String, RoomId>>,
    /// Received-message log, in delivery order
    log: RwLock<Vec<RoomMessage>>,
    /// Authenticated flag; a watch channel so the delivery loop can wake
    /// when the session state flips
    logged_in: watch::Sender<bool>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (logged_in, _) = watch::channel(false);
        Self {
            account: RwLock::new(None),
            rooms: RwLock::new(HashMap::new()),
            log: RwLock::new(Vec::new()),
            logged_in,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        *self.logged_in.borrow()
    }

    pub(crate) fn set_logged_in(&self, value: bool) {
        self.logged_in.send_replace(value);
    }

    /// Watch the authenticated flag; used by the delivery loop to hold
    /// back the message feed until login.
    pub(crate) fn watch_login(&self) -> watch::Receiver<bool> {
        self.logged_in.subscribe()
    }

    pub fn account(&self) -> Option<Account> {
        self.account.read().ok()?.clone()
    }

    pub(crate) fn set_account(&self, account: Account) {
        if let Ok(mut slot) = self.account.write() {
            *slot = Some(account);
        }
    }

    /// Look up a room id by the name the server announced it under.
    pub fn room_id(&self, name: &str) -> Option<RoomId> {
        self.rooms.read().ok()?.get(name).copied()
    }

    /// Known rooms as (name, id) pairs.
    pub fn rooms(&self) -> Vec<(String, RoomId)> {
        self.rooms
            .read()
            .map(|r| r.iter().map(|(n, &id)| (n.clone(), id)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn remember_room(&self, name: String, id: RoomId) {
        if let Ok(mut rooms) = self.rooms.write() {
            rooms.insert(name, id);
        }
    }

    pub(crate) fn forget_room(&self, id: RoomId) {
        if let Ok(mut rooms) = self.rooms.write() {
            rooms.retain(|_, &mut v| v != id);
        }
    }

    /// Snapshot of every message received so far.
    pub fn messages(&self) -> Vec<RoomMessage> {
        self.log.read().map(|l| l.clone()).unwrap_or_default()
    }

    pub(crate) fn push_message(&self, message: RoomMessage) {
        if let Ok(mut log) = self.log.write() {
            log.push(message);
        }
    }
}
