//! Message protocol definitions
//!
//! The two directions of the wire protocol: `Request` (client → server)
//! and `Response` (server → client). Encoding to and from the line format
//! lives in [`crate::codec`].

use crate::types::{ClientId, RoomId};

/// Client → Server message
///
/// Every request except `Register` carries the caller's claimed identity
/// and shared-secret key; the server verifies both before acting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Create an account. The server assigns and returns the id.
    Register { display_name: String, key: String },
    /// Bind the current socket to a registered account.
    Login { id: ClientId, key: String },
    /// Release the account and close the connection.
    Logout { id: ClientId, key: String },
    /// Create a chatroom with the caller as admin and sole member.
    CreateRoom { id: ClientId, key: String, name: String },
    /// Delete a chatroom (admin only); all members are notified.
    RemoveRoom { id: ClientId, key: String, room: RoomId },
    /// Add a registered client to a chatroom (admin only).
    AddMember {
        id: ClientId,
        key: String,
        room: RoomId,
        member: ClientId,
    },
    /// Remove a member (admin, or the member removing themself).
    RemoveMember {
        id: ClientId,
        key: String,
        room: RoomId,
        member: ClientId,
    },
    /// Relay a chat message to every member of a room.
    SendMessage {
        id: ClientId,
        key: String,
        room: RoomId,
        text: String,
    },
}

impl Request {
    /// Action-type ordinal on the wire. Stable within one deployment.
    pub fn action_type(&self) -> u8 {
        match self {
            Request::Register { .. } => 0,
            Request::Login { .. } => 1,
            Request::Logout { .. } => 2,
            Request::CreateRoom { .. } => 3,
            Request::RemoveRoom { .. } => 4,
            Request::AddMember { .. } => 5,
            Request::RemoveMember { .. } => 6,
            Request::SendMessage { .. } => 7,
        }
    }
}

/// Server → Client message
///
/// The envelope pairs a body with the is-last flag: a response flagged
/// last is the final record on its connection and triggers teardown after
/// delivery (used by logout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub body: ResponseBody,
    pub last: bool,
}

impl Response {
    pub fn new(body: ResponseBody) -> Self {
        Self { body, last: false }
    }

    /// Mark this response as the final one for its connection.
    pub fn final_word(body: ResponseBody) -> Self {
        Self { body, last: true }
    }
}

/// Body of a server → client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// The requested action was performed.
    Success { detail: String },
    /// The requested action was rejected; registry state is unchanged.
    Failure { reason: String },
    /// A chat message relayed to a room member.
    Message {
        room: RoomId,
        sender: ClientId,
        text: String,
    },
    /// The receiver is now a member of the named room.
    Joined { room: RoomId, name: String },
    /// The receiver is no longer a member of the room.
    Left { room: RoomId, reason: String },
    /// Account created; carries the assigned id.
    Registered { id: ClientId },
}

impl ResponseBody {
    /// Action-type ordinal on the wire. Stable within one deployment.
    pub fn action_type(&self) -> u8 {
        match self {
            ResponseBody::Success { .. } => 0,
            ResponseBody::Failure { .. } => 1,
            ResponseBody::Message { .. } => 2,
            ResponseBody::Joined { .. } => 3,
            ResponseBody::Left { .. } => 4,
            ResponseBody::Registered { .. } => 5,
        }
    }

    pub fn success(detail: impl Into<String>) -> Self {
        ResponseBody::Success {
            detail: detail.into(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        ResponseBody::Failure {
            reason: reason.into(),
        }
    }
}
