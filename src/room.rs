//! Chatroom entity
//!
//! A room with a fixed admin, a member set, and an append-only message log.

use crate::types::{ClientId, RoomId};

/// A chat room
///
/// The admin is the creating client and stays admin for the room's life;
/// the member list always contains the admin. Cross-references are ids,
/// resolved through the registry.
#[derive(Debug)]
pub struct Chatroom {
    /// Room identifier, assigned monotonically
    pub id: RoomId,
    /// Display name (single token on the wire)
    pub name: String,
    /// The creating client; the only identity allowed to manage the room
    pub admin: ClientId,
    /// Member ids in join order, admin first
    members: Vec<ClientId>,
    /// Append-only `(sender, text)` log; sender 0 marks system messages
    messages: Vec<(ClientId, String)>,
}

impl Chatroom {
    /// Create a room with the given admin as its sole member.
    pub fn new(id: RoomId, name: String, admin: ClientId) -> Self {
        Self {
            id,
            name,
            admin,
            members: vec![admin],
            messages: Vec::new(),
        }
    }

    pub fn is_admin(&self, client: ClientId) -> bool {
        self.admin == client
    }

    pub fn is_member(&self, client: ClientId) -> bool {
        self.members.contains(&client)
    }

    /// Add a member. Returns false if already present.
    pub fn add_member(&mut self, client: ClientId) -> bool {
        if self.is_member(client) {
            return false;
        }
        self.members.push(client);
        true
    }

    /// Remove a member. Returns false if not present.
    ///
    /// The admin is never removed through this path; callers reject that
    /// case before mutating.
    pub fn remove_member(&mut self, client: ClientId) -> bool {
        let before = self.members.len();
        self.members.retain(|&m| m != client);
        self.members.len() != before
    }

    /// Members in join order.
    pub fn members(&self) -> &[ClientId] {
        &self.members
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Append one entry to the message log.
    pub fn push_message(&mut self, sender: ClientId, text: String) {
        self.messages.push((sender, text));
    }

    pub fn messages(&self) -> &[(ClientId, String)] {
        &self.messages
    }
}
