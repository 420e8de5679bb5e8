//! ChatServer actor implementation
//!
//! The central actor that owns all registry state: clients, rooms, and the
//! socket-to-identity map. Connection tasks never touch the registry; they
//! enqueue commands on an mpsc channel and the actor applies them strictly
//! in arrival order, so there is exactly one writer and no locks.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::RegisteredClient;
use crate::protocol::{Request, Response, ResponseBody};
use crate::room::Chatroom;
use crate::types::{ClientId, ConnId, RoomId, SYSTEM_SENDER};

/// Commands sent from connection tasks to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// A socket was accepted; bind it to a fresh guest identity
    Connect {
        conn: ConnId,
        sender: mpsc::UnboundedSender<Response>,
    },
    /// The socket is gone (orderly close, error, or shutdown)
    Disconnect { conn: ConnId },
    /// One decoded wire request from this socket
    Request { conn: ConnId, request: Request },
}

/// The main ChatServer actor
///
/// Processes commands from connection tasks and is the sole mutator of
/// client and room state. Individual request failures are reported to the
/// requester as `Failure` responses; the loop itself never dies because of
/// a bad request.
pub struct ChatServer {
    /// Server display name, echoed in the login welcome
    name: String,
    /// All known identities (registered accounts and live guests)
    clients: HashMap<ClientId, RegisteredClient>,
    /// All live rooms
    rooms: HashMap<RoomId, Chatroom>,
    /// Which identity each socket currently serves
    connections: HashMap<ConnId, ClientId>,
    /// Next client id; ids are never reused (0 is the system sender)
    next_client: u64,
    /// Next room id; ids are never reused
    next_room: u64,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver.
    pub fn new(name: impl Into<String>, receiver: mpsc::Receiver<ServerCommand>) -> Self {
        Self {
            name: name.into(),
            clients: HashMap::new(),
            rooms: HashMap::new(),
            connections: HashMap::new(),
            next_client: 1,
            next_room: 1,
            receiver,
        }
    }

    /// Run the actor loop until all command senders are dropped.
    pub async fn run(mut self) {
        info!(name = %self.name, "chat server started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("chat server shutting down");
    }

    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect { conn, sender } => self.handle_connect(conn, sender),
            ServerCommand::Disconnect { conn } => self.handle_disconnect(conn),
            ServerCommand::Request { conn, request } => self.handle_request(conn, request),
        }
    }

    /// Bind a freshly accepted socket to a new guest identity.
    fn handle_connect(&mut self, conn: ConnId, sender: mpsc::UnboundedSender<Response>) {
        let id = self.alloc_client_id();
        self.clients.insert(id, RegisteredClient::new_guest(id, sender));
        self.connections.insert(conn, id);

        info!(%conn, guest = %id, "connection accepted");
        debug!(
            clients = self.clients.len(),
            rooms = self.rooms.len(),
            "registry size"
        );
    }

    /// Drop a guest or mark a registered client offline.
    fn handle_disconnect(&mut self, conn: ConnId) {
        let Some(id) = self.connections.remove(&conn) else {
            debug!(%conn, "disconnect for unknown connection");
            return;
        };
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };

        if client.guest {
            self.clients.remove(&id);
            info!(%conn, guest = %id, "guest connection closed");
        } else {
            client.connected = false;
            client.unbind();
            info!(%conn, client = %id, "client disconnected");
        }
    }

    fn handle_request(&mut self, conn: ConnId, request: Request) {
        let Some(&requester) = self.connections.get(&conn) else {
            warn!(%conn, "request from a connection that is no longer bound");
            return;
        };

        match request {
            Request::Register { display_name, key } => {
                self.handle_register(requester, display_name, key)
            }
            Request::Login { id, key } => self.handle_login(conn, requester, id, &key),
            Request::Logout { id, key } => self.handle_logout(requester, id, &key),
            Request::CreateRoom { id, key, name } => {
                self.handle_create_room(requester, id, &key, name)
            }
            Request::RemoveRoom { id, key, room } => {
                self.handle_remove_room(requester, id, &key, room)
            }
            Request::AddMember {
                id,
                key,
                room,
                member,
            } => self.handle_add_member(requester, id, &key, room, member),
            Request::RemoveMember {
                id,
                key,
                room,
                member,
            } => self.handle_remove_member(requester, id, &key, room, member),
            Request::SendMessage {
                id,
                key,
                room,
                text,
            } => self.handle_send_message(requester, id, &key, room, text),
        }
    }

    /// Create an account. Needs no authentication; the requester may be a
    /// guest or an already logged-in client.
    fn handle_register(&mut self, requester: ClientId, display_name: String, key: String) {
        if display_name.is_empty() || key.is_empty() {
            self.fail(requester, "display name and key must not be empty");
            return;
        }

        let id = self.alloc_client_id();
        info!(client = %id, name = %display_name, "account registered");
        self.clients
            .insert(id, RegisteredClient::new(id, display_name, key));

        self.reply(requester, ResponseBody::Registered { id });
    }

    /// Rebind the requesting socket from its guest identity to a
    /// registered account.
    fn handle_login(&mut self, conn: ConnId, requester: ClientId, id: ClientId, key: &str) {
        let requester_connected = self
            .clients
            .get(&requester)
            .is_some_and(|c| c.connected);
        if requester_connected {
            self.fail(requester, "nothing to do, you are already logged in");
            return;
        }

        let target_check = match self.clients.get(&id) {
            None => Err("invalid credentials: unknown client id"),
            Some(target) if !target.key_matches(key) => Err("invalid credentials: login failed"),
            Some(target) if target.connected => Err("already connected from another session"),
            Some(_) => Ok(()),
        };
        if let Err(reason) = target_check {
            self.fail(requester, reason);
            return;
        }

        // Move the socket's outbox from the provisional identity to the
        // account, then retire the guest entry.
        let Some(sender) = self
            .clients
            .get_mut(&requester)
            .and_then(RegisteredClient::take_sender)
        else {
            warn!(client = %requester, "login from an identity with no outbox");
            return;
        };
        let was_guest = self.clients.get(&requester).is_some_and(|c| c.guest);
        if was_guest && requester != id {
            self.clients.remove(&requester);
        }

        let welcome = format!("welcome to '{}'", self.name);
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        client.bind(sender);
        client.connected = true;
        self.connections.insert(conn, id);

        info!(client = %id, "client logged in");
        self.reply(id, ResponseBody::success(welcome));

        // Notifications that accumulated while offline follow the login
        // reply so the requester's correlation is not disturbed.
        if let Some(client) = self.clients.get_mut(&id) {
            if client.flush_parked().is_err() {
                client.unbind();
            }
        }
    }

    /// Mark the account offline. The response carries the is-last flag so
    /// the connection tears down after delivering it.
    fn handle_logout(&mut self, requester: ClientId, id: ClientId, key: &str) {
        if requester != id {
            self.fail(requester, "invalid credentials: logout failed");
            return;
        }
        let Some(client) = self.clients.get_mut(&id) else {
            self.fail(requester, "invalid credentials: unknown client id");
            return;
        };
        if !client.key_matches(key) {
            self.fail(requester, "invalid credentials: logout failed");
            return;
        }

        client.connected = false;
        info!(client = %id, "client logged out");
        self.push(
            id,
            Response::final_word(ResponseBody::success("you were logged out")),
        );
    }

    fn handle_create_room(&mut self, requester: ClientId, id: ClientId, key: &str, name: String) {
        if let Err(reason) = self.verify_identity(requester, id, key) {
            self.fail(requester, reason);
            return;
        }

        let room_id = self.alloc_room_id();
        info!(room = %room_id, name = %name, admin = %id, "chatroom created");
        self.rooms
            .insert(room_id, Chatroom::new(room_id, name.clone(), id));

        self.reply(id, ResponseBody::Joined {
            room: room_id,
            name,
        });
    }

    fn handle_remove_room(&mut self, requester: ClientId, id: ClientId, key: &str, room: RoomId) {
        if let Err(reason) = self.verify_identity(requester, id, key) {
            self.fail(requester, reason);
            return;
        }
        let Some(found) = self.rooms.get(&room) else {
            self.fail(requester, "room not found");
            return;
        };
        if !found.is_admin(id) {
            self.fail(requester, "only the admin can remove a chatroom");
            return;
        }

        let Some(removed) = self.rooms.remove(&room) else {
            return;
        };
        info!(room = %room, name = %removed.name, "chatroom removed");

        let reason = format!("room '{}' was removed", removed.name);
        for &member in removed.members() {
            // The admin's copy doubles as the reply to this request.
            self.reply(member, ResponseBody::Left {
                room,
                reason: reason.clone(),
            });
        }
    }

    fn handle_add_member(
        &mut self,
        requester: ClientId,
        id: ClientId,
        key: &str,
        room: RoomId,
        member: ClientId,
    ) {
        if let Err(reason) = self.verify_identity(requester, id, key) {
            self.fail(requester, reason);
            return;
        }
        let Some(found) = self.rooms.get(&room) else {
            self.fail(requester, "room not found");
            return;
        };
        if !found.is_admin(id) {
            self.fail(requester, "only the admin can add members");
            return;
        }
        let Some(target) = self.clients.get(&member).filter(|c| !c.guest) else {
            self.fail(requester, "invalid credentials: unknown client id");
            return;
        };
        if found.is_member(member) {
            self.fail(requester, "already a member of this room");
            return;
        }

        let announcement = format!("{} joined the room", target.display_name);
        let Some(found) = self.rooms.get_mut(&room) else {
            return;
        };
        found.add_member(member);
        found.push_message(SYSTEM_SENDER, announcement.clone());
        let name = found.name.clone();
        let members: Vec<ClientId> = found.members().to_vec();

        info!(room = %room, member = %member, "member added");

        self.reply(member, ResponseBody::Joined { room, name });
        for m in members {
            self.reply(m, ResponseBody::Message {
                room,
                sender: SYSTEM_SENDER,
                text: announcement.clone(),
            });
        }
        self.reply(id, ResponseBody::success(format!("added client {member}")));
    }

    fn handle_remove_member(
        &mut self,
        requester: ClientId,
        id: ClientId,
        key: &str,
        room: RoomId,
        member: ClientId,
    ) {
        if let Err(reason) = self.verify_identity(requester, id, key) {
            self.fail(requester, reason);
            return;
        }
        let Some(found) = self.rooms.get_mut(&room) else {
            self.fail(requester, "room not found");
            return;
        };
        if !found.is_admin(id) && id != member {
            self.fail(requester, "only the admin can remove other members");
            return;
        }
        if found.is_admin(member) {
            self.fail(
                requester,
                "the admin cannot leave their own room; remove the room instead",
            );
            return;
        }
        if !found.remove_member(member) {
            self.fail(requester, "not a member of this room");
            return;
        }
        let name = found.name.clone();

        info!(room = %room, member = %member, "member removed");

        let reason = if requester == member {
            format!("you left room '{name}'")
        } else {
            format!("you were removed from room '{name}'")
        };
        self.reply(member, ResponseBody::Left { room, reason });
        if requester != member {
            self.reply(id, ResponseBody::success(format!("removed client {member}")));
        }
    }

    fn handle_send_message(
        &mut self,
        requester: ClientId,
        id: ClientId,
        key: &str,
        room: RoomId,
        text: String,
    ) {
        if let Err(reason) = self.verify_identity(requester, id, key) {
            self.fail(requester, reason);
            return;
        }
        let Some(found) = self.rooms.get_mut(&room) else {
            self.fail(requester, "room not found");
            return;
        };
        if !found.is_member(id) {
            self.fail(
                requester,
                "you are not a member of this chat room",
            );
            return;
        }

        found.push_message(id, text.clone());
        let members: Vec<ClientId> = found.members().to_vec();

        debug!(room = %room, sender = %id, "message relayed");

        // One pass of the processor: delivery is FIFO per room.
        for member in members {
            self.reply(member, ResponseBody::Message {
                room,
                sender: id,
                text: text.clone(),
            });
        }
        self.reply(id, ResponseBody::success("message sent"));
    }

    /// Identity gate for everything except register/login/logout: the
    /// socket must be bound to the claimed id, the key must match, and the
    /// client must be logged in.
    fn verify_identity(
        &self,
        requester: ClientId,
        claimed: ClientId,
        key: &str,
    ) -> Result<(), &'static str> {
        if requester != claimed {
            return Err("invalid credentials: socket is not bound to this identity");
        }
        let Some(client) = self.clients.get(&claimed) else {
            return Err("invalid credentials: unknown client id");
        };
        if !client.key_matches(key) {
            return Err("invalid credentials: verification failed");
        }
        if !client.connected {
            return Err("not logged in");
        }
        Ok(())
    }

    fn reply(&mut self, to: ClientId, body: ResponseBody) {
        self.push(to, Response::new(body));
    }

    fn fail(&mut self, to: ClientId, reason: impl Into<String>) {
        self.push(to, Response::new(ResponseBody::failure(reason)));
    }

    fn push(&mut self, to: ClientId, resp: Response) {
        let Some(client) = self.clients.get_mut(&to) else {
            debug!(client = %to, "dropping response for unknown client");
            return;
        };
        if client.push_response(resp).is_err() {
            // The socket died under us; park anything further until the
            // next login.
            debug!(client = %to, "outbox closed, unbinding");
            client.unbind();
        }
    }

    fn alloc_client_id(&mut self) -> ClientId {
        let id = ClientId(self.next_client);
        self.next_client += 1;
        id
    }

    fn alloc_room_id(&mut self) -> RoomId {
        let id = RoomId(self.next_room);
        self.next_room += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_server() -> ChatServer {
        let (_tx, rx) = mpsc::channel(8);
        ChatServer::new("testsrv", rx)
    }

    fn connect(server: &mut ChatServer, conn: u64) -> (ConnId, UnboundedReceiver<Response>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = ConnId(conn);
        server.handle_command(ServerCommand::Connect { conn, sender: tx });
        (conn, rx)
    }

    fn request(server: &mut ChatServer, conn: ConnId, request: Request) {
        server.handle_command(ServerCommand::Request { conn, request });
    }

    fn next(rx: &mut UnboundedReceiver<Response>) -> Response {
        rx.try_recv().expect("expected a queued response")
    }

    /// Register an account through `conn` and return the assigned id.
    fn register(
        server: &mut ChatServer,
        conn: ConnId,
        rx: &mut UnboundedReceiver<Response>,
        name: &str,
        key: &str,
    ) -> ClientId {
        request(server, conn, Request::Register {
            display_name: name.into(),
            key: key.into(),
        });
        match next(rx).body {
            ResponseBody::Registered { id } => id,
            other => panic!("expected Registered, got {other:?}"),
        }
    }

    /// Register and log in a fresh connection; returns (id, conn, rx).
    fn login_fresh(
        server: &mut ChatServer,
        conn: u64,
        name: &str,
        key: &str,
    ) -> (ClientId, ConnId, UnboundedReceiver<Response>) {
        let (conn, mut rx) = connect(server, conn);
        let id = register(server, conn, &mut rx, name, key);
        request(server, conn, Request::Login {
            id,
            key: key.into(),
        });
        let resp = next(&mut rx);
        assert!(
            matches!(resp.body, ResponseBody::Success { .. }),
            "login should succeed, got {resp:?}"
        );
        (id, conn, rx)
    }

    fn expect_failure(rx: &mut UnboundedReceiver<Response>, fragment: &str) {
        match next(rx).body {
            ResponseBody::Failure { reason } => {
                assert!(
                    reason.contains(fragment),
                    "expected failure mentioning {fragment:?}, got {reason:?}"
                );
            }
            other => panic!("expected Failure, got {other:?}"),
        }
    }

    #[test]
    fn register_assigns_distinct_increasing_ids() {
        let mut server = test_server();
        let (conn, mut rx) = connect(&mut server, 1);

        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(register(
                &mut server,
                conn,
                &mut rx,
                &format!("user{n}"),
                "key",
            ));
        }

        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "ids must be strictly increasing");
        }
    }

    #[test]
    fn login_binds_socket_and_discards_guest() {
        let mut server = test_server();
        let (conn, mut rx) = connect(&mut server, 1);
        let guest_id = *server.connections.get(&conn).unwrap();
        let id = register(&mut server, conn, &mut rx, "alice", "secret");

        request(&mut server, conn, Request::Login {
            id,
            key: "secret".into(),
        });

        let resp = next(&mut rx);
        assert!(matches!(resp.body, ResponseBody::Success { .. }));
        assert!(!resp.last);
        assert!(server.clients.get(&id).unwrap().connected);
        assert!(!server.clients.contains_key(&guest_id), "guest must be gone");
        assert_eq!(server.connections.get(&conn), Some(&id));
    }

    #[test]
    fn second_login_while_connected_fails() {
        let mut server = test_server();
        let (id, _conn, _rx) = login_fresh(&mut server, 1, "alice", "secret");

        let (conn2, mut rx2) = connect(&mut server, 2);
        request(&mut server, conn2, Request::Login {
            id,
            key: "secret".into(),
        });

        expect_failure(&mut rx2, "already connected");
        assert!(server.clients.get(&id).unwrap().connected);
    }

    #[test]
    fn login_with_unknown_id_or_wrong_key_fails() {
        let mut server = test_server();
        let (conn, mut rx) = connect(&mut server, 1);
        let id = register(&mut server, conn, &mut rx, "alice", "secret");

        request(&mut server, conn, Request::Login {
            id: ClientId(9999),
            key: "secret".into(),
        });
        expect_failure(&mut rx, "unknown client id");

        request(&mut server, conn, Request::Login {
            id,
            key: "wrong".into(),
        });
        expect_failure(&mut rx, "login failed");

        assert!(!server.clients.get(&id).unwrap().connected);
    }

    #[test]
    fn logout_is_final_and_marks_offline() {
        let mut server = test_server();
        let (id, conn, mut rx) = login_fresh(&mut server, 1, "alice", "secret");

        request(&mut server, conn, Request::Logout {
            id,
            key: "secret".into(),
        });

        let resp = next(&mut rx);
        assert!(matches!(resp.body, ResponseBody::Success { .. }));
        assert!(resp.last, "logout reply must carry the is-last flag");
        assert!(!server.clients.get(&id).unwrap().connected);
    }

    #[test]
    fn logout_for_someone_else_is_rejected() {
        let mut server = test_server();
        let (alice, _conn_a, _rx_a) = login_fresh(&mut server, 1, "alice", "secret");
        let (_bob, conn_b, mut rx_b) = login_fresh(&mut server, 2, "bob", "hunter2");

        // Bob tries to log Alice out using Alice's stolen key.
        request(&mut server, conn_b, Request::Logout {
            id: alice,
            key: "secret".into(),
        });
        expect_failure(&mut rx_b, "logout failed");
        assert!(server.clients.get(&alice).unwrap().connected);
    }

    #[test]
    fn create_room_makes_caller_sole_admin_member() {
        let mut server = test_server();
        let (id, conn, mut rx) = login_fresh(&mut server, 1, "alice", "secret");

        request(&mut server, conn, Request::CreateRoom {
            id,
            key: "secret".into(),
            name: "lobby".into(),
        });

        let room = match next(&mut rx).body {
            ResponseBody::Joined { room, name } => {
                assert_eq!(name, "lobby");
                room
            }
            other => panic!("expected Joined, got {other:?}"),
        };

        let stored = server.rooms.get(&room).unwrap();
        assert!(stored.is_admin(id));
        assert_eq!(stored.members(), &[id]);
    }

    #[test]
    fn non_member_cannot_send_and_log_is_unchanged() {
        let mut server = test_server();
        let (alice, conn_a, mut rx_a) = login_fresh(&mut server, 1, "alice", "secret");
        let (bob, conn_b, mut rx_b) = login_fresh(&mut server, 2, "bob", "hunter2");

        request(&mut server, conn_a, Request::CreateRoom {
            id: alice,
            key: "secret".into(),
            name: "lobby".into(),
        });
        let room = match next(&mut rx_a).body {
            ResponseBody::Joined { room, .. } => room,
            other => panic!("expected Joined, got {other:?}"),
        };

        request(&mut server, conn_b, Request::SendMessage {
            id: bob,
            key: "hunter2".into(),
            room,
            text: "let me in".into(),
        });

        expect_failure(&mut rx_b, "not a member");
        assert!(server.rooms.get(&room).unwrap().messages().is_empty());
    }

    #[test]
    fn add_member_is_admin_only_and_validates_target() {
        let mut server = test_server();
        let (alice, conn_a, mut rx_a) = login_fresh(&mut server, 1, "alice", "secret");
        let (bob, conn_b, mut rx_b) = login_fresh(&mut server, 2, "bob", "hunter2");

        request(&mut server, conn_a, Request::CreateRoom {
            id: alice,
            key: "secret".into(),
            name: "lobby".into(),
        });
        let room = match next(&mut rx_a).body {
            ResponseBody::Joined { room, .. } => room,
            other => panic!("expected Joined, got {other:?}"),
        };

        // Non-admin cannot add.
        request(&mut server, conn_b, Request::AddMember {
            id: bob,
            key: "hunter2".into(),
            room,
            member: bob,
        });
        expect_failure(&mut rx_b, "only the admin");

        // Admin cannot add an unknown target.
        request(&mut server, conn_a, Request::AddMember {
            id: alice,
            key: "secret".into(),
            room,
            member: ClientId(9999),
        });
        expect_failure(&mut rx_a, "unknown client id");

        // Admin adds Bob: Bob hears Joined then the announcement.
        request(&mut server, conn_a, Request::AddMember {
            id: alice,
            key: "secret".into(),
            room,
            member: bob,
        });
        match next(&mut rx_b).body {
            ResponseBody::Joined { room: r, name } => {
                assert_eq!(r, room);
                assert_eq!(name, "lobby");
            }
            other => panic!("expected Joined, got {other:?}"),
        }
        match next(&mut rx_b).body {
            ResponseBody::Message { sender, text, .. } => {
                assert_eq!(sender, SYSTEM_SENDER);
                assert!(text.contains("bob"));
            }
            other => panic!("expected system Message, got {other:?}"),
        }

        // Admin hears the announcement and the success reply.
        assert!(matches!(
            next(&mut rx_a).body,
            ResponseBody::Message { sender, .. } if sender == SYSTEM_SENDER
        ));
        assert!(matches!(next(&mut rx_a).body, ResponseBody::Success { .. }));
        assert_eq!(server.rooms.get(&room).unwrap().member_count(), 2);
    }

    #[test]
    fn send_message_reaches_every_member_once() {
        let mut server = test_server();
        let (alice, conn_a, mut rx_a) = login_fresh(&mut server, 1, "alice", "secret");
        let (bob, conn_b, mut rx_b) = login_fresh(&mut server, 2, "bob", "hunter2");

        request(&mut server, conn_a, Request::CreateRoom {
            id: alice,
            key: "secret".into(),
            name: "lobby".into(),
        });
        let room = match next(&mut rx_a).body {
            ResponseBody::Joined { room, .. } => room,
            other => panic!("expected Joined, got {other:?}"),
        };
        request(&mut server, conn_a, Request::AddMember {
            id: alice,
            key: "secret".into(),
            room,
            member: bob,
        });
        // Drain the add-member traffic.
        let _ = next(&mut rx_a); // announcement
        let _ = next(&mut rx_a); // success
        let _ = next(&mut rx_b); // joined
        let _ = next(&mut rx_b); // announcement

        request(&mut server, conn_a, Request::SendMessage {
            id: alice,
            key: "secret".into(),
            room,
            text: "hi".into(),
        });

        // Sender gets exactly one echo plus the success reply.
        match next(&mut rx_a).body {
            ResponseBody::Message { sender, text, .. } => {
                assert_eq!(sender, alice);
                assert_eq!(text, "hi");
            }
            other => panic!("expected Message, got {other:?}"),
        }
        assert!(matches!(next(&mut rx_a).body, ResponseBody::Success { .. }));
        assert!(rx_a.try_recv().is_err());

        // The other member gets exactly one copy.
        match next(&mut rx_b).body {
            ResponseBody::Message { sender, text, .. } => {
                assert_eq!(sender, alice);
                assert_eq!(text, "hi");
            }
            other => panic!("expected Message, got {other:?}"),
        }
        assert!(rx_b.try_recv().is_err());

        // One system announcement + one chat entry in the log.
        let log = server.rooms.get(&room).unwrap().messages();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1], (alice, "hi".to_string()));
    }

    #[test]
    fn remove_room_notifies_all_members_then_room_is_gone() {
        let mut server = test_server();
        let (alice, conn_a, mut rx_a) = login_fresh(&mut server, 1, "alice", "secret");
        let (bob, conn_b, mut rx_b) = login_fresh(&mut server, 2, "bob", "hunter2");

        request(&mut server, conn_a, Request::CreateRoom {
            id: alice,
            key: "secret".into(),
            name: "lobby".into(),
        });
        let room = match next(&mut rx_a).body {
            ResponseBody::Joined { room, .. } => room,
            other => panic!("expected Joined, got {other:?}"),
        };
        request(&mut server, conn_a, Request::AddMember {
            id: alice,
            key: "secret".into(),
            room,
            member: bob,
        });
        let _ = next(&mut rx_a);
        let _ = next(&mut rx_a);
        let _ = next(&mut rx_b);
        let _ = next(&mut rx_b);

        // Non-admin cannot remove the room.
        request(&mut server, conn_b, Request::RemoveRoom {
            id: bob,
            key: "hunter2".into(),
            room,
        });
        expect_failure(&mut rx_b, "only the admin");

        request(&mut server, conn_a, Request::RemoveRoom {
            id: alice,
            key: "secret".into(),
            room,
        });

        assert!(matches!(
            next(&mut rx_a).body,
            ResponseBody::Left { room: r, .. } if r == room
        ));
        assert!(matches!(
            next(&mut rx_b).body,
            ResponseBody::Left { room: r, .. } if r == room
        ));
        assert!(!server.rooms.contains_key(&room));

        request(&mut server, conn_a, Request::SendMessage {
            id: alice,
            key: "secret".into(),
            room,
            text: "anyone?".into(),
        });
        expect_failure(&mut rx_a, "room not found");
    }

    #[test]
    fn member_can_remove_themself_but_admin_cannot_leave() {
        let mut server = test_server();
        let (alice, conn_a, mut rx_a) = login_fresh(&mut server, 1, "alice", "secret");
        let (bob, conn_b, mut rx_b) = login_fresh(&mut server, 2, "bob", "hunter2");

        request(&mut server, conn_a, Request::CreateRoom {
            id: alice,
            key: "secret".into(),
            name: "lobby".into(),
        });
        let room = match next(&mut rx_a).body {
            ResponseBody::Joined { room, .. } => room,
            other => panic!("expected Joined, got {other:?}"),
        };
        request(&mut server, conn_a, Request::AddMember {
            id: alice,
            key: "secret".into(),
            room,
            member: bob,
        });
        let _ = next(&mut rx_a);
        let _ = next(&mut rx_a);
        let _ = next(&mut rx_b);
        let _ = next(&mut rx_b);

        // Bob leaves on his own; the Left reply answers his request.
        request(&mut server, conn_b, Request::RemoveMember {
            id: bob,
            key: "hunter2".into(),
            room,
            member: bob,
        });
        match next(&mut rx_b).body {
            ResponseBody::Left { room: r, reason } => {
                assert_eq!(r, room);
                assert!(reason.contains("left"));
            }
            other => panic!("expected Left, got {other:?}"),
        }
        assert!(!server.rooms.get(&room).unwrap().is_member(bob));

        // The admin cannot leave their own room.
        request(&mut server, conn_a, Request::RemoveMember {
            id: alice,
            key: "secret".into(),
            room,
            member: alice,
        });
        expect_failure(&mut rx_a, "admin cannot leave");
        assert!(server.rooms.get(&room).unwrap().is_member(alice));
    }

    #[test]
    fn spoofed_identity_from_other_socket_is_rejected() {
        let mut server = test_server();
        let (alice, _conn_a, _rx_a) = login_fresh(&mut server, 1, "alice", "secret");
        let (conn_b, mut rx_b) = connect(&mut server, 2);

        request(&mut server, conn_b, Request::CreateRoom {
            id: alice,
            key: "secret".into(),
            name: "lobby".into(),
        });

        expect_failure(&mut rx_b, "not bound to this identity");
        assert!(server.rooms.is_empty());
    }

    #[test]
    fn offline_member_gets_parked_notifications_on_login() {
        let mut server = test_server();
        let (alice, conn_a, mut rx_a) = login_fresh(&mut server, 1, "alice", "secret");

        // Bob registers but never logs in.
        let (conn_b, mut rx_b) = connect(&mut server, 2);
        let bob = register(&mut server, conn_b, &mut rx_b, "bob", "hunter2");

        request(&mut server, conn_a, Request::CreateRoom {
            id: alice,
            key: "secret".into(),
            name: "lobby".into(),
        });
        let room = match next(&mut rx_a).body {
            ResponseBody::Joined { room, .. } => room,
            other => panic!("expected Joined, got {other:?}"),
        };
        request(&mut server, conn_a, Request::AddMember {
            id: alice,
            key: "secret".into(),
            room,
            member: bob,
        });

        // Nothing reaches Bob's old socket; the notifications parked.
        assert!(rx_b.try_recv().is_err());
        assert!(server.clients.get(&bob).unwrap().parked_len() > 0);

        // A new socket logs in as Bob: login reply first, then the
        // parked Joined and announcement in push order.
        let (conn_c, mut rx_c) = connect(&mut server, 3);
        request(&mut server, conn_c, Request::Login {
            id: bob,
            key: "hunter2".into(),
        });

        assert!(matches!(next(&mut rx_c).body, ResponseBody::Success { .. }));
        assert!(matches!(
            next(&mut rx_c).body,
            ResponseBody::Joined { room: r, .. } if r == room
        ));
        assert!(matches!(
            next(&mut rx_c).body,
            ResponseBody::Message { sender, .. } if sender == SYSTEM_SENDER
        ));
    }

    #[test]
    fn guest_disconnect_removes_registry_entry() {
        let mut server = test_server();
        let (conn, _rx) = connect(&mut server, 1);
        assert_eq!(server.clients.len(), 1);

        server.handle_command(ServerCommand::Disconnect { conn });
        assert!(server.clients.is_empty());
        assert!(server.connections.is_empty());
    }

    #[test]
    fn disconnect_marks_registered_client_offline_but_keeps_account() {
        let mut server = test_server();
        let (id, conn, _rx) = login_fresh(&mut server, 1, "alice", "secret");

        server.handle_command(ServerCommand::Disconnect { conn });

        let client = server.clients.get(&id).expect("account survives");
        assert!(!client.connected);
    }
}
