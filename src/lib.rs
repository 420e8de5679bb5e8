//! Line-protocol chat server and client connector
//!
//! A chat system over plain TCP: clients register accounts, log in,
//! create chatrooms, manage membership, and exchange messages relayed by
//! the server.
//!
//! # Features
//! - Hand-rolled line codec shared by both sides
//! - Account registration and shared-secret login
//! - Chatrooms with a fixed admin and member management
//! - Message relay with per-room FIFO delivery
//! - Offline members catch up on parked notifications at login
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor owning all registry state
//! - Each accepted socket runs a read task and a write task that only
//!   enqueue commands and drain their own outbox - no locks anywhere
//! - `ServerConnection` is the client side: a receiver loop splits chat
//!   messages from request replies, a delivery loop hands both out
//!
//! # Example
//! ```ignore
//! use chatline::{Server, ServerConnection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind("127.0.0.1:3490", "Chat!").await?;
//!     tokio::spawn(server.run_until_ctrl_c());
//!
//!     let (conn, mut feed) = ServerConnection::connect("127.0.0.1:3490").await?;
//!     let id = conn.authenticate(true, None, "secret", "alice").await?;
//!     let room = conn.create_room("lobby").await?;
//!     conn.send_message(room, "hello, world").await?;
//!     println!("{:?}", feed.recv().await);
//!     println!("logged in as {id}");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod handler;
pub mod listener;
pub mod protocol;
pub mod room;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use client::RegisteredClient;
pub use codec::CodecError;
pub use connection::ServerConnection;
pub use error::{AppError, SendError};
pub use handler::handle_connection;
pub use listener::{Server, ServerGuard};
pub use protocol::{Request, Response, ResponseBody};
pub use room::Chatroom;
pub use server::{ChatServer, ServerCommand};
pub use session::{Account, RoomMessage, SessionState};
pub use types::{ClientId, ConnId, RoomId, SYSTEM_SENDER};
