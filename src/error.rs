//! Error types for the chat system
//!
//! Defines application-level errors and outbox send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::codec::CodecError;

/// Application-level errors
///
/// Covers fatal errors (setup and socket failures) and client-side call
/// failures. Validation failures are not errors: the server reports them
/// as `Failure` responses and keeps running.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal for the connection it occurred on)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Undecodable wire record
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Internal channel closed while sending (peer task gone)
    #[error("channel send error")]
    ChannelSend,

    /// The server dropped the link while a call was outstanding
    #[error("connection closed")]
    ConnectionClosed,

    /// The server rejected the request
    #[error("rejected: {0}")]
    Rejected(String),

    /// Locally rejected input (names/keys must be single tokens)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The server sent a reply of an unexpected kind
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Outbox send errors
///
/// Occurs when pushing a response to a client whose connection is gone.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("channel closed")]
    ChannelClosed,
}
