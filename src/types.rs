//! Basic type definitions for the chat system
//!
//! Provides newtype wrappers for type safety:
//! - `ClientId`: monotonically assigned account identifier
//! - `RoomId`: monotonically assigned chatroom identifier
//! - `ConnId`: per-socket connection identifier, server-local

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Unique client identifier (newtype pattern)
///
/// Assigned by the server registry from a single monotonic counter and
/// never reused. Id 0 is reserved for server-originated system messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

/// Sender id attached to system announcements pushed by the server itself.
pub const SYSTEM_SENDER: ClientId = ClientId(0);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(ClientId)
    }
}

/// Unique chatroom identifier (newtype pattern)
///
/// Assigned monotonically by the server registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RoomId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(RoomId)
    }
}

/// Identifier of one accepted socket.
///
/// Distinct from `ClientId`: a connection starts out bound to a guest
/// identity and is rebound to a registered client on login. The registry
/// maps `ConnId -> ClientId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}
