//! Wire codec for the line protocol
//!
//! One record per newline-terminated line: a leading action-type integer,
//! space-separated positional fields, and an optional free-text payload
//! extending to the end of the record. `encode_*` and `decode_*` are exact
//! inverses for any message whose free text contains neither the record
//! separator `$` nor a newline.
//!
//! A single socket read may return two coalesced records packed into one
//! line with `$` between them; callers split with [`split_records`] before
//! decoding.

use thiserror::Error;

use crate::protocol::{Request, Response, ResponseBody};

/// Separator between coalesced records inside one line.
pub const RECORD_SEPARATOR: char = '$';

/// Wire decode error
#[derive(Debug, Error)]
pub enum CodecError {
    /// Action-type integer outside the known range for the direction.
    #[error("unknown action type: {0}")]
    UnknownAction(u64),

    /// Record ended before a required field.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field did not parse as the expected integer.
    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Split a received line into its `$`-separated records.
///
/// Empty records (a trailing `$`, say) are dropped rather than reported as
/// decode errors.
pub fn split_records(line: &str) -> impl Iterator<Item = &str> {
    line.split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|rec| !rec.is_empty())
}

/// Encode a request as one line (no trailing newline).
pub fn encode_request(req: &Request) -> String {
    let t = req.action_type();
    match req {
        Request::Register { display_name, key } => format!("{t} {display_name} {key}"),
        Request::Login { id, key } | Request::Logout { id, key } => format!("{t} {id} {key}"),
        Request::CreateRoom { id, key, name } => format!("{t} {id} {key} {name}"),
        Request::RemoveRoom { id, key, room } => format!("{t} {id} {key} {room}"),
        Request::AddMember {
            id,
            key,
            room,
            member,
        }
        | Request::RemoveMember {
            id,
            key,
            room,
            member,
        } => format!("{t} {id} {key} {room} {member}"),
        Request::SendMessage {
            id,
            key,
            room,
            text,
        } => format!("{t} {id} {key} {room} {text}"),
    }
}

/// Decode one record into a request.
pub fn decode_request(record: &str) -> Result<Request, CodecError> {
    let mut cur = Cursor::new(record);
    let action: u64 = cur.uint("action type")?;

    match action {
        0 => Ok(Request::Register {
            display_name: cur.token("display name")?.to_string(),
            key: cur.token("key")?.to_string(),
        }),
        1 => Ok(Request::Login {
            id: cur.client_id()?,
            key: cur.token("key")?.to_string(),
        }),
        2 => Ok(Request::Logout {
            id: cur.client_id()?,
            key: cur.token("key")?.to_string(),
        }),
        3 => Ok(Request::CreateRoom {
            id: cur.client_id()?,
            key: cur.token("key")?.to_string(),
            name: cur.token("room name")?.to_string(),
        }),
        4 => Ok(Request::RemoveRoom {
            id: cur.client_id()?,
            key: cur.token("key")?.to_string(),
            room: cur.room_id()?,
        }),
        5 => Ok(Request::AddMember {
            id: cur.client_id()?,
            key: cur.token("key")?.to_string(),
            room: cur.room_id()?,
            member: cur.target_id()?,
        }),
        6 => Ok(Request::RemoveMember {
            id: cur.client_id()?,
            key: cur.token("key")?.to_string(),
            room: cur.room_id()?,
            member: cur.target_id()?,
        }),
        7 => Ok(Request::SendMessage {
            id: cur.client_id()?,
            key: cur.token("key")?.to_string(),
            room: cur.room_id()?,
            text: cur.rest().to_string(),
        }),
        other => Err(CodecError::UnknownAction(other)),
    }
}

/// Encode a response as one line (no trailing newline).
pub fn encode_response(resp: &Response) -> String {
    let t = resp.body.action_type();
    let last = resp.last as u8;
    match &resp.body {
        ResponseBody::Success { detail } => format!("{t} {last} {detail}"),
        ResponseBody::Failure { reason } => format!("{t} {last} {reason}"),
        ResponseBody::Message { room, sender, text } => {
            format!("{t} {last} {room} {sender} {text}")
        }
        ResponseBody::Joined { room, name } => format!("{t} {last} {room} {name}"),
        ResponseBody::Left { room, reason } => format!("{t} {last} {room} {reason}"),
        ResponseBody::Registered { id } => format!("{t} {last} {id}"),
    }
}

/// Decode one record into a response.
pub fn decode_response(record: &str) -> Result<Response, CodecError> {
    let mut cur = Cursor::new(record);
    let action: u64 = cur.uint("action type")?;
    let last = cur.uint("last flag")? != 0;

    let body = match action {
        0 => ResponseBody::Success {
            detail: cur.rest().to_string(),
        },
        1 => ResponseBody::Failure {
            reason: cur.rest().to_string(),
        },
        2 => ResponseBody::Message {
            room: cur.room_id()?,
            sender: cur.client_id()?,
            text: cur.rest().to_string(),
        },
        3 => ResponseBody::Joined {
            room: cur.room_id()?,
            name: cur.rest().to_string(),
        },
        4 => ResponseBody::Left {
            room: cur.room_id()?,
            reason: cur.rest().to_string(),
        },
        5 => ResponseBody::Registered {
            id: cur.client_id()?,
        },
        other => return Err(CodecError::UnknownAction(other)),
    };

    Ok(Response { body, last })
}

/// Positional field reader over one record.
struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(record: &'a str) -> Self {
        Self {
            rest: record.trim(),
        }
    }

    /// Next space-separated token.
    fn token(&mut self, field: &'static str) -> Result<&'a str, CodecError> {
        let rest = self.rest.trim_start();
        if rest.is_empty() {
            return Err(CodecError::MissingField(field));
        }
        match rest.split_once(' ') {
            Some((tok, tail)) => {
                self.rest = tail;
                Ok(tok)
            }
            None => {
                self.rest = "";
                Ok(rest)
            }
        }
    }

    /// Everything after the fields consumed so far, leading space stripped.
    fn rest(self) -> &'a str {
        self.rest.trim_start()
    }

    fn uint(&mut self, field: &'static str) -> Result<u64, CodecError> {
        let tok = self.token(field)?;
        tok.parse().map_err(|_| CodecError::InvalidField {
            field,
            value: tok.to_string(),
        })
    }

    fn client_id(&mut self) -> Result<crate::types::ClientId, CodecError> {
        self.uint("client id").map(crate::types::ClientId)
    }

    fn target_id(&mut self) -> Result<crate::types::ClientId, CodecError> {
        self.uint("target id").map(crate::types::ClientId)
    }

    fn room_id(&mut self) -> Result<crate::types::RoomId, CodecError> {
        self.uint("room id").map(crate::types::RoomId)
    }
}
