use rmpv::Value;
use serde::{Deserialize, Serialize};

use crate::command::{Command, ResponseBody};
use crate::error::{ProtocolError, CODE_OK};

pub const PACKET_TYPE_REQUEST: u8 = 1;
pub const PACKET_TYPE_RESPONSE: u8 = 2;

/// A `REQUEST` packet: `type = 1`, an `id`, and the command-specific fields
/// flattened into the same map (per §3: "Additional command-specific keys").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPacket {
    #[serde(rename = "type")]
    pub kind: u8,
    pub id: u64,
    #[serde(flatten)]
    pub command: Command,
}

impl RequestPacket {
    pub fn new(id: u64, command: Command) -> Self {
        Self {
            kind: PACKET_TYPE_REQUEST,
            id,
            command,
        }
    }
}

/// A `RESPONSE` packet: `type = 2`, the echoed `command`, the matching
/// `id`, a `code`/`message` pair, and any command-specific result data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePacket {
    #[serde(rename = "type")]
    pub kind: u8,
    pub command: String,
    pub id: u64,
    pub code: i32,
    pub message: String,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl ResponsePacket {
    pub fn ok(id: u64, command: impl Into<String>, body: ResponseBody) -> Self {
        Self {
            kind: PACKET_TYPE_RESPONSE,
            command: command.into(),
            id,
            code: CODE_OK,
            message: String::new(),
            body,
        }
    }

    pub fn err(id: u64, command: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind: PACKET_TYPE_RESPONSE,
            command: command.into(),
            id,
            code,
            message: message.into(),
            body: ResponseBody::Empty {},
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Either half of the envelope, recovered from the `type` discriminant
/// before the rest of the map is interpreted.
#[derive(Debug, Clone)]
pub enum Frame {
    Request(RequestPacket),
    Response(ResponsePacket),
}

impl Frame {
    pub fn id(&self) -> u64 {
        match self {
            Frame::Request(r) => r.id,
            Frame::Response(r) => r.id,
        }
    }

    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        let value = match self {
            Frame::Request(r) => rmpv::ext::to_value(r)?,
            Frame::Response(r) => rmpv::ext::to_value(r)?,
        };
        Ok(value)
    }
}

impl From<RequestPacket> for Frame {
    fn from(r: RequestPacket) -> Self {
        Frame::Request(r)
    }
}

impl From<ResponsePacket> for Frame {
    fn from(r: ResponsePacket) -> Self {
        Frame::Response(r)
    }
}

/// Reads the `type` field out of a decoded `Value::Map` without committing
/// to either envelope shape yet.
fn packet_type(value: &Value) -> Option<u8> {
    let entries = value.as_map()?;
    entries.iter().find_map(|(k, v)| {
        if k.as_str() == Some("type") {
            v.as_u64().and_then(|n| u8::try_from(n).ok())
        } else {
            None
        }
    })
}

/// Converts a fully-decoded MessagePack value into the typed envelope it
/// represents, dispatching on the `type` discriminant.
pub fn frame_from_value(value: Value) -> Result<Frame, ProtocolError> {
    match packet_type(&value) {
        Some(PACKET_TYPE_REQUEST) => Ok(Frame::Request(rmpv::ext::from_value(value)?)),
        Some(PACKET_TYPE_RESPONSE) => Ok(Frame::Response(rmpv::ext::from_value(value)?)),
        _ => Err(ProtocolError::MissingType),
    }
}
