use serde::Deserialize;

use super::messages::{ClientMessage, JoinMsg, MoveMsg, ServerMessage};

/// Maximum inbound frame size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024; // 16 KiB

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty message")]
    EmptyMessage,
    #[error("payload too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    PayloadTooLarge(usize),
    #[error("unknown message type: {0:?}")]
    UnknownMessageType(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("serialize error: {0}")]
    SerializeError(String),
}

impl ProtocolError {
    /// Whether the connection that sent this frame must be closed.
    ///
    /// Only an unrecognized `type` is survivable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnknownMessageType(_))
    }
}

/// Outer `{type, payload}` shape, decoded before the payload is interpreted.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Decode one inbound text frame into a `ClientMessage`.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    if text.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(text.len()));
    }

    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    match envelope.kind.as_str() {
        "join" => decode_payload::<JoinMsg>(envelope.payload).map(ClientMessage::Join),
        "move" => decode_payload::<MoveMsg>(envelope.payload).map(ClientMessage::Move),
        _ => Err(ProtocolError::UnknownMessageType(envelope.kind)),
    }
}

fn decode_payload<T: for<'de> Deserialize<'de>>(
    payload: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Encode a `ServerMessage` as a JSON text frame.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

/// Encode a `ClientMessage` as a JSON text frame.
pub fn encode_client_message(msg: &ClientMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

/// Decode a server frame. Clients and tests only; the server never reads these.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
