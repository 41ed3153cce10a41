use metaverse_core::net::protocol::ProtocolError;

use crate::auth::IdentityError;

/// Conditions that end a connection. The socket is closed without sending
/// an error event.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid credential: {0}")]
    InvalidCredential(#[from] IdentityError),
    #[error("unknown space: {0}")]
    UnknownSpace(String),
    #[error("join received while already joined")]
    AlreadyJoined,
    #[error("message received after close")]
    Closed,
    #[error("inbound rate exceeded before join")]
    RateLimitedBeforeJoin,
    #[error("undecodable message: {0}")]
    Protocol(#[from] ProtocolError),
}
