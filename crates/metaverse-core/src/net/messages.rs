use serde::{Deserialize, Serialize};

use crate::grid::Position;
use crate::{SpaceId, UserId};

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    Join(JoinMsg),
    Move(MoveMsg),
}

impl ClientMessage {
    /// Wire name of the message, as carried in the `type` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Move(_) => "move",
        }
    }
}

/// Server -> client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent only to the joining connection.
    SpaceJoined(SpaceJoinedMsg),
    /// Broadcast to the room, excluding the joiner.
    UserJoined(UserJoinedMsg),
    /// Broadcast to the room, excluding the mover.
    Movement(MovementMsg),
    /// Sent only to the mover, carrying its unchanged coordinates.
    MovementRejected(MovementMsg),
    /// Broadcast to the room, excluding the departing session.
    UserLeft(UserLeftMsg),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMsg {
    pub space_id: SpaceId,
    pub token: String,
}

/// Target cell of a move request.
///
/// Unknown fields are tolerated: some clients echo their own `userId` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveMsg {
    pub x: i64,
    pub y: i64,
}

impl MoveMsg {
    pub fn target(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceJoinedMsg {
    pub spawn: Position,
    pub users: Vec<OccupantMsg>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupantMsg {
    pub id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoinedMsg {
    pub user_id: UserId,
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementMsg {
    pub x: i64,
    pub y: i64,
}

impl From<Position> for MovementMsg {
    fn from(pos: Position) -> Self {
        Self { x: pos.x, y: pos.y }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeftMsg {
    pub user_id: UserId,
}
