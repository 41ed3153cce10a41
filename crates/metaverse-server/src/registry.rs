use std::collections::HashMap;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use metaverse_core::grid::Position;
use metaverse_core::net::messages::{
    OccupantMsg, ServerMessage, SpaceJoinedMsg, UserJoinedMsg, UserLeftMsg,
};
use metaverse_core::net::protocol::encode_server_message;
use metaverse_core::{SpaceId, UserId};

/// Per-connection sender for outbound text frames.
/// Bounded so one slow client cannot grow server memory without limit.
pub type MemberSender = mpsc::Sender<Utf8Bytes>;

/// Process-local handle for one WebSocket connection. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A session as seen by the registry: who it is and where to deliver.
#[derive(Debug, Clone)]
pub struct RoomMember {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    sender: MemberSender,
}

impl RoomMember {
    pub fn new(connection_id: ConnectionId, user_id: UserId, sender: MemberSender) -> Self {
        Self {
            connection_id,
            user_id,
            sender,
        }
    }

    fn deliver(&self, frame: &Utf8Bytes, space_id: &str) {
        if let Err(e) = self.sender.try_send(frame.clone()) {
            tracing::debug!(
                connection_id = %self.connection_id, space_id, error = %e,
                "Skipping delivery to slow or closed client"
            );
        }
    }
}

/// Tracks which sessions occupy which space and fans events out to them.
///
/// Every operation runs under one mutex, so membership changes and the
/// broadcasts around them are totally ordered. Delivery is `try_send` into
/// per-member channels and never awaits while the lock is held.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<SpaceId, Vec<RoomMember>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `member` into the space's room. No-op if its connection is
    /// already present.
    pub async fn add_member(&self, space_id: &str, member: RoomMember) {
        let mut rooms = self.rooms.lock().await;
        insert_member(&mut rooms, space_id, member);
    }

    /// Remove a connection from the space's room, deleting the room once it
    /// is empty. Returns whether the connection was a member.
    pub async fn remove_member(&self, space_id: &str, connection_id: ConnectionId) -> bool {
        let mut rooms = self.rooms.lock().await;
        take_member(&mut rooms, space_id, connection_id)
    }

    /// Deliver `msg` to every member of the room except `exclude`.
    pub async fn broadcast(&self, space_id: &str, msg: &ServerMessage, exclude: ConnectionId) {
        let Some(frame) = encode_frame(msg) else {
            return;
        };
        let rooms = self.rooms.lock().await;
        broadcast_locked(&rooms, space_id, &frame, exclude);
    }

    /// Admit `member` to the room in one critical section: snapshot the other
    /// occupants, insert, acknowledge the joiner with `space-joined`, then
    /// announce `user-joined` to everyone else.
    ///
    /// Returns the user ids of the occupants present before the join.
    pub async fn join(&self, space_id: &str, member: RoomMember, spawn: Position) -> Vec<UserId> {
        let mut rooms = self.rooms.lock().await;

        let occupants: Vec<UserId> = rooms
            .get(space_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| m.connection_id != member.connection_id)
                    .map(|m| m.user_id.clone())
                    .collect()
            })
            .unwrap_or_default();

        let ack = ServerMessage::SpaceJoined(SpaceJoinedMsg {
            spawn,
            users: occupants
                .iter()
                .map(|id| OccupantMsg { id: id.clone() })
                .collect(),
        });
        let announce = ServerMessage::UserJoined(UserJoinedMsg {
            user_id: member.user_id.clone(),
            x: spawn.x,
            y: spawn.y,
        });

        let connection_id = member.connection_id;
        if let Some(frame) = encode_frame(&ack) {
            member.deliver(&frame, space_id);
        }
        insert_member(&mut rooms, space_id, member);
        if let Some(frame) = encode_frame(&announce) {
            broadcast_locked(&rooms, space_id, &frame, connection_id);
        }

        occupants
    }

    /// Remove a connection in one critical section: announce `user-left` to
    /// the rest of the room, then drop the membership. Nothing is sent when
    /// the connection was not a member. Returns whether it was.
    pub async fn leave(&self, space_id: &str, connection_id: ConnectionId, user_id: &str) -> bool {
        let mut rooms = self.rooms.lock().await;

        let is_member = rooms
            .get(space_id)
            .is_some_and(|members| members.iter().any(|m| m.connection_id == connection_id));
        if !is_member {
            return false;
        }

        let msg = ServerMessage::UserLeft(UserLeftMsg {
            user_id: user_id.to_string(),
        });
        if let Some(frame) = encode_frame(&msg) {
            broadcast_locked(&rooms, space_id, &frame, connection_id);
        }
        take_member(&mut rooms, space_id, connection_id)
    }

    /// Number of sessions currently in the space's room.
    pub async fn member_count(&self, space_id: &str) -> usize {
        self.rooms.lock().await.get(space_id).map_or(0, Vec::len)
    }

    pub async fn room_exists(&self, space_id: &str) -> bool {
        self.rooms.lock().await.contains_key(space_id)
    }

    /// Returns (active rooms, total occupants).
    pub async fn stats(&self) -> (usize, usize) {
        let rooms = self.rooms.lock().await;
        let occupants = rooms.values().map(Vec::len).sum();
        (rooms.len(), occupants)
    }
}

fn insert_member(rooms: &mut HashMap<SpaceId, Vec<RoomMember>>, space_id: &str, member: RoomMember) {
    let members = rooms.entry(space_id.to_string()).or_default();
    if !members
        .iter()
        .any(|m| m.connection_id == member.connection_id)
    {
        members.push(member);
    }
}

fn take_member(
    rooms: &mut HashMap<SpaceId, Vec<RoomMember>>,
    space_id: &str,
    connection_id: ConnectionId,
) -> bool {
    let Some(members) = rooms.get_mut(space_id) else {
        return false;
    };
    let before = members.len();
    members.retain(|m| m.connection_id != connection_id);
    let removed = members.len() != before;
    if members.is_empty() {
        rooms.remove(space_id);
        tracing::debug!(space_id, "Room emptied and removed");
    }
    removed
}

fn broadcast_locked(
    rooms: &HashMap<SpaceId, Vec<RoomMember>>,
    space_id: &str,
    frame: &Utf8Bytes,
    exclude: ConnectionId,
) {
    if let Some(members) = rooms.get(space_id) {
        for member in members.iter().filter(|m| m.connection_id != exclude) {
            member.deliver(frame, space_id);
        }
    }
}

fn encode_frame(msg: &ServerMessage) -> Option<Utf8Bytes> {
    match encode_server_message(msg) {
        Ok(text) => Some(Utf8Bytes::from(text)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode server message");
            None
        },
    }
}
