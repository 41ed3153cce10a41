use axum::extract::ws::Utf8Bytes;

use metaverse_core::grid::Position;
use metaverse_core::net::messages::{ClientMessage, JoinMsg, MoveMsg, MovementMsg, ServerMessage};
use metaverse_core::net::protocol::encode_server_message;
use metaverse_core::{SpaceId, UserId};

use crate::error::SessionError;
use crate::registry::{ConnectionId, MemberSender, RoomMember};
use crate::state::AppState;

/// Where a joined session is and who it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupancy {
    pub user_id: UserId,
    pub space_id: SpaceId,
    pub position: Position,
}

/// Connection lifecycle. Identity, room and position exist only together,
/// inside `Joined`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Joined(Occupancy),
    Closed,
}

/// Server-side state for one connected client.
///
/// Owned by that connection's handler task; only the registry is shared.
pub struct Session {
    connection_id: ConnectionId,
    sender: MemberSender,
    state: SessionState,
    app: AppState,
}

impl Session {
    pub fn new(app: AppState, sender: MemberSender) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            sender,
            state: SessionState::Connecting,
            app,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.state, SessionState::Connecting)
    }

    /// Apply one decoded client message. An `Err` is fatal: the caller must
    /// close the connection.
    pub async fn handle(&mut self, msg: ClientMessage) -> Result<(), SessionError> {
        match msg {
            ClientMessage::Join(join) => self.join(join).await,
            ClientMessage::Move(mv) => {
                self.move_to(mv).await;
                Ok(())
            },
        }
    }

    /// Apply a message that arrived over the inbound rate limit.
    ///
    /// A joined session's move is rejected in place, so the client still gets
    /// its current position back. Before join the connection is closed.
    /// Anything else is handled as usual.
    pub async fn handle_throttled(&mut self, msg: ClientMessage) -> Result<(), SessionError> {
        let position = match &self.state {
            SessionState::Connecting => return Err(SessionError::RateLimitedBeforeJoin),
            SessionState::Joined(occupancy) => Some(occupancy.position),
            SessionState::Closed => None,
        };
        match (position, msg) {
            (Some(position), ClientMessage::Move(mv)) => {
                tracing::debug!(
                    connection_id = %self.connection_id,
                    to = %mv.target(),
                    "Movement rejected: rate limited"
                );
                self.reject_move(position);
                Ok(())
            },
            (_, msg) => self.handle(msg).await,
        }
    }

    async fn join(&mut self, msg: JoinMsg) -> Result<(), SessionError> {
        match self.state {
            SessionState::Connecting => {},
            SessionState::Joined(_) => return Err(SessionError::AlreadyJoined),
            SessionState::Closed => return Err(SessionError::Closed),
        }

        let user_id = self.app.identity.resolve_identity(&msg.token)?;
        let dims = self
            .app
            .spaces
            .lookup_space(&msg.space_id)
            .ok_or_else(|| SessionError::UnknownSpace(msg.space_id.clone()))?;

        let spawn = self.app.spawn.spawn(dims);
        let member = RoomMember::new(self.connection_id, user_id.clone(), self.sender.clone());
        let occupants = self.app.rooms.join(&msg.space_id, member, spawn).await;

        tracing::info!(
            connection_id = %self.connection_id,
            space_id = %msg.space_id,
            user_id = %user_id,
            %spawn,
            occupants = occupants.len(),
            "Session joined space"
        );

        self.state = SessionState::Joined(Occupancy {
            user_id,
            space_id: msg.space_id,
            position: spawn,
        });
        Ok(())
    }

    async fn move_to(&mut self, msg: MoveMsg) {
        let SessionState::Joined(occupancy) = &mut self.state else {
            tracing::debug!(
                connection_id = %self.connection_id,
                "Ignoring move from session that has not joined"
            );
            return;
        };

        let target = msg.target();
        if occupancy.position.is_unit_step_to(target) {
            occupancy.position = target;
            let event = ServerMessage::Movement(MovementMsg::from(target));
            self.app
                .rooms
                .broadcast(&occupancy.space_id, &event, self.connection_id)
                .await;
        } else {
            tracing::debug!(
                connection_id = %self.connection_id,
                from = %occupancy.position,
                to = %target,
                "Movement rejected"
            );
            let position = occupancy.position;
            self.reject_move(position);
        }
    }

    /// Tell this connection its move was refused and where it still stands.
    fn reject_move(&self, position: Position) {
        let event = ServerMessage::MovementRejected(MovementMsg::from(position));
        send_direct(&self.sender, &event, self.connection_id);
    }

    /// End the session. A joined session announces its departure and leaves
    /// its room. Safe to call more than once.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Joined(occupancy) = previous {
            self.app
                .rooms
                .leave(&occupancy.space_id, self.connection_id, &occupancy.user_id)
                .await;
            tracing::info!(
                connection_id = %self.connection_id,
                space_id = %occupancy.space_id,
                user_id = %occupancy.user_id,
                "Session left space"
            );
        }
    }
}

/// Queue an event for this connection only.
fn send_direct(sender: &MemberSender, msg: &ServerMessage, connection_id: ConnectionId) {
    match encode_server_message(msg) {
        Ok(text) => {
            if let Err(e) = sender.try_send(Utf8Bytes::from(text)) {
                tracing::debug!(%connection_id, error = %e, "Dropping direct event");
            }
        },
        Err(e) => tracing::warn!(%connection_id, error = %e, "Failed to encode direct event"),
    }
}
