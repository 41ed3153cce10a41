pub mod grid;
pub mod net;
pub mod spawn;

/// Stable identity of a user, resolved from a credential token at join time.
pub type UserId = String;

/// Identifier of a space (room) as stored by the external space service.
pub type SpaceId = String;
