use ulid::Ulid;

use crate::model::{RoomNumber, Stay};

#[derive(Debug)]
pub enum EngineError {
    RoomNotFound(RoomNumber),
    ReservationNotFound(Ulid),
    UserNotFound(Ulid),
    RoomExists(RoomNumber),
    /// Room already has reservations and can't be repriced or resized.
    RoomInUse(RoomNumber),
    Conflict {
        room: RoomNumber,
        stay: Stay,
        existing: Ulid,
    },
    /// Requester doesn't own the reservation.
    Forbidden(Ulid),
    UsernameTaken(String),
    EmailTaken(String),
    InvalidCredentials,
    InvalidInput(String),
    LimitExceeded(&'static str),
    WalError(String),
    Internal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::RoomNotFound(n) => write!(f, "room not found: {n}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::UserNotFound(id) => write!(f, "user not found: {id}"),
            EngineError::RoomExists(n) => write!(f, "room already exists: {n}"),
            EngineError::RoomInUse(n) => {
                write!(f, "room {n} has reservations and cannot be changed")
            }
            EngineError::Conflict { room, stay, existing } => write!(
                f,
                "room {room} is not available from {} to {} (conflicts with reservation {existing})",
                stay.check_in, stay.check_out
            ),
            EngineError::Forbidden(id) => write!(f, "not the owner of reservation {id}"),
            EngineError::UsernameTaken(name) => write!(f, "username already taken: {name}"),
            EngineError::EmailTaken(email) => write!(f, "email already registered: {email}"),
            EngineError::InvalidCredentials => write!(f, "invalid credentials"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
            EngineError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
