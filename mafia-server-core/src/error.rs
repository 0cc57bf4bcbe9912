//! Error taxonomy (spec §7). One variant per user-visible cause; intent
//! failures are returned via the correlated ack or an `error` event and
//! never tear down the room.

use thiserror::Error;

use mafia_protocol::Phase;
use mafia_protocol::PlayerId;
use mafia_protocol::Role;
use mafia_protocol::RoomCode;
use mafia_protocol::SessionToken;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MafiaGameError {
    #[error("room '{0}' not found")]
    RoomNotFound(RoomCode),
    #[error("room '{0}' is full")]
    RoomFull(RoomCode),
    #[error("room '{0}' has a game in progress")]
    RoomInGame(RoomCode),
    #[error("room name must be 1-30 characters")]
    InvalidName,
    #[error("'{0}' is not authorized to perform this action")]
    NotAuthorized(PlayerId),
    #[error("action not valid during phase {0:?}")]
    InvalidPhase(Phase),
    #[error("'{0:?}' is not a valid target for this action")]
    InvalidTarget(Option<PlayerId>),
    #[error("not enough players to start: need {needed}, have {have}")]
    NotEnoughPlayers { needed: usize, have: usize },
    #[error("too many players: max {max}, have {have}")]
    TooManyPlayers { max: usize, have: usize },
    #[error("no game is in progress in room '{0}'")]
    NoGameInProgress(RoomCode),
    #[error("a game is already in progress in room '{0}'")]
    GameInProgress(RoomCode),
    #[error("player '{0}' is not alive")]
    PlayerNotAlive(PlayerId),
    #[error("'{0:?}' does not hold a role eligible to act in this phase")]
    RoleNotEligible(Role),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("chat content must be 1-500 characters after trimming")]
    InvalidChatContent,
    #[error("invalid session token provided '{0}'")]
    InvalidSessionToken(SessionToken),
    #[error("invalid connection credential")]
    InvalidCredential,
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl MafiaGameError {
    /// Stable machine-readable code for the wire-level `error`/ack payload.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound(_) => "ROOM_NOT_FOUND",
            Self::RoomFull(_) => "ROOM_FULL",
            Self::RoomInGame(_) => "ROOM_IN_GAME",
            Self::InvalidName => "INVALID_NAME",
            Self::NotAuthorized(_) => "NOT_AUTHORIZED",
            Self::InvalidPhase(_) => "INVALID_PHASE",
            Self::InvalidTarget(_) => "INVALID_TARGET",
            Self::NotEnoughPlayers { .. } => "NOT_ENOUGH_PLAYERS",
            Self::TooManyPlayers { .. } => "TOO_MANY_PLAYERS",
            Self::NoGameInProgress(_) => "INVALID_PHASE",
            Self::GameInProgress(_) => "ROOM_IN_GAME",
            Self::PlayerNotAlive(_) => "INVALID_TARGET",
            Self::RoleNotEligible(_) => "INVALID_PHASE",
            Self::RateLimited => "RATE_LIMITED",
            Self::InvalidChatContent => "INVALID_TARGET",
            Self::InvalidSessionToken(_) => "NOT_AUTHORIZED",
            Self::InvalidCredential => "NOT_AUTHORIZED",
            Self::Internal(_) => "INTERNAL",
        }
    }
}
