//! Game simulation modules

pub mod ball;
pub mod geometry;
pub mod local;
pub mod r#match;
pub mod player;
pub mod registry;
pub mod snapshot;
pub mod vector;

pub use local::LocalMatch;
pub use player::{Movement, Player, Side};
pub use r#match::{GameMatch, MatchSetup, MatchStatus, TournamentSlot};
pub use registry::MatchRegistry;
pub use vector::Vector2;

use crate::store::StoreError;

/// Verified player identity supplied by the transport layer
pub type PlayerId = u64;
/// Persistent match identifier
pub type MatchId = u64;
/// Persistent tournament identifier
pub type TournamentId = u64;

/// Synthetic second player used by single-device local play
pub const GHOST_PLAYER_ID: PlayerId = 0;

/// Paddle input queued for the match loop
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub player_id: PlayerId,
    pub movement: Movement,
    pub received_at: u64,
}

/// Errors surfaced by match, registry and tournament operations
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Invalid movement: {0}")]
    InvalidInput(String),

    #[error("Match is full")]
    MatchFull,

    #[error("Match has already finished")]
    MatchFinished,

    #[error("Player {0} is not a participant")]
    NotParticipant(PlayerId),

    #[error("Duplicate id: {0}")]
    DuplicateId(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Dependency unavailable: {0}")]
    TransientDependency(String),
}

impl GameError {
    /// Short machine-readable code used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            GameError::InvalidInput(_) => "invalid_input",
            GameError::MatchFull => "match_full",
            GameError::MatchFinished => "match_finished",
            GameError::NotParticipant(_) => "not_participant",
            GameError::DuplicateId(_) => "duplicate_id",
            GameError::NotFound(_) => "not_found",
            GameError::TransientDependency(_) => "unavailable",
        }
    }
}

impl From<StoreError> for GameError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => GameError::NotFound(what),
            other => GameError::TransientDependency(other.to_string()),
        }
    }
}
