//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::game::{MatchId, MatchStatus, PlayerId, TournamentId, Vector2};
use crate::matchmaking::QueueKind;
use crate::store::PlayerScore;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Player is ready for the match or tournament to start
    Ready,

    /// Paddle input. Movement values are "UP", "DOWN" or "NONE".
    Update {
        #[serde(default)]
        movement: Option<String>,
        /// Second paddle in local play
        #[serde(default)]
        p2movement: Option<String>,
    },

    /// Leave the match for good
    Quit,

    Pause,

    Unpause,

    /// Join a matchmaking queue
    Enqueue { kind: QueueKind },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Player-relative match state
    GameState(MatchSnapshot),

    /// Player was placed in a queue
    Queued { kind: QueueKind, position: usize },

    /// A direct or tournament match is ready to join
    GameFound { game_id: MatchId },

    /// Queue formed a tournament
    TournamentFound { tournament_id: TournamentId },

    /// Bracket so far, keyed by round number
    TournamentInfo {
        tournament_id: TournamentId,
        tournament: BTreeMap<u32, Vec<BracketGame>>,
    },

    /// Player advances without playing this round
    TournamentBye {
        tournament_id: TournamentId,
        round: u32,
    },

    TournamentFinished {
        tournament_id: TournamentId,
        winner_id: Option<PlayerId>,
    },

    Error { code: String, message: String },
}

impl ServerMsg {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Snapshot of one match from one player's point of view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub status: MatchStatus,
    /// The receiving player
    pub player: Option<PlayerView>,
    /// The other participant
    pub opponent: Option<PlayerView>,
    pub ball: BallView,
    /// Seconds left in the countdown (only while ready)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub score: u32,
    pub position: Vector2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallView {
    pub position: Vector2,
}

/// One match in a published bracket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketGame {
    pub game_id: MatchId,
    pub user_ids: Vec<PlayerId>,
    #[serde(default)]
    pub winner_id: Option<PlayerId>,
}

/// Read-only match view served over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSummary {
    pub id: Option<MatchId>,
    pub status: MatchStatus,
    pub winner_id: Option<PlayerId>,
    pub scores: Vec<PlayerScore>,
    pub tournament_id: Option<TournamentId>,
    pub round: Option<u32>,
}
