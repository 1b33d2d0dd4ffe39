//! Persisted match and tournament rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::{MatchId, MatchStatus, PlayerId, TournamentId};
use crate::tournament::TournamentStatus;

/// Row in the games table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub user_ids: Vec<PlayerId>,
    pub status: MatchStatus,
    pub winner_id: Option<PlayerId>,
    pub tournament_id: Option<TournamentId>,
    pub tournament_round: Option<u32>,
    #[serde(default)]
    pub scores: Vec<PlayerScore>,
    pub created_at: DateTime<Utc>,
}

/// New game row for insertion
#[derive(Debug, Clone, Serialize)]
pub struct NewMatchRecord {
    pub user_ids: Vec<PlayerId>,
    pub status: MatchStatus,
    pub tournament_id: Option<TournamentId>,
    pub tournament_round: Option<u32>,
}

/// Row in the tournaments table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentRecord {
    pub id: TournamentId,
    pub user_ids: Vec<PlayerId>,
    pub status: TournamentStatus,
    pub winner_id: Option<PlayerId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewTournamentRecord {
    pub user_ids: Vec<PlayerId>,
    pub status: TournamentStatus,
}

/// Final outcome of one match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub winner_id: Option<PlayerId>,
    pub scores: Vec<PlayerScore>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerScore {
    pub player_id: PlayerId,
    pub score: u32,
}

/// Win/loss totals over finished matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub player_id: PlayerId,
    pub total_games: u32,
    pub wins: u32,
    pub loses: u32,
}

impl PlayerStats {
    /// Tally finished matches the player took part in
    pub fn tally<'a>(player_id: PlayerId, records: impl IntoIterator<Item = &'a MatchRecord>) -> Self {
        let mut stats = Self {
            player_id,
            total_games: 0,
            wins: 0,
            loses: 0,
        };

        for record in records {
            if record.status != MatchStatus::Finished || !record.user_ids.contains(&player_id) {
                continue;
            }
            stats.total_games += 1;
            match record.winner_id {
                Some(winner) if winner == player_id => stats.wins += 1,
                Some(_) => stats.loses += 1,
                None => {}
            }
        }

        stats
    }
}
