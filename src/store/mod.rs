//! Persistence for match and tournament records

pub mod memory;
pub mod records;
pub mod rest;

pub use memory::MemoryStore;
pub use records::{MatchRecord, MatchResult, PlayerScore, PlayerStats, TournamentRecord};
pub use rest::RestStore;

use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::game::{MatchId, PlayerId, TournamentId, TournamentSlot};
use crate::tournament::TournamentStatus;

/// Record store backing matches, tournaments and stats.
///
/// Failures never roll back in-memory game state; callers log them.
#[derive(Clone)]
pub enum GameStore {
    Memory(Arc<MemoryStore>),
    Rest(RestStore),
}

impl GameStore {
    pub fn memory() -> Self {
        GameStore::Memory(Arc::new(MemoryStore::new()))
    }

    /// REST store when `STORE_URL` is set, in-memory otherwise
    pub fn from_config(config: &Config) -> Self {
        match &config.store_url {
            Some(url) => {
                info!(url = %url, "Using REST record store");
                GameStore::Rest(RestStore::new(
                    url,
                    config.store_api_key.as_deref().unwrap_or_default(),
                ))
            }
            None => {
                info!("Using in-memory record store");
                Self::memory()
            }
        }
    }

    pub async fn create_match_record(
        &self,
        user_ids: Vec<PlayerId>,
        tournament: Option<TournamentSlot>,
    ) -> Result<MatchRecord, StoreError> {
        match self {
            GameStore::Memory(store) => store.create_match_record(user_ids, tournament),
            GameStore::Rest(store) => store.create_match_record(user_ids, tournament).await,
        }
    }

    pub async fn create_tournament_record(
        &self,
        user_ids: Vec<PlayerId>,
    ) -> Result<TournamentRecord, StoreError> {
        match self {
            GameStore::Memory(store) => store.create_tournament_record(user_ids),
            GameStore::Rest(store) => store.create_tournament_record(user_ids).await,
        }
    }

    pub async fn load_match(&self, id: MatchId) -> Result<MatchRecord, StoreError> {
        match self {
            GameStore::Memory(store) => store.load_match(id),
            GameStore::Rest(store) => store.load_match(id).await,
        }
    }

    pub async fn load_tournament(&self, id: TournamentId) -> Result<TournamentRecord, StoreError> {
        match self {
            GameStore::Memory(store) => store.load_tournament(id),
            GameStore::Rest(store) => store.load_tournament(id).await,
        }
    }

    pub async fn save_match_result(&self, id: MatchId, result: &MatchResult) -> Result<(), StoreError> {
        match self {
            GameStore::Memory(store) => store.save_match_result(id, result),
            GameStore::Rest(store) => store.save_match_result(id, result).await,
        }
    }

    pub async fn save_tournament_result(
        &self,
        id: TournamentId,
        status: TournamentStatus,
        winner_id: Option<PlayerId>,
    ) -> Result<(), StoreError> {
        match self {
            GameStore::Memory(store) => store.save_tournament_result(id, status, winner_id),
            GameStore::Rest(store) => store.save_tournament_result(id, status, winner_id).await,
        }
    }

    pub async fn player_stats(&self, player_id: PlayerId) -> Result<PlayerStats, StoreError> {
        match self {
            GameStore::Memory(store) => Ok(store.player_stats(player_id)),
            GameStore::Rest(store) => store.player_stats(player_id).await,
        }
    }

    /// Make every write fail, for exercising error paths
    #[cfg(test)]
    pub fn fail_writes(&self, fail: bool) {
        if let GameStore::Memory(store) = self {
            store.set_fail_writes(fail);
        }
    }
}

/// Record store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),

    #[error("No row returned from insert")]
    NoRowReturned,

    #[error("Record store unavailable")]
    Unavailable,
}
