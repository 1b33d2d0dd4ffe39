//! In-process record store, used when no REST store is configured

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::game::{MatchId, MatchStatus, PlayerId, TournamentId, TournamentSlot};
use crate::tournament::TournamentStatus;

use super::records::{MatchRecord, MatchResult, PlayerStats, TournamentRecord};
use super::StoreError;

pub struct MemoryStore {
    next_match_id: AtomicU64,
    next_tournament_id: AtomicU64,
    matches: DashMap<MatchId, MatchRecord>,
    tournaments: DashMap<TournamentId, TournamentRecord>,
    /// When set every write fails with `Unavailable`
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_match_id: AtomicU64::new(1),
            next_tournament_id: AtomicU64::new(1),
            matches: DashMap::new(),
            tournaments: DashMap::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    pub fn create_match_record(
        &self,
        user_ids: Vec<PlayerId>,
        tournament: Option<TournamentSlot>,
    ) -> Result<MatchRecord, StoreError> {
        self.check_writable()?;
        let record = MatchRecord {
            id: self.next_match_id.fetch_add(1, Ordering::Relaxed),
            user_ids,
            status: MatchStatus::Waiting,
            winner_id: None,
            tournament_id: tournament.map(|t| t.tournament_id),
            tournament_round: tournament.map(|t| t.round),
            scores: Vec::new(),
            created_at: Utc::now(),
        };
        self.matches.insert(record.id, record.clone());
        Ok(record)
    }

    pub fn create_tournament_record(&self, user_ids: Vec<PlayerId>) -> Result<TournamentRecord, StoreError> {
        self.check_writable()?;
        let record = TournamentRecord {
            id: self.next_tournament_id.fetch_add(1, Ordering::Relaxed),
            user_ids,
            status: TournamentStatus::Waiting,
            winner_id: None,
            created_at: Utc::now(),
        };
        self.tournaments.insert(record.id, record.clone());
        Ok(record)
    }

    pub fn load_match(&self, id: MatchId) -> Result<MatchRecord, StoreError> {
        self.matches
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("game {id}")))
    }

    pub fn load_tournament(&self, id: TournamentId) -> Result<TournamentRecord, StoreError> {
        self.tournaments
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("tournament {id}")))
    }

    pub fn save_match_result(&self, id: MatchId, result: &MatchResult) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut record = self
            .matches
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("game {id}")))?;
        record.status = MatchStatus::Finished;
        record.winner_id = result.winner_id;
        record.scores = result.scores.clone();
        Ok(())
    }

    pub fn save_tournament_result(
        &self,
        id: TournamentId,
        status: TournamentStatus,
        winner_id: Option<PlayerId>,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut record = self
            .tournaments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("tournament {id}")))?;
        record.status = status;
        record.winner_id = winner_id;
        Ok(())
    }

    pub fn player_stats(&self, player_id: PlayerId) -> PlayerStats {
        let records: Vec<MatchRecord> = self.matches.iter().map(|r| r.value().clone()).collect();
        PlayerStats::tally(player_id, &records)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_allocated_sequentially() {
        let store = MemoryStore::new();
        let first = store.create_match_record(vec![1, 2], None).unwrap();
        let second = store.create_match_record(vec![3, 4], None).unwrap();
        assert_eq!(second.id, first.id + 1);
        assert_eq!(first.status, MatchStatus::Waiting);
    }

    #[test]
    fn saving_result_finishes_record() {
        let store = MemoryStore::new();
        let record = store.create_match_record(vec![1, 2], None).unwrap();
        let result = MatchResult {
            winner_id: Some(2),
            scores: vec![],
        };
        store.save_match_result(record.id, &result).unwrap();

        let loaded = store.load_match(record.id).unwrap();
        assert_eq!(loaded.status, MatchStatus::Finished);
        assert_eq!(loaded.winner_id, Some(2));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(store.load_match(99), Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.load_tournament(99),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn stats_count_only_finished_games() {
        let store = MemoryStore::new();
        for winner in [1, 1, 2] {
            let record = store.create_match_record(vec![1, 2], None).unwrap();
            let result = MatchResult {
                winner_id: Some(winner),
                scores: vec![],
            };
            store.save_match_result(record.id, &result).unwrap();
        }
        store.create_match_record(vec![1, 2], None).unwrap();

        let stats = store.player_stats(1);
        assert_eq!(stats.total_games, 3);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.loses, 1);
    }

    #[test]
    fn injected_failure_blocks_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.create_match_record(vec![1, 2], None),
            Err(StoreError::Unavailable)
        ));
    }
}
