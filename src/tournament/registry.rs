//! Process-wide registry of live tournaments

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::TournamentSettings;
use crate::game::{GameError, MatchRegistry, PlayerId, TournamentId};
use crate::store::{GameStore, TournamentRecord};
use crate::ws::hub::Broadcaster;

use super::{Tournament, TournamentStatus};

/// Tournaments keyed by id. Unlike matches, every tournament has an id.
pub struct TournamentRegistry {
    tournaments: DashMap<TournamentId, Tournament>,
    settings: TournamentSettings,
    matches: Arc<MatchRegistry>,
    broadcaster: Arc<dyn Broadcaster>,
    store: GameStore,
}

impl TournamentRegistry {
    pub fn new(
        settings: TournamentSettings,
        matches: Arc<MatchRegistry>,
        broadcaster: Arc<dyn Broadcaster>,
        store: GameStore,
    ) -> Self {
        Self {
            tournaments: DashMap::new(),
            settings,
            matches,
            broadcaster,
            store,
        }
    }

    fn build(&self, id: TournamentId, participants: Vec<PlayerId>) -> Tournament {
        Tournament::new(
            id,
            participants,
            self.settings.clone(),
            self.matches.clone(),
            self.broadcaster.clone(),
            self.store.clone(),
        )
    }

    /// Register a new tournament; fails if the id is taken
    pub fn create(&self, id: TournamentId, participants: Vec<PlayerId>) -> Result<Tournament, GameError> {
        match self.tournaments.entry(id) {
            Entry::Occupied(_) => Err(GameError::DuplicateId(id)),
            Entry::Vacant(slot) => {
                let tournament = self.build(id, participants);
                slot.insert(tournament.clone());
                info!(tournament_id = id, "Tournament created");
                Ok(tournament)
            }
        }
    }

    /// Registered tournament for a stored record, created on first use
    pub fn get_or_create(&self, record: &TournamentRecord) -> Tournament {
        self.tournaments
            .entry(record.id)
            .or_insert_with(|| self.build(record.id, record.user_ids.clone()))
            .clone()
    }

    pub fn get(&self, id: TournamentId) -> Option<Tournament> {
        self.tournaments.get(&id).map(|t| t.value().clone())
    }

    /// Tournaments that have not finished
    pub fn active_tournaments(&self) -> usize {
        self.tournaments
            .iter()
            .filter(|t| t.value().status() != TournamentStatus::Finished)
            .count()
    }

    pub fn len(&self) -> usize {
        self.tournaments.len()
    }
}
