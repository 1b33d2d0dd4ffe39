//! Process-wide registry of live matches

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::GameSettings;
use crate::store::GameStore;
use crate::ws::hub::Broadcaster;

use super::r#match::{GameMatch, MatchSetup, MatchStatus};
use super::{GameError, MatchId};

/// Registry of all persisted matches.
///
/// Locking is per key, so lookups never wait on unrelated creations.
/// Entries are never evicted automatically.
pub struct MatchRegistry {
    matches: DashMap<MatchId, GameMatch>,
    settings: Arc<GameSettings>,
    broadcaster: Arc<dyn Broadcaster>,
    store: GameStore,
}

impl MatchRegistry {
    pub fn new(settings: Arc<GameSettings>, broadcaster: Arc<dyn Broadcaster>, store: GameStore) -> Self {
        Self {
            matches: DashMap::new(),
            settings,
            broadcaster,
            store,
        }
    }

    fn build(&self, setup: MatchSetup) -> GameMatch {
        GameMatch::new(
            setup,
            self.settings.clone(),
            self.broadcaster.clone(),
            self.store.clone(),
        )
    }

    /// Create a match.
    ///
    /// Without an id the match is returned untracked (local play). An id
    /// that is already registered fails with `DuplicateId`.
    pub fn create(&self, setup: MatchSetup) -> Result<GameMatch, GameError> {
        let Some(id) = setup.id else {
            debug!("Created untracked match");
            return Ok(self.build(setup));
        };

        match self.matches.entry(id) {
            Entry::Occupied(_) => Err(GameError::DuplicateId(id)),
            Entry::Vacant(slot) => {
                let game = self.build(setup);
                slot.insert(game.clone());
                info!(match_id = id, "Match created");
                Ok(game)
            }
        }
    }

    /// Return the registered match, creating it if absent. Racing callers
    /// all receive the same instance.
    pub fn get_or_create(&self, setup: MatchSetup) -> GameMatch {
        let Some(id) = setup.id else {
            return self.build(setup);
        };

        self.matches
            .entry(id)
            .or_insert_with(|| {
                info!(match_id = id, "Match created");
                self.build(setup)
            })
            .clone()
    }

    pub fn get(&self, id: MatchId) -> Option<GameMatch> {
        self.matches.get(&id).map(|m| m.value().clone())
    }

    /// Number of registered matches that have not finished
    pub fn active_matches(&self) -> usize {
        self.matches
            .iter()
            .filter(|m| m.value().status() != MatchStatus::Finished)
            .count()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }
}
