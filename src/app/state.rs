//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::matchmaking::MatchmakingService;
use crate::store::GameStore;
use crate::tournament::TournamentRegistry;
use crate::ws::hub::ConnectionHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<ConnectionHub>,
    pub store: GameStore,
    pub matches: Arc<MatchRegistry>,
    pub tournaments: Arc<TournamentRegistry>,
    pub matchmaking: Arc<MatchmakingService>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Every outbound message goes through the hub
        let hub = Arc::new(ConnectionHub::new());
        let store = GameStore::from_config(&config);

        let matches = Arc::new(MatchRegistry::new(
            Arc::new(config.game.clone()),
            hub.clone(),
            store.clone(),
        ));

        let tournaments = Arc::new(TournamentRegistry::new(
            config.tournament.clone(),
            matches.clone(),
            hub.clone(),
            store.clone(),
        ));

        let matchmaking = Arc::new(MatchmakingService::new(
            &config.queue,
            matches.clone(),
            tournaments.clone(),
            hub.clone(),
            store.clone(),
        ));

        Self {
            config,
            hub,
            store,
            matches,
            tournaments,
            matchmaking,
        }
    }
}
