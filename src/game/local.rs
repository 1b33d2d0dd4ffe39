//! Two players on one connection

use super::r#match::{GameMatch, MatchSetup, MatchStatus};
use super::registry::MatchRegistry;
use super::{GameError, Movement, PlayerId, GHOST_PLAYER_ID};

/// Local match driven by a single client.
///
/// The host controls the right paddle with `movement`; the same client
/// controls the ghost player on the left paddle with `p2movement`.
#[derive(Clone)]
pub struct LocalMatch {
    host: PlayerId,
    game: GameMatch,
}

impl LocalMatch {
    pub fn create(registry: &MatchRegistry, host: PlayerId) -> Result<Self, GameError> {
        let game = registry.create(MatchSetup::local())?;
        game.add_player(host)?;
        game.add_player(GHOST_PLAYER_ID)?;
        Ok(Self { host, game })
    }

    pub fn game(&self) -> &GameMatch {
        &self.game
    }

    /// Apply one `update` message. Either stream may be absent.
    pub fn submit(&self, movement: Option<&str>, p2movement: Option<&str>) -> Result<(), GameError> {
        let host = movement.map(str::parse::<Movement>).transpose()?;
        let ghost = p2movement.map(str::parse::<Movement>).transpose()?;

        if let Some(movement) = host {
            self.game.submit_input(self.host, movement);
        }
        if let Some(movement) = ghost {
            self.game.submit_input(GHOST_PLAYER_ID, movement);
        }
        Ok(())
    }

    /// Both paddles belong to the host, so one `ready` starts the match
    pub fn ready(&self) -> bool {
        self.game.mark_ready(GHOST_PLAYER_ID);
        self.game.mark_ready(self.host)
    }

    pub fn pause(&self) -> bool {
        self.game.pause(self.host)
    }

    pub fn unpause(&self) -> bool {
        self.game.unpause(Some(self.host))
    }

    /// End the match without a winner
    pub async fn quit(&self) {
        if self.game.status() == MatchStatus::Finished {
            return;
        }
        self.game.remove_player(GHOST_PLAYER_ID);
        self.game.quit(self.host).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameSettings;
    use crate::store::GameStore;
    use crate::ws::hub::{ConnectionHub, RecordingBroadcaster};
    use crate::ws::protocol::ServerMsg;
    use std::sync::Arc;
    use std::time::Duration;

    fn registry(broadcaster: Arc<RecordingBroadcaster>) -> MatchRegistry {
        MatchRegistry::new(Arc::new(GameSettings::default()), broadcaster, GameStore::memory())
    }

    #[test]
    fn bad_second_stream_rejects_whole_update() {
        let local = LocalMatch::create(&registry(Default::default()), 5).unwrap();
        let err = local.submit(Some("UP"), Some("JUMP")).unwrap_err();
        assert!(matches!(err, GameError::InvalidInput(_)));
    }

    #[test]
    fn one_ready_starts_local_play() {
        let local = LocalMatch::create(&registry(Default::default()), 5).unwrap();
        assert!(local.ready());
    }

    #[tokio::test(start_paused = true)]
    async fn quit_ends_without_winner() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let local = LocalMatch::create(&registry(broadcaster.clone()), 5).unwrap();
        assert!(local.ready());
        tokio::spawn(local.game().clone().start());
        tokio::time::sleep(Duration::from_millis(500)).await;

        local.quit().await;

        assert_eq!(local.game().status(), MatchStatus::Finished);
        assert_eq!(local.game().winner(), None);
        // The ghost never receives snapshots
        assert!(broadcaster.messages_for(GHOST_PLAYER_ID).is_empty());
        assert!(matches!(
            broadcaster.messages_for(5).pop(),
            Some(ServerMsg::GameState(ref s)) if s.status == MatchStatus::Finished
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_reach_only_the_socket_playing_the_match() {
        let hub = Arc::new(ConnectionHub::new());
        let registry = MatchRegistry::new(
            Arc::new(GameSettings::default()),
            hub.clone(),
            GameStore::memory(),
        );
        let (socket_a, mut rx_a) = hub.register(5);
        let (socket_b, mut rx_b) = hub.register(5);

        let first = LocalMatch::create(&registry, 5).unwrap();
        let second = LocalMatch::create(&registry, 5).unwrap();
        assert_ne!(first.game().group(), second.game().group());
        hub.join_group(first.game().group(), &socket_a);
        hub.join_group(second.game().group(), &socket_b);

        assert!(first.ready());
        tokio::spawn(first.game().clone().start());
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(matches!(rx_a.try_recv(), Ok(ServerMsg::GameState(_))));
        assert!(rx_b.try_recv().is_err());
        assert_eq!(second.game().status(), MatchStatus::Waiting);
    }
}
