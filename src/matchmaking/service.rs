//! Matchmaking service - turns queued players into matches and tournaments

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::QueueSettings;
use crate::game::{GameError, MatchRegistry, MatchSetup, PlayerId};
use crate::store::GameStore;
use crate::tournament::TournamentRegistry;
use crate::ws::hub::Broadcaster;
use crate::ws::protocol::ServerMsg;

use super::queue::{MatchmakingQueue, QueueKind, QueuedPlayer};

/// Players taken off a queue whose match or tournament is still being created
#[derive(Default)]
struct Launching {
    members: HashSet<PlayerId>,
    /// Members whose socket closed before the launch settled
    departed: HashSet<PlayerId>,
}

/// Matchmaking service
pub struct MatchmakingService {
    game_queue: Mutex<MatchmakingQueue>,
    tournament_queue: Mutex<MatchmakingQueue>,
    /// Only touched while both queues are locked
    launching: parking_lot::Mutex<Launching>,
    matches: Arc<MatchRegistry>,
    tournaments: Arc<TournamentRegistry>,
    broadcaster: Arc<dyn Broadcaster>,
    store: GameStore,
}

impl MatchmakingService {
    pub fn new(
        settings: &QueueSettings,
        matches: Arc<MatchRegistry>,
        tournaments: Arc<TournamentRegistry>,
        broadcaster: Arc<dyn Broadcaster>,
        store: GameStore,
    ) -> Self {
        Self {
            game_queue: Mutex::new(MatchmakingQueue::new(settings.match_size)),
            tournament_queue: Mutex::new(MatchmakingQueue::new(settings.tournament_size)),
            launching: parking_lot::Mutex::new(Launching::default()),
            matches,
            tournaments,
            broadcaster,
            store,
        }
    }

    fn queue(&self, kind: QueueKind) -> &Mutex<MatchmakingQueue> {
        match kind {
            QueueKind::Game => &self.game_queue,
            QueueKind::Tournament => &self.tournament_queue,
        }
    }

    /// Both queues, always locked in the same order
    async fn lock_both(&self) -> (MutexGuard<'_, MatchmakingQueue>, MutexGuard<'_, MatchmakingQueue>) {
        let games = self.game_queue.lock().await;
        let tournaments = self.tournament_queue.lock().await;
        (games, tournaments)
    }

    /// Join a queue. A player already waiting in either queue, or in a
    /// group being launched, is left where they are. Once a full group is
    /// waiting it is launched.
    pub async fn enqueue(&self, player_id: PlayerId, kind: QueueKind) {
        let (position, group) = {
            let (mut games, mut tournaments) = self.lock_both().await;
            if games.contains(player_id) || tournaments.contains(player_id) {
                warn!(player_id, ?kind, "Player already queued, ignoring enqueue");
                return;
            }
            if self.launching.lock().members.contains(&player_id) {
                warn!(player_id, ?kind, "Player's group is launching, ignoring enqueue");
                return;
            }

            let queue = match kind {
                QueueKind::Game => &mut *games,
                QueueKind::Tournament => &mut *tournaments,
            };
            queue.enqueue(QueuedPlayer::new(player_id));
            let position = queue.len();
            info!(player_id, ?kind, queue_size = position, "Player joined matchmaking queue");
            let group = queue.try_form_group();
            if let Some(group) = &group {
                self.begin_launch(group);
            }
            (position, group)
        };

        self.notify(player_id, ServerMsg::Queued { kind, position });

        if let Some(group) = group {
            self.launch(kind, group).await;
        }
    }

    /// Call with both queues locked, right after the group left its queue
    fn begin_launch(&self, group: &[QueuedPlayer]) {
        let mut launching = self.launching.lock();
        launching.members.extend(group.iter().map(|p| p.player_id));
    }

    /// Create the match or tournament for a formed group and tell each
    /// member individually.
    async fn launch(&self, kind: QueueKind, group: Vec<QueuedPlayer>) {
        let player_ids: Vec<PlayerId> = group.iter().map(|p| p.player_id).collect();
        let longest_wait = group.first().map(|p| p.wait_time()).unwrap_or_default();
        debug!(?kind, players = ?player_ids, ?longest_wait, "Group formed");

        let outcome = match kind {
            QueueKind::Game => self.create_game(player_ids).await,
            QueueKind::Tournament => self.create_tournament(player_ids).await,
        };
        self.settle_launch(kind, group, outcome).await;
    }

    /// On failure the members still connected go back to the front of the
    /// queue, unless they are already waiting somewhere.
    async fn settle_launch(
        &self,
        kind: QueueKind,
        group: Vec<QueuedPlayer>,
        outcome: Result<ServerMsg, GameError>,
    ) {
        let (mut games, mut tournaments) = self.lock_both().await;
        let departed: HashSet<PlayerId> = {
            let mut launching = self.launching.lock();
            group
                .iter()
                .filter(|p| {
                    launching.members.remove(&p.player_id);
                    launching.departed.remove(&p.player_id)
                })
                .map(|p| p.player_id)
                .collect()
        };

        match outcome {
            Ok(msg) => {
                drop((games, tournaments));
                for player in group {
                    self.notify(player.player_id, msg.clone());
                }
            }
            Err(err) => {
                let returning: Vec<QueuedPlayer> = group
                    .into_iter()
                    .filter(|p| {
                        !departed.contains(&p.player_id)
                            && !games.contains(p.player_id)
                            && !tournaments.contains(p.player_id)
                    })
                    .collect();
                error!(
                    ?kind,
                    requeued = returning.len(),
                    departed = ?departed,
                    error = %err,
                    "Failed to launch group"
                );
                let queue = match kind {
                    QueueKind::Game => &mut *games,
                    QueueKind::Tournament => &mut *tournaments,
                };
                queue.requeue_front(returning);
            }
        }
    }

    async fn create_game(&self, player_ids: Vec<PlayerId>) -> Result<ServerMsg, GameError> {
        let record = self.store.create_match_record(player_ids, None).await?;
        self.matches.create(MatchSetup::from(&record))?;
        info!(match_id = record.id, players = ?record.user_ids, "Created match from queue");
        Ok(ServerMsg::GameFound { game_id: record.id })
    }

    async fn create_tournament(&self, player_ids: Vec<PlayerId>) -> Result<ServerMsg, GameError> {
        let record = self.store.create_tournament_record(player_ids).await?;
        self.tournaments.create(record.id, record.user_ids.clone())?;
        info!(tournament_id = record.id, players = ?record.user_ids, "Created tournament from queue");
        Ok(ServerMsg::TournamentFound {
            tournament_id: record.id,
        })
    }

    /// Remove a disconnected player from whichever queue holds them. A
    /// player whose group is launching is kept out if the launch fails.
    pub async fn dequeue_on_disconnect(&self, player_id: PlayerId) -> bool {
        let (mut games, mut tournaments) = self.lock_both().await;
        if games.dequeue(player_id).or_else(|| tournaments.dequeue(player_id)).is_some() {
            info!(player_id, "Player left matchmaking queue");
            return true;
        }

        let mut launching = self.launching.lock();
        if launching.members.contains(&player_id) {
            launching.departed.insert(player_id);
            info!(player_id, "Player left while their group was launching");
            return true;
        }
        false
    }

    /// Get current queue size
    pub async fn queue_size(&self, kind: QueueKind) -> usize {
        self.queue(kind).lock().await.len()
    }

    #[cfg(test)]
    pub async fn is_queued(&self, player_id: PlayerId) -> bool {
        let (games, tournaments) = self.lock_both().await;
        games.contains(player_id) || tournaments.contains(player_id)
    }

    fn notify(&self, player_id: PlayerId, msg: ServerMsg) {
        if let Err(err) = self.broadcaster.send_to_player(player_id, msg) {
            debug!(player_id, error = %err, "Matchmaking notice not delivered");
        }
    }
}
