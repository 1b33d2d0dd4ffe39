//! Single-elimination tournaments built from ordinary matches

pub mod registry;

pub use registry::TournamentRegistry;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::TournamentSettings;
use crate::game::{
    GameMatch, MatchRegistry, MatchSetup, MatchStatus, PlayerId, TournamentId, TournamentSlot,
};
use crate::store::{GameStore, MatchRecord};
use crate::ws::hub::Broadcaster;
use crate::ws::protocol::{BracketGame, ServerMsg};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    Waiting,
    Started,
    Finished,
}

/// Pair players index-wise. A trailing odd player gets a bye.
pub fn pair_players(players: &[PlayerId]) -> (Vec<(PlayerId, PlayerId)>, Option<PlayerId>) {
    let mut pairs = Vec::with_capacity(players.len() / 2);
    let mut chunks = players.chunks_exact(2);
    for pair in &mut chunks {
        pairs.push((pair[0], pair[1]));
    }
    (pairs, chunks.remainder().first().copied())
}

/// Rounds needed to reduce `players` to one, i.e. ceil(log2 n)
pub fn expected_rounds(players: usize) -> u32 {
    players.max(1).next_power_of_two().trailing_zeros()
}

struct TournamentState {
    status: TournamentStatus,
    ready: HashSet<PlayerId>,
    rounds: BTreeMap<u32, Vec<GameMatch>>,
    byes: BTreeMap<u32, PlayerId>,
    champion: Option<PlayerId>,
}

struct TournamentInner {
    id: TournamentId,
    participants: Vec<PlayerId>,
    settings: TournamentSettings,
    state: Mutex<TournamentState>,
    matches: Arc<MatchRegistry>,
    broadcaster: Arc<dyn Broadcaster>,
    store: GameStore,
}

/// Shared handle to one tournament.
///
/// The task running [`Tournament::start`] drives the bracket; matches are
/// only observed through their public accessors.
#[derive(Clone)]
pub struct Tournament {
    inner: Arc<TournamentInner>,
}

impl Tournament {
    pub fn new(
        id: TournamentId,
        participants: Vec<PlayerId>,
        settings: TournamentSettings,
        matches: Arc<MatchRegistry>,
        broadcaster: Arc<dyn Broadcaster>,
        store: GameStore,
    ) -> Self {
        Self {
            inner: Arc::new(TournamentInner {
                id,
                participants,
                settings,
                state: Mutex::new(TournamentState {
                    status: TournamentStatus::Waiting,
                    ready: HashSet::new(),
                    rounds: BTreeMap::new(),
                    byes: BTreeMap::new(),
                    champion: None,
                }),
                matches,
                broadcaster,
                store,
            }),
        }
    }

    pub fn id(&self) -> TournamentId {
        self.inner.id
    }

    pub fn participants(&self) -> &[PlayerId] {
        &self.inner.participants
    }

    pub fn status(&self) -> TournamentStatus {
        self.inner.state.lock().status
    }

    pub fn champion(&self) -> Option<PlayerId> {
        self.inner.state.lock().champion
    }

    /// Broadcast group for everyone following this tournament
    pub fn group(&self) -> String {
        format!("tournament_{}", self.inner.id)
    }

    /// Record a participant as ready. Returns true once everyone is.
    pub fn mark_ready(&self, player_id: PlayerId) -> bool {
        if !self.inner.participants.contains(&player_id) {
            return false;
        }
        let mut state = self.inner.state.lock();
        state.ready.insert(player_id);
        state.status == TournamentStatus::Waiting
            && self
                .inner
                .participants
                .iter()
                .all(|id| state.ready.contains(id))
    }

    #[cfg(test)]
    pub fn round_matches(&self, round: u32) -> Vec<GameMatch> {
        self.inner
            .state
            .lock()
            .rounds
            .get(&round)
            .cloned()
            .unwrap_or_default()
    }

    /// Player who advanced from `round` without playing
    pub fn bye(&self, round: u32) -> Option<PlayerId> {
        self.inner.state.lock().byes.get(&round).copied()
    }

    /// Bracket so far, keyed by round
    pub fn bracket(&self) -> BTreeMap<u32, Vec<BracketGame>> {
        let state = self.inner.state.lock();
        state
            .rounds
            .iter()
            .map(|(round, games)| {
                let games = games
                    .iter()
                    .map(|game| BracketGame {
                        game_id: game.id().unwrap_or_default(),
                        user_ids: game.participants().to_vec(),
                        winner_id: game.winner(),
                    })
                    .collect();
                (*round, games)
            })
            .collect()
    }

    /// Run the bracket until one player remains.
    ///
    /// A no-op unless the tournament is waiting.
    pub async fn start(self) {
        if !self.claim_start() {
            debug!(tournament_id = self.inner.id, "Tournament already started");
            return;
        }

        let mut players = self.inner.participants.clone();
        info!(
            tournament_id = self.inner.id,
            players = players.len(),
            rounds = expected_rounds(players.len()),
            "Tournament started"
        );

        let mut round = 1;
        while players.len() > 1 {
            let (pairs, bye) = pair_players(&players);

            let Some(games) = self.create_round(round, &pairs).await else {
                error!(tournament_id = self.inner.id, round, "Could not create round, abandoning tournament");
                self.finish(None).await;
                return;
            };

            {
                let mut state = self.inner.state.lock();
                state.rounds.insert(round, games.clone());
                if let Some(player_id) = bye {
                    state.byes.insert(round, player_id);
                }
            }

            self.publish(ServerMsg::TournamentInfo {
                tournament_id: self.inner.id,
                tournament: self.bracket(),
            });
            if let Some(player_id) = bye {
                info!(tournament_id = self.inner.id, round, player_id, "Bye");
                self.notify(
                    player_id,
                    ServerMsg::TournamentBye {
                        tournament_id: self.inner.id,
                        round,
                    },
                );
            }

            // Let clients read the bracket before the matches open
            sleep(self.inner.settings.grace_period).await;

            for game in &games {
                let Some(game_id) = game.id() else { continue };
                for player_id in game.participants() {
                    self.notify(*player_id, ServerMsg::GameFound { game_id });
                }
            }

            players = self.wait_for_round(&games).await;
            players.extend(bye);
            info!(tournament_id = self.inner.id, round, advancing = ?players, "Round finished");
            round += 1;
        }

        self.finish(players.first().copied()).await;
    }

    fn claim_start(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.status != TournamentStatus::Waiting || self.inner.participants.len() < 2 {
            return false;
        }
        state.status = TournamentStatus::Started;
        true
    }

    async fn create_round(&self, round: u32, pairs: &[(PlayerId, PlayerId)]) -> Option<Vec<GameMatch>> {
        let slot = TournamentSlot {
            tournament_id: self.inner.id,
            round,
        };

        let mut games = Vec::with_capacity(pairs.len());
        for &(first, second) in pairs {
            let record = self.create_record(vec![first, second], slot).await?;
            games.push(self.inner.matches.get_or_create(MatchSetup::from(&record)));
        }
        Some(games)
    }

    async fn create_record(&self, user_ids: Vec<PlayerId>, slot: TournamentSlot) -> Option<MatchRecord> {
        let attempts = self.inner.settings.round_create_attempts;
        for attempt in 1..=attempts {
            match self
                .inner
                .store
                .create_match_record(user_ids.clone(), Some(slot))
                .await
            {
                Ok(record) => return Some(record),
                Err(err) => {
                    warn!(
                        tournament_id = self.inner.id,
                        round = slot.round,
                        attempt,
                        error = %err,
                        "Failed to create tournament match"
                    );
                    if attempt < attempts {
                        sleep(self.inner.settings.round_poll_interval).await;
                    }
                }
            }
        }
        None
    }

    /// Poll until every match of the round is finished, then return the
    /// distinct winners in bracket order.
    async fn wait_for_round(&self, games: &[GameMatch]) -> Vec<PlayerId> {
        let mut ticker = interval(self.inner.settings.round_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if games.iter().all(|g| g.status() == MatchStatus::Finished) {
                break;
            }
        }

        let mut winners = Vec::with_capacity(games.len());
        for winner in games.iter().filter_map(GameMatch::winner) {
            if !winners.contains(&winner) {
                winners.push(winner);
            }
        }
        winners
    }

    async fn finish(&self, champion: Option<PlayerId>) {
        {
            let mut state = self.inner.state.lock();
            state.status = TournamentStatus::Finished;
            state.champion = champion;
        }
        info!(tournament_id = self.inner.id, ?champion, "Tournament finished");

        if let Err(err) = self
            .inner
            .store
            .save_tournament_result(self.inner.id, TournamentStatus::Finished, champion)
            .await
        {
            error!(tournament_id = self.inner.id, error = %err, "Failed to save tournament result");
        }

        self.publish(ServerMsg::TournamentFinished {
            tournament_id: self.inner.id,
            winner_id: champion,
        });
    }

    fn publish(&self, msg: ServerMsg) {
        if let Err(err) = self.inner.broadcaster.send_to_group(&self.group(), msg) {
            debug!(tournament_id = self.inner.id, error = %err, "Bracket update not delivered");
        }
    }

    fn notify(&self, player_id: PlayerId, msg: ServerMsg) {
        if let Err(err) = self.inner.broadcaster.send_to_player(player_id, msg) {
            debug!(tournament_id = self.inner.id, player_id, error = %err, "Tournament notice not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameSettings;
    use crate::ws::hub::RecordingBroadcaster;
    use std::time::Duration;

    struct Harness {
        tournament: Tournament,
        broadcaster: Arc<RecordingBroadcaster>,
        store: GameStore,
    }

    async fn harness(players: Vec<PlayerId>) -> Harness {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let store = GameStore::memory();
        let matches = Arc::new(MatchRegistry::new(
            Arc::new(GameSettings::default()),
            broadcaster.clone(),
            store.clone(),
        ));
        let record = store.create_tournament_record(players.clone()).await.unwrap();
        let tournament = Tournament::new(
            record.id,
            players,
            TournamentSettings::default(),
            matches,
            broadcaster.clone(),
            store.clone(),
        );
        Harness {
            tournament,
            broadcaster,
            store,
        }
    }

    /// Play out a match by having the second seat walk away
    async fn first_seat_wins(game: &GameMatch) {
        let seats = game.participants().to_vec();
        game.add_player(seats[0]).unwrap();
        game.add_player(seats[1]).unwrap();
        game.quit(seats[1]).await;
    }

    fn game_found_count(broadcaster: &RecordingBroadcaster, player_id: PlayerId) -> usize {
        broadcaster
            .messages_for(player_id)
            .iter()
            .filter(|m| matches!(m, ServerMsg::GameFound { .. }))
            .count()
    }

    #[test]
    fn pairing_is_index_wise_with_trailing_bye() {
        assert_eq!(pair_players(&[1, 2, 3, 4]), (vec![(1, 2), (3, 4)], None));
        assert_eq!(pair_players(&[1, 2, 3]), (vec![(1, 2)], Some(3)));
        assert_eq!(pair_players(&[5]), (vec![], Some(5)));
    }

    #[test]
    fn expected_rounds_is_ceil_log2() {
        assert_eq!(expected_rounds(2), 1);
        assert_eq!(expected_rounds(3), 2);
        assert_eq!(expected_rounds(4), 2);
        assert_eq!(expected_rounds(5), 3);
    }

    #[tokio::test]
    async fn starts_only_when_everyone_is_ready() {
        let h = harness(vec![1, 2, 3, 4]).await;
        assert!(!h.tournament.mark_ready(9));
        for player_id in 1..4 {
            assert!(!h.tournament.mark_ready(player_id));
        }
        assert!(h.tournament.mark_ready(4));
    }

    #[tokio::test(start_paused = true)]
    async fn four_players_play_two_rounds_to_one_champion() {
        let h = harness(vec![1, 2, 3, 4]).await;
        tokio::spawn(h.tournament.clone().start());

        sleep(Duration::from_secs(6)).await;
        let first_round = h.tournament.round_matches(1);
        assert_eq!(first_round.len(), 2);
        assert_eq!(game_found_count(&h.broadcaster, 1), 1);
        for game in &first_round {
            assert_eq!(game.tournament().map(|t| t.round), Some(1));
            first_seat_wins(game).await;
        }

        sleep(Duration::from_secs(7)).await;
        let final_round = h.tournament.round_matches(2);
        assert_eq!(final_round.len(), 1);
        assert_eq!(final_round[0].participants(), &[1, 3]);
        first_seat_wins(&final_round[0]).await;

        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.tournament.status(), TournamentStatus::Finished);
        assert_eq!(h.tournament.champion(), Some(1));
        assert!(h.tournament.round_matches(3).is_empty());
        assert_eq!(game_found_count(&h.broadcaster, 1), 2);
        assert_eq!(game_found_count(&h.broadcaster, 2), 1);

        let saved = h.store.load_tournament(h.tournament.id()).await.unwrap();
        assert_eq!(saved.status, TournamentStatus::Finished);
        assert_eq!(saved.winner_id, Some(1));

        let finished = h
            .broadcaster
            .group_messages(&h.tournament.group())
            .into_iter()
            .filter(|m| matches!(m, ServerMsg::TournamentFinished { winner_id: Some(1), .. }))
            .count();
        assert_eq!(finished, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn odd_player_gets_a_bye_and_advances() {
        let h = harness(vec![1, 2, 3]).await;
        tokio::spawn(h.tournament.clone().start());

        sleep(Duration::from_secs(6)).await;
        let first_round = h.tournament.round_matches(1);
        assert_eq!(first_round.len(), 1);
        assert_eq!(h.tournament.bye(1), Some(3));
        assert!(h
            .broadcaster
            .messages_for(3)
            .iter()
            .any(|m| matches!(m, ServerMsg::TournamentBye { round: 1, .. })));
        first_seat_wins(&first_round[0]).await;

        sleep(Duration::from_secs(7)).await;
        let final_round = h.tournament.round_matches(2);
        assert_eq!(final_round[0].participants(), &[1, 3]);
        first_seat_wins(&final_round[0]).await;

        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.tournament.champion(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn bracket_is_published_to_the_group() {
        let h = harness(vec![1, 2]).await;
        tokio::spawn(h.tournament.clone().start());
        sleep(Duration::from_secs(1)).await;

        let published = h.broadcaster.group_messages(&h.tournament.group());
        match published.first() {
            Some(ServerMsg::TournamentInfo { tournament, .. }) => {
                assert_eq!(tournament[&1].len(), 1);
                assert_eq!(tournament[&1][0].user_ids, vec![1, 2]);
            }
            other => panic!("expected bracket, got {other:?}"),
        }
        // Matches are announced only after the grace period
        assert_eq!(game_found_count(&h.broadcaster, 1), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_final_leaves_no_champion() {
        let h = harness(vec![1, 2]).await;
        tokio::spawn(h.tournament.clone().start());
        sleep(Duration::from_secs(6)).await;

        let game = &h.tournament.round_matches(1)[0];
        game.add_player(1).unwrap();
        game.add_player(2).unwrap();
        game.remove_player(2);
        game.quit(1).await;

        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.tournament.status(), TournamentStatus::Finished);
        assert_eq!(h.tournament.champion(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn store_outage_abandons_tournament() {
        let h = harness(vec![1, 2]).await;
        h.store.fail_writes(true);
        tokio::spawn(h.tournament.clone().start());

        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.tournament.status(), TournamentStatus::Finished);
        assert!(h.tournament.round_matches(1).is_empty());
    }

    #[tokio::test]
    async fn single_participant_cannot_start() {
        let h = harness(vec![1]).await;
        h.tournament.clone().start().await;
        assert_eq!(h.tournament.status(), TournamentStatus::Waiting);
    }
}
