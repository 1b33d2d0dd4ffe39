//! Match state machine and authoritative tick loop

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::GameSettings;
use crate::store::{GameStore, MatchRecord, MatchResult, PlayerScore};
use crate::util::time::unix_millis;
use crate::ws::hub::Broadcaster;
use crate::ws::protocol::{MatchSnapshot, MatchSummary, ServerMsg};

use super::ball::Ball;
use super::geometry::{resolve_paddle_collision, wall_crossing, WallHit};
use super::player::{Movement, Player, Side};
use super::snapshot::SnapshotSource;
use super::{GameError, MatchId, PlayerId, PlayerInput, TournamentId, GHOST_PLAYER_ID};

const INPUT_QUEUE_CAPACITY: usize = 256;
/// Granularity of the pause timer
const PAUSE_TICK: Duration = Duration::from_millis(100);

/// Match lifecycle.
///
/// `waiting → ready → started ⇄ paused → finished`; `finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Waiting for both players
    Waiting,
    /// Countdown before the ball is served
    Ready,
    Started,
    Paused,
    Finished,
}

impl MatchStatus {
    pub fn is_finished(self) -> bool {
        self == MatchStatus::Finished
    }
}

/// Bracket position of a tournament match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TournamentSlot {
    pub tournament_id: TournamentId,
    pub round: u32,
}

/// Everything needed to construct a match
#[derive(Debug, Clone, Default)]
pub struct MatchSetup {
    /// `None` for local matches, which are never persisted
    pub id: Option<MatchId>,
    /// Players allowed to join; empty means anyone
    pub participants: Vec<PlayerId>,
    pub tournament: Option<TournamentSlot>,
}

impl MatchSetup {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn remote(id: MatchId, participants: Vec<PlayerId>) -> Self {
        Self {
            id: Some(id),
            participants,
            tournament: None,
        }
    }

    pub fn in_tournament(mut self, slot: TournamentSlot) -> Self {
        self.tournament = Some(slot);
        self
    }
}

impl From<&MatchRecord> for MatchSetup {
    fn from(record: &MatchRecord) -> Self {
        let setup = Self::remote(record.id, record.user_ids.clone());
        match record.tournament_id.zip(record.tournament_round) {
            Some((tournament_id, round)) => setup.in_tournament(TournamentSlot {
                tournament_id,
                round,
            }),
            None => setup,
        }
    }
}

/// Mutable match state, guarded by the match mutex
struct MatchState {
    status: MatchStatus,
    countdown: u32,
    ball: Ball,
    players: HashMap<PlayerId, Player>,
    active: HashMap<PlayerId, bool>,
    ready: HashSet<PlayerId>,
    pause_remaining: Option<Duration>,
    pause_owner: Option<PlayerId>,
    winner_id: Option<PlayerId>,
    /// Final snapshot and save have been issued
    finalized: bool,
    rng: ChaCha8Rng,
    tick: u64,
    /// Input inbox, taken by the loop when it starts
    inputs: Option<mpsc::Receiver<PlayerInput>>,
    #[cfg(test)]
    panic_on_next_step: bool,
}

impl MatchState {
    fn new(settings: &GameSettings, seed: u64, inputs: mpsc::Receiver<PlayerInput>) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let ball = Ball::new(settings.ball_speed, settings.ball_speed_increment, &mut rng);
        Self {
            status: MatchStatus::Waiting,
            countdown: settings.countdown_secs,
            ball,
            players: HashMap::new(),
            active: HashMap::new(),
            ready: HashSet::new(),
            pause_remaining: None,
            pause_owner: None,
            winner_id: None,
            finalized: false,
            rng,
            tick: 0,
            inputs: Some(inputs),
            #[cfg(test)]
            panic_on_next_step: false,
        }
    }

    fn source(&self) -> SnapshotSource<'_> {
        SnapshotSource {
            status: self.status,
            countdown: self.countdown,
            players: &self.players,
            ball: &self.ball,
        }
    }

    /// Apply every input queued before this tick
    fn apply_inputs(&mut self, inputs: &mut mpsc::Receiver<PlayerInput>) {
        while let Ok(input) = inputs.try_recv() {
            if self.status.is_finished() {
                continue;
            }
            if let Some(player) = self.players.get_mut(&input.player_id) {
                player.set_movement(input.movement);
                trace!(
                    player_id = input.player_id,
                    queued_ms = unix_millis().saturating_sub(input.received_at),
                    "Input applied"
                );
            }
        }
    }

    fn resume(&mut self) {
        self.status = MatchStatus::Started;
        self.pause_owner = None;
        self.pause_remaining = None;
    }

    fn finish_with(&mut self, winner: Option<PlayerId>) {
        self.status = MatchStatus::Finished;
        self.winner_id = winner;
        self.ball.moving = false;
        self.pause_owner = None;
        self.pause_remaining = None;
    }

    fn active_players(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self
            .active
            .iter()
            .filter(|(_, active)| **active)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn scores(&self) -> Vec<PlayerScore> {
        let mut scores: Vec<PlayerScore> = self
            .players
            .values()
            .map(|p| PlayerScore {
                player_id: p.id,
                score: p.score,
            })
            .collect();
        scores.sort_by_key(|s| s.player_id);
        scores
    }

    /// One simulation step. Only one collision is resolved per step:
    /// scoring walls, then bounce walls, then paddles.
    fn step(&mut self, settings: &GameSettings) {
        if self.status != MatchStatus::Started {
            return;
        }
        self.tick += 1;

        #[cfg(test)]
        if std::mem::take(&mut self.panic_on_next_step) {
            panic!("simulation fault at tick {}", self.tick);
        }

        for player in self.players.values_mut() {
            player.advance(settings.paddle_speed);
        }

        self.ball.update_respawn();
        if !self.ball.moving {
            return;
        }

        let start = self.ball.position;
        let end = self.ball.projected();

        if let Some(wall) = wall_crossing(start, end) {
            match wall.normal() {
                Some(normal) => self.ball.direction = self.ball.direction.reflect(normal),
                None => self.score_point(wall, settings),
            }
            return;
        }

        let paddles: Vec<_> = [Side::Right, Side::Left]
            .iter()
            .filter_map(|side| self.players.values().find(|p| p.side == *side))
            .map(|p| p.paddle())
            .collect();

        for paddle in &paddles {
            if let Some(direction) = resolve_paddle_collision(start, end, paddle) {
                self.ball.direction = direction;
                self.ball.increase_speed();
                return;
            }
        }

        self.ball.advance();
    }

    fn score_point(&mut self, wall: WallHit, settings: &GameSettings) {
        // Crossing a side's wall is a point for the other side
        let conceding = if wall == WallHit::Left {
            Side::Left
        } else {
            Side::Right
        };

        let scorer = self
            .players
            .values_mut()
            .find(|p| p.side == conceding.opposite())
            .map(|p| {
                p.score += 1;
                (p.id, p.score)
            });

        if let Some((id, score)) = scorer {
            debug!(player_id = id, score, "Point scored");
            if score >= settings.points_to_win {
                self.finish_with(Some(id));
                return;
            }
        }

        self.ball
            .reset(conceding, settings.respawn_ticks(), &mut self.rng);
    }
}

struct MatchInner {
    id: Option<MatchId>,
    /// Hub group of the sockets playing this match
    group: String,
    participants: Vec<PlayerId>,
    tournament: Option<TournamentSlot>,
    settings: Arc<GameSettings>,
    state: Mutex<MatchState>,
    inputs_tx: mpsc::Sender<PlayerInput>,
    broadcaster: Arc<dyn Broadcaster>,
    store: GameStore,
}

/// Shared handle to one authoritative match.
///
/// Network handlers call the public operations; the task running
/// [`GameMatch::start`] is the only one that advances the simulation.
#[derive(Clone)]
pub struct GameMatch {
    inner: Arc<MatchInner>,
}

impl GameMatch {
    pub fn new(
        setup: MatchSetup,
        settings: Arc<GameSettings>,
        broadcaster: Arc<dyn Broadcaster>,
        store: GameStore,
    ) -> Self {
        let (inputs_tx, inputs_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let seed = rand::thread_rng().gen();
        let state = MatchState::new(&settings, seed, inputs_rx);
        let group = match setup.id {
            Some(id) => format!("game_{id}"),
            None => format!("local_{}", Uuid::new_v4()),
        };

        Self {
            inner: Arc::new(MatchInner {
                id: setup.id,
                group,
                participants: setup.participants,
                tournament: setup.tournament,
                settings,
                state: Mutex::new(state),
                inputs_tx,
                broadcaster,
                store,
            }),
        }
    }

    pub fn id(&self) -> Option<MatchId> {
        self.inner.id
    }

    /// Sockets join this group to receive the match's snapshots
    pub fn group(&self) -> &str {
        &self.inner.group
    }

    pub fn participants(&self) -> &[PlayerId] {
        &self.inner.participants
    }

    pub fn tournament(&self) -> Option<TournamentSlot> {
        self.inner.tournament
    }

    pub fn status(&self) -> MatchStatus {
        self.inner.state.lock().status
    }

    pub fn winner(&self) -> Option<PlayerId> {
        self.inner.state.lock().winner_id
    }

    #[cfg(test)]
    pub fn has_player(&self, player_id: PlayerId) -> bool {
        self.inner.state.lock().players.contains_key(&player_id)
    }

    /// Seat a player in the next free slot. Rejoining keeps the old slot.
    pub fn add_player(&self, player_id: PlayerId) -> Result<Side, GameError> {
        if !self.inner.participants.is_empty() && !self.inner.participants.contains(&player_id) {
            return Err(GameError::NotParticipant(player_id));
        }

        let mut state = self.inner.state.lock();
        if state.status.is_finished() {
            return Err(GameError::MatchFinished);
        }

        if let Some(existing) = state.players.get(&player_id) {
            let side = existing.side;
            state.active.insert(player_id, true);
            return Ok(side);
        }

        if state.players.len() >= 2 {
            return Err(GameError::MatchFull);
        }

        let side = state
            .players
            .values()
            .next()
            .map(|other| other.side.opposite())
            .unwrap_or(Side::Right);
        state.players.insert(player_id, Player::new(player_id, side));
        state.active.insert(player_id, true);

        info!(
            match_id = ?self.inner.id,
            player_id,
            ?side,
            player_count = state.players.len(),
            "Player joined match"
        );
        Ok(side)
    }

    /// Mark a player inactive. Their score and paddle are kept.
    pub fn remove_player(&self, player_id: PlayerId) {
        let mut state = self.inner.state.lock();
        if let Some(active) = state.active.get_mut(&player_id) {
            *active = false;
            state.ready.remove(&player_id);
            debug!(match_id = ?self.inner.id, player_id, "Player left match");
        }
    }

    /// Queue a paddle input for the next tick
    pub fn submit_input(&self, player_id: PlayerId, movement: Movement) {
        let input = PlayerInput {
            player_id,
            movement,
            received_at: unix_millis(),
        };
        match self.inner.inputs_tx.try_send(input) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(match_id = ?self.inner.id, player_id, "Input queue full, dropping input");
            }
            // Loop already finished
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Parse and queue a raw wire movement value
    pub fn submit_raw_input(&self, player_id: PlayerId, value: &str) -> Result<(), GameError> {
        let movement: Movement = value.parse()?;
        self.submit_input(player_id, movement);
        Ok(())
    }

    /// Record that a player is ready. Returns true once both seated
    /// players are ready and the match can be started.
    pub fn mark_ready(&self, player_id: PlayerId) -> bool {
        let mut state = self.inner.state.lock();
        if !state.players.contains_key(&player_id) {
            return false;
        }
        state.ready.insert(player_id);

        state.status == MatchStatus::Waiting
            && state.players.len() == 2
            && state.players.keys().all(|id| state.ready.contains(id))
    }

    /// Run the match to completion.
    ///
    /// Returns immediately unless the match is waiting with two players,
    /// so concurrent calls run at most one loop.
    pub async fn start(self) {
        let Some(mut inputs) = self.claim_start() else {
            debug!(match_id = ?self.inner.id, "Match already started or not ready");
            return;
        };

        info!(match_id = ?self.inner.id, "Match countdown started");
        self.run_countdown(&mut inputs).await;

        if self.status() == MatchStatus::Started {
            info!(match_id = ?self.inner.id, "Match started");
            self.run_simulation(&mut inputs).await;
        }

        self.finish().await;
    }

    fn claim_start(&self) -> Option<mpsc::Receiver<PlayerInput>> {
        let mut state = self.inner.state.lock();
        if state.status != MatchStatus::Waiting || state.players.len() < 2 {
            return None;
        }
        let inputs = state.inputs.take()?;
        state.status = MatchStatus::Ready;
        state.countdown = self.inner.settings.countdown_secs;
        Some(inputs)
    }

    async fn run_countdown(&self, inputs: &mut mpsc::Receiver<PlayerInput>) {
        loop {
            let remaining = {
                let mut state = self.inner.state.lock();
                state.apply_inputs(inputs);
                if state.status != MatchStatus::Ready {
                    return;
                }
                state.countdown
            };

            self.publish();

            if remaining == 0 {
                let mut state = self.inner.state.lock();
                if state.status == MatchStatus::Ready {
                    state.status = MatchStatus::Started;
                }
                return;
            }

            sleep(Duration::from_secs(1)).await;

            let mut state = self.inner.state.lock();
            state.countdown = state.countdown.saturating_sub(1);
        }
    }

    async fn run_simulation(&self, inputs: &mut mpsc::Receiver<PlayerInput>) {
        let mut ticker = interval(self.inner.settings.tick_duration());
        // A slow tick delays the next one instead of bursting to catch up
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.status() == MatchStatus::Paused {
                self.wait_while_paused().await;
                ticker.reset();
                continue;
            }

            ticker.tick().await;

            let status = {
                let mut state = self.inner.state.lock();
                state.apply_inputs(inputs);

                let settings = &self.inner.settings;
                let outcome = catch_unwind(AssertUnwindSafe(|| state.step(settings)));
                if outcome.is_err() {
                    error!(
                        match_id = ?self.inner.id,
                        tick = state.tick,
                        "Simulation tick panicked, continuing"
                    );
                }
                state.status
            };

            match status {
                MatchStatus::Finished => return,
                MatchStatus::Paused => continue,
                _ => self.publish(),
            }
        }
    }

    async fn wait_while_paused(&self) {
        loop {
            sleep(PAUSE_TICK).await;

            let mut state = self.inner.state.lock();
            if state.status != MatchStatus::Paused {
                return;
            }

            let remaining = state
                .pause_remaining
                .unwrap_or_default()
                .saturating_sub(PAUSE_TICK);
            if remaining.is_zero() {
                state.resume();
                info!(match_id = ?self.inner.id, "Pause expired, match resumed");
                return;
            }
            state.pause_remaining = Some(remaining);
        }
    }

    /// Pause a running match on behalf of one of its players
    pub fn pause(&self, by: PlayerId) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.status != MatchStatus::Started || !state.players.contains_key(&by) {
                return false;
            }
            state.status = MatchStatus::Paused;
            state.pause_owner = Some(by);
            state.pause_remaining = Some(self.inner.settings.pause_duration);
        }

        info!(match_id = ?self.inner.id, player_id = by, "Match paused");
        self.publish();
        true
    }

    /// Resume a paused match. When `by` is given it must be the player
    /// who paused.
    pub fn unpause(&self, by: Option<PlayerId>) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.status != MatchStatus::Paused {
                return false;
            }
            if by.is_some() && by != state.pause_owner {
                debug!(match_id = ?self.inner.id, ?by, "Ignoring unpause from other player");
                return false;
            }
            state.resume();
        }

        info!(match_id = ?self.inner.id, ?by, "Match unpaused");
        self.publish();
        true
    }

    /// Leave the match for good. The last active player wins; if nobody
    /// is left the match ends without a winner.
    pub async fn quit(&self, player_id: PlayerId) {
        let winner = {
            let mut state = self.inner.state.lock();
            if state.status.is_finished() || !state.players.contains_key(&player_id) {
                return;
            }
            state.active.insert(player_id, false);

            let winner = match state.active_players().as_slice() {
                [winner] => Some(*winner),
                [] => None,
                _ => return,
            };
            state.finish_with(winner);
            winner
        };

        info!(match_id = ?self.inner.id, player_id, ?winner, "Player quit, match over");
        self.finish().await;
    }

    /// Publish the final snapshot and save the result, once
    async fn finish(&self) {
        let result = {
            let mut state = self.inner.state.lock();
            if !state.status.is_finished() || state.finalized {
                return;
            }
            state.finalized = true;
            MatchResult {
                winner_id: state.winner_id,
                scores: state.scores(),
            }
        };

        info!(
            match_id = ?self.inner.id,
            winner_id = ?result.winner_id,
            "Match finished"
        );
        self.publish();

        let Some(id) = self.inner.id else {
            return;
        };
        if let Err(err) = self.inner.store.save_match_result(id, &result).await {
            error!(match_id = id, error = %err, "Failed to save match result");
        }
    }

    /// Current state as seen by `player_id`
    pub fn snapshot(&self, player_id: PlayerId) -> MatchSnapshot {
        self.inner.state.lock().source().build(player_id)
    }

    pub fn summary(&self) -> MatchSummary {
        let state = self.inner.state.lock();
        MatchSummary {
            id: self.inner.id,
            status: state.status,
            winner_id: state.winner_id,
            scores: state.scores(),
            tournament_id: self.inner.tournament.map(|t| t.tournament_id),
            round: self.inner.tournament.map(|t| t.round),
        }
    }

    /// Send each seated player their own snapshot on the sockets that joined
    /// this match. Delivery is best effort.
    fn publish(&self) {
        let messages: Vec<(PlayerId, ServerMsg)> = {
            let state = self.inner.state.lock();
            let source = state.source();
            state
                .players
                .keys()
                .filter(|id| **id != GHOST_PLAYER_ID)
                .map(|id| (*id, ServerMsg::GameState(source.build(*id))))
                .collect()
        };

        for (player_id, msg) in messages {
            let sent = self
                .inner
                .broadcaster
                .send_to_member(&self.inner.group, player_id, msg);
            if let Err(err) = sent {
                debug!(match_id = ?self.inner.id, player_id, error = %err, "Snapshot not delivered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Vector2;
    use crate::ws::hub::RecordingBroadcaster;

    fn settings() -> GameSettings {
        GameSettings::default()
    }

    fn new_match(settings: GameSettings, setup: MatchSetup) -> (GameMatch, Arc<RecordingBroadcaster>) {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let game = GameMatch::new(
            setup,
            Arc::new(settings),
            broadcaster.clone(),
            GameStore::memory(),
        );
        (game, broadcaster)
    }

    fn two_player_match(settings: GameSettings) -> (GameMatch, Arc<RecordingBroadcaster>) {
        let (game, broadcaster) = new_match(settings, MatchSetup::local());
        game.add_player(1).unwrap();
        game.add_player(2).unwrap();
        (game, broadcaster)
    }

    /// Settings under which a running match will not end on points during a test
    fn endless() -> GameSettings {
        GameSettings {
            points_to_win: 10_000,
            ..GameSettings::default()
        }
    }

    fn countdown_timers(broadcaster: &RecordingBroadcaster, player_id: PlayerId) -> Vec<u32> {
        broadcaster
            .messages_for(player_id)
            .into_iter()
            .filter_map(|msg| match msg {
                ServerMsg::GameState(snapshot) if snapshot.status == MatchStatus::Ready => {
                    snapshot.timer
                }
                _ => None,
            })
            .collect()
    }

    fn drive_into_left_wall(state: &mut MatchState) {
        state.ball.position = Vector2::new(-398.0, 0.0);
        state.ball.direction = Vector2::new(-1.0, 0.0);
        state.ball.moving = true;
    }

    #[test]
    fn players_take_fixed_slots_and_third_is_rejected() {
        let (game, _) = new_match(settings(), MatchSetup::local());
        assert_eq!(game.add_player(1).unwrap(), Side::Right);
        assert_eq!(game.add_player(2).unwrap(), Side::Left);
        // Rejoining is idempotent
        assert_eq!(game.add_player(1).unwrap(), Side::Right);
        assert!(matches!(game.add_player(3), Err(GameError::MatchFull)));
    }

    #[test]
    fn non_participants_cannot_join() {
        let (game, _) = new_match(settings(), MatchSetup::remote(7, vec![1, 2]));
        assert!(matches!(
            game.add_player(9),
            Err(GameError::NotParticipant(9))
        ));
        assert!(game.add_player(2).is_ok());
    }

    #[test]
    fn ready_requires_both_players() {
        let (game, _) = new_match(settings(), MatchSetup::local());
        game.add_player(1).unwrap();
        assert!(!game.mark_ready(1));
        game.add_player(2).unwrap();
        assert!(!game.mark_ready(3));
        assert!(game.mark_ready(2));
    }

    #[test]
    fn invalid_movement_is_rejected_without_touching_state() {
        let (game, _) = two_player_match(settings());
        let err = game.submit_raw_input(1, "LEFT").unwrap_err();
        assert!(matches!(err, GameError::InvalidInput(_)));

        let mut state = game.inner.state.lock();
        let mut inputs = state.inputs.take().unwrap();
        state.apply_inputs(&mut inputs);
        assert_eq!(state.players[&1].movement, Movement::None);
    }

    #[test]
    fn inputs_apply_on_next_step() {
        let (game, _) = two_player_match(settings());
        game.submit_input(1, Movement::Up);
        // Unknown players are ignored
        game.submit_input(42, Movement::Down);

        let mut state = game.inner.state.lock();
        state.status = MatchStatus::Started;
        let mut inputs = state.inputs.take().unwrap();
        state.apply_inputs(&mut inputs);
        state.step(&settings());
        assert_eq!(state.players[&1].position.y, -6.0);
        assert_eq!(state.players[&2].position.y, 0.0);
    }

    #[test]
    fn tenth_point_finishes_match_for_scorer() {
        let (game, _) = two_player_match(settings());
        let settings = settings();
        let mut state = game.inner.state.lock();
        state.status = MatchStatus::Started;

        // Player 1 holds the right slot, so left-wall crossings are their points
        for expected in 1..=9 {
            drive_into_left_wall(&mut state);
            state.step(&settings);
            assert_eq!(state.players[&1].score, expected);
            assert_eq!(state.status, MatchStatus::Started);
            assert_eq!(state.ball.position, Vector2::ZERO);
            assert!(!state.ball.moving);
        }

        drive_into_left_wall(&mut state);
        state.step(&settings);
        assert_eq!(state.players[&1].score, 10);
        assert_eq!(state.players[&2].score, 0);
        assert_eq!(state.status, MatchStatus::Finished);
        assert_eq!(state.winner_id, Some(1));

        // Finished is terminal
        drive_into_left_wall(&mut state);
        state.step(&settings);
        assert_eq!(state.players[&1].score, 10);
    }

    #[test]
    fn reset_ball_serves_toward_conceding_side() {
        let (game, _) = two_player_match(settings());
        let mut state = game.inner.state.lock();
        state.status = MatchStatus::Started;
        drive_into_left_wall(&mut state);
        state.step(&settings());
        assert!(state.ball.direction.x < 0.0);
    }

    #[test]
    fn bounce_walls_reflect_vertical_travel() {
        let (game, _) = two_player_match(settings());
        let mut state = game.inner.state.lock();
        state.status = MatchStatus::Started;
        state.ball.position = Vector2::new(0.0, 298.0);
        state.ball.direction = Vector2::new(0.6, 0.8);
        state.ball.moving = true;

        state.step(&settings());
        assert!((state.ball.direction.x - 0.6).abs() < 1e-6);
        assert!((state.ball.direction.y + 0.8).abs() < 1e-6);
        assert_eq!(state.players[&1].score + state.players[&2].score, 0);
    }

    #[test]
    fn paddle_return_reverses_ball_and_speeds_it_up() {
        let (game, _) = two_player_match(settings());
        let mut state = game.inner.state.lock();
        state.status = MatchStatus::Started;
        state.ball.position = Vector2::new(374.0, 0.0);
        state.ball.direction = Vector2::new(1.0, 0.0);
        state.ball.speed = 4.0;
        state.ball.moving = true;

        state.step(&settings());
        assert!(state.ball.direction.x < 0.0);
        assert!(state.ball.speed > 4.0);
    }

    #[test]
    fn snapshots_are_relative_to_the_viewer() {
        let (game, _) = two_player_match(settings());
        let first = game.snapshot(1);
        let second = game.snapshot(2);

        assert_eq!(first.player.as_ref().map(|p| p.id), Some(1));
        assert_eq!(first.opponent.as_ref().map(|p| p.id), Some(2));
        assert_eq!(second.player.as_ref().map(|p| p.id), Some(2));
        assert_eq!(second.opponent.as_ref().map(|p| p.id), Some(1));
        assert_eq!(first.ball, second.ball);
        assert_eq!(first.status, second.status);
    }

    #[test]
    fn only_the_pausing_player_can_unpause() {
        let (game, _) = two_player_match(settings());
        assert!(!game.pause(1), "cannot pause before the match starts");

        game.inner.state.lock().status = MatchStatus::Started;
        assert!(game.pause(1));
        assert_eq!(game.status(), MatchStatus::Paused);

        assert!(!game.unpause(Some(2)));
        assert_eq!(game.status(), MatchStatus::Paused);

        assert!(game.unpause(Some(1)));
        assert_eq!(game.status(), MatchStatus::Started);
    }

    #[test]
    fn anonymous_unpause_resumes() {
        let (game, _) = two_player_match(settings());
        game.inner.state.lock().status = MatchStatus::Started;
        assert!(game.pause(2));
        assert!(game.unpause(None));
        assert_eq!(game.status(), MatchStatus::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_publishes_each_second_then_starts() {
        let (game, broadcaster) = two_player_match(endless());
        tokio::spawn(game.clone().start());

        sleep(Duration::from_millis(3500)).await;

        assert_eq!(countdown_timers(&broadcaster, 1), vec![3, 2, 1, 0]);
        assert_eq!(countdown_timers(&broadcaster, 2), vec![3, 2, 1, 0]);
        assert_eq!(game.status(), MatchStatus::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_starts_run_one_loop() {
        let (game, broadcaster) = two_player_match(endless());
        let first = tokio::spawn(game.clone().start());
        let second = tokio::spawn(game.clone().start());

        sleep(Duration::from_millis(1500)).await;

        assert_eq!(countdown_timers(&broadcaster, 1), vec![3, 2]);
        assert!(first.is_finished() ^ second.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn start_without_opponent_is_a_no_op() {
        let (game, broadcaster) = new_match(settings(), MatchSetup::local());
        game.add_player(1).unwrap();
        game.clone().start().await;
        assert_eq!(game.status(), MatchStatus::Waiting);
        assert!(broadcaster.messages_for(1).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_expires_on_its_own() {
        let (game, _) = two_player_match(endless());
        tokio::spawn(game.clone().start());
        sleep(Duration::from_millis(3500)).await;

        assert!(game.pause(1));
        sleep(Duration::from_secs(10)).await;
        assert_eq!(game.status(), MatchStatus::Paused);

        sleep(Duration::from_secs(21)).await;
        assert_eq!(game.status(), MatchStatus::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn quit_leaves_remaining_player_as_winner() {
        let store = GameStore::memory();
        let record = store.create_match_record(vec![1, 2], None).await.unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let game = GameMatch::new(
            MatchSetup::from(&record),
            Arc::new(settings()),
            broadcaster.clone(),
            store.clone(),
        );
        game.add_player(1).unwrap();
        game.add_player(2).unwrap();

        game.quit(2).await;

        assert_eq!(game.status(), MatchStatus::Finished);
        assert_eq!(game.winner(), Some(1));

        let saved = store.load_match(record.id).await.unwrap();
        assert_eq!(saved.status, MatchStatus::Finished);
        assert_eq!(saved.winner_id, Some(1));

        let last = broadcaster.messages_for(1).pop();
        assert!(matches!(
            last,
            Some(ServerMsg::GameState(ref s)) if s.status == MatchStatus::Finished
        ));

        // Second quit does not publish or save again
        let published = broadcaster.messages_for(1).len();
        game.quit(1).await;
        assert_eq!(broadcaster.messages_for(1).len(), published);
    }

    #[tokio::test(start_paused = true)]
    async fn quit_during_countdown_stops_loop() {
        let (game, _) = two_player_match(endless());
        let handle = tokio::spawn(game.clone().start());
        sleep(Duration::from_millis(1500)).await;

        game.quit(1).await;
        sleep(Duration::from_secs(2)).await;

        assert!(handle.is_finished());
        assert_eq!(game.winner(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_keeps_in_memory_result() {
        let store = GameStore::memory();
        let record = store.create_match_record(vec![1, 2], None).await.unwrap();
        store.fail_writes(true);

        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let game = GameMatch::new(
            MatchSetup::from(&record),
            Arc::new(settings()),
            broadcaster,
            store,
        );
        game.add_player(1).unwrap();
        game.add_player(2).unwrap();
        game.quit(1).await;

        assert_eq!(game.status(), MatchStatus::Finished);
        assert_eq!(game.winner(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_step_does_not_stop_the_loop() {
        let (game, broadcaster) = two_player_match(endless());
        let handle = tokio::spawn(game.clone().start());
        sleep(Duration::from_millis(3500)).await;

        let faulty_tick = {
            let mut state = game.inner.state.lock();
            state.panic_on_next_step = true;
            state.tick + 1
        };
        let published = broadcaster.messages_for(1).len();
        sleep(Duration::from_millis(500)).await;

        assert!(!handle.is_finished());
        assert_eq!(game.status(), MatchStatus::Started);
        assert!(game.inner.state.lock().tick > faulty_tick + 1);
        assert!(broadcaster.messages_for(1).len() > published + 1);
    }
}
