//! Player-relative snapshot building

use std::collections::HashMap;

use crate::ws::protocol::{BallView, MatchSnapshot, PlayerView};

use super::ball::Ball;
use super::player::{Player, Side};
use super::r#match::MatchStatus;
use super::PlayerId;

/// Borrowed view of the match fields a snapshot is built from
pub struct SnapshotSource<'a> {
    pub status: MatchStatus,
    pub countdown: u32,
    pub players: &'a HashMap<PlayerId, Player>,
    pub ball: &'a Ball,
}

impl SnapshotSource<'_> {
    /// Snapshot as seen by `for_player`.
    ///
    /// The requesting player is reported as `player` and the other
    /// participant as `opponent`. An unknown id gets no `player` and the
    /// right-slot paddle as `opponent`.
    pub fn build(&self, for_player: PlayerId) -> MatchSnapshot {
        let player = self.players.get(&for_player).map(view);
        let opponent = [Side::Right, Side::Left]
            .iter()
            .filter_map(|side| {
                self.players
                    .values()
                    .find(|p| p.side == *side && p.id != for_player)
            })
            .next()
            .map(view);

        MatchSnapshot {
            status: self.status,
            player,
            opponent,
            ball: BallView {
                position: self.ball.position,
            },
            timer: (self.status == MatchStatus::Ready).then_some(self.countdown),
        }
    }
}

fn view(player: &Player) -> PlayerView {
    PlayerView {
        id: player.id,
        score: player.score,
        position: player.position,
    }
}
