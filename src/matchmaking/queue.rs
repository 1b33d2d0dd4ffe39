//! Matchmaking queue implementation

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::game::PlayerId;

/// Which queue a player is waiting in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// Direct two-player match
    Game,
    Tournament,
}

/// Player in the matchmaking queue
#[derive(Debug, Clone)]
pub struct QueuedPlayer {
    pub player_id: PlayerId,
    pub queued_at: Instant,
}

impl QueuedPlayer {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            queued_at: Instant::now(),
        }
    }

    /// How long this player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

/// FIFO queue that releases players in fixed-size groups
pub struct MatchmakingQueue {
    queue: VecDeque<QueuedPlayer>,
    /// Players per formed group
    group_size: usize,
}

impl MatchmakingQueue {
    pub fn new(group_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            group_size: group_size.max(2),
        }
    }

    /// Add a player to the back. Returns false if they are already queued.
    pub fn enqueue(&mut self, player: QueuedPlayer) -> bool {
        if self.contains(player.player_id) {
            return false;
        }
        self.queue.push_back(player);
        true
    }

    /// Remove a player from the queue
    pub fn dequeue(&mut self, player_id: PlayerId) -> Option<QueuedPlayer> {
        let pos = self.queue.iter().position(|p| p.player_id == player_id)?;
        self.queue.remove(pos)
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.queue.iter().any(|p| p.player_id == player_id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take the front group once enough players are waiting
    pub fn try_form_group(&mut self) -> Option<Vec<QueuedPlayer>> {
        if self.queue.len() < self.group_size {
            return None;
        }
        Some(self.queue.drain(..self.group_size).collect())
    }

    /// Put a group back at the front, keeping its order
    pub fn requeue_front(&mut self, players: Vec<QueuedPlayer>) {
        for player in players.into_iter().rev() {
            if !self.contains(player.player_id) {
                self.queue.push_front(player);
            }
        }
    }
}
