//! Outbound message routing to connected players

use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use crate::game::PlayerId;

use super::protocol::ServerMsg;

/// Per-connection outbound buffer. Messages beyond this are dropped.
const OUTBOUND_CAPACITY: usize = 128;

/// Best-effort, at-most-once delivery to players and named groups
pub trait Broadcaster: Send + Sync {
    /// Every socket of the player
    fn send_to_player(&self, player_id: PlayerId, msg: ServerMsg) -> Result<(), DeliveryError>;

    fn send_to_group(&self, group: &str, msg: ServerMsg) -> Result<(), DeliveryError>;

    /// Only the player's sockets that joined `group`
    fn send_to_member(
        &self,
        group: &str,
        player_id: PlayerId,
        msg: ServerMsg,
    ) -> Result<(), DeliveryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Player {0} is not connected")]
    NotConnected(PlayerId),

    #[error("Outbound buffer full")]
    ChannelFull,

    #[error("Connection closed")]
    Closed,
}

/// One registered socket's outbound half
pub struct Connection {
    pub id: Uuid,
    pub player_id: PlayerId,
}

/// Live connections keyed by player. A player may hold several sockets
/// (queue, game, tournament) at once. Groups are joined per socket.
#[derive(Default)]
pub struct ConnectionHub {
    connections: DashMap<PlayerId, HashMap<Uuid, mpsc::Sender<ServerMsg>>>,
    groups: DashMap<String, HashMap<Uuid, PlayerId>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket and get the receiver its writer task drains
    pub fn register(&self, player_id: PlayerId) -> (Connection, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let id = Uuid::new_v4();
        self.connections.entry(player_id).or_default().insert(id, tx);
        debug!(player_id, connection_id = %id, "Connection registered");
        (Connection { id, player_id }, rx)
    }

    /// Drop the socket and every group membership it held
    pub fn unregister(&self, connection: &Connection) {
        let now_empty = match self.connections.get_mut(&connection.player_id) {
            Some(mut sockets) => {
                sockets.remove(&connection.id);
                sockets.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.connections
                .remove_if(&connection.player_id, |_, sockets| sockets.is_empty());
        }
        self.groups.retain(|_, members| {
            members.remove(&connection.id);
            !members.is_empty()
        });
        debug!(player_id = connection.player_id, connection_id = %connection.id, "Connection unregistered");
    }

    pub fn join_group(&self, group: &str, connection: &Connection) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(connection.id, connection.player_id);
    }

    pub fn leave_group(&self, group: &str, connection: &Connection) {
        let now_empty = match self.groups.get_mut(group) {
            Some(mut members) => {
                members.remove(&connection.id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.groups.remove_if(group, |_, members| members.is_empty());
        }
    }

    #[cfg(test)]
    pub fn is_connected(&self, player_id: PlayerId) -> bool {
        self.connections.contains_key(&player_id)
    }

    #[cfg(test)]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn connected_players(&self) -> usize {
        self.connections.len()
    }

    /// Try each socket in turn; one good socket is enough
    fn deliver<'a>(
        &self,
        player_id: PlayerId,
        sockets: impl Iterator<Item = &'a mpsc::Sender<ServerMsg>>,
        msg: &ServerMsg,
    ) -> Result<(), DeliveryError> {
        let mut result = Err(DeliveryError::NotConnected(player_id));
        for tx in sockets {
            result = match tx.try_send(msg.clone()) {
                Ok(()) => Ok(()),
                Err(_) if result.is_ok() => Ok(()),
                Err(TrySendError::Full(_)) => Err(DeliveryError::ChannelFull),
                Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
            };
        }
        result
    }
}

impl Broadcaster for ConnectionHub {
    fn send_to_player(&self, player_id: PlayerId, msg: ServerMsg) -> Result<(), DeliveryError> {
        let sockets = self
            .connections
            .get(&player_id)
            .ok_or(DeliveryError::NotConnected(player_id))?;
        self.deliver(player_id, sockets.values(), &msg)
    }

    fn send_to_group(&self, group: &str, msg: ServerMsg) -> Result<(), DeliveryError> {
        let members: Vec<(Uuid, PlayerId)> = self
            .groups
            .get(group)
            .map(|m| m.iter().map(|(id, player)| (*id, *player)).collect())
            .unwrap_or_default();

        for (connection_id, player_id) in members {
            let delivered = match self.connections.get(&player_id) {
                Some(sockets) => self.deliver(player_id, sockets.get(&connection_id).into_iter(), &msg),
                None => Err(DeliveryError::NotConnected(player_id)),
            };
            if let Err(err) = delivered {
                debug!(group, player_id, error = %err, "Group message not delivered");
            }
        }
        Ok(())
    }

    fn send_to_member(
        &self,
        group: &str,
        player_id: PlayerId,
        msg: ServerMsg,
    ) -> Result<(), DeliveryError> {
        let joined: Vec<Uuid> = self
            .groups
            .get(group)
            .map(|m| {
                m.iter()
                    .filter(|(_, player)| **player == player_id)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default();

        let sockets = self
            .connections
            .get(&player_id)
            .ok_or(DeliveryError::NotConnected(player_id))?;
        self.deliver(
            player_id,
            joined.iter().filter_map(|id| sockets.get(id)),
            &msg,
        )
    }
}

/// Captures every outbound message for assertions
#[cfg(test)]
#[derive(Default)]
pub struct RecordingBroadcaster {
    players: parking_lot::Mutex<Vec<(PlayerId, ServerMsg)>>,
    groups: parking_lot::Mutex<Vec<(String, ServerMsg)>>,
}

#[cfg(test)]
impl RecordingBroadcaster {
    pub fn messages_for(&self, player_id: PlayerId) -> Vec<ServerMsg> {
        self.players
            .lock()
            .iter()
            .filter(|(id, _)| *id == player_id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub fn group_messages(&self, group: &str) -> Vec<ServerMsg> {
        self.groups
            .lock()
            .iter()
            .filter(|(name, _)| name == group)
            .map(|(_, msg)| msg.clone())
            .collect()
    }
}

#[cfg(test)]
impl Broadcaster for RecordingBroadcaster {
    fn send_to_player(&self, player_id: PlayerId, msg: ServerMsg) -> Result<(), DeliveryError> {
        self.players.lock().push((player_id, msg));
        Ok(())
    }

    fn send_to_group(&self, group: &str, msg: ServerMsg) -> Result<(), DeliveryError> {
        self.groups.lock().push((group.to_string(), msg));
        Ok(())
    }

    fn send_to_member(
        &self,
        _group: &str,
        player_id: PlayerId,
        msg: ServerMsg,
    ) -> Result<(), DeliveryError> {
        self.players.lock().push((player_id, msg));
        Ok(())
    }
}
