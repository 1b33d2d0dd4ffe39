//! Paddle state for one participant

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::geometry::{PaddleRect, FIELD_HALF_HEIGHT, FIELD_HALF_WIDTH, PADDLE_HEIGHT, PADDLE_INSET};
use super::vector::Vector2;
use super::{GameError, PlayerId};

/// Paddle direction requested by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Movement {
    #[default]
    None,
    Up,
    Down,
}

impl FromStr for Movement {
    type Err = GameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "NONE" => Ok(Movement::None),
            "UP" => Ok(Movement::Up),
            "DOWN" => Ok(Movement::Down),
            other => Err(GameError::InvalidInput(other.to_string())),
        }
    }
}

/// Which end of the field a paddle defends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// -1 for the left side, 1 for the right side
    pub fn sign(self) -> f32 {
        match self {
            Side::Left => -1.0,
            Side::Right => 1.0,
        }
    }

    /// Paddle centre x for this side
    pub fn paddle_x(self) -> f32 {
        self.sign() * (FIELD_HALF_WIDTH - PADDLE_INSET)
    }
}

/// Authoritative paddle state
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub side: Side,
    pub position: Vector2,
    pub movement: Movement,
    pub score: u32,
}

impl Player {
    pub fn new(id: PlayerId, side: Side) -> Self {
        Self {
            id,
            side,
            position: Vector2::new(side.paddle_x(), 0.0),
            movement: Movement::None,
            score: 0,
        }
    }

    pub fn set_movement(&mut self, movement: Movement) {
        self.movement = movement;
    }

    /// Integrate one tick of paddle movement, clamped to the playfield
    pub fn advance(&mut self, paddle_speed: f32) {
        let limit = FIELD_HALF_HEIGHT - PADDLE_HEIGHT / 2.0;
        let dy = match self.movement {
            Movement::None => return,
            Movement::Up => -paddle_speed,
            Movement::Down => paddle_speed,
        };
        self.position.y = (self.position.y + dy).clamp(-limit, limit);
    }

    pub fn paddle(&self) -> PaddleRect {
        PaddleRect::around(self.position)
    }
}
