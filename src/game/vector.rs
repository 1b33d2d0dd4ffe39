//! 2D vector used for positions and directions on the playfield

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub};

/// 2D point or direction
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn scale(self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
        }
    }

    #[inline]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Unit vector with the same heading.
    ///
    /// The zero vector has no heading; callers must rule it out first
    /// (see [`Vector2::try_normalize`]).
    pub fn normalize(self) -> Self {
        let len = self.length();
        debug_assert!(len > 0.0, "normalize() called on a zero vector");
        self.scale(1.0 / len)
    }

    /// Unit vector with the same heading, or `None` for the zero vector
    pub fn try_normalize(self) -> Option<Self> {
        let len = self.length();
        if len > f32::EPSILON {
            Some(self.scale(1.0 / len))
        } else {
            None
        }
    }

    /// Mirror this vector across a surface with the given unit normal
    pub fn reflect(self, normal: Self) -> Self {
        self - normal.scale(2.0 * self.dot(normal))
    }
}

impl Add for Vector2 {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl AddAssign for Vector2 {
    fn add_assign(&mut self, other: Self) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl Sub for Vector2 {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_length() {
        let v = Vector2::new(3.0, 4.0).normalize();
        assert!((v.length() - 1.0).abs() < 1e-6);
        assert!((v.x - 0.6).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_has_no_heading() {
        assert_eq!(Vector2::ZERO.try_normalize(), None);
    }

    #[test]
    fn reflect_flips_component_along_normal() {
        let v = Vector2::new(0.6, 0.8);
        let reflected = v.reflect(Vector2::new(0.0, 1.0));
        assert!((reflected.x - 0.6).abs() < 1e-6);
        assert!((reflected.y + 0.8).abs() < 1e-6);
    }

    #[test]
    fn add_assign_accumulates_in_place() {
        let mut p = Vector2::new(1.0, 1.0);
        p += Vector2::new(0.5, -2.0);
        assert_eq!(p, Vector2::new(1.5, -1.0));
    }
}
