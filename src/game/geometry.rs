//! Playfield geometry: segment intersection and paddle collision response

use super::vector::Vector2;

/// Half of the playfield width; side (scoring) walls sit at ±this x
pub const FIELD_HALF_WIDTH: f32 = 400.0;
/// Half of the playfield height; top/bottom walls sit at ±this y
pub const FIELD_HALF_HEIGHT: f32 = 300.0;

pub const PADDLE_WIDTH: f32 = 8.0;
pub const PADDLE_HEIGHT: f32 = 64.0;
/// Distance between a side wall and the paddle centre
pub const PADDLE_INSET: f32 = 20.0;

/// Axis-aligned paddle bounds. `top` is the smaller y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaddleRect {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl PaddleRect {
    /// Bounds of a paddle centred on `center`
    pub fn around(center: Vector2) -> Self {
        Self {
            left: center.x - PADDLE_WIDTH / 2.0,
            right: center.x + PADDLE_WIDTH / 2.0,
            top: center.y - PADDLE_HEIGHT / 2.0,
            bottom: center.y + PADDLE_HEIGHT / 2.0,
        }
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

/// Paddle edge, listed in collision priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddleEdge {
    Left,
    Right,
    Top,
    Bottom,
}

/// A wall segment crossed by the ball
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallHit {
    /// Scoring wall at -x
    Left,
    /// Scoring wall at +x
    Right,
    /// Bounce wall at +y
    Top,
    /// Bounce wall at -y
    Bottom,
}

impl WallHit {
    /// Surface normal for bounce walls; scoring walls have none
    pub fn normal(self) -> Option<Vector2> {
        match self {
            WallHit::Top => Some(Vector2::new(0.0, 1.0)),
            WallHit::Bottom => Some(Vector2::new(0.0, -1.0)),
            WallHit::Left | WallHit::Right => None,
        }
    }
}

#[inline]
fn determinant(a: f32, b: f32, c: f32, d: f32) -> f32 {
    a * d - b * c
}

/// Intersection point of segments `p1p2` and `q1q2`.
///
/// Parallel or coincident segments never intersect. Endpoints count as
/// part of the segment.
pub fn intersect(p1: Vector2, p2: Vector2, q1: Vector2, q2: Vector2) -> Option<Vector2> {
    let denom = determinant(p2.x - p1.x, q1.x - q2.x, p2.y - p1.y, q1.y - q2.y);
    if denom == 0.0 {
        return None;
    }

    let t = determinant(q1.x - p1.x, q1.x - q2.x, q1.y - p1.y, q1.y - q2.y) / denom;
    let u = determinant(p2.x - p1.x, q1.x - p1.x, p2.y - p1.y, q1.y - p1.y) / denom;

    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(p1 + (p2 - p1).scale(t))
    } else {
        None
    }
}

/// First playfield wall crossed by the segment `start..end`.
///
/// Scoring walls are tested before bounce walls.
pub fn wall_crossing(start: Vector2, end: Vector2) -> Option<WallHit> {
    let (w, h) = (FIELD_HALF_WIDTH, FIELD_HALF_HEIGHT);
    let walls = [
        (WallHit::Left, Vector2::new(-w, h), Vector2::new(-w, -h)),
        (WallHit::Right, Vector2::new(w, h), Vector2::new(w, -h)),
        (WallHit::Top, Vector2::new(-w, h), Vector2::new(w, h)),
        (WallHit::Bottom, Vector2::new(-w, -h), Vector2::new(w, -h)),
    ];

    walls
        .into_iter()
        .find(|(_, a, b)| intersect(start, end, *a, *b).is_some())
        .map(|(wall, _, _)| wall)
}

/// New ball heading after travelling `start..end` into a paddle, or `None`
/// if no paddle edge is crossed.
///
/// Edges are tested left, right, top, bottom and the first hit wins.
/// Side hits mirror the x component. Top/bottom hits take their new y
/// component from where along the paddle the ball landed, so edge hits
/// leave at an angle.
pub fn resolve_paddle_collision(
    start: Vector2,
    end: Vector2,
    paddle: &PaddleRect,
) -> Option<Vector2> {
    let mut direction = (end - start).try_normalize()?;

    let top_left = Vector2::new(paddle.left, paddle.top);
    let top_right = Vector2::new(paddle.right, paddle.top);
    let bottom_left = Vector2::new(paddle.left, paddle.bottom);
    let bottom_right = Vector2::new(paddle.right, paddle.bottom);

    let edges = [
        (PaddleEdge::Left, top_left, bottom_left),
        (PaddleEdge::Right, top_right, bottom_right),
        (PaddleEdge::Top, top_left, top_right),
        (PaddleEdge::Bottom, bottom_left, bottom_right),
    ];

    let (edge, hit) = edges
        .into_iter()
        .find_map(|(edge, a, b)| intersect(start, end, a, b).map(|point| (edge, point)))?;

    match edge {
        PaddleEdge::Left | PaddleEdge::Right => {
            direction.x = -direction.x;
        }
        PaddleEdge::Top | PaddleEdge::Bottom => {
            // -1 at the top edge, 1 at the bottom edge
            let relative = (hit.y - paddle.top) / paddle.height();
            let offset = (relative - 0.5) * 2.0;
            direction.y = offset * 0.5;
        }
    }

    direction.try_normalize()
}
