//! Ball movement, serving and respawn delay

use rand::Rng;

use super::player::Side;
use super::vector::Vector2;

/// Bounds on |sin| of a served ball, so serves are never flat or vertical
const SERVE_MIN_SIN: f32 = 0.2;
const SERVE_MAX_SIN: f32 = 0.8;

#[derive(Debug, Clone)]
pub struct Ball {
    pub position: Vector2,
    /// Unit heading
    pub direction: Vector2,
    /// Distance travelled per tick
    pub speed: f32,
    pub moving: bool,
    base_speed: f32,
    speed_increment: f32,
    /// Ticks left before a reset ball starts moving again
    respawn_ticks: u32,
}

impl Ball {
    /// Ball at the centre, already moving in a random serve direction
    pub fn new<R: Rng>(base_speed: f32, speed_increment: f32, rng: &mut R) -> Self {
        let toward = if rng.gen_bool(0.5) { Side::Left } else { Side::Right };
        Self {
            position: Vector2::ZERO,
            direction: serve_direction(toward, rng),
            speed: base_speed,
            moving: true,
            base_speed,
            speed_increment,
            respawn_ticks: 0,
        }
    }

    /// Where the ball will be after this tick's movement
    pub fn projected(&self) -> Vector2 {
        if self.moving {
            self.position + self.direction.scale(self.speed)
        } else {
            self.position
        }
    }

    /// Integrate one tick of movement
    pub fn advance(&mut self) {
        if self.moving {
            self.position += self.direction.scale(self.speed);
        }
    }

    /// Re-centre after a point and serve toward `toward` once the delay elapses
    pub fn reset<R: Rng>(&mut self, toward: Side, respawn_ticks: u32, rng: &mut R) {
        self.position = Vector2::ZERO;
        self.direction = serve_direction(toward, rng);
        self.moving = false;
        self.respawn_ticks = respawn_ticks;
        if respawn_ticks == 0 {
            self.release();
        }
    }

    /// Count down the respawn delay; returns true on the tick the ball is released
    pub fn update_respawn(&mut self) -> bool {
        if self.moving || self.respawn_ticks == 0 {
            return false;
        }
        self.respawn_ticks -= 1;
        if self.respawn_ticks == 0 {
            self.release();
            true
        } else {
            false
        }
    }

    /// Speed-up applied on each paddle return
    pub fn increase_speed(&mut self) {
        self.speed += self.speed_increment;
    }

    fn release(&mut self) {
        self.moving = true;
        self.speed = self.base_speed;
    }
}

/// Random unit vector pointing at the `toward` side
pub fn serve_direction<R: Rng>(toward: Side, rng: &mut R) -> Vector2 {
    let sin = rng.gen_range(SERVE_MIN_SIN..=SERVE_MAX_SIN);
    let cos = (1.0 - sin * sin).sqrt();
    let vertical = if rng.gen_bool(0.5) { sin } else { -sin };
    Vector2::new(toward.sign() * cos, vertical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    #[test]
    fn serve_points_at_requested_side() {
        let mut rng = rng();
        for _ in 0..50 {
            let left = serve_direction(Side::Left, &mut rng);
            assert!(left.x < 0.0);
            assert!(left.y.abs() >= SERVE_MIN_SIN - 1e-6 && left.y.abs() <= SERVE_MAX_SIN + 1e-6);
            assert!((left.length() - 1.0).abs() < 1e-5);

            let right = serve_direction(Side::Right, &mut rng);
            assert!(right.x > 0.0);
        }
    }

    #[test]
    fn advance_moves_by_speed_along_direction() {
        let mut ball = Ball::new(4.0, 0.3, &mut rng());
        ball.direction = Vector2::new(1.0, 0.0);
        ball.advance();
        assert_eq!(ball.position, Vector2::new(4.0, 0.0));
    }

    #[test]
    fn reset_freezes_until_delay_elapses_and_restores_speed() {
        let mut rng = rng();
        let mut ball = Ball::new(4.0, 0.3, &mut rng);
        ball.increase_speed();
        ball.increase_speed();
        ball.position = Vector2::new(100.0, 50.0);

        ball.reset(Side::Left, 3, &mut rng);
        assert_eq!(ball.position, Vector2::ZERO);
        assert!(!ball.moving);

        ball.advance();
        assert_eq!(ball.position, Vector2::ZERO, "frozen ball must not move");
        assert_eq!(ball.projected(), Vector2::ZERO);

        assert!(!ball.update_respawn());
        assert!(!ball.update_respawn());
        assert!(ball.update_respawn());
        assert!(ball.moving);
        assert_eq!(ball.speed, ball.base_speed);
        assert!(ball.direction.x < 0.0);
    }

    #[test]
    fn speed_grows_on_each_return() {
        let mut ball = Ball::new(4.0, 0.5, &mut rng());
        ball.increase_speed();
        ball.increase_speed();
        assert_eq!(ball.speed, 5.0);
    }
}
