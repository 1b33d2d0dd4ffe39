//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// HS256 secret shared with the auth service
    pub jwt_secret: String,

    /// Base URL of the external game-record REST store (in-memory store when unset)
    pub store_url: Option<String>,
    /// API key sent to the game-record store
    pub store_api_key: Option<String>,

    /// Allowed client origins for CORS
    pub client_origin: String,

    pub game: GameSettings,
    pub tournament: TournamentSettings,
    pub queue: QueueSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR when both are present
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,

            store_url: env::var("STORE_URL").ok().filter(|url| !url.is_empty()),
            store_api_key: env::var("STORE_API_KEY").ok(),

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_default(),

            game: GameSettings::from_env()?,
            tournament: TournamentSettings::from_env()?,
            queue: QueueSettings::from_env()?,
        })
    }
}

/// Simulation tunables for a single match
#[derive(Clone, Debug)]
pub struct GameSettings {
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Countdown length in whole seconds
    pub countdown_secs: u32,
    /// Score that ends the match
    pub points_to_win: u32,
    /// How long a pause lasts before the match resumes on its own
    pub pause_duration: Duration,
    /// How long the ball stays frozen after a point
    pub respawn_delay: Duration,
    /// Ball speed in units per tick
    pub ball_speed: f32,
    /// Speed added on each paddle return
    pub ball_speed_increment: f32,
    /// Paddle speed in units per tick
    pub paddle_speed: f32,
}

impl GameSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            tick_rate: env_or("TICK_RATE", defaults.tick_rate)?.max(1),
            countdown_secs: env_or("COUNTDOWN_SECS", defaults.countdown_secs)?,
            points_to_win: env_or("POINTS_TO_WIN", defaults.points_to_win)?.max(1),
            pause_duration: Duration::from_secs(env_or("PAUSE_SECS", 30u64)?),
            respawn_delay: Duration::from_millis(env_or("RESPAWN_DELAY_MS", 1000u64)?),
            ball_speed: env_or("BALL_SPEED", defaults.ball_speed)?,
            ball_speed_increment: env_or("BALL_SPEED_INCREMENT", defaults.ball_speed_increment)?,
            paddle_speed: env_or("PADDLE_SPEED", defaults.paddle_speed)?,
        })
    }

    /// Wall-clock length of one simulation tick
    pub fn tick_duration(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate as u64)
    }

    /// Number of ticks the ball stays frozen after a point
    pub fn respawn_ticks(&self) -> u32 {
        (self.respawn_delay.as_secs_f32() * self.tick_rate as f32).round() as u32
    }
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            countdown_secs: 3,
            points_to_win: 10,
            pause_duration: Duration::from_secs(30),
            respawn_delay: Duration::from_secs(1),
            ball_speed: 4.0,
            ball_speed_increment: 0.3,
            paddle_speed: 6.0,
        }
    }
}

/// Bracket tunables
#[derive(Clone, Debug)]
pub struct TournamentSettings {
    /// Delay between publishing a bracket and announcing its matches
    pub grace_period: Duration,
    /// How often a running round is checked for completion
    pub round_poll_interval: Duration,
    /// Attempts to create a round's match records before giving up
    pub round_create_attempts: u32,
}

impl TournamentSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            grace_period: Duration::from_secs(env_or("GRACE_PERIOD_SECS", 5u64)?),
            round_poll_interval: Duration::from_millis(env_or("ROUND_POLL_MS", 1000u64)?.max(1)),
            round_create_attempts: env_or("ROUND_CREATE_ATTEMPTS", 5u32)?.max(1),
        })
    }
}

impl Default for TournamentSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            round_poll_interval: Duration::from_secs(1),
            round_create_attempts: 5,
        }
    }
}

/// Matchmaking group sizes
#[derive(Clone, Debug)]
pub struct QueueSettings {
    /// Players per direct match
    pub match_size: usize,
    /// Players per tournament
    pub tournament_size: usize,
}

impl QueueSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            match_size: env_or("MATCH_SIZE", defaults.match_size)?.max(2),
            tournament_size: env_or("TOURNAMENT_SIZE", defaults.tournament_size)?.max(2),
        })
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            match_size: 2,
            tournament_size: 4,
        }
    }
}

/// Read an optional variable, falling back to `default` when unset
fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
