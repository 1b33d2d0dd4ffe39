//! HTTP route definitions

use axum::{
    extract::{Extension, Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::debug;

use crate::app::AppState;
use crate::game::{MatchId, PlayerId, TournamentId};
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::matchmaking::QueueKind;
use crate::store::{PlayerStats, StoreError};
use crate::tournament::TournamentStatus;
use crate::util::time::uptime_secs;
use crate::ws::handler::{local_game_ws, matchmaking_ws, remote_game_ws, tournament_ws};
use crate::ws::protocol::{BracketGame, MatchSummary};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CLIENT_ORIGIN may hold several comma-separated origins
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // WebSockets authenticate from the query string or cookie themselves
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/games/:game_id", get(game_handler))
        .route("/tournaments/:tournament_id", get(tournament_handler))
        .route("/stats/:player_id", get(stats_handler))
        .route("/ws/matchmaking/:kind", get(matchmaking_ws))
        .route("/ws/game/remote/:game_id", get(remote_game_ws))
        .route("/ws/game/local", get(local_game_ws))
        .route("/ws/tournament/:tournament_id", get(tournament_ws));

    let protected_routes = Router::new()
        .route("/me/stats", get(my_stats_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    registered_matches: usize,
    active_tournaments: usize,
    registered_tournaments: usize,
    connected_players: usize,
    game_queue_size: usize,
    tournament_queue_size: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.matches.active_matches(),
        registered_matches: state.matches.len(),
        active_tournaments: state.tournaments.active_tournaments(),
        registered_tournaments: state.tournaments.len(),
        connected_players: state.hub.connected_players(),
        game_queue_size: state.matchmaking.queue_size(QueueKind::Game).await,
        tournament_queue_size: state.matchmaking.queue_size(QueueKind::Tournament).await,
    })
}

// ============================================================================
// Game and tournament views
// ============================================================================

/// Live match when registered, stored record otherwise
async fn game_handler(
    State(state): State<AppState>,
    Path(game_id): Path<MatchId>,
) -> Result<Json<MatchSummary>, AppError> {
    if let Some(game) = state.matches.get(game_id) {
        return Ok(Json(game.summary()));
    }

    let record = state.store.load_match(game_id).await?;
    Ok(Json(MatchSummary {
        id: Some(record.id),
        status: record.status,
        winner_id: record.winner_id,
        scores: record.scores,
        tournament_id: record.tournament_id,
        round: record.tournament_round,
    }))
}

#[derive(Serialize)]
struct TournamentResponse {
    id: TournamentId,
    status: TournamentStatus,
    participants: Vec<PlayerId>,
    winner_id: Option<PlayerId>,
    rounds: BTreeMap<u32, RoundView>,
}

#[derive(Serialize)]
struct RoundView {
    games: Vec<BracketGame>,
    bye: Option<PlayerId>,
}

async fn tournament_handler(
    State(state): State<AppState>,
    Path(tournament_id): Path<TournamentId>,
) -> Result<Json<TournamentResponse>, AppError> {
    if let Some(tournament) = state.tournaments.get(tournament_id) {
        let rounds = tournament
            .bracket()
            .into_iter()
            .map(|(round, games)| {
                let bye = tournament.bye(round);
                (round, RoundView { games, bye })
            })
            .collect();

        return Ok(Json(TournamentResponse {
            id: tournament.id(),
            status: tournament.status(),
            participants: tournament.participants().to_vec(),
            winner_id: tournament.champion(),
            rounds,
        }));
    }

    // Rounds of a tournament that is no longer live are not kept
    let record = state.store.load_tournament(tournament_id).await?;
    Ok(Json(TournamentResponse {
        id: record.id,
        status: record.status,
        participants: record.user_ids,
        winner_id: record.winner_id,
        rounds: BTreeMap::new(),
    }))
}

// ============================================================================
// Stats endpoints
// ============================================================================

async fn stats_handler(
    State(state): State<AppState>,
    Path(player_id): Path<PlayerId>,
) -> Result<Json<PlayerStats>, AppError> {
    Ok(Json(state.store.player_stats(player_id).await?))
}

async fn my_stats_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<PlayerStats>, AppError> {
    debug!(player_id = auth.player_id, token_issued_at = auth.claims.iat, "Own stats requested");
    Ok(Json(state.store.player_stats(auth.player_id).await?))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            other => AppError::Unavailable(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, Json(body)).into_response()
    }
}
