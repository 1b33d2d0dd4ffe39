//! WebSocket upgrade handlers for matchmaking, games and tournaments

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
};
use axum_extra::{headers::Cookie, TypedHeader};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::{
    GameError, GameMatch, LocalMatch, MatchId, MatchSetup, MatchStatus, PlayerId, TournamentId,
};
use crate::http::middleware::{verify_jwt, AuthError};
use crate::matchmaking::QueueKind;
use crate::tournament::{Tournament, TournamentStatus};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::ws::hub::{Connection, ConnectionHub};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Cookie set by the web client after login
const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Replies addressed to this socket only
const REPLY_CAPACITY: usize = 16;

/// How long a closing socket may take to flush
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token; the `access_token` cookie is used when absent
    #[serde(default)]
    pub token: Option<String>,
}

/// Resolve the caller's identity before upgrading
fn authenticate(
    query: &WsQuery,
    cookies: Option<&TypedHeader<Cookie>>,
    secret: &str,
) -> Result<PlayerId, AuthError> {
    let token = query
        .token
        .as_deref()
        .or_else(|| cookies.and_then(|c| c.get(ACCESS_TOKEN_COOKIE)))
        .ok_or(AuthError::MissingToken)?;
    Ok(verify_jwt(token, secret)?.user_id)
}

fn upgrade_or_reject<F, Fut>(
    ws: WebSocketUpgrade,
    query: WsQuery,
    cookies: Option<TypedHeader<Cookie>>,
    state: AppState,
    session: F,
) -> Response
where
    F: FnOnce(WebSocket, PlayerId, AppState) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    match authenticate(&query, cookies.as_ref(), &state.config.jwt_secret) {
        Ok(player_id) => ws.on_upgrade(move |socket| session(socket, player_id, state)),
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            e.into_response()
        }
    }
}

pub async fn matchmaking_ws(
    ws: WebSocketUpgrade,
    Path(kind): Path<QueueKind>,
    Query(query): Query<WsQuery>,
    cookies: Option<TypedHeader<Cookie>>,
    State(state): State<AppState>,
) -> Response {
    upgrade_or_reject(ws, query, cookies, state, move |socket, player_id, state| {
        run_matchmaking(socket, player_id, kind, state)
    })
}

pub async fn remote_game_ws(
    ws: WebSocketUpgrade,
    Path(game_id): Path<MatchId>,
    Query(query): Query<WsQuery>,
    cookies: Option<TypedHeader<Cookie>>,
    State(state): State<AppState>,
) -> Response {
    upgrade_or_reject(ws, query, cookies, state, move |socket, player_id, state| {
        run_remote_game(socket, player_id, game_id, state)
    })
}

pub async fn local_game_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    cookies: Option<TypedHeader<Cookie>>,
    State(state): State<AppState>,
) -> Response {
    upgrade_or_reject(ws, query, cookies, state, run_local_game)
}

pub async fn tournament_ws(
    ws: WebSocketUpgrade,
    Path(tournament_id): Path<TournamentId>,
    Query(query): Query<WsQuery>,
    cookies: Option<TypedHeader<Cookie>>,
    State(state): State<AppState>,
) -> Response {
    upgrade_or_reject(ws, query, cookies, state, move |socket, player_id, state| {
        run_tournament(socket, player_id, tournament_id, state)
    })
}

// ============================================================================
// Sessions
// ============================================================================

async fn run_matchmaking(socket: WebSocket, player_id: PlayerId, kind: QueueKind, state: AppState) {
    let mut session = Session::open(socket, player_id, state.hub.clone());
    state.matchmaking.enqueue(player_id, kind).await;

    while let Some(msg) = session.next_msg().await {
        match msg {
            ClientMsg::Enqueue { kind } => state.matchmaking.enqueue(player_id, kind).await,
            ClientMsg::Quit => break,
            other => debug!(player_id, ?other, "Ignoring message on matchmaking socket"),
        }
    }

    state.matchmaking.dequeue_on_disconnect(player_id).await;
    session.close().await;
}

async fn run_remote_game(socket: WebSocket, player_id: PlayerId, game_id: MatchId, state: AppState) {
    let mut session = Session::open(socket, player_id, state.hub.clone());
    let game = match join_remote_game(&state, player_id, game_id).await {
        Ok(game) => game,
        Err(err) => {
            warn!(player_id, match_id = game_id, error = %err, "Rejected game connection");
            session.reject(&err).await;
            return;
        }
    };
    state.hub.join_group(game.group(), &session.connection);
    session.reply(ServerMsg::GameState(game.snapshot(player_id)));

    while let Some(msg) = session.next_msg().await {
        match msg {
            ClientMsg::Ready => {
                if game.mark_ready(player_id) {
                    tokio::spawn(game.clone().start());
                }
            }
            ClientMsg::Update { movement, .. } => {
                let Some(movement) = movement else { continue };
                if let Err(err) = game.submit_raw_input(player_id, &movement) {
                    session.reply_error(&err);
                }
            }
            ClientMsg::Pause => {
                game.pause(player_id);
            }
            ClientMsg::Unpause => {
                game.unpause(Some(player_id));
            }
            ClientMsg::Quit => break,
            ClientMsg::Enqueue { .. } => debug!(player_id, "Ignoring enqueue on game socket"),
        }
    }

    // Before the countdown a disconnect only frees the seat
    if game.status() == MatchStatus::Waiting {
        game.remove_player(player_id);
    } else {
        game.quit(player_id).await;
    }
    session.close().await;
}

/// Find or load the match and seat the player
async fn join_remote_game(
    state: &AppState,
    player_id: PlayerId,
    game_id: MatchId,
) -> Result<GameMatch, GameError> {
    let game = match state.matches.get(game_id) {
        Some(game) => game,
        None => {
            let record = state.store.load_match(game_id).await?;
            if record.status.is_finished() {
                return Err(GameError::MatchFinished);
            }
            state.matches.get_or_create(MatchSetup::from(&record))
        }
    };
    game.add_player(player_id)?;
    info!(player_id, match_id = game_id, "Player connected to game");
    Ok(game)
}

async fn run_local_game(socket: WebSocket, player_id: PlayerId, state: AppState) {
    let mut session = Session::open(socket, player_id, state.hub.clone());
    let local = match LocalMatch::create(&state.matches, player_id) {
        Ok(local) => local,
        Err(err) => {
            error!(player_id, error = %err, "Failed to create local match");
            session.reject(&err).await;
            return;
        }
    };
    info!(player_id, "Local match created");
    state.hub.join_group(local.game().group(), &session.connection);
    session.reply(ServerMsg::GameState(local.game().snapshot(player_id)));

    while let Some(msg) = session.next_msg().await {
        match msg {
            ClientMsg::Ready => {
                if local.ready() {
                    tokio::spawn(local.game().clone().start());
                }
            }
            ClientMsg::Update {
                movement,
                p2movement,
            } => {
                if let Err(err) = local.submit(movement.as_deref(), p2movement.as_deref()) {
                    session.reply_error(&err);
                }
            }
            ClientMsg::Pause => {
                local.pause();
            }
            ClientMsg::Unpause => {
                local.unpause();
            }
            ClientMsg::Quit => break,
            ClientMsg::Enqueue { .. } => debug!(player_id, "Ignoring enqueue on local game socket"),
        }
    }

    local.quit().await;
    session.close().await;
}

async fn run_tournament(socket: WebSocket, player_id: PlayerId, tournament_id: TournamentId, state: AppState) {
    let mut session = Session::open(socket, player_id, state.hub.clone());
    let tournament = match find_tournament(&state, player_id, tournament_id).await {
        Ok(tournament) => tournament,
        Err(err) => {
            warn!(player_id, tournament_id, error = %err, "Rejected tournament connection");
            session.reject(&err).await;
            return;
        }
    };

    let group = tournament.group();
    state.hub.join_group(&group, &session.connection);
    session.reply(ServerMsg::TournamentInfo {
        tournament_id,
        tournament: tournament.bracket(),
    });

    while let Some(msg) = session.next_msg().await {
        match msg {
            ClientMsg::Ready => {
                if tournament.mark_ready(player_id) {
                    tokio::spawn(tournament.clone().start());
                }
            }
            ClientMsg::Quit => break,
            other => debug!(player_id, ?other, "Ignoring message on tournament socket"),
        }
    }

    state.hub.leave_group(&group, &session.connection);
    session.close().await;
}

async fn find_tournament(
    state: &AppState,
    player_id: PlayerId,
    tournament_id: TournamentId,
) -> Result<Tournament, GameError> {
    let tournament = match state.tournaments.get(tournament_id) {
        Some(tournament) => tournament,
        None => {
            let record = state.store.load_tournament(tournament_id).await?;
            if record.status == TournamentStatus::Finished {
                return Err(GameError::NotFound(format!("open tournament {tournament_id}")));
            }
            state.tournaments.get_or_create(&record)
        }
    };

    if tournament.status() == TournamentStatus::Finished {
        return Err(GameError::NotFound(format!("open tournament {tournament_id}")));
    }
    if !tournament.participants().contains(&player_id) {
        return Err(GameError::NotParticipant(player_id));
    }
    Ok(tournament)
}

// ============================================================================
// Socket plumbing
// ============================================================================

/// One upgraded socket: hub registration, writer task and reader half
struct Session {
    player_id: PlayerId,
    connection: Connection,
    hub: Arc<ConnectionHub>,
    stream: WsStream,
    replies: mpsc::Sender<ServerMsg>,
    writer: JoinHandle<()>,
    rate_limiter: PlayerRateLimiter,
}

impl Session {
    fn open(socket: WebSocket, player_id: PlayerId, hub: Arc<ConnectionHub>) -> Self {
        let (sink, stream) = socket.split();
        let (connection, outbound) = hub.register(player_id);
        let (replies, replies_rx) = mpsc::channel(REPLY_CAPACITY);
        let writer = tokio::spawn(write_loop(player_id, sink, outbound, replies_rx));
        info!(player_id, connection_id = %connection.id, "New WebSocket connection");

        Self {
            player_id,
            connection,
            hub,
            stream,
            replies,
            writer,
            rate_limiter: PlayerRateLimiter::new(),
        }
    }

    /// Send to this socket only
    fn reply(&self, msg: ServerMsg) {
        if self.replies.try_send(msg).is_err() {
            debug!(player_id = self.player_id, "Reply dropped");
        }
    }

    fn reply_error(&self, err: &GameError) {
        self.reply(ServerMsg::error(err.code(), err.to_string()));
    }

    /// Next client message that parses and passes the rate limit.
    /// Returns None once the client is gone.
    async fn next_msg(&mut self) -> Option<ClientMsg> {
        let player_id = self.player_id;
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        let allowed = match msg {
                            ClientMsg::Update { .. } => self.rate_limiter.check_input(),
                            _ => self.rate_limiter.check_control(),
                        };
                        if allowed {
                            return Some(msg);
                        }
                        warn!(player_id, "Rate limited client message");
                    }
                    Err(e) => {
                        warn!(player_id, error = %e, "Failed to parse client message");
                        self.reply(ServerMsg::error("invalid_message", e.to_string()));
                    }
                },
                Ok(Message::Binary(_)) => {
                    warn!(player_id, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    info!(player_id, "Client initiated close");
                    return None;
                }
                Err(e) => {
                    debug!(player_id, error = %e, "WebSocket error");
                    return None;
                }
            }
        }
        None
    }

    /// Tell the client why and hang up
    async fn reject(self, err: &GameError) {
        self.reply_error(err);
        self.close().await;
    }

    /// Unregister and let the writer flush what is already queued
    async fn close(self) {
        let Session {
            player_id,
            connection,
            hub,
            replies,
            writer,
            ..
        } = self;

        hub.unregister(&connection);
        drop(replies);
        if tokio::time::timeout(CLOSE_TIMEOUT, writer).await.is_err() {
            debug!(player_id, "Writer did not finish in time");
        }
        info!(player_id, "WebSocket connection closed");
    }
}

/// Drain hub messages and direct replies into the socket
async fn write_loop(
    player_id: PlayerId,
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<ServerMsg>,
    mut replies: mpsc::Receiver<ServerMsg>,
) {
    loop {
        let msg = tokio::select! {
            Some(msg) = replies.recv() => msg,
            Some(msg) = outbound.recv() => msg,
            else => break,
        };
        if let Err(e) = send_msg(&mut sink, &msg).await {
            debug!(player_id, error = %e, "WebSocket send failed");
            break;
        }
    }
    let _ = sink.close().await;
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut WsSink, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, GameSettings, QueueSettings, TournamentSettings};
    use crate::http::middleware::{sign_token, JwtClaims};

    const SECRET: &str = "ws-secret";

    fn token(user_id: PlayerId) -> String {
        let now = chrono::Utc::now().timestamp();
        sign_token(
            &JwtClaims {
                user_id,
                exp: now + 60,
                iat: now,
            },
            SECRET,
        )
    }

    fn test_state() -> AppState {
        AppState::new(Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "debug".to_string(),
            jwt_secret: SECRET.to_string(),
            store_url: None,
            store_api_key: None,
            client_origin: String::new(),
            game: GameSettings::default(),
            tournament: TournamentSettings::default(),
            queue: QueueSettings::default(),
        })
    }

    fn cookie(value: &str) -> TypedHeader<Cookie> {
        let header = axum::http::HeaderValue::from_str(value).unwrap();
        let cookie = axum_extra::headers::Header::decode(&mut std::iter::once(&header)).unwrap();
        TypedHeader(cookie)
    }

    #[test]
    fn query_token_identifies_player() {
        let query = WsQuery {
            token: Some(token(7)),
        };
        assert_eq!(authenticate(&query, None, SECRET).unwrap(), 7);
    }

    #[test]
    fn cookie_is_used_without_query_token() {
        let query = WsQuery { token: None };
        let cookies = cookie(&format!("theme=dark; access_token={}", token(9)));
        assert_eq!(authenticate(&query, Some(&cookies), SECRET).unwrap(), 9);
    }

    #[test]
    fn missing_token_is_rejected() {
        let query = WsQuery { token: None };
        let cookies = cookie("theme=dark");
        assert!(matches!(
            authenticate(&query, Some(&cookies), SECRET),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn queue_kind_parses_from_path_segment() {
        let kind: QueueKind = serde_json::from_str("\"tournament\"").unwrap();
        assert_eq!(kind, QueueKind::Tournament);
    }

    #[tokio::test]
    async fn finished_match_rejects_rejoin_even_when_save_failed() {
        let state = test_state();
        let record = state.store.create_match_record(vec![1, 2], None).await.unwrap();
        let game = join_remote_game(&state, 1, record.id).await.unwrap();
        join_remote_game(&state, 2, record.id).await.unwrap();

        state.store.fail_writes(true);
        game.quit(2).await;

        // The stored record still says waiting
        let stored = state.store.load_match(record.id).await.unwrap();
        assert_eq!(stored.status, MatchStatus::Waiting);

        assert!(matches!(
            join_remote_game(&state, 2, record.id).await,
            Err(GameError::MatchFinished)
        ));
        let live = state.matches.get(record.id).unwrap();
        assert_eq!(live.status(), MatchStatus::Finished);
        assert_eq!(live.winner(), Some(1));
    }

    #[tokio::test]
    async fn finished_record_is_not_reloaded() {
        let state = test_state();
        let record = state.store.create_match_record(vec![1, 2], None).await.unwrap();
        let game = join_remote_game(&state, 1, record.id).await.unwrap();
        join_remote_game(&state, 2, record.id).await.unwrap();
        game.quit(1).await;

        assert!(matches!(
            join_remote_game(&state, 1, record.id).await,
            Err(GameError::MatchFinished)
        ));
    }
}
