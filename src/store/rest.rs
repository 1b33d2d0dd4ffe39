//! PostgREST client for the external game-record store

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::game::{MatchId, MatchStatus, PlayerId, TournamentId, TournamentSlot};
use crate::tournament::TournamentStatus;

use super::records::{
    MatchRecord, MatchResult, NewMatchRecord, NewTournamentRecord, PlayerStats, TournamentRecord,
};
use super::StoreError;

const GAMES: &str = "games";
const TOURNAMENTS: &str = "tournaments";

/// Server-side REST client. The API key grants full table access.
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn get<T: DeserializeOwned>(&self, table: &str, query: &str) -> Result<Vec<T>, StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self.authorized(self.client.get(&url)).send().await?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(StoreError::Parse)
    }

    /// Single row by query, `NotFound` when no row matches
    async fn get_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
        what: String,
    ) -> Result<T, StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self
            .authorized(self.client.get(&url))
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await?;

        // PostgREST answers 406 when the object query matched no rows
        if response.status() == StatusCode::NOT_ACCEPTABLE {
            return Err(StoreError::NotFound(what));
        }

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(StoreError::Parse)
    }

    async fn insert<T: Serialize, R: DeserializeOwned>(&self, table: &str, data: &T) -> Result<R, StoreError> {
        let response = self
            .authorized(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await?;

        // PostgREST returns an array, get first element
        let rows: Vec<R> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(StoreError::Parse)?;
        rows.into_iter().next().ok_or(StoreError::NoRowReturned)
    }

    async fn update<T: Serialize>(&self, table: &str, query: &str, data: &T) -> Result<(), StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self
            .authorized(self.client.patch(&url))
            .json(data)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn create_match_record(
        &self,
        user_ids: Vec<PlayerId>,
        tournament: Option<TournamentSlot>,
    ) -> Result<MatchRecord, StoreError> {
        let row = NewMatchRecord {
            user_ids,
            status: MatchStatus::Waiting,
            tournament_id: tournament.map(|t| t.tournament_id),
            tournament_round: tournament.map(|t| t.round),
        };
        self.insert(GAMES, &row).await
    }

    pub async fn create_tournament_record(&self, user_ids: Vec<PlayerId>) -> Result<TournamentRecord, StoreError> {
        let row = NewTournamentRecord {
            user_ids,
            status: TournamentStatus::Waiting,
        };
        self.insert(TOURNAMENTS, &row).await
    }

    pub async fn load_match(&self, id: MatchId) -> Result<MatchRecord, StoreError> {
        self.get_one(GAMES, &format!("id=eq.{id}"), format!("game {id}"))
            .await
    }

    pub async fn load_tournament(&self, id: TournamentId) -> Result<TournamentRecord, StoreError> {
        self.get_one(TOURNAMENTS, &format!("id=eq.{id}"), format!("tournament {id}"))
            .await
    }

    pub async fn save_match_result(&self, id: MatchId, result: &MatchResult) -> Result<(), StoreError> {
        let patch = json!({
            "status": MatchStatus::Finished,
            "winner_id": result.winner_id,
            "scores": result.scores,
        });
        self.update(GAMES, &format!("id=eq.{id}"), &patch).await
    }

    pub async fn save_tournament_result(
        &self,
        id: TournamentId,
        status: TournamentStatus,
        winner_id: Option<PlayerId>,
    ) -> Result<(), StoreError> {
        let patch = json!({ "status": status, "winner_id": winner_id });
        self.update(TOURNAMENTS, &format!("id=eq.{id}"), &patch).await
    }

    pub async fn player_stats(&self, player_id: PlayerId) -> Result<PlayerStats, StoreError> {
        let query = format!("user_ids=cs.{{{player_id}}}&status=eq.finished");
        let records: Vec<MatchRecord> = self.get(GAMES, &query).await?;
        Ok(PlayerStats::tally(player_id, &records))
    }
}
