//! HTTP client for a running `qdesk` server, used by the CLI subcommands.

use chrono::NaiveDate;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::dashboard::{
    AssignRequest, AutoAssignResponse, DeskActiveRequest, DeskOperatorRequest, DeskStatusRequest,
    ErrorResponse, PayRequest, RegisterDeskRequest, SettingsRequest, TakeTokenRequest, Transition,
};
use crate::queue::audit::Violation;
use crate::queue::{Desk, DeskStatus, SystemSettings, Token, TokenStatus};
use crate::service::{Assignment, Board, Completion, DailySummary};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Api { status: StatusCode, message: String },
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status(),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> ClientResult<T> {
        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        Err(ClientError::Api { status, message })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.send::<(), T>(Method::GET, path, None).await
    }

    async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.send::<(), T>(Method::POST, path, None).await
    }

    pub async fn health(&self) -> ClientResult<serde_json::Value> {
        self.get("/api/health").await
    }

    pub async fn board(&self) -> ClientResult<Board> {
        self.get("/api/board").await
    }

    // Tokens

    pub async fn take_token(&self, name: &str) -> ClientResult<Token> {
        let body = TakeTokenRequest {
            name: name.to_string(),
        };
        self.send(Method::POST, "/api/tokens", Some(&body)).await
    }

    pub async fn tokens(&self, statuses: &[TokenStatus]) -> ClientResult<Vec<Token>> {
        if statuses.is_empty() {
            return self.get("/api/tokens").await;
        }
        let filter: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        self.get(&format!("/api/tokens?status={}", filter.join(",")))
            .await
    }

    pub async fn token(&self, id: Uuid) -> ClientResult<Token> {
        self.get(&format!("/api/tokens/{}", id)).await
    }

    pub async fn token_by_number(&self, token_number: u64) -> ClientResult<Token> {
        self.get(&format!("/api/tokens/number/{}", token_number))
            .await
    }

    pub async fn complete_token(&self, id: Uuid) -> ClientResult<Transition<Completion>> {
        self.post_empty(&format!("/api/tokens/{}/complete", id))
            .await
    }

    pub async fn pay_token(
        &self,
        id: Uuid,
        fee_cents: Option<u64>,
    ) -> ClientResult<Transition<Token>> {
        let body = PayRequest { fee_cents };
        self.send(Method::POST, &format!("/api/tokens/{}/pay", id), Some(&body))
            .await
    }

    pub async fn cancel_token(&self, id: Uuid) -> ClientResult<Transition<Token>> {
        self.post_empty(&format!("/api/tokens/{}/cancel", id))
            .await
    }

    pub async fn assign(&self, token_id: Uuid, desk_id: Uuid) -> ClientResult<Assignment> {
        let body = AssignRequest { desk_id };
        self.send(
            Method::POST,
            &format!("/api/tokens/{}/assign", token_id),
            Some(&body),
        )
        .await
    }

    // Desks

    pub async fn register_desk(&self, name: &str, operator_name: &str) -> ClientResult<Desk> {
        let body = RegisterDeskRequest {
            name: name.to_string(),
            operator_name: operator_name.to_string(),
        };
        self.send(Method::POST, "/api/desks", Some(&body)).await
    }

    pub async fn desks(&self) -> ClientResult<Vec<Desk>> {
        self.get("/api/desks").await
    }

    pub async fn desk_by_number(&self, desk_number: u64) -> ClientResult<Desk> {
        self.get(&format!("/api/desks/number/{}", desk_number))
            .await
    }

    pub async fn complete_desk(&self, desk_number: u64) -> ClientResult<Transition<Completion>> {
        self.post_empty(&format!("/api/desks/number/{}/complete", desk_number))
            .await
    }

    pub async fn set_desk_status(
        &self,
        desk_id: Uuid,
        status: DeskStatus,
    ) -> ClientResult<Transition<Desk>> {
        let body = DeskStatusRequest { status };
        self.send(
            Method::PUT,
            &format!("/api/desks/{}/status", desk_id),
            Some(&body),
        )
        .await
    }

    pub async fn set_desk_active(&self, desk_id: Uuid, is_active: bool) -> ClientResult<Desk> {
        let body = DeskActiveRequest { is_active };
        self.send(
            Method::PUT,
            &format!("/api/desks/{}/active", desk_id),
            Some(&body),
        )
        .await
    }

    pub async fn set_desk_operator(&self, desk_id: Uuid, operator_name: &str) -> ClientResult<Desk> {
        let body = DeskOperatorRequest {
            operator_name: operator_name.to_string(),
        };
        self.send(
            Method::PUT,
            &format!("/api/desks/{}/operator", desk_id),
            Some(&body),
        )
        .await
    }

    // Administration

    pub async fn auto_assign(&self) -> ClientResult<AutoAssignResponse> {
        self.post_empty("/api/auto-assign").await
    }

    pub async fn settings(&self) -> ClientResult<SystemSettings> {
        self.get("/api/settings").await
    }

    pub async fn set_auto_assign(&self, enabled: bool) -> ClientResult<SystemSettings> {
        let body = SettingsRequest {
            auto_assign_enabled: enabled,
        };
        self.send(Method::PUT, "/api/settings", Some(&body)).await
    }

    pub async fn summary(&self, date: Option<NaiveDate>) -> ClientResult<DailySummary> {
        match date {
            Some(date) => self.get(&format!("/api/summary?date={}", date)).await,
            None => self.get("/api/summary").await,
        }
    }

    pub async fn audit(&self) -> ClientResult<Vec<Violation>> {
        self.get("/api/audit").await
    }

    pub async fn reconcile(&self) -> ClientResult<Vec<Violation>> {
        self.post_empty("/api/reconcile").await
    }
}
