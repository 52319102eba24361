use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::audit::Violation;
use crate::queue::{Desk, DeskStatus, Outcome, SystemSettings, Token, TokenStatus};
use crate::service::{Assignment, Board, Completion, DailySummary, QueueService};
use crate::store::{DeskQuery, TokenQuery};

#[derive(Clone)]
pub struct DashboardState {
    pub service: Arc<QueueService>,
}

impl DashboardState {
    pub fn new(service: Arc<QueueService>) -> Self {
        Self { service }
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Result of a transition that may have been a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition<T> {
    pub applied: bool,
    pub result: T,
}

impl<T> From<Outcome<T>> for Transition<T> {
    fn from(outcome: Outcome<T>) -> Self {
        let applied = outcome.is_applied();
        Self {
            applied,
            result: outcome.into_inner(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AutoAssignResponse {
    pub assigned: bool,
    pub assignment: Option<Assignment>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TakeTokenRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterDeskRequest {
    pub name: String,
    #[serde(default)]
    pub operator_name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PayRequest {
    pub fee_cents: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignRequest {
    pub desk_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeskStatusRequest {
    pub status: DeskStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeskActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeskOperatorRequest {
    pub operator_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SettingsRequest {
    pub auto_assign_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct TokenListParams {
    /// Comma-separated statuses
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeskListParams {
    status: Option<String>,
    #[serde(default)]
    active_only: bool,
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
    date: Option<NaiveDate>,
}

fn parse_statuses<T: std::str::FromStr<Err = String>>(raw: Option<&str>) -> Result<Vec<T>, QueueError> {
    raw.unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().map_err(QueueError::Validation))
        .collect()
}

impl IntoResponse for QueueError {
    fn into_response(self) -> Response {
        let status = match &self {
            QueueError::TokenNotFound(_) | QueueError::DeskNotFound(_) => StatusCode::NOT_FOUND,
            QueueError::Validation(_) => StatusCode::BAD_REQUEST,
            QueueError::InvalidTransition(_) | QueueError::Conflict(_) => StatusCode::CONFLICT,
            QueueError::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            QueueError::Store(_) | QueueError::Io(_) | QueueError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Store operation failed");
            "Internal store error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, QueueError>;

/// `Json` whose rejections are reported as validation errors, so a bad body
/// gets the same 400 and `{"error"}` shape as every other bad input.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = QueueError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(QueueError::Validation(rejection.body_text())),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/board", get(board_handler))
        .route("/api/tokens", get(list_tokens_handler).post(take_token_handler))
        .route("/api/tokens/number/:number", get(token_by_number_handler))
        .route("/api/tokens/:id", get(get_token_handler))
        .route("/api/tokens/:id/complete", post(complete_token_handler))
        .route("/api/tokens/:id/pay", post(pay_token_handler))
        .route("/api/tokens/:id/cancel", post(cancel_token_handler))
        .route("/api/tokens/:id/assign", post(assign_token_handler))
        .route("/api/desks", get(list_desks_handler).post(register_desk_handler))
        .route("/api/desks/number/:number", get(desk_by_number_handler))
        .route("/api/desks/number/:number/complete", post(complete_desk_handler))
        .route("/api/desks/:id/status", put(desk_status_handler))
        .route("/api/desks/:id/active", put(desk_active_handler))
        .route("/api/desks/:id/operator", put(desk_operator_handler))
        .route("/api/auto-assign", post(auto_assign_handler))
        .route("/api/settings", get(get_settings_handler).put(put_settings_handler))
        .route("/api/summary", get(summary_handler))
        .route("/api/audit", get(audit_handler))
        .route("/api/reconcile", post(reconcile_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on an already bound listener until `shutdown` fires.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: DashboardState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn board_handler(State(state): State<DashboardState>) -> ApiResult<Board> {
    Ok(Json(state.service.board().await?))
}

async fn list_tokens_handler(
    State(state): State<DashboardState>,
    Query(params): Query<TokenListParams>,
) -> ApiResult<Vec<Token>> {
    let query = TokenQuery {
        statuses: parse_statuses::<TokenStatus>(params.status.as_deref())?,
        ..TokenQuery::default()
    };
    Ok(Json(state.service.tokens(&query).await?))
}

async fn take_token_handler(
    State(state): State<DashboardState>,
    ApiJson(payload): ApiJson<TakeTokenRequest>,
) -> Result<(StatusCode, Json<Token>), QueueError> {
    let token = state.service.take_token(&payload.name).await?;
    Ok((StatusCode::CREATED, Json(token)))
}

async fn get_token_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Token> {
    Ok(Json(state.service.token(id).await?))
}

async fn token_by_number_handler(
    State(state): State<DashboardState>,
    Path(number): Path<u64>,
) -> ApiResult<Token> {
    Ok(Json(state.service.token_by_number(number).await?))
}

async fn complete_token_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Transition<Completion>> {
    Ok(Json(state.service.complete_token(id).await?.into()))
}

async fn pay_token_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Transition<Token>> {
    // The body is optional; when present it must parse
    let fee_cents = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<PayRequest>(&body)
            .map_err(|e| QueueError::Validation(format!("invalid payment body: {}", e)))?
            .fee_cents
    };
    Ok(Json(state.service.pay_token(id, fee_cents).await?.into()))
}

async fn cancel_token_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Transition<Token>> {
    Ok(Json(state.service.cancel_token(id).await?.into()))
}

async fn assign_token_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<AssignRequest>,
) -> ApiResult<Assignment> {
    Ok(Json(state.service.assign(id, payload.desk_id).await?))
}

async fn list_desks_handler(
    State(state): State<DashboardState>,
    Query(params): Query<DeskListParams>,
) -> ApiResult<Vec<Desk>> {
    let query = DeskQuery {
        statuses: parse_statuses::<DeskStatus>(params.status.as_deref())?,
        active_only: params.active_only,
        ..DeskQuery::default()
    };
    Ok(Json(state.service.desks(&query).await?))
}

async fn register_desk_handler(
    State(state): State<DashboardState>,
    ApiJson(payload): ApiJson<RegisterDeskRequest>,
) -> Result<(StatusCode, Json<Desk>), QueueError> {
    let desk = state
        .service
        .register_desk(&payload.name, &payload.operator_name)
        .await?;
    Ok((StatusCode::CREATED, Json(desk)))
}

async fn desk_by_number_handler(
    State(state): State<DashboardState>,
    Path(number): Path<u64>,
) -> ApiResult<Desk> {
    Ok(Json(state.service.desk_by_number(number).await?))
}

async fn complete_desk_handler(
    State(state): State<DashboardState>,
    Path(number): Path<u64>,
) -> ApiResult<Transition<Completion>> {
    Ok(Json(state.service.complete_desk(number).await?.into()))
}

async fn desk_status_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<DeskStatusRequest>,
) -> ApiResult<Transition<Desk>> {
    Ok(Json(
        state.service.set_desk_status(id, payload.status).await?.into(),
    ))
}

async fn desk_active_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<DeskActiveRequest>,
) -> ApiResult<Desk> {
    Ok(Json(state.service.set_desk_active(id, payload.is_active).await?))
}

async fn desk_operator_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<DeskOperatorRequest>,
) -> ApiResult<Desk> {
    Ok(Json(
        state
            .service
            .set_desk_operator(id, &payload.operator_name)
            .await?,
    ))
}

async fn auto_assign_handler(State(state): State<DashboardState>) -> ApiResult<AutoAssignResponse> {
    let assignment = state.service.auto_assign_once().await?;
    Ok(Json(AutoAssignResponse {
        assigned: assignment.is_some(),
        assignment,
    }))
}

async fn get_settings_handler(State(state): State<DashboardState>) -> ApiResult<SystemSettings> {
    Ok(Json(state.service.settings().await?))
}

async fn put_settings_handler(
    State(state): State<DashboardState>,
    ApiJson(payload): ApiJson<SettingsRequest>,
) -> ApiResult<SystemSettings> {
    Ok(Json(
        state
            .service
            .set_auto_assign(payload.auto_assign_enabled)
            .await?,
    ))
}

async fn summary_handler(
    State(state): State<DashboardState>,
    Query(params): Query<SummaryParams>,
) -> ApiResult<DailySummary> {
    let date = params.date.unwrap_or_else(|| Utc::now().date_naive());
    Ok(Json(state.service.daily_summary(date).await?))
}

async fn audit_handler(State(state): State<DashboardState>) -> ApiResult<Vec<Violation>> {
    Ok(Json(state.service.audit().await?))
}

async fn reconcile_handler(State(state): State<DashboardState>) -> ApiResult<Vec<Violation>> {
    Ok(Json(state.service.reconcile().await?))
}
