//! Read-only JSON API over the store. The only mutation is acknowledging a status change.

use axum::{
    extract::{rejection::QueryRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::future::{ready, Future};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::model::{Domain, DomainInfo, Program, ProgramType, Stats, StatusChange};
use crate::store::Store;

pub const DEFAULT_DOMAIN_LIMIT: usize = 100;
pub const DEFAULT_CHANGE_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 1000;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "store query failed");
        Self::internal("Store query failed")
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub program: Option<String>,
    pub unnotified: Option<bool>,
}

impl ListParams {
    fn limit_or(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, MAX_LIMIT)
    }
}

/// `Query<ListParams>` that rejects malformed parameters with an [`ApiError`] body.
#[derive(Debug)]
pub struct ListQuery(pub ListParams);

impl<S> FromRequestParts<S> for ListQuery
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let parsed = Query::<ListParams>::try_from_uri(&parts.uri)
            .map(|Query(params)| ListQuery(params))
            .map_err(ApiError::from);
        ready(parsed)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/domains", get(domains))
        .route("/api/v1/domains/new", get(new_domains))
        .route("/api/v1/domains/program/{program}", get(program_domains))
        .route("/api/v1/domains/program/{program}/{domain}/info", get(domain_info))
        .route("/api/v1/programs", get(programs))
        .route("/api/v1/programs/rdp", get(rdp_programs))
        .route("/api/v1/programs/vdp", get(vdp_programs))
        .route("/api/v1/programs/bounties", get(bounty_programs))
        .route("/api/v1/status-changes", get(status_changes))
        .route("/api/v1/status-changes/unnotified", get(unnotified_changes))
        .route("/api/v1/status-changes/{id}/notified", post(mark_notified))
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` fires.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "read API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn stats(State(state): State<AppState>) -> ApiResult<Json<Stats>> {
    Ok(Json(state.store.stats().await?))
}

async fn domains(State(state): State<AppState>, ListQuery(params): ListQuery) -> ApiResult<Json<Vec<Domain>>> {
    let limit = params.limit_or(DEFAULT_DOMAIN_LIMIT);
    let rows = match params.program.as_deref().filter(|p| !p.is_empty()) {
        Some(program) => state.store.list_domains_by_program(program, limit).await?,
        None => state.store.list_new_domains(limit).await?,
    };
    Ok(Json(rows))
}

async fn new_domains(State(state): State<AppState>, ListQuery(params): ListQuery) -> ApiResult<Json<Vec<Domain>>> {
    Ok(Json(state.store.list_new_domains(params.limit_or(DEFAULT_DOMAIN_LIMIT)).await?))
}

async fn program_domains(
    State(state): State<AppState>,
    Path(program): Path<String>,
    ListQuery(params): ListQuery,
) -> ApiResult<Json<Vec<Domain>>> {
    let rows = state
        .store
        .list_domains_by_program(&program, params.limit_or(DEFAULT_DOMAIN_LIMIT))
        .await?;
    Ok(Json(rows))
}

async fn domain_info(
    State(state): State<AppState>,
    Path((program, domain)): Path<(String, String)>,
) -> ApiResult<Json<DomainInfo>> {
    state
        .store
        .get_domain_info(&domain, &program)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no enrichment data for {} in {}", domain, program)))
}

async fn programs(State(state): State<AppState>, ListQuery(params): ListQuery) -> ApiResult<Json<Vec<Program>>> {
    Ok(Json(state.store.list_programs(params.limit_or(DEFAULT_DOMAIN_LIMIT)).await?))
}

async fn rdp_programs(State(state): State<AppState>, ListQuery(params): ListQuery) -> ApiResult<Json<Vec<Program>>> {
    let limit = params.limit_or(DEFAULT_DOMAIN_LIMIT);
    Ok(Json(state.store.list_programs_by_type(ProgramType::Rdp, limit).await?))
}

async fn vdp_programs(State(state): State<AppState>, ListQuery(params): ListQuery) -> ApiResult<Json<Vec<Program>>> {
    let limit = params.limit_or(DEFAULT_DOMAIN_LIMIT);
    Ok(Json(state.store.list_programs_by_type(ProgramType::Vdp, limit).await?))
}

async fn bounty_programs(
    State(state): State<AppState>,
    ListQuery(params): ListQuery,
) -> ApiResult<Json<Vec<Program>>> {
    Ok(Json(state.store.list_bounty_programs(params.limit_or(DEFAULT_DOMAIN_LIMIT)).await?))
}

async fn status_changes(
    State(state): State<AppState>,
    ListQuery(params): ListQuery,
) -> ApiResult<Json<Vec<StatusChange>>> {
    let only_unnotified = params.unnotified.unwrap_or(false);
    let rows = state
        .store
        .list_status_changes(only_unnotified, params.limit_or(DEFAULT_CHANGE_LIMIT))
        .await?;
    Ok(Json(rows))
}

async fn unnotified_changes(
    State(state): State<AppState>,
    ListQuery(params): ListQuery,
) -> ApiResult<Json<Vec<StatusChange>>> {
    Ok(Json(state.store.list_status_changes(true, params.limit_or(DEFAULT_CHANGE_LIMIT)).await?))
}

async fn mark_notified(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<serde_json::Value>> {
    if state.store.mark_notified(id).await? {
        Ok(Json(json!({ "id": id, "notified": true })))
    } else {
        Err(ApiError::not_found(format!("status change {} not found", id)))
    }
}
