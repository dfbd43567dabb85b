//! Contest HTTP server
//!
//! Thin JSON surface over the lifecycle manager and the contribution
//! gateway. Callers are identified by the opaque `x-user-id` header.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::{CompetitionError, Result};
use crate::gateway::{ActivitySummary, ExternalContributionGateway, GatewayHealth, LinkedProfile};
use crate::lifecycle::CompetitionLifecycleManager;
use crate::models::{
    Competition, CompetitionFilter, CompetitionPatch, CompetitionStats, CompetitionStatus,
    ContributionClaim, CreateCompetition, Participation, Requirement, ValidationRule,
};
use crate::platforms::hacktoberfest::{HacktoberfestStatus, LeaderboardEntry};
use crate::platforms::{AuthOutcome, ContributionData, ProfileCheck, ValidationResult};
use crate::rate_limit::HealthStatus;

pub const USER_HEADER: &str = "x-user-id";

pub struct AppState {
    pub lifecycle: Arc<CompetitionLifecycleManager>,
    pub gateway: Arc<ExternalContributionGateway>,
    pub started_at: std::time::Instant,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/competitions",
            get(list_competitions).post(create_competition),
        )
        .route(
            "/competitions/:id",
            get(get_competition)
                .patch(update_competition)
                .delete(delete_competition),
        )
        .route("/competitions/:id/start", post(start_competition))
        .route("/competitions/:id/complete", post(complete_competition))
        .route("/competitions/:id/stats", get(competition_stats))
        .route(
            "/competitions/:id/participants",
            get(list_participants)
                .post(register_participant)
                .delete(unregister_participant),
        )
        .route("/competitions/:id/contributions", post(submit_contribution))
        .route("/platforms/:platform/authenticate", post(authenticate))
        .route("/platforms/:platform/profiles/:username", get(validate_profile))
        .route(
            "/platforms/:platform/users/:username/contributions",
            get(user_contributions),
        )
        .route("/activity", post(activity_summary))
        .route("/validate", post(validate_batch))
        .route("/hacktoberfest/leaderboard", get(hacktoberfest_leaderboard))
        .route("/hacktoberfest/status/:username", get(hacktoberfest_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Opaque caller identity taken from the `x-user-id` header
pub struct UserId(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = CompetitionError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or_else(|| CompetitionError::validation("x-user-id header is required"))
    }
}

type SharedState = State<Arc<AppState>>;

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub uptime_secs: u64,
    pub integrations: GatewayHealth,
}

async fn health_handler(State(state): SharedState) -> Json<HealthResponse> {
    let integrations = state.gateway.health_check().await;
    Json(HealthResponse {
        healthy: integrations.status != HealthStatus::Unhealthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        integrations,
    })
}

// ============================================================================
// Competitions
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    /// Comma separated
    pub tags: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListQuery {
    pub fn into_filter(self) -> Result<CompetitionFilter> {
        let status = match self.status.as_deref() {
            Some(s) => Some(CompetitionStatus::parse(s).ok_or_else(|| {
                CompetitionError::validation(format!("Unknown status '{}'", s))
            })?),
            None => None,
        };
        Ok(CompetitionFilter {
            kind: self.kind,
            status,
            tags: self
                .tags
                .map(|t| {
                    t.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            limit: self.limit,
            offset: self.offset,
        })
    }
}

async fn list_competitions(
    State(state): SharedState,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Competition>>> {
    let filter = query.into_filter()?;
    Ok(Json(state.lifecycle.list(&filter).await?))
}

async fn create_competition(
    State(state): SharedState,
    UserId(user): UserId,
    Json(request): Json<CreateCompetition>,
) -> Result<(StatusCode, Json<Competition>)> {
    let competition = state.lifecycle.create(request, &user).await?;
    Ok((StatusCode::CREATED, Json(competition)))
}

async fn get_competition(State(state): SharedState, Path(id): Path<Uuid>) -> Result<Json<Competition>> {
    state
        .lifecycle
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| CompetitionError::not_found(format!("Competition {} not found", id)))
}

async fn update_competition(
    State(state): SharedState,
    Path(id): Path<Uuid>,
    UserId(user): UserId,
    Json(patch): Json<CompetitionPatch>,
) -> Result<Json<Competition>> {
    info!("User {} updating competition {}", user, id);
    Ok(Json(state.lifecycle.update(id, patch).await?))
}

async fn delete_competition(
    State(state): SharedState,
    Path(id): Path<Uuid>,
    UserId(user): UserId,
) -> Result<StatusCode> {
    info!("User {} deleting competition {}", user, id);
    state.lifecycle.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_competition(
    State(state): SharedState,
    Path(id): Path<Uuid>,
    UserId(_user): UserId,
) -> Result<Json<Competition>> {
    Ok(Json(state.lifecycle.start(id).await?))
}

async fn complete_competition(
    State(state): SharedState,
    Path(id): Path<Uuid>,
    UserId(_user): UserId,
) -> Result<Json<Competition>> {
    Ok(Json(state.lifecycle.complete(id).await?))
}

async fn competition_stats(
    State(state): SharedState,
    Path(id): Path<Uuid>,
) -> Result<Json<CompetitionStats>> {
    Ok(Json(state.lifecycle.stats(id).await?))
}

// ============================================================================
// Participants
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub platform_handles: HashMap<String, String>,
}

async fn list_participants(
    State(state): SharedState,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Participation>>> {
    Ok(Json(state.lifecycle.participations(id).await?))
}

async fn register_participant(
    State(state): SharedState,
    Path(id): Path<Uuid>,
    UserId(user): UserId,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Participation>)> {
    let participation = state
        .lifecycle
        .register_participant(id, &user, request.platform_handles)
        .await?;
    Ok((StatusCode::CREATED, Json(participation)))
}

async fn unregister_participant(
    State(state): SharedState,
    Path(id): Path<Uuid>,
    UserId(user): UserId,
) -> Result<StatusCode> {
    state.lifecycle.unregister_participant(id, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub validation: ValidationResult,
    pub participation: Option<Participation>,
}

async fn submit_contribution(
    State(state): SharedState,
    Path(id): Path<Uuid>,
    UserId(user): UserId,
    Json(claim): Json<ContributionClaim>,
) -> Result<Json<SubmissionResponse>> {
    let (validation, participation) = state
        .lifecycle
        .validate_and_record(&state.gateway, id, &user, &claim)
        .await?;
    Ok(Json(SubmissionResponse {
        validation,
        participation,
    }))
}

// ============================================================================
// Platforms
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct AuthenticateRequest {
    pub code: Option<String>,
}

async fn authenticate(
    State(state): SharedState,
    Path(platform): Path<String>,
    UserId(user): UserId,
    Json(request): Json<AuthenticateRequest>,
) -> Result<Json<AuthOutcome>> {
    let outcome = state
        .gateway
        .authenticate_user(&platform, &user, request.code.as_deref())
        .await?;
    Ok(Json(outcome))
}

async fn validate_profile(
    State(state): SharedState,
    Path((platform, username)): Path<(String, String)>,
) -> Result<Json<ProfileCheck>> {
    Ok(Json(
        state
            .gateway
            .validate_user_profile(&platform, &username)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

async fn user_contributions(
    State(state): SharedState,
    Path((platform, username)): Path<(String, String)>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<ContributionData>>> {
    Ok(Json(
        state
            .gateway
            .fetch_user_contributions(&platform, &username, range.start, range.end)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ActivityRequest {
    pub profiles: Vec<LinkedProfile>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

async fn activity_summary(
    State(state): SharedState,
    Json(request): Json<ActivityRequest>,
) -> Result<Json<ActivitySummary>> {
    if request.end < request.start {
        return Err(CompetitionError::validation(
            "end date must not precede start date",
        ));
    }
    Ok(Json(
        state
            .gateway
            .get_user_activity_summary(&request.profiles, request.start, request.end)
            .await,
    ))
}

#[derive(Debug, Deserialize)]
pub struct BatchValidationRequest {
    pub contributions: Vec<ContributionData>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub rules: Vec<ValidationRule>,
}

async fn validate_batch(
    State(state): SharedState,
    Json(request): Json<BatchValidationRequest>,
) -> Json<Vec<ValidationResult>> {
    Json(state.gateway.validate_multiple_contributions(
        &request.contributions,
        &request.requirements,
        &request.rules,
    ))
}

// ============================================================================
// Hacktoberfest
// ============================================================================

async fn hacktoberfest_status(
    State(state): SharedState,
    Path(username): Path<String>,
) -> Result<Json<HacktoberfestStatus>> {
    let adapter = state.gateway.hacktoberfest()?;
    Ok(Json(adapter.hacktoberfest_status(&username).await?))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    /// Comma separated usernames
    pub users: String,
}

async fn hacktoberfest_leaderboard(
    State(state): SharedState,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>> {
    let adapter = state.gateway.hacktoberfest()?;
    let usernames: Vec<String> = query
        .users
        .split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect();
    if usernames.is_empty() {
        return Err(CompetitionError::validation("at least one username is required"));
    }
    Ok(Json(adapter.hacktoberfest_leaderboard(&usernames).await))
}

/// Run the server
pub async fn run_server(
    host: &str,
    port: u16,
    lifecycle: Arc<CompetitionLifecycleManager>,
    gateway: Arc<ExternalContributionGateway>,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        lifecycle,
        gateway,
        started_at: std::time::Instant::now(),
    });

    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting contest server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
