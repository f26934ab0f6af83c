//! HTTP API over the scoring engine and the progress store.
//!
//! Every response uses the `{ success, data }` / `{ success: false, message }`
//! envelope.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use tutor_core::progression::{clamp_level, clamp_xp};
use tutor_core::{
    analyze_request, AccuracyResult, AnalysisRequest, LevelCurve, LevelInfo, ProgressStore,
    SessionAccuracyState, SessionConfig, SessionTracker, TurnOutcome, TutorError, TutorResult,
    XpRequirement,
};
use tutor_store::SqliteStore;

const TURN_REASON: &str = "conversation turn";

pub struct AppState {
    store: Mutex<SqliteStore>,
    curve: LevelCurve,
    session_config: SessionConfig,
    /// The map lock is only held to look up or insert a tracker. Each
    /// learner's turns serialize on their own tracker lock.
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionTracker>>>>,
}

impl AppState {
    pub fn new(store: SqliteStore, curve: LevelCurve, session_config: SessionConfig) -> Self {
        Self {
            store: Mutex::new(store),
            curve,
            session_config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The learner's tracker, created from their stored XP on first use.
    async fn session(&self, user_id: &str) -> TutorResult<Arc<Mutex<SessionTracker>>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(user_id) {
            return Ok(Arc::clone(session));
        }
        let total_xp = self.store.lock().await.total_xp(user_id)?;
        let tracker = SessionTracker::with_config(self.session_config, self.curve)
            .with_total_xp(total_xp);
        let session = Arc::new(Mutex::new(tracker));
        sessions.insert(user_id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    async fn existing_session(&self, user_id: &str) -> Option<Arc<Mutex<SessionTracker>>> {
        self.sessions.lock().await.get(user_id).cloned()
    }
}

type AppStateArc = Arc<AppState>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/accuracy/analyze", post(analyze))
        .route("/api/levels/info", post(level_info))
        .route("/api/levels/xp-required", post(xp_required))
        .route("/api/levels/award", post(award))
        .route("/api/levels/{user_id}", get(learner_level))
        .route("/api/sessions/turn", post(session_turn))
        .route("/api/sessions/{user_id}", get(session_state))
        .with_state(Arc::new(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until it fails.
pub async fn run(state: AppState, bind: &str) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("cannot bind {bind}"))?;
    info!("tutor API listening on http://{bind}");
    axum::serve(listener, app).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<TutorError> for ApiError {
    fn from(e: TutorError) -> Self {
        let status = match &e {
            TutorError::NotFound(_) => StatusCode::NOT_FOUND,
            TutorError::OutOfOrder { .. } | TutorError::SequenceExhausted(_) => {
                StatusCode::CONFLICT
            }
            TutorError::InvalidCurve(_) | TutorError::Config(_) => StatusCode::BAD_REQUEST,
            TutorError::Database(_) | TutorError::Serialization(_) => {
                error!("request failed: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "success": false, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LevelInfoRequest {
    #[serde(rename = "totalXP")]
    total_xp: i64,
}

#[derive(Debug, Deserialize)]
struct XpRequiredRequest {
    level: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AwardRequest {
    user_id: String,
    xp_amount: i64,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TurnRequest {
    #[serde(rename = "userId")]
    user_id: String,
    message: String,
    #[serde(default)]
    seq: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn analyze(
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> ApiResult<AccuracyResult> {
    let Json(req) = payload?;
    Ok(ok(analyze_request(&req)))
}

async fn level_info(
    State(state): State<AppStateArc>,
    payload: Result<Json<LevelInfoRequest>, JsonRejection>,
) -> ApiResult<LevelInfo> {
    let Json(req) = payload?;
    Ok(ok(state.curve.level_info(clamp_xp(req.total_xp))))
}

async fn xp_required(
    State(state): State<AppStateArc>,
    payload: Result<Json<XpRequiredRequest>, JsonRejection>,
) -> ApiResult<XpRequirement> {
    let Json(req) = payload?;
    Ok(ok(state.curve.requirement(clamp_level(req.level))))
}

async fn award(
    State(state): State<AppStateArc>,
    payload: Result<Json<AwardRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(req) = payload?;
    if req.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("userId must not be empty"));
    }
    let reason = req.reason.as_deref().unwrap_or("manual award");

    let award = {
        let store = state.store.lock().await;
        store.award_xp(&req.user_id, req.xp_amount, reason, &state.curve)?
    };
    if let Some(session) = state.existing_session(&req.user_id).await {
        session.lock().await.sync_total_xp(award.new_total_xp);
    }

    let mut data = serde_json::to_value(award).map_err(TutorError::from)?;
    data["levelInfo"] = serde_json::to_value(state.curve.level_info(award.new_total_xp))
        .map_err(TutorError::from)?;
    Ok(ok(data))
}

async fn learner_level(
    State(state): State<AppStateArc>,
    Path(user_id): Path<String>,
) -> ApiResult<LevelInfo> {
    let learner = state.store.lock().await.learner(&user_id)?;
    match learner {
        Some(l) => Ok(ok(l.level_info(&state.curve))),
        None => Err(TutorError::NotFound(format!("learner not found: {user_id}")).into()),
    }
}

async fn session_turn(
    State(state): State<AppStateArc>,
    payload: Result<Json<TurnRequest>, JsonRejection>,
) -> ApiResult<TurnOutcome> {
    let Json(req) = payload?;
    if req.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("userId must not be empty"));
    }

    let session = state.session(&req.user_id).await?;
    let mut session = session.lock().await;
    let seq = match req.seq {
        Some(seq) => seq,
        None => session.next_seq()?,
    };

    // Advance a copy and keep it only once the XP is stored, so a failed
    // write leaves the seq free for a retry.
    let mut next = session.clone();
    let outcome = next.process_turn(seq, &req.message)?;
    let award = state.store.lock().await.award_turn(
        &req.user_id,
        &outcome,
        TURN_REASON,
        &state.curve,
    )?;
    if let Some(award) = award {
        next.sync_total_xp(award.new_total_xp);
    }
    *session = next;
    Ok(ok(outcome))
}

async fn session_state(
    State(state): State<AppStateArc>,
    Path(user_id): Path<String>,
) -> ApiResult<SessionAccuracyState> {
    match state.existing_session(&user_id).await {
        Some(session) => Ok(ok(session.lock().await.snapshot())),
        None => Err(TutorError::NotFound(format!("no active session for {user_id}")).into()),
    }
}
