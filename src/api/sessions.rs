use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::BearerToken;
use crate::core::state::{AppState, GradingSession};
use crate::core::time::now_utc;
use crate::schemas::grading::GradedResult;
use crate::schemas::session::{
    BatchAccepted, BatchCreate, BatchProgressResponse, RegradeCreate, SessionCreate,
    SessionResponse,
};
use crate::schemas::submission::ExportRow;
use crate::services::platform::{AuthContext, Platform};
use crate::tasks::grading::{BatchRequest, GradingOrchestrator, RegradeRequest, RetryPolicy};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session))
        .route("/:session_id", get(get_session).delete(delete_session))
        .route("/:session_id/batches", post(start_batch))
        .route("/:session_id/batches/:batch_id", get(get_batch))
        .route("/:session_id/batches/:batch_id/cancel", post(cancel_batch))
        .route("/:session_id/submissions/:submission_id/regrade", post(regrade_submission))
        .route("/:session_id/results", get(list_results))
        .route("/:session_id/export", get(export_rows))
}

async fn create_session(
    BearerToken(bearer): BearerToken,
    state: State<AppState>,
    Json(payload): Json<SessionCreate>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let platform =
        Platform::from_str(&payload.platform).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let binding = state
        .registry()
        .resolve(platform)
        .map_err(|e| ApiError::internal(e, "Platform binding is not registered"))?;

    let orchestrator = GradingOrchestrator::new(binding, RetryPolicy::from_settings(state.settings()));
    let course_id = payload.course_id.trim().to_string();
    let assignment_id = payload.assignment_id.trim().to_string();
    let auth = AuthContext::new(bearer, payload.email.clone());
    orchestrator.refresh_roster(&course_id, &assignment_id, &auth).await?;

    let session = state
        .insert_session(GradingSession {
            id: Uuid::new_v4(),
            platform,
            course_id,
            assignment_id,
            email: payload.email,
            created_at: now_utc(),
            orchestrator,
        })
        .await;
    tracing::info!(
        session_id = %session.id,
        platform = %session.platform,
        course_id = %session.course_id,
        assignment_id = %session.assignment_id,
        "Grading session opened"
    );

    Ok((StatusCode::CREATED, Json(SessionResponse::from_session(&session).await)))
}

async fn get_session(
    Path(session_id): Path<Uuid>,
    state: State<AppState>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = load_session(&state, session_id).await?;
    Ok(Json(SessionResponse::from_session(&session).await))
}

async fn delete_session(
    Path(session_id): Path<Uuid>,
    state: State<AppState>,
) -> Result<StatusCode, ApiError> {
    let Some(session) = state.remove_session(session_id).await else {
        return Err(ApiError::NotFound("Session not found".to_string()));
    };
    let cancelled = session.orchestrator.close().await;
    tracing::info!(%session_id, cancelled, "Grading session closed");
    Ok(StatusCode::NO_CONTENT)
}

async fn start_batch(
    Path(session_id): Path<Uuid>,
    BearerToken(bearer): BearerToken,
    state: State<AppState>,
    Json(payload): Json<BatchCreate>,
) -> Result<(StatusCode, Json<BatchAccepted>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let session = load_session(&state, session_id).await?;

    let handle = session
        .orchestrator
        .grade_batch(BatchRequest {
            course_id: session.course_id.clone(),
            assignment_id: session.assignment_id.clone(),
            submission_ids: payload.submission_ids,
            rubric: payload.rubric,
            auth: session_auth(&session, bearer),
        })
        .await?;

    let progress = handle.progress();
    Ok((StatusCode::ACCEPTED, Json(BatchAccepted { batch_id: handle.batch_id(), total: progress.total })))
}

async fn get_batch(
    Path((session_id, batch_id)): Path<(Uuid, Uuid)>,
    state: State<AppState>,
) -> Result<Json<BatchProgressResponse>, ApiError> {
    let session = load_session(&state, session_id).await?;
    let progress = session
        .orchestrator
        .batch_progress(batch_id)
        .await
        .ok_or_else(|| ApiError::NotFound("Batch not found".to_string()))?;
    Ok(Json(progress.into()))
}

async fn cancel_batch(
    Path((session_id, batch_id)): Path<(Uuid, Uuid)>,
    state: State<AppState>,
) -> Result<(StatusCode, Json<BatchProgressResponse>), ApiError> {
    let session = load_session(&state, session_id).await?;
    if !session.orchestrator.cancel_batch(batch_id).await {
        return Err(ApiError::NotFound("Batch not found".to_string()));
    }
    let progress = session
        .orchestrator
        .batch_progress(batch_id)
        .await
        .ok_or_else(|| ApiError::NotFound("Batch not found".to_string()))?;
    Ok((StatusCode::ACCEPTED, Json(progress.into())))
}

async fn regrade_submission(
    Path((session_id, submission_id)): Path<(Uuid, String)>,
    BearerToken(bearer): BearerToken,
    state: State<AppState>,
    Json(payload): Json<RegradeCreate>,
) -> Result<(StatusCode, Json<BatchAccepted>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let session = load_session(&state, session_id).await?;

    let handle = session
        .orchestrator
        .regrade(RegradeRequest {
            course_id: session.course_id.clone(),
            assignment_id: session.assignment_id.clone(),
            submission_id,
            rubric: payload.rubric,
            reason: payload.reason,
            context: payload.context,
            auth: session_auth(&session, bearer),
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(BatchAccepted { batch_id: handle.batch_id(), total: 1 })))
}

async fn list_results(
    Path(session_id): Path<Uuid>,
    state: State<AppState>,
) -> Result<Json<Vec<GradedResult>>, ApiError> {
    let session = load_session(&state, session_id).await?;
    Ok(Json(session.orchestrator.results().await))
}

async fn export_rows(
    Path(session_id): Path<Uuid>,
    state: State<AppState>,
) -> Result<Json<Vec<ExportRow>>, ApiError> {
    let session = load_session(&state, session_id).await?;
    Ok(Json(session.orchestrator.export_rows().await))
}

async fn load_session(state: &AppState, session_id: Uuid) -> Result<Arc<GradingSession>, ApiError> {
    state
        .session(session_id)
        .await
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))
}

fn session_auth(session: &GradingSession, bearer: Option<String>) -> AuthContext {
    AuthContext::new(bearer, session.email.clone())
}
