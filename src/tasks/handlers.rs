use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use tracing::instrument;

use super::dto::{
    CreateTaskRequest, CreateTaskResponse, DecideTaskRequest, DecideTaskResponse, TaskListQuery,
    TaskListResponse,
};
use super::services;
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;

#[instrument(skip(state, payload))]
pub async fn create_task(
    State(state): State<AppState>,
    caller: CurrentUser,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    let resp = services::create_task(&state, &caller, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[instrument(skip(state))]
pub async fn list_tasks(
    State(state): State<AppState>,
    caller: CurrentUser,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    Ok(Json(services::list_tasks(&state, &caller, query).await?))
}

#[instrument(skip(state, payload))]
pub async fn decide_task(
    State(state): State<AppState>,
    caller: CurrentUser,
    Json(payload): Json<DecideTaskRequest>,
) -> Result<Json<DecideTaskResponse>, ApiError> {
    Ok(Json(services::decide_task(&state, &caller, payload).await?))
}
