use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use tracing::instrument;

use super::dto::{
    AdminStatsResponse, CheckInRequest, CheckInResponse, CheckOutResponse, ChwListResponse,
    DateQuery, MyStatusResponse, QrResponse, SupervisorCheckInRequest, SupervisorCheckOutRequest,
    SupervisorViewResponse,
};
use super::services;
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;

#[instrument(skip(state))]
pub async fn issue_qr(
    State(state): State<AppState>,
    caller: CurrentUser,
) -> Result<(StatusCode, Json<QrResponse>), ApiError> {
    let resp = services::issue_daily_qr(&state, &caller).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[instrument(skip(state))]
pub async fn today_qr(
    State(state): State<AppState>,
    caller: CurrentUser,
) -> Result<Json<QrResponse>, ApiError> {
    Ok(Json(services::today_qr(&state, &caller).await?))
}

#[instrument(skip(state, payload))]
pub async fn chw_check_in(
    State(state): State<AppState>,
    caller: CurrentUser,
    Json(payload): Json<CheckInRequest>,
) -> Result<(StatusCode, Json<CheckInResponse>), ApiError> {
    let resp =
        services::chw_check_in(&state, &caller, payload.supervisor_id, &payload.qr_code).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[instrument(skip(state))]
pub async fn chw_check_out(
    State(state): State<AppState>,
    caller: CurrentUser,
) -> Result<Json<CheckOutResponse>, ApiError> {
    Ok(Json(services::chw_check_out(&state, &caller).await?))
}

#[instrument(skip(state, payload))]
pub async fn supervisor_check_in(
    State(state): State<AppState>,
    caller: CurrentUser,
    Json(payload): Json<SupervisorCheckInRequest>,
) -> Result<(StatusCode, Json<CheckInResponse>), ApiError> {
    let resp =
        services::supervisor_check_in(&state, &caller, payload.chw_id, &payload.qr_code).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[instrument(skip(state, payload))]
pub async fn supervisor_check_out(
    State(state): State<AppState>,
    caller: CurrentUser,
    Json(payload): Json<SupervisorCheckOutRequest>,
) -> Result<Json<CheckOutResponse>, ApiError> {
    Ok(Json(
        services::supervisor_check_out(&state, &caller, payload.chw_id).await?,
    ))
}

#[instrument(skip(state))]
pub async fn my_status(
    State(state): State<AppState>,
    caller: CurrentUser,
    Query(query): Query<DateQuery>,
) -> Result<Json<MyStatusResponse>, ApiError> {
    Ok(Json(services::my_status(&state, &caller, query.date).await?))
}

#[instrument(skip(state))]
pub async fn supervisor_view(
    State(state): State<AppState>,
    caller: CurrentUser,
    Query(query): Query<DateQuery>,
) -> Result<Json<SupervisorViewResponse>, ApiError> {
    Ok(Json(
        services::supervisor_view(&state, &caller, query.date).await?,
    ))
}

#[instrument(skip(state))]
pub async fn list_chws(
    State(state): State<AppState>,
    caller: CurrentUser,
) -> Result<Json<ChwListResponse>, ApiError> {
    Ok(Json(services::list_chws(&state, &caller).await?))
}

#[instrument(skip(state))]
pub async fn admin_stats(
    State(state): State<AppState>,
    caller: CurrentUser,
    Query(query): Query<DateQuery>,
) -> Result<Json<AdminStatsResponse>, ApiError> {
    Ok(Json(services::admin_stats(&state, &caller, query.date).await?))
}
