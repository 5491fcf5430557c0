use axum::{extract::State, Json};
use tracing::instrument;

use super::dto::DashboardStatsResponse;
use super::services;
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;

#[instrument(skip(state))]
pub async fn dashboard_stats(
    State(state): State<AppState>,
    _caller: CurrentUser,
) -> Result<Json<DashboardStatsResponse>, ApiError> {
    Ok(Json(services::dashboard_stats(&state).await?))
}
