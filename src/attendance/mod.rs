use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

mod dto;
pub mod handlers;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/qr-code",
            post(handlers::issue_qr).get(handlers::today_qr),
        )
        .route("/attendance/check-in", post(handlers::chw_check_in))
        .route("/attendance/check-out", post(handlers::chw_check_out))
        .route(
            "/attendance/supervisor/check-in",
            post(handlers::supervisor_check_in),
        )
        .route(
            "/attendance/supervisor/check-out",
            post(handlers::supervisor_check_out),
        )
        .route("/attendance/me", get(handlers::my_status))
        .route("/attendance/supervisor", get(handlers::supervisor_view))
        .route("/attendance/chws", get(handlers::list_chws))
        .route("/attendance/stats", get(handlers::admin_stats))
}
