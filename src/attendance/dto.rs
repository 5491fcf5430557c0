use serde::{Deserialize, Serialize};
use time::Date;
use uuid::Uuid;

use crate::store::{AttendanceRecord, AttendanceView, User};

#[derive(Debug, Serialize)]
pub struct QrResponse {
    pub qr_code: Option<String>,
    pub supervisor_id: Uuid,
    pub valid_date: Date,
}

/// CHW self-service check-in: supervisor id and token come off the scanned code.
#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub supervisor_id: Uuid,
    pub qr_code: String,
}

/// Supervisor checks a CHW in against their own current token.
#[derive(Debug, Deserialize)]
pub struct SupervisorCheckInRequest {
    pub chw_id: Uuid,
    pub qr_code: String,
}

#[derive(Debug, Deserialize)]
pub struct SupervisorCheckOutRequest {
    pub chw_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CheckInResponse {
    pub attendance: AttendanceRecord,
}

#[derive(Debug, Serialize)]
pub struct CheckOutResponse {
    pub attendance: AttendanceRecord,
    /// Fractional wall-clock hours, rounded to 2 decimals for display.
    pub hours_worked: f64,
    pub points_earned: i64,
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<Date>,
}

#[derive(Debug, Serialize)]
pub struct MyStatusResponse {
    pub attendance: Option<AttendanceView>,
}

#[derive(Debug, Serialize)]
pub struct SupervisorViewResponse {
    pub attendance: Vec<AttendanceView>,
}

#[derive(Debug, Serialize)]
pub struct ChwListResponse {
    pub chws: Vec<User>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct DayStats {
    /// Unique CHWs with any record today.
    pub total_checked_in: i64,
    pub currently_working: i64,
    pub checked_out: i64,
    pub total_points_today: i64,
}

#[derive(Debug, Serialize)]
pub struct TrendPoint {
    pub date: Date,
    pub chws: i64,
}

#[derive(Debug, Serialize)]
pub struct AdminStatsResponse {
    pub stats: DayStats,
    /// Dense trailing 7-day series ending on the requested date; days with
    /// no activity appear as zero.
    pub daily_trend: Vec<TrendPoint>,
}
