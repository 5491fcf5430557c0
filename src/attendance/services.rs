use std::collections::{HashMap, HashSet};

use time::{Date, Duration, OffsetDateTime};
use tracing::info;
use uuid::Uuid;

use super::dto::{
    AdminStatsResponse, CheckInResponse, CheckOutResponse, DayStats, MyStatusResponse, QrResponse,
    SupervisorViewResponse, TrendPoint,
};
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::{AttendanceRecord, AttendanceStatus, Role, SupervisorQrCode};

/// Attendance accrues 10 points per hour, floored. Fractional wall-clock
/// hours, no cap on shift length (trust-the-supervisor model).
pub fn accrued_points(check_in: OffsetDateTime, check_out: OffsetDateTime) -> (f64, i64) {
    let hours = (check_out - check_in).as_seconds_f64() / 3600.0;
    let points = (hours * 10.0).floor() as i64;
    (hours, points)
}

fn require_supervisor(caller: &CurrentUser) -> Result<(), ApiError> {
    if caller.role != Role::Supervisor {
        return Err(ApiError::Authorization("Supervisor access required".into()));
    }
    Ok(())
}

pub async fn issue_daily_qr(state: &AppState, caller: &CurrentUser) -> Result<QrResponse, ApiError> {
    require_supervisor(caller)?;
    let today = OffsetDateTime::now_utc().date();
    if let Some(existing) = state.store.qr_for_day(caller.id, today).await? {
        return Ok(QrResponse {
            qr_code: Some(existing.qr_code_data),
            supervisor_id: caller.id,
            valid_date: today,
        });
    }
    let code = state
        .store
        .upsert_qr(SupervisorQrCode {
            supervisor_id: caller.id,
            qr_code_data: format!("AFYA-{}-{}", caller.id, Uuid::new_v4().simple()),
            valid_date: today,
        })
        .await?;
    info!(supervisor_id = %caller.id, "daily qr token issued");
    Ok(QrResponse {
        qr_code: Some(code.qr_code_data),
        supervisor_id: caller.id,
        valid_date: today,
    })
}

pub async fn today_qr(state: &AppState, caller: &CurrentUser) -> Result<QrResponse, ApiError> {
    let today = OffsetDateTime::now_utc().date();
    let existing = state.store.qr_for_day(caller.id, today).await?;
    Ok(QrResponse {
        qr_code: existing.map(|c| c.qr_code_data),
        supervisor_id: caller.id,
        valid_date: today,
    })
}

/// Both entry points (CHW self-service and supervisor-initiated) converge
/// here: the token must match the supervisor's unexpired record for today,
/// and the CHW must not already hold an open check-in.
async fn check_in(
    state: &AppState,
    chw_id: Uuid,
    supervisor_id: Uuid,
    qr_token: &str,
) -> Result<CheckInResponse, ApiError> {
    let now = OffsetDateTime::now_utc();
    let today = now.date();

    let valid = state
        .store
        .qr_for_day(supervisor_id, today)
        .await?
        .map_or(false, |c| c.qr_code_data == qr_token);
    if !valid {
        return Err(ApiError::InvalidToken("Invalid or expired QR code".into()));
    }

    let record = AttendanceRecord {
        id: Uuid::new_v4(),
        chw_id,
        supervisor_id,
        qr_code: qr_token.to_string(),
        date: today,
        check_in_time: now,
        check_out_time: None,
        status: AttendanceStatus::CheckedIn,
        points_earned: 0,
    };
    let Some(record) = state.store.try_check_in(record).await? else {
        return Err(ApiError::Conflict("Already checked in today".into()));
    };
    info!(chw_id = %chw_id, supervisor_id = %supervisor_id, "checked in");
    Ok(CheckInResponse { attendance: record })
}

pub async fn chw_check_in(
    state: &AppState,
    caller: &CurrentUser,
    supervisor_id: Uuid,
    qr_token: &str,
) -> Result<CheckInResponse, ApiError> {
    if caller.role != Role::Chw {
        return Err(ApiError::Authorization("CHW access required".into()));
    }
    check_in(state, caller.id, supervisor_id, qr_token).await
}

pub async fn supervisor_check_in(
    state: &AppState,
    caller: &CurrentUser,
    chw_id: Uuid,
    qr_token: &str,
) -> Result<CheckInResponse, ApiError> {
    require_supervisor(caller)?;
    check_in(state, chw_id, caller.id, qr_token).await
}

/// Closes today's open record. When `supervisor_id` is set (supervisor-
/// initiated variant) only a record that supervisor opened qualifies.
async fn check_out(
    state: &AppState,
    chw_id: Uuid,
    supervisor_id: Option<Uuid>,
) -> Result<CheckOutResponse, ApiError> {
    let now = OffsetDateTime::now_utc();
    let today = now.date();

    let open = state
        .store
        .attendance_for_chw_on(chw_id, today)
        .await?
        .map(|v| v.record)
        .filter(|r| {
            r.status == AttendanceStatus::CheckedIn
                && supervisor_id.map_or(true, |s| r.supervisor_id == s)
        })
        .ok_or_else(|| ApiError::NotFound("No active check-in found".into()))?;

    let (hours, points) = accrued_points(open.check_in_time, now);
    let record = state
        .store
        .close_attendance(chw_id, supervisor_id, today, now, points)
        .await?
        .ok_or_else(|| ApiError::NotFound("No active check-in found".into()))?;

    info!(chw_id = %chw_id, points, "checked out");
    Ok(CheckOutResponse {
        attendance: record,
        hours_worked: (hours * 100.0).round() / 100.0,
        points_earned: points,
    })
}

pub async fn chw_check_out(
    state: &AppState,
    caller: &CurrentUser,
) -> Result<CheckOutResponse, ApiError> {
    if caller.role != Role::Chw {
        return Err(ApiError::Authorization("CHW access required".into()));
    }
    check_out(state, caller.id, None).await
}

pub async fn supervisor_check_out(
    state: &AppState,
    caller: &CurrentUser,
    chw_id: Uuid,
) -> Result<CheckOutResponse, ApiError> {
    require_supervisor(caller)?;
    check_out(state, chw_id, Some(caller.id)).await
}

pub async fn my_status(
    state: &AppState,
    caller: &CurrentUser,
    date: Option<Date>,
) -> Result<MyStatusResponse, ApiError> {
    let day = date.unwrap_or_else(|| OffsetDateTime::now_utc().date());
    let attendance = state.store.attendance_for_chw_on(caller.id, day).await?;
    Ok(MyStatusResponse { attendance })
}

pub async fn supervisor_view(
    state: &AppState,
    caller: &CurrentUser,
    date: Option<Date>,
) -> Result<SupervisorViewResponse, ApiError> {
    require_supervisor(caller)?;
    let day = date.unwrap_or_else(|| OffsetDateTime::now_utc().date());
    let attendance = state
        .store
        .attendance_for_supervisor_on(caller.id, day)
        .await?;
    Ok(SupervisorViewResponse { attendance })
}

pub async fn list_chws(
    state: &AppState,
    caller: &CurrentUser,
) -> Result<super::dto::ChwListResponse, ApiError> {
    if !matches!(caller.role, Role::Supervisor | Role::Admin) {
        return Err(ApiError::Authorization(
            "Supervisor or Admin access required".into(),
        ));
    }
    let chws = state.store.list_chws().await?;
    Ok(super::dto::ChwListResponse { chws })
}

pub async fn admin_stats(
    state: &AppState,
    caller: &CurrentUser,
    date: Option<Date>,
) -> Result<AdminStatsResponse, ApiError> {
    if !matches!(caller.role, Role::Supervisor | Role::Admin) {
        return Err(ApiError::Authorization(
            "Supervisor or Admin access required".into(),
        ));
    }
    let day = date.unwrap_or_else(|| OffsetDateTime::now_utc().date());

    let records = state.store.attendance_on(day).await?;
    let unique_chws: HashSet<Uuid> = records.iter().map(|r| r.chw_id).collect();
    let currently_working = records
        .iter()
        .filter(|r| r.status == AttendanceStatus::CheckedIn)
        .count() as i64;
    let checked_out = records
        .iter()
        .filter(|r| r.status == AttendanceStatus::CheckedOut)
        .count() as i64;
    let total_points_today = records.iter().map(|r| r.points_earned).sum();

    // Dense trailing week: every day is present, empty days as zero.
    let from = day - Duration::days(6);
    let mut per_day: HashMap<Date, HashSet<Uuid>> = HashMap::new();
    for (d, chw) in state.store.attendance_days(from, day).await? {
        per_day.entry(d).or_default().insert(chw);
    }
    let daily_trend = (0..7)
        .map(|i| {
            let d = from + Duration::days(i);
            TrendPoint {
                date: d,
                chws: per_day.get(&d).map_or(0, |s| s.len() as i64),
            }
        })
        .collect();

    Ok(AdminStatsResponse {
        stats: DayStats {
            total_checked_in: unique_chws.len() as i64,
            currently_working,
            checked_out,
            total_points_today,
        },
        daily_trend,
    })
}
