use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

pub mod file;
pub mod pg;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Chw,
    Supervisor,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Chw => write!(f, "CHW"),
            Role::Supervisor => write!(f, "SUPERVISOR"),
            Role::Admin => write!(f, "ADMIN"),
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHW" => Ok(Role::Chw),
            "SUPERVISOR" => Ok(Role::Supervisor),
            "ADMIN" => Ok(Role::Admin),
            other => anyhow::bail!("unknown role: {other}"),
        }
    }
}

/// Task types carry their own reward weights (see `tasks::services`). The
/// catch-all variant keeps rows with an unrecognized type readable instead of
/// failing the whole query; it earns the defensive default reward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    HomeVisit,
    Immunization,
    FollowUp,
    #[serde(other)]
    Unspecified,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::HomeVisit => write!(f, "HOME_VISIT"),
            TaskType::Immunization => write!(f, "IMMUNIZATION"),
            TaskType::FollowUp => write!(f, "FOLLOW_UP"),
            TaskType::Unspecified => write!(f, "UNSPECIFIED"),
        }
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        match s {
            "HOME_VISIT" => TaskType::HomeVisit,
            "IMMUNIZATION" => TaskType::Immunization,
            "FOLLOW_UP" => TaskType::FollowUp,
            _ => TaskType::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Approved => write!(f, "APPROVED"),
            TaskStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "APPROVED" => Ok(TaskStatus::Approved),
            "REJECTED" => Ok(TaskStatus::Rejected),
            other => anyhow::bail!("unknown task status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    CheckedIn,
    CheckedOut,
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttendanceStatus::CheckedIn => write!(f, "CHECKED_IN"),
            AttendanceStatus::CheckedOut => write!(f, "CHECKED_OUT"),
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHECKED_IN" => Ok(AttendanceStatus::CheckedIn),
            "CHECKED_OUT" => Ok(AttendanceStatus::CheckedOut),
            other => anyhow::bail!("unknown attendance status: {other}"),
        }
    }
}

/// User record. The password hash lives next to it in Postgres and in a
/// separate meta document in file mode, never inside this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub phone: Option<String>,
    pub county: Option<String>,
    pub sub_county: Option<String>,
    pub ward: Option<String>,
    /// External reward-account id; transfers are skipped when absent.
    pub chw_account_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// External-facing correlation id, echoed into ledger events.
    pub task_id: String,
    pub chw_id: Uuid,
    pub task_type: TaskType,
    pub consent_code_hash: String,
    pub geohash: String,
    pub notes: Option<String>,
    pub status: TaskStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub approved_at: Option<OffsetDateTime>,
    pub supervisor_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub ledger_log_hash: String,
    pub ledger_approval_hash: Option<String>,
    pub ledger_transfer_hash: Option<String>,
    pub points_awarded: i64,
}

/// Task joined with the owning CHW's public fields, for list views.
#[derive(Debug, Clone, Serialize)]
pub struct TaskWithChw {
    #[serde(flatten)]
    pub task: Task,
    pub chw_name: Option<String>,
    pub chw_email: Option<String>,
    pub chw_county: Option<String>,
}

/// The one-shot mutation applied when a supervisor decides a task.
#[derive(Debug, Clone)]
pub struct TaskDecision {
    pub status: TaskStatus,
    pub supervisor_id: Uuid,
    pub approved_at: OffsetDateTime,
    pub rejection_reason: Option<String>,
    pub ledger_approval_hash: String,
    pub ledger_transfer_hash: Option<String>,
    pub points_awarded: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub chw_id: Uuid,
    pub supervisor_id: Uuid,
    pub qr_code: String,
    pub date: Date,
    #[serde(with = "time::serde::rfc3339")]
    pub check_in_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub check_out_time: Option<OffsetDateTime>,
    pub status: AttendanceStatus,
    pub points_earned: i64,
}

/// Attendance joined with display names for the day views.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceView {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub chw_name: Option<String>,
    pub chw_email: Option<String>,
    pub supervisor_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorQrCode {
    pub supervisor_id: Uuid,
    pub qr_code_data: String,
    pub valid_date: Date,
}

/// Visibility scope for task listings, resolved from the caller's role.
#[derive(Debug, Clone)]
pub enum TaskScope {
    All,
    Chw(Uuid),
    County(String),
}

/// Persistence adapter. One implementation is chosen at startup
/// (`DATABASE_URL` set -> Postgres, otherwise the JSON file store) and shared
/// as `Arc<dyn Store>`; nothing downstream branches on the mode again.
///
/// Uniqueness invariants are enforced here, not by callers: `create_user`,
/// `finalize_task` and `try_check_in` are conditional writes that return
/// `None` when the invariant would be violated.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, user: User, password_hash: &str) -> anyhow::Result<Option<User>>;
    async fn user_by_email(&self, email: &str) -> anyhow::Result<Option<(User, String)>>;
    async fn user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn users_by_ids(&self, ids: Vec<Uuid>) -> anyhow::Result<Vec<User>>;
    async fn list_chws(&self) -> anyhow::Result<Vec<User>>;
    async fn count_chws(&self) -> anyhow::Result<i64>;

    async fn insert_task(&self, task: Task) -> anyhow::Result<Task>;
    async fn task_by_id(&self, id: Uuid) -> anyhow::Result<Option<Task>>;
    async fn list_tasks(
        &self,
        scope: TaskScope,
        status: Option<TaskStatus>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<TaskWithChw>, i64)>;
    /// Applies the decision only while the task is still PENDING.
    /// `None` means the task is absent or already decided.
    async fn finalize_task(
        &self,
        id: Uuid,
        decision: TaskDecision,
    ) -> anyhow::Result<Option<Task>>;
    async fn tasks_created_since(&self, since: OffsetDateTime) -> anyhow::Result<Vec<Task>>;
    async fn all_tasks(&self) -> anyhow::Result<Vec<Task>>;

    async fn qr_for_day(
        &self,
        supervisor_id: Uuid,
        day: Date,
    ) -> anyhow::Result<Option<SupervisorQrCode>>;
    /// Idempotent per (supervisor, day): a concurrent or repeat insert keeps
    /// and returns the already-stored token.
    async fn upsert_qr(&self, code: SupervisorQrCode) -> anyhow::Result<SupervisorQrCode>;

    /// Inserts unless the CHW already holds a CHECKED_IN record for the day.
    async fn try_check_in(
        &self,
        record: AttendanceRecord,
    ) -> anyhow::Result<Option<AttendanceRecord>>;
    /// Closes the CHW's open record for the day; when `supervisor_id` is set
    /// only a record opened by that supervisor qualifies.
    async fn close_attendance(
        &self,
        chw_id: Uuid,
        supervisor_id: Option<Uuid>,
        day: Date,
        check_out_time: OffsetDateTime,
        points: i64,
    ) -> anyhow::Result<Option<AttendanceRecord>>;
    async fn attendance_for_chw_on(
        &self,
        chw_id: Uuid,
        day: Date,
    ) -> anyhow::Result<Option<AttendanceView>>;
    async fn attendance_for_supervisor_on(
        &self,
        supervisor_id: Uuid,
        day: Date,
    ) -> anyhow::Result<Vec<AttendanceView>>;
    async fn attendance_on(&self, day: Date) -> anyhow::Result<Vec<AttendanceRecord>>;
    /// (date, chw_id) pairs within the inclusive range, for the daily trend.
    async fn attendance_days(&self, from: Date, to: Date) -> anyhow::Result<Vec<(Date, Uuid)>>;
}
