use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{Task, TaskStatus, TaskType, TaskWithChw};

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub task_type: TaskType,
    /// 4-digit patient consent code; only its hash is ever stored.
    pub consent_code: String,
    pub geohash: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub task: Task,
    pub ledger_log_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct DecideTaskRequest {
    pub task_id: Uuid,
    pub approved: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DecideTaskResponse {
    pub task: Task,
    pub ledger_approval_hash: String,
    pub ledger_transfer_hash: Option<String>,
    pub points_awarded: i64,
}

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<TaskStatus>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}
fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskWithChw>,
    pub pagination: Pagination,
}
