use serde::Serialize;
use time::Date;

#[derive(Debug, Serialize, PartialEq)]
pub struct Kpis {
    pub tasks_today: i64,
    /// Approved share of all decided-or-pending tasks, rounded whole percent.
    pub approval_rate: i64,
    pub points_awarded_24h: i64,
    pub points_awarded_7d: i64,
    pub active_chws: i64,
    /// Mean submission-to-decision lag over approved tasks, rounded to one
    /// decimal. Zero when nothing has been approved yet.
    pub avg_time_to_approval_hours: f64,
    pub pending_tasks: i64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CountyStat {
    pub county: String,
    pub tasks: i64,
    pub approved: i64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TaskTypeStat {
    pub task_type: String,
    pub count: i64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TrendDay {
    pub date: Date,
    pub tasks: i64,
    pub approved: i64,
    pub points: i64,
}

#[derive(Debug, Serialize)]
pub struct Charts {
    pub county_stats: Vec<CountyStat>,
    pub task_type_distribution: Vec<TaskTypeStat>,
    pub week_trend: Vec<TrendDay>,
}

#[derive(Debug, Serialize)]
pub struct DashboardStatsResponse {
    pub kpis: Kpis,
    pub charts: Charts,
}
