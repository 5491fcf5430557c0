use std::collections::{BTreeMap, HashMap, HashSet};

use time::{Date, Duration, OffsetDateTime};
use uuid::Uuid;

use super::dto::{Charts, CountyStat, DashboardStatsResponse, Kpis, TaskTypeStat, TrendDay};
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::{Task, TaskStatus};

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn kpis(tasks: &[Task], active_chws: i64, now: OffsetDateTime) -> Kpis {
    let today = now.date();
    let day_ago = now - Duration::hours(24);
    let week_ago = now - Duration::days(7);

    let tasks_today = tasks.iter().filter(|t| t.created_at.date() == today).count() as i64;
    let pending_tasks = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .count() as i64;
    let approved = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Approved)
        .count() as i64;
    let approval_rate = if tasks.is_empty() {
        0
    } else {
        ((approved as f64 / tasks.len() as f64) * 100.0).round() as i64
    };

    let points_since = |since: OffsetDateTime| -> i64 {
        tasks
            .iter()
            .filter(|t| t.approved_at.map_or(false, |at| at >= since))
            .map(|t| t.points_awarded)
            .sum()
    };

    let approval_lags: Vec<f64> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Approved)
        .filter_map(|t| t.approved_at.map(|at| (at - t.created_at).as_seconds_f64() / 3600.0))
        .collect();
    let avg_time_to_approval_hours = if approval_lags.is_empty() {
        0.0
    } else {
        round1(approval_lags.iter().sum::<f64>() / approval_lags.len() as f64)
    };

    Kpis {
        tasks_today,
        approval_rate,
        points_awarded_24h: points_since(day_ago),
        points_awarded_7d: points_since(week_ago),
        active_chws,
        avg_time_to_approval_hours,
        pending_tasks,
    }
}

fn county_stats(tasks: &[Task], counties: &HashMap<Uuid, String>) -> Vec<CountyStat> {
    let mut per_county: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    for task in tasks {
        let county = counties
            .get(&task.chw_id)
            .cloned()
            .unwrap_or_else(|| "Unknown".into());
        let entry = per_county.entry(county).or_default();
        entry.0 += 1;
        if task.status == TaskStatus::Approved {
            entry.1 += 1;
        }
    }
    per_county
        .into_iter()
        .map(|(county, (tasks, approved))| CountyStat {
            county,
            tasks,
            approved,
        })
        .collect()
}

fn task_type_distribution(tasks: &[Task]) -> Vec<TaskTypeStat> {
    let mut per_type: BTreeMap<String, i64> = BTreeMap::new();
    for task in tasks {
        *per_type.entry(task.task_type.to_string()).or_default() += 1;
    }
    per_type
        .into_iter()
        .map(|(task_type, count)| TaskTypeStat { task_type, count })
        .collect()
}

/// Dense trailing week ending today; days without submissions are zero rows.
fn week_trend(tasks: &[Task], today: Date) -> Vec<TrendDay> {
    let from = today - Duration::days(6);
    let mut per_day: HashMap<Date, (i64, i64, i64)> = HashMap::new();
    for task in tasks {
        let day = task.created_at.date();
        if day < from || day > today {
            continue;
        }
        let entry = per_day.entry(day).or_default();
        entry.0 += 1;
        if task.status == TaskStatus::Approved {
            entry.1 += 1;
            entry.2 += task.points_awarded;
        }
    }
    (0..7)
        .map(|i| {
            let date = from + Duration::days(i);
            let (tasks, approved, points) = per_day.get(&date).copied().unwrap_or_default();
            TrendDay {
                date,
                tasks,
                approved,
                points,
            }
        })
        .collect()
}

/// One call serves the whole dashboard; open to any authenticated role
/// since nothing here exposes per-person detail beyond county rollups.
pub async fn dashboard_stats(state: &AppState) -> Result<DashboardStatsResponse, ApiError> {
    let now = OffsetDateTime::now_utc();
    let tasks = state.store.all_tasks().await?;
    let active_chws = state.store.count_chws().await?;

    // County rollups only look at the trailing month.
    let recent = state
        .store
        .tasks_created_since(now - Duration::days(30))
        .await?;
    let chw_ids: HashSet<Uuid> = recent.iter().map(|t| t.chw_id).collect();
    let counties: HashMap<Uuid, String> = state
        .store
        .users_by_ids(chw_ids.into_iter().collect())
        .await?
        .into_iter()
        .filter_map(|u| u.county.map(|c| (u.id, c)))
        .collect();

    Ok(DashboardStatsResponse {
        kpis: kpis(&tasks, active_chws, now),
        charts: Charts {
            county_stats: county_stats(&recent, &counties),
            task_type_distribution: task_type_distribution(&recent),
            week_trend: week_trend(&tasks, now.date()),
        },
    })
}
