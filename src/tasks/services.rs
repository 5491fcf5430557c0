use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{
    CreateTaskRequest, CreateTaskResponse, DecideTaskRequest, DecideTaskResponse, Pagination,
    TaskListQuery, TaskListResponse,
};
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::ledger::LedgerEvent;
use crate::state::AppState;
use crate::store::{Role, Task, TaskDecision, TaskScope, TaskStatus, TaskType};

/// Deterministic, unsalted on purpose: equal consent codes must hash equal so
/// repeated codes are detectable. This is tamper evidence, not secrecy.
pub fn hash_consent_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Reward table. The catch-all earns the defensive default; it should never
/// be hit through the API because the enum rejects nothing silently only at
/// the storage edge.
pub fn reward_points(task_type: TaskType) -> i64 {
    match task_type {
        TaskType::HomeVisit => 10,
        TaskType::Immunization => 15,
        TaskType::FollowUp => 12,
        TaskType::Unspecified => {
            warn!("awarding default points for unspecified task type");
            10
        }
    }
}

fn unix_millis(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}

pub async fn create_task(
    state: &AppState,
    caller: &CurrentUser,
    req: CreateTaskRequest,
) -> Result<CreateTaskResponse, ApiError> {
    if caller.role != Role::Chw {
        return Err(ApiError::Authorization("CHW access required".into()));
    }
    if req.consent_code.len() != 4 || !req.consent_code.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::Validation(
            "Consent code must be exactly 4 digits".into(),
        ));
    }
    if !(6..=7).contains(&req.geohash.len()) {
        return Err(ApiError::Validation(
            "Geohash must be 6 or 7 characters".into(),
        ));
    }

    let now = OffsetDateTime::now_utc();
    let task_id = Uuid::new_v4().simple().to_string();
    let consent_code_hash = hash_consent_code(&req.consent_code);

    // Log first, commit after: the ledger entry documents the task we are
    // about to persist.
    let log_hash = state
        .ledger
        .append_log(&LedgerEvent::TaskLog {
            task_id: task_id.clone(),
            chw_id: caller.id,
            task_type: req.task_type.to_string(),
            geohash: req.geohash.clone(),
            consent_hash: consent_code_hash.clone(),
            when: unix_millis(now),
        })
        .await?;

    let task = state
        .store
        .insert_task(Task {
            id: Uuid::new_v4(),
            task_id,
            chw_id: caller.id,
            task_type: req.task_type,
            consent_code_hash,
            geohash: req.geohash,
            notes: req.notes,
            status: TaskStatus::Pending,
            created_at: now,
            approved_at: None,
            supervisor_id: None,
            rejection_reason: None,
            ledger_log_hash: log_hash.clone(),
            ledger_approval_hash: None,
            ledger_transfer_hash: None,
            points_awarded: 0,
        })
        .await?;

    info!(task_id = %task.task_id, chw_id = %caller.id, task_type = %task.task_type, "task submitted");
    Ok(CreateTaskResponse {
        task,
        ledger_log_hash: log_hash,
    })
}

pub async fn list_tasks(
    state: &AppState,
    caller: &CurrentUser,
    query: TaskListQuery,
) -> Result<TaskListResponse, ApiError> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, 100);
    let offset = (page - 1) * limit;

    let scope = match caller.role {
        Role::Chw => TaskScope::Chw(caller.id),
        Role::Supervisor => {
            // County-less supervisors see everything, like admins.
            let county = state
                .store
                .user_by_id(caller.id)
                .await?
                .and_then(|u| u.county);
            match county {
                Some(county) => TaskScope::County(county),
                None => TaskScope::All,
            }
        }
        Role::Admin => TaskScope::All,
    };

    let (tasks, total) = state
        .store
        .list_tasks(scope, query.status, limit, offset)
        .await?;
    Ok(TaskListResponse {
        tasks,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        },
    })
}

pub async fn decide_task(
    state: &AppState,
    caller: &CurrentUser,
    req: DecideTaskRequest,
) -> Result<DecideTaskResponse, ApiError> {
    if !matches!(caller.role, Role::Supervisor | Role::Admin) {
        return Err(ApiError::Authorization(
            "Supervisor or Admin access required".into(),
        ));
    }

    let task = state
        .store
        .task_by_id(req.task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found".into()))?;
    if task.status != TaskStatus::Pending {
        return Err(ApiError::Conflict("Task already processed".into()));
    }

    let now = OffsetDateTime::now_utc();
    let approval_hash = state
        .ledger
        .append_log(&LedgerEvent::TaskApproval {
            task_id: task.task_id.clone(),
            supervisor_id: caller.id,
            approved: req.approved,
            when: unix_millis(now),
        })
        .await?;

    let mut points_awarded = 0;
    let mut transfer_hash = None;
    if req.approved {
        points_awarded = reward_points(task.task_type);
        let chw_account = state
            .store
            .user_by_id(task.chw_id)
            .await?
            .and_then(|u| u.chw_account_id);
        if let Some(account) = chw_account {
            // Best-effort: a failed transfer never blocks the approval, it
            // just leaves the transfer hash empty.
            match state.ledger.transfer_reward(&account, points_awarded).await {
                Ok(hash) => transfer_hash = Some(hash),
                Err(e) => {
                    warn!(error = %e, task_id = %task.task_id, account = %account, "reward transfer failed");
                }
            }
        }
    }

    let decision = TaskDecision {
        status: if req.approved {
            TaskStatus::Approved
        } else {
            TaskStatus::Rejected
        },
        supervisor_id: caller.id,
        approved_at: now,
        rejection_reason: if req.approved { None } else { req.reason },
        ledger_approval_hash: approval_hash.clone(),
        ledger_transfer_hash: transfer_hash.clone(),
        points_awarded,
    };

    // Conditional write: a concurrent decision that landed first wins.
    let task = state
        .store
        .finalize_task(req.task_id, decision)
        .await?
        .ok_or_else(|| ApiError::Conflict("Task already processed".into()))?;

    info!(
        task_id = %task.task_id,
        supervisor_id = %caller.id,
        approved = req.approved,
        points = points_awarded,
        "task decided"
    );
    Ok(DecideTaskResponse {
        task,
        ledger_approval_hash: approval_hash,
        ledger_transfer_hash: transfer_hash,
        points_awarded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use crate::store::User;

    async fn register(state: &AppState, role: Role, county: Option<&str>) -> CurrentUser {
        register_with_account(state, role, county, None).await
    }

    async fn register_with_account(
        state: &AppState,
        role: Role,
        county: Option<&str>,
        chw_account_id: Option<&str>,
    ) -> CurrentUser {
        let now = OffsetDateTime::now_utc();
        let id = Uuid::new_v4();
        let email = format!("{id}@afya.ke");
        let user = User {
            id,
            name: "Test User".into(),
            email: email.clone(),
            role,
            phone: None,
            county: county.map(Into::into),
            sub_county: None,
            ward: None,
            chw_account_id: chw_account_id.map(Into::into),
            created_at: now,
            updated_at: now,
        };
        state
            .store
            .create_user(user, "hash")
            .await
            .unwrap()
            .expect("unique email");
        CurrentUser { id, email, role }
    }

    fn home_visit() -> CreateTaskRequest {
        CreateTaskRequest {
            task_type: TaskType::HomeVisit,
            consent_code: "1234".into(),
            geohash: "kw6z8x1".into(),
            notes: None,
        }
    }

    #[test]
    fn consent_hash_is_deterministic_sha256() {
        let a = hash_consent_code("1234");
        let b = hash_consent_code("1234");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_consent_code("1235"));
        // Repeat-code detection relies on the hash being unsalted.
        assert_eq!(
            a,
            "03ac674216f3e15c761ee1a5e255f067953623c8b388b4459e13f978d7c846f4"
        );
    }

    #[test]
    fn reward_table() {
        assert_eq!(reward_points(TaskType::HomeVisit), 10);
        assert_eq!(reward_points(TaskType::Immunization), 15);
        assert_eq!(reward_points(TaskType::FollowUp), 12);
        assert_eq!(reward_points(TaskType::Unspecified), 10);
    }

    #[tokio::test]
    async fn create_task_happy_path() {
        let state = AppState::fake();
        let chw = register(&state, Role::Chw, Some("Kisumu")).await;
        let resp = create_task(&state, &chw, home_visit()).await.unwrap();
        assert_eq!(resp.task.status, TaskStatus::Pending);
        assert_eq!(resp.task.points_awarded, 0);
        assert_eq!(resp.task.chw_id, chw.id);
        assert_eq!(resp.ledger_log_hash.len(), 64);
        assert_eq!(resp.task.ledger_log_hash, resp.ledger_log_hash);
        // The clear consent code is never stored.
        assert_eq!(resp.task.consent_code_hash, hash_consent_code("1234"));
    }

    #[tokio::test]
    async fn create_task_rejects_bad_input() {
        let state = AppState::fake();
        let chw = register(&state, Role::Chw, None).await;

        let mut bad_code = home_visit();
        bad_code.consent_code = "12a4".into();
        assert!(matches!(
            create_task(&state, &chw, bad_code).await.unwrap_err(),
            ApiError::Validation(_)
        ));

        let mut short_code = home_visit();
        short_code.consent_code = "123".into();
        assert!(matches!(
            create_task(&state, &chw, short_code).await.unwrap_err(),
            ApiError::Validation(_)
        ));

        let mut bad_geo = home_visit();
        bad_geo.geohash = "kw6z8".into();
        assert!(matches!(
            create_task(&state, &chw, bad_geo).await.unwrap_err(),
            ApiError::Validation(_)
        ));

        let mut long_geo = home_visit();
        long_geo.geohash = "kw6z8x12".into();
        assert!(matches!(
            create_task(&state, &chw, long_geo).await.unwrap_err(),
            ApiError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn create_task_requires_chw_role() {
        let state = AppState::fake();
        let supervisor = register(&state, Role::Supervisor, None).await;
        assert!(matches!(
            create_task(&state, &supervisor, home_visit())
                .await
                .unwrap_err(),
            ApiError::Authorization(_)
        ));
    }

    #[tokio::test]
    async fn approve_awards_points_by_type() {
        let state = AppState::fake();
        let chw = register_with_account(&state, Role::Chw, None, Some("0.0.1001")).await;
        let supervisor = register(&state, Role::Supervisor, None).await;

        for (task_type, expected) in [
            (TaskType::HomeVisit, 10),
            (TaskType::Immunization, 15),
            (TaskType::FollowUp, 12),
        ] {
            let mut req = home_visit();
            req.task_type = task_type;
            let created = create_task(&state, &chw, req).await.unwrap();
            let decided = decide_task(
                &state,
                &supervisor,
                DecideTaskRequest {
                    task_id: created.task.id,
                    approved: true,
                    reason: None,
                },
            )
            .await
            .unwrap();
            assert_eq!(decided.task.status, TaskStatus::Approved);
            assert_eq!(decided.points_awarded, expected);
            assert_eq!(decided.task.points_awarded, expected);
            assert_eq!(decided.task.supervisor_id, Some(supervisor.id));
            // Linked reward account -> mock transfer hash recorded.
            assert!(decided.ledger_transfer_hash.is_some());
        }
    }

    #[tokio::test]
    async fn approve_without_reward_account_skips_transfer() {
        let state = AppState::fake();
        let chw = register(&state, Role::Chw, None).await;
        let supervisor = register(&state, Role::Supervisor, None).await;
        let created = create_task(&state, &chw, home_visit()).await.unwrap();
        let decided = decide_task(
            &state,
            &supervisor,
            DecideTaskRequest {
                task_id: created.task.id,
                approved: true,
                reason: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(decided.points_awarded, 10);
        assert!(decided.ledger_transfer_hash.is_none());
        assert!(decided.task.ledger_transfer_hash.is_none());
    }

    #[tokio::test]
    async fn reject_stores_reason_and_no_points() {
        let state = AppState::fake();
        let chw = register(&state, Role::Chw, None).await;
        let supervisor = register(&state, Role::Supervisor, None).await;
        let created = create_task(&state, &chw, home_visit()).await.unwrap();
        let decided = decide_task(
            &state,
            &supervisor,
            DecideTaskRequest {
                task_id: created.task.id,
                approved: false,
                reason: Some("location mismatch".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(decided.task.status, TaskStatus::Rejected);
        assert_eq!(decided.points_awarded, 0);
        assert_eq!(
            decided.task.rejection_reason.as_deref(),
            Some("location mismatch")
        );
        assert!(decided.ledger_transfer_hash.is_none());
    }

    #[tokio::test]
    async fn second_decision_conflicts_and_state_is_unchanged() {
        let state = AppState::fake();
        let chw = register(&state, Role::Chw, None).await;
        let supervisor = register(&state, Role::Supervisor, None).await;
        let created = create_task(&state, &chw, home_visit()).await.unwrap();
        let approve = DecideTaskRequest {
            task_id: created.task.id,
            approved: true,
            reason: None,
        };
        decide_task(&state, &supervisor, approve).await.unwrap();

        let err = decide_task(
            &state,
            &supervisor,
            DecideTaskRequest {
                task_id: created.task.id,
                approved: false,
                reason: Some("changed my mind".into()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        let task = state
            .store
            .task_by_id(created.task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.status, TaskStatus::Approved);
        assert_eq!(task.points_awarded, 10);
        assert!(task.rejection_reason.is_none());
    }

    #[tokio::test]
    async fn decide_missing_task_is_not_found() {
        let state = AppState::fake();
        let supervisor = register(&state, Role::Supervisor, None).await;
        let err = decide_task(
            &state,
            &supervisor,
            DecideTaskRequest {
                task_id: Uuid::new_v4(),
                approved: true,
                reason: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn decide_requires_supervisor_or_admin() {
        let state = AppState::fake();
        let chw = register(&state, Role::Chw, None).await;
        let created = create_task(&state, &chw, home_visit()).await.unwrap();
        let err = decide_task(
            &state,
            &chw,
            DecideTaskRequest {
                task_id: created.task.id,
                approved: true,
                reason: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Authorization(_)));
    }

    #[tokio::test]
    async fn list_scopes_by_role_and_county() {
        let state = AppState::fake();
        let kisumu_chw = register(&state, Role::Chw, Some("Kisumu")).await;
        let nairobi_chw = register(&state, Role::Chw, Some("Nairobi")).await;
        create_task(&state, &kisumu_chw, home_visit()).await.unwrap();
        create_task(&state, &nairobi_chw, home_visit()).await.unwrap();

        let query = || TaskListQuery {
            status: None,
            page: 1,
            limit: 20,
        };

        // CHW sees only their own.
        let own = list_tasks(&state, &kisumu_chw, query()).await.unwrap();
        assert_eq!(own.pagination.total, 1);
        assert_eq!(own.tasks[0].task.chw_id, kisumu_chw.id);

        // County supervisor sees their county only.
        let kisumu_supervisor = register(&state, Role::Supervisor, Some("Kisumu")).await;
        let county = list_tasks(&state, &kisumu_supervisor, query()).await.unwrap();
        assert_eq!(county.pagination.total, 1);
        assert_eq!(county.tasks[0].chw_county.as_deref(), Some("Kisumu"));

        // County-less supervisor and admin see everything.
        let roaming_supervisor = register(&state, Role::Supervisor, None).await;
        assert_eq!(
            list_tasks(&state, &roaming_supervisor, query())
                .await
                .unwrap()
                .pagination
                .total,
            2
        );
        let admin = register(&state, Role::Admin, None).await;
        assert_eq!(
            list_tasks(&state, &admin, query()).await.unwrap().pagination.total,
            2
        );
    }

    #[tokio::test]
    async fn list_filters_by_status_and_paginates() {
        let state = AppState::fake();
        let chw = register(&state, Role::Chw, None).await;
        let supervisor = register(&state, Role::Supervisor, None).await;
        let mut first_id = None;
        for i in 0..3 {
            let created = create_task(&state, &chw, home_visit()).await.unwrap();
            if i == 0 {
                first_id = Some(created.task.id);
            }
        }
        decide_task(
            &state,
            &supervisor,
            DecideTaskRequest {
                task_id: first_id.unwrap(),
                approved: true,
                reason: None,
            },
        )
        .await
        .unwrap();

        let pending = list_tasks(
            &state,
            &chw,
            TaskListQuery {
                status: Some(TaskStatus::Pending),
                page: 1,
                limit: 20,
            },
        )
        .await
        .unwrap();
        assert_eq!(pending.pagination.total, 2);

        let paged = list_tasks(
            &state,
            &chw,
            TaskListQuery {
                status: None,
                page: 2,
                limit: 2,
            },
        )
        .await
        .unwrap();
        assert_eq!(paged.pagination.total, 3);
        assert_eq!(paged.pagination.total_pages, 2);
        assert_eq!(paged.tasks.len(), 1);
    }
}
