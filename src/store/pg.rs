use async_trait::async_trait;
use sqlx::{FromRow, PgPool, QueryBuilder};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::{
    AttendanceRecord, AttendanceView, Store, SupervisorQrCode, Task, TaskDecision, TaskScope,
    TaskStatus, TaskType, TaskWithChw, User,
};

/// Postgres adapter. The schema (`migrations/0001_init.sql`) carries the
/// uniqueness invariants as constraints, so the conditional writes here are
/// race-free: losers of a concurrent write observe `None`.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLS: &str =
    "id, name, email, role, phone, county, sub_county, ward, chw_account_id, created_at, updated_at";
const TASK_COLS: &str = "id, task_id, chw_id, task_type, consent_code_hash, geohash, notes, \
     status, created_at, approved_at, supervisor_id, rejection_reason, ledger_log_hash, \
     ledger_approval_hash, ledger_transfer_hash, points_awarded";
const ATTENDANCE_COLS: &str =
    "id, chw_id, supervisor_id, qr_code, date, check_in_time, check_out_time, status, points_earned";

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
    phone: Option<String>,
    county: Option<String>,
    sub_county: Option<String>,
    ward: Option<String>,
    chw_account_id: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;
    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: r.id,
            name: r.name,
            email: r.email,
            role: r.role.parse()?,
            phone: r.phone,
            county: r.county,
            sub_county: r.sub_county,
            ward: r.ward,
            chw_account_id: r.chw_account_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    task_id: String,
    chw_id: Uuid,
    task_type: String,
    consent_code_hash: String,
    geohash: String,
    notes: Option<String>,
    status: String,
    created_at: OffsetDateTime,
    approved_at: Option<OffsetDateTime>,
    supervisor_id: Option<Uuid>,
    rejection_reason: Option<String>,
    ledger_log_hash: String,
    ledger_approval_hash: Option<String>,
    ledger_transfer_hash: Option<String>,
    points_awarded: i64,
}

impl TryFrom<TaskRow> for Task {
    type Error = anyhow::Error;
    fn try_from(r: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: r.id,
            task_id: r.task_id,
            chw_id: r.chw_id,
            task_type: TaskType::from(r.task_type.as_str()),
            consent_code_hash: r.consent_code_hash,
            geohash: r.geohash,
            notes: r.notes,
            status: r.status.parse()?,
            created_at: r.created_at,
            approved_at: r.approved_at,
            supervisor_id: r.supervisor_id,
            rejection_reason: r.rejection_reason,
            ledger_log_hash: r.ledger_log_hash,
            ledger_approval_hash: r.ledger_approval_hash,
            ledger_transfer_hash: r.ledger_transfer_hash,
            points_awarded: r.points_awarded,
        })
    }
}

#[derive(FromRow)]
struct TaskJoinRow {
    #[sqlx(flatten)]
    task: TaskRow,
    chw_name: Option<String>,
    chw_email: Option<String>,
    chw_county: Option<String>,
}

impl TryFrom<TaskJoinRow> for TaskWithChw {
    type Error = anyhow::Error;
    fn try_from(r: TaskJoinRow) -> Result<Self, Self::Error> {
        Ok(TaskWithChw {
            task: r.task.try_into()?,
            chw_name: r.chw_name,
            chw_email: r.chw_email,
            chw_county: r.chw_county,
        })
    }
}

#[derive(FromRow)]
struct AttendanceRow {
    id: Uuid,
    chw_id: Uuid,
    supervisor_id: Uuid,
    qr_code: String,
    date: Date,
    check_in_time: OffsetDateTime,
    check_out_time: Option<OffsetDateTime>,
    status: String,
    points_earned: i64,
}

impl TryFrom<AttendanceRow> for AttendanceRecord {
    type Error = anyhow::Error;
    fn try_from(r: AttendanceRow) -> Result<Self, Self::Error> {
        Ok(AttendanceRecord {
            id: r.id,
            chw_id: r.chw_id,
            supervisor_id: r.supervisor_id,
            qr_code: r.qr_code,
            date: r.date,
            check_in_time: r.check_in_time,
            check_out_time: r.check_out_time,
            status: r.status.parse()?,
            points_earned: r.points_earned,
        })
    }
}

#[derive(FromRow)]
struct AttendanceJoinRow {
    #[sqlx(flatten)]
    record: AttendanceRow,
    chw_name: Option<String>,
    chw_email: Option<String>,
    supervisor_name: Option<String>,
}

impl TryFrom<AttendanceJoinRow> for AttendanceView {
    type Error = anyhow::Error;
    fn try_from(r: AttendanceJoinRow) -> Result<Self, Self::Error> {
        Ok(AttendanceView {
            record: r.record.try_into()?,
            chw_name: r.chw_name,
            chw_email: r.chw_email,
            supervisor_name: r.supervisor_name,
        })
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: User, password_hash: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users
                (id, name, email, role, phone, county, sub_county, ward, chw_account_id,
                 password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (email) DO NOTHING
            RETURNING {USER_COLS}
            "#
        ))
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.to_string())
        .bind(&user.phone)
        .bind(&user.county)
        .bind(&user.sub_county)
        .bind(&user.ward)
        .bind(&user.chw_account_id)
        .bind(password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn user_by_email(&self, email: &str) -> anyhow::Result<Option<(User, String)>> {
        #[derive(FromRow)]
        struct WithHash {
            #[sqlx(flatten)]
            user: UserRow,
            password_hash: String,
        }
        let row = sqlx::query_as::<_, WithHash>(&format!(
            "SELECT {USER_COLS}, password_hash FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Ok((r.user.try_into()?, r.password_hash)))
            .transpose()
    }

    async fn user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row =
            sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(User::try_from).transpose()
    }

    async fn users_by_ids(&self, ids: Vec<Uuid>) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLS} FROM users WHERE id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn list_chws(&self) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLS} FROM users WHERE role = 'CHW' ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn count_chws(&self) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'CHW'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert_task(&self, task: Task) -> anyhow::Result<Task> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            INSERT INTO tasks
                (id, task_id, chw_id, task_type, consent_code_hash, geohash, notes, status,
                 created_at, ledger_log_hash, points_awarded)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {TASK_COLS}
            "#
        ))
        .bind(task.id)
        .bind(&task.task_id)
        .bind(task.chw_id)
        .bind(task.task_type.to_string())
        .bind(&task.consent_code_hash)
        .bind(&task.geohash)
        .bind(&task.notes)
        .bind(task.status.to_string())
        .bind(task.created_at)
        .bind(&task.ledger_log_hash)
        .bind(task.points_awarded)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn task_by_id(&self, id: Uuid) -> anyhow::Result<Option<Task>> {
        let row =
            sqlx::query_as::<_, TaskRow>(&format!("SELECT {TASK_COLS} FROM tasks WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Task::try_from).transpose()
    }

    async fn list_tasks(
        &self,
        scope: TaskScope,
        status: Option<TaskStatus>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<TaskWithChw>, i64)> {
        fn push_filters(
            qb: &mut QueryBuilder<'_, sqlx::Postgres>,
            scope: &TaskScope,
            status: &Option<TaskStatus>,
        ) {
            qb.push(" WHERE 1 = 1");
            match scope {
                TaskScope::All => {}
                TaskScope::Chw(id) => {
                    qb.push(" AND t.chw_id = ").push_bind(*id);
                }
                TaskScope::County(county) => {
                    qb.push(" AND u.county = ").push_bind(county.clone());
                }
            }
            if let Some(s) = status {
                qb.push(" AND t.status = ").push_bind(s.to_string());
            }
        }

        let mut count_qb = QueryBuilder::new(
            "SELECT COUNT(*) FROM tasks t LEFT JOIN users u ON u.id = t.chw_id",
        );
        push_filters(&mut count_qb, &scope, &status);
        let count: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new(
            "SELECT t.id, t.task_id, t.chw_id, t.task_type, t.consent_code_hash, t.geohash, \
             t.notes, t.status, t.created_at, t.approved_at, t.supervisor_id, \
             t.rejection_reason, t.ledger_log_hash, t.ledger_approval_hash, \
             t.ledger_transfer_hash, t.points_awarded, \
             u.name AS chw_name, u.email AS chw_email, u.county AS chw_county \
             FROM tasks t LEFT JOIN users u ON u.id = t.chw_id",
        );
        push_filters(&mut qb, &scope, &status);
        qb.push(" ORDER BY t.created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows: Vec<TaskJoinRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        let tasks = rows
            .into_iter()
            .map(TaskWithChw::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok((tasks, count))
    }

    async fn finalize_task(
        &self,
        id: Uuid,
        decision: TaskDecision,
    ) -> anyhow::Result<Option<Task>> {
        // Compare-and-swap on status: only a PENDING row is updated.
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE tasks
            SET status = $2,
                supervisor_id = $3,
                approved_at = $4,
                rejection_reason = $5,
                ledger_approval_hash = $6,
                ledger_transfer_hash = $7,
                points_awarded = $8
            WHERE id = $1 AND status = 'PENDING'
            RETURNING {TASK_COLS}
            "#
        ))
        .bind(id)
        .bind(decision.status.to_string())
        .bind(decision.supervisor_id)
        .bind(decision.approved_at)
        .bind(&decision.rejection_reason)
        .bind(&decision.ledger_approval_hash)
        .bind(&decision.ledger_transfer_hash)
        .bind(decision.points_awarded)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Task::try_from).transpose()
    }

    async fn tasks_created_since(&self, since: OffsetDateTime) -> anyhow::Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLS} FROM tasks WHERE created_at >= $1"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn all_tasks(&self) -> anyhow::Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!("SELECT {TASK_COLS} FROM tasks"))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn qr_for_day(
        &self,
        supervisor_id: Uuid,
        day: Date,
    ) -> anyhow::Result<Option<SupervisorQrCode>> {
        let row = sqlx::query_as::<_, SupervisorQrRow>(
            "SELECT supervisor_id, qr_code_data, valid_date FROM supervisor_qr_codes \
             WHERE supervisor_id = $1 AND valid_date = $2",
        )
        .bind(supervisor_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn upsert_qr(&self, code: SupervisorQrCode) -> anyhow::Result<SupervisorQrCode> {
        // The no-op DO UPDATE lets RETURNING yield the surviving row, so a
        // concurrent issuance converges on one token.
        let row = sqlx::query_as::<_, SupervisorQrRow>(
            r#"
            INSERT INTO supervisor_qr_codes (supervisor_id, qr_code_data, valid_date)
            VALUES ($1, $2, $3)
            ON CONFLICT (supervisor_id, valid_date)
                DO UPDATE SET qr_code_data = supervisor_qr_codes.qr_code_data
            RETURNING supervisor_id, qr_code_data, valid_date
            "#,
        )
        .bind(code.supervisor_id)
        .bind(&code.qr_code_data)
        .bind(code.valid_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn try_check_in(
        &self,
        record: AttendanceRecord,
    ) -> anyhow::Result<Option<AttendanceRecord>> {
        let result = sqlx::query_as::<_, AttendanceRow>(&format!(
            r#"
            INSERT INTO attendance
                (id, chw_id, supervisor_id, qr_code, date, check_in_time, status, points_earned)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8
            WHERE NOT EXISTS (
                SELECT 1 FROM attendance
                WHERE chw_id = $2 AND date = $5 AND status = 'CHECKED_IN'
            )
            RETURNING {ATTENDANCE_COLS}
            "#
        ))
        .bind(record.id)
        .bind(record.chw_id)
        .bind(record.supervisor_id)
        .bind(&record.qr_code)
        .bind(record.date)
        .bind(record.check_in_time)
        .bind(record.status.to_string())
        .bind(record.points_earned)
        .fetch_optional(&self.pool)
        .await;
        match result {
            Ok(row) => row.map(AttendanceRecord::try_from).transpose(),
            // The partial unique index backstops the NOT EXISTS guard under
            // concurrency; losing the race reads the same as "already in".
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn close_attendance(
        &self,
        chw_id: Uuid,
        supervisor_id: Option<Uuid>,
        day: Date,
        check_out_time: OffsetDateTime,
        points: i64,
    ) -> anyhow::Result<Option<AttendanceRecord>> {
        let row = sqlx::query_as::<_, AttendanceRow>(&format!(
            r#"
            UPDATE attendance
            SET check_out_time = $4, status = 'CHECKED_OUT', points_earned = $5
            WHERE chw_id = $1 AND date = $2 AND status = 'CHECKED_IN'
              AND ($3::uuid IS NULL OR supervisor_id = $3)
            RETURNING {ATTENDANCE_COLS}
            "#
        ))
        .bind(chw_id)
        .bind(day)
        .bind(supervisor_id)
        .bind(check_out_time)
        .bind(points)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AttendanceRecord::try_from).transpose()
    }

    async fn attendance_for_chw_on(
        &self,
        chw_id: Uuid,
        day: Date,
    ) -> anyhow::Result<Option<AttendanceView>> {
        let row = sqlx::query_as::<_, AttendanceJoinRow>(
            r#"
            SELECT a.id, a.chw_id, a.supervisor_id, a.qr_code, a.date, a.check_in_time,
                   a.check_out_time, a.status, a.points_earned,
                   c.name AS chw_name, c.email AS chw_email, s.name AS supervisor_name
            FROM attendance a
            LEFT JOIN users c ON c.id = a.chw_id
            LEFT JOIN users s ON s.id = a.supervisor_id
            WHERE a.chw_id = $1 AND a.date = $2
            ORDER BY a.check_in_time DESC
            LIMIT 1
            "#,
        )
        .bind(chw_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AttendanceView::try_from).transpose()
    }

    async fn attendance_for_supervisor_on(
        &self,
        supervisor_id: Uuid,
        day: Date,
    ) -> anyhow::Result<Vec<AttendanceView>> {
        let rows = sqlx::query_as::<_, AttendanceJoinRow>(
            r#"
            SELECT a.id, a.chw_id, a.supervisor_id, a.qr_code, a.date, a.check_in_time,
                   a.check_out_time, a.status, a.points_earned,
                   c.name AS chw_name, c.email AS chw_email, s.name AS supervisor_name
            FROM attendance a
            LEFT JOIN users c ON c.id = a.chw_id
            LEFT JOIN users s ON s.id = a.supervisor_id
            WHERE a.supervisor_id = $1 AND a.date = $2
            ORDER BY a.check_in_time DESC
            "#,
        )
        .bind(supervisor_id)
        .bind(day)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AttendanceView::try_from).collect()
    }

    async fn attendance_on(&self, day: Date) -> anyhow::Result<Vec<AttendanceRecord>> {
        let rows = sqlx::query_as::<_, AttendanceRow>(&format!(
            "SELECT {ATTENDANCE_COLS} FROM attendance WHERE date = $1"
        ))
        .bind(day)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AttendanceRecord::try_from).collect()
    }

    async fn attendance_days(&self, from: Date, to: Date) -> anyhow::Result<Vec<(Date, Uuid)>> {
        let rows: Vec<(Date, Uuid)> = sqlx::query_as(
            "SELECT date, chw_id FROM attendance WHERE date BETWEEN $1 AND $2",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[derive(FromRow)]
struct SupervisorQrRow {
    supervisor_id: Uuid,
    qr_code_data: String,
    valid_date: Date,
}

impl From<SupervisorQrRow> for SupervisorQrCode {
    fn from(r: SupervisorQrRow) -> Self {
        Self {
            supervisor_id: r.supervisor_id,
            qr_code_data: r.qr_code_data,
            valid_date: r.valid_date,
        }
    }
}
