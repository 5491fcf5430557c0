use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{
    AttendanceRecord, AttendanceStatus, AttendanceView, Role, Store, SupervisorQrCode, Task,
    TaskDecision, TaskScope, TaskStatus, TaskWithChw, User,
};
use crate::auth::password::hash_password;

const USERS: &str = "users.json";
const META: &str = "meta.json";
const TASKS: &str = "tasks.json";
const ATTENDANCE: &str = "attendance.json";
const QR_CODES: &str = "qr_codes.json";

/// Password hashes live outside the user documents, keyed by email.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Meta {
    password_hashes: HashMap<String, String>,
}

/// JSON-file fallback store: flat documents under a data dir, rewritten
/// whole on every mutation. A single lock serializes read-modify-write
/// cycles, so the uniqueness invariants hold without DB constraints.
pub struct FileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>, seed_demo: bool) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("create data dir {}", dir.display()))?;
        let store = Self {
            dir,
            lock: Mutex::new(()),
        };
        if seed_demo {
            store.seed_if_empty()?;
        }
        Ok(store)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn read<T: DeserializeOwned + Default>(&self, name: &str) -> anyhow::Result<T> {
        let p = self.path(name);
        if !p.exists() {
            return Ok(T::default());
        }
        let raw = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse {}", p.display()))
    }

    fn write<T: Serialize>(&self, name: &str, data: &T) -> anyhow::Result<()> {
        let p = self.path(name);
        let raw = serde_json::to_string_pretty(data)?;
        fs::write(&p, raw).with_context(|| format!("write {}", p.display()))
    }

    fn seed_if_empty(&self) -> anyhow::Result<()> {
        let users: Vec<User> = self.read(USERS)?;
        if !users.is_empty() {
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();
        let demo = |name: &str, email: &str, role: Role| User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            role,
            phone: None,
            county: None,
            sub_county: None,
            ward: None,
            chw_account_id: None,
            created_at: now,
            updated_at: now,
        };
        let mut chw = demo("Akinyi Otieno", "akinyi.otieno@afya.ke", Role::Chw);
        chw.phone = Some("+254712345001".into());
        chw.county = Some("Kisumu".into());
        chw.sub_county = Some("Kisumu East".into());
        chw.ward = Some("Kajulu".into());
        chw.chw_account_id = Some("0.0.1001".into());
        let mut supervisor = demo("Mary Wekesa", "mary.wekesa@afya.ke", Role::Supervisor);
        supervisor.phone = Some("+254712345006".into());
        supervisor.county = Some("Kisumu".into());
        supervisor.sub_county = Some("Kisumu East".into());
        let mut admin = demo("Grace Adhiambo", "admin@afya.ke", Role::Admin);
        admin.phone = Some("+254712345008".into());

        let hash = hash_password("demo123")?;
        let mut meta = Meta::default();
        for u in [&chw, &supervisor, &admin] {
            meta.password_hashes.insert(u.email.clone(), hash.clone());
        }
        self.write(USERS, &vec![chw, supervisor, admin])?;
        self.write(META, &meta)?;
        self.write(TASKS, &Vec::<Task>::new())?;
        info!(dir = %self.dir.display(), "file store seeded with demo users");
        Ok(())
    }

    fn join_chw(users: &[User], task: Task) -> TaskWithChw {
        let chw = users.iter().find(|u| u.id == task.chw_id);
        TaskWithChw {
            chw_name: chw.map(|u| u.name.clone()),
            chw_email: chw.map(|u| u.email.clone()),
            chw_county: chw.and_then(|u| u.county.clone()),
            task,
        }
    }

    fn join_names(users: &[User], record: AttendanceRecord) -> AttendanceView {
        let chw = users.iter().find(|u| u.id == record.chw_id);
        let supervisor = users.iter().find(|u| u.id == record.supervisor_id);
        AttendanceView {
            chw_name: chw.map(|u| u.name.clone()),
            chw_email: chw.map(|u| u.email.clone()),
            supervisor_name: supervisor.map(|u| u.name.clone()),
            record,
        }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn create_user(&self, user: User, password_hash: &str) -> anyhow::Result<Option<User>> {
        let _g = self.lock.lock().await;
        let mut users: Vec<User> = self.read(USERS)?;
        if users
            .iter()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Ok(None);
        }
        let mut meta: Meta = self.read(META)?;
        meta.password_hashes
            .insert(user.email.clone(), password_hash.to_string());
        users.push(user.clone());
        self.write(USERS, &users)?;
        self.write(META, &meta)?;
        Ok(Some(user))
    }

    async fn user_by_email(&self, email: &str) -> anyhow::Result<Option<(User, String)>> {
        let _g = self.lock.lock().await;
        let users: Vec<User> = self.read(USERS)?;
        let meta: Meta = self.read(META)?;
        Ok(users
            .into_iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .and_then(|u| {
                let hash = meta.password_hashes.get(&u.email).cloned()?;
                Some((u, hash))
            }))
    }

    async fn user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let _g = self.lock.lock().await;
        let users: Vec<User> = self.read(USERS)?;
        Ok(users.into_iter().find(|u| u.id == id))
    }

    async fn users_by_ids(&self, ids: Vec<Uuid>) -> anyhow::Result<Vec<User>> {
        let _g = self.lock.lock().await;
        let users: Vec<User> = self.read(USERS)?;
        Ok(users.into_iter().filter(|u| ids.contains(&u.id)).collect())
    }

    async fn list_chws(&self) -> anyhow::Result<Vec<User>> {
        let _g = self.lock.lock().await;
        let mut chws: Vec<User> = self
            .read::<Vec<User>>(USERS)?
            .into_iter()
            .filter(|u| u.role == Role::Chw)
            .collect();
        chws.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(chws)
    }

    async fn count_chws(&self) -> anyhow::Result<i64> {
        Ok(self.list_chws().await?.len() as i64)
    }

    async fn insert_task(&self, task: Task) -> anyhow::Result<Task> {
        let _g = self.lock.lock().await;
        let mut tasks: Vec<Task> = self.read(TASKS)?;
        tasks.push(task.clone());
        self.write(TASKS, &tasks)?;
        Ok(task)
    }

    async fn task_by_id(&self, id: Uuid) -> anyhow::Result<Option<Task>> {
        let _g = self.lock.lock().await;
        let tasks: Vec<Task> = self.read(TASKS)?;
        Ok(tasks.into_iter().find(|t| t.id == id))
    }

    async fn list_tasks(
        &self,
        scope: TaskScope,
        status: Option<TaskStatus>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<TaskWithChw>, i64)> {
        let _g = self.lock.lock().await;
        let tasks: Vec<Task> = self.read(TASKS)?;
        let users: Vec<User> = self.read(USERS)?;
        let mut list: Vec<Task> = tasks
            .into_iter()
            .filter(|t| match &scope {
                TaskScope::All => true,
                TaskScope::Chw(id) => t.chw_id == *id,
                TaskScope::County(county) => users
                    .iter()
                    .any(|u| u.id == t.chw_id && u.county.as_deref() == Some(county)),
            })
            .filter(|t| status.map_or(true, |s| t.status == s))
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let count = list.len() as i64;
        let page: Vec<TaskWithChw> = list
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|t| Self::join_chw(&users, t))
            .collect();
        Ok((page, count))
    }

    async fn finalize_task(
        &self,
        id: Uuid,
        decision: TaskDecision,
    ) -> anyhow::Result<Option<Task>> {
        let _g = self.lock.lock().await;
        let mut tasks: Vec<Task> = self.read(TASKS)?;
        let Some(task) = tasks
            .iter_mut()
            .find(|t| t.id == id && t.status == TaskStatus::Pending)
        else {
            return Ok(None);
        };
        task.status = decision.status;
        task.supervisor_id = Some(decision.supervisor_id);
        task.approved_at = Some(decision.approved_at);
        task.rejection_reason = decision.rejection_reason;
        task.ledger_approval_hash = Some(decision.ledger_approval_hash);
        task.ledger_transfer_hash = decision.ledger_transfer_hash;
        task.points_awarded = decision.points_awarded;
        let updated = task.clone();
        self.write(TASKS, &tasks)?;
        Ok(Some(updated))
    }

    async fn tasks_created_since(&self, since: OffsetDateTime) -> anyhow::Result<Vec<Task>> {
        let _g = self.lock.lock().await;
        let tasks: Vec<Task> = self.read(TASKS)?;
        Ok(tasks.into_iter().filter(|t| t.created_at >= since).collect())
    }

    async fn all_tasks(&self) -> anyhow::Result<Vec<Task>> {
        let _g = self.lock.lock().await;
        self.read(TASKS)
    }

    async fn qr_for_day(
        &self,
        supervisor_id: Uuid,
        day: Date,
    ) -> anyhow::Result<Option<SupervisorQrCode>> {
        let _g = self.lock.lock().await;
        let codes: Vec<SupervisorQrCode> = self.read(QR_CODES)?;
        Ok(codes
            .into_iter()
            .find(|c| c.supervisor_id == supervisor_id && c.valid_date == day))
    }

    async fn upsert_qr(&self, code: SupervisorQrCode) -> anyhow::Result<SupervisorQrCode> {
        let _g = self.lock.lock().await;
        let mut codes: Vec<SupervisorQrCode> = self.read(QR_CODES)?;
        if let Some(existing) = codes
            .iter()
            .find(|c| c.supervisor_id == code.supervisor_id && c.valid_date == code.valid_date)
        {
            return Ok(existing.clone());
        }
        codes.push(code.clone());
        self.write(QR_CODES, &codes)?;
        Ok(code)
    }

    async fn try_check_in(
        &self,
        record: AttendanceRecord,
    ) -> anyhow::Result<Option<AttendanceRecord>> {
        let _g = self.lock.lock().await;
        let mut records: Vec<AttendanceRecord> = self.read(ATTENDANCE)?;
        let already_in = records.iter().any(|r| {
            r.chw_id == record.chw_id
                && r.date == record.date
                && r.status == AttendanceStatus::CheckedIn
        });
        if already_in {
            return Ok(None);
        }
        records.push(record.clone());
        self.write(ATTENDANCE, &records)?;
        Ok(Some(record))
    }

    async fn close_attendance(
        &self,
        chw_id: Uuid,
        supervisor_id: Option<Uuid>,
        day: Date,
        check_out_time: OffsetDateTime,
        points: i64,
    ) -> anyhow::Result<Option<AttendanceRecord>> {
        let _g = self.lock.lock().await;
        let mut records: Vec<AttendanceRecord> = self.read(ATTENDANCE)?;
        let Some(record) = records.iter_mut().find(|r| {
            r.chw_id == chw_id
                && r.date == day
                && r.status == AttendanceStatus::CheckedIn
                && supervisor_id.map_or(true, |s| r.supervisor_id == s)
        }) else {
            return Ok(None);
        };
        record.check_out_time = Some(check_out_time);
        record.status = AttendanceStatus::CheckedOut;
        record.points_earned = points;
        let updated = record.clone();
        self.write(ATTENDANCE, &records)?;
        Ok(Some(updated))
    }

    async fn attendance_for_chw_on(
        &self,
        chw_id: Uuid,
        day: Date,
    ) -> anyhow::Result<Option<AttendanceView>> {
        let _g = self.lock.lock().await;
        let records: Vec<AttendanceRecord> = self.read(ATTENDANCE)?;
        let users: Vec<User> = self.read(USERS)?;
        let mut mine: Vec<AttendanceRecord> = records
            .into_iter()
            .filter(|r| r.chw_id == chw_id && r.date == day)
            .collect();
        mine.sort_by(|a, b| b.check_in_time.cmp(&a.check_in_time));
        Ok(mine.into_iter().next().map(|r| Self::join_names(&users, r)))
    }

    async fn attendance_for_supervisor_on(
        &self,
        supervisor_id: Uuid,
        day: Date,
    ) -> anyhow::Result<Vec<AttendanceView>> {
        let _g = self.lock.lock().await;
        let records: Vec<AttendanceRecord> = self.read(ATTENDANCE)?;
        let users: Vec<User> = self.read(USERS)?;
        let mut day_records: Vec<AttendanceRecord> = records
            .into_iter()
            .filter(|r| r.supervisor_id == supervisor_id && r.date == day)
            .collect();
        day_records.sort_by(|a, b| b.check_in_time.cmp(&a.check_in_time));
        Ok(day_records
            .into_iter()
            .map(|r| Self::join_names(&users, r))
            .collect())
    }

    async fn attendance_on(&self, day: Date) -> anyhow::Result<Vec<AttendanceRecord>> {
        let _g = self.lock.lock().await;
        let records: Vec<AttendanceRecord> = self.read(ATTENDANCE)?;
        Ok(records.into_iter().filter(|r| r.date == day).collect())
    }

    async fn attendance_days(&self, from: Date, to: Date) -> anyhow::Result<Vec<(Date, Uuid)>> {
        let _g = self.lock.lock().await;
        let records: Vec<AttendanceRecord> = self.read(ATTENDANCE)?;
        Ok(records
            .into_iter()
            .filter(|r| r.date >= from && r.date <= to)
            .map(|r| (r.date, r.chw_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TaskType;

    fn temp_store() -> FileStore {
        let dir = std::env::temp_dir().join(format!("afyaukweli-filestore-{}", Uuid::new_v4()));
        FileStore::open(dir, false).expect("open file store")
    }

    fn make_user(email: &str, role: Role, county: Option<&str>) -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            name: "Test User".into(),
            email: email.into(),
            role,
            phone: None,
            county: county.map(Into::into),
            sub_county: None,
            ward: None,
            chw_account_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn make_task(chw_id: Uuid) -> Task {
        Task {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4().to_string(),
            chw_id,
            task_type: TaskType::HomeVisit,
            consent_code_hash: "abc".into(),
            geohash: "kw6z8x".into(),
            notes: None,
            status: TaskStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
            approved_at: None,
            supervisor_id: None,
            rejection_reason: None,
            ledger_log_hash: "hash".into(),
            ledger_approval_hash: None,
            ledger_transfer_hash: None,
            points_awarded: 0,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = temp_store();
        let user = make_user("a@example.com", Role::Chw, None);
        assert!(store
            .create_user(user.clone(), "hash")
            .await
            .unwrap()
            .is_some());
        let mut dup = make_user("A@Example.com", Role::Chw, None);
        dup.id = Uuid::new_v4();
        assert!(store.create_user(dup, "hash").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finalize_task_is_single_shot() {
        let store = temp_store();
        let task = make_task(Uuid::new_v4());
        store.insert_task(task.clone()).await.unwrap();
        let decision = TaskDecision {
            status: TaskStatus::Approved,
            supervisor_id: Uuid::new_v4(),
            approved_at: OffsetDateTime::now_utc(),
            rejection_reason: None,
            ledger_approval_hash: "h".into(),
            ledger_transfer_hash: None,
            points_awarded: 10,
        };
        let updated = store
            .finalize_task(task.id, decision.clone())
            .await
            .unwrap()
            .expect("first decision lands");
        assert_eq!(updated.status, TaskStatus::Approved);
        assert_eq!(updated.points_awarded, 10);
        // Second attempt finds no PENDING task.
        assert!(store.finalize_task(task.id, decision).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn check_in_unique_per_chw_per_day() {
        let store = temp_store();
        let chw = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let record = AttendanceRecord {
            id: Uuid::new_v4(),
            chw_id: chw,
            supervisor_id: Uuid::new_v4(),
            qr_code: "AFYA-x".into(),
            date: now.date(),
            check_in_time: now,
            check_out_time: None,
            status: AttendanceStatus::CheckedIn,
            points_earned: 0,
        };
        assert!(store.try_check_in(record.clone()).await.unwrap().is_some());
        let mut second = record.clone();
        second.id = Uuid::new_v4();
        assert!(store.try_check_in(second).await.unwrap().is_none());
        // After checkout a fresh check-in is allowed again.
        store
            .close_attendance(chw, None, now.date(), now, 0)
            .await
            .unwrap()
            .expect("open record closes");
        let mut third = record;
        third.id = Uuid::new_v4();
        assert!(store.try_check_in(third).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn county_scope_filters_tasks() {
        let store = temp_store();
        let kisumu = make_user("k@example.com", Role::Chw, Some("Kisumu"));
        let nairobi = make_user("n@example.com", Role::Chw, Some("Nairobi"));
        store.create_user(kisumu.clone(), "h").await.unwrap();
        store.create_user(nairobi.clone(), "h").await.unwrap();
        store.insert_task(make_task(kisumu.id)).await.unwrap();
        store.insert_task(make_task(nairobi.id)).await.unwrap();

        let (page, count) = store
            .list_tasks(TaskScope::County("Kisumu".into()), None, 20, 0)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(page[0].task.chw_id, kisumu.id);
        assert_eq!(page[0].chw_county.as_deref(), Some("Kisumu"));
    }

    #[tokio::test]
    async fn qr_upsert_is_idempotent() {
        let store = temp_store();
        let supervisor = Uuid::new_v4();
        let day = OffsetDateTime::now_utc().date();
        let first = store
            .upsert_qr(SupervisorQrCode {
                supervisor_id: supervisor,
                qr_code_data: "AFYA-first".into(),
                valid_date: day,
            })
            .await
            .unwrap();
        let second = store
            .upsert_qr(SupervisorQrCode {
                supervisor_id: supervisor,
                qr_code_data: "AFYA-second".into(),
                valid_date: day,
            })
            .await
            .unwrap();
        assert_eq!(first.qr_code_data, second.qr_code_data);
    }

    #[tokio::test]
    async fn seeded_store_has_demo_roster() {
        let dir = std::env::temp_dir().join(format!("afyaukweli-seed-{}", Uuid::new_v4()));
        let store = FileStore::open(dir, true).expect("open");
        let (user, hash) = store
            .user_by_email("akinyi.otieno@afya.ke")
            .await
            .unwrap()
            .expect("seeded CHW present");
        assert_eq!(user.role, Role::Chw);
        assert!(crate::auth::password::verify_password("demo123", &hash).unwrap());
        assert_eq!(store.count_chws().await.unwrap(), 1);
    }
}
