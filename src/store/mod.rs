pub mod error;
pub mod models;
pub mod repository;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;

pub use error::StoreError;
pub use models::*;

/// Every embedded migration, in application order. Each is idempotent to
/// re-run against an already-migrated database because `run_migrations`
/// only applies the ones past the current `schema_version`.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../resources/migrations/001_initial.sql"))];

fn configure_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn get_current_version(conn: &Connection) -> rusqlite::Result<i64> {
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |_| Ok(true),
        )
        .unwrap_or(false);
    if !exists {
        return Ok(0);
    }
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i64>>(0)
    })
    .map(|v| v.unwrap_or(0))
}

fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let current = get_current_version(conn)?;
    for (version, sql) in MIGRATIONS {
        if *version > current {
            conn.execute_batch(sql)?;
            conn.execute(
                "UPDATE schema_version SET version = ?1",
                rusqlite::params![version],
            )?;
            tracing::info!(version, "applied migration");
        }
    }
    Ok(())
}

/// The single point of contact with SQLite. One connection behind a mutex:
/// SQLite serializes writers anyway, and a kiosk's request volume never
/// makes that a bottleneck.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        configure_pragmas(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        configure_pragmas(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_user(&self, name: &str, employee_code: &str) -> Result<User, StoreError> {
        repository::create_user(&self.lock(), name, employee_code)
    }

    pub fn get_user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        repository::get_user(&self.lock(), user_id)
    }

    pub fn get_user_by_code(&self, employee_code: &str) -> Result<Option<User>, StoreError> {
        repository::get_user_by_code(&self.lock(), employee_code)
    }

    pub fn list_users(&self, active_only: bool) -> Result<Vec<User>, StoreError> {
        repository::list_users(&self.lock(), active_only)
    }

    pub fn list_users_with_template_counts(&self) -> Result<Vec<UserSummary>, StoreError> {
        repository::list_users_with_template_counts(&self.lock())
    }

    pub fn deactivate_user(&self, user_id: i64) -> Result<(), StoreError> {
        repository::deactivate_user(&self.lock(), user_id)
    }

    pub fn delete_user(&self, user_id: i64) -> Result<(), StoreError> {
        repository::delete_user(&self.lock(), user_id)
    }

    pub fn add_template(
        &self,
        user_id: i64,
        template_path: &str,
        quality: i64,
    ) -> Result<Template, StoreError> {
        repository::add_template(&self.lock(), user_id, template_path, quality)
    }

    pub fn get_user_templates(&self, user_id: i64) -> Result<Vec<Template>, StoreError> {
        repository::get_user_templates(&self.lock(), user_id)
    }

    pub fn get_all_templates(&self) -> Result<Vec<Template>, StoreError> {
        repository::get_all_templates(&self.lock())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_punch(
        &self,
        user_id: i64,
        timestamp_utc: DateTime<Utc>,
        timestamp_local: NaiveDateTime,
        punch_type: PunchType,
        match_score: i64,
        device_id: &str,
    ) -> Result<Punch, StoreError> {
        repository::record_punch(
            &self.lock(),
            user_id,
            timestamp_utc,
            timestamp_local,
            punch_type,
            match_score,
            device_id,
        )
    }

    pub fn get_last_punch(&self, user_id: i64) -> Result<Option<Punch>, StoreError> {
        repository::get_last_punch(&self.lock(), user_id)
    }

    pub fn get_user_punch_count_today(
        &self,
        user_id: i64,
        local_midnight: NaiveDateTime,
    ) -> Result<i64, StoreError> {
        repository::get_user_punch_count_today(&self.lock(), user_id, local_midnight)
    }

    pub fn get_unsynced_punches(&self, limit: i64) -> Result<Vec<Punch>, StoreError> {
        repository::get_unsynced_punches(&self.lock(), limit)
    }

    pub fn mark_punches_synced(&self, ids: &[i64]) -> Result<(), StoreError> {
        repository::mark_punches_synced(&self.lock(), ids)
    }

    pub fn mark_punch_sync_error(&self, id: i64, message: &str) -> Result<(), StoreError> {
        repository::mark_punch_sync_error(&self.lock(), id, message)
    }

    pub fn get_punches(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        user_id: Option<i64>,
    ) -> Result<Vec<Punch>, StoreError> {
        repository::get_punches(&self.lock(), start, end, user_id)
    }

    pub fn register_device(
        &self,
        user_id: i64,
        token: &str,
        name: &str,
        user_agent: Option<&str>,
    ) -> Result<Device, StoreError> {
        repository::register_device(&self.lock(), user_id, token, name, user_agent)
    }

    pub fn get_device_by_token(&self, token: &str) -> Result<Option<DeviceWithUser>, StoreError> {
        repository::get_device_by_token(&self.lock(), token)
    }

    pub fn update_device_user_agent(&self, token: &str, user_agent: &str) -> Result<(), StoreError> {
        repository::update_device_user_agent(&self.lock(), token, user_agent)
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceWithUser>, StoreError> {
        repository::list_devices(&self.lock())
    }

    pub fn delete_device(&self, device_id: i64) -> Result<(), StoreError> {
        repository::delete_device(&self.lock(), device_id)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        repository::get_setting(&self.lock(), key)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        repository::set_setting(&self.lock(), key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().expect("in-memory store opens")
    }

    #[test]
    fn database_initializes_all_tables() {
        let store = store();
        let conn = store.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(count >= 6, "expected at least 6 tables, found {count}");
    }

    #[test]
    fn schema_version_is_current() {
        let store = store();
        let conn = store.lock();
        assert_eq!(get_current_version(&conn).unwrap(), 1);
    }

    #[test]
    fn migration_idempotent() {
        let store = store();
        {
            let conn = store.lock();
            run_migrations(&conn).expect("re-running migrations is a no-op");
        }
        let conn = store.lock();
        assert_eq!(get_current_version(&conn).unwrap(), 1);
    }

    #[test]
    fn foreign_keys_enabled() {
        let store = store();
        let conn = store.lock();
        let mode: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
        assert_eq!(mode, 1);
    }

    #[test]
    fn create_and_fetch_user_roundtrip() {
        let store = store();
        let user = store.create_user("Ada Lovelace", "E001").unwrap();
        let fetched = store.get_user(user.id).unwrap().unwrap();
        assert_eq!(fetched.employee_code, "E001");
        assert!(fetched.active);

        let by_code = store.get_user_by_code("E001").unwrap().unwrap();
        assert_eq!(by_code.id, user.id);
    }

    #[test]
    fn duplicate_employee_code_rejected() {
        let store = store();
        store.create_user("Ada", "E001").unwrap();
        let err = store.create_user("Bob", "E001").unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn deleting_user_removes_punches_but_not_other_users() {
        let store = store();
        let user = store.create_user("Ada", "E001").unwrap();
        let now = Utc::now();
        store
            .record_punch(user.id, now, now.naive_utc(), PunchType::In, 95, "kiosk-1")
            .unwrap();
        store.delete_user(user.id).unwrap();
        assert!(store.get_user(user.id).unwrap().is_none());
        assert_eq!(store.get_punches(None, None, Some(user.id)).unwrap().len(), 0);
    }

    #[test]
    fn deactivated_user_excluded_from_template_gallery() {
        let store = store();
        let user = store.create_user("Ada", "E001").unwrap();
        store.add_template(user.id, "/templates/1.xyt", 80).unwrap();
        assert_eq!(store.get_all_templates().unwrap().len(), 1);
        store.deactivate_user(user.id).unwrap();
        assert_eq!(store.get_all_templates().unwrap().len(), 0);
    }

    #[test]
    fn gallery_orders_by_quality_descending() {
        let store = store();
        let user = store.create_user("Ada", "E001").unwrap();
        store.add_template(user.id, "/templates/low.xyt", 40).unwrap();
        store.add_template(user.id, "/templates/high.xyt", 90).unwrap();
        let gallery = store.get_all_templates().unwrap();
        assert_eq!(gallery[0].template_path, "/templates/high.xyt");
    }

    #[test]
    fn unsynced_punches_roundtrip() {
        let store = store();
        let user = store.create_user("Ada", "E001").unwrap();
        let now = Utc::now();
        let punch = store
            .record_punch(user.id, now, now.naive_utc(), PunchType::In, 95, "kiosk-1")
            .unwrap();
        let unsynced = store.get_unsynced_punches(10).unwrap();
        assert_eq!(unsynced.len(), 1);
        store.mark_punches_synced(&[punch.id]).unwrap();
        assert_eq!(store.get_unsynced_punches(10).unwrap().len(), 0);
    }

    #[test]
    fn sync_error_is_truncated_and_recorded() {
        let store = store();
        let user = store.create_user("Ada", "E001").unwrap();
        let now = Utc::now();
        let punch = store
            .record_punch(user.id, now, now.naive_utc(), PunchType::In, 95, "kiosk-1")
            .unwrap();
        let long_message = "x".repeat(1000);
        store.mark_punch_sync_error(punch.id, &long_message).unwrap();
        let fetched = store.get_unsynced_punches(10).unwrap();
        assert_eq!(fetched[0].sync_error.as_ref().unwrap().len(), 500);
    }

    #[test]
    fn device_token_lookup_joins_owning_user() {
        let store = store();
        let user = store.create_user("Ada", "E001").unwrap();
        store.register_device(user.id, "tok-abc", "Ada's phone", None).unwrap();
        let found = store.get_device_by_token("tok-abc").unwrap().unwrap();
        assert_eq!(found.user.id, user.id);
        assert_eq!(found.device.name, "Ada's phone");
    }

    #[test]
    fn duplicate_device_token_rejected() {
        let store = store();
        let user = store.create_user("Ada", "E001").unwrap();
        store.register_device(user.id, "tok-abc", "Phone 1", None).unwrap();
        let err = store
            .register_device(user.id, "tok-abc", "Phone 2", None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let store = store();
        assert!(store.get_setting("roi_x").unwrap().is_none());
        store.set_setting("roi_x", "10").unwrap();
        assert_eq!(store.get_setting("roi_x").unwrap(), Some("10".to_string()));
        store.set_setting("roi_x", "20").unwrap();
        assert_eq!(store.get_setting("roi_x").unwrap(), Some("20".to_string()));
    }

    #[test]
    fn punch_count_today_respects_local_midnight_boundary() {
        let store = store();
        let user = store.create_user("Ada", "E001").unwrap();
        let midnight = Utc::now().naive_utc().date().and_hms_opt(0, 0, 0).unwrap();
        let before_midnight = midnight - chrono::Duration::hours(1);
        let after_midnight = midnight + chrono::Duration::hours(1);

        store
            .record_punch(user.id, Utc::now(), before_midnight, PunchType::In, 90, "kiosk-1")
            .unwrap();
        store
            .record_punch(user.id, Utc::now(), after_midnight, PunchType::Out, 90, "kiosk-1")
            .unwrap();

        assert_eq!(store.get_user_punch_count_today(user.id, midnight).unwrap(), 1);
    }
}
