//! Persistent SQLite store for users, the blocklist, admins and settings.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Schema version written into `settings` when the database is created.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_VERSION_KEY: &str = "schema_version";
const WELCOME_KEY: &str = "welcome_text";
const LEGACY_IMPORTED_KEY: &str = "legacy_imported";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("database schema version {found} is newer than supported version {}", SCHEMA_VERSION)]
    UnsupportedSchema { found: i64 },
    #[error("failed to read legacy file '{}': {source}", .path.display())]
    LegacyRead { path: PathBuf, source: std::io::Error },
    #[error("failed to parse legacy file '{}': {source}", .path.display())]
    LegacyParse { path: PathBuf, source: serde_json::Error },
}

/// A user who has pressed /start at least once.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub user_id: i64,
    pub display_name: String,
    pub handle: Option<String>,
    /// Set on first registration, never updated.
    pub first_seen: DateTime<Utc>,
}

/// An operator allowed to run admin commands and receive relayed messages.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminRecord {
    pub user_id: i64,
    pub display_name: String,
    pub handle: Option<String>,
}

/// Presence in the blocklist. Carries no payload beyond the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    pub user_id: i64,
}

/// One independently persisted key-value collection keyed by user id.
pub trait Domain: Sized {
    const TABLE: &'static str;

    fn user_id(&self) -> i64;
    fn select_sql() -> &'static str;
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize>;
}

impl Domain for UserRecord {
    const TABLE: &'static str = "users";

    fn user_id(&self) -> i64 {
        self.user_id
    }

    fn select_sql() -> &'static str {
        "SELECT user_id, display_name, handle, first_seen FROM users"
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            display_name: row.get(1)?,
            handle: row.get(2)?,
            first_seen: row.get(3)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT OR IGNORE INTO users (user_id, display_name, handle, first_seen) VALUES (?1, ?2, ?3, ?4)",
            params![self.user_id, self.display_name, self.handle, self.first_seen],
        )
    }
}

impl Domain for AdminRecord {
    const TABLE: &'static str = "admins";

    fn user_id(&self) -> i64 {
        self.user_id
    }

    fn select_sql() -> &'static str {
        "SELECT user_id, display_name, handle FROM admins"
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            display_name: row.get(1)?,
            handle: row.get(2)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT OR REPLACE INTO admins (user_id, display_name, handle) VALUES (?1, ?2, ?3)",
            params![self.user_id, self.display_name, self.handle],
        )
    }
}

impl Domain for BlockEntry {
    const TABLE: &'static str = "blocklist";

    fn user_id(&self) -> i64 {
        self.user_id
    }

    fn select_sql() -> &'static str {
        "SELECT user_id FROM blocklist"
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self { user_id: row.get(0)? })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT OR IGNORE INTO blocklist (user_id) VALUES (?1)",
            params![self.user_id],
        )
    }
}

/// Counts reported after importing the flat-file JSON layout.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LegacyImport {
    pub users: usize,
    pub blocked: usize,
    pub welcome: bool,
}

/// Durable store. Every method holds the connection lock for its whole
/// read-modify-write, so mutations never interleave.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create an empty in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        db.init_schema()?;
        Ok(db)
    }

    /// Open the database at `path`, creating it if needed.
    ///
    /// Until a legacy import has committed, `users.json`, `blocks.json` and
    /// `welcome.txt` from the same directory are imported on every open. A
    /// broken legacy file fails the open and leaves the database untouched.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Self { conn: Mutex::new(Connection::open(path)?) };
        db.init_schema()?;

        if !db.legacy_imported()? {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let report = db.import_legacy(dir)?;
            if report != LegacyImport::default() {
                info!(
                    "Imported legacy data from {:?}: {} users, {} blocked, welcome={}",
                    dir, report.users, report.blocked, report.welcome
                );
            }
        }

        let conn = db.conn()?;
        let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let admins: i64 = conn.query_row("SELECT COUNT(*) FROM admins", [], |row| row.get(0))?;
        drop(conn);
        info!("Loaded database from {:?} ({} users, {} admins)", path, users, admins);

        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                display_name TEXT NOT NULL,
                handle TEXT,
                first_seen TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS blocklist (
                user_id INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS admins (
                user_id INTEGER PRIMARY KEY,
                display_name TEXT NOT NULL,
                handle TEXT
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#)?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![SCHEMA_VERSION_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match stored.and_then(|v| v.parse::<i64>().ok()) {
            Some(found) if found > SCHEMA_VERSION => Err(StoreError::UnsupportedSchema { found }),
            Some(_) => Ok(()),
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                    params![SCHEMA_VERSION_KEY, SCHEMA_VERSION.to_string()],
                )?;
                Ok(())
            }
        }
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let value: String = conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )?;
        Ok(value.parse().unwrap_or(0))
    }

    // ==================== WHOLE-DOMAIN ACCESS ====================

    /// Load every record of a domain. An empty domain yields an empty map.
    pub fn load<D: Domain>(&self) -> Result<BTreeMap<i64, D>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(D::select_sql())?;
        let rows = stmt.query_map([], |row| D::from_row(row))?;

        let mut map = BTreeMap::new();
        for row in rows {
            let record = row?;
            map.insert(record.user_id(), record);
        }
        Ok(map)
    }

    /// Replace the whole domain with `records` in a single transaction.
    pub fn save<D: Domain>(&self, records: &BTreeMap<i64, D>) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {}", D::TABLE), [])?;
        for record in records.values() {
            record.insert(&tx)?;
        }
        tx.commit()?;
        debug!("Saved {} records to {}", records.len(), D::TABLE);
        Ok(())
    }

    // ==================== USERS ====================

    /// Insert `user` unless its id is already present. Returns whether a row
    /// was written.
    pub fn insert_user_if_absent(&self, user: &UserRecord) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        Ok(user.insert(&conn)? == 1)
    }

    pub fn get_user(&self, user_id: i64) -> Result<Option<UserRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE user_id = ?1", UserRecord::select_sql());
        Ok(conn.query_row(&sql, params![user_id], |row| UserRecord::from_row(row)).optional()?)
    }

    /// All registered users, oldest first.
    pub fn users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("{} ORDER BY first_seen ASC, user_id ASC", UserRecord::select_sql());
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map([], |row| UserRecord::from_row(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn user_ids(&self) -> Result<Vec<i64>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT user_id FROM users ORDER BY user_id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    // ==================== BLOCKLIST ====================

    pub fn is_blocked(&self, user_id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT user_id FROM blocklist WHERE user_id = ?1", params![user_id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn block(&self, user_id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        BlockEntry { user_id }.insert(&conn)?;
        Ok(())
    }

    /// Remove `user_id` from the blocklist. Returns whether it was present.
    pub fn unblock(&self, user_id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM blocklist WHERE user_id = ?1", params![user_id])?;
        Ok(removed > 0)
    }

    // ==================== ADMINS ====================

    pub fn is_admin(&self, user_id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT user_id FROM admins WHERE user_id = ?1", params![user_id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn admin_ids(&self) -> Result<Vec<i64>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT user_id FROM admins ORDER BY user_id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Insert or overwrite an admin record.
    pub fn upsert_admin(&self, admin: &AdminRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        admin.insert(&conn)?;
        Ok(())
    }

    /// Insert `admin` only if the id is not already an admin.
    pub fn insert_admin_if_absent(&self, admin: &AdminRecord) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO admins (user_id, display_name, handle) VALUES (?1, ?2, ?3)",
            params![admin.user_id, admin.display_name, admin.handle],
        )?;
        Ok(inserted == 1)
    }

    /// Remove an admin. Returns whether the id was present.
    pub fn remove_admin(&self, user_id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM admins WHERE user_id = ?1", params![user_id])?;
        Ok(removed > 0)
    }

    // ==================== SETTINGS ====================

    /// The stored welcome text, if one has ever been set.
    pub fn welcome_text(&self) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![WELCOME_KEY], |row| row.get(0))
            .optional()?)
    }

    pub fn set_welcome_text(&self, text: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![WELCOME_KEY, text],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn drop_table(&self, table: &str) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(&format!("DROP TABLE {table}")).unwrap();
    }

    // ==================== LEGACY IMPORT ====================

    /// Whether a legacy import has already committed.
    pub fn legacy_imported(&self) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let found: Option<String> = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![LEGACY_IMPORTED_KEY], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Import `users.json`, `blocks.json` and `welcome.txt` from `dir` and
    /// mark the import done. Missing files are skipped; existing rows are
    /// kept. All files are parsed before anything is written, and the rows
    /// and the marker commit in one transaction.
    pub fn import_legacy(&self, dir: &Path) -> Result<LegacyImport, StoreError> {
        #[derive(Deserialize)]
        struct LegacyUser {
            name: String,
            username: Option<String>,
            start_time: Option<String>,
        }

        let users_path = dir.join("users.json");
        let users: HashMap<String, LegacyUser> = if users_path.exists() {
            read_legacy_json(&users_path)?
        } else {
            HashMap::new()
        };

        let blocks_path = dir.join("blocks.json");
        let blocks: HashMap<String, serde_json::Value> = if blocks_path.exists() {
            read_legacy_json(&blocks_path)?
        } else {
            HashMap::new()
        };

        let welcome_path = dir.join("welcome.txt");
        let welcome = if welcome_path.exists() {
            let text = std::fs::read_to_string(&welcome_path)
                .map_err(|source| StoreError::LegacyRead { path: welcome_path.clone(), source })?;
            Some(text)
        } else {
            None
        };

        let mut report = LegacyImport::default();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for (key, user) in users {
            let Ok(user_id) = key.parse::<i64>() else {
                warn!("Skipping legacy user with non-numeric id {:?}", key);
                continue;
            };
            let record = UserRecord {
                user_id,
                display_name: user.name,
                handle: user.username,
                first_seen: user
                    .start_time
                    .as_deref()
                    .and_then(parse_legacy_timestamp)
                    .unwrap_or_else(Utc::now),
            };
            report.users += record.insert(&tx)?;
        }

        for key in blocks.keys() {
            match key.parse::<i64>() {
                Ok(user_id) => report.blocked += BlockEntry { user_id }.insert(&tx)?,
                Err(_) => warn!("Skipping legacy block entry with non-numeric id {:?}", key),
            }
        }

        if let Some(text) = welcome {
            tx.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![WELCOME_KEY, text],
            )?;
            report.welcome = true;
        }

        tx.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![LEGACY_IMPORTED_KEY, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        Ok(report)
    }
}

fn read_legacy_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = std::fs::read_to_string(path)
        .map_err(|source| StoreError::LegacyRead { path: path.to_path_buf(), source })?;
    serde_json::from_str(&content).map_err(|source| StoreError::LegacyParse { path: path.to_path_buf(), source })
}

/// Legacy timestamps are naive ISO-8601 (`2024-01-15T10:00:00.123456`).
fn parse_legacy_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user(id: i64, name: &str, first_seen: DateTime<Utc>) -> UserRecord {
        UserRecord {
            user_id: id,
            display_name: name.to_string(),
            handle: Some(name.to_lowercase()),
            first_seen,
        }
    }

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_insert_user_keeps_first_record() {
        let db = Database::in_memory().unwrap();

        assert!(db.insert_user_if_absent(&user(100, "Alice", ts(10))).unwrap());
        assert!(!db.insert_user_if_absent(&user(100, "Alice Renamed", ts(12))).unwrap());

        let users = db.users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].display_name, "Alice");
        assert_eq!(users[0].first_seen, ts(10));
    }

    #[test]
    fn test_users_ordered_by_first_seen() {
        let db = Database::in_memory().unwrap();
        db.insert_user_if_absent(&user(3, "Late", ts(15))).unwrap();
        db.insert_user_if_absent(&user(9, "Early", ts(9))).unwrap();

        let names: Vec<_> = db.users().unwrap().into_iter().map(|u| u.display_name).collect();
        assert_eq!(names, vec!["Early", "Late"]);
        assert_eq!(db.user_ids().unwrap(), vec![3, 9]);
    }

    #[test]
    fn test_block_unblock() {
        let db = Database::in_memory().unwrap();
        assert!(!db.is_blocked(42).unwrap());

        db.block(42).unwrap();
        db.block(42).unwrap();
        assert!(db.is_blocked(42).unwrap());

        assert!(db.unblock(42).unwrap());
        assert!(!db.is_blocked(42).unwrap());
        // Unblocking an id that isn't blocked is fine
        assert!(!db.unblock(42).unwrap());
    }

    #[test]
    fn test_admin_upsert_overwrites_names() {
        let db = Database::in_memory().unwrap();
        let admin = AdminRecord { user_id: 7, display_name: "Old".into(), handle: None };
        db.upsert_admin(&admin).unwrap();
        db.upsert_admin(&AdminRecord { display_name: "New".into(), handle: Some("new".into()), ..admin }).unwrap();

        let admins = db.load::<AdminRecord>().unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[&7].display_name, "New");
        assert_eq!(admins[&7].handle.as_deref(), Some("new"));
    }

    #[test]
    fn test_insert_admin_if_absent_keeps_existing() {
        let db = Database::in_memory().unwrap();
        let admin = AdminRecord { user_id: 7, display_name: "First".into(), handle: None };
        assert!(db.insert_admin_if_absent(&admin).unwrap());
        assert!(!db.insert_admin_if_absent(&AdminRecord { display_name: "Second".into(), ..admin }).unwrap());
        assert_eq!(db.load::<AdminRecord>().unwrap()[&7].display_name, "First");
    }

    #[test]
    fn test_remove_admin() {
        let db = Database::in_memory().unwrap();
        db.upsert_admin(&AdminRecord { user_id: 1, display_name: "A".into(), handle: None }).unwrap();
        assert!(db.is_admin(1).unwrap());
        assert!(db.remove_admin(1).unwrap());
        assert!(!db.is_admin(1).unwrap());
        assert!(!db.remove_admin(1).unwrap());
        assert!(db.admin_ids().unwrap().is_empty());
    }

    #[test]
    fn test_load_empty_domain() {
        let db = Database::in_memory().unwrap();
        assert!(db.load::<UserRecord>().unwrap().is_empty());
        assert!(db.load::<BlockEntry>().unwrap().is_empty());
        assert!(db.load::<AdminRecord>().unwrap().is_empty());
    }

    #[test]
    fn test_save_replaces_domain() {
        let db = Database::in_memory().unwrap();
        db.block(1).unwrap();
        db.block(2).unwrap();

        let mut blocks = db.load::<BlockEntry>().unwrap();
        blocks.remove(&1);
        blocks.insert(3, BlockEntry { user_id: 3 });
        db.save(&blocks).unwrap();

        assert!(!db.is_blocked(1).unwrap());
        assert!(db.is_blocked(2).unwrap());
        assert!(db.is_blocked(3).unwrap());
    }

    #[test]
    fn test_welcome_text() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.welcome_text().unwrap(), None);
        db.set_welcome_text("X").unwrap();
        assert_eq!(db.welcome_text().unwrap().as_deref(), Some("X"));
        db.set_welcome_text("").unwrap();
        assert_eq!(db.welcome_text().unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_schema_version_written() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");

        {
            let db = Database::open(&path).unwrap();
            db.insert_user_if_absent(&user(5, "Eve", ts(8))).unwrap();
            db.block(5).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_user(5).unwrap().map(|u| u.first_seen), Some(ts(8)));
        assert!(db.is_blocked(5).unwrap());
    }

    #[test]
    fn test_rejects_newer_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");
        drop(Database::open(&path).unwrap());

        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE settings SET value = '99' WHERE key = 'schema_version'", []).unwrap();
        drop(conn);

        assert!(matches!(Database::open(&path), Err(StoreError::UnsupportedSchema { found: 99 })));
    }

    #[test]
    fn test_imports_legacy_files_on_creation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("users.json"),
            r#"{
                "100": {"name": "Alice", "username": "alice", "start_time": "2024-01-15T10:00:00.123456"},
                "101": {"name": "Bob", "username": null, "start_time": "2024-01-16T11:30:00"},
                "oops": {"name": "Bad", "username": null, "start_time": "2024-01-16T11:30:00"}
            }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("blocks.json"), r#"{"101": true}"#).unwrap();
        std::fs::write(dir.path().join("welcome.txt"), "hi there").unwrap();

        let db = Database::open(&dir.path().join("relay.db")).unwrap();

        let users = db.load::<UserRecord>().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[&100].handle.as_deref(), Some("alice"));
        assert_eq!(users[&101].handle, None);
        assert_eq!(users[&101].first_seen, Utc.with_ymd_and_hms(2024, 1, 16, 11, 30, 0).unwrap());
        assert!(db.is_blocked(101).unwrap());
        assert_eq!(db.welcome_text().unwrap().as_deref(), Some("hi there"));
    }

    #[test]
    fn test_legacy_parse_error_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("users.json"), r#"{"100": {"name": "Alice", "username": null, "start_time": null}}"#).unwrap();
        std::fs::write(dir.path().join("blocks.json"), "{ not json").unwrap();
        let db = Database::in_memory().unwrap();

        assert!(matches!(db.import_legacy(dir.path()), Err(StoreError::LegacyParse { .. })));
        assert!(db.load::<UserRecord>().unwrap().is_empty());
        assert!(!db.legacy_imported().unwrap());
    }

    #[test]
    fn test_broken_legacy_file_is_retried_on_next_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");
        std::fs::write(dir.path().join("users.json"), "{ truncated").unwrap();
        std::fs::write(dir.path().join("blocks.json"), r#"{"42": true}"#).unwrap();
        std::fs::write(dir.path().join("welcome.txt"), "hello").unwrap();

        assert!(matches!(Database::open(&path), Err(StoreError::LegacyParse { .. })));
        assert!(matches!(Database::open(&path), Err(StoreError::LegacyParse { .. })));

        std::fs::write(dir.path().join("users.json"), "{}").unwrap();
        let db = Database::open(&path).unwrap();
        assert!(db.is_blocked(42).unwrap());
        assert_eq!(db.welcome_text().unwrap().as_deref(), Some("hello"));
        assert!(db.legacy_imported().unwrap());
    }

    #[test]
    fn test_legacy_import_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");
        std::fs::write(dir.path().join("blocks.json"), r#"{"42": true}"#).unwrap();

        let db = Database::open(&path).unwrap();
        assert!(db.unblock(42).unwrap());
        drop(db);

        let db = Database::open(&path).unwrap();
        assert!(!db.is_blocked(42).unwrap());
    }

    #[test]
    fn test_parse_legacy_timestamp() {
        assert_eq!(parse_legacy_timestamp("2024-01-15T10:00:00"), Some(ts(10)));
        assert_eq!(parse_legacy_timestamp("2024-01-15T10:00:00+00:00"), Some(ts(10)));
        assert_eq!(parse_legacy_timestamp("yesterday"), None);
    }
}
