//! rollcall-store — SQLite backend for the roster and attendance log.
//!
//! One connection behind a mutex; the schema enforces the invariants
//! the engine relies on: unique identity codes, cascade deletion of a
//! removed identity's records, and at most one attendance row per
//! identity per day via a unique index.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{Local, NaiveDate};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use thiserror::Error;
use tracing::{debug, info};

use rollcall_engine::{
    AttendanceFilter, AttendanceLog, AttendanceRecord, Identity, IdentityId, NewAttendanceRecord,
    RecordStatus, Roster, StorageError,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    code       TEXT NOT NULL UNIQUE,
    name       TEXT NOT NULL,
    department TEXT NOT NULL,
    photo_path TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    date        TEXT NOT NULL,
    time        TEXT NOT NULL,
    status      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE (identity_id, date)
);

CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);
";

const SELECT_RECORD: &str = "SELECT a.id, a.identity_id, i.code, i.name, a.date, a.time, \
     a.status, a.created_at FROM attendance a JOIN identities i ON i.id = a.identity_id";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identity code {0:?} is already enrolled")]
    DuplicateCode(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Fields required to enroll a new identity.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub code: String,
    pub name: String,
    pub department: String,
    pub photo_path: Option<PathBuf>,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and applies
    /// the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "database opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        debug!("schema applied");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_identity(&self, new: &NewIdentity) -> Result<Identity, StoreError> {
        let conn = self.conn();
        let photo = new.photo_path.as_ref().map(|p| p.display().to_string());
        let created_at = Local::now().naive_local();
        conn.execute(
            "INSERT INTO identities (code, name, department, photo_path, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![new.code, new.name, new.department, photo, created_at],
        )
        .map_err(|err| {
            if is_unique_violation(&err, "identities.code") {
                StoreError::DuplicateCode(new.code.clone())
            } else {
                err.into()
            }
        })?;
        let id = conn.last_insert_rowid();
        let identity = conn.query_row(
            "SELECT id, code, name, department, photo_path, created_at \
             FROM identities WHERE id = ?1",
            [id],
            identity_from_row,
        )?;
        info!(id, code = %identity.code, "identity enrolled");
        Ok(identity)
    }

    pub fn identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT id, code, name, department, photo_path, created_at \
                 FROM identities WHERE id = ?1",
                [id],
                identity_from_row,
            )
            .optional()?)
    }

    pub fn identities(&self) -> Result<Vec<Identity>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, code, name, department, photo_path, created_at \
             FROM identities ORDER BY code",
        )?;
        let rows = stmt.query_map([], identity_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Substring search over code, name, and department.
    pub fn search_identities(&self, term: &str) -> Result<Vec<Identity>, StoreError> {
        let pattern = format!("%{term}%");
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, code, name, department, photo_path, created_at FROM identities \
             WHERE code LIKE ?1 OR name LIKE ?1 OR department LIKE ?1 ORDER BY code",
        )?;
        let rows = stmt.query_map([&pattern], identity_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Removes an identity; its attendance rows go with it.
    pub fn remove_identity(&self, id: IdentityId) -> Result<bool, StoreError> {
        let conn = self.conn();
        let n = conn.execute("DELETE FROM identities WHERE id = ?1", [id])?;
        if n > 0 {
            info!(id, "identity removed");
        }
        Ok(n > 0)
    }
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        department: row.get(3)?,
        photo_path: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
        created_at: row.get(5)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let status_text: String = row.get(6)?;
    let status = RecordStatus::parse(&status_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown status {status_text:?}").into(),
        )
    })?;
    Ok(AttendanceRecord {
        id: row.get(0)?,
        identity_id: row.get(1)?,
        identity_code: row.get(2)?,
        identity_name: row.get(3)?,
        date: row.get(4)?,
        time: row.get(5)?,
        status,
        created_at: row.get(7)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error, column: &str) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg)) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE && msg.contains(column)
        }
        _ => false,
    }
}

fn backend(err: rusqlite::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

impl Roster for SqliteStore {
    fn list_identities(&self) -> Result<Vec<Identity>, StorageError> {
        self.identities()
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>, StorageError> {
        self.identity(id)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}

impl AttendanceLog for SqliteStore {
    fn find_by_identity_and_date(
        &self,
        identity: IdentityId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StorageError> {
        let conn = self.conn();
        conn.query_row(
            &format!("{SELECT_RECORD} WHERE a.identity_id = ?1 AND a.date = ?2"),
            params![identity, date],
            record_from_row,
        )
        .optional()
        .map_err(backend)
    }

    fn insert(&self, record: NewAttendanceRecord) -> Result<AttendanceRecord, StorageError> {
        let conn = self.conn();
        let created_at = Local::now().naive_local();
        conn.execute(
            "INSERT INTO attendance (identity_id, date, time, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.identity_id,
                record.date,
                record.time,
                record.status.as_str(),
                created_at
            ],
        )
        .map_err(|err| {
            if is_unique_violation(&err, "attendance.identity_id") {
                StorageError::DuplicateDay {
                    identity: record.identity_id,
                    date: record.date,
                }
            } else {
                backend(err)
            }
        })?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("{SELECT_RECORD} WHERE a.id = ?1"),
            [id],
            record_from_row,
        )
        .map_err(backend)
    }

    fn get(&self, id: i64) -> Result<Option<AttendanceRecord>, StorageError> {
        let conn = self.conn();
        conn.query_row(
            &format!("{SELECT_RECORD} WHERE a.id = ?1"),
            [id],
            record_from_row,
        )
        .optional()
        .map_err(backend)
    }

    fn update_status(
        &self,
        id: i64,
        status: RecordStatus,
    ) -> Result<Option<AttendanceRecord>, StorageError> {
        {
            let conn = self.conn();
            let n = conn
                .execute(
                    "UPDATE attendance SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), id],
                )
                .map_err(backend)?;
            if n == 0 {
                return Ok(None);
            }
        }
        self.get(id)
    }

    fn delete(&self, id: i64) -> Result<bool, StorageError> {
        let conn = self.conn();
        let n = conn
            .execute("DELETE FROM attendance WHERE id = ?1", [id])
            .map_err(backend)?;
        Ok(n > 0)
    }

    fn query(&self, filter: &AttendanceFilter) -> Result<Vec<AttendanceRecord>, StorageError> {
        let mut clauses: Vec<&'static str> = Vec::new();
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(identity) = filter.identity {
            clauses.push("a.identity_id = ?");
            args.push(Box::new(identity));
        }
        if let Some(date) = filter.date {
            clauses.push("a.date = ?");
            args.push(Box::new(date));
        }
        if let Some(from) = filter.from {
            clauses.push("a.date >= ?");
            args.push(Box::new(from));
        }
        if let Some(to) = filter.to {
            clauses.push("a.date <= ?");
            args.push(Box::new(to));
        }
        if let Some(status) = filter.status {
            clauses.push("a.status = ?");
            args.push(Box::new(status.as_str()));
        }

        let mut sql = SELECT_RECORD.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY a.date DESC, a.time DESC");

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql).map_err(backend)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), record_from_row)
            .map_err(backend)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(backend)?);
        }
        Ok(out)
    }
}
