//! Storage traits the engine orchestrates over.
//!
//! Backends live in their own crate; the engine only sees these two
//! seams plus [`StorageError`]. The daily-uniqueness guarantee belongs
//! to the backend (a unique index, not an engine-side check), surfaced
//! as [`StorageError::DuplicateDay`].

use chrono::NaiveDate;
use thiserror::Error;

use crate::types::{
    AttendanceFilter, AttendanceRecord, Identity, IdentityId, NewAttendanceRecord, RecordStatus,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("attendance for identity {identity} on {date} already exists")]
    DuplicateDay { identity: IdentityId, date: NaiveDate },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Read access to the enrolled population.
pub trait Roster: Send + Sync {
    fn list_identities(&self) -> Result<Vec<Identity>, StorageError>;

    fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>, StorageError>;
}

/// Attendance record persistence.
pub trait AttendanceLog: Send + Sync {
    fn find_by_identity_and_date(
        &self,
        identity: IdentityId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StorageError>;

    /// Inserts a record, enforcing at most one per identity per day.
    fn insert(&self, record: NewAttendanceRecord) -> Result<AttendanceRecord, StorageError>;

    fn get(&self, id: i64) -> Result<Option<AttendanceRecord>, StorageError>;

    /// Returns the updated record, or `None` when the id is unknown.
    fn update_status(
        &self,
        id: i64,
        status: RecordStatus,
    ) -> Result<Option<AttendanceRecord>, StorageError>;

    /// Returns whether a record was removed.
    fn delete(&self, id: i64) -> Result<bool, StorageError>;

    /// Newest records first (by date, then time of day).
    fn query(&self, filter: &AttendanceFilter) -> Result<Vec<AttendanceRecord>, StorageError>;
}
