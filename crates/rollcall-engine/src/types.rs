//! Domain types shared by storage backends and surfaces.

use std::fmt;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub type IdentityId = i64;

/// An enrolled person.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: IdentityId,
    /// Short unique handle, e.g. a badge or student number.
    pub code: String,
    pub name: String,
    pub department: String,
    /// Reference photo used to (re)fit the matcher. Identities without
    /// one are listed but can never be resolved from an image.
    pub photo_path: Option<PathBuf>,
    pub created_at: NaiveDateTime,
}

/// Attendance disposition of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Present,
    Excused,
    Absent,
}

impl RecordStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(RecordStatus::Present),
            "excused" => Some(RecordStatus::Excused),
            "absent" => Some(RecordStatus::Absent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Present => "present",
            RecordStatus::Excused => "excused",
            RecordStatus::Absent => "absent",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A stored attendance record, joined with the identity it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub identity_id: IdentityId,
    pub identity_code: String,
    pub identity_name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: RecordStatus,
    pub created_at: NaiveDateTime,
}

/// Fields the engine supplies when inserting a record.
#[derive(Debug, Clone)]
pub struct NewAttendanceRecord {
    pub identity_id: IdentityId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: RecordStatus,
}

/// Who is invoking an operation. Holders may only see and submit
/// their own attendance; everything else needs Admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Admin,
    Holder(IdentityId),
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::Admin)
    }
}

/// Optional constraints for history queries. Empty filter means all
/// records.
#[derive(Debug, Clone, Default)]
pub struct AttendanceFilter {
    pub identity: Option<IdentityId>,
    pub date: Option<NaiveDate>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<RecordStatus>,
}

/// Outcome of a successful check-in.
#[derive(Debug, Clone, Serialize)]
pub struct CheckIn {
    pub record: AttendanceRecord,
    /// How far inside the acceptance threshold the match landed,
    /// higher is better.
    pub confidence: f64,
}

/// Detection-only result, no identity resolution involved.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScanReport {
    pub detected: bool,
    pub face_count: usize,
}

/// Aggregate counts over a set of attendance records.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatusBreakdown {
    pub total: u64,
    pub present: u64,
    pub excused: u64,
    pub absent: u64,
    pub present_pct: f64,
    pub excused_pct: f64,
    pub absent_pct: f64,
}

/// What a full matcher rebuild ingested.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RebuildReport {
    pub identities: usize,
    pub samples: usize,
}
