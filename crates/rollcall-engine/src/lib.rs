//! rollcall-engine — Attendance decisions over the vision core.
//!
//! Wires rollcall-core's detector and matcher to pluggable storage:
//! the [`registry`] resolves faces to enrolled identities, and the
//! [`engine`] turns resolutions into daily attendance records with
//! authorization and dedup rules applied.

pub mod engine;
pub mod error;
pub mod registry;
pub mod repo;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use engine::AttendanceEngine;
pub use error::Rejection;
pub use registry::{FaceRegistry, ResolvedFace, MATCH_DISTANCE};
pub use repo::{AttendanceLog, Roster, StorageError};
pub use types::{
    AttendanceFilter, AttendanceRecord, Caller, CheckIn, Identity, IdentityId,
    NewAttendanceRecord, RebuildReport, RecordStatus, ScanReport, StatusBreakdown,
};
