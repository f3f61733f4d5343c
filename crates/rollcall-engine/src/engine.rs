//! Attendance orchestration over the registry and storage seams.
//!
//! Every operation takes a [`Caller`]; holders are restricted to their
//! own records and may not mutate anything. The one-record-per-day
//! rule is checked here for a friendly refusal and enforced for real
//! by the storage backend.

use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info};

use rollcall_core::{decode_source, ImageSource};

use crate::error::Rejection;
use crate::registry::FaceRegistry;
use crate::repo::{AttendanceLog, Roster};
use crate::types::{
    AttendanceFilter, AttendanceRecord, Caller, CheckIn, IdentityId, NewAttendanceRecord,
    RebuildReport, RecordStatus, ScanReport, StatusBreakdown,
};

pub struct AttendanceEngine {
    registry: Arc<FaceRegistry>,
    roster: Arc<dyn Roster>,
    log: Arc<dyn AttendanceLog>,
}

impl AttendanceEngine {
    pub fn new(
        registry: Arc<FaceRegistry>,
        roster: Arc<dyn Roster>,
        log: Arc<dyn AttendanceLog>,
    ) -> Self {
        Self {
            registry,
            roster,
            log,
        }
    }

    /// Resolves the face in `source` and records today's attendance as
    /// present. Holders can only check in as themselves.
    pub fn check_in(&self, caller: Caller, source: &ImageSource) -> Result<CheckIn, Rejection> {
        let image = decode_source(source)?;
        let resolved = self.registry.resolve(&image)?;
        // The matcher may lag behind roster removals; the identity has
        // to exist right now.
        let person = self
            .roster
            .get_identity(resolved.identity)?
            .ok_or(Rejection::NoMatch)?;
        if let Caller::Holder(holder) = caller {
            if holder != person.id {
                return Err(Rejection::IdentityMismatch {
                    expected: holder,
                    predicted: person.id,
                });
            }
        }

        let now = Local::now().naive_local();
        let date = now.date();
        if self
            .log
            .find_by_identity_and_date(person.id, date)?
            .is_some()
        {
            return Err(Rejection::DuplicateAttendance {
                identity: person.id,
                date,
            });
        }
        let record = self.log.insert(NewAttendanceRecord {
            identity_id: person.id,
            date,
            time: now.time(),
            status: RecordStatus::Present,
        })?;
        info!(
            identity = person.id,
            record = record.id,
            date = %record.date,
            confidence = resolved.confidence,
            "attendance recorded"
        );
        Ok(CheckIn {
            record,
            confidence: resolved.confidence,
        })
    }

    /// Queries attendance history, newest first. Holders see only
    /// their own records regardless of the filter.
    pub fn history(
        &self,
        caller: Caller,
        mut filter: AttendanceFilter,
    ) -> Result<Vec<AttendanceRecord>, Rejection> {
        if let Caller::Holder(holder) = caller {
            filter.identity = Some(holder);
        }
        Ok(self.log.query(&filter)?)
    }

    /// Fetches one record. Holders may only fetch their own.
    pub fn record(&self, caller: Caller, id: i64) -> Result<AttendanceRecord, Rejection> {
        let record = self.log.get(id)?.ok_or(Rejection::NotFound)?;
        match caller {
            Caller::Admin => Ok(record),
            Caller::Holder(holder) if record.identity_id == holder => Ok(record),
            Caller::Holder(_) => Err(Rejection::Unauthorized),
        }
    }

    /// Corrects a record's status. Admin only.
    pub fn set_status(
        &self,
        caller: Caller,
        id: i64,
        status: &str,
    ) -> Result<AttendanceRecord, Rejection> {
        if !caller.is_admin() {
            return Err(Rejection::Unauthorized);
        }
        let status =
            RecordStatus::parse(status).ok_or_else(|| Rejection::InvalidStatus(status.to_string()))?;
        let updated = self
            .log
            .update_status(id, status)?
            .ok_or(Rejection::NotFound)?;
        info!(record = id, status = %updated.status, "record status updated");
        Ok(updated)
    }

    /// Deletes a record. Admin only.
    pub fn remove(&self, caller: Caller, id: i64) -> Result<(), Rejection> {
        if !caller.is_admin() {
            return Err(Rejection::Unauthorized);
        }
        if !self.log.delete(id)? {
            return Err(Rejection::NotFound);
        }
        info!(record = id, "record deleted");
        Ok(())
    }

    /// Status counts and percentages over the filtered records.
    /// Holders are scoped to themselves, like [`Self::history`].
    pub fn statistics(
        &self,
        caller: Caller,
        mut filter: AttendanceFilter,
    ) -> Result<StatusBreakdown, Rejection> {
        if let Caller::Holder(holder) = caller {
            filter.identity = Some(holder);
        }
        let records = self.log.query(&filter)?;
        let mut present = 0u64;
        let mut excused = 0u64;
        let mut absent = 0u64;
        for record in &records {
            match record.status {
                RecordStatus::Present => present += 1,
                RecordStatus::Excused => excused += 1,
                RecordStatus::Absent => absent += 1,
            }
        }
        let total = present + excused + absent;
        Ok(StatusBreakdown {
            total,
            present,
            excused,
            absent,
            present_pct: pct(present, total),
            excused_pct: pct(excused, total),
            absent_pct: pct(absent, total),
        })
    }

    /// Detection-only probe: how many faces are in the image, with no
    /// identity resolution and no model involvement.
    pub fn scan(&self, source: &ImageSource) -> Result<ScanReport, Rejection> {
        let image = decode_source(source)?;
        let faces = self.registry.detector().detect(&image);
        debug!(faces = faces.len(), "scan complete");
        Ok(ScanReport {
            detected: !faces.is_empty(),
            face_count: faces.len(),
        })
    }

    /// Adds a reference sample for an existing identity to the matcher.
    /// Admin only; the image must contain exactly one face.
    pub fn enroll_sample(
        &self,
        caller: Caller,
        identity: IdentityId,
        source: &ImageSource,
    ) -> Result<(), Rejection> {
        if !caller.is_admin() {
            return Err(Rejection::Unauthorized);
        }
        let person = self
            .roster
            .get_identity(identity)?
            .ok_or(Rejection::NotFound)?;
        let image = decode_source(source)?;
        self.registry.incorporate(person.id, &person.name, &image)
    }

    /// Refits the matcher from all roster reference photos. Admin only.
    pub fn rebuild_model(&self, caller: Caller) -> Result<RebuildReport, Rejection> {
        if !caller.is_admin() {
            return Err(Rejection::Unauthorized);
        }
        self.registry.rebuild()
    }
}

/// Percentage rounded to two decimals; zero when there are no records.
fn pct(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 * 10000.0 / total as f64).round() / 100.0
}
