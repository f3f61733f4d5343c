//! Shared fixtures and in-memory fakes for engine tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use image::{GrayImage, Luma};

use rollcall_core::FaceDetector;

use crate::repo::{AttendanceLog, Roster, StorageError};
use crate::types::{
    AttendanceFilter, AttendanceRecord, Identity, IdentityId, NewAttendanceRecord, RecordStatus,
};

/// Single-stump cascade with a 12x12 window; passes wherever the inner
/// 6x6 region is brighter than its surround.
pub(crate) const FACE_XML: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade>
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>12</height>
  <width>12</width>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 5.0000000000000000e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 12 12 -1.</_>
        <_>
          3 3 6 6 4.</_></rects>
      <tilted>0</tilted></_></features></cascade>
</opencv_storage>
"#;

pub(crate) fn detector() -> Arc<FaceDetector> {
    Arc::new(FaceDetector::from_xml_str(FACE_XML).unwrap())
}

/// One detectable face: bright 6x6 square at (3, 3) on a flat surround.
pub(crate) fn solid_face() -> GrayImage {
    GrayImage::from_fn(14, 14, |x, y| {
        if (3..9).contains(&x) && (3..9).contains(&y) {
            Luma([220])
        } else {
            Luma([20])
        }
    })
}

/// Same square, but the surround alternates dark columns. Detects the
/// same way while producing a clearly different texture signature.
pub(crate) fn textured_face() -> GrayImage {
    GrayImage::from_fn(14, 14, |x, y| {
        if (3..9).contains(&x) && (3..9).contains(&y) {
            Luma([220])
        } else if x % 2 == 0 {
            Luma([0])
        } else {
            Luma([40])
        }
    })
}

/// Two well-separated detectable squares.
pub(crate) fn two_faces() -> GrayImage {
    GrayImage::from_fn(14, 40, |x, y| {
        let in_a = (3..9).contains(&x) && (3..9).contains(&y);
        let in_b = (3..9).contains(&x) && (29..35).contains(&y);
        if in_a || in_b {
            Luma([220])
        } else {
            Luma([20])
        }
    })
}

/// Uniform image; nothing for the cascade to fire on.
pub(crate) fn flat() -> GrayImage {
    GrayImage::from_pixel(14, 14, Luma([20]))
}

pub(crate) fn save_photo(dir: &Path, name: &str, image: &GrayImage) -> PathBuf {
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}

pub(crate) fn make_identity(id: IdentityId, name: &str, photo: Option<PathBuf>) -> Identity {
    Identity {
        id,
        code: format!("C{id:03}"),
        name: name.to_string(),
        department: "general".to_string(),
        photo_path: photo,
        created_at: NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap(),
    }
}

/// Roster fake that counts full listings, so tests can assert whether
/// a registry refit happened.
#[derive(Default)]
pub(crate) struct MemRoster {
    identities: Mutex<Vec<Identity>>,
    pub(crate) list_calls: AtomicUsize,
}

impl MemRoster {
    pub(crate) fn push(&self, identity: Identity) {
        self.identities.lock().unwrap().push(identity);
    }

    pub(crate) fn clear(&self) {
        self.identities.lock().unwrap().clear();
    }
}

impl Roster for MemRoster {
    fn list_identities(&self) -> Result<Vec<Identity>, StorageError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.identities.lock().unwrap().clone())
    }

    fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>, StorageError> {
        Ok(self
            .identities
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned())
    }
}

/// Attendance fake backed by a vec, with the same one-per-day rule a
/// real backend enforces with a unique index.
#[derive(Default)]
pub(crate) struct MemLog {
    records: Mutex<Vec<AttendanceRecord>>,
}

impl MemLog {
    pub(crate) fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl AttendanceLog for MemLog {
    fn find_by_identity_and_date(
        &self,
        identity: IdentityId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StorageError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.identity_id == identity && r.date == date)
            .cloned())
    }

    fn insert(&self, record: NewAttendanceRecord) -> Result<AttendanceRecord, StorageError> {
        let mut records = self.records.lock().unwrap();
        if records
            .iter()
            .any(|r| r.identity_id == record.identity_id && r.date == record.date)
        {
            return Err(StorageError::DuplicateDay {
                identity: record.identity_id,
                date: record.date,
            });
        }
        let stored = AttendanceRecord {
            id: records.len() as i64 + 1,
            identity_id: record.identity_id,
            identity_code: format!("C{:03}", record.identity_id),
            identity_name: format!("member-{}", record.identity_id),
            date: record.date,
            time: record.time,
            status: record.status,
            created_at: record.date.and_time(record.time),
        };
        records.push(stored.clone());
        Ok(stored)
    }

    fn get(&self, id: i64) -> Result<Option<AttendanceRecord>, StorageError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    fn update_status(
        &self,
        id: i64,
        status: RecordStatus,
    ) -> Result<Option<AttendanceRecord>, StorageError> {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.status = status;
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    fn delete(&self, id: i64) -> Result<bool, StorageError> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }

    fn query(&self, filter: &AttendanceFilter) -> Result<Vec<AttendanceRecord>, StorageError> {
        let records = self.records.lock().unwrap();
        let mut out: Vec<AttendanceRecord> = records
            .iter()
            .filter(|r| filter.identity.map_or(true, |id| r.identity_id == id))
            .filter(|r| filter.date.map_or(true, |d| r.date == d))
            .filter(|r| filter.from.map_or(true, |d| r.date >= d))
            .filter(|r| filter.to.map_or(true, |d| r.date <= d))
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.date.cmp(&a.date).then(b.time.cmp(&a.time)));
        Ok(out)
    }
}
