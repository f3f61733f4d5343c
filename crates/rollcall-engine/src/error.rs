use chrono::NaiveDate;
use thiserror::Error;

use crate::repo::StorageError;
use rollcall_core::{DecodeError, ModelStoreError};

/// Why an attendance operation did not produce a record.
///
/// Every refusal the engine can make is one of these variants, so
/// callers can branch on the outcome and surfaces can map each kind
/// to a stable code via [`Rejection::kind`].
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("no face detected in the submitted image")]
    NoFaceDetected,

    #[error("expected exactly one face, found {0}")]
    MultipleFacesDetected(usize),

    #[error("face does not match any enrolled identity")]
    NoMatch,

    #[error("face matched identity {predicted}, not the submitting identity {expected}")]
    IdentityMismatch { expected: i64, predicted: i64 },

    #[error("attendance already recorded for identity {identity} on {date}")]
    DuplicateAttendance { identity: i64, date: NaiveDate },

    #[error("invalid status {0:?}: expected present, excused or absent")]
    InvalidStatus(String),

    #[error("record not found")]
    NotFound,

    #[error("operation requires administrative access")]
    Unauthorized,

    #[error("model persistence failed: {0}")]
    ModelPersistence(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl Rejection {
    /// Stable machine-readable code for each refusal kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::InvalidImage(_) => "invalid_image",
            Rejection::NoFaceDetected => "no_face_detected",
            Rejection::MultipleFacesDetected(_) => "multiple_faces_detected",
            Rejection::NoMatch => "no_match",
            Rejection::IdentityMismatch { .. } => "identity_mismatch",
            Rejection::DuplicateAttendance { .. } => "duplicate_attendance",
            Rejection::InvalidStatus(_) => "invalid_status",
            Rejection::NotFound => "not_found",
            Rejection::Unauthorized => "unauthorized",
            Rejection::ModelPersistence(_) => "model_persistence",
            Rejection::Storage(_) => "storage",
        }
    }
}

impl From<DecodeError> for Rejection {
    fn from(err: DecodeError) -> Self {
        Rejection::InvalidImage(err.to_string())
    }
}

impl From<ModelStoreError> for Rejection {
    fn from(err: ModelStoreError) -> Self {
        Rejection::ModelPersistence(err.to_string())
    }
}

impl From<StorageError> for Rejection {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateDay { identity, date } => {
                Rejection::DuplicateAttendance { identity, date }
            }
            StorageError::Backend(msg) => Rejection::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_are_stable() {
        assert_eq!(Rejection::NoFaceDetected.kind(), "no_face_detected");
        assert_eq!(Rejection::MultipleFacesDetected(3).kind(), "multiple_faces_detected");
        assert_eq!(Rejection::NoMatch.kind(), "no_match");
        assert_eq!(Rejection::Unauthorized.kind(), "unauthorized");
        assert_eq!(
            Rejection::InvalidStatus("tardy".into()).kind(),
            "invalid_status"
        );
    }

    #[test]
    fn test_duplicate_day_maps_to_duplicate_attendance() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let rejection: Rejection = StorageError::DuplicateDay { identity: 7, date }.into();
        match rejection {
            Rejection::DuplicateAttendance { identity, date: d } => {
                assert_eq!(identity, 7);
                assert_eq!(d, date);
            }
            other => panic!("unexpected rejection: {other:?}"),
        }
    }

    #[test]
    fn test_backend_maps_to_storage() {
        let rejection: Rejection = StorageError::Backend("disk full".into()).into();
        assert!(matches!(rejection, Rejection::Storage(msg) if msg == "disk full"));
    }

    #[test]
    fn test_messages_read_cleanly() {
        let r = Rejection::IdentityMismatch {
            expected: 2,
            predicted: 9,
        };
        assert_eq!(
            r.to_string(),
            "face matched identity 9, not the submitting identity 2"
        );
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let r = Rejection::DuplicateAttendance { identity: 4, date };
        assert_eq!(
            r.to_string(),
            "attendance already recorded for identity 4 on 2026-01-05"
        );
    }
}
