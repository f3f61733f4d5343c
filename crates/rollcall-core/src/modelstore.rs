//! Durable storage for the trained matcher and its label table.
//!
//! The two halves are written as paired JSON envelopes sharing one
//! revision id, each carrying a sha-256 checksum of its raw payload
//! bytes. Loading verifies pairing, checksums, and revision agreement;
//! any mismatch is reported as corruption rather than silently used.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::lbph::{LabelTable, Lbph};

const MATCHER_FILE: &str = "matcher.json";
const LABELS_FILE: &str = "labels.json";

#[derive(Debug, Error)]
pub enum ModelStoreError {
    #[error("model store is unpaired: {present} exists but {missing} is absent")]
    Unpaired {
        present: &'static str,
        missing: &'static str,
    },

    #[error("checksum mismatch in {path}: stored model is corrupt")]
    ChecksumMismatch { path: String },

    #[error("revision mismatch: matcher {matcher} vs labels {labels}")]
    RevisionMismatch { matcher: String, labels: String },

    #[error("malformed model file {path}: {source}")]
    Malformed {
        path: String,
        source: serde_json::Error,
    },

    #[error("model i/o failure on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    revision: String,
    checksum: String,
    payload: Box<RawValue>,
}

/// Reads and writes the matcher/label pair under one directory.
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists both halves under a fresh shared revision. Each file is
    /// written to a temp name and renamed into place.
    pub fn save(&self, matcher: &Lbph, labels: &LabelTable) -> Result<String, ModelStoreError> {
        let revision = Uuid::new_v4().to_string();
        std::fs::create_dir_all(&self.dir).map_err(|source| ModelStoreError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;
        self.write_envelope(MATCHER_FILE, &revision, matcher)?;
        self.write_envelope(LABELS_FILE, &revision, labels)?;
        debug!(revision = %revision, samples = matcher.sample_count(), "model persisted");
        Ok(revision)
    }

    /// Loads the persisted pair. `Ok(None)` when neither file exists;
    /// an error when the pair is incomplete, corrupt, or torn.
    pub fn load(&self) -> Result<Option<(Lbph, LabelTable)>, ModelStoreError> {
        let matcher_path = self.dir.join(MATCHER_FILE);
        let labels_path = self.dir.join(LABELS_FILE);
        match (matcher_path.is_file(), labels_path.is_file()) {
            (false, false) => return Ok(None),
            (true, false) => {
                return Err(ModelStoreError::Unpaired {
                    present: MATCHER_FILE,
                    missing: LABELS_FILE,
                })
            }
            (false, true) => {
                return Err(ModelStoreError::Unpaired {
                    present: LABELS_FILE,
                    missing: MATCHER_FILE,
                })
            }
            (true, true) => {}
        }
        let (matcher_rev, matcher): (String, Lbph) = self.read_envelope(&matcher_path)?;
        let (labels_rev, labels): (String, LabelTable) = self.read_envelope(&labels_path)?;
        if matcher_rev != labels_rev {
            return Err(ModelStoreError::RevisionMismatch {
                matcher: matcher_rev,
                labels: labels_rev,
            });
        }
        debug!(revision = %matcher_rev, samples = matcher.sample_count(), "model loaded");
        Ok(Some((matcher, labels)))
    }

    fn write_envelope<T: Serialize>(
        &self,
        file: &str,
        revision: &str,
        value: &T,
    ) -> Result<(), ModelStoreError> {
        let path = self.dir.join(file);
        let display = path.display().to_string();
        let payload = serde_json::to_string(value).map_err(|source| ModelStoreError::Malformed {
            path: display.clone(),
            source,
        })?;
        let checksum = hex_sha256(payload.as_bytes());
        let payload = RawValue::from_string(payload).map_err(|source| ModelStoreError::Malformed {
            path: display.clone(),
            source,
        })?;
        let envelope = Envelope {
            revision: revision.to_string(),
            checksum,
            payload,
        };
        let body = serde_json::to_vec(&envelope).map_err(|source| ModelStoreError::Malformed {
            path: display.clone(),
            source,
        })?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &body).map_err(|source| ModelStoreError::Io {
            path: tmp.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| ModelStoreError::Io {
            path: display,
            source,
        })?;
        Ok(())
    }

    fn read_envelope<T: DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<(String, T), ModelStoreError> {
        let display = path.display().to_string();
        let body = std::fs::read_to_string(path).map_err(|source| ModelStoreError::Io {
            path: display.clone(),
            source,
        })?;
        let envelope: Envelope =
            serde_json::from_str(&body).map_err(|source| ModelStoreError::Malformed {
                path: display.clone(),
                source,
            })?;
        // The checksum covers the exact payload bytes, which RawValue
        // carries through verbatim.
        let payload = envelope.payload.get();
        if hex_sha256(payload.as_bytes()) != envelope.checksum {
            return Err(ModelStoreError::ChecksumMismatch { path: display });
        }
        let value = serde_json::from_str(payload).map_err(|source| ModelStoreError::Malformed {
            path: display,
            source,
        })?;
        Ok((envelope.revision, value))
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn stripes() -> GrayImage {
        GrayImage::from_fn(100, 100, |x, _| {
            if x % 8 < 4 {
                Luma([230])
            } else {
                Luma([25])
            }
        })
    }

    fn trained_pair() -> (Lbph, LabelTable) {
        let mut matcher = Lbph::new();
        matcher.train(&[(3, stripes())]);
        let mut labels = LabelTable::new();
        labels.insert(3, "ada");
        (matcher, labels)
    }

    #[test]
    fn test_load_empty_dir_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (matcher, labels) = trained_pair();
        store.save(&matcher, &labels).unwrap();

        let (loaded, loaded_labels) = store.load().unwrap().unwrap();
        assert_eq!(loaded.sample_count(), 1);
        assert_eq!(loaded_labels.name_of(3), Some("ada"));

        let before = matcher.predict(&stripes()).unwrap();
        let after = loaded.predict(&stripes()).unwrap();
        assert_eq!(before.label, after.label);
        assert!((before.distance - after.distance).abs() < 1e-12);
    }

    #[test]
    fn test_save_rotates_revision() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (matcher, labels) = trained_pair();
        let first = store.save(&matcher, &labels).unwrap();
        let second = store.save(&matcher, &labels).unwrap();
        assert_ne!(first, second);
        assert!(store.load().unwrap().is_some());
    }

    #[test]
    fn test_missing_label_file_is_unpaired() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (matcher, labels) = trained_pair();
        store.save(&matcher, &labels).unwrap();
        std::fs::remove_file(dir.path().join(LABELS_FILE)).unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, ModelStoreError::Unpaired { .. }));
    }

    #[test]
    fn test_checksum_tamper_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (matcher, labels) = trained_pair();
        store.save(&matcher, &labels).unwrap();

        let path = dir.path().join(MATCHER_FILE);
        let body = std::fs::read_to_string(&path).unwrap();
        let mut doc: serde_json::Value = serde_json::from_str(&body).unwrap();
        doc["checksum"] = serde_json::Value::String("0".repeat(64));
        std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, ModelStoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_mixed_revisions_are_rejected() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let store_a = ModelStore::new(dir_a.path());
        let store_b = ModelStore::new(dir_b.path());
        let (matcher, labels) = trained_pair();
        store_a.save(&matcher, &labels).unwrap();
        store_b.save(&matcher, &labels).unwrap();

        // Pair A's matcher with B's labels.
        std::fs::copy(dir_b.path().join(LABELS_FILE), dir_a.path().join(LABELS_FILE)).unwrap();
        let err = store_a.load().unwrap_err();
        assert!(matches!(err, ModelStoreError::RevisionMismatch { .. }));
    }

    #[test]
    fn test_garbage_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (matcher, labels) = trained_pair();
        store.save(&matcher, &labels).unwrap();
        std::fs::write(dir.path().join(MATCHER_FILE), "not json at all").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, ModelStoreError::Malformed { .. }));
    }
}
