//! Face-to-identity resolution over a lazily loaded matcher.
//!
//! The matcher starts unloaded and is brought up on first use: the
//! persisted pair is preferred, and when it is absent or corrupt the
//! registry refits from roster reference photos. All mutation goes
//! through stage-then-persist-then-swap, so a failed save never leaves
//! the in-memory model ahead of what is on disk.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use image::GrayImage;
use tracing::{debug, info, warn};

use rollcall_core::{
    decode_source, extract_sample, FaceDetector, ImageSource, LabelTable, Lbph, ModelStore,
};

use crate::error::Rejection;
use crate::repo::Roster;
use crate::types::{IdentityId, RebuildReport};

// --- Named constants ---

/// Matches at or beyond this chi-square distance are treated as
/// unknown faces.
pub const MATCH_DISTANCE: f64 = 100.0;

/// A face resolved to an enrolled identity.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedFace {
    pub identity: IdentityId,
    pub distance: f64,
    /// `MATCH_DISTANCE` minus the distance, floored at zero.
    pub confidence: f64,
}

enum ModelState {
    Unloaded,
    Ready { matcher: Lbph, labels: LabelTable },
}

pub struct FaceRegistry {
    detector: Arc<FaceDetector>,
    store: ModelStore,
    roster: Arc<dyn Roster>,
    state: RwLock<ModelState>,
}

impl FaceRegistry {
    pub fn new(detector: Arc<FaceDetector>, store: ModelStore, roster: Arc<dyn Roster>) -> Self {
        Self {
            detector,
            store,
            roster,
            state: RwLock::new(ModelState::Unloaded),
        }
    }

    /// Detection without identity resolution; never touches the model.
    pub fn detector(&self) -> &FaceDetector {
        &self.detector
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ModelState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ModelState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Brings the matcher up if it is not already loaded. Safe to call
    /// from any number of threads; only the first one does the work.
    pub fn ensure_ready(&self) -> Result<(), Rejection> {
        {
            let state = self.read_state();
            if matches!(*state, ModelState::Ready { .. }) {
                return Ok(());
            }
        }
        let mut state = self.write_state();
        // A racing thread may have loaded it between the two locks.
        if matches!(*state, ModelState::Ready { .. }) {
            return Ok(());
        }
        *state = self.bootstrap()?;
        Ok(())
    }

    fn bootstrap(&self) -> Result<ModelState, Rejection> {
        match self.store.load() {
            Ok(Some((matcher, labels))) => {
                info!(
                    samples = matcher.sample_count(),
                    identities = labels.len(),
                    "matcher loaded from disk"
                );
                return Ok(ModelState::Ready { matcher, labels });
            }
            Ok(None) => debug!("no persisted matcher, fitting from roster"),
            Err(err) => warn!(error = %err, "persisted matcher unusable, refitting from roster"),
        }
        let (matcher, labels, _) = self.fit_from_roster()?;
        if matcher.is_trained() {
            if let Err(err) = self.store.save(&matcher, &labels) {
                warn!(error = %err, "could not persist freshly fitted matcher");
            }
        }
        Ok(ModelState::Ready { matcher, labels })
    }

    /// Fits a fresh matcher from every roster identity with a usable
    /// reference photo. Unusable entries are skipped, not fatal.
    fn fit_from_roster(&self) -> Result<(Lbph, LabelTable, RebuildReport), Rejection> {
        let identities = self.roster.list_identities()?;
        let mut samples = Vec::new();
        let mut labels = LabelTable::new();
        for person in &identities {
            let Some(path) = &person.photo_path else {
                debug!(identity = person.id, "no reference photo, skipping");
                continue;
            };
            let image = match decode_source(&ImageSource::from_path(path)) {
                Ok(image) => image,
                Err(err) => {
                    warn!(identity = person.id, error = %err, "reference photo unreadable, skipping");
                    continue;
                }
            };
            let faces = self.detector.detect(&image);
            if faces.len() != 1 {
                warn!(
                    identity = person.id,
                    faces = faces.len(),
                    "reference photo needs exactly one face, skipping"
                );
                continue;
            }
            samples.push((person.id, extract_sample(&image, &faces[0])));
            labels.insert(person.id, &person.name);
        }
        let mut matcher = Lbph::new();
        matcher.train(&samples);
        let report = RebuildReport {
            identities: labels.len(),
            samples: samples.len(),
        };
        info!(
            identities = report.identities,
            samples = report.samples,
            "matcher fitted from roster"
        );
        Ok((matcher, labels, report))
    }

    /// Resolves the first detected face that lands inside the match
    /// threshold.
    pub fn resolve(&self, image: &GrayImage) -> Result<ResolvedFace, Rejection> {
        self.ensure_ready()?;
        let faces = self.detector.detect(image);
        if faces.is_empty() {
            return Err(Rejection::NoFaceDetected);
        }
        let state = self.read_state();
        let ModelState::Ready { matcher, .. } = &*state else {
            return Err(Rejection::ModelPersistence("matcher not initialized".into()));
        };
        for face in &faces {
            let sample = extract_sample(image, face);
            let Some(prediction) = matcher.predict(&sample) else {
                continue;
            };
            if prediction.distance < MATCH_DISTANCE {
                debug!(
                    identity = prediction.label,
                    distance = prediction.distance,
                    "face resolved"
                );
                return Ok(ResolvedFace {
                    identity: prediction.label,
                    distance: prediction.distance,
                    confidence: (MATCH_DISTANCE - prediction.distance).max(0.0),
                });
            }
            debug!(
                nearest = prediction.label,
                distance = prediction.distance,
                "face outside match threshold"
            );
        }
        Err(Rejection::NoMatch)
    }

    /// Adds one reference sample for `identity` without refitting the
    /// rest of the matcher. The image must contain exactly one face.
    pub fn incorporate(
        &self,
        identity: IdentityId,
        name: &str,
        image: &GrayImage,
    ) -> Result<(), Rejection> {
        self.ensure_ready()?;
        let faces = self.detector.detect(image);
        match faces.len() {
            0 => return Err(Rejection::NoFaceDetected),
            1 => {}
            n => return Err(Rejection::MultipleFacesDetected(n)),
        }
        let sample = extract_sample(image, &faces[0]);

        let mut state = self.write_state();
        let ModelState::Ready { matcher, labels } = &mut *state else {
            return Err(Rejection::ModelPersistence("matcher not initialized".into()));
        };
        let mut staged = matcher.clone();
        let mut staged_labels = labels.clone();
        staged.update(identity, &sample);
        staged_labels.insert(identity, name);
        self.store.save(&staged, &staged_labels)?;
        *matcher = staged;
        *labels = staged_labels;
        info!(
            identity,
            samples = matcher.sample_count(),
            "identity incorporated into matcher"
        );
        Ok(())
    }

    /// Drops the current matcher and refits from the roster, persisting
    /// the result. The live model is only replaced once the new one is
    /// safely on disk.
    pub fn rebuild(&self) -> Result<RebuildReport, Rejection> {
        let mut state = self.write_state();
        let (matcher, labels, report) = self.fit_from_roster()?;
        self.store.save(&matcher, &labels)?;
        *state = ModelState::Ready { matcher, labels };
        info!(
            identities = report.identities,
            samples = report.samples,
            "matcher rebuilt"
        );
        Ok(report)
    }
}
