//! Multi-scale sliding-window face detection.
//!
//! The input image is repeatedly downscaled by a fixed factor; at each
//! pyramid level the cascade window slides over the level, and passing
//! windows are mapped back to source coordinates. Raw windows are then
//! clustered with a relative-tolerance union-find partition; clusters
//! with enough votes survive as detections.

use std::collections::HashMap;
use std::path::Path;

use image::GrayImage;
use tracing::{debug, info};

use crate::cascade::{CascadeError, CascadeModel};
use crate::imaging::{resize_bilinear, IntegralImage};
use crate::types::FaceBox;

// --- Named constants ---

/// Pyramid downscale factor between detection levels.
const SCALE_STEP: f64 = 1.1;

/// Minimum clustered votes for a detection to survive grouping.
const MIN_NEIGHBOR_VOTES: u32 = 4;

/// Relative position/size tolerance when clustering raw windows.
const GROUP_EPS: f32 = 0.2;

/// A cascade wrapped with the pyramid scan and grouping pipeline.
pub struct FaceDetector {
    cascade: CascadeModel,
}

impl FaceDetector {
    pub fn from_xml_file(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        let cascade = CascadeModel::from_xml_file(path)?;
        info!(
            path = %path.display(),
            stages = cascade.stage_count(),
            features = cascade.feature_count(),
            "cascade loaded"
        );
        Ok(Self { cascade })
    }

    pub fn from_xml_str(xml: &str) -> Result<Self, CascadeError> {
        Ok(Self {
            cascade: CascadeModel::from_xml_str(xml)?,
        })
    }

    /// Detects face regions, strongest cluster first. Returns an empty
    /// vec when the image is smaller than the cascade window or nothing
    /// passes the cascade.
    pub fn detect(&self, image: &GrayImage) -> Vec<FaceBox> {
        let (width, height) = image.dimensions();
        let win_w = self.cascade.window_width();
        let win_h = self.cascade.window_height();

        let mut raw = Vec::new();
        let mut factor = 1.0f64;
        loop {
            let scaled_w = (width as f64 / factor).round() as u32;
            let scaled_h = (height as f64 / factor).round() as u32;
            if scaled_w < win_w || scaled_h < win_h {
                break;
            }
            let level = resize_bilinear(image, scaled_w, scaled_h);
            let integral = IntegralImage::new(&level);
            let step: usize = if factor > 2.0 { 1 } else { 2 };
            for wy in (0..=scaled_h - win_h).step_by(step) {
                for wx in (0..=scaled_w - win_w).step_by(step) {
                    if self.cascade.eval_window(&integral, wx, wy) {
                        raw.push(RawRect {
                            x: (wx as f64 * factor).round() as u32,
                            y: (wy as f64 * factor).round() as u32,
                            w: (win_w as f64 * factor).round() as u32,
                            h: (win_h as f64 * factor).round() as u32,
                        });
                    }
                }
            }
            factor *= SCALE_STEP;
        }

        let mut grouped = group_rects(&raw, MIN_NEIGHBOR_VOTES, GROUP_EPS);
        for face in &mut grouped {
            // Rounding while mapping back can overshoot the border.
            face.x = face.x.min(width.saturating_sub(1));
            face.y = face.y.min(height.saturating_sub(1));
            face.width = face.width.min(width - face.x);
            face.height = face.height.min(height - face.y);
        }
        debug!(raw = raw.len(), faces = grouped.len(), "cascade scan complete");
        grouped
    }

    pub fn has_face(&self, image: &GrayImage) -> bool {
        !self.detect(image).is_empty()
    }

    pub fn face_count(&self, image: &GrayImage) -> usize {
        self.detect(image).len()
    }
}

#[derive(Debug, Clone, Copy)]
struct RawRect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

/// Position/size similarity with tolerance proportional to rect size.
fn similar(a: &RawRect, b: &RawRect, eps: f32) -> bool {
    let delta = eps * 0.5 * (a.w.min(b.w) + a.h.min(b.h)) as f32;
    let dx = (a.x as f32 - b.x as f32).abs();
    let dy = (a.y as f32 - b.y as f32).abs();
    let dr = ((a.x + a.w) as f32 - (b.x + b.w) as f32).abs();
    let db = ((a.y + a.h) as f32 - (b.y + b.h) as f32).abs();
    dx <= delta && dy <= delta && dr <= delta && db <= delta
}

fn find(parent: &mut [usize], i: usize) -> usize {
    let mut root = i;
    while parent[root] != root {
        root = parent[root];
    }
    let mut cur = i;
    while parent[cur] != root {
        let next = parent[cur];
        parent[cur] = root;
        cur = next;
    }
    root
}

/// Partitions raw windows into similarity clusters and averages each
/// cluster with at least `min_votes` members.
fn group_rects(raw: &[RawRect], min_votes: u32, eps: f32) -> Vec<FaceBox> {
    if raw.is_empty() {
        return Vec::new();
    }
    let mut parent: Vec<usize> = (0..raw.len()).collect();
    for i in 0..raw.len() {
        for j in (i + 1)..raw.len() {
            if similar(&raw[i], &raw[j], eps) {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut clusters: HashMap<usize, (u64, u64, u64, u64, u32)> = HashMap::new();
    for (idx, rect) in raw.iter().enumerate() {
        let root = find(&mut parent, idx);
        let entry = clusters.entry(root).or_default();
        entry.0 += rect.x as u64;
        entry.1 += rect.y as u64;
        entry.2 += rect.w as u64;
        entry.3 += rect.h as u64;
        entry.4 += 1;
    }

    let mut out: Vec<FaceBox> = clusters
        .values()
        .filter(|c| c.4 >= min_votes)
        .map(|&(sx, sy, sw, sh, votes)| {
            let n = votes as f64;
            FaceBox {
                x: (sx as f64 / n).round() as u32,
                y: (sy as f64 / n).round() as u32,
                width: (sw as f64 / n).round() as u32,
                height: (sh as f64 / n).round() as u32,
                votes,
            }
        })
        .collect();
    out.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.x.cmp(&b.x)).then(a.y.cmp(&b.y)));
    out
}
