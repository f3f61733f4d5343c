//! Local-binary-pattern histogram face matching.
//!
//! Each sample is a fixed-size grayscale patch reduced to a code image
//! (radius-1, 8 interpolated neighbors), then to a grid of per-cell
//! 256-bin histograms. Prediction is nearest neighbor over all stored
//! sample histograms under the alternative chi-square distance, so
//! adding a sample never disturbs what was already learned.

use image::GrayImage;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::imaging::{crop, resize_bilinear};
use crate::types::FaceBox;

// --- Named constants ---

/// Side length of a normalized face sample.
pub const SAMPLE_SIZE: u32 = 100;

/// LBP sampling radius in pixels.
const RADIUS: f32 = 1.0;

/// Interpolated neighbors per pixel; 8 gives the classic 256-code operator.
const NEIGHBORS: u32 = 8;

/// The code image is split into GRID x GRID cells for histogramming.
const GRID: u32 = 8;

/// Bins per cell histogram, one per possible 8-bit code.
const HIST_BINS: usize = 256;

/// An identity label with the raw distance to its nearest sample.
/// Lower distance is better; zero is an exact histogram match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: i64,
    pub distance: f64,
}

/// Nearest-neighbor LBPH matcher. Samples are stored as normalized
/// histograms with their identity labels in parallel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lbph {
    histograms: Vec<Vec<f32>>,
    labels: Vec<i64>,
}

impl Lbph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_trained(&self) -> bool {
        !self.histograms.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.histograms.len()
    }

    /// Fits the matcher from scratch, replacing any existing samples.
    pub fn train(&mut self, samples: &[(i64, GrayImage)]) {
        self.histograms.clear();
        self.labels.clear();
        for (label, image) in samples {
            self.push_sample(*label, image);
        }
        debug!(samples = self.histograms.len(), "matcher fitted");
    }

    /// Adds one sample without touching what was already learned.
    pub fn update(&mut self, label: i64, image: &GrayImage) {
        self.push_sample(label, image);
        debug!(label, samples = self.histograms.len(), "sample added");
    }

    fn push_sample(&mut self, label: i64, image: &GrayImage) {
        let normalized = resize_bilinear(image, SAMPLE_SIZE, SAMPLE_SIZE);
        let codes = elbp(&normalized);
        self.histograms.push(spatial_histogram(&codes));
        self.labels.push(label);
    }

    /// Returns the label of the nearest stored sample, or `None` when no
    /// samples are stored. Ties keep the earlier sample.
    pub fn predict(&self, image: &GrayImage) -> Option<Prediction> {
        if self.histograms.is_empty() {
            return None;
        }
        let normalized = resize_bilinear(image, SAMPLE_SIZE, SAMPLE_SIZE);
        let probe = spatial_histogram(&elbp(&normalized));
        let mut best: Option<Prediction> = None;
        for (hist, &label) in self.histograms.iter().zip(&self.labels) {
            let distance = chi_square_alt(&probe, hist);
            match best {
                Some(b) if distance >= b.distance => {}
                _ => best = Some(Prediction { label, distance }),
            }
        }
        best
    }
}

/// Crops a detected face region and normalizes it to the sample size.
pub fn extract_sample(image: &GrayImage, face: &FaceBox) -> GrayImage {
    let patch = crop(image, face.x, face.y, face.width, face.height);
    resize_bilinear(&patch, SAMPLE_SIZE, SAMPLE_SIZE)
}

/// Code image over the source interior: for each pixel, one bit per
/// neighbor sampled on a radius-1 circle with bilinear interpolation,
/// set when the neighbor is at least as bright as the center.
fn elbp(src: &GrayImage) -> Array2<u8> {
    let (w, h) = src.dimensions();
    let margin = RADIUS.ceil() as i64;
    if (w as i64) <= 2 * margin || (h as i64) <= 2 * margin {
        return Array2::zeros((0, 0));
    }
    let out_h = (h as i64 - 2 * margin) as usize;
    let out_w = (w as i64 - 2 * margin) as usize;
    let mut dst = Array2::<u8>::zeros((out_h, out_w));

    for n in 0..NEIGHBORS {
        let angle = 2.0 * std::f32::consts::PI * n as f32 / NEIGHBORS as f32;
        let sx = RADIUS * angle.cos();
        let sy = -RADIUS * angle.sin();
        let fx = sx.floor();
        let fy = sy.floor();
        let cx = sx.ceil();
        let cy = sy.ceil();
        let tx = sx - fx;
        let ty = sy - fy;
        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;
        let (fx, fy, cx, cy) = (fx as i64, fy as i64, cx as i64, cy as i64);

        for i in margin..(h as i64 - margin) {
            for j in margin..(w as i64 - margin) {
                let px = |dy: i64, dx: i64| src.get_pixel((j + dx) as u32, (i + dy) as u32)[0] as f32;
                let t = w1 * px(fy, fx) + w2 * px(fy, cx) + w3 * px(cy, fx) + w4 * px(cy, cx);
                let c = px(0, 0);
                if t > c || (t - c).abs() < f32::EPSILON {
                    dst[[(i - margin) as usize, (j - margin) as usize]] |= 1 << n;
                }
            }
        }
    }
    dst
}

/// Concatenated per-cell histograms, each L1-normalized by its cell
/// pixel count. Remainder rows/columns beyond the grid are ignored.
fn spatial_histogram(codes: &Array2<u8>) -> Vec<f32> {
    let (rows, cols) = codes.dim();
    let cell_h = rows / GRID as usize;
    let cell_w = cols / GRID as usize;
    let total = (GRID * GRID) as usize * HIST_BINS;
    if cell_h == 0 || cell_w == 0 {
        return vec![0.0; total];
    }
    let norm = (cell_h * cell_w) as f32;
    let mut hist = Vec::with_capacity(total);
    for gy in 0..GRID as usize {
        for gx in 0..GRID as usize {
            let mut bins = [0u32; HIST_BINS];
            for y in 0..cell_h {
                for x in 0..cell_w {
                    let code = codes[[gy * cell_h + y, gx * cell_w + x]];
                    bins[code as usize] += 1;
                }
            }
            hist.extend(bins.iter().map(|&c| c as f32 / norm));
        }
    }
    hist
}

/// Alternative chi-square distance, `2 * sum((a-b)^2 / (a+b))` with
/// empty-bin pairs skipped.
fn chi_square_alt(a: &[f32], b: &[f32]) -> f64 {
    let mut sum = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        let s = x + y;
        if s.abs() > f64::EPSILON {
            let d = x - y;
            sum += d * d / s;
        }
    }
    2.0 * sum
}

/// Ordered mapping from identity label to display name, persisted next
/// to the matcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelTable {
    entries: Vec<LabelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelEntry {
    pub label: i64,
    pub name: String,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or renames a label.
    pub fn insert(&mut self, label: i64, name: impl Into<String>) {
        match self.entries.iter_mut().find(|e| e.label == label) {
            Some(entry) => entry.name = name.into(),
            None => self.entries.push(LabelEntry {
                label,
                name: name.into(),
            }),
        }
    }

    pub fn name_of(&self, label: i64) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.label == label)
            .map(|e| e.name.as_str())
    }

    pub fn contains(&self, label: i64) -> bool {
        self.entries.iter().any(|e| e.label == label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
