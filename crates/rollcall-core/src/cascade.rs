//! Boosted Haar cascade classifier, loaded from OpenCV cascade XML.
//!
//! The new-format files (`<opencv_storage><cascade>...`) carry stages of
//! weak tree classifiers over shared rectangle features. Evaluation of a
//! single window normalizes raw feature sums by the window's pixel
//! variance, then walks each weak tree to a leaf; a stage passes when
//! the leaf sum reaches the stage threshold, and a window is a face
//! candidate when every stage passes.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::imaging::IntegralImage;

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("cascade file not found: {0} (expected an OpenCV haar cascade, e.g. haarcascade_frontalface_default.xml)")]
    NotFound(String),

    #[error("failed to read cascade file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed cascade xml: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("unsupported cascade: {0}")]
    Unsupported(String),

    #[error("invalid cascade: {0}")]
    Invalid(String),
}

// Serde mirror of the on-disk layout. OpenCV writes sequences as
// repeated `<_>` elements, and packs tree nodes and leaves into
// whitespace-separated scalar lists.

#[derive(Debug, Deserialize)]
struct CascadeFile {
    cascade: CascadeXml,
}

#[derive(Debug, Deserialize)]
struct CascadeXml {
    #[serde(rename = "stageType")]
    stage_type: String,
    #[serde(rename = "featureType")]
    feature_type: String,
    height: u32,
    width: u32,
    #[serde(rename = "stageNum")]
    stage_num: usize,
    stages: StageList,
    features: FeatureList,
}

#[derive(Debug, Deserialize)]
struct StageList {
    #[serde(rename = "_", default)]
    items: Vec<StageXml>,
}

#[derive(Debug, Deserialize)]
struct StageXml {
    #[serde(rename = "stageThreshold")]
    stage_threshold: f32,
    #[serde(rename = "weakClassifiers")]
    weak_classifiers: WeakList,
}

#[derive(Debug, Deserialize)]
struct WeakList {
    #[serde(rename = "_", default)]
    items: Vec<WeakXml>,
}

#[derive(Debug, Deserialize)]
struct WeakXml {
    #[serde(rename = "internalNodes")]
    internal_nodes: String,
    #[serde(rename = "leafValues")]
    leaf_values: String,
}

#[derive(Debug, Deserialize)]
struct FeatureList {
    #[serde(rename = "_", default)]
    items: Vec<FeatureXml>,
}

#[derive(Debug, Deserialize)]
struct FeatureXml {
    rects: RectList,
    #[serde(default)]
    tilted: u8,
}

#[derive(Debug, Deserialize)]
struct RectList {
    #[serde(rename = "_", default)]
    items: Vec<String>,
}

// Runtime representation, validated so evaluation never indexes out of
// bounds.

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    weight: f32,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone, Copy)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f32,
}

#[derive(Debug, Clone)]
struct WeakTree {
    nodes: Vec<TreeNode>,
    leaves: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    weaks: Vec<WeakTree>,
}

/// A parsed, validated cascade ready for window evaluation.
#[derive(Debug, Clone)]
pub struct CascadeModel {
    window_w: u32,
    window_h: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl CascadeModel {
    pub fn from_xml_file(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path).map_err(|source| CascadeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_xml_str(&xml)
    }

    pub fn from_xml_str(xml: &str) -> Result<Self, CascadeError> {
        let file: CascadeFile = quick_xml::de::from_str(xml)?;
        let cascade = file.cascade;

        if cascade.stage_type != "BOOST" {
            return Err(CascadeError::Unsupported(format!(
                "stageType {:?}, only BOOST is supported",
                cascade.stage_type
            )));
        }
        if cascade.feature_type != "HAAR" {
            return Err(CascadeError::Unsupported(format!(
                "featureType {:?}, only HAAR is supported",
                cascade.feature_type
            )));
        }
        if cascade.width < 3 || cascade.height < 3 {
            return Err(CascadeError::Invalid(format!(
                "window {}x{} is too small",
                cascade.width, cascade.height
            )));
        }
        if cascade.stages.items.is_empty() {
            return Err(CascadeError::Invalid("cascade has no stages".into()));
        }
        if cascade.stage_num != cascade.stages.items.len() {
            return Err(CascadeError::Invalid(format!(
                "stageNum {} does not match {} parsed stages",
                cascade.stage_num,
                cascade.stages.items.len()
            )));
        }

        let features = cascade
            .features
            .items
            .iter()
            .map(|f| parse_feature(f, cascade.width, cascade.height))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = cascade
            .stages
            .items
            .iter()
            .map(|s| {
                let weaks = s
                    .weak_classifiers
                    .items
                    .iter()
                    .map(|w| parse_weak(w, features.len()))
                    .collect::<Result<Vec<_>, _>>()?;
                if weaks.is_empty() {
                    return Err(CascadeError::Invalid("stage has no weak classifiers".into()));
                }
                Ok(Stage {
                    threshold: s.stage_threshold,
                    weaks,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            stages = stages.len(),
            features = features.len(),
            window_w = cascade.width,
            window_h = cascade.height,
            "cascade parsed"
        );

        Ok(Self {
            window_w: cascade.width,
            window_h: cascade.height,
            stages,
            features,
        })
    }

    pub fn window_width(&self) -> u32 {
        self.window_w
    }

    pub fn window_height(&self) -> u32 {
        self.window_h
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Evaluates every stage over the window whose top-left corner is at
    /// `(wx, wy)`. The caller keeps the window inside the image.
    pub fn eval_window(&self, integral: &IntegralImage, wx: u32, wy: u32) -> bool {
        let inv_norm = self.inv_window_norm(integral, wx, wy);
        for stage in &self.stages {
            let mut sum = 0.0f32;
            for weak in &stage.weaks {
                sum += self.eval_weak(weak, integral, wx, wy, inv_norm);
            }
            if sum < stage.threshold {
                return false;
            }
        }
        true
    }

    /// Inverse variance normalization factor over the window interior
    /// (1-pixel border excluded), `1.0` when the window is flat.
    fn inv_window_norm(&self, integral: &IntegralImage, wx: u32, wy: u32) -> f32 {
        let w = self.window_w - 2;
        let h = self.window_h - 2;
        let area = (w as f64) * (h as f64);
        let s = integral.rect_sum(wx + 1, wy + 1, w, h) as f64;
        let sq = integral.rect_sq_sum(wx + 1, wy + 1, w, h) as f64;
        let var = area * sq - s * s;
        if var > 0.0 {
            (1.0 / var.sqrt()) as f32
        } else {
            1.0
        }
    }

    fn eval_weak(
        &self,
        weak: &WeakTree,
        integral: &IntegralImage,
        wx: u32,
        wy: u32,
        inv_norm: f32,
    ) -> f32 {
        let mut idx: i32 = 0;
        loop {
            let node = &weak.nodes[idx as usize];
            let feature = &self.features[node.feature];
            let mut raw = 0.0f32;
            for r in &feature.rects {
                raw += integral.rect_sum(wx + r.x, wy + r.y, r.w, r.h) as f32 * r.weight;
            }
            // Node values <= 0 reference leaves as -(leaf index).
            idx = if raw * inv_norm < node.threshold {
                node.left
            } else {
                node.right
            };
            if idx <= 0 {
                return weak.leaves[(-idx) as usize];
            }
        }
    }
}

fn parse_feature(
    feature: &FeatureXml,
    window_w: u32,
    window_h: u32,
) -> Result<HaarFeature, CascadeError> {
    if feature.tilted != 0 {
        return Err(CascadeError::Unsupported(
            "tilted (45 degree) features are not supported; use a BASIC-mode cascade".into(),
        ));
    }
    if feature.rects.items.is_empty() || feature.rects.items.len() > 3 {
        return Err(CascadeError::Invalid(format!(
            "feature has {} rects, expected 1 to 3",
            feature.rects.items.len()
        )));
    }
    let rects = feature
        .rects
        .items
        .iter()
        .map(|entry| {
            let tokens: Vec<&str> = entry.split_whitespace().collect();
            if tokens.len() != 5 {
                return Err(CascadeError::Invalid(format!(
                    "rect entry {entry:?} does not have 5 values"
                )));
            }
            let rect = WeightedRect {
                x: parse_num(tokens[0])?,
                y: parse_num(tokens[1])?,
                w: parse_num(tokens[2])?,
                h: parse_num(tokens[3])?,
                weight: parse_num(tokens[4])?,
            };
            if rect.w == 0
                || rect.h == 0
                || rect.x + rect.w > window_w
                || rect.y + rect.h > window_h
            {
                return Err(CascadeError::Invalid(format!(
                    "rect {}x{}+{}+{} exceeds the {}x{} window",
                    rect.w, rect.h, rect.x, rect.y, window_w, window_h
                )));
            }
            Ok(rect)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(HaarFeature { rects })
}

fn parse_weak(weak: &WeakXml, feature_count: usize) -> Result<WeakTree, CascadeError> {
    let tokens: Vec<&str> = weak.internal_nodes.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() % 4 != 0 {
        return Err(CascadeError::Invalid(format!(
            "internalNodes has {} values, expected a multiple of 4",
            tokens.len()
        )));
    }
    let mut nodes = Vec::with_capacity(tokens.len() / 4);
    for chunk in tokens.chunks(4) {
        let feature: usize = parse_num(chunk[2])?;
        if feature >= feature_count {
            return Err(CascadeError::Invalid(format!(
                "feature index {feature} out of range ({feature_count} features)"
            )));
        }
        nodes.push(TreeNode {
            left: parse_num(chunk[0])?,
            right: parse_num(chunk[1])?,
            feature,
            threshold: parse_num(chunk[3])?,
        });
    }
    let leaves = weak
        .leaf_values
        .split_whitespace()
        .map(parse_num::<f32>)
        .collect::<Result<Vec<_>, _>>()?;
    if leaves.len() != nodes.len() + 1 {
        return Err(CascadeError::Invalid(format!(
            "{} leaf values for {} nodes, expected {}",
            leaves.len(),
            nodes.len(),
            nodes.len() + 1
        )));
    }
    let node_count = nodes.len() as i32;
    let leaf_count = leaves.len() as i32;
    for node in &nodes {
        for branch in [node.left, node.right] {
            let ok = if branch > 0 {
                branch < node_count
            } else {
                -branch < leaf_count
            };
            if !ok {
                return Err(CascadeError::Invalid(format!(
                    "tree branch {branch} out of range ({} nodes, {} leaves)",
                    nodes.len(),
                    leaves.len()
                )));
            }
        }
    }
    Ok(WeakTree { nodes, leaves })
}

fn parse_num<T: std::str::FromStr>(token: &str) -> Result<T, CascadeError> {
    token
        .parse()
        .map_err(|_| CascadeError::Invalid(format!("bad numeric token {token:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    // One stage, one stump: center 6x6 of a 12x12 window against the
    // full window, firing on bright-center windows.
    const STUMP_XML: &str = r#"<?xml version="1.0"?>
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

    fn bright_center_window() -> GrayImage {
        GrayImage::from_fn(12, 12, |x, y| {
            if (3..9).contains(&x) && (3..9).contains(&y) {
                Luma([220])
            } else {
                Luma([20])
            }
        })
    }

    #[test]
    fn test_parse_structure() {
        let model = CascadeModel::from_xml_str(STUMP_XML).unwrap();
        assert_eq!(model.window_width(), 12);
        assert_eq!(model.window_height(), 12);
        assert_eq!(model.stage_count(), 1);
        assert_eq!(model.feature_count(), 1);
    }

    #[test]
    fn test_eval_fires_on_bright_center() {
        let model = CascadeModel::from_xml_str(STUMP_XML).unwrap();
        let integral = IntegralImage::new(&bright_center_window());
        assert!(model.eval_window(&integral, 0, 0));
    }

    #[test]
    fn test_eval_rejects_flat_window() {
        let model = CascadeModel::from_xml_str(STUMP_XML).unwrap();
        let flat = GrayImage::from_pixel(12, 12, Luma([20]));
        let integral = IntegralImage::new(&flat);
        assert!(!model.eval_window(&integral, 0, 0));
    }

    #[test]
    fn test_rejects_tilted_features() {
        let xml = STUMP_XML.replace("<tilted>0</tilted>", "<tilted>1</tilted>");
        let err = CascadeModel::from_xml_str(&xml).unwrap_err();
        assert!(matches!(err, CascadeError::Unsupported(_)));
    }

    #[test]
    fn test_rejects_lbp_feature_type() {
        let xml = STUMP_XML.replace("<featureType>HAAR</featureType>", "<featureType>LBP</featureType>");
        let err = CascadeModel::from_xml_str(&xml).unwrap_err();
        assert!(matches!(err, CascadeError::Unsupported(_)));
    }

    #[test]
    fn test_rejects_out_of_range_feature_index() {
        let xml = STUMP_XML.replace("0 -1 0 5.0", "0 -1 7 5.0");
        let err = CascadeModel::from_xml_str(&xml).unwrap_err();
        assert!(matches!(err, CascadeError::Invalid(_)));
    }

    #[test]
    fn test_rejects_leaf_count_mismatch() {
        let xml = STUMP_XML.replace("-1. 1.</leafValues>", "-1. 1. 3.</leafValues>");
        let err = CascadeModel::from_xml_str(&xml).unwrap_err();
        assert!(matches!(err, CascadeError::Invalid(_)));
    }

    #[test]
    fn test_rejects_rect_outside_window() {
        let xml = STUMP_XML.replace("3 3 6 6 4.", "3 3 16 6 4.");
        let err = CascadeModel::from_xml_str(&xml).unwrap_err();
        assert!(matches!(err, CascadeError::Invalid(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = CascadeModel::from_xml_file("/no/such/cascade.xml").unwrap_err();
        assert!(matches!(err, CascadeError::NotFound(_)));
    }
}
