//! rollcall-core — Face detection and recognition primitives.
//!
//! Haar cascade detection and LBPH matching over plain grayscale
//! buffers, plus image decoding and durable model storage. Everything
//! here is synchronous and storage-free; orchestration and persistence
//! policy live in rollcall-engine.

pub mod cascade;
pub mod decode;
pub mod detector;
pub mod imaging;
pub mod lbph;
pub mod modelstore;
pub mod types;

pub use cascade::{CascadeError, CascadeModel};
pub use decode::{decode_source, DecodeError, ImageSource};
pub use detector::FaceDetector;
pub use lbph::{extract_sample, LabelTable, Lbph, Prediction, SAMPLE_SIZE};
pub use modelstore::{ModelStore, ModelStoreError};
pub use types::FaceBox;
