//! Image payload decoding.
//!
//! Submissions arrive either as an inline base64 body (with or without a
//! `data:image/...;base64,` prefix) or as a filesystem path. Both
//! normalize to an 8-bit grayscale buffer before detection.

use std::path::{Path, PathBuf};

use base64::Engine;
use image::GrayImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image payload is empty")]
    EmptyPayload,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unsupported or corrupt image data: {0}")]
    Malformed(#[from] image::ImageError),

    #[error("image file not found: {0}")]
    FileNotFound(String),
}

/// An inbound image, before decoding.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Base64 body, optionally wrapped in a data-URI prefix.
    Inline(String),
    /// Path to an image file on local disk.
    File(PathBuf),
}

impl ImageSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        ImageSource::File(path.into())
    }
}

/// Decodes a payload to grayscale pixels.
pub fn decode_source(source: &ImageSource) -> Result<GrayImage, DecodeError> {
    match source {
        ImageSource::Inline(payload) => decode_inline(payload),
        ImageSource::File(path) => decode_file(path),
    }
}

fn decode_inline(payload: &str) -> Result<GrayImage, DecodeError> {
    // Strip a data-URI prefix if present. Raw base64 never contains a
    // comma, so split_once is unambiguous.
    let body = match payload.split_once(',') {
        Some((prefix, rest)) if prefix.contains("base64") => rest,
        _ => payload,
    };
    let body = body.trim();
    if body.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }
    let bytes = base64::engine::general_purpose::STANDARD.decode(body)?;
    let img = image::load_from_memory(&bytes)?;
    Ok(img.to_luma8())
}

fn decode_file(path: &Path) -> Result<GrayImage, DecodeError> {
    if !path.is_file() {
        return Err(DecodeError::FileNotFound(path.display().to_string()));
    }
    let img = image::open(path)?;
    Ok(img.to_luma8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = GrayImage::from_fn(w, h, |x, y| Luma([((x + y) % 256) as u8]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn test_decode_raw_base64() {
        let payload = b64(&png_bytes(8, 6));
        let img = decode_source(&ImageSource::Inline(payload)).unwrap();
        assert_eq!(img.dimensions(), (8, 6));
    }

    #[test]
    fn test_decode_data_uri() {
        let payload = format!("data:image/png;base64,{}", b64(&png_bytes(5, 5)));
        let img = decode_source(&ImageSource::Inline(payload)).unwrap();
        assert_eq!(img.dimensions(), (5, 5));
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = decode_source(&ImageSource::Inline("%%not-base64%%".into())).unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn test_decode_rejects_non_image_bytes() {
        let payload = b64(b"definitely not a png");
        let err = decode_source(&ImageSource::Inline(payload)).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_rejects_empty_payload() {
        for payload in ["", "   ", "data:image/png;base64,"] {
            let err = decode_source(&ImageSource::Inline(payload.into())).unwrap_err();
            assert!(matches!(err, DecodeError::EmptyPayload));
        }
    }

    #[test]
    fn test_decode_missing_file() {
        let err = decode_source(&ImageSource::from_path("/no/such/photo.png")).unwrap_err();
        assert!(matches!(err, DecodeError::FileNotFound(_)));
    }

    #[test]
    fn test_decode_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.png");
        std::fs::write(&path, png_bytes(12, 7)).unwrap();
        let img = decode_source(&ImageSource::from_path(&path)).unwrap();
        assert_eq!(img.dimensions(), (12, 7));
    }
}
