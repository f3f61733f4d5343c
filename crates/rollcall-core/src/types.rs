//! Shared geometry types for detection results.

use serde::{Deserialize, Serialize};

/// A detected face region in source image coordinates, plus the number
/// of raw windows that voted for it during grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub votes: u32,
}

impl FaceBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Center point as (x, y).
    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(x: u32, y: u32, w: u32, h: u32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: w,
            height: h,
            votes: 1,
        }
    }

    #[test]
    fn test_area() {
        assert_eq!(make_box(0, 0, 10, 20).area(), 200);
        assert_eq!(make_box(5, 5, 0, 20).area(), 0);
    }

    #[test]
    fn test_center() {
        let b = make_box(10, 20, 4, 8);
        assert_eq!(b.center(), (12.0, 24.0));
    }

    #[test]
    fn test_edges() {
        let b = make_box(3, 4, 10, 11);
        assert_eq!(b.right(), 13);
        assert_eq!(b.bottom(), 15);
    }
}
