//! Grayscale pixel-buffer helpers: bilinear resize, cropping, and
//! integral image tables used by the cascade scan.

use image::{imageops, GrayImage, Luma};
use ndarray::Array2;

/// Bilinear resize with half-pixel centers. Source pixels are sampled at
/// `(dst + 0.5) * ratio - 0.5`, clamped at the borders.
pub fn resize_bilinear(src: &GrayImage, dst_w: u32, dst_h: u32) -> GrayImage {
    let (w, h) = src.dimensions();
    if w == dst_w && h == dst_h {
        return src.clone();
    }
    let x_ratio = w as f32 / dst_w as f32;
    let y_ratio = h as f32 / dst_h as f32;

    let mut out = GrayImage::new(dst_w, dst_h);
    for y in 0..dst_h {
        let src_y = (y as f32 + 0.5) * y_ratio - 0.5;
        let y0 = src_y.floor().max(0.0) as u32;
        let y1 = (y0 + 1).min(h - 1);
        let fy = (src_y - y0 as f32).clamp(0.0, 1.0);

        for x in 0..dst_w {
            let src_x = (x as f32 + 0.5) * x_ratio - 0.5;
            let x0 = src_x.floor().max(0.0) as u32;
            let x1 = (x0 + 1).min(w - 1);
            let fx = (src_x - x0 as f32).clamp(0.0, 1.0);

            let p00 = src.get_pixel(x0, y0)[0] as f32;
            let p10 = src.get_pixel(x1, y0)[0] as f32;
            let p01 = src.get_pixel(x0, y1)[0] as f32;
            let p11 = src.get_pixel(x1, y1)[0] as f32;

            let top = p00 * (1.0 - fx) + p10 * fx;
            let bottom = p01 * (1.0 - fx) + p11 * fx;
            let value = top * (1.0 - fy) + bottom * fy;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Crops a region, clamped to the image bounds.
pub fn crop(src: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> GrayImage {
    imageops::crop_imm(src, x, y, w, h).to_image()
}

/// Summed-area tables over pixel values and squared pixel values.
///
/// Both tables carry one extra row and column of zeros so rectangle sums
/// need no boundary special-casing.
pub struct IntegralImage {
    sum: Array2<u64>,
    sq: Array2<u64>,
    width: u32,
    height: u32,
}

impl IntegralImage {
    pub fn new(img: &GrayImage) -> Self {
        let (w, h) = img.dimensions();
        let mut sum = Array2::<u64>::zeros((h as usize + 1, w as usize + 1));
        let mut sq = Array2::<u64>::zeros((h as usize + 1, w as usize + 1));
        for y in 0..h as usize {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w as usize {
                let v = img.get_pixel(x as u32, y as u32)[0] as u64;
                row_sum += v;
                row_sq += v * v;
                sum[[y + 1, x + 1]] = sum[[y, x + 1]] + row_sum;
                sq[[y + 1, x + 1]] = sq[[y, x + 1]] + row_sq;
            }
        }
        Self {
            sum,
            sq,
            width: w,
            height: h,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Sum of pixel values over the rectangle. The caller keeps the
    /// rectangle inside the image.
    pub fn rect_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x, y, w, h) = (x as usize, y as usize, w as usize, h as usize);
        // Ordered so every intermediate stays non-negative in u64.
        self.sum[[y + h, x + w]] - self.sum[[y, x + w]] + self.sum[[y, x]] - self.sum[[y + h, x]]
    }

    /// Sum of squared pixel values over the rectangle.
    pub fn rect_sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x, y, w, h) = (x as usize, y as usize, w as usize, h as usize);
        self.sq[[y + h, x + w]] - self.sq[[y, x + w]] + self.sq[[y, x]] - self.sq[[y + h, x]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]))
    }

    fn brute_sum(img: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> (u64, u64) {
        let mut s = 0u64;
        let mut q = 0u64;
        for yy in y..y + h {
            for xx in x..x + w {
                let v = img.get_pixel(xx, yy)[0] as u64;
                s += v;
                q += v * v;
            }
        }
        (s, q)
    }

    #[test]
    fn test_integral_matches_brute_force() {
        let img = pattern(7, 5);
        let ii = IntegralImage::new(&img);
        for y in 0..5 {
            for x in 0..7 {
                for h in 1..=(5 - y) {
                    for w in 1..=(7 - x) {
                        let (s, q) = brute_sum(&img, x, y, w, h);
                        assert_eq!(ii.rect_sum(x, y, w, h), s);
                        assert_eq!(ii.rect_sq_sum(x, y, w, h), q);
                    }
                }
            }
        }
    }

    #[test]
    fn test_integral_full_image() {
        let img = GrayImage::from_pixel(6, 4, Luma([10]));
        let ii = IntegralImage::new(&img);
        assert_eq!(ii.rect_sum(0, 0, 6, 4), 240);
        assert_eq!(ii.rect_sq_sum(0, 0, 6, 4), 2400);
        assert_eq!(ii.width(), 6);
        assert_eq!(ii.height(), 4);
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let img = GrayImage::from_pixel(50, 50, Luma([137]));
        let out = resize_bilinear(&img, 100, 100);
        assert_eq!(out.dimensions(), (100, 100));
        assert!(out.pixels().all(|p| p[0] == 137));
    }

    #[test]
    fn test_resize_same_size_is_identity() {
        let img = pattern(9, 11);
        let out = resize_bilinear(&img, 9, 11);
        assert_eq!(out, img);
    }

    #[test]
    fn test_resize_upscale_known_values() {
        let mut img = GrayImage::new(2, 1);
        img.put_pixel(0, 0, Luma([10]));
        img.put_pixel(1, 0, Luma([30]));
        let out = resize_bilinear(&img, 4, 1);
        let row: Vec<u8> = (0..4).map(|x| out.get_pixel(x, 0)[0]).collect();
        assert_eq!(row, vec![10, 15, 25, 30]);
    }

    #[test]
    fn test_crop_extracts_region() {
        let img = pattern(10, 10);
        let out = crop(&img, 2, 3, 4, 4);
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 0), img.get_pixel(2, 3));
        assert_eq!(out.get_pixel(3, 3), img.get_pixel(5, 6));
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let img = pattern(10, 10);
        let out = crop(&img, 8, 8, 5, 5);
        assert_eq!(out.dimensions(), (2, 2));
    }
}
