//! Single-plane float image with a masked-pixel sentinel.
//!
//! All pixel data in the engine lives in [`RawImage`]: a dense `Array2<f32>`
//! indexed `[row, col]` = `[y, x]`. Masked or otherwise invalid pixels carry
//! the IEEE NaN sentinel [`NO_DATA`], which every reduction in this module
//! skips (it is never treated as zero).

use ndarray::Array2;

/// Sentinel marking a masked or invalid pixel.
pub const NO_DATA: f32 = f32::NAN;

/// Whether a pixel value carries usable data.
#[inline]
pub fn pixel_has_data(value: f32) -> bool {
    !value.is_nan()
}

/// Central image moments of a stamp, in normalized stamp coordinates.
///
/// For a stamp of radius `r`, each pixel at offset `(dx, dy)` from the center
/// contributes `value * (dx/r)^p * (dy/r)^q` to `m_pq`. Masked pixels are
/// skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImageMoments {
    pub m00: f32,
    pub m01: f32,
    pub m10: f32,
    pub m11: f32,
    pub m02: f32,
    pub m20: f32,
}

/// A dense two-dimensional float image.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    data: Array2<f32>,
}

impl RawImage {
    /// Create a zero-filled image of the given size.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            data: Array2::zeros((height, width)),
        }
    }

    /// Create an image filled with a single value.
    pub fn from_elem(width: usize, height: usize, value: f32) -> Self {
        Self {
            data: Array2::from_elem((height, width), value),
        }
    }

    /// Wrap an existing array. The array is indexed `[y, x]`.
    pub fn from_array(data: Array2<f32>) -> Self {
        Self { data }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn npixels(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<f32> {
        &mut self.data
    }

    /// Whether `(x, y)` falls inside the image.
    #[inline]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width() && (y as usize) < self.height()
    }

    /// Read the pixel at `(x, y)`, returning [`NO_DATA`] outside the bounds.
    #[inline]
    pub fn get_pixel(&self, x: i64, y: i64) -> f32 {
        if self.contains(x, y) {
            self.data[[y as usize, x as usize]]
        } else {
            NO_DATA
        }
    }

    /// Whether the pixel at `(x, y)` is in bounds and unmasked.
    #[inline]
    pub fn pixel_has_data(&self, x: i64, y: i64) -> bool {
        pixel_has_data(self.get_pixel(x, y))
    }

    /// Write the pixel at `(x, y)`.
    ///
    /// # Panics
    /// Panics when `(x, y)` is outside the image; writing out of bounds is a
    /// caller bug, unlike reads which model missing data.
    #[inline]
    pub fn set_pixel(&mut self, x: usize, y: usize, value: f32) {
        assert!(
            x < self.width() && y < self.height(),
            "pixel write ({x}, {y}) outside {}x{} image",
            self.width(),
            self.height(),
        );
        self.data[[y, x]] = value;
    }

    /// Fill every pixel with `value`.
    pub fn set_all(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Minimum and maximum over unmasked pixels, or `None` when every pixel
    /// is masked.
    pub fn compute_bounds(&self) -> Option<(f32, f32)> {
        let mut bounds: Option<(f32, f32)> = None;
        for &v in self.data.iter() {
            if pixel_has_data(v) {
                bounds = Some(match bounds {
                    Some((lo, hi)) => (lo.min(v), hi.max(v)),
                    None => (v, v),
                });
            }
        }
        bounds
    }

    /// Sum of unmasked pixels. An all-masked image sums to zero.
    pub fn sum(&self) -> f32 {
        self.data.iter().copied().filter(|v| pixel_has_data(*v)).sum()
    }

    /// Mean of unmasked pixels, [`NO_DATA`] when every pixel is masked.
    pub fn mean(&self) -> f32 {
        let mut total = 0.0f32;
        let mut count = 0usize;
        for &v in self.data.iter() {
            if pixel_has_data(v) {
                total += v;
                count += 1;
            }
        }
        if count == 0 {
            NO_DATA
        } else {
            total / count as f32
        }
    }

    /// Median of unmasked pixels, [`NO_DATA`] when every pixel is masked.
    /// Even counts average the two middle values.
    pub fn median(&self) -> f32 {
        let mut valid: Vec<f32> = self
            .data
            .iter()
            .copied()
            .filter(|v| pixel_has_data(*v))
            .collect();
        if valid.is_empty() {
            return NO_DATA;
        }
        valid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = valid.len() / 2;
        if valid.len() % 2 == 0 {
            (valid[mid - 1] + valid[mid]) / 2.0
        } else {
            valid[mid]
        }
    }

    /// Extract a `(2r+1) x (2r+1)` stamp centered on the pixel nearest the
    /// sub-pixel point `(cx, cy)`.
    ///
    /// Samples outside the image are [`NO_DATA`]; with `keep_no_data = false`
    /// masked samples are written as zero instead (the visualization path).
    pub fn create_stamp(&self, cx: f32, cy: f32, radius: usize, keep_no_data: bool) -> RawImage {
        let edge = 2 * radius + 1;
        let cx = (cx + 0.5).floor() as i64;
        let cy = (cy + 0.5).floor() as i64;
        let r = radius as i64;

        let mut stamp = Array2::zeros((edge, edge));
        for i in 0..edge {
            for j in 0..edge {
                let value = self.get_pixel(cx - r + j as i64, cy - r + i as i64);
                stamp[[i, j]] = if pixel_has_data(value) || keep_no_data {
                    value
                } else {
                    0.0
                };
            }
        }
        RawImage::from_array(stamp)
    }

    /// Position `(x, y)` of the maximum unmasked pixel.
    ///
    /// Ties are broken toward the lowest row, then the lowest column. An
    /// all-masked image peaks at `(0, 0)`.
    pub fn find_peak(&self) -> (usize, usize) {
        let mut best = (0usize, 0usize);
        let mut best_value = f32::NEG_INFINITY;
        for ((row, col), &v) in self.data.indexed_iter() {
            if pixel_has_data(v) && v > best_value {
                best_value = v;
                best = (col, row);
            }
        }
        best
    }

    /// Flux-weighted peak: the intensity-weighted centroid of unmasked
    /// pixels, rounded to the nearest pixel. Falls back to [`find_peak`] when
    /// the total flux is not positive.
    ///
    /// [`find_peak`]: RawImage::find_peak
    pub fn find_peak_weighted(&self) -> (usize, usize) {
        let mut total = 0.0f32;
        let mut sum_x = 0.0f32;
        let mut sum_y = 0.0f32;
        for ((row, col), &v) in self.data.indexed_iter() {
            if pixel_has_data(v) {
                total += v;
                sum_x += col as f32 * v;
                sum_y += row as f32 * v;
            }
        }
        if total <= 0.0 {
            return self.find_peak();
        }
        let x = ((sum_x / total + 0.5).floor() as i64).clamp(0, self.width() as i64 - 1);
        let y = ((sum_y / total + 0.5).floor() as i64).clamp(0, self.height() as i64 - 1);
        (x as usize, y as usize)
    }

    /// Central moments of a square stamp, flux-normalized and in offsets
    /// scaled by the stamp radius.
    ///
    /// Each unmasked pixel contributes `(value / total) * (dx/r)^p * (dy/r)^q`,
    /// so the moments are independent of both source brightness and stamp
    /// size (`m00` is 1 for any stamp with flux). A stamp with zero total
    /// flux has all-zero moments.
    pub fn central_moments(&self) -> ImageMoments {
        let rx = (self.width() / 2).max(1) as f32;
        let ry = (self.height() / 2).max(1) as f32;
        let cx = (self.width() / 2) as f32;
        let cy = (self.height() / 2) as f32;

        let total = self.sum();
        if total == 0.0 {
            return ImageMoments::default();
        }

        let mut moments = ImageMoments::default();
        for ((row, col), &v) in self.data.indexed_iter() {
            if !pixel_has_data(v) {
                continue;
            }
            let weight = v / total;
            let dx = (col as f32 - cx) / rx;
            let dy = (row as f32 - cy) / ry;
            moments.m00 += weight;
            moments.m10 += weight * dx;
            moments.m01 += weight * dy;
            moments.m11 += weight * dx * dy;
            moments.m20 += weight * dx * dx;
            moments.m02 += weight * dy * dy;
        }
        moments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_from_rows(rows: &[&[f32]]) -> RawImage {
        let height = rows.len();
        let width = rows[0].len();
        let mut img = RawImage::new(width, height);
        for (y, row) in rows.iter().enumerate() {
            for (x, &v) in row.iter().enumerate() {
                img.set_pixel(x, y, v);
            }
        }
        img
    }

    #[test]
    fn test_get_pixel_bounds() {
        let img = image_from_rows(&[&[1.0, 2.0], &[3.0, 4.0]]);
        assert_eq!(img.get_pixel(0, 0), 1.0);
        assert_eq!(img.get_pixel(1, 1), 4.0);
        assert!(!pixel_has_data(img.get_pixel(-1, 0)));
        assert!(!pixel_has_data(img.get_pixel(0, 2)));
        assert!(!pixel_has_data(img.get_pixel(2, 0)));
    }

    #[test]
    #[should_panic(expected = "pixel write")]
    fn test_set_pixel_out_of_bounds_panics() {
        let mut img = RawImage::new(4, 4);
        img.set_pixel(4, 0, 1.0);
    }

    #[test]
    fn test_reductions_skip_no_data() {
        let img = image_from_rows(&[&[1.0, NO_DATA], &[3.0, 2.0]]);
        assert_eq!(img.sum(), 6.0);
        assert_eq!(img.mean(), 2.0);
        assert_eq!(img.median(), 2.0);
    }

    #[test]
    fn test_reductions_all_masked() {
        let img = RawImage::from_elem(3, 3, NO_DATA);
        assert_eq!(img.sum(), 0.0);
        assert!(!pixel_has_data(img.mean()));
        assert!(!pixel_has_data(img.median()));
        assert!(img.compute_bounds().is_none());
    }

    #[test]
    fn test_compute_bounds() {
        let img = image_from_rows(&[&[1.0, NO_DATA], &[-4.0, 2.5]]);
        assert_eq!(img.compute_bounds(), Some((-4.0, 2.5)));
    }

    #[test]
    fn test_stamp_centered() {
        let mut img = RawImage::new(8, 8);
        img.set_pixel(4, 3, 9.0);
        let stamp = img.create_stamp(4.0, 3.0, 2, true);
        assert_eq!(stamp.width(), 5);
        assert_eq!(stamp.height(), 5);
        assert_eq!(stamp.get_pixel(2, 2), 9.0);
    }

    #[test]
    fn test_stamp_subpixel_center_rounds() {
        let mut img = RawImage::new(8, 8);
        img.set_pixel(5, 3, 9.0);
        // 4.6 rounds to pixel 5.
        let stamp = img.create_stamp(4.6, 3.2, 1, true);
        assert_eq!(stamp.get_pixel(1, 1), 9.0);
    }

    #[test]
    fn test_stamp_out_of_bounds() {
        let img = RawImage::from_elem(4, 4, 1.0);
        let kept = img.create_stamp(0.0, 0.0, 2, true);
        assert!(!pixel_has_data(kept.get_pixel(0, 0)));
        assert_eq!(kept.get_pixel(2, 2), 1.0);

        // The viz path zeroes the missing samples instead.
        let viz = img.create_stamp(0.0, 0.0, 2, false);
        assert_eq!(viz.get_pixel(0, 0), 0.0);
        assert_eq!(viz.get_pixel(2, 2), 1.0);
    }

    #[test]
    fn test_find_peak_tie_break() {
        let img = image_from_rows(&[&[0.0, 5.0, 0.0], &[5.0, 0.0, 0.0], &[0.0, 0.0, 5.0]]);
        // Lowest row wins, then lowest column.
        assert_eq!(img.find_peak(), (1, 0));
    }

    #[test]
    fn test_find_peak_skips_no_data() {
        let img = image_from_rows(&[&[NO_DATA, 1.0], &[2.0, NO_DATA]]);
        assert_eq!(img.find_peak(), (0, 1));
    }

    #[test]
    fn test_find_peak_weighted() {
        let mut img = RawImage::new(9, 9);
        img.set_pixel(2, 6, 4.0);
        img.set_pixel(4, 6, 4.0);
        // Centroid lands between the two spikes.
        assert_eq!(img.find_peak_weighted(), (3, 6));
    }

    #[test]
    fn test_central_moments_symmetric_spike() {
        let mut img = RawImage::new(5, 5);
        img.set_pixel(2, 2, 3.0);
        let m = img.central_moments();
        assert_eq!(m.m00, 1.0);
        assert_eq!(m.m01, 0.0);
        assert_eq!(m.m10, 0.0);
        assert_eq!(m.m11, 0.0);
        assert_eq!(m.m02, 0.0);
        assert_eq!(m.m20, 0.0);
    }

    #[test]
    fn test_central_moments_offset_spike() {
        let mut img = RawImage::new(5, 5);
        img.set_pixel(4, 2, 2.0);
        let m = img.central_moments();
        // All flux at normalized offset (dx, dy) = (1.0, 0.0).
        assert_eq!(m.m10, 1.0);
        assert_eq!(m.m01, 0.0);
        assert_eq!(m.m20, 1.0);
        assert_eq!(m.m02, 0.0);
    }

    #[test]
    fn test_central_moments_brightness_invariant() {
        let mut dim = RawImage::new(7, 7);
        dim.set_pixel(5, 3, 1.0);
        dim.set_pixel(3, 3, 2.0);
        let mut bright = RawImage::new(7, 7);
        bright.set_pixel(5, 3, 100.0);
        bright.set_pixel(3, 3, 200.0);
        let a = dim.central_moments();
        let b = bright.central_moments();
        assert!((a.m10 - b.m10).abs() < 1e-6);
        assert!((a.m20 - b.m20).abs() < 1e-6);
    }

    #[test]
    fn test_central_moments_zero_flux() {
        let img = RawImage::new(5, 5);
        assert_eq!(img.central_moments(), ImageMoments::default());
    }
}
