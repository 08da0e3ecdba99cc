//! Point-spread-function kernels and masked-pixel-aware convolution.

use ndarray::Array2;

use crate::error::SearchError;
use crate::image::raw::{pixel_has_data, RawImage, NO_DATA};

/// Largest supported kernel radius.
pub const MAX_KERNEL_RADIUS: usize = 15;

/// Below this effective kernel weight a convolved pixel is considered
/// unsupported and becomes [`NO_DATA`].
const MIN_KERNEL_WEIGHT: f32 = 1e-12;

/// A square, odd-sized convolution kernel.
///
/// Kernels built from a Gaussian sigma are normalized to sum to one. The
/// [`squared`](Psf::squared) variant used for the variance channel keeps its
/// raw (non-unit) sum, which the convolution re-applies when renormalizing
/// around masked pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Psf {
    kernel: Array2<f32>,
    radius: usize,
    sum: f32,
}

impl Psf {
    /// Build a normalized Gaussian kernel with radius `ceil(3 sigma)`
    /// (at least one pixel).
    pub fn gaussian(sigma: f32) -> Result<Self, SearchError> {
        if !(sigma > 0.0) || !sigma.is_finite() {
            return Err(SearchError::InvalidPsf(format!(
                "sigma must be positive and finite, got {sigma}"
            )));
        }
        let radius = ((3.0 * sigma).ceil() as usize).max(1);
        if radius > MAX_KERNEL_RADIUS {
            return Err(SearchError::InvalidPsf(format!(
                "sigma {sigma} needs radius {radius}, maximum is {MAX_KERNEL_RADIUS}"
            )));
        }

        let dim = 2 * radius + 1;
        let mut kernel = Array2::zeros((dim, dim));
        let inv_two_sigma2 = 1.0 / (2.0 * sigma * sigma);
        let mut total = 0.0f32;
        for i in 0..dim {
            for j in 0..dim {
                let dx = j as f32 - radius as f32;
                let dy = i as f32 - radius as f32;
                let value = (-(dx * dx + dy * dy) * inv_two_sigma2).exp();
                kernel[[i, j]] = value;
                total += value;
            }
        }
        kernel.mapv_inplace(|v| v / total);

        Ok(Self {
            kernel,
            radius,
            sum: 1.0,
        })
    }

    /// Wrap an explicit kernel. Must be square, odd-sized, non-negative and
    /// within the radius cap; the kernel is used as given (no renormalization).
    pub fn from_kernel(kernel: Array2<f32>) -> Result<Self, SearchError> {
        let (rows, cols) = kernel.dim();
        if rows != cols || rows % 2 == 0 || rows == 0 {
            return Err(SearchError::InvalidPsf(format!(
                "kernel must be square and odd-sized, got {rows}x{cols}"
            )));
        }
        let radius = rows / 2;
        if radius > MAX_KERNEL_RADIUS {
            return Err(SearchError::InvalidPsf(format!(
                "kernel radius {radius} exceeds maximum {MAX_KERNEL_RADIUS}"
            )));
        }
        if kernel.iter().any(|&v| !(v >= 0.0) || !v.is_finite()) {
            return Err(SearchError::InvalidPsf(
                "kernel weights must be finite and non-negative".to_string(),
            ));
        }
        let sum = kernel.iter().sum();
        Ok(Self {
            kernel,
            radius,
            sum,
        })
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Kernel edge length `2r + 1`.
    pub fn dim(&self) -> usize {
        2 * self.radius + 1
    }

    pub fn kernel(&self) -> &Array2<f32> {
        &self.kernel
    }

    /// Total kernel weight.
    pub fn sum(&self) -> f32 {
        self.sum
    }

    /// Element-wise square of the kernel, for convolving inverse-variance
    /// planes. The sum is recomputed, not renormalized.
    pub fn squared(&self) -> Psf {
        let kernel = self.kernel.mapv(|v| v * v);
        let sum = kernel.iter().sum();
        Psf {
            kernel,
            radius: self.radius,
            sum,
        }
    }

    /// Convolve an image, skipping masked pixels.
    ///
    /// Masked pixels stay masked. Elsewhere each output pixel accumulates
    /// kernel-weighted unmasked samples and is rescaled by
    /// `kernel_sum / touched_weight`, so a fully-unmasked neighborhood is
    /// reproduced exactly. Border samples outside the image count as masked.
    /// When the touched weight is vanishingly small the output pixel is
    /// [`NO_DATA`].
    pub fn convolve(&self, image: &RawImage) -> RawImage {
        let width = image.width();
        let height = image.height();
        let r = self.radius as i64;

        let mut out = Array2::zeros((height, width));
        for y in 0..height as i64 {
            for x in 0..width as i64 {
                if !image.pixel_has_data(x, y) {
                    out[[y as usize, x as usize]] = NO_DATA;
                    continue;
                }
                let mut acc = 0.0f32;
                let mut touched = 0.0f32;
                for ki in 0..self.dim() {
                    for kj in 0..self.dim() {
                        let value = image.get_pixel(x + kj as i64 - r, y + ki as i64 - r);
                        if pixel_has_data(value) {
                            let weight = self.kernel[[ki, kj]];
                            acc += value * weight;
                            touched += weight;
                        }
                    }
                }
                out[[y as usize, x as usize]] = if touched < MIN_KERNEL_WEIGHT {
                    NO_DATA
                } else {
                    acc * self.sum / touched
                };
            }
        }
        RawImage::from_array(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_gaussian_kernel_normalized() {
        let psf = Psf::gaussian(1.0).unwrap();
        assert_eq!(psf.radius(), 3);
        assert_eq!(psf.dim(), 7);
        let total: f32 = psf.kernel().iter().sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-6);

        let center = psf.kernel()[[3, 3]];
        assert!(psf.kernel().iter().all(|&v| v <= center));
    }

    #[test]
    fn test_gaussian_rejects_bad_sigma() {
        assert!(Psf::gaussian(0.0).is_err());
        assert!(Psf::gaussian(-1.0).is_err());
        assert!(Psf::gaussian(f32::NAN).is_err());
        // Radius cap.
        assert!(Psf::gaussian(10.0).is_err());
    }

    #[test]
    fn test_from_kernel_validation() {
        assert!(Psf::from_kernel(Array2::zeros((2, 2))).is_err());
        assert!(Psf::from_kernel(Array2::zeros((3, 5))).is_err());
        assert!(Psf::from_kernel(array![[0.5, -0.1], [0.3, 0.3]]).is_err());
        assert!(Psf::from_kernel(Array2::from_elem((3, 3), 1.0 / 9.0)).is_ok());
    }

    #[test]
    fn test_squared_sum() {
        let psf = Psf::from_kernel(Array2::from_elem((3, 3), 1.0 / 9.0)).unwrap();
        let sq = psf.squared();
        assert_abs_diff_eq!(sq.sum(), 9.0 * (1.0 / 81.0), epsilon = 1e-7);
    }

    #[test]
    fn test_delta_kernel_is_identity() {
        let mut delta = Array2::zeros((3, 3));
        delta[[1, 1]] = 1.0;
        let psf = Psf::from_kernel(delta).unwrap();

        let mut img = RawImage::new(6, 5);
        for y in 0..5 {
            for x in 0..6 {
                img.set_pixel(x, y, (y * 6 + x) as f32);
            }
        }
        img.set_pixel(2, 2, NO_DATA);

        let out = psf.convolve(&img);
        for y in 0..5i64 {
            for x in 0..6i64 {
                if x == 2 && y == 2 {
                    assert!(!pixel_has_data(out.get_pixel(x, y)));
                } else {
                    assert_eq!(out.get_pixel(x, y), img.get_pixel(x, y));
                }
            }
        }
    }

    #[test]
    fn test_convolve_renormalizes_at_border() {
        // A flat image stays flat under a normalized kernel, including the
        // borders where part of the kernel falls outside.
        let psf = Psf::gaussian(1.0).unwrap();
        let img = RawImage::from_elem(10, 10, 3.5);
        let out = psf.convolve(&img);
        for y in 0..10i64 {
            for x in 0..10i64 {
                assert_abs_diff_eq!(out.get_pixel(x, y), 3.5, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_convolve_renormalizes_around_masked() {
        let psf = Psf::gaussian(1.0).unwrap();
        let mut img = RawImage::from_elem(10, 10, 2.0);
        img.set_pixel(4, 4, NO_DATA);
        let out = psf.convolve(&img);
        // The masked pixel has no support of its own...
        assert!(!pixel_has_data(out.get_pixel(4, 4)));
        // ...but neighbors renormalize back to the flat value.
        assert_abs_diff_eq!(out.get_pixel(5, 4), 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_convolve_all_masked_is_no_data() {
        let psf = Psf::gaussian(0.5).unwrap();
        let img = RawImage::from_elem(4, 4, NO_DATA);
        let out = psf.convolve(&img);
        assert!(out.data().iter().all(|&v| !pixel_has_data(v)));
    }
}
