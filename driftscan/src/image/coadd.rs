//! Per-pixel reductions across a vector of equal-shape images.
//!
//! These back the stamp coadds: median and mean skip [`NO_DATA`] samples and
//! yield [`NO_DATA`] where every sample is masked; the sum treats masked
//! samples as zero. An empty input reduces to a 1x1 [`NO_DATA`] image.

use crate::image::raw::{pixel_has_data, RawImage, NO_DATA};

fn assert_same_shape(images: &[RawImage]) {
    let width = images[0].width();
    let height = images[0].height();
    for img in images {
        assert!(
            img.width() == width && img.height() == height,
            "coadd inputs must share shape: expected {}x{}, got {}x{}",
            width,
            height,
            img.width(),
            img.height(),
        );
    }
}

/// Per-pixel median across a vector of images. Even-count medians average
/// the two middle unmasked values.
pub fn create_median_image(images: &[RawImage]) -> RawImage {
    if images.is_empty() {
        return RawImage::from_elem(1, 1, NO_DATA);
    }
    assert_same_shape(images);

    let width = images[0].width();
    let height = images[0].height();
    let mut out = RawImage::new(width, height);
    let mut samples = Vec::with_capacity(images.len());
    for y in 0..height {
        for x in 0..width {
            samples.clear();
            for img in images {
                let v = img.data()[[y, x]];
                if pixel_has_data(v) {
                    samples.push(v);
                }
            }
            let value = if samples.is_empty() {
                NO_DATA
            } else {
                samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let mid = samples.len() / 2;
                if samples.len() % 2 == 0 {
                    (samples[mid - 1] + samples[mid]) / 2.0
                } else {
                    samples[mid]
                }
            };
            out.set_pixel(x, y, value);
        }
    }
    out
}

/// Per-pixel mean of unmasked samples across a vector of images.
pub fn create_mean_image(images: &[RawImage]) -> RawImage {
    if images.is_empty() {
        return RawImage::from_elem(1, 1, NO_DATA);
    }
    assert_same_shape(images);

    let width = images[0].width();
    let height = images[0].height();
    let mut out = RawImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let mut total = 0.0f32;
            let mut count = 0usize;
            for img in images {
                let v = img.data()[[y, x]];
                if pixel_has_data(v) {
                    total += v;
                    count += 1;
                }
            }
            let value = if count == 0 { NO_DATA } else { total / count as f32 };
            out.set_pixel(x, y, value);
        }
    }
    out
}

/// Per-pixel sum across a vector of images, counting masked samples as zero.
pub fn create_summed_image(images: &[RawImage]) -> RawImage {
    if images.is_empty() {
        return RawImage::from_elem(1, 1, NO_DATA);
    }
    assert_same_shape(images);

    let width = images[0].width();
    let height = images[0].height();
    let mut out = RawImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let mut total = 0.0f32;
            for img in images {
                let v = img.data()[[y, x]];
                if pixel_has_data(v) {
                    total += v;
                }
            }
            out.set_pixel(x, y, total);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_with(values: &[(usize, usize, f32)], width: usize, height: usize) -> RawImage {
        let mut img = RawImage::new(width, height);
        for &(x, y, v) in values {
            img.set_pixel(x, y, v);
        }
        img
    }

    #[test]
    fn test_empty_inputs() {
        let reductions: [fn(&[RawImage]) -> RawImage; 3] =
            [create_median_image, create_mean_image, create_summed_image];
        for coadd in reductions {
            let out = coadd(&[]);
            assert_eq!(out.width(), 1);
            assert_eq!(out.height(), 1);
            assert!(!pixel_has_data(out.get_pixel(0, 0)));
        }
    }

    #[test]
    fn test_median_skips_no_data() {
        let imgs = vec![
            image_with(&[(0, 0, 1.0)], 2, 2),
            image_with(&[(0, 0, NO_DATA)], 2, 2),
            image_with(&[(0, 0, 5.0)], 2, 2),
        ];
        let out = create_median_image(&imgs);
        // Two unmasked samples average.
        assert_eq!(out.get_pixel(0, 0), 3.0);
        assert_eq!(out.get_pixel(1, 1), 0.0);
    }

    #[test]
    fn test_median_odd_count() {
        let imgs = vec![
            RawImage::from_elem(2, 2, 7.0),
            RawImage::from_elem(2, 2, 1.0),
            RawImage::from_elem(2, 2, 4.0),
        ];
        let out = create_median_image(&imgs);
        assert_eq!(out.get_pixel(0, 0), 4.0);
    }

    #[test]
    fn test_median_all_masked_pixel() {
        let imgs = vec![
            image_with(&[(1, 0, NO_DATA)], 2, 1),
            image_with(&[(1, 0, NO_DATA)], 2, 1),
        ];
        let out = create_median_image(&imgs);
        assert!(!pixel_has_data(out.get_pixel(1, 0)));
        assert_eq!(out.get_pixel(0, 0), 0.0);
    }

    #[test]
    fn test_mean_skips_no_data() {
        let imgs = vec![
            image_with(&[(0, 0, 2.0)], 2, 1),
            image_with(&[(0, 0, NO_DATA)], 2, 1),
            image_with(&[(0, 0, 7.0)], 2, 1),
        ];
        let out = create_mean_image(&imgs);
        assert_eq!(out.get_pixel(0, 0), 4.5);
    }

    #[test]
    fn test_sum_treats_no_data_as_zero() {
        let imgs = vec![
            image_with(&[(0, 0, 2.0)], 2, 1),
            image_with(&[(0, 0, NO_DATA)], 2, 1),
            image_with(&[(0, 0, 7.0)], 2, 1),
        ];
        let out = create_summed_image(&imgs);
        assert_eq!(out.get_pixel(0, 0), 9.0);
        // All-masked pixels sum to zero, not NO_DATA.
        let masked = vec![RawImage::from_elem(1, 1, NO_DATA)];
        assert_eq!(create_summed_image(&masked).get_pixel(0, 0), 0.0);
    }

    #[test]
    #[should_panic(expected = "coadd inputs must share shape")]
    fn test_shape_mismatch_panics() {
        let imgs = vec![RawImage::new(2, 2), RawImage::new(3, 2)];
        create_summed_image(&imgs);
    }

    #[test]
    fn test_identical_stamps_median_is_identity() {
        let mut img = RawImage::new(3, 3);
        img.set_pixel(1, 1, 4.0);
        img.set_pixel(2, 0, NO_DATA);
        let imgs = vec![img.clone(), img.clone(), img.clone()];
        let out = create_median_image(&imgs);
        assert_eq!(out.get_pixel(1, 1), 4.0);
        assert_eq!(out.get_pixel(0, 0), 0.0);
        assert!(!pixel_has_data(out.get_pixel(2, 0)));
    }
}
