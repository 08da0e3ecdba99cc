//! Packed, optionally quantized psi/phi statistics for the search kernel.
//!
//! The grid search reads two values per (time, pixel) lookup: the psi and phi
//! sufficient statistics. This module lays both out as contiguous planes
//! addressed `time * width * height + y * width + x`, with an optional
//! per-image affine quantization to one or two bytes per value. Quantized
//! values are decoded on the fly during the search.

use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::image::{pixel_has_data, RawImage, NO_DATA};

/// One decoded (psi, phi) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsiPhi {
    pub psi: f32,
    pub phi: f32,
}

/// Storage width of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Raw f32 values with the NaN sentinel.
    Float,
    /// One byte per value.
    U8,
    /// Two bytes per value.
    U16,
}

impl Encoding {
    /// Map a byte-width knob (1, 2 or 4) to an encoding.
    pub fn from_num_bytes(num_bytes: u32) -> Result<Self, SearchError> {
        match num_bytes {
            1 => Ok(Encoding::U8),
            2 => Ok(Encoding::U16),
            4 => Ok(Encoding::Float),
            other => Err(SearchError::InvalidEncoding(other)),
        }
    }

    /// Bytes per stored value.
    pub fn block_size(&self) -> usize {
        match self {
            Encoding::Float => 4,
            Encoding::U8 => 1,
            Encoding::U16 => 2,
        }
    }

    /// Largest regular code; the all-ones code above it is reserved for
    /// [`NO_DATA`].
    fn max_code(&self) -> u32 {
        match self {
            Encoding::Float => 0,
            Encoding::U8 => u8::MAX as u32 - 1,
            Encoding::U16 => u16::MAX as u32 - 1,
        }
    }

    fn no_data_code(&self) -> u32 {
        match self {
            Encoding::Float => 0,
            Encoding::U8 => u8::MAX as u32,
            Encoding::U16 => u16::MAX as u32,
        }
    }
}

/// Per-image affine quantization parameters for one plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleParams {
    pub min_val: f32,
    pub max_val: f32,
    pub scale: f32,
}

/// Quantization parameters for one image under the given encoding.
///
/// The value range is widened to at least 1e-6 so the scale never collapses;
/// an all-masked image quantizes around zero (every pixel encodes to the
/// reserved code anyway).
pub fn compute_scale_params(image: &RawImage, encoding: Encoding) -> ScaleParams {
    let (min_val, max_val) = image.compute_bounds().unwrap_or((0.0, 0.0));
    let width = (max_val - min_val).max(1e-6);
    let scale = match encoding {
        Encoding::Float => 1.0,
        _ => width / encoding.max_code() as f32,
    };
    ScaleParams {
        min_val,
        max_val,
        scale,
    }
}

/// Encode one value to its integer code. [`NO_DATA`] maps to the reserved
/// all-ones code; everything else is affine-mapped and clamped.
pub fn encode_scalar(value: f32, params: &ScaleParams, encoding: Encoding) -> u32 {
    if !pixel_has_data(value) {
        return encoding.no_data_code();
    }
    let code = ((value - params.min_val) / params.scale).round();
    (code.max(0.0) as u32).min(encoding.max_code())
}

/// Decode one integer code back to a float, the inverse affine map.
pub fn decode_scalar(code: u32, params: &ScaleParams, encoding: Encoding) -> f32 {
    if code == encoding.no_data_code() {
        NO_DATA
    } else {
        params.min_val + code as f32 * params.scale
    }
}

/// One packed plane (all times) in its storage representation.
#[derive(Debug, Clone)]
enum Plane {
    Float(Vec<f32>),
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl Plane {
    fn encode(images: &[RawImage], encoding: Encoding, params: &[ScaleParams]) -> Plane {
        match encoding {
            Encoding::Float => Plane::Float(
                images
                    .iter()
                    .flat_map(|img| img.data().iter().copied())
                    .collect(),
            ),
            Encoding::U8 => {
                let mut data = Vec::with_capacity(images.len() * images[0].npixels());
                for (img, p) in images.iter().zip(params) {
                    data.extend(
                        img.data()
                            .iter()
                            .map(|&v| encode_scalar(v, p, encoding) as u8),
                    );
                }
                Plane::U8(data)
            }
            Encoding::U16 => {
                let mut data = Vec::with_capacity(images.len() * images[0].npixels());
                for (img, p) in images.iter().zip(params) {
                    data.extend(
                        img.data()
                            .iter()
                            .map(|&v| encode_scalar(v, p, encoding) as u16),
                    );
                }
                Plane::U16(data)
            }
        }
    }

    #[inline]
    fn read(&self, index: usize, time: usize, params: &[ScaleParams]) -> f32 {
        match self {
            Plane::Float(data) => data[index],
            Plane::U8(data) => decode_scalar(data[index] as u32, &params[time], Encoding::U8),
            Plane::U16(data) => decode_scalar(data[index] as u32, &params[time], Encoding::U16),
        }
    }

    fn len(&self) -> usize {
        match self {
            Plane::Float(data) => data.len(),
            Plane::U8(data) => data.len(),
            Plane::U16(data) => data.len(),
        }
    }
}

/// The packed psi/phi statistics for a whole stack, plus the zeroed times.
///
/// Built once per stack and cached by the search; the host buffer is the
/// authoritative copy. Psi and phi planes may carry different encodings.
#[derive(Debug, Clone)]
pub struct PsiPhiArray {
    num_times: usize,
    width: usize,
    height: usize,
    psi_encoding: Encoding,
    phi_encoding: Encoding,
    psi_plane: Plane,
    phi_plane: Plane,
    psi_params: Vec<ScaleParams>,
    phi_params: Vec<ScaleParams>,
    zeroed_times: Vec<f32>,
}

impl PsiPhiArray {
    /// Pack per-time psi and phi images and zeroed times into one array.
    pub fn from_images(
        psi_images: &[RawImage],
        phi_images: &[RawImage],
        zeroed_times: &[f64],
        psi_encoding: Encoding,
        phi_encoding: Encoding,
    ) -> Result<Self, SearchError> {
        if psi_images.is_empty() {
            return Err(SearchError::EmptyStack);
        }
        if psi_images.len() != phi_images.len() || psi_images.len() != zeroed_times.len() {
            return Err(SearchError::InvalidInput(format!(
                "psi/phi/time counts disagree: {} / {} / {}",
                psi_images.len(),
                phi_images.len(),
                zeroed_times.len()
            )));
        }
        let width = psi_images[0].width();
        let height = psi_images[0].height();
        for img in psi_images.iter().chain(phi_images.iter()) {
            if img.width() != width || img.height() != height {
                return Err(SearchError::DimensionMismatch {
                    expected_width: width,
                    expected_height: height,
                    width: img.width(),
                    height: img.height(),
                });
            }
        }

        let psi_params: Vec<ScaleParams> = psi_images
            .iter()
            .map(|img| compute_scale_params(img, psi_encoding))
            .collect();
        let phi_params: Vec<ScaleParams> = phi_images
            .iter()
            .map(|img| compute_scale_params(img, phi_encoding))
            .collect();

        Ok(Self {
            num_times: psi_images.len(),
            width,
            height,
            psi_encoding,
            phi_encoding,
            psi_plane: Plane::encode(psi_images, psi_encoding, &psi_params),
            phi_plane: Plane::encode(phi_images, phi_encoding, &phi_params),
            psi_params,
            phi_params,
            zeroed_times: zeroed_times.iter().map(|&t| t as f32).collect(),
        })
    }

    pub fn num_times(&self) -> usize {
        self.num_times
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels_per_image(&self) -> usize {
        self.width * self.height
    }

    /// Total stored values across both planes.
    pub fn num_entries(&self) -> usize {
        2 * self.pixels_per_image() * self.num_times
    }

    /// Total buffer footprint in bytes.
    pub fn total_array_size(&self) -> usize {
        self.psi_plane.len() * self.psi_encoding.block_size()
            + self.phi_plane.len() * self.phi_encoding.block_size()
    }

    pub fn psi_encoding(&self) -> Encoding {
        self.psi_encoding
    }

    pub fn phi_encoding(&self) -> Encoding {
        self.phi_encoding
    }

    pub fn psi_scale_params(&self) -> &[ScaleParams] {
        &self.psi_params
    }

    pub fn phi_scale_params(&self) -> &[ScaleParams] {
        &self.phi_params
    }

    pub fn zeroed_times(&self) -> &[f32] {
        &self.zeroed_times
    }

    /// Whether `(x, y)` falls inside the image footprint.
    #[inline]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    /// Decoded (psi, phi) at an in-bounds pixel of one time slice.
    #[inline]
    pub fn read(&self, time: usize, x: usize, y: usize) -> PsiPhi {
        debug_assert!(time < self.num_times && x < self.width && y < self.height);
        let index = time * self.pixels_per_image() + y * self.width + x;
        PsiPhi {
            psi: self.psi_plane.read(index, time, &self.psi_params),
            phi: self.phi_plane.read(index, time, &self.phi_params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp_image(width: usize, height: usize, offset: f32) -> RawImage {
        let mut img = RawImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                img.set_pixel(x, y, offset + (y * width + x) as f32);
            }
        }
        img
    }

    #[test]
    fn test_encoding_from_num_bytes() {
        assert_eq!(Encoding::from_num_bytes(1).unwrap(), Encoding::U8);
        assert_eq!(Encoding::from_num_bytes(2).unwrap(), Encoding::U16);
        assert_eq!(Encoding::from_num_bytes(4).unwrap(), Encoding::Float);
        assert!(Encoding::from_num_bytes(3).is_err());
        assert!(Encoding::from_num_bytes(0).is_err());
    }

    #[test]
    fn test_scale_params() {
        let img = ramp_image(4, 5, 0.0);
        let float_params = compute_scale_params(&img, Encoding::Float);
        assert_abs_diff_eq!(float_params.min_val, 0.0);
        assert_abs_diff_eq!(float_params.max_val, 19.0);
        assert_abs_diff_eq!(float_params.scale, 1.0);

        let u8_params = compute_scale_params(&img, Encoding::U8);
        assert_abs_diff_eq!(u8_params.scale, 19.0 / 254.0, epsilon = 1e-6);

        let u16_params = compute_scale_params(&img, Encoding::U16);
        assert_abs_diff_eq!(u16_params.scale, 19.0 / 65534.0, epsilon = 1e-9);
    }

    #[test]
    fn test_scale_params_constant_image() {
        let img = RawImage::from_elem(3, 3, 2.0);
        let params = compute_scale_params(&img, Encoding::U8);
        // Width floors at 1e-6 so the scale never divides by zero.
        assert!(params.scale > 0.0);
    }

    #[test]
    fn test_encode_decode_scalar() {
        let params = ScaleParams {
            min_val: 2.5,
            max_val: 10.0,
            scale: 3.0,
        };
        assert_eq!(encode_scalar(2.5, &params, Encoding::U8), 0);
        assert_eq!(encode_scalar(5.5, &params, Encoding::U8), 1);
        assert_abs_diff_eq!(decode_scalar(0, &params, Encoding::U8), 2.5);
        assert_abs_diff_eq!(decode_scalar(2, &params, Encoding::U8), 8.5);

        // Clamping at both ends of the code range.
        assert_eq!(encode_scalar(-100.0, &params, Encoding::U8), 0);
        assert_eq!(encode_scalar(1e6, &params, Encoding::U8), 254);

        // The all-ones code round-trips the sentinel.
        assert_eq!(encode_scalar(NO_DATA, &params, Encoding::U8), 255);
        assert!(!pixel_has_data(decode_scalar(255, &params, Encoding::U8)));
    }

    #[test]
    fn test_from_images_metadata() {
        let psi = vec![ramp_image(4, 5, 0.0), ramp_image(4, 5, 20.0)];
        let phi = vec![RawImage::from_elem(4, 5, 0.1), RawImage::from_elem(4, 5, 0.2)];
        let arr =
            PsiPhiArray::from_images(&psi, &phi, &[0.0, 1.0], Encoding::Float, Encoding::Float)
                .unwrap();
        assert_eq!(arr.num_times(), 2);
        assert_eq!(arr.width(), 4);
        assert_eq!(arr.height(), 5);
        assert_eq!(arr.pixels_per_image(), 20);
        assert_eq!(arr.num_entries(), 80);
        assert_eq!(arr.total_array_size(), 320);
        assert_eq!(arr.zeroed_times(), &[0.0, 1.0]);
    }

    #[test]
    fn test_read_round_trip_all_encodings() {
        let psi = vec![ramp_image(4, 5, 0.0), ramp_image(4, 5, 20.0)];
        let phi = vec![RawImage::from_elem(4, 5, 0.1), RawImage::from_elem(4, 5, 0.2)];

        for encoding in [Encoding::Float, Encoding::U16, Encoding::U8] {
            let arr =
                PsiPhiArray::from_images(&psi, &phi, &[0.0, 1.0], encoding, encoding).unwrap();
            let tolerance = match encoding {
                Encoding::Float => 1e-6,
                // Quantization error is bounded by the per-image scale.
                _ => arr.psi_scale_params()[1].scale.max(arr.phi_scale_params()[1].scale),
            };
            for time in 0..2 {
                for y in 0..5 {
                    for x in 0..4 {
                        let expected_psi = psi[time].data()[[y, x]];
                        let expected_phi = phi[time].data()[[y, x]];
                        let value = arr.read(time, x, y);
                        assert_abs_diff_eq!(value.psi, expected_psi, epsilon = tolerance);
                        assert_abs_diff_eq!(value.phi, expected_phi, epsilon = tolerance);
                    }
                }
            }
        }
    }

    #[test]
    fn test_no_data_survives_quantization() {
        let mut psi_img = ramp_image(3, 3, 0.0);
        psi_img.set_pixel(1, 1, NO_DATA);
        let phi_img = RawImage::from_elem(3, 3, 0.5);
        let arr = PsiPhiArray::from_images(
            &[psi_img],
            &[phi_img],
            &[0.0],
            Encoding::U8,
            Encoding::U16,
        )
        .unwrap();
        assert!(!pixel_has_data(arr.read(0, 1, 1).psi));
        assert!(pixel_has_data(arr.read(0, 1, 1).phi));
    }

    #[test]
    fn test_mismatched_inputs_rejected() {
        let psi = vec![ramp_image(3, 3, 0.0)];
        let phi = vec![RawImage::from_elem(3, 3, 0.5); 2];
        assert!(
            PsiPhiArray::from_images(&psi, &phi, &[0.0], Encoding::Float, Encoding::Float).is_err()
        );

        let phi_bad_shape = vec![RawImage::from_elem(4, 3, 0.5)];
        assert!(PsiPhiArray::from_images(
            &psi,
            &phi_bad_shape,
            &[0.0],
            Encoding::Float,
            Encoding::Float
        )
        .is_err());
    }
}
