//! The serializable configuration surface consumed by the engine.
//!
//! Callers describe a run with [`SearchConfiguration`] (typically
//! deserialized from the survey pipeline's configuration store) and convert
//! it into concrete [`SearchParameters`], a [`TrajectoryGrid`] and
//! [`StampParameters`]. The angle grid is expressed as offsets around an
//! externally supplied reference angle (commonly the local ecliptic), which
//! this crate never derives itself.

use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::psi_phi::Encoding;
use crate::search::{SearchParameters, SigmaGClip, DEFAULT_SIGMAG_COEFF};
use crate::stack::ImageStack;
use crate::stamps::{StampParameters, StampType};
use crate::trajectory::TrajectoryGrid;

/// Run-level configuration with the survey defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfiguration {
    /// Velocity axis of the grid: `(v_min, v_max, v_steps)` in pixels/day.
    pub v_arr: (f32, f32, usize),
    /// Angle axis of the grid as offsets `(below, above, steps)` in radians
    /// around the reference angle.
    pub ang_arr: (f32, f32, usize),
    /// Minimum surviving observations for a reported trajectory.
    pub num_obs: i16,
    /// Minimum reported likelihood.
    pub lh_level: f32,
    /// Sigma-G percentile bounds in [0, 100].
    pub sigmag_lims: (f32, f32),
    /// Whether the sigma-G clip runs inside the search kernel.
    pub gpu_filter: bool,
    /// Coadd reduction for stamps.
    pub stamp_type: StampType,
    /// Stamp radius in pixels.
    pub stamp_radius: usize,
    /// Whether coadds are screened by the quality filters.
    pub do_stamp_filter: bool,
    /// Largest tolerated peak offset from the stamp center, per axis.
    pub peak_offset: (f32, f32),
    /// Moment limits `(m01, m10, m11, m02, m20)`.
    pub mom_lims: (f32, f32, f32, f32, f32),
    /// Smallest tolerated central-flux fraction; non-positive disables.
    pub center_thresh: f32,
    /// Storage width for both packed statistic planes: 1, 2 or 4 bytes.
    pub encode_num_bytes: u32,
    /// Optional search-rectangle overrides; `None` spans the full image.
    pub x_start_min: Option<i32>,
    pub x_start_max: Option<i32>,
    pub y_start_min: Option<i32>,
    pub y_start_max: Option<i32>,
    /// Best candidates retained per start pixel.
    pub results_per_pixel: usize,
}

impl Default for SearchConfiguration {
    fn default() -> Self {
        Self {
            v_arr: (0.0, 20.0, 21),
            ang_arr: (0.5, 0.5, 11),
            num_obs: 7,
            lh_level: 10.0,
            sigmag_lims: (25.0, 75.0),
            gpu_filter: false,
            stamp_type: StampType::Sum,
            stamp_radius: 10,
            do_stamp_filter: true,
            peak_offset: (2.0, 2.0),
            mom_lims: (35.5, 35.5, 2.0, 0.3, 0.3),
            center_thresh: 0.0,
            encode_num_bytes: 4,
            x_start_min: None,
            x_start_max: None,
            y_start_min: None,
            y_start_max: None,
            results_per_pixel: 8,
        }
    }
}

impl SearchConfiguration {
    /// Concrete search parameters for a stack, validating the sigma-G and
    /// encoding knobs. Unset rectangle bounds default to the image footprint.
    pub fn search_parameters(&self, stack: &ImageStack) -> Result<SearchParameters, SearchError> {
        SigmaGClip::new(self.sigmag_lims.0, self.sigmag_lims.1, DEFAULT_SIGMAG_COEFF)?;
        let encoding = Encoding::from_num_bytes(self.encode_num_bytes)?;

        Ok(SearchParameters {
            min_observations: self.num_obs,
            min_lh: self.lh_level,
            do_sigmag_filter: self.gpu_filter,
            sgl_l: self.sigmag_lims.0,
            sgl_h: self.sigmag_lims.1,
            sigmag_coeff: DEFAULT_SIGMAG_COEFF,
            psi_encoding: encoding,
            phi_encoding: encoding,
            x_start_min: self.x_start_min.unwrap_or(0),
            x_start_max: self.x_start_max.unwrap_or(stack.width() as i32),
            y_start_min: self.y_start_min.unwrap_or(0),
            y_start_max: self.y_start_max.unwrap_or(stack.height() as i32),
            results_per_pixel: self.results_per_pixel,
        })
    }

    /// The velocity grid centered on a caller-supplied reference angle
    /// (radians): angles span `[reference - below, reference + above]`.
    pub fn trajectory_grid(&self, reference_angle: f32) -> TrajectoryGrid {
        TrajectoryGrid::new(
            self.ang_arr.2,
            self.v_arr.2,
            reference_angle - self.ang_arr.0,
            reference_angle + self.ang_arr.1,
            self.v_arr.0,
            self.v_arr.1,
        )
    }

    /// Stamp-building parameters.
    pub fn stamp_parameters(&self) -> StampParameters {
        StampParameters {
            radius: self.stamp_radius,
            stamp_type: self.stamp_type,
            do_filtering: self.do_stamp_filter,
            peak_offset_x: self.peak_offset.0,
            peak_offset_y: self.peak_offset.1,
            center_thresh: self.center_thresh,
            m01_limit: self.mom_lims.0,
            m10_limit: self.mom_lims.1,
            m11_limit: self.mom_lims.2,
            m02_limit: self.mom_lims.3,
            m20_limit: self.mom_lims.4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Psf, RawImage};
    use crate::stack::LayeredImage;
    use approx::assert_abs_diff_eq;

    fn small_stack() -> ImageStack {
        let images = (0..3)
            .map(|i| {
                LayeredImage::new(
                    RawImage::new(30, 20),
                    RawImage::from_elem(30, 20, 1.0),
                    RawImage::new(30, 20),
                    i as f64,
                    Psf::gaussian(1.0).unwrap(),
                )
                .unwrap()
            })
            .collect();
        ImageStack::new(images).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = SearchConfiguration::default();
        assert_eq!(config.v_arr, (0.0, 20.0, 21));
        assert_eq!(config.ang_arr, (0.5, 0.5, 11));
        assert_eq!(config.num_obs, 7);
        assert_abs_diff_eq!(config.lh_level, 10.0);
        assert_eq!(config.sigmag_lims, (25.0, 75.0));
        assert_eq!(config.encode_num_bytes, 4);
    }

    #[test]
    fn test_search_parameters_from_stack() {
        let stack = small_stack();
        let params = SearchConfiguration::default()
            .search_parameters(&stack)
            .unwrap();
        assert_eq!(params.min_observations, 7);
        assert_abs_diff_eq!(params.min_lh, 10.0);
        assert_eq!(params.x_start_min, 0);
        assert_eq!(params.x_start_max, 30);
        assert_eq!(params.y_start_max, 20);
        assert_eq!(params.psi_encoding, Encoding::Float);
    }

    #[test]
    fn test_bounds_override() {
        let stack = small_stack();
        let config = SearchConfiguration {
            x_start_min: Some(5),
            x_start_max: Some(12),
            ..Default::default()
        };
        let params = config.search_parameters(&stack).unwrap();
        assert_eq!(params.x_start_min, 5);
        assert_eq!(params.x_start_max, 12);
        assert_eq!(params.y_start_max, 20);
    }

    #[test]
    fn test_invalid_knobs_rejected() {
        let stack = small_stack();
        let bad_encoding = SearchConfiguration {
            encode_num_bytes: 3,
            ..Default::default()
        };
        assert!(bad_encoding.search_parameters(&stack).is_err());

        let bad_percentiles = SearchConfiguration {
            sigmag_lims: (80.0, 20.0),
            ..Default::default()
        };
        assert!(bad_percentiles.search_parameters(&stack).is_err());
    }

    #[test]
    fn test_grid_centered_on_reference_angle() {
        let config = SearchConfiguration::default();
        let grid = config.trajectory_grid(1.2);
        assert_abs_diff_eq!(grid.min_angle, 0.7, epsilon = 1e-6);
        assert_abs_diff_eq!(grid.max_angle, 1.7, epsilon = 1e-6);
        assert_eq!(grid.angle_steps, 11);
        assert_eq!(grid.velocity_steps, 21);
        assert_abs_diff_eq!(grid.max_velocity, 20.0);
    }

    #[test]
    fn test_json_round_trip() {
        let config = SearchConfiguration {
            num_obs: 9,
            stamp_type: StampType::Median,
            encode_num_bytes: 2,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SearchConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let back: SearchConfiguration = serde_json::from_str(r#"{"num_obs": 5}"#).unwrap();
        assert_eq!(back.num_obs, 5);
        assert_abs_diff_eq!(back.lh_level, 10.0);
    }

    #[test]
    fn test_stamp_parameters_mapping() {
        let config = SearchConfiguration {
            stamp_radius: 5,
            stamp_type: StampType::Mean,
            center_thresh: 0.03,
            ..Default::default()
        };
        let params = config.stamp_parameters();
        assert_eq!(params.radius, 5);
        assert_eq!(params.stamp_type, StampType::Mean);
        assert_abs_diff_eq!(params.center_thresh, 0.03);
        assert_abs_diff_eq!(params.m11_limit, 2.0);
    }
}
