//! The trajectory grid search over an image stack.
//!
//! [`StackSearch`] drives the whole pipeline against a borrowed
//! [`ImageStack`]: it derives the per-image psi/phi statistics, packs them
//! into a [`PsiPhiArray`], runs the parallel grid evaluation and holds the
//! ranked results.
//!
//! # Lifecycle
//!
//! ```text
//!            prepare_psi_phi              search
//!   Fresh ─────────────────► Ready ─────────────────► HasResults
//!     ▲                        ▲                          │
//!     │   clear_psi_phi /      │   clear_results /        │
//!     └── new encodings        └── new parameters ────────┘
//! ```
//!
//! `prepare_psi_phi` is idempotent and `search` invokes it implicitly when
//! needed, so a fresh search object can run immediately.

mod engine;
pub mod sigma_g;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::image::pixel_has_data;
use crate::psi_phi::{Encoding, PsiPhiArray};
use crate::stack::ImageStack;
use crate::trajectory::{compare_trajectories, Trajectory, TrajectoryGrid};
use rayon::prelude::*;

pub use sigma_g::{SigmaGClip, DEFAULT_SIGMAG_COEFF};

/// Knobs controlling one grid search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchParameters {
    /// Minimum surviving observations for a candidate to be reported.
    pub min_observations: i16,
    /// Minimum likelihood for a candidate to be reported.
    pub min_lh: f32,
    /// Whether to clip outlier observations per candidate.
    pub do_sigmag_filter: bool,
    /// Lower sigma-G percentile in [0, 100].
    pub sgl_l: f32,
    /// Upper sigma-G percentile in [0, 100].
    pub sgl_h: f32,
    /// Sigma-G spread normalization coefficient.
    pub sigmag_coeff: f32,
    /// Storage width of the packed psi plane.
    pub psi_encoding: Encoding,
    /// Storage width of the packed phi plane.
    pub phi_encoding: Encoding,
    /// Search rectangle: start pixels span `[x_start_min, x_start_max)`.
    pub x_start_min: i32,
    pub x_start_max: i32,
    /// Start pixels span `[y_start_min, y_start_max)`.
    pub y_start_min: i32,
    pub y_start_max: i32,
    /// Best candidates retained per start pixel.
    pub results_per_pixel: usize,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            min_observations: 0,
            min_lh: 0.0,
            do_sigmag_filter: false,
            sgl_l: 25.0,
            sgl_h: 75.0,
            sigmag_coeff: DEFAULT_SIGMAG_COEFF,
            psi_encoding: Encoding::Float,
            phi_encoding: Encoding::Float,
            x_start_min: 0,
            x_start_max: 0,
            y_start_min: 0,
            y_start_max: 0,
            results_per_pixel: 8,
        }
    }
}

/// Lifecycle position of a [`StackSearch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    /// No psi/phi statistics derived yet.
    Fresh,
    /// Statistics cached, no results held.
    Ready,
    /// A search has completed and its results are held.
    HasResults,
}

/// The grid-search driver. Borrows the stack immutably for its lifetime; the
/// caller owns the stack and may run stamp extraction against it
/// concurrently with result inspection.
pub struct StackSearch<'a> {
    stack: &'a ImageStack,
    params: SearchParameters,
    state: SearchState,
    psi_phi: Option<PsiPhiArray>,
    results: Vec<Trajectory>,
}

impl<'a> StackSearch<'a> {
    /// New search over a stack, defaulting the search rectangle to the full
    /// image footprint.
    pub fn new(stack: &'a ImageStack) -> Self {
        let params = SearchParameters {
            x_start_max: stack.width() as i32,
            y_start_max: stack.height() as i32,
            ..Default::default()
        };
        Self {
            stack,
            params,
            state: SearchState::Fresh,
            psi_phi: None,
            results: Vec::new(),
        }
    }

    pub fn stack(&self) -> &ImageStack {
        self.stack
    }

    pub fn num_images(&self) -> usize {
        self.stack.img_count()
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn parameters(&self) -> &SearchParameters {
        &self.params
    }

    /// Replace the search parameters. Results are dropped; cached psi/phi
    /// statistics are kept unless the encodings changed.
    pub fn set_parameters(&mut self, params: SearchParameters) {
        let encodings_changed = self.psi_phi.as_ref().is_some_and(|arr| {
            arr.psi_encoding() != params.psi_encoding || arr.phi_encoding() != params.phi_encoding
        });
        self.params = params;
        self.results.clear();
        if encodings_changed {
            self.psi_phi = None;
        }
        self.state = if self.psi_phi.is_some() {
            SearchState::Ready
        } else {
            SearchState::Fresh
        };
    }

    pub fn set_min_obs(&mut self, min_observations: i16) {
        self.params.min_observations = min_observations;
    }

    pub fn set_min_lh(&mut self, min_lh: f32) {
        self.params.min_lh = min_lh;
    }

    /// Enable sigma-G clipping with the given percentile bounds and
    /// normalization coefficient.
    pub fn enable_sigmag_filter(
        &mut self,
        low_pct: f32,
        high_pct: f32,
        coeff: f32,
    ) -> Result<(), SearchError> {
        // Validate eagerly so a bad configuration fails here, not mid-search.
        SigmaGClip::new(low_pct, high_pct, coeff)?;
        self.params.do_sigmag_filter = true;
        self.params.sgl_l = low_pct;
        self.params.sgl_h = high_pct;
        self.params.sigmag_coeff = coeff;
        Ok(())
    }

    pub fn set_start_bounds_x(&mut self, x_min: i32, x_max: i32) {
        self.params.x_start_min = x_min;
        self.params.x_start_max = x_max;
    }

    pub fn set_start_bounds_y(&mut self, y_min: i32, y_max: i32) {
        self.params.y_start_min = y_min;
        self.params.y_start_max = y_max;
    }

    /// Select the storage widths for the packed statistics (1, 2 or 4
    /// bytes per channel). Invalidates any cached array built with other
    /// widths.
    pub fn enable_encoding(
        &mut self,
        psi_num_bytes: u32,
        phi_num_bytes: u32,
    ) -> Result<(), SearchError> {
        let psi_encoding = Encoding::from_num_bytes(psi_num_bytes)?;
        let phi_encoding = Encoding::from_num_bytes(phi_num_bytes)?;
        let mut params = self.params;
        params.psi_encoding = psi_encoding;
        params.phi_encoding = phi_encoding;
        self.set_parameters(params);
        Ok(())
    }

    /// Derive and cache the packed psi/phi statistics. Idempotent: a second
    /// call with unchanged encodings reuses the cached array.
    pub fn prepare_psi_phi(&mut self) -> Result<(), SearchError> {
        if self.psi_phi.is_none() {
            log::debug!(
                "deriving psi/phi statistics for {} images of {}x{}",
                self.stack.img_count(),
                self.stack.width(),
                self.stack.height(),
            );
            let psi_images = self.stack.generate_psi_images();
            let phi_images = self.stack.generate_phi_images();
            let times = self.stack.build_zeroed_times();
            self.psi_phi = Some(PsiPhiArray::from_images(
                &psi_images,
                &phi_images,
                &times,
                self.params.psi_encoding,
                self.params.phi_encoding,
            )?);
            if self.state == SearchState::Fresh {
                self.state = SearchState::Ready;
            }
        }
        Ok(())
    }

    /// Drop the cached statistics, returning to the fresh state.
    pub fn clear_psi_phi(&mut self) {
        self.psi_phi = None;
        self.results.clear();
        self.state = SearchState::Fresh;
    }

    /// The cached packed statistics, if derived.
    pub fn psi_phi_array(&self) -> Option<&PsiPhiArray> {
        self.psi_phi.as_ref()
    }

    fn sigma_g_clip(&self) -> Result<Option<SigmaGClip>, SearchError> {
        if self.params.do_sigmag_filter {
            Ok(Some(SigmaGClip::new(
                self.params.sgl_l,
                self.params.sgl_h,
                self.params.sigmag_coeff,
            )?))
        } else {
            Ok(None)
        }
    }

    /// Run the grid search and rank the results.
    ///
    /// Every velocity in the grid is evaluated at every start pixel in the
    /// search rectangle; the per-pixel top-K survivors are concatenated and
    /// sorted best-first. An empty rectangle or grid yields zero results.
    pub fn search(&mut self, grid: &TrajectoryGrid) -> Result<(), SearchError> {
        self.prepare_psi_phi()?;
        let clip = self.sigma_g_clip()?;
        let velocities = grid.velocities();
        log::debug!(
            "searching x=[{}, {}) y=[{}, {}) with {} velocities",
            self.params.x_start_min,
            self.params.x_start_max,
            self.params.y_start_min,
            self.params.y_start_max,
            velocities.len(),
        );

        let arr = self.psi_phi.as_ref().expect("psi/phi prepared above");
        self.results = engine::grid_search(arr, &velocities, &self.params, clip.as_ref());
        self.results.par_sort_by(compare_trajectories);
        log::debug!("search produced {} candidates", self.results.len());
        self.state = SearchState::HasResults;
        Ok(())
    }

    /// All held results, best first.
    pub fn results(&self) -> &[Trajectory] {
        &self.results
    }

    /// A copied slice of the results, clamped to the available range.
    pub fn get_results(&self, start: usize, count: usize) -> Vec<Trajectory> {
        let end = start.saturating_add(count).min(self.results.len());
        let start = start.min(self.results.len());
        self.results[start..end].to_vec()
    }

    /// Inject results directly (testing hook for downstream consumers).
    pub fn set_results(&mut self, results: Vec<Trajectory>) {
        self.results = results;
        self.state = SearchState::HasResults;
    }

    /// Drop held results, keeping the cached statistics.
    pub fn clear_results(&mut self) {
        self.results.clear();
        if self.state == SearchState::HasResults {
            self.state = SearchState::Ready;
        }
    }

    /// Evaluate one explicit candidate, filling in its statistics. The
    /// reporting thresholds are not applied.
    pub fn evaluate_single_trajectory(
        &mut self,
        trajectory: &mut Trajectory,
    ) -> Result<(), SearchError> {
        self.prepare_psi_phi()?;
        let clip = self.sigma_g_clip()?;
        let arr = self.psi_phi.as_ref().expect("psi/phi prepared above");
        *trajectory = engine::evaluate_single(
            arr,
            trajectory.x as i32,
            trajectory.y as i32,
            trajectory.vx,
            trajectory.vy,
            clip.as_ref(),
        );
        Ok(())
    }

    /// Evaluate the linear trajectory starting at `(x, y)` with velocity
    /// `(vx, vy)`.
    pub fn search_linear_trajectory(
        &mut self,
        x: i16,
        y: i16,
        vx: f32,
        vy: f32,
    ) -> Result<Trajectory, SearchError> {
        let mut trajectory = Trajectory::new(x, y, vx, vy);
        self.evaluate_single_trajectory(&mut trajectory)?;
        Ok(trajectory)
    }

    fn extract_curve(
        &mut self,
        trajectory: &Trajectory,
        extract: impl Fn(f32, f32) -> f32,
    ) -> Result<Vec<f32>, SearchError> {
        self.prepare_psi_phi()?;
        let arr = self.psi_phi.as_ref().expect("psi/phi prepared above");
        let mut curve = Vec::with_capacity(arr.num_times());
        for (time, &t) in arr.zeroed_times().iter().enumerate() {
            let (px, py) = trajectory.predicted_pixel(t);
            let value = if arr.contains(px, py) {
                let pair = arr.read(time, px as usize, py as usize);
                extract(pair.psi, pair.phi)
            } else {
                0.0
            };
            curve.push(value);
        }
        Ok(curve)
    }

    /// Per-time psi contributions along a trajectory; masked or out-of-bounds
    /// samples contribute zero, matching the sums the kernel reports.
    pub fn psi_curve(&mut self, trajectory: &Trajectory) -> Result<Vec<f32>, SearchError> {
        self.extract_curve(trajectory, |psi, _| if pixel_has_data(psi) { psi } else { 0.0 })
    }

    /// Per-time phi contributions along a trajectory.
    pub fn phi_curve(&mut self, trajectory: &Trajectory) -> Result<Vec<f32>, SearchError> {
        self.extract_curve(trajectory, |_, phi| if pixel_has_data(phi) { phi } else { 0.0 })
    }

    /// Per-time likelihood contributions `psi / sqrt(phi)` along a
    /// trajectory; invalid observations contribute zero.
    pub fn likelihood_curve(&mut self, trajectory: &Trajectory) -> Result<Vec<f32>, SearchError> {
        self.extract_curve(trajectory, |psi, phi| {
            if pixel_has_data(psi) && pixel_has_data(phi) && phi > 0.0 {
                psi / phi.sqrt()
            } else {
                0.0
            }
        })
    }
}
