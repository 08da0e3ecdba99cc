//! The grid-evaluation kernel.
//!
//! One unit of work is a (start pixel, velocity) pair: predict the pixel
//! position at every time slice, gather the psi/phi statistics (decoding
//! quantized storage on the fly), optionally clip outlier observations, and
//! reduce the survivors to a likelihood. Work is embarrassingly parallel: the
//! kernel fans rows of start pixels out across threads, keeps the best K
//! candidates per pixel in a thread-local buffer, and concatenates in pixel
//! order so identical inputs always produce identical output.

use rayon::prelude::*;

use crate::image::pixel_has_data;
use crate::psi_phi::PsiPhiArray;
use crate::search::sigma_g::SigmaGClip;
use crate::search::SearchParameters;
use crate::trajectory::{compare_trajectories, Trajectory};

/// Reusable per-thread gather buffers, sized to the stack depth once.
struct EvalScratch {
    psi: Vec<f32>,
    phi: Vec<f32>,
    lh: Vec<f32>,
}

impl EvalScratch {
    fn new(num_times: usize) -> Self {
        Self {
            psi: Vec::with_capacity(num_times),
            phi: Vec::with_capacity(num_times),
            lh: Vec::with_capacity(num_times),
        }
    }

    fn clear(&mut self) {
        self.psi.clear();
        self.phi.clear();
        self.lh.clear();
    }
}

/// Fixed-capacity best-candidates buffer ordered by [`compare_trajectories`].
struct TopK {
    capacity: usize,
    items: Vec<Trajectory>,
}

impl TopK {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Vec::with_capacity(capacity + 1),
        }
    }

    fn insert(&mut self, candidate: Trajectory) {
        if self.capacity == 0 {
            return;
        }
        let position = self
            .items
            .binary_search_by(|probe| compare_trajectories(probe, &candidate))
            .unwrap_or_else(|p| p);
        if position >= self.capacity {
            return;
        }
        self.items.insert(position, candidate);
        self.items.truncate(self.capacity);
    }

    fn into_vec(self) -> Vec<Trajectory> {
        self.items
    }
}

/// Evaluate one candidate trajectory against the packed statistics.
///
/// Returns the candidate with its surviving flux, likelihood and observation
/// count filled in; thresholds are the caller's concern. The likelihood is
/// always finite.
fn evaluate_candidate(
    arr: &PsiPhiArray,
    x: i32,
    y: i32,
    vx: f32,
    vy: f32,
    clip: Option<&SigmaGClip>,
    scratch: &mut EvalScratch,
) -> Trajectory {
    scratch.clear();

    for (time, &t) in arr.zeroed_times().iter().enumerate() {
        let px = ((x as f32 + vx * t) + 0.5).floor() as i64;
        let py = ((y as f32 + vy * t) + 0.5).floor() as i64;
        if !arr.contains(px, py) {
            continue;
        }
        let value = arr.read(time, px as usize, py as usize);
        if !pixel_has_data(value.psi) || !pixel_has_data(value.phi) || value.phi <= 0.0 {
            continue;
        }
        scratch.psi.push(value.psi);
        scratch.phi.push(value.phi);
        scratch.lh.push(value.psi / value.phi.sqrt());
    }

    let mut psi_sum = 0.0f32;
    let mut phi_sum = 0.0f32;
    let mut obs_count = 0i16;
    match clip.and_then(|c| c.clip_bounds(&scratch.lh)) {
        Some((lower, upper)) => {
            for i in 0..scratch.lh.len() {
                if scratch.lh[i] >= lower && scratch.lh[i] <= upper {
                    psi_sum += scratch.psi[i];
                    phi_sum += scratch.phi[i];
                    obs_count += 1;
                }
            }
        }
        None => {
            psi_sum = scratch.psi.iter().sum();
            phi_sum = scratch.phi.iter().sum();
            obs_count = scratch.lh.len() as i16;
        }
    }

    let (likelihood, flux) = if phi_sum > 0.0 {
        (psi_sum / phi_sum.sqrt(), psi_sum / phi_sum)
    } else {
        (0.0, 0.0)
    };

    Trajectory {
        x: x as i16,
        y: y as i16,
        vx,
        vy,
        flux: if flux.is_finite() { flux } else { 0.0 },
        likelihood: if likelihood.is_finite() { likelihood } else { 0.0 },
        obs_count,
    }
}

/// Evaluate a single trajectory outside the grid loop.
pub(crate) fn evaluate_single(
    arr: &PsiPhiArray,
    x: i32,
    y: i32,
    vx: f32,
    vy: f32,
    clip: Option<&SigmaGClip>,
) -> Trajectory {
    let mut scratch = EvalScratch::new(arr.num_times());
    evaluate_candidate(arr, x, y, vx, vy, clip, &mut scratch)
}

/// Run the full grid: every velocity at every start pixel in the search
/// rectangle, keeping the top `results_per_pixel` candidates per pixel.
///
/// Results are concatenated in row-major pixel order (each pixel's block
/// internally best-first); the caller applies the global sort.
pub(crate) fn grid_search(
    arr: &PsiPhiArray,
    velocities: &[(f32, f32)],
    params: &SearchParameters,
    clip: Option<&SigmaGClip>,
) -> Vec<Trajectory> {
    if params.x_start_min >= params.x_start_max || params.y_start_min >= params.y_start_max {
        return Vec::new();
    }

    let rows: Vec<i32> = (params.y_start_min..params.y_start_max).collect();
    let per_row: Vec<Vec<Trajectory>> = rows
        .par_iter()
        .map(|&y| {
            let mut scratch = EvalScratch::new(arr.num_times());
            let mut row_results = Vec::new();
            for x in params.x_start_min..params.x_start_max {
                let mut best = TopK::new(params.results_per_pixel);
                for &(vx, vy) in velocities {
                    let candidate = evaluate_candidate(arr, x, y, vx, vy, clip, &mut scratch);
                    // A candidate with no valid observations is never a
                    // result, whatever the thresholds.
                    if candidate.obs_count == 0
                        || candidate.obs_count < params.min_observations
                        || candidate.likelihood < params.min_lh
                    {
                        continue;
                    }
                    best.insert(candidate);
                }
                row_results.extend(best.into_vec());
            }
            row_results
        })
        .collect();

    per_row.into_iter().flatten().collect()
}
