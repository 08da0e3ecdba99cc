//! Robust per-trajectory outlier rejection on likelihood contributions.
//!
//! The filter estimates a robust spread from an inter-percentile range of the
//! per-observation likelihood contributions and clips everything farther than
//! that spread (scaled by the coefficient) from the median. With the default
//! 25/75 bounds and coefficient 0.7413 the interquartile range matches one
//! Gaussian sigma, so the clip behaves like a fixed-sigma rejection that is
//! immune to the outliers it is hunting.

use crate::error::SearchError;

/// Gaussian-matched normalization for the 25/75 interquartile range.
pub const DEFAULT_SIGMAG_COEFF: f32 = 0.7413;

/// Percentile-based robust clipping bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaGClip {
    low_pct: f32,
    high_pct: f32,
    coeff: f32,
}

impl Default for SigmaGClip {
    fn default() -> Self {
        Self {
            low_pct: 25.0,
            high_pct: 75.0,
            coeff: DEFAULT_SIGMAG_COEFF,
        }
    }
}

impl SigmaGClip {
    /// Validated constructor: `0 <= low < high <= 100`, positive coefficient.
    pub fn new(low_pct: f32, high_pct: f32, coeff: f32) -> Result<Self, SearchError> {
        if !(0.0..=100.0).contains(&low_pct)
            || !(0.0..=100.0).contains(&high_pct)
            || low_pct >= high_pct
        {
            return Err(SearchError::InvalidPercentiles {
                low: low_pct,
                high: high_pct,
            });
        }
        if !(coeff > 0.0) || !coeff.is_finite() {
            return Err(SearchError::InvalidSigmaGCoeff(coeff));
        }
        Ok(Self {
            low_pct,
            high_pct,
            coeff,
        })
    }

    pub fn low_pct(&self) -> f32 {
        self.low_pct
    }

    pub fn high_pct(&self) -> f32 {
        self.high_pct
    }

    pub fn coeff(&self) -> f32 {
        self.coeff
    }

    /// The `[lower, upper]` acceptance interval for a set of values, or
    /// `None` when the input is empty (which disables the filter for that
    /// candidate).
    ///
    /// The interval is centered on the median with half-width
    /// `(p_high - p_low) / coeff`; values on the boundary are kept.
    pub fn clip_bounds(&self, values: &[f32]) -> Option<(f32, f32)> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let low = percentile(&sorted, self.low_pct);
        let high = percentile(&sorted, self.high_pct);
        let median = percentile(&sorted, 50.0);
        let half_width = (high - low) / self.coeff;
        Some((median - half_width, median + half_width))
    }

    /// Which of `values` survive the clip. Empty input keeps everything.
    pub fn keep_mask(&self, values: &[f32]) -> Vec<bool> {
        match self.clip_bounds(values) {
            Some((lower, upper)) => values.iter().map(|&v| v >= lower && v <= upper).collect(),
            None => vec![true; values.len()],
        }
    }
}

/// Percentile of pre-sorted values with linear interpolation between order
/// statistics.
fn percentile(sorted: &[f32], pct: f32) -> f32 {
    debug_assert!(!sorted.is_empty());
    let rank = (sorted.len() - 1) as f32 * pct / 100.0;
    let below = rank.floor() as usize;
    let above = rank.ceil() as usize;
    if below == above {
        sorted[below]
    } else {
        let fraction = rank - below as f32;
        sorted[below] + fraction * (sorted[above] - sorted[below])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_constructor_validation() {
        assert!(SigmaGClip::new(25.0, 75.0, 0.7413).is_ok());
        assert!(SigmaGClip::new(90.0, 10.0, 0.7413).is_err());
        assert!(SigmaGClip::new(-1.0, 75.0, 0.7413).is_err());
        assert!(SigmaGClip::new(25.0, 101.0, 0.7413).is_err());
        assert!(SigmaGClip::new(25.0, 75.0, -1.0).is_err());
        assert!(SigmaGClip::new(25.0, 75.0, 0.0).is_err());
    }

    #[test]
    fn test_default_matches_gaussian_normalization() {
        let clip = SigmaGClip::default();
        assert_abs_diff_eq!(clip.low_pct(), 25.0);
        assert_abs_diff_eq!(clip.high_pct(), 75.0);
        assert_abs_diff_eq!(clip.coeff(), 0.7413, epsilon = 1e-4);
    }

    #[test]
    fn test_percentile_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(percentile(&sorted, 0.0), 1.0);
        assert_abs_diff_eq!(percentile(&sorted, 100.0), 4.0);
        assert_abs_diff_eq!(percentile(&sorted, 50.0), 2.5);
        assert_abs_diff_eq!(percentile(&sorted, 25.0), 1.75);
    }

    #[test]
    fn test_well_behaved_values_all_kept() {
        let clip = SigmaGClip::default();
        let values: Vec<f32> = (0..20).map(|i| 10.0 + i as f32 * 0.05).collect();
        assert!(clip.keep_mask(&values).iter().all(|&kept| kept));
    }

    #[test]
    fn test_outliers_rejected() {
        let clip = SigmaGClip::default();
        let mut values: Vec<f32> = (0..20).map(|i| 10.0 + i as f32 * 0.05).collect();
        values[2] = 100.0;
        values[14] = -100.0;
        let kept = clip.keep_mask(&values);
        for (i, &k) in kept.iter().enumerate() {
            assert_eq!(k, i != 2 && i != 14, "index {i}");
        }
    }

    #[test]
    fn test_identical_values_survive_zero_width() {
        // A degenerate spread keeps exact-median values and drops the spike.
        let clip = SigmaGClip::default();
        let mut values = vec![3.0f32; 9];
        values.push(300.0);
        let kept = clip.keep_mask(&values);
        assert_eq!(kept.iter().filter(|&&k| k).count(), 9);
        assert!(!kept[9]);
    }

    #[test]
    fn test_empty_input_disables_filter() {
        let clip = SigmaGClip::default();
        assert!(clip.clip_bounds(&[]).is_none());
        assert!(clip.keep_mask(&[]).is_empty());
    }

    #[test]
    fn test_single_value_kept() {
        let clip = SigmaGClip::default();
        assert_eq!(clip.keep_mask(&[5.0]), vec![true]);
    }
}
