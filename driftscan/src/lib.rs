//! DRIFTSCAN - maximum-likelihood detection of faint moving objects in
//! astronomical image stacks.
//!
//! Given a time-ordered stack of calibrated, co-registered images of the same
//! sky region, the engine searches for linearly-moving point sources too
//! faint to detect in any single exposure by shifting and stacking along
//! candidate trajectories.
//!
//! # Pipeline
//!
//! ```text
//!  ImageStack ──► psi/phi images ──► PsiPhiArray ──► grid search ──► Vec<Trajectory>
//!  (science,      per-image PSF      packed, opt.    every (pixel,      │
//!   variance,     convolutions       quantized       velocity) pair     ▼
//!   mask, MJD)                                                      stamp coadds
//! ```
//!
//! For each image the science and variance planes reduce to two sufficient-
//! statistic images: `psi = conv(science / variance, PSF)` and
//! `phi = conv(1 / variance, PSF^2)`. Along any trajectory the detection
//! likelihood is then simply `sum(psi) / sqrt(sum(phi))` over the visited
//! pixels, so the grid search is a massively parallel gather-and-reduce over
//! a packed array of those statistics, with a robust sigma-G clip rejecting
//! per-candidate outliers and a top-K per start pixel bounding the output.
//!
//! # Quick start
//!
//! ```no_run
//! use driftscan::{SearchConfiguration, StackSearch};
//! # fn load_stack() -> driftscan::ImageStack { unimplemented!() }
//!
//! let stack = load_stack();
//! let config = SearchConfiguration::default();
//!
//! let mut search = StackSearch::new(&stack);
//! search.set_parameters(config.search_parameters(&stack)?);
//! search.search(&config.trajectory_grid(0.0))?;
//!
//! for trajectory in search.get_results(0, 100) {
//!     println!(
//!         "({}, {}) v=({:.2}, {:.2}) L={:.1} n={}",
//!         trajectory.x,
//!         trajectory.y,
//!         trajectory.vx,
//!         trajectory.vy,
//!         trajectory.likelihood,
//!         trajectory.obs_count,
//!     );
//! }
//! # Ok::<(), driftscan::SearchError>(())
//! ```
//!
//! Ingestion (FITS, WCS, per-CCD calibration), result persistence and
//! trajectory clustering live in the surrounding pipeline; this crate takes
//! in-memory stacks and returns in-memory trajectory records.

pub mod config;
pub mod error;
pub mod image;
pub mod psi_phi;
pub mod search;
pub mod stack;
pub mod stamps;
pub mod trajectory;

pub use config::SearchConfiguration;
pub use error::SearchError;
pub use image::{pixel_has_data, ImageMoments, Psf, RawImage, NO_DATA};
pub use psi_phi::{Encoding, PsiPhi, PsiPhiArray};
pub use search::{SearchParameters, SearchState, SigmaGClip, StackSearch, DEFAULT_SIGMAG_COEFF};
pub use stack::{ImageStack, LayeredImage};
pub use stamps::{StampParameters, StampType};
pub use trajectory::{Trajectory, TrajectoryGrid};
