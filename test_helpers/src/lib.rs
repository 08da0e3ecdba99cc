//! Synthetic image stacks for testing and benchmarking the search engine.
//!
//! [`FakeDataSet`] builds deterministic stacks of layered images: seeded
//! Gaussian background noise (or a perfectly flat background for closed-form
//! expectations), a matching variance plane, and PSF-shaped fake objects
//! inserted along linear trajectories. Because the object insertion uses the
//! same prediction and rounding as the search, expected observation counts
//! can be derived exactly in tests.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use driftscan::{ImageStack, LayeredImage, Psf, RawImage, Trajectory};

/// Default seed so repeated test runs see identical noise.
const DEFAULT_SEED: u64 = 101;

/// A synthetic stack under construction.
pub struct FakeDataSet {
    psf: Psf,
    times: Vec<f64>,
    images: Vec<LayeredImage>,
}

impl FakeDataSet {
    /// Stack with seeded Gaussian noise of the given level; the variance
    /// plane is the squared noise level everywhere.
    pub fn new(
        width: usize,
        height: usize,
        times: Vec<f64>,
        noise_level: f32,
        psf_sigma: f32,
    ) -> Self {
        Self::with_seed(width, height, times, noise_level, psf_sigma, DEFAULT_SEED)
    }

    /// Noise-free stack (flat zero science) with an explicit variance value,
    /// for tests that check closed-form likelihoods.
    pub fn noiseless(
        width: usize,
        height: usize,
        times: Vec<f64>,
        variance: f32,
        psf_sigma: f32,
    ) -> Self {
        let psf = Psf::gaussian(psf_sigma).expect("valid test PSF sigma");
        let images = times
            .iter()
            .map(|&t| {
                LayeredImage::new(
                    RawImage::new(width, height),
                    RawImage::from_elem(width, height, variance),
                    RawImage::new(width, height),
                    t,
                    psf.clone(),
                )
                .expect("equal-shape test layers")
            })
            .collect();
        Self { psf, times, images }
    }

    /// Like [`FakeDataSet::new`] with an explicit noise seed.
    pub fn with_seed(
        width: usize,
        height: usize,
        times: Vec<f64>,
        noise_level: f32,
        psf_sigma: f32,
        seed: u64,
    ) -> Self {
        let psf = Psf::gaussian(psf_sigma).expect("valid test PSF sigma");
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0f32, noise_level).expect("positive noise level");

        let variance = noise_level * noise_level;
        let images = times
            .iter()
            .map(|&t| {
                let science = Array2::from_shape_fn((height, width), |_| normal.sample(&mut rng));
                LayeredImage::new(
                    RawImage::from_array(science),
                    RawImage::from_elem(width, height, variance),
                    RawImage::new(width, height),
                    t,
                    psf.clone(),
                )
                .expect("equal-shape test layers")
            })
            .collect();
        Self { psf, times, images }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn images(&self) -> &[LayeredImage] {
        &self.images
    }

    /// Add a PSF-shaped source of total `flux` at the trajectory's predicted
    /// (rounded) pixel position in every image.
    pub fn insert_object(&mut self, trajectory: &Trajectory, flux: f32) {
        let t0 = self.times[0];
        let kernel = self.psf.kernel().clone();
        let radius = self.psf.radius() as i64;

        for (img, &t) in self.images.iter_mut().zip(&self.times) {
            let (px, py) = trajectory.predicted_pixel((t - t0) as f32);
            let width = img.width() as i64;
            let height = img.height() as i64;
            let science = img.science_mut();
            for ((ki, kj), &weight) in kernel.indexed_iter() {
                let x = px + kj as i64 - radius;
                let y = py + ki as i64 - radius;
                if x >= 0 && y >= 0 && x < width && y < height {
                    let current = science.get_pixel(x, y);
                    science.set_pixel(x as usize, y as usize, current + flux * weight);
                }
            }
        }
    }

    /// Rescale one science pixel in one image; used to fabricate
    /// single-frame outliers.
    pub fn scale_pixel(&mut self, time_index: usize, x: usize, y: usize, factor: f32) {
        let science = self.images[time_index].science_mut();
        let value = science.get_pixel(x as i64, y as i64);
        science.set_pixel(x, y, value * factor);
    }

    /// Flag one pixel of one image's mask plane.
    pub fn mask_pixel(&mut self, time_index: usize, x: usize, y: usize, flag: u32) {
        let mask = self.images[time_index].mask_mut();
        let bits = mask.get_pixel(x as i64, y as i64) as u32 | flag;
        mask.set_pixel(x, y, bits as f32);
    }

    /// Apply the mask planes to science and variance across all images.
    pub fn apply_mask_flags(&mut self, flags: u32) {
        for img in &mut self.images {
            img.apply_mask_flags(flags);
        }
    }

    /// Finish construction.
    pub fn into_stack(self) -> ImageStack {
        ImageStack::new(self.images).expect("non-empty equal-shape test stack")
    }
}

/// `count` evenly spaced zero-based times with spacing `dt` days.
pub fn evenly_spaced_times(count: usize, dt: f64) -> Vec<f64> {
    (0..count).map(|i| i as f64 * dt).collect()
}
