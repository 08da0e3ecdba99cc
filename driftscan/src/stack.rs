//! Time-indexed stacks of layered (science, variance, mask) images.

use crate::error::SearchError;
use crate::image::{pixel_has_data, Psf, RawImage, NO_DATA};

/// One observation: science and variance planes, a bitfield mask plane, the
/// observation time and the image's PSF.
///
/// All three layers share the same shape; this is checked at construction.
/// Mask pixels are integer bitfields stored in the float plane; the flag
/// assignment (saturation, cosmic ray, edge, ...) belongs to the calibration
/// pipeline feeding this engine.
#[derive(Debug, Clone)]
pub struct LayeredImage {
    science: RawImage,
    variance: RawImage,
    mask: RawImage,
    obstime: f64,
    psf: Psf,
}

impl LayeredImage {
    pub fn new(
        science: RawImage,
        variance: RawImage,
        mask: RawImage,
        obstime: f64,
        psf: Psf,
    ) -> Result<Self, SearchError> {
        let (width, height) = (science.width(), science.height());
        for layer in [&variance, &mask] {
            if layer.width() != width || layer.height() != height {
                return Err(SearchError::DimensionMismatch {
                    expected_width: width,
                    expected_height: height,
                    width: layer.width(),
                    height: layer.height(),
                });
            }
        }
        Ok(Self {
            science,
            variance,
            mask,
            obstime,
            psf,
        })
    }

    pub fn width(&self) -> usize {
        self.science.width()
    }

    pub fn height(&self) -> usize {
        self.science.height()
    }

    pub fn science(&self) -> &RawImage {
        &self.science
    }

    pub fn variance(&self) -> &RawImage {
        &self.variance
    }

    pub fn mask(&self) -> &RawImage {
        &self.mask
    }

    pub fn psf(&self) -> &Psf {
        &self.psf
    }

    pub fn obstime(&self) -> f64 {
        self.obstime
    }

    pub fn set_obstime(&mut self, obstime: f64) {
        self.obstime = obstime;
    }

    pub fn science_mut(&mut self) -> &mut RawImage {
        &mut self.science
    }

    pub fn mask_mut(&mut self) -> &mut RawImage {
        &mut self.mask
    }

    /// Mask science and variance wherever the mask plane shares a bit with
    /// `flags`.
    pub fn apply_mask_flags(&mut self, flags: u32) {
        let width = self.width();
        let height = self.height();
        for y in 0..height {
            for x in 0..width {
                let bits = self.mask.data()[[y, x]] as u32;
                if bits & flags != 0 {
                    self.science.set_pixel(x, y, NO_DATA);
                    self.variance.set_pixel(x, y, NO_DATA);
                }
            }
        }
    }

    /// Mask science and variance wherever a (binary) global mask is set.
    pub fn apply_global_mask(&mut self, global: &RawImage) -> Result<(), SearchError> {
        if global.width() != self.width() || global.height() != self.height() {
            return Err(SearchError::DimensionMismatch {
                expected_width: self.width(),
                expected_height: self.height(),
                width: global.width(),
                height: global.height(),
            });
        }
        for y in 0..self.height() {
            for x in 0..self.width() {
                if global.data()[[y, x]] != 0.0 {
                    self.science.set_pixel(x, y, NO_DATA);
                    self.variance.set_pixel(x, y, NO_DATA);
                }
            }
        }
        Ok(())
    }

    /// Dilate the masked region of science and variance by `steps` pixels of
    /// Manhattan distance, guarding trajectories against pixels adjacent to
    /// known defects.
    pub fn grow_mask(&mut self, steps: usize) {
        let width = self.width() as i64;
        let height = self.height() as i64;

        // -1 marks already-masked pixels, otherwise the dilation generation.
        let mut distance = vec![vec![i64::MAX; width as usize]; height as usize];
        let mut frontier: Vec<(i64, i64)> = Vec::new();
        for y in 0..height {
            for x in 0..width {
                if !self.science.pixel_has_data(x, y) {
                    distance[y as usize][x as usize] = 0;
                    frontier.push((x, y));
                }
            }
        }

        for step in 1..=steps as i64 {
            let mut next = Vec::new();
            for &(x, y) in &frontier {
                for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx >= 0
                        && ny >= 0
                        && nx < width
                        && ny < height
                        && distance[ny as usize][nx as usize] > step
                    {
                        distance[ny as usize][nx as usize] = step;
                        next.push((nx, ny));
                    }
                }
            }
            frontier = next;
        }

        for y in 0..height as usize {
            for x in 0..width as usize {
                if (1..=steps as i64).contains(&distance[y][x]) {
                    self.science.set_pixel(x, y, NO_DATA);
                    self.variance.set_pixel(x, y, NO_DATA);
                }
            }
        }
    }

    /// The psi sufficient-statistic image: `conv(science / variance, PSF)`.
    ///
    /// Masked pixels and non-positive variance propagate as [`NO_DATA`]
    /// through the division and the convolution.
    pub fn generate_psi_image(&self) -> RawImage {
        let mut ratio = RawImage::new(self.width(), self.height());
        for y in 0..self.height() {
            for x in 0..self.width() {
                let sci = self.science.data()[[y, x]];
                let var = self.variance.data()[[y, x]];
                let value = if pixel_has_data(sci) && pixel_has_data(var) && var > 0.0 {
                    sci / var
                } else {
                    NO_DATA
                };
                ratio.set_pixel(x, y, value);
            }
        }
        self.psf.convolve(&ratio)
    }

    /// The phi sufficient-statistic image: `conv(1 / variance, PSF^2)`.
    pub fn generate_phi_image(&self) -> RawImage {
        let mut inv_var = RawImage::new(self.width(), self.height());
        for y in 0..self.height() {
            for x in 0..self.width() {
                let var = self.variance.data()[[y, x]];
                let value = if pixel_has_data(var) && var > 0.0 {
                    1.0 / var
                } else {
                    NO_DATA
                };
                inv_var.set_pixel(x, y, value);
            }
        }
        self.psf.squared().convolve(&inv_var)
    }
}

/// An ordered sequence of equal-shape layered images.
///
/// Index 0 defines the time origin: the derived zeroed times are
/// `t_i = obstime_i - obstime_0` regardless of whether the timestamps are
/// sorted. Pixel data is immutable for the lifetime of a search borrowing the
/// stack.
#[derive(Debug, Clone)]
pub struct ImageStack {
    images: Vec<LayeredImage>,
}

impl ImageStack {
    pub fn new(images: Vec<LayeredImage>) -> Result<Self, SearchError> {
        let first = images.first().ok_or(SearchError::EmptyStack)?;
        let (width, height) = (first.width(), first.height());
        for img in &images {
            if img.width() != width || img.height() != height {
                return Err(SearchError::DimensionMismatch {
                    expected_width: width,
                    expected_height: height,
                    width: img.width(),
                    height: img.height(),
                });
            }
        }
        Ok(Self { images })
    }

    pub fn img_count(&self) -> usize {
        self.images.len()
    }

    pub fn width(&self) -> usize {
        self.images[0].width()
    }

    pub fn height(&self) -> usize {
        self.images[0].height()
    }

    pub fn npixels(&self) -> usize {
        self.width() * self.height()
    }

    pub fn images(&self) -> &[LayeredImage] {
        &self.images
    }

    pub fn single_image(&self, index: usize) -> Result<&LayeredImage, SearchError> {
        self.images
            .get(index)
            .ok_or(SearchError::ImageIndexOutOfRange {
                index,
                count: self.images.len(),
            })
    }

    pub fn obstime(&self, index: usize) -> Result<f64, SearchError> {
        Ok(self.single_image(index)?.obstime())
    }

    /// Observation time relative to the first image.
    pub fn zeroed_time(&self, index: usize) -> Result<f64, SearchError> {
        Ok(self.single_image(index)?.obstime() - self.images[0].obstime())
    }

    /// All observation times relative to the first image.
    pub fn build_zeroed_times(&self) -> Vec<f64> {
        let t0 = self.images[0].obstime();
        self.images.iter().map(|img| img.obstime() - t0).collect()
    }

    /// Binary mask marking pixels flagged (under any bit of `flags`) in at
    /// least `threshold` images.
    pub fn make_global_mask(&self, flags: u32, threshold: usize) -> RawImage {
        let width = self.width();
        let height = self.height();
        let mut counts = vec![0usize; width * height];
        for img in &self.images {
            for ((row, col), &bits) in img.mask().data().indexed_iter() {
                if bits as u32 & flags != 0 {
                    counts[row * width + col] += 1;
                }
            }
        }

        let mut global = RawImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if counts[y * width + x] >= threshold {
                    global.set_pixel(x, y, 1.0);
                }
            }
        }
        global
    }

    /// Apply mask flags to every image.
    pub fn apply_mask_flags(&mut self, flags: u32) {
        for img in &mut self.images {
            img.apply_mask_flags(flags);
        }
    }

    /// Synthesize the global mask and apply it to every image.
    pub fn apply_global_mask(&mut self, flags: u32, threshold: usize) {
        let global = self.make_global_mask(flags, threshold);
        for img in &mut self.images {
            // Shapes match by the stack invariant.
            img.apply_global_mask(&global).expect("stack shape invariant");
        }
    }

    /// Grow the masked region of every image by `steps` pixels.
    pub fn grow_masks(&mut self, steps: usize) {
        for img in &mut self.images {
            img.grow_mask(steps);
        }
    }

    /// Generate psi images for every time slice.
    pub fn generate_psi_images(&self) -> Vec<RawImage> {
        self.images.iter().map(|img| img.generate_psi_image()).collect()
    }

    /// Generate phi images for every time slice.
    pub fn generate_phi_images(&self) -> Vec<RawImage> {
        self.images.iter().map(|img| img.generate_phi_image()).collect()
    }
}
