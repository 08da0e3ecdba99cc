//! Image and PSF primitives: the float image type with its masked-pixel
//! sentinel, convolution kernels, and the per-pixel coadd reductions.

pub mod coadd;
pub mod psf;
pub mod raw;

pub use coadd::{create_mean_image, create_median_image, create_summed_image};
pub use psf::{Psf, MAX_KERNEL_RADIUS};
pub use raw::{pixel_has_data, ImageMoments, RawImage, NO_DATA};
