//! Single-star image processing for the guide window.
//!
//! The pipeline run on every guiding frame is:
//!
//! 1. [`median`]: robust background by quickselect on a scratch copy
//! 2. [`centroid::center_of_mass`]: coarse position from background-subtracted flux
//! 3. [`centroid::sub_window`]: a box of one quarter of the window per side around it
//! 4. [`gaussian_fit`]: Levenberg-Marquardt fit of a 2-D Gaussian PSF
//!
//! [`CentroidEstimator`] ties these together.

pub mod centroid;
pub mod gaussian_fit;
pub mod median;

pub use centroid::{CentroidConfig, CentroidError, CentroidEstimator, CentroidResult, FitMode};
pub use gaussian_fit::{GaussianParams, LmConfig};
