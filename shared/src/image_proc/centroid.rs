//! Guide star centroid and width estimation.
//!
//! [`CentroidEstimator::estimate`] is a pure function of the pixel buffer
//! (apart from reusing its scratch allocation) and runs in two modes:
//!
//! - [`FitMode::Centroid`]: widths and background held at their seeds, only
//!   position and amplitude float. Used on every guiding frame.
//! - [`FitMode::Fwhm`]: only the background is held, so the widths are
//!   estimated as well. Used once when guiding starts.
//!
//! Positions are reported in window coordinates with pixel centers at integer
//! values. No convention offset is applied here.
//!
//! # Example
//!
//! ```
//! use ndarray::Array2;
//! use shared::image_proc::{CentroidEstimator, FitMode};
//!
//! let mut frame = Array2::<u16>::from_elem((32, 32), 500);
//! frame[[12, 20]] = 4000;
//! frame[[12, 21]] = 4000;
//!
//! let mut estimator = CentroidEstimator::default();
//! let result = estimator.estimate(&frame.view(), FitMode::Centroid)?;
//! assert!((result.x - 20.5).abs() < 0.5);
//! # Ok::<(), shared::image_proc::CentroidError>(())
//! ```

use ndarray::{s, ArrayView2};
use thiserror::Error;
use tracing::trace;

use super::gaussian_fit::{
    fit_gaussian, FixedParams, GaussianParams, LmConfig, FWHM_PER_SIGMA, PARAM_BACKGROUND,
    PARAM_SIGMA_X, PARAM_SIGMA_Y,
};
use super::median::image_median;

/// Errors from centroid estimation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CentroidError {
    /// The window has no pixels.
    #[error("empty pixel window ({width}x{height})")]
    EmptyWindow { width: usize, height: usize },
}

/// Which parameters the Gaussian fit is allowed to vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    /// Position and amplitude only.
    Centroid,
    /// Position, widths and amplitude.
    Fwhm,
}

impl FitMode {
    fn fixed_params(self) -> FixedParams {
        match self {
            FitMode::Centroid => FixedParams::none()
                .with(PARAM_SIGMA_X)
                .with(PARAM_SIGMA_Y)
                .with(PARAM_BACKGROUND),
            FitMode::Fwhm => FixedParams::none().with(PARAM_BACKGROUND),
        }
    }
}

/// Estimator settings.
#[derive(Debug, Clone)]
pub struct CentroidConfig {
    /// Seed FWHM for both axes, pixels.
    pub initial_fwhm: f64,
    /// Seed amplitude, counts above background.
    pub initial_amplitude: f64,
    pub lm: LmConfig,
}

impl Default for CentroidConfig {
    fn default() -> Self {
        Self {
            initial_fwhm: 2.5,
            initial_amplitude: 12800.0,
            lm: LmConfig::default(),
        }
    }
}

/// Inclusive pixel box inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubWindow {
    pub first_col: usize,
    pub first_row: usize,
    pub last_col: usize,
    pub last_row: usize,
}

impl SubWindow {
    pub fn width(&self) -> usize {
        self.last_col - self.first_col + 1
    }

    pub fn height(&self) -> usize {
        self.last_row - self.first_row + 1
    }
}

/// Outcome of one estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CentroidResult {
    /// Center column in window coordinates.
    pub x: f64,
    /// Center row in window coordinates.
    pub y: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    pub fwhm_x: f64,
    pub fwhm_y: f64,
    pub amplitude: f64,
    /// Median of the window, used as the fixed background.
    pub background: f64,
    /// Center-of-mass estimate the fit was seeded from.
    pub coarse: (f64, f64),
    pub sub_window: SubWindow,
    pub converged: bool,
    pub iterations: usize,
    pub chi2: f64,
    /// True if the fitted position fell outside the window and the coarse
    /// estimate was reported instead (on either axis).
    pub used_coarse_fallback: bool,
}

/// Center of mass of `max(pixel - background, 0)`.
///
/// Returns the geometric center `(width / 2, height / 2)` when the
/// background-subtracted sum is not positive.
pub fn center_of_mass(pixels: &ArrayView2<u16>, background: f64) -> (f64, f64) {
    let (rows, cols) = pixels.dim();
    let mut sum = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;

    for ((row, col), &value) in pixels.indexed_iter() {
        let w = f64::from(value) - background;
        if w > 0.0 {
            sum += w;
            sum_x += w * col as f64;
            sum_y += w * row as f64;
        }
    }

    if sum <= 0.0 {
        return (cols as f64 / 2.0, rows as f64 / 2.0);
    }
    (sum_x / sum, sum_y / sum)
}

/// Box of `width / 4` pixels either side of the estimate, clamped to the window.
///
/// The box spans `[floor(x) - half, floor(x) + half - 1]` on each axis before
/// clamping, so an unclamped box is exactly half the window on each side.
pub fn sub_window(estimate: (f64, f64), width: usize, height: usize) -> SubWindow {
    let (first_col, last_col) = clamp_span(estimate.0, width);
    let (first_row, last_row) = clamp_span(estimate.1, height);
    SubWindow {
        first_col,
        first_row,
        last_col,
        last_row,
    }
}

fn clamp_span(center: f64, extent: usize) -> (usize, usize) {
    let half = (extent / 4).max(1) as i64;
    let max_index = extent.saturating_sub(1) as i64;
    let anchor = center.floor() as i64;

    let first = (anchor - half).clamp(0, max_index);
    let last = (anchor + half - 1).clamp(first, max_index);
    (first as usize, last as usize)
}

/// Centroid estimator with a reusable median scratch buffer.
#[derive(Debug, Default)]
pub struct CentroidEstimator {
    config: CentroidConfig,
    scratch: Vec<f64>,
}

impl CentroidEstimator {
    pub fn new(config: CentroidConfig) -> Self {
        Self {
            config,
            scratch: Vec::new(),
        }
    }

    pub fn config(&self) -> &CentroidConfig {
        &self.config
    }

    /// Estimate the star center (and, in FWHM mode, its width) in a window.
    pub fn estimate(
        &mut self,
        pixels: &ArrayView2<u16>,
        mode: FitMode,
    ) -> Result<CentroidResult, CentroidError> {
        let (height, width) = pixels.dim();
        let background = image_median(pixels, &mut self.scratch)
            .ok_or(CentroidError::EmptyWindow { width, height })?;

        let coarse = center_of_mass(pixels, background);
        let bounds = sub_window(coarse, width, height);

        let stamp = pixels
            .slice(s![
                bounds.first_row..=bounds.last_row,
                bounds.first_col..=bounds.last_col
            ])
            .mapv(f64::from);

        let seed_sigma = self.config.initial_fwhm / FWHM_PER_SIGMA;
        let initial = GaussianParams {
            x: coarse.0 - bounds.first_col as f64,
            y: coarse.1 - bounds.first_row as f64,
            sigma_x: seed_sigma,
            sigma_y: seed_sigma,
            amplitude: self.config.initial_amplitude,
            background,
        };

        let outcome = fit_gaussian(&stamp.view(), initial, mode.fixed_params(), &self.config.lm);
        let fitted = outcome.params;

        let fit_x = bounds.first_col as f64 + fitted.x;
        let fit_y = bounds.first_row as f64 + fitted.y;
        let x_ok = fit_x.is_finite() && fit_x >= 0.0 && fit_x < width as f64;
        let y_ok = fit_y.is_finite() && fit_y >= 0.0 && fit_y < height as f64;

        trace!(
            "centroid {:?}: coarse=({:.3}, {:.3}) fit=({:.3}, {:.3}) iterations={} converged={}",
            mode,
            coarse.0,
            coarse.1,
            fit_x,
            fit_y,
            outcome.iterations,
            outcome.converged
        );

        Ok(CentroidResult {
            x: if x_ok { fit_x } else { coarse.0 },
            y: if y_ok { fit_y } else { coarse.1 },
            sigma_x: fitted.sigma_x,
            sigma_y: fitted.sigma_y,
            fwhm_x: fitted.fwhm_x(),
            fwhm_y: fitted.fwhm_y(),
            amplitude: fitted.amplitude,
            background,
            coarse,
            sub_window: bounds,
            converged: outcome.converged,
            iterations: outcome.iterations,
            chi2: outcome.chi2,
            used_coarse_fallback: !(x_ok && y_ok),
        })
    }
}
