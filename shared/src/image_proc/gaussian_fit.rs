//! 2-D Gaussian PSF fitting by Levenberg-Marquardt.
//!
//! Model, with pixel coordinates measured at pixel centers:
//!
//! ```text
//! f(i, j) = A * exp(-0.5 * ((i - xc)^2 / sx^2 + (j - yc)^2 / sy^2)) + B
//! ```
//!
//! `i` is the column and `j` the row. Any subset of the six parameters can be
//! held fixed; only the free ones enter the normal equations. All residuals
//! carry unit weight.

use nalgebra::{DMatrix, DVector};
use ndarray::ArrayView2;

/// `FWHM = sigma * 2 * sqrt(2 ln 2)`
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

/// Smallest width the optimizer is allowed to step to, in pixels.
const MIN_SIGMA: f64 = 0.05;

/// Parameter indices into [`GaussianParams::to_array`].
pub const PARAM_X: usize = 0;
pub const PARAM_Y: usize = 1;
pub const PARAM_SIGMA_X: usize = 2;
pub const PARAM_SIGMA_Y: usize = 3;
pub const PARAM_AMPLITUDE: usize = 4;
pub const PARAM_BACKGROUND: usize = 5;

/// Gaussian parameters in stamp coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianParams {
    pub x: f64,
    pub y: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    pub amplitude: f64,
    pub background: f64,
}

impl GaussianParams {
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.x,
            self.y,
            self.sigma_x,
            self.sigma_y,
            self.amplitude,
            self.background,
        ]
    }

    pub fn from_array(p: [f64; 6]) -> Self {
        Self {
            x: p[PARAM_X],
            y: p[PARAM_Y],
            sigma_x: p[PARAM_SIGMA_X],
            sigma_y: p[PARAM_SIGMA_Y],
            amplitude: p[PARAM_AMPLITUDE],
            background: p[PARAM_BACKGROUND],
        }
    }

    /// Model value at a pixel center.
    pub fn evaluate(&self, i: f64, j: f64) -> f64 {
        let dx = i - self.x;
        let dy = j - self.y;
        let exponent =
            -0.5 * (dx * dx / (self.sigma_x * self.sigma_x) + dy * dy / (self.sigma_y * self.sigma_y));
        self.amplitude * exponent.exp() + self.background
    }

    /// Model value and partial derivatives with respect to all six parameters.
    fn evaluate_with_gradient(&self, i: f64, j: f64) -> (f64, [f64; 6]) {
        let sx2 = self.sigma_x * self.sigma_x;
        let sy2 = self.sigma_y * self.sigma_y;
        let dx = i - self.x;
        let dy = j - self.y;
        let e = (-0.5 * (dx * dx / sx2 + dy * dy / sy2)).exp();
        let ae = self.amplitude * e;

        (
            ae + self.background,
            [
                ae * dx / sx2,
                ae * dy / sy2,
                ae * dx * dx / (sx2 * self.sigma_x),
                ae * dy * dy / (sy2 * self.sigma_y),
                e,
                1.0,
            ],
        )
    }

    pub fn fwhm_x(&self) -> f64 {
        self.sigma_x * FWHM_PER_SIGMA
    }

    pub fn fwhm_y(&self) -> f64 {
        self.sigma_y * FWHM_PER_SIGMA
    }
}

/// Which parameters stay at their initial value during the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedParams(pub [bool; 6]);

impl FixedParams {
    pub fn none() -> Self {
        Self([false; 6])
    }

    pub fn with(mut self, index: usize) -> Self {
        self.0[index] = true;
        self
    }

    fn free_indices(&self) -> Vec<usize> {
        (0..6).filter(|&i| !self.0[i]).collect()
    }
}

/// Optimizer settings.
#[derive(Debug, Clone)]
pub struct LmConfig {
    pub max_iterations: usize,
    /// Stop once the relative chi-square improvement drops below this.
    pub chi2_tolerance: f64,
    /// Stop once every accepted step is smaller than this (pixels / counts).
    pub step_tolerance: f64,
    pub initial_lambda: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            chi2_tolerance: 1e-12,
            step_tolerance: 1e-9,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

/// Result of a fit.
#[derive(Debug, Clone, Copy)]
pub struct FitOutcome {
    pub params: GaussianParams,
    pub chi2: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Fit a Gaussian to a stamp.
///
/// `stamp` is indexed `[row, column]`; coordinates in `initial` and in the
/// result are relative to the stamp's first pixel.
pub fn fit_gaussian(
    stamp: &ArrayView2<f64>,
    initial: GaussianParams,
    fixed: FixedParams,
    config: &LmConfig,
) -> FitOutcome {
    let free = fixed.free_indices();
    let mut params = initial.to_array();
    let mut chi2 = chi_square(stamp, &GaussianParams::from_array(params));

    if free.is_empty() || stamp.is_empty() {
        return FitOutcome {
            params: GaussianParams::from_array(params),
            chi2,
            iterations: 0,
            converged: true,
        };
    }

    let n = free.len();
    let mut lambda = config.initial_lambda;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < config.max_iterations {
        iterations += 1;

        let (hessian, gradient) = normal_equations(stamp, &params, &free);

        let mut damped = hessian.clone();
        for k in 0..n {
            let diag = hessian[(k, k)];
            damped[(k, k)] = diag + lambda * diag.max(f64::EPSILON);
        }

        let Some(delta) = solve(damped, &gradient) else {
            lambda *= config.lambda_up;
            if lambda > 1e12 {
                break;
            }
            continue;
        };

        let mut candidate = params;
        for (k, &index) in free.iter().enumerate() {
            candidate[index] += delta[k];
        }
        constrain(&mut candidate);

        let candidate_chi2 = chi_square(stamp, &GaussianParams::from_array(candidate));

        if candidate_chi2.is_finite() && candidate_chi2 <= chi2 {
            let improvement = chi2 - candidate_chi2;
            params = candidate;
            chi2 = candidate_chi2;
            lambda = (lambda * config.lambda_down).max(1e-15);

            let max_step = delta.iter().fold(0.0f64, |acc, d| acc.max(d.abs()));
            if max_step < config.step_tolerance
                || improvement <= config.chi2_tolerance * chi2.max(f64::MIN_POSITIVE)
            {
                converged = true;
                break;
            }
        } else {
            // A rejected step this small means chi-square is at its numerical floor
            let max_step = delta.iter().fold(0.0f64, |acc, d| acc.max(d.abs()));
            if max_step < config.step_tolerance {
                converged = true;
                break;
            }
            lambda *= config.lambda_up;
            if lambda > 1e12 {
                break;
            }
        }
    }

    FitOutcome {
        params: GaussianParams::from_array(params),
        chi2,
        iterations,
        converged,
    }
}

fn constrain(params: &mut [f64; 6]) {
    params[PARAM_SIGMA_X] = params[PARAM_SIGMA_X].abs().max(MIN_SIGMA);
    params[PARAM_SIGMA_Y] = params[PARAM_SIGMA_Y].abs().max(MIN_SIGMA);
}

fn chi_square(stamp: &ArrayView2<f64>, params: &GaussianParams) -> f64 {
    stamp
        .indexed_iter()
        .map(|((row, col), &z)| {
            let r = z - params.evaluate(col as f64, row as f64);
            r * r
        })
        .sum()
}

/// `J^T J` and `J^T r` restricted to the free parameters.
fn normal_equations(
    stamp: &ArrayView2<f64>,
    params: &[f64; 6],
    free: &[usize],
) -> (DMatrix<f64>, DVector<f64>) {
    let n = free.len();
    let model = GaussianParams::from_array(*params);
    let mut hessian = DMatrix::<f64>::zeros(n, n);
    let mut gradient = DVector::<f64>::zeros(n);

    for ((row, col), &z) in stamp.indexed_iter() {
        let (value, full) = model.evaluate_with_gradient(col as f64, row as f64);
        let r = z - value;
        for a in 0..n {
            let ja = full[free[a]];
            gradient[a] += ja * r;
            for b in a..n {
                hessian[(a, b)] += ja * full[free[b]];
            }
        }
    }

    for a in 0..n {
        for b in 0..a {
            hessian[(a, b)] = hessian[(b, a)];
        }
    }

    (hessian, gradient)
}

fn solve(matrix: DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    let delta = match matrix.clone().cholesky() {
        Some(chol) => chol.solve(rhs),
        None => matrix.lu().solve(rhs)?,
    };
    delta.iter().all(|d| d.is_finite()).then_some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn render(params: &GaussianParams, rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(r, c)| params.evaluate(c as f64, r as f64))
    }

    #[test]
    fn test_fwhm_conversion() {
        let p = GaussianParams {
            x: 0.0,
            y: 0.0,
            sigma_x: 1.0,
            sigma_y: 2.0,
            amplitude: 1.0,
            background: 0.0,
        };
        assert_relative_eq!(p.fwhm_x(), 2.3548, epsilon = 1e-4);
        assert_relative_eq!(p.fwhm_y(), 4.7096, epsilon = 1e-4);
    }

    #[test]
    fn test_recovers_all_free_parameters() {
        let truth = GaussianParams {
            x: 7.3,
            y: 8.6,
            sigma_x: 1.8,
            sigma_y: 2.2,
            amplitude: 5000.0,
            background: 300.0,
        };
        let stamp = render(&truth, 16, 16);
        let start = GaussianParams {
            x: 7.0,
            y: 8.0,
            sigma_x: 1.2,
            sigma_y: 1.2,
            amplitude: 4000.0,
            background: 280.0,
        };

        let out = fit_gaussian(&stamp.view(), start, FixedParams::none(), &LmConfig::default());

        assert!(out.converged);
        assert_relative_eq!(out.params.x, truth.x, epsilon = 1e-6);
        assert_relative_eq!(out.params.y, truth.y, epsilon = 1e-6);
        assert_relative_eq!(out.params.sigma_x, truth.sigma_x, epsilon = 1e-6);
        assert_relative_eq!(out.params.sigma_y, truth.sigma_y, epsilon = 1e-6);
        assert_relative_eq!(out.params.background, truth.background, epsilon = 1e-4);
    }

    #[test]
    fn test_fixed_parameters_do_not_move() {
        let truth = GaussianParams {
            x: 6.4,
            y: 5.1,
            sigma_x: 2.0,
            sigma_y: 2.0,
            amplitude: 8000.0,
            background: 100.0,
        };
        let stamp = render(&truth, 14, 14);
        let start = GaussianParams {
            sigma_x: 1.5,
            sigma_y: 1.5,
            ..truth
        };
        let fixed = FixedParams::none()
            .with(PARAM_SIGMA_X)
            .with(PARAM_SIGMA_Y)
            .with(PARAM_BACKGROUND);

        let out = fit_gaussian(&stamp.view(), start, fixed, &LmConfig::default());

        assert_eq!(out.params.sigma_x, 1.5);
        assert_eq!(out.params.sigma_y, 1.5);
        assert_eq!(out.params.background, 100.0);
        assert_relative_eq!(out.params.x, truth.x, epsilon = 1e-3);
        assert_relative_eq!(out.params.y, truth.y, epsilon = 1e-3);
    }

    #[test]
    fn test_all_fixed_returns_initial() {
        let stamp = Array2::<f64>::from_elem((4, 4), 10.0);
        let start = GaussianParams {
            x: 1.0,
            y: 1.0,
            sigma_x: 1.0,
            sigma_y: 1.0,
            amplitude: 0.0,
            background: 10.0,
        };
        let out = fit_gaussian(&stamp.view(), start, FixedParams([true; 6]), &LmConfig::default());
        assert_eq!(out.iterations, 0);
        assert_eq!(out.params, start);
        assert_eq!(out.chi2, 0.0);
    }
}
