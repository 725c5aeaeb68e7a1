//! Rendered single-star frames.
//!
//! Used by the simulated frame grabber and by tests that need a realistic
//! guide-window image with a known star position.

use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// A circular or elliptical Gaussian star on a flat background.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StarSpec {
    /// Column of the star center
    pub x: f64,
    /// Row of the star center
    pub y: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    /// Peak counts above background
    pub amplitude: f64,
    pub background: f64,
}

impl StarSpec {
    pub fn round(x: f64, y: f64, sigma: f64, amplitude: f64, background: f64) -> Self {
        Self {
            x,
            y,
            sigma_x: sigma,
            sigma_y: sigma,
            amplitude,
            background,
        }
    }

    fn value_at(&self, col: usize, row: usize) -> f64 {
        let dx = col as f64 - self.x;
        let dy = row as f64 - self.y;
        let exponent = -0.5
            * (dx * dx / (self.sigma_x * self.sigma_x) + dy * dy / (self.sigma_y * self.sigma_y));
        self.amplitude * exponent.exp() + self.background
    }
}

fn to_counts(value: f64) -> u16 {
    value.round().clamp(0.0, f64::from(u16::MAX)) as u16
}

/// Render a noiseless star into a `height` x `width` frame.
pub fn render_star(width: usize, height: usize, star: &StarSpec) -> Array2<u16> {
    Array2::from_shape_fn((height, width), |(row, col)| {
        to_counts(star.value_at(col, row))
    })
}

/// Render a star with additive Gaussian read noise of standard deviation `noise`.
pub fn render_star_with_noise<R: Rng + ?Sized>(
    width: usize,
    height: usize,
    star: &StarSpec,
    noise: f64,
    rng: &mut R,
) -> Array2<u16> {
    let Ok(normal) = Normal::new(0.0, noise.max(0.0)) else {
        return render_star(width, height, star);
    };
    Array2::from_shape_fn((height, width), |(row, col)| {
        to_counts(star.value_at(col, row) + normal.sample(rng))
    })
}
