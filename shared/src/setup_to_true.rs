//! Setup-to-true calibration of the image stabilization unit.
//!
//! Maps an angular error measured in the guide camera frame (mrad) into the
//! delta the steering unit must move on each of its axes (mrad). The model
//! is a 2x2 coupling matrix followed by an independent cubic on each axis:
//!
//! ```text
//! [u, v]^T = M * [x, y]^T
//! x' = c0 + c1 u + c2 u^2 + c3 u^3
//! y' = d0 + d1 v + d2 v^2 + d3 v^3
//! ```
//!
//! The identity transform (`M = I`, `c = d = [0, 1, 0, 0]`) passes angles
//! through unchanged and is the default when no calibration is stored.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

/// Error during transform load/save or validation
#[derive(Error, Debug)]
pub enum SetupToTrueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A coefficient is NaN or infinite
    #[error("non-finite coefficient in {0}")]
    NonFinite(&'static str),
}

/// Persistent setup-to-true calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupToTrue {
    /// Row-major coupling matrix [m00, m01, m10, m11]
    coupling: [f64; 4],

    /// Cubic coefficients for the X axis, constant term first
    x_poly: [f64; 4],

    /// Cubic coefficients for the Y axis, constant term first
    y_poly: [f64; 4],

    #[serde(default)]
    description: Option<String>,
}

impl Default for SetupToTrue {
    fn default() -> Self {
        Self::identity()
    }
}

impl SetupToTrue {
    /// Pass-through transform.
    pub fn identity() -> Self {
        Self {
            coupling: [1.0, 0.0, 0.0, 1.0],
            x_poly: [0.0, 1.0, 0.0, 0.0],
            y_poly: [0.0, 1.0, 0.0, 0.0],
            description: None,
        }
    }

    pub fn new(
        coupling: [f64; 4],
        x_poly: [f64; 4],
        y_poly: [f64; 4],
    ) -> Result<Self, SetupToTrueError> {
        let transform = Self {
            coupling,
            x_poly,
            y_poly,
            description: None,
        };
        transform.validate()?;
        Ok(transform)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Reject NaN or infinite coefficients.
    pub fn validate(&self) -> Result<(), SetupToTrueError> {
        if !self.coupling.iter().all(|c| c.is_finite()) {
            return Err(SetupToTrueError::NonFinite("coupling"));
        }
        if !self.x_poly.iter().all(|c| c.is_finite()) {
            return Err(SetupToTrueError::NonFinite("x_poly"));
        }
        if !self.y_poly.iter().all(|c| c.is_finite()) {
            return Err(SetupToTrueError::NonFinite("y_poly"));
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SetupToTrueError> {
        let reader = BufReader::new(File::open(path)?);
        let transform: Self = serde_json::from_reader(reader)?;
        transform.validate()?;
        Ok(transform)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SetupToTrueError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    fn coupling_matrix(&self) -> Matrix2<f64> {
        Matrix2::new(
            self.coupling[0],
            self.coupling[1],
            self.coupling[2],
            self.coupling[3],
        )
    }

    /// Convert a camera-frame angle pair (mrad) into a steering unit delta (mrad).
    pub fn apply(&self, x_mrad: f64, y_mrad: f64) -> (f64, f64) {
        let coupled = self.coupling_matrix() * Vector2::new(x_mrad, y_mrad);
        (cubic(&self.x_poly, coupled.x), cubic(&self.y_poly, coupled.y))
    }
}

fn cubic(c: &[f64; 4], t: f64) -> f64 {
    c[0] + t * (c[1] + t * (c[2] + t * c[3]))
}
