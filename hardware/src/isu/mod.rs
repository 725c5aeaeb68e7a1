//! Image stabilization unit (ISU) interface.
//!
//! The ISU is the guider's fast tip-tilt steering mechanism. Its native motion
//! primitives live outside this workspace; [`SteeringUnit`] is the seam the
//! guider drives them through, and [`sim::SimulatedIsu`] stands in for the
//! mechanism in tests and bench runs.
//!
//! Angles are in milliradians on the mechanism's own axes.

pub mod sim;

use std::f64::consts::PI;

use strum::{Display, EnumIter};
use thiserror::Error;

pub use shared::setup_to_true::{SetupToTrue, SetupToTrueError};

/// Mechanism axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Axis {
    X,
    Y,
}

/// Per-axis fault flags reported by the mechanism.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AxisFaults {
    pub x: bool,
    pub y: bool,
}

impl AxisFaults {
    /// First faulted axis, X before Y.
    pub fn first_fault(&self) -> Option<Axis> {
        if self.x {
            Some(Axis::X)
        } else if self.y {
            Some(Axis::Y)
        } else {
            None
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IsuError {
    #[error("ISU is not homed")]
    NotHomed,

    #[error("ISU {0} axis is in error")]
    AxisFault(Axis),

    #[error("ISU communication failed: {0}")]
    Communication(String),

    #[error("ISU transform failed: {0}")]
    Transform(String),
}

pub type IsuResult<T> = Result<T, IsuError>;

/// Motion primitives of a two-axis steering mechanism.
///
/// Methods take `&self` so one unit can be shared between the guide loop
/// and per-axis correction workers; implementations serialize access to the
/// hardware internally.
pub trait SteeringUnit: Send + Sync {
    fn is_homed(&self) -> IsuResult<bool>;

    /// Run the homing sequence. Blocks until it completes.
    fn home(&self) -> IsuResult<()>;

    fn enable(&self) -> IsuResult<()>;

    fn stop(&self) -> IsuResult<()>;

    fn check_faults(&self) -> IsuResult<AxisFaults>;

    /// Current (x, y) angles in mrad.
    fn angles(&self) -> IsuResult<(f64, f64)>;

    /// Move `axis` from `from_mrad` to `to_mrad` over one frame at `rate_hz`.
    fn slew(&self, axis: Axis, rate_hz: f64, from_mrad: f64, to_mrad: f64) -> IsuResult<()>;
}

/// Milliradians per arcsecond.
pub const MRAD_PER_ARCSEC: f64 = PI / (180.0 * 3600.0) * 1000.0;

pub fn arcsec_to_mrad(arcsec: f64) -> f64 {
    arcsec * MRAD_PER_ARCSEC
}
