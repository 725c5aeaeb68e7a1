//! Runtime options and fixed instrument constants.

use std::time::Duration;

use hardware::raptor::{SENSOR_HEIGHT, SENSOR_WIDTH};
use shared::ImageSize;

/// Full sensor read-out.
pub const FRAME_SIZE: ImageSize = ImageSize::from_width_height(SENSOR_WIDTH, SENSOR_HEIGHT);

/// Guide sub-window read out while guiding.
pub const GUIDE_SIZE: ImageSize = ImageSize::from_width_height(32, 32);

/// Plate scale, arcseconds per pixel.
pub const PIXEL_SCALE: f64 = 0.128;

pub const MAX_FRAME_RATE: f64 = 120.0;

/// Longest frame period a client will wait for, in milliseconds.
pub const USER_TIMEOUT_MS: f64 = 20_000.0;

/// Slew rate used when the frame rate reads back as zero.
pub const DEFAULT_SLEW_RATE_HZ: f64 = 50.0;

pub const MAX_SAVE_COUNT: i64 = 1_000_000;

pub const GRABBER_BUFFERS: usize = 4;

/// Seeing jitter injected in simulated-star mode: 0.65 arcsec FWHM.
pub const SIM_STAR_SIGMA_ARCSEC: f64 = 0.276;

/// Flags resolved once at startup and passed to the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct GuiderOptions {
    /// Inject simulated seeing instead of measuring the star.
    pub simulate_star: bool,
    /// Slew on the loop thread instead of on the per-axis workers.
    pub direct_corrections: bool,
    /// Emit a per-frame timing record.
    pub verbose: bool,
    /// How long one command poll may block while streaming.
    pub poll_timeout: Duration,
    /// Poll timeout while no frames are being taken.
    pub idle_poll_timeout: Duration,
    /// Seed for the simulated-star jitter.
    pub jitter_seed: u64,
}

impl Default for GuiderOptions {
    fn default() -> Self {
        Self {
            simulate_star: false,
            direct_corrections: false,
            verbose: false,
            poll_timeout: Duration::from_millis(1),
            idle_poll_timeout: Duration::from_millis(50),
            jitter_seed: 0x5747_4152,
        }
    }
}
