//! Read-out windows on the sensor.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::image_size::ImageSize;

/// A rectangular read-out region: origin on the sensor plus size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    /// Column of the first pixel
    pub x0: usize,
    /// Row of the first pixel
    pub y0: usize,
    pub size: ImageSize,
}

impl Window {
    pub const fn new(x0: usize, y0: usize, size: ImageSize) -> Self {
        Self { x0, y0, size }
    }

    /// Window covering the whole sensor.
    pub const fn full_frame(size: ImageSize) -> Self {
        Self::new(0, 0, size)
    }

    pub fn width(&self) -> usize {
        self.size.width
    }

    pub fn height(&self) -> usize {
        self.size.height
    }

    /// Inclusive bounding box `(x0, y0, x1, y1)`.
    pub fn bounds(&self) -> (usize, usize, usize, usize) {
        (
            self.x0,
            self.y0,
            self.x0 + self.size.width.saturating_sub(1),
            self.y0 + self.size.height.saturating_sub(1),
        )
    }

    /// True if the window lies entirely inside a sensor of `frame` size.
    pub fn fits_within(&self, frame: ImageSize) -> bool {
        self.x0 + self.size.width <= frame.width && self.y0 + self.size.height <= frame.height
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@({}, {})", self.size, self.x0, self.y0)
    }
}
