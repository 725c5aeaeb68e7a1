//! Image dimensions and size utilities

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image dimensions structure
///
/// Width and height of a sensor, a read-out window, or a fitting stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
}

impl ImageSize {
    /// Create a new ImageSize
    pub const fn from_width_height(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Create an empty u16 array with this size
    ///
    /// Shape is (height, width): rows come first.
    pub fn empty_array_u16(&self) -> Array2<u16> {
        Array2::zeros((self.height, self.width))
    }

    /// Get total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Whether a (possibly fractional) position lies inside `[0, width] x [0, height]`.
    ///
    /// Both edges are inclusive, matching how null positions are validated.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && x <= self.width as f64 && y >= 0.0 && y <= self.height as f64
    }

    /// Largest origin at which a box of `inner` size still fits inside `self`.
    ///
    /// Returns `None` when `inner` is larger than `self` on either axis.
    pub fn max_origin_for(&self, inner: ImageSize) -> Option<(usize, usize)> {
        Some((
            self.width.checked_sub(inner.width)?,
            self.height.checked_sub(inner.height)?,
        ))
    }

    /// Convert to tuple (width, height)
    pub fn to_tuple(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

impl From<(usize, usize)> for ImageSize {
    fn from(dimensions: (usize, usize)) -> Self {
        Self::from_width_height(dimensions.0, dimensions.1)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_point_edges_inclusive() {
        let size = ImageSize::from_width_height(640, 512);
        assert!(size.contains_point(0.0, 0.0));
        assert!(size.contains_point(640.0, 512.0));
        assert!(!size.contains_point(-1.0, 10.0));
        assert!(!size.contains_point(10.0, 512.5));
    }

    #[test]
    fn test_max_origin_for() {
        let frame = ImageSize::from_width_height(640, 512);
        let guide = ImageSize::from_width_height(32, 32);
        assert_eq!(frame.max_origin_for(guide), Some((608, 480)));
        assert_eq!(guide.max_origin_for(frame), None);
    }

    #[test]
    fn test_empty_array_shape_is_rows_first() {
        let arr = ImageSize::from_width_height(4, 3).empty_array_u16();
        assert_eq!(arr.dim(), (3, 4));
    }
}
