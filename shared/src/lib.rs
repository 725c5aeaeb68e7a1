//! Shared components for the guide camera workspace.
//!
//! Hardware-independent pieces used by both the device drivers and the
//! guiding server:
//!
//! - [`image_size`] and [`window`]: sensor geometry and read-out windows
//! - [`image_proc`]: robust background, coarse localization and Gaussian
//!   PSF fitting of a single guide star
//! - [`setup_to_true`]: steering unit calibration transform
//! - [`config_storage`]: persisted guider configuration (feature `config-storage`)
//! - [`synthetic`]: rendered star frames for simulation and tests (feature `synthetic`)

#[cfg(feature = "config-storage")]
pub mod config_storage;
pub mod image_proc;
pub mod image_size;
pub mod setup_to_true;
#[cfg(feature = "synthetic")]
pub mod synthetic;
pub mod window;

pub use image_size::ImageSize;
pub use window::Window;
