//! Device drivers for the guide camera.
//!
//! This crate provides drivers for the hardware the guider talks to. Each
//! physical transport is feature-gated for optional compilation.
//!
//! - [`raptor`] - checksummed register protocol of the Raptor guide camera
//! - [`isu`] - image stabilization unit (fast steering mechanism) interface
//! - [`frame_grabber`] - pixel acquisition interface
//!
//! Every interface has a simulated implementation (`sim` submodules and
//! [`frame_grabber::SimulatedGrabber`]) used by tests and `--simulate` runs.
//!
//! # Features
//!
//! - `serial` - Raptor camera over a host serial port (`serialport`)

pub mod frame_grabber;
pub mod isu;
pub mod raptor;
