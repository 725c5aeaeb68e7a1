//! Guide camera control nucleus.
//!
//! [`guide_loop::GuideLoop`] owns the [`state::DeviceState`] and runs
//! everything on one thread: operator commands arrive through a
//! [`server::CommandChannel`], are validated and executed by the
//! [`command::CommandInterpreter`], frames are pulled from the grabber,
//! centroided while guiding, and corrections are handed to the
//! [`dispatcher::CorrectionDispatcher`].

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod guide_loop;
pub mod homing;
pub mod metadata;
pub mod server;
pub mod session;
pub mod state;

pub use error::{CommandError, GuiderError, GuiderResult};
pub use guide_loop::GuideLoop;
