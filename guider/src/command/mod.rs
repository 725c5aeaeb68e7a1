//! Operator command interpreter.
//!
//! A command line is tokenized, looked up in a [`CommandRegistry`] and
//! validated into a typed [`Command`] without touching any device. Only a
//! fully validated command is executed against the [`CommandContext`], so a
//! rejected line never leaves partial changes behind.

pub mod args;
mod handlers;
mod parse;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hardware::frame_grabber::FrameGrabber;
use hardware::isu::SteeringUnit;
use hardware::raptor::{RaptorCamera, SerialLink};
use tracing::debug;

use crate::error::{CommandError, CommandResult};
use crate::homing::HomingTask;
use crate::state::{DeviceState, ExposureSession};

/// Status character for success replies.
pub const PASS: char = '.';
/// Status character for out-of-band notices.
pub const NOTICE: char = '*';

/// A validated operator request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Quit,
    Shutdown,
    StartExp(ExposureSession),
    EndExp,
    FrameRate(Option<f64>),
    ExpTime(Option<f64>),
    Tec(Option<f64>),
    Temp,
    Roi(Option<(usize, usize)>),
    Null(Option<(f64, f64)>),
    Video(bool),
    Guide(bool),
    Isu(bool),
    Save { count: u32, comment: String },
}

/// What the session should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Send this line.
    Line(String),
    /// Close the session without a reply.
    Close,
    /// Stop the server.
    Shutdown,
    /// Nothing to send.
    Silent,
}

impl Reply {
    pub fn ok(payload: impl fmt::Display) -> Self {
        Reply::Line(format!("{PASS} {payload}"))
    }

    pub fn line(&self) -> Option<&str> {
        match self {
            Reply::Line(line) => Some(line),
            _ => None,
        }
    }
}

impl From<CommandError> for Reply {
    fn from(error: CommandError) -> Self {
        Reply::Line(error.to_string())
    }
}

/// Format an out-of-band notice.
pub fn notice(text: impl fmt::Display) -> String {
    format!("{NOTICE} {text}")
}

/// Validates the arguments of one command against the current state.
pub type Validator = fn(&[String], &DeviceState) -> CommandResult<Command>;

/// Command name to validator table.
pub struct CommandRegistry {
    validators: HashMap<&'static str, Validator>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            validators: HashMap::new(),
        };
        parse::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, name: &'static str, validator: Validator) {
        self.validators.insert(name, validator);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name.to_ascii_uppercase().as_str())
    }

    /// Tokenize and validate one line. Blank lines yield `None`.
    pub fn parse(&self, line: &str, state: &DeviceState) -> CommandResult<Option<Command>> {
        let tokens = args::tokenize(line)?;
        let Some((name, rest)) = tokens.split_first() else {
            return Ok(None);
        };
        let validator = self
            .validators
            .get(name.to_ascii_uppercase().as_str())
            .ok_or(CommandError::Syntax)?;
        validator(rest, state).map(Some)
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Devices and state a command may act on.
pub struct CommandContext<'a> {
    pub state: &'a mut DeviceState,
    pub camera: &'a mut RaptorCamera<Box<dyn SerialLink>>,
    pub grabber: &'a mut dyn FrameGrabber,
    pub isu: Option<&'a Arc<dyn SteeringUnit>>,
    pub homing: &'a mut HomingTask,
}

#[derive(Default)]
pub struct CommandInterpreter {
    registry: CommandRegistry,
}

impl CommandInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Handle one command line and produce the reply.
    pub fn handle(&self, line: &str, ctx: &mut CommandContext<'_>) -> Reply {
        debug!("command: {line}");
        let reply = match self.registry.parse(line, ctx.state) {
            Ok(Some(command)) => handlers::execute(command, ctx).unwrap_or_else(Reply::from),
            Ok(None) => Reply::Silent,
            Err(e) => Reply::from(e),
        };
        debug!("reply: {reply:?}");
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardware::raptor::CameraSettings;
    use shared::config_storage::GuiderConfig;

    fn state() -> DeviceState {
        DeviceState::new(&GuiderConfig::default(), &CameraSettings::default())
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let registry = CommandRegistry::new();
        let s = state();
        assert_eq!(registry.parse("quit", &s), Ok(Some(Command::Quit)));
        assert_eq!(registry.parse("Video on", &s), Ok(Some(Command::Video(true))));
        assert!(registry.contains("framerate"));
    }

    #[test]
    fn test_unknown_and_blank() {
        let registry = CommandRegistry::new();
        let s = state();
        assert_eq!(registry.parse("FOCUS 10", &s), Err(CommandError::Syntax));
        assert_eq!(registry.parse("   ", &s), Ok(None));
        assert_eq!(
            registry.parse("SAVE 1 \"oops", &s),
            Err(CommandError::UnbalancedQuotes)
        );
    }

    #[test]
    fn test_reply_rendering() {
        assert_eq!(Reply::ok("GUIDE ON").line(), Some(". GUIDE ON"));
        assert_eq!(Reply::from(CommandError::Syntax).line(), Some("! \"Syntax Error\""));
        assert_eq!(Reply::Close.line(), None);
        assert_eq!(notice("ISU ON"), "* ISU ON");
    }
}
