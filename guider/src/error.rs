//! Error types for the guider.

use hardware::frame_grabber::GrabberError;
use hardware::isu::IsuError;
use hardware::raptor::ProtocolError;
use shared::config_storage::ConfigError;
use thiserror::Error;

/// Failures that stop the guide loop.
#[derive(Error, Debug)]
pub enum GuiderError {
    #[error("camera protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("steering unit error: {0}")]
    Isu(#[from] IsuError),

    #[error("frame grabber error: {0}")]
    Grabber(#[from] GrabberError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Hardware consistency fault. The process must not continue.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GuiderResult<T> = Result<T, GuiderError>;

/// An operator-visible command failure.
///
/// The `Display` form is the exact reply line sent to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("! \"Syntax Error\"")]
    Syntax,

    #[error("? \"Unbalanced quotes\"")]
    UnbalancedQuotes,

    /// Failure tied to a command: `! CMD "message"`.
    #[error("! {command} \"{message}\"")]
    Failed {
        command: &'static str,
        message: String,
    },

    /// Usage failure without a command echo: `! "message"`.
    #[error("! \"{0}\"")]
    Usage(&'static str),

    /// Bare failure word, as used by ISU: `! OFF`.
    #[error("! {0}")]
    Bare(&'static str),
}

impl CommandError {
    pub fn failed(command: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            command,
            message: message.into(),
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_rendering() {
        assert_eq!(CommandError::Syntax.to_string(), "! \"Syntax Error\"");
        assert_eq!(
            CommandError::UnbalancedQuotes.to_string(),
            "? \"Unbalanced quotes\""
        );
        assert_eq!(
            CommandError::failed("TEC", "Unable to read TEC set point in the camera").to_string(),
            "! TEC \"Unable to read TEC set point in the camera\""
        );
        assert_eq!(
            CommandError::Usage("Invalid video mode").to_string(),
            "! \"Invalid video mode\""
        );
        assert_eq!(CommandError::Bare("OFF").to_string(), "! OFF");
    }
}
