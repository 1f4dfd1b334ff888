//! Recording errors
//!
//! Every fallible operation in the recorder returns [`RecordingResult`].

use crate::recorder::state::CaptureState;
use thiserror::Error;

/// Errors that can occur during recording
#[derive(Error, Debug)]
pub enum RecordingError {
    /// Invalid region, frame rate or other settings. Raised before any thread starts.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The encoder binary is missing or rejected its arguments at startup.
    #[error("Failed to launch encoder: {0}")]
    ProcessLaunchError(String),

    /// The encoder process went away while we were still feeding it.
    #[error("Encoder input pipe broken: {0}")]
    PipeBroken(String),

    /// The encoder exited with a failure status during finalization.
    #[error("Encoder exited with status {}{}", describe_code(.code), format_stderr(.stderr))]
    EncoderExit { code: Option<i32>, stderr: String },

    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: CaptureState,
    },

    #[error("Capture error: {0}")]
    CaptureError(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Audio error: {0}")]
    AudioError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

fn describe_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

fn format_stderr(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

impl RecordingError {
    /// Exit code carried by [`RecordingError::EncoderExit`], if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RecordingError::EncoderExit { code, .. } => *code,
            _ => None,
        }
    }
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_exit_message_includes_stderr_tail() {
        let err = RecordingError::EncoderExit {
            code: Some(1),
            stderr: "Unknown encoder 'libx265'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Encoder exited with status 1: Unknown encoder 'libx265'"
        );
        assert_eq!(err.exit_code(), Some(1));
    }

    #[test]
    fn test_encoder_exit_by_signal() {
        let err = RecordingError::EncoderExit {
            code: None,
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "Encoder exited with status signal");
        assert_eq!(err.exit_code(), None);
    }

    #[test]
    fn test_invalid_state_message() {
        let err = RecordingError::InvalidState {
            action: "stop",
            state: CaptureState::Idle,
        };
        assert_eq!(err.to_string(), "Cannot stop while idle");
    }
}
