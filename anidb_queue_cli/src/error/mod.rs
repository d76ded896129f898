use anidb_queue_core::Error as CoreError;
use anidb_queue_core::protocol::ProtocolError;
use colored::*;

/// Semantic exit codes for the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    Misuse = 2,
    NetworkError = 3,
    FilesystemError = 4,
}

impl ExitCode {
    /// Pick the exit code from the first library error in the chain
    pub fn for_error(error: &anyhow::Error) -> Self {
        for cause in error.chain() {
            if let Some(core) = cause.downcast_ref::<CoreError>() {
                return match core {
                    CoreError::Io(_) => Self::FilesystemError,
                    CoreError::Protocol(_) => Self::NetworkError,
                    CoreError::Validation(_) => Self::Misuse,
                    CoreError::Internal(_) => Self::GeneralError,
                };
            }
            if cause.downcast_ref::<ProtocolError>().is_some() {
                return Self::NetworkError;
            }
            if cause.downcast_ref::<std::io::Error>().is_some() {
                return Self::FilesystemError;
            }
        }
        Self::GeneralError
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Render an error and its causes for the terminal
pub fn format_for_user(error: &anyhow::Error, debug: bool) -> String {
    let mut output = format!("{} {error}", "Error:".red().bold());

    let causes: Vec<_> = error.chain().skip(1).collect();
    if !causes.is_empty() {
        output.push_str(&format!("\n\n{}", "Caused by:".yellow()));
        for cause in causes {
            output.push_str(&format!("\n  {cause}"));
        }
    }

    if debug {
        output.push_str(&format!("\n\n{}\n{error:?}", "Debug:".dimmed()));
    }

    output
}
