// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for the command line.
//
// Every technical error is mapped to plain English with a clear suggestion.
// The severity drives the exit code and how loudly the CLI reports it.

use crate::error::PublishError;

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Running the same command again may succeed.
    Transient,
    /// The user must fix something first (install a tool, edit a setting).
    ActionRequired,
    /// The project itself is in a state the engine cannot repair.
    Permanent,
    /// Not a failure: the user asked to stop.
    Interrupted,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (first line of output).
    pub message: String,
    /// What the user should try next.
    pub suggestion: String,
    /// Whether re-running the command is worthwhile as-is.
    pub retriable: bool,
    pub severity: Severity,
}

/// Convert a `PublishError` into a `HumanError`.
pub fn humanize_error(err: &PublishError) -> HumanError {
    match err {
        PublishError::Configuration(detail) => HumanError {
            message: "Some page settings are missing or invalid.".into(),
            suggestion: format!("Check the page settings and run again. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        PublishError::ToolFailure { tool, detail } => humanize_tool_failure(tool, detail),

        PublishError::Cancelled => HumanError {
            message: "Publishing was cancelled.".into(),
            suggestion: "Nothing was marked as done. Run the command again to resume.".into(),
            retriable: true,
            severity: Severity::Interrupted,
        },

        PublishError::FilesystemInconsistency(path) => HumanError {
            message: "An encoder reported success but its output file is missing.".into(),
            suggestion: format!(
                "Check free disk space and that nothing else removes files from {}.",
                path.display()
            ),
            retriable: true,
            severity: Severity::Permanent,
        },

        PublishError::BundleInProgress => HumanError {
            message: "A bundled document is already being built.".into(),
            suggestion: "Wait for the running bundle to finish, then try again.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        PublishError::Database(_) => HumanError {
            message: "The project database had a problem.".into(),
            suggestion: "Make sure no other djvuwerk process uses this project, then try again.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        PublishError::Timestamp(detail) => HumanError {
            message: "The project file contains an unreadable timestamp.".into(),
            suggestion: format!("Reassign the dictionaries to rebuild the saved state. ({detail})"),
            retriable: false,
            severity: Severity::Permanent,
        },

        PublishError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound => HumanError {
                message: "A file or folder couldn't be found.".into(),
                suggestion: "Check the project and output paths, then run again.".into(),
                retriable: false,
                severity: Severity::ActionRequired,
            },
            std::io::ErrorKind::PermissionDenied => HumanError {
                message: "djvuwerk doesn't have permission to write the output.".into(),
                suggestion: "Check the permissions of the output folder.".into(),
                retriable: false,
                severity: Severity::ActionRequired,
            },
            _ => HumanError {
                message: "There was a problem reading or writing a file.".into(),
                suggestion: "Try again. If this keeps happening, the disk may be full.".into(),
                retriable: true,
                severity: Severity::Transient,
            },
        },

        PublishError::Serialization(_) => HumanError {
            message: "Saved project data couldn't be read.".into(),
            suggestion: "Reassign the dictionaries to rebuild the saved state.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },
    }
}

/// Encoder failures: a launch error usually means the binary is not installed.
fn humanize_tool_failure(tool: &str, detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();

    if lower.contains("no such file") || lower.contains("not found") || lower.contains("cannot launch") {
        HumanError {
            message: format!("The encoder `{tool}` could not be started."),
            suggestion: format!("Install DjVuLibre / minidjvu-mod, or set the path to `{tool}` in config.json."),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("permission denied") {
        HumanError {
            message: format!("The encoder `{tool}` is not executable."),
            suggestion: "Check the file permissions of the configured encoder.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else {
        HumanError {
            message: format!("The encoder `{tool}` failed."),
            suggestion: format!("Check the source images of the affected pages, then run again. (Detail: {detail})"),
            retriable: true,
            severity: Severity::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_action_required() {
        let err = PublishError::tool("c44", "cannot launch c44: No such file or directory (os error 2)");
        let human = humanize_error(&err);
        assert_eq!(human.severity, Severity::ActionRequired);
        assert!(!human.retriable);
    }

    #[test]
    fn nonzero_exit_is_transient() {
        let err = PublishError::tool("minidjvu-mod", "exited with status 1");
        let human = humanize_error(&err);
        assert_eq!(human.severity, Severity::Transient);
        assert!(human.suggestion.contains("exited with status 1"));
    }

    #[test]
    fn cancellation_is_not_a_failure() {
        let human = humanize_error(&PublishError::Cancelled);
        assert_eq!(human.severity, Severity::Interrupted);
    }

    #[test]
    fn missing_output_is_permanent() {
        let err = PublishError::FilesystemInconsistency("/out/djvu/p01.djvu".into());
        let human = humanize_error(&err);
        assert_eq!(human.severity, Severity::Permanent);
        assert!(human.suggestion.contains("p01.djvu"));
    }
}
