// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for djvuwerk.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all publishing operations.
#[derive(Debug, Error)]
pub enum PublishError {
    // -- Run-aborting errors --
    #[error("invalid page parameters: {0}")]
    Configuration(String),

    #[error("{tool} failed: {detail}")]
    ToolFailure { tool: String, detail: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("expected output is missing after a successful run: {}", .0.display())]
    FilesystemInconsistency(PathBuf),

    #[error("a bundled document is already being built")]
    BundleInProgress,

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("invalid timestamp: {0}")]
    Timestamp(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PublishError {
    /// Shorthand for a failed or unlaunchable external tool.
    pub fn tool(tool: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::ToolFailure {
            tool: tool.into(),
            detail: detail.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PublishError>;
