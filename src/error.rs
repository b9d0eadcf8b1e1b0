// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Sift

use thiserror::Error;

/// Result type alias for Sift operations
pub type Result<T> = std::result::Result<T, SiftError>;

/// Sift error types
///
/// Nothing here is fatal to a run: transport failures degrade a single file to
/// an indeterminate verdict and file system failures are reported per file.
#[derive(Error, Debug)]
pub enum SiftError {
    /// Missing concept, template or extensions before a run starts
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    /// A file system precondition did not hold (missing file, occupied path)
    #[error("File system error: {0}")]
    Placement(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The inference server answered, but not with something usable
    #[error("Transport error: {0}")]
    BadReply(String),

    #[error("Ollama not available: {0}")]
    OllamaUnavailable(String),

    /// Undo without a record, or start while a run is active
    #[error("State error: {0}")]
    State(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SiftError {
    /// True for failures of the inference call itself
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SiftError::Transport(_) | SiftError::BadReply(_) | SiftError::OllamaUnavailable(_)
        )
    }

    /// True for failures touching the disk
    pub fn is_file_system(&self) -> bool {
        matches!(self, SiftError::FileSystem(_) | SiftError::Placement(_))
    }
}
