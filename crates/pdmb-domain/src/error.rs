use thiserror::Error;

/// Fatal failures a build can report back to the front-end.
///
/// Functions return `anyhow::Result`; callers classify a failure with
/// `err.downcast_ref::<BackendError>()`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Malformed or self-contradictory configuration.
    #[error("{0}")]
    Config(String),
    /// The `[project]` table does not match the standard metadata shape.
    #[error("{summary}\n{details}")]
    Validation { summary: String, details: String },
    /// An external build step exited unsuccessfully.
    #[error("error occurred when running {command}:\n{output}")]
    Build { command: String, output: String },
}

impl BackendError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn validation(summary: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Validation {
            summary: summary.into(),
            details: details.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation { .. } => "validation",
            Self::Build { .. } => "build",
        }
    }
}
