use pdmb_domain::BackendError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Failure,
            message: message.into(),
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            details,
        }
    }

    /// Classifies a failed build. Problems in the project configuration are the
    /// user's to fix; everything else is reported as a failure.
    pub fn from_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<BackendError>() {
            Some(backend @ (BackendError::Config(_) | BackendError::Validation { .. })) => {
                Self::user_error(
                    backend.to_string(),
                    json!({ "kind": backend.kind() }),
                )
            }
            Some(backend @ BackendError::Build { command, output }) => Self::failure(
                format!("error occurred when running {command}"),
                json!({ "kind": backend.kind(), "command": command, "output": output }),
            ),
            None => Self::failure(format!("{err:#}"), json!({ "kind": "internal" })),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.status {
            CommandStatus::Ok => 0,
            CommandStatus::UserError => 1,
            CommandStatus::Failure => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_user_errors() {
        let err = anyhow::Error::new(BackendError::config("tool.pdm.version.source is required"));
        let outcome = ExecutionOutcome::from_error(&err);
        assert_eq!(outcome.status, CommandStatus::UserError);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.details["kind"], "config");
    }

    #[test]
    fn build_errors_keep_command_output() {
        let err = anyhow::Error::new(BackendError::Build {
            command: "python setup.py build".into(),
            output: "error: no compiler".into(),
        });
        let outcome = ExecutionOutcome::from_error(&err);
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(outcome.exit_code(), 2);
        assert_eq!(outcome.details["output"], "error: no compiler");
    }

    #[test]
    fn unclassified_errors_are_failures() {
        let err = anyhow::anyhow!("disk full").context("failed to write wheel");
        let outcome = ExecutionOutcome::from_error(&err);
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert!(outcome.message.contains("disk full"));
    }
}
