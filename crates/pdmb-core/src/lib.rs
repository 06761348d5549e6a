#![warn(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

mod core;

pub mod api;

pub(crate) use crate::core::config::{context, settings};
pub(crate) use crate::core::python::python_sys;
pub(crate) use crate::core::runtime::process;
pub(crate) use crate::core::{collect, distribution, hooks};

pub use crate::core::config::context::{BuildContext, BuildTarget};
pub use crate::core::config::settings::{ConfigSettings, EnvSnapshot};
pub use crate::core::collect::files::{FileMap, FileSource};
pub use crate::core::distribution::artifacts::{summarize_artifact, ArtifactSummary};
pub use crate::core::distribution::builder::{BuildOptions, BuildOutput, Builder};
pub use crate::core::distribution::editable::EditableProject;
pub use crate::core::hooks::BuildHook;
pub use crate::core::python::python_sys::{InterpreterInfo, InterpreterTags, SystemInterpreter};
pub use crate::core::runtime::process::RunOutput;
pub use crate::core::tooling::outcome::{CommandStatus, ExecutionOutcome};

pub use pdmb_domain::BackendError;

pub(crate) const PDMB_VERSION: &str = env!("CARGO_PKG_VERSION");
