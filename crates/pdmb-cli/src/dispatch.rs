use anyhow::Result;
use pdmb_core::{api, summarize_artifact, BuildOutput, BuildTarget, ConfigSettings, ExecutionOutcome};
use serde_json::json;

use crate::cli::{BuildArgs, CommandCli, MetadataArgs, MetadataTargetArg, PdmbCli, RequiresArgs};

/// Runs the selected command, folding failures into the outcome.
pub fn execute(cli: &PdmbCli) -> ExecutionOutcome {
    match run(cli) {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            ExecutionOutcome::from_error(&err)
        }
    }
}

fn run(cli: &PdmbCli) -> Result<ExecutionOutcome> {
    let settings = ConfigSettings::parse_pairs(&cli.config_settings)?;
    match &cli.command {
        CommandCli::Requires(args) => requires(cli, args, &settings),
        CommandCli::Metadata(args) => metadata(cli, args, &settings),
        CommandCli::Build(args) => build(cli, args, &settings),
    }
}

fn requires(cli: &PdmbCli, args: &RequiresArgs, settings: &ConfigSettings) -> Result<ExecutionOutcome> {
    let root = &cli.project;
    let requires = match BuildTarget::from(args.target) {
        BuildTarget::Wheel => api::get_requires_for_build_wheel(root, settings)?,
        BuildTarget::Sdist => api::get_requires_for_build_sdist(root, settings)?,
        BuildTarget::Editable => api::get_requires_for_build_editable(root, settings)?,
    };
    let message = if requires.is_empty() {
        "no extra build requirements".to_string()
    } else {
        requires.join("\n")
    };
    Ok(ExecutionOutcome::success(message, json!({ "requires": requires })))
}

fn metadata(cli: &PdmbCli, args: &MetadataArgs, settings: &ConfigSettings) -> Result<ExecutionOutcome> {
    let root = &cli.project;
    let name = match args.target {
        MetadataTargetArg::Wheel => api::prepare_metadata_for_build_wheel(root, &args.directory, settings)?,
        MetadataTargetArg::Editable => {
            api::prepare_metadata_for_build_editable(root, &args.directory, settings)?
        }
    };
    Ok(ExecutionOutcome::success(
        name.clone(),
        json!({
            "dist_info": name,
            "path": args.directory.join(&name),
        }),
    ))
}

fn build(cli: &PdmbCli, args: &BuildArgs, settings: &ConfigSettings) -> Result<ExecutionOutcome> {
    let root = &cli.project;
    let metadata_directory = args.metadata_directory.as_deref();
    let target = BuildTarget::from(args.target);
    let output: BuildOutput = match target {
        BuildTarget::Wheel => api::build_wheel_output(root, &args.out_dir, settings, metadata_directory)?,
        BuildTarget::Editable => {
            api::build_editable_output(root, &args.out_dir, settings, metadata_directory)?
        }
        BuildTarget::Sdist => api::build_sdist_output(root, &args.out_dir, settings)?,
    };
    let summary = summarize_artifact(&output.artifact)?;
    Ok(ExecutionOutcome::success(
        output.file_name(),
        json!({
            "target": target.as_str(),
            "file_name": output.file_name(),
            "artifact": summary,
            "warnings": output.warnings,
        }),
    ))
}
