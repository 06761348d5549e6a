use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use pdmb_core::BuildTarget;

#[derive(Parser, Debug)]
#[command(
    name = "pdmb",
    author,
    version,
    about = "Build wheels, sdists and editable wheels for Python projects",
    disable_help_subcommand = true
)]
#[allow(clippy::struct_excessive_bools)]
pub struct PdmbCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(long, help = "Emit {status,message,details} JSON envelopes", global = true)]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[arg(
        short = 'p',
        long,
        value_name = "DIR",
        default_value = ".",
        help = "Project root containing pyproject.toml",
        global = true
    )]
    pub project: PathBuf,
    #[arg(
        short = 'C',
        long = "config-setting",
        value_name = "KEY[=VALUE]",
        allow_hyphen_values = true,
        help = "Build setting passed to the backend, e.g. -C --python-tag=py3",
        global = true
    )]
    pub config_settings: Vec<String>,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    /// Print the extra requirements needed to build an artifact.
    Requires(RequiresArgs),
    /// Write the .dist-info directory a wheel build would ship.
    Metadata(MetadataArgs),
    /// Build an artifact into the output directory.
    Build(BuildArgs),
}

#[derive(Args, Debug)]
pub struct RequiresArgs {
    #[arg(value_enum)]
    pub target: TargetArg,
}

#[derive(Args, Debug)]
pub struct MetadataArgs {
    #[arg(value_enum)]
    pub target: MetadataTargetArg,
    #[arg(value_name = "METADATA_DIR", help = "Directory receiving the .dist-info")]
    pub directory: PathBuf,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    #[arg(value_enum)]
    pub target: TargetArg,
    #[arg(
        short,
        long,
        value_name = "DIR",
        default_value = "dist",
        help = "Directory receiving the artifact"
    )]
    pub out_dir: PathBuf,
    #[arg(
        long,
        value_name = "DIR",
        help = "Prepared .dist-info directory to ship instead of fresh metadata"
    )]
    pub metadata_directory: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetArg {
    Wheel,
    Sdist,
    Editable,
}

impl From<TargetArg> for BuildTarget {
    fn from(value: TargetArg) -> Self {
        match value {
            TargetArg::Wheel => Self::Wheel,
            TargetArg::Sdist => Self::Sdist,
            TargetArg::Editable => Self::Editable,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetadataTargetArg {
    Wheel,
    Editable,
}
