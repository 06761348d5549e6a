use atty::Stream;
use clap::Parser;
use color_eyre::Result;
use pdmb_core::{CommandStatus, ExecutionOutcome};
use serde_json::{json, Value};

mod cli;
mod dispatch;
mod style;

use cli::PdmbCli;
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = PdmbCli::parse();
    init_tracing(cli.trace, cli.verbose, cli.quiet);

    let outcome = dispatch::execute(&cli);
    let code = emit_output(&cli, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool) {
    let level = if trace {
        "trace"
    } else if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("pdmb={level},pdmb_core={level},pdmb_domain={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn status_label(status: &CommandStatus) -> &'static str {
    match status {
        CommandStatus::Ok => "ok",
        CommandStatus::UserError => "user-error",
        CommandStatus::Failure => "error",
    }
}

fn to_json_response(outcome: &ExecutionOutcome) -> Value {
    let details = match &outcome.details {
        Value::Object(_) => outcome.details.clone(),
        Value::Null => json!({}),
        other => json!({ "value": other }),
    };
    json!({
        "status": status_label(&outcome.status),
        "message": outcome.message,
        "details": details,
    })
}

fn built_artifact(details: &Value) -> Option<(&str, &str, u64)> {
    let target = details.get("target")?.as_str()?;
    let artifact = details.get("artifact")?;
    Some((
        target,
        artifact.get("path")?.as_str()?,
        artifact.get("bytes")?.as_u64()?,
    ))
}

fn emit_output(cli: &PdmbCli, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&to_json_response(outcome))?);
        return Ok(code);
    }

    let style = Style::new(cli.no_color, atty::is(Stream::Stderr));
    if outcome.status == CommandStatus::Ok {
        if !cli.quiet {
            println!("{}", outcome.message);
            if let Some((target, path, bytes)) = built_artifact(&outcome.details) {
                eprintln!("{}", style.built(target, path, bytes));
            }
            if let Some(warnings) = outcome.details.get("warnings").and_then(Value::as_array) {
                for warning in warnings.iter().filter_map(Value::as_str) {
                    eprintln!("{}", style.warning(warning));
                }
            }
        }
    } else {
        eprintln!("{}", style.status(&outcome.status, &outcome.message));
        if let Some(output) = outcome.details.get("output").and_then(Value::as_str) {
            eprintln!("{}", style.dimmed(output));
        }
    }
    Ok(code)
}
