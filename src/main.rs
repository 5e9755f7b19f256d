use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use flameiq::cli::{Cli, OutputFormat};
use flameiq::error::ConfigurationError;
use flameiq::events::LogSink;
use flameiq::report;
use flameiq::session::{run_session, SessionConfig, SessionResult};

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn render(result: &SessionResult, format: OutputFormat, writer: &mut impl Write) -> Result<()> {
    match format {
        OutputFormat::Folded => report::write_folded(&result.aggregated, writer),
        OutputFormat::Json => report::write_json(result, writer),
    }
}

fn write_report(result: &SessionResult, format: OutputFormat, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to create output file {}", path.display()))?;
            render(result, format, &mut file)?;
            eprintln!("[flameiq: report written to {}]", path.display());
            Ok(())
        }
        None => render(result, format, &mut std::io::stdout().lock()),
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    // PID attach is a deliberate non-goal: reject loudly, never no-op.
    if args.pid.is_some() {
        return Err(ConfigurationError::PidAttachUnsupported.into());
    }
    let command = args
        .command
        .filter(|c| !c.is_empty())
        .ok_or(ConfigurationError::EmptyCommand)
        .context("Usage: flameiq [OPTIONS] -- COMMAND [ARGS...]")?;

    let config = SessionConfig::new(command, Duration::from_secs(args.duration), args.rate);
    let mut sink = LogSink;
    let result = run_session(config, &mut sink)?;

    write_report(&result, args.format, args.output.as_deref())?;

    eprintln!(
        "[flameiq: {} samples over {:.1}s{}]",
        result.samples_taken,
        result.duration_elapsed.as_secs_f64(),
        if result.early_exit {
            ", target exited early"
        } else {
            ""
        }
    );

    // Surface the target's own failure as our exit status.
    if let Some(code) = result.target_exit_code {
        if code != 0 {
            std::process::exit(code);
        }
    }
    Ok(())
}
