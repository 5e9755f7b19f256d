//! CLI argument parsing for FlameIQ

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Report format for a finished session
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Collapsed stacks, one `stack count` line each (flame graph input)
    Folded,
    /// JSON summary with the frequency table and session metadata
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "flameiq")]
#[command(version)]
#[command(about = "Statistical sampling profiler with collapsed-stack output", long_about = None)]
pub struct Cli {
    /// Profiling duration in seconds
    #[arg(short, long, value_name = "SECONDS", default_value = "10")]
    pub duration: u64,

    /// Sampling rate in Hz
    #[arg(short = 'r', long = "rate", value_name = "HZ", default_value = "100")]
    pub rate: u32,

    /// Write the report to this file instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Report format
    #[arg(long = "format", value_enum, default_value = "folded")]
    pub format: OutputFormat,

    /// Attach to a running process by PID (not supported; pass a command instead)
    #[arg(short = 'p', long = "pid", value_name = "PID")]
    pub pid: Option<i32>,

    /// Enable debug logging to stderr
    #[arg(long)]
    pub debug: bool,

    /// Command to profile (everything after --)
    #[arg(last = true)]
    pub command: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_command() {
        let cli = Cli::parse_from(["flameiq", "--", "sleep", "5"]);
        let cmd = cli.command.unwrap();
        assert_eq!(cmd[0], "sleep");
        assert_eq!(cmd[1], "5");
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["flameiq", "--", "true"]);
        assert_eq!(cli.duration, 10);
        assert_eq!(cli.rate, 100);
        assert!(cli.output.is_none());
        assert!(cli.pid.is_none());
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_duration_and_rate() {
        let cli = Cli::parse_from(["flameiq", "-d", "3", "-r", "250", "--", "true"]);
        assert_eq!(cli.duration, 3);
        assert_eq!(cli.rate, 250);
    }

    #[test]
    fn test_cli_output_and_format() {
        let cli = Cli::parse_from([
            "flameiq", "-o", "out.folded", "--format", "json", "--", "true",
        ]);
        assert_eq!(cli.output.unwrap().to_str().unwrap(), "out.folded");
        assert!(matches!(cli.format, OutputFormat::Json));
    }

    #[test]
    fn test_cli_pid_flag_parses() {
        // Parsing succeeds; the rejection happens in main with a clear
        // error, not as a silent no-op.
        let cli = Cli::parse_from(["flameiq", "-p", "1234"]);
        assert_eq!(cli.pid, Some(1234));
    }

    #[test]
    fn test_cli_no_command_is_none() {
        let cli = Cli::parse_from(["flameiq"]);
        assert!(cli.command.is_none());
    }
}
