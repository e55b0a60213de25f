//! retouch: headless front end for an editing session.
//!
//! Loads an image, runs a script of steps through a [`Session`] (on the
//! background worker unless `--inline`), writes the result and prints the
//! history. Each step is one of:
//!
//! - an operation in textual form, e.g. `grayscale`, `multi-otsu:classes=4`,
//!   `sobel:threshold=0.3`
//! - `undo`, `redo` or `revert`
//! - `threshold=<value>` to re-run the current edge detection step with a
//!   new threshold without adding a history entry
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin retouch -- photo.png \
//!     --step grayscale --step sobel:threshold=0.25 --step undo -o out.png
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use retouch_core::{ConfigError, ExportFormat, Session, SessionConfig, SessionError};
use retouch_io::{IoError, StdCodec};
use retouch_ops::{Descriptor, Family, Handler, OpError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Classical image operations with undo/redo, from the command line.
///
/// Runs each `--step` in order on the input image and prints the
/// resulting history. Logging goes to stderr and is controlled with
/// `RUST_LOG` (default `info`).
#[derive(Parser)]
#[command(name = "retouch", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    #[arg(required_unless_present = "list_operations")]
    input: Option<PathBuf>,

    /// Step to run: an operation (`kind[:name=value,...]`), `undo`,
    /// `redo`, `revert` or `threshold=<value>`. Repeatable.
    #[arg(short, long = "step", value_name = "STEP")]
    steps: Vec<Step>,

    /// Write the current image here when the script finishes. The format
    /// follows the extension.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the unedited input here, converted to the extension's format.
    #[arg(long)]
    export_original: Option<PathBuf>,

    /// Session config as a JSON file.
    #[arg(long, conflicts_with = "config_json")]
    config: Option<PathBuf>,

    /// Session config as a JSON string.
    ///
    /// Fields that are left out keep their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Run operations on the calling thread instead of the worker.
    #[arg(long)]
    inline: bool,

    /// Print the history as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Log failing steps and continue with the next one.
    #[arg(long)]
    keep_going: bool,

    /// Print every operation kind with its parameters and exit.
    #[arg(long)]
    list_operations: bool,
}

/// One entry of the step script.
#[derive(Debug, Clone, PartialEq)]
enum Step {
    Undo,
    Redo,
    Revert,
    /// Retune the current edge detection step.
    Threshold(f64),
    Apply(Descriptor),
}

impl FromStr for Step {
    type Err = OpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "undo" => return Ok(Self::Undo),
            "redo" => return Ok(Self::Redo),
            "revert" => return Ok(Self::Revert),
            _ => {}
        }
        if let Some(value) = s.strip_prefix("threshold=") {
            return value
                .trim()
                .parse()
                .map(Self::Threshold)
                .map_err(|_| OpError::invalid("threshold", format!("`{value}` is not a number")));
        }
        s.parse().map(Self::Apply)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undo => f.write_str("undo"),
            Self::Redo => f.write_str("redo"),
            Self::Revert => f.write_str("revert"),
            Self::Threshold(value) => write!(f, "threshold={value}"),
            Self::Apply(descriptor) => write!(f, "{descriptor}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read config {}: {source}", path.display())]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error("step {index} ({step}) failed: {source}")]
    Step {
        index: usize,
        step: Step,
        source: SessionError,
    },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("failed to serialize history: {0}")]
    Json(#[from] serde_json::Error),
}

/// Build the [`SessionConfig`] from `--config` / `--config-json`, or the
/// defaults when neither is given.
fn config_from_cli(cli: &Cli) -> Result<SessionConfig, CliError> {
    if let Some(ref json) = cli.config_json {
        return Ok(SessionConfig::from_json(json)?);
    }
    if let Some(ref path) = cli.config {
        let json = std::fs::read_to_string(path).map_err(|source| CliError::ReadConfig {
            path: path.clone(),
            source,
        })?;
        return Ok(SessionConfig::from_json(&json)?);
    }
    Ok(SessionConfig::default())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    if cli.list_operations {
        print_operations(&cli);
        return ExitCode::SUCCESS;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let config = config_from_cli(cli)?;
    let Some(ref input) = cli.input else {
        return Ok(());
    };

    let bytes = retouch_io::read_bytes(input)?;
    let mut session = Session::open_bytes(&bytes, &StdCodec, config)?;
    let size = session.current_image().dimensions();
    info!(
        input = %input.display(),
        width = size.width,
        height = size.height,
        steps = cli.steps.len(),
        "session opened"
    );

    for (index, step) in cli.steps.iter().enumerate() {
        match run_step(&mut session, step, cli.inline) {
            Ok(()) => info!(%step, position = ?session.history().position(), "step done"),
            Err(source) if cli.keep_going => warn!(%step, error = %source, "step failed"),
            Err(source) => {
                return Err(CliError::Step {
                    index: index + 1,
                    step: step.clone(),
                    source,
                });
            }
        }
    }

    if let Some(ref path) = cli.output {
        export(path, |format| session.export_current(format, &StdCodec))?;
    }
    if let Some(ref path) = cli.export_original {
        export(path, |format| session.export_original(format, &StdCodec))?;
    }

    let summary = session.history().summary();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.report());
    }
    Ok(())
}

fn run_step(session: &mut Session, step: &Step, inline: bool) -> Result<(), SessionError> {
    match step {
        Step::Undo => {
            session.undo()?;
        }
        Step::Redo => {
            session.redo()?;
        }
        Step::Revert => {
            session.revert()?;
        }
        Step::Threshold(value) => {
            session.retune_threshold(*value)?;
        }
        Step::Apply(descriptor) if inline => {
            session.apply(descriptor)?;
        }
        Step::Apply(descriptor) => {
            session.submit(descriptor)?;
            session.wait()?;
        }
    }
    Ok(())
}

/// Encode with the format named by `path`'s extension and write the file.
fn export(
    path: &Path,
    encode: impl FnOnce(ExportFormat) -> Result<Vec<u8>, SessionError>,
) -> Result<(), CliError> {
    let format = retouch_io::format_for_path(path)?;
    let bytes = encode(format)?;
    retouch_io::write_bytes(path, &bytes)?;
    Ok(())
}

/// List each family's operation kinds with their parameter schemas under
/// the configured limits.
fn print_operations(cli: &Cli) {
    let limits = match config_from_cli(cli) {
        Ok(config) => config.limits,
        Err(e) => {
            warn!(error = %e, "ignoring config, listing default limits");
            SessionConfig::default().limits
        }
    };
    for family in Family::ALL {
        println!("{family}:");
        let handler = Handler::new(family, limits);
        for kind in handler.kinds() {
            let schema = handler.schema(kind);
            if schema.is_empty() {
                println!("  {kind}");
                continue;
            }
            let params: Vec<String> = schema
                .iter()
                .map(|spec| format!("{}={} {}", spec.name, spec.default, spec.range))
                .collect();
            println!("  {kind}: {}", params.join(", "));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use retouch_ops::OperationKind;

    use super::*;

    #[test]
    fn history_steps_parse() {
        assert_eq!("undo".parse::<Step>().unwrap(), Step::Undo);
        assert_eq!(" Redo ".parse::<Step>().unwrap(), Step::Redo);
        assert_eq!("revert".parse::<Step>().unwrap(), Step::Revert);
    }

    #[test]
    fn threshold_step_parses() {
        assert_eq!(
            "threshold=0.25".parse::<Step>().unwrap(),
            Step::Threshold(0.25)
        );
        assert!(matches!(
            "threshold=high".parse::<Step>(),
            Err(OpError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn operation_steps_parse() {
        let Step::Apply(descriptor) = "multi-otsu:classes=4".parse::<Step>().unwrap() else {
            unreachable!("expected an operation step");
        };
        assert_eq!(descriptor.kind, OperationKind::MultiOtsu);
        assert!("blur".parse::<Step>().is_err());
    }

    #[test]
    fn steps_display_as_parsed() {
        for text in ["undo", "threshold=0.5", "sobel:threshold=0.3"] {
            assert_eq!(text.parse::<Step>().unwrap().to_string(), text);
        }
    }

    #[test]
    fn cli_collects_repeated_steps() {
        let cli = Cli::try_parse_from([
            "retouch",
            "in.png",
            "--step",
            "grayscale",
            "-s",
            "undo",
            "-o",
            "out.jpg",
        ])
        .unwrap();
        assert_eq!(cli.steps.len(), 2);
        assert_eq!(cli.steps[1], Step::Undo);
        assert_eq!(cli.output, Some(PathBuf::from("out.jpg")));
    }

    #[test]
    fn config_sources_conflict() {
        let result = Cli::try_parse_from([
            "retouch",
            "in.png",
            "--config",
            "c.json",
            "--config-json",
            "{}",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn inline_config_is_used() {
        let cli = Cli::try_parse_from([
            "retouch",
            "in.png",
            "--config-json",
            r#"{"busy": "queue"}"#,
        ])
        .unwrap();
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.busy, retouch_core::BusyPolicy::Queue);
    }

    #[test]
    fn input_is_optional_only_when_listing() {
        assert!(Cli::try_parse_from(["retouch"]).is_err());
        assert!(Cli::try_parse_from(["retouch", "--list-operations"]).is_ok());
    }
}
