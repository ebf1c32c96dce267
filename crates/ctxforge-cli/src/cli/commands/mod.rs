use std::path::Path;

use anyhow::Context;
use ctxforge_core::{Trajectory, UntrustedTrajectory, ValidationError};

use super::args::*;
use crate::exit_codes;

pub mod grade;
pub mod record;
pub mod replay;
pub mod validate;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Validate(args) => validate::run(args),
        Command::Grade(args) => grade::run(args).await,
        Command::Record(args) => record::run(args),
        Command::Replay(args) => replay::run(args).await,
        Command::Graders => {
            for name in ctxforge_graders::GRADER_NAMES {
                println!("{name}");
            }
            Ok(exit_codes::OK)
        }
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

/// Reads and validates a trajectory file. I/O problems are `Err`; a record
/// that fails validation is `Ok(Err(..))` so callers can pick the exit code.
pub(crate) fn load_trajectory(path: &Path) -> anyhow::Result<Result<Trajectory, ValidationError>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read trajectory {}", path.display()))?;
    Ok(UntrustedTrajectory::from_json(&raw).and_then(UntrustedTrajectory::validate))
}

/// Loads a trajectory, or prints the validation error and yields the exit code.
pub(crate) fn load_or_exit(path: &Path) -> anyhow::Result<Result<Trajectory, i32>> {
    Ok(load_trajectory(path)?.map_err(|e| {
        eprintln!("error: {e}");
        exit_codes::CONFIG_ERROR
    }))
}

pub(crate) fn write_output(output: Option<&Path>, body: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => std::fs::write(path, format!("{body}\n"))
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            println!("{body}");
            Ok(())
        }
    }
}
