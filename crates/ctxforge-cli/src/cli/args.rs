use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ctxforge",
    version,
    about = "Deterministic grading and record/replay for agent trajectories"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check that a trajectory file is well formed
    Validate(ValidateArgs),
    /// Run the grader suite over a trajectory
    Grade(GradeArgs),
    /// Seed a recording store from a trajectory's tool results
    Record(RecordArgs),
    /// Re-drive a trajectory's tool calls against a recording store
    Replay(ReplayArgs),
    /// List the built-in graders
    Graders,
    Version,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    #[arg(long)]
    pub trace: PathBuf,

    /// Print the normalized record instead of a summary
    #[arg(long)]
    pub print: bool,
}

#[derive(Args, Clone)]
pub struct GradeArgs {
    #[arg(long)]
    pub trace: PathBuf,

    /// Suite configuration (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Comma-separated grader names; overrides the config's list
    #[arg(long, value_delimiter = ',')]
    pub graders: Vec<String>,

    /// Run graders one after another on the current thread
    #[arg(long)]
    pub sequential: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Clone)]
pub struct RecordArgs {
    #[arg(long)]
    pub trace: PathBuf,

    /// NDJSON recording store; created if missing
    #[arg(long)]
    pub store: PathBuf,
}

#[derive(Args, Clone)]
pub struct ReplayArgs {
    #[arg(long)]
    pub trace: PathBuf,

    #[arg(long)]
    pub store: PathBuf,

    /// On a miss, fall back to the result already in the trace
    #[arg(long)]
    pub lenient: bool,

    /// Deadline for the whole replay, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Replay under this trajectory id instead of the trace's run_id
    #[arg(long)]
    pub trajectory_id: Option<String>,

    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Text,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn graders_flag_splits_on_commas() {
        let cli = Cli::parse_from([
            "ctxforge", "grade", "--trace", "t.json", "--graders", "budget,loop",
        ]);
        let Command::Grade(args) = cli.cmd else {
            panic!("expected grade");
        };
        assert_eq!(args.graders, vec!["budget", "loop"]);
        assert_eq!(args.format, OutputFormat::Json);
    }
}
