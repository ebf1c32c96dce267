use anyhow::Context;
use ctxforge_core::replay::record_from_trajectory;
use ctxforge_core::{Canonicalizer, RecordingStore};

use super::load_or_exit;
use crate::cli::args::RecordArgs;
use crate::exit_codes;

pub fn run(args: RecordArgs) -> anyhow::Result<i32> {
    let record = match load_or_exit(&args.trace)? {
        Ok(t) => t,
        Err(code) => return Ok(code),
    };

    let store = RecordingStore::open(&args.store)
        .with_context(|| format!("failed to open store {}", args.store.display()))?;
    let written = record_from_trajectory(&store, &Canonicalizer::default(), &record)?;

    println!(
        "recorded {written} of {} tool calls for run {} into {}",
        record.total_tool_calls(),
        record.run_id,
        args.store.display()
    );
    Ok(exit_codes::OK)
}
