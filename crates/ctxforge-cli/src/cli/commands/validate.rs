use ctxforge_core::StepType;

use super::{load_trajectory, write_output};
use crate::cli::args::ValidateArgs;
use crate::exit_codes;

pub fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let record = match load_trajectory(&args.trace)? {
        Ok(t) => t,
        Err(e) => {
            eprintln!("invalid: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    if args.print {
        write_output(None, &record.to_json_pretty()?)?;
        return Ok(exit_codes::OK);
    }

    let counts: Vec<String> = StepType::ALL
        .iter()
        .filter_map(|ty| {
            let n = record.steps_of(*ty).count();
            (n > 0).then(|| format!("{ty}={n}"))
        })
        .collect();
    println!(
        "ok: run {} ({} steps{}{})",
        record.run_id,
        record.steps.len(),
        if counts.is_empty() { "" } else { ": " },
        counts.join(", ")
    );
    Ok(exit_codes::OK)
}
