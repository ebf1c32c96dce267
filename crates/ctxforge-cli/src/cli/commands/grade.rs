use std::sync::Arc;

use anyhow::Context;
use ctxforge_core::{GradeStatus, SuiteConfig, SuiteReport};
use tracing::info;

use super::{load_or_exit, write_output};
use crate::cli::args::{GradeArgs, OutputFormat};
use crate::exit_codes;

pub async fn run(args: GradeArgs) -> anyhow::Result<i32> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            match SuiteConfig::from_json(&raw) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("{e}");
                    return Ok(exit_codes::CONFIG_ERROR);
                }
            }
        }
        None => SuiteConfig::default(),
    };
    if !args.graders.is_empty() {
        config.graders = Some(args.graders.clone());
    }

    let suite = match ctxforge_graders::build_suite(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let record = match load_or_exit(&args.trace)? {
        Ok(t) => t,
        Err(code) => return Ok(code),
    };

    info!(run_id = %record.run_id, graders = suite.len(), "grading trajectory");
    let report = if args.sequential {
        suite.evaluate_sequential(&record)
    } else {
        suite.evaluate(Arc::new(record)).await
    };

    let body = match args.format {
        OutputFormat::Json => serde_json::to_string_pretty(&report)?,
        OutputFormat::Text => render_text(&report),
    };
    write_output(args.output.as_deref(), &body)?;

    Ok(if report.passed {
        exit_codes::OK
    } else {
        exit_codes::GRADE_FAILED
    })
}

fn render_text(report: &SuiteReport) -> String {
    let mut out = Vec::with_capacity(report.outcomes.len() + 1);
    for o in &report.outcomes {
        out.push(match &o.status {
            GradeStatus::Graded { result } => {
                let mut line = format!(
                    "{:<20} {} score={:.3}",
                    o.grader,
                    if result.passed { "PASS" } else { "FAIL" },
                    result.score
                );
                for ev in result.errors() {
                    line.push_str(&format!("\n    - [{}] {}", ev.check, ev.description));
                }
                line
            }
            GradeStatus::Skipped { reason } => format!("{:<20} SKIP {reason}", o.grader),
            GradeStatus::Errored { reason } => format!("{:<20} ERROR {reason}", o.grader),
        });
    }
    let (graded, skipped, errored) = report.counts();
    out.push(format!(
        "{}: score={:.3} graded={graded} skipped={skipped} errored={errored}",
        if report.passed { "passed" } else { "failed" },
        report.score
    ));
    out.join("\n")
}
