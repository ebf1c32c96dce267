//! Deterministic graders for ctxforge trajectories and the registry that
//! builds them from configuration.

pub mod budget;
pub mod loops;
pub mod memory;
pub mod retrieval;
pub mod schema;
mod text;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

use ctxforge_core::errors::similarity;
use ctxforge_core::{ConfigError, Grader, GraderConfig, GraderSuite, SuiteConfig};
use tracing::warn;

pub use budget::BudgetGrader;
pub use loops::LoopGrader;
pub use memory::MemoryHygieneGrader;
pub use retrieval::RetrievalRelevanceGrader;
pub use schema::SchemaGrader;

pub const GRADER_NAMES: [&str; 5] = [
    BudgetGrader::NAME,
    LoopGrader::NAME,
    SchemaGrader::NAME,
    MemoryHygieneGrader::NAME,
    RetrievalRelevanceGrader::NAME,
];

/// Builds one grader by name. Unknown names get a "did you mean" hint.
pub fn build_grader(name: &str, cfg: &GraderConfig) -> Result<Arc<dyn Grader>, ConfigError> {
    let grader: Arc<dyn Grader> = match name {
        BudgetGrader::NAME => Arc::new(BudgetGrader::from_config(cfg)?),
        LoopGrader::NAME => Arc::new(LoopGrader::from_config(cfg)?),
        SchemaGrader::NAME => Arc::new(SchemaGrader::from_config(cfg)?),
        MemoryHygieneGrader::NAME => Arc::new(MemoryHygieneGrader::from_config(cfg)?),
        RetrievalRelevanceGrader::NAME => Arc::new(RetrievalRelevanceGrader::from_config(cfg)?),
        other => {
            return Err(ConfigError::UnknownGrader {
                name: other.to_string(),
                suggestion: similarity::closest(other, GRADER_NAMES.iter().copied())
                    .map(|m| m.candidate),
            })
        }
    };
    Ok(grader)
}

/// Builds the configured suite in reporting order.
///
/// With no explicit `graders` list the schema grader is only included when a
/// `schema` section exists, since it has no usable allow-list by default.
pub fn build_suite(config: &SuiteConfig) -> Result<GraderSuite, ConfigError> {
    let implicit = config.graders.is_none();
    let mut graders = Vec::new();
    for name in config.grader_names() {
        if implicit && name == SchemaGrader::NAME && !config.per_grader.contains_key(&name) {
            warn!("schema grader left out of the default suite: no `schema` section configured");
            continue;
        }
        graders.push(build_grader(&name, &config.for_grader(&name))?);
    }
    Ok(GraderSuite::new(graders))
}
