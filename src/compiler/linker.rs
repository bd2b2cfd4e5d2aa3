// src/compiler/linker.rs
//! Links the three transfer passes into one program

use super::{compile_stage, Program};
use crate::parser::ast::RuleSet;
use crate::CompilationError;
use tracing::instrument;

/// Compile each stage with its own symbol table and concatenate the
/// encodings. Rule ids stay local to their stage.
#[instrument(level = "debug", skip_all)]
pub fn link(stages: [&RuleSet; 3]) -> Result<Program, CompilationError> {
    let mut encoded = Vec::with_capacity(stages.len());
    for set in stages {
        encoded.push(compile_stage(set)?);
    }

    let program = Program::from_stages(&encoded)?;
    tracing::debug!(
        max_pattern_len = program.max_pattern_len,
        rule_count = program.rule_count,
        bytes = program.body.len(),
        "linked program"
    );
    Ok(program)
}
