// src/compiler/mod.rs
//! Compiler that converts rule sets to transfer-machine programs

pub mod bytecode;
pub mod compiler;
pub mod disasm;
pub mod linker;
pub mod symbols;

use crate::parser::ast::RuleSet;
use crate::CompilationError;
use compiler::{Compiler, StageCode};
use symbols::SymbolTable;
use tracing::instrument;

/// A complete program: two header bytes followed by stage sections and rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub max_pattern_len: u8,
    pub rule_count: u8,
    pub body: Vec<u8>,
}

impl Program {
    /// Joins stage encodings under one header. The rule count is that of the
    /// last stage, the pattern length the longest of any stage.
    pub(crate) fn from_stages(stages: &[StageCode]) -> Result<Self, CompilationError> {
        let max_pattern_len = stages.iter().map(|s| s.max_pattern_len).max().unwrap_or(0);
        let rule_count = stages.last().map(|s| s.rule_count).unwrap_or(0);

        Ok(Program {
            max_pattern_len: header_byte("longest pattern", max_pattern_len)?,
            rule_count: header_byte("rule count", rule_count)?,
            body: stages.iter().flat_map(|s| s.bytes.iter().copied()).collect(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.body.len() + 2);
        bytes.push(self.max_pattern_len);
        bytes.push(self.rule_count);
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Disassembly with rules rendered as nested operation trees
    pub fn to_readable(&self) -> Result<String, CompilationError> {
        let listing = disasm::disassemble(&self.to_bytes())?;
        Ok(listing.readable())
    }
}

fn header_byte(what: &'static str, value: usize) -> Result<u8, CompilationError> {
    u8::try_from(value).map_err(|_| CompilationError::FormatLimit { what, value })
}

/// Encode one rule set's sections and rules without a header
pub(crate) fn compile_stage(set: &RuleSet) -> Result<StageCode, CompilationError> {
    let symbols = SymbolTable::build(set)?;
    let stage = Compiler::new(&symbols).compile_stage(set)?;
    tracing::debug!(
        stage = %set.stage,
        rules = stage.rule_count,
        bytes = stage.bytes.len(),
        "compiled stage"
    );
    Ok(stage)
}

/// Compile a single rule set into a program
#[instrument(level = "debug", skip_all, fields(stage = %set.stage))]
pub fn compile(set: &RuleSet) -> Result<Program, CompilationError> {
    let stage = compile_stage(set)?;
    Program::from_stages(&[stage])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    #[test]
    fn test_header_precedes_body() {
        let set = parser::parse("NP -> 1: det n { 1 2 } ; VP -> 1: v NP { 1 _1 2 } ;").unwrap();
        let bytes = compile(&set).unwrap().to_bytes();

        assert_eq!(bytes[0], 2);
        assert_eq!(bytes[1], 2);
        assert_eq!(bytes[2], b'C');
    }

    #[test]
    fn test_recompile_is_identical() {
        let source = "num = sg pl ; NP -> 1: det.$num n.$num { 1 _1 2 } | 2: n { 1 } ;";
        let first = compile(&parser::parse(source).unwrap()).unwrap();
        let second = compile(&parser::parse(source).unwrap()).unwrap();
        assert_eq!(first.to_bytes(), second.to_bytes());
    }

    #[test]
    fn test_readable_output() {
        let set = parser::parse("NP -> 1: det n { 1 2 } ;").unwrap();
        let text = compile(&set).unwrap().to_readable().unwrap();
        assert!(text.contains("Rule 1"));
        assert!(text.contains("(out"));
    }
}
