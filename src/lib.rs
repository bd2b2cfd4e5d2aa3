// src/lib.rs
//! # Structural Transfer
//!
//! Compiler for structural-transfer rule files: a rule language describing
//! rewrites of tagged token/chunk sequences. Rule files in either the
//! textual or the markup syntax are parsed into one IR, which is lowered
//! into a byte-coded program for a stack-based transfer machine, or into a
//! weighted grammar for a generated GLR parser. The crate also carries the
//! reference weighted reduction engine that defines what those backends
//! must compute at run time.
//!
//! ## Example
//!
//! ```rust
//! use structural_transfer::{compile_source, disassemble};
//!
//! let rules = r#"
//!     num = sg pl ;
//!     NP -> 1: det.$num n.$num { 1 _1 2 } ;
//! "#;
//!
//! let program = compile_source(rules).unwrap();
//! let listing = disassemble(&program.to_bytes()).unwrap();
//! assert_eq!(listing.rule_count, 1);
//! ```

pub mod actions;
pub mod compiler;
pub mod config;
pub mod grammar;
pub mod parser;
pub mod runtime;

use std::fmt;
use thiserror::Error;

pub use compiler::disasm::{disassemble, Listing};
pub use compiler::linker::link;
pub use compiler::symbols::SymbolTable;
pub use compiler::Program;
pub use config::{GrammarConfig, ReductionConfig};
pub use parser::ast::{Operation, Rule, RuleSet, Stage};
pub use runtime::engine::ReductionEngine;

/// Kind of symbol named in reference and duplicate errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Category,
    Attribute,
    Variable,
    List,
    Macro,
    MacroParameter,
    Position,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolKind::Category => "category",
            SymbolKind::Attribute => "attribute",
            SymbolKind::Variable => "variable",
            SymbolKind::List => "list",
            SymbolKind::Macro => "macro",
            SymbolKind::MacroParameter => "macro parameter",
            SymbolKind::Position => "pattern position",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while parsing, compiling or decoding rules
#[derive(Error, Debug)]
pub enum CompilationError {
    #[error("Syntax error: {message} (at {token}); remaining input: {remaining:?}")]
    Syntax {
        message: String,
        token: String,
        remaining: String,
    },

    #[error("Undeclared {kind} '{name}'")]
    Reference { kind: SymbolKind, name: String },

    #[error("Duplicate {kind} '{name}'")]
    Duplicate { kind: SymbolKind, name: String },

    #[error("{what} {value} does not fit in one byte")]
    FormatLimit { what: &'static str, value: usize },

    #[error("Rule {rule}: {construct} cannot be lowered to reduction actions")]
    Unsupported { rule: usize, construct: String },

    #[error("Malformed program at offset {offset}: {message}")]
    Decode { offset: usize, message: String },

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

/// Errors during reduction of an input stream
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No rule reduces {node}")]
    MatchFailure { node: String },

    #[error("Rewrite limit of {limit} exceeded")]
    RewriteLimit { limit: usize },

    #[error("Malformed input stream at offset {offset}: {message}")]
    Stream { offset: usize, message: String },
}

/// Parse rule-file text and compile it into a single-stage program
pub fn compile_source(source: &str) -> Result<Program, CompilationError> {
    let set = parser::parse(source)?;
    compiler::compile(&set)
}

/// Parse three stage files and link them into one program
pub fn link_sources(stages: [&str; 3]) -> Result<Program, CompilationError> {
    let [first, second, third] = stages;
    let sets = [
        parser::parse(first)?,
        parser::parse(second)?,
        parser::parse(third)?,
    ];
    link([&sets[0], &sets[1], &sets[2]])
}

/// Parse rule-file text and lower it into grammar source
pub fn grammar_source(source: &str, config: &GrammarConfig) -> Result<String, CompilationError> {
    let set = parser::parse(source)?;
    let grammar = grammar::Grammar::build(&set, config)?;
    Ok(grammar.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_source_round_trips() {
        let program = compile_source("NP -> 1: det n { 1 _1 2 } ;").unwrap();
        let listing = disassemble(&program.to_bytes()).unwrap();

        assert_eq!(listing.max_pattern_len, 2);
        assert_eq!(listing.rule_count, 1);
        assert_eq!(listing.rules().count(), 1);
    }

    #[test]
    fn test_errors_abort_without_program() {
        let err = compile_source("num = sg pl ; NP -> 1: det { 1(num=$undeclared) } ;").unwrap_err();
        assert!(matches!(
            err,
            CompilationError::Reference { kind: SymbolKind::Variable, .. }
        ));
    }

    #[test]
    fn test_grammar_source() {
        let text = grammar_source("NP -> 3: det n { 1 2 } ;", &GrammarConfig::default()).unwrap();
        assert!(text.contains("NP : det _ n %dprec 3"));
    }
}
