// src/parser/mod.rs
//! Front ends for the two rule syntaxes
//!
//! Both produce the same [`RuleSet`] IR.

pub mod ast;
pub mod lexer;
pub mod markup;
pub mod parser;
pub mod xml;

use crate::CompilationError;
pub use ast::RuleSet;

/// Concrete syntax of a rule file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Textual,
    Markup,
}

impl Syntax {
    /// Markup files start with `<` once leading whitespace is skipped
    pub fn detect(source: &str) -> Self {
        if source.trim_start().starts_with('<') {
            Syntax::Markup
        } else {
            Syntax::Textual
        }
    }
}

/// Parse rule-file text in whichever syntax it is written in
pub fn parse(source: &str) -> Result<RuleSet, CompilationError> {
    parse_as(source, Syntax::detect(source))
}

pub fn parse_as(source: &str, syntax: Syntax) -> Result<RuleSet, CompilationError> {
    let set = match syntax {
        Syntax::Textual => parser::Parser::new(source)?.parse()?,
        Syntax::Markup => markup::parse(source)?,
    };

    tracing::debug!(
        ?syntax,
        stage = %set.stage,
        categories = set.categories.len(),
        attributes = set.attributes.len(),
        rules = set.rules.len(),
        "parsed rule file"
    );
    Ok(set)
}
