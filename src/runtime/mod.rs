// src/runtime/mod.rs
//! Runtime components for reducing input streams with rule sets

pub mod context;
pub mod engine;
pub mod format;
pub mod node;
pub mod stream;

pub use context::{Parse, SearchContext};
pub use engine::ReductionEngine;
pub use format::Formatter;
pub use node::{LexicalEntry, SyntaxNode, Token};
