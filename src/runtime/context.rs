// src/runtime/context.rs
//! Search state kept while one input stream is reduced

use super::node::Token;
use crate::ExecutionError;
use ahash::HashMap;

/// One candidate reading of the input: a token sequence and the summed
/// weight of the rules that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Parse {
    pub tokens: Vec<Token>,
    pub weight: f64,
}

impl Parse {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            weight: 0.0,
        }
    }

    /// Top-level tokens that are not blanks
    pub fn nodes(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(|t| !t.is_blank())
    }

    /// Top-level nodes left unjoined
    pub fn leftover(&self) -> usize {
        self.nodes().count().saturating_sub(1)
    }

    #[inline]
    pub fn cost(&self) -> f64 {
        self.weight + self.leftover() as f64
    }
}

/// Mutable context for one reduction run
pub struct SearchContext {
    /// Cheapest weight seen for each token sequence since the last shift
    seen: HashMap<Vec<Token>, f64>,
    rewrites: usize,
    max_rewrites: usize,
}

impl SearchContext {
    pub fn new(max_rewrites: usize) -> Self {
        Self {
            seen: HashMap::default(),
            rewrites: 0,
            max_rewrites,
        }
    }

    /// Count one rule application
    #[inline]
    pub fn record_rewrite(&mut self) -> Result<(), ExecutionError> {
        self.rewrites += 1;
        if self.rewrites > self.max_rewrites {
            return Err(ExecutionError::RewriteLimit {
                limit: self.max_rewrites,
            });
        }
        Ok(())
    }

    pub fn rewrites(&self) -> usize {
        self.rewrites
    }

    /// True when this token sequence has not been reached before at the same
    /// or a lower weight
    pub fn visit(&mut self, parse: &Parse) -> bool {
        match self.seen.get_mut(&parse.tokens) {
            Some(best) if *best <= parse.weight => false,
            Some(best) => {
                *best = parse.weight;
                true
            }
            None => {
                self.seen.insert(parse.tokens.clone(), parse.weight);
                true
            }
        }
    }

    /// Forget visited states; sequences never repeat across shifts
    pub fn next_shift(&mut self) {
        self.seen.clear();
    }

    pub fn states(&self) -> usize {
        self.seen.len()
    }
}
