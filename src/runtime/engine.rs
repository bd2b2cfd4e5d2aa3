// src/runtime/engine.rs
//! Weighted reduction engine
//!
//! Reads an input stream one lexical unit at a time. After every shift each
//! live parse is rewritten by all rules whose pattern matches its suffix
//! until no rule matches any parse; parses that were rewritten are replaced
//! by their successors. Once the input is exhausted the parse with the
//! lowest `weight + leftover` cost is rendered.

use super::context::{Parse, SearchContext};
use super::format::Formatter;
use super::node::{LexicalEntry, SyntaxNode, Token, Vars};
use super::stream::{read_stream, Interner};
use crate::actions::ReduceActions;
use crate::compiler::symbols::{Constraint, SymbolTable};
use crate::config::ReductionConfig;
use crate::parser::ast::{CategoryItem, Grab, OutputRule, PatternElement, RetagRule, Rule, RuleSet};
use crate::{CompilationError, ExecutionError, SymbolKind};
use std::rc::Rc;
use tracing::instrument;

/// A pattern position with its category and constraints resolved
#[derive(Debug)]
struct Matcher {
    category: String,
    lemma: Option<String>,
    items: Vec<CategoryItem>,
    constraints: Vec<Constraint>,
    bindings: Vec<String>,
    caseless: bool,
    lexical_only: bool,
}

impl Matcher {
    fn new(element: &PatternElement, symbols: &SymbolTable) -> Result<Self, CompilationError> {
        let category = symbols
            .category(&element.category)
            .ok_or_else(|| CompilationError::Reference {
                kind: SymbolKind::Category,
                name: element.category.clone(),
            })?;
        let constraints = element
            .attributes
            .iter()
            .map(|attr| symbols.resolve_constraint(attr))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            category: category.name.clone(),
            lemma: element.lemma.clone(),
            items: category.items.clone(),
            constraints,
            bindings: element.bindings.clone(),
            caseless: element.caseless,
            lexical_only: element.lexical_only,
        })
    }

    /// Checks the token and binds or re-checks pattern variables
    fn matches(&self, token: &Token, bound: &mut Vars) -> bool {
        let vars = match token {
            Token::Blank(_) => return false,
            Token::Lexical(entry) => {
                if !self.accepts_entry(entry) {
                    return false;
                }
                &entry.vars
            }
            Token::Syntax(node) => {
                if self.lexical_only || node.node_type != self.category {
                    return false;
                }
                &node.vars
            }
        };

        let constrained = self
            .constraints
            .iter()
            .all(|c| c.alternatives.iter().any(|(attr, value)| vars.get(attr) == Some(value)));
        if !constrained {
            return false;
        }

        for var in &self.bindings {
            let Some(value) = vars.get(var) else {
                return false;
            };
            match bound.get(var) {
                Some(previous) if !self.same(previous, value) => return false,
                Some(_) => {}
                None => {
                    bound.insert(var.clone(), value.clone());
                }
            }
        }
        true
    }

    fn accepts_entry(&self, entry: &LexicalEntry) -> bool {
        if let Some(lemma) = &self.lemma {
            if !self.same(lemma, &entry.source_lemma) {
                return false;
            }
        }
        if self.items.is_empty() {
            return entry.source_tags.first() == Some(&self.category);
        }
        self.items.iter().any(|item| {
            item.lemma
                .as_deref()
                .map_or(true, |lemma| self.same(lemma, &entry.source_lemma))
                && tags_match(&item.tags, &entry.source_tags)
        })
    }

    fn same(&self, a: &str, b: &str) -> bool {
        if self.caseless {
            a.to_lowercase() == b.to_lowercase()
        } else {
            a == b
        }
    }
}

/// `*` in a category item matches any run of tags, including none
fn tags_match(pattern: &[String], tags: &[String]) -> bool {
    match pattern.split_first() {
        None => tags.is_empty(),
        Some((first, rest)) if first == "*" => (0..=tags.len()).any(|skip| tags_match(rest, &tags[skip..])),
        Some((first, rest)) => tags.first() == Some(first) && tags_match(rest, &tags[1..]),
    }
}

#[derive(Debug)]
struct ReductionRule {
    id: usize,
    result: String,
    weight: f64,
    pattern: Vec<Matcher>,
    grabs: Vec<Grab>,
    actions: Rc<ReduceActions>,
}

impl ReductionRule {
    fn new(rule: &Rule, symbols: &SymbolTable) -> Result<Self, CompilationError> {
        let pattern = rule
            .pattern
            .iter()
            .map(|element| Matcher::new(element, symbols))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: rule.id,
            result: rule.result.clone(),
            weight: rule.weight,
            pattern,
            grabs: rule.grabs.clone(),
            actions: Rc::new(ReduceActions::lower(rule)?),
        })
    }

    /// Tokens covered by the pattern, blanks between positions included
    fn width(&self) -> usize {
        (self.pattern.len() * 2).saturating_sub(1)
    }

    /// Reduces the suffix of the parse if the pattern matches it
    fn apply(&self, parse: &Parse) -> Option<Parse> {
        let width = self.width();
        if width == 0 || parse.tokens.len() < width {
            return None;
        }
        let start = parse.tokens.len() - width;
        let window = &parse.tokens[start..];

        let mut bound = Vars::new();
        for (i, matcher) in self.pattern.iter().enumerate().rev() {
            if !matcher.matches(&window[i * 2], &mut bound) {
                return None;
            }
            if i > 0 && !window[i * 2 - 1].is_blank() {
                return None;
            }
        }

        let vars = self
            .grabs
            .iter()
            .filter_map(|grab| {
                window[(grab.position - 1) * 2]
                    .var(&grab.var)
                    .map(|value| (grab.var.clone(), value))
            })
            .collect();

        let node = SyntaxNode {
            node_type: self.result.clone(),
            rule_id: self.id,
            vars,
            actions: Rc::clone(&self.actions),
            children: window.to_vec(),
        };

        let mut tokens = Vec::with_capacity(start + 1);
        tokens.extend_from_slice(&parse.tokens[..start]);
        tokens.push(Token::Syntax(Rc::new(node)));
        Some(Parse {
            tokens,
            weight: parse.weight + self.weight,
        })
    }
}

/// Reference runtime for reduction rule sets
pub struct ReductionEngine {
    symbols: SymbolTable,
    rules: Vec<ReductionRule>,
    output_rules: Vec<OutputRule>,
    retag_rules: Vec<RetagRule>,
    config: ReductionConfig,
}

impl ReductionEngine {
    /// Resolves every rule's categories and constraints and lowers its
    /// actions; rules whose actions cannot be lowered are rejected
    pub fn new(set: &RuleSet, config: ReductionConfig) -> Result<Self, CompilationError> {
        let symbols = SymbolTable::build(set)?;
        let rules = set
            .rules
            .iter()
            .map(|rule| ReductionRule::new(rule, &symbols))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            symbols,
            rules,
            output_rules: set.output_rules.clone(),
            retag_rules: set.retag_rules.clone(),
            config,
        })
    }

    pub fn config(&self) -> &ReductionConfig {
        &self.config
    }

    /// Reduce an input stream and render the cheapest parse
    pub fn process(&self, input: &str) -> Result<String, ExecutionError> {
        let parse = self.parse(input)?;
        let format = Formatter::new(&self.symbols, &self.output_rules, &self.retag_rules);
        let empty = Vars::new();
        Ok(parse
            .tokens
            .iter()
            .map(|token| token.render(&empty, &empty, &format))
            .collect())
    }

    /// Reduce an input stream and return the cheapest parse. Lexical
    /// entries are interned per stream.
    #[instrument(level = "debug", skip_all, fields(bytes = input.len()))]
    pub fn parse(&self, input: &str) -> Result<Parse, ExecutionError> {
        let tokens = read_stream(input, &mut Interner::new(), &self.symbols)?;
        let mut ctx = SearchContext::new(self.config.max_rewrites);
        let mut parses = vec![Parse::new(Vec::with_capacity(tokens.len()))];

        for shifted in tokens.chunks(2) {
            for parse in &mut parses {
                parse.tokens.extend_from_slice(shifted);
            }
            // a lone blank is the text after the last unit
            if shifted.len() == 2 {
                ctx.next_shift();
                parses = self.saturate(parses, &mut ctx)?;
            }
        }

        let mut best: Option<Parse> = None;
        for parse in parses {
            if best.as_ref().map_or(true, |b| parse.cost() < b.cost()) {
                best = Some(parse);
            }
        }
        let best = best.unwrap_or_else(|| Parse::new(Vec::new()));

        tracing::debug!(
            rewrites = ctx.rewrites(),
            weight = best.weight,
            cost = best.cost(),
            "selected parse"
        );
        self.check_root(&best)?;
        Ok(best)
    }

    /// Rewrites every parse until no rule matches any of them. Successors of
    /// a parse take its place, in rule declaration order.
    fn saturate(&self, parses: Vec<Parse>, ctx: &mut SearchContext) -> Result<Vec<Parse>, ExecutionError> {
        let mut current: Vec<(Parse, bool)> = parses.into_iter().map(|p| (p, false)).collect();

        loop {
            let mut next = Vec::with_capacity(current.len());
            let mut rewritten = false;

            for (parse, complete) in current {
                if complete {
                    next.push((parse, true));
                    continue;
                }

                let mut matched = false;
                for rule in &self.rules {
                    let Some(successor) = rule.apply(&parse) else {
                        continue;
                    };
                    matched = true;
                    ctx.record_rewrite()?;
                    tracing::trace!(rule = rule.id, result = %rule.result, "reduced");
                    if ctx.visit(&successor) {
                        next.push((successor, false));
                    }
                }

                if matched {
                    rewritten = true;
                } else {
                    next.push((parse, true));
                }
            }

            current = next;
            if !rewritten {
                break;
            }
        }

        Ok(current.into_iter().map(|(parse, _)| parse).collect())
    }

    fn check_root(&self, parse: &Parse) -> Result<(), ExecutionError> {
        let Some(root) = &self.config.root_category else {
            return Ok(());
        };
        for (i, token) in parse.nodes().enumerate() {
            let is_root = matches!(token, Token::Syntax(node) if &node.node_type == root);
            if i > 0 || !is_root {
                return Err(ExecutionError::MatchFailure {
                    node: token.describe(),
                });
            }
        }
        Ok(())
    }
}
