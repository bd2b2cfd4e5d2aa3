// src/grammar/mod.rs
//! Grammar backend
//!
//! Lowers a rule set into a weighted grammar for a generated GLR parser.
//! Every rule becomes one production whose semantic action builds the
//! result node; a second table, keyed by rule id, runs the rule's updates
//! and outputs its children when the parse tree is printed.

use crate::actions::{Destination, OutputItem, ReduceActions, ValueSource};
use crate::compiler::symbols::SymbolTable;
use crate::config::GrammarConfig;
use crate::parser::ast::{PatternElement, Rule, RuleSet};
use crate::CompilationError;
use std::fmt::Write;
use tracing::instrument;

/// Result symbol of the productions joining partial parses
pub const GLUE: &str = "GLUE";
/// Terminal for input the lexer cannot classify
pub const UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq)]
pub struct Production {
    pub id: usize,
    pub result: String,
    pub symbols: Vec<String>,
    /// Semantic predicate over the matched children
    pub guard: Option<String>,
    pub weight: f64,
    pub action: String,
}

#[derive(Debug, Clone)]
pub struct Grammar {
    config: GrammarConfig,
    /// Every symbol, in first-use order
    symbols: Vec<String>,
    productions: Vec<Production>,
    /// `case` arm of the output switch for each production
    outputs: Vec<String>,
}

impl Grammar {
    #[instrument(level = "debug", skip_all, fields(rules = set.rules.len()))]
    pub fn build(set: &RuleSet, config: &GrammarConfig) -> Result<Self, CompilationError> {
        let symbols = SymbolTable::build(set)?;
        let mut grammar = Grammar {
            config: config.clone(),
            symbols: vec![UNKNOWN.to_string(), config.separator.clone(), GLUE.to_string()],
            productions: Vec::new(),
            outputs: Vec::new(),
        };

        for rule in &set.rules {
            let actions = ReduceActions::lower(rule)?;
            grammar.add_rule(rule, &actions, &symbols)?;
        }

        if config.glue_rules {
            grammar.add_glue()?;
        }

        tracing::debug!(
            productions = grammar.productions.len(),
            symbols = grammar.symbols.len(),
            "built grammar"
        );
        Ok(grammar)
    }

    pub fn productions(&self) -> &[Production] {
        &self.productions
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Terminals are the separator, `UNKNOWN` and lexical-only categories
    pub fn is_token(&self, symbol: &str) -> bool {
        symbol == self.config.separator || symbol == UNKNOWN || symbol.starts_with('@')
    }

    fn add_rule(
        &mut self,
        rule: &Rule,
        actions: &ReduceActions,
        table: &SymbolTable,
    ) -> Result<(), CompilationError> {
        self.intern(&rule.result);

        let mut pattern = Vec::with_capacity(rule.pattern.len());
        let mut conditions = Vec::new();
        let mut bound: Vec<(&str, usize)> = Vec::new();

        for (i, element) in rule.pattern.iter().enumerate() {
            let symbol = element_symbol(element);
            self.intern(&symbol);
            pattern.push(symbol);

            let n = child_index(i + 1) + 1;
            if let Some(lemma) = &element.lemma {
                conditions.push(format!("(${}->getVar(L\"lem\") == L\"{}\")", n, escape(lemma)));
            }
            for constraint in &element.attributes {
                let constraint = table.resolve_constraint(constraint)?;
                let alternatives: Vec<String> = constraint
                    .alternatives
                    .iter()
                    .map(|(attr, value)| {
                        format!("${}->getVar(L\"{}\") == L\"{}\"", n, escape(attr), escape(value))
                    })
                    .collect();
                conditions.push(format!("({})", alternatives.join(" || ")));
            }

            for var in &element.bindings {
                match bound.iter().find(|(v, _)| *v == var.as_str()) {
                    Some(&(_, first)) => conditions.push(format!(
                        "(${}->getVar(L\"{}\") == ${}->getVar(L\"{}\"))",
                        first,
                        escape(var),
                        n,
                        escape(var)
                    )),
                    None => bound.push((var.as_str(), n)),
                }
            }
        }

        let mut setup = vec![format!("vector<{}*> NODESETUP;", self.config.node_type)];
        for n in 1..2 * rule.pattern.len() {
            setup.push(format!("NODESETUP.push_back(${});", n));
        }
        setup.push(format!("$$ = new {}(NODESETUP, {});", self.config.node_type, rule.id));
        for grab in &rule.grabs {
            setup.push(format!(
                "$$->setVar(L\"{}\", ${}->getVar(L\"{}\"));",
                escape(&grab.var),
                child_index(grab.position) + 1,
                escape(&grab.var)
            ));
        }

        let guard = if conditions.is_empty() {
            None
        } else {
            Some(format!("%?{{ {} }}", conditions.join(" && ")))
        };

        self.productions.push(Production {
            id: rule.id,
            result: rule.result.clone(),
            symbols: pattern,
            guard,
            weight: rule.weight,
            action: setup.join(" "),
        });
        self.outputs.push(output_case(rule.id, actions));
        Ok(())
    }

    /// `GLUE : sym` and `GLUE : GLUE _ sym` for every symbol
    fn add_glue(&mut self) -> Result<(), CompilationError> {
        let mut next_id = self.productions.iter().map(|p| p.id + 1).max().unwrap_or(0);
        let targets: Vec<String> = self
            .symbols
            .iter()
            .filter(|s| s.as_str() != GLUE && **s != self.config.separator)
            .cloned()
            .collect();

        for symbol in targets {
            for len in [1, 2] {
                let mut rule = Rule {
                    id: next_id,
                    result: GLUE.to_string(),
                    grabs: Vec::new(),
                    pattern: Vec::new(),
                    action: Vec::new(),
                    weight: 1.0,
                    comment: None,
                };
                if len == 2 {
                    rule.pattern.push(PatternElement::new(GLUE));
                }
                rule.pattern.push(symbol_element(&symbol));

                let actions = ReduceActions::passthrough(rule.pattern.len());
                self.add_rule(&rule, &actions, &SymbolTable::default())?;
                next_id += 1;
            }
        }
        Ok(())
    }

    fn intern(&mut self, symbol: &str) {
        if !self.symbols.iter().any(|s| s == symbol) {
            self.symbols.push(symbol.to_string());
        }
    }

    /// Grammar source: declarations, productions and the output switch
    pub fn render(&self) -> String {
        let mut out = String::new();

        for symbol in &self.symbols {
            let kind = if self.is_token(symbol) { "%token" } else { "%type" };
            let _ = writeln!(out, "{} <node> {}", kind, symbol);
        }

        out.push_str("\n%%\n\n");

        let mut results: Vec<&str> = Vec::new();
        for p in &self.productions {
            if !results.contains(&p.result.as_str()) {
                results.push(&p.result);
            }
        }

        let separator = format!(" {} ", self.config.separator);
        for result in results {
            let alternatives: Vec<String> = self
                .productions
                .iter()
                .filter(|p| p.result == result)
                .map(|p| {
                    let guard = p.guard.as_deref().map(|g| format!("{} ", g)).unwrap_or_default();
                    format!(
                        "{}{} %dprec {} {{ {} }}",
                        guard,
                        p.symbols.join(&separator),
                        p.weight,
                        p.action
                    )
                })
                .collect();
            let _ = writeln!(out, "{} : {}\n ;\n", result, alternatives.join("\n  |  "));
        }

        out.push_str("%%\n\n");
        let _ = writeln!(out, "void {}::output() {{", self.config.node_type);
        out.push_str("  switch (rule) {\n");
        for case in &self.outputs {
            let _ = writeln!(out, "      {}", case);
        }
        out.push_str("  }\n}\n");

        out.replace('@', "__at__")
    }
}

fn element_symbol(element: &PatternElement) -> String {
    if element.lexical_only {
        format!("@{}", element.category)
    } else {
        element.category.clone()
    }
}

fn symbol_element(symbol: &str) -> PatternElement {
    match symbol.strip_prefix('@') {
        Some(category) => {
            let mut element = PatternElement::new(category);
            element.lexical_only = true;
            element
        }
        None => PatternElement::new(symbol),
    }
}

/// 0-based index of a pattern position among interleaved children
fn child_index(position: usize) -> usize {
    (position - 1) * 2
}

fn output_case(id: usize, actions: &ReduceActions) -> String {
    let mut parts = vec![format!("case {}:", id)];

    for update in &actions.updates {
        let value = match &update.source {
            ValueSource::Literal { value } => format!("L\"{}\"", escape(value)),
            ValueSource::SelfVar { var } => format!("getVar(L\"{}\")", escape(var)),
            ValueSource::ChildVar { position, var } => {
                format!("children[{}]->getVar(L\"{}\")", child_index(*position), escape(var))
            }
        };
        parts.push(match &update.destination {
            Destination::SelfVar { var } => format!("setVar(L\"{}\", {});", escape(var), value),
            Destination::ChildVar { position, var } => format!(
                "children[{}]->setVar(L\"{}\", {});",
                child_index(*position),
                escape(var),
                value
            ),
        });
    }

    for item in &actions.output {
        parts.push(match item {
            OutputItem::Child { position } => format!("children[{}]->output();", child_index(*position)),
            OutputItem::Blank { after: Some(after) } => {
                format!("children[{}]->output();", child_index(*after) + 1)
            }
            OutputItem::Blank { after: None } => "wcout << L\" \";".to_string(),
            OutputItem::ChildField { position, part, .. } => format!(
                "wcout << children[{}]->getVar(L\"{}\");",
                child_index(*position),
                escape(part)
            ),
            OutputItem::Var { var } => format!("wcout << getVar(L\"{}\");", escape(var)),
            OutputItem::Text { text } => format!("wcout << L\"{}\";", escape(text)),
        });
    }

    parts.push("break;".to_string());
    parts.join(" ")
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
