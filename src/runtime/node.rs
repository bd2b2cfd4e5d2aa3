// src/runtime/node.rs
//! Tokens of a parse and their output formatting

use super::format::Formatter;
use crate::actions::{Destination, OutputItem, ReduceActions, ValueSource};
use crate::parser::ast::Side;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

pub type Vars = BTreeMap<String, String>;

/// A lexical unit read from the input stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LexicalEntry {
    /// Interning id; equal entries share it
    pub id: usize,
    pub source_lemma: String,
    pub source_tags: Vec<String>,
    pub target_lemma: String,
    pub target_tags: Vec<String>,
    /// Attribute values carried by the tags
    pub vars: Vars,
}

impl LexicalEntry {
    pub fn lemma(&self, side: Side) -> &str {
        match side {
            Side::Source => &self.source_lemma,
            Side::Reference | Side::Target => &self.target_lemma,
        }
    }

    pub fn tags(&self, side: Side) -> &[String] {
        match side {
            Side::Source => &self.source_tags,
            Side::Reference | Side::Target => &self.target_tags,
        }
    }

    fn field(&self, part: &str, side: Side) -> Option<String> {
        match part {
            "lem" => Some(self.lemma(side).to_string()),
            "tags" => Some(self.tags(side).iter().map(|t| format!("<{}>", t)).collect()),
            _ => self.vars.get(part).cloned(),
        }
    }
}

/// A reduced node: the matched tokens under the rule's result category
#[derive(Debug, Clone)]
pub struct SyntaxNode {
    pub node_type: String,
    pub rule_id: usize,
    /// Grabbed variables
    pub vars: Vars,
    pub actions: Rc<ReduceActions>,
    /// Matched tokens, blanks included
    pub children: Vec<Token>,
}

// Actions are determined by the rule id
impl PartialEq for SyntaxNode {
    fn eq(&self, other: &Self) -> bool {
        self.rule_id == other.rule_id
            && self.node_type == other.node_type
            && self.vars == other.vars
            && self.children == other.children
    }
}

impl Eq for SyntaxNode {}

impl Hash for SyntaxNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rule_id.hash(state);
        self.node_type.hash(state);
        self.vars.hash(state);
        self.children.hash(state);
    }
}

impl SyntaxNode {
    /// Child at a 1-based pattern position
    fn child(&self, position: usize) -> Option<&Token> {
        self.children.get((position - 1) * 2)
    }

    fn render(&self, scope: &Vars, overrides: &Vars, format: &Formatter<'_>) -> String {
        let mut all = scope.clone();
        all.extend(self.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        all.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut child_overrides = vec![Vars::new(); self.children.len()];

        for update in &self.actions.updates {
            let value = match &update.source {
                ValueSource::SelfVar { var } => all.get(var).cloned().unwrap_or_default(),
                ValueSource::Literal { value } => value.clone(),
                ValueSource::ChildVar { position, var } => {
                    let index = (position - 1) * 2;
                    child_overrides
                        .get(index)
                        .and_then(|o| o.get(var).cloned())
                        .or_else(|| self.child(*position).and_then(|c| c.var(var)))
                        .unwrap_or_default()
                }
            };
            match &update.destination {
                Destination::SelfVar { var } => {
                    all.insert(var.clone(), value);
                }
                Destination::ChildVar { position, var } => {
                    if let Some(slot) = child_overrides.get_mut((position - 1) * 2) {
                        slot.insert(var.clone(), value);
                    }
                }
            }
        }

        let mut out = String::new();
        for item in &self.actions.output {
            match item {
                OutputItem::Child { position } => {
                    let index = (position - 1) * 2;
                    if let (Some(child), Some(o)) = (self.children.get(index), child_overrides.get(index)) {
                        out.push_str(&child.render(&all, o, format));
                    }
                }
                OutputItem::Blank { after: Some(after) } => {
                    if let Some(Token::Blank(text)) = self.children.get((after - 1) * 2 + 1) {
                        out.push_str(text);
                    }
                }
                OutputItem::Blank { after: None } => out.push(' '),
                OutputItem::ChildField { position, part, side } => {
                    let index = (position - 1) * 2;
                    let value = child_overrides
                        .get(index)
                        .and_then(|o| o.get(part).cloned())
                        .or_else(|| self.child(*position).and_then(|c| c.field(part, *side)));
                    out.push_str(&value.unwrap_or_default());
                }
                OutputItem::Var { var } => {
                    if let Some(value) = all.get(var) {
                        out.push_str(value);
                    }
                }
                OutputItem::Text { text } => out.push_str(text),
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    Blank(Rc<str>),
    Lexical(Rc<LexicalEntry>),
    Syntax(Rc<SyntaxNode>),
}

impl Token {
    pub fn is_blank(&self) -> bool {
        matches!(self, Token::Blank(_))
    }

    /// Variables a pattern can bind or test on this token
    pub fn vars(&self) -> Option<&Vars> {
        match self {
            Token::Blank(_) => None,
            Token::Lexical(entry) => Some(&entry.vars),
            Token::Syntax(node) => Some(&node.vars),
        }
    }

    pub fn var(&self, name: &str) -> Option<String> {
        self.vars().and_then(|v| v.get(name).cloned())
    }

    fn field(&self, part: &str, side: Side) -> Option<String> {
        match self {
            Token::Lexical(entry) => entry.field(part, side),
            _ => self.var(part),
        }
    }

    /// Short description used in diagnostics
    pub fn describe(&self) -> String {
        match self {
            Token::Blank(text) => format!("blank {:?}", text),
            Token::Lexical(entry) => {
                let tags: String = entry.source_tags.iter().map(|t| format!("<{}>", t)).collect();
                format!("^{}{}$", entry.source_lemma, tags)
            }
            Token::Syntax(node) => format!("{} (rule {})", node.node_type, node.rule_id),
        }
    }

    /// Output of this token. `scope` is inherited from the enclosing node,
    /// `overrides` are the updates the parent applied to this token.
    pub fn render(&self, scope: &Vars, overrides: &Vars, format: &Formatter<'_>) -> String {
        match self {
            Token::Blank(text) => text.to_string(),
            Token::Lexical(entry) => format.lexical(entry, scope, overrides),
            Token::Syntax(node) => node.render(scope, overrides, format),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::symbols::SymbolTable;
    use crate::parser;

    fn entry(lemma: &str, tags: &[&str], vars: &[(&str, &str)]) -> Rc<LexicalEntry> {
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        Rc::new(LexicalEntry {
            id: 0,
            source_lemma: lemma.to_string(),
            source_tags: tags.clone(),
            target_lemma: lemma.to_uppercase(),
            target_tags: tags,
            vars: vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        })
    }

    fn symbols() -> SymbolTable {
        SymbolTable::build(&parser::parse("num = sg pl ;").unwrap()).unwrap()
    }

    #[test]
    fn test_lexical_renders_target_side() {
        let token = Token::Lexical(entry("casa", &["n", "sg"], &[("num", "sg")]));
        let symbols = symbols();
        let format = Formatter::new(&symbols, &[], &[]);
        assert_eq!(token.render(&Vars::new(), &Vars::new(), &format), "^CASA<n><sg>$");
    }

    #[test]
    fn test_update_replaces_owned_tag() {
        let token = Token::Lexical(entry("casa", &["n", "sg"], &[("num", "sg")]));
        let mut overrides = Vars::new();
        overrides.insert("num".to_string(), "pl".to_string());

        let symbols = symbols();
        let format = Formatter::new(&symbols, &[], &[]);
        assert_eq!(token.render(&Vars::new(), &overrides, &format), "^CASA<n><pl>$");
    }

    #[test]
    fn test_syntax_equality_ignores_actions() {
        let node = |actions: ReduceActions| SyntaxNode {
            node_type: "NP".to_string(),
            rule_id: 1,
            vars: Vars::new(),
            actions: Rc::new(actions),
            children: vec![Token::Blank(Rc::from(" "))],
        };

        assert_eq!(node(ReduceActions::default()), node(ReduceActions::passthrough(1)));
    }

    #[test]
    fn test_syntax_applies_updates_before_output() {
        let set = parser::parse("num = sg pl ; NP -> 1: det n { 2(num=1.num) _1 1 } ;").unwrap();
        let actions = ReduceActions::lower(&set.rules[0]).unwrap();
        let node = Token::Syntax(Rc::new(SyntaxNode {
            node_type: "NP".to_string(),
            rule_id: 0,
            vars: Vars::new(),
            actions: Rc::new(actions),
            children: vec![
                Token::Lexical(entry("el", &["det", "pl"], &[("num", "pl")])),
                Token::Blank(Rc::from(" ")),
                Token::Lexical(entry("casa", &["n", "sg"], &[("num", "sg")])),
            ],
        }));

        let symbols = SymbolTable::build(&set).unwrap();
        let format = Formatter::new(&symbols, &[], &[]);
        assert_eq!(
            node.render(&Vars::new(), &Vars::new(), &format),
            "^CASA<n><pl>$ ^EL<det><pl>$"
        );
    }
}
