// src/parser/ast.rs
//! Rule intermediate representation shared by both front ends

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which pipeline pass a rule set was written for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    PreTransfer,
    InterChunk,
    PostChunk,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::PreTransfer => write!(f, "pre-transfer"),
            Stage::InterChunk => write!(f, "inter-chunk"),
            Stage::PostChunk => write!(f, "post-chunk"),
        }
    }
}

/// All declarations and rules of one compilation unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub stage: Stage,
    pub categories: Vec<Category>,
    pub attributes: Vec<Attribute>,
    pub variables: Vec<VariableDef>,
    pub lists: Vec<ListDef>,
    pub macros: Vec<Macro>,
    pub rules: Vec<Rule>,
    pub output_rules: Vec<OutputRule>,
    pub retag_rules: Vec<RetagRule>,
}

impl RuleSet {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            ..Self::default()
        }
    }

    /// Longest pattern of any rule, counted in pattern elements
    pub fn max_pattern_len(&self) -> usize {
        self.rules.iter().map(|r| r.pattern.len()).max().unwrap_or(0)
    }

    pub fn rule(&self, id: usize) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Serialize the IR so a parsed corpus can be reloaded without the front end
    pub fn to_snapshot(&self) -> Result<Vec<u8>, crate::CompilationError> {
        bincode::serialize(self).map_err(|e| crate::CompilationError::Snapshot(e.to_string()))
    }

    pub fn from_snapshot(data: &[u8]) -> Result<Self, crate::CompilationError> {
        bincode::deserialize(data).map_err(|e| crate::CompilationError::Snapshot(e.to_string()))
    }
}

/// Named equivalence class of pattern items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    /// Empty for categories introduced implicitly by a pattern
    pub items: Vec<CategoryItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryItem {
    pub lemma: Option<String>,
    /// Tag glob, `*` matches any run of tags
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListDef {
    pub name: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    pub name: String,
    pub param_count: usize,
    pub body: Vec<Operation>,
}

/// Formats lexical units whose target tags start with `pattern`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRule {
    pub pattern: Vec<String>,
    pub slots: Vec<OutputSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputSlot {
    /// The rule's own pattern tags
    Pattern,
    Tag(String),
    /// Value of a variable, omitted when unset
    Var(String),
}

/// Derives `destination` from the value of attribute `source`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetagRule {
    pub source: String,
    pub destination: String,
    pub pairs: Vec<(String, String)>,
}

impl RetagRule {
    pub fn map(&self, value: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(from, _)| from == value)
            .map(|(_, to)| to.as_str())
    }
}

/// One position of a rule pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternElement {
    pub category: String,
    /// Source lemma a lexical unit must carry
    pub lemma: Option<String>,
    /// Bare tags or attribute names, all of which must hold
    pub attributes: Vec<String>,
    /// Variables bound (first occurrence) or re-checked at this position
    pub bindings: Vec<String>,
    pub caseless: bool,
    /// Only matches lexical units, never reduced nodes
    pub lexical_only: bool,
    /// Grab variables of the rule are copied from this position
    pub grab_source: bool,
}

impl PatternElement {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            lemma: None,
            attributes: Vec::new(),
            bindings: Vec::new(),
            caseless: false,
            lexical_only: false,
            grab_source: false,
        }
    }

    pub fn with_attribute(mut self, attr: impl Into<String>) -> Self {
        self.attributes.push(attr.into());
        self
    }

    pub fn with_binding(mut self, var: impl Into<String>) -> Self {
        self.bindings.push(var.into());
        self
    }
}

/// A variable copied from a matched position into the result node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grab {
    /// 1-based pattern position
    pub position: usize,
    pub var: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: usize,
    pub result: String,
    pub grabs: Vec<Grab>,
    pub pattern: Vec<PatternElement>,
    pub action: Vec<Operation>,
    pub weight: f64,
    pub comment: Option<String>,
}

/// Token buffer a clip reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Side {
    Source,
    Reference,
    #[default]
    Target,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clip {
    pub part: String,
    /// 1-based pattern position
    pub position: usize,
    pub side: Side,
}

impl Clip {
    pub fn new(part: impl Into<String>, position: usize) -> Self {
        Self {
            part: part.into(),
            position,
            side: Side::Target,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicOp {
    Not,
    Equal,
    BeginsWith,
    EndsWith,
    BeginsWithList,
    EndsWithList,
    Contains,
    In,
    Test,
    GetCaseFrom,
}

impl LogicOp {
    pub fn accepts_caseless(&self) -> bool {
        !matches!(self, LogicOp::Not | LogicOp::Test | LogicOp::GetCaseFrom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackOp {
    And,
    Or,
    Concat,
    Out,
    Chunk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct When {
    pub test: Operation,
    pub body: Vec<Operation>,
}

/// Action tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Lit(String),
    /// Dotted tag sequence, `sg.m` stands for `<sg><m>`
    LitTag(String),
    Var(String),
    Clip(Clip),
    List(String),
    Logic {
        op: LogicOp,
        caseless: bool,
        args: Vec<Operation>,
    },
    Stack {
        op: StackOp,
        args: Vec<Operation>,
    },
    Let {
        target: Box<Operation>,
        value: Box<Operation>,
        modify_case: bool,
    },
    Append {
        var: String,
        values: Vec<Operation>,
    },
    Choose {
        branches: Vec<When>,
        otherwise: Option<Vec<Operation>>,
    },
    CaseOf(Clip),
    PseudoLemma(Box<Operation>),
    CallMacro {
        name: String,
        args: Vec<usize>,
    },
    Blank(Option<usize>),
}

impl Operation {
    /// Short kind name used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Lit(_) => "lit",
            Operation::LitTag(_) => "lit-tag",
            Operation::Var(_) => "var",
            Operation::Clip(_) => "clip",
            Operation::List(_) => "list",
            Operation::Logic { .. } => "logic",
            Operation::Stack { .. } => "stack",
            Operation::Let { .. } => "let",
            Operation::Append { .. } => "append",
            Operation::Choose { .. } => "choose",
            Operation::CaseOf(_) => "case-of",
            Operation::PseudoLemma(_) => "pseudolemma",
            Operation::CallMacro { .. } => "call-macro",
            Operation::Blank(_) => "b",
        }
    }

    pub fn logic(op: LogicOp, args: Vec<Operation>) -> Self {
        Operation::Logic {
            op,
            caseless: false,
            args,
        }
    }

    pub fn stack(op: StackOp, args: Vec<Operation>) -> Self {
        Operation::Stack { op, args }
    }

    pub fn clip(part: impl Into<String>, position: usize) -> Self {
        Operation::Clip(Clip::new(part, position))
    }

    pub fn assign(target: Operation, value: Operation) -> Self {
        Operation::Let {
            target: Box::new(target),
            value: Box::new(value),
            modify_case: false,
        }
    }
}

/// Renders a dotted tag literal as `<a><b>`
pub fn tag_literal(dotted: &str) -> String {
    if dotted.is_empty() {
        return String::new();
    }
    dotted.split('.').map(|t| format!("<{}>", t)).collect()
}
