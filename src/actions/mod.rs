// src/actions/mod.rs
//! Actions performed when a rule reduces
//!
//! A reduction rule's action tree is lowered into two flat lists: variable
//! updates, run in order when the node is output, and an output template
//! over the matched children. The grammar backend and the reduction engine
//! both consume this form; action trees with control flow cannot be lowered.

use crate::parser::ast::{tag_literal, Clip, Operation, Rule, Side, StackOp};
use crate::{CompilationError, SymbolKind};
use serde::{Deserialize, Serialize};

/// Where an update reads its value from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueSource {
    /// Variable of the node being output, as seen through inherited scope
    SelfVar { var: String },
    Literal { value: String },
    ChildVar { position: usize, var: String },
}

/// Where an update writes its value to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Destination {
    SelfVar { var: String },
    ChildVar { position: usize, var: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Update {
    pub source: ValueSource,
    pub destination: Destination,
}

/// One piece of a node's output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    /// Full output of the child at a pattern position
    Child { position: usize },
    /// One variable of a child
    ChildField { position: usize, part: String, side: Side },
    /// Variable of the node being output
    Var { var: String },
    /// Blank after a pattern position, or a single space
    Blank { after: Option<usize> },
    Text { text: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReduceActions {
    pub updates: Vec<Update>,
    pub output: Vec<OutputItem>,
}

impl ReduceActions {
    /// Lower a rule's action tree; positions must fall inside its pattern
    pub fn lower(rule: &Rule) -> Result<Self, CompilationError> {
        let mut lowering = Lowering {
            rule,
            actions: ReduceActions::default(),
        };
        for op in &rule.action {
            lowering.statement(op)?;
        }
        Ok(lowering.actions)
    }

    /// Actions that output every child in order, blanks between them
    pub fn passthrough(len: usize) -> Self {
        let mut output = Vec::with_capacity(len * 2);
        for position in 1..=len {
            if position > 1 {
                output.push(OutputItem::Blank {
                    after: Some(position - 1),
                });
            }
            output.push(OutputItem::Child { position });
        }
        ReduceActions {
            updates: Vec::new(),
            output,
        }
    }
}

struct Lowering<'a> {
    rule: &'a Rule,
    actions: ReduceActions,
}

impl<'a> Lowering<'a> {
    fn statement(&mut self, op: &Operation) -> Result<(), CompilationError> {
        match op {
            Operation::Let {
                target,
                value,
                modify_case: false,
            } => {
                let destination = match target.as_ref() {
                    Operation::Var(var) => Destination::SelfVar { var: var.clone() },
                    Operation::Clip(clip) => Destination::ChildVar {
                        position: self.position(clip.position)?,
                        var: clip.part.clone(),
                    },
                    other => return Err(self.unsupported(other)),
                };
                let source = self.source(value)?;
                self.actions.updates.push(Update {
                    source,
                    destination,
                });
                Ok(())
            }
            Operation::Stack {
                op: StackOp::Out | StackOp::Chunk | StackOp::Concat,
                args,
            } => {
                for arg in args {
                    self.output(arg)?;
                }
                Ok(())
            }
            other => Err(self.unsupported(other)),
        }
    }

    fn source(&self, value: &Operation) -> Result<ValueSource, CompilationError> {
        match value {
            Operation::Var(var) => Ok(ValueSource::SelfVar { var: var.clone() }),
            Operation::Lit(value) => Ok(ValueSource::Literal {
                value: value.clone(),
            }),
            Operation::LitTag(tags) => Ok(ValueSource::Literal {
                value: tag_literal(tags),
            }),
            Operation::Clip(clip) => Ok(ValueSource::ChildVar {
                position: self.position(clip.position)?,
                var: clip.part.clone(),
            }),
            other => Err(self.unsupported(other)),
        }
    }

    fn output(&mut self, op: &Operation) -> Result<(), CompilationError> {
        let item = match op {
            Operation::Clip(Clip { part, position, .. }) if part == "whole" => OutputItem::Child {
                position: self.position(*position)?,
            },
            Operation::Clip(Clip { part, position, side }) => OutputItem::ChildField {
                position: self.position(*position)?,
                part: part.clone(),
                side: *side,
            },
            Operation::Blank(Some(after)) if *after < self.rule.pattern.len() => OutputItem::Blank {
                after: Some(self.position(*after)?),
            },
            Operation::Blank(Some(after)) => return Err(self.out_of_range(*after)),
            Operation::Blank(None) => OutputItem::Blank { after: None },
            Operation::Var(var) => OutputItem::Var { var: var.clone() },
            Operation::Lit(text) => OutputItem::Text { text: text.clone() },
            Operation::LitTag(tags) => OutputItem::Text {
                text: tag_literal(tags),
            },
            Operation::Stack {
                op: StackOp::Out | StackOp::Chunk | StackOp::Concat,
                args,
            } => {
                for arg in args {
                    self.output(arg)?;
                }
                return Ok(());
            }
            other => return Err(self.unsupported(other)),
        };
        self.actions.output.push(item);
        Ok(())
    }

    fn position(&self, position: usize) -> Result<usize, CompilationError> {
        if position == 0 || position > self.rule.pattern.len() {
            return Err(self.out_of_range(position));
        }
        Ok(position)
    }

    fn out_of_range(&self, position: usize) -> CompilationError {
        CompilationError::Reference {
            kind: SymbolKind::Position,
            name: format!("{} in rule {}", position, self.rule.id),
        }
    }

    fn unsupported(&self, op: &Operation) -> CompilationError {
        CompilationError::Unsupported {
            rule: self.rule.id,
            construct: op.kind().to_string(),
        }
    }
}
