// src/compiler/compiler.rs
//! Emitter lowering rule actions into transfer-machine bytes

use crate::compiler::bytecode::{side_byte, Opcode, SectionTag, CASELESS};
use crate::compiler::symbols::SymbolTable;
use crate::parser::ast::*;
use crate::{CompilationError, SymbolKind};
use ahash::HashMap;

/// One byte of emitted code; positions stay typed until the rule is
/// finished so macro calls can remap them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Byte(u8),
    Position(u8),
}

/// Compiled body of a macro, positions referring to its parameters
struct MacroCode {
    param_count: usize,
    code: Vec<Code>,
}

/// Encoded sections and rules of one stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageCode {
    pub max_pattern_len: usize,
    pub rule_count: usize,
    pub bytes: Vec<u8>,
}

pub struct Compiler<'a> {
    symbols: &'a SymbolTable,
    macros: HashMap<String, MacroCode>,
    /// Rule being compiled, for diagnostics
    rule: usize,
}

impl<'a> Compiler<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Self {
        Self {
            symbols,
            macros: HashMap::default(),
            rule: 0,
        }
    }

    pub fn compile_stage(mut self, set: &RuleSet) -> Result<StageCode, CompilationError> {
        for mac in &set.macros {
            let mut code = Vec::new();
            self.emit_block(&mac.body, &mut code)?;
            tracing::trace!(name = %mac.name, bytes = code.len(), "compiled macro");
            self.macros.insert(
                mac.name.clone(),
                MacroCode {
                    param_count: mac.param_count,
                    code,
                },
            );
        }

        let mut bytes = self.definitions()?;
        for rule in &set.rules {
            self.rule = rule.id;
            bytes.extend(self.compile_rule(rule)?);
        }

        Ok(StageCode {
            max_pattern_len: set.max_pattern_len(),
            rule_count: set.rules.len(),
            bytes,
        })
    }

    /// `C` `A` `V` `L` sections, always all four
    fn definitions(&self) -> Result<Vec<u8>, CompilationError> {
        let symbols = self.symbols;
        let mut out = Vec::new();

        out.push(SectionTag::Categories.into());
        // a full table of 256 wraps to 0; names are read up to the next tag
        out.push((symbols.categories().len() % 256) as u8);
        for cat in symbols.categories() {
            literal(&cat.name, &mut out)?;
        }

        out.push(SectionTag::Attributes.into());
        out.push(count("attribute count", symbols.attributes().len())?);
        for attr in symbols.attributes() {
            out.push(Opcode::AttributeDef.into());
            out.push(count("attribute length", attr.items.len())?);
            literal(&attr.name, &mut out)?;
            for item in &attr.items {
                literal(item, &mut out)?;
            }
        }

        out.push(SectionTag::Variables.into());
        out.push(count("variable count", symbols.variables().len())?);
        for var in symbols.variables() {
            match &var.default {
                Some(default) => {
                    out.push(Opcode::Var.into());
                    literal(&var.name, &mut out)?;
                    literal(default, &mut out)?;
                }
                None => {
                    out.push(Opcode::VariableDef.into());
                    literal(&var.name, &mut out)?;
                }
            }
        }

        out.push(SectionTag::Lists.into());
        out.push(count("list count", symbols.lists().len())?);
        for list in symbols.lists() {
            out.push(Opcode::ListDef.into());
            out.push(count("list length", list.items.len())?);
            literal(&list.name, &mut out)?;
            for item in &list.items {
                literal(item, &mut out)?;
            }
        }

        Ok(out)
    }

    /// `R length P count category... action...`
    fn compile_rule(&self, rule: &Rule) -> Result<Vec<u8>, CompilationError> {
        let mut body = vec![u8::from(Opcode::Pattern), count("pattern length", rule.pattern.len())?];
        for element in &rule.pattern {
            body.push(self.symbols.category_index(&element.category)?);
            // constraints are not encoded but must name known tags
            for constraint in &element.attributes {
                self.symbols.resolve_constraint(constraint)?;
            }
        }

        let mut code = Vec::new();
        self.emit_block(&rule.action, &mut code)?;

        for unit in code {
            match unit {
                Code::Byte(b) => body.push(b),
                Code::Position(p) if usize::from(p) <= rule.pattern.len() => body.push(p),
                Code::Position(p) => {
                    return Err(CompilationError::Reference {
                        kind: SymbolKind::Position,
                        name: format!("{} in rule {}", p, rule.id),
                    })
                }
            }
        }

        let mut out = vec![u8::from(SectionTag::Rule), count("rule length", body.len())?];
        out.extend(body);
        Ok(out)
    }

    fn emit_block(&self, ops: &[Operation], out: &mut Vec<Code>) -> Result<(), CompilationError> {
        for op in ops {
            self.emit(op, out)?;
        }
        Ok(())
    }

    fn emit(&self, op: &Operation, out: &mut Vec<Code>) -> Result<(), CompilationError> {
        match op {
            Operation::Lit(value) => push_literal(value, out)?,
            Operation::LitTag(tags) => push_literal(&tag_literal(tags), out)?,
            Operation::Var(name) => {
                self.symbols.variable(name)?;
                push_literal(name, out)?;
                out.push(op_code(Opcode::Var));
            }
            Operation::Clip(clip) => self.emit_clip(clip, out)?,
            Operation::List(name) => {
                self.symbols.list(name)?;
                push_literal(name, out)?;
            }
            Operation::Logic { op, caseless, args } => {
                let opcode = Opcode::for_logic(*op).ok_or_else(|| CompilationError::Unsupported {
                    rule: self.rule,
                    construct: "test outside of a when".to_string(),
                })?;
                self.emit_block(args, out)?;
                out.push(op_code(opcode));
                if *caseless && op.accepts_caseless() {
                    out.push(Code::Byte(CASELESS));
                }
            }
            Operation::Stack { op, args } => {
                self.emit_block(args, out)?;
                out.push(op_code(Opcode::from(*op)));
                out.push(Code::Byte(count("operand count", args.len())?));
            }
            Operation::Let {
                target,
                value,
                modify_case,
            } => {
                let end = match target.as_ref() {
                    Operation::Clip(_) => Opcode::SetClip,
                    Operation::Var(_) => Opcode::SetVar,
                    other => {
                        return Err(CompilationError::Unsupported {
                            rule: self.rule,
                            construct: format!("let target '{}'", other.kind()),
                        })
                    }
                };
                out.push(op_code(Opcode::BeginLet));
                self.emit(target, out)?;
                self.emit(value, out)?;
                out.push(op_code(end));
                if *modify_case {
                    out.push(Code::Byte(CASELESS));
                }
            }
            Operation::Append { var, values } => {
                let mut parts = vec![Operation::Var(var.clone())];
                parts.extend(values.iter().cloned());
                let lowered = Operation::assign(
                    Operation::Var(var.clone()),
                    Operation::stack(StackOp::Concat, parts),
                );
                self.emit(&lowered, out)?;
            }
            Operation::Choose {
                branches,
                otherwise,
            } => self.emit_choose(branches, otherwise.as_deref(), out)?,
            Operation::CaseOf(clip) => {
                self.emit_clip(clip, out)?;
                out.push(op_code(Opcode::CaseOf));
            }
            Operation::PseudoLemma(value) => {
                self.emit(value, out)?;
                out.push(op_code(Opcode::PseudoLemma));
            }
            Operation::CallMacro { name, args } => self.emit_call(name, args, out)?,
            Operation::Blank(Some(pos)) => {
                out.push(op_code(Opcode::Blank));
                out.push(Code::Position(position(*pos)?));
            }
            Operation::Blank(None) => out.push(op_code(Opcode::Space)),
        }
        Ok(())
    }

    fn emit_clip(&self, clip: &Clip, out: &mut Vec<Code>) -> Result<(), CompilationError> {
        self.symbols.check_part(&clip.part)?;
        push_literal(&clip.part, out)?;
        out.push(op_code(Opcode::Clip));
        out.push(Code::Byte(side_byte(clip.side)));
        out.push(Code::Position(position(clip.position)?));
        Ok(())
    }

    /// Each `when` becomes `cond ? n body [j m]`, built back to front so
    /// every skip is known when it is written
    fn emit_choose(
        &self,
        branches: &[When],
        otherwise: Option<&[Operation]>,
        out: &mut Vec<Code>,
    ) -> Result<(), CompilationError> {
        let mut rest = Vec::new();
        if let Some(ops) = otherwise {
            self.emit_block(ops, &mut rest)?;
        }

        for when in branches.iter().rev() {
            let condition = match &when.test {
                Operation::Logic {
                    op: LogicOp::Test,
                    args,
                    ..
                } => args.as_slice(),
                other => std::slice::from_ref(other),
            };

            let mut body = Vec::new();
            self.emit_block(&when.body, &mut body)?;
            if !rest.is_empty() {
                body.push(op_code(Opcode::Jump));
                body.push(Code::Byte(count("jump length", rest.len())?));
            }

            let mut block = Vec::new();
            self.emit_block(condition, &mut block)?;
            block.push(op_code(Opcode::JumpIfNot));
            block.push(Code::Byte(count("jump length", body.len())?));
            block.extend(body);
            block.extend(rest);
            rest = block;
        }

        out.extend(rest);
        Ok(())
    }

    /// Splices a compiled macro body, remapping parameter slots to the
    /// caller's positions
    fn emit_call(&self, name: &str, args: &[usize], out: &mut Vec<Code>) -> Result<(), CompilationError> {
        let declared = self.symbols.macro_arity(name)?;
        let mac = self.macros.get(name).ok_or_else(|| CompilationError::Reference {
            kind: SymbolKind::Macro,
            name: name.to_string(),
        })?;

        if args.len() != declared {
            return Err(CompilationError::Reference {
                kind: SymbolKind::MacroParameter,
                name: format!("{} takes {} parameters, got {}", name, mac.param_count, args.len()),
            });
        }

        let args = args.iter().map(|&a| position(a)).collect::<Result<Vec<_>, _>>()?;
        for unit in &mac.code {
            let unit = match *unit {
                Code::Position(0) => Code::Position(0),
                Code::Position(slot) => match args.get(usize::from(slot) - 1) {
                    Some(&arg) => Code::Position(arg),
                    None => {
                        return Err(CompilationError::Reference {
                            kind: SymbolKind::MacroParameter,
                            name: format!("{} parameter {}", name, slot),
                        })
                    }
                },
                byte => byte,
            };
            out.push(unit);
        }
        Ok(())
    }
}

fn op_code(opcode: Opcode) -> Code {
    Code::Byte(opcode.into())
}

fn count(what: &'static str, value: usize) -> Result<u8, CompilationError> {
    u8::try_from(value).map_err(|_| CompilationError::FormatLimit { what, value })
}

fn position(value: usize) -> Result<u8, CompilationError> {
    count("position", value)
}

fn literal(value: &str, out: &mut Vec<u8>) -> Result<(), CompilationError> {
    let bytes = value.as_bytes();
    out.push(Opcode::Str.into());
    out.push(count("string length", bytes.len())?);
    out.extend_from_slice(bytes);
    Ok(())
}

fn push_literal(value: &str, out: &mut Vec<Code>) -> Result<(), CompilationError> {
    let mut bytes = Vec::with_capacity(value.len() + 2);
    literal(value, &mut bytes)?;
    out.extend(bytes.into_iter().map(Code::Byte));
    Ok(())
}
