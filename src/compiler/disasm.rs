// src/compiler/disasm.rs
//! Disassembler for compiled programs
//!
//! Decoding is strict: every byte must belong to a header, a section or a
//! rule, and each rule's instructions must fill exactly its length byte.

use crate::compiler::bytecode::{side_from_byte, Opcode, Operands, SectionTag, CASELESS};
use crate::parser::ast::Side;
use crate::CompilationError;
use std::fmt::{self, Write};

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Int(u8),
    Text(String),
    Side(Side),
    Caseless,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Int(n) => write!(f, "{}", n),
            Operand::Text(s) => write!(f, "{:?}", s),
            Operand::Side(Side::Source) => f.write_str("S"),
            Operand::Side(Side::Reference) => f.write_str("R"),
            Operand::Side(Side::Target) => f.write_str("T"),
            Operand::Caseless => f.write_str("#"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset from the start of the rule body
    pub offset: usize,
    /// Encoded bytes, opcode included
    pub size: usize,
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

/// Operation tree rebuilt by replaying the operand stack
#[derive(Debug, Clone, PartialEq)]
pub enum Tree {
    Leaf(String),
    Node(String, Vec<Tree>),
}

impl Tree {
    fn render(&self, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        match self {
            Tree::Leaf(text) => {
                let _ = writeln!(out, "{}{}", indent, text);
            }
            Tree::Node(head, children) if children.iter().all(|c| matches!(c, Tree::Leaf(_))) => {
                let mut line = format!("{}({}", indent, head);
                for child in children {
                    if let Tree::Leaf(text) = child {
                        line.push(' ');
                        line.push_str(text);
                    }
                }
                let _ = writeln!(out, "{})", line);
            }
            Tree::Node(head, children) => {
                let _ = writeln!(out, "{}({}", indent, head);
                for child in children {
                    child.render(depth + 1, out);
                }
                let _ = writeln!(out, "{})", indent);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleListing {
    /// Category indices of the pattern
    pub pattern: Vec<u8>,
    /// Length byte of the rule
    pub length: usize,
    pub instructions: Vec<Instruction>,
    pub statements: Vec<Tree>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageListing {
    pub categories: Vec<String>,
    pub attributes: Vec<(String, Vec<String>)>,
    pub variables: Vec<(String, Option<String>)>,
    pub lists: Vec<(String, Vec<String>)>,
    pub rules: Vec<RuleListing>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub max_pattern_len: u8,
    pub rule_count: u8,
    pub stages: Vec<StageListing>,
}

impl Listing {
    /// Rules of every stage in program order
    pub fn rules(&self) -> impl Iterator<Item = &RuleListing> {
        self.stages.iter().flat_map(|s| s.rules.iter())
    }

    /// Listing with each rule shown as nested operation trees
    pub fn readable(&self) -> String {
        let mut out = String::new();
        self.write_header(&mut out);
        for (s, stage) in self.stages.iter().enumerate() {
            let _ = writeln!(out, "\nStage {}", s + 1);
            for (i, rule) in stage.rules.iter().enumerate() {
                let names: Vec<&str> = rule
                    .pattern
                    .iter()
                    .map(|&c| stage.categories.get(usize::from(c)).map_or("?", String::as_str))
                    .collect();
                let _ = writeln!(out, "\nRule {}: {}", i + 1, names.join(" "));
                for statement in &rule.statements {
                    statement.render(1, &mut out);
                }
            }
        }
        out
    }

    fn write_header(&self, out: &mut String) {
        let _ = writeln!(out, "Longest pattern: {}", self.max_pattern_len);
        let _ = writeln!(out, "Number of rules: {}", self.rule_count);
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut header = String::new();
        self.write_header(&mut header);
        f.write_str(&header)?;

        for (s, stage) in self.stages.iter().enumerate() {
            writeln!(f, "\nStage {}", s + 1)?;
            writeln!(f, "Categories: {}", stage.categories.join(" "))?;
            for (name, items) in &stage.attributes {
                writeln!(f, "Attribute {}: {}", name, items.join(" "))?;
            }
            for (name, default) in &stage.variables {
                match default {
                    Some(value) => writeln!(f, "Variable {} = {:?}", name, value)?,
                    None => writeln!(f, "Variable {}", name)?,
                }
            }
            for (name, items) in &stage.lists {
                writeln!(f, "List {}: {}", name, items.join(" "))?;
            }

            for (i, rule) in stage.rules.iter().enumerate() {
                writeln!(f, "\nRule {} - {} instructions", i + 1, rule.instructions.len())?;
                for ins in &rule.instructions {
                    write!(f, "[{}]: {} ({})", ins.offset, char::from(u8::from(ins.opcode)), ins.opcode.mnemonic())?;
                    for operand in &ins.operands {
                        write!(f, " {}", operand)?;
                    }
                    writeln!(f)?;
                }
            }
        }
        Ok(())
    }
}

/// Decode program bytes into a listing
pub fn disassemble(bytes: &[u8]) -> Result<Listing, CompilationError> {
    let mut decoder = Decoder { bytes, offset: 0 };
    let max_pattern_len = decoder.byte()?;
    let rule_count = decoder.byte()?;

    let mut stages = Vec::new();
    while !decoder.is_at_end() {
        stages.push(decoder.stage()?);
    }

    let Some(last) = stages.last() else {
        return Err(CompilationError::Decode {
            offset: decoder.offset,
            message: "program has no category section".to_string(),
        });
    };
    if last.rules.len() != usize::from(rule_count) {
        return Err(CompilationError::Decode {
            offset: decoder.offset,
            message: format!(
                "header declares {} rules, last stage has {}",
                rule_count,
                last.rules.len()
            ),
        });
    }

    tracing::debug!(stages = stages.len(), rules = rule_count, "disassembled program");
    Ok(Listing {
        max_pattern_len,
        rule_count,
        stages,
    })
}

struct Decoder<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    fn stage(&mut self) -> Result<StageListing, CompilationError> {
        let mut stage = StageListing::default();

        let n = self.section(SectionTag::Categories)?;
        let start = self.offset;
        while self.peek() == Some(Opcode::Str.into()) {
            stage.categories.push(self.literal()?);
        }
        let found = stage.categories.len();
        if found > 256 || found % 256 != usize::from(n) {
            return Err(CompilationError::Decode {
                offset: start,
                message: format!("category count {} does not match {} names", n, found),
            });
        }

        let n = self.section(SectionTag::Attributes)?;
        for _ in 0..n {
            stage.attributes.push(self.named_items(Opcode::AttributeDef)?);
        }

        let n = self.section(SectionTag::Variables)?;
        for _ in 0..n {
            let offset = self.offset;
            match self.opcode()? {
                Opcode::Var => stage.variables.push((self.literal()?, Some(self.literal()?))),
                Opcode::VariableDef => stage.variables.push((self.literal()?, None)),
                other => return Err(self.unexpected(offset, other.mnemonic(), "a variable definition")),
            }
        }

        let n = self.section(SectionTag::Lists)?;
        for _ in 0..n {
            stage.lists.push(self.named_items(Opcode::ListDef)?);
        }

        while self.peek() == Some(SectionTag::Rule.into()) {
            self.offset += 1;
            let length = usize::from(self.byte()?);
            let start = self.offset;
            let body = self.bytes.get(start..start + length).ok_or_else(|| CompilationError::Decode {
                offset: start,
                message: format!("rule of {} bytes is truncated", length),
            })?;
            stage.rules.push(decode_rule(body, start)?);
            self.offset += length;
        }

        Ok(stage)
    }

    fn section(&mut self, tag: SectionTag) -> Result<u8, CompilationError> {
        let offset = self.offset;
        let byte = self.byte()?;
        if byte != u8::from(tag) {
            return Err(CompilationError::Decode {
                offset,
                message: format!("expected section '{}', found 0x{:02X}", char::from(u8::from(tag)), byte),
            });
        }
        self.byte()
    }

    fn named_items(&mut self, expected: Opcode) -> Result<(String, Vec<String>), CompilationError> {
        let offset = self.offset;
        let opcode = self.opcode()?;
        if opcode != expected {
            return Err(self.unexpected(offset, opcode.mnemonic(), expected.mnemonic()));
        }
        let count = self.byte()?;
        let name = self.literal()?;
        let items = (0..count).map(|_| self.literal()).collect::<Result<_, _>>()?;
        Ok((name, items))
    }

    fn literal(&mut self) -> Result<String, CompilationError> {
        let offset = self.offset;
        match self.opcode()? {
            Opcode::Str => self.text(),
            other => Err(self.unexpected(offset, other.mnemonic(), "a string")),
        }
    }

    /// Length-prefixed string payload
    fn text(&mut self) -> Result<String, CompilationError> {
        let length = usize::from(self.byte()?);
        let start = self.offset;
        let raw = self.bytes.get(start..start + length).ok_or_else(|| CompilationError::Decode {
            offset: start,
            message: format!("string of {} bytes is truncated", length),
        })?;
        self.offset += length;
        String::from_utf8(raw.to_vec()).map_err(|e| CompilationError::Decode {
            offset: start,
            message: e.to_string(),
        })
    }

    fn opcode(&mut self) -> Result<Opcode, CompilationError> {
        let offset = self.offset;
        let byte = self.byte()?;
        byte.try_into()
            .map_err(|ono: num_enum::TryFromPrimitiveError<Opcode>| CompilationError::Decode {
                offset,
                message: format!("0x{:02X} is not an opcode", ono.number),
            })
    }

    fn byte(&mut self) -> Result<u8, CompilationError> {
        let byte = self.peek().ok_or_else(|| CompilationError::Decode {
            offset: self.offset,
            message: "unexpected end of program".to_string(),
        })?;
        self.offset += 1;
        Ok(byte)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.offset).copied()
    }

    fn is_at_end(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    fn unexpected(&self, offset: usize, found: &str, expected: &str) -> CompilationError {
        CompilationError::Decode {
            offset,
            message: format!("expected {}, found {}", expected, found),
        }
    }
}

/// Decodes one rule body; `base` is its absolute offset for diagnostics
fn decode_rule(body: &[u8], base: usize) -> Result<RuleListing, CompilationError> {
    let mut decoder = Decoder { bytes: body, offset: 0 };
    let mut instructions = Vec::new();
    let at = |offset: usize, message: String| CompilationError::Decode {
        offset: base + offset,
        message,
    };

    while !decoder.is_at_end() {
        let offset = decoder.offset;
        let opcode = decoder.opcode().map_err(|e| match e {
            CompilationError::Decode { offset, message } => at(offset, message),
            other => other,
        })?;
        let mut operands = Vec::new();
        let truncated = |_| at(offset, format!("operands of '{}' are truncated", opcode.mnemonic()));

        match opcode.operands() {
            Operands::None => {}
            Operands::Byte => operands.push(Operand::Int(decoder.byte().map_err(truncated)?)),
            Operands::Clip => {
                let selector = decoder.byte().map_err(truncated)?;
                let side = side_from_byte(selector)
                    .ok_or_else(|| at(offset + 1, format!("0x{:02X} is not a clip side", selector)))?;
                operands.push(Operand::Side(side));
                operands.push(Operand::Int(decoder.byte().map_err(truncated)?));
            }
            Operands::Str => operands.push(Operand::Text(decoder.text().map_err(truncated)?)),
            Operands::Flag => {
                if decoder.peek() == Some(CASELESS) {
                    decoder.offset += 1;
                    operands.push(Operand::Caseless);
                }
            }
            Operands::Counted => {
                let n = decoder.byte().map_err(truncated)?;
                for _ in 0..n {
                    operands.push(Operand::Int(decoder.byte().map_err(truncated)?));
                }
            }
        }

        instructions.push(Instruction {
            offset,
            size: decoder.offset - offset,
            opcode,
            operands,
        });
    }

    let pattern = match instructions.first() {
        Some(Instruction {
            opcode: Opcode::Pattern,
            operands,
            ..
        }) => operands
            .iter()
            .filter_map(|o| match o {
                Operand::Int(n) => Some(*n),
                _ => None,
            })
            .collect(),
        _ => return Err(at(0, "rule does not start with a pattern".to_string())),
    };

    let statements = replay(&instructions[1..]).map_err(|(offset, message)| at(offset, message))?;

    Ok(RuleListing {
        pattern,
        length: body.len(),
        instructions,
        statements,
    })
}

enum Slot {
    Value(Tree),
    LetMarker,
}

/// Rebuilds operation trees by simulating the operand stack
fn replay(instructions: &[Instruction]) -> Result<Vec<Tree>, (usize, String)> {
    let mut stack: Vec<Slot> = Vec::new();

    for ins in instructions {
        let underflow = || (ins.offset, format!("'{}' pops an empty stack", ins.opcode.mnemonic()));
        let int = |i: usize| match ins.operands.get(i) {
            Some(Operand::Int(n)) => *n,
            _ => 0,
        };
        let caseless = ins.operands.contains(&Operand::Caseless);

        let tree = match ins.opcode {
            Opcode::Str => Tree::Leaf(ins.operands.first().map(ToString::to_string).unwrap_or_default()),
            Opcode::Space => Tree::Node("space".to_string(), vec![]),
            Opcode::Blank => Tree::Node(format!("blank {}", int(0)), vec![]),
            Opcode::Jump => Tree::Node(format!("jump {}", int(0)), vec![]),
            Opcode::Clip => {
                let part = pop(&mut stack, 1).ok_or_else(underflow)?;
                let side = ins.operands.first().map(ToString::to_string).unwrap_or_default();
                Tree::Node(format!("clip {} {}", side, int(1)), part)
            }
            Opcode::BeginLet => {
                stack.push(Slot::LetMarker);
                continue;
            }
            Opcode::SetClip | Opcode::SetVar => {
                let operands = pop(&mut stack, 2).ok_or_else(underflow)?;
                match stack.pop() {
                    Some(Slot::LetMarker) => {}
                    _ => return Err((ins.offset, "let without begin-let".to_string())),
                }
                let head = if caseless { "modify-case" } else { "let" };
                Tree::Node(head.to_string(), operands)
            }
            Opcode::JumpIfNot => {
                let condition = pop(&mut stack, 1).ok_or_else(underflow)?;
                Tree::Node(format!("jump-if-not {}", int(0)), condition)
            }
            Opcode::Pattern | Opcode::AttributeDef | Opcode::ListDef | Opcode::VariableDef => {
                return Err((ins.offset, format!("'{}' inside a rule body", ins.opcode.mnemonic())));
            }
            opcode => {
                let n = opcode.pops().unwrap_or_else(|| usize::from(int(0)));
                let args = pop(&mut stack, n).ok_or_else(underflow)?;
                let head = if caseless {
                    format!("{} caseless", opcode.mnemonic())
                } else {
                    opcode.mnemonic().to_string()
                };
                Tree::Node(head, args)
            }
        };
        stack.push(Slot::Value(tree));
    }

    let mut statements = Vec::with_capacity(stack.len());
    for slot in stack {
        match slot {
            Slot::Value(tree) => statements.push(tree),
            Slot::LetMarker => return Err((0, "unterminated let".to_string())),
        }
    }

    Ok(statements)
}

/// Pops `n` values, oldest first; a let marker in the way is an underflow
fn pop(stack: &mut Vec<Slot>, n: usize) -> Option<Vec<Tree>> {
    if stack.len() < n {
        return None;
    }
    let mut values = Vec::with_capacity(n);
    for slot in stack.drain(stack.len() - n..) {
        match slot {
            Slot::Value(tree) => values.push(tree),
            Slot::LetMarker => return None,
        }
    }
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::parser;

    const MARKUP: &str = r#"
        <interchunk>
          <section-def-cats>
            <def-cat n="det"><cat-item tags="det.*"/></def-cat>
            <def-cat n="nom"><cat-item tags="n.*"/></def-cat>
          </section-def-cats>
          <section-def-attrs>
            <def-attr n="nbr"><attr-item tags="sg"/><attr-item tags="pl"/></def-attr>
          </section-def-attrs>
          <section-def-vars><def-var n="number" v="sg"/></section-def-vars>
          <section-rules>
            <rule>
              <pattern><pattern-item n="det"/><pattern-item n="nom"/></pattern>
              <action>
                <choose>
                  <when>
                    <test><equal caseless="yes"><clip pos="2" part="nbr"/><lit-tag v="pl"/></equal></test>
                    <let><var n="number"/><lit v="pl"/></let>
                  </when>
                </choose>
                <out><chunk name="SN"><clip pos="1" part="whole"/><b pos="1"/><clip pos="2" part="whole"/></chunk></out>
              </action>
            </rule>
          </section-rules>
        </interchunk>"#;

    fn listing() -> Listing {
        let set = parser::parse(MARKUP).unwrap();
        disassemble(&compile(&set).unwrap().to_bytes()).unwrap()
    }

    #[test]
    fn test_sections_decode() {
        let listing = listing();
        let stage = &listing.stages[0];

        assert_eq!(stage.categories, vec!["det", "nom"]);
        assert_eq!(stage.attributes, vec![("nbr".to_string(), vec!["sg".to_string(), "pl".to_string()])]);
        assert_eq!(stage.variables, vec![("number".to_string(), Some("sg".to_string()))]);
        assert!(stage.lists.is_empty());
    }

    #[test]
    fn test_rule_instructions_fill_length() {
        let listing = listing();
        let rule = listing.rules().next().unwrap();

        assert_eq!(rule.pattern, vec![0, 1]);
        assert_eq!(rule.instructions[0].opcode, Opcode::Pattern);
        let equal = rule
            .instructions
            .iter()
            .find(|i| i.opcode == Opcode::Equal)
            .unwrap();
        assert_eq!(equal.operands, vec![Operand::Caseless]);

        let mut next = 0;
        for ins in &rule.instructions {
            assert_eq!(ins.offset, next);
            next += ins.size;
        }
        assert_eq!(next, rule.length);
    }

    #[test]
    fn test_readable_nests_operands() {
        let text = listing().readable();

        assert!(text.contains("(equal caseless"));
        assert!(text.contains("(jump-if-not"));
        assert!(text.contains("(let"));
        assert!(text.contains("(chunk"));
        assert!(text.contains("Rule 1: det nom"));
    }

    #[test]
    fn test_display_lists_offsets() {
        let text = listing().to_string();
        assert!(text.contains("Longest pattern: 2"));
        assert!(text.contains("[0]: P (pattern) 0 1"));
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let set = parser::parse("NP -> 1: det n { 1 2 } ;").unwrap();
        let mut bytes = compile(&set).unwrap().to_bytes();
        bytes.push(b'?');

        assert!(matches!(disassemble(&bytes), Err(CompilationError::Decode { .. })));
    }

    #[test]
    fn test_truncated_rule_is_rejected() {
        let set = parser::parse("NP -> 1: det n { 1 2 } ;").unwrap();
        let mut bytes = compile(&set).unwrap().to_bytes();
        bytes.pop();

        assert!(matches!(disassemble(&bytes), Err(CompilationError::Decode { .. })));
    }

    #[test]
    fn test_rule_count_must_match_header() {
        let set = parser::parse("NP -> 1: det n { 1 2 } ;").unwrap();
        let mut bytes = compile(&set).unwrap().to_bytes();
        bytes[1] = 2;

        assert!(matches!(disassemble(&bytes), Err(CompilationError::Decode { .. })));
    }
}
