// src/compiler/bytecode.rs
//! Byte-level instruction set of the transfer machine
//!
//! Every instruction is one opcode byte followed by raw single-byte operands.
//! Section headers and action opcodes live in separate enums because a few
//! bytes are reused between the two contexts.

use crate::parser::ast::{LogicOp, Side, StackOp};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Marks a caseless comparison or a case-preserving assignment
pub const CASELESS: u8 = b'#';

/// Section headers of a program body
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SectionTag {
    /// `count (s name)...`
    Categories = b'C',
    /// `count (a ...)...`
    Attributes = b'A',
    /// `count ($ name default | v name)...`
    Variables = b'V',
    /// `count (l ...)...`
    Lists = b'L',
    /// `length body...`
    Rule = b'R',
}

/// Instructions of definition entries and rule bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    // === Definitions ===
    /// `count name-literal item-literal...`
    AttributeDef = b'a',
    /// `count name-literal item-literal...`
    ListDef = b'l',
    /// Definition entry without a default value.
    ///
    /// `name-literal`
    VariableDef = b'v',
    /// `count category...`
    Pattern = b'P',

    // === Values ===
    /// `length byte...`
    Str = b's',
    /// Pops a name, pushes the variable. In a `V` section it instead
    /// introduces a variable with a default: `name-literal default-literal`
    Var = b'$',
    /// Pops a part name, pushes the clipped field.
    ///
    /// `side position`
    Clip = b'.',
    /// `position`
    Blank = b'_',
    Space = b' ',

    // === Logic ===
    Not = b'!',
    Equal = b'=',
    BeginsWith = b'(',
    EndsWith = b')',
    BeginsWithList = b'[',
    EndsWithList = b']',
    Contains = b'c',
    In = b'n',

    // === Control ===
    /// Pops a condition, skips the given number of bytes when it is false.
    ///
    /// `skip`
    JumpIfNot = b'?',
    /// `skip`
    Jump = b'j',

    // === Case and lemma ===
    CaseOf = b'G',
    CopyCase = b'A',
    PseudoLemma = b'p',

    // === Stack ===
    /// `count`
    And = b'&',
    /// `count`
    Or = b'|',
    /// `count`
    Concat = b'+',
    /// `count`
    Out = b'<',
    /// `count`
    Chunk = b'{',

    // === Assignment ===
    BeginLet = b'>',
    /// Ends a let whose target is a clip, optionally followed by `#`
    SetClip = b'*',
    /// Ends a let whose target is a variable, optionally followed by `#`
    SetVar = b'4',
}

/// Operand layout following an opcode byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    /// One raw byte
    Byte,
    /// Side selector and position
    Clip,
    /// Length byte then that many raw bytes
    Str,
    /// Optional `#` flag
    Flag,
    /// Count byte then that many raw bytes
    Counted,
}

impl Opcode {
    pub fn operands(self) -> Operands {
        use Opcode::*;
        match self {
            Str => Operands::Str,
            Clip => Operands::Clip,
            Blank | JumpIfNot | Jump | And | Or | Concat | Out | Chunk => Operands::Byte,
            Equal | BeginsWith | EndsWith | BeginsWithList | EndsWithList | Contains | In
            | SetClip | SetVar => Operands::Flag,
            Pattern => Operands::Counted,
            _ => Operands::None,
        }
    }

    /// Number of stack values the instruction pops, `None` when it depends
    /// on its count operand
    pub fn pops(self) -> Option<usize> {
        use Opcode::*;
        match self {
            Var | Clip | Not | CaseOf | PseudoLemma | JumpIfNot => Some(1),
            Equal | BeginsWith | EndsWith | BeginsWithList | EndsWithList | Contains | In
            | CopyCase | SetClip | SetVar => Some(2),
            And | Or | Concat | Out | Chunk => None,
            _ => Some(0),
        }
    }

    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            AttributeDef => "def-attr",
            ListDef => "def-list",
            VariableDef => "def-var",
            Pattern => "pattern",
            Str => "string",
            Var => "var",
            Clip => "clip",
            Blank => "blank",
            Space => "space",
            Not => "not",
            Equal => "equal",
            BeginsWith => "begins-with",
            EndsWith => "ends-with",
            BeginsWithList => "begins-with-list",
            EndsWithList => "ends-with-list",
            Contains => "contains",
            In => "in",
            JumpIfNot => "jump-if-not",
            Jump => "jump",
            CaseOf => "case-of",
            CopyCase => "copy-case",
            PseudoLemma => "pseudolemma",
            And => "and",
            Or => "or",
            Concat => "concat",
            Out => "out",
            Chunk => "chunk",
            BeginLet => "begin-let",
            SetClip => "set-clip",
            SetVar => "set-var",
        }
    }

    /// `test` has no opcode of its own; it lowers into a conditional jump
    pub fn for_logic(op: LogicOp) -> Option<Self> {
        let code = match op {
            LogicOp::Not => Opcode::Not,
            LogicOp::Equal => Opcode::Equal,
            LogicOp::BeginsWith => Opcode::BeginsWith,
            LogicOp::EndsWith => Opcode::EndsWith,
            LogicOp::BeginsWithList => Opcode::BeginsWithList,
            LogicOp::EndsWithList => Opcode::EndsWithList,
            LogicOp::Contains => Opcode::Contains,
            LogicOp::In => Opcode::In,
            LogicOp::GetCaseFrom => Opcode::CopyCase,
            LogicOp::Test => return None,
        };
        Some(code)
    }
}

impl From<StackOp> for Opcode {
    fn from(op: StackOp) -> Self {
        match op {
            StackOp::And => Opcode::And,
            StackOp::Or => Opcode::Or,
            StackOp::Concat => Opcode::Concat,
            StackOp::Out => Opcode::Out,
            StackOp::Chunk => Opcode::Chunk,
        }
    }
}

pub fn side_byte(side: Side) -> u8 {
    match side {
        Side::Source => b'S',
        Side::Reference => b'R',
        Side::Target => b'T',
    }
}

pub fn side_from_byte(byte: u8) -> Option<Side> {
    match byte {
        b'S' => Some(Side::Source),
        b'R' => Some(Side::Reference),
        b'T' => Some(Side::Target),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_bytes() {
        assert_eq!(u8::from(Opcode::Out), b'<');
        assert_eq!(Opcode::try_from(b'A').unwrap(), Opcode::CopyCase);
        assert_eq!(SectionTag::try_from(b'A').unwrap(), SectionTag::Attributes);
        assert!(Opcode::try_from(b'Z').is_err());
    }

    #[test]
    fn test_operand_layouts() {
        assert_eq!(Opcode::Clip.operands(), Operands::Clip);
        assert_eq!(Opcode::Equal.operands(), Operands::Flag);
        assert_eq!(Opcode::Not.operands(), Operands::None);
        assert_eq!(Opcode::Concat.pops(), None);
        assert_eq!(Opcode::CopyCase.pops(), Some(2));
    }

    #[test]
    fn test_test_has_no_opcode() {
        assert_eq!(Opcode::for_logic(LogicOp::Test), None);
        assert_eq!(Opcode::for_logic(LogicOp::In), Some(Opcode::In));
    }

    #[test]
    fn test_side_selectors() {
        for side in [Side::Source, Side::Reference, Side::Target] {
            assert_eq!(side_from_byte(side_byte(side)), Some(side));
        }
        assert_eq!(side_from_byte(b'X'), None);
    }
}
