//! Instruction records and the opcode set.
//!
//! Instructions are immutable fixed-width records of four 16-bit operands.
//! Operands are stack offsets relative to the current frame base, except for
//! jump instructions where operand A is a signed instruction offset. Calls
//! with more arguments than fit in one record spill the extra operands into
//! trailing `Nop` instructions.

use crate::error::RuntimeResult;
use crate::vm::ExecContext;

/// A stack offset relative to the frame base.
pub type Operand = u16;

/// Handler signature shared by bytecode handlers and native builtins.
///
/// Returns `Ok(true)` to continue the dispatch loop, `Ok(false)` to leave it
/// (returns, and a `When` whose predicate did not fire). Errors abort the
/// message being processed.
pub type NativeFn = fn(&mut ExecContext<'_>) -> RuntimeResult<bool>;

/// The bytecode operation set.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // Integer arithmetic (wrapping).
    AddI,
    SubI,
    MulI,
    DivI,
    ModI,
    // Float arithmetic.
    AddF,
    SubF,
    MulF,
    DivF,
    // Bitwise on integers.
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitXor,
    BitOr,
    // Strings.
    ConcatS,
    EqualS,
    NotEqualS,
    StringCopy,
    // Stores and subscripts.
    Store,
    StoreArrayElement,
    StoreArrayStringElement,
    ArraySubscript,
    // Integer comparisons.
    GreaterThanI,
    LessThanI,
    EqualI,
    NotEqualI,
    LessEqualI,
    GreaterEqualI,
    // Float comparisons.
    GreaterThanF,
    LessThanF,
    EqualF,
    NotEqualF,
    LessEqualF,
    GreaterEqualF,
    // Boolean logic (operands already evaluated).
    And,
    Or,
    // Loops.
    ForI,
    ForF,
    ForA,
    While,
    // Jumps. Operand A is a signed instruction offset.
    Jump,
    JumpIf,
    JumpGT,
    JumpLT,
    JumpEQ,
    JumpNEQ,
    JumpLEQ,
    JumpGEQ,
    // Temporal control flow.
    WhenRegister,
    WheneverRegister,
    When,
    Whenever,
    // Calls.
    FunctionCall,
    ProcessMessage,
    SpawnProcess,
    // Returns.
    Return,
    ReturnValue,
    // Operand overflow carrier for wide calls; executes as a no-op.
    Nop,
}

impl Opcode {
    /// Number of opcodes, for dispatch table sizing.
    pub const COUNT: usize = Opcode::Nop as usize + 1;

    /// The opcode's mnemonic.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::AddI => "AddI",
            Opcode::SubI => "SubI",
            Opcode::MulI => "MulI",
            Opcode::DivI => "DivI",
            Opcode::ModI => "ModI",
            Opcode::AddF => "AddF",
            Opcode::SubF => "SubF",
            Opcode::MulF => "MulF",
            Opcode::DivF => "DivF",
            Opcode::ShiftLeft => "ShiftLeft",
            Opcode::ShiftRight => "ShiftRight",
            Opcode::BitAnd => "BitAnd",
            Opcode::BitXor => "BitXor",
            Opcode::BitOr => "BitOr",
            Opcode::ConcatS => "ConcatS",
            Opcode::EqualS => "EqualS",
            Opcode::NotEqualS => "NotEqualS",
            Opcode::StringCopy => "StringCopy",
            Opcode::Store => "Store",
            Opcode::StoreArrayElement => "StoreArrayElement",
            Opcode::StoreArrayStringElement => "StoreArrayStringElement",
            Opcode::ArraySubscript => "ArraySubscript",
            Opcode::GreaterThanI => "GreaterThanI",
            Opcode::LessThanI => "LessThanI",
            Opcode::EqualI => "EqualI",
            Opcode::NotEqualI => "NotEqualI",
            Opcode::LessEqualI => "LessEqualI",
            Opcode::GreaterEqualI => "GreaterEqualI",
            Opcode::GreaterThanF => "GreaterThanF",
            Opcode::LessThanF => "LessThanF",
            Opcode::EqualF => "EqualF",
            Opcode::NotEqualF => "NotEqualF",
            Opcode::LessEqualF => "LessEqualF",
            Opcode::GreaterEqualF => "GreaterEqualF",
            Opcode::And => "And",
            Opcode::Or => "Or",
            Opcode::ForI => "ForI",
            Opcode::ForF => "ForF",
            Opcode::ForA => "ForA",
            Opcode::While => "While",
            Opcode::Jump => "Jump",
            Opcode::JumpIf => "JumpIf",
            Opcode::JumpGT => "JumpGT",
            Opcode::JumpLT => "JumpLT",
            Opcode::JumpEQ => "JumpEQ",
            Opcode::JumpNEQ => "JumpNEQ",
            Opcode::JumpLEQ => "JumpLEQ",
            Opcode::JumpGEQ => "JumpGEQ",
            Opcode::WhenRegister => "WhenRegister",
            Opcode::WheneverRegister => "WheneverRegister",
            Opcode::When => "When",
            Opcode::Whenever => "Whenever",
            Opcode::FunctionCall => "FunctionCall",
            Opcode::ProcessMessage => "ProcessMessage",
            Opcode::SpawnProcess => "SpawnProcess",
            Opcode::Return => "Return",
            Opcode::ReturnValue => "ReturnValue",
            Opcode::Nop => "Nop",
        }
    }
}

/// An instruction's operation: either a table-dispatched opcode or a native
/// builtin invoked under the c-call contract.
#[derive(Debug, Clone, Copy)]
pub enum Op {
    /// A bytecode operation.
    Code(Opcode),
    /// A native builtin.
    Native(NativeFn),
}

/// A single fixed-width instruction.
#[derive(Debug, Clone, Copy)]
pub struct Instruction {
    /// The operation to perform.
    pub op: Op,
    /// First operand.
    pub a: Operand,
    /// Second operand.
    pub b: Operand,
    /// Third operand.
    pub c: Operand,
    /// Fourth operand.
    pub d: Operand,
    /// Source line, 0 when unknown.
    pub line: u32,
}

impl Instruction {
    /// Builds a bytecode instruction.
    pub fn new(opcode: Opcode, a: Operand, b: Operand, c: Operand, d: Operand) -> Self {
        Self {
            op: Op::Code(opcode),
            a,
            b,
            c,
            d,
            line: 0,
        }
    }

    /// Builds a native-builtin instruction.
    pub fn native(handler: NativeFn, a: Operand, b: Operand, c: Operand, d: Operand) -> Self {
        Self {
            op: Op::Native(handler),
            a,
            b,
            c,
            d,
            line: 0,
        }
    }

    /// Attaches a source line.
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    /// True for operand-carrier `Nop`s.
    pub fn is_nop(&self) -> bool {
        matches!(self.op, Op::Code(Opcode::Nop))
    }

    /// Operand A reinterpreted as a signed jump offset.
    pub fn jump_offset(&self) -> isize {
        self.a as i16 as isize
    }
}
