//! Instruction set: opcodes, operand widths, encoding and disassembly.

use std::fmt::Write;

/// A flat byte stream of encoded instructions.
pub type Instructions = Vec<u8>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("unknown opcode: {op}")]
    UnknownOpcode { op: u8 },
    #[error("{name} takes {expected} operand(s), got {got}")]
    OperandCount { name: &'static str, expected: usize, got: usize },
    #[error("operand {operand} does not fit in {width} byte(s) of {name}")]
    OperandTooWide { name: &'static str, operand: usize, width: usize },
    #[error("instruction at offset {offset} is truncated")]
    Truncated { offset: usize },
}

// ---- Opcodes ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Constant,
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    True,
    False,
    Null,
    Equal,
    NotEqual,
    GreaterThan,
    And,
    Or,
    Minus,
    Bang,
    Increment,
    Decrement,
    Jump,
    JumpNotTruthy,
    GetGlobal,
    SetGlobal,
    AssignGlobal,
    GetLocal,
    SetLocal,
    AssignLocal,
    GetFree,
    AssignFree,
    GetBuiltin,
    Array,
    Hash,
    Index,
    SetIndex,
    Call,
    ReturnValue,
    Return,
    Closure,
    CurrentClosure,
}

/// Operand of `OpIncrement`/`OpDecrement`.
pub const STEP_PREFIX: usize = 0;
pub const STEP_POSTFIX: usize = 1;

pub struct Definition {
    pub name: &'static str,
    pub operand_widths: &'static [usize],
}

impl Opcode {
    /// Every opcode, indexed by its byte value.
    pub const ALL: [Opcode; 38] = [
        Opcode::Constant,
        Opcode::Pop,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::True,
        Opcode::False,
        Opcode::Null,
        Opcode::Equal,
        Opcode::NotEqual,
        Opcode::GreaterThan,
        Opcode::And,
        Opcode::Or,
        Opcode::Minus,
        Opcode::Bang,
        Opcode::Increment,
        Opcode::Decrement,
        Opcode::Jump,
        Opcode::JumpNotTruthy,
        Opcode::GetGlobal,
        Opcode::SetGlobal,
        Opcode::AssignGlobal,
        Opcode::GetLocal,
        Opcode::SetLocal,
        Opcode::AssignLocal,
        Opcode::GetFree,
        Opcode::AssignFree,
        Opcode::GetBuiltin,
        Opcode::Array,
        Opcode::Hash,
        Opcode::Index,
        Opcode::SetIndex,
        Opcode::Call,
        Opcode::ReturnValue,
        Opcode::Return,
        Opcode::Closure,
        Opcode::CurrentClosure,
    ];

    pub fn definition(self) -> Definition {
        let (name, operand_widths): (&'static str, &'static [usize]) = match self {
            Opcode::Constant => ("OpConstant", &[2]),
            Opcode::Pop => ("OpPop", &[]),
            Opcode::Add => ("OpAdd", &[]),
            Opcode::Sub => ("OpSub", &[]),
            Opcode::Mul => ("OpMul", &[]),
            Opcode::Div => ("OpDiv", &[]),
            Opcode::True => ("OpTrue", &[]),
            Opcode::False => ("OpFalse", &[]),
            Opcode::Null => ("OpNull", &[]),
            Opcode::Equal => ("OpEqual", &[]),
            Opcode::NotEqual => ("OpNotEqual", &[]),
            Opcode::GreaterThan => ("OpGreaterThan", &[]),
            Opcode::And => ("OpAnd", &[]),
            Opcode::Or => ("OpOr", &[]),
            Opcode::Minus => ("OpMinus", &[]),
            Opcode::Bang => ("OpBang", &[]),
            Opcode::Increment => ("OpIncrement", &[1]),
            Opcode::Decrement => ("OpDecrement", &[1]),
            Opcode::Jump => ("OpJump", &[2]),
            Opcode::JumpNotTruthy => ("OpJumpNotTruthy", &[2]),
            Opcode::GetGlobal => ("OpGetGlobal", &[2]),
            Opcode::SetGlobal => ("OpSetGlobal", &[2]),
            Opcode::AssignGlobal => ("OpAssignGlobal", &[2]),
            Opcode::GetLocal => ("OpGetLocal", &[1]),
            Opcode::SetLocal => ("OpSetLocal", &[1]),
            Opcode::AssignLocal => ("OpAssignLocal", &[1]),
            Opcode::GetFree => ("OpGetFree", &[1]),
            Opcode::AssignFree => ("OpAssignFree", &[1]),
            Opcode::GetBuiltin => ("OpGetBuiltin", &[1]),
            Opcode::Array => ("OpArray", &[2]),
            Opcode::Hash => ("OpHash", &[2]),
            Opcode::Index => ("OpIndex", &[]),
            Opcode::SetIndex => ("OpSetIndex", &[]),
            Opcode::Call => ("OpCall", &[1]),
            Opcode::ReturnValue => ("OpReturnValue", &[]),
            Opcode::Return => ("OpReturn", &[]),
            Opcode::Closure => ("OpClosure", &[2, 1]),
            Opcode::CurrentClosure => ("OpCurrentClosure", &[]),
        };
        Definition { name, operand_widths }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = CodeError;

    fn try_from(op: u8) -> Result<Self, CodeError> {
        Opcode::ALL.get(op as usize).copied().ok_or(CodeError::UnknownOpcode { op })
    }
}

// ---- Encoding ----

/// Encode one instruction: the opcode byte followed by big-endian operands.
pub fn make(op: Opcode, operands: &[usize]) -> Result<Instructions, CodeError> {
    let def = op.definition();
    if operands.len() != def.operand_widths.len() {
        return Err(CodeError::OperandCount {
            name: def.name,
            expected: def.operand_widths.len(),
            got: operands.len(),
        });
    }

    let mut bytes = Vec::with_capacity(1 + def.operand_widths.iter().sum::<usize>());
    bytes.push(op as u8);
    for (&operand, &width) in operands.iter().zip(def.operand_widths) {
        let too_wide = CodeError::OperandTooWide { name: def.name, operand, width };
        match width {
            2 => bytes.extend_from_slice(&u16::try_from(operand).map_err(|_| too_wide)?.to_be_bytes()),
            1 => bytes.push(u8::try_from(operand).map_err(|_| too_wide)?),
            _ => return Err(too_wide),
        }
    }
    Ok(bytes)
}

/// Decode the operands that follow an opcode. Returns the values and the
/// number of bytes consumed.
pub fn read_operands(def: &Definition, bytes: &[u8]) -> Result<(Vec<usize>, usize), CodeError> {
    let mut operands = Vec::with_capacity(def.operand_widths.len());
    let mut offset = 0;
    for &width in def.operand_widths {
        let field = bytes
            .get(offset..offset + width)
            .ok_or(CodeError::Truncated { offset })?;
        operands.push(match width {
            2 => read_u16(field, 0) as usize,
            _ => field[0] as usize,
        });
        offset += width;
    }
    Ok((operands, offset))
}

#[inline(always)]
pub fn read_u16(ins: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([ins[at], ins[at + 1]])
}

#[inline(always)]
pub fn read_u8(ins: &[u8], at: usize) -> u8 {
    ins[at]
}

// ---- Disassembly ----

/// One line per instruction: `<offset:04> <name> <operands...>`.
/// Decoding stops at the first malformed instruction, which is reported inline.
pub fn disassemble(ins: &[u8]) -> String {
    let mut out = String::new();
    let mut offset = 0;
    while offset < ins.len() {
        let op = match Opcode::try_from(ins[offset]) {
            Ok(op) => op,
            Err(e) => {
                let _ = writeln!(out, "ERROR: {}", e);
                break;
            }
        };
        let def = op.definition();
        match read_operands(&def, &ins[offset + 1..]) {
            Ok((operands, read)) => {
                let _ = write!(out, "{:04} {}", offset, def.name);
                for operand in &operands {
                    let _ = write!(out, " {}", operand);
                }
                out.push('\n');
                offset += 1 + read;
            }
            Err(e) => {
                let _ = writeln!(out, "ERROR: {} at {:04}", e, offset);
                break;
            }
        }
    }
    out
}
