//! Bytecode representation.
//!
//! A code chunk is a flat sequence of 16-bit instruction words: an opcode
//! followed by zero, one or two operand slots. Jump targets are absolute
//! 32-bit offsets spread over two adjacent slots, low half first; they are
//! emitted as placeholders and back-patched once the target is known.
//!
//! Source lines are recorded run-length encoded in a parallel table, so an
//! instruction offset can be mapped back to a line for error reports
//! without bloating the stream.

use num_enum::TryFromPrimitive;

use crate::error::{internal_error, Result};

pub type Instruction = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum Opcode {
    Assert,
    Add,
    Call,
    ClearLocal,
    Compare,
    Concat,
    DecrementLocal,
    DefineGlobal,
    DefineLocal,
    Divide,
    Equal,
    GetField,
    GetGlobal,
    GetGlobalArg,
    GetGlobalRef,
    GetIndex,
    GetIndexArg,
    GetIndexRef,
    GetLocal,
    GetLocalArg,
    GetLocalRef,
    GetUniqueGlobal,
    GetUniqueLocal,
    GetUniqueUpvalue,
    GetUpvalue,
    GetUpvalueArg,
    GetUpvalueRef,
    Greater,
    GreaterEqual,
    IncrementLocal,
    Jump,
    JumpFalse,
    JumpTrue,
    Less,
    LessEqual,
    Modulus,
    Multiply,
    Negate,
    NewArray,
    NewClosure,
    NewFrame,
    NewIterator,
    NewList,
    NewSet,
    NewTable,
    NextKey,
    NextValue,
    Not,
    NotEqual,
    Pop,
    Power,
    Precall,
    Print,
    PrintLine,
    PushBoolean,
    PushFalse,
    PushFloat,
    PushInteger,
    PushNan,
    PushNull,
    PushSmallInt,
    PushString,
    PushTrue,
    Return,
    SetField,
    SetGlobal,
    SetIndex,
    SetLocal,
    SetUpvalue,
    Subtract,
    TestIterator,
    Throw,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Assert => "ASSERT",
            Opcode::Add => "ADD",
            Opcode::Call => "CALL",
            Opcode::ClearLocal => "CLEAR_LOCAL",
            Opcode::Compare => "COMPARE",
            Opcode::Concat => "CONCAT",
            Opcode::DecrementLocal => "DEC_LOCAL",
            Opcode::DefineGlobal => "DEFINE_GLOBAL",
            Opcode::DefineLocal => "DEFINE_LOCAL",
            Opcode::Divide => "DIVIDE",
            Opcode::Equal => "EQUAL",
            Opcode::GetField => "GET_FIELD",
            Opcode::GetGlobal => "GET_GLOBAL",
            Opcode::GetGlobalArg => "GET_GLOBAL_ARG",
            Opcode::GetGlobalRef => "GET_GLOBAL_REF",
            Opcode::GetIndex => "GET_INDEX",
            Opcode::GetIndexArg => "GET_INDEX_ARG",
            Opcode::GetIndexRef => "GET_INDEX_REF",
            Opcode::GetLocal => "GET_LOCAL",
            Opcode::GetLocalArg => "GET_LOCAL_ARG",
            Opcode::GetLocalRef => "GET_LOCAL_REF",
            Opcode::GetUniqueGlobal => "GET_UNIQUE_GLOBAL",
            Opcode::GetUniqueLocal => "GET_UNIQUE_LOCAL",
            Opcode::GetUniqueUpvalue => "GET_UNIQUE_UPVALUE",
            Opcode::GetUpvalue => "GET_UPVALUE",
            Opcode::GetUpvalueArg => "GET_UPVALUE_ARG",
            Opcode::GetUpvalueRef => "GET_UPVALUE_REF",
            Opcode::Greater => "GREATER",
            Opcode::GreaterEqual => "GREATER_EQUAL",
            Opcode::IncrementLocal => "INC_LOCAL",
            Opcode::Jump => "JUMP",
            Opcode::JumpFalse => "JUMP_FALSE",
            Opcode::JumpTrue => "JUMP_TRUE",
            Opcode::Less => "LESS",
            Opcode::LessEqual => "LESS_EQUAL",
            Opcode::Modulus => "MODULUS",
            Opcode::Multiply => "MULTIPLY",
            Opcode::Negate => "NEGATE",
            Opcode::NewArray => "NEW_ARRAY",
            Opcode::NewClosure => "NEW_CLOSURE",
            Opcode::NewFrame => "NEW_FRAME",
            Opcode::NewIterator => "NEW_ITER",
            Opcode::NewList => "NEW_LIST",
            Opcode::NewSet => "NEW_SET",
            Opcode::NewTable => "NEW_TABLE",
            Opcode::NextKey => "NEXT_KEY",
            Opcode::NextValue => "NEXT_VALUE",
            Opcode::Not => "NOT",
            Opcode::NotEqual => "NOT_EQUAL",
            Opcode::Pop => "POP",
            Opcode::Power => "POWER",
            Opcode::Precall => "PRECALL",
            Opcode::Print => "PRINT",
            Opcode::PrintLine => "PRINT_LINE",
            Opcode::PushBoolean => "PUSH_BOOLEAN",
            Opcode::PushFalse => "PUSH_FALSE",
            Opcode::PushFloat => "PUSH_FLOAT",
            Opcode::PushInteger => "PUSH_INTEGER",
            Opcode::PushNan => "PUSH_NAN",
            Opcode::PushNull => "PUSH_NULL",
            Opcode::PushSmallInt => "PUSH_SMALL_INT",
            Opcode::PushString => "PUSH_STRING",
            Opcode::PushTrue => "PUSH_TRUE",
            Opcode::Return => "RETURN",
            Opcode::SetField => "SET_FIELD",
            Opcode::SetGlobal => "SET_GLOBAL",
            Opcode::SetIndex => "SET_INDEX",
            Opcode::SetLocal => "SET_LOCAL",
            Opcode::SetUpvalue => "SET_UPVALUE",
            Opcode::Subtract => "SUBTRACT",
            Opcode::TestIterator => "TEST_ITER",
            Opcode::Throw => "THROW",
        }
    }
}

/// Number of instruction slots a 32-bit jump target occupies.
pub const JUMP_OPERAND_SLOTS: usize = 2;

/// A chunk of compiled code with its line table.
#[derive(Default)]
pub struct Code {
    code: Vec<Instruction>,
    /// (line, number of instruction slots emitted for that line).
    lines: Vec<(u16, u16)>,
}

impl Code {
    pub fn new() -> Self {
        Code::default()
    }

    fn add_line(&mut self, line: usize) {
        let line = line.min(u16::MAX as usize) as u16;
        match self.lines.last_mut() {
            Some(entry) if entry.0 == line => entry.1 += 1,
            _ => self.lines.push((line, 1)),
        }
    }

    pub fn emit(&mut self, line: usize, op: Opcode) {
        self.add_line(line);
        self.code.push(op as Instruction);
    }

    pub fn emit_u16(&mut self, line: usize, value: Instruction) {
        self.add_line(line);
        self.code.push(value);
    }

    pub fn emit_op1(&mut self, line: usize, op: Opcode, a: Instruction) {
        self.emit(line, op);
        self.emit_u16(line, a);
    }

    pub fn emit_op2(&mut self, line: usize, op: Opcode, a: Instruction, b: Instruction) {
        self.emit(line, op);
        self.emit_u16(line, a);
        self.emit_u16(line, b);
    }

    /// Emit a jump with the given target (0 = placeholder) and return the
    /// offset of the operand, for back-patching.
    pub fn emit_jump(&mut self, line: usize, op: Opcode, target: i32) -> usize {
        self.emit(line, op);
        let offset = self.len();
        self.emit_u16(line, (target & 0xffff) as u16);
        self.emit_u16(line, ((target >> 16) & 0xffff) as u16);
        offset
    }

    /// Patch the jump operand at `at` to point at the current end of code.
    pub fn backpatch(&mut self, at: usize) {
        let target = self.len() as i32;
        self.backpatch_to(at, target);
    }

    pub fn backpatch_to(&mut self, at: usize, target: i32) {
        self.code[at] = (target & 0xffff) as u16;
        self.code[at + 1] = ((target >> 16) & 0xffff) as u16;
    }

    /// Overwrite a single instruction slot (used to fix a routine's local
    /// count once compilation finishes).
    pub fn patch_instruction(&mut self, at: usize, value: Instruction) {
        self.code[at] = value;
    }

    /// Read the 32-bit integer embedded at `offset`.
    pub fn read_i32(&self, offset: usize) -> i32 {
        let lo = self.code[offset] as u32;
        let hi = self.code[offset + 1] as u32;
        (lo | (hi << 16)) as i32
    }

    pub fn fetch(&self, offset: usize) -> Instruction {
        self.code[offset]
    }

    pub fn opcode_at(&self, offset: usize) -> Result<Opcode> {
        Opcode::try_from(self.code[offset])
            .map_err(|_| internal_error(format!("Invalid opcode: {}", self.code[offset])))
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Map an instruction offset back to its source line.
    pub fn get_line(&self, offset: usize) -> usize {
        let mut count = 0usize;
        for &(line, n) in &self.lines {
            count += n as usize;
            if offset < count {
                return line as usize;
            }
        }
        self.lines.last().map(|&(line, _)| line as usize).unwrap_or(0)
    }

    /// Emit a final Return attributed to the last known line.
    pub fn emit_return(&mut self) {
        let line = self.lines.last().map(|&(line, _)| line as usize).unwrap_or(0);
        self.emit(line, Opcode::Return);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_backpatch_round_trip() {
        let mut code = Code::new();
        code.emit(1, Opcode::PushNull);
        let jmp = code.emit_jump(1, Opcode::JumpFalse, 0);
        code.emit(2, Opcode::PushTrue);
        code.emit(2, Opcode::Pop);
        code.backpatch(jmp);
        assert_eq!(code.read_i32(jmp), code.len() as i32);
    }

    #[test]
    fn test_jump_wide_target() {
        let mut code = Code::new();
        let jmp = code.emit_jump(1, Opcode::Jump, 0);
        code.backpatch_to(jmp, 0x0001_0005);
        assert_eq!(code.read_i32(jmp), 0x0001_0005);
        // Low half first, little-endian in instruction order.
        assert_eq!(code.fetch(jmp), 0x0005);
        assert_eq!(code.fetch(jmp + 1), 0x0001);
    }

    #[test]
    fn test_line_table() {
        let mut code = Code::new();
        code.emit(1, Opcode::PushNull);
        code.emit(1, Opcode::Pop);
        code.emit(3, Opcode::PushTrue);
        code.emit_op1(4, Opcode::Print, 1);
        assert_eq!(code.get_line(0), 1);
        assert_eq!(code.get_line(1), 1);
        assert_eq!(code.get_line(2), 3);
        assert_eq!(code.get_line(4), 4);
    }

    #[test]
    fn test_opcode_decoding() {
        let mut code = Code::new();
        code.emit(1, Opcode::Throw);
        assert_eq!(code.opcode_at(0).unwrap(), Opcode::Throw);
        let mut bad = Code::new();
        bad.emit_u16(1, u16::MAX);
        assert!(bad.opcode_at(0).is_err());
    }
}
