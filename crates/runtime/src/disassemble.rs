//! Bytecode listing.
//!
//! Each instruction prints as `offset line NAME op1 op2 ; comment`, where
//! the comment resolves constant-pool indices to their values. Nested
//! routines are listed after their parent.

use std::io::Write;

use merle_core::code::{Opcode, JUMP_OPERAND_SLOTS};

use crate::function::Routine;

pub fn disassemble(routine: &Routine, name: &str, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        out,
        "========================= {} =========================",
        name
    )?;
    writeln!(
        out,
        "strings: {}, large integers: {}, floats: {}, routines: {}",
        routine.string_pool.len(),
        routine.integer_pool.len(),
        routine.float_pool.len(),
        routine.routine_pool.len()
    )?;
    writeln!(out, "offset    line   instruction    operands   comments")?;

    let mut offset = 0;
    while offset < routine.code.len() {
        offset += disassemble_instruction(routine, offset, out)?;
    }

    for child in &routine.routine_pool {
        writeln!(out)?;
        disassemble(child, &child.name, out)?;
    }
    Ok(())
}

/// Print one instruction, returning the number of slots it occupies.
pub fn disassemble_instruction(
    routine: &Routine,
    offset: usize,
    out: &mut dyn Write,
) -> std::io::Result<usize> {
    let op = match routine.code.opcode_at(offset) {
        Ok(op) => op,
        Err(_) => {
            writeln!(
                out,
                "{:6}   {:5}   <bad opcode {}>",
                offset,
                routine.code.get_line(offset),
                routine.code.fetch(offset)
            )?;
            return Ok(1);
        }
    };
    write!(out, "{:6}   {:5}   ", offset, routine.code.get_line(offset))?;

    let operand = |at: usize| routine.code.fetch(offset + at) as usize;

    match op {
        // No operands.
        Opcode::Add
        | Opcode::Subtract
        | Opcode::Multiply
        | Opcode::Divide
        | Opcode::Power
        | Opcode::Modulus
        | Opcode::Negate
        | Opcode::Not
        | Opcode::Equal
        | Opcode::NotEqual
        | Opcode::Less
        | Opcode::LessEqual
        | Opcode::Greater
        | Opcode::GreaterEqual
        | Opcode::Compare
        | Opcode::Pop
        | Opcode::Precall
        | Opcode::Return
        | Opcode::PushNull
        | Opcode::PushTrue
        | Opcode::PushFalse
        | Opcode::PushNan
        | Opcode::TestIterator
        | Opcode::NextKey
        | Opcode::NextValue
        | Opcode::Throw => {
            writeln!(out, "{}", op.name())?;
            Ok(1)
        }

        // One plain numeric operand.
        Opcode::Assert
        | Opcode::Call
        | Opcode::Concat
        | Opcode::IncrementLocal
        | Opcode::DecrementLocal
        | Opcode::NewFrame
        | Opcode::NewIterator
        | Opcode::NewList
        | Opcode::NewSet
        | Opcode::NewTable
        | Opcode::Print
        | Opcode::PrintLine
        | Opcode::PushBoolean => {
            writeln!(out, "{:<14} {:<5}", op.name(), operand(1))?;
            Ok(2)
        }

        Opcode::PushSmallInt => {
            let value = routine.code.fetch(offset + 1) as i16;
            writeln!(out, "{:<14} {:<5}", op.name(), value)?;
            Ok(2)
        }
        Opcode::PushInteger => {
            let index = operand(1);
            writeln!(
                out,
                "{:<14} {:<5}      ; {}",
                op.name(),
                index,
                routine.get_integer(index)
            )?;
            Ok(2)
        }
        Opcode::PushFloat => {
            let index = operand(1);
            writeln!(
                out,
                "{:<14} {:<5}      ; {}",
                op.name(),
                index,
                routine.get_float(index)
            )?;
            Ok(2)
        }
        Opcode::PushString => {
            let index = operand(1);
            writeln!(
                out,
                "{:<14} {:<5}      ; \"{}\"",
                op.name(),
                index,
                routine.get_string(index)
            )?;
            Ok(2)
        }

        // One operand naming a local.
        Opcode::ClearLocal
        | Opcode::DefineLocal
        | Opcode::SetLocal
        | Opcode::GetLocal
        | Opcode::GetLocalRef
        | Opcode::GetUniqueLocal => {
            let index = operand(1);
            writeln!(
                out,
                "{:<14} {:<5}      ; {}",
                op.name(),
                index,
                routine.get_local_name(index)
            )?;
            Ok(2)
        }

        // One operand naming a string-pool entry (globals, fields).
        Opcode::DefineGlobal
        | Opcode::SetGlobal
        | Opcode::GetGlobal
        | Opcode::GetGlobalRef
        | Opcode::GetUniqueGlobal
        | Opcode::GetField
        | Opcode::SetField => {
            let index = operand(1);
            writeln!(
                out,
                "{:<14} {:<5}      ; {}",
                op.name(),
                index,
                routine.get_string(index)
            )?;
            Ok(2)
        }

        // Upvalue access.
        Opcode::GetUpvalue | Opcode::GetUpvalueRef | Opcode::GetUniqueUpvalue
        | Opcode::SetUpvalue => {
            writeln!(out, "{:<14} {:<5}", op.name(), operand(1))?;
            Ok(2)
        }

        // Index dispatch.
        Opcode::GetIndex | Opcode::GetIndexRef | Opcode::SetIndex => {
            writeln!(out, "{:<14} {:<5}", op.name(), operand(1))?;
            Ok(2)
        }

        // Two operands.
        Opcode::GetLocalArg => {
            let index = operand(1);
            writeln!(
                out,
                "{:<14} {:<5} {:<5}; {}",
                op.name(),
                index,
                operand(2),
                routine.get_local_name(index)
            )?;
            Ok(3)
        }
        Opcode::GetGlobalArg => {
            let index = operand(1);
            writeln!(
                out,
                "{:<14} {:<5} {:<5}; {}",
                op.name(),
                index,
                operand(2),
                routine.get_string(index)
            )?;
            Ok(3)
        }
        Opcode::GetUpvalueArg | Opcode::GetIndexArg | Opcode::NewArray => {
            writeln!(out, "{:<14} {:<5} {:<5}", op.name(), operand(1), operand(2))?;
            Ok(3)
        }
        Opcode::NewClosure => {
            let index = operand(1);
            writeln!(
                out,
                "{:<14} {:<3} {:<5}  ; <{}>",
                op.name(),
                index,
                operand(2),
                routine.routine_pool[index].name
            )?;
            Ok(3)
        }

        // Jumps embed a 32-bit absolute target.
        Opcode::Jump | Opcode::JumpFalse | Opcode::JumpTrue => {
            let target = routine.code.read_i32(offset + 1);
            writeln!(out, "{:<14} {:<5}", op.name(), target)?;
            Ok(1 + JUMP_OPERAND_SLOTS)
        }
    }
}
