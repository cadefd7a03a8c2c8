//! Structural checks on compiled bytecode: jump targets, local indices,
//! the small-integer fast path, and the disassembly listing.

use merle_core::code::{Opcode, JUMP_OPERAND_SLOTS};
use merle_compiler::compile_source;
use merle_runtime::{disassemble, Routine};

/// Walk a routine's code and apply `check` to every decoded instruction.
fn walk(routine: &Routine, check: &mut dyn FnMut(&Routine, Opcode, usize)) {
    let mut offset = 0;
    while offset < routine.code.len() {
        let op = routine.code.opcode_at(offset).expect("undecodable opcode");
        check(routine, op, offset);
        offset += 1 + operand_slots(op);
    }
    for child in &routine.routine_pool {
        walk(child, check);
    }
}

fn operand_slots(op: Opcode) -> usize {
    match op {
        Opcode::Jump | Opcode::JumpFalse | Opcode::JumpTrue => JUMP_OPERAND_SLOTS,
        Opcode::GetLocalArg
        | Opcode::GetGlobalArg
        | Opcode::GetUpvalueArg
        | Opcode::GetIndexArg
        | Opcode::NewArray
        | Opcode::NewClosure => 2,
        Opcode::Assert
        | Opcode::Call
        | Opcode::ClearLocal
        | Opcode::Concat
        | Opcode::DecrementLocal
        | Opcode::DefineGlobal
        | Opcode::DefineLocal
        | Opcode::GetField
        | Opcode::GetGlobal
        | Opcode::GetGlobalRef
        | Opcode::GetIndex
        | Opcode::GetIndexRef
        | Opcode::GetLocal
        | Opcode::GetLocalRef
        | Opcode::GetUniqueGlobal
        | Opcode::GetUniqueLocal
        | Opcode::GetUniqueUpvalue
        | Opcode::GetUpvalue
        | Opcode::GetUpvalueRef
        | Opcode::IncrementLocal
        | Opcode::NewFrame
        | Opcode::NewIterator
        | Opcode::NewList
        | Opcode::NewSet
        | Opcode::NewTable
        | Opcode::Print
        | Opcode::PrintLine
        | Opcode::PushBoolean
        | Opcode::PushFloat
        | Opcode::PushInteger
        | Opcode::PushSmallInt
        | Opcode::PushString
        | Opcode::SetField
        | Opcode::SetGlobal
        | Opcode::SetIndex
        | Opcode::SetLocal
        | Opcode::SetUpvalue => 1,
        _ => 0,
    }
}

const SAMPLE: &str = "var total = 0\n\
    function weigh(items as List, bias as Integer)\n\
    \tlocal sum = bias\n\
    \tforeach i, v in items do\n\
    \t\tif v > 0 then\n\
    \t\t\tsum = sum + v\n\
    \t\telse\n\
    \t\t\tcontinue\n\
    \t\tend\n\
    \tend\n\
    \treturn sum\n\
    end\n\
    for k = 1 to 3 do\n\
    \ttotal = total + weigh([k, -k, k * 2], 0)\n\
    end\n\
    while total > 100 do\n\
    \tbreak\n\
    end\n";

#[test]
fn test_jump_targets_stay_in_range() {
    let routine = compile_source(SAMPLE).unwrap();
    walk(&routine, &mut |routine, op, offset| {
        if matches!(op, Opcode::Jump | Opcode::JumpFalse | Opcode::JumpTrue) {
            let target = routine.code.read_i32(offset + 1);
            assert!(
                target >= 0 && (target as usize) <= routine.code.len(),
                "jump at {} targets {} outside [0, {}]",
                offset,
                target,
                routine.code.len()
            );
        }
    });
}

#[test]
fn test_local_indices_stay_below_frame_size() {
    let routine = compile_source(SAMPLE).unwrap();
    walk(&routine, &mut |routine, op, offset| {
        if matches!(
            op,
            Opcode::GetLocal
                | Opcode::GetLocalArg
                | Opcode::GetLocalRef
                | Opcode::GetUniqueLocal
                | Opcode::SetLocal
                | Opcode::ClearLocal
                | Opcode::DefineLocal
                | Opcode::IncrementLocal
                | Opcode::DecrementLocal
        ) {
            let index = routine.code.fetch(offset + 1) as usize;
            assert!(
                index < routine.local_count(),
                "local index {} out of range at offset {}",
                index,
                offset
            );
        }
        if op == Opcode::NewFrame {
            let nlocal = routine.code.fetch(offset + 1) as usize;
            assert_eq!(nlocal, routine.local_count());
        }
    });
}

#[test]
fn test_small_int_fast_path_boundaries() {
    let find = |source: &str, wanted: Opcode| -> bool {
        let routine = compile_source(source).unwrap();
        let mut found = false;
        walk(&routine, &mut |_, op, _| found |= op == wanted);
        found
    };
    assert!(find("var x = 32767\n", Opcode::PushSmallInt));
    assert!(find("var x = -32768\n", Opcode::PushSmallInt));
    assert!(find("var x = 32768\n", Opcode::PushInteger));
    assert!(find("var x = -32769\n", Opcode::PushInteger));
    assert!(!find("var x = 32768\n", Opcode::PushSmallInt));
}

#[test]
fn test_constant_pools_are_deduplicated() {
    let routine = compile_source("var a = 100000\nvar b = 100000\nvar c = \"s\"\nvar d = \"s\"\n")
        .unwrap();
    assert_eq!(routine.integer_pool.len(), 1);
    // Three distinct strings: the shared literal plus the global names are
    // in the same pool... the names a-d are four more entries.
    assert_eq!(
        routine
            .string_pool
            .iter()
            .filter(|s| &***s == "s")
            .count(),
        1
    );
}

#[test]
fn test_concat_is_flattened() {
    let routine = compile_source("print \"a\" & 1 & 2 & 3\n").unwrap();
    let mut concats = Vec::new();
    walk(&routine, &mut |routine, op, offset| {
        if op == Opcode::Concat {
            concats.push(routine.code.fetch(offset + 1));
        }
    });
    assert_eq!(concats, vec![4]);
}

#[test]
fn test_disassembly_lists_nested_routines() {
    let routine = compile_source(
        "function add(a as Integer, b as Integer)\n\
         \treturn a + b\n\
         end\n\
         print add(1, 2)\n",
    )
    .unwrap();
    let mut out = Vec::new();
    disassemble(&routine, "sample", &mut out).unwrap();
    let listing = String::from_utf8(out).unwrap();
    assert!(listing.contains("========================= sample ========================="));
    assert!(listing.contains("========================= add ========================="));
    assert!(listing.contains("NEW_CLOSURE"));
    assert!(listing.contains("PRECALL"));
    assert!(listing.contains("RETURN"));
    // Comments resolve pool entries.
    assert!(listing.contains("; <add>"));
    assert!(listing.contains("; add"), "global name comment missing");
}

#[test]
fn test_loop_lowering_uses_counter_specialisation() {
    let up = compile_source("for i = 1 to 3 do\npass\nend\n").unwrap();
    let mut ops = Vec::new();
    walk(&up, &mut |_, op, _| ops.push(op));
    assert!(ops.contains(&Opcode::IncrementLocal));
    assert!(!ops.contains(&Opcode::Add));

    let down = compile_source("for i = 3 downto 1 do\npass\nend\n").unwrap();
    let mut ops = Vec::new();
    walk(&down, &mut |_, op, _| ops.push(op));
    assert!(ops.contains(&Opcode::DecrementLocal));

    let stepped = compile_source("for i = 1 to 9 step 2 do\npass\nend\n").unwrap();
    let mut ops = Vec::new();
    walk(&stepped, &mut |_, op, _| ops.push(op));
    assert!(ops.contains(&Opcode::Add));
    assert!(!ops.contains(&Opcode::IncrementLocal));
}

#[test]
fn test_foreach_lowering_uses_iterator_protocol() {
    let routine = compile_source("foreach k, v in [1, 2] do\npass\nend\n").unwrap();
    let mut ops = Vec::new();
    walk(&routine, &mut |_, op, _| ops.push(op));
    assert!(ops.contains(&Opcode::NewIterator));
    assert!(ops.contains(&Opcode::TestIterator));
    assert!(ops.contains(&Opcode::NextKey));
    assert!(ops.contains(&Opcode::NextValue));
}

#[test]
fn test_line_numbers_survive_lowering() {
    let routine = compile_source("var a = 1\n\nvar b = 2\nthrow \"x\"\n").unwrap();
    // The Throw opcode is attributed to line 4.
    let mut throw_line = None;
    walk(&routine, &mut |routine, op, offset| {
        if op == Opcode::Throw {
            throw_line = Some(routine.code.get_line(offset));
        }
    });
    assert_eq!(throw_line, Some(4));
}
