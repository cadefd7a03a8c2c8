//! The fetch/decode/execute loop.
//!
//! The interpreter is single-threaded and runs each opcode to completion.
//! User-level calls recurse: `Call` on a compiled closure pushes a call
//! frame and enters a nested dispatch loop; `Return` pops the frame and
//! unwinds the recursion. Errors carry the source line of the instruction
//! that raised them and propagate with `?` through the native frames.

use std::rc::Rc;

use merle_core::array::Array;
use merle_core::class::Class;
use merle_core::code::Opcode;
use merle_core::error::{
    internal_error, math_error, name_error, runtime_error, type_error, Result, RuntimeError,
};
use merle_core::file::File;
use merle_core::iterator::Iter;
use merle_core::list::List;
use merle_core::object::Handle;
use merle_core::regexp::Regex;
use merle_core::set::Set;
use merle_core::string::Str;
use merle_core::table::Table;
use merle_core::value::Value;

use crate::function::{Callable, Closure, Function, Routine};
use crate::runtime::{CallFrame, Runtime};

/// Result of one instruction: keep going or unwind the current frame.
enum Flow {
    Continue,
    Return(Value),
}

/// Assign into a storage slot, writing through alias cells so every name
/// sharing the cell observes the new value. Assigning a generic function
/// over an existing one merges the overload sets instead of replacing the
/// binding; that is how several `function f(...)` definitions accumulate.
pub(crate) fn assign(dest: &mut Value, src: Value) -> Result<()> {
    if let Value::Alias(cell) = dest {
        let cell = cell.clone();
        let mut inner = cell.borrow_mut();
        return assign(&mut inner, src);
    }
    if dest.is::<Function>() && src.is::<Function>() {
        let target = dest.handle::<Function>()?;
        let incoming = src.handle::<Function>()?;
        if !target.ptr_eq(&incoming) {
            target.merge_from(&incoming)?;
        }
        return Ok(());
    }
    *dest = src;
    Ok(())
}

impl Runtime {
    /// Execute a compiled closure with no arguments and return its value.
    pub fn interpret(&mut self, closure: &Handle<Closure>) -> Result<Value> {
        let base_frames = self.frames.len();
        let base_stack = self.stack.len();
        let result = self.call_user(closure.clone(), 0, false);
        if result.is_err() {
            // Drain whatever the failed activation left behind so the
            // runtime stays usable (and droppable) after an error.
            self.frames.truncate(base_frames);
            self.stack.truncate(base_stack);
            self.current_routine = None;
            self.current_closure = None;
            self.ip = 0;
            self.needs_ref = false;
            self.precall_flags.clear();
        }
        result
    }

    /// Call a closure whose arguments were materialised outside the
    /// operand stack. Index/field dispatch uses this, and so can
    /// embedders.
    pub fn call_values(
        &mut self,
        closure: &Handle<Closure>,
        args: &mut Vec<Value>,
    ) -> Result<Value> {
        match &closure.callable {
            Callable::Native(native) => (native.callback)(self, args),
            Callable::User(_) => {
                let argc = args.len();
                for arg in args.drain(..) {
                    self.stack.push(arg);
                }
                self.call_user(closure.clone(), argc, false)
            }
        }
    }

    /// Push a frame over the top `argc` stack values and run the closure's
    /// code until it returns.
    fn call_user(&mut self, closure: Handle<Closure>, argc: usize, pops_callee: bool) -> Result<Value> {
        let routine = match &closure.callable {
            Callable::User(routine) => routine.clone(),
            Callable::Native(_) => {
                return Err(internal_error("call_user invoked on a native routine"))
            }
        };
        self.frames.push(CallFrame {
            return_ip: self.ip,
            previous_routine: self.current_routine.take(),
            previous_closure: self.current_closure.take(),
            locals: self.stack.len() - argc,
            nlocal: 0,
            ref_flags: 0,
            pops_callee,
        });
        self.current_routine = Some(routine.clone());
        self.current_closure = Some(closure);
        self.ip = 0;
        self.run(&routine)
    }

    fn run(&mut self, routine: &Rc<Routine>) -> Result<Value> {
        loop {
            let op_offset = self.ip;
            let op = routine.code.opcode_at(op_offset)?;
            self.ip += 1;
            match self.step(routine, op) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(value)) => return Ok(value),
                Err(e) => return Err(e.with_line(routine.code.get_line(op_offset))),
            }
        }
    }

    //-- stack primitives ---------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| internal_error("Stack underflow"))
    }

    fn popn(&mut self, n: usize) -> Result<()> {
        if self.stack.len() < n {
            return Err(internal_error("Stack underflow"));
        }
        let keep = self.stack.len() - n;
        self.stack.truncate(keep);
        Ok(())
    }

    /// Value `n` slots below the top (1 = top).
    fn peek(&self, n: usize) -> &Value {
        &self.stack[self.stack.len() - n]
    }

    fn fetch(&mut self, routine: &Routine) -> usize {
        let value = routine.code.fetch(self.ip);
        self.ip += 1;
        value as usize
    }

    fn fetch_jump(&mut self, routine: &Routine) -> usize {
        let addr = routine.code.read_i32(self.ip);
        self.ip += merle_core::code::JUMP_OPERAND_SLOTS;
        addr as usize
    }

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no active call frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active call frame")
    }

    fn locals_base(&self) -> usize {
        self.frame().locals
    }

    //-- dispatch -----------------------------------------------------------

    fn step(&mut self, routine: &Rc<Routine>, op: Opcode) -> Result<Flow> {
        match op {
            Opcode::Add => self.math_op('+')?,
            Opcode::Subtract => self.math_op('-')?,
            Opcode::Multiply => self.math_op('*')?,
            Opcode::Divide => self.math_op('/')?,
            Opcode::Power => self.math_op('^')?,
            Opcode::Modulus => self.math_op('%')?,
            Opcode::Negate => self.negate()?,

            Opcode::Not => {
                let value = self.pop()?.to_boolean();
                self.push(Value::Boolean(!value));
            }

            Opcode::Equal => {
                let result = self.peek(2).equal(self.peek(1))?;
                self.popn(2)?;
                self.push(Value::Boolean(result));
            }
            Opcode::NotEqual => {
                let result = self.peek(2).equal(self.peek(1))?;
                self.popn(2)?;
                self.push(Value::Boolean(!result));
            }
            Opcode::Less => {
                let ord = self.peek(2).compare(self.peek(1))?;
                self.popn(2)?;
                self.push(Value::Boolean(ord.is_lt()));
            }
            Opcode::LessEqual => {
                let ord = self.peek(2).compare(self.peek(1))?;
                self.popn(2)?;
                self.push(Value::Boolean(ord.is_le()));
            }
            Opcode::Greater => {
                let ord = self.peek(2).compare(self.peek(1))?;
                self.popn(2)?;
                self.push(Value::Boolean(ord.is_gt()));
            }
            Opcode::GreaterEqual => {
                let ord = self.peek(2).compare(self.peek(1))?;
                self.popn(2)?;
                self.push(Value::Boolean(ord.is_ge()));
            }
            Opcode::Compare => {
                let ord = self.peek(2).compare(self.peek(1))?;
                self.popn(2)?;
                self.push(Value::Integer(match ord {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                }));
            }

            Opcode::Concat => {
                let narg = self.fetch(routine);
                let mut s = String::new();
                for i in (1..=narg).rev() {
                    s.push_str(&self.peek(i).to_display(false)?);
                }
                self.popn(narg)?;
                self.push(Value::String(Str::from(s)));
            }

            Opcode::Pop => {
                self.pop()?;
            }

            //-- constants --------------------------------------------------
            Opcode::PushNull => self.push(Value::Null),
            Opcode::PushTrue => self.push(Value::Boolean(true)),
            Opcode::PushFalse => self.push(Value::Boolean(false)),
            Opcode::PushBoolean => {
                let b = self.fetch(routine) != 0;
                self.push(Value::Boolean(b));
            }
            Opcode::PushNan => self.push(Value::Float(f64::NAN)),
            Opcode::PushSmallInt => {
                let raw = self.fetch(routine) as u16;
                self.push(Value::Integer(raw as i16 as i64));
            }
            Opcode::PushInteger => {
                let index = self.fetch(routine);
                self.push(Value::Integer(routine.get_integer(index)));
            }
            Opcode::PushFloat => {
                let index = self.fetch(routine);
                self.push(Value::Float(routine.get_float(index)));
            }
            Opcode::PushString => {
                let index = self.fetch(routine);
                self.push(Value::String(Str::from(routine.get_string(index))));
            }

            //-- locals -----------------------------------------------------
            Opcode::NewFrame => {
                let nlocal = self.fetch(routine);
                let base = self.locals_base();
                self.frame_mut().nlocal = nlocal;
                while self.stack.len() < base + nlocal {
                    self.push(Value::Null);
                }
            }
            Opcode::DefineLocal => {
                let index = self.fetch(routine);
                let value = self.pop()?;
                let base = self.locals_base();
                self.stack[base + index] = value;
            }
            Opcode::SetLocal => {
                let index = self.fetch(routine);
                let value = self.pop()?;
                let base = self.locals_base();
                assign(&mut self.stack[base + index], value)?;
            }
            Opcode::ClearLocal => {
                let index = self.fetch(routine);
                let base = self.locals_base();
                self.stack[base + index] = Value::Null;
            }
            Opcode::GetLocal => {
                let index = self.fetch(routine);
                let base = self.locals_base();
                self.push(self.stack[base + index].resolve());
            }
            Opcode::GetLocalArg => {
                let index = self.fetch(routine);
                let bit = self.fetch(routine);
                let by_ref = self.frame().ref_flags & (1 << bit) != 0;
                let base = self.locals_base();
                let value = if by_ref {
                    self.stack[base + index].make_alias()
                } else {
                    self.stack[base + index].resolve()
                };
                self.push(value);
            }
            Opcode::GetLocalRef => {
                let index = self.fetch(routine);
                let base = self.locals_base();
                let alias = self.stack[base + index].make_alias();
                self.push(alias);
            }
            Opcode::GetUniqueLocal => {
                let index = self.fetch(routine);
                let base = self.locals_base();
                let value = self.stack[base + index].unshare();
                self.push(value);
            }
            Opcode::IncrementLocal => {
                let index = self.fetch(routine);
                let base = self.locals_base();
                match &mut self.stack[base + index] {
                    Value::Integer(n) => {
                        *n = n
                            .checked_add(1)
                            .ok_or_else(|| math_error("Integer overflow"))?;
                    }
                    other => {
                        return Err(type_error(format!(
                            "Loop counter must be an Integer, not a {}",
                            other.class_name()
                        )))
                    }
                }
            }
            Opcode::DecrementLocal => {
                let index = self.fetch(routine);
                let base = self.locals_base();
                match &mut self.stack[base + index] {
                    Value::Integer(n) => {
                        *n = n
                            .checked_sub(1)
                            .ok_or_else(|| math_error("Integer overflow"))?;
                    }
                    other => {
                        return Err(type_error(format!(
                            "Loop counter must be an Integer, not a {}",
                            other.class_name()
                        )))
                    }
                }
            }

            //-- globals ----------------------------------------------------
            Opcode::DefineGlobal => {
                let index = self.fetch(routine);
                let name = routine.get_string(index);
                let globals = self.globals();
                if globals.contains(&name) {
                    return Err(name_error(format!(
                        "Global variable \"{}\" is already defined",
                        name
                    )));
                }
                let value = self.pop()?;
                globals.insert(name, value);
            }
            Opcode::SetGlobal => {
                let index = self.fetch(routine);
                let name = routine.get_string(index);
                let value = self.pop()?;
                let globals = self.globals();
                let mut members = globals.members_mut();
                match members.entry(name.clone()) {
                    std::collections::hash_map::Entry::Occupied(mut entry) => {
                        assign(entry.get_mut(), value)?;
                    }
                    std::collections::hash_map::Entry::Vacant(entry) => {
                        // First write to an undefined global hoists a
                        // function definition; anything else is an error.
                        if value.is::<Function>() {
                            entry.insert(value);
                        } else {
                            return Err(name_error(format!(
                                "Undefined variable \"{}\"",
                                name
                            )));
                        }
                    }
                }
            }
            Opcode::GetGlobal => {
                let index = self.fetch(routine);
                let name = routine.get_string(index);
                let value = self
                    .globals()
                    .get(&name)
                    .ok_or_else(|| name_error(format!("Undefined variable \"{}\"", name)))?;
                self.push(value.resolve());
            }
            Opcode::GetGlobalArg => {
                let index = self.fetch(routine);
                let bit = self.fetch(routine);
                let name = routine.get_string(index);
                let by_ref = self.frame().ref_flags & (1 << bit) != 0;
                let globals = self.globals();
                let mut members = globals.members_mut();
                let slot = members
                    .get_mut(&*name)
                    .ok_or_else(|| name_error(format!("Undefined variable \"{}\"", name)))?;
                let value = if by_ref {
                    slot.unshare();
                    slot.make_alias()
                } else {
                    slot.resolve()
                };
                drop(members);
                self.push(value);
            }
            Opcode::GetGlobalRef => {
                let index = self.fetch(routine);
                let name = routine.get_string(index);
                let globals = self.globals();
                let mut members = globals.members_mut();
                let slot = members
                    .get_mut(&*name)
                    .ok_or_else(|| name_error(format!("Undefined variable \"{}\"", name)))?;
                slot.unshare();
                let alias = slot.make_alias();
                drop(members);
                self.push(alias);
            }
            Opcode::GetUniqueGlobal => {
                let index = self.fetch(routine);
                let name = routine.get_string(index);
                let globals = self.globals();
                let mut members = globals.members_mut();
                let slot = members
                    .get_mut(&*name)
                    .ok_or_else(|| name_error(format!("Undefined variable \"{}\"", name)))?;
                let value = slot.unshare();
                drop(members);
                self.push(value);
            }

            //-- upvalues ---------------------------------------------------
            Opcode::GetUpvalue => {
                let index = self.fetch(routine);
                let closure = self.current_closure.clone().expect("no active closure");
                let value = closure.upvalues.borrow()[index].resolve();
                self.push(value);
            }
            Opcode::GetUpvalueArg => {
                let index = self.fetch(routine);
                let bit = self.fetch(routine);
                let by_ref = self.frame().ref_flags & (1 << bit) != 0;
                let closure = self.current_closure.clone().expect("no active closure");
                let value = {
                    let mut cells = closure.upvalues.borrow_mut();
                    if by_ref {
                        cells[index].make_alias()
                    } else {
                        cells[index].resolve()
                    }
                };
                self.push(value);
            }
            Opcode::GetUpvalueRef => {
                let index = self.fetch(routine);
                let closure = self.current_closure.clone().expect("no active closure");
                let alias = closure.upvalues.borrow_mut()[index].make_alias();
                self.push(alias);
            }
            Opcode::GetUniqueUpvalue => {
                let index = self.fetch(routine);
                let closure = self.current_closure.clone().expect("no active closure");
                let value = closure.upvalues.borrow_mut()[index].unshare();
                self.push(value);
            }
            Opcode::SetUpvalue => {
                let index = self.fetch(routine);
                let value = self.pop()?;
                let closure = self.current_closure.clone().expect("no active closure");
                let mut cells = closure.upvalues.borrow_mut();
                assign(&mut cells[index], value)?;
            }

            //-- control flow -----------------------------------------------
            Opcode::Jump => {
                let addr = self.fetch_jump(routine);
                self.ip = addr;
            }
            Opcode::JumpFalse => {
                let addr = self.fetch_jump(routine);
                let value = self.pop()?.to_boolean();
                if !value {
                    self.ip = addr;
                }
            }
            Opcode::JumpTrue => {
                let addr = self.fetch_jump(routine);
                let value = self.pop()?.to_boolean();
                if value {
                    self.ip = addr;
                }
            }

            //-- calls ------------------------------------------------------
            Opcode::Precall => {
                let callee = self.peek(1).resolve();
                let flags;
                if callee.is::<Function>() {
                    flags = callee.handle::<Function>()?.ref_flags();
                } else if callee.is::<Class>() {
                    let class = callee.handle::<Class>()?;
                    let ctor = class.get_member(&self.init_name).ok_or_else(|| {
                        type_error(format!(
                            "Class {} does not have a constructor",
                            class.name()
                        ))
                    })?;
                    let function = ctor.handle::<Function>()?;
                    flags = function.ref_flags();
                    self.pop()?;
                    self.push(Value::from(function));
                } else {
                    return Err(type_error(format!(
                        "Expected a Function or a Class, got a {}",
                        callee.class_name()
                    )));
                }
                self.precall_flags.push(flags);
                self.frame_mut().ref_flags = flags;
            }
            Opcode::Call => {
                let flags = self.fetch(routine);
                self.needs_ref = flags & (1 << 9) != 0;
                let narg = flags & 255;
                let result = self.call_function(narg);
                // Restore the enclosing call's argument-binding flags.
                self.precall_flags.pop();
                self.frame_mut().ref_flags = self.precall_flags.last().copied().unwrap_or(0);
                self.push(result?);
                self.needs_ref = false;
            }
            Opcode::Return => {
                return Ok(Flow::Return(self.pop_call_frame()?));
            }

            //-- containers -------------------------------------------------
            Opcode::NewList => {
                let narg = self.fetch(routine);
                let start = self.stack.len() - narg;
                let items: Vec<Value> = self.stack.drain(start..).collect();
                let list = self.make(List::from_vec(items));
                self.push(Value::from(list));
            }
            Opcode::NewTable => {
                let pairs = self.fetch(routine);
                let narg = pairs * 2;
                let start = self.stack.len() - narg;
                let mut items: Vec<Value> = self.stack.drain(start..).collect();
                let table = Table::new();
                for chunk in items.chunks_mut(2) {
                    let key = chunk[0].resolve();
                    let value = chunk[1].resolve();
                    table.insert(key, value)?;
                }
                let table = self.make(table);
                self.push(Value::from(table));
            }
            Opcode::NewSet => {
                let narg = self.fetch(routine);
                let start = self.stack.len() - narg;
                let items: Vec<Value> = self.stack.drain(start..).collect();
                let set = self.make(Set::from_values(items));
                self.push(Value::from(set));
            }
            Opcode::NewArray => {
                let nrow = self.fetch(routine);
                let ncol = self.fetch(routine);
                let narg = nrow * ncol;
                let start = self.stack.len() - narg;
                let mut data = Vec::with_capacity(narg);
                for i in start..self.stack.len() {
                    data.push(self.stack[i].to_float()?);
                }
                self.stack.truncate(start);
                let array = self.make(Array::from_rows(nrow, ncol, data));
                self.push(Value::from(array));
            }

            //-- closures ---------------------------------------------------
            Opcode::NewClosure => {
                let index = self.fetch(routine);
                let narg = self.fetch(routine);
                let child = routine.get_routine(index);
                if !child.sealed() {
                    for i in (1..=narg).rev() {
                        let class = self.peek(i).resolve();
                        let class = class.handle::<Class>().map_err(|_| {
                            type_error(format!(
                                "Expected a Class object as type of parameter {}",
                                narg + 1 - i
                            ))
                        })?;
                        child.add_parameter_type(class);
                    }
                    child.seal();
                }
                self.popn(narg)?;

                let mut cells = Vec::with_capacity(child.upvalues.len());
                let base = self.locals_base();
                for slot in &child.upvalues {
                    if slot.is_local {
                        cells.push(self.stack[base + slot.index as usize].make_alias());
                    } else {
                        let parent = self.current_closure.clone().expect("no active closure");
                        let cell = parent.upvalues.borrow()[slot.index as usize].clone();
                        cells.push(cell);
                    }
                }
                let name = child.name.clone();
                let closure = self.make_closure(Callable::User(child), cells);
                let function = self.make_function(name, closure)?;
                self.push(Value::from(function));
            }

            //-- iterators --------------------------------------------------
            Opcode::NewIterator => {
                let ref_val = self.fetch(routine) != 0;
                let value = self.pop()?;
                let resolved = value.resolve();
                let iter = match &resolved {
                    Value::String(s) => Iter::over_string(s.clone(), ref_val),
                    Value::Object(_) => {
                        if resolved.is::<List>() {
                            Iter::over_list(resolved.handle::<List>()?, ref_val)
                        } else if resolved.is::<Table>() {
                            Iter::over_table(resolved.handle::<Table>()?, ref_val)
                        } else if resolved.is::<File>() {
                            Iter::over_file(resolved.handle::<File>()?, ref_val)?
                        } else if resolved.is::<Regex>() {
                            Iter::over_regex(resolved.handle::<Regex>()?, ref_val)
                        } else {
                            return Err(type_error(format!(
                                "Type {} is not iterable",
                                resolved.class_name()
                            )));
                        }
                    }
                    _ => {
                        return Err(type_error(format!(
                            "Type {} is not iterable",
                            resolved.class_name()
                        )))
                    }
                };
                let iter = self.make(iter);
                self.push(Value::from(iter));
            }
            Opcode::TestIterator => {
                let value = self.pop()?;
                let iter = value.handle::<Iter>()?;
                let done = iter.at_end()?;
                self.push(Value::Boolean(!done));
            }
            Opcode::NextKey => {
                let value = self.pop()?;
                let iter = value.handle::<Iter>()?;
                let key = iter.get_key()?;
                self.push(key);
            }
            Opcode::NextValue => {
                let value = self.pop()?;
                let iter = value.handle::<Iter>()?;
                let item = iter.get_value()?;
                self.push(item);
            }

            //-- indexing and fields ----------------------------------------
            Opcode::GetIndex => {
                let count = self.fetch(routine);
                self.get_index(count, false)?;
            }
            Opcode::GetIndexArg => {
                let count = self.fetch(routine);
                let bit = self.fetch(routine);
                let by_ref = self.frame().ref_flags & (1 << bit) != 0;
                if by_ref {
                    return Err(merle_core::error::reference_error(
                        "Passing an indexed expression as an argument by reference is not \
                         supported",
                    ));
                }
                self.get_index(count, false)?;
            }
            Opcode::GetIndexRef => {
                let count = self.fetch(routine);
                self.get_index(count, true)?;
            }
            Opcode::SetIndex => {
                let count = self.fetch(routine);
                self.set_index(count)?;
            }
            Opcode::GetField => {
                let index = self.fetch(routine);
                let name = routine.get_string(index);
                self.get_field(&name)?;
            }
            Opcode::SetField => {
                let index = self.fetch(routine);
                let name = routine.get_string(index);
                self.set_field(&name)?;
            }

            //-- statements -------------------------------------------------
            Opcode::Assert => {
                let narg = self.fetch(routine);
                let ok = self.peek(narg).to_boolean();
                if !ok {
                    let message = if narg == 2 {
                        format!("Assertion failed: {}", self.peek(1).to_display(false)?)
                    } else {
                        "Assertion failed".to_string()
                    };
                    return Err(runtime_error(message));
                }
                self.popn(narg)?;
            }
            Opcode::Print => {
                let narg = self.fetch(routine);
                self.print_values(narg, false)?;
            }
            Opcode::PrintLine => {
                let narg = self.fetch(routine);
                self.print_values(narg, true)?;
            }
            Opcode::Throw => {
                let message = self.pop()?.to_display(false)?;
                return Err(runtime_error(message));
            }
        }
        Ok(Flow::Continue)
    }

    //-- helpers ------------------------------------------------------------

    fn print_values(&mut self, narg: usize, newline: bool) -> Result<()> {
        let mut text = String::new();
        for i in (1..=narg).rev() {
            text.push_str(&self.peek(i).to_display(false)?);
        }
        if newline {
            text.push('\n');
        }
        self.popn(narg)?;
        self.print_str(&text);
        Ok(())
    }

    fn pop_call_frame(&mut self) -> Result<Value> {
        let frame = self.frames.pop().ok_or_else(|| {
            internal_error("Return without an active call frame")
        })?;
        let locals_end = frame.locals + frame.nlocal;
        let result = if self.stack.len() > locals_end {
            self.pop()?
        } else {
            Value::Null
        };
        self.stack.truncate(frame.locals);
        if frame.pops_callee {
            self.pop()?;
        }
        self.current_routine = frame.previous_routine;
        self.current_closure = frame.previous_closure;
        self.ip = frame.return_ip;
        Ok(result)
    }

    /// `Call (narg | ref_bit)`: dispatch to the best overload of the
    /// function sitting below the arguments.
    fn call_function(&mut self, narg: usize) -> Result<Value> {
        let callee_index = self.stack.len() - narg - 1;
        let callee = self.stack[callee_index].resolve();
        let function = callee.handle::<Function>()?;
        let args_start = callee_index + 1;
        let closure = function.find_closure(&self.stack[args_start..], &self.classes)?;
        match &closure.callable {
            Callable::Native(native) => {
                let callback = native.callback;
                let mut args: Vec<Value> = self.stack[args_start..].to_vec();
                let result = callback(self, &mut args)?;
                self.stack.truncate(callee_index);
                Ok(result)
            }
            Callable::User(_) => self.call_user(closure.clone(), narg, true),
        }
    }

    /// Dispatch an indexed read to the class's `get_item` method. The
    /// `needs_ref` flag tells the method to return an alias into the
    /// container rather than a copy.
    fn get_index(&mut self, count: usize, by_ref: bool) -> Result<()> {
        self.needs_ref = by_ref;
        let total = count + 1;
        let start = self.stack.len() - total;
        let class = self.stack[start].class_of(&self.classes);
        let method = class.get_member(&self.get_item_name).ok_or_else(|| {
            type_error(format!("{} type is not indexable", class.name()))
        })?;
        let function = method.handle::<Function>()?;
        let closure = function.find_closure(&self.stack[start..], &self.classes)?;
        let mut args: Vec<Value> = self.stack[start..].to_vec();
        let result = self.call_values(&closure, &mut args);
        self.needs_ref = false;
        let result = result?;
        self.stack.truncate(start);
        self.push(result);
        Ok(())
    }

    /// Dispatch an indexed write to the class's `set_item` method.
    fn set_index(&mut self, count: usize) -> Result<()> {
        let total = count + 2;
        let start = self.stack.len() - total;
        let class = self.stack[start].class_of(&self.classes);
        let method = class.get_member(&self.set_item_name).ok_or_else(|| {
            type_error(format!("{} type is not index-assignable", class.name()))
        })?;
        let function = method.handle::<Function>()?;
        let closure = function.find_closure(&self.stack[start..], &self.classes)?;
        let mut args: Vec<Value> = self.stack[start..].to_vec();
        self.call_values(&closure, &mut args)?;
        self.stack.truncate(start);
        Ok(())
    }

    /// Dispatch `obj.name` to the class's `get_field` method with the
    /// field name as second argument.
    fn get_field(&mut self, name: &Rc<str>) -> Result<()> {
        let start = self.stack.len() - 1;
        let class = self.stack[start].class_of(&self.classes);
        let method = class.get_member(&self.get_field_name).ok_or_else(|| {
            type_error(format!(
                "{} type does not support field access",
                class.name()
            ))
        })?;
        let function = method.handle::<Function>()?;
        let mut args = vec![
            self.stack[start].clone(),
            Value::String(Str::from(name.clone())),
        ];
        let closure = function.find_closure(&args, &self.classes)?;
        let result = self.call_values(&closure, &mut args)?;
        self.stack.truncate(start);
        self.push(result);
        Ok(())
    }

    /// Dispatch `obj.name = value` to the class's `set_field` method.
    fn set_field(&mut self, name: &Rc<str>) -> Result<()> {
        let start = self.stack.len() - 2;
        let class = self.stack[start].class_of(&self.classes);
        let method = class.get_member(&self.set_field_name).ok_or_else(|| {
            type_error(format!(
                "{} type does not support field assignment",
                class.name()
            ))
        })?;
        let function = method.handle::<Function>()?;
        let mut args = vec![
            self.stack[start].clone(),
            Value::String(Str::from(name.clone())),
            self.stack[start + 1].clone(),
        ];
        let closure = function.find_closure(&args, &self.classes)?;
        self.call_values(&closure, &mut args)?;
        self.stack.truncate(start);
        Ok(())
    }

    fn negate(&mut self) -> Result<()> {
        let value = self.pop()?.resolve();
        match value {
            Value::Integer(n) => {
                let negated = n
                    .checked_neg()
                    .ok_or_else(|| math_error("Integer overflow"))?;
                self.push(Value::Integer(negated));
            }
            Value::Float(f) => self.push(Value::Float(-f)),
            other => {
                return Err(type_error(format!(
                    "Negation operator expected a Number, got a {}",
                    other.class_name()
                )))
            }
        }
        Ok(())
    }

    fn math_op(&mut self, op: char) -> Result<()> {
        let v1 = self.peek(2).resolve();
        let v2 = self.peek(1).resolve();
        if !(v1.is_number() && v2.is_number()) {
            let e = type_error(format!(
                "Cannot apply math operator '{}' to {} and {}",
                op,
                v1.class_name(),
                v2.class_name()
            ));
            self.popn(2)?;
            return Err(e);
        }
        let result = match (op, &v1, &v2) {
            ('+', Value::Integer(x), Value::Integer(y)) => Value::Integer(
                x.checked_add(*y)
                    .ok_or_else(|| math_error("Integer overflow"))?,
            ),
            ('-', Value::Integer(x), Value::Integer(y)) => Value::Integer(
                x.checked_sub(*y)
                    .ok_or_else(|| math_error("Integer overflow"))?,
            ),
            ('*', Value::Integer(x), Value::Integer(y)) => Value::Integer(
                x.checked_mul(*y)
                    .ok_or_else(|| math_error("Integer overflow"))?,
            ),
            ('%', Value::Integer(x), Value::Integer(y)) => {
                if *y == 0 {
                    return Err(math_error("Division by zero"));
                }
                Value::Integer(x % y)
            }
            _ => {
                let x = v1.get_number()?;
                let y = v2.get_number()?;
                let raw = match op {
                    '+' => x + y,
                    '-' => x - y,
                    '*' => x * y,
                    '/' => x / y,
                    '^' => x.powf(y),
                    '%' => x % y,
                    _ => return Err(internal_error("Invalid math operator")),
                };
                Value::Float(check_float(raw, x, y, op)?)
            }
        };
        self.popn(2)?;
        self.push(result);
        Ok(())
    }
}

/// Map the IEEE exceptional outcomes of a float operation to MathErrors.
/// The exception flags themselves are not portably readable, so the result
/// is classified instead: an infinity appearing from finite operands is an
/// overflow (or a division by zero), a NaN appearing from non-NaN operands
/// is an invalid operation, and a subnormal non-zero result is an
/// underflow.
fn check_float(result: f64, x: f64, y: f64, op: char) -> Result<f64> {
    if result.is_infinite() && x.is_finite() && y.is_finite() {
        if op == '/' && y == 0.0 {
            return Err(math_error("Division by zero"));
        }
        return Err(math_error("Number overflow"));
    }
    if result.is_nan() && !x.is_nan() && !y.is_nan() {
        return Err(math_error("Undefined number"));
    }
    if result != 0.0 && result.is_subnormal() {
        return Err(math_error("Number underflow"));
    }
    Ok(result)
}

/// Render a runtime error the way the CLI reports it.
pub fn format_error(e: &RuntimeError) -> String {
    match e.line {
        Some(line) => format!("line {}: {}", line, e),
        None => e.to_string(),
    }
}
