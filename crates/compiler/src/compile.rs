//! AST-to-bytecode lowering.
//!
//! The compiler walks the tree and emits opcodes into the routine under
//! construction. Routines nest: a function definition pushes a fresh
//! builder, compiles parameters and body into it, then emits a
//! `NewClosure` in the enclosing routine with the parameter type
//! expressions. Scope discipline:
//!
//! - every block gets a fresh scope id; depth grows with lexical nesting;
//! - a local resolves by walking the locals table back to front, accepting
//!   entries no deeper than the current scope;
//! - a name that only exists in an enclosing routine is promoted to an
//!   upvalue, registering a descriptor in every routine along the chain so
//!   non-local chains always terminate on a genuine local.
//!
//! `break`/`continue` emit placeholder jumps collected on a stack and
//! back-patched when the enclosing loop closes.

use std::rc::Rc;

use merle_core::code::{Code, Instruction, Opcode};
use merle_core::error::{name_error, syntax_error, Result, RuntimeError};
use merle_core::ErrorKind;
use merle_runtime::{Local, Routine, UpvalueSlot, MAX_PARAMS};

use crate::ast::{Ast, Param};
use crate::token::Lexeme;

/// How a variable read reaches the stack.
#[derive(Clone, Copy, PartialEq)]
enum AccessMode {
    /// Plain value (`Get*`).
    Value,
    /// Call argument at the given position: the callee's reference flags
    /// decide between value and alias at run time (`Get*Arg`).
    Argument(u16),
    /// Always materialise an alias (`Get*Ref`).
    Reference,
    /// Unshare before pushing, for mutation targets (`GetUnique*`).
    Unique,
}

/// One routine under construction.
struct RoutineBuilder {
    name: Rc<str>,
    code: Code,
    integer_pool: Vec<i64>,
    float_pool: Vec<f64>,
    string_pool: Vec<Rc<str>>,
    routines: Vec<Rc<Routine>>,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueSlot>,
    argc: usize,
    ref_flags: u64,
}

impl RoutineBuilder {
    fn new(name: Rc<str>) -> RoutineBuilder {
        RoutineBuilder {
            name,
            code: Code::new(),
            integer_pool: Vec::new(),
            float_pool: Vec::new(),
            string_pool: Vec::new(),
            routines: Vec::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            argc: 0,
            ref_flags: 0,
        }
    }

    fn add_integer_constant(&mut self, value: i64) -> Instruction {
        match self.integer_pool.iter().position(|&v| v == value) {
            Some(i) => i as Instruction,
            None => {
                self.integer_pool.push(value);
                (self.integer_pool.len() - 1) as Instruction
            }
        }
    }

    fn add_float_constant(&mut self, value: f64) -> Instruction {
        match self.float_pool.iter().position(|&v| v.to_bits() == value.to_bits()) {
            Some(i) => i as Instruction,
            None => {
                self.float_pool.push(value);
                (self.float_pool.len() - 1) as Instruction
            }
        }
    }

    fn add_string_constant(&mut self, value: &str) -> Instruction {
        match self.string_pool.iter().position(|v| &**v == value) {
            Some(i) => i as Instruction,
            None => {
                self.string_pool.push(Rc::from(value));
                (self.string_pool.len() - 1) as Instruction
            }
        }
    }

    /// Register a local, rejecting a duplicate name in the same scope.
    fn add_local(&mut self, name: &str, scope: u32, depth: u32) -> Result<Instruction> {
        for local in self.locals.iter().rev() {
            if local.scope != scope {
                break;
            }
            if &*local.name == name {
                return Err(name_error(format!(
                    "Variable \"{}\" is already defined in this scope",
                    name
                )));
            }
        }
        self.locals.push(Local {
            name: Rc::from(name),
            scope,
            depth,
        });
        Ok((self.locals.len() - 1) as Instruction)
    }

    /// Back-to-front search accepting any local visible at `depth`.
    fn find_local(&self, name: &str, depth: u32) -> Option<Instruction> {
        for (i, local) in self.locals.iter().enumerate().rev() {
            if local.depth <= depth && &*local.name == name {
                return Some(i as Instruction);
            }
        }
        None
    }

    fn add_upvalue(&mut self, index: Instruction, is_local: bool) -> Instruction {
        let slot = UpvalueSlot { index, is_local };
        match self.upvalues.iter().position(|s| *s == slot) {
            Some(i) => i as Instruction,
            None => {
                self.upvalues.push(slot);
                (self.upvalues.len() - 1) as Instruction
            }
        }
    }

    fn finish(self) -> Routine {
        Routine::new(
            self.name,
            self.code,
            self.integer_pool,
            self.float_pool,
            self.string_pool,
            self.routines,
            self.locals,
            self.upvalues,
            self.argc,
            self.ref_flags,
        )
    }
}

pub struct Compiler {
    builders: Vec<RoutineBuilder>,
    break_jumps: Vec<usize>,
    break_count: usize,
    continue_jumps: Vec<usize>,
    continue_count: usize,
    current_scope: u32,
    scope_id: u32,
    scope_depth: u32,
}

impl Compiler {
    pub fn new() -> Compiler {
        Compiler {
            builders: Vec::new(),
            break_jumps: Vec::new(),
            break_count: 0,
            continue_jumps: Vec::new(),
            continue_count: 0,
            current_scope: 0,
            scope_id: 0,
            scope_depth: 0,
        }
    }

    /// Compile a module's AST into an executable routine.
    pub fn compile(mut self, ast: &Ast) -> Result<Rc<Routine>> {
        self.builders.push(RoutineBuilder::new(Rc::from("<module>")));
        let line = ast.line();
        self.code().emit_op1(line, Opcode::NewFrame, 0);
        let frame_offset = self.code().len() - 1;
        let previous = self.open_scope();
        self.visit_statement(ast)?;
        self.close_scope(previous);
        let nlocal = self.builder().locals.len() as Instruction;
        self.code().patch_instruction(frame_offset, nlocal);
        self.code().emit_return();
        let builder = self.builders.pop().expect("builder stack imbalance");
        let routine = Rc::new(builder.finish());
        tracing::debug!(
            instructions = routine.code.len(),
            locals = routine.local_count(),
            nested = routine.routine_pool.len(),
            "module compiled"
        );
        Ok(routine)
    }

    //-- scope bookkeeping --------------------------------------------------

    fn open_scope(&mut self) -> u32 {
        let previous = self.current_scope;
        self.scope_id += 1;
        self.current_scope = self.scope_id;
        self.scope_depth += 1;
        previous
    }

    fn close_scope(&mut self, previous: u32) {
        self.scope_depth -= 1;
        self.current_scope = previous;
    }

    fn builder(&mut self) -> &mut RoutineBuilder {
        self.builders.last_mut().expect("no routine under construction")
    }

    fn code(&mut self) -> &mut Code {
        &mut self.builder().code
    }

    fn add_local(&mut self, name: &str, line: usize) -> Result<Instruction> {
        let scope = self.current_scope;
        let depth = self.scope_depth;
        self.builder()
            .add_local(name, scope, depth)
            .map_err(|e| e.with_line(line))
    }

    fn find_local(&mut self, name: &str) -> Option<Instruction> {
        let depth = self.scope_depth;
        self.builders
            .last()
            .expect("no routine under construction")
            .find_local(name, depth)
    }

    /// Search enclosing routines for `name`, threading an upvalue
    /// descriptor through every routine between the local and the reader.
    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<Instruction> {
        if level == 0 {
            return None;
        }
        let depth = self.scope_depth;
        if let Some(index) = self.builders[level - 1].find_local(name, depth) {
            return Some(self.builders[level].add_upvalue(index, true));
        }
        let index = self.resolve_upvalue(level - 1, name)?;
        Some(self.builders[level].add_upvalue(index, false))
    }

    //-- statements ---------------------------------------------------------

    fn visit_statement(&mut self, node: &Ast) -> Result<()> {
        // `pass` compiles to nothing at all.
        if matches!(
            node,
            Ast::Constant {
                lexeme: Lexeme::Pass,
                ..
            }
        ) {
            return Ok(());
        }
        if node.is_expression() {
            self.visit(node)?;
            self.code().emit(node.line(), Opcode::Pop);
            return Ok(());
        }
        self.visit(node)
    }

    fn visit(&mut self, node: &Ast) -> Result<()> {
        match node {
            Ast::Constant { line, lexeme } => self.visit_constant(*line, *lexeme),
            Ast::Integer { line, value } => {
                self.emit_integer(*line, *value);
                Ok(())
            }
            Ast::Float { line, value } => {
                let index = self.builder().add_float_constant(*value);
                self.code().emit_op1(*line, Opcode::PushFloat, index);
                Ok(())
            }
            Ast::Str { line, value } => {
                let index = self.builder().add_string_constant(value);
                self.code().emit_op1(*line, Opcode::PushString, index);
                Ok(())
            }
            Ast::Variable { line, name } => self.emit_variable(*line, name, AccessMode::Value),
            Ast::Unary { line, op, expr } => self.visit_unary(*line, *op, expr),
            Ast::Binary { line, op, lhs, rhs } => self.visit_binary(*line, *op, lhs, rhs),
            Ast::Concat { line, items } => {
                for item in items {
                    self.visit(item)?;
                }
                self.code()
                    .emit_op1(*line, Opcode::Concat, items.len() as Instruction);
                Ok(())
            }
            Ast::Call { line, callee, args } => self.visit_call(*line, callee, args),
            Ast::Index { line, expr, indices } => {
                self.visit(expr)?;
                for index in indices {
                    self.visit(index)?;
                }
                self.code()
                    .emit_op1(*line, Opcode::GetIndex, indices.len() as Instruction);
                Ok(())
            }
            Ast::Dot { line, expr, name } => {
                self.visit(expr)?;
                let index = self.builder().add_string_constant(name);
                self.code().emit_op1(*line, Opcode::GetField, index);
                Ok(())
            }
            Ast::Reference { line, expr } => self.visit_reference(*line, expr),
            Ast::Assignment { line, lhs, rhs } => self.visit_assignment(*line, lhs, rhs),
            Ast::CondExpr {
                line,
                cond,
                then,
                otherwise,
            } => {
                self.visit(cond)?;
                let skip_then = self.code().emit_jump(*line, Opcode::JumpFalse, 0);
                self.visit(then)?;
                let skip_else = self.code().emit_jump(*line, Opcode::Jump, 0);
                self.code().backpatch(skip_then);
                self.visit(otherwise)?;
                self.code().backpatch(skip_else);
                Ok(())
            }
            Ast::StatementList {
                statements,
                opens_scope,
                ..
            } => {
                let scope = if *opens_scope {
                    Some(self.open_scope())
                } else {
                    None
                };
                for statement in statements {
                    self.visit_statement(statement)?;
                }
                if let Some(previous) = scope {
                    self.close_scope(previous);
                }
                Ok(())
            }
            Ast::Declaration {
                line,
                lhs,
                rhs,
                local,
            } => self.visit_declaration(*line, lhs, rhs, *local),
            Ast::Print {
                line,
                exprs,
                newline,
            } => {
                for expr in exprs {
                    self.visit(expr)?;
                }
                let op = if *newline {
                    Opcode::PrintLine
                } else {
                    Opcode::Print
                };
                self.code().emit_op1(*line, op, exprs.len() as Instruction);
                Ok(())
            }
            Ast::AssertStmt {
                line,
                cond,
                message,
            } => {
                self.visit(cond)?;
                let narg = match message {
                    Some(message) => {
                        self.visit(message)?;
                        2
                    }
                    None => 1,
                };
                self.code().emit_op1(*line, Opcode::Assert, narg);
                Ok(())
            }
            Ast::If {
                line,
                branches,
                else_block,
            } => self.visit_if(*line, branches, else_block.as_deref()),
            Ast::While { line, cond, body } => self.visit_while(*line, cond, body),
            Ast::Repeat { line, body, cond } => self.visit_repeat(*line, body, cond),
            Ast::For {
                line,
                var,
                start,
                end,
                step,
                down,
                body,
            } => self.visit_for(*line, var, start, end, step.as_deref(), *down, body),
            Ast::Foreach {
                line,
                key,
                value,
                collection,
                body,
            } => self.visit_foreach(*line, key.as_deref(), value, collection, body),
            Ast::LoopExit { line, is_break } => {
                let jump = self.code().emit_jump(*line, Opcode::Jump, 0);
                if *is_break {
                    self.break_jumps.push(jump);
                    self.break_count += 1;
                } else {
                    self.continue_jumps.push(jump);
                    self.continue_count += 1;
                }
                Ok(())
            }
            Ast::FunctionDef {
                line,
                name,
                params,
                body,
                local,
            } => self.visit_function(*line, name, params, body, *local),
            Ast::Return { line, expr } => {
                match expr {
                    Some(expr) => self.visit(expr)?,
                    None => self.code().emit(*line, Opcode::PushNull),
                }
                self.code().emit(*line, Opcode::Return);
                Ok(())
            }
            Ast::ListLit { line, items } => {
                for item in items {
                    self.visit(item)?;
                }
                self.code()
                    .emit_op1(*line, Opcode::NewList, items.len() as Instruction);
                Ok(())
            }
            Ast::TableLit { line, pairs } => {
                for (key, value) in pairs {
                    self.visit(key)?;
                    self.visit(value)?;
                }
                self.code()
                    .emit_op1(*line, Opcode::NewTable, pairs.len() as Instruction);
                Ok(())
            }
            Ast::SetLit { line, items } => {
                for item in items {
                    self.visit(item)?;
                }
                self.code()
                    .emit_op1(*line, Opcode::NewSet, items.len() as Instruction);
                Ok(())
            }
            Ast::ArrayLit { line, rows } => {
                for row in rows {
                    for item in row {
                        self.visit(item)?;
                    }
                }
                self.code().emit_op2(
                    *line,
                    Opcode::NewArray,
                    rows.len() as Instruction,
                    rows[0].len() as Instruction,
                );
                Ok(())
            }
            Ast::ThrowStmt { line, expr } => {
                self.visit(expr)?;
                self.code().emit(*line, Opcode::Throw);
                Ok(())
            }
        }
    }

    fn visit_constant(&mut self, line: usize, lexeme: Lexeme) -> Result<()> {
        match lexeme {
            Lexeme::Null => self.code().emit(line, Opcode::PushNull),
            Lexeme::True => self.code().emit(line, Opcode::PushTrue),
            Lexeme::False => self.code().emit(line, Opcode::PushFalse),
            Lexeme::Nan => self.code().emit(line, Opcode::PushNan),
            Lexeme::Pass => {}
            _ => {
                return Err(RuntimeError::at_line(
                    ErrorKind::Internal,
                    line,
                    "Invalid constant literal",
                ))
            }
        }
        Ok(())
    }

    fn emit_integer(&mut self, line: usize, value: i64) {
        // Small integers ride in the instruction stream.
        if (i16::MIN as i64..=i16::MAX as i64).contains(&value) {
            self.code()
                .emit_op1(line, Opcode::PushSmallInt, value as i16 as u16);
        } else {
            let index = self.builder().add_integer_constant(value);
            self.code().emit_op1(line, Opcode::PushInteger, index);
        }
    }

    fn visit_unary(&mut self, line: usize, op: Lexeme, expr: &Ast) -> Result<()> {
        if op == Lexeme::OpMinus {
            // Fold negative literals in place.
            match expr {
                Ast::Integer { value, .. } => {
                    let negated = value.checked_neg().ok_or_else(|| {
                        RuntimeError::at_line(
                            ErrorKind::Math,
                            line,
                            "Invalid negative integer literal",
                        )
                    })?;
                    self.emit_integer(line, negated);
                    return Ok(());
                }
                Ast::Float { value, .. } => {
                    let index = self.builder().add_float_constant(-*value);
                    self.code().emit_op1(line, Opcode::PushFloat, index);
                    return Ok(());
                }
                _ => {}
            }
        }
        self.visit(expr)?;
        match op {
            Lexeme::Not => self.code().emit(line, Opcode::Not),
            Lexeme::OpMinus => self.code().emit(line, Opcode::Negate),
            _ => {
                return Err(RuntimeError::at_line(
                    ErrorKind::Internal,
                    line,
                    "Invalid operator in unary expression",
                ))
            }
        }
        Ok(())
    }

    fn visit_binary(&mut self, line: usize, op: Lexeme, lhs: &Ast, rhs: &Ast) -> Result<()> {
        // and/or short-circuit over the right hand side.
        if op == Lexeme::And {
            self.visit(lhs)?;
            let jump = self.code().emit_jump(line, Opcode::JumpFalse, 0);
            self.visit(rhs)?;
            let done = self.code().emit_jump(line, Opcode::Jump, 0);
            self.code().backpatch(jump);
            self.code().emit(line, Opcode::PushFalse);
            self.code().backpatch(done);
            return Ok(());
        }
        if op == Lexeme::Or {
            self.visit(lhs)?;
            let jump = self.code().emit_jump(line, Opcode::JumpTrue, 0);
            self.visit(rhs)?;
            let done = self.code().emit_jump(line, Opcode::Jump, 0);
            self.code().backpatch(jump);
            self.code().emit(line, Opcode::PushTrue);
            self.code().backpatch(done);
            return Ok(());
        }

        self.visit(lhs)?;
        self.visit(rhs)?;
        let opcode = match op {
            Lexeme::OpPlus => Opcode::Add,
            Lexeme::OpMinus => Opcode::Subtract,
            Lexeme::OpStar => Opcode::Multiply,
            Lexeme::OpSlash => Opcode::Divide,
            Lexeme::OpPower => Opcode::Power,
            Lexeme::OpMod => Opcode::Modulus,
            Lexeme::OpEqual => Opcode::Equal,
            Lexeme::OpNotEqual => Opcode::NotEqual,
            Lexeme::OpLessThan => Opcode::Less,
            Lexeme::OpLessEqual => Opcode::LessEqual,
            Lexeme::OpGreaterThan => Opcode::Greater,
            Lexeme::OpGreaterEqual => Opcode::GreaterEqual,
            Lexeme::OpCompare => Opcode::Compare,
            _ => {
                return Err(RuntimeError::at_line(
                    ErrorKind::Internal,
                    line,
                    "Invalid operator in binary expression",
                ))
            }
        };
        self.code().emit(line, opcode);
        Ok(())
    }

    /// Emit a variable access with the requested mode, resolving locals,
    /// then upvalues, then globals.
    fn emit_variable(&mut self, line: usize, name: &str, mode: AccessMode) -> Result<()> {
        if let Some(index) = self.find_local(name) {
            match mode {
                AccessMode::Value => self.code().emit_op1(line, Opcode::GetLocal, index),
                AccessMode::Argument(pos) => {
                    self.code().emit_op2(line, Opcode::GetLocalArg, index, pos)
                }
                AccessMode::Reference => self.code().emit_op1(line, Opcode::GetLocalRef, index),
                AccessMode::Unique => self.code().emit_op1(line, Opcode::GetUniqueLocal, index),
            }
            return Ok(());
        }
        let level = self.builders.len() - 1;
        if let Some(index) = self.resolve_upvalue(level, name) {
            match mode {
                AccessMode::Value => self.code().emit_op1(line, Opcode::GetUpvalue, index),
                AccessMode::Argument(pos) => {
                    self.code().emit_op2(line, Opcode::GetUpvalueArg, index, pos)
                }
                AccessMode::Reference => self.code().emit_op1(line, Opcode::GetUpvalueRef, index),
                AccessMode::Unique => {
                    self.code().emit_op1(line, Opcode::GetUniqueUpvalue, index)
                }
            }
            return Ok(());
        }
        let index = self.builder().add_string_constant(name);
        match mode {
            AccessMode::Value => self.code().emit_op1(line, Opcode::GetGlobal, index),
            AccessMode::Argument(pos) => {
                self.code().emit_op2(line, Opcode::GetGlobalArg, index, pos)
            }
            AccessMode::Reference => self.code().emit_op1(line, Opcode::GetGlobalRef, index),
            AccessMode::Unique => self.code().emit_op1(line, Opcode::GetUniqueGlobal, index),
        }
        Ok(())
    }

    /// Compile one call argument. Variables and indexed reads go through
    /// their `Arg` form so the callee's reference flags can bind them as
    /// aliases; an explicit `ref` always aliases.
    fn visit_argument(&mut self, arg: &Ast, position: u16) -> Result<()> {
        match arg {
            Ast::Variable { line, name } => {
                self.emit_variable(*line, name, AccessMode::Argument(position))
            }
            Ast::Reference { line, expr } => self.visit_reference(*line, expr),
            Ast::Index { line, expr, indices } => {
                self.visit(expr)?;
                for index in indices {
                    self.visit(index)?;
                }
                self.code().emit_op2(
                    *line,
                    Opcode::GetIndexArg,
                    indices.len() as Instruction,
                    position,
                );
                Ok(())
            }
            other => self.visit(other),
        }
    }

    fn visit_reference(&mut self, line: usize, expr: &Ast) -> Result<()> {
        match expr {
            Ast::Variable { name, .. } => self.emit_variable(line, name, AccessMode::Reference),
            Ast::Index {
                expr: base,
                indices,
                ..
            } => {
                self.visit(base)?;
                for index in indices {
                    self.visit(index)?;
                }
                self.code()
                    .emit_op1(line, Opcode::GetIndexRef, indices.len() as Instruction);
                Ok(())
            }
            // A reference to a temporary is the temporary itself.
            other => self.visit(other),
        }
    }

    fn visit_call(&mut self, line: usize, callee: &Ast, args: &[Ast]) -> Result<()> {
        // Method-call syntax is uniform function call syntax: the callee
        // name resolves as a generic function and the receiver becomes the
        // first argument.
        if let Ast::Dot {
            expr: receiver,
            name,
            ..
        } = callee
        {
            self.emit_variable(line, name, AccessMode::Value)?;
            self.code().emit(line, Opcode::Precall);
            self.visit_argument(receiver, 0)?;
            for (i, arg) in args.iter().enumerate() {
                self.visit_argument(arg, (i + 1) as u16)?;
            }
            let narg = args.len() + 1;
            self.code()
                .emit_op1(line, Opcode::Call, narg as Instruction);
            return Ok(());
        }

        self.visit(callee)?;
        self.code().emit(line, Opcode::Precall);
        for (i, arg) in args.iter().enumerate() {
            self.visit_argument(arg, i as u16)?;
        }
        self.code()
            .emit_op1(line, Opcode::Call, args.len() as Instruction);
        Ok(())
    }

    fn visit_assignment(&mut self, line: usize, lhs: &Ast, rhs: &Ast) -> Result<()> {
        match lhs {
            Ast::Variable { name, .. } => {
                self.visit(rhs)?;
                if let Some(index) = self.find_local(name) {
                    self.code().emit_op1(line, Opcode::SetLocal, index);
                    return Ok(());
                }
                let level = self.builders.len() - 1;
                if let Some(index) = self.resolve_upvalue(level, name) {
                    self.code().emit_op1(line, Opcode::SetUpvalue, index);
                    return Ok(());
                }
                let index = self.builder().add_string_constant(name);
                self.code().emit_op1(line, Opcode::SetGlobal, index);
                Ok(())
            }
            Ast::Index { expr, indices, .. } => {
                // Unshare the base variable so writing into a shared
                // collection copies it first.
                match &**expr {
                    Ast::Variable { line: vline, name } => {
                        self.emit_variable(*vline, name, AccessMode::Unique)?
                    }
                    other => self.visit(other)?,
                }
                for index in indices {
                    self.visit(index)?;
                }
                self.visit(rhs)?;
                self.code()
                    .emit_op1(line, Opcode::SetIndex, indices.len() as Instruction);
                Ok(())
            }
            Ast::Dot { expr, name, .. } => {
                self.visit(expr)?;
                self.visit(rhs)?;
                let index = self.builder().add_string_constant(name);
                self.code().emit_op1(line, Opcode::SetField, index);
                Ok(())
            }
            _ => Err(RuntimeError::at_line(
                ErrorKind::Syntax,
                line,
                "Invalid assignment target",
            )),
        }
    }

    fn visit_declaration(
        &mut self,
        line: usize,
        lhs: &[Ast],
        rhs: &[Ast],
        local: bool,
    ) -> Result<()> {
        for (i, target) in lhs.iter().enumerate() {
            let name = match target {
                Ast::Variable { name, .. } => name,
                _ => {
                    return Err(RuntimeError::at_line(
                        ErrorKind::Syntax,
                        line,
                        "Expected a variable name in declaration",
                    ))
                }
            };
            match rhs.get(i) {
                Some(expr) => self.visit(expr)?,
                None => self.code().emit(line, Opcode::PushNull),
            }
            if local || self.scope_depth > 1 {
                let index = self.add_local(name, line)?;
                self.code().emit_op1(line, Opcode::DefineLocal, index);
            } else {
                let index = self.builder().add_string_constant(name);
                self.code().emit_op1(line, Opcode::DefineGlobal, index);
            }
        }
        Ok(())
    }

    fn visit_if(
        &mut self,
        line: usize,
        branches: &[(Ast, Ast)],
        else_block: Option<&Ast>,
    ) -> Result<()> {
        let mut end_jumps = Vec::with_capacity(branches.len());
        for (cond, block) in branches {
            self.visit(cond)?;
            let next_branch = self.code().emit_jump(cond.line(), Opcode::JumpFalse, 0);
            self.visit(block)?;
            end_jumps.push(self.code().emit_jump(line, Opcode::Jump, 0));
            self.code().backpatch(next_branch);
        }
        if let Some(block) = else_block {
            self.visit(block)?;
        }
        for jump in end_jumps {
            self.code().backpatch(jump);
        }
        Ok(())
    }

    fn visit_while(&mut self, line: usize, cond: &Ast, body: &Ast) -> Result<()> {
        let previous_breaks = std::mem::replace(&mut self.break_count, 0);
        let previous_continues = std::mem::replace(&mut self.continue_count, 0);
        let loop_start = self.code().len();
        self.visit(cond)?;
        let exit = self.code().emit_jump(line, Opcode::JumpFalse, 0);
        self.visit(body)?;
        self.backpatch_continues(previous_continues, Some(loop_start));
        self.code().emit_jump(line, Opcode::Jump, loop_start as i32);
        self.code().backpatch(exit);
        self.backpatch_breaks(previous_breaks);
        Ok(())
    }

    /// The body runs before the condition; `continue` lands on the test.
    fn visit_repeat(&mut self, line: usize, body: &Ast, cond: &Ast) -> Result<()> {
        let previous_breaks = std::mem::replace(&mut self.break_count, 0);
        let previous_continues = std::mem::replace(&mut self.continue_count, 0);
        let loop_start = self.code().len();
        self.visit(body)?;
        self.backpatch_continues(previous_continues, None);
        self.visit(cond)?;
        self.code()
            .emit_jump(line, Opcode::JumpFalse, loop_start as i32);
        self.backpatch_breaks(previous_breaks);
        Ok(())
    }

    fn visit_for(
        &mut self,
        line: usize,
        var: &str,
        start: &Ast,
        end: &Ast,
        step: Option<&Ast>,
        down: bool,
        body: &Ast,
    ) -> Result<()> {
        let scope = self.open_scope();
        let previous_breaks = std::mem::replace(&mut self.break_count, 0);
        let previous_continues = std::mem::replace(&mut self.continue_count, 0);

        // Loop variable and hidden bound (and step) locals.
        self.visit(start)?;
        let var_index = self.add_local(var, line)?;
        self.code().emit_op1(line, Opcode::DefineLocal, var_index);
        self.visit(end)?;
        let end_index = self.add_local("$end", line)?;
        self.code().emit_op1(line, Opcode::DefineLocal, end_index);
        let step_index = match step {
            Some(step) => {
                self.visit(step)?;
                let index = self.add_local("$step", line)?;
                self.code().emit_op1(line, Opcode::DefineLocal, index);
                Some(index)
            }
            None => None,
        };

        let loop_start = self.code().len();
        self.code().emit_op1(line, Opcode::GetLocal, var_index);
        self.code().emit_op1(line, Opcode::GetLocal, end_index);
        let test = if down { Opcode::Less } else { Opcode::Greater };
        self.code().emit(line, test);
        let exit = self.code().emit_jump(line, Opcode::JumpTrue, 0);

        self.visit(body)?;

        // `continue` lands on the counter update.
        self.backpatch_continues(previous_continues, None);
        match step_index {
            Some(step_index) => {
                self.code().emit_op1(line, Opcode::GetLocal, var_index);
                self.code().emit_op1(line, Opcode::GetLocal, step_index);
                let update = if down { Opcode::Subtract } else { Opcode::Add };
                self.code().emit(line, update);
                self.code().emit_op1(line, Opcode::SetLocal, var_index);
            }
            None => {
                let update = if down {
                    Opcode::DecrementLocal
                } else {
                    Opcode::IncrementLocal
                };
                self.code().emit_op1(line, update, var_index);
            }
        }
        self.code().emit_jump(line, Opcode::Jump, loop_start as i32);
        self.code().backpatch(exit);
        self.backpatch_breaks(previous_breaks);

        self.close_scope(scope);
        Ok(())
    }

    fn visit_foreach(
        &mut self,
        line: usize,
        key: Option<&str>,
        value: &crate::ast::ForeachVar,
        collection: &Ast,
        body: &Ast,
    ) -> Result<()> {
        let scope = self.open_scope();
        let previous_breaks = std::mem::replace(&mut self.break_count, 0);
        let previous_continues = std::mem::replace(&mut self.continue_count, 0);

        self.visit(collection)?;
        self.code()
            .emit_op1(line, Opcode::NewIterator, value.by_ref as Instruction);
        let iter_index = self.add_local("$iter", line)?;
        self.code().emit_op1(line, Opcode::DefineLocal, iter_index);

        let key_index = match key {
            Some(key) => Some(self.add_local(key, line)?),
            None => None,
        };
        let value_index = self.add_local(&value.name, line)?;

        let loop_start = self.code().len();
        self.code().emit_op1(line, Opcode::GetLocal, iter_index);
        self.code().emit(line, Opcode::TestIterator);
        let exit = self.code().emit_jump(line, Opcode::JumpFalse, 0);

        if let Some(key_index) = key_index {
            self.code().emit_op1(line, Opcode::GetLocal, iter_index);
            self.code().emit(line, Opcode::NextKey);
            self.code().emit_op1(line, Opcode::DefineLocal, key_index);
        }
        self.code().emit_op1(line, Opcode::GetLocal, iter_index);
        self.code().emit(line, Opcode::NextValue);
        self.code().emit_op1(line, Opcode::DefineLocal, value_index);

        self.visit(body)?;

        self.backpatch_continues(previous_continues, Some(loop_start));
        self.code().emit_jump(line, Opcode::Jump, loop_start as i32);
        self.code().backpatch(exit);
        self.backpatch_breaks(previous_breaks);

        // The iterator slot is dead once the loop exits.
        self.code().emit_op1(line, Opcode::ClearLocal, iter_index);
        self.close_scope(scope);
        Ok(())
    }

    fn visit_function(
        &mut self,
        line: usize,
        name: &str,
        params: &[Param],
        body: &Ast,
        local: bool,
    ) -> Result<()> {
        if params.len() > MAX_PARAMS {
            return Err(RuntimeError::at_line(
                ErrorKind::Syntax,
                line,
                format!(
                    "Maximum number of parameters exceeded (limit is {})",
                    MAX_PARAMS
                ),
            ));
        }

        // Compile the body into a nested routine; parameters are its first
        // locals.
        let previous_scope = self.open_scope();
        self.builders.push(RoutineBuilder::new(Rc::from(name)));
        self.code().emit_op1(line, Opcode::NewFrame, 0);
        let frame_offset = self.code().len() - 1;
        let mut ref_flags = 0u64;
        for (i, param) in params.iter().enumerate() {
            self.add_local(&param.name, param.line)?;
            if param.by_ref {
                ref_flags |= 1 << i;
            }
        }
        self.builder().argc = params.len();
        self.builder().ref_flags = ref_flags;
        self.visit(body)?;
        let nlocal = self.builder().locals.len() as Instruction;
        self.code().patch_instruction(frame_offset, nlocal);
        self.code().emit_return();
        self.close_scope(previous_scope);
        let routine = Rc::new(self.builders.pop().expect("builder stack imbalance").finish());

        let routine_index = {
            let builder = self.builder();
            builder.routines.push(routine);
            (builder.routines.len() - 1) as Instruction
        };

        // Parameter type expressions run in the enclosing routine; the
        // closure seals them onto the nested routine on first execution.
        for param in params {
            match &param.type_expr {
                Some(type_expr) => self.visit(type_expr)?,
                None => {
                    let index = self.builder().add_string_constant("Object");
                    self.code().emit_op1(param.line, Opcode::GetGlobal, index);
                }
            }
        }
        self.code().emit_op2(
            line,
            Opcode::NewClosure,
            routine_index,
            params.len() as Instruction,
        );

        // Bind the function: a repeated name merges overloads through the
        // assignment path.
        if local || self.scope_depth > 1 {
            if let Some(index) = self.find_local(name) {
                self.code().emit_op1(line, Opcode::SetLocal, index);
            } else {
                let index = self.add_local(name, line)?;
                self.code().emit_op1(line, Opcode::DefineLocal, index);
            }
        } else {
            let index = self.builder().add_string_constant(name);
            self.code().emit_op1(line, Opcode::SetGlobal, index);
        }
        Ok(())
    }

    fn backpatch_breaks(&mut self, previous: usize) {
        for _ in 0..self.break_count {
            let at = self.break_jumps.pop().expect("break jump stack imbalance");
            self.code().backpatch(at);
        }
        self.break_count = previous;
    }

    /// Patch pending continues to `target`, or to the current offset when
    /// None (the for-loop counter update).
    fn backpatch_continues(&mut self, previous: usize, target: Option<usize>) {
        for _ in 0..self.continue_count {
            let at = self
                .continue_jumps
                .pop()
                .expect("continue jump stack imbalance");
            match target {
                Some(target) => self.code().backpatch_to(at, target as i32),
                None => self.code().backpatch(at),
            }
        }
        self.continue_count = previous;
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

/// Convenience wrapper: scan, parse and compile a source string.
pub fn compile_source(source: &str) -> Result<Rc<Routine>> {
    let ast = crate::parser::Parser::new(source)?.parse()?;
    Compiler::new().compile(&ast)
}

/// Scan, parse and compile the contents of a file.
pub fn compile_file(path: &std::path::Path) -> Result<Rc<Routine>> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| syntax_error(format!("Cannot read {}: {}", path.display(), e)))?;
    compile_source(&source)
}
