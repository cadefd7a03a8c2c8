//! Functions, overloads and multiple dispatch.
//!
//! A user-visible function is a *generic function* ([`Function`]): an
//! ordered list of overloads, each a [`Closure`] pairing a callable body
//! with its captured upvalue cells. The body is either a [`NativeRoutine`]
//! (a Rust callback) or a compiled [`Routine`] (bytecode plus constant
//! pools, locals table and upvalue descriptors).
//!
//! Dispatch picks the overload whose signature is cheapest for the actual
//! argument classes, where the cost of one argument is its class's
//! distance to the parameter class along the inheritance chain. Null
//! matches any parameter at distance zero. Ties are ambiguity errors.

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

use merle_core::class::{Class, ClassRegistry, Traverse, VmDisplay};
use merle_core::code::{Code, Instruction};
use merle_core::error::{name_error, reference_error, type_error, Result};
use merle_core::object::Handle;
use merle_core::value::Value;

use crate::runtime::Runtime;

/// Hard limit on positional parameters; the reference bitset is one
/// machine word.
pub const MAX_PARAMS: usize = 64;

/// A native callback: receives the runtime and the argument window.
pub type NativeCallback = fn(&mut Runtime, &mut [Value]) -> Result<Value>;

/// A named local slot, recorded for scope resolution and disassembly.
pub struct Local {
    pub name: Rc<str>,
    /// Scope identifier, unique per block, to distinguish same-name locals
    /// in sibling blocks.
    pub scope: u32,
    /// Lexical nesting depth at declaration.
    pub depth: u32,
}

/// A non-local variable captured by an inner routine. If `is_local`, the
/// captured cell is a local of the enclosing routine; otherwise it is the
/// enclosing routine's upvalue at `index`. Chains always terminate on a
/// genuine local.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct UpvalueSlot {
    pub index: Instruction,
    pub is_local: bool,
}

/// A routine implemented in Rust.
pub struct NativeRoutine {
    pub name: Rc<str>,
    pub callback: NativeCallback,
    pub signature: Vec<Handle<Class>>,
    pub ref_flags: u64,
}

/// A compiled function body.
pub struct Routine {
    pub name: Rc<str>,
    pub code: Code,
    pub integer_pool: Vec<i64>,
    pub float_pool: Vec<f64>,
    pub string_pool: Vec<Rc<str>>,
    /// Nested function bodies, referenced by `NewClosure`.
    pub routine_pool: Vec<Rc<Routine>>,
    pub locals: Vec<Local>,
    pub upvalues: Vec<UpvalueSlot>,
    pub argc: usize,
    /// Bit i set means parameter i is passed by reference.
    pub ref_flags: u64,
    /// Parameter classes; empty until the routine is sealed by the first
    /// `NewClosure` that runs over it.
    signature: RefCell<Vec<Handle<Class>>>,
    sealed: Cell<bool>,
}

impl Routine {
    pub fn new(
        name: Rc<str>,
        code: Code,
        integer_pool: Vec<i64>,
        float_pool: Vec<f64>,
        string_pool: Vec<Rc<str>>,
        routine_pool: Vec<Rc<Routine>>,
        locals: Vec<Local>,
        upvalues: Vec<UpvalueSlot>,
        argc: usize,
        ref_flags: u64,
    ) -> Self {
        Routine {
            name,
            code,
            integer_pool,
            float_pool,
            string_pool,
            routine_pool,
            locals,
            upvalues,
            argc,
            ref_flags,
            signature: RefCell::new(Vec::new()),
            sealed: Cell::new(false),
        }
    }

    pub fn get_integer(&self, index: usize) -> i64 {
        self.integer_pool[index]
    }

    pub fn get_float(&self, index: usize) -> f64 {
        self.float_pool[index]
    }

    pub fn get_string(&self, index: usize) -> Rc<str> {
        self.string_pool[index].clone()
    }

    pub fn get_routine(&self, index: usize) -> Rc<Routine> {
        self.routine_pool[index].clone()
    }

    pub fn get_local_name(&self, index: usize) -> Rc<str> {
        self.locals[index].name.clone()
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    pub fn sealed(&self) -> bool {
        self.sealed.get()
    }

    pub fn seal(&self) {
        self.sealed.set(true);
    }

    pub fn add_parameter_type(&self, class: Handle<Class>) {
        self.signature.borrow_mut().push(class);
    }

    pub fn signature(&self) -> Ref<'_, Vec<Handle<Class>>> {
        self.signature.borrow()
    }
}

/// One overload body: native or compiled.
pub enum Callable {
    Native(NativeRoutine),
    User(Rc<Routine>),
}

impl Callable {
    pub fn name(&self) -> Rc<str> {
        match self {
            Callable::Native(n) => n.name.clone(),
            Callable::User(r) => r.name.clone(),
        }
    }

    pub fn arg_count(&self) -> usize {
        match self {
            Callable::Native(n) => n.signature.len(),
            Callable::User(r) => r.argc,
        }
    }

    pub fn ref_flags(&self) -> u64 {
        match self {
            Callable::Native(n) => n.ref_flags,
            Callable::User(r) => r.ref_flags,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Callable::Native(_))
    }

    fn with_signature<T>(&self, f: impl FnOnce(&[Handle<Class>]) -> T) -> T {
        match self {
            Callable::Native(n) => f(&n.signature),
            Callable::User(r) => f(&r.signature.borrow()),
        }
    }

    /// Dispatch cost for the given arguments: the sum of class distances,
    /// or None when an argument does not satisfy its parameter class.
    pub fn get_cost(&self, args: &[Value], registry: &ClassRegistry) -> Option<u32> {
        self.with_signature(|signature| {
            let mut cost = 0u32;
            for (arg, param) in args.iter().zip(signature.iter()) {
                // Null is assignable to any parameter.
                if arg.resolve().is_null() {
                    continue;
                }
                let class = arg.class_of(registry);
                cost += class.distance(param)? as u32;
            }
            Some(cost)
        })
    }

    /// Signature rendered for error messages: `name(Integer, ref List)`.
    pub fn get_definition(&self) -> String {
        let ref_flags = self.ref_flags();
        self.with_signature(|signature| {
            let params: Vec<String> = signature
                .iter()
                .enumerate()
                .map(|(i, class)| {
                    if ref_flags & (1 << i) != 0 {
                        format!("ref {}", class.name())
                    } else {
                        class.name().to_string()
                    }
                })
                .collect();
            format!("{}({})", self.name(), params.join(", "))
        })
    }

    fn same_signature(&self, other: &Callable) -> bool {
        if self.arg_count() != other.arg_count() {
            return false;
        }
        self.with_signature(|a| {
            other.with_signature(|b| {
                a.iter()
                    .zip(b.iter())
                    .all(|(x, y)| x.ptr_eq(y))
            })
        })
    }
}

/// A callable bound to its captured environment. The upvalue cells are
/// alias cells created when the closure is constructed, so they outlive
/// the frame that spawned them.
pub struct Closure {
    pub callable: Callable,
    pub upvalues: RefCell<Vec<Value>>,
}

impl Closure {
    pub fn new(callable: Callable, upvalues: Vec<Value>) -> Self {
        Closure {
            callable,
            upvalues: RefCell::new(upvalues),
        }
    }
}

impl Traverse for Closure {
    fn traverse(&self, f: &mut dyn FnMut(&Value)) {
        for cell in self.upvalues.borrow().iter() {
            f(cell);
        }
    }
}

impl VmDisplay for Closure {
    fn display(&self, quote: bool, _seen: bool) -> Result<String> {
        let s = format!("<function {}>", self.callable.name());
        Ok(if quote { format!("\"{}\"", s) } else { s })
    }
}

/// A generic function: an ordered set of overloads sharing a name.
pub struct Function {
    name: Rc<str>,
    /// Overloads sorted by ascending parameter count.
    closures: RefCell<Vec<Handle<Closure>>>,
    /// Reference bitset of the widest overload; all overloads must agree
    /// on the common prefix.
    ref_flags: Cell<u64>,
    max_argc: Cell<usize>,
}

impl Function {
    pub fn new(name: Rc<str>) -> Self {
        Function {
            name,
            closures: RefCell::new(Vec::new()),
            ref_flags: Cell::new(0),
            max_argc: Cell::new(0),
        }
    }

    pub fn name(&self) -> Rc<str> {
        self.name.clone()
    }

    pub fn ref_flags(&self) -> u64 {
        self.ref_flags.get()
    }

    pub fn max_argc(&self) -> usize {
        self.max_argc.get()
    }

    pub fn overload_count(&self) -> usize {
        self.closures.borrow().len()
    }

    pub fn overloads(&self) -> Ref<'_, Vec<Handle<Closure>>> {
        self.closures.borrow()
    }

    /// Add an overload, enforcing reference consistency: a positional
    /// argument must be passed the same way (value or reference) by every
    /// overload.
    pub fn add_closure(&self, closure: Handle<Closure>) -> Result<()> {
        {
            let closures = self.closures.borrow();
            if closures.iter().any(|c| c.ptr_eq(&closure)) {
                return Ok(());
            }
            let new_flags = closure.callable.ref_flags();
            let argc = self.max_argc.get().min(closure.callable.arg_count());
            for i in 0..argc {
                let expected = self.ref_flags.get() & (1 << i) != 0;
                if (new_flags & (1 << i) != 0) != expected {
                    return Err(reference_error(format!(
                        "This overload of function \"{}\" is not consistent with previous \
                         definitions: parameter {} must be passed by {}",
                        self.name,
                        i + 1,
                        if expected { "reference" } else { "value" }
                    )));
                }
            }
            for existing in closures.iter() {
                if existing.callable.same_signature(&closure.callable) {
                    return Err(name_error(format!(
                        "Function {} is already defined",
                        closure.callable.get_definition()
                    )));
                }
            }
        }

        if closure.callable.arg_count() > self.max_argc.get() {
            self.ref_flags.set(closure.callable.ref_flags());
            self.max_argc.set(closure.callable.arg_count());
        }

        let mut closures = self.closures.borrow_mut();
        let argc = closure.callable.arg_count();
        let at = closures
            .iter()
            .position(|c| argc < c.callable.arg_count())
            .unwrap_or(closures.len());
        closures.insert(at, closure);
        Ok(())
    }

    /// Merge another function's overloads into this one. This is what a
    /// second `function f(...)` definition under an existing name does.
    pub fn merge_from(&self, other: &Function) -> Result<()> {
        let others: Vec<Handle<Closure>> = other.closures.borrow().clone();
        for closure in others {
            self.add_closure(closure)?;
        }
        Ok(())
    }

    /// Select the overload with the unique cheapest signature for `args`.
    pub fn find_closure(
        &self,
        args: &[Value],
        registry: &ClassRegistry,
    ) -> Result<Handle<Closure>> {
        let closures = self.closures.borrow();
        debug_assert!(!closures.is_empty());
        let mut best_cost = u32::MAX;
        let mut candidate: Option<&Handle<Closure>> = None;
        let mut conflict = false;

        for closure in closures.iter() {
            let argc = closure.callable.arg_count();
            if argc < args.len() {
                continue;
            }
            if argc > args.len() {
                // Overloads are sorted by parameter count: no better match
                // can follow.
                break;
            }
            let cost = match closure.callable.get_cost(args, registry) {
                Some(cost) => cost,
                None => continue,
            };
            if cost == 0 {
                // There can only be one exact match.
                return Ok(closure.clone());
            }
            if cost < best_cost {
                best_cost = cost;
                candidate = Some(closure);
                conflict = false;
            } else if cost == best_cost {
                conflict = true;
            }
        }

        if conflict {
            let ambiguous: Vec<String> = closures
                .iter()
                .filter(|c| {
                    c.callable.arg_count() == args.len()
                        && c.callable.get_cost(args, registry) == Some(best_cost)
                })
                .map(|c| c.callable.get_definition())
                .collect();
            return Err(type_error(format!(
                "Ambiguous call to function '{}' with argument types ({}).\nCandidates are:\n{}",
                self.name,
                type_tuple(args),
                ambiguous.join("\n")
            )));
        }

        match candidate {
            Some(c) => Ok(c.clone()),
            None => {
                let candidates: Vec<String> = closures
                    .iter()
                    .map(|c| c.callable.get_definition())
                    .collect();
                Err(type_error(format!(
                    "Cannot resolve call to function '{}' with the following argument types: \
                     ({}).\nCandidates are:\n{}",
                    self.name,
                    type_tuple(args),
                    candidates.join("\n")
                )))
            }
        }
    }
}

fn type_tuple(args: &[Value]) -> String {
    args.iter()
        .map(|a| a.class_name())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Traverse for Function {
    fn traverse(&self, f: &mut dyn FnMut(&Value)) {
        for closure in self.closures.borrow().iter() {
            closure.with_value_view(f);
        }
    }
}

impl VmDisplay for Function {
    fn display(&self, quote: bool, _seen: bool) -> Result<String> {
        let s = format!("<function {} at {:p}>", self.name, self);
        Ok(if quote { format!("\"{}\"", s) } else { s })
    }
}
