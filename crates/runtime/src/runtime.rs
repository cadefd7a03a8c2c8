//! The Merle runtime: heap, class registry, operand stack, globals.
//!
//! A runtime encapsulates one virtual machine. Several runtimes can exist
//! in a process, but a runtime must stay on the thread that created it and
//! values must never migrate between runtimes.
//!
//! Creation bootstraps the class system: Object is created first, then
//! Class (the class of classes), both headers are patched to point at
//! Class, and every other built-in type follows in dependency order.
//! Destruction runs the reverse: the stack is drained, globals dropped,
//! class member tables finalized (breaking cycles), and classes released
//! in reverse creation order with Object and Class last. The cycle
//! collector never runs while the runtime is being torn down.

use std::any::TypeId;
use std::collections::HashSet;
use std::io::Write;
use std::rc::Rc;

use merle_core::array::Array;
use merle_core::class::{attach_class_object, patch_class, Class, ClassOps, ClassRegistry};
use merle_core::error::{internal_error, Result};
use merle_core::file::File;
use merle_core::gc::GcHeap;
use merle_core::iterator::Iter;
use merle_core::list::List;
use merle_core::module::Module;
use merle_core::object::Handle;
use merle_core::regexp::Regex;
use merle_core::set::Set;
use merle_core::string::Str;
use merle_core::table::Table;
use merle_core::value::Value;

use crate::function::{Callable, Closure, Function, NativeCallback, NativeRoutine, Routine};

/// Host marker for the abstract Object class.
pub struct AnyObject;

/// Host marker for the abstract Number class (parent of Integer and
/// Float).
pub struct Number;

/// One invocation record.
pub(crate) struct CallFrame {
    /// Where to resume in the caller's code.
    pub return_ip: usize,
    pub previous_routine: Option<Rc<Routine>>,
    pub previous_closure: Option<Handle<Closure>>,
    /// Index of the first local slot on the operand stack.
    pub locals: usize,
    pub nlocal: usize,
    /// Reference bitset of the callee being prepared, consulted by the
    /// `Get*Arg` opcodes between Precall and Call.
    pub ref_flags: u64,
    /// Whether the callee value sits below the locals and must be popped
    /// when the frame unwinds.
    pub pops_callee: bool,
}

enum Output {
    Stdout,
    Capture(String),
}

pub struct Runtime {
    pub(crate) heap: Box<GcHeap>,
    pub classes: ClassRegistry,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) current_routine: Option<Rc<Routine>>,
    pub(crate) current_closure: Option<Handle<Closure>>,
    pub(crate) ip: usize,
    globals: Option<Handle<Module>>,
    strings: HashSet<Rc<str>>,
    /// Set while an indexed read must yield a reference into the
    /// container (`lst[i] = x`, `foreach ... ref v`).
    pub(crate) needs_ref: bool,
    /// Reference bitsets of calls being prepared. A nested call inside an
    /// argument list pushes and pops its own entry, so the outer call's
    /// remaining arguments still bind with the outer callee's flags.
    pub(crate) precall_flags: Vec<u64>,
    output: Output,
    pub(crate) get_item_name: Rc<str>,
    pub(crate) set_item_name: Rc<str>,
    pub(crate) get_field_name: Rc<str>,
    pub(crate) set_field_name: Rc<str>,
    pub(crate) init_name: Rc<str>,
}

impl Runtime {
    pub fn new() -> Runtime {
        let mut rt = Runtime {
            heap: GcHeap::new(),
            classes: ClassRegistry::new(),
            stack: Vec::with_capacity(1024),
            frames: Vec::new(),
            current_routine: None,
            current_closure: None,
            ip: 0,
            globals: None,
            strings: HashSet::new(),
            needs_ref: false,
            precall_flags: Vec::new(),
            output: Output::Stdout,
            get_item_name: Rc::from("get_item"),
            set_item_name: Rc::from("set_item"),
            get_field_name: Rc::from("get_field"),
            set_field_name: Rc::from("set_field"),
            init_name: Rc::from("init"),
        };
        for name in ["get_item", "set_item", "get_field", "set_field", "init"] {
            rt.strings.insert(Rc::from(name));
        }
        rt.create_builtins();
        crate::builtins::register(&mut rt).expect("standard library registration failed");
        tracing::debug!(classes = rt.classes.len(), "runtime bootstrapped");
        rt
    }

    //-- class system -------------------------------------------------------

    fn create_builtins(&mut self) {
        self.heap.suspend();

        // Bootstrap: Object exists before Class, Class describes both.
        let object_class = self.heap.alloc_orphan(
            false,
            Class::new(
                "Object",
                None,
                TypeId::of::<AnyObject>(),
                false,
                ClassOps::new::<AnyObject>(),
            ),
        );
        attach_class_object(&object_class);
        let class_class = self.heap.alloc_orphan(
            false,
            Class::new(
                "Class",
                Some(&object_class),
                TypeId::of::<Class>(),
                false,
                ClassOps::new::<Class>().with_display::<Class>(),
            ),
        );
        attach_class_object(&class_class);
        patch_class(&object_class, &class_class);
        patch_class(&class_class, &class_class);
        debug_assert!(class_class.inherits(&object_class));
        self.classes.register(object_class.clone());
        self.classes.register(class_class);

        let number_class = self.create_type::<Number>(
            "Number",
            &object_class,
            false,
            ClassOps::new::<Number>(),
        );
        self.create_type::<()>("Null", &object_class, false, ClassOps::new::<()>());
        self.create_type::<bool>("Boolean", &object_class, false, ClassOps::new::<bool>());
        self.create_type::<i64>("Integer", &number_class, false, ClassOps::new::<i64>());
        self.create_type::<f64>("Float", &number_class, false, ClassOps::new::<f64>());
        self.create_type::<Str>("String", &object_class, false, ClassOps::new::<Str>());
        self.create_type::<Regex>(
            "Regex",
            &object_class,
            false,
            ClassOps::new::<Regex>().with_display::<Regex>(),
        );
        self.create_type::<List>(
            "List",
            &object_class,
            true,
            ClassOps::new::<List>()
                .with_traverse::<List>()
                .with_display::<List>()
                .with_clone::<List>()
                .with_equal::<List>()
                .with_compare::<List>(),
        );
        self.create_type::<Array>(
            "Array",
            &object_class,
            false,
            ClassOps::new::<Array>()
                .with_display::<Array>()
                .with_clone::<Array>()
                .with_equal::<Array>(),
        );
        self.create_type::<Table>(
            "Table",
            &object_class,
            true,
            ClassOps::new::<Table>()
                .with_traverse::<Table>()
                .with_display::<Table>()
                .with_clone::<Table>()
                .with_equal::<Table>(),
        );
        self.create_type::<Set>(
            "Set",
            &object_class,
            true,
            ClassOps::new::<Set>()
                .with_traverse::<Set>()
                .with_display::<Set>()
                .with_clone::<Set>()
                .with_equal::<Set>(),
        );
        self.create_type::<File>(
            "File",
            &object_class,
            false,
            ClassOps::new::<File>().with_display::<File>(),
        );
        self.create_type::<Module>(
            "Module",
            &object_class,
            true,
            ClassOps::new::<Module>()
                .with_traverse::<Module>()
                .with_display::<Module>(),
        );
        // Function and Closure share a user-visible name; the split is an
        // implementation detail.
        self.create_type::<Function>(
            "Function",
            &object_class,
            true,
            ClassOps::new::<Function>()
                .with_traverse::<Function>()
                .with_display::<Function>(),
        );
        self.create_type::<Closure>(
            "Function",
            &object_class,
            true,
            ClassOps::new::<Closure>()
                .with_traverse::<Closure>()
                .with_display::<Closure>(),
        );
        // Iterators are not exposed to users.
        self.create_type::<Iter>("Iterator", &object_class, false, ClassOps::new::<Iter>());

        let module_class = self.classes.handle_of::<Module>();
        let globals = self.heap.alloc(&module_class, Module::new("global"));
        self.globals = Some(globals);

        for name in [
            "Object", "Number", "Boolean", "Integer", "Float", "String", "Regex", "List",
            "Array", "Table", "Set", "File", "Function", "Module",
        ] {
            let class = self.find_class_by_name(name);
            if let Some(class) = class {
                self.add_global(name, class);
            }
        }

        self.heap.resume();
    }

    pub fn create_type<T: 'static>(
        &mut self,
        name: &str,
        parent: &Class,
        collectable_instances: bool,
        ops: ClassOps,
    ) -> Handle<Class> {
        let meta = self.classes.handle_of::<Class>();
        let payload = Class::new(name, Some(parent), TypeId::of::<T>(), collectable_instances, ops);
        let handle = self.heap.alloc(&meta, payload);
        attach_class_object(&handle);
        self.classes.register(handle.clone());
        handle
    }

    fn find_class_by_name(&self, name: &str) -> Option<Value> {
        for i in 0..self.classes.len() {
            let class = self.classes.get_index(i);
            if class.name() == name {
                return Some(class.class_value());
            }
        }
        None
    }

    //-- allocation ---------------------------------------------------------

    /// Box a value of a registered host type.
    pub fn make<T: 'static>(&self, value: T) -> Handle<T> {
        let class = self.classes.get::<T>();
        self.heap.alloc(class, value)
    }

    pub(crate) fn make_closure(&self, callable: Callable, upvalues: Vec<Value>) -> Handle<Closure> {
        self.make(Closure::new(callable, upvalues))
    }

    pub(crate) fn make_function(
        &self,
        name: Rc<str>,
        closure: Handle<Closure>,
    ) -> Result<Handle<Function>> {
        let function = self.make(Function::new(name));
        function.add_closure(closure)?;
        Ok(function)
    }

    //-- globals and interning ----------------------------------------------

    pub fn intern(&mut self, s: &str) -> Rc<str> {
        match self.strings.get(s) {
            Some(existing) => existing.clone(),
            None => {
                let interned: Rc<str> = Rc::from(s);
                self.strings.insert(interned.clone());
                interned
            }
        }
    }

    pub(crate) fn globals(&self) -> Handle<Module> {
        self.globals.clone().expect("runtime has been torn down")
    }

    pub fn add_global(&mut self, name: &str, value: Value) {
        let name = self.intern(name);
        self.globals().insert(name, value);
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals().get(name)
    }

    /// Register a native function as a global, merging with an existing
    /// generic function of the same name (that is how overloads
    /// accumulate).
    pub fn add_native(
        &mut self,
        name: &str,
        callback: NativeCallback,
        signature: Vec<Handle<Class>>,
        ref_flags: u64,
    ) -> Result<()> {
        let name = self.intern(name);
        let routine = NativeRoutine {
            name: name.clone(),
            callback,
            signature,
            ref_flags,
        };
        let closure = self.make_closure(Callable::Native(routine), Vec::new());
        let globals = self.globals();
        match globals.get(&name) {
            Some(existing) if existing.is::<Function>() => {
                existing.handle::<Function>()?.add_closure(closure)
            }
            _ => {
                let function = self.make_function(name.clone(), closure)?;
                globals.insert(name, Value::from(function));
                Ok(())
            }
        }
    }

    /// Register a native method in a class's member table (`init`,
    /// `get_item`, `set_item`, `get_field`, ...).
    pub fn add_method(
        &mut self,
        class: &Handle<Class>,
        name: &str,
        callback: NativeCallback,
        signature: Vec<Handle<Class>>,
        ref_flags: u64,
    ) -> Result<()> {
        let name = self.intern(name);
        let routine = NativeRoutine {
            name: name.clone(),
            callback,
            signature,
            ref_flags,
        };
        let closure = self.make_closure(Callable::Native(routine), Vec::new());
        match class.get_member(&name) {
            Some(existing) if existing.is::<Function>() => {
                existing.handle::<Function>()?.add_closure(closure)
            }
            _ => {
                let function = self.make_function(name.clone(), closure)?;
                class.set_member(name, Value::from(function));
                Ok(())
            }
        }
    }

    //-- execution services -------------------------------------------------

    /// Wrap a compiled module routine into a closure and run it.
    pub fn run_routine(&mut self, routine: Rc<Routine>) -> Result<Value> {
        if routine.argc != 0 {
            return Err(internal_error("a module routine takes no arguments"));
        }
        routine.seal();
        let closure = self.make_closure(Callable::User(routine), Vec::new());
        self.interpret(&closure)
    }

    pub fn needs_reference(&self) -> bool {
        self.needs_ref
    }

    pub fn collect(&self) -> usize {
        self.heap.collect()
    }

    pub fn gc_candidate_count(&self) -> usize {
        self.heap.candidate_count()
    }

    pub fn suspend_gc(&self) {
        self.heap.suspend();
    }

    pub fn resume_gc(&self) {
        self.heap.resume();
    }

    //-- output -------------------------------------------------------------

    /// Redirect `print` output into an internal buffer (for tests and
    /// embedders).
    pub fn capture_output(&mut self) {
        self.output = Output::Capture(String::new());
    }

    pub fn take_output(&mut self) -> String {
        match &mut self.output {
            Output::Capture(buffer) => std::mem::take(buffer),
            Output::Stdout => String::new(),
        }
    }

    pub(crate) fn print_str(&mut self, s: &str) {
        match &mut self.output {
            Output::Stdout => {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                let _ = lock.write_all(s.as_bytes());
            }
            Output::Capture(buffer) => buffer.push_str(s),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // No cycle collection during teardown.
        self.heap.suspend();
        self.stack.clear();
        self.frames.clear();
        self.current_routine = None;
        self.current_closure = None;
        self.globals = None;
        self.classes.teardown();
    }
}
