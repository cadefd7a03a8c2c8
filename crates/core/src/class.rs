//! Class descriptors.
//!
//! Each heap object stores a pointer to its class, which provides runtime
//! type information and the polymorphic operations (destroy, hash, traverse,
//! clone, to_string, compare, equal). Classes are objects too: they live in
//! heap cells like everything else so that a class can be pushed on the
//! operand stack, passed to a function, or used as a constructor.
//!
//! A class records its full inheritance chain, root first, self last. The
//! chain makes `inherits` and type distance constant-time:
//! `chain[base.depth] == base` iff the class inherits from `base`.

use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::error::{internal_error, Result};
use crate::object::{alloc_raw, Color, Handle, Header, ObjRef, TObject};
use crate::value::Value;

/// Polymorphic operation slots. A missing slot means the operation is not
/// supported by the type; callers surface that as a TypeError.
pub struct ClassOps {
    pub(crate) drop_value: unsafe fn(*mut Header),
    pub(crate) free: unsafe fn(*mut Header),
    pub(crate) hash: Option<unsafe fn(*const Header) -> u64>,
    pub(crate) traverse: Option<unsafe fn(*mut Header, &mut dyn FnMut(&Value))>,
    pub(crate) clone: Option<unsafe fn(*const Header) -> *mut Header>,
    pub(crate) to_string: Option<unsafe fn(*const Header, bool, bool) -> Result<String>>,
    pub(crate) compare: Option<unsafe fn(*const Header, *const Header) -> Result<Ordering>>,
    pub(crate) equal: Option<unsafe fn(*const Header, *const Header) -> Result<bool>>,
}

/// Traversal of owned values, implemented by every collectable type.
pub trait Traverse {
    fn traverse(&self, f: &mut dyn FnMut(&Value));
}

/// String conversion. `seen` is true when the object is already being
/// printed further up the call chain (a cycle).
pub trait VmDisplay {
    fn display(&self, quote: bool, seen: bool) -> Result<String>;
}

pub trait VmCompare {
    fn compare_values(&self, other: &Self) -> Result<Ordering>;
}

pub trait VmEqual {
    fn equal_values(&self, other: &Self) -> Result<bool>;
}

pub trait VmHash {
    fn hash_value(&self) -> u64;
}

unsafe fn drop_value_impl<T>(h: *mut Header) {
    let obj = h as *mut TObject<T>;
    ManuallyDrop::drop(&mut (*obj).value);
}

unsafe fn free_impl<T>(h: *mut Header) {
    drop(Box::from_raw(h as *mut TObject<T>));
}

unsafe fn traverse_impl<T: Traverse>(h: *mut Header, f: &mut dyn FnMut(&Value)) {
    (*(h as *const TObject<T>)).value.traverse(f);
}

unsafe fn display_impl<T: VmDisplay>(h: *const Header, quote: bool, seen: bool) -> Result<String> {
    (*(h as *const TObject<T>)).value.display(quote, seen)
}

unsafe fn compare_impl<T: VmCompare>(a: *const Header, b: *const Header) -> Result<Ordering> {
    let a = &*(a as *const TObject<T>);
    let b = &*(b as *const TObject<T>);
    a.value.compare_values(&b.value)
}

unsafe fn equal_impl<T: VmEqual>(a: *const Header, b: *const Header) -> Result<bool> {
    let a = &*(a as *const TObject<T>);
    let b = &*(b as *const TObject<T>);
    a.value.equal_values(&b.value)
}

unsafe fn hash_impl<T: VmHash>(h: *const Header) -> u64 {
    (*(h as *const TObject<T>)).value.hash_value()
}

unsafe fn clone_impl<T: Clone + 'static>(h: *const Header) -> *mut Header {
    let obj = &*(h as *const TObject<T>);
    let hdr = &obj.header;
    let copy: T = (*obj.value).clone();
    let collectable = hdr.color.get() != Color::Green;
    alloc_raw::<T>(hdr.class.get(), hdr.heap, collectable, copy).as_ptr() as *mut Header
}

impl ClassOps {
    pub fn new<T: 'static>() -> Self {
        ClassOps {
            drop_value: drop_value_impl::<T>,
            free: free_impl::<T>,
            hash: None,
            traverse: None,
            clone: None,
            to_string: None,
            compare: None,
            equal: None,
        }
    }

    pub fn with_traverse<T: Traverse>(mut self) -> Self {
        self.traverse = Some(traverse_impl::<T>);
        self
    }

    pub fn with_display<T: VmDisplay>(mut self) -> Self {
        self.to_string = Some(display_impl::<T>);
        self
    }

    pub fn with_compare<T: VmCompare>(mut self) -> Self {
        self.compare = Some(compare_impl::<T>);
        self
    }

    pub fn with_equal<T: VmEqual>(mut self) -> Self {
        self.equal = Some(equal_impl::<T>);
        self
    }

    pub fn with_hash<T: VmHash>(mut self) -> Self {
        self.hash = Some(hash_impl::<T>);
        self
    }

    pub fn with_clone<T: Clone + 'static>(mut self) -> Self {
        self.clone = Some(clone_impl::<T>);
        self
    }
}

//---------------------------------------------------------------------------

/// A runtime type descriptor.
pub struct Class {
    name: Rc<str>,
    /// Inheritance depth: 0 for Object, 1 for its direct subclasses, etc.
    depth: usize,
    /// Inheritance chain, root first, self last. Self is appended after the
    /// class object has been allocated (its payload address is only stable
    /// then), which is why the vector sits behind a RefCell.
    bases: RefCell<Vec<*const Class>>,
    /// Host representation, for safe downcasts of instances.
    host: TypeId,
    /// Whether instances of this class take part in cycle collection.
    instances_collectable: bool,
    /// Back-pointer to the heap cell this class lives in.
    object: Cell<*mut Header>,
    /// Member table: constructors (`init`), item/field accessors, methods.
    members: RefCell<HashMap<Rc<str>, Value>>,
    pub(crate) ops: ClassOps,
}

impl Class {
    pub fn new(
        name: impl Into<Rc<str>>,
        parent: Option<&Class>,
        host: TypeId,
        instances_collectable: bool,
        ops: ClassOps,
    ) -> Self {
        let bases = match parent {
            Some(p) => p.bases.borrow().clone(),
            None => Vec::new(),
        };
        let depth = bases.len();
        Class {
            name: name.into(),
            depth,
            bases: RefCell::new(bases),
            host,
            instances_collectable,
            object: Cell::new(std::ptr::null_mut()),
            members: RefCell::new(HashMap::new()),
            ops,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn host_type(&self) -> TypeId {
        self.host
    }

    pub fn instances_collectable(&self) -> bool {
        self.instances_collectable
    }

    pub fn inherits(&self, base: &Class) -> bool {
        let bases = self.bases.borrow();
        bases.get(base.depth) == Some(&(base as *const Class))
    }

    /// Distance from this class to an ancestor, or None if `base` is not an
    /// ancestor.
    pub fn distance(&self, base: &Class) -> Option<usize> {
        if self.inherits(base) {
            Some(self.depth - base.depth)
        } else {
            None
        }
    }

    pub fn same(&self, other: &Class) -> bool {
        std::ptr::eq(self, other)
    }

    pub fn get_member(&self, name: &str) -> Option<Value> {
        self.members.borrow().get(name).cloned()
    }

    pub fn set_member(&self, name: impl Into<Rc<str>>, value: Value) {
        self.members.borrow_mut().insert(name.into(), value);
    }

    pub fn member_names(&self) -> Vec<Rc<str>> {
        self.members.borrow().keys().cloned().collect()
    }

    /// Break member-table cycles before classes themselves are released.
    pub fn finalize(&self) {
        self.members.borrow_mut().clear();
    }

    /// The heap cell wrapping this class, as a value.
    pub fn class_value(&self) -> Value {
        let ptr = self.object.get();
        debug_assert!(!ptr.is_null(), "class object pointer not attached");
        let obj = unsafe { ObjRef::from_raw_retained(NonNull::new_unchecked(ptr)) };
        Value::Object(obj)
    }

    /// A typed handle to this class's own heap cell.
    pub fn handle(&self) -> Handle<Class> {
        let ptr = self.object.get();
        debug_assert!(!ptr.is_null(), "class object pointer not attached");
        unsafe {
            crate::object::retain(ptr);
            Handle::from_raw(NonNull::new_unchecked(ptr as *mut TObject<Class>))
        }
    }
}

impl Traverse for Class {
    fn traverse(&self, f: &mut dyn FnMut(&Value)) {
        for value in self.members.borrow().values() {
            f(value);
        }
    }
}

impl VmDisplay for Class {
    fn display(&self, quote: bool, _seen: bool) -> Result<String> {
        let s = format!("<class {}>", self.name);
        Ok(if quote { format!("\"{}\"", s) } else { s })
    }
}

/// Finish registering a freshly allocated class object: append the payload's
/// now-stable address to its own inheritance chain and attach the
/// back-pointer to the heap cell.
pub fn attach_class_object(handle: &Handle<Class>) {
    let class: &Class = handle;
    class.object.set(handle.raw());
    class.bases.borrow_mut().push(class as *const Class);
}

/// Point an object's header at its class. Used while bootstrapping the
/// class system, where Object and Class exist before the class of classes
/// does.
pub fn patch_class<T: 'static>(handle: &Handle<T>, class: &Class) {
    unsafe { (*handle.raw()).class.set(class as *const Class) };
}

//---------------------------------------------------------------------------

/// Process-wide-per-runtime list of classes, looked up by host type so that
/// literals and built-in operations find their class in O(1).
pub struct ClassRegistry {
    classes: Vec<Handle<Class>>,
    by_type: HashMap<TypeId, usize>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        ClassRegistry {
            classes: Vec::new(),
            by_type: HashMap::new(),
        }
    }

    pub fn register(&mut self, handle: Handle<Class>) {
        let host = handle.host_type();
        let index = self.classes.len();
        self.classes.push(handle);
        // First registration wins: several iterator classes share a host
        // type in the original design, but lookups only need the first.
        self.by_type.entry(host).or_insert(index);
    }

    pub fn lookup<T: 'static>(&self) -> Result<&Handle<Class>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|&i| &self.classes[i])
            .ok_or_else(|| internal_error("type is not registered with the runtime"))
    }

    /// Class for a statically known host type. Bootstrap guarantees every
    /// built-in type is registered before it is used.
    pub fn get<T: 'static>(&self) -> &Class {
        self.lookup::<T>()
            .expect("type is not registered with the runtime")
    }

    pub fn handle_of<T: 'static>(&self) -> Handle<Class> {
        self.lookup::<T>()
            .expect("type is not registered with the runtime")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn get_index(&self, i: usize) -> &Handle<Class> {
        &self.classes[i]
    }

    /// Finalize member tables and drop classes in reverse creation order.
    /// Object and Class were created first, so they go last; Object drops
    /// before Class, whose descriptor must stay alive to destroy it.
    pub fn teardown(&mut self) {
        for class in &self.classes {
            class.finalize();
        }
        while self.classes.len() > 2 {
            self.classes.pop();
        }
        if !self.classes.is_empty() {
            let object_class = self.classes.remove(0);
            drop(object_class);
        }
        self.classes.pop();
        self.by_type.clear();
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}
