//! Boxed heap objects.
//!
//! Every non-primitive Merle value lives in a heap cell made of a [`Header`]
//! followed by the typed payload. The header carries the object's class (for
//! runtime type information and polymorphic operations), a reference count,
//! and the colour used by the cycle collector. Objects are moved in and out
//! of raw pointers with `Box::into_raw`/`Box::from_raw`; the typed
//! [`Handle<T>`] and the erased [`ObjRef`] manage the reference count so the
//! rest of the crate never touches it directly.
//!
//! Acyclic types (strings live unboxed, but e.g. Regex, File, iterators) are
//! Green: they are destroyed the instant their count reaches zero and are
//! never candidates for cycle collection. Container types start Black and
//! may transition through Purple/Grey/White while the collector runs.

use std::any::TypeId;
use std::cell::Cell;
use std::cmp::Ordering;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::class::Class;
use crate::error::{cast_error, Result};
use crate::gc::GcHeap;
use crate::value::Value;

/// Colour for the cycle collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// Acyclic object, never a cycle candidate.
    Green,
    /// Assumed to be alive.
    Black,
    /// Possible member of a cycle (trial deletion in progress).
    Grey,
    /// Possibly dead.
    White,
    /// Root candidate for a cycle.
    Purple,
}

/// While the collector destroys a dead cycle, members get their count set to
/// this value so that releases coming from sibling destructors can never
/// re-enter destruction.
pub(crate) const REFCOUNT_GUARD: u32 = 1 << 30;
pub(crate) const GUARD_FLOOR: u32 = 1 << 29;

/// Header shared by every heap object.
pub struct Header {
    /// The object's class; a non-owning back-reference. Null only while the
    /// class system itself is being bootstrapped.
    pub(crate) class: Cell<*const Class>,
    pub(crate) ref_count: Cell<u32>,
    pub(crate) color: Cell<Color>,
    /// True while the object sits in the collector's candidate list.
    pub(crate) buffered: Cell<bool>,
    /// Cycle guard for `to_string` on self-referencing containers.
    pub(crate) seen: Cell<bool>,
    /// Doubly-linked candidate list.
    pub(crate) prev: Cell<*mut Header>,
    pub(crate) next: Cell<*mut Header>,
    /// Heap this object is attached to; null for Green objects.
    pub(crate) heap: *const GcHeap,
}

/// A typed heap cell: header + payload. The payload is wrapped in
/// `ManuallyDrop` because the collector needs to run payload destructors and
/// release the memory in two separate passes when it frees a cycle.
#[repr(C)]
pub struct TObject<T> {
    pub(crate) header: Header,
    pub(crate) value: ManuallyDrop<T>,
}

/// Strip the module path off a Rust type name ("merle_core::list::List" ->
/// "List"); used in cast error messages, where it coincides with the class
/// name of every built-in type.
pub(crate) fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

pub(crate) unsafe fn alloc_raw<T: 'static>(
    class: *const Class,
    heap: *const GcHeap,
    collectable: bool,
    value: T,
) -> NonNull<TObject<T>> {
    let obj = Box::new(TObject {
        header: Header {
            class: Cell::new(class),
            ref_count: Cell::new(1),
            color: Cell::new(if collectable { Color::Black } else { Color::Green }),
            buffered: Cell::new(false),
            seen: Cell::new(false),
            prev: Cell::new(std::ptr::null_mut()),
            next: Cell::new(std::ptr::null_mut()),
            heap: if collectable { heap } else { std::ptr::null() },
        },
        value: ManuallyDrop::new(value),
    });
    NonNull::new_unchecked(Box::into_raw(obj))
}

pub(crate) unsafe fn retain(h: *mut Header) {
    let rc = (*h).ref_count.get();
    (*h).ref_count.set(rc + 1);
}

pub(crate) unsafe fn release(h: *mut Header) {
    let hdr = &*h;
    let rc = hdr.ref_count.get();
    debug_assert!(rc > 0, "released a dead object");
    if rc > GUARD_FLOOR {
        // The collector is tearing this object down; siblings in the dying
        // cycle must not trigger a second destruction.
        hdr.ref_count.set(rc - 1);
        return;
    }
    if rc == 1 {
        destroy(h);
    } else {
        hdr.ref_count.set(rc - 1);
        let color = hdr.color.get();
        if color != Color::Green && color != Color::Purple {
            // This might be garbage: the object lost a reference but is
            // still pointed to, so it could be the root of a dead cycle.
            hdr.color.set(Color::Purple);
            if !hdr.buffered.get() && !hdr.heap.is_null() {
                hdr.buffered.set(true);
                (*hdr.heap).add_candidate(h);
            }
        }
    }
}

/// Destroy an object whose reference count reached zero: run the payload
/// destructor through the class slot, then free the shell.
pub(crate) unsafe fn destroy(h: *mut Header) {
    let hdr = &*h;
    if hdr.buffered.get() {
        hdr.buffered.set(false);
        if !hdr.heap.is_null() {
            (*hdr.heap).remove_candidate(h);
        }
    }
    let class = hdr.class.get();
    debug_assert!(!class.is_null());
    // Read both slots up front: the class of classes describes itself, so
    // dropping its payload would otherwise invalidate the second read.
    let drop_value = (*class).ops.drop_value;
    let free = (*class).ops.free;
    drop_value(h);
    free(h);
}

//---------------------------------------------------------------------------

/// Type-erased owning reference to a heap object.
pub struct ObjRef {
    ptr: NonNull<Header>,
}

impl ObjRef {
    /// Take ownership of a freshly allocated object (count already 1).
    pub(crate) unsafe fn from_raw(ptr: NonNull<Header>) -> Self {
        ObjRef { ptr }
    }

    /// Share an existing object, incrementing its count.
    pub(crate) unsafe fn from_raw_retained(ptr: NonNull<Header>) -> Self {
        retain(ptr.as_ptr());
        ObjRef { ptr }
    }

    pub fn raw(&self) -> *mut Header {
        self.ptr.as_ptr()
    }

    fn header(&self) -> &Header {
        unsafe { self.ptr.as_ref() }
    }

    pub fn class(&self) -> &Class {
        let class = self.header().class.get();
        debug_assert!(!class.is_null());
        unsafe { &*class }
    }

    pub fn class_name(&self) -> String {
        self.class().name().to_string()
    }

    pub fn ptr_eq(&self, other: &ObjRef) -> bool {
        self.ptr == other.ptr
    }

    pub fn use_count(&self) -> u32 {
        self.header().ref_count.get()
    }

    pub fn is_shared(&self) -> bool {
        self.use_count() > 1
    }

    pub fn is_collectable(&self) -> bool {
        self.header().color.get() != Color::Green
    }

    pub fn is_seen(&self) -> bool {
        self.header().seen.get()
    }

    pub fn mark_seen(&self, value: bool) {
        self.header().seen.set(value);
    }

    /// Borrow the payload if this object's host representation is `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        if self.class().host_type() == TypeId::of::<T>() {
            let obj = self.ptr.as_ptr() as *const TObject<T>;
            Some(unsafe { &*(*obj).value })
        } else {
            None
        }
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.class().host_type() == TypeId::of::<T>()
    }

    /// Typed handle to the same object, or a cast error.
    pub fn handle<T: 'static>(&self) -> Result<Handle<T>> {
        if self.is::<T>() {
            unsafe {
                retain(self.ptr.as_ptr());
                Ok(Handle {
                    ptr: NonNull::new_unchecked(self.ptr.as_ptr() as *mut TObject<T>),
                })
            }
        } else {
            Err(cast_error(format!(
                "Expected a {}, got a {}",
                short_type_name::<T>(),
                self.class_name()
            )))
        }
    }

    /// Stringify through the class slot, protecting against cycles with the
    /// header's `seen` flag.
    pub fn to_display(&self, quote: bool) -> Result<String> {
        let slot = self.class().ops.to_string.ok_or_else(|| {
            crate::error::type_error(format!(
                "Type {} cannot be converted to string",
                self.class_name()
            ))
        })?;
        let seen = self.is_seen();
        self.mark_seen(true);
        let result = unsafe { slot(self.ptr.as_ptr(), quote, seen) };
        self.mark_seen(seen);
        result
    }

    pub fn compare_with(&self, other: &ObjRef) -> Result<Ordering> {
        if self.class() as *const Class != other.class() as *const Class {
            return Err(crate::error::type_error(format!(
                "Cannot compare values of type {} and {}",
                self.class_name(),
                other.class_name()
            )));
        }
        match self.class().ops.compare {
            Some(slot) => unsafe { slot(self.ptr.as_ptr(), other.ptr.as_ptr()) },
            None => Err(crate::error::type_error(format!(
                "Type {} does not support comparison",
                self.class_name()
            ))),
        }
    }

    pub fn equal_to(&self, other: &ObjRef) -> Result<bool> {
        match self.class().ops.equal {
            Some(slot) => unsafe { slot(self.ptr.as_ptr(), other.ptr.as_ptr()) },
            // Fall back on comparison; this errors out if the type supports
            // neither operation.
            None => Ok(self.compare_with(other)? == Ordering::Equal),
        }
    }

    pub fn hash_value(&self) -> Result<u64> {
        match self.class().ops.hash {
            Some(slot) => Ok(unsafe { slot(self.ptr.as_ptr()) }),
            None => Err(crate::error::type_error(format!(
                "Type {} is not hashable",
                self.class_name()
            ))),
        }
    }

    pub fn is_clonable(&self) -> bool {
        self.class().ops.clone.is_some()
    }

    pub fn clone_object(&self) -> Result<ObjRef> {
        match self.class().ops.clone {
            Some(slot) => {
                let raw = unsafe { slot(self.ptr.as_ptr()) };
                Ok(unsafe { ObjRef::from_raw(NonNull::new_unchecked(raw)) })
            }
            None => Err(crate::error::type_error(format!(
                "Type {} is not cloneable",
                self.class_name()
            ))),
        }
    }

    /// Visit every value owned by this object, if its type is traversable.
    pub fn traverse(&self, f: &mut dyn FnMut(&Value)) {
        if let Some(slot) = self.class().ops.traverse {
            unsafe { slot(self.ptr.as_ptr(), f) };
        }
    }
}

impl Clone for ObjRef {
    fn clone(&self) -> Self {
        unsafe { ObjRef::from_raw_retained(self.ptr) }
    }
}

impl Drop for ObjRef {
    fn drop(&mut self) {
        unsafe { release(self.ptr.as_ptr()) };
    }
}

impl std::fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{} at {:p}>", self.class_name(), self.ptr.as_ptr())
    }
}

//---------------------------------------------------------------------------

/// Typed owning reference to a heap object of payload type `T`.
pub struct Handle<T: 'static> {
    ptr: NonNull<TObject<T>>,
}

impl<T: 'static> Handle<T> {
    pub(crate) unsafe fn from_raw(ptr: NonNull<TObject<T>>) -> Self {
        Handle { ptr }
    }

    /// The erased view of this handle (shares ownership).
    pub fn as_obj(&self) -> ObjRef {
        unsafe { ObjRef::from_raw_retained(self.ptr.cast()) }
    }

    pub fn raw(&self) -> *mut Header {
        self.ptr.as_ptr() as *mut Header
    }

    pub fn class(&self) -> &Class {
        let class = unsafe { (*self.raw()).class.get() };
        debug_assert!(!class.is_null());
        unsafe { &*class }
    }

    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        self.ptr == other.ptr
    }

    pub fn use_count(&self) -> u32 {
        unsafe { (*self.raw()).ref_count.get() }
    }

    /// Run `f` on a borrowed `Value` view of this handle without touching
    /// the reference count. Types that own handles directly (rather than
    /// values) use this in their `Traverse` impl, where a temporary
    /// retain/release would skew the counts the collector is inspecting.
    pub fn with_value_view(&self, f: &mut dyn FnMut(&Value)) {
        let view = ManuallyDrop::new(Value::Object(unsafe {
            ObjRef::from_raw(self.ptr.cast())
        }));
        f(&view);
    }
}

impl<T: 'static> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*(*self.ptr.as_ptr()).value }
    }
}

impl<T: 'static> Clone for Handle<T> {
    fn clone(&self) -> Self {
        unsafe {
            retain(self.raw());
            Handle { ptr: self.ptr }
        }
    }
}

impl<T: 'static> Drop for Handle<T> {
    fn drop(&mut self) {
        unsafe { release(self.raw()) };
    }
}
