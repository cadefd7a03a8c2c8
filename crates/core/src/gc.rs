//! Heap and backup cycle collector.
//!
//! Reference counting reclaims almost everything. Containers can form
//! reference cycles, though, and those are reclaimed by a synchronous
//! Recycler (Bacon & Rajan 2001): objects that lose a reference without
//! dying are coloured Purple and buffered as cycle candidates; when the
//! buffer grows past a threshold (or on an explicit [`GcHeap::collect`])
//! the collector trial-deletes internal references (Grey), restores
//! externally rooted subgraphs (Black), and frees what is left (White).
//!
//! Green objects never enter this machinery: they are destroyed the moment
//! their count reaches zero.

use std::cell::Cell;

use crate::class::Class;
use crate::object::{alloc_raw, Color, Handle, Header, REFCOUNT_GUARD};
use crate::value::Value;

/// Per-runtime heap state: the candidate list for the cycle collector and
/// the allocation entry points.
pub struct GcHeap {
    /// Head of the doubly-linked candidate list.
    root: Cell<*mut Header>,
    /// Number of buffered candidates.
    candidates: Cell<usize>,
    /// Candidate count that triggers a collection on the next allocation.
    threshold: Cell<usize>,
    /// Suspension nesting; collection is a no-op while positive.
    paused: Cell<u32>,
}

impl GcHeap {
    pub fn new() -> Box<GcHeap> {
        // Boxed so the address stored in object headers stays stable even
        // if the owning runtime moves.
        Box::new(GcHeap {
            root: Cell::new(std::ptr::null_mut()),
            candidates: Cell::new(0),
            threshold: Cell::new(1024),
            paused: Cell::new(0),
        })
    }

    /// Allocate an instance of `class`. Collectable instances are attached
    /// to this heap; a collection runs first when the candidate buffer is
    /// full.
    pub fn alloc<T: 'static>(&self, class: &Class, value: T) -> Handle<T> {
        let collectable = class.instances_collectable();
        if collectable && self.paused.get() == 0 && self.candidates.get() >= self.threshold.get()
        {
            self.collect();
        }
        unsafe {
            Handle::from_raw(alloc_raw(
                class as *const Class,
                self as *const GcHeap,
                collectable,
                value,
            ))
        }
    }

    /// Allocate an object with no class yet. Only the class-system
    /// bootstrap uses this; the header is patched immediately afterwards.
    pub fn alloc_orphan<T: 'static>(&self, collectable: bool, value: T) -> Handle<T> {
        unsafe { Handle::from_raw(alloc_raw(std::ptr::null(), self, collectable, value)) }
    }

    pub fn suspend(&self) {
        self.paused.set(self.paused.get() + 1);
    }

    pub fn resume(&self) {
        let p = self.paused.get();
        debug_assert!(p > 0, "resume without matching suspend");
        self.paused.set(p.saturating_sub(1));
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.get()
    }

    pub fn set_threshold(&self, threshold: usize) {
        self.threshold.set(threshold);
    }

    pub(crate) fn add_candidate(&self, obj: *mut Header) {
        unsafe {
            let old_root = self.root.get();
            (*obj).next.set(old_root);
            (*obj).prev.set(std::ptr::null_mut());
            if !old_root.is_null() {
                (*old_root).prev.set(obj);
            }
        }
        self.root.set(obj);
        self.candidates.set(self.candidates.get() + 1);
    }

    pub(crate) fn remove_candidate(&self, obj: *mut Header) {
        unsafe {
            if obj == self.root.get() {
                self.root.set((*obj).next.get());
            }
            let prev = (*obj).prev.get();
            let next = (*obj).next.get();
            if !prev.is_null() {
                (*prev).next.set(next);
            }
            if !next.is_null() {
                (*next).prev.set(prev);
            }
            (*obj).prev.set(std::ptr::null_mut());
            (*obj).next.set(std::ptr::null_mut());
        }
        self.candidates.set(self.candidates.get().saturating_sub(1));
    }

    /// Run a full cycle collection. Returns the number of objects freed.
    pub fn collect(&self) -> usize {
        if self.paused.get() > 0 {
            return 0;
        }
        let before = self.candidates.get();
        self.mark_candidates();
        self.scan_candidates();
        let freed = self.collect_candidates();
        tracing::debug!(candidates = before, freed, "cycle collection");
        freed
    }

    /// Phase 1: trial-delete internal references from every Purple
    /// candidate; drop candidates that were re-blackened in the meantime.
    fn mark_candidates(&self) {
        let mut cur = self.root.get();
        while !cur.is_null() {
            let next = unsafe { (*cur).next.get() };
            let color = unsafe { (*cur).color.get() };
            if color == Color::Purple {
                mark_grey(cur);
            } else {
                unsafe { (*cur).buffered.set(false) };
                self.remove_candidate(cur);
            }
            cur = next;
        }
    }

    /// Phase 2: candidates with a surviving external count are restored to
    /// Black (together with everything they reach); the rest turn White.
    fn scan_candidates(&self) {
        let mut cur = self.root.get();
        while !cur.is_null() {
            let next = unsafe { (*cur).next.get() };
            scan(cur);
            cur = next;
        }
    }

    /// Phase 3: free every White object still buffered, in two passes so
    /// that destructors of a dying cycle never touch freed memory.
    fn collect_candidates(&self) -> usize {
        let mut dead: Vec<*mut Header> = Vec::new();
        loop {
            let s = self.root.get();
            if s.is_null() {
                break;
            }
            unsafe { (*s).buffered.set(false) };
            self.remove_candidate(s);
            collect_white(s, &mut dead);
        }
        for &d in &dead {
            unsafe { (*d).ref_count.set(REFCOUNT_GUARD) };
        }
        for &d in &dead {
            unsafe {
                let class = (*d).class.get();
                ((*class).ops.drop_value)(d);
            }
        }
        let freed = dead.len();
        for d in dead {
            unsafe {
                let class = (*d).class.get();
                ((*class).ops.free)(d);
            }
        }
        freed
    }
}

impl Drop for GcHeap {
    fn drop(&mut self) {
        // Anything still buffered at teardown is owned elsewhere (the
        // runtime drops its roots before the heap); just unlink.
        let mut cur = self.root.get();
        while !cur.is_null() {
            let next = unsafe { (*cur).next.get() };
            unsafe {
                (*cur).buffered.set(false);
                (*cur).prev.set(std::ptr::null_mut());
                (*cur).next.set(std::ptr::null_mut());
            }
            cur = next;
        }
        self.root.set(std::ptr::null_mut());
    }
}

/// Visit the collectable objects directly owned by `value`, looking through
/// alias cells.
fn visit_value(value: &Value, f: &mut dyn FnMut(*mut Header)) {
    match value {
        Value::Object(obj) if obj.is_collectable() => f(obj.raw()),
        Value::Alias(cell) => {
            if let Ok(inner) = cell.try_borrow() {
                visit_value(&inner, f);
            }
        }
        _ => {}
    }
}

/// Apply `f` to every collectable child of `obj`.
fn each_child(obj: *mut Header, f: &mut dyn FnMut(*mut Header)) {
    unsafe {
        let class = (*obj).class.get();
        if let Some(traverse) = (*class).ops.traverse {
            let mut adapter = |v: &Value| visit_value(v, f);
            traverse(obj, &mut adapter);
        }
    }
}

fn mark_grey(s: *mut Header) {
    unsafe {
        if (*s).color.get() != Color::Grey {
            (*s).color.set(Color::Grey);
            each_child(s, &mut |t| {
                let rc = (*t).ref_count.get();
                debug_assert!(rc > 0);
                (*t).ref_count.set(rc - 1);
                mark_grey(t);
            });
        }
    }
}

fn scan(s: *mut Header) {
    unsafe {
        if (*s).color.get() == Color::Grey {
            if (*s).ref_count.get() > 0 {
                scan_black(s);
            } else {
                (*s).color.set(Color::White);
                each_child(s, &mut |t| scan(t));
            }
        }
    }
}

fn scan_black(s: *mut Header) {
    unsafe {
        (*s).color.set(Color::Black);
        each_child(s, &mut |t| {
            (*t).ref_count.set((*t).ref_count.get() + 1);
            if (*t).color.get() != Color::Black {
                scan_black(t);
            }
        });
    }
}

fn collect_white(s: *mut Header, dead: &mut Vec<*mut Header>) {
    unsafe {
        if (*s).color.get() == Color::White && !(*s).buffered.get() {
            (*s).color.set(Color::Black);
            each_child(s, &mut |t| collect_white(t, dead));
            dead.push(s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{attach_class_object, patch_class, Class, ClassOps};
    use crate::list::List;
    use crate::object::Handle;
    use std::any::TypeId;

    /// Minimal class-system bootstrap: a self-describing Class class and a
    /// collectable List class.
    fn bootstrap(heap: &GcHeap) -> (Handle<Class>, Handle<Class>) {
        let class_class = heap.alloc_orphan(
            false,
            Class::new(
                "Class",
                None,
                TypeId::of::<Class>(),
                false,
                ClassOps::new::<Class>().with_display::<Class>(),
            ),
        );
        patch_class(&class_class, &class_class);
        attach_class_object(&class_class);

        let list_class = heap.alloc_orphan(
            false,
            Class::new(
                "List",
                None,
                TypeId::of::<List>(),
                true,
                ClassOps::new::<List>()
                    .with_traverse::<List>()
                    .with_display::<List>()
                    .with_clone::<List>(),
            ),
        );
        patch_class(&list_class, &class_class);
        attach_class_object(&list_class);
        (class_class, list_class)
    }

    #[test]
    fn test_cycle_is_collected() {
        let heap = GcHeap::new();
        let (_class_class, list_class) = bootstrap(&heap);

        let a = heap.alloc(&list_class, List::new());
        let b = heap.alloc(&list_class, List::new());
        a.items_mut().push(Value::from(b.clone()));
        b.items_mut().push(Value::from(a.clone()));
        drop(a);
        drop(b);

        assert!(heap.candidate_count() > 0);
        let freed = heap.collect();
        assert_eq!(freed, 2);
        assert_eq!(heap.candidate_count(), 0);
    }

    #[test]
    fn test_collection_is_idempotent() {
        let heap = GcHeap::new();
        let (_class_class, list_class) = bootstrap(&heap);

        let a = heap.alloc(&list_class, List::new());
        a.items_mut().push(Value::from(a.clone()));
        drop(a);

        assert_eq!(heap.collect(), 1);
        assert_eq!(heap.collect(), 0);
        assert_eq!(heap.candidate_count(), 0);
    }

    #[test]
    fn test_external_root_survives() {
        let heap = GcHeap::new();
        let (_class_class, list_class) = bootstrap(&heap);

        let a = heap.alloc(&list_class, List::new());
        let b = heap.alloc(&list_class, List::new());
        a.items_mut().push(Value::from(b.clone()));
        b.items_mut().push(Value::from(a.clone()));
        drop(b);

        // `a` is still rooted from outside: nothing may be freed.
        assert_eq!(heap.collect(), 0);
        assert_eq!(a.len(), 1);

        drop(a);
        assert_eq!(heap.collect(), 2);
    }

    #[test]
    fn test_plain_release_needs_no_collector() {
        let heap = GcHeap::new();
        let (_class_class, list_class) = bootstrap(&heap);

        let a = heap.alloc(&list_class, List::new());
        a.items_mut().push(Value::Integer(1));
        drop(a);
        // No cycle: the object died from reference counting alone.
        assert_eq!(heap.collect(), 0);
    }

    #[test]
    fn test_suspension() {
        let heap = GcHeap::new();
        let (_class_class, list_class) = bootstrap(&heap);

        let a = heap.alloc(&list_class, List::new());
        a.items_mut().push(Value::from(a.clone()));
        drop(a);

        heap.suspend();
        assert_eq!(heap.collect(), 0);
        heap.resume();
        assert_eq!(heap.collect(), 1);
    }

    #[test]
    fn test_cycle_through_alias_cell() {
        let heap = GcHeap::new();
        let (_class_class, list_class) = bootstrap(&heap);

        let a = heap.alloc(&list_class, List::new());
        let mut inner = Value::from(a.clone());
        let alias = inner.make_alias();
        a.items_mut().push(alias);
        drop(inner);
        drop(a);

        assert_eq!(heap.collect(), 1);
    }
}
