//! Set: an ordered collection of distinct values.
//!
//! Elements are kept sorted by the total value ordering, so printing is
//! deterministic and the set algebra (`intersect`, `unite`, `subtract`)
//! runs on sorted sequences.

use std::cell::{Ref, RefCell};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::class::{Traverse, VmDisplay, VmEqual};
use crate::error::Result;
use crate::value::Value;

/// Ordering key: wraps a value with the total ordering so it can live in a
/// BTreeSet.
#[derive(Clone, Debug)]
pub struct SetKey(pub Value);

impl PartialEq for SetKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for SetKey {}

impl PartialOrd for SetKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SetKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

pub struct Set {
    items: RefCell<BTreeSet<SetKey>>,
}

impl Set {
    pub fn new() -> Self {
        Set {
            items: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        let set = Set::new();
        for v in values {
            set.insert(v.resolve());
        }
        set
    }

    pub fn items(&self) -> Ref<'_, BTreeSet<SetKey>> {
        self.items.borrow()
    }

    pub fn len(&self) -> i64 {
        self.items.borrow().len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn insert(&self, value: Value) -> bool {
        self.items.borrow_mut().insert(SetKey(value.resolve()))
    }

    pub fn remove(&self, value: &Value) -> bool {
        self.items.borrow_mut().remove(&SetKey(value.resolve()))
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.items.borrow().contains(&SetKey(value.resolve()))
    }

    pub fn clear(&self) {
        self.items.borrow_mut().clear();
    }

    pub fn to_values(&self) -> Vec<Value> {
        self.items.borrow().iter().map(|k| k.0.clone()).collect()
    }

    pub fn intersect(&self, other: &Set) -> Set {
        let a = self.items.borrow();
        let b = other.items.borrow();
        Set {
            items: RefCell::new(a.intersection(&b).cloned().collect()),
        }
    }

    pub fn unite(&self, other: &Set) -> Set {
        let a = self.items.borrow();
        let b = other.items.borrow();
        Set {
            items: RefCell::new(a.union(&b).cloned().collect()),
        }
    }

    pub fn subtract(&self, other: &Set) -> Set {
        let a = self.items.borrow();
        let b = other.items.borrow();
        Set {
            items: RefCell::new(a.difference(&b).cloned().collect()),
        }
    }
}

impl Default for Set {
    fn default() -> Self {
        Set::new()
    }
}

impl Clone for Set {
    fn clone(&self) -> Self {
        Set {
            items: RefCell::new(self.items.borrow().clone()),
        }
    }
}

impl Traverse for Set {
    fn traverse(&self, f: &mut dyn FnMut(&Value)) {
        for key in self.items.borrow().iter() {
            f(&key.0);
        }
    }
}

impl VmDisplay for Set {
    fn display(&self, _quote: bool, seen: bool) -> Result<String> {
        if seen {
            return Ok("{...}".to_string());
        }
        let mut parts = Vec::new();
        for key in self.items.borrow().iter() {
            parts.push(key.0.to_display(true)?);
        }
        Ok(format!("{{{}}}", parts.join(", ")))
    }
}

impl VmEqual for Set {
    fn equal_values(&self, other: &Self) -> Result<bool> {
        if std::ptr::eq(self, other) {
            return Ok(true);
        }
        let a = self.items.borrow();
        let b = other.items.borrow();
        if a.len() != b.len() {
            return Ok(false);
        }
        Ok(a.iter().zip(b.iter()).all(|(x, y)| x == y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_dedup() {
        let s = Set::new();
        assert!(s.insert(Value::Integer(1)));
        assert!(!s.insert(Value::Integer(1)));
        assert!(s.insert(Value::Integer(2)));
        assert_eq!(s.len(), 2);
        assert!(s.contains(&Value::Integer(1)));
    }

    #[test]
    fn test_set_algebra() {
        let a = Set::from_values(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        let b = Set::from_values(vec![Value::Integer(2), Value::Integer(3), Value::Integer(4)]);
        assert_eq!(a.intersect(&b).len(), 2);
        assert_eq!(a.unite(&b).len(), 4);
        assert_eq!(a.subtract(&b).len(), 1);
        assert!(a.subtract(&b).contains(&Value::Integer(1)));
    }

    #[test]
    fn test_display_ordered() {
        let s = Set::from_values(vec![Value::Integer(3), Value::Integer(1), Value::Integer(2)]);
        assert_eq!(s.display(false, false).unwrap(), "{1, 2, 3}");
    }
}
