//! List: a dynamic sequence of values with 1-based indexing.

use std::cell::{Ref, RefCell, RefMut};
use std::cmp::Ordering;

use crate::class::{Traverse, VmCompare, VmDisplay, VmEqual};
use crate::error::{index_error, Result};
use crate::value::Value;

pub struct List {
    items: RefCell<Vec<Value>>,
}

impl List {
    pub fn new() -> Self {
        List {
            items: RefCell::new(Vec::new()),
        }
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        List {
            items: RefCell::new(items),
        }
    }

    pub fn items(&self) -> Ref<'_, Vec<Value>> {
        self.items.borrow()
    }

    pub fn items_mut(&self) -> RefMut<'_, Vec<Value>> {
        self.items.borrow_mut()
    }

    pub fn len(&self) -> i64 {
        self.items.borrow().len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Translate a possibly negative 1-based index into a vector offset.
    pub fn check_index(&self, index: i64) -> Result<usize> {
        let len = self.len();
        let actual = if index < 0 { len + index + 1 } else { index };
        if actual < 1 || actual > len {
            return Err(index_error(format!(
                "List index {} out of range (length {})",
                index, len
            )));
        }
        Ok((actual - 1) as usize)
    }

    pub fn at(&self, index: i64) -> Result<Value> {
        let offset = self.check_index(index)?;
        Ok(self.items.borrow()[offset].clone())
    }

    /// 1-based position of the first element equal to `needle` at or after
    /// `from`, 0 when absent. Elements that cannot be compared with the
    /// needle simply do not match.
    pub fn find(&self, needle: &Value, from: i64) -> Result<i64> {
        let start = if from == 1 || self.is_empty() {
            0
        } else {
            self.check_index(from)?
        };
        let items = self.items.borrow();
        for (i, item) in items.iter().enumerate().skip(start) {
            if item.equal(needle).unwrap_or(false) {
                return Ok(i as i64 + 1);
            }
        }
        Ok(0)
    }

    pub fn rfind(&self, needle: &Value, from: i64) -> Result<i64> {
        let items = self.items.borrow();
        let end = if from == -1 {
            items.len()
        } else {
            self.check_index(from)? + 1
        };
        for i in (0..end).rev() {
            if items[i].equal(needle).unwrap_or(false) {
                return Ok(i as i64 + 1);
            }
        }
        Ok(0)
    }

    pub fn contains(&self, needle: &Value) -> bool {
        self.items
            .borrow()
            .iter()
            .any(|item| item.equal(needle).unwrap_or(false))
    }
}

impl Default for List {
    fn default() -> Self {
        List::new()
    }
}

impl Clone for List {
    fn clone(&self) -> Self {
        List {
            items: RefCell::new(self.items.borrow().clone()),
        }
    }
}

impl Traverse for List {
    fn traverse(&self, f: &mut dyn FnMut(&Value)) {
        for item in self.items.borrow().iter() {
            f(item);
        }
    }
}

impl VmDisplay for List {
    fn display(&self, _quote: bool, seen: bool) -> Result<String> {
        if seen {
            return Ok("[...]".to_string());
        }
        let items = self.items.borrow();
        let mut parts = Vec::with_capacity(items.len());
        for item in items.iter() {
            parts.push(item.to_display(true)?);
        }
        Ok(format!("[{}]", parts.join(", ")))
    }
}

impl VmEqual for List {
    fn equal_values(&self, other: &Self) -> Result<bool> {
        if std::ptr::eq(self, other) {
            return Ok(true);
        }
        let a = self.items.borrow();
        let b = other.items.borrow();
        if a.len() != b.len() {
            return Ok(false);
        }
        for (x, y) in a.iter().zip(b.iter()) {
            if !x.equal(y).unwrap_or(false) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl VmCompare for List {
    fn compare_values(&self, other: &Self) -> Result<Ordering> {
        if std::ptr::eq(self, other) {
            return Ok(Ordering::Equal);
        }
        let a = self.items.borrow();
        let b = other.items.borrow();
        for (x, y) in a.iter().zip(b.iter()) {
            match x.compare(y)? {
                Ordering::Equal => continue,
                other => return Ok(other),
            }
        }
        Ok(a.len().cmp(&b.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_based_indexing() {
        let lst = List::from_vec(vec![Value::Integer(10), Value::Integer(20)]);
        assert!(matches!(lst.at(1).unwrap(), Value::Integer(10)));
        assert!(matches!(lst.at(2).unwrap(), Value::Integer(20)));
        assert!(matches!(lst.at(-1).unwrap(), Value::Integer(20)));
        assert!(lst.at(0).is_err());
        assert!(lst.at(3).is_err());
    }

    #[test]
    fn test_find() {
        let lst = List::from_vec(vec![
            Value::Integer(1),
            Value::Integer(2),
            Value::Integer(1),
        ]);
        assert_eq!(lst.find(&Value::Integer(1), 1).unwrap(), 1);
        assert_eq!(lst.find(&Value::Integer(1), 2).unwrap(), 3);
        assert_eq!(lst.rfind(&Value::Integer(1), -1).unwrap(), 3);
        assert_eq!(lst.find(&Value::Integer(9), 1).unwrap(), 0);
    }
}
