//! Table: a map from hashable values to values.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::class::{Traverse, VmDisplay, VmEqual};
use crate::error::Result;
use crate::value::Value;

/// Map key wrapping a value with total (never-failing) equality: values of
/// different kinds are simply unequal, numbers compare promoted. The value
/// must have been checked hashable before it gets in.
#[derive(Clone, Debug)]
pub struct Key(pub Value);

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash_value().unwrap_or(0));
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        let a = self.0.resolve();
        let b = other.0.resolve();
        match (&a, &b) {
            (Value::Object(x), Value::Object(y)) => {
                if x.class().same(y.class()) {
                    x.equal_to(y).unwrap_or_else(|_| x.ptr_eq(y))
                } else {
                    false
                }
            }
            _ => a.equal(&b).unwrap_or(false),
        }
    }
}

impl Eq for Key {}

pub struct Table {
    map: RefCell<HashMap<Key, Value>>,
}

impl Table {
    pub fn new() -> Self {
        Table {
            map: RefCell::new(HashMap::new()),
        }
    }

    pub fn from_map(map: HashMap<Key, Value>) -> Self {
        Table {
            map: RefCell::new(map),
        }
    }

    pub fn map(&self) -> Ref<'_, HashMap<Key, Value>> {
        self.map.borrow()
    }

    pub fn map_mut(&self) -> RefMut<'_, HashMap<Key, Value>> {
        self.map.borrow_mut()
    }

    pub fn len(&self) -> i64 {
        self.map.borrow().len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.map.borrow().is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.map.borrow().get(&Key(key.resolve())).cloned()
    }

    /// Insert after checking the key is hashable.
    pub fn insert(&self, key: Value, value: Value) -> Result<()> {
        let key = key.resolve();
        key.hash_value()?;
        self.map.borrow_mut().insert(Key(key), value);
        Ok(())
    }

    pub fn remove(&self, key: &Value) -> Option<Value> {
        self.map.borrow_mut().remove(&Key(key.resolve()))
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.map.borrow().contains_key(&Key(key.resolve()))
    }

    pub fn clear(&self) {
        self.map.borrow_mut().clear();
    }

    pub fn keys(&self) -> Vec<Value> {
        self.map.borrow().keys().map(|k| k.0.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.map.borrow().values().cloned().collect()
    }

    /// Entries sorted by key, for deterministic printing.
    fn sorted_entries(&self) -> Vec<(Value, Value)> {
        let mut entries: Vec<(Value, Value)> = self
            .map
            .borrow()
            .iter()
            .map(|(k, v)| (k.0.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.total_cmp(&b.0));
        entries
    }
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}

impl Clone for Table {
    fn clone(&self) -> Self {
        Table {
            map: RefCell::new(self.map.borrow().clone()),
        }
    }
}

impl Traverse for Table {
    fn traverse(&self, f: &mut dyn FnMut(&Value)) {
        for (key, value) in self.map.borrow().iter() {
            f(&key.0);
            f(value);
        }
    }
}

impl VmDisplay for Table {
    fn display(&self, _quote: bool, seen: bool) -> Result<String> {
        if seen {
            return Ok("{...}".to_string());
        }
        let mut parts = Vec::new();
        for (key, value) in self.sorted_entries() {
            parts.push(format!(
                "{}: {}",
                key.to_display(true)?,
                value.to_display(true)?
            ));
        }
        Ok(format!("{{{}}}", parts.join(", ")))
    }
}

impl VmEqual for Table {
    fn equal_values(&self, other: &Self) -> Result<bool> {
        if std::ptr::eq(self, other) {
            return Ok(true);
        }
        let a = self.map.borrow();
        let b = other.map.borrow();
        if a.len() != b.len() {
            return Ok(false);
        }
        for (key, value) in a.iter() {
            match b.get(key) {
                Some(v) if value.equal(v).unwrap_or(false) => continue,
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get() {
        let t = Table::new();
        t.insert(Value::from("a"), Value::Integer(1)).unwrap();
        t.insert(Value::from("b"), Value::Integer(2)).unwrap();
        assert!(matches!(t.get(&Value::from("a")), Some(Value::Integer(1))));
        assert!(t.get(&Value::from("z")).is_none());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_numeric_keys_promote() {
        let t = Table::new();
        t.insert(Value::Integer(2), Value::from("x")).unwrap();
        assert!(t.contains(&Value::Float(2.0)));
    }

    #[test]
    fn test_null_key_rejected() {
        let t = Table::new();
        assert!(t.insert(Value::Null, Value::Integer(1)).is_err());
    }

    #[test]
    fn test_display_sorted() {
        let t = Table::new();
        t.insert(Value::from("b"), Value::Integer(2)).unwrap();
        t.insert(Value::from("a"), Value::Integer(1)).unwrap();
        assert_eq!(t.display(false, false).unwrap(), "{\"a\": 1, \"b\": 2}");
    }
}
