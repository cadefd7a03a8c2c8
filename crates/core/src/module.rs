//! Module: a named table of bindings. The runtime's globals live in one.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;

use crate::class::{Traverse, VmDisplay};
use crate::error::Result;
use crate::value::Value;

pub struct Module {
    name: Rc<str>,
    members: RefCell<HashMap<Rc<str>, Value>>,
}

impl Module {
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Module {
            name: name.into(),
            members: RefCell::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> Ref<'_, HashMap<Rc<str>, Value>> {
        self.members.borrow()
    }

    pub fn members_mut(&self) -> RefMut<'_, HashMap<Rc<str>, Value>> {
        self.members.borrow_mut()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.members.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.borrow().contains_key(name)
    }

    pub fn insert(&self, name: impl Into<Rc<str>>, value: Value) {
        self.members.borrow_mut().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.members.borrow_mut().remove(name)
    }

    pub fn clear(&self) {
        self.members.borrow_mut().clear();
    }
}

impl Traverse for Module {
    fn traverse(&self, f: &mut dyn FnMut(&Value)) {
        for value in self.members.borrow().values() {
            f(value);
        }
    }
}

impl VmDisplay for Module {
    fn display(&self, quote: bool, _seen: bool) -> Result<String> {
        let s = format!("<module {}>", self.name);
        Ok(if quote { format!("\"{}\"", s) } else { s })
    }
}
