//! The polymorphic value container.
//!
//! A [`Value`] holds any Merle datum. Null, booleans, integers, floats and
//! strings are stored inline; everything else is a reference-counted heap
//! object behind an [`ObjRef`]. The last variant, `Alias`, is a shared
//! mutable cell: it is what `ref` parameters and `foreach ... ref v` bind
//! to, so that writes through one name are visible through every name
//! referring to the same cell.
//!
//! Falsiness rule: only Null, `false` and NaN are false.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::class::{Class, ClassRegistry};
use crate::error::{cast_error, type_error, Result};
use crate::object::{Handle, ObjRef};
use crate::string::Str;

/// Shared mutable cell giving several names one storage location.
pub type AliasCell = Rc<RefCell<Value>>;

/// Largest integer magnitude that converts to a Float without losing
/// precision (2^53).
pub const MAX_SAFE_FLOAT_INT: i64 = 1 << 53;

#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Str),
    Object(ObjRef),
    Alias(AliasCell),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<Str> for Value {
    fn from(s: Str) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Str::from(s))
    }
}

impl From<ObjRef> for Value {
    fn from(o: ObjRef) -> Self {
        Value::Object(o)
    }
}

impl<T: 'static> From<Handle<T>> for Value {
    fn from(h: Handle<T>) -> Self {
        Value::Object(h.as_obj())
    }
}

/// Scale-aware float equality (Christer Ericson's method): the tolerance
/// grows with the magnitude of the operands.
pub fn float_equal(x: f64, y: f64) -> bool {
    let scale = 1.0_f64.max(x.abs()).max(y.abs());
    (x - y).abs() <= f64::EPSILON * scale
}

fn float_compare(x: f64, y: f64) -> Ordering {
    if float_equal(x, y) {
        Ordering::Equal
    } else if x < y {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// 64-bit integer hash mix (Thomas Wang).
pub fn mix_hash(mut n: u64) -> u64 {
    n = (!n).wrapping_add(n << 21);
    n ^= n >> 24;
    n = n.wrapping_add(n << 3).wrapping_add(n << 8);
    n ^= n >> 14;
    n = n.wrapping_add(n << 2).wrapping_add(n << 4);
    n ^= n >> 28;
    n = n.wrapping_add(n << 31);
    n
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_alias(&self) -> bool {
        matches!(self, Value::Alias(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Integer(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Value::Float(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// The value at the end of the alias chain. Idempotent:
    /// `v.resolve().resolve()` equals `v.resolve()`.
    pub fn resolve(&self) -> Value {
        match self {
            Value::Alias(cell) => cell.borrow().resolve(),
            other => other.clone(),
        }
    }

    /// Convert this slot into an alias cell in place (no-op if it already
    /// is one) and return a second reference to the cell.
    pub fn make_alias(&mut self) -> Value {
        if !self.is_alias() {
            let inner = std::mem::take(self);
            *self = Value::Alias(Rc::new(RefCell::new(inner)));
        }
        self.clone()
    }

    /// Collapse the alias indirection: afterwards this slot holds a fresh
    /// copy of the resolved value.
    pub fn unalias(&mut self) {
        if self.is_alias() {
            *self = self.resolve();
        }
    }

    /// If this slot holds a shared clonable object, replace it with a
    /// unique copy, so that an indexed write does not mutate an unintended
    /// sibling. Returns a copy of the (possibly fresh) value.
    pub fn unshare(&mut self) -> Value {
        match self {
            Value::Object(obj) => {
                if obj.is_shared() && obj.is_clonable() {
                    if let Ok(copy) = obj.clone_object() {
                        *self = Value::Object(copy);
                    }
                }
            }
            Value::Alias(cell) => {
                cell.borrow_mut().unshare();
            }
            _ => {}
        }
        self.clone()
    }

    pub fn class_name(&self) -> String {
        match self {
            Value::Null => "Null".to_string(),
            Value::Boolean(_) => "Boolean".to_string(),
            Value::Integer(_) => "Integer".to_string(),
            Value::Float(_) => "Float".to_string(),
            Value::String(_) => "String".to_string(),
            Value::Object(obj) => obj.class_name(),
            Value::Alias(cell) => cell.borrow().class_name(),
        }
    }

    pub fn class_of(&self, registry: &ClassRegistry) -> Handle<Class> {
        match self {
            Value::Null => registry.handle_of::<()>(),
            Value::Boolean(_) => registry.handle_of::<bool>(),
            Value::Integer(_) => registry.handle_of::<i64>(),
            Value::Float(_) => registry.handle_of::<f64>(),
            Value::String(_) => registry.handle_of::<Str>(),
            Value::Object(obj) => obj.class().handle(),
            Value::Alias(cell) => cell.borrow().class_of(registry),
        }
    }

    /// Only Null, false and NaN are false.
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Float(f) => !f.is_nan(),
            Value::Alias(cell) => cell.borrow().to_boolean(),
            _ => true,
        }
    }

    pub fn to_integer(&self) -> Result<i64> {
        match self.resolve() {
            Value::Integer(n) => Ok(n),
            Value::Float(f) => {
                if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Ok(f.trunc() as i64)
                } else {
                    Err(cast_error("Float value cannot be converted to Integer"))
                }
            }
            Value::Boolean(b) => Ok(b as i64),
            Value::String(s) => s
                .as_str()
                .trim()
                .parse::<i64>()
                .map_err(|_| cast_error(format!("Cannot convert \"{}\" to Integer", s))),
            other => Err(cast_error(format!(
                "Cannot convert {} to Integer",
                other.class_name()
            ))),
        }
    }

    pub fn to_float(&self) -> Result<f64> {
        match self.resolve() {
            Value::Float(f) => Ok(f),
            Value::Integer(n) => Value::Integer(n).get_number(),
            Value::Boolean(b) => Ok(b as i64 as f64),
            Value::String(s) => s
                .as_str()
                .trim()
                .parse::<f64>()
                .map_err(|_| cast_error(format!("Cannot convert \"{}\" to Float", s))),
            other => Err(cast_error(format!(
                "Cannot convert {} to Float",
                other.class_name()
            ))),
        }
    }

    /// Numeric view for arithmetic and comparison. Integers outside the
    /// exactly-representable range refuse the promotion.
    pub fn get_number(&self) -> Result<f64> {
        match self.resolve() {
            Value::Float(f) => Ok(f),
            Value::Integer(n) => {
                if n.abs() > MAX_SAFE_FLOAT_INT {
                    Err(cast_error(
                        "Integer value cannot be converted to Float: magnitude too large",
                    ))
                } else {
                    Ok(n as f64)
                }
            }
            other => Err(cast_error(format!(
                "Expected a Number, got a {}",
                other.class_name()
            ))),
        }
    }

    pub fn get_boolean(&self) -> Result<bool> {
        match self.resolve() {
            Value::Boolean(b) => Ok(b),
            other => Err(cast_error(format!(
                "Expected a Boolean, got a {}",
                other.class_name()
            ))),
        }
    }

    pub fn get_integer(&self) -> Result<i64> {
        match self.resolve() {
            Value::Integer(n) => Ok(n),
            other => Err(cast_error(format!(
                "Expected an Integer, got a {}",
                other.class_name()
            ))),
        }
    }

    pub fn get_float(&self) -> Result<f64> {
        match self.resolve() {
            Value::Float(f) => Ok(f),
            other => Err(cast_error(format!(
                "Expected a Float, got a {}",
                other.class_name()
            ))),
        }
    }

    pub fn get_string(&self) -> Result<Str> {
        match self.resolve() {
            Value::String(s) => Ok(s),
            other => Err(cast_error(format!(
                "Expected a String, got a {}",
                other.class_name()
            ))),
        }
    }

    /// Typed handle to the boxed object held by this value.
    pub fn handle<T: 'static>(&self) -> Result<Handle<T>> {
        match self.resolve() {
            Value::Object(obj) => obj.handle::<T>(),
            other => Err(cast_error(format!(
                "Expected a {}, got a {}",
                crate::object::short_type_name::<T>(),
                other.class_name()
            ))),
        }
    }

    pub fn is<T: 'static>(&self) -> bool {
        match self.resolve() {
            Value::Object(obj) => obj.is::<T>(),
            _ => false,
        }
    }

    pub fn equal(&self, other: &Value) -> Result<bool> {
        let v1 = self.resolve();
        let v2 = other.resolve();
        match (&v1, &v2) {
            (Value::Null, Value::Null) => Ok(true),
            (Value::Null, _) | (_, Value::Null) => Ok(false),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a == b),
            (Value::Integer(a), Value::Integer(b)) => Ok(a == b),
            (Value::Float(a), Value::Float(b)) => Ok(float_equal(*a, *b)),
            (Value::String(a), Value::String(b)) => Ok(a == b),
            (Value::Object(a), Value::Object(b)) => {
                if a.class().same(b.class()) {
                    a.equal_to(b)
                } else {
                    Err(type_error(format!(
                        "Cannot compare values of type {} and {}",
                        v1.class_name(),
                        v2.class_name()
                    )))
                }
            }
            _ if v1.is_number() && v2.is_number() => {
                Ok(float_equal(v1.get_number()?, v2.get_number()?))
            }
            _ => Err(type_error(format!(
                "Cannot compare values of type {} and {}",
                v1.class_name(),
                v2.class_name()
            ))),
        }
    }

    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        let v1 = self.resolve();
        let v2 = other.resolve();
        match (&v1, &v2) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Ok(float_compare(*a, *b)),
            (Value::String(a), Value::String(b)) => Ok(a.as_str().cmp(b.as_str())),
            (Value::Object(a), Value::Object(b)) => a.compare_with(b),
            _ if v1.is_number() && v2.is_number() => {
                Ok(float_compare(v1.get_number()?, v2.get_number()?))
            }
            _ => Err(type_error(format!(
                "Cannot compare values of type {} and {}",
                v1.class_name(),
                v2.class_name()
            ))),
        }
    }

    /// Infallible ordering used by sets and `sort`: values order by kind
    /// first (null < booleans < numbers < strings < objects), then within
    /// a kind; objects of different classes order by class name.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Boolean(_) => 1,
                Value::Integer(_) | Value::Float(_) => 2,
                Value::String(_) => 3,
                Value::Object(_) => 4,
                Value::Alias(_) => 5,
            }
        }
        let v1 = self.resolve();
        let v2 = other.resolve();
        let (r1, r2) = (rank(&v1), rank(&v2));
        if r1 != r2 {
            return r1.cmp(&r2);
        }
        match (&v1, &v2) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.as_str().cmp(b.as_str()),
            (Value::Object(a), Value::Object(b)) => {
                if a.class().same(b.class()) {
                    match a.compare_with(b) {
                        Ok(ord) => ord,
                        Err(_) => (a.raw() as usize).cmp(&(b.raw() as usize)),
                    }
                } else {
                    a.class_name().cmp(&b.class_name())
                }
            }
            _ => Ordering::Equal,
        }
    }

    pub fn hash_value(&self) -> Result<u64> {
        match self.resolve() {
            Value::Null => Err(type_error("Null value is not hashable")),
            Value::Boolean(b) => Ok(if b { 3 } else { 7 }),
            Value::Integer(n) => Ok(mix_hash(n as u64)),
            Value::Float(f) => {
                // Integral floats hash like the equal integer so that 2 and
                // 2.0 address the same table slot.
                if f.fract() == 0.0 && f.abs() <= MAX_SAFE_FLOAT_INT as f64 {
                    Ok(mix_hash(f as i64 as u64))
                } else {
                    Ok(mix_hash(f.to_bits()))
                }
            }
            Value::String(s) => Ok(s.hash_value()),
            Value::Object(obj) => obj.hash_value(),
            Value::Alias(_) => unreachable!("resolve() never yields an alias"),
        }
    }

    /// Render the value as text. `quote` wraps strings in double quotes,
    /// which container types use for their elements.
    pub fn to_display(&self, quote: bool) -> Result<String> {
        match self {
            Value::Null => Ok("null".to_string()),
            Value::Boolean(b) => Ok(b.to_string()),
            Value::Integer(n) => Ok(n.to_string()),
            Value::Float(f) => Ok(format_float(*f)),
            Value::String(s) => {
                if quote {
                    Ok(format!("\"{}\"", s))
                } else {
                    Ok(s.as_str().to_string())
                }
            }
            Value::Object(obj) => obj.to_display(quote),
            Value::Alias(cell) => cell.borrow().to_display(quote),
        }
    }
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{}", f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_falsiness() {
        assert!(!Value::Null.to_boolean());
        assert!(!Value::Boolean(false).to_boolean());
        assert!(!Value::Float(f64::NAN).to_boolean());
        assert!(Value::Integer(0).to_boolean());
        assert!(Value::Float(0.0).to_boolean());
        assert!(Value::String(Str::from("")).to_boolean());
    }

    #[test]
    fn test_alias_resolve_idempotent() {
        let mut v = Value::Integer(42);
        let alias = v.make_alias();
        assert!(v.is_alias());
        let r = alias.resolve();
        assert!(matches!(r, Value::Integer(42)));
        assert!(matches!(r.resolve(), Value::Integer(42)));
    }

    #[test]
    fn test_alias_writes_are_shared() {
        let mut v = Value::Integer(1);
        let alias = v.make_alias();
        if let Value::Alias(cell) = &alias {
            *cell.borrow_mut() = Value::Integer(99);
        }
        assert!(matches!(v.resolve(), Value::Integer(99)));
    }

    #[test]
    fn test_unalias() {
        let mut v = Value::Integer(5);
        v.make_alias();
        v.unalias();
        assert!(matches!(v, Value::Integer(5)));
    }

    #[test]
    fn test_null_equality() {
        assert!(Value::Null.equal(&Value::Null).unwrap());
        assert!(!Value::Null.equal(&Value::Integer(0)).unwrap());
        assert!(Value::Null.compare(&Value::Integer(0)).is_err());
    }

    #[test]
    fn test_numeric_promotion() {
        let a = Value::Integer(2);
        let b = Value::Float(2.0);
        assert!(a.equal(&b).unwrap());
        assert_eq!(a.compare(&Value::Float(3.0)).unwrap(), Ordering::Less);
        // Beyond 2^53 the promotion is refused.
        let big = Value::Integer(MAX_SAFE_FLOAT_INT + 1);
        assert!(big.equal(&b).is_err());
    }

    #[test]
    fn test_float_epsilon_equality() {
        assert!(float_equal(0.1 + 0.2, 0.3));
        assert!(!float_equal(0.1, 0.2));
    }

    #[test]
    fn test_hash_int_float_consistency() {
        let a = Value::Integer(7).hash_value().unwrap();
        let b = Value::Float(7.0).hash_value().unwrap();
        assert_eq!(a, b);
        assert!(Value::Null.hash_value().is_err());
    }

    #[test]
    fn test_to_string_round_trip() {
        let n = Value::Integer(-123456);
        let s = n.to_display(false).unwrap();
        assert_eq!(s.parse::<i64>().unwrap(), -123456);
    }

    #[test]
    fn test_string_conversions() {
        assert_eq!(Value::from("42").to_integer().unwrap(), 42);
        assert!(Value::from("x").to_integer().is_err());
        assert_eq!(Value::Boolean(true).to_integer().unwrap(), 1);
    }
}
