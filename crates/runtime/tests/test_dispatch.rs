//! Unit tests for generic functions and overload resolution, driven
//! through the runtime's registration API.

use merle_core::error::{Result, RuntimeError};
use merle_core::list::List;
use merle_core::string::Str;
use merle_core::value::Value;
use merle_runtime::{AnyObject, Number, Runtime};

fn native_int(_rt: &mut Runtime, _args: &mut [Value]) -> Result<Value> {
    Ok(Value::from("int"))
}

fn native_float(_rt: &mut Runtime, _args: &mut [Value]) -> Result<Value> {
    Ok(Value::from("float"))
}

fn native_number(_rt: &mut Runtime, _args: &mut [Value]) -> Result<Value> {
    Ok(Value::from("number"))
}

fn native_object(_rt: &mut Runtime, _args: &mut [Value]) -> Result<Value> {
    Ok(Value::from("object"))
}

fn native_two(_rt: &mut Runtime, _args: &mut [Value]) -> Result<Value> {
    Ok(Value::from("two"))
}

/// Dispatch `name` on the given arguments and return the chosen overload's
/// result.
fn dispatch(rt: &mut Runtime, name: &str, args: Vec<Value>) -> std::result::Result<String, RuntimeError> {
    let function = rt
        .get_global(name)
        .expect("function is not registered")
        .handle::<merle_runtime::Function>()?;
    let closure = function.find_closure(&args, &rt.classes)?;
    let mut args = args;
    let result = rt.call_values(&closure, &mut args)?;
    Ok(result.get_string()?.as_str().to_string())
}

fn setup() -> Runtime {
    let mut rt = Runtime::new();
    let integer = rt.classes.handle_of::<i64>();
    let float = rt.classes.handle_of::<f64>();
    let number = rt.classes.handle_of::<Number>();
    let object = rt.classes.handle_of::<AnyObject>();

    rt.add_native("probe", native_int, vec![integer.clone()], 0).unwrap();
    rt.add_native("probe", native_float, vec![float], 0).unwrap();
    rt.add_native("probe", native_number, vec![number], 0).unwrap();
    rt.add_native("probe", native_object, vec![object.clone()], 0).unwrap();
    rt.add_native("probe", native_two, vec![integer.clone(), integer], 0)
        .unwrap();
    rt
}

#[test]
fn test_exact_match_wins() {
    let mut rt = setup();
    assert_eq!(dispatch(&mut rt, "probe", vec![Value::Integer(1)]).unwrap(), "int");
    assert_eq!(dispatch(&mut rt, "probe", vec![Value::Float(1.0)]).unwrap(), "float");
}

#[test]
fn test_nearest_ancestor_wins() {
    let mut rt = setup();
    // A string is only an Object: distance 1 beats nothing else.
    assert_eq!(
        dispatch(&mut rt, "probe", vec![Value::from("s")]).unwrap(),
        "object"
    );
}

#[test]
fn test_arity_selects_overload() {
    let mut rt = setup();
    assert_eq!(
        dispatch(&mut rt, "probe", vec![Value::Integer(1), Value::Integer(2)]).unwrap(),
        "two"
    );
}

#[test]
fn test_no_match_is_type_error() {
    let mut rt = setup();
    let e = dispatch(
        &mut rt,
        "probe",
        vec![Value::Integer(1), Value::from("s")],
    )
    .unwrap_err();
    assert_eq!(e.kind, merle_core::ErrorKind::Type);
    assert!(e.message.contains("Cannot resolve call"), "{}", e.message);
}

#[test]
fn test_null_argument_matches_at_distance_zero() {
    let mut rt = setup();
    // Null is assignable to every parameter, so all four one-argument
    // overloads tie... except the tie-break never happens because cost 0
    // is an exact match on the first candidate scanned. Scanning order is
    // by arity then registration, so `int` wins.
    assert_eq!(dispatch(&mut rt, "probe", vec![Value::Null]).unwrap(), "int");
}

#[test]
fn test_registration_merges_overloads() {
    let rt = setup();
    let function = rt
        .get_global("probe")
        .unwrap()
        .handle::<merle_runtime::Function>()
        .unwrap();
    assert_eq!(function.overload_count(), 5);
    assert_eq!(function.max_argc(), 2);
}

#[test]
fn test_class_chain_invariants() {
    let rt = Runtime::new();
    let object = rt.classes.get::<AnyObject>();
    let number = rt.classes.get::<Number>();
    let integer = rt.classes.get::<i64>();
    let string = rt.classes.get::<Str>();

    assert!(integer.inherits(number));
    assert!(integer.inherits(object));
    assert!(integer.inherits(integer));
    assert!(!number.inherits(integer));
    assert!(!string.inherits(number));

    assert_eq!(integer.distance(number), Some(1));
    assert_eq!(integer.distance(object), Some(2));
    assert_eq!(string.distance(object), Some(1));
    assert_eq!(number.distance(integer), None);
}

#[test]
fn test_value_class_resolution() {
    let rt = Runtime::new();
    assert_eq!(Value::Integer(1).class_of(&rt.classes).name(), "Integer");
    assert_eq!(Value::Null.class_of(&rt.classes).name(), "Null");
    let list = rt.make(List::new());
    assert_eq!(Value::from(list).class_of(&rt.classes).name(), "List");
}

#[test]
fn test_runtime_interning() {
    let mut rt = Runtime::new();
    let a = rt.intern("hello");
    let b = rt.intern("hello");
    assert!(std::rc::Rc::ptr_eq(&a, &b));
}

#[test]
fn test_collector_reclaims_cycles_built_through_api() {
    let rt = Runtime::new();
    let a = rt.make(List::new());
    let b = rt.make(List::new());
    a.items_mut().push(Value::from(b.clone()));
    b.items_mut().push(Value::from(a.clone()));
    drop(a);
    drop(b);
    assert!(rt.collect() >= 2);
    assert_eq!(rt.gc_candidate_count(), 0);
}
