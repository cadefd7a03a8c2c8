//! Set functions.

use merle_core::error::{index_error, Result};
use merle_core::set::Set;
use merle_core::string::Str;
use merle_core::value::Value;

use crate::runtime::{AnyObject, Runtime};

fn set_init(rt: &mut Runtime, _args: &mut [Value]) -> Result<Value> {
    Ok(Value::from(rt.make(Set::new())))
}

fn set_insert(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let set = args[0].handle::<Set>()?;
    Ok(Value::Boolean(set.insert(args[1].resolve())))
}

fn set_remove(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let set = args[0].handle::<Set>()?;
    Ok(Value::Boolean(set.remove(&args[1].resolve())))
}

fn set_contains(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let set = args[0].handle::<Set>()?;
    Ok(Value::Boolean(set.contains(&args[1].resolve())))
}

fn set_clear(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    args[0].handle::<Set>()?.clear();
    Ok(Value::Null)
}

fn set_is_empty(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::Boolean(args[0].handle::<Set>()?.is_empty()))
}

fn set_intersect(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let a = args[0].handle::<Set>()?;
    let b = args[1].handle::<Set>()?;
    let result = a.intersect(&b);
    Ok(Value::from(rt.make(result)))
}

fn set_unite(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let a = args[0].handle::<Set>()?;
    let b = args[1].handle::<Set>()?;
    let result = a.unite(&b);
    Ok(Value::from(rt.make(result)))
}

fn set_subtract(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let a = args[0].handle::<Set>()?;
    let b = args[1].handle::<Set>()?;
    let result = a.subtract(&b);
    Ok(Value::from(rt.make(result)))
}

fn set_get_field(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let set = args[0].handle::<Set>()?;
    let field = args[1].get_string()?;
    match field.as_str() {
        "length" => Ok(Value::Integer(set.len())),
        "is_empty" => Ok(Value::Boolean(set.is_empty())),
        other => Err(index_error(format!("Set has no field \"{}\"", other))),
    }
}

pub(super) fn register(rt: &mut Runtime) -> Result<()> {
    let set = rt.classes.handle_of::<Set>();
    let object = rt.classes.handle_of::<AnyObject>();
    let string = rt.classes.handle_of::<Str>();

    rt.add_native("insert", set_insert, vec![set.clone(), object.clone()], 0)?;
    rt.add_native("remove", set_remove, vec![set.clone(), object.clone()], 0)?;
    rt.add_native("contains", set_contains, vec![set.clone(), object], 0)?;
    rt.add_native("clear", set_clear, vec![set.clone()], 0)?;
    rt.add_native("is_empty", set_is_empty, vec![set.clone()], 0)?;
    rt.add_native("intersect", set_intersect, vec![set.clone(), set.clone()], 0)?;
    rt.add_native("unite", set_unite, vec![set.clone(), set.clone()], 0)?;
    rt.add_native("subtract", set_subtract, vec![set.clone(), set.clone()], 0)?;

    rt.add_method(&set, "init", set_init, vec![], 0)?;
    rt.add_method(&set, "get_field", set_get_field, vec![set.clone(), string], 0)?;
    Ok(())
}
