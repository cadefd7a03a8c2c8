//! Array functions.

use merle_core::array::Array;
use merle_core::error::{index_error, reference_error, Result};
use merle_core::list::List;
use merle_core::string::Str;
use merle_core::value::Value;

use crate::runtime::{Number, Runtime};

fn array_init(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let nrow = args[0].get_integer()?;
    let ncol = args[1].get_integer()?;
    if nrow < 1 || ncol < 1 {
        return Err(index_error("Array dimensions must be positive"));
    }
    Ok(Value::from(
        rt.make(Array::new(nrow as usize, ncol as usize)),
    ))
}

fn array_get_item1(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    if rt.needs_reference() {
        return Err(reference_error("Cannot take a reference to an array element"));
    }
    let array = args[0].handle::<Array>()?;
    Ok(Value::Float(array.at_linear(args[1].get_integer()?)?))
}

fn array_get_item2(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    if rt.needs_reference() {
        return Err(reference_error("Cannot take a reference to an array element"));
    }
    let array = args[0].handle::<Array>()?;
    let row = args[1].get_integer()?;
    let col = args[2].get_integer()?;
    Ok(Value::Float(array.at(row, col)?))
}

fn array_set_item1(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let array = args[0].handle::<Array>()?;
    let index = args[1].get_integer()?;
    array.set_linear(index, args[2].to_float()?)?;
    Ok(Value::Null)
}

fn array_set_item2(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let array = args[0].handle::<Array>()?;
    let row = args[1].get_integer()?;
    let col = args[2].get_integer()?;
    array.set(row, col, args[3].to_float()?)?;
    Ok(Value::Null)
}

fn array_get_field(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let array = args[0].handle::<Array>()?;
    let field = args[1].get_string()?;
    match field.as_str() {
        "nrow" => Ok(Value::Integer(array.nrow() as i64)),
        "ncol" => Ok(Value::Integer(array.ncol() as i64)),
        "length" => Ok(Value::Integer(array.len() as i64)),
        "dim" => Ok(Value::from(rt.make(List::from_vec(vec![
            Value::Integer(array.nrow() as i64),
            Value::Integer(array.ncol() as i64),
        ])))),
        other => Err(index_error(format!("Array has no field \"{}\"", other))),
    }
}

pub(super) fn register(rt: &mut Runtime) -> Result<()> {
    let array = rt.classes.handle_of::<Array>();
    let integer = rt.classes.handle_of::<i64>();
    let number = rt.classes.handle_of::<Number>();
    let string = rt.classes.handle_of::<Str>();

    rt.add_method(
        &array,
        "init",
        array_init,
        vec![integer.clone(), integer.clone()],
        0,
    )?;
    rt.add_method(
        &array,
        "get_item",
        array_get_item1,
        vec![array.clone(), integer.clone()],
        0,
    )?;
    rt.add_method(
        &array,
        "get_item",
        array_get_item2,
        vec![array.clone(), integer.clone(), integer.clone()],
        0,
    )?;
    rt.add_method(
        &array,
        "set_item",
        array_set_item1,
        vec![array.clone(), integer.clone(), number.clone()],
        0,
    )?;
    rt.add_method(
        &array,
        "set_item",
        array_set_item2,
        vec![array.clone(), integer.clone(), integer, number],
        0,
    )?;
    rt.add_method(
        &array,
        "get_field",
        array_get_field,
        vec![array.clone(), string],
        0,
    )?;
    Ok(())
}
