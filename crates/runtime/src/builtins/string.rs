//! String functions.

use merle_core::error::{index_error, Result};
use merle_core::list::List;
use merle_core::string::Str;
use merle_core::value::Value;

use crate::runtime::Runtime;

fn string_contains(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    let sub = args[1].get_string()?;
    Ok(Value::Boolean(s.contains(&sub)))
}

fn string_starts_with(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    let prefix = args[1].get_string()?;
    Ok(Value::Boolean(s.starts_with(&prefix)))
}

fn string_ends_with(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    let suffix = args[1].get_string()?;
    Ok(Value::Boolean(s.ends_with(&suffix)))
}

fn string_find1(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    let sub = args[1].get_string()?;
    Ok(Value::Integer(s.find(&sub, 1)?))
}

fn string_find2(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    let sub = args[1].get_string()?;
    let from = args[2].get_integer()?;
    Ok(Value::Integer(s.find(&sub, from)?))
}

fn string_rfind1(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    let sub = args[1].get_string()?;
    Ok(Value::Integer(s.rfind(&sub, -1)?))
}

fn string_rfind2(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    let sub = args[1].get_string()?;
    let from = args[2].get_integer()?;
    Ok(Value::Integer(s.rfind(&sub, from)?))
}

fn string_left(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    Ok(Value::String(s.left(args[1].get_integer()?)))
}

fn string_right(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    Ok(Value::String(s.right(args[1].get_integer()?)))
}

fn string_mid1(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    Ok(Value::String(s.mid(args[1].get_integer()?, None)?))
}

fn string_mid2(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    let from = args[1].get_integer()?;
    let count = args[2].get_integer()?;
    Ok(Value::String(s.mid(from, Some(count))?))
}

fn string_count(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    let sub = args[1].get_string()?;
    Ok(Value::Integer(s.count(&sub)))
}

fn string_split(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    let sep = args[1].get_string()?;
    let parts: Vec<Value> = s.split(&sep).into_iter().map(Value::String).collect();
    Ok(Value::from(rt.make(List::from_vec(parts))))
}

fn string_to_upper(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::String(args[0].get_string()?.to_upper()))
}

fn string_to_lower(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::String(args[0].get_string()?.to_lower()))
}

fn string_reverse(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::String(args[0].get_string()?.reversed()))
}

fn string_trim(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::String(args[0].get_string()?.trimmed()))
}

fn string_init(_rt: &mut Runtime, _args: &mut [Value]) -> Result<Value> {
    Ok(Value::String(Str::new()))
}

fn string_get_item(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    if rt.needs_reference() {
        return Err(merle_core::error::reference_error(
            "Cannot take a reference to a character in a string",
        ));
    }
    let s = args[0].get_string()?;
    Ok(Value::String(s.next_grapheme(args[1].get_integer()?)?))
}

fn string_get_field(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let s = args[0].get_string()?;
    let field = args[1].get_string()?;
    match field.as_str() {
        "length" => Ok(Value::Integer(s.grapheme_count())),
        "is_empty" => Ok(Value::Boolean(s.is_empty())),
        other => Err(index_error(format!("String has no field \"{}\"", other))),
    }
}

pub(super) fn register(rt: &mut Runtime) -> Result<()> {
    let string = rt.classes.handle_of::<Str>();
    let integer = rt.classes.handle_of::<i64>();

    rt.add_native("contains", string_contains, vec![string.clone(), string.clone()], 0)?;
    rt.add_native("starts_with", string_starts_with, vec![string.clone(), string.clone()], 0)?;
    rt.add_native("ends_with", string_ends_with, vec![string.clone(), string.clone()], 0)?;
    rt.add_native("find", string_find1, vec![string.clone(), string.clone()], 0)?;
    rt.add_native(
        "find",
        string_find2,
        vec![string.clone(), string.clone(), integer.clone()],
        0,
    )?;
    rt.add_native("rfind", string_rfind1, vec![string.clone(), string.clone()], 0)?;
    rt.add_native(
        "rfind",
        string_rfind2,
        vec![string.clone(), string.clone(), integer.clone()],
        0,
    )?;
    rt.add_native("left", string_left, vec![string.clone(), integer.clone()], 0)?;
    rt.add_native("right", string_right, vec![string.clone(), integer.clone()], 0)?;
    rt.add_native("mid", string_mid1, vec![string.clone(), integer.clone()], 0)?;
    rt.add_native(
        "mid",
        string_mid2,
        vec![string.clone(), integer.clone(), integer.clone()],
        0,
    )?;
    rt.add_native("count", string_count, vec![string.clone(), string.clone()], 0)?;
    rt.add_native("split", string_split, vec![string.clone(), string.clone()], 0)?;
    rt.add_native("to_upper", string_to_upper, vec![string.clone()], 0)?;
    rt.add_native("to_lower", string_to_lower, vec![string.clone()], 0)?;
    rt.add_native("reverse", string_reverse, vec![string.clone()], 0)?;
    rt.add_native("trim", string_trim, vec![string.clone()], 0)?;

    rt.add_method(&string, "init", string_init, vec![], 0)?;
    rt.add_method(
        &string,
        "get_item",
        string_get_item,
        vec![string.clone(), integer],
        0,
    )?;
    rt.add_method(
        &string,
        "get_field",
        string_get_field,
        vec![string.clone(), string.clone()],
        0,
    )?;
    Ok(())
}
