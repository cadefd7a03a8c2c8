//! Regex functions.

use merle_core::error::{index_error, Result};
use merle_core::regexp::Regex;
use merle_core::string::Str;
use merle_core::value::Value;

use crate::runtime::Runtime;

fn regex_init(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let pattern = args[0].get_string()?;
    let re = Regex::new(pattern.as_str())?;
    Ok(Value::from(rt.make(re)))
}

fn regex_match2(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let re = args[0].handle::<Regex>()?;
    let subject = args[1].get_string()?;
    Ok(Value::Boolean(re.match_from(subject.as_str(), 1)?))
}

fn regex_match3(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let re = args[0].handle::<Regex>()?;
    let subject = args[1].get_string()?;
    let from = args[2].get_integer()?;
    Ok(Value::Boolean(re.match_from(subject.as_str(), from)?))
}

fn regex_has_match(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::Boolean(args[0].handle::<Regex>()?.has_match()))
}

fn regex_count(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::Integer(args[0].handle::<Regex>()?.count()))
}

fn regex_group(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let re = args[0].handle::<Regex>()?;
    Ok(Value::String(re.capture(args[1].get_integer()?)?))
}

fn regex_group_start(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let re = args[0].handle::<Regex>()?;
    Ok(Value::Integer(re.capture_start(args[1].get_integer()?)?))
}

fn regex_group_end(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let re = args[0].handle::<Regex>()?;
    Ok(Value::Integer(re.capture_end(args[1].get_integer()?)?))
}

fn regex_get_field(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let re = args[0].handle::<Regex>()?;
    let field = args[1].get_string()?;
    match field.as_str() {
        "pattern" => Ok(Value::String(Str::from(re.pattern()))),
        "length" => Ok(Value::Integer(re.count())),
        other => Err(index_error(format!("Regex has no field \"{}\"", other))),
    }
}

pub(super) fn register(rt: &mut Runtime) -> Result<()> {
    let regex = rt.classes.handle_of::<Regex>();
    let string = rt.classes.handle_of::<Str>();
    let integer = rt.classes.handle_of::<i64>();

    rt.add_native("match", regex_match2, vec![regex.clone(), string.clone()], 0)?;
    rt.add_native(
        "match",
        regex_match3,
        vec![regex.clone(), string.clone(), integer.clone()],
        0,
    )?;
    rt.add_native("has_match", regex_has_match, vec![regex.clone()], 0)?;
    rt.add_native("count", regex_count, vec![regex.clone()], 0)?;
    rt.add_native("group", regex_group, vec![regex.clone(), integer.clone()], 0)?;
    rt.add_native(
        "group_start",
        regex_group_start,
        vec![regex.clone(), integer.clone()],
        0,
    )?;
    rt.add_native("group_end", regex_group_end, vec![regex.clone(), integer], 0)?;

    rt.add_method(&regex, "init", regex_init, vec![string.clone()], 0)?;
    rt.add_method(&regex, "get_field", regex_get_field, vec![regex.clone(), string], 0)?;
    Ok(())
}
