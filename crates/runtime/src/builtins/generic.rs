//! Generic functions available on every value.

use merle_core::array::Array;
use merle_core::error::Result;
use merle_core::list::List;
use merle_core::set::Set;
use merle_core::string::Str;
use merle_core::table::Table;
use merle_core::value::Value;

use crate::runtime::{AnyObject, Runtime};

fn generic_type(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(args[0].class_of(&rt.classes).class_value())
}

fn len_string(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::Integer(args[0].get_string()?.grapheme_count()))
}

fn len_list(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::Integer(args[0].handle::<List>()?.len()))
}

fn len_table(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::Integer(args[0].handle::<Table>()?.len()))
}

fn len_set(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::Integer(args[0].handle::<Set>()?.len()))
}

fn len_array(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::Integer(args[0].handle::<Array>()?.len() as i64))
}

fn to_text(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::String(Str::from(args[0].to_display(false)?)))
}

pub(super) fn register(rt: &mut Runtime) -> Result<()> {
    let object = rt.classes.handle_of::<AnyObject>();
    let string = rt.classes.handle_of::<Str>();
    let list = rt.classes.handle_of::<List>();
    let table = rt.classes.handle_of::<Table>();
    let set = rt.classes.handle_of::<Set>();
    let array = rt.classes.handle_of::<Array>();

    rt.add_native("type", generic_type, vec![object.clone()], 0)?;
    rt.add_native("str", to_text, vec![object], 0)?;
    rt.add_native("len", len_string, vec![string], 0)?;
    rt.add_native("len", len_list, vec![list], 0)?;
    rt.add_native("len", len_table, vec![table], 0)?;
    rt.add_native("len", len_set, vec![set], 0)?;
    rt.add_native("len", len_array, vec![array], 0)?;
    Ok(())
}
