//! Table functions.

use merle_core::error::{index_error, Result};
use merle_core::list::List;
use merle_core::string::Str;
use merle_core::table::{Key, Table};
use merle_core::value::Value;

use crate::interp::assign;
use crate::runtime::{AnyObject, Runtime};

fn table_init(rt: &mut Runtime, _args: &mut [Value]) -> Result<Value> {
    Ok(Value::from(rt.make(Table::new())))
}

fn table_get_item(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let table = args[0].handle::<Table>()?;
    let key = args[1].resolve();
    if rt.needs_reference() {
        let shown = key.to_display(true).unwrap_or_else(|_| "?".to_string());
        let mut map = table.map_mut();
        let slot = map
            .get_mut(&Key(key))
            .ok_or_else(|| index_error(format!("Missing key in table: {}", shown)))?;
        Ok(slot.make_alias())
    } else {
        table.get(&key).ok_or_else(|| {
            index_error(format!(
                "Missing key in table: {}",
                key.to_display(true).unwrap_or_else(|_| "?".to_string())
            ))
        })
    }
}

fn table_set_item(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let table = args[0].handle::<Table>()?;
    let key = args[1].resolve();
    let value = args[2].resolve();
    key.hash_value()?;
    let mut map = table.map_mut();
    match map.entry(Key(key)) {
        // Assign through the existing slot so aliases into it stay valid.
        std::collections::hash_map::Entry::Occupied(mut entry) => {
            assign(entry.get_mut(), value)?;
        }
        std::collections::hash_map::Entry::Vacant(entry) => {
            entry.insert(value);
        }
    }
    Ok(Value::Null)
}

fn table_get(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let table = args[0].handle::<Table>()?;
    let key = args[1].resolve();
    table
        .get(&key)
        .ok_or_else(|| index_error(format!(
            "Missing key in table: {}",
            key.to_display(true).unwrap_or_else(|_| "?".to_string())
        )))
}

fn table_get_default(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let table = args[0].handle::<Table>()?;
    Ok(table
        .get(&args[1].resolve())
        .unwrap_or_else(|| args[2].resolve()))
}

fn table_keys(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let table = args[0].handle::<Table>()?;
    Ok(Value::from(rt.make(List::from_vec(table.keys()))))
}

fn table_values(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let table = args[0].handle::<Table>()?;
    Ok(Value::from(rt.make(List::from_vec(table.values()))))
}

fn table_contains(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let table = args[0].handle::<Table>()?;
    Ok(Value::Boolean(table.contains(&args[1].resolve())))
}

fn table_remove(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let table = args[0].handle::<Table>()?;
    table.remove(&args[1].resolve());
    Ok(Value::Null)
}

fn table_clear(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    args[0].handle::<Table>()?.clear();
    Ok(Value::Null)
}

fn table_is_empty(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::Boolean(args[0].handle::<Table>()?.is_empty()))
}

fn table_get_field(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let table = args[0].handle::<Table>()?;
    let field = args[1].get_string()?;
    match field.as_str() {
        "length" => Ok(Value::Integer(table.len())),
        "is_empty" => Ok(Value::Boolean(table.is_empty())),
        "keys" => Ok(Value::from(rt.make(List::from_vec(table.keys())))),
        "values" => Ok(Value::from(rt.make(List::from_vec(table.values())))),
        other => Err(index_error(format!("Table has no field \"{}\"", other))),
    }
}

pub(super) fn register(rt: &mut Runtime) -> Result<()> {
    let table = rt.classes.handle_of::<Table>();
    let object = rt.classes.handle_of::<AnyObject>();
    let string = rt.classes.handle_of::<Str>();

    rt.add_native("get", table_get, vec![table.clone(), object.clone()], 0)?;
    rt.add_native(
        "get",
        table_get_default,
        vec![table.clone(), object.clone(), object.clone()],
        0,
    )?;
    rt.add_native("keys", table_keys, vec![table.clone()], 0)?;
    rt.add_native("values", table_values, vec![table.clone()], 0)?;
    rt.add_native("contains", table_contains, vec![table.clone(), object.clone()], 0)?;
    rt.add_native("remove", table_remove, vec![table.clone(), object.clone()], 0)?;
    rt.add_native("clear", table_clear, vec![table.clone()], 0)?;
    rt.add_native("is_empty", table_is_empty, vec![table.clone()], 0)?;

    rt.add_method(&table, "init", table_init, vec![], 0)?;
    rt.add_method(
        &table,
        "get_item",
        table_get_item,
        vec![table.clone(), object.clone()],
        0,
    )?;
    rt.add_method(
        &table,
        "set_item",
        table_set_item,
        vec![table.clone(), object.clone(), object],
        0,
    )?;
    rt.add_method(
        &table,
        "get_field",
        table_get_field,
        vec![table.clone(), string],
        0,
    )?;
    Ok(())
}
