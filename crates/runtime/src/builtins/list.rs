//! List functions.

use rand::seq::SliceRandom;

use merle_core::error::{index_error, Result};
use merle_core::list::List;
use merle_core::set::SetKey;
use merle_core::string::Str;
use merle_core::value::Value;

use crate::interp::assign;
use crate::runtime::{AnyObject, Runtime};

fn list_init(rt: &mut Runtime, _args: &mut [Value]) -> Result<Value> {
    Ok(Value::from(rt.make(List::new())))
}

fn list_get_item(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let index = args[1].get_integer()?;
    let offset = lst.check_index(index)?;
    let mut items = lst.items_mut();
    if rt.needs_reference() {
        Ok(items[offset].make_alias())
    } else {
        Ok(items[offset].resolve())
    }
}

fn list_set_item(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let offset = lst.check_index(args[1].get_integer()?)?;
    let value = args[2].resolve();
    let mut items = lst.items_mut();
    assign(&mut items[offset], value)?;
    Ok(Value::Null)
}

fn list_append(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let value = args[1].resolve();
    lst.items_mut().push(value);
    Ok(Value::Null)
}

fn list_prepend(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let value = args[1].resolve();
    lst.items_mut().insert(0, value);
    Ok(Value::Null)
}

fn list_insert(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let position = args[1].get_integer()?;
    let value = args[2].resolve();
    let len = lst.len();
    // Inserting one past the end is appending.
    let offset = if position == len + 1 {
        len as usize
    } else {
        lst.check_index(position)?
    };
    lst.items_mut().insert(offset, value);
    Ok(Value::Null)
}

fn list_remove_at(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let offset = lst.check_index(args[1].get_integer()?)?;
    let removed = lst.items_mut().remove(offset);
    Ok(removed.resolve())
}

fn list_remove(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let needle = args[1].resolve();
    lst.items_mut()
        .retain(|item| !item.equal(&needle).unwrap_or(false));
    Ok(Value::Null)
}

fn list_remove_first(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let needle = args[1].resolve();
    let position = lst.find(&needle, 1)?;
    if position > 0 {
        lst.items_mut().remove(position as usize - 1);
    }
    Ok(Value::Null)
}

fn list_remove_last(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let needle = args[1].resolve();
    let position = lst.rfind(&needle, -1)?;
    if position > 0 {
        lst.items_mut().remove(position as usize - 1);
    }
    Ok(Value::Null)
}

fn list_find1(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    Ok(Value::Integer(lst.find(&args[1].resolve(), 1)?))
}

fn list_find2(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let from = args[2].get_integer()?;
    Ok(Value::Integer(lst.find(&args[1].resolve(), from)?))
}

fn list_rfind1(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    Ok(Value::Integer(lst.rfind(&args[1].resolve(), -1)?))
}

fn list_rfind2(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let from = args[2].get_integer()?;
    Ok(Value::Integer(lst.rfind(&args[1].resolve(), from)?))
}

fn list_contains(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    Ok(Value::Boolean(lst.contains(&args[1].resolve())))
}

fn list_first(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    if lst.is_empty() {
        return Err(index_error("Cannot get first element in empty list"));
    }
    lst.at(1)
}

fn list_last(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    if lst.is_empty() {
        return Err(index_error("Cannot get last element in empty list"));
    }
    lst.at(-1)
}

fn list_pop(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let item = lst
        .items_mut()
        .pop()
        .ok_or_else(|| index_error("Cannot pop from empty list"))?;
    Ok(item.resolve())
}

fn list_shift(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    if lst.is_empty() {
        return Err(index_error("Cannot shift from empty list"));
    }
    let item = lst.items_mut().remove(0);
    Ok(item.resolve())
}

fn list_clear(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    args[0].handle::<List>()?.items_mut().clear();
    Ok(Value::Null)
}

fn list_is_empty(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    Ok(Value::Boolean(args[0].handle::<List>()?.is_empty()))
}

fn list_sort(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    lst.items_mut().sort_by(|a, b| a.total_cmp(b));
    Ok(Value::Null)
}

fn list_is_sorted(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let items = lst.items();
    let sorted = items.windows(2).all(|w| w[0].total_cmp(&w[1]).is_le());
    Ok(Value::Boolean(sorted))
}

fn list_reverse(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    args[0].handle::<List>()?.items_mut().reverse();
    Ok(Value::Null)
}

fn list_shuffle(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let mut rng = rand::thread_rng();
    lst.items_mut().shuffle(&mut rng);
    Ok(Value::Null)
}

fn list_sample(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let n = args[1].get_integer()?.max(0) as usize;
    let mut rng = rand::thread_rng();
    let sampled: Vec<Value> = {
        let items = lst.items();
        items.choose_multiple(&mut rng, n).cloned().collect()
    };
    Ok(Value::from(rt.make(List::from_vec(sampled))))
}

fn list_join(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let separator = args[1].get_string()?;
    let parts: Vec<String> = {
        let items = lst.items();
        items
            .iter()
            .map(|item| item.to_display(false))
            .collect::<Result<_>>()?
    };
    Ok(Value::String(Str::from(parts.join(separator.as_str()))))
}

/// Sorted distinct elements, the working set for the list algebra.
fn sorted_keys(lst: &List) -> Vec<SetKey> {
    let mut keys: Vec<SetKey> = lst.items().iter().map(|v| SetKey(v.resolve())).collect();
    keys.sort();
    keys.dedup();
    keys
}

fn list_intersect(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let a = args[0].handle::<List>()?;
    let b = args[1].handle::<List>()?;
    let other = sorted_keys(&b);
    let items: Vec<Value> = sorted_keys(&a)
        .into_iter()
        .filter(|k| other.binary_search(k).is_ok())
        .map(|k| k.0)
        .collect();
    Ok(Value::from(rt.make(List::from_vec(items))))
}

fn list_unite(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let a = args[0].handle::<List>()?;
    let b = args[1].handle::<List>()?;
    let mut keys = sorted_keys(&a);
    keys.extend(sorted_keys(&b));
    keys.sort();
    keys.dedup();
    let items: Vec<Value> = keys.into_iter().map(|k| k.0).collect();
    Ok(Value::from(rt.make(List::from_vec(items))))
}

fn list_subtract(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let a = args[0].handle::<List>()?;
    let b = args[1].handle::<List>()?;
    let other = sorted_keys(&b);
    let items: Vec<Value> = sorted_keys(&a)
        .into_iter()
        .filter(|k| other.binary_search(k).is_err())
        .map(|k| k.0)
        .collect();
    Ok(Value::from(rt.make(List::from_vec(items))))
}

fn list_get_field(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let lst = args[0].handle::<List>()?;
    let field = args[1].get_string()?;
    match field.as_str() {
        "length" => Ok(Value::Integer(lst.len())),
        "is_empty" => Ok(Value::Boolean(lst.is_empty())),
        "first" => list_first(rt, args),
        "last" => list_last(rt, args),
        "sort" => {
            let mut items = lst.items().clone();
            items.sort_by(|a, b| a.total_cmp(b));
            Ok(Value::from(rt.make(List::from_vec(items))))
        }
        "reverse" => {
            let mut items = lst.items().clone();
            items.reverse();
            Ok(Value::from(rt.make(List::from_vec(items))))
        }
        other => Err(index_error(format!("List has no field \"{}\"", other))),
    }
}

pub(super) fn register(rt: &mut Runtime) -> Result<()> {
    let list = rt.classes.handle_of::<List>();
    let object = rt.classes.handle_of::<AnyObject>();
    let string = rt.classes.handle_of::<Str>();
    let integer = rt.classes.handle_of::<i64>();

    rt.add_native("append", list_append, vec![list.clone(), object.clone()], 0)?;
    rt.add_native("prepend", list_prepend, vec![list.clone(), object.clone()], 0)?;
    rt.add_native(
        "insert",
        list_insert,
        vec![list.clone(), integer.clone(), object.clone()],
        0,
    )?;
    rt.add_native("remove", list_remove, vec![list.clone(), object.clone()], 0)?;
    rt.add_native(
        "remove_at",
        list_remove_at,
        vec![list.clone(), integer.clone()],
        0,
    )?;
    rt.add_native(
        "remove_first",
        list_remove_first,
        vec![list.clone(), object.clone()],
        0,
    )?;
    rt.add_native(
        "remove_last",
        list_remove_last,
        vec![list.clone(), object.clone()],
        0,
    )?;
    rt.add_native("find", list_find1, vec![list.clone(), object.clone()], 0)?;
    rt.add_native(
        "find",
        list_find2,
        vec![list.clone(), object.clone(), integer.clone()],
        0,
    )?;
    rt.add_native("rfind", list_rfind1, vec![list.clone(), object.clone()], 0)?;
    rt.add_native(
        "rfind",
        list_rfind2,
        vec![list.clone(), object.clone(), integer.clone()],
        0,
    )?;
    rt.add_native("contains", list_contains, vec![list.clone(), object.clone()], 0)?;
    rt.add_native("first", list_first, vec![list.clone()], 0)?;
    rt.add_native("last", list_last, vec![list.clone()], 0)?;
    rt.add_native("pop", list_pop, vec![list.clone()], 0)?;
    rt.add_native("shift", list_shift, vec![list.clone()], 0)?;
    rt.add_native("clear", list_clear, vec![list.clone()], 0)?;
    rt.add_native("is_empty", list_is_empty, vec![list.clone()], 0)?;
    rt.add_native("sort", list_sort, vec![list.clone()], 0)?;
    rt.add_native("is_sorted", list_is_sorted, vec![list.clone()], 0)?;
    rt.add_native("reverse", list_reverse, vec![list.clone()], 0)?;
    rt.add_native("shuffle", list_shuffle, vec![list.clone()], 0)?;
    rt.add_native("sample", list_sample, vec![list.clone(), integer.clone()], 0)?;
    rt.add_native("join", list_join, vec![list.clone(), string.clone()], 0)?;
    rt.add_native("intersect", list_intersect, vec![list.clone(), list.clone()], 0)?;
    rt.add_native("unite", list_unite, vec![list.clone(), list.clone()], 0)?;
    rt.add_native("subtract", list_subtract, vec![list.clone(), list.clone()], 0)?;

    rt.add_method(&list, "init", list_init, vec![], 0)?;
    rt.add_method(
        &list,
        "get_item",
        list_get_item,
        vec![list.clone(), integer.clone()],
        0,
    )?;
    rt.add_method(
        &list,
        "set_item",
        list_set_item,
        vec![list.clone(), integer, object],
        0,
    )?;
    rt.add_method(
        &list,
        "get_field",
        list_get_field,
        vec![list.clone(), string],
        0,
    )?;
    Ok(())
}
