//! File functions.

use merle_core::error::{index_error, Result};
use merle_core::file::{File, OpenMode};
use merle_core::list::List;
use merle_core::string::Str;
use merle_core::value::Value;

use crate::runtime::Runtime;

fn file_open1(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let path = args[0].get_string()?;
    let file = File::open(path.as_str(), OpenMode::Read)?;
    Ok(Value::from(rt.make(file)))
}

fn file_open2(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let path = args[0].get_string()?;
    let mode = OpenMode::parse(args[1].get_string()?.as_str())?;
    let file = File::open(path.as_str(), mode)?;
    Ok(Value::from(rt.make(file)))
}

fn file_read_line(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let file = args[0].handle::<File>()?;
    Ok(Value::String(file.read_line()?))
}

fn file_read_all(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let file = args[0].handle::<File>()?;
    Ok(Value::String(file.read_all()?))
}

fn file_read_lines(rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let file = args[0].handle::<File>()?;
    let lines: Vec<Value> = file
        .read_lines()?
        .into_iter()
        .map(Value::String)
        .collect();
    Ok(Value::from(rt.make(List::from_vec(lines))))
}

fn file_write(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let file = args[0].handle::<File>()?;
    file.write(&args[1].to_display(false)?)?;
    Ok(Value::Null)
}

fn file_write_line(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let file = args[0].handle::<File>()?;
    file.write_line(&args[1].to_display(false)?)?;
    Ok(Value::Null)
}

fn file_write_lines(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let file = args[0].handle::<File>()?;
    let lines = args[1].handle::<List>()?;
    let texts: Vec<String> = {
        let items = lines.items();
        items
            .iter()
            .map(|v| v.to_display(false))
            .collect::<Result<_>>()?
    };
    for text in texts {
        file.write_line(&text)?;
    }
    Ok(Value::Null)
}

fn file_seek(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let file = args[0].handle::<File>()?;
    file.seek(args[1].get_integer()?)?;
    Ok(Value::Null)
}

fn file_tell(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let file = args[0].handle::<File>()?;
    Ok(Value::Integer(file.tell()?))
}

fn file_at_end(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let file = args[0].handle::<File>()?;
    Ok(Value::Boolean(file.at_end()?))
}

fn file_close(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    args[0].handle::<File>()?.close();
    Ok(Value::Null)
}

fn file_get_field(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let file = args[0].handle::<File>()?;
    let field = args[1].get_string()?;
    match field.as_str() {
        "path" => Ok(Value::String(Str::from(file.path()))),
        other => Err(index_error(format!("File has no field \"{}\"", other))),
    }
}

pub(super) fn register(rt: &mut Runtime) -> Result<()> {
    let file = rt.classes.handle_of::<File>();
    let string = rt.classes.handle_of::<Str>();
    let integer = rt.classes.handle_of::<i64>();
    let list = rt.classes.handle_of::<List>();

    rt.add_native("open", file_open1, vec![string.clone()], 0)?;
    rt.add_native("open", file_open2, vec![string.clone(), string.clone()], 0)?;
    rt.add_native("read_line", file_read_line, vec![file.clone()], 0)?;
    rt.add_native("read_all", file_read_all, vec![file.clone()], 0)?;
    rt.add_native("read_lines", file_read_lines, vec![file.clone()], 0)?;
    rt.add_native("write", file_write, vec![file.clone(), string.clone()], 0)?;
    rt.add_native("write_line", file_write_line, vec![file.clone(), string.clone()], 0)?;
    rt.add_native("write_lines", file_write_lines, vec![file.clone(), list], 0)?;
    rt.add_native("seek", file_seek, vec![file.clone(), integer], 0)?;
    rt.add_native("tell", file_tell, vec![file.clone()], 0)?;
    rt.add_native("at_end", file_at_end, vec![file.clone()], 0)?;
    rt.add_native("eof", file_at_end, vec![file.clone()], 0)?;
    rt.add_native("close", file_close, vec![file.clone()], 0)?;

    rt.add_method(&file, "init", file_open1, vec![string.clone()], 0)?;
    rt.add_method(&file, "init", file_open2, vec![string.clone(), string.clone()], 0)?;
    rt.add_method(&file, "get_field", file_get_field, vec![file.clone(), string], 0)?;
    Ok(())
}
