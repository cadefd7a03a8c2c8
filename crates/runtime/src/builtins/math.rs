//! Numeric functions.

use merle_core::error::{math_error, Result};
use merle_core::value::Value;

use crate::runtime::{Number, Runtime};

fn math_abs(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    match args[0].resolve() {
        Value::Integer(n) => n
            .checked_abs()
            .map(Value::Integer)
            .ok_or_else(|| math_error("Integer overflow")),
        other => Ok(Value::Float(other.get_number()?.abs())),
    }
}

fn math_min(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let a = args[0].resolve();
    let b = args[1].resolve();
    if a.compare(&b)?.is_le() {
        Ok(a)
    } else {
        Ok(b)
    }
}

fn math_max(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
    let a = args[0].resolve();
    let b = args[1].resolve();
    if a.compare(&b)?.is_ge() {
        Ok(a)
    } else {
        Ok(b)
    }
}

fn math_random(_rt: &mut Runtime, _args: &mut [Value]) -> Result<Value> {
    Ok(Value::Float(rand::random::<f64>()))
}

macro_rules! float_fn {
    ($name:ident, $method:ident) => {
        fn $name(_rt: &mut Runtime, args: &mut [Value]) -> Result<Value> {
            Ok(Value::Float(args[0].get_number()?.$method()))
        }
    };
}

float_fn!(math_round, round);
float_fn!(math_floor, floor);
float_fn!(math_ceil, ceil);
float_fn!(math_sqrt, sqrt);
float_fn!(math_exp, exp);
float_fn!(math_log, ln);
float_fn!(math_log2, log2);
float_fn!(math_log10, log10);
float_fn!(math_sin, sin);
float_fn!(math_cos, cos);
float_fn!(math_tan, tan);

pub(super) fn register(rt: &mut Runtime) -> Result<()> {
    let number = rt.classes.handle_of::<Number>();

    rt.add_native("abs", math_abs, vec![number.clone()], 0)?;
    rt.add_native("min", math_min, vec![number.clone(), number.clone()], 0)?;
    rt.add_native("max", math_max, vec![number.clone(), number.clone()], 0)?;
    rt.add_native("random", math_random, vec![], 0)?;
    rt.add_native("round", math_round, vec![number.clone()], 0)?;
    rt.add_native("floor", math_floor, vec![number.clone()], 0)?;
    rt.add_native("ceil", math_ceil, vec![number.clone()], 0)?;
    rt.add_native("sqrt", math_sqrt, vec![number.clone()], 0)?;
    rt.add_native("exp", math_exp, vec![number.clone()], 0)?;
    rt.add_native("log", math_log, vec![number.clone()], 0)?;
    rt.add_native("log2", math_log2, vec![number.clone()], 0)?;
    rt.add_native("log10", math_log10, vec![number.clone()], 0)?;
    rt.add_native("sin", math_sin, vec![number.clone()], 0)?;
    rt.add_native("cos", math_cos, vec![number.clone()], 0)?;
    rt.add_native("tan", math_tan, vec![number], 0)?;
    Ok(())
}
