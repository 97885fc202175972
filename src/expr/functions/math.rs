//! Numeric expression functions.
//!
//! All are unary double-to-double maps. Inputs that do not coerce to a
//! number yield NaN rather than an error, so a bad field value poisons one
//! cell instead of the whole pipeline.

use super::{register, RetType};
use crate::error::QueryResult;
use crate::expr::eval::EvalContext;
use crate::value::Value;

fn unary(args: &[Value], f: fn(f64) -> f64) -> QueryResult<Value> {
    Ok(match args[0].to_number() {
        Some(d) => Value::number(f(d)),
        None => Value::number(f64::NAN),
    })
}

fn fn_log(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    unary(args, f64::ln)
}

fn fn_log2(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    unary(args, f64::log2)
}

fn fn_floor(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    unary(args, f64::floor)
}

fn fn_ceil(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    unary(args, f64::ceil)
}

fn fn_abs(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    unary(args, f64::abs)
}

fn fn_sqrt(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    unary(args, f64::sqrt)
}

fn fn_exp(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    unary(args, f64::exp)
}

pub(super) fn register_all() {
    for (name, handler) in [
        ("log", fn_log as super::FunctionHandler),
        ("log2", fn_log2),
        ("floor", fn_floor),
        ("ceil", fn_ceil),
        ("abs", fn_abs),
        ("sqrt", fn_sqrt),
        ("exp", fn_exp),
    ] {
        // builtins install once; duplicates are impossible here
        let _ = register(name, handler, RetType::Number, 1, 1);
    }
}
