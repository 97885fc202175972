//! Date/time expression functions.
//!
//! Timestamps are Unix seconds, always UTC. The truncation family
//! (`minute`, `hour`, `day`, `month`, `year`) rounds a timestamp down to
//! the start of its unit; the extraction family (`dayofweek`,
//! `dayofmonth`, `dayofyear`, `monthofyear`) pulls a calendar component
//! out. Non-coercible inputs yield NaN, parse failures yield Null.

use super::{register, RetType};
use crate::error::QueryResult;
use crate::expr::eval::EvalContext;
use crate::value::Value;
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};

const DEFAULT_TIME_FMT: &str = "%FT%TZ";

fn timestamp_arg(v: &Value) -> Option<i64> {
    match v.to_number() {
        Some(n) if n.is_finite() => Some(n as i64),
        _ => None,
    }
}

fn datetime(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts, 0)
}

fn truncate(args: &[Value], unit: fn(DateTime<Utc>) -> Option<i64>) -> QueryResult<Value> {
    let Some(ts) = timestamp_arg(&args[0]) else {
        return Ok(Value::number(f64::NAN));
    };
    Ok(match datetime(ts).and_then(unit) {
        Some(out) => Value::number(out as f64),
        None => Value::Null,
    })
}

fn extract(args: &[Value], part: fn(DateTime<Utc>) -> f64) -> QueryResult<Value> {
    let Some(ts) = timestamp_arg(&args[0]) else {
        return Ok(Value::number(f64::NAN));
    };
    Ok(match datetime(ts) {
        Some(dt) => Value::number(part(dt)),
        None => Value::Null,
    })
}

fn fn_minute(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    truncate(args, |dt| Some(dt.timestamp() - dt.timestamp().rem_euclid(60)))
}

fn fn_hour(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    truncate(args, |dt| Some(dt.timestamp() - dt.timestamp().rem_euclid(3600)))
}

fn fn_day(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    truncate(args, |dt| Some(dt.timestamp() - dt.timestamp().rem_euclid(86400)))
}

fn fn_month(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    truncate(args, |dt| {
        Utc.with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0)
            .single()
            .map(|d| d.timestamp())
    })
}

fn fn_year(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    truncate(args, |dt| {
        Utc.with_ymd_and_hms(dt.year(), 1, 1, 0, 0, 0)
            .single()
            .map(|d| d.timestamp())
    })
}

fn fn_dayofweek(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    // 0 = Sunday, matching struct tm
    extract(args, |dt| f64::from(dt.weekday().num_days_from_sunday()))
}

fn fn_dayofmonth(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    extract(args, |dt| f64::from(dt.day()))
}

fn fn_dayofyear(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    // 0-based, matching struct tm
    extract(args, |dt| f64::from(dt.ordinal0()))
}

fn fn_monthofyear(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    // 0-based, matching struct tm
    extract(args, |dt| f64::from(dt.month0()))
}

/// `timefmt(ts [, fmt])` — format a timestamp, ISO-8601 by default.
fn fn_timefmt(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    let Some(ts) = timestamp_arg(&args[0]) else {
        return Ok(Value::Null);
    };
    let fmt = args
        .get(1)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| DEFAULT_TIME_FMT.to_string());
    let Some(dt) = datetime(ts) else {
        return Ok(Value::Null);
    };
    // a bad user-supplied format surfaces as a write error, not a panic
    let mut out = String::new();
    use std::fmt::Write;
    Ok(match write!(out, "{}", dt.format(&fmt)) {
        Ok(()) => Value::string(out),
        Err(_) => Value::Null,
    })
}

/// `parsetime(str, fmt)` — inverse of `timefmt`; Null on parse failure.
fn fn_parsetime(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    let (Some(s), Some(fmt)) = (args[0].as_str(), args[1].as_str()) else {
        return Ok(Value::Null);
    };
    Ok(match NaiveDateTime::parse_from_str(s, fmt) {
        Ok(dt) => Value::number(dt.and_utc().timestamp() as f64),
        Err(_) => Value::Null,
    })
}

pub(super) fn register_all() {
    let _ = register("minute", fn_minute, RetType::Number, 1, 1);
    let _ = register("hour", fn_hour, RetType::Number, 1, 1);
    let _ = register("day", fn_day, RetType::Number, 1, 1);
    let _ = register("month", fn_month, RetType::Number, 1, 1);
    let _ = register("year", fn_year, RetType::Number, 1, 1);
    let _ = register("dayofweek", fn_dayofweek, RetType::Number, 1, 1);
    let _ = register("dayofmonth", fn_dayofmonth, RetType::Number, 1, 1);
    let _ = register("dayofyear", fn_dayofyear, RetType::Number, 1, 1);
    let _ = register("monthofyear", fn_monthofyear, RetType::Number, 1, 1);
    let _ = register("timefmt", fn_timefmt, RetType::String, 1, 2);
    let _ = register("parsetime", fn_parsetime, RetType::Number, 2, 2);
}
