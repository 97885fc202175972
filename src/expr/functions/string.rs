//! String expression functions.
//!
//! Null inputs flow through as Null; a non-string subject is stringified
//! with the canonical printer first. Only `substr`'s numeric arguments are
//! strict about their types.

use super::{register, RetType};
use crate::error::{QueryError, QueryResult};
use crate::expr::eval::EvalContext;
use crate::value::Value;

/// Stringify the subject argument, or `None` when it is Null.
fn subject(v: &Value) -> Option<String> {
    if v.is_null() {
        return None;
    }
    match v.as_str() {
        Some(s) => Some(s.to_string()),
        None => Some(v.to_display()),
    }
}

fn fn_lower(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    Ok(match subject(&args[0]) {
        Some(s) => Value::string(s.to_lowercase()),
        None => Value::Null,
    })
}

fn fn_upper(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    Ok(match subject(&args[0]) {
        Some(s) => Value::string(s.to_uppercase()),
        None => Value::Null,
    })
}

fn fn_strlen(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    Ok(match subject(&args[0]) {
        Some(s) => Value::number(s.len() as f64),
        None => Value::Null,
    })
}

/// `substr(str, offset, len)` — negative offset counts from the end,
/// negative len reads to the end of the string.
fn fn_substr(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    let Some(s) = subject(&args[0]) else {
        return Ok(Value::Null);
    };
    let offset = args[1]
        .to_number()
        .ok_or_else(|| QueryError::BadType("substr offset must be a number".to_string()))?
        as i64;
    let len = args[2]
        .to_number()
        .ok_or_else(|| QueryError::BadType("substr length must be a number".to_string()))?
        as i64;

    let bytes = s.as_bytes();
    let total = bytes.len() as i64;
    let start = if offset < 0 { total + offset } else { offset }.clamp(0, total) as usize;
    let end = if len < 0 {
        bytes.len()
    } else {
        (start + len as usize).min(bytes.len())
    };
    let slice = String::from_utf8_lossy(&bytes[start..end]).into_owned();
    Ok(Value::string(slice))
}

fn fn_startswith(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    let (s, p) = (subject(&args[0]), subject(&args[1]));
    Ok(match (s, p) {
        (Some(s), Some(p)) => Value::bool(s.starts_with(&p)),
        _ => Value::bool(false),
    })
}

fn fn_contains(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    let (s, n) = (subject(&args[0]), subject(&args[1]));
    Ok(match (s, n) {
        (Some(s), Some(n)) => Value::bool(s.contains(&n)),
        _ => Value::bool(false),
    })
}

/// `split(str [, separators [, strip]])` — split on any separator
/// character, trim strip characters, drop empty tokens.
fn fn_split(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    let Some(s) = subject(&args[0]) else {
        return Ok(Value::Null);
    };
    let seps = args
        .get(1)
        .and_then(subject)
        .unwrap_or_else(|| ",".to_string());
    let strip = args
        .get(2)
        .and_then(subject)
        .unwrap_or_else(|| " ".to_string());

    let sep_chars: Vec<char> = seps.chars().collect();
    let strip_chars: Vec<char> = strip.chars().collect();
    let items: Vec<Value> = s
        .split(|c| sep_chars.contains(&c))
        .map(|tok| tok.trim_matches(|c| strip_chars.contains(&c)))
        .filter(|tok| !tok.is_empty())
        .map(Value::string)
        .collect();
    Ok(Value::array(items))
}

/// `format(fmt, ...)` — `%s` substitutes the next argument's canonical
/// form, `%%` a literal percent. Anything else is an error.
fn fn_format(_: &EvalContext<'_>, args: &[Value]) -> QueryResult<Value> {
    let Some(fmt) = subject(&args[0]) else {
        return Err(QueryError::BadType("format string must not be null".to_string()));
    };
    let mut out = String::with_capacity(fmt.len());
    let mut next_arg = 1usize;
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') => {
                let Some(arg) = args.get(next_arg) else {
                    return Err(QueryError::BadValue(
                        "not enough arguments for format".to_string(),
                    ));
                };
                arg.write_display(&mut out);
                next_arg += 1;
            }
            other => {
                return Err(QueryError::BadValue(format!(
                    "unknown format directive `%{}`",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(Value::string(out))
}

pub(super) fn register_all() {
    let _ = register("lower", fn_lower, RetType::String, 1, 1);
    let _ = register("upper", fn_upper, RetType::String, 1, 1);
    let _ = register("strlen", fn_strlen, RetType::Number, 1, 1);
    let _ = register("substr", fn_substr, RetType::String, 3, 3);
    let _ = register("startswith", fn_startswith, RetType::Number, 2, 2);
    let _ = register("contains", fn_contains, RetType::Number, 2, 2);
    let _ = register("split", fn_split, RetType::Array, 1, 3);
    let _ = register("format", fn_format, RetType::String, 1, 16);
}

#[cfg(test)]
mod tests {
    use crate::expr::eval::{eval, EvalContext};
    use crate::expr::parse;
    use crate::lookup::Row;
    use crate::value::Value;

    fn run(src: &str) -> Value {
        let e = parse(src).unwrap();
        let row = Row::new();
        eval(&e, &EvalContext::new(&row)).unwrap()
    }

    #[test]
    fn casing_and_length() {
        assert_eq!(run("upper('abc')").as_str(), Some("ABC"));
        assert_eq!(run("lower('AbC')").as_str(), Some("abc"));
        assert_eq!(run("strlen('abcd')").to_number(), Some(4.0));
    }

    #[test]
    fn substr_negative_semantics() {
        assert_eq!(run("substr('hello world', 6, 5)").as_str(), Some("world"));
        assert_eq!(run("substr('hello', -3, -1)").as_str(), Some("llo"));
        assert_eq!(run("substr('hello', 99, 2)").as_str(), Some(""));
    }

    #[test]
    fn split_with_defaults() {
        let v = run("split(' a, b ,c ')");
        let items = v.as_array().unwrap();
        let texts: Vec<_> = items.iter().map(|i| i.as_str().unwrap()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn format_directives() {
        assert_eq!(run("format('%s-%s', 'a', 7)").as_str(), Some("a-7"));
        assert_eq!(run("format('100%%')").as_str(), Some("100%"));
        let e = parse("format('%d', 1)").unwrap();
        let row = Row::new();
        assert!(eval(&e, &EvalContext::new(&row)).is_err());
    }

    #[test]
    fn predicates() {
        assert!(run("startswith('hello', 'he')").is_truthy());
        assert!(!run("contains('hello', 'xyz')").is_truthy());
    }
}
