//! Array-shaped command replies.
//!
//! The wire protocol proper is out of scope; commands return this tree
//! and the embedder frames it. Shapes follow the classic contract: a
//! header count, then per-result frames; aggregations return rows as
//! field arrays only; cursor commands append the cursor id (0 when the
//! cursor is exhausted).

use crate::value::{format_number, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Int(i64),
    Double(f64),
    Str(String),
    Null,
    Array(Vec<Reply>),
}

impl Reply {
    /// Project a pipeline value into its reply frame.
    pub fn from_value(value: &Value) -> Reply {
        match value.deref() {
            Value::Null => Reply::Null,
            Value::Number(n) => {
                if *n == n.trunc() && n.is_finite() && n.abs() < 1e17 {
                    Reply::Int(*n as i64)
                } else {
                    Reply::Double(*n)
                }
            }
            Value::String(s) => Reply::Str(s.as_str().to_string()),
            Value::Array(items) => Reply::Array(items.iter().map(Reply::from_value).collect()),
            Value::Map(entries) => Reply::Array(
                entries
                    .iter()
                    .flat_map(|(k, v)| [Reply::Str(k.as_str().to_string()), Reply::from_value(v)])
                    .collect(),
            ),
            Value::Reference(_) => Reply::Null,
        }
    }

    /// Reverse projection, used when a coordinator re-reads shard rows.
    pub fn to_value(&self) -> Value {
        match self {
            Reply::Int(n) => Value::number(*n as f64),
            Reply::Double(d) => Value::number(*d),
            Reply::Str(s) => Value::string(s.as_str()),
            Reply::Null => Value::Null,
            Reply::Array(items) => Value::array(items.iter().map(Reply::to_value).collect()),
        }
    }

    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Score frames print in the canonical numeric form.
    pub fn score(score: f64) -> Reply {
        Reply::Str(format_number(score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_reply_as_ints() {
        assert_eq!(Reply::from_value(&Value::number(5.0)), Reply::Int(5));
        assert_eq!(Reply::from_value(&Value::number(2.5)), Reply::Double(2.5));
        assert_eq!(Reply::from_value(&Value::Null), Reply::Null);
    }

    #[test]
    fn value_round_trip_through_reply() {
        let v = Value::array(vec![Value::string("a"), Value::number(3.0)]);
        let back = Reply::from_value(&v).to_value();
        assert!(back.equals(&v));
    }
}
