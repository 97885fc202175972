//! Expression evaluation against a lookup row.
//!
//! The walker is recursive but its depth is bounded at parse time, so the
//! evaluator never sees a tree deeper than the configured limit. Arithmetic
//! follows IEEE float semantics (`1/0 == inf`, `0/0 == nan`, `0^0 == 1`);
//! a `Null` operand makes the whole arithmetic result `Null` rather than an
//! error.

use super::{ArithOp, Condition, Expr};
use crate::error::{QueryError, QueryResult};
use crate::lookup::Row;
use crate::value::Value;

/// Metadata probe into the store, used by `hasfield` when the row carries
/// no scanned source hash.
pub trait FieldSource {
    fn has_field(&self, key: &str, field: &str) -> bool;
}

/// Everything an expression can see while evaluating one result.
pub struct EvalContext<'a> {
    pub row: &'a Row,
    /// Source document key of the in-flight result, when known.
    pub doc_key: Option<&'a str>,
    /// Store probe for `hasfield`.
    pub fields: Option<&'a dyn FieldSource>,
}

impl<'a> EvalContext<'a> {
    pub fn new(row: &'a Row) -> Self {
        EvalContext {
            row,
            doc_key: None,
            fields: None,
        }
    }

    pub fn with_doc_key(mut self, key: Option<&'a str>) -> Self {
        self.doc_key = key;
        self
    }

    pub fn with_fields(mut self, fields: &'a dyn FieldSource) -> Self {
        self.fields = Some(fields);
        self
    }
}

/// Evaluate `expr` into a fresh value.
pub fn eval(expr: &Expr, cx: &EvalContext<'_>) -> QueryResult<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Property { name, slot } => match slot {
            Some(slot) => Ok(cx.row.get(*slot).clone()),
            None => Err(QueryError::NoField(name.clone())),
        },
        Expr::Op { op, left, right } => {
            let l = eval(left, cx)?;
            if l.is_null() {
                return Ok(Value::Null);
            }
            let r = eval(right, cx)?;
            if r.is_null() {
                return Ok(Value::Null);
            }
            let l = coerce_number(&l, *op)?;
            let r = coerce_number(&r, *op)?;
            Ok(Value::number(apply_op(*op, l, r)))
        }
        Expr::Predicate { cond, left, right } => eval_predicate(*cond, left, right, cx),
        Expr::Not(inner) => {
            let v = eval(inner, cx)?;
            Ok(Value::bool(!v.is_truthy()))
        }
        Expr::Function { handler, args, .. } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, cx)?);
            }
            handler(cx, &values)
        }
        Expr::Case { cond, then, otherwise } => {
            // only the selected branch is evaluated
            let c = eval(cond, cx)?;
            if c.is_truthy() {
                eval(then, cx)
            } else {
                eval(otherwise, cx)
            }
        }
        Expr::Exists { slot, .. } => {
            let present = slot.is_some_and(|s| !cx.row.get(s).is_null());
            Ok(Value::bool(present))
        }
        Expr::HasField { field } => Ok(Value::bool(has_field(cx, field))),
        Expr::HasPrefix { prefix } => Ok(Value::bool(has_prefix(cx, prefix))),
    }
}

fn eval_predicate(
    cond: Condition,
    left: &Expr,
    right: &Expr,
    cx: &EvalContext<'_>,
) -> QueryResult<Value> {
    match cond {
        Condition::And => {
            let l = eval(left, cx)?;
            if !l.is_truthy() {
                return Ok(Value::bool(false));
            }
            let r = eval(right, cx)?;
            Ok(Value::bool(r.is_truthy()))
        }
        Condition::Or => {
            let l = eval(left, cx)?;
            if l.is_truthy() {
                return Ok(Value::bool(true));
            }
            let r = eval(right, cx)?;
            Ok(Value::bool(r.is_truthy()))
        }
        Condition::Eq | Condition::Ne => {
            let l = eval(left, cx)?;
            let r = eval(right, cx)?;
            let eq = l.equals(&r);
            Ok(Value::bool(if cond == Condition::Eq { eq } else { !eq }))
        }
        Condition::Lt | Condition::Le | Condition::Gt | Condition::Ge => {
            let l = eval(left, cx)?;
            let r = eval(right, cx)?;
            let verdict = match l.predicate_cmp(&r) {
                // comparisons against Null are false, never an error
                None => false,
                Some(ord) => match cond {
                    Condition::Lt => ord.is_lt(),
                    Condition::Le => ord.is_le(),
                    Condition::Gt => ord.is_gt(),
                    Condition::Ge => ord.is_ge(),
                    _ => unreachable!(),
                },
            };
            Ok(Value::bool(verdict))
        }
    }
}

fn coerce_number(v: &Value, op: ArithOp) -> QueryResult<f64> {
    v.to_number().ok_or_else(|| {
        QueryError::BadType(format!(
            "operand of `{}` is not a number",
            op.symbol()
        ))
    })
}

fn apply_op(op: ArithOp, l: f64, r: f64) -> f64 {
    match op {
        ArithOp::Add => l + r,
        ArithOp::Sub => l - r,
        ArithOp::Mul => l * r,
        ArithOp::Div => l / r,
        ArithOp::Mod => l % r,
        ArithOp::Pow => l.powf(r),
    }
}

fn has_field(cx: &EvalContext<'_>, field: &str) -> bool {
    if let Some(hash) = &cx.row.src_hash {
        return hash.contains_key(field);
    }
    let key = cx.doc_key.or(cx.row.src_key.as_deref());
    match (key, cx.fields) {
        (Some(key), Some(fields)) => fields.has_field(key, field),
        _ => false,
    }
}

fn has_prefix(cx: &EvalContext<'_>, prefix: &str) -> bool {
    let key = cx.doc_key.or(cx.row.src_key.as_deref());
    match key {
        Some(key) => {
            key.len() >= prefix.len() && key[..prefix.len()].eq_ignore_ascii_case(prefix)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;
    use crate::lookup::{KeyFlags, Lookup};

    fn run(src: &str, fields: &[(&str, Value)]) -> QueryResult<Value> {
        let mut lk = Lookup::new();
        let mut row = Row::new();
        for (name, value) in fields {
            let slot = lk.add(name, KeyFlags::DOC_SOURCE | KeyFlags::LOADED).unwrap();
            row.write(slot, value.clone());
        }
        let mut e = parse(src)?;
        e.bind(&mut lk)?;
        eval(&e, &EvalContext::new(&row))
    }

    #[test]
    fn arithmetic_identities() {
        assert_eq!(run("1 / 0", &[]).unwrap().to_number(), Some(f64::INFINITY));
        assert!(run("0 / 0", &[]).unwrap().to_number().unwrap().is_nan());
        assert!(run("5 % 0", &[]).unwrap().to_number().unwrap().is_nan());
        assert_eq!(run("0 ^ 0", &[]).unwrap().to_number(), Some(1.0));
    }

    #[test]
    fn null_propagates_through_arithmetic() {
        let v = run("@missing + 1", &[("missing", Value::Null)]).unwrap();
        assert!(v.is_null());
    }

    #[test]
    fn short_circuit_case_skips_divide() {
        // the false branch would divide by zero; it must not run
        let v = run("case(1, @foo + 10, @foo / 0)", &[("foo", Value::number(5.0))]).unwrap();
        assert_eq!(v.to_number(), Some(15.0));
    }

    #[test]
    fn short_circuit_logical_ops() {
        let v = run("1 == 1 || @foo / 0 > 1", &[("foo", Value::number(1.0))]).unwrap();
        assert!(v.is_truthy());
        let v = run("0 && @foo / 0 > 1", &[("foo", Value::number(1.0))]).unwrap();
        assert!(!v.is_truthy());
    }

    #[test]
    fn null_comparisons_are_false_not_errors() {
        assert!(!run("@x > 1", &[("x", Value::Null)]).unwrap().is_truthy());
        assert!(!run("@x < 1", &[("x", Value::Null)]).unwrap().is_truthy());
        assert!(run("@x == null", &[("x", Value::Null)]).unwrap().is_truthy());
    }

    #[test]
    fn string_coercion_in_comparisons() {
        assert!(run("@n < 20", &[("n", Value::string("9"))]).unwrap().is_truthy());
        assert!(run("@n == 9", &[("n", Value::string("9"))]).unwrap().is_truthy());
    }

    #[test]
    fn exists_reads_slot_presence() {
        assert!(run("exists(@x)", &[("x", Value::number(0.0))]).unwrap().is_truthy());
        assert!(!run("exists(@x)", &[("x", Value::Null)]).unwrap().is_truthy());
        assert!(!run("exists(@ghost)", &[]).unwrap().is_truthy());
    }

    #[test]
    fn hasprefix_reads_source_key() {
        let mut row = Row::new();
        row.src_key = Some("doc:1".into());
        let mut lk = Lookup::new();
        let mut e = parse("hasprefix('DOC:')").unwrap();
        e.bind(&mut lk).unwrap();
        let v = eval(&e, &EvalContext::new(&row)).unwrap();
        assert!(v.is_truthy());
    }
}
