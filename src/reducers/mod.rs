//! # Reducers
//!
//! Per-group accumulator states for `GROUPBY … REDUCE`. Every reducer is
//! commutative and associative, and carries a `merge` operation so the
//! coordinator half of a distributed plan can combine partial states (the
//! shard/coordinator pairs live in the distributor's rewrite table).
//!
//! Distinct-tracking reducers key values by canonical form: text for
//! strings, the bit pattern for floats with NaN normalized to one
//! representation.

use crate::error::{QueryError, QueryResult};
use crate::plan::ReducerCall;
use crate::value::Value;
use std::collections::HashSet;

/// Hashable canonical form of a value, for distinct sets and group keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Null,
    /// Float bit pattern; every NaN normalizes to the same bits.
    Num(u64),
    Str(String),
    /// Arrays and maps key by their canonical display form.
    Composite(String),
}

impl ValueKey {
    pub fn of(value: &Value) -> ValueKey {
        match value.deref() {
            Value::Null => ValueKey::Null,
            Value::Number(n) => {
                let canonical = if n.is_nan() { f64::NAN } else { *n };
                ValueKey::Num(canonical.to_bits())
            }
            Value::String(s) => ValueKey::Str(s.as_str().to_string()),
            other => ValueKey::Composite(other.to_display()),
        }
    }
}

/// The supported reducer set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReducerKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    CountDistinct,
    ToList,
    Stddev,
}

impl ReducerKind {
    /// Resolve a parsed `REDUCE` call, validating its arity.
    pub fn from_call(call: &ReducerCall) -> QueryResult<ReducerKind> {
        let (kind, want_args) = match call.name.as_str() {
            "COUNT" => (ReducerKind::Count, 0),
            "SUM" => (ReducerKind::Sum, 1),
            "AVG" => (ReducerKind::Avg, 1),
            "MIN" => (ReducerKind::Min, 1),
            "MAX" => (ReducerKind::Max, 1),
            "COUNT_DISTINCT" => (ReducerKind::CountDistinct, 1),
            "TOLIST" => (ReducerKind::ToList, 1),
            "STDDEV" => (ReducerKind::Stddev, 1),
            other => {
                return Err(QueryError::NoFunction(format!("reducer `{other}`")));
            }
        };
        if call.args.len() != want_args {
            return Err(QueryError::parse_args(format!(
                "reducer `{}` expects {} argument(s), got {}",
                call.name,
                want_args,
                call.args.len()
            )));
        }
        Ok(kind)
    }

    pub fn new_state(&self) -> ReducerState {
        match self {
            ReducerKind::Count => ReducerState::Count(0),
            ReducerKind::Sum => ReducerState::Sum(0.0),
            ReducerKind::Avg => ReducerState::Avg { sum: 0.0, count: 0 },
            ReducerKind::Min => ReducerState::Min(None),
            ReducerKind::Max => ReducerState::Max(None),
            ReducerKind::CountDistinct => ReducerState::CountDistinct(HashSet::new()),
            ReducerKind::ToList => ReducerState::ToList {
                seen: HashSet::new(),
                items: Vec::new(),
            },
            ReducerKind::Stddev => ReducerState::Stddev { n: 0, sum: 0.0, sqsum: 0.0 },
        }
    }
}

/// One group's accumulator for one reducer.
#[derive(Clone, Debug)]
pub enum ReducerState {
    Count(u64),
    Sum(f64),
    Avg { sum: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    CountDistinct(HashSet<ValueKey>),
    ToList { seen: HashSet<ValueKey>, items: Vec<Value> },
    Stddev { n: u64, sum: f64, sqsum: f64 },
}

impl ReducerState {
    /// Fold one contribution in. Array values contribute element-wise,
    /// which is what lets the coordinator union shard-side partial lists.
    pub fn add(&mut self, value: &Value) {
        if let Some(items) = value.as_array() {
            if !matches!(self, ReducerState::Count(_)) {
                for item in items {
                    self.add_scalar(item);
                }
                return;
            }
        }
        self.add_scalar(value);
    }

    fn add_scalar(&mut self, value: &Value) {
        match self {
            ReducerState::Count(n) => *n += 1,
            ReducerState::Sum(sum) => {
                if let Some(x) = value.to_number() {
                    *sum += x;
                }
            }
            ReducerState::Avg { sum, count } => {
                if let Some(x) = value.to_number() {
                    *sum += x;
                    *count += 1;
                }
            }
            ReducerState::Min(best) => {
                if !value.is_null()
                    && best
                        .as_ref()
                        .is_none_or(|b| value.total_cmp(b) == std::cmp::Ordering::Less)
                {
                    *best = Some(value.clone());
                }
            }
            ReducerState::Max(best) => {
                if !value.is_null()
                    && best
                        .as_ref()
                        .is_none_or(|b| value.total_cmp(b) == std::cmp::Ordering::Greater)
                {
                    *best = Some(value.clone());
                }
            }
            ReducerState::CountDistinct(seen) => {
                if !value.is_null() {
                    seen.insert(ValueKey::of(value));
                }
            }
            ReducerState::ToList { seen, items } => {
                if !value.is_null() && seen.insert(ValueKey::of(value)) {
                    items.push(value.deref().clone());
                }
            }
            ReducerState::Stddev { n, sum, sqsum } => {
                if let Some(x) = value.to_number() {
                    *n += 1;
                    *sum += x;
                    *sqsum += x * x;
                }
            }
        }
    }

    /// Combine another partial state of the same kind; coordinator-side
    /// only. Mismatched kinds are an internal error.
    pub fn merge(&mut self, other: ReducerState) -> QueryResult<()> {
        match (self, other) {
            (ReducerState::Count(a), ReducerState::Count(b)) => *a += b,
            (ReducerState::Sum(a), ReducerState::Sum(b)) => *a += b,
            (
                ReducerState::Avg { sum, count },
                ReducerState::Avg { sum: other_sum, count: other_count },
            ) => {
                *sum += other_sum;
                *count += other_count;
            }
            (ReducerState::Min(a), ReducerState::Min(b)) => {
                if let Some(v) = b {
                    if a.as_ref().is_none_or(|x| v.total_cmp(x) == std::cmp::Ordering::Less) {
                        *a = Some(v);
                    }
                }
            }
            (ReducerState::Max(a), ReducerState::Max(b)) => {
                if let Some(v) = b {
                    if a.as_ref().is_none_or(|x| v.total_cmp(x) == std::cmp::Ordering::Greater) {
                        *a = Some(v);
                    }
                }
            }
            (ReducerState::CountDistinct(a), ReducerState::CountDistinct(b)) => {
                a.extend(b);
            }
            (
                ReducerState::ToList { seen, items },
                ReducerState::ToList { items: other_items, .. },
            ) => {
                for item in other_items {
                    if seen.insert(ValueKey::of(&item)) {
                        items.push(item);
                    }
                }
            }
            (
                ReducerState::Stddev { n, sum, sqsum },
                ReducerState::Stddev { n: n2, sum: s2, sqsum: q2 },
            ) => {
                *n += n2;
                *sum += s2;
                *sqsum += q2;
            }
            _ => {
                return Err(QueryError::Internal(
                    "merged reducer states of different kinds".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Produce the group's output value.
    pub fn finalize(&self) -> Value {
        match self {
            ReducerState::Count(n) => Value::number(*n as f64),
            ReducerState::Sum(sum) => Value::number(*sum),
            ReducerState::Avg { count: 0, .. } => Value::Null,
            ReducerState::Avg { sum, count } => Value::number(sum / *count as f64),
            ReducerState::Min(best) | ReducerState::Max(best) => {
                best.clone().unwrap_or(Value::Null)
            }
            ReducerState::CountDistinct(seen) => Value::number(seen.len() as f64),
            ReducerState::ToList { items, .. } => Value::array(items.clone()),
            ReducerState::Stddev { n, sum, sqsum } => {
                if *n < 2 {
                    return Value::number(0.0);
                }
                let nf = *n as f64;
                let variance = ((sqsum - sum * sum / nf) / (nf - 1.0)).max(0.0);
                Value::number(variance.sqrt())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[&str]) -> ReducerCall {
        ReducerCall::new(name, args.iter().map(|s| s.to_string()).collect(), None)
    }

    #[test]
    fn arity_validation() {
        assert!(ReducerKind::from_call(&call("COUNT", &[])).is_ok());
        assert!(ReducerKind::from_call(&call("COUNT", &["x"])).is_err());
        assert!(ReducerKind::from_call(&call("avg", &["price"])).is_ok());
        assert!(ReducerKind::from_call(&call("MEDIAN", &["x"])).is_err());
    }

    #[test]
    fn count_ignores_values() {
        let mut state = ReducerKind::Count.new_state();
        state.add(&Value::Null);
        state.add(&Value::array(vec![Value::number(1.0), Value::number(2.0)]));
        assert_eq!(state.finalize().to_number(), Some(2.0));
    }

    #[test]
    fn avg_of_numbers() {
        let mut state = ReducerKind::Avg.new_state();
        for x in [10.0, 20.0, 30.0] {
            state.add(&Value::number(x));
        }
        assert_eq!(state.finalize().to_number(), Some(20.0));
        assert!(ReducerKind::Avg.new_state().finalize().is_null());
    }

    #[test]
    fn distinct_normalizes_nan_and_coerces_nothing() {
        let mut state = ReducerKind::CountDistinct.new_state();
        state.add(&Value::number(f64::NAN));
        state.add(&Value::number(-f64::NAN));
        state.add(&Value::number(1.0));
        state.add(&Value::string("1"));
        // nan, 1.0 and "1" are three distinct keys
        assert_eq!(state.finalize().to_number(), Some(3.0));
    }

    #[test]
    fn tolist_dedups_in_insertion_order() {
        let mut state = ReducerKind::ToList.new_state();
        for s in ["b", "a", "b", "c"] {
            state.add(&Value::string(s));
        }
        let out = state.finalize();
        let items: Vec<&str> = out.as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(items, vec!["b", "a", "c"]);
    }

    #[test]
    fn arrays_contribute_elementwise() {
        let mut state = ReducerKind::CountDistinct.new_state();
        state.add(&Value::array(vec![Value::string("x"), Value::string("y")]));
        state.add(&Value::array(vec![Value::string("y"), Value::string("z")]));
        assert_eq!(state.finalize().to_number(), Some(3.0));
    }

    #[test]
    fn merge_matches_single_node_results() {
        // sum over one node
        let mut whole = ReducerKind::Stddev.new_state();
        for x in [1.0, 2.0, 3.0, 4.0] {
            whole.add(&Value::number(x));
        }
        // split across two "shards"
        let mut a = ReducerKind::Stddev.new_state();
        a.add(&Value::number(1.0));
        a.add(&Value::number(2.0));
        let mut b = ReducerKind::Stddev.new_state();
        b.add(&Value::number(3.0));
        b.add(&Value::number(4.0));
        a.merge(b).unwrap();
        let lhs = whole.finalize().to_number().unwrap();
        let rhs = a.finalize().to_number().unwrap();
        assert!((lhs - rhs).abs() < 1e-9);
    }

    #[test]
    fn merge_kind_mismatch_is_internal() {
        let mut a = ReducerKind::Count.new_state();
        let b = ReducerKind::Sum.new_state();
        assert!(matches!(a.merge(b), Err(QueryError::Internal(_))));
    }
}
