//! # Aggregation Plan
//!
//! The logical plan: an ordered list of steps derived from the parsed
//! command, before any processor is materialized. The distributor rewrites
//! a plan into a shard-local half (serialized back to argv) and a
//! coordinator-local half headed by a synthetic `Distribute` step.

pub mod parse;

pub use parse::{
    parse_aggregate_args, parse_aggregate_args_with_depth, substitute_params, ParsedAggregate,
};

use crate::error::{QueryError, QueryResult};
use crate::expr::Expr;
use serde_json::json;

/// One `SORTBY` key with its direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub ascending: bool,
}

/// A `REDUCE` invocation inside `GROUPBY`, still in name/argv form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReducerCall {
    /// Canonical (uppercase) reducer name.
    pub name: String,
    /// Property arguments with the `@` stripped.
    pub args: Vec<String>,
    pub alias: Option<String>,
}

impl ReducerCall {
    pub fn new(name: &str, args: Vec<String>, alias: Option<String>) -> Self {
        ReducerCall {
            name: name.to_ascii_uppercase(),
            args,
            alias,
        }
    }

    /// The column name this reducer produces: the explicit alias, or the
    /// generated `name(arg,…)` form.
    pub fn output_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        let lower = self.name.to_ascii_lowercase();
        if self.args.is_empty() {
            lower
        } else {
            format!("{}({})", lower, self.args.join(","))
        }
    }
}

/// `GROUPBY` step: group keys plus reducers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupStep {
    pub keys: Vec<String>,
    pub reducers: Vec<ReducerCall>,
}

/// Cursor pagination parameters (`WITHCURSOR`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorSpec {
    pub count: usize,
    pub max_idle_ms: Option<u64>,
}

/// Hybrid fusion mode; parameters resolved against the active limit at
/// plan time (see the hybrid request builder).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Combine {
    Rrf { k: f64, window: usize },
    Linear { alpha: f64, beta: f64 },
}

/// Synthetic head of a coordinator-local plan: carries the argv dispatched
/// to the shards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistributeStep {
    pub shard_argv: Vec<String>,
}

/// One logical plan step.
#[derive(Clone, Debug, PartialEq)]
pub enum PlanStep {
    /// Fetch the named document fields from the store.
    Load { fields: Vec<String> },
    /// `APPLY expr AS alias` — computed projection.
    Apply { expr: Expr, raw: String, alias: String },
    /// `FILTER expr` — drop rows where the expression is false or Null.
    Filter { expr: Expr, raw: String },
    Group(GroupStep),
    /// `SORTBY …` — the arrange step; `max` bounds the sorter heap.
    SortBy { keys: Vec<SortKey>, max: Option<usize> },
    Limit { offset: usize, count: usize },
    Cursor(CursorSpec),
    HybridMerge(Combine),
    Distribute(DistributeStep),
}

/// Ordered step list. The root (index scan) is implicit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggPlan {
    pub steps: Vec<PlanStep>,
}

impl AggPlan {
    pub fn new() -> Self {
        AggPlan::default()
    }

    /// Append a step, enforcing the composition rules that can be checked
    /// without a schema.
    pub fn push(&mut self, step: PlanStep) -> QueryResult<()> {
        if matches!(step, PlanStep::Load { .. }) && self.has_group() {
            // the grouper's output schema hides upstream columns
            return Err(QueryError::parse_args("LOAD is not allowed after GROUPBY"));
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn has_group(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, PlanStep::Group(_)))
    }

    /// The limit that applies to final results: the last non-trivial
    /// `LIMIT`, or the sorter's `MAX` when no limit is present.
    pub fn effective_limit(&self) -> Option<(usize, usize)> {
        let mut found = None;
        for step in &self.steps {
            if let PlanStep::Limit { offset, count } = step {
                if *count > 0 {
                    found = Some((*offset, *count));
                }
            }
        }
        found
    }

    pub fn cursor(&self) -> Option<CursorSpec> {
        self.steps.iter().find_map(|s| match s {
            PlanStep::Cursor(spec) => Some(*spec),
            _ => None,
        })
    }

    /// Log-safe diagnostic form: one JSON object per step, expressions in
    /// their obfuscated dump so user literals never reach log files.
    pub fn describe(&self) -> serde_json::Value {
        let steps: Vec<serde_json::Value> = self
            .steps
            .iter()
            .map(|step| match step {
                PlanStep::Load { fields } => json!({ "step": "LOAD", "fields": fields }),
                PlanStep::Apply { expr, alias, .. } => {
                    json!({ "step": "APPLY", "expr": expr.dump_obfuscated(), "as": alias })
                }
                PlanStep::Filter { expr, .. } => {
                    json!({ "step": "FILTER", "expr": expr.dump_obfuscated() })
                }
                PlanStep::Group(group) => json!({
                    "step": "GROUPBY",
                    "keys": group.keys,
                    "reducers": group
                        .reducers
                        .iter()
                        .map(|r| json!({ "name": r.name, "args": r.args, "as": r.output_name() }))
                        .collect::<Vec<_>>(),
                }),
                PlanStep::SortBy { keys, max } => json!({
                    "step": "SORTBY",
                    "keys": keys
                        .iter()
                        .map(|k| json!({ "field": k.field, "asc": k.ascending }))
                        .collect::<Vec<_>>(),
                    "max": max,
                }),
                PlanStep::Limit { offset, count } => {
                    json!({ "step": "LIMIT", "offset": offset, "count": count })
                }
                PlanStep::Cursor(spec) => json!({
                    "step": "WITHCURSOR",
                    "count": spec.count,
                    "max_idle_ms": spec.max_idle_ms,
                }),
                PlanStep::HybridMerge(Combine::Rrf { k, window }) => {
                    json!({ "step": "HYBRID_MERGE", "mode": "RRF", "k": k, "window": window })
                }
                PlanStep::HybridMerge(Combine::Linear { alpha, beta }) => {
                    json!({ "step": "HYBRID_MERGE", "mode": "LINEAR", "alpha": alpha, "beta": beta })
                }
                PlanStep::Distribute(dist) => {
                    json!({ "step": "DISTRIBUTE", "shard_argv": dist.shard_argv })
                }
            })
            .collect();
        serde_json::Value::Array(steps)
    }

    /// Serialize the plan back into shard-parser argv tokens. Token order
    /// is a wire contract; see the distributor.
    pub fn serialize_args(&self) -> Vec<String> {
        let mut out = Vec::new();
        for step in &self.steps {
            match step {
                PlanStep::Load { fields } => {
                    out.push("LOAD".to_string());
                    out.push(fields.len().to_string());
                    out.extend(fields.iter().map(|f| format!("@{f}")));
                }
                PlanStep::Apply { raw, alias, .. } => {
                    out.push("APPLY".to_string());
                    out.push(raw.clone());
                    out.push("AS".to_string());
                    out.push(alias.clone());
                }
                PlanStep::Filter { raw, .. } => {
                    out.push("FILTER".to_string());
                    out.push(raw.clone());
                }
                PlanStep::Group(group) => {
                    out.push("GROUPBY".to_string());
                    out.push(group.keys.len().to_string());
                    out.extend(group.keys.iter().map(|k| format!("@{k}")));
                    for reducer in &group.reducers {
                        out.push("REDUCE".to_string());
                        out.push(reducer.name.clone());
                        out.push(reducer.args.len().to_string());
                        out.extend(reducer.args.iter().map(|a| format!("@{a}")));
                        if let Some(alias) = &reducer.alias {
                            out.push("AS".to_string());
                            out.push(alias.clone());
                        }
                    }
                }
                PlanStep::SortBy { keys, max } => {
                    out.push("SORTBY".to_string());
                    out.push((keys.len() * 2).to_string());
                    for key in keys {
                        out.push(format!("@{}", key.field));
                        out.push(if key.ascending { "ASC" } else { "DESC" }.to_string());
                    }
                    if let Some(max) = max {
                        out.push("MAX".to_string());
                        out.push(max.to_string());
                    }
                }
                PlanStep::Limit { offset, count } => {
                    out.push("LIMIT".to_string());
                    out.push(offset.to_string());
                    out.push(count.to_string());
                }
                PlanStep::Cursor(spec) => {
                    out.push("WITHCURSOR".to_string());
                    out.push("COUNT".to_string());
                    out.push(spec.count.to_string());
                    if let Some(idle) = spec.max_idle_ms {
                        out.push("MAXIDLE".to_string());
                        out.push(idle.to_string());
                    }
                }
                // synthetic steps never serialize back to argv
                PlanStep::HybridMerge(_) | PlanStep::Distribute(_) => {}
            }
        }
        out
    }
}
