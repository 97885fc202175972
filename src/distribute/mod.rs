//! # Plan Distributor
//!
//! Rewrites an aggregation plan into a shard-local half plus a
//! coordinator-local half joined by a synthetic `Distribute` step, and
//! serializes the shard half back into argv with a stable token order —
//! that argv is the wire contract with the shard parser.
//!
//! Reducer rewriting is a static table of `(shard op, coordinator op)`
//! pairs; anything outside the table forces the no-distribution fallback,
//! where shards run a bare search and the coordinator executes the whole
//! plan over the raw rows. The concatenation shard-half → coordinator-half
//! is semantically equivalent to running the original plan on one node.

use crate::error::QueryResult;
use crate::expr;
use crate::plan::{AggPlan, DistributeStep, GroupStep, PlanStep, ReducerCall};
use crate::wire::{serialize_slot_ranges, SlotRange};

/// A plan split for dispatch.
#[derive(Clone, Debug)]
pub struct DistributedPlan {
    pub index: String,
    pub query: String,
    pub shard_plan: AggPlan,
    pub coord_plan: AggPlan,
    pub slots: Vec<SlotRange>,
    /// True when a reducer outside the table forced raw-search dispatch.
    pub fallback: bool,
}

impl DistributedPlan {
    fn verb(&self) -> &'static str {
        if self.fallback {
            "_FT.SEARCH"
        } else {
            "_FT.AGGREGATE"
        }
    }

    /// Textual shard argv, binary SLOTS payload elided.
    pub fn shard_argv(&self) -> Vec<String> {
        let mut argv = vec![
            self.verb().to_string(),
            self.index.clone(),
            self.query.clone(),
        ];
        argv.extend(self.shard_plan.serialize_args());
        argv.push("WITHCURSOR".to_string());
        argv.push("WITHSCORES".to_string());
        argv.push("_NUM_SSTRING".to_string());
        argv
    }

    /// Full wire form with the binary slot-range array spliced in ahead of
    /// the trailing decorations.
    pub fn shard_argv_wire(&self) -> Vec<Vec<u8>> {
        let mut argv: Vec<Vec<u8>> = vec![
            self.verb().as_bytes().to_vec(),
            self.index.clone().into_bytes(),
            self.query.clone().into_bytes(),
        ];
        for token in self.shard_plan.serialize_args() {
            argv.push(token.into_bytes());
        }
        argv.push(b"SLOTS".to_vec());
        argv.push(serialize_slot_ranges(&self.slots));
        argv.push(b"WITHCURSOR".to_vec());
        argv.push(b"WITHSCORES".to_vec());
        argv.push(b"_NUM_SSTRING".to_vec());
        argv
    }
}

/// Sanitize an alias into something the expression lexer accepts as a
/// property name (generated aliases may contain parentheses).
fn temp_name(prefix: &str, alias: &str) -> String {
    let safe: String = alias
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("__{prefix}_{safe}")
}

/// One reducer's distributed rewrite.
struct ReducerRewrite {
    /// `APPLY`s the shard runs before its group (auxiliary columns).
    shard_applies: Vec<(String, String)>,
    shard_calls: Vec<ReducerCall>,
    coord_calls: Vec<ReducerCall>,
    /// `APPLY`s the coordinator runs after its group (final combines).
    coord_applies: Vec<(String, String)>,
}

/// Same-name pair: the shard runs `shard_name` over the source, the
/// coordinator folds the partials with `coord_name` over the alias column.
fn simple_pair(shard_name: &str, coord_name: &str, src: &Option<String>, alias: &str) -> ReducerRewrite {
    ReducerRewrite {
        shard_applies: vec![],
        shard_calls: vec![ReducerCall::new(
            shard_name,
            src.iter().cloned().collect(),
            Some(alias.to_string()),
        )],
        coord_calls: vec![ReducerCall::new(
            coord_name,
            vec![alias.to_string()],
            Some(alias.to_string()),
        )],
        coord_applies: vec![],
    }
}

/// The static rewrite table. `None` means the reducer does not distribute.
fn rewrite_reducer(call: &ReducerCall) -> Option<ReducerRewrite> {
    let alias = call.output_name();
    let src = call.args.first().cloned();
    match call.name.as_str() {
        // count partials sum up
        "COUNT" => Some(ReducerRewrite {
            shard_applies: vec![],
            shard_calls: vec![ReducerCall::new("COUNT", vec![], Some(alias.clone()))],
            coord_calls: vec![ReducerCall::new("SUM", vec![alias.clone()], Some(alias))],
            coord_applies: vec![],
        }),
        "SUM" => Some(simple_pair("SUM", "SUM", &src, &alias)),
        "MIN" => Some(simple_pair("MIN", "MIN", &src, &alias)),
        "MAX" => Some(simple_pair("MAX", "MAX", &src, &alias)),
        // partial distinct lists union on the coordinator
        "COUNT_DISTINCT" => Some(simple_pair("TOLIST", "COUNT_DISTINCT", &src, &alias)),
        "TOLIST" => Some(simple_pair("TOLIST", "TOLIST", &src, &alias)),
        "AVG" => {
            let src = src?;
            let count = temp_name("count", &alias);
            let sum = temp_name("sum", &alias);
            Some(ReducerRewrite {
                shard_applies: vec![],
                shard_calls: vec![
                    ReducerCall::new("COUNT", vec![], Some(count.clone())),
                    ReducerCall::new("SUM", vec![src], Some(sum.clone())),
                ],
                coord_calls: vec![
                    ReducerCall::new("SUM", vec![count.clone()], Some(count.clone())),
                    ReducerCall::new("SUM", vec![sum.clone()], Some(sum.clone())),
                ],
                coord_applies: vec![(format!("(@{sum} / @{count})"), alias)],
            })
        }
        "STDDEV" => {
            let src = src?;
            let count = temp_name("count", &alias);
            let sum = temp_name("sum", &alias);
            let sq = temp_name("sqsum", &alias);
            let sq_src = temp_name("sq", &alias);
            Some(ReducerRewrite {
                shard_applies: vec![(format!("(@{src} * @{src})"), sq_src.clone())],
                shard_calls: vec![
                    ReducerCall::new("COUNT", vec![], Some(count.clone())),
                    ReducerCall::new("SUM", vec![src], Some(sum.clone())),
                    ReducerCall::new("SUM", vec![sq_src], Some(sq.clone())),
                ],
                coord_calls: vec![
                    ReducerCall::new("SUM", vec![count.clone()], Some(count.clone())),
                    ReducerCall::new("SUM", vec![sum.clone()], Some(sum.clone())),
                    ReducerCall::new("SUM", vec![sq.clone()], Some(sq.clone())),
                ],
                coord_applies: vec![(
                    format!(
                        "case(@{count} < 2, 0, sqrt((@{sq} - (@{sum} * @{sum}) / @{count}) / (@{count} - 1)))"
                    ),
                    alias,
                )],
            })
        }
        _ => None,
    }
}

/// Push an `APPLY raw AS alias` pair, parsing the generated expression.
fn push_apply(plan: &mut AggPlan, raw: String, alias: String) -> QueryResult<()> {
    let parsed = expr::parse(&raw)?;
    plan.push(PlanStep::Apply { expr: parsed, raw, alias })
}

/// Names a grouped plan's shards must ship: group keys plus reducer
/// arguments.
fn group_inputs(group: &GroupStep) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for name in group.keys.iter().chain(group.reducers.iter().flat_map(|r| r.args.iter())) {
        if !fields.iter().any(|f| f == name) {
            fields.push(name.clone());
        }
    }
    fields
}

/// Split `plan` for dispatch over `slots`.
pub fn distribute_plan(
    index: &str,
    query: &str,
    plan: &AggPlan,
    slots: Vec<SlotRange>,
) -> QueryResult<DistributedPlan> {
    // a reducer outside the table forces the fallback before any cutting
    let undistributable = plan.steps.iter().any(|step| match step {
        PlanStep::Group(group) => group.reducers.iter().any(|r| rewrite_reducer(r).is_none()),
        _ => false,
    });
    if undistributable {
        return Ok(fallback_plan(index, query, plan, slots));
    }

    let limit_hint = plan.effective_limit().map(|(off, cnt)| off + cnt);
    let mut shard_plan = AggPlan::new();
    let mut coord_plan = AggPlan::new();
    let mut cut = false;

    for step in &plan.steps {
        if cut {
            // everything after the cut runs on the coordinator
            coord_plan.push(step.clone())?;
            continue;
        }
        match step {
            PlanStep::Load { .. } | PlanStep::Apply { .. } | PlanStep::Filter { .. } => {
                shard_plan.push(step.clone())?;
            }
            PlanStep::SortBy { keys, max } => {
                // shards produce a partial top-K, the coordinator re-sorts
                let shard_max = max.or(limit_hint);
                shard_plan.push(PlanStep::SortBy { keys: keys.clone(), max: shard_max })?;
                coord_plan.push(PlanStep::SortBy { keys: keys.clone(), max: *max })?;
            }
            PlanStep::Limit { offset, count } => {
                // shards keep offset+count rows, the coordinator windows
                shard_plan.push(PlanStep::Limit { offset: 0, count: offset + count })?;
                coord_plan.push(PlanStep::Limit { offset: *offset, count: *count })?;
            }
            PlanStep::Group(group) => {
                let (shard_group, coord_group, shard_applies, coord_applies) =
                    split_group(group);
                for (raw, alias) in shard_applies {
                    push_apply(&mut shard_plan, raw, alias)?;
                }
                shard_plan.push(PlanStep::Group(shard_group))?;
                coord_plan.push(PlanStep::Group(coord_group))?;
                for (raw, alias) in coord_applies {
                    push_apply(&mut coord_plan, raw, alias)?;
                }
                cut = true;
            }
            PlanStep::Cursor(spec) => {
                coord_plan.push(PlanStep::Cursor(*spec))?;
            }
            PlanStep::HybridMerge(_) | PlanStep::Distribute(_) => {
                // already-synthetic steps never redistribute
                coord_plan.push(step.clone())?;
            }
        }
    }

    let mut distributed = DistributedPlan {
        index: index.to_string(),
        query: query.to_string(),
        shard_plan,
        coord_plan,
        slots,
        fallback: false,
    };
    let head = PlanStep::Distribute(DistributeStep { shard_argv: distributed.shard_argv() });
    distributed.coord_plan.steps.insert(0, head);
    Ok(distributed)
}

fn split_group(
    group: &GroupStep,
) -> (GroupStep, GroupStep, Vec<(String, String)>, Vec<(String, String)>) {
    let mut shard_group = GroupStep { keys: group.keys.clone(), reducers: vec![] };
    let mut coord_group = GroupStep { keys: group.keys.clone(), reducers: vec![] };
    let mut shard_applies = Vec::new();
    let mut coord_applies = Vec::new();
    for call in &group.reducers {
        let rewrite = rewrite_reducer(call).expect("checked against the table");
        shard_applies.extend(rewrite.shard_applies);
        shard_group.reducers.extend(rewrite.shard_calls);
        coord_group.reducers.extend(rewrite.coord_calls);
        coord_applies.extend(rewrite.coord_applies);
    }
    (shard_group, coord_group, shard_applies, coord_applies)
}

/// No-distribution fallback: shards run a bare search that ships the
/// fields the plan needs; the whole plan executes on the coordinator.
fn fallback_plan(
    index: &str,
    query: &str,
    plan: &AggPlan,
    slots: Vec<SlotRange>,
) -> DistributedPlan {
    let mut needed: Vec<String> = Vec::new();
    for step in &plan.steps {
        let mut step_fields = Vec::new();
        match step {
            PlanStep::Load { fields } => step_fields.extend(fields.clone()),
            PlanStep::Group(group) => step_fields.extend(group_inputs(group)),
            PlanStep::Apply { expr, .. } | PlanStep::Filter { expr, .. } => {
                expr.properties(&mut step_fields);
            }
            PlanStep::SortBy { keys, .. } => {
                step_fields.extend(keys.iter().map(|k| k.field.clone()));
            }
            _ => {}
        }
        for field in step_fields {
            if !needed.iter().any(|f| f == &field) {
                needed.push(field);
            }
        }
    }
    let mut shard_plan = AggPlan::new();
    if !needed.is_empty() {
        let _ = shard_plan.push(PlanStep::Load { fields: needed });
    }

    let mut distributed = DistributedPlan {
        index: index.to_string(),
        query: query.to_string(),
        shard_plan,
        coord_plan: plan.clone(),
        slots,
        fallback: true,
    };
    let head = PlanStep::Distribute(DistributeStep { shard_argv: distributed.shard_argv() });
    distributed.coord_plan.steps.insert(0, head);
    distributed
}
