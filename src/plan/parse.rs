//! `AGGREGATE` argument parser.
//!
//! Walks the argv tail after the index name and produces the logical plan
//! plus request-level options. The same vocabulary is what the distributor
//! serializes back, so shard-dispatched subplans re-enter through this
//! parser unchanged.

use super::{AggPlan, CursorSpec, GroupStep, PlanStep, ReducerCall, SortKey};
use crate::error::{QueryError, QueryResult};
use crate::expr;

/// Default page size for `WITHCURSOR` without `COUNT`.
pub const DEFAULT_CURSOR_COUNT: usize = 1000;

/// A parsed `AGGREGATE` command minus its index name.
#[derive(Clone, Debug)]
pub struct ParsedAggregate {
    pub query: String,
    pub plan: AggPlan,
    pub timeout_ms: Option<u64>,
    pub dialect: u32,
    pub params: Vec<(String, String)>,
}

struct Walker<'a> {
    args: &'a [String],
    pos: usize,
}

impl<'a> Walker<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.args.get(self.pos).map(String::as_str)
    }

    fn bump(&mut self) -> QueryResult<&'a str> {
        let tok = self
            .args
            .get(self.pos)
            .ok_or_else(|| QueryError::parse_args("unexpected end of arguments"))?;
        self.pos += 1;
        Ok(tok)
    }

    fn bump_count(&mut self, what: &str) -> QueryResult<usize> {
        let tok = self.bump()?;
        tok.parse().map_err(|_| {
            QueryError::parse_args(format!("bad {what} count `{tok}`"))
        })
    }

    fn bump_u64(&mut self, what: &str) -> QueryResult<u64> {
        let tok = self.bump()?;
        tok.parse()
            .map_err(|_| QueryError::parse_args(format!("bad {what} value `{tok}`")))
    }

    fn take_keyword(&mut self, kw: &str) -> bool {
        if self.peek().is_some_and(|t| t.eq_ignore_ascii_case(kw)) {
            self.pos += 1;
            return true;
        }
        false
    }
}

/// Strip the optional `@` property sigil.
fn property_name(tok: &str) -> String {
    tok.strip_prefix('@').unwrap_or(tok).to_string()
}

/// Parse everything after `AGGREGATE <index>` with the default expression
/// depth bound.
pub fn parse_aggregate_args(args: &[String]) -> QueryResult<ParsedAggregate> {
    parse_aggregate_args_with_depth(args, expr::DEFAULT_MAX_DEPTH)
}

/// Parse with an explicit expression nesting bound
/// (`PipelineConfig::max_expr_depth`).
pub fn parse_aggregate_args_with_depth(
    args: &[String],
    max_expr_depth: usize,
) -> QueryResult<ParsedAggregate> {
    let mut walker = Walker { args, pos: 0 };
    let query = walker.bump()?.to_string();
    let mut plan = AggPlan::new();
    let mut timeout_ms = None;
    let mut dialect = 1;
    let mut params = Vec::new();

    while let Some(tok) = walker.peek() {
        walker.pos += 1;
        if tok.eq_ignore_ascii_case("LOAD") {
            plan.push(parse_load(&mut walker)?)?;
        } else if tok.eq_ignore_ascii_case("GROUPBY") {
            plan.push(parse_groupby(&mut walker)?)?;
        } else if tok.eq_ignore_ascii_case("APPLY") {
            let raw = walker.bump()?.to_string();
            if !walker.take_keyword("AS") {
                return Err(QueryError::parse_args("APPLY requires AS <alias>"));
            }
            let alias = walker.bump()?.to_string();
            let parsed = expr::parse_with_depth(&raw, max_expr_depth)?;
            plan.push(PlanStep::Apply { expr: parsed, raw, alias })?;
        } else if tok.eq_ignore_ascii_case("FILTER") {
            let raw = walker.bump()?.to_string();
            let parsed = expr::parse_with_depth(&raw, max_expr_depth)?;
            plan.push(PlanStep::Filter { expr: parsed, raw })?;
        } else if tok.eq_ignore_ascii_case("SORTBY") {
            plan.push(parse_sortby(&mut walker)?)?;
        } else if tok.eq_ignore_ascii_case("LIMIT") {
            let offset = walker.bump_count("LIMIT offset")?;
            let count = walker.bump_count("LIMIT count")?;
            plan.push(PlanStep::Limit { offset, count })?;
        } else if tok.eq_ignore_ascii_case("WITHCURSOR") {
            let mut spec = CursorSpec {
                count: DEFAULT_CURSOR_COUNT,
                max_idle_ms: None,
            };
            loop {
                if walker.take_keyword("COUNT") {
                    spec.count = walker.bump_count("cursor COUNT")?;
                } else if walker.take_keyword("MAXIDLE") {
                    spec.max_idle_ms = Some(walker.bump_u64("cursor MAXIDLE")?);
                } else {
                    break;
                }
            }
            plan.push(PlanStep::Cursor(spec))?;
        } else if tok.eq_ignore_ascii_case("TIMEOUT") {
            timeout_ms = Some(walker.bump_u64("TIMEOUT")?);
        } else if tok.eq_ignore_ascii_case("DIALECT") {
            dialect = walker.bump_u64("DIALECT")? as u32;
        } else if tok.eq_ignore_ascii_case("PARAMS") {
            let nargs = walker.bump_count("PARAMS")?;
            if nargs % 2 != 0 {
                return Err(QueryError::parse_args("PARAMS expects name/value pairs"));
            }
            for _ in 0..nargs / 2 {
                let name = walker.bump()?.to_string();
                let value = walker.bump()?.to_string();
                params.push((name, value));
            }
        } else if tok.eq_ignore_ascii_case("WITHSCORES") || tok.eq_ignore_ascii_case("_NUM_SSTRING")
        {
            // shard-dispatch decorations; accepted and ignored here
        } else if tok.eq_ignore_ascii_case("SLOTS") {
            // binary payload token follows; consumed opaquely
            walker.bump()?;
        } else {
            return Err(QueryError::parse_args(format!("Unknown argument `{tok}`")));
        }
    }

    Ok(ParsedAggregate {
        query,
        plan,
        timeout_ms,
        dialect,
        params,
    })
}

fn parse_load(walker: &mut Walker<'_>) -> QueryResult<PlanStep> {
    let tok = walker.bump()?;
    if tok == "*" {
        return Ok(PlanStep::Load { fields: vec!["*".to_string()] });
    }
    let nargs: usize = tok
        .parse()
        .map_err(|_| QueryError::parse_args(format!("bad LOAD count `{tok}`")))?;
    let mut fields = Vec::with_capacity(nargs);
    for _ in 0..nargs {
        fields.push(property_name(walker.bump()?));
    }
    Ok(PlanStep::Load { fields })
}

fn parse_groupby(walker: &mut Walker<'_>) -> QueryResult<PlanStep> {
    let nkeys = walker.bump_count("GROUPBY")?;
    let mut keys = Vec::with_capacity(nkeys);
    for _ in 0..nkeys {
        keys.push(property_name(walker.bump()?));
    }
    let mut reducers = Vec::new();
    while walker.take_keyword("REDUCE") {
        let name = walker.bump()?.to_string();
        let nargs = walker.bump_count("REDUCE")?;
        let mut args = Vec::with_capacity(nargs);
        for _ in 0..nargs {
            args.push(property_name(walker.bump()?));
        }
        let alias = if walker.take_keyword("AS") {
            Some(walker.bump()?.to_string())
        } else {
            None
        };
        reducers.push(ReducerCall::new(&name, args, alias));
    }
    Ok(PlanStep::Group(GroupStep { keys, reducers }))
}

fn parse_sortby(walker: &mut Walker<'_>) -> QueryResult<PlanStep> {
    let nargs = walker.bump_count("SORTBY")?;
    let mut keys: Vec<SortKey> = Vec::new();
    let mut consumed = 0usize;
    while consumed < nargs {
        let tok = walker.bump()?;
        consumed += 1;
        if tok.eq_ignore_ascii_case("ASC") || tok.eq_ignore_ascii_case("DESC") {
            let Some(last) = keys.last_mut() else {
                return Err(QueryError::parse_args("SORTBY direction without a key"));
            };
            last.ascending = tok.eq_ignore_ascii_case("ASC");
        } else {
            keys.push(SortKey {
                field: property_name(tok),
                // absence of a direction defaults to ascending
                ascending: true,
            });
        }
    }
    if keys.is_empty() {
        return Err(QueryError::parse_args("SORTBY needs at least one key"));
    }
    let max = if walker.take_keyword("MAX") {
        Some(walker.bump_count("SORTBY MAX")?)
    } else {
        None
    };
    Ok(PlanStep::SortBy { keys, max })
}

/// Substitute `$name` parameter references in a query string.
///
/// Longest names substitute first so `$p` never clobbers `$p2`.
pub fn substitute_params(text: &str, params: &[(String, String)]) -> String {
    let mut ordered: Vec<&(String, String)> = params.iter().collect();
    ordered.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));
    let mut out = text.to_string();
    for (name, value) in ordered {
        out = out.replace(&format!("${name}"), value);
    }
    out
}
