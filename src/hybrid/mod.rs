//! # Hybrid Requests
//!
//! `HYBRID <index> SEARCH <q> VSIM <@field> <blob> …` composes two
//! independent pipelines — text and vector — runs their tails concurrently
//! behind depleters, and fuses the ranked streams (see the merger
//! processor). This module owns the argv surface: parsing, the KNN-K /
//! RRF-window resolution rules, and the coordinator→shard command
//! transform.
//!
//! Resolution rules, checked at plan time: under RRF, `K ≤ WINDOW` always.
//! When both are implicit they adopt the active `LIMIT`; when one is
//! explicit the implicit one adopts `LIMIT` and K is capped at the window;
//! explicit K is still capped at an explicit window. Linear fusion never
//! caps K.

use crate::error::{QueryError, QueryResult};
use crate::expr::{self, Expr};
use crate::plan::Combine;

/// RRF constant default (`k` in `1/(k + rank)`).
pub const DEFAULT_RRF_K: f64 = 60.0;
/// Compile-time window default, used when no `LIMIT` is active either.
pub const DEFAULT_WINDOW: usize = 20;
/// Default result window when the command carries no `LIMIT`.
pub const DEFAULT_LIMIT: usize = 10;

/// Fusion mode as parsed, optional parameters unresolved.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CombineSpec {
    Rrf { k: Option<f64>, window: Option<usize> },
    Linear { alpha: f64, beta: f64 },
}

/// A parsed `HYBRID` command minus the index name.
#[derive(Clone, Debug)]
pub struct ParsedHybrid {
    pub search_query: String,
    pub vector_field: String,
    pub blob: String,
    pub knn_k: Option<usize>,
    pub combine: CombineSpec,
    pub filters: Vec<(Expr, String)>,
    pub load: Vec<String>,
    pub limit: Option<(usize, usize)>,
    pub timeout_ms: Option<u64>,
    pub params: Vec<(String, String)>,
}

/// Fully resolved fusion parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedHybrid {
    pub combine: Combine,
    pub knn_k: usize,
    pub limit: (usize, usize),
}

impl ParsedHybrid {
    /// Apply the K/WINDOW rules against the active limit.
    pub fn resolve(&self) -> ResolvedHybrid {
        let limit = self.limit.unwrap_or((0, DEFAULT_LIMIT));
        let active = if self.limit.is_some() {
            limit.0 + limit.1
        } else {
            DEFAULT_WINDOW
        };
        match self.combine {
            CombineSpec::Rrf { k, window } => {
                let window = window.unwrap_or(active).max(1);
                let knn = self.knn_k.unwrap_or(window).min(window);
                ResolvedHybrid {
                    combine: Combine::Rrf { k: k.unwrap_or(DEFAULT_RRF_K), window },
                    knn_k: knn.max(1),
                    limit,
                }
            }
            CombineSpec::Linear { alpha, beta } => ResolvedHybrid {
                combine: Combine::Linear { alpha, beta },
                knn_k: self.knn_k.unwrap_or(active).max(1),
                limit,
            },
        }
    }
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

    fn bump_usize(&mut self, what: &str) -> QueryResult<usize> {
        let tok = self.bump()?;
        tok.parse()
            .map_err(|_| QueryError::parse_args(format!("bad {what} value `{tok}`")))
    }

    fn bump_f64(&mut self, what: &str) -> QueryResult<f64> {
        let tok = self.bump()?;
        tok.parse()
            .map_err(|_| QueryError::parse_args(format!("bad {what} value `{tok}`")))
    }
}

/// Parse everything after `HYBRID <index>` with the default expression
/// depth bound.
pub fn parse_hybrid_args(args: &[String]) -> QueryResult<ParsedHybrid> {
    parse_hybrid_args_with_depth(args, expr::DEFAULT_MAX_DEPTH)
}

/// Parse with an explicit expression nesting bound.
pub fn parse_hybrid_args_with_depth(
    args: &[String],
    max_expr_depth: usize,
) -> QueryResult<ParsedHybrid> {
    let mut walker = Walker { args, pos: 0 };

    let kw = walker.bump()?;
    if !kw.eq_ignore_ascii_case("SEARCH") {
        return Err(QueryError::parse_args("HYBRID requires a SEARCH clause"));
    }
    let search_query = walker.bump()?.to_string();

    let kw = walker.bump()?;
    if !kw.eq_ignore_ascii_case("VSIM") {
        return Err(QueryError::parse_args("HYBRID requires a VSIM clause"));
    }
    let vector_field = walker
        .bump()?
        .strip_prefix('@')
        .map(str::to_string)
        .ok_or_else(|| QueryError::parse_args("VSIM field must be `@field`"))?;
    let blob = walker.bump()?.to_string();

    let mut parsed = ParsedHybrid {
        search_query,
        vector_field,
        blob,
        knn_k: None,
        combine: CombineSpec::Rrf { k: None, window: None },
        filters: Vec::new(),
        load: Vec::new(),
        limit: None,
        timeout_ms: None,
        params: Vec::new(),
    };

    while let Some(tok) = walker.peek() {
        walker.pos += 1;
        if tok.eq_ignore_ascii_case("FILTER") {
            let raw = walker.bump()?.to_string();
            let tree = expr::parse_with_depth(&raw, max_expr_depth)?;
            parsed.filters.push((tree, raw));
        } else if tok.eq_ignore_ascii_case("KNN") {
            let nargs = walker.bump_usize("KNN")?;
            let mut consumed = 0;
            while consumed < nargs {
                let key = walker.bump()?;
                consumed += 1;
                if key.eq_ignore_ascii_case("K") {
                    parsed.knn_k = Some(walker.bump_usize("KNN K")?);
                    consumed += 1;
                } else if key.eq_ignore_ascii_case("EF") {
                    // accepted and forwarded to the vector seam's tuning
                    walker.bump_usize("KNN EF")?;
                    consumed += 1;
                } else {
                    return Err(QueryError::parse_args(format!("unknown KNN argument `{key}`")));
                }
            }
        } else if tok.eq_ignore_ascii_case("COMBINE") {
            parsed.combine = parse_combine(&mut walker)?;
        } else if tok.eq_ignore_ascii_case("LIMIT") {
            let offset = walker.bump_usize("LIMIT offset")?;
            let count = walker.bump_usize("LIMIT count")?;
            parsed.limit = Some((offset, count));
        } else if tok.eq_ignore_ascii_case("LOAD") {
            let nargs = walker.bump_usize("LOAD")?;
            for _ in 0..nargs {
                let field = walker.bump()?;
                parsed.load.push(field.strip_prefix('@').unwrap_or(field).to_string());
            }
        } else if tok.eq_ignore_ascii_case("TIMEOUT") {
            parsed.timeout_ms = Some(walker.bump_usize("TIMEOUT")? as u64);
        } else if tok.eq_ignore_ascii_case("PARAMS") {
            let nargs = walker.bump_usize("PARAMS")?;
            if nargs % 2 != 0 {
                return Err(QueryError::parse_args("PARAMS expects name/value pairs"));
            }
            for _ in 0..nargs / 2 {
                let name = walker.bump()?.to_string();
                let value = walker.bump()?.to_string();
                parsed.params.push((name, value));
            }
        } else if tok.eq_ignore_ascii_case("DIALECT") {
            walker.bump_usize("DIALECT")?;
        } else {
            return Err(QueryError::parse_args(format!("Unknown argument `{tok}`")));
        }
    }

    Ok(parsed)
}

fn parse_combine(walker: &mut Walker<'_>) -> QueryResult<CombineSpec> {
    let mode = walker.bump()?;
    if mode.eq_ignore_ascii_case("RRF") {
        let nargs = walker.bump_usize("COMBINE RRF")?;
        let mut spec = CombineSpec::Rrf { k: None, window: None };
        let mut consumed = 0;
        while consumed < nargs {
            let key = walker.bump()?;
            consumed += 1;
            let CombineSpec::Rrf { k, window } = &mut spec else {
                unreachable!()
            };
            if key.eq_ignore_ascii_case("K") {
                let value = walker.bump_f64("RRF K")?;
                if value < 0.0 {
                    return Err(QueryError::BadValue("RRF K must be non-negative".to_string()));
                }
                *k = Some(value);
                consumed += 1;
            } else if key.eq_ignore_ascii_case("WINDOW") {
                let value = walker.bump_usize("RRF WINDOW")?;
                if value == 0 {
                    return Err(QueryError::BadValue("RRF WINDOW must be at least 1".to_string()));
                }
                *window = Some(value);
                consumed += 1;
            } else {
                return Err(QueryError::parse_args(format!("unknown RRF argument `{key}`")));
            }
        }
        Ok(spec)
    } else if mode.eq_ignore_ascii_case("LINEAR") {
        let nargs = walker.bump_usize("COMBINE LINEAR")?;
        let mut alpha = None;
        let mut beta = None;
        let mut consumed = 0;
        while consumed < nargs {
            let key = walker.bump()?;
            consumed += 1;
            if key.eq_ignore_ascii_case("ALPHA") {
                alpha = Some(walker.bump_f64("LINEAR ALPHA")?);
                consumed += 1;
            } else if key.eq_ignore_ascii_case("BETA") {
                beta = Some(walker.bump_f64("LINEAR BETA")?);
                consumed += 1;
            } else {
                return Err(QueryError::parse_args(format!("unknown LINEAR argument `{key}`")));
            }
        }
        let (Some(alpha), Some(beta)) = (alpha, beta) else {
            return Err(QueryError::parse_args("LINEAR needs ALPHA and BETA"));
        };
        if alpha < 0.0 || beta < 0.0 {
            return Err(QueryError::BadValue(
                "LINEAR weights must be non-negative".to_string(),
            ));
        }
        Ok(CombineSpec::Linear { alpha, beta })
    } else {
        Err(QueryError::parse_args(format!("unknown COMBINE mode `{mode}`")))
    }
}

/// Rewrite a coordinator `HYBRID` command for shard dispatch: the verb
/// gains the shard prefix, every other token is preserved verbatim, and
/// the cursor/score decorations are appended in fixed order.
pub fn build_shard_command(argv: &[String]) -> QueryResult<Vec<String>> {
    let Some((_verb, rest)) = argv.split_first() else {
        return Err(QueryError::parse_args("empty command"));
    };
    let mut out = Vec::with_capacity(argv.len() + 3);
    out.push("_FT.HYBRID".to_string());
    out.extend(rest.iter().cloned());
    out.push("WITHCURSOR".to_string());
    out.push("WITHSCORES".to_string());
    out.push("_NUM_SSTRING".to_string());
    Ok(out)
}
