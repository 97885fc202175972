//! # Command Layer
//!
//! The argv front door: `SEARCH`, `AGGREGATE`, `HYBRID` and
//! `CURSOR READ/DEL` compile into plans, materialize into processor
//! chains, execute, and shape array replies. Shard-dispatched subplans
//! (`_FT.*` verbs carrying the `_NUM_SSTRING` decoration) re-enter here
//! through the same parsers the distributor serialized against.

use crate::config::Config;
use crate::cursor::CursorRegistry;
use crate::distribute::DistributedPlan;
use crate::error::{QueryError, QueryResult};
use crate::expr::FieldSource;
use crate::hybrid;
use crate::lookup::{KeyFlags, Lookup};
use crate::pipeline::cursor::RpCursorSource;
use crate::pipeline::depleter::RpDepleter;
use crate::pipeline::evaluator::{RpFilter, RpProjector};
use crate::pipeline::grouper::{BoundReducer, RpGrouper};
use crate::pipeline::hybrid::{BranchKind, HybridBranch, RpHybridMerger};
use crate::pipeline::index::RpIndex;
use crate::pipeline::loader::RpLoader;
use crate::pipeline::network::{RpNetwork, ShardRow};
use crate::pipeline::sorter::{RpPager, RpSorter, SortComparator};
use crate::pipeline::{
    ExecContext, Pipeline, ResultProcessor, RpStatus, SearchResult, TimeoutPolicy,
};
use crate::plan::{
    parse_aggregate_args_with_depth, substitute_params, AggPlan, CursorSpec, PlanStep, SortKey,
};
use crate::reducers::ReducerKind;
use crate::reply::Reply;
use crate::store::{IndexHit, IndexIterator, IndexSpec, MemoryStore, VectorIndex};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// The engine: store, cursor table, configuration. One per process in the
/// host; tests build as many as they want.
pub struct Engine {
    store: Arc<MemoryStore>,
    cursors: Arc<CursorRegistry>,
    config: Config,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let cursors = Arc::new(CursorRegistry::new(config.cursor.max_cursors));
        CursorRegistry::spawn_reaper(&cursors);
        Engine {
            store: Arc::new(MemoryStore::new()),
            cursors,
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Engine::new(Config::default())
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn cursors(&self) -> &Arc<CursorRegistry> {
        &self.cursors
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Route one argv command.
    #[instrument(skip_all, fields(verb = argv.first().map(String::as_str).unwrap_or("")))]
    pub fn dispatch(&self, argv: &[String]) -> QueryResult<Reply> {
        let Some(verb) = argv.first() else {
            return Err(QueryError::parse_args("empty command"));
        };
        let canonical = canonical_verb(verb);
        match canonical.as_str() {
            "AGGREGATE" => {
                let index = arg_at(argv, 1)?;
                self.aggregate(index, &argv[2..])
            }
            "SEARCH" => {
                let index = arg_at(argv, 1)?;
                // shard-dispatched searches carry the row-array decoration
                // and run through the aggregate path so replies come back
                // as field arrays the coordinator can rebind
                if argv.iter().any(|t| t == "_NUM_SSTRING") {
                    self.aggregate(index, &argv[2..])
                } else {
                    self.search(index, &argv[2..])
                }
            }
            "HYBRID" => {
                let index = arg_at(argv, 1)?;
                self.hybrid(index, &argv[2..])
            }
            "CURSOR" => {
                let sub = arg_at(argv, 1)?.to_ascii_uppercase();
                let index = arg_at(argv, 2)?;
                let id: u64 = arg_at(argv, 3)?
                    .parse()
                    .map_err(|_| QueryError::parse_args("bad cursor id"))?;
                match sub.as_str() {
                    "READ" => {
                        let count = match argv.get(4) {
                            Some(tok) if tok.eq_ignore_ascii_case("COUNT") => Some(
                                arg_at(argv, 5)?
                                    .parse()
                                    .map_err(|_| QueryError::parse_args("bad COUNT value"))?,
                            ),
                            _ => None,
                        };
                        self.cursor_read(index, id, count)
                    }
                    "DEL" => {
                        self.cursors.delete(id)?;
                        Ok(Reply::Str("OK".to_string()))
                    }
                    other => Err(QueryError::parse_args(format!(
                        "unknown CURSOR subcommand `{other}`"
                    ))),
                }
            }
            other => Err(QueryError::parse_args(format!("unknown command `{other}`"))),
        }
    }

    fn exec_context(&self, timeout_ms: Option<u64>) -> ExecContext {
        let ms = timeout_ms.unwrap_or(self.config.pipeline.default_timeout_ms);
        let timeout = if ms == 0 { None } else { Some(Duration::from_millis(ms)) };
        ExecContext::new(timeout, self.config.pipeline.timeout_policy)
    }

    /// `AGGREGATE <index> <query> …`
    pub fn aggregate(&self, index: &str, args: &[String]) -> QueryResult<Reply> {
        let parsed =
            parse_aggregate_args_with_depth(args, self.config.pipeline.max_expr_depth)?;
        let spec = self.store.get_index(index)?;
        debug!(index, plan = %parsed.plan.describe(), "compiled aggregation plan");
        let query = substitute_params(&parsed.query, &parsed.params);
        let cx = self.exec_context(parsed.timeout_ms);

        let mut lookup = Lookup::new();
        lookup.set_schema(spec.field_names());
        let root: Box<dyn ResultProcessor> = Box::new(RpIndex::new(spec.search(&query)));
        let mut pipeline = self.build_pipeline(&spec, &parsed.plan, lookup, root, cx)?;

        match parsed.plan.cursor() {
            Some(cursor_spec) => {
                let (rows, status) = run_page(&mut pipeline)?;
                let body = agg_body(&rows, &pipeline.lookup);
                if status == RpStatus::Paused {
                    let max_idle = Duration::from_millis(
                        cursor_spec
                            .max_idle_ms
                            .unwrap_or(self.config.cursor.default_max_idle_ms),
                    );
                    let id = self.cursors.park(index, pipeline, Some(max_idle))?;
                    debug!(cursor = id, "parked aggregate cursor");
                    Ok(Reply::Array(vec![body, Reply::Int(id as i64)]))
                } else {
                    Ok(Reply::Array(vec![body, Reply::Int(0)]))
                }
            }
            None => {
                let (rows, _) = run_page(&mut pipeline)?;
                Ok(agg_body(&rows, &pipeline.lookup))
            }
        }
    }

    /// `CURSOR READ <index> <id> [COUNT n]`
    pub fn cursor_read(&self, index: &str, id: u64, count: Option<usize>) -> QueryResult<Reply> {
        let mut parked = self.cursors.take(id)?;
        if parked.index != index {
            // wrong index: put it back untouched
            self.cursors.repark(parked);
            return Err(QueryError::NoCursor(id));
        }
        if let Some(source) = parked.pipeline.cursor_source() {
            source.reset_page();
            if let Some(count) = count {
                source.set_page_size(count);
            }
        }
        let (rows, status) = run_page(&mut parked.pipeline)?;
        let body = agg_body(&rows, &parked.pipeline.lookup);
        if status == RpStatus::Paused {
            self.cursors.repark(parked);
            Ok(Reply::Array(vec![body, Reply::Int(id as i64)]))
        } else {
            // drained: the registry entry dies with `parked`
            Ok(Reply::Array(vec![body, Reply::Int(0)]))
        }
    }

    /// `SEARCH <index> <query> …`
    pub fn search(&self, index: &str, args: &[String]) -> QueryResult<Reply> {
        let parsed = parse_search_args(args)?;
        let spec = self.store.get_index(index)?;
        let query = substitute_params(&parsed.query, &parsed.params);
        let cx = self.exec_context(parsed.timeout_ms);

        let mut plan = AggPlan::new();
        let limit = parsed.limit.unwrap_or((0, self.config.pipeline.default_limit));
        if !parsed.nocontent {
            let fields = match &parsed.return_fields {
                Some(fields) => fields.clone(),
                None => spec.field_names(),
            };
            if !fields.is_empty() {
                plan.push(PlanStep::Load { fields })?;
            }
        }
        if let Some(sort) = &parsed.sort_by {
            plan.push(PlanStep::SortBy {
                keys: vec![sort.clone()],
                max: Some(limit.0 + limit.1),
            })?;
        }
        plan.push(PlanStep::Limit { offset: limit.0, count: limit.1 })?;

        let mut lookup = Lookup::new();
        lookup.set_schema(spec.field_names());
        let root: Box<dyn ResultProcessor> = Box::new(RpIndex::new(spec.search(&query)));
        let mut pipeline = self.build_pipeline(&spec, &plan, lookup, root, cx)?;
        let (rows, _) = run_page(&mut pipeline)?;
        Ok(search_body(&rows, &pipeline.lookup, parsed.with_scores, parsed.nocontent))
    }

    /// `HYBRID <index> SEARCH <q> VSIM <@field> <blob> …`
    pub fn hybrid(&self, index: &str, args: &[String]) -> QueryResult<Reply> {
        let parsed =
            hybrid::parse_hybrid_args_with_depth(args, self.config.pipeline.max_expr_depth)?;
        let spec = self.store.get_index(index)?;
        let resolved = parsed.resolve();
        let cx = self.exec_context(parsed.timeout_ms);

        if !spec.has_field(&parsed.vector_field) {
            return Err(QueryError::NoField(parsed.vector_field.clone()));
        }
        let query = substitute_params(&parsed.search_query, &parsed.params);
        let blob = substitute_params(&parsed.blob, &parsed.params);
        let vector = crate::store::parse_vector_text(&blob).ok_or_else(|| {
            QueryError::BadValue("VSIM blob is not a parseable vector".to_string())
        })?;

        let mut lookup = Lookup::new();
        lookup.set_schema(spec.field_names());

        let branch_cap = match resolved.combine {
            crate::plan::Combine::Rrf { window, .. } => window,
            crate::plan::Combine::Linear { .. } => {
                resolved.knn_k.max(resolved.limit.0 + resolved.limit.1)
            }
        };

        // text branch: scan, rank by score, deplete in the background
        let text_chain: Box<dyn ResultProcessor> = Box::new(RpSorter::new(
            Box::new(RpIndex::new(spec.search(&query))),
            SortComparator::by_score(),
            Some(branch_cap),
        ));
        let text_tail: Box<dyn ResultProcessor> = Box::new(RpDepleter::spawn(
            text_chain,
            cx.clone(),
            self.config.pipeline.depleter_queue_depth,
        ));

        // vector branch: k nearest, already ranked by distance
        let hits = spec.knn(&parsed.vector_field, &vector, resolved.knn_k);
        let knn_root: Box<dyn ResultProcessor> =
            Box::new(RpIndex::new(Box::new(KnnHits { hits, pos: 0 })));
        let vector_tail: Box<dyn ResultProcessor> = Box::new(RpDepleter::spawn(
            knn_root,
            cx.clone(),
            self.config.pipeline.depleter_queue_depth,
        ));

        let mut current: Box<dyn ResultProcessor> = Box::new(RpHybridMerger::new(
            vec![
                HybridBranch { tail: text_tail, kind: BranchKind::Search },
                HybridBranch { tail: vector_tail, kind: BranchKind::Vector },
            ],
            resolved.combine,
        ));

        // post-merge: load whatever the filters and LOAD clause need
        let mut needed: Vec<String> = parsed.load.clone();
        for (expr, _) in &parsed.filters {
            let mut props = Vec::new();
            expr.properties(&mut props);
            for p in props {
                if !needed.iter().any(|f| f == &p) {
                    needed.push(p);
                }
            }
        }
        if !needed.is_empty() {
            current = self.attach_loader(current, &mut lookup, &needed)?;
        }
        for (expr, _raw) in &parsed.filters {
            let mut bound = expr.clone();
            bound.bind(&mut lookup)?;
            current = Box::new(RpFilter::new(current, bound).with_fields(self.field_source()));
        }
        current = Box::new(RpPager::new(current, resolved.limit.0, resolved.limit.1));

        let mut pipeline = Pipeline::new(current, lookup, cx);
        let (rows, _) = run_page(&mut pipeline)?;
        Ok(search_body(&rows, &pipeline.lookup, true, false))
    }

    fn field_source(&self) -> Arc<dyn FieldSource + Send + Sync> {
        Arc::<MemoryStore>::clone(&self.store)
    }

    /// Fetch every loadable-but-unloaded key the lookup has accumulated.
    /// Reads of plain schema fields bind as loadable; this is where they
    /// actually reach the store.
    fn load_pending(
        &self,
        current: Box<dyn ResultProcessor>,
        lookup: &mut Lookup,
    ) -> QueryResult<Box<dyn ResultProcessor>> {
        let pending: Vec<String> = lookup.loadable_keys().map(|k| k.name.clone()).collect();
        if pending.is_empty() {
            return Ok(current);
        }
        self.attach_loader(current, lookup, &pending)
    }

    /// Wrap `current` in a loader that fetches `fields` into the lookup.
    fn attach_loader(
        &self,
        current: Box<dyn ResultProcessor>,
        lookup: &mut Lookup,
        fields: &[String],
    ) -> QueryResult<Box<dyn ResultProcessor>> {
        let mut pairs = Vec::with_capacity(fields.len());
        for field in fields {
            let slot = lookup.add(field, KeyFlags::DOC_SOURCE | KeyFlags::LOADABLE)?;
            pairs.push((field.clone(), slot));
        }
        lookup.mark_loaded();
        Ok(Box::new(RpLoader::new(
            current,
            Arc::<MemoryStore>::clone(&self.store),
            pairs,
            self.config.pipeline.loader_batch_size,
        )))
    }

    /// Materialize a plan into a processor chain over `root`.
    ///
    /// Used for single-node execution and — with a network root and an
    /// unresolved-tolerant lookup — for the coordinator half of a
    /// distributed plan.
    pub fn build_pipeline(
        &self,
        spec: &Arc<IndexSpec>,
        plan: &AggPlan,
        mut lookup: Lookup,
        root: Box<dyn ResultProcessor>,
        cx: ExecContext,
    ) -> QueryResult<Pipeline> {
        let mut current = root;
        let steps = effective_steps(&plan.steps);

        for step in steps {
            match step {
                PlanStep::Load { fields } => {
                    let fields = if fields.iter().any(|f| f == "*") {
                        spec.field_names()
                    } else {
                        fields.clone()
                    };
                    current = self.attach_loader(current, &mut lookup, &fields)?;
                }
                PlanStep::Apply { expr, alias, .. } => {
                    let mut bound = expr.clone();
                    bound.bind(&mut lookup)?;
                    current = self.load_pending(current, &mut lookup)?;
                    let out_slot = lookup.bind_write(alias)?;
                    if alias.starts_with("__") {
                        lookup.set_hidden(alias);
                    }
                    current = Box::new(
                        RpProjector::new(current, bound, out_slot)
                            .with_fields(self.field_source()),
                    );
                }
                PlanStep::Filter { expr, .. } => {
                    let mut bound = expr.clone();
                    bound.bind(&mut lookup)?;
                    current = self.load_pending(current, &mut lookup)?;
                    current =
                        Box::new(RpFilter::new(current, bound).with_fields(self.field_source()));
                }
                PlanStep::Group(group) => {
                    // the group defines a fresh schema; upstream columns
                    // are no longer addressable
                    let mut group_lookup = Lookup::new();
                    group_lookup.allow_unresolved = lookup.allow_unresolved;
                    let mut src_slots = Vec::with_capacity(group.keys.len());
                    let mut key_out_slots = Vec::with_capacity(group.keys.len());
                    for key in &group.keys {
                        src_slots.push(lookup.bind_read(key)?);
                        key_out_slots.push(group_lookup.bind_write(key)?);
                    }
                    let mut reducers = Vec::with_capacity(group.reducers.len());
                    for call in &group.reducers {
                        let kind = ReducerKind::from_call(call)?;
                        let src_slot = match call.args.first() {
                            Some(arg) => Some(lookup.bind_read(arg)?),
                            None => None,
                        };
                        let name = call.output_name();
                        let out_slot = group_lookup.bind_write(&name)?;
                        if name.starts_with("__") {
                            group_lookup.set_hidden(&name);
                        }
                        reducers.push(BoundReducer { kind, src_slot, out_slot });
                    }
                    current = self.load_pending(current, &mut lookup)?;
                    current = Box::new(RpGrouper::new(current, src_slots, key_out_slots, reducers));
                    lookup = group_lookup;
                }
                PlanStep::SortBy { keys, max } => {
                    current = self.attach_sorter(current, &mut lookup, keys, *max, plan)?;
                }
                PlanStep::Limit { offset, count } => {
                    current = Box::new(RpPager::new(current, *offset, *count));
                }
                PlanStep::Cursor(CursorSpec { count, .. }) => {
                    current = Box::new(RpCursorSource::new(current, *count));
                }
                PlanStep::Distribute(_) | PlanStep::HybridMerge(_) => {
                    // synthetic steps; the root override already covers them
                }
            }
        }
        Ok(Pipeline::new(current, lookup, cx))
    }

    fn attach_sorter(
        &self,
        current: Box<dyn ResultProcessor>,
        lookup: &mut Lookup,
        keys: &[SortKey],
        max: Option<usize>,
        plan: &AggPlan,
    ) -> QueryResult<Box<dyn ResultProcessor>> {
        // sort keys must hold values; fetch any that still need the store
        for key in keys {
            lookup.bind_read(&key.field)?;
        }
        let current = self.load_pending(current, lookup)?;
        let pairs: Vec<(usize, bool)> = keys
            .iter()
            .map(|k| {
                let slot = lookup.get(&k.field).expect("bound above").slot;
                (slot, k.ascending)
            })
            .collect();
        let cap = max.or_else(|| plan.effective_limit().map(|(off, cnt)| off + cnt));
        Ok(Box::new(RpSorter::new(
            current,
            SortComparator::new(&pairs),
            cap,
        )))
    }
}

/// Pull one page: until `Paused`, `Eof`, or a failure. `TimedOut`
/// surfaces as the timeout error (the `Continue` policy never produces
/// it).
fn run_page(pipeline: &mut Pipeline) -> QueryResult<(Vec<SearchResult>, RpStatus)> {
    let mut rows = Vec::new();
    loop {
        let mut res = SearchResult::new();
        match pipeline.next(&mut res)? {
            RpStatus::Ok => rows.push(res),
            RpStatus::Eof => return Ok((rows, RpStatus::Eof)),
            RpStatus::Paused => return Ok((rows, RpStatus::Paused)),
            RpStatus::TimedOut => return Err(QueryError::Timeout),
        }
    }
}

/// Aggregation body: header count, then one field-array per row.
fn agg_body(rows: &[SearchResult], lookup: &Lookup) -> Reply {
    let mut frames = Vec::with_capacity(rows.len() + 1);
    frames.push(Reply::Int(rows.len() as i64));
    for row in rows {
        frames.push(row_fields(row, lookup));
    }
    Reply::Array(frames)
}

fn row_fields(row: &SearchResult, lookup: &Lookup) -> Reply {
    let mut pairs = Vec::new();
    for key in lookup.visible_keys() {
        if let Some(value) = row.row.get_opt(key.slot) {
            if value.is_null() {
                continue;
            }
            pairs.push(Reply::Str(key.name.clone()));
            pairs.push(Reply::from_value(value));
        }
    }
    Reply::Array(pairs)
}

/// Search body: header count, then per result `id, [score], [fields]`.
fn search_body(
    rows: &[SearchResult],
    lookup: &Lookup,
    with_scores: bool,
    nocontent: bool,
) -> Reply {
    let mut frames = Vec::with_capacity(rows.len() * 3 + 1);
    frames.push(Reply::Int(rows.len() as i64));
    for row in rows {
        frames.push(Reply::Str(row.doc_key().unwrap_or("").to_string()));
        if with_scores {
            frames.push(Reply::score(row.score));
        }
        if !nocontent {
            frames.push(row_fields(row, lookup));
        }
    }
    Reply::Array(frames)
}

/// Collapse the limit rules: trivial (`count == 0`) limits drop, and of
/// consecutive limits only the last survives.
fn effective_steps(steps: &[PlanStep]) -> Vec<&PlanStep> {
    let mut out: Vec<&PlanStep> = Vec::with_capacity(steps.len());
    for step in steps {
        match step {
            PlanStep::Limit { count: 0, .. } => continue,
            PlanStep::Limit { .. } => {
                if matches!(out.last(), Some(PlanStep::Limit { .. })) {
                    out.pop();
                }
                out.push(step);
            }
            _ => out.push(step),
        }
    }
    out
}

fn canonical_verb(verb: &str) -> String {
    let stripped = verb
        .strip_prefix("_FT.")
        .or_else(|| verb.strip_prefix("_ft."))
        .or_else(|| verb.strip_prefix("FT."))
        .or_else(|| verb.strip_prefix("ft."))
        .unwrap_or(verb);
    stripped.to_ascii_uppercase()
}

fn arg_at<'a>(argv: &'a [String], at: usize) -> QueryResult<&'a str> {
    argv.get(at)
        .map(String::as_str)
        .ok_or_else(|| QueryError::parse_args("missing argument"))
}

/// Iterator adapter: k-nearest-neighbor hits as index hits, distance in
/// the score field (the merger knows the branch kind).
struct KnnHits {
    hits: Vec<crate::store::VectorHit>,
    pos: usize,
}

impl IndexIterator for KnnHits {
    fn next_hit(&mut self) -> Option<IndexHit> {
        let hit = self.hits.get(self.pos)?.clone();
        self.pos += 1;
        Some(IndexHit {
            doc_id: hit.doc_id,
            score: hit.distance,
            key: hit.key,
        })
    }
}

/// Parsed `SEARCH` options.
#[derive(Clone, Debug, Default)]
struct ParsedSearch {
    query: String,
    nocontent: bool,
    with_scores: bool,
    limit: Option<(usize, usize)>,
    sort_by: Option<SortKey>,
    return_fields: Option<Vec<String>>,
    timeout_ms: Option<u64>,
    params: Vec<(String, String)>,
}

fn parse_search_args(args: &[String]) -> QueryResult<ParsedSearch> {
    let mut parsed = ParsedSearch {
        query: args
            .first()
            .ok_or_else(|| QueryError::parse_args("SEARCH requires a query"))?
            .clone(),
        ..ParsedSearch::default()
    };
    let mut pos = 1;
    fn bump_tok<'a>(args: &'a [String], pos: &mut usize) -> QueryResult<&'a str> {
        let tok = args
            .get(*pos)
            .map(String::as_str)
            .ok_or_else(|| QueryError::parse_args("unexpected end of arguments"))?;
        *pos += 1;
        Ok(tok)
    }
    while pos < args.len() {
        let tok = args[pos].as_str();
        pos += 1;
        if tok.eq_ignore_ascii_case("NOCONTENT") {
            parsed.nocontent = true;
        } else if tok.eq_ignore_ascii_case("WITHSCORES") {
            parsed.with_scores = true;
        } else if tok.eq_ignore_ascii_case("WITHPAYLOADS")
            || tok.eq_ignore_ascii_case("SUMMARIZE")
            || tok.eq_ignore_ascii_case("HIGHLIGHT")
            || tok.eq_ignore_ascii_case("_NUM_SSTRING")
            || tok.eq_ignore_ascii_case("WITHCURSOR")
        {
            // accepted; the features behind them live outside this core
        } else if tok.eq_ignore_ascii_case("LIMIT") {
            let offset = bump_tok(args, &mut pos)?
                .parse()
                .map_err(|_| QueryError::parse_args("bad LIMIT offset"))?;
            let count = bump_tok(args, &mut pos)?
                .parse()
                .map_err(|_| QueryError::parse_args("bad LIMIT count"))?;
            parsed.limit = Some((offset, count));
        } else if tok.eq_ignore_ascii_case("SORTBY") {
            let field = bump_tok(args, &mut pos)?;
            let field = field.strip_prefix('@').unwrap_or(field).to_string();
            let ascending = match args.get(pos) {
                Some(dir) if dir.eq_ignore_ascii_case("DESC") => {
                    pos += 1;
                    false
                }
                Some(dir) if dir.eq_ignore_ascii_case("ASC") => {
                    pos += 1;
                    true
                }
                _ => true,
            };
            parsed.sort_by = Some(SortKey { field, ascending });
        } else if tok.eq_ignore_ascii_case("RETURN") {
            let n: usize = bump_tok(args, &mut pos)?
                .parse()
                .map_err(|_| QueryError::parse_args("bad RETURN count"))?;
            let mut fields = Vec::with_capacity(n);
            for _ in 0..n {
                let f = bump_tok(args, &mut pos)?;
                fields.push(f.strip_prefix('@').unwrap_or(f).to_string());
            }
            parsed.return_fields = Some(fields);
        } else if tok.eq_ignore_ascii_case("TIMEOUT") {
            parsed.timeout_ms = Some(
                bump_tok(args, &mut pos)?
                    .parse()
                    .map_err(|_| QueryError::parse_args("bad TIMEOUT value"))?,
            );
        } else if tok.eq_ignore_ascii_case("PARAMS") {
            let n: usize = bump_tok(args, &mut pos)?
                .parse()
                .map_err(|_| QueryError::parse_args("bad PARAMS count"))?;
            if n % 2 != 0 {
                return Err(QueryError::parse_args("PARAMS expects name/value pairs"));
            }
            for _ in 0..n / 2 {
                let name = bump_tok(args, &mut pos)?.to_string();
                let value = bump_tok(args, &mut pos)?.to_string();
                parsed.params.push((name, value));
            }
        } else if tok.eq_ignore_ascii_case("DIALECT") {
            bump_tok(args, &mut pos)?;
        } else if tok.eq_ignore_ascii_case("SLOTS") {
            bump_tok(args, &mut pos)?;
        } else {
            return Err(QueryError::parse_args(format!("Unknown argument `{tok}`")));
        }
    }
    Ok(parsed)
}

/// Execute a distributed plan in-process: run the shard argv against each
/// shard engine, feed the combined rows through the coordinator half, and
/// shape the usual aggregate reply. This is the same data path a real
/// deployment drives over the wire.
pub fn execute_distributed(
    coordinator: &Engine,
    shards: &[&Engine],
    dplan: &DistributedPlan,
) -> QueryResult<Reply> {
    let argv = dplan.shard_argv();
    let mut all_rows: Vec<ShardRow> = Vec::new();
    for shard in shards {
        let reply = shard.dispatch(&argv)?;
        all_rows.extend(reply_rows(&reply)?);
    }

    let spec = coordinator.store.get_index(&dplan.index)?;
    let mut lookup = Lookup::new();
    lookup.set_schema(spec.field_names());
    // shard-produced columns resolve as they bind; anything else stays
    // tolerated until a row actually needs it
    lookup.allow_unresolved = true;
    let root: Box<dyn ResultProcessor> = Box::new(RpNetwork::new(all_rows, &mut lookup)?);

    let cx = ExecContext::new(None, TimeoutPolicy::Return);
    let mut pipeline =
        coordinator.build_pipeline(&spec, &dplan.coord_plan, lookup, root, cx)?;
    let (rows, _) = run_page(&mut pipeline)?;
    Ok(agg_body(&rows, &pipeline.lookup))
}

/// Decode an aggregate-shaped reply (optionally cursor-wrapped) back into
/// shard rows.
fn reply_rows(reply: &Reply) -> QueryResult<Vec<ShardRow>> {
    let body = match reply.as_array() {
        Some([body @ Reply::Array(_), Reply::Int(_)]) => body,
        _ => reply,
    };
    let frames = body
        .as_array()
        .ok_or_else(|| QueryError::Internal("shard reply is not an array".to_string()))?;
    let mut rows = Vec::new();
    for frame in frames.iter().skip(1) {
        let Some(pairs) = frame.as_array() else {
            // search-shaped interleaving (ids, scores) carries no columns
            continue;
        };
        let mut fields = Vec::with_capacity(pairs.len() / 2);
        for chunk in pairs.chunks_exact(2) {
            let name = chunk[0]
                .as_str()
                .ok_or_else(|| QueryError::Internal("field name is not a string".to_string()))?;
            fields.push((name.to_string(), chunk[1].to_value()));
        }
        rows.push(ShardRow { doc_id: 0, fields });
    }
    Ok(rows)
}
