//! # Result Processor Framework
//!
//! The execution substrate: a pull-based, singly-linked chain of
//! processors, each exposing one `next(out)` method that fills a
//! caller-supplied `SearchResult`. Each processor exclusively owns its
//! upstream; the pipeline owns the tail. Status values flow downstream,
//! results move by ownership, and the shared deadline is checked at
//! processor boundaries.
//!
//! Dispatch is a trait object per node; the `RpType` tag exists for
//! composition checks and the occasional "find upstream of type X"
//! traversal (the loader uses it to forward expiry information).

pub mod cursor;
pub mod deadline;
pub mod depleter;
pub mod evaluator;
pub mod grouper;
pub mod hybrid;
pub mod index;
pub mod loader;
pub mod network;
pub mod sorter;

pub use deadline::{ExecContext, QueryDeadline, TimeoutPolicy};

use crate::error::QueryError;
use crate::lookup::Row;
use crate::store::IndexHit;
use std::ops::BitOr;
use std::sync::Arc;

/// Outcome of one `next` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpStatus {
    /// `out` holds one result.
    Ok,
    /// Stream exhausted; `out` untouched.
    Eof,
    /// Stream parked mid-flight (cursor page boundary).
    Paused,
    /// Deadline elapsed under the `Return` policy.
    TimedOut,
}

pub type RpResult = Result<RpStatus, QueryError>;

/// Processor kind tag, used to reject illegal compositions and for chain
/// traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpType {
    Index,
    Filter,
    Projector,
    Sorter,
    Pager,
    Grouper,
    Loader,
    Depleter,
    HybridMerger,
    CursorSource,
    Network,
}

/// Result flag bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResultFlags(u8);

impl ResultFlags {
    pub const NONE: ResultFlags = ResultFlags(0);
    /// The score field carries a real relevance score.
    pub const SCORE_SET: ResultFlags = ResultFlags(1);
    /// A field-level expiry was observed while loading this result.
    pub const EXPIRED: ResultFlags = ResultFlags(1 << 1);
    /// Produced by a hybrid merger rather than a single branch.
    pub const FROM_MERGE: ResultFlags = ResultFlags(1 << 2);

    pub fn contains(self, other: ResultFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ResultFlags {
    type Output = ResultFlags;
    fn bitor(self, rhs: ResultFlags) -> ResultFlags {
        ResultFlags(self.0 | rhs.0)
    }
}

/// Document metadata attached to a result by the root processor.
#[derive(Clone, Debug)]
pub struct DocMeta {
    pub key: Arc<str>,
}

/// The unit of flow between processors.
///
/// `doc_id == 0` is the "not a real document" sentinel. Everything a
/// result transitively holds is owned or atomically refcounted so results
/// can cross the depleter's thread boundary.
#[derive(Clone, Debug, Default)]
pub struct SearchResult {
    pub doc_id: u64,
    pub score: f64,
    pub flags: ResultFlags,
    pub row: Row,
    /// The raw index hit this result came from, when it has one.
    pub index_hit: Option<IndexHit>,
    pub dmd: Option<Arc<DocMeta>>,
}

impl SearchResult {
    pub fn new() -> Self {
        SearchResult::default()
    }

    /// Clear for reuse; keeps the row allocation.
    pub fn reset(&mut self) {
        self.doc_id = 0;
        self.score = 0.0;
        self.flags = ResultFlags::NONE;
        self.row.reset();
        self.index_hit = None;
        self.dmd = None;
    }

    /// Source document key, from metadata or the row.
    pub fn doc_key(&self) -> Option<&str> {
        self.dmd
            .as_deref()
            .map(|d| &*d.key)
            .or(self.row.src_key.as_deref())
    }
}

/// A pull-based result processor.
///
/// `next` produces at most one result per call, pulling from its upstream
/// as many times as needed. Ownership: a processor exclusively owns its
/// state and its upstream; dropping the tail drops the whole chain,
/// upstream last.
pub trait ResultProcessor: Send {
    fn rp_type(&self) -> RpType;

    fn next(&mut self, cx: &ExecContext, out: &mut SearchResult) -> RpResult;

    /// The directly owned upstream, for chain traversal. Root processors
    /// return `None`.
    fn upstream_mut(&mut self) -> Option<&mut Box<dyn ResultProcessor>> {
        None
    }

    /// Concrete access for `CURSOR READ` resumption; only the cursor
    /// source overrides this.
    fn as_cursor_source(&mut self) -> Option<&mut cursor::RpCursorSource> {
        None
    }
}

/// Deadline boundary check shared by every processor.
///
/// Under `Return` the caller fails pending work with `TimedOut`; under
/// `Continue` the stream simply ends (buffering processors flush what
/// they already hold before honoring this).
pub(crate) fn deadline_status(cx: &ExecContext) -> Option<RpStatus> {
    if cx.deadline.exceeded() {
        Some(match cx.policy {
            TimeoutPolicy::Return => RpStatus::TimedOut,
            TimeoutPolicy::Continue => RpStatus::Eof,
        })
    } else {
        None
    }
}

/// An executable chain: the tail processor, the output lookup describing
/// its rows, and the shared execution context.
pub struct Pipeline {
    pub tail: Box<dyn ResultProcessor>,
    pub lookup: crate::lookup::Lookup,
    pub cx: ExecContext,
}

impl Pipeline {
    pub fn new(
        tail: Box<dyn ResultProcessor>,
        lookup: crate::lookup::Lookup,
        cx: ExecContext,
    ) -> Self {
        Pipeline { tail, lookup, cx }
    }

    /// Pull one result.
    pub fn next(&mut self, out: &mut SearchResult) -> RpResult {
        out.reset();
        self.tail.next(&self.cx, out)
    }

    /// Cancel: the next boundary check anywhere in the chain observes it.
    pub fn cancel(&self) {
        self.cx.deadline.cancel();
    }

    /// The cursor source in this chain, if the plan carried one.
    pub fn cursor_source(&mut self) -> Option<&mut cursor::RpCursorSource> {
        self.find_upstream(RpType::CursorSource)?.as_cursor_source()
    }

    /// Walk the chain towards the root looking for a processor kind.
    pub fn find_upstream(&mut self, kind: RpType) -> Option<&mut dyn ResultProcessor> {
        let mut current: &mut Box<dyn ResultProcessor> = &mut self.tail;
        loop {
            if current.rp_type() == kind {
                return Some(current.as_mut());
            }
            current = current.upstream_mut()?;
        }
    }

    /// Drain the whole pipeline into a vector (tests, small replies).
    pub fn drain(&mut self) -> Result<Vec<SearchResult>, QueryError> {
        let mut results = Vec::new();
        loop {
            let mut res = SearchResult::new();
            match self.next(&mut res)? {
                RpStatus::Ok => results.push(res),
                RpStatus::Eof | RpStatus::Paused => return Ok(results),
                RpStatus::TimedOut => return Err(QueryError::Timeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::Lookup;

    struct Fixed {
        ids: Vec<u64>,
        pos: usize,
    }

    impl ResultProcessor for Fixed {
        fn rp_type(&self) -> RpType {
            RpType::Index
        }

        fn next(&mut self, cx: &ExecContext, out: &mut SearchResult) -> RpResult {
            if let Some(status) = deadline_status(cx) {
                return Ok(status);
            }
            match self.ids.get(self.pos) {
                Some(&id) => {
                    self.pos += 1;
                    out.doc_id = id;
                    Ok(RpStatus::Ok)
                }
                None => Ok(RpStatus::Eof),
            }
        }
    }

    #[test]
    fn drain_collects_until_eof() {
        let mut pipeline = Pipeline::new(
            Box::new(Fixed { ids: vec![1, 2, 3], pos: 0 }),
            Lookup::new(),
            ExecContext::unbounded(),
        );
        let results = pipeline.drain().unwrap();
        assert_eq!(results.iter().map(|r| r.doc_id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn cancellation_surfaces_as_timeout() {
        let mut pipeline = Pipeline::new(
            Box::new(Fixed { ids: vec![1, 2], pos: 0 }),
            Lookup::new(),
            ExecContext::unbounded(),
        );
        pipeline.cancel();
        assert!(matches!(pipeline.drain(), Err(QueryError::Timeout)));
    }

    #[test]
    fn continue_policy_turns_timeout_into_eof() {
        let mut pipeline = Pipeline::new(
            Box::new(Fixed { ids: vec![1, 2], pos: 0 }),
            Lookup::new(),
            ExecContext {
                policy: TimeoutPolicy::Continue,
                ..ExecContext::unbounded()
            },
        );
        pipeline.cancel();
        assert!(pipeline.drain().unwrap().is_empty());
    }

    #[test]
    fn find_upstream_by_type() {
        let mut pipeline = Pipeline::new(
            Box::new(Fixed { ids: vec![], pos: 0 }),
            Lookup::new(),
            ExecContext::unbounded(),
        );
        assert!(pipeline.find_upstream(RpType::Index).is_some());
        assert!(pipeline.find_upstream(RpType::Sorter).is_none());
    }
}
