//! Hybrid merger processor.
//!
//! Consumes N branch tails (typically depleters), drains each fully, then
//! fuses the ranked streams into one ordered result set. Draining first
//! makes fusion deterministic: reordering upstream depletion cannot change
//! the output.
//!
//! Fusion modes:
//! - **RRF**: score(doc) = Σ 1/(k + rank_i) over branches where the doc
//!   ranks inside the window; rank is 1-based emission order.
//! - **LINEAR**: score = α·normalized_text_score + β·(1 − normalized
//!   vector distance), summed over the branches that saw the doc.
//!
//! Emission is by fused score descending, docId ascending on ties.

use super::{deadline_status, ExecContext, ResultFlags, ResultProcessor, RpResult, RpStatus, RpType, SearchResult, TimeoutPolicy};
use crate::plan::Combine;
use std::collections::VecDeque;

/// What a branch's score field means to the linear fuser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchKind {
    /// Score is a text relevance score, bigger is better.
    Search,
    /// Score is a vector distance, smaller is better.
    Vector,
}

pub struct HybridBranch {
    pub tail: Box<dyn ResultProcessor>,
    pub kind: BranchKind,
}

struct FusedDoc {
    result: SearchResult,
    score: f64,
}

pub struct RpHybridMerger {
    branches: Vec<HybridBranch>,
    combine: Combine,
    output: Option<VecDeque<SearchResult>>,
}

impl RpHybridMerger {
    pub fn new(branches: Vec<HybridBranch>, combine: Combine) -> Self {
        RpHybridMerger {
            branches,
            combine,
            output: None,
        }
    }

    /// Drain one branch to Eof. Under the `Continue` policy a timeout
    /// truncates the branch instead of failing the query.
    fn drain_branch(
        branch: &mut HybridBranch,
        cx: &ExecContext,
    ) -> Result<(Vec<SearchResult>, RpStatus), crate::error::QueryError> {
        let mut results = Vec::new();
        loop {
            let mut res = SearchResult::new();
            match branch.tail.next(cx, &mut res)? {
                RpStatus::Ok => results.push(res),
                RpStatus::Eof => return Ok((results, RpStatus::Eof)),
                RpStatus::Paused => return Ok((results, RpStatus::Paused)),
                RpStatus::TimedOut => return Ok((results, RpStatus::TimedOut)),
            }
        }
    }

    fn fuse(&mut self, per_branch: Vec<(BranchKind, Vec<SearchResult>)>) -> VecDeque<SearchResult> {
        let mut fused: Vec<FusedDoc> = Vec::new();
        let mut index_of: std::collections::HashMap<u64, usize> = std::collections::HashMap::new();

        let mut add_contribution = |doc: SearchResult, contribution: f64| {
            match index_of.get(&doc.doc_id) {
                Some(&i) => {
                    fused[i].score += contribution;
                    merge_rows(&mut fused[i].result, &doc);
                }
                None => {
                    index_of.insert(doc.doc_id, fused.len());
                    fused.push(FusedDoc { result: doc, score: contribution });
                }
            }
        };

        match self.combine {
            Combine::Rrf { k, window } => {
                for (_, results) in per_branch {
                    for (rank0, doc) in results.into_iter().take(window).enumerate() {
                        let contribution = 1.0 / (k + (rank0 + 1) as f64);
                        add_contribution(doc, contribution);
                    }
                }
            }
            Combine::Linear { alpha, beta } => {
                for (kind, results) in per_branch {
                    match kind {
                        BranchKind::Search => {
                            let max = results
                                .iter()
                                .map(|r| r.score)
                                .fold(0.0f64, f64::max);
                            for doc in results {
                                let norm = if max > 0.0 { doc.score / max } else { 0.0 };
                                add_contribution(doc, alpha * norm);
                            }
                        }
                        BranchKind::Vector => {
                            let max = results
                                .iter()
                                .map(|r| r.score)
                                .fold(0.0f64, f64::max);
                            for doc in results {
                                let norm = if max > 0.0 { doc.score / max } else { 0.0 };
                                add_contribution(doc, beta * (1.0 - norm));
                            }
                        }
                    }
                }
            }
        }

        fused.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.result.doc_id.cmp(&b.result.doc_id))
        });
        fused
            .into_iter()
            .map(|mut doc| {
                doc.result.score = doc.score;
                doc.result.flags =
                    doc.result.flags | ResultFlags::FROM_MERGE | ResultFlags::SCORE_SET;
                doc.result
            })
            .collect()
    }
}

/// Copy row cells the kept result is missing from another sighting of the
/// same document (branches share one lookup).
fn merge_rows(kept: &mut SearchResult, other: &SearchResult) {
    for slot in 0..other.row.width() {
        if !kept.row.is_set(slot) {
            if let Some(value) = other.row.get_opt(slot) {
                kept.row.write(slot, value.clone());
            }
        }
    }
}

impl ResultProcessor for RpHybridMerger {
    fn rp_type(&self) -> RpType {
        RpType::HybridMerger
    }

    fn next(&mut self, cx: &ExecContext, out: &mut SearchResult) -> RpResult {
        if self.output.is_none() {
            if let Some(status) = deadline_status(cx) {
                if status == RpStatus::TimedOut && cx.policy == TimeoutPolicy::Return {
                    return Ok(RpStatus::TimedOut);
                }
            }
            let mut per_branch = Vec::with_capacity(self.branches.len());
            let mut branches = std::mem::take(&mut self.branches);
            for branch in &mut branches {
                let (results, status) = Self::drain_branch(branch, cx)?;
                if status == RpStatus::TimedOut && cx.policy == TimeoutPolicy::Return {
                    self.branches = branches;
                    return Ok(RpStatus::TimedOut);
                }
                per_branch.push((branch.kind, results));
            }
            self.branches = branches;
            self.output = Some(self.fuse(per_branch));
        }
        match self.output.as_mut().and_then(VecDeque::pop_front) {
            Some(res) => {
                *out = res;
                Ok(RpStatus::Ok)
            }
            None => Ok(RpStatus::Eof),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ExecContext;

    struct Fixed {
        docs: Vec<(u64, f64)>,
        pos: usize,
    }

    impl ResultProcessor for Fixed {
        fn rp_type(&self) -> RpType {
            RpType::Index
        }

        fn next(&mut self, _cx: &ExecContext, out: &mut SearchResult) -> RpResult {
            match self.docs.get(self.pos) {
                Some(&(id, score)) => {
                    self.pos += 1;
                    out.doc_id = id;
                    out.score = score;
                    Ok(RpStatus::Ok)
                }
                None => Ok(RpStatus::Eof),
            }
        }
    }

    fn branch(kind: BranchKind, docs: Vec<(u64, f64)>) -> HybridBranch {
        HybridBranch { tail: Box::new(Fixed { docs, pos: 0 }), kind }
    }

    fn drain_ids(merger: &mut RpHybridMerger) -> Vec<(u64, f64)> {
        let cx = ExecContext::unbounded();
        let mut out = SearchResult::new();
        let mut seen = Vec::new();
        loop {
            out.reset();
            match merger.next(&cx, &mut out).unwrap() {
                RpStatus::Ok => seen.push((out.doc_id, out.score)),
                _ => return seen,
            }
        }
    }

    #[test]
    fn rrf_sums_reciprocal_ranks() {
        // doc 1 ranks 1st in both branches; doc 2 only in the first
        let mut merger = RpHybridMerger::new(
            vec![
                branch(BranchKind::Search, vec![(1, 0.9), (2, 0.5)]),
                branch(BranchKind::Vector, vec![(1, 0.1), (3, 0.2)]),
            ],
            Combine::Rrf { k: 60.0, window: 10 },
        );
        let out = drain_ids(&mut merger);
        assert_eq!(out[0].0, 1);
        let expected = 1.0 / 61.0 + 1.0 / 61.0;
        assert!((out[0].1 - expected).abs() < 1e-12);
        // docs 2 and 3 both scored 1/62; tie breaks by doc id
        assert_eq!(out[1].0, 2);
        assert_eq!(out[2].0, 3);
        assert!((out[1].1 - out[2].1).abs() < 1e-12);
    }

    #[test]
    fn rrf_window_caps_rank_contributions() {
        let mut merger = RpHybridMerger::new(
            vec![branch(BranchKind::Search, vec![(1, 0.9), (2, 0.8), (3, 0.7)])],
            Combine::Rrf { k: 60.0, window: 2 },
        );
        let out = drain_ids(&mut merger);
        // doc 3 is outside the window and contributes nothing
        assert_eq!(out.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn linear_combines_normalized_scores() {
        let mut merger = RpHybridMerger::new(
            vec![
                branch(BranchKind::Search, vec![(1, 2.0), (2, 1.0)]),
                branch(BranchKind::Vector, vec![(1, 0.0), (2, 4.0)]),
            ],
            Combine::Linear { alpha: 0.7, beta: 0.3 },
        );
        let out = drain_ids(&mut merger);
        // doc1: 0.7*1.0 + 0.3*(1-0) = 1.0 ; doc2: 0.7*0.5 + 0.3*(1-1) = 0.35
        assert_eq!(out[0].0, 1);
        assert!((out[0].1 - 1.0).abs() < 1e-12);
        assert_eq!(out[1].0, 2);
        assert!((out[1].1 - 0.35).abs() < 1e-12);
    }

    #[test]
    fn merged_results_carry_the_flag() {
        let mut merger = RpHybridMerger::new(
            vec![branch(BranchKind::Search, vec![(1, 1.0)])],
            Combine::Rrf { k: 60.0, window: 5 },
        );
        let cx = ExecContext::unbounded();
        let mut out = SearchResult::new();
        assert_eq!(merger.next(&cx, &mut out).unwrap(), RpStatus::Ok);
        assert!(out.flags.contains(ResultFlags::FROM_MERGE));
    }
}
