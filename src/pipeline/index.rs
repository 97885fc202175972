//! Root processor: index scan.
//!
//! Wraps an index iterator and emits bare `{doc_id, score}` results with
//! document metadata attached; field values are not fetched here. The
//! weight multiplier serves hybrid branches.

use super::{deadline_status, DocMeta, ExecContext, ResultFlags, ResultProcessor, RpResult, RpStatus, RpType, SearchResult};
use crate::store::IndexIterator;
use std::sync::Arc;

pub struct RpIndex {
    iter: Box<dyn IndexIterator>,
    weight: f64,
}

impl RpIndex {
    pub fn new(iter: Box<dyn IndexIterator>) -> Self {
        RpIndex { iter, weight: 1.0 }
    }

    pub fn with_weight(iter: Box<dyn IndexIterator>, weight: f64) -> Self {
        RpIndex { iter, weight }
    }
}

impl ResultProcessor for RpIndex {
    fn rp_type(&self) -> RpType {
        RpType::Index
    }

    fn next(&mut self, cx: &ExecContext, out: &mut SearchResult) -> RpResult {
        if let Some(status) = deadline_status(cx) {
            return Ok(status);
        }
        let Some(hit) = self.iter.next_hit() else {
            return Ok(RpStatus::Eof);
        };
        out.doc_id = hit.doc_id;
        out.score = hit.score * self.weight;
        out.flags = out.flags | ResultFlags::SCORE_SET;
        out.dmd = Some(Arc::new(DocMeta { key: Arc::clone(&hit.key) }));
        out.row.src_key = Some(Arc::clone(&hit.key));
        out.index_hit = Some(hit);
        Ok(RpStatus::Ok)
    }
}
