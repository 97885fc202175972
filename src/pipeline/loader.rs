//! Loader processor: batched hash-field fetches.
//!
//! Buffers up to `batch_size` upstream results, fetches the declared
//! fields for each source document key in one pass, then re-emits the
//! batch in arrival order. A miss writes Null; a field-level expiry
//! additionally sets the `EXPIRED` result flag (the value still reads as
//! Null downstream, including for sort keys).

use super::{deadline_status, ExecContext, ResultFlags, ResultProcessor, RpResult, RpStatus, RpType, SearchResult};
use crate::store::DocumentStore;
use crate::value::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// Default batch bound; see `PipelineConfig::loader_batch_size`.
pub const DEFAULT_BATCH_SIZE: usize = 100;

pub struct RpLoader {
    upstream: Box<dyn ResultProcessor>,
    store: Arc<dyn DocumentStore>,
    /// `(field name, destination slot)` pairs declared by `LOAD`.
    fields: Vec<(String, usize)>,
    batch_size: usize,
    buffered: VecDeque<SearchResult>,
    /// Status that ended the current fill, delivered after the batch
    /// drains.
    pending: Option<RpStatus>,
}

impl RpLoader {
    pub fn new(
        upstream: Box<dyn ResultProcessor>,
        store: Arc<dyn DocumentStore>,
        fields: Vec<(String, usize)>,
        batch_size: usize,
    ) -> Self {
        RpLoader {
            upstream,
            store,
            fields,
            batch_size: batch_size.max(1),
            buffered: VecDeque::new(),
            pending: None,
        }
    }

    fn fill_batch(&mut self, cx: &ExecContext) -> RpResult {
        while self.buffered.len() < self.batch_size {
            let mut res = SearchResult::new();
            let status = self.upstream.next(cx, &mut res)?;
            if status != RpStatus::Ok {
                self.pending = Some(status);
                break;
            }
            self.buffered.push_back(res);
        }

        let names: Vec<String> = self.fields.iter().map(|(n, _)| n.clone()).collect();
        for res in &mut self.buffered {
            let Some(key) = res.doc_key().map(str::to_string) else {
                for (_, slot) in &self.fields {
                    res.row.write(*slot, Value::Null);
                }
                continue;
            };
            let fetched = self.store.fetch_fields(&key, &names);
            for ((_, slot), stored) in self.fields.iter().zip(fetched) {
                match stored.value {
                    Some(v) => res.row.write(*slot, v),
                    None => {
                        res.row.write(*slot, Value::Null);
                        if stored.expired {
                            res.flags = res.flags | ResultFlags::EXPIRED;
                        }
                    }
                }
            }
        }
        Ok(RpStatus::Ok)
    }
}

impl ResultProcessor for RpLoader {
    fn rp_type(&self) -> RpType {
        RpType::Loader
    }

    fn next(&mut self, cx: &ExecContext, out: &mut SearchResult) -> RpResult {
        if self.buffered.is_empty() && self.pending.is_none() {
            if let Some(status) = deadline_status(cx) {
                return Ok(status);
            }
            self.fill_batch(cx)?;
        }
        if let Some(res) = self.buffered.pop_front() {
            *out = res;
            return Ok(RpStatus::Ok);
        }
        Ok(self.pending.take().unwrap_or(RpStatus::Eof))
    }

    fn upstream_mut(&mut self) -> Option<&mut Box<dyn ResultProcessor>> {
        Some(&mut self.upstream)
    }
}
