//! Network source processor.
//!
//! The synthetic head of a coordinator-local plan: replays rows that came
//! back from shard dispatch as if they were produced locally. Row field
//! names bind into the coordinator lookup on construction, so downstream
//! processors read them by slot like any other column.

use super::{deadline_status, ExecContext, ResultProcessor, RpResult, RpStatus, RpType, SearchResult};
use crate::error::QueryResult;
use crate::lookup::{KeyFlags, Lookup};
use crate::value::Value;
use std::collections::VecDeque;

/// One row of a shard reply: the shard-side doc id (0 for group rows)
/// plus named fields.
#[derive(Clone, Debug, Default)]
pub struct ShardRow {
    pub doc_id: u64,
    pub fields: Vec<(String, Value)>,
}

pub struct RpNetwork {
    frames: VecDeque<SearchResult>,
}

impl RpNetwork {
    /// Bind the rows' field names into `lookup` and queue them for
    /// emission in arrival order.
    pub fn new(rows: Vec<ShardRow>, lookup: &mut Lookup) -> QueryResult<Self> {
        let mut frames = VecDeque::with_capacity(rows.len());
        for shard_row in rows {
            let mut res = SearchResult::new();
            res.doc_id = shard_row.doc_id;
            for (name, value) in shard_row.fields {
                let slot = lookup.add(&name, KeyFlags::LOADED)?;
                res.row.write(slot, value);
            }
            frames.push_back(res);
        }
        Ok(RpNetwork { frames })
    }
}

impl ResultProcessor for RpNetwork {
    fn rp_type(&self) -> RpType {
        RpType::Network
    }

    fn next(&mut self, cx: &ExecContext, out: &mut SearchResult) -> RpResult {
        if let Some(status) = deadline_status(cx) {
            return Ok(status);
        }
        match self.frames.pop_front() {
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

    #[test]
    fn replays_rows_and_binds_names() {
        let mut lookup = Lookup::new();
        let rows = vec![
            ShardRow {
                doc_id: 0,
                fields: vec![
                    ("brand".to_string(), Value::string("sony")),
                    ("n".to_string(), Value::number(3.0)),
                ],
            },
            ShardRow {
                doc_id: 0,
                fields: vec![
                    ("brand".to_string(), Value::string("atari")),
                    ("n".to_string(), Value::number(1.0)),
                ],
            },
        ];
        let mut rp = RpNetwork::new(rows, &mut lookup).unwrap();
        let brand = lookup.get("brand").unwrap().slot;
        let n = lookup.get("n").unwrap().slot;
        let cx = ExecContext::unbounded();
        let mut out = SearchResult::new();
        assert_eq!(rp.next(&cx, &mut out).unwrap(), RpStatus::Ok);
        assert_eq!(out.row.get(brand).to_display(), "sony");
        assert_eq!(out.row.get(n).to_number(), Some(3.0));
        out.reset();
        assert_eq!(rp.next(&cx, &mut out).unwrap(), RpStatus::Ok);
        out.reset();
        assert_eq!(rp.next(&cx, &mut out).unwrap(), RpStatus::Eof);
    }
}
