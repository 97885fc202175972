//! Expression processors: projector (`APPLY`) and filter (`FILTER`).
//!
//! Both evaluate a bound expression against the in-flight row. The
//! projector writes its value to a destination slot and never drops rows;
//! the filter drops rows whose verdict is false or Null and propagates
//! Eof.

use super::{deadline_status, ExecContext, ResultProcessor, RpResult, RpStatus, RpType, SearchResult};
use crate::expr::eval::{eval, EvalContext};
use crate::expr::{Expr, FieldSource};
use crate::value::Value;
use std::sync::Arc;

/// What a projector does when its expression errors at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OnError {
    /// Fail the pipeline.
    Return,
    /// Write Null into the destination slot and keep going.
    #[default]
    WriteNull,
}

pub struct RpProjector {
    upstream: Box<dyn ResultProcessor>,
    expr: Expr,
    out_slot: usize,
    policy: OnError,
    fields: Option<Arc<dyn FieldSource + Send + Sync>>,
}

impl RpProjector {
    pub fn new(upstream: Box<dyn ResultProcessor>, expr: Expr, out_slot: usize) -> Self {
        RpProjector {
            upstream,
            expr,
            out_slot,
            policy: OnError::default(),
            fields: None,
        }
    }

    pub fn with_policy(mut self, policy: OnError) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fields(mut self, fields: Arc<dyn FieldSource + Send + Sync>) -> Self {
        self.fields = Some(fields);
        self
    }
}

impl ResultProcessor for RpProjector {
    fn rp_type(&self) -> RpType {
        RpType::Projector
    }

    fn next(&mut self, cx: &ExecContext, out: &mut SearchResult) -> RpResult {
        if let Some(status) = deadline_status(cx) {
            return Ok(status);
        }
        let status = self.upstream.next(cx, out)?;
        if status != RpStatus::Ok {
            return Ok(status);
        }
        let value = {
            let ecx = EvalContext::new(&out.row)
                .with_doc_key(out.dmd.as_deref().map(|d| &*d.key));
            let ecx = match &self.fields {
                Some(fields) => ecx.with_fields(fields.as_ref()),
                None => ecx,
            };
            eval(&self.expr, &ecx)
        };
        match value {
            Ok(v) => out.row.write(self.out_slot, v),
            Err(err) => match self.policy {
                OnError::Return => return Err(err),
                OnError::WriteNull => out.row.write(self.out_slot, Value::Null),
            },
        }
        Ok(RpStatus::Ok)
    }

    fn upstream_mut(&mut self) -> Option<&mut Box<dyn ResultProcessor>> {
        Some(&mut self.upstream)
    }
}

pub struct RpFilter {
    upstream: Box<dyn ResultProcessor>,
    expr: Expr,
    fields: Option<Arc<dyn FieldSource + Send + Sync>>,
}

impl RpFilter {
    pub fn new(upstream: Box<dyn ResultProcessor>, expr: Expr) -> Self {
        RpFilter { upstream, expr, fields: None }
    }

    pub fn with_fields(mut self, fields: Arc<dyn FieldSource + Send + Sync>) -> Self {
        self.fields = Some(fields);
        self
    }
}

impl ResultProcessor for RpFilter {
    fn rp_type(&self) -> RpType {
        RpType::Filter
    }

    fn next(&mut self, cx: &ExecContext, out: &mut SearchResult) -> RpResult {
        loop {
            if let Some(status) = deadline_status(cx) {
                return Ok(status);
            }
            out.reset();
            let status = self.upstream.next(cx, out)?;
            if status != RpStatus::Ok {
                return Ok(status);
            }
            let verdict = {
                let ecx = EvalContext::new(&out.row)
                    .with_doc_key(out.dmd.as_deref().map(|d| &*d.key));
                let ecx = match &self.fields {
                    Some(fields) => ecx.with_fields(fields.as_ref()),
                    None => ecx,
                };
                eval(&self.expr, &ecx)
            };
            match verdict {
                Ok(v) if v.is_truthy() => return Ok(RpStatus::Ok),
                Ok(_) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn upstream_mut(&mut self) -> Option<&mut Box<dyn ResultProcessor>> {
        Some(&mut self.upstream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;
    use crate::lookup::{KeyFlags, Lookup};
    use crate::pipeline::{ExecContext, RpStatus};

    struct Rows {
        values: Vec<f64>,
        slot: usize,
        pos: usize,
    }

    impl ResultProcessor for Rows {
        fn rp_type(&self) -> RpType {
            RpType::Index
        }

        fn next(&mut self, _cx: &ExecContext, out: &mut SearchResult) -> RpResult {
            match self.values.get(self.pos) {
                Some(&x) => {
                    self.pos += 1;
                    out.doc_id = self.pos as u64;
                    out.row.write(self.slot, Value::number(x));
                    Ok(RpStatus::Ok)
                }
                None => Ok(RpStatus::Eof),
            }
        }
    }

    fn lookup_with_x() -> (Lookup, usize) {
        let mut lk = Lookup::new();
        let slot = lk.add("x", KeyFlags::DOC_SOURCE | KeyFlags::LOADED).unwrap();
        (lk, slot)
    }

    #[test]
    fn projector_writes_and_never_drops() {
        let (mut lk, slot) = lookup_with_x();
        let mut expr = parse("@x * 10").unwrap();
        expr.bind(&mut lk).unwrap();
        let out_slot = lk.bind_write("tenfold").unwrap();
        let rows = Rows { values: vec![1.0, 2.0], slot, pos: 0 };
        let mut rp = RpProjector::new(Box::new(rows), expr, out_slot);
        let cx = ExecContext::unbounded();
        let mut out = SearchResult::new();
        let mut seen = Vec::new();
        while rp.next(&cx, &mut out).unwrap() == RpStatus::Ok {
            seen.push(out.row.get(out_slot).to_number().unwrap());
            out.reset();
        }
        assert_eq!(seen, vec![10.0, 20.0]);
    }

    #[test]
    fn projector_write_null_policy_swallows_errors() {
        let (mut lk, slot) = lookup_with_x();
        // strlen of a number's display is fine; force an error via substr
        let mut expr = parse("substr(@x, 'bad', 1)").unwrap();
        expr.bind(&mut lk).unwrap();
        let out_slot = lk.bind_write("out").unwrap();
        let rows = Rows { values: vec![1.0], slot, pos: 0 };
        let mut rp = RpProjector::new(Box::new(rows), expr, out_slot);
        let cx = ExecContext::unbounded();
        let mut out = SearchResult::new();
        assert_eq!(rp.next(&cx, &mut out).unwrap(), RpStatus::Ok);
        assert!(out.row.get(out_slot).is_null());
    }

    #[test]
    fn filter_drops_false_and_null_rows() {
        let (mut lk, slot) = lookup_with_x();
        let mut expr = parse("@x > 1").unwrap();
        expr.bind(&mut lk).unwrap();
        let rows = Rows { values: vec![1.0, 2.0, 3.0], slot, pos: 0 };
        let mut rp = RpFilter::new(Box::new(rows), expr);
        let cx = ExecContext::unbounded();
        let mut out = SearchResult::new();
        let mut kept = Vec::new();
        while rp.next(&cx, &mut out).unwrap() == RpStatus::Ok {
            kept.push(out.row.get(slot).to_number().unwrap());
        }
        assert_eq!(kept, vec![2.0, 3.0]);
    }
}
