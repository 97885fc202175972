//! Sorter and pager processors.
//!
//! The sorter keeps a bounded binary heap of the best `K = limit + offset`
//! results (unbounded when no limit is known), comparing rows by a slot
//! list with per-key direction bits and breaking ties by ascending docId.
//! It drains its upstream to completion, then emits in order. The pager
//! applies `LIMIT offset count` downstream of it.

use super::{deadline_status, ExecContext, ResultProcessor, RpResult, RpStatus, RpType, SearchResult, TimeoutPolicy};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

/// Row comparator: slot list plus a direction bitmap (`bit i` set means
/// key `i` ascends). Ties break by docId ascending.
#[derive(Clone, Debug)]
pub struct SortComparator {
    slots: Vec<usize>,
    asc_bits: u64,
    /// Rank by relevance score instead of row slots (hybrid branches).
    by_score: bool,
}

impl SortComparator {
    pub fn new(keys: &[(usize, bool)]) -> Self {
        let mut slots = Vec::with_capacity(keys.len());
        let mut asc_bits = 0u64;
        for (i, (slot, ascending)) in keys.iter().enumerate() {
            slots.push(*slot);
            if *ascending {
                asc_bits |= 1 << i;
            }
        }
        SortComparator { slots, asc_bits, by_score: false }
    }

    /// Score descending, docId ascending ties.
    pub fn by_score() -> Self {
        SortComparator { slots: Vec::new(), asc_bits: 0, by_score: true }
    }

    pub fn ascending(&self, index: usize) -> bool {
        self.asc_bits & (1 << index) != 0
    }

    /// Output order: `Less` sorts (emits) first.
    pub fn cmp(&self, a: &SearchResult, b: &SearchResult) -> Ordering {
        if self.by_score {
            let ord = b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal);
            return ord.then(a.doc_id.cmp(&b.doc_id));
        }
        for (i, slot) in self.slots.iter().enumerate() {
            let ord = a.row.get(*slot).total_cmp(b.row.get(*slot));
            let ord = if self.ascending(i) { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.doc_id.cmp(&b.doc_id)
    }
}

enum SortPhase {
    Fill,
    Drain(VecDeque<SearchResult>),
}

pub struct RpSorter {
    upstream: Box<dyn ResultProcessor>,
    cmp: Arc<SortComparator>,
    /// `limit + offset` heap bound; `None` keeps everything.
    cap: Option<usize>,
    heap: Vec<SearchResult>,
    phase: SortPhase,
}

impl RpSorter {
    pub fn new(
        upstream: Box<dyn ResultProcessor>,
        cmp: SortComparator,
        cap: Option<usize>,
    ) -> Self {
        RpSorter {
            upstream,
            cmp: Arc::new(cmp),
            cap,
            heap: Vec::new(),
            phase: SortPhase::Fill,
        }
    }

    /// Worse-of relation for the heap: the root is the element that leaves
    /// first when a better one arrives.
    fn worse(&self, a: &SearchResult, b: &SearchResult) -> bool {
        self.cmp.cmp(a, b) == Ordering::Greater
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.worse(&self.heap[i], &self.heap[parent]) {
                self.heap.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let (l, r) = (2 * i + 1, 2 * i + 2);
            let mut largest = i;
            if l < self.heap.len() && self.worse(&self.heap[l], &self.heap[largest]) {
                largest = l;
            }
            if r < self.heap.len() && self.worse(&self.heap[r], &self.heap[largest]) {
                largest = r;
            }
            if largest == i {
                return;
            }
            self.heap.swap(i, largest);
            i = largest;
        }
    }

    fn offer(&mut self, res: SearchResult) {
        match self.cap {
            Some(cap) if self.heap.len() >= cap => {
                if cap == 0 {
                    return;
                }
                // replace the worst kept element when the newcomer beats it
                if self.cmp.cmp(&res, &self.heap[0]) == Ordering::Less {
                    self.heap[0] = res;
                    self.sift_down(0);
                }
            }
            _ => {
                self.heap.push(res);
                self.sift_up(self.heap.len() - 1);
            }
        }
    }

    /// Current heap occupancy, exposed for the bound invariant.
    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    fn start_drain(&mut self) -> VecDeque<SearchResult> {
        let cmp = Arc::clone(&self.cmp);
        let mut items = std::mem::take(&mut self.heap);
        items.sort_by(|a, b| cmp.cmp(a, b));
        items.into()
    }
}

impl ResultProcessor for RpSorter {
    fn rp_type(&self) -> RpType {
        RpType::Sorter
    }

    fn next(&mut self, cx: &ExecContext, out: &mut SearchResult) -> RpResult {
        if matches!(self.phase, SortPhase::Fill) {
            loop {
                if let Some(status) = deadline_status(cx) {
                    if status == RpStatus::TimedOut && cx.policy == TimeoutPolicy::Return {
                        return Ok(RpStatus::TimedOut);
                    }
                    // Continue policy: flush what the heap already holds
                    break;
                }
                let mut res = SearchResult::new();
                match self.upstream.next(cx, &mut res)? {
                    RpStatus::Ok => self.offer(res),
                    RpStatus::Eof => break,
                    RpStatus::Paused => return Ok(RpStatus::Paused),
                    RpStatus::TimedOut => return Ok(RpStatus::TimedOut),
                }
            }
            self.phase = SortPhase::Drain(self.start_drain());
        }
        match &mut self.phase {
            SortPhase::Drain(queue) => match queue.pop_front() {
                Some(res) => {
                    *out = res;
                    Ok(RpStatus::Ok)
                }
                None => Ok(RpStatus::Eof),
            },
            SortPhase::Fill => unreachable!("fill phase ended above"),
        }
    }

    fn upstream_mut(&mut self) -> Option<&mut Box<dyn ResultProcessor>> {
        Some(&mut self.upstream)
    }
}

/// `LIMIT offset count` applied as a pass-through window.
pub struct RpPager {
    upstream: Box<dyn ResultProcessor>,
    offset: usize,
    count: usize,
    skipped: usize,
    emitted: usize,
}

impl RpPager {
    pub fn new(upstream: Box<dyn ResultProcessor>, offset: usize, count: usize) -> Self {
        RpPager { upstream, offset, count, skipped: 0, emitted: 0 }
    }
}

impl ResultProcessor for RpPager {
    fn rp_type(&self) -> RpType {
        RpType::Pager
    }

    fn next(&mut self, cx: &ExecContext, out: &mut SearchResult) -> RpResult {
        if self.emitted >= self.count {
            return Ok(RpStatus::Eof);
        }
        while self.skipped < self.offset {
            out.reset();
            let status = self.upstream.next(cx, out)?;
            if status != RpStatus::Ok {
                return Ok(status);
            }
            self.skipped += 1;
        }
        out.reset();
        let status = self.upstream.next(cx, out)?;
        if status == RpStatus::Ok {
            self.emitted += 1;
        }
        Ok(status)
    }

    fn upstream_mut(&mut self) -> Option<&mut Box<dyn ResultProcessor>> {
        Some(&mut self.upstream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{KeyFlags, Lookup};
    use crate::value::Value;

    struct Rows {
        data: Vec<(u64, f64)>,
        slot: usize,
        pos: usize,
    }

    impl ResultProcessor for Rows {
        fn rp_type(&self) -> RpType {
            RpType::Index
        }

        fn next(&mut self, _cx: &ExecContext, out: &mut SearchResult) -> RpResult {
            match self.data.get(self.pos) {
                Some(&(id, x)) => {
                    self.pos += 1;
                    out.doc_id = id;
                    out.row.write(self.slot, Value::number(x));
                    Ok(RpStatus::Ok)
                }
                None => Ok(RpStatus::Eof),
            }
        }
    }

    fn slot() -> usize {
        let mut lk = Lookup::new();
        lk.add("x", KeyFlags::DOC_SOURCE).unwrap()
    }

    fn collect(rp: &mut dyn ResultProcessor) -> Vec<u64> {
        let cx = ExecContext::unbounded();
        let mut out = SearchResult::new();
        let mut ids = Vec::new();
        loop {
            out.reset();
            match rp.next(&cx, &mut out).unwrap() {
                RpStatus::Ok => ids.push(out.doc_id),
                _ => return ids,
            }
        }
    }

    #[test]
    fn sorts_descending_with_doc_id_ties() {
        let slot = slot();
        let rows = Rows {
            data: vec![(3, 1.0), (1, 5.0), (4, 5.0), (2, 3.0)],
            slot,
            pos: 0,
        };
        let cmp = SortComparator::new(&[(slot, false)]);
        let mut sorter = RpSorter::new(Box::new(rows), cmp, None);
        // 5.0 ties break by ascending doc id
        assert_eq!(collect(&mut sorter), vec![1, 4, 2, 3]);
    }

    #[test]
    fn heap_stays_bounded() {
        let slot = slot();
        let data: Vec<(u64, f64)> = (1..=100).map(|i| (i, f64::from(i as u32))).collect();
        let rows = Rows { data, slot, pos: 0 };
        let cmp = SortComparator::new(&[(slot, true)]);
        let mut sorter = RpSorter::new(Box::new(rows), cmp, Some(5));
        let cx = ExecContext::unbounded();
        let mut out = SearchResult::new();
        assert_eq!(sorter.next(&cx, &mut out).unwrap(), RpStatus::Ok);
        assert!(sorter.heap_len() <= 5);
        assert_eq!(out.doc_id, 1);
    }

    #[test]
    fn pager_windows_the_stream() {
        let slot = slot();
        let data: Vec<(u64, f64)> = (1..=10).map(|i| (i, 0.0)).collect();
        let rows = Rows { data, slot, pos: 0 };
        let mut pager = RpPager::new(Box::new(rows), 3, 4);
        assert_eq!(collect(&mut pager), vec![4, 5, 6, 7]);
    }

    #[test]
    fn multi_key_mixed_directions() {
        let mut lk = Lookup::new();
        let a = lk.add("a", KeyFlags::DOC_SOURCE).unwrap();
        let b = lk.add("b", KeyFlags::DOC_SOURCE).unwrap();
        struct TwoCol {
            rows: Vec<(u64, f64, f64)>,
            a: usize,
            b: usize,
            pos: usize,
        }
        impl ResultProcessor for TwoCol {
            fn rp_type(&self) -> RpType {
                RpType::Index
            }
            fn next(&mut self, _cx: &ExecContext, out: &mut SearchResult) -> RpResult {
                match self.rows.get(self.pos) {
                    Some(&(id, x, y)) => {
                        self.pos += 1;
                        out.doc_id = id;
                        out.row.write(self.a, Value::number(x));
                        out.row.write(self.b, Value::number(y));
                        Ok(RpStatus::Ok)
                    }
                    None => Ok(RpStatus::Eof),
                }
            }
        }
        let rows = TwoCol {
            rows: vec![(1, 1.0, 9.0), (2, 1.0, 3.0), (3, 0.0, 1.0)],
            a,
            b,
            pos: 0,
        };
        // a ascending, then b descending
        let cmp = SortComparator::new(&[(a, true), (b, false)]);
        let mut sorter = RpSorter::new(Box::new(rows), cmp, None);
        assert_eq!(collect(&mut sorter), vec![3, 1, 2]);
    }
}
