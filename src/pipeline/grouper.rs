//! Grouper processor.
//!
//! Buckets rows by the tuple of source-key values (canonical text form for
//! strings, bit pattern for floats, NaN normalized), feeds each bucket's
//! reducer states, and on upstream Eof emits one row per group — in group
//! insertion order, not hash order.
//!
//! Array-valued source keys split the row: one contribution per element,
//! Cartesian across multiple array keys, produced by a stackless odometer
//! rather than materializing the product.

use super::{deadline_status, ExecContext, ResultProcessor, RpResult, RpStatus, RpType, SearchResult, TimeoutPolicy};
use crate::reducers::{ReducerKind, ReducerState, ValueKey};
use crate::value::Value;
use std::collections::HashMap;

/// A reducer with its bound slots: `src_slot` into the upstream lookup
/// (`None` for `COUNT`), `out_slot` into the group lookup.
pub struct BoundReducer {
    pub kind: ReducerKind,
    pub src_slot: Option<usize>,
    pub out_slot: usize,
}

struct Group {
    key_values: Vec<Value>,
    states: Vec<ReducerState>,
}

/// Odometer over one row's group-key values: scalars stay fixed, arrays
/// advance element by element.
struct KeyExpansion<'a> {
    slots: Vec<&'a Value>,
    indices: Vec<usize>,
    exhausted: bool,
}

impl<'a> KeyExpansion<'a> {
    fn new(values: Vec<&'a Value>) -> Self {
        // an empty array key means the row contributes nothing
        let exhausted = values
            .iter()
            .any(|v| v.as_array().is_some_and(|a| a.is_empty()));
        KeyExpansion {
            indices: vec![0; values.len()],
            slots: values,
            exhausted,
        }
    }
}

impl<'a> Iterator for KeyExpansion<'a> {
    type Item = Vec<&'a Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let combo: Vec<&'a Value> = self
            .slots
            .iter()
            .zip(&self.indices)
            .map(|(v, &i)| match v.as_array() {
                Some(items) => &items[i],
                None => *v,
            })
            .collect();

        // advance the odometer, rightmost digit fastest
        self.exhausted = true;
        for pos in (0..self.slots.len()).rev() {
            let width = self.slots[pos].as_array().map_or(1, <[Value]>::len);
            if self.indices[pos] + 1 < width {
                self.indices[pos] += 1;
                for idx in &mut self.indices[pos + 1..] {
                    *idx = 0;
                }
                self.exhausted = false;
                break;
            }
        }
        Some(combo)
    }
}

enum GroupPhase {
    Fill,
    Drain(usize),
}

pub struct RpGrouper {
    upstream: Box<dyn ResultProcessor>,
    /// Group-key slots in the upstream lookup.
    src_slots: Vec<usize>,
    /// Where the key values land in the group lookup.
    key_out_slots: Vec<usize>,
    reducers: Vec<BoundReducer>,
    groups: Vec<Group>,
    by_key: HashMap<Vec<ValueKey>, usize>,
    phase: GroupPhase,
}

impl RpGrouper {
    pub fn new(
        upstream: Box<dyn ResultProcessor>,
        src_slots: Vec<usize>,
        key_out_slots: Vec<usize>,
        reducers: Vec<BoundReducer>,
    ) -> Self {
        RpGrouper {
            upstream,
            src_slots,
            key_out_slots,
            reducers,
            groups: Vec::new(),
            by_key: HashMap::new(),
            phase: GroupPhase::Fill,
        }
    }

    fn absorb(&mut self, res: &SearchResult) {
        let key_values: Vec<&Value> = self.src_slots.iter().map(|&s| res.row.get(s)).collect();
        for combo in KeyExpansion::new(key_values) {
            let key: Vec<ValueKey> = combo.iter().map(|v| ValueKey::of(v)).collect();
            let group_idx = match self.by_key.get(&key) {
                Some(&idx) => idx,
                None => {
                    let idx = self.groups.len();
                    self.groups.push(Group {
                        key_values: combo.iter().map(|v| v.deref().clone()).collect(),
                        states: self.reducers.iter().map(|r| r.kind.new_state()).collect(),
                    });
                    self.by_key.insert(key, idx);
                    idx
                }
            };
            let group = &mut self.groups[group_idx];
            for (reducer, state) in self.reducers.iter().zip(&mut group.states) {
                match reducer.src_slot {
                    Some(slot) => state.add(res.row.get(slot)),
                    None => state.add(&Value::Null),
                }
            }
        }
    }

    fn emit(&self, index: usize, out: &mut SearchResult) {
        let group = &self.groups[index];
        out.doc_id = 0;
        for (slot, value) in self.key_out_slots.iter().zip(&group.key_values) {
            out.row.write(*slot, value.clone());
        }
        for (reducer, state) in self.reducers.iter().zip(&group.states) {
            out.row.write(reducer.out_slot, state.finalize());
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

impl ResultProcessor for RpGrouper {
    fn rp_type(&self) -> RpType {
        RpType::Grouper
    }

    fn next(&mut self, cx: &ExecContext, out: &mut SearchResult) -> RpResult {
        if matches!(self.phase, GroupPhase::Fill) {
            loop {
                if let Some(status) = deadline_status(cx) {
                    if status == RpStatus::TimedOut && cx.policy == TimeoutPolicy::Return {
                        return Ok(RpStatus::TimedOut);
                    }
                    break;
                }
                let mut res = SearchResult::new();
                match self.upstream.next(cx, &mut res)? {
                    RpStatus::Ok => self.absorb(&res),
                    RpStatus::Eof => break,
                    RpStatus::Paused => return Ok(RpStatus::Paused),
                    RpStatus::TimedOut => return Ok(RpStatus::TimedOut),
                }
            }
            self.phase = GroupPhase::Drain(0);
        }
        if let GroupPhase::Drain(next_idx) = &mut self.phase {
            if *next_idx >= self.groups.len() {
                return Ok(RpStatus::Eof);
            }
            let idx = *next_idx;
            *next_idx += 1;
            self.emit(idx, out);
            return Ok(RpStatus::Ok);
        }
        unreachable!("fill phase ended above")
    }

    fn upstream_mut(&mut self) -> Option<&mut Box<dyn ResultProcessor>> {
        Some(&mut self.upstream)
    }
}
