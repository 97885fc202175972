//! Per-key doc-id metadata.
//!
//! A small array attached to every indexed key, mapping per-index slot →
//! docId. Slot assignment follows index creation order; `0` is the
//! invalid/empty sentinel. The array grows by doubling and is persisted
//! verbatim through the wire blob in [`crate::wire`].

use crate::error::{QueryError, QueryResult};
use crate::wire::{deserialize_doc_ids, serialize_doc_ids};

const DOC_ID_INVALID: u64 = 0;
const INITIAL_SIZE: usize = 10;

/// Slot-indexed doc-id array for one key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocIdMeta {
    ids: Vec<u64>,
}

impl DocIdMeta {
    pub fn new() -> Self {
        DocIdMeta::default()
    }

    /// Record `doc_id` for the index at `slot`, growing as needed.
    pub fn set(&mut self, slot: usize, doc_id: u64) -> QueryResult<()> {
        if doc_id == DOC_ID_INVALID {
            return Err(QueryError::BadValue(
                "doc id 0 is the invalid sentinel".to_string(),
            ));
        }
        if self.ids.is_empty() {
            let initial = INITIAL_SIZE.max(slot + 1);
            self.ids.resize(initial, DOC_ID_INVALID);
        } else if slot >= self.ids.len() {
            let grown = (self.ids.len() * 2).max(slot + 1);
            self.ids.resize(grown, DOC_ID_INVALID);
        }
        self.ids[slot] = doc_id;
        Ok(())
    }

    /// Doc id for the index at `slot`, if one was recorded.
    pub fn get(&self, slot: usize) -> Option<u64> {
        match self.ids.get(slot) {
            Some(&id) if id != DOC_ID_INVALID => Some(id),
            _ => None,
        }
    }

    /// Clear the slot back to the sentinel.
    pub fn delete(&mut self, slot: usize) -> bool {
        match self.ids.get_mut(slot) {
            Some(id) if *id != DOC_ID_INVALID => {
                *id = DOC_ID_INVALID;
                true
            }
            _ => false,
        }
    }

    /// Persisted form; see the wire module for the layout.
    pub fn to_blob(&self) -> Vec<u8> {
        serialize_doc_ids(&self.ids)
    }

    pub fn from_blob(buf: &[u8]) -> QueryResult<Self> {
        Ok(DocIdMeta {
            ids: deserialize_doc_ids(buf)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.ids.len()
    }
}
