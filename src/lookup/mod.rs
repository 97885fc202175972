//! # Field Lookup Layer
//!
//! Named, typed column registry for one pipeline stage. Every processor
//! resolves names exactly once at bind time and reads/writes by integer slot
//! afterwards; a slot, once issued, is never reassigned for the lookup's
//! lifetime.
//!
//! A `Row` is the sparse, slot-indexed value vector carried by each
//! `SearchResult`. Rows may remember their source document key and the
//! scanned source hash so late fetches (the loader) can re-populate them.

use crate::error::{QueryError, QueryResult};
use crate::value::Value;
use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::Arc;

/// Per-key flag bits.
///
/// Source class (at most one of `DOC_SOURCE` / `SORT_SOURCE` / `COMPUTED`)
/// plus lifecycle bits: loadable keys need a store fetch, loaded keys are
/// already present, hidden keys are not returned to the client.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct KeyFlags(u16);

impl KeyFlags {
    pub const NONE: KeyFlags = KeyFlags(0);
    /// Value originates in a document hash field.
    pub const DOC_SOURCE: KeyFlags = KeyFlags(1);
    /// Value originates in the index's sorting vector.
    pub const SORT_SOURCE: KeyFlags = KeyFlags(1 << 1);
    /// Value is produced by the pipeline (APPLY alias, reducer output).
    pub const COMPUTED: KeyFlags = KeyFlags(1 << 2);
    pub const WRITABLE: KeyFlags = KeyFlags(1 << 3);
    /// Needs a fetch from the store before it can be read.
    pub const LOADABLE: KeyFlags = KeyFlags(1 << 4);
    pub const LOADED: KeyFlags = KeyFlags(1 << 5);
    /// Resolved, but never returned in replies.
    pub const HIDDEN: KeyFlags = KeyFlags(1 << 6);
    /// Created against an unresolved name (distributed coordinator plans).
    pub const UNRESOLVED: KeyFlags = KeyFlags(1 << 7);

    pub fn contains(self, other: KeyFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: KeyFlags) -> bool {
        self.0 & other.0 != 0
    }

    fn source_class(self) -> u16 {
        self.0 & (Self::DOC_SOURCE.0 | Self::SORT_SOURCE.0 | Self::COMPUTED.0)
    }
}

impl BitOr for KeyFlags {
    type Output = KeyFlags;
    fn bitor(self, rhs: KeyFlags) -> KeyFlags {
        KeyFlags(self.0 | rhs.0)
    }
}

/// A named column with its stable slot index.
#[derive(Clone, Debug)]
pub struct LookupKey {
    pub name: String,
    pub flags: KeyFlags,
    pub slot: usize,
}

/// Ordered set of keys for one pipeline stage.
///
/// Adding a key returns a stable slot. Re-adding a name is idempotent when
/// the flag sets are compatible (same or absent source class); conflicting
/// provenance is an error.
#[derive(Default, Debug)]
pub struct Lookup {
    keys: Vec<LookupKey>,
    by_name: HashMap<String, usize>,
    /// Index schema fields that may be promoted to loadable keys on demand.
    schema_fields: Vec<String>,
    /// When set, unknown names bind as `UNRESOLVED` instead of failing.
    /// Used while binding the coordinator half of a distributed plan.
    pub allow_unresolved: bool,
}

impl Lookup {
    pub fn new() -> Self {
        Lookup::default()
    }

    /// Attach the index schema so document fields resolve lazily.
    pub fn set_schema(&mut self, fields: Vec<String>) {
        self.schema_fields = fields;
    }

    pub fn get(&self, name: &str) -> Option<&LookupKey> {
        self.by_name.get(name).map(|&i| &self.keys[i])
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &LookupKey> {
        self.keys.iter()
    }

    /// Keys that are returned to the client, in slot order.
    pub fn visible_keys(&self) -> impl Iterator<Item = &LookupKey> {
        self.keys.iter().filter(|k| !k.flags.contains(KeyFlags::HIDDEN))
    }

    /// Keys that still need a store fetch.
    pub fn loadable_keys(&self) -> impl Iterator<Item = &LookupKey> {
        self.keys
            .iter()
            .filter(|k| k.flags.contains(KeyFlags::LOADABLE) && !k.flags.contains(KeyFlags::LOADED))
    }

    /// Add a key, or return the existing slot when the flag sets agree.
    pub fn add(&mut self, name: &str, flags: KeyFlags) -> QueryResult<usize> {
        if let Some(&idx) = self.by_name.get(name) {
            let existing = &mut self.keys[idx];
            let a = existing.flags.source_class();
            let b = flags.source_class();
            if a != 0 && b != 0 && a != b {
                return Err(QueryError::parse_args(format!(
                    "Property `{name}` specified twice with conflicting sources"
                )));
            }
            existing.flags = existing.flags | flags;
            return Ok(existing.slot);
        }
        let slot = self.keys.len();
        self.keys.push(LookupKey {
            name: name.to_string(),
            flags,
            slot,
        });
        self.by_name.insert(name.to_string(), slot);
        Ok(slot)
    }

    /// Resolve a name for reading.
    ///
    /// Order: existing key, then schema field (promoted to a loadable doc
    /// key), then — only when `allow_unresolved` — a fresh unresolved key.
    pub fn bind_read(&mut self, name: &str) -> QueryResult<usize> {
        if let Some(key) = self.get(name) {
            return Ok(key.slot);
        }
        if self.schema_fields.iter().any(|f| f == name) {
            return self.add(name, KeyFlags::DOC_SOURCE | KeyFlags::LOADABLE);
        }
        if self.allow_unresolved {
            return self.add(name, KeyFlags::UNRESOLVED);
        }
        Err(QueryError::NoField(name.to_string()))
    }

    /// Resolve a name for writing a computed value (APPLY alias, reducer
    /// output).
    pub fn bind_write(&mut self, name: &str) -> QueryResult<usize> {
        self.add(name, KeyFlags::COMPUTED | KeyFlags::WRITABLE)
    }

    /// Hide a key from replies (generated auxiliary columns).
    pub fn set_hidden(&mut self, name: &str) {
        if let Some(&idx) = self.by_name.get(name) {
            self.keys[idx].flags = self.keys[idx].flags | KeyFlags::HIDDEN;
        }
    }

    /// Mark every loadable key as loaded (after a loader pass).
    pub fn mark_loaded(&mut self) {
        for key in &mut self.keys {
            if key.flags.contains(KeyFlags::LOADABLE) {
                key.flags = key.flags | KeyFlags::LOADED;
            }
        }
    }
}

static NULL_VALUE: Value = Value::Null;

/// Sparse, slot-indexed value vector. A missing slot reads as `Null`.
#[derive(Clone, Debug, Default)]
pub struct Row {
    cells: Vec<Option<Value>>,
    /// Key of the source document, when the row came from an index scan.
    pub src_key: Option<Arc<str>>,
    /// The scanned source hash, kept so the loader can re-populate late.
    pub src_hash: Option<Arc<HashMap<String, Value>>>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    /// Value at `slot`; missing cells read as `Null`.
    pub fn get(&self, slot: usize) -> &Value {
        self.cells
            .get(slot)
            .and_then(Option::as_ref)
            .unwrap_or(&NULL_VALUE)
    }

    pub fn get_opt(&self, slot: usize) -> Option<&Value> {
        self.cells.get(slot).and_then(Option::as_ref)
    }

    pub fn is_set(&self, slot: usize) -> bool {
        self.get_opt(slot).is_some()
    }

    pub fn write(&mut self, slot: usize, value: Value) {
        if slot >= self.cells.len() {
            self.cells.resize(slot + 1, None);
        }
        self.cells[slot] = Some(value);
    }

    /// Drop all owned values but keep the allocation.
    pub fn reset(&mut self) {
        self.cells.clear();
        self.src_key = None;
        self.src_hash = None;
    }

    pub fn width(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_stable_and_idempotent() {
        let mut lk = Lookup::new();
        let a = lk.add("a", KeyFlags::DOC_SOURCE).unwrap();
        let b = lk.add("b", KeyFlags::COMPUTED | KeyFlags::WRITABLE).unwrap();
        assert_eq!((a, b), (0, 1));
        // idempotent re-add with compatible flags
        assert_eq!(lk.add("a", KeyFlags::DOC_SOURCE | KeyFlags::LOADABLE).unwrap(), 0);
        assert_eq!(lk.get("a").unwrap().slot, 0);
    }

    #[test]
    fn conflicting_source_class_is_rejected() {
        let mut lk = Lookup::new();
        lk.add("x", KeyFlags::COMPUTED).unwrap();
        assert!(lk.add("x", KeyFlags::DOC_SOURCE).is_err());
    }

    #[test]
    fn bind_read_promotes_schema_fields() {
        let mut lk = Lookup::new();
        lk.set_schema(vec!["title".to_string(), "price".to_string()]);
        let slot = lk.bind_read("price").unwrap();
        let key = lk.get("price").unwrap();
        assert_eq!(key.slot, slot);
        assert!(key.flags.contains(KeyFlags::LOADABLE));
        assert!(key.flags.contains(KeyFlags::DOC_SOURCE));
    }

    #[test]
    fn bind_read_unknown_name() {
        let mut lk = Lookup::new();
        assert_eq!(lk.bind_read("ghost"), Err(QueryError::NoField("ghost".into())));
        lk.allow_unresolved = true;
        let slot = lk.bind_read("ghost").unwrap();
        assert!(lk.get("ghost").unwrap().flags.contains(KeyFlags::UNRESOLVED));
        assert_eq!(slot, 0);
    }

    #[test]
    fn missing_row_slots_read_null() {
        let mut row = Row::new();
        assert!(row.get(3).is_null());
        row.write(3, Value::number(9.0));
        assert_eq!(row.get(3).to_number(), Some(9.0));
        assert!(row.get(1).is_null());
        row.reset();
        assert!(row.get(3).is_null());
    }
}
