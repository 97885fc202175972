//! # Store and Index Seams
//!
//! The engine treats document storage, the inverted index, and the vector
//! index as collaborators behind thin traits. `MemoryStore` is the
//! in-memory implementation the command layer and the test-suite run
//! against: a hash-per-key document store with field-level expiry, plus a
//! trivial tokenizer, postings map, and flat vector scan per index.
//!
//! Index handles are refcounted (`Arc<IndexSpec>`); a pipeline holds one
//! for its whole life, so dropping an index is delayed until the last
//! pipeline using it finishes.

use crate::doc_meta::DocIdMeta;
use crate::error::{QueryError, QueryResult};
use crate::expr::FieldSource;
use crate::value::Value;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One hit from an index iterator.
#[derive(Clone, Debug)]
pub struct IndexHit {
    pub doc_id: u64,
    pub score: f64,
    pub key: Arc<str>,
}

/// Pull iterator over index hits, consumed by the root processor.
pub trait IndexIterator: Send {
    fn next_hit(&mut self) -> Option<IndexHit>;
}

/// One hit from a vector search.
#[derive(Clone, Debug)]
pub struct VectorHit {
    pub doc_id: u64,
    pub key: Arc<str>,
    pub distance: f64,
}

/// The ANN index seam. The engine only needs k-nearest-neighbor queries;
/// the index structure behind them is out of scope.
pub trait VectorIndex: Send + Sync {
    fn knn(&self, field: &str, query: &[f32], k: usize) -> Vec<VectorHit>;
}

/// A fetched field: missing fields carry no value, expired fields report
/// the field-level expiry the loader turns into a result flag.
#[derive(Clone, Debug, Default)]
pub struct StoredField {
    pub value: Option<Value>,
    pub expired: bool,
}

/// Hash-field access, as the loader sees it.
pub trait DocumentStore: Send + Sync {
    fn fetch_fields(&self, key: &str, fields: &[String]) -> Vec<StoredField>;
    fn has_field(&self, key: &str, field: &str) -> bool;
    /// All field names of a key, for `LOAD *`.
    fn field_names(&self, key: &str) -> Vec<String>;
}

/// Schema field kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Numeric,
    Tag,
    Vector,
}

#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn text(name: &str) -> Self {
        FieldSpec { name: name.to_string(), kind: FieldKind::Text }
    }

    pub fn numeric(name: &str) -> Self {
        FieldSpec { name: name.to_string(), kind: FieldKind::Numeric }
    }

    pub fn tag(name: &str) -> Self {
        FieldSpec { name: name.to_string(), kind: FieldKind::Tag }
    }

    pub fn vector(name: &str) -> Self {
        FieldSpec { name: name.to_string(), kind: FieldKind::Vector }
    }
}

struct IndexedDoc {
    doc_id: u64,
    key: Arc<str>,
}

#[derive(Default)]
struct IndexState {
    docs: Vec<IndexedDoc>,
    by_key: HashMap<String, usize>,
    /// term → (doc_id, term frequency), kept in doc-id order.
    postings: HashMap<String, Vec<(u64, u32)>>,
    /// vector field → stored vectors in doc-id order.
    vectors: HashMap<String, Vec<(u64, Arc<str>, Vec<f32>)>>,
    next_doc_id: u64,
}

/// One search index: a schema plus its (mock) inverted and vector data.
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    /// Creation-order slot, the per-key doc-id meta index.
    pub slot: usize,
    state: RwLock<IndexState>,
}

impl IndexSpec {
    fn new(name: &str, fields: Vec<FieldSpec>, slot: usize) -> Self {
        IndexSpec {
            name: name.to_string(),
            fields,
            slot,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn doc_count(&self) -> usize {
        self.state.read().docs.len()
    }

    /// Index a document's fields; returns the assigned doc id.
    fn index_document(&self, key: &str, fields: &BTreeMap<String, StoredField>) -> u64 {
        let mut state = self.state.write();
        let existing = state.by_key.get(key).copied();
        let doc_id = match existing {
            Some(pos) => {
                // reindex: drop old postings for this doc first
                let old_id = state.docs[pos].doc_id;
                for list in state.postings.values_mut() {
                    list.retain(|(id, _)| *id != old_id);
                }
                for list in state.vectors.values_mut() {
                    list.retain(|(id, _, _)| *id != old_id);
                }
                old_id
            }
            None => {
                state.next_doc_id += 1;
                let id = state.next_doc_id;
                let pos = state.docs.len();
                state.docs.push(IndexedDoc { doc_id: id, key: Arc::from(key) });
                state.by_key.insert(key.to_string(), pos);
                id
            }
        };
        let key_arc: Arc<str> = Arc::from(key);
        for spec in &self.fields {
            let Some(stored) = fields.get(&spec.name) else {
                continue;
            };
            let Some(value) = &stored.value else { continue };
            match spec.kind {
                FieldKind::Text => {
                    let text = value.to_display();
                    let mut freqs: HashMap<String, u32> = HashMap::new();
                    for term in tokenize(&text) {
                        *freqs.entry(term).or_insert(0) += 1;
                    }
                    for (term, freq) in freqs {
                        let list = state.postings.entry(term).or_default();
                        list.push((doc_id, freq));
                        list.sort_unstable_by_key(|(id, _)| *id);
                    }
                }
                FieldKind::Tag => {
                    let tags: Vec<String> = match value.as_array() {
                        Some(items) => items.iter().map(Value::to_display).collect(),
                        None => value.to_display().split(',').map(str::to_string).collect(),
                    };
                    for tag in tags {
                        let tag = tag.trim().to_lowercase();
                        if tag.is_empty() {
                            continue;
                        }
                        let list = state.postings.entry(tag).or_default();
                        list.push((doc_id, 1));
                        list.sort_unstable_by_key(|(id, _)| *id);
                    }
                }
                FieldKind::Vector => {
                    if let Some(vector) = value_as_vector(value) {
                        let list = state.vectors.entry(spec.name.clone()).or_default();
                        list.push((doc_id, Arc::clone(&key_arc), vector));
                        list.sort_unstable_by_key(|(id, _, _)| *id);
                    }
                }
                FieldKind::Numeric => {}
            }
        }
        doc_id
    }

    fn remove_document(&self, key: &str) {
        let mut state = self.state.write();
        let Some(pos) = state.by_key.remove(key) else {
            return;
        };
        let doc_id = state.docs[pos].doc_id;
        state.docs.remove(pos);
        for idx in state.by_key.values_mut() {
            if *idx > pos {
                *idx -= 1;
            }
        }
        for list in state.postings.values_mut() {
            list.retain(|(id, _)| *id != doc_id);
        }
        for list in state.vectors.values_mut() {
            list.retain(|(id, _, _)| *id != doc_id);
        }
    }

    /// Iterator over every document, in doc-id order, score 1.
    pub fn scan_all(&self) -> Box<dyn IndexIterator> {
        let state = self.state.read();
        let hits = state
            .docs
            .iter()
            .map(|d| IndexHit { doc_id: d.doc_id, score: 1.0, key: Arc::clone(&d.key) })
            .collect();
        Box::new(VecIterator { hits, pos: 0 })
    }

    /// Term query: documents matching any term, scored by the fraction of
    /// query terms they match, in doc-id order. `*` scans everything.
    pub fn search(&self, query: &str) -> Box<dyn IndexIterator> {
        let trimmed = query.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return self.scan_all();
        }
        let terms = tokenize(trimmed);
        if terms.is_empty() {
            return Box::new(VecIterator { hits: Vec::new(), pos: 0 });
        }
        let state = self.state.read();
        let mut matched: BTreeMap<u64, u32> = BTreeMap::new();
        for term in &terms {
            if let Some(list) = state.postings.get(term) {
                for (doc_id, _freq) in list {
                    *matched.entry(*doc_id).or_insert(0) += 1;
                }
            }
        }
        let key_of: HashMap<u64, Arc<str>> = state
            .docs
            .iter()
            .map(|d| (d.doc_id, Arc::clone(&d.key)))
            .collect();
        let total = terms.len() as f64;
        let hits = matched
            .into_iter()
            .filter_map(|(doc_id, n)| {
                key_of.get(&doc_id).map(|key| IndexHit {
                    doc_id,
                    score: f64::from(n) / total,
                    key: Arc::clone(key),
                })
            })
            .collect();
        Box::new(VecIterator { hits, pos: 0 })
    }
}

impl VectorIndex for IndexSpec {
    /// Flat exact scan: L2 distance, k smallest, doc-id ascending ties.
    fn knn(&self, field: &str, query: &[f32], k: usize) -> Vec<VectorHit> {
        let state = self.state.read();
        let Some(list) = state.vectors.get(field) else {
            return Vec::new();
        };
        let mut hits: Vec<VectorHit> = list
            .iter()
            .map(|(doc_id, key, vector)| VectorHit {
                doc_id: *doc_id,
                key: Arc::clone(key),
                distance: l2_distance(query, vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(k);
        hits
    }
}

struct VecIterator {
    hits: Vec<IndexHit>,
    pos: usize,
}

impl IndexIterator for VecIterator {
    fn next_hit(&mut self) -> Option<IndexHit> {
        let hit = self.hits.get(self.pos).cloned();
        if hit.is_some() {
            self.pos += 1;
        }
        hit
    }
}

/// Whitespace/punctuation tokenizer, lowercase. The real tokenizer stack
/// is a collaborator; this is only what the mock index needs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len().min(b.len());
    let mut sum = 0.0f64;
    for i in 0..n {
        let d = f64::from(a[i]) - f64::from(b[i]);
        sum += d * d;
    }
    // dimension mismatch contributes the missing components squared
    for &x in &a[n..] {
        sum += f64::from(x) * f64::from(x);
    }
    for &x in &b[n..] {
        sum += f64::from(x) * f64::from(x);
    }
    sum.sqrt()
}

/// Interpret a stored value as a vector: an array of numbers, or a
/// comma/space separated numeric string.
pub fn value_as_vector(value: &Value) -> Option<Vec<f32>> {
    if let Some(items) = value.as_array() {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(item.to_number()? as f32);
        }
        return Some(out);
    }
    let text = value.as_str()?;
    parse_vector_text(text)
}

/// Parse the textual vector form used by `VSIM` blobs in tests.
pub fn parse_vector_text(text: &str) -> Option<Vec<f32>> {
    let parts: Vec<&str> = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    if parts.is_empty() {
        return None;
    }
    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        out.push(part.parse::<f32>().ok()?);
    }
    Some(out)
}

struct StoredDoc {
    fields: BTreeMap<String, StoredField>,
    meta: DocIdMeta,
}

/// The in-memory key-value store plus the index registry.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, StoredDoc>>,
    indexes: DashMap<String, Arc<IndexSpec>>,
    created: RwLock<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn create_index(&self, name: &str, fields: Vec<FieldSpec>) -> QueryResult<Arc<IndexSpec>> {
        if self.indexes.contains_key(name) {
            return Err(QueryError::parse_args(format!("index `{name}` already exists")));
        }
        // docs before indexes, matching every writer's lock order
        let mut docs = self.docs.write();
        let mut created = self.created.write();
        let spec = Arc::new(IndexSpec::new(name, fields, *created));
        *created += 1;
        drop(created);
        self.indexes.insert(name.to_string(), Arc::clone(&spec));

        // existing documents join the new index
        for (key, doc) in docs.iter_mut() {
            let doc_id = spec.index_document(key, &doc.fields);
            let _ = doc.meta.set(spec.slot, doc_id);
        }
        Ok(spec)
    }

    pub fn get_index(&self, name: &str) -> QueryResult<Arc<IndexSpec>> {
        self.indexes
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| QueryError::NoIndex(name.to_string()))
    }

    /// Drop the registry entry. Pipelines holding the `Arc` keep working;
    /// the spec is freed when the last one finishes.
    pub fn drop_index(&self, name: &str) -> QueryResult<()> {
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| QueryError::NoIndex(name.to_string()))
    }

    /// Write a document hash and index it everywhere.
    pub fn put_document(&self, key: &str, fields: Vec<(&str, Value)>) {
        let stored: BTreeMap<String, StoredField> = fields
            .into_iter()
            .map(|(name, value)| {
                (name.to_string(), StoredField { value: Some(value), expired: false })
            })
            .collect();
        let mut docs = self.docs.write();
        let doc = docs.entry(key.to_string()).or_insert_with(|| StoredDoc {
            fields: BTreeMap::new(),
            meta: DocIdMeta::new(),
        });
        doc.fields = stored;
        for entry in self.indexes.iter() {
            let spec = entry.value();
            let doc_id = spec.index_document(key, &doc.fields);
            let _ = doc.meta.set(spec.slot, doc_id);
        }
    }

    pub fn delete_document(&self, key: &str) {
        let mut docs = self.docs.write();
        if docs.remove(key).is_some() {
            for entry in self.indexes.iter() {
                entry.value().remove_document(key);
            }
        }
    }

    /// Mark one field expired; subsequent loads see the expiry.
    pub fn expire_field(&self, key: &str, field: &str) {
        let mut docs = self.docs.write();
        if let Some(doc) = docs.get_mut(key) {
            if let Some(cell) = doc.fields.get_mut(field) {
                cell.expired = true;
                cell.value = None;
            }
        }
    }

    /// The per-key doc-id meta blob, persisted verbatim.
    pub fn doc_meta_blob(&self, key: &str) -> Option<Vec<u8>> {
        self.docs.read().get(key).map(|d| d.meta.to_blob())
    }

    pub fn doc_id_for_index(&self, key: &str, spec: &IndexSpec) -> Option<u64> {
        self.docs.read().get(key).and_then(|d| d.meta.get(spec.slot))
    }
}

impl DocumentStore for MemoryStore {
    fn fetch_fields(&self, key: &str, fields: &[String]) -> Vec<StoredField> {
        let docs = self.docs.read();
        let Some(doc) = docs.get(key) else {
            return fields.iter().map(|_| StoredField::default()).collect();
        };
        fields
            .iter()
            .map(|name| doc.fields.get(name).cloned().unwrap_or_default())
            .collect()
    }

    fn has_field(&self, key: &str, field: &str) -> bool {
        self.docs
            .read()
            .get(key)
            .is_some_and(|d| d.fields.get(field).is_some_and(|c| c.value.is_some()))
    }

    fn field_names(&self, key: &str) -> Vec<String> {
        self.docs
            .read()
            .get(key)
            .map(|d| d.fields.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl FieldSource for MemoryStore {
    fn has_field(&self, key: &str, field: &str) -> bool {
        DocumentStore::has_field(self, key, field)
    }
}
