//! # kvsearch
//!
//! Full-text and vector search engine core for key-value stores: a
//! declarative query surface (`SEARCH`, `AGGREGATE`, `HYBRID`) compiled
//! into logical plans and executed by a composable result-processor
//! pipeline.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Command argv
//!     ↓
//! [Command Parser]          → AggPlan / ParsedHybrid
//!     ↓
//! [Distributor] (optional)  → shard argv + coordinator plan
//!     ↓
//! [Pipeline Builder]        → result-processor chain, names bound to
//!     ↓                       slots through the lookup layer
//! [Execution]               → pull-based next() with deadline checks
//!     ↓
//! [Hybrid Merger] (optional)→ RRF / linear fusion over branch streams
//!     ↓
//! [Cursor] (optional)       → paused pipeline parked in the registry
//!     ↓
//! Reply (array of frames)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use kvsearch::{Engine, FieldSpec, Value};
//!
//! let engine = Engine::with_defaults();
//! engine
//!     .store()
//!     .create_index("idx", vec![FieldSpec::text("t1")])
//!     .unwrap();
//! engine
//!     .store()
//!     .put_document("d1", vec![("t1", Value::string("value one"))]);
//!
//! let argv: Vec<String> = ["AGGREGATE", "idx", "*", "LOAD", "1", "@t1"]
//!     .iter()
//!     .map(|s| s.to_string())
//!     .collect();
//! let reply = engine.dispatch(&argv).unwrap();
//! assert_eq!(reply.as_array().unwrap()[0].as_int(), Some(1));
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `value` | Refcounted polymorphic scalar with coercion rules |
//! | `lookup` | Named typed columns, stable slots, sparse rows |
//! | `expr` | APPLY/FILTER expression language and evaluator |
//! | `plan` | Logical aggregation plan and its argv parser |
//! | `distribute` | Shard/coordinator plan rewrite and serialization |
//! | `pipeline` | Result-processor framework and concrete processors |
//! | `reducers` | GROUPBY accumulators with distributed merge |
//! | `hybrid` | Text+vector request composition and fusion rules |
//! | `cursor` | Paused-pipeline registry with idle reaping |
//! | `store` | Document/index trait seams and the in-memory store |
//! | `request` | Command dispatch, pipeline building, replies |

pub mod config;
pub mod cursor;
pub mod distribute;
pub mod doc_meta;
pub mod error;
pub mod expr;
pub mod hybrid;
pub mod lookup;
pub mod pipeline;
pub mod plan;
pub mod reducers;
pub mod reply;
pub mod request;
pub mod shared_lock;
pub mod store;
pub mod value;
pub mod wire;

pub use config::Config;
pub use error::{QueryError, QueryResult};
pub use lookup::{KeyFlags, Lookup, LookupKey, Row};
pub use pipeline::{
    ExecContext, Pipeline, QueryDeadline, ResultProcessor, RpStatus, SearchResult, TimeoutPolicy,
};
pub use plan::{AggPlan, PlanStep};
pub use reply::Reply;
pub use request::{execute_distributed, Engine};
pub use store::{FieldSpec, IndexSpec, MemoryStore};
pub use value::Value;
