//! Expression function registry.
//!
//! Process-wide and append-only: builtins are installed once, callers may
//! add more, nothing is ever removed. The parser resolves names here and
//! checks arity; handlers only ever see argument counts inside their
//! declared bounds.

pub mod date;
pub mod math;
pub mod string;

use crate::error::{QueryError, QueryResult};
use crate::expr::eval::EvalContext;
use crate::value::Value;
use parking_lot::RwLock;
use std::sync::{LazyLock, Once};

/// Function callback. Arguments arrive already evaluated.
pub type FunctionHandler = fn(&EvalContext<'_>, &[Value]) -> QueryResult<Value>;

/// Declared return type, used by plan-time diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetType {
    Number,
    String,
    Array,
}

#[derive(Clone)]
pub struct FunctionInfo {
    pub name: String,
    pub handler: FunctionHandler,
    pub ret: RetType,
    pub min_args: usize,
    pub max_args: usize,
}

static REGISTRY: LazyLock<RwLock<Vec<FunctionInfo>>> = LazyLock::new(|| RwLock::new(Vec::new()));
static BUILTINS: Once = Once::new();

/// Register a function. Names are case-insensitive; re-registering an
/// existing name is an error (the registry is append-only).
pub fn register(
    name: &str,
    handler: FunctionHandler,
    ret: RetType,
    min_args: usize,
    max_args: usize,
) -> QueryResult<()> {
    let mut reg = REGISTRY.write();
    if reg.iter().any(|f| f.name.eq_ignore_ascii_case(name)) {
        return Err(QueryError::parse_args(format!(
            "function `{name}` already registered"
        )));
    }
    reg.push(FunctionInfo {
        name: name.to_ascii_lowercase(),
        handler,
        ret,
        min_args,
        max_args,
    });
    Ok(())
}

/// Case-insensitive lookup.
pub fn lookup(name: &str) -> Option<FunctionInfo> {
    REGISTRY
        .read()
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(name))
        .cloned()
}

/// Install the builtin libraries exactly once.
pub fn ensure_builtins() {
    BUILTINS.call_once(|| {
        math::register_all();
        string::register_all();
        date::register_all();
    });
}
