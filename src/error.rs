//! Query Error Types
//!
//! One error enum for the whole query path. Bind-time errors abort plan
//! construction before any processor is allocated; runtime errors surface
//! through `ResultProcessor::next` and tear the chain down.

use thiserror::Error;

/// Errors produced while parsing, binding, or executing a query.
///
/// Messages are user-visible. They must never embed internal pointers or
/// allocator addresses; expression text shown to users goes through the
/// canonical dump, log lines through the obfuscated dump.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Malformed command arguments. Detail names the offending token.
    #[error("Bad arguments: {0}")]
    ParseArgs(String),

    /// Expression parse failure. Detail includes the byte offset.
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// Index name did not resolve.
    #[error("No such index `{0}`")]
    NoIndex(String),

    /// A property did not resolve at bind time.
    #[error("Property `{0}` not loaded in pipeline")]
    NoField(String),

    /// Function name did not resolve in the registry.
    #[error("Unknown function `{0}`")]
    NoFunction(String),

    /// Runtime type mismatch inside an expression.
    #[error("Invalid type: {0}")]
    BadType(String),

    /// A value was out of range or otherwise unusable.
    #[error("Bad value: {0}")]
    BadValue(String),

    /// The query deadline elapsed under the `Return` policy.
    #[error("Timeout limit was reached")]
    Timeout,

    /// A bounded resource cap was hit (cursor count, queue depth, ...).
    #[error("Resource limit reached: {0}")]
    Limit(String),

    /// `CURSOR READ`/`CURSOR DEL` with an id that is not in the table.
    #[error("Cursor not found: {0}")]
    NoCursor(u64),

    /// Invariant violation. Not recovered.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Shorthand for `ParseArgs` with a formatted token context.
    pub fn parse_args(msg: impl Into<String>) -> Self {
        QueryError::ParseArgs(msg.into())
    }

    /// Shorthand for `Syntax` at a byte offset.
    pub fn syntax(offset: usize, message: impl Into<String>) -> Self {
        QueryError::Syntax {
            offset,
            message: message.into(),
        }
    }

    /// True for errors raised before any processor was allocated.
    pub fn is_bind_time(&self) -> bool {
        matches!(
            self,
            QueryError::ParseArgs(_)
                | QueryError::Syntax { .. }
                | QueryError::NoIndex(_)
                | QueryError::NoField(_)
                | QueryError::NoFunction(_)
        )
    }
}

/// Result alias used across the query path.
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = QueryError::NoField("brand".to_string());
        assert_eq!(err.to_string(), "Property `brand` not loaded in pipeline");

        let err = QueryError::syntax(7, "unbalanced parenthesis");
        assert!(err.to_string().contains("offset 7"));
    }

    #[test]
    fn bind_time_classification() {
        assert!(QueryError::NoFunction("frobnicate".into()).is_bind_time());
        assert!(!QueryError::Timeout.is_bind_time());
        assert!(!QueryError::NoCursor(42).is_bind_time());
    }
}
