//! Error types for dependency evaluation and definition.

use thiserror::Error;

use crate::name::QualifiedName;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while defining, reading, or recomputing tracked variables.
#[derive(Error, Debug)]
pub enum Error {
    /// A recompute procedure re-entered itself before completing.
    #[error("circular dependency on {name}: {}", format_chain(.chain))]
    CircularDependency {
        name: QualifiedName,
        chain: Vec<QualifiedName>,
    },

    #[error("unknown dependency: {0}")]
    UnknownDependency(QualifiedName),

    #[error("dependency already defined: {0}")]
    RedefinitionConflict(QualifiedName),

    #[error("value error: {0} is undefined")]
    UndefinedVariable(QualifiedName),

    #[error("{0} is an itemwise dependency and must be read with an index")]
    IndexRequired(QualifiedName),

    #[error("length error in {0}")]
    Length(&'static str),

    #[error("domain error in {0}")]
    Domain(&'static str),

    #[error("type error in {0}")]
    Type(&'static str),

    #[error("index error: {index} is out of range for length {length}")]
    Index { index: i64, length: usize },

    // Compiler-layer errors. The bridge raises these before registration.
    #[error("itemwise definition of {variable} has unbound indexer `{indexer}`")]
    UnboundIndexer { variable: String, indexer: String },

    #[error("cannot resolve name `{0}` to a context")]
    UnresolvedName(String),

    #[error("malformed definition: {0}")]
    Definition(#[from] serde_json::Error),
}

fn format_chain(chain: &[QualifiedName]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
