//! Build-time errors.
//!
//! All of these point at a defect in how a query was put together. None of
//! them is worth retrying.

use thiserror::Error;

/// Errors raised while building or compiling a query descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// A column reference names an alias that is not in scope.
    #[error("unresolved alias `{alias}` in column `{alias}.{column}` of query on `{table}`")]
    UnresolvedAlias {
        /// Alias that could not be resolved.
        alias: String,
        /// Column referenced through it.
        column: String,
        /// Table of the query being compiled.
        table: String,
    },

    /// A relation name that was never declared on the table.
    #[error("unknown relation `{relation}` on table `{table}`")]
    UnknownRelation {
        /// Owner table.
        table: String,
        /// Relation name.
        relation: String,
    },

    /// A second write intent was set on a descriptor.
    #[error("cannot turn {existing} query on `{table}` into {attempted}")]
    ConflictingIntent {
        /// Target table.
        table: String,
        /// Intent already set.
        existing: &'static str,
        /// Intent that was attempted.
        attempted: &'static str,
    },

    /// An update without any assignment.
    #[error("update on `{table}` has nothing to set")]
    EmptyWriteSet {
        /// Target table.
        table: String,
    },

    /// A sub-query was embedded with a shape that has no wrapping template.
    #[error("cannot embed `{shape}` result as a sub-select ({context})")]
    UnsupportedReturnShape {
        /// Offending shape.
        shape: String,
        /// Where it was found.
        context: String,
    },

    /// A raw fragment whose placeholders do not match its parameters.
    #[error("invalid raw SQL `{text}`: {reason}")]
    InvalidRaw {
        /// Fragment text.
        text: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A write descriptor that cannot be rendered.
    #[error("invalid write on `{table}`: {reason}")]
    InvalidWrite {
        /// Target table.
        table: String,
        /// Why it cannot be rendered.
        reason: String,
    },
}

/// Result type for query building.
pub type Result<T> = std::result::Result<T, QueryError>;
