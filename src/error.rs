//! Error types for graph validation.

use thiserror::Error;

/// Structural errors reported by [`crate::Graph::validate`].
///
/// The rule table itself never returns errors: a malformed node is a silent
/// no-op during a pass (previously written slots stay intact, nothing turns
/// stale spuriously). `validate` is the loud pre-flight check for builders
/// that want malformed graphs surfaced instead of skipped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// An operator was given a number of inputs it cannot differentiate.
    #[error("{op} expects {expected} input(s), got {got}")]
    ArityMismatch {
        op: &'static str,
        expected: &'static str,
        got: usize,
    },

    /// An input id does not refer to a node in this graph.
    #[error("node {node} input #{input} refers to a node outside the graph")]
    DanglingInput { node: usize, input: usize },
}
