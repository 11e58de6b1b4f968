//! # Error Types
//!
//! Every way a compilation can fail. Network configuration errors from
//! `nnet-core` pass through unchanged; the rest describe problems with the
//! request or with what the request asks of the network.

use nnet_core::{CoreError, Index};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The network itself is malformed.
    #[error(transparent)]
    Network(#[from] CoreError),

    /// The request names a node the network does not have.
    #[error("Request refers to unknown node '{name}'")]
    UnknownNode { name: String },

    /// The request names a node of the wrong kind for its role.
    #[error("Node '{name}' cannot be used as {role}")]
    WrongNodeKind { name: String, role: &'static str },

    /// The request is malformed (duplicates, nothing requested, ...).
    #[error("Invalid computation request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Invalid compiler configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A requested output cannot be computed from the provided inputs.
    #[error("Output '{node}' is not computable at index {index} from the provided inputs")]
    Unsatisfiable { node: String, index: Index },

    /// Dependency expansion exceeded the cindex cap.
    #[error("Dependency expansion exceeded {limit} cindexes; the network probably recurses without bound")]
    RunawayExpansion { limit: usize },

    /// A quantity depends on itself at the same index.
    #[error("Cyclic dependency involving node '{node}' at index {index}")]
    CyclicDependency { node: String, index: Index },

    /// An internal invariant was violated while compiling.
    #[error("Internal compiler error: {reason}")]
    Internal { reason: String },

    /// `NnetComputation::check()` rejected the generated program.
    #[error("Invalid computation: {reason}")]
    InvalidComputation { reason: String },
}
