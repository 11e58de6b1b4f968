//! # Error Types
//!
//! Errors raised while building or validating a network. Every variant is a
//! configuration error: the network as described cannot be compiled, and no
//! request against it can succeed until the description is fixed.

use thiserror::Error;

use crate::index::Index;

/// Configuration errors for networks and descriptors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Two nodes share a name.
    #[error("Duplicate node name '{name}'")]
    DuplicateNode { name: String },

    /// Two components share a name.
    #[error("Duplicate component name '{name}'")]
    DuplicateComponent { name: String },

    /// A node name was not found in the network.
    #[error("No node named '{name}' in the network")]
    UnknownNode { name: String },

    /// A component name was not found in the network.
    #[error("No component named '{name}' in the network")]
    UnknownComponent { name: String },

    /// A descriptor or dim-range refers to a node id that does not exist.
    #[error("Node index {index} out of range (network has {count} nodes)")]
    NodeOutOfRange { index: usize, count: usize },

    /// A node of the wrong kind was referenced (e.g. a descriptor referencing
    /// another descriptor node).
    #[error("Node '{name}' cannot be used here: expected {expected}")]
    WrongNodeKind { name: String, expected: &'static str },

    /// `Switch()` with no branches.
    #[error("Switch() requires at least one branch")]
    EmptySwitch,

    /// `Append()` with no parts.
    #[error("Append() requires at least one part")]
    EmptyAppend,

    /// `Round()` with a non-positive modulus.
    #[error("Round() modulus must be positive, got {modulus}")]
    InvalidModulus { modulus: i32 },

    /// Mapping an index through a descriptor leaves the `i32` range.
    #[error("Index {index} cannot be mapped through the descriptor without overflowing i32")]
    IndexOverflow { index: Index },

    /// Dimensions disagree where they must match.
    #[error("Dimension mismatch at {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        got: usize,
    },

    /// Structural problem with the node list.
    #[error("Invalid network: {reason}")]
    InvalidNetwork { reason: String },
}
