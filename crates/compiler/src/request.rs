//! # Computation Requests
//!
//! What the caller wants computed: which indexes it will provide for each
//! input node, which it wants back from each output node, and which
//! derivatives it needs.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use nnet_core::{Index, Nnet};

use crate::error::CompileError;

/// Indexes provided for (or requested from) one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoSpecification {
    pub name: String,
    /// Row order of the matrix the caller supplies or receives.
    pub indexes: Vec<Index>,
    /// For inputs: the derivative w.r.t. this input is wanted.
    /// For outputs: the caller supplies a derivative for this output.
    #[serde(default)]
    pub has_deriv: bool,
}

impl IoSpecification {
    pub fn new(name: impl Into<String>, indexes: Vec<Index>) -> Self {
        Self {
            name: name.into(),
            indexes,
            has_deriv: false,
        }
    }

    /// Every `(n, t)` with `n` in `0..num_sequences` and `t` in `times`,
    /// `n` varying fastest.
    pub fn frames(name: impl Into<String>, num_sequences: i32, times: std::ops::Range<i32>) -> Self {
        let indexes = times
            .flat_map(|t| (0..num_sequences).map(move |n| Index::at(n, t)))
            .collect();
        Self::new(name, indexes)
    }

    pub fn with_deriv(mut self) -> Self {
        self.has_deriv = true;
        self
    }
}

/// A full request against a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationRequest {
    pub inputs: Vec<IoSpecification>,
    pub outputs: Vec<IoSpecification>,
    /// Gradients w.r.t. updatable component parameters are wanted.
    #[serde(default)]
    pub need_model_derivative: bool,
    /// Passed through to the executor; does not change the program.
    #[serde(default)]
    pub store_component_stats: bool,
}

impl ComputationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input: IoSpecification) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: IoSpecification) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_model_derivative(mut self) -> Self {
        self.need_model_derivative = true;
        self
    }

    /// Whether any backward pass is needed at all.
    pub fn need_derivatives(&self) -> bool {
        self.need_model_derivative
            || self.inputs.iter().any(|io| io.has_deriv)
            || self.outputs.iter().any(|io| io.has_deriv)
    }

    pub fn input(&self, name: &str) -> Option<&IoSpecification> {
        self.inputs.iter().find(|io| io.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&IoSpecification> {
        self.outputs.iter().find(|io| io.name == name)
    }

    /// Check names, node kinds and duplicates against `nnet`, and that a
    /// requested derivative has an output derivative to start from.
    pub fn validate(&self, nnet: &Nnet) -> Result<(), CompileError> {
        if self.outputs.is_empty() {
            return Err(CompileError::InvalidRequest {
                reason: "no outputs requested".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for (io, role) in self
            .inputs
            .iter()
            .map(|io| (io, "an input"))
            .chain(self.outputs.iter().map(|io| (io, "an output")))
        {
            let node = nnet
                .get_node_index(&io.name)
                .ok_or_else(|| CompileError::UnknownNode {
                    name: io.name.clone(),
                })?;
            let kind_ok = if role == "an input" {
                nnet.is_input_node(node)
            } else {
                nnet.is_output_node(node)
            };
            if !kind_ok {
                return Err(CompileError::WrongNodeKind {
                    name: io.name.clone(),
                    role,
                });
            }
            if !seen.insert(io.name.as_str()) {
                return Err(CompileError::InvalidRequest {
                    reason: format!("node '{}' appears more than once", io.name),
                });
            }
            if io.indexes.is_empty() {
                return Err(CompileError::InvalidRequest {
                    reason: format!("node '{}' has no indexes", io.name),
                });
            }
            let mut distinct = HashSet::with_capacity(io.indexes.len());
            if let Some(dup) = io.indexes.iter().find(|i| !distinct.insert(**i)) {
                return Err(CompileError::InvalidRequest {
                    reason: format!("index {} repeated for node '{}'", dup, io.name),
                });
            }
        }
        // The backward pass is seeded only from output derivatives.
        if self.need_derivatives() && !self.outputs.iter().any(|io| io.has_deriv) {
            return Err(CompileError::InvalidRequest {
                reason: "derivatives requested but no output supplies one".to_string(),
            });
        }
        Ok(())
    }
}
