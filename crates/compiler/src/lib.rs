//! # nnet-compiler - From Network and Request to Matrix Program
//!
//! Compiles a [`Nnet`](nnet_core::Nnet) plus a [`ComputationRequest`] into an
//! [`NnetComputation`]: matrices, submatrix views, row maps and a flat list
//! of commands an executor can run top to bottom.
//!
//! ## Pipeline
//!
//! ```text
//! request ──▶ ComputationGraphBuilder ──▶ ComputationGraph
//!                                             │
//!                                  plan_steps ▼
//!                                         Vec<Step> ──▶ lower ──▶ NnetComputation
//! ```
//!
//! ## Example
//!
//! ```
//! use nnet_core::{ComponentInfo, ForwardingDescriptor, Nnet};
//! use nnet_compiler::{compile, ComputationRequest, IoSpecification};
//!
//! let mut nnet = Nnet::new();
//! nnet.add_component("affine", ComponentInfo::affine(4, 2)).unwrap();
//! let input = nnet.add_input_node("input", 4).unwrap();
//! let affine = nnet
//!     .add_component_node("affine", "affine", ForwardingDescriptor::node(input))
//!     .unwrap();
//! nnet.add_output_node("output", ForwardingDescriptor::node(affine)).unwrap();
//!
//! let request = ComputationRequest::new()
//!     .with_input(IoSpecification::frames("input", 1, 0..5))
//!     .with_output(IoSpecification::frames("output", 1, 0..5));
//! let computation = compile(&nnet, &request).unwrap();
//! assert!(computation.check().is_ok());
//! ```

pub mod builder;
pub mod compiler;
pub mod computation;
pub mod config;
pub mod error;
pub mod graph;
pub mod lowering;
pub mod request;
pub mod steps;

pub use builder::ComputationGraphBuilder;
pub use compiler::Compiler;
pub use computation::{Command, MatrixDebugInfo, MatrixInfo, NnetComputation, SubMatrixInfo};
pub use config::CompilerConfig;
pub use error::CompileError;
pub use graph::{CindexStatus, ComputationGraph};
pub use request::{ComputationRequest, IoSpecification};
pub use steps::{plan_steps, Step};

use nnet_core::Nnet;

/// Compile with the default configuration.
pub fn compile(nnet: &Nnet, request: &ComputationRequest) -> Result<NnetComputation, CompileError> {
    Compiler::new(nnet, CompilerConfig::default()).compile(request)
}
