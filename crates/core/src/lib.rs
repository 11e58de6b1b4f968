//! # nnet-core - Network Description
//!
//! The data model a computation compiler works from:
//!
//! - **Indexes**: `(n, t, x)` row coordinates and node-qualified cindexes
//! - **Descriptors**: the glue expression language between nodes
//! - **Components**: the compiler-facing view of a layer (dims and flags)
//! - **Networks**: named components and nodes, with validation
//!
//! ## Example
//!
//! ```
//! use nnet_core::{ComponentInfo, ForwardingDescriptor, Nnet};
//!
//! let mut nnet = Nnet::new();
//! nnet.add_component("affine", ComponentInfo::affine(10, 4)).unwrap();
//! let input = nnet.add_input_node("input", 10).unwrap();
//! let affine = nnet
//!     .add_component_node("affine", "affine", ForwardingDescriptor::node(input))
//!     .unwrap();
//! nnet.add_output_node("output", ForwardingDescriptor::node(affine)).unwrap();
//! assert!(nnet.validate().is_ok());
//! assert_eq!(nnet.output_dim(affine), 4);
//! ```

pub mod component;
pub mod descriptor;
pub mod error;
pub mod index;
pub mod nnet;

pub use component::{Component, ComponentInfo, ComponentProperties};
pub use descriptor::{Axis, Descriptor, ForwardingDescriptor, SumDescriptor};
pub use error::CoreError;
pub use index::{format_cindexes, format_indexes, Cindex, Index};
pub use nnet::{NetworkNode, Nnet};
