//! # Components - What a Node Computes
//!
//! The compiler never runs a component. It needs only the facts that shape
//! the command list: dimensions, property flags, and (for the non-row-wise
//! extension point) which input indexes an output index reads.

use bitflags::bitflags;
use std::fmt;

use crate::index::Index;

bitflags! {
    /// Properties that change how a component is lowered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ComponentProperties: u32 {
        /// Row-wise: output row `i` depends only on input row `i`.
        const SIMPLE = 1 << 0;
        /// Has trainable parameters.
        const UPDATABLE = 1 << 1;
        /// Propagate adds into its output, so the output must start zeroed.
        const PROPAGATE_ADDS = 1 << 2;
        /// Backprop reads the forward input value.
        const BACKPROP_NEEDS_INPUT = 1 << 3;
        /// Backprop reads the forward output value.
        const BACKPROP_NEEDS_OUTPUT = 1 << 4;
    }
}

/// A component definition as seen by the compiler.
pub trait Component: fmt::Debug + Send + Sync {
    /// Short type name used in diagnostics, e.g. `"AffineComponent"`.
    fn type_name(&self) -> &str;

    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    fn properties(&self) -> ComponentProperties;

    fn is_simple(&self) -> bool {
        self.properties().contains(ComponentProperties::SIMPLE)
    }

    /// Input indexes read to produce `output`. Row-wise components read the
    /// same index.
    fn input_indexes(&self, output: &Index) -> Vec<Index> {
        vec![*output]
    }

    /// Whether `output` can be produced given which input indexes are
    /// available, and if so which inputs it reads.
    fn is_computable(
        &self,
        output: &Index,
        input_available: &dyn Fn(&Index) -> bool,
    ) -> Option<Vec<Index>> {
        let inputs = self.input_indexes(output);
        inputs.iter().all(|i| input_available(i)).then_some(inputs)
    }
}

/// Plain description of a row-wise component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    pub type_name: String,
    pub input_dim: usize,
    pub output_dim: usize,
    pub properties: ComponentProperties,
}

impl ComponentInfo {
    pub fn new(
        type_name: impl Into<String>,
        input_dim: usize,
        output_dim: usize,
        properties: ComponentProperties,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            input_dim,
            output_dim,
            properties,
        }
    }

    /// Affine transform with trainable parameters.
    pub fn affine(input_dim: usize, output_dim: usize) -> Self {
        Self::new(
            "AffineComponent",
            input_dim,
            output_dim,
            ComponentProperties::SIMPLE
                | ComponentProperties::UPDATABLE
                | ComponentProperties::BACKPROP_NEEDS_INPUT,
        )
    }

    /// Element-wise nonlinearity; backprop uses the forward output.
    pub fn nonlinearity(type_name: impl Into<String>, dim: usize) -> Self {
        Self::new(
            type_name,
            dim,
            dim,
            ComponentProperties::SIMPLE | ComponentProperties::BACKPROP_NEEDS_OUTPUT,
        )
    }

    pub fn with_properties(mut self, properties: ComponentProperties) -> Self {
        self.properties = properties;
        self
    }
}

impl Component for ComponentInfo {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn output_dim(&self) -> usize {
        self.output_dim
    }

    fn properties(&self) -> ComponentProperties {
        self.properties
    }
}
