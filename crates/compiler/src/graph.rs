//! # Computation Graph
//!
//! The set of cindexes a request needs, with their dependencies. Built by
//! [`ComputationGraphBuilder`](crate::builder::ComputationGraphBuilder); read
//! by step planning and lowering.
//!
//! Every cindex the builder ever encountered keeps its dense id, including
//! the ones that were pruned. Only ids with status [`CindexStatus::Expanded`]
//! take part in the computation, and only their dependency lists are
//! populated.

use std::collections::HashMap;

use nnet_core::Cindex;

/// Life cycle of an id: interned, expanded, then kept or pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CindexStatus {
    /// Interned, dependencies not yet listed.
    Unexpanded,
    /// Dependencies listed; after pruning, the id survives.
    Expanded,
    /// Computable, but no requested output reads it.
    PrunedUnreachable,
    /// Cannot be computed from the provided inputs.
    PrunedNotComputable,
}

#[derive(Debug, Clone, Default)]
pub struct ComputationGraph {
    pub(crate) cindexes: Vec<Cindex>,
    pub(crate) is_input: Vec<bool>,
    pub(crate) dependencies: Vec<Vec<usize>>,
    pub(crate) status: Vec<CindexStatus>,
    pub(crate) cindex_to_id: HashMap<Cindex, usize>,
    pub(crate) order: Vec<usize>,
}

impl ComputationGraph {
    /// Number of ids ever assigned, kept or not.
    pub fn num_cindexes(&self) -> usize {
        self.cindexes.len()
    }

    pub fn cindex(&self, id: usize) -> Cindex {
        self.cindexes[id]
    }

    pub fn cindexes(&self) -> &[Cindex] {
        &self.cindexes
    }

    pub fn get_cindex_id(&self, cindex: &Cindex) -> Option<usize> {
        self.cindex_to_id.get(cindex).copied()
    }

    /// True for cindexes the caller provides.
    pub fn is_input(&self, id: usize) -> bool {
        self.is_input[id]
    }

    /// The cindexes `id` actually reads. Empty for pruned ids.
    pub fn dependencies(&self, id: usize) -> &[usize] {
        &self.dependencies[id]
    }

    pub fn status(&self, id: usize) -> CindexStatus {
        self.status[id]
    }

    pub fn is_kept(&self, id: usize) -> bool {
        self.status[id] == CindexStatus::Expanded
    }

    /// Whether `cindex` survives pruning.
    pub fn is_kept_cindex(&self, cindex: &Cindex) -> bool {
        self.get_cindex_id(cindex).is_some_and(|id| self.is_kept(id))
    }

    pub fn num_kept(&self) -> usize {
        self.order.len()
    }

    pub fn kept_ids(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.cindexes.len()).filter(move |&id| self.is_kept(id))
    }

    /// Kept ids ordered so every id comes after its dependencies.
    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }
}
