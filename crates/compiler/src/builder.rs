//! # Computation Graph Builder
//!
//! Turns a finite request into the complete, acyclic set of cindexes needed
//! to answer it.
//!
//! ## Phases
//!
//! 1. **Seed**: one id per provided input cindex (already computable) and per
//!    requested output cindex.
//! 2. **Expand**: breadth-first waves. Expanding an id lists its candidate
//!    dependencies and interns the new ones. Between waves, computability is
//!    propagated. An id is only expanded if something that might still be
//!    computable reads it; otherwise it is parked as "will not compute" and
//!    re-queued if a new reader shows up. This is what keeps
//!    `IfDefined(Offset(rnn, -1))` finite.
//! 3. **Resolve**: computability is three-valued. An id is computable once its
//!    expression holds with unknowns read as false, and not computable once it
//!    fails with unknowns read as true. Ids still unknown at the end sit on a
//!    fixed-index cycle.
//! 4. **Prune**: keep what the requested outputs actually read, using the
//!    terms each expression picks under the final computability.

use log::{debug, trace};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, VecDeque};

use nnet_core::{Cindex, NetworkNode, Nnet};

use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::graph::{CindexStatus, ComputationGraph};
use crate::request::ComputationRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Computability {
    Unknown,
    Computable,
    NotComputable,
}

pub struct ComputationGraphBuilder<'a> {
    nnet: &'a Nnet,
    request: &'a ComputationRequest,
    max_cindexes: usize,

    cindexes: Vec<Cindex>,
    cindex_to_id: HashMap<Cindex, usize>,
    is_input: Vec<bool>,
    is_output: Vec<bool>,
    status: Vec<CindexStatus>,
    /// Parked: unexpanded because no reader could use it.
    will_not_compute: Vec<bool>,
    computable: Vec<Computability>,
    /// Candidate dependencies, filled on expansion.
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl<'a> ComputationGraphBuilder<'a> {
    pub fn new(nnet: &'a Nnet, request: &'a ComputationRequest, config: &CompilerConfig) -> Self {
        Self {
            nnet,
            request,
            max_cindexes: config.max_cindexes,
            cindexes: Vec::new(),
            cindex_to_id: HashMap::new(),
            is_input: Vec::new(),
            is_output: Vec::new(),
            status: Vec::new(),
            will_not_compute: Vec::new(),
            computable: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// Run all phases. The request must already be validated against the
    /// network.
    pub fn build(mut self) -> Result<ComputationGraph, CompileError> {
        let outputs = self.seed()?;
        self.expand_all(outputs)?;
        let leftover = self.resolve_leftovers();
        self.check_outputs(&leftover)?;
        let dependencies = self.actual_dependencies();
        let status = self.prune(&dependencies);
        let order = self.topological_order(&dependencies, &status)?;

        let dependencies = dependencies
            .into_iter()
            .zip(&status)
            .map(|(deps, s)| if *s == CindexStatus::Expanded { deps } else { Vec::new() })
            .collect();
        debug!(
            "computation graph: {} cindexes encountered, {} kept",
            self.cindexes.len(),
            order.len()
        );
        Ok(ComputationGraph {
            cindexes: self.cindexes,
            is_input: self.is_input,
            dependencies,
            status,
            cindex_to_id: self.cindex_to_id,
            order,
        })
    }

    // ------------------------------------------------------------------
    // Interning
    // ------------------------------------------------------------------

    fn node_id(&self, name: &str) -> Result<usize, CompileError> {
        self.nnet
            .get_node_index(name)
            .ok_or_else(|| CompileError::UnknownNode {
                name: name.to_string(),
            })
    }

    fn add_cindex(&mut self, cindex: Cindex, is_input: bool) -> Result<usize, CompileError> {
        let id = self.cindexes.len();
        self.cindexes.push(cindex);
        self.cindex_to_id.insert(cindex, id);
        self.is_input.push(is_input);
        self.is_output.push(false);
        self.status.push(CindexStatus::Unexpanded);
        self.will_not_compute.push(false);
        self.computable.push(Computability::Unknown);
        self.dependencies.push(Vec::new());
        self.dependents.push(Vec::new());
        if self.cindexes.len() > self.max_cindexes {
            return Err(CompileError::RunawayExpansion {
                limit: self.max_cindexes,
            });
        }
        Ok(id)
    }

    /// Inputs first, then outputs. Returns the output ids, the first wave.
    fn seed(&mut self) -> Result<Vec<usize>, CompileError> {
        let request = self.request;
        for io in &request.inputs {
            let node = self.node_id(&io.name)?;
            for index in &io.indexes {
                let id = self.add_cindex(Cindex::new(node, *index), true)?;
                self.status[id] = CindexStatus::Expanded;
                self.computable[id] = Computability::Computable;
            }
        }
        let mut outputs = Vec::new();
        for io in &request.outputs {
            let node = self.node_id(&io.name)?;
            for index in &io.indexes {
                let id = self.add_cindex(Cindex::new(node, *index), false)?;
                self.is_output[id] = true;
                outputs.push(id);
            }
        }
        Ok(outputs)
    }

    // ------------------------------------------------------------------
    // Expansion
    // ------------------------------------------------------------------

    fn expand_all(&mut self, mut wave: Vec<usize>) -> Result<(), CompileError> {
        let mut num_waves = 0;
        while !wave.is_empty() {
            num_waves += 1;
            let mut next = Vec::new();
            let mut expanded = Vec::with_capacity(wave.len());
            for id in wave {
                if self.status[id] != CindexStatus::Unexpanded || self.will_not_compute[id] {
                    continue;
                }
                if !self.is_usable(id) {
                    self.will_not_compute[id] = true;
                    continue;
                }
                self.expand(id, &mut next)?;
                expanded.push(id);
            }
            trace!(
                "wave {}: expanded {}, queued {}, {} cindexes so far",
                num_waves,
                expanded.len(),
                next.len(),
                self.cindexes.len()
            );
            self.propagate(expanded);
            wave = next;
        }
        debug!("dependency expansion finished after {} waves", num_waves);
        Ok(())
    }

    /// Worth expanding: requested, or read by something not known to fail.
    fn is_usable(&self, id: usize) -> bool {
        self.is_output[id]
            || self.dependents[id]
                .iter()
                .any(|&d| self.computable[d] != Computability::NotComputable)
    }

    /// Cindexes `cindex` might read, before computability is known.
    /// Dependencies a cindex may read. A descriptor index whose mapping
    /// overflows `i32` can only come from the request, so it is rejected as
    /// an invalid request.
    fn candidate_dependencies(&self, cindex: &Cindex) -> Result<Vec<Cindex>, CompileError> {
        let deps = match self.nnet.node(cindex.node) {
            NetworkNode::Input { .. } => Vec::new(),
            NetworkNode::Descriptor(desc) => {
                desc.check_index(&cindex.index)
                    .map_err(|e| CompileError::InvalidRequest {
                        reason: format!("node '{}': {}", self.nnet.node_name(cindex.node), e),
                    })?;
                desc.get_dependencies(&cindex.index)
            }
            NetworkNode::Component { component } => self
                .nnet
                .component(*component)
                .input_indexes(&cindex.index)
                .into_iter()
                .map(|index| Cindex::new(cindex.node - 1, index))
                .collect(),
            NetworkNode::DimRange { node, .. } => vec![Cindex::new(*node, cindex.index)],
        };
        Ok(deps)
    }

    fn expand(&mut self, id: usize, next: &mut Vec<usize>) -> Result<(), CompileError> {
        let cindex = self.cindexes[id];
        let mut deps = Vec::new();
        for dep in self.candidate_dependencies(&cindex)? {
            let dep_id = match self.cindex_to_id.get(&dep) {
                Some(&dep_id) => {
                    if self.will_not_compute[dep_id] {
                        self.will_not_compute[dep_id] = false;
                        next.push(dep_id);
                    }
                    dep_id
                }
                None => {
                    let dep_id = self.add_cindex(dep, false)?;
                    if self.nnet.is_input_node(dep.node) {
                        // An input index the caller did not provide.
                        self.status[dep_id] = CindexStatus::Expanded;
                        self.computable[dep_id] = Computability::NotComputable;
                    } else {
                        next.push(dep_id);
                    }
                    dep_id
                }
            };
            if !deps.contains(&dep_id) {
                deps.push(dep_id);
                self.dependents[dep_id].push(id);
            }
        }
        self.dependencies[id] = deps;
        self.status[id] = CindexStatus::Expanded;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Computability
    // ------------------------------------------------------------------

    /// Evaluate the expression behind `cindex` against `oracle`, returning
    /// the cindexes it reads if it is defined.
    fn evaluate(&self, cindex: &Cindex, oracle: &dyn Fn(&Cindex) -> bool) -> Option<Vec<Cindex>> {
        match self.nnet.node(cindex.node) {
            NetworkNode::Input { .. } => None,
            NetworkNode::Descriptor(desc) => desc.is_computable(&cindex.index, oracle),
            NetworkNode::Component { component } => {
                let src = cindex.node - 1;
                self.nnet
                    .component(*component)
                    .is_computable(&cindex.index, &|index| oracle(&Cindex::new(src, *index)))
                    .map(|indexes| {
                        indexes
                            .into_iter()
                            .map(|index| Cindex::new(src, index))
                            .collect()
                    })
            }
            NetworkNode::DimRange { node, .. } => {
                let src = Cindex::new(*node, cindex.index);
                oracle(&src).then(|| vec![src])
            }
        }
    }

    fn computability_of(&self, cindex: &Cindex) -> Computability {
        self.cindex_to_id
            .get(cindex)
            .map_or(Computability::NotComputable, |&id| self.computable[id])
    }

    fn classify(&self, id: usize) -> Computability {
        let cindex = self.cindexes[id];
        let optimistic = |c: &Cindex| self.computability_of(c) != Computability::NotComputable;
        if self.evaluate(&cindex, &optimistic).is_none() {
            return Computability::NotComputable;
        }
        let pessimistic = |c: &Cindex| self.computability_of(c) == Computability::Computable;
        if self.evaluate(&cindex, &pessimistic).is_some() {
            Computability::Computable
        } else {
            Computability::Unknown
        }
    }

    /// Re-classify `start` and, transitively, the readers of anything that
    /// changed.
    fn propagate(&mut self, start: Vec<usize>) {
        let mut queue: VecDeque<usize> = start.into();
        while let Some(id) = queue.pop_front() {
            if self.computable[id] != Computability::Unknown
                || self.status[id] != CindexStatus::Expanded
            {
                continue;
            }
            let computability = self.classify(id);
            if computability != Computability::Unknown {
                self.computable[id] = computability;
                queue.extend(self.dependents[id].iter().copied());
            }
        }
    }

    /// Settle everything still unknown as not computable. Returns which ids
    /// were expanded yet undecided, i.e. lie on a fixed-index cycle.
    fn resolve_leftovers(&mut self) -> Vec<bool> {
        let mut leftover = vec![false; self.cindexes.len()];
        for id in 0..self.cindexes.len() {
            if self.computable[id] == Computability::Unknown {
                leftover[id] = !self.will_not_compute[id];
                self.computable[id] = Computability::NotComputable;
            }
        }
        let count = leftover.iter().filter(|l| **l).count();
        if count > 0 {
            debug!("{} cindexes left undecided by cyclic dependencies", count);
        }
        leftover
    }

    fn check_outputs(&self, leftover: &[bool]) -> Result<(), CompileError> {
        for id in (0..self.cindexes.len()).filter(|&id| self.is_output[id]) {
            if self.computable[id] == Computability::Computable {
                continue;
            }
            let cindex = self.cindexes[id];
            if leftover[id] {
                let culprit = self.cycle_member(id, leftover);
                return Err(CompileError::CyclicDependency {
                    node: self.nnet.node_name(culprit.node).to_string(),
                    index: culprit.index,
                });
            }
            return Err(CompileError::Unsatisfiable {
                node: self.nnet.node_name(cindex.node).to_string(),
                index: cindex.index,
            });
        }
        Ok(())
    }

    /// First undecided non-output cindex reachable from `from` through
    /// undecided dependencies; `from` itself if there is none.
    fn cycle_member(&self, from: usize, leftover: &[bool]) -> Cindex {
        let mut seen = vec![false; self.cindexes.len()];
        let mut queue = VecDeque::from([from]);
        seen[from] = true;
        let mut best: Option<usize> = None;
        while let Some(id) = queue.pop_front() {
            if !self.is_output[id] {
                best = Some(best.map_or(id, |b| b.min(id)));
            }
            for &dep in &self.dependencies[id] {
                if leftover[dep] && !seen[dep] {
                    seen[dep] = true;
                    queue.push_back(dep);
                }
            }
        }
        self.cindexes[best.unwrap_or(from)]
    }

    // ------------------------------------------------------------------
    // Pruning
    // ------------------------------------------------------------------

    /// Terms each computable id actually reads under the final computability.
    fn actual_dependencies(&self) -> Vec<Vec<usize>> {
        let computable = |c: &Cindex| self.computability_of(c) == Computability::Computable;
        (0..self.cindexes.len())
            .map(|id| {
                if self.is_input[id] || self.computable[id] != Computability::Computable {
                    return Vec::new();
                }
                let mut ids: Vec<usize> = Vec::new();
                for term in self
                    .evaluate(&self.cindexes[id], &computable)
                    .unwrap_or_default()
                {
                    if let Some(&dep) = self.cindex_to_id.get(&term) {
                        if !ids.contains(&dep) {
                            ids.push(dep);
                        }
                    }
                }
                ids
            })
            .collect()
    }

    fn prune(&self, dependencies: &[Vec<usize>]) -> Vec<CindexStatus> {
        let mut reachable = vec![false; self.cindexes.len()];
        let mut queue: VecDeque<usize> = VecDeque::new();
        for id in (0..self.cindexes.len()).filter(|&id| self.is_output[id]) {
            reachable[id] = true;
            queue.push_back(id);
        }
        while let Some(id) = queue.pop_front() {
            for &dep in &dependencies[id] {
                if !reachable[dep] {
                    reachable[dep] = true;
                    queue.push_back(dep);
                }
            }
        }
        (0..self.cindexes.len())
            .map(|id| match (self.computable[id], reachable[id]) {
                (Computability::Computable, true) => CindexStatus::Expanded,
                (Computability::Computable, false) => CindexStatus::PrunedUnreachable,
                _ => CindexStatus::PrunedNotComputable,
            })
            .collect()
    }

    /// Order kept ids so dependencies come first. A cycle among kept ids
    /// (possible through `IfDefined` at a fixed index) is an error.
    fn topological_order(
        &self,
        dependencies: &[Vec<usize>],
        status: &[CindexStatus],
    ) -> Result<Vec<usize>, CompileError> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut graph_index: Vec<Option<NodeIndex>> = vec![None; self.cindexes.len()];
        for id in (0..self.cindexes.len()).filter(|&id| status[id] == CindexStatus::Expanded) {
            graph_index[id] = Some(graph.add_node(id));
        }
        for (id, to) in graph_index.iter().enumerate() {
            let Some(to) = *to else { continue };
            for &dep in &dependencies[id] {
                if let Some(from) = graph_index[dep] {
                    graph.add_edge(from, to, ());
                }
            }
        }
        toposort(&graph, None)
            .map(|order| order.into_iter().map(|n| graph[n]).collect())
            .map_err(|cycle| {
                let cindex = self.cindexes[graph[cycle.node_id()]];
                CompileError::CyclicDependency {
                    node: self.nnet.node_name(cindex.node).to_string(),
                    index: cindex.index,
                }
            })
    }
}
