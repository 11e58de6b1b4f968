//! # Step Planning
//!
//! Groups the kept cindexes into steps. A step is a set of rows of one node
//! that are computed together by one command (or one group of glue
//! commands), and owns one matrix.
//!
//! Nodes are first grouped into epochs: strongly connected components of the
//! node dependency graph, in topological order. An acyclic network has one
//! node per epoch and so one step per node. Inside a recurrent epoch, rows
//! are split further by phase, the length of the longest chain of
//! dependencies that stays inside the epoch, so a recurrence over `t`
//! yields one step per time step.

use log::debug;
use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use std::collections::BTreeMap;

use nnet_core::{Cindex, Index, NetworkNode, Nnet};

use crate::error::CompileError;
use crate::graph::ComputationGraph;
use crate::request::ComputationRequest;

/// Rows of one node computed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub node: usize,
    /// Row order of the step's matrix.
    pub indexes: Vec<Index>,
    pub epoch: usize,
    pub phase: usize,
}

impl Step {
    pub fn num_rows(&self) -> usize {
        self.indexes.len()
    }

    pub fn cindex(&self, row: usize) -> Cindex {
        Cindex::new(self.node, self.indexes[row])
    }
}

/// Sort key of a step. Variant order puts every input before any computed
/// step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum StepKey {
    Input { pos: usize, node: usize },
    Computed { epoch: usize, phase: usize, node: usize },
}

/// Epoch of each node, and whether that epoch contains a cycle.
pub fn compute_epochs(nnet: &Nnet) -> (Vec<usize>, Vec<bool>) {
    let graph = nnet.node_dependency_graph();
    let mut sccs = tarjan_scc(&graph);
    // tarjan_scc yields components in reverse topological order.
    sccs.reverse();
    let mut epoch = vec![0; nnet.num_nodes()];
    let mut recurrent = Vec::with_capacity(sccs.len());
    for (e, scc) in sccs.iter().enumerate() {
        for n in scc {
            epoch[graph[*n]] = e;
        }
        let self_loop = scc.len() == 1 && graph.contains_edge(scc[0], scc[0]);
        recurrent.push(scc.len() > 1 || self_loop);
    }
    (epoch, recurrent)
}

/// Plan the steps of a computation, in execution order.
///
/// Input steps come first, in the order the request lists them, and hold
/// every provided index in request order whether or not the graph kept it,
/// so the caller's matrix matches. Output steps follow the request order;
/// all other steps are sorted by `Index`. Dim-range nodes get no step: they
/// are views onto their source.
pub fn plan_steps(
    nnet: &Nnet,
    request: &ComputationRequest,
    graph: &ComputationGraph,
) -> Result<Vec<Step>, CompileError> {
    let (epoch, recurrent) = compute_epochs(nnet);

    let mut phase = vec![0usize; graph.num_cindexes()];
    for &id in graph.topological_order() {
        let node = graph.cindex(id).node;
        if !recurrent[epoch[node]] {
            continue;
        }
        phase[id] = graph
            .dependencies(id)
            .iter()
            .filter(|&&dep| epoch[graph.cindex(dep).node] == epoch[node])
            .map(|&dep| phase[dep] + 1)
            .max()
            .unwrap_or(0);
    }

    // Input steps come first, in request order, so input matrices are
    // numbered the way the caller lists them. The rest follow epoch order.
    let mut groups: BTreeMap<StepKey, Vec<Index>> = BTreeMap::new();
    for (pos, io) in request.inputs.iter().enumerate() {
        let node = nnet
            .get_node_index(&io.name)
            .ok_or_else(|| CompileError::UnknownNode {
                name: io.name.clone(),
            })?;
        groups.insert(StepKey::Input { pos, node }, io.indexes.clone());
    }
    for id in graph.kept_ids() {
        let cindex = graph.cindex(id);
        match nnet.node(cindex.node) {
            NetworkNode::Input { .. } | NetworkNode::DimRange { .. } => continue,
            _ => {}
        }
        groups
            .entry(StepKey::Computed {
                epoch: epoch[cindex.node],
                phase: phase[id],
                node: cindex.node,
            })
            .or_default()
            .push(cindex.index);
    }

    let mut steps = Vec::with_capacity(groups.len());
    for (key, mut indexes) in groups {
        let (node, phase) = match key {
            StepKey::Input { node, .. } => (node, 0),
            StepKey::Computed { node, phase, .. } => (node, phase),
        };
        if nnet.is_output_node(node) {
            let io = nnet
                .node_names()
                .get(node)
                .and_then(|name| request.output(name))
                .ok_or_else(|| CompileError::Internal {
                    reason: format!("output node '{}' computed but not requested", nnet.node_name(node)),
                })?;
            if io.indexes.len() != indexes.len() {
                return Err(CompileError::Internal {
                    reason: format!(
                        "output node '{}' has {} kept rows but {} requested",
                        nnet.node_name(node),
                        indexes.len(),
                        io.indexes.len()
                    ),
                });
            }
            indexes = io.indexes.clone();
        } else if !nnet.is_input_node(node) {
            indexes.sort_unstable();
        }
        steps.push(Step {
            node,
            indexes,
            epoch: epoch[node],
            phase,
        });
    }
    debug!(
        "planned {} steps over {} recurrent epochs",
        steps.len(),
        recurrent.iter().filter(|r| **r).count()
    );
    Ok(steps)
}
