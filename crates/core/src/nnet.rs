//! # Network Graph Model
//!
//! A network is a list of named components plus an ordered list of named
//! nodes. Nodes come in four kinds:
//!
//! - **Input**: supplied by the caller, with a fixed column dimension.
//! - **Descriptor**: glue that assembles a value from other nodes. A
//!   descriptor node either feeds the component node right after it, or is a
//!   network output.
//! - **Component**: applies a component to the descriptor node before it.
//! - **DimRange**: a column window onto another node; it never owns storage.
//!
//! Nodes are addressed by dense ids in insertion order. Descriptors may refer
//! to nodes added later (recurrent networks refer to their own component
//! node), so reference checks happen in [`Nnet::validate`] rather than at
//! insertion time.

use petgraph::graph::{DiGraph, NodeIndex};
use std::fmt;

use crate::component::Component;
use crate::descriptor::Descriptor;
use crate::error::CoreError;

/// One node of the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkNode {
    Input { dim: usize },
    Descriptor(Descriptor),
    /// Index into the network's component table.
    Component { component: usize },
    DimRange { node: usize, offset: usize, dim: usize },
}

impl NetworkNode {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NetworkNode::Input { .. } => "input",
            NetworkNode::Descriptor(_) => "descriptor",
            NetworkNode::Component { .. } => "component",
            NetworkNode::DimRange { .. } => "dim-range",
        }
    }
}

/// A neural network topology: named components and named nodes.
#[derive(Debug, Default)]
pub struct Nnet {
    component_names: Vec<String>,
    components: Vec<Box<dyn Component>>,
    node_names: Vec<String>,
    nodes: Vec<NetworkNode>,
}

impl Nnet {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Register a component definition under `name`.
    pub fn add_component(
        &mut self,
        name: impl Into<String>,
        component: impl Component + 'static,
    ) -> Result<usize, CoreError> {
        let name = name.into();
        if self.component_names.contains(&name) {
            return Err(CoreError::DuplicateComponent { name });
        }
        self.component_names.push(name);
        self.components.push(Box::new(component));
        Ok(self.components.len() - 1)
    }

    pub fn add_input_node(&mut self, name: impl Into<String>, dim: usize) -> Result<usize, CoreError> {
        self.push_node(name.into(), NetworkNode::Input { dim })
    }

    /// Add `<name>_input` (the descriptor) followed by `<name>` (the
    /// component node). Returns the component node's id, which is always the
    /// descriptor node's id plus one.
    pub fn add_component_node(
        &mut self,
        name: impl Into<String>,
        component_name: &str,
        input: impl Into<Descriptor>,
    ) -> Result<usize, CoreError> {
        let name = name.into();
        let component =
            self.get_component_index(component_name)
                .ok_or_else(|| CoreError::UnknownComponent {
                    name: component_name.to_string(),
                })?;
        let input_name = format!("{}_input", name);
        for n in [&input_name, &name] {
            if self.node_names.contains(n) {
                return Err(CoreError::DuplicateNode { name: n.clone() });
            }
        }
        self.push_node(input_name, NetworkNode::Descriptor(input.into()))?;
        self.push_node(name, NetworkNode::Component { component })
    }

    /// Add a network output: a descriptor node not followed by a component.
    pub fn add_output_node(
        &mut self,
        name: impl Into<String>,
        input: impl Into<Descriptor>,
    ) -> Result<usize, CoreError> {
        self.push_node(name.into(), NetworkNode::Descriptor(input.into()))
    }

    pub fn add_dim_range_node(
        &mut self,
        name: impl Into<String>,
        input_node_name: &str,
        offset: usize,
        dim: usize,
    ) -> Result<usize, CoreError> {
        let node = self
            .get_node_index(input_node_name)
            .ok_or_else(|| CoreError::UnknownNode {
                name: input_node_name.to_string(),
            })?;
        self.push_node(name.into(), NetworkNode::DimRange { node, offset, dim })
    }

    fn push_node(&mut self, name: String, node: NetworkNode) -> Result<usize, CoreError> {
        if self.node_names.contains(&name) {
            return Err(CoreError::DuplicateNode { name });
        }
        self.node_names.push(name);
        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn get_node_index(&self, name: &str) -> Option<usize> {
        self.node_names.iter().position(|n| n == name)
    }

    pub fn get_component_index(&self, name: &str) -> Option<usize> {
        self.component_names.iter().position(|n| n == name)
    }

    /// The node with id `node`. Panics if out of range.
    pub fn node(&self, node: usize) -> &NetworkNode {
        &self.nodes[node]
    }

    pub fn nodes(&self) -> &[NetworkNode] {
        &self.nodes
    }

    pub fn node_name(&self, node: usize) -> &str {
        &self.node_names[node]
    }

    pub fn node_names(&self) -> &[String] {
        &self.node_names
    }

    pub fn component(&self, component: usize) -> &dyn Component {
        self.components[component].as_ref()
    }

    pub fn component_name(&self, component: usize) -> &str {
        &self.component_names[component]
    }

    pub fn is_input_node(&self, node: usize) -> bool {
        matches!(self.nodes.get(node), Some(NetworkNode::Input { .. }))
    }

    /// A descriptor node not followed by a component node.
    pub fn is_output_node(&self, node: usize) -> bool {
        matches!(self.nodes.get(node), Some(NetworkNode::Descriptor(_)))
            && !matches!(self.nodes.get(node + 1), Some(NetworkNode::Component { .. }))
    }

    /// A descriptor node that feeds the following component node.
    pub fn is_component_input_node(&self, node: usize) -> bool {
        matches!(self.nodes.get(node), Some(NetworkNode::Descriptor(_)))
            && matches!(self.nodes.get(node + 1), Some(NetworkNode::Component { .. }))
    }

    /// Column dimension of the value `node` produces.
    pub fn output_dim(&self, node: usize) -> usize {
        match &self.nodes[node] {
            NetworkNode::Input { dim } | NetworkNode::DimRange { dim, .. } => *dim,
            NetworkNode::Descriptor(desc) => desc.dim(self),
            NetworkNode::Component { component } => self.components[*component].output_dim(),
        }
    }

    /// Node ids whose values `node` reads, at the node level.
    pub fn node_inputs(&self, node: usize) -> Vec<usize> {
        match &self.nodes[node] {
            NetworkNode::Input { .. } => Vec::new(),
            NetworkNode::Descriptor(desc) => desc.node_dependencies(),
            NetworkNode::Component { .. } => vec![node - 1],
            NetworkNode::DimRange { node: src, .. } => vec![*src],
        }
    }

    /// Node-level dependency graph. Graph node `i` has weight `i`; each edge
    /// runs from a source node to the node that reads it.
    pub fn node_dependency_graph(&self) -> DiGraph<usize, ()> {
        let mut graph = DiGraph::with_capacity(self.nodes.len(), self.nodes.len());
        for node in 0..self.nodes.len() {
            graph.add_node(node);
        }
        for node in 0..self.nodes.len() {
            for src in self.node_inputs(node) {
                graph.add_edge(NodeIndex::new(src), NodeIndex::new(node), ());
            }
        }
        graph
    }

    /// Descriptors may read input, component and dim-range nodes only.
    pub(crate) fn check_descriptor_source(&self, node: usize) -> Result<(), CoreError> {
        match self.nodes.get(node) {
            None => Err(CoreError::NodeOutOfRange {
                index: node,
                count: self.nodes.len(),
            }),
            Some(NetworkNode::Descriptor(_)) => Err(CoreError::WrongNodeKind {
                name: self.node_names[node].clone(),
                expected: "an input, component or dim-range node",
            }),
            Some(_) => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Check the structural and dimensional consistency of the network.
    ///
    /// Structure is checked for every node before any dimension is computed,
    /// since dimensions are derived by following node references.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (id, node) in self.nodes.iter().enumerate() {
            match node {
                NetworkNode::Component { component } => {
                    if *component >= self.components.len() {
                        return Err(CoreError::InvalidNetwork {
                            reason: format!(
                                "node '{}' refers to component {} of {}",
                                self.node_names[id],
                                component,
                                self.components.len()
                            ),
                        });
                    }
                    if id == 0 || !matches!(self.nodes[id - 1], NetworkNode::Descriptor(_)) {
                        return Err(CoreError::InvalidNetwork {
                            reason: format!(
                                "component node '{}' is not preceded by a descriptor node",
                                self.node_names[id]
                            ),
                        });
                    }
                }
                NetworkNode::DimRange { node: src, .. } => self.check_descriptor_source(*src)?,
                NetworkNode::Descriptor(desc) => {
                    for src in desc.node_dependencies() {
                        self.check_descriptor_source(src)?;
                    }
                }
                NetworkNode::Input { .. } => {}
            }
        }
        self.check_dim_range_chains()?;

        for (id, node) in self.nodes.iter().enumerate() {
            match node {
                NetworkNode::Descriptor(desc) => {
                    let got = desc.validate(self)?;
                    if let Some(NetworkNode::Component { component }) = self.nodes.get(id + 1) {
                        let expected = self.components[*component].input_dim();
                        if got != expected {
                            return Err(CoreError::DimensionMismatch {
                                context: format!("input of component node '{}'", self.node_names[id + 1]),
                                expected,
                                got,
                            });
                        }
                    }
                }
                NetworkNode::DimRange { node: src, offset, dim } => {
                    let src_dim = self.output_dim(*src);
                    if *dim == 0 || offset + dim > src_dim {
                        return Err(CoreError::InvalidNetwork {
                            reason: format!(
                                "dim-range node '{}' selects columns {}..{} of '{}' which has dim {}",
                                self.node_names[id],
                                offset,
                                offset + dim,
                                self.node_names[*src],
                                src_dim
                            ),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Dim-range nodes may stack, but not in a loop.
    fn check_dim_range_chains(&self) -> Result<(), CoreError> {
        for (id, node) in self.nodes.iter().enumerate() {
            let mut current = node;
            let mut steps = 0;
            while let NetworkNode::DimRange { node: src, .. } = current {
                steps += 1;
                if steps > self.nodes.len() {
                    return Err(CoreError::InvalidNetwork {
                        reason: format!("dim-range node '{}' is part of a loop", self.node_names[id]),
                    });
                }
                current = &self.nodes[*src];
            }
        }
        Ok(())
    }
}

impl fmt::Display for Nnet {
    /// Configuration lines: components first, then nodes in order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, c) in self.component_names.iter().zip(&self.components) {
            writeln!(
                f,
                "component name={} type={} input-dim={} output-dim={}",
                name,
                c.type_name(),
                c.input_dim(),
                c.output_dim()
            )?;
        }
        for (id, node) in self.nodes.iter().enumerate() {
            let name = &self.node_names[id];
            match node {
                NetworkNode::Input { dim } => writeln!(f, "input-node name={} dim={}", name, dim)?,
                NetworkNode::Descriptor(desc) => {
                    if self.is_output_node(id) {
                        writeln!(
                            f,
                            "output-node name={} input={}",
                            name,
                            desc.to_config_string(&self.node_names)
                        )?;
                    }
                }
                NetworkNode::Component { component } => {
                    let input = match &self.nodes[id - 1] {
                        NetworkNode::Descriptor(desc) => desc.to_config_string(&self.node_names),
                        _ => String::new(),
                    };
                    writeln!(
                        f,
                        "component-node name={} component={} input={}",
                        name, self.component_names[*component], input
                    )?;
                }
                NetworkNode::DimRange { node: src, offset, dim } => writeln!(
                    f,
                    "dim-range-node name={} input-node={} dim-offset={} dim={}",
                    name, self.node_names[*src], offset, dim
                )?,
            }
        }
        Ok(())
    }
}
