//! # Descriptors - Glue Expressions Between Nodes
//!
//! A descriptor says how the value of a node at some [`Index`] is assembled
//! from the values of other nodes. Three tiers, each a closed enum:
//!
//! | Tier | Variants | Evaluates to |
//! |------|----------|--------------|
//! | [`ForwardingDescriptor`] | Simple, Offset, Switch, Round, ReplaceIndex | exactly one source [`Cindex`] |
//! | [`SumDescriptor`] | Forwarding, Sum, Failover, IfDefined | a sum of zero or more source terms |
//! | [`Descriptor`] | list of parts | column-wise concatenation (Append) of the parts |
//!
//! Two questions are asked of every descriptor during compilation:
//!
//! - `get_dependencies`: which cindexes *might* be needed (a superset, used
//!   while the graph is still being discovered);
//! - `is_computable`: given an oracle for "is this cindex computable", is the
//!   expression defined, and if so which cindexes does it actually read.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::index::{Cindex, Index};
use crate::nnet::Nnet;

/// Axis substituted by [`ForwardingDescriptor::ReplaceIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    T,
    X,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::T => write!(f, "t"),
            Axis::X => write!(f, "x"),
        }
    }
}

// ============================================================================
// Forwarding descriptors
// ============================================================================

/// Maps an output index to exactly one input cindex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardingDescriptor {
    /// The node itself at the same index.
    Simple(usize),
    /// Shift `t` and `x` before looking up the inner descriptor.
    Offset {
        src: Box<ForwardingDescriptor>,
        t_offset: i32,
        x_offset: i32,
    },
    /// Branch `t mod len` (non-negative modulo). Must be non-empty; build it
    /// with [`ForwardingDescriptor::switch`].
    Switch(Vec<ForwardingDescriptor>),
    /// Round `t` down to a multiple of `modulus` (toward negative infinity).
    Round {
        src: Box<ForwardingDescriptor>,
        modulus: i32,
    },
    /// Replace one axis of the index by a constant.
    ReplaceIndex {
        src: Box<ForwardingDescriptor>,
        axis: Axis,
        value: i32,
    },
}

impl ForwardingDescriptor {
    /// Reference a node at the requested index.
    pub fn node(node: usize) -> Self {
        Self::Simple(node)
    }

    /// Time offset only; the most common form (`Offset(node, t)`).
    pub fn offset(src: ForwardingDescriptor, t_offset: i32) -> Self {
        Self::offset_tx(src, t_offset, 0)
    }

    pub fn offset_tx(src: ForwardingDescriptor, t_offset: i32, x_offset: i32) -> Self {
        Self::Offset {
            src: Box::new(src),
            t_offset,
            x_offset,
        }
    }

    pub fn switch(branches: Vec<ForwardingDescriptor>) -> Result<Self, CoreError> {
        if branches.is_empty() {
            return Err(CoreError::EmptySwitch);
        }
        Ok(Self::Switch(branches))
    }

    pub fn round(src: ForwardingDescriptor, modulus: i32) -> Result<Self, CoreError> {
        if modulus <= 0 {
            return Err(CoreError::InvalidModulus { modulus });
        }
        Ok(Self::Round {
            src: Box::new(src),
            modulus,
        })
    }

    pub fn replace_index(src: ForwardingDescriptor, axis: Axis, value: i32) -> Self {
        Self::ReplaceIndex {
            src: Box::new(src),
            axis,
            value,
        }
    }

    /// The single cindex this descriptor reads for `index`.
    ///
    /// Pure and total for well-formed descriptors and indexes whose mapping
    /// stays inside `i32`. Panics otherwise; callers holding untrusted indexes
    /// use [`ForwardingDescriptor::checked_map_to_input`].
    pub fn map_to_input(&self, index: &Index) -> Cindex {
        match self.checked_map_to_input(index) {
            Some(cindex) => cindex,
            None => panic!("{:?} cannot map index {}", self, index),
        }
    }

    /// [`ForwardingDescriptor::map_to_input`], or `None` when an offset or
    /// rounding leaves the `i32` range, a `Switch` has no branches, or a
    /// `Round` modulus is not positive.
    pub fn checked_map_to_input(&self, index: &Index) -> Option<Cindex> {
        match self {
            Self::Simple(node) => Some(Cindex::new(*node, *index)),
            Self::Offset {
                src,
                t_offset,
                x_offset,
            } => src.checked_map_to_input(&index.checked_offset(*t_offset, *x_offset)?),
            Self::Switch(branches) => {
                if branches.is_empty() {
                    return None;
                }
                let branch = index.t.rem_euclid(branches.len() as i32) as usize;
                branches[branch].checked_map_to_input(index)
            }
            Self::Round { src, modulus } => {
                if *modulus <= 0 {
                    return None;
                }
                let rounded = Index {
                    t: index.t.div_euclid(*modulus).checked_mul(*modulus)?,
                    ..*index
                };
                src.checked_map_to_input(&rounded)
            }
            Self::ReplaceIndex { src, axis, value } => {
                let mut replaced = *index;
                match axis {
                    Axis::T => replaced.t = *value,
                    Axis::X => replaced.x = *value,
                }
                src.checked_map_to_input(&replaced)
            }
        }
    }

    /// Append every node id this descriptor can reference.
    pub fn node_dependencies(&self, nodes: &mut Vec<usize>) {
        match self {
            Self::Simple(node) => nodes.push(*node),
            Self::Offset { src, .. } | Self::Round { src, .. } | Self::ReplaceIndex { src, .. } => {
                src.node_dependencies(nodes)
            }
            Self::Switch(branches) => branches.iter().for_each(|b| b.node_dependencies(nodes)),
        }
    }

    /// Column dimension of the value this descriptor produces.
    pub fn dim(&self, nnet: &Nnet) -> usize {
        match self {
            Self::Simple(node) => nnet.output_dim(*node),
            Self::Offset { src, .. } | Self::Round { src, .. } | Self::ReplaceIndex { src, .. } => {
                src.dim(nnet)
            }
            Self::Switch(branches) => branches.first().map_or(0, |b| b.dim(nnet)),
        }
    }

    /// Check node references and arguments; returns the dimension.
    pub(crate) fn validate(&self, nnet: &Nnet) -> Result<usize, CoreError> {
        match self {
            Self::Simple(node) => {
                nnet.check_descriptor_source(*node)?;
                Ok(nnet.output_dim(*node))
            }
            Self::Offset { src, .. } | Self::ReplaceIndex { src, .. } => src.validate(nnet),
            Self::Round { src, modulus } => {
                if *modulus <= 0 {
                    return Err(CoreError::InvalidModulus { modulus: *modulus });
                }
                src.validate(nnet)
            }
            Self::Switch(branches) => {
                let (first, rest) = branches.split_first().ok_or(CoreError::EmptySwitch)?;
                let dim = first.validate(nnet)?;
                for branch in rest {
                    let got = branch.validate(nnet)?;
                    if got != dim {
                        return Err(CoreError::DimensionMismatch {
                            context: "Switch() branches".to_string(),
                            expected: dim,
                            got,
                        });
                    }
                }
                Ok(dim)
            }
        }
    }

    /// Write in configuration syntax, e.g. `Offset(input, -1)`.
    pub fn write_config(&self, f: &mut dyn fmt::Write, names: &[String]) -> fmt::Result {
        match self {
            Self::Simple(node) => match names.get(*node) {
                Some(name) => write!(f, "{}", name),
                None => write!(f, "#{}", node),
            },
            Self::Offset {
                src,
                t_offset,
                x_offset,
            } => {
                write!(f, "Offset(")?;
                src.write_config(f, names)?;
                if *x_offset == 0 {
                    write!(f, ", {})", t_offset)
                } else {
                    write!(f, ", {}, {})", t_offset, x_offset)
                }
            }
            Self::Switch(branches) => {
                write!(f, "Switch(")?;
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    branch.write_config(f, names)?;
                }
                write!(f, ")")
            }
            Self::Round { src, modulus } => {
                write!(f, "Round(")?;
                src.write_config(f, names)?;
                write!(f, ", {})", modulus)
            }
            Self::ReplaceIndex { src, axis, value } => {
                write!(f, "ReplaceIndex(")?;
                src.write_config(f, names)?;
                write!(f, ", {}, {})", axis, value)
            }
        }
    }
}

// ============================================================================
// Sum descriptors
// ============================================================================

/// A sum of terms with optional-dependency semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SumDescriptor {
    Forwarding(ForwardingDescriptor),
    /// Both operands required; the value is their sum.
    Sum(Box<SumDescriptor>, Box<SumDescriptor>),
    /// The first operand if computable, otherwise the second. Never both.
    Failover(Box<SumDescriptor>, Box<SumDescriptor>),
    /// The operand if computable, otherwise zero.
    IfDefined(Box<SumDescriptor>),
}

impl From<ForwardingDescriptor> for SumDescriptor {
    fn from(fwd: ForwardingDescriptor) -> Self {
        Self::Forwarding(fwd)
    }
}

impl SumDescriptor {
    pub fn sum(a: impl Into<SumDescriptor>, b: impl Into<SumDescriptor>) -> Self {
        Self::Sum(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn failover(a: impl Into<SumDescriptor>, b: impl Into<SumDescriptor>) -> Self {
        Self::Failover(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn if_defined(a: impl Into<SumDescriptor>) -> Self {
        Self::IfDefined(Box::new(a.into()))
    }

    /// Fail if any leaf cannot map `index` inside the `i32` range.
    pub fn check_index(&self, index: &Index) -> Result<(), CoreError> {
        match self {
            Self::Forwarding(fwd) => fwd
                .checked_map_to_input(index)
                .map(|_| ())
                .ok_or(CoreError::IndexOverflow { index: *index }),
            Self::Sum(a, b) | Self::Failover(a, b) => {
                a.check_index(index)?;
                b.check_index(index)
            }
            Self::IfDefined(a) => a.check_index(index),
        }
    }

    /// Add every cindex that could be read for `index` (no duplicates).
    pub fn get_dependencies(&self, index: &Index, deps: &mut Vec<Cindex>) {
        match self {
            Self::Forwarding(fwd) => {
                let cindex = fwd.map_to_input(index);
                if !deps.contains(&cindex) {
                    deps.push(cindex);
                }
            }
            Self::Sum(a, b) | Self::Failover(a, b) => {
                a.get_dependencies(index, deps);
                b.get_dependencies(index, deps);
            }
            Self::IfDefined(a) => a.get_dependencies(index, deps),
        }
    }

    /// Decide whether the expression is defined at `index`.
    ///
    /// Returns the cindexes actually summed, or `None` if the expression is
    /// not computable. `IfDefined` is always computable; when its operand is
    /// not, it contributes no terms.
    pub fn is_computable(
        &self,
        index: &Index,
        computable: &dyn Fn(&Cindex) -> bool,
    ) -> Option<Vec<Cindex>> {
        let mut terms = Vec::new();
        self.collect_terms(index, computable, &mut terms)
            .then_some(terms)
    }

    fn collect_terms(
        &self,
        index: &Index,
        computable: &dyn Fn(&Cindex) -> bool,
        terms: &mut Vec<Cindex>,
    ) -> bool {
        let mark = terms.len();
        let ok = match self {
            Self::Forwarding(fwd) => {
                let cindex = fwd.map_to_input(index);
                let ok = computable(&cindex);
                if ok {
                    terms.push(cindex);
                }
                ok
            }
            Self::Sum(a, b) => {
                a.collect_terms(index, computable, terms) && b.collect_terms(index, computable, terms)
            }
            Self::Failover(a, b) => {
                if a.collect_terms(index, computable, terms) {
                    true
                } else {
                    terms.truncate(mark);
                    b.collect_terms(index, computable, terms)
                }
            }
            Self::IfDefined(a) => {
                if !a.collect_terms(index, computable, terms) {
                    terms.truncate(mark);
                }
                true
            }
        };
        if !ok {
            terms.truncate(mark);
        }
        ok
    }

    pub fn node_dependencies(&self, nodes: &mut Vec<usize>) {
        match self {
            Self::Forwarding(fwd) => fwd.node_dependencies(nodes),
            Self::Sum(a, b) | Self::Failover(a, b) => {
                a.node_dependencies(nodes);
                b.node_dependencies(nodes);
            }
            Self::IfDefined(a) => a.node_dependencies(nodes),
        }
    }

    pub fn dim(&self, nnet: &Nnet) -> usize {
        match self {
            Self::Forwarding(fwd) => fwd.dim(nnet),
            Self::Sum(a, _) | Self::Failover(a, _) | Self::IfDefined(a) => a.dim(nnet),
        }
    }

    pub(crate) fn validate(&self, nnet: &Nnet) -> Result<usize, CoreError> {
        match self {
            Self::Forwarding(fwd) => fwd.validate(nnet),
            Self::Sum(a, b) | Self::Failover(a, b) => {
                let expected = a.validate(nnet)?;
                let got = b.validate(nnet)?;
                if expected != got {
                    let context = match self {
                        Self::Sum(..) => "Sum() operands",
                        _ => "Failover() operands",
                    };
                    return Err(CoreError::DimensionMismatch {
                        context: context.to_string(),
                        expected,
                        got,
                    });
                }
                Ok(expected)
            }
            Self::IfDefined(a) => a.validate(nnet),
        }
    }

    pub fn write_config(&self, f: &mut dyn fmt::Write, names: &[String]) -> fmt::Result {
        match self {
            Self::Forwarding(fwd) => fwd.write_config(f, names),
            Self::Sum(a, b) | Self::Failover(a, b) => {
                let name = if matches!(self, Self::Sum(..)) {
                    "Sum"
                } else {
                    "Failover"
                };
                write!(f, "{}(", name)?;
                a.write_config(f, names)?;
                write!(f, ", ")?;
                b.write_config(f, names)?;
                write!(f, ")")
            }
            Self::IfDefined(a) => {
                write!(f, "IfDefined(")?;
                a.write_config(f, names)?;
                write!(f, ")")
            }
        }
    }
}

// ============================================================================
// Top-level descriptor
// ============================================================================

/// Column-wise concatenation of one or more [`SumDescriptor`] parts.
///
/// There is no optional append: the descriptor is computable only when every
/// part is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    parts: Vec<SumDescriptor>,
}

impl Descriptor {
    /// `Append(parts...)`; fails on an empty list.
    pub fn new(parts: Vec<SumDescriptor>) -> Result<Self, CoreError> {
        if parts.is_empty() {
            return Err(CoreError::EmptyAppend);
        }
        Ok(Self { parts })
    }

    pub fn parts(&self) -> &[SumDescriptor] {
        &self.parts
    }

    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }

    /// Check that every part can map `index` without overflow. Run this
    /// before [`Descriptor::get_dependencies`] on indexes from a request.
    pub fn check_index(&self, index: &Index) -> Result<(), CoreError> {
        self.parts.iter().try_for_each(|part| part.check_index(index))
    }

    /// Every cindex any part could read, in first-seen order.
    pub fn get_dependencies(&self, index: &Index) -> Vec<Cindex> {
        let mut deps = Vec::new();
        for part in &self.parts {
            part.get_dependencies(index, &mut deps);
        }
        deps
    }

    /// Terms of all parts, concatenated, or `None` if any part is undefined.
    pub fn is_computable(
        &self,
        index: &Index,
        computable: &dyn Fn(&Cindex) -> bool,
    ) -> Option<Vec<Cindex>> {
        let mut terms = Vec::new();
        for part in &self.parts {
            terms.extend(part.is_computable(index, computable)?);
        }
        Some(terms)
    }

    /// Distinct node ids referenced, sorted.
    pub fn node_dependencies(&self) -> Vec<usize> {
        let mut nodes = Vec::new();
        for part in &self.parts {
            part.node_dependencies(&mut nodes);
        }
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    pub fn dim(&self, nnet: &Nnet) -> usize {
        self.parts.iter().map(|p| p.dim(nnet)).sum()
    }

    pub(crate) fn validate(&self, nnet: &Nnet) -> Result<usize, CoreError> {
        if self.parts.is_empty() {
            return Err(CoreError::EmptyAppend);
        }
        self.parts
            .iter()
            .map(|p| p.validate(nnet))
            .sum::<Result<usize, CoreError>>()
    }

    pub fn write_config(&self, f: &mut dyn fmt::Write, names: &[String]) -> fmt::Result {
        if let [part] = self.parts.as_slice() {
            return part.write_config(f, names);
        }
        write!(f, "Append(")?;
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            part.write_config(f, names)?;
        }
        write!(f, ")")
    }

    /// Configuration text using the given node names.
    pub fn to_config_string(&self, names: &[String]) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_config(&mut out, names);
        out
    }
}

impl From<ForwardingDescriptor> for Descriptor {
    fn from(fwd: ForwardingDescriptor) -> Self {
        Self {
            parts: vec![fwd.into()],
        }
    }
}

impl From<SumDescriptor> for Descriptor {
    fn from(part: SumDescriptor) -> Self {
        Self { parts: vec![part] }
    }
}
