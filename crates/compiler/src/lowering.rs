//! # Lowering
//!
//! Turns planned steps into an [`NnetComputation`].
//!
//! ## Forward pass
//!
//! Each step owns one matrix (rows = the step's indexes, columns = the node's
//! output dim), visited in step order:
//!
//! | Node kind | Commands |
//! |-----------|----------|
//! | Input | allocate, `AcceptInput` |
//! | Descriptor | zeroed allocate, then per part and per term position a copy (first position) or add (later positions); `ProvideOutput` for outputs |
//! | Component | allocate (zeroed if it adds into its output), `Propagate` |
//! | DimRange | nothing: readers take a column view of the source |
//!
//! A term position is lowered as `MatrixCopy`/`MatrixAdd` when it maps rows
//! one-to-one onto a single source, `CopyRows`/`AddRows` when it reads one
//! source in some other order, and `CopyRowsMulti`/`AddRowsMulti` otherwise.
//!
//! ## Backward pass
//!
//! A step gets a derivative matrix when it lies downstream of a derivative
//! source (an input with `has_deriv`, or an updatable component when model
//! derivatives are wanted) and upstream of an output with `has_deriv`. All
//! derivative matrices are allocated zeroed, then steps are visited in
//! reverse and every glue copy becomes an add in the opposite direction.
//!
//! Finally each matrix is freed right after the last command touching it.

use log::debug;
use std::collections::HashMap;

use nnet_core::{Cindex, ComponentProperties, Descriptor, NetworkNode, Nnet};

use crate::computation::{Command, MatrixDebugInfo, MatrixInfo, NnetComputation, SubMatrixInfo};
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::graph::ComputationGraph;
use crate::request::ComputationRequest;
use crate::steps::Step;

/// A forward row operation writing into a descriptor step, kept so the
/// backward pass can mirror it.
#[derive(Debug, Clone, Copy)]
enum Glue {
    Whole { dst: usize, src: usize },
    Rows { dst: usize, src: usize, indexes: usize },
    Multi { dst: usize, indexes_multi: usize },
}

pub struct Lowering<'a> {
    nnet: &'a Nnet,
    request: &'a ComputationRequest,
    graph: &'a ComputationGraph,
    steps: &'a [Step],
    output_debug_info: bool,

    computation: NnetComputation,
    submatrix_ids: HashMap<SubMatrixInfo, usize>,
    /// Cindex to (step, row).
    locations: HashMap<Cindex, (usize, usize)>,
    step_matrix: Vec<usize>,
    deriv_matrix: Vec<Option<usize>>,
    /// Step owning each matrix (value or derivative).
    matrix_step: Vec<usize>,
    /// Steps each step reads, in first-read order.
    step_inputs: Vec<Vec<usize>>,
    glue: Vec<Vec<Glue>>,
}

impl<'a> Lowering<'a> {
    pub fn new(
        nnet: &'a Nnet,
        request: &'a ComputationRequest,
        graph: &'a ComputationGraph,
        steps: &'a [Step],
        config: &CompilerConfig,
    ) -> Self {
        let mut locations = HashMap::new();
        for (s, step) in steps.iter().enumerate() {
            for (row, index) in step.indexes.iter().enumerate() {
                locations.insert(Cindex::new(step.node, *index), (s, row));
            }
        }
        Self {
            nnet,
            request,
            graph,
            steps,
            output_debug_info: config.output_debug_info,
            computation: NnetComputation {
                need_model_derivative: request.need_model_derivative,
                store_component_stats: request.store_component_stats,
                node_names: if config.output_debug_info {
                    nnet.node_names().to_vec()
                } else {
                    Vec::new()
                },
                ..Default::default()
            },
            submatrix_ids: HashMap::new(),
            locations,
            step_matrix: Vec::with_capacity(steps.len()),
            deriv_matrix: vec![None; steps.len()],
            matrix_step: Vec::new(),
            step_inputs: vec![Vec::new(); steps.len()],
            glue: vec![Vec::new(); steps.len()],
        }
    }

    pub fn lower(mut self) -> Result<NnetComputation, CompileError> {
        let (nnet, steps) = (self.nnet, self.steps);
        for (s, step) in steps.iter().enumerate() {
            let matrix = self.new_matrix(s, step.num_rows(), nnet.output_dim(step.node), false);
            self.step_matrix.push(matrix);
        }
        for s in 0..self.steps.len() {
            self.forward_step(s)?;
        }
        let needs_deriv = self.plan_derivatives();
        if needs_deriv.iter().any(|n| *n) {
            self.backward(&needs_deriv)?;
        }
        self.insert_deallocations();
        debug!(
            "lowered {} steps into {} matrices, {} submatrices, {} commands",
            self.steps.len(),
            self.computation.matrices.len(),
            self.computation.submatrices.len(),
            self.computation.commands.len()
        );
        Ok(self.computation)
    }

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    fn new_matrix(&mut self, step: usize, num_rows: usize, num_cols: usize, is_deriv: bool) -> usize {
        let matrix = self.computation.matrices.len();
        self.computation.matrices.push(MatrixInfo { num_rows, num_cols });
        self.matrix_step.push(step);
        if self.output_debug_info {
            let step = &self.steps[step];
            self.computation.matrix_debug_info.push(MatrixDebugInfo {
                node: step.node,
                is_deriv,
                cindexes: (0..step.num_rows()).map(|r| step.cindex(r)).collect(),
            });
        }
        matrix
    }

    fn submatrix(&mut self, info: SubMatrixInfo) -> usize {
        if let Some(&s) = self.submatrix_ids.get(&info) {
            return s;
        }
        let s = self.computation.submatrices.len();
        self.computation.submatrices.push(info);
        self.submatrix_ids.insert(info, s);
        s
    }

    fn whole(&mut self, matrix: usize) -> usize {
        let info = SubMatrixInfo::whole(matrix, &self.computation.matrices[matrix]);
        self.submatrix(info)
    }

    /// Same window, on the step's derivative matrix.
    fn deriv_of(&mut self, submatrix: usize) -> Option<usize> {
        let info = self.computation.submatrices[submatrix];
        let deriv = self.deriv_matrix[self.matrix_step[info.matrix]]?;
        Some(self.submatrix(SubMatrixInfo {
            matrix: deriv,
            ..info
        }))
    }

    fn push(&mut self, command: Command) {
        self.computation.commands.push(command);
    }

    /// Where the value of `cindex` lives: (step, row, column offset, columns).
    /// Dim-range nodes resolve to a column window of their source.
    fn locate_view(&self, cindex: &Cindex) -> Result<(usize, usize, usize, usize), CompileError> {
        if let NetworkNode::DimRange { node, offset, dim } = self.nnet.node(cindex.node) {
            let (step, row, col, _) = self.locate_view(&Cindex::new(*node, cindex.index))?;
            return Ok((step, row, col + offset, *dim));
        }
        let &(step, row) = self
            .locations
            .get(cindex)
            .ok_or_else(|| CompileError::Internal {
                reason: format!(
                    "no step computes {}{}",
                    self.nnet.node_name(cindex.node),
                    cindex.index
                ),
            })?;
        Ok((step, row, 0, self.nnet.output_dim(cindex.node)))
    }

    /// (submatrix, row) holding the value of `cindex`.
    fn locate(&mut self, cindex: &Cindex) -> Result<(usize, usize), CompileError> {
        let (step, row, col_offset, num_cols) = self.locate_view(cindex)?;
        let matrix = self.step_matrix[step];
        let num_rows = self.computation.matrices[matrix].num_rows;
        let submatrix = self.submatrix(SubMatrixInfo {
            matrix,
            row_offset: 0,
            num_rows,
            col_offset,
            num_cols,
        });
        Ok((submatrix, row))
    }

    fn add_step_input(&mut self, step: usize, input: usize) {
        if !self.step_inputs[step].contains(&input) {
            self.step_inputs[step].push(input);
        }
    }

    // ------------------------------------------------------------------
    // Forward
    // ------------------------------------------------------------------

    fn forward_step(&mut self, s: usize) -> Result<(), CompileError> {
        let nnet = self.nnet;
        let node = self.steps[s].node;
        let matrix = self.step_matrix[s];
        match nnet.node(node) {
            NetworkNode::Input { .. } => {
                self.push(Command::AllocMatrixUndefined { matrix });
                let submatrix = self.whole(matrix);
                self.push(Command::AcceptInput { submatrix, node });
            }
            NetworkNode::Descriptor(desc) => {
                self.push(Command::AllocMatrixZeroed { matrix });
                self.lower_descriptor(s, desc)?;
                if nnet.is_output_node(node) {
                    let submatrix = self.whole(matrix);
                    self.push(Command::ProvideOutput { submatrix, node });
                }
            }
            NetworkNode::Component { component } => {
                let input_step = self.aligned_input_step(s)?;
                self.add_step_input(s, input_step);
                let props = nnet.component(*component).properties();
                if props.contains(ComponentProperties::PROPAGATE_ADDS) {
                    self.push(Command::AllocMatrixZeroed { matrix });
                } else {
                    self.push(Command::AllocMatrixUndefined { matrix });
                }
                let input = self.whole(self.step_matrix[input_step]);
                let output = self.whole(matrix);
                self.push(Command::Propagate {
                    component: *component,
                    node,
                    input,
                    output,
                });
            }
            NetworkNode::DimRange { .. } => {
                return Err(CompileError::Internal {
                    reason: format!("dim-range node '{}' planned as a step", nnet.node_name(node)),
                })
            }
        }
        Ok(())
    }

    /// The step holding this component's input, whose rows must line up
    /// with the component's rows one-to-one.
    fn aligned_input_step(&self, s: usize) -> Result<usize, CompileError> {
        let step = &self.steps[s];
        let misaligned = || CompileError::Internal {
            reason: format!(
                "input rows of component node '{}' do not line up with its output rows; \
                 only row-wise components can be lowered",
                self.nnet.node_name(step.node)
            ),
        };
        let mut input_step = None;
        for (row, index) in step.indexes.iter().enumerate() {
            let &(in_step, in_row) = self
                .locations
                .get(&Cindex::new(step.node - 1, *index))
                .ok_or_else(misaligned)?;
            if in_row != row || *input_step.get_or_insert(in_step) != in_step {
                return Err(misaligned());
            }
        }
        match input_step {
            Some(in_step) if self.steps[in_step].num_rows() == step.num_rows() => Ok(in_step),
            _ => Err(misaligned()),
        }
    }

    fn lower_descriptor(&mut self, s: usize, desc: &Descriptor) -> Result<(), CompileError> {
        let (nnet, graph, steps) = (self.nnet, self.graph, self.steps);
        let step = &steps[s];
        let matrix = self.step_matrix[s];
        let kept = |c: &Cindex| graph.is_kept_cindex(c);

        let mut col_offset = 0;
        for part in desc.parts() {
            let num_cols = part.dim(nnet);
            let dst = self.submatrix(SubMatrixInfo {
                matrix,
                row_offset: 0,
                num_rows: step.num_rows(),
                col_offset,
                num_cols,
            });
            let mut terms: Vec<Vec<(usize, usize)>> = Vec::with_capacity(step.num_rows());
            for index in &step.indexes {
                let cindexes = part.is_computable(index, &kept).ok_or_else(|| CompileError::Internal {
                    reason: format!(
                        "descriptor of node '{}' not computable at {} after pruning",
                        nnet.node_name(step.node),
                        index
                    ),
                })?;
                let mut located = Vec::with_capacity(cindexes.len());
                for c in &cindexes {
                    located.push(self.locate(c)?);
                }
                terms.push(located);
            }
            let max_terms = terms.iter().map(Vec::len).max().unwrap_or(0);
            for position in 0..max_terms {
                let rows: Vec<Option<(usize, usize)>> =
                    terms.iter().map(|t| t.get(position).copied()).collect();
                self.emit_glue(s, dst, rows, position > 0);
            }
            col_offset += num_cols;
        }
        Ok(())
    }

    /// One term position of one part: `rows[i]` is the (submatrix, row) read
    /// into destination row `i`, if any.
    fn emit_glue(&mut self, s: usize, dst: usize, rows: Vec<Option<(usize, usize)>>, add: bool) {
        let mut sources: Vec<usize> = rows.iter().flatten().map(|(sub, _)| *sub).collect();
        sources.dedup();
        for &sub in &sources {
            let input = self.matrix_step[self.computation.submatrices[sub].matrix];
            self.add_step_input(s, input);
        }
        let single = match sources.as_slice() {
            [first, rest @ ..] => rest.iter().all(|x| x == first).then_some(*first),
            [] => None,
        };

        let glue = match single {
            Some(src)
                if self.computation.submatrices[src].num_rows == rows.len()
                    && rows.iter().enumerate().all(|(i, r)| matches!(r, Some((_, row)) if *row == i)) =>
            {
                Glue::Whole { dst, src }
            }
            Some(src) => {
                let indexes = self.computation.indexes.len();
                self.computation
                    .indexes
                    .push(rows.iter().map(|r| r.map(|(_, row)| row)).collect());
                Glue::Rows { dst, src, indexes }
            }
            None => {
                let indexes_multi = self.computation.indexes_multi.len();
                self.computation.indexes_multi.push(rows);
                Glue::Multi { dst, indexes_multi }
            }
        };
        let command = match (glue, add) {
            (Glue::Whole { dst, src }, false) => Command::MatrixCopy { dst, src },
            (Glue::Whole { dst, src }, true) => Command::MatrixAdd { dst, src },
            (Glue::Rows { dst, src, indexes }, false) => Command::CopyRows { dst, src, indexes },
            (Glue::Rows { dst, src, indexes }, true) => Command::AddRows { dst, src, indexes },
            (Glue::Multi { dst, indexes_multi }, false) => Command::CopyRowsMulti { dst, indexes_multi },
            (Glue::Multi { dst, indexes_multi }, true) => Command::AddRowsMulti { dst, indexes_multi },
        };
        self.push(command);
        self.glue[s].push(glue);
    }

    // ------------------------------------------------------------------
    // Backward
    // ------------------------------------------------------------------

    fn input_has_deriv(&self, node: usize) -> bool {
        self.nnet.is_input_node(node)
            && self
                .request
                .input(self.nnet.node_name(node))
                .is_some_and(|io| io.has_deriv)
    }

    fn output_has_deriv(&self, node: usize) -> bool {
        self.nnet.is_output_node(node)
            && self
                .request
                .output(self.nnet.node_name(node))
                .is_some_and(|io| io.has_deriv)
    }

    /// Steps that need a derivative matrix. Steps are in dependency order,
    /// so one pass each way suffices.
    fn plan_derivatives(&self) -> Vec<bool> {
        let n = self.steps.len();
        let mut downstream = vec![false; n];
        for s in 0..n {
            let node = self.steps[s].node;
            let source = match self.nnet.node(node) {
                NetworkNode::Input { .. } => self.input_has_deriv(node),
                NetworkNode::Component { component } => {
                    self.request.need_model_derivative
                        && self
                            .nnet
                            .component(*component)
                            .properties()
                            .contains(ComponentProperties::UPDATABLE)
                }
                _ => false,
            };
            downstream[s] = source || self.step_inputs[s].iter().any(|&i| downstream[i]);
        }
        let mut upstream = vec![false; n];
        for s in (0..n).rev() {
            upstream[s] |= self.output_has_deriv(self.steps[s].node);
            if upstream[s] {
                for &i in &self.step_inputs[s] {
                    upstream[i] = true;
                }
            }
        }
        (0..n).map(|s| downstream[s] && upstream[s]).collect()
    }

    fn backward(&mut self, needs_deriv: &[bool]) -> Result<(), CompileError> {
        let nnet = self.nnet;
        for s in 0..self.steps.len() {
            let node = self.steps[s].node;
            if needs_deriv[s] || self.input_has_deriv(node) {
                let info = self.computation.matrices[self.step_matrix[s]];
                let matrix = self.new_matrix(s, info.num_rows, info.num_cols, true);
                self.deriv_matrix[s] = Some(matrix);
                self.push(Command::AllocMatrixZeroed { matrix });
            }
        }

        for s in (0..self.steps.len()).rev() {
            let Some(deriv) = self.deriv_matrix[s] else {
                continue;
            };
            let node = self.steps[s].node;
            match nnet.node(node) {
                NetworkNode::Input { .. } => {
                    let submatrix = self.whole(deriv);
                    self.push(Command::ProvideInputDeriv { submatrix, node });
                }
                NetworkNode::Descriptor(_) => {
                    if self.output_has_deriv(node) {
                        let submatrix = self.whole(deriv);
                        self.push(Command::AcceptOutputDeriv { submatrix, node });
                    }
                    let glue = self.glue[s].clone();
                    for g in glue.into_iter().rev() {
                        self.mirror_glue(g);
                    }
                }
                NetworkNode::Component { component } => self.backprop_component(s, *component, deriv)?,
                NetworkNode::DimRange { .. } => {}
            }
        }
        Ok(())
    }

    fn backprop_component(&mut self, s: usize, component: usize, deriv: usize) -> Result<(), CompileError> {
        let node = self.steps[s].node;
        let input_step = *self.step_inputs[s].first().ok_or_else(|| CompileError::Internal {
            reason: format!("component node '{}' has no input step", self.nnet.node_name(node)),
        })?;
        let props = self.nnet.component(component).properties();
        let update = self.request.need_model_derivative && props.contains(ComponentProperties::UPDATABLE);
        let input_deriv = match self.deriv_matrix[input_step] {
            Some(m) => Some(self.whole(m)),
            None => None,
        };
        if input_deriv.is_none() && !update {
            return Ok(());
        }
        let input_value = if props.contains(ComponentProperties::BACKPROP_NEEDS_INPUT) {
            Some(self.whole(self.step_matrix[input_step]))
        } else {
            None
        };
        let output_value = if props.contains(ComponentProperties::BACKPROP_NEEDS_OUTPUT) {
            Some(self.whole(self.step_matrix[s]))
        } else {
            None
        };
        let output_deriv = self.whole(deriv);
        self.push(Command::Backprop {
            component,
            node,
            input_value,
            output_value,
            output_deriv,
            input_deriv,
            update,
        });
        Ok(())
    }

    /// Send the derivative of a glue destination back to its sources.
    fn mirror_glue(&mut self, glue: Glue) {
        match glue {
            Glue::Whole { dst, src } => {
                if let (Some(dst_deriv), Some(src_deriv)) = (self.deriv_of(dst), self.deriv_of(src)) {
                    self.push(Command::MatrixAdd {
                        dst: src_deriv,
                        src: dst_deriv,
                    });
                }
            }
            Glue::Rows { dst, src, indexes } => {
                if let (Some(dst_deriv), Some(src_deriv)) = (self.deriv_of(dst), self.deriv_of(src)) {
                    self.push(Command::AddToRows {
                        src: dst_deriv,
                        dst: src_deriv,
                        indexes,
                    });
                }
            }
            Glue::Multi { dst, indexes_multi } => {
                let Some(dst_deriv) = self.deriv_of(dst) else {
                    return;
                };
                let rows = self.computation.indexes_multi[indexes_multi].clone();
                let mut mirrored = Vec::with_capacity(rows.len());
                for row in rows {
                    mirrored.push(row.and_then(|(sub, r)| self.deriv_of(sub).map(|d| (d, r))));
                }
                if mirrored.iter().all(Option::is_none) {
                    return;
                }
                let indexes_multi = self.computation.indexes_multi.len();
                self.computation.indexes_multi.push(mirrored);
                self.push(Command::AddToRowsMulti {
                    src: dst_deriv,
                    indexes_multi,
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Deallocation
    // ------------------------------------------------------------------

    fn insert_deallocations(&mut self) {
        let mut last_use = vec![0; self.computation.matrices.len()];
        for (c, command) in self.computation.commands.iter().enumerate() {
            for m in self.computation.command_matrices(command) {
                last_use[m] = c;
            }
        }
        let mut freed_after: Vec<Vec<usize>> = vec![Vec::new(); self.computation.commands.len()];
        for (m, &c) in last_use.iter().enumerate() {
            freed_after[c].push(m);
        }
        let commands = std::mem::take(&mut self.computation.commands);
        for (command, freed) in commands.into_iter().zip(freed_after) {
            self.computation.commands.push(command);
            for matrix in freed {
                self.computation.commands.push(Command::DeallocMatrix { matrix });
            }
        }
    }
}

/// Lower a pruned graph and its planned steps into a computation.
pub fn lower(
    nnet: &Nnet,
    request: &ComputationRequest,
    graph: &ComputationGraph,
    steps: &[Step],
    config: &CompilerConfig,
) -> Result<NnetComputation, CompileError> {
    Lowering::new(nnet, request, graph, steps, config).lower()
}
