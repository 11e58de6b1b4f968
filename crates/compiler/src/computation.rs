//! # NnetComputation - The Compiled Program
//!
//! A flat list of matrix commands plus the tables they refer to. Commands
//! never hold matrices directly: they name submatrices, which are windows
//! (row range x column range) onto matrices. Row-selection commands refer to
//! entries of `indexes` or `indexes_multi`.
//!
//! ## Executor contract
//!
//! - A matrix exists strictly between its `AllocMatrix*` and its
//!   `DeallocMatrix`; every command touching it lies in that window.
//! - `indexes[k][i] = Some(r)`: row `i` of the command's row-wise operand
//!   pairs with row `r` of the other operand. `None` rows are skipped.
//! - `indexes_multi[k][i] = Some((s, r))`: row `i` pairs with row `r` of
//!   submatrix `s`.
//!
//! [`NnetComputation::check`] verifies all of this.

use serde::{Deserialize, Serialize};
use std::fmt;

use nnet_core::{format_cindexes, Cindex};

use crate::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixInfo {
    pub num_rows: usize,
    pub num_cols: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubMatrixInfo {
    pub matrix: usize,
    pub row_offset: usize,
    pub num_rows: usize,
    pub col_offset: usize,
    pub num_cols: usize,
}

impl SubMatrixInfo {
    /// The whole of a matrix.
    pub fn whole(matrix: usize, info: &MatrixInfo) -> Self {
        Self {
            matrix,
            row_offset: 0,
            num_rows: info.num_rows,
            col_offset: 0,
            num_cols: info.num_cols,
        }
    }
}

/// What a matrix holds, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixDebugInfo {
    pub node: usize,
    pub is_deriv: bool,
    /// Cindex held by each row.
    pub cindexes: Vec<Cindex>,
}

/// One instruction for the executor.
///
/// Fields named `*submatrix`, `dst`, `src` and the `Backprop` operands are
/// submatrix indices; `matrix` fields are matrix indices; `indexes` and
/// `indexes_multi` index the computation's row-map tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    AllocMatrixZeroed { matrix: usize },
    AllocMatrixUndefined { matrix: usize },
    DeallocMatrix { matrix: usize },
    /// Fill `submatrix` with the caller's value for input node `node`.
    AcceptInput { submatrix: usize, node: usize },
    /// Hand `submatrix` to the caller as the value of output node `node`.
    ProvideOutput { submatrix: usize, node: usize },
    /// Fill `submatrix` with the caller's derivative for output node `node`.
    AcceptOutputDeriv { submatrix: usize, node: usize },
    /// Hand `submatrix` to the caller as the derivative for input node `node`.
    ProvideInputDeriv { submatrix: usize, node: usize },
    Propagate {
        component: usize,
        node: usize,
        input: usize,
        output: usize,
    },
    Backprop {
        component: usize,
        node: usize,
        input_value: Option<usize>,
        output_value: Option<usize>,
        output_deriv: usize,
        input_deriv: Option<usize>,
        /// Accumulate the parameter gradient.
        update: bool,
    },
    /// `dst = src`; shapes must match.
    MatrixCopy { dst: usize, src: usize },
    /// `dst += src`; shapes must match.
    MatrixAdd { dst: usize, src: usize },
    /// `dst[i] = src[indexes[i]]`.
    CopyRows { dst: usize, src: usize, indexes: usize },
    /// `dst[i] += src[indexes[i]]`.
    AddRows { dst: usize, src: usize, indexes: usize },
    /// `dst[i] = s[r]` where `indexes_multi[i] = (s, r)`.
    CopyRowsMulti { dst: usize, indexes_multi: usize },
    /// `dst[i] += s[r]` where `indexes_multi[i] = (s, r)`.
    AddRowsMulti { dst: usize, indexes_multi: usize },
    /// `dst[indexes[i]] += src[i]`.
    AddToRows { src: usize, dst: usize, indexes: usize },
    /// `s[r] += src[i]` where `indexes_multi[i] = (s, r)`.
    AddToRowsMulti { src: usize, indexes_multi: usize },
}

/// The compiled program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NnetComputation {
    pub matrices: Vec<MatrixInfo>,
    pub submatrices: Vec<SubMatrixInfo>,
    pub indexes: Vec<Vec<Option<usize>>>,
    pub indexes_multi: Vec<Vec<Option<(usize, usize)>>>,
    pub commands: Vec<Command>,
    /// One entry per matrix when debug info was requested, else empty.
    pub matrix_debug_info: Vec<MatrixDebugInfo>,
    /// Network node names, recorded with the debug info so listings can
    /// name the rows of each matrix.
    #[serde(default)]
    pub node_names: Vec<String>,
    pub need_model_derivative: bool,
    pub store_component_stats: bool,
}

impl NnetComputation {
    pub fn num_matrices(&self) -> usize {
        self.matrices.len()
    }

    /// Count of commands matching `pred`.
    pub fn count_commands(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }

    /// Submatrices a command reads or writes, including those reached
    /// through `indexes_multi`.
    pub fn command_submatrices(&self, command: &Command) -> Vec<usize> {
        let multi = |k: usize| -> Vec<usize> {
            self.indexes_multi
                .get(k)
                .map(|rows| rows.iter().flatten().map(|(s, _)| *s).collect())
                .unwrap_or_default()
        };
        match command {
            Command::AllocMatrixZeroed { .. }
            | Command::AllocMatrixUndefined { .. }
            | Command::DeallocMatrix { .. } => Vec::new(),
            Command::AcceptInput { submatrix, .. }
            | Command::ProvideOutput { submatrix, .. }
            | Command::AcceptOutputDeriv { submatrix, .. }
            | Command::ProvideInputDeriv { submatrix, .. } => vec![*submatrix],
            Command::Propagate { input, output, .. } => vec![*input, *output],
            Command::Backprop {
                input_value,
                output_value,
                output_deriv,
                input_deriv,
                ..
            } => [*input_value, *output_value, Some(*output_deriv), *input_deriv]
                .into_iter()
                .flatten()
                .collect(),
            Command::MatrixCopy { dst, src }
            | Command::MatrixAdd { dst, src }
            | Command::CopyRows { dst, src, .. }
            | Command::AddRows { dst, src, .. }
            | Command::AddToRows { src, dst, .. } => vec![*dst, *src],
            Command::CopyRowsMulti { dst, indexes_multi }
            | Command::AddRowsMulti { dst, indexes_multi } => {
                let mut subs = vec![*dst];
                subs.extend(multi(*indexes_multi));
                subs
            }
            Command::AddToRowsMulti { src, indexes_multi } => {
                let mut subs = vec![*src];
                subs.extend(multi(*indexes_multi));
                subs
            }
        }
    }

    /// Matrices a command touches, allocation and deallocation included.
    pub fn command_matrices(&self, command: &Command) -> Vec<usize> {
        match command {
            Command::AllocMatrixZeroed { matrix }
            | Command::AllocMatrixUndefined { matrix }
            | Command::DeallocMatrix { matrix } => vec![*matrix],
            _ => {
                let mut matrices: Vec<usize> = self
                    .command_submatrices(command)
                    .into_iter()
                    .filter_map(|s| self.submatrices.get(s).map(|info| info.matrix))
                    .collect();
                matrices.sort_unstable();
                matrices.dedup();
                matrices
            }
        }
    }

    /// Verify the executor contract: table bounds, row-map lengths, shapes,
    /// and the alloc/use/dealloc life cycle of every matrix.
    pub fn check(&self) -> Result<(), CompileError> {
        let fail = |reason: String| Err(CompileError::InvalidComputation { reason });

        for (s, sub) in self.submatrices.iter().enumerate() {
            let Some(m) = self.matrices.get(sub.matrix) else {
                return fail(format!("submatrix {} refers to missing matrix {}", s, sub.matrix));
            };
            if sub.row_offset + sub.num_rows > m.num_rows || sub.col_offset + sub.num_cols > m.num_cols {
                return fail(format!("submatrix {} exceeds matrix {}", s, sub.matrix));
            }
        }
        if !self.matrix_debug_info.is_empty() && self.matrix_debug_info.len() != self.matrices.len() {
            return fail("debug info does not cover every matrix".to_string());
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Life {
            Unallocated,
            Live,
            Freed,
        }
        let mut life = vec![Life::Unallocated; self.matrices.len()];

        for (c, command) in self.commands.iter().enumerate() {
            match command {
                Command::AllocMatrixZeroed { matrix } | Command::AllocMatrixUndefined { matrix } => {
                    match life.get(*matrix) {
                        Some(Life::Unallocated) => life[*matrix] = Life::Live,
                        _ => return fail(format!("command {}: matrix {} allocated twice or missing", c, matrix)),
                    }
                    continue;
                }
                Command::DeallocMatrix { matrix } => {
                    match life.get(*matrix) {
                        Some(Life::Live) => life[*matrix] = Life::Freed,
                        _ => return fail(format!("command {}: matrix {} freed while not live", c, matrix)),
                    }
                    continue;
                }
                _ => {}
            }
            for s in self.command_submatrices(command) {
                let Some(sub) = self.submatrices.get(s) else {
                    return fail(format!("command {}: missing submatrix {}", c, s));
                };
                if life.get(sub.matrix) != Some(&Life::Live) {
                    return fail(format!("command {}: matrix {} used while not live", c, sub.matrix));
                }
            }
            self.check_shapes(c, command)?;
        }

        if let Some(m) = life.iter().position(|l| *l != Life::Freed) {
            return fail(format!("matrix {} is never freed", m));
        }
        Ok(())
    }

    fn check_shapes(&self, c: usize, command: &Command) -> Result<(), CompileError> {
        let fail = |reason: String| Err(CompileError::InvalidComputation { reason: format!("command {}: {}", c, reason) });
        let sub = |s: usize| self.submatrices[s];
        let rows = |k: usize| self.indexes.get(k);
        let multi_rows = |k: usize| self.indexes_multi.get(k);
        match command {
            Command::MatrixCopy { dst, src } | Command::MatrixAdd { dst, src } => {
                let (d, s) = (sub(*dst), sub(*src));
                if (d.num_rows, d.num_cols) != (s.num_rows, s.num_cols) {
                    return fail("operand shapes differ".to_string());
                }
            }
            Command::CopyRows { dst, src, indexes } | Command::AddRows { dst, src, indexes } => {
                let (d, s) = (sub(*dst), sub(*src));
                let Some(map) = rows(*indexes) else {
                    return fail(format!("missing indexes {}", indexes));
                };
                if d.num_cols != s.num_cols || map.len() != d.num_rows {
                    return fail("row map does not match operands".to_string());
                }
                if map.iter().flatten().any(|r| *r >= s.num_rows) {
                    return fail("row map points past the source".to_string());
                }
            }
            Command::AddToRows { src, dst, indexes } => {
                let (d, s) = (sub(*dst), sub(*src));
                let Some(map) = rows(*indexes) else {
                    return fail(format!("missing indexes {}", indexes));
                };
                if d.num_cols != s.num_cols || map.len() != s.num_rows {
                    return fail("row map does not match operands".to_string());
                }
                if map.iter().flatten().any(|r| *r >= d.num_rows) {
                    return fail("row map points past the destination".to_string());
                }
            }
            Command::CopyRowsMulti { dst: one, indexes_multi }
            | Command::AddRowsMulti { dst: one, indexes_multi }
            | Command::AddToRowsMulti { src: one, indexes_multi } => {
                let o = sub(*one);
                let Some(map) = multi_rows(*indexes_multi) else {
                    return fail(format!("missing indexes_multi {}", indexes_multi));
                };
                if map.len() != o.num_rows {
                    return fail("multi row map length does not match operand".to_string());
                }
                for (s, r) in map.iter().flatten() {
                    let other = sub(*s);
                    if other.num_cols != o.num_cols || *r >= other.num_rows {
                        return fail(format!("multi row map entry ({}, {}) out of range", s, r));
                    }
                }
            }
            Command::Propagate { input, output, .. } => {
                if sub(*input).num_rows != sub(*output).num_rows {
                    return fail("propagate input and output row counts differ".to_string());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn fmt_submatrix(&self, f: &mut fmt::Formatter<'_>, s: usize) -> fmt::Result {
        match self.submatrices.get(s) {
            Some(sub) => {
                let m = &self.matrices[sub.matrix];
                if sub.num_rows == m.num_rows && sub.num_cols == m.num_cols {
                    write!(f, "m{}", sub.matrix)
                } else {
                    write!(
                        f,
                        "m{}({}:{}, {}:{})",
                        sub.matrix,
                        sub.row_offset,
                        sub.row_offset + sub.num_rows - 1,
                        sub.col_offset,
                        sub.col_offset + sub.num_cols - 1
                    )
                }
            }
            None => write!(f, "s{}?", s),
        }
    }
}

impl fmt::Display for NnetComputation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (m, info) in self.matrices.iter().enumerate() {
            write!(f, "# m{}: {} x {}", m, info.num_rows, info.num_cols)?;
            if let Some(debug) = self.matrix_debug_info.get(m) {
                write!(
                    f,
                    " {}{}",
                    if debug.is_deriv { "deriv " } else { "" },
                    format_cindexes(&debug.cindexes, &self.node_names)
                )?;
            }
            writeln!(f)?;
        }
        for (c, command) in self.commands.iter().enumerate() {
            write!(f, "c{}: ", c)?;
            match command {
                Command::AllocMatrixZeroed { matrix } => {
                    let m = &self.matrices[*matrix];
                    write!(f, "m{} = zeros({}, {})", matrix, m.num_rows, m.num_cols)?
                }
                Command::AllocMatrixUndefined { matrix } => {
                    let m = &self.matrices[*matrix];
                    write!(f, "m{} = undefined({}, {})", matrix, m.num_rows, m.num_cols)?
                }
                Command::DeallocMatrix { matrix } => write!(f, "m{} = []", matrix)?,
                Command::AcceptInput { submatrix, node } => {
                    self.fmt_submatrix(f, *submatrix)?;
                    write!(f, " = user-input(#{})", node)?
                }
                Command::ProvideOutput { submatrix, node } => {
                    write!(f, "user-output(#{}) = ", node)?;
                    self.fmt_submatrix(f, *submatrix)?
                }
                Command::AcceptOutputDeriv { submatrix, node } => {
                    self.fmt_submatrix(f, *submatrix)?;
                    write!(f, " = user-output-deriv(#{})", node)?
                }
                Command::ProvideInputDeriv { submatrix, node } => {
                    write!(f, "user-input-deriv(#{}) = ", node)?;
                    self.fmt_submatrix(f, *submatrix)?
                }
                Command::Propagate {
                    component,
                    node,
                    input,
                    output,
                } => {
                    self.fmt_submatrix(f, *output)?;
                    write!(f, " = component{}.propagate[#{}](", component, node)?;
                    self.fmt_submatrix(f, *input)?;
                    write!(f, ")")?
                }
                Command::Backprop {
                    component,
                    node,
                    output_deriv,
                    input_deriv,
                    update,
                    ..
                } => {
                    match input_deriv {
                        Some(s) => self.fmt_submatrix(f, *s)?,
                        None => write!(f, "[]")?,
                    }
                    write!(f, " += component{}.backprop[#{}](", component, node)?;
                    self.fmt_submatrix(f, *output_deriv)?;
                    write!(f, "){}", if *update { " +update" } else { "" })?
                }
                Command::MatrixCopy { dst, src } | Command::MatrixAdd { dst, src } => {
                    self.fmt_submatrix(f, *dst)?;
                    write!(f, "{}", if matches!(command, Command::MatrixCopy { .. }) { " = " } else { " += " })?;
                    self.fmt_submatrix(f, *src)?
                }
                Command::CopyRows { dst, src, indexes } | Command::AddRows { dst, src, indexes } => {
                    self.fmt_submatrix(f, *dst)?;
                    write!(f, "{}", if matches!(command, Command::CopyRows { .. }) { " = " } else { " += " })?;
                    self.fmt_submatrix(f, *src)?;
                    write!(f, ".rows(i{})", indexes)?
                }
                Command::CopyRowsMulti { dst, indexes_multi }
                | Command::AddRowsMulti { dst, indexes_multi } => {
                    self.fmt_submatrix(f, *dst)?;
                    let op = if matches!(command, Command::CopyRowsMulti { .. }) { " = " } else { " += " };
                    write!(f, "{}rows-multi(im{})", op, indexes_multi)?
                }
                Command::AddToRows { src, dst, indexes } => {
                    self.fmt_submatrix(f, *dst)?;
                    write!(f, ".rows(i{}) += ", indexes)?;
                    self.fmt_submatrix(f, *src)?
                }
                Command::AddToRowsMulti { src, indexes_multi } => {
                    write!(f, "rows-multi(im{}) += ", indexes_multi)?;
                    self.fmt_submatrix(f, *src)?
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
