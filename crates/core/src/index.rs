//! # Indexes - The Coordinate System
//!
//! Every row of every per-node matrix is addressed by an [`Index`]:
//! `(n, t, x)` = (example in the minibatch, time step, auxiliary axis).
//! A [`Cindex`] pins an `Index` to a specific network node, identifying one
//! concrete quantity the computation may produce.
//!
//! Both are small `Copy` values with a total order (`n`, then `t`, then `x`;
//! node id first for `Cindex`), so they can be sorted, hashed and used as map
//! keys freely.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A row coordinate: (example, time, auxiliary).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Index {
    /// Example index within the minibatch.
    pub n: i32,
    /// Time step.
    pub t: i32,
    /// Auxiliary axis; zero unless a network uses it explicitly.
    pub x: i32,
}

impl Index {
    pub const fn new(n: i32, t: i32, x: i32) -> Self {
        Self { n, t, x }
    }

    /// Index with `x = 0`, the common case.
    pub const fn at(n: i32, t: i32) -> Self {
        Self { n, t, x: 0 }
    }

    /// Shift `t` and `x` by the given amounts.
    pub const fn offset(self, t: i32, x: i32) -> Self {
        Self {
            n: self.n,
            t: self.t + t,
            x: self.x + x,
        }
    }

    /// [`Index::offset`], or `None` if either axis leaves the `i32` range.
    pub const fn checked_offset(self, t: i32, x: i32) -> Option<Self> {
        match (self.t.checked_add(t), self.x.checked_add(x)) {
            (Some(t), Some(x)) => Some(Self { n: self.n, t, x }),
            _ => None,
        }
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.x == 0 {
            write!(f, "({}, {})", self.n, self.t)
        } else {
            write!(f, "({}, {}, {})", self.n, self.t, self.x)
        }
    }
}

/// An [`Index`] attached to a network node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cindex {
    pub node: usize,
    pub index: Index,
}

impl Cindex {
    pub const fn new(node: usize, index: Index) -> Self {
        Self { node, index }
    }
}

impl fmt::Display for Cindex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}{}", self.node, self.index)
    }
}

/// Render a list of indexes compactly for diagnostics.
///
/// Consecutive entries sharing `n` and `x` whose `t` values increase by one
/// are collapsed into an inclusive range:
///
/// ```
/// use nnet_core::index::{format_indexes, Index};
///
/// let indexes = [Index::at(0, -1), Index::at(0, 0), Index::at(0, 1), Index::at(1, 0)];
/// assert_eq!(format_indexes(&indexes), "[ (0, -1:1) (1, 0) ]");
/// ```
pub fn format_indexes(indexes: &[Index]) -> String {
    let mut out = String::from("[");
    let mut i = 0;
    while i < indexes.len() {
        let start = indexes[i];
        let mut end = i;
        while end + 1 < indexes.len() {
            let next = indexes[end + 1];
            if next.n == start.n && next.x == start.x && next.t == indexes[end].t + 1 {
                end += 1;
            } else {
                break;
            }
        }
        let last = indexes[end];
        out.push(' ');
        match (end > i, start.x) {
            (true, 0) => out.push_str(&format!("({}, {}:{})", start.n, start.t, last.t)),
            (true, x) => out.push_str(&format!("({}, {}:{}, {})", start.n, start.t, last.t, x)),
            (false, _) => out.push_str(&start.to_string()),
        }
        i = end + 1;
    }
    out.push_str(" ]");
    out
}

/// Render cindexes grouped by node, using node names where available.
pub fn format_cindexes(cindexes: &[Cindex], node_names: &[String]) -> String {
    let mut out = String::new();
    let mut i = 0;
    while i < cindexes.len() {
        let node = cindexes[i].node;
        let run: Vec<Index> = cindexes[i..]
            .iter()
            .take_while(|c| c.node == node)
            .map(|c| c.index)
            .collect();
        if !out.is_empty() {
            out.push(' ');
        }
        match node_names.get(node) {
            Some(name) => out.push_str(name),
            None => out.push_str(&format!("#{}", node)),
        }
        out.push_str(&format_indexes(&run));
        i += run.len();
    }
    out
}
