//! Triangle counting by distributed sparse outer-product multiplication.
//!
//! A graph is held as a sparse adjacency matrix `A`, one `(row, col, value)` entry per arc,
//! spread across timely dataflow workers. No worker ever holds all of `A`, or any product.

// The computation, informally:
// 0. Each worker loads a slice of the entries of `A`.
// 1. The entries are globally sorted by (row, col, value), so that each worker holds a
//    contiguous range of global offsets. One row may straddle two workers.
// 2. Each worker summarises its range as (row, first offset, count) records. The coordinator
//    folds records for the same row together, and broadcasts the resulting row index.
// 3. For each locally held driver entry (i, k, x), the row index names the offsets of row k
//    in `A`. Each offset is visited at the worker that holds it, where the stored entry
//    (k, j, y) yields a contribution x*y to key (i, j). Contributions are routed to the
//    worker owning (i, j), which accumulates them.
// 4. Step 3 runs twice: first with `A` as the driver, then with the product `A·A`.
// 5. The diagonal of `A·A·A` counts closed walks of length three; each triangle is six of them.
//
// Phases are separated by barriers: a phase is a dataflow, and a worker does not start the
// next phase until timely's progress tracking reports that nothing of the current one remains
// in flight anywhere.

pub mod config;
pub mod error;
pub mod index;
pub mod input;
pub mod multiply;
pub mod runtime;
pub mod store;
pub mod table;
pub mod triangles;

pub use config::{Accumulation, Config};
pub use error::Error;
pub use index::{RowDirectoryEntry, RowIndex};
pub use store::SortedStore;
pub use table::PartialProducts;
pub use triangles::{count_triangles, run, Report};

/// Tuple form of an `Edge`, used when edges move between workers.
pub type EdgeTuple = (u32, u32, i64);

/// One nonzero entry of a sparse matrix.
///
/// Edges order lexicographically by `(row, col, value)`, which is the global sort order of
/// a `SortedStore`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub row: u32,
    pub col: u32,
    pub value: i64,
}

impl Edge {
    pub fn new(row: u32, col: u32, value: i64) -> Edge {
        Edge { row, col, value }
    }
    #[inline(always)]
    pub fn into_tuple(self) -> EdgeTuple {
        (self.row, self.col, self.value)
    }
}

impl From<EdgeTuple> for Edge {
    #[inline(always)]
    fn from((row, col, value): EdgeTuple) -> Edge {
        Edge { row, col, value }
    }
}
