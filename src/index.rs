//! The row index: a replicated directory from row to its offsets in a sorted store.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Range;
use std::rc::Rc;
use std::time::Instant;

use timely::communication::Allocate;
use timely::dataflow::channels::pact::{Exchange, Pipeline};
use timely::dataflow::operators::{Broadcast, Operator, ToStream};
use timely::worker::Worker;

use tracing::{debug, info};

use crate::error::Error;
use crate::runtime::{run_phase, Faults, COORDINATOR};
use crate::store::SortedStore;
use crate::Edge;

/// The global offsets at which one row's edges sit in a sorted store.
///
/// As a record produced by a single worker, `count` covers only that worker's part of the
/// row; once merged, it covers the whole row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowDirectoryEntry {
    pub row: u32,
    pub first_offset: u64,
    pub count: u64,
}

impl RowDirectoryEntry {
    #[inline(always)]
    pub fn offsets(&self) -> Range<u64> {
        self.first_offset..self.first_offset + self.count
    }
    fn into_tuple(self) -> (u32, u64, u64) {
        (self.row, self.first_offset, self.count)
    }
    fn from_tuple((row, first_offset, count): (u32, u64, u64)) -> RowDirectoryEntry {
        RowDirectoryEntry { row, first_offset, count }
    }
}

/// A directory from row to the range of global offsets holding that row.
///
/// Built once per matrix, identical on every worker, and never modified afterwards; clones
/// share the same entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowIndex {
    // sorted by row, one entry per row.
    entries: Rc<Vec<RowDirectoryEntry>>,
}

impl RowIndex {
    /// Wraps merged entries, one per row.
    pub fn from_entries(mut entries: Vec<RowDirectoryEntry>) -> RowIndex {
        entries.sort_unstable_by_key(|entry| entry.row);
        RowIndex { entries: Rc::new(entries) }
    }

    /// The entry for `row`, or `None` if the matrix has no edges in that row.
    #[inline]
    pub fn lookup(&self, row: u32) -> Option<RowDirectoryEntry> {
        self.entries
            .binary_search_by_key(&row, |entry| entry.row)
            .ok()
            .map(|position| self.entries[position])
    }

    pub fn entries(&self) -> &[RowDirectoryEntry] {
        &self.entries[..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the index of a sorted store, and publishes it to every worker.
    ///
    /// Each worker summarises its own shard, and sends the records to the coordinator. The
    /// coordinator merges records by row and broadcasts the result. Every worker must call
    /// this, and every worker returns the same index, or the same failure.
    pub fn build<A: Allocate>(worker: &mut Worker<A>, store: &SortedStore) -> Result<RowIndex, Error> {
        let timer = Instant::now();
        let index = worker.index();
        let records = scan(store.local(), store.start());
        debug!(worker = index, records = records.len(), "scanned shard");

        let faults = Faults::default();
        let published = Rc::new(RefCell::new(Vec::new()));
        {
            let faults = faults.clone();
            let sink = published.clone();
            run_phase(worker, move |scope, barrier| {
                let mut pending = Vec::new();
                let mut vector = Vec::new();
                let merged = records
                    .into_iter()
                    .map(RowDirectoryEntry::into_tuple)
                    .to_stream(scope)
                    .unary_notify(
                        Exchange::new(|_: &(u32, u64, u64)| COORDINATOR as u64),
                        "MergeRows",
                        Vec::new(),
                        move |input, output, notificator| {
                            input.for_each(|time, data| {
                                data.swap(&mut vector);
                                pending.extend(vector.drain(..).map(RowDirectoryEntry::from_tuple));
                                notificator.notify_at(time.retain());
                            });
                            notificator.for_each(|time, _count, _notificator| {
                                match merge(pending.drain(..)) {
                                    Ok(entries) => {
                                        output
                                            .session(&time)
                                            .give_iterator(entries.into_iter().map(RowDirectoryEntry::into_tuple));
                                    }
                                    Err(error) => faults.record(error),
                                }
                            });
                        },
                    )
                    .broadcast();
                barrier.attach(&merged, Pipeline, move |entry| {
                    sink.borrow_mut().push(RowDirectoryEntry::from_tuple(entry))
                });
            });
        }
        faults.settle(worker, "row index")?;

        let built = RowIndex::from_entries(published.take());
        if index == COORDINATOR {
            info!(rows = built.len(), elapsed = ?timer.elapsed(), "row index published");
        }
        Ok(built)
    }
}

/// Summarises a sorted shard as one record per run of equal rows.
///
/// `start` is the global offset of the shard's first edge. A row that continues into a
/// neighbouring shard gets a partial record here, and another there.
pub fn scan(shard: &[Edge], start: u64) -> Vec<RowDirectoryEntry> {
    let mut records: Vec<RowDirectoryEntry> = Vec::new();
    for (position, edge) in shard.iter().enumerate() {
        match records.last_mut() {
            Some(last) if last.row == edge.row => last.count += 1,
            _ => records.push(RowDirectoryEntry {
                row: edge.row,
                first_offset: start + position as u64,
                count: 1,
            }),
        }
    }
    records
}

/// Folds partial records into one entry per row, sorted by row.
///
/// Records may arrive in any order, and one row's records need not be adjacent. Partial
/// records for a row must tile one contiguous range of offsets; anything else means they did
/// not come from a sorted sequence, and is reported.
pub fn merge<I>(records: I) -> Result<Vec<RowDirectoryEntry>, Error>
where
    I: IntoIterator<Item = RowDirectoryEntry>,
{
    let mut by_row: BTreeMap<u32, Vec<(u64, u64)>> = BTreeMap::new();
    for record in records {
        by_row.entry(record.row).or_default().push((record.first_offset, record.count));
    }

    let mut merged = Vec::with_capacity(by_row.len());
    for (row, mut parts) in by_row {
        parts.sort_unstable();
        let first_offset = parts[0].0;
        let mut count = 0;
        for (offset, part) in parts {
            if offset != first_offset + count {
                return Err(Error::NonContiguousRow { row, expected: first_offset + count, found: offset });
            }
            count += part;
        }
        merged.push(RowDirectoryEntry { row, first_offset, count });
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted_edges() -> Vec<Edge> {
        let mut edges = vec![
            Edge::new(0, 1, 1),
            Edge::new(0, 2, 1),
            Edge::new(1, 0, 1),
            Edge::new(1, 2, 1),
            Edge::new(1, 3, 1),
            Edge::new(1, 4, 1),
            Edge::new(3, 1, 1),
            Edge::new(4, 1, 1),
            Edge::new(4, 2, 1),
            Edge::new(4, 3, 1),
        ];
        edges.sort();
        edges
    }

    fn split_and_merge(edges: &[Edge], cuts: &[usize]) -> Vec<RowDirectoryEntry> {
        let mut records = Vec::new();
        let mut start = 0;
        for &cut in cuts.iter().chain(Some(&edges.len())) {
            records.extend(scan(&edges[start..cut], start as u64));
            start = cut;
        }
        // reversed, so that partial records of a row arrive out of order.
        records.reverse();
        merge(records).unwrap()
    }

    #[test]
    fn scan_groups_runs() {
        let records = scan(&sorted_edges(), 0);
        assert_eq!(
            records,
            vec![
                RowDirectoryEntry { row: 0, first_offset: 0, count: 2 },
                RowDirectoryEntry { row: 1, first_offset: 2, count: 4 },
                RowDirectoryEntry { row: 3, first_offset: 6, count: 1 },
                RowDirectoryEntry { row: 4, first_offset: 7, count: 3 },
            ]
        );
    }

    #[test]
    fn scan_of_empty_shard_is_empty() {
        assert!(scan(&[], 17).is_empty());
    }

    #[test]
    fn merge_is_independent_of_cuts() {
        let edges = sorted_edges();
        let whole = split_and_merge(&edges, &[]);
        for cuts in [vec![3], vec![3, 4, 5], vec![1, 2, 3, 4, 5, 6, 7, 8, 9], vec![0, 0, 10], vec![5, 5, 8]] {
            assert_eq!(split_and_merge(&edges, &cuts), whole, "cuts = {:?}", cuts);
        }
    }

    #[test]
    fn entries_cover_exactly_their_row() {
        let edges = sorted_edges();
        let index = RowIndex::from_entries(split_and_merge(&edges, &[3, 4, 8]));
        for entry in index.entries() {
            let range = entry.offsets();
            assert!(edges[range.start as usize..range.end as usize].iter().all(|e| e.row == entry.row));
            let total = edges.iter().filter(|e| e.row == entry.row).count() as u64;
            assert_eq!(entry.count, total);
        }
    }

    #[test]
    fn merge_rejects_gaps_and_overlaps() {
        let gap = vec![
            RowDirectoryEntry { row: 2, first_offset: 0, count: 2 },
            RowDirectoryEntry { row: 2, first_offset: 3, count: 1 },
        ];
        assert!(matches!(
            merge(gap),
            Err(Error::NonContiguousRow { row: 2, expected: 2, found: 3 })
        ));

        let overlap = vec![
            RowDirectoryEntry { row: 5, first_offset: 4, count: 2 },
            RowDirectoryEntry { row: 5, first_offset: 4, count: 2 },
        ];
        assert!(merge(overlap).is_err());
    }

    #[test]
    fn lookup_of_absent_row_is_none() {
        let index = RowIndex::from_entries(scan(&sorted_edges(), 0));
        assert_eq!(index.lookup(2), None);
        assert_eq!(index.lookup(99), None);
        assert_eq!(index.lookup(u32::MAX), None);
        assert_eq!(index.lookup(3).map(|e| e.offsets()), Some(6..7));
        assert_eq!(RowIndex::default().lookup(0), None);
    }
}
