//! A globally sorted, horizontally partitioned sequence of edges.
//!
//! After `SortedStore::sort` each worker holds a contiguous range of the global sort order,
//! and every worker holds the same `Partition` describing who holds what. Any global offset
//! can then be resolved to its owner without communication, and visited there.

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;
use std::time::Instant;

use timely::communication::Allocate;
use timely::dataflow::channels::pact::Exchange;
use timely::dataflow::operators::{Operator, ToStream};
use timely::dataflow::{Scope, Stream};
use timely::worker::Worker;
use timely::{Data, ExchangeData};

use tracing::debug;

use crate::error::Error;
use crate::runtime::{all_gather, run_phase, Faults};
use crate::{Edge, EdgeTuple};

/// Samples each worker contributes towards choosing splitters.
pub const SAMPLES_PER_WORKER: usize = 16;

/// Global offset ranges held by each worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    // bounds[w] .. bounds[w+1] is held by worker w.
    bounds: Vec<u64>,
}

impl Partition {
    /// Lays out workers' ranges back to back, in worker order.
    pub fn from_counts(counts: &[u64]) -> Partition {
        let mut bounds = Vec::with_capacity(counts.len() + 1);
        let mut total = 0;
        bounds.push(total);
        for &count in counts {
            total += count;
            bounds.push(total);
        }
        Partition { bounds }
    }

    pub fn total(&self) -> u64 {
        self.bounds[self.bounds.len() - 1]
    }

    pub fn range(&self, worker: usize) -> Range<u64> {
        self.bounds[worker]..self.bounds[worker + 1]
    }

    /// The worker holding `offset`, or `None` past the end of the sequence.
    #[inline]
    pub fn owner(&self, offset: u64) -> Option<usize> {
        if offset < self.total() {
            // first worker whose range ends beyond `offset`; empty ranges are skipped.
            Some(self.bounds[1..].partition_point(|&end| end <= offset))
        } else {
            None
        }
    }
}

/// Picks `peers - 1` splitters from a set of samples.
///
/// Every worker calls this with the same gathered samples, and so arrives at the same
/// splitters.
pub fn splitters(mut samples: Vec<Edge>, peers: usize) -> Vec<Edge> {
    samples.sort_unstable();
    if samples.is_empty() {
        return Vec::new();
    }
    (1..peers).map(|i| samples[(i * samples.len()) / peers]).collect()
}

/// The worker an edge is sent to, given splitters.
///
/// Edges equal to a splitter go to the bucket above it, so each bucket is a contiguous range
/// of the sort order.
#[inline]
pub fn bucket(splitters: &[Edge], edge: &Edge) -> usize {
    splitters.partition_point(|splitter| splitter <= edge)
}

/// Evenly spaced samples from a sorted slice.
fn sample(sorted: &[Edge], limit: usize) -> Vec<Edge> {
    if sorted.len() <= limit {
        sorted.to_vec()
    } else {
        (0..limit).map(|i| sorted[(i * sorted.len()) / limit]).collect()
    }
}

/// This worker's shard of a globally sorted edge sequence.
#[derive(Clone)]
pub struct SortedStore {
    shard: Rc<Vec<Edge>>,
    worker: usize,
    partition: Rc<Partition>,
}

impl SortedStore {
    /// Globally sorts edges held across all workers, by sample sort.
    ///
    /// Every worker must call this, each with its own portion of the edges. Ownership is
    /// redistributed: the returned shard generally holds different edges than `local`.
    pub fn sort<A: Allocate>(worker: &mut Worker<A>, mut local: Vec<Edge>) -> SortedStore {
        let timer = Instant::now();
        let index = worker.index();
        let peers = worker.peers();

        local.sort_unstable();
        let samples = sample(&local, SAMPLES_PER_WORKER)
            .into_iter()
            .map(Edge::into_tuple)
            .collect();
        let samples = all_gather(worker, samples).into_iter().map(Edge::from).collect();
        let splitters = splitters(samples, peers);

        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        run_phase(worker, move |scope, barrier| {
            let edges = local.into_iter().map(Edge::into_tuple).to_stream(scope);
            let route = move |&edge: &EdgeTuple| bucket(&splitters, &Edge::from(edge)) as u64;
            barrier.attach(&edges, Exchange::new(route), move |edge| {
                sink.borrow_mut().push(Edge::from(edge))
            });
        });

        let mut shard = received.take();
        shard.sort_unstable();

        let counts = all_gather(worker, vec![shard.len() as u64]);
        let partition = Partition::from_counts(&counts);
        debug!(
            worker = index,
            held = shard.len(),
            range = ?partition.range(index),
            elapsed = ?timer.elapsed(),
            "sorted"
        );

        SortedStore::from_parts(shard, index, partition)
    }

    /// Assembles a store from a shard that is already in place.
    ///
    /// `shard` must be sorted and must be exactly the edges `partition` assigns to `worker`.
    pub fn from_parts(shard: Vec<Edge>, worker: usize, partition: Partition) -> SortedStore {
        assert_eq!(
            shard.len() as u64,
            partition.range(worker).end - partition.range(worker).start,
            "shard does not match its partition range"
        );
        SortedStore {
            shard: Rc::new(shard),
            worker,
            partition: Rc::new(partition),
        }
    }

    /// Number of edges across all workers.
    pub fn total_count(&self) -> u64 {
        self.partition.total()
    }

    /// Global offset of this worker's first edge.
    pub fn start(&self) -> u64 {
        self.partition.range(self.worker).start
    }

    /// This worker's edges, in global order.
    pub fn local(&self) -> &[Edge] {
        &self.shard[..]
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// The edge at global `offset`, if this worker holds it.
    pub fn get(&self, offset: u64) -> Option<&Edge> {
        let range = self.partition.range(self.worker);
        if range.contains(&offset) {
            self.shard.get((offset - range.start) as usize)
        } else {
            None
        }
    }

    /// Visits edges by global offset, at the workers that hold them.
    ///
    /// Each request `(offset, payload)` is routed to the owner of `offset`, where
    /// `logic(edge, payload)` runs against the stored edge; its outputs form the returned
    /// stream, at the owner. A request for an offset the receiving worker does not hold is
    /// recorded in `faults` rather than answered, as the store never creates entries.
    pub fn visit<G, P, D, L>(&self, requests: &Stream<G, (u64, P)>, faults: &Faults, mut logic: L) -> Stream<G, D>
    where
        G: Scope,
        P: ExchangeData,
        D: Data,
        L: FnMut(&Edge, P) -> Option<D> + 'static,
    {
        let route = self.partition.clone();
        let store = self.clone();
        let faults = faults.clone();

        let exchange = Exchange::new(move |request: &(u64, P)| route.owner(request.0).unwrap_or(0) as u64);
        requests.unary(exchange, "Visit", move |_capability, _info| {
            let mut vector = Vec::new();
            move |input, output| {
                input.for_each(|time, data| {
                    data.swap(&mut vector);
                    let mut session = output.session(&time);
                    for (offset, payload) in vector.drain(..) {
                        match store.get(offset) {
                            Some(edge) => {
                                if let Some(result) = logic(edge, payload) {
                                    session.give(result);
                                }
                            }
                            None => {
                                let held = store.partition.range(store.worker);
                                faults.record(Error::NotHeld {
                                    offset,
                                    worker: store.worker,
                                    start: held.start,
                                    end: held.end,
                                });
                            }
                        }
                    }
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(rows: &[(u32, u32)]) -> Vec<Edge> {
        rows.iter().map(|&(r, c)| Edge::new(r, c, 1)).collect()
    }

    #[test]
    fn owner_skips_empty_ranges() {
        let partition = Partition::from_counts(&[3, 0, 2, 0]);
        assert_eq!(partition.total(), 5);
        assert_eq!(partition.owner(0), Some(0));
        assert_eq!(partition.owner(2), Some(0));
        assert_eq!(partition.owner(3), Some(2));
        assert_eq!(partition.owner(4), Some(2));
        assert_eq!(partition.owner(5), None);
        assert_eq!(partition.range(1), 3..3);
    }

    #[test]
    fn empty_partition_owns_nothing() {
        let partition = Partition::from_counts(&[0, 0]);
        assert_eq!(partition.total(), 0);
        assert_eq!(partition.owner(0), None);
    }

    #[test]
    fn buckets_are_contiguous_ranges() {
        let mut all = edges(&[(0, 1), (0, 2), (1, 0), (1, 2), (1, 3), (2, 0), (2, 1), (3, 1)]);
        all.sort();
        let splitters = splitters(all.clone(), 3);
        assert_eq!(splitters.len(), 2);

        let buckets: Vec<usize> = all.iter().map(|e| bucket(&splitters, e)).collect();
        assert!(buckets.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(buckets[0], 0);
        assert_eq!(buckets[all.len() - 1], 2);
    }

    #[test]
    fn splitter_ties_go_up() {
        let splitters = vec![Edge::new(1, 0, 1)];
        assert_eq!(bucket(&splitters, &Edge::new(0, 9, 1)), 0);
        assert_eq!(bucket(&splitters, &Edge::new(1, 0, 1)), 1);
        assert_eq!(bucket(&splitters, &Edge::new(1, 0, 2)), 1);
    }

    #[test]
    fn no_samples_means_one_bucket() {
        let splitters = splitters(Vec::new(), 4);
        assert!(splitters.is_empty());
        assert_eq!(bucket(&splitters, &Edge::new(7, 7, 7)), 0);
    }

    #[test]
    fn get_is_local_only() {
        let partition = Partition::from_counts(&[2, 2]);
        let store = SortedStore::from_parts(edges(&[(1, 0), (1, 2)]), 1, partition);
        assert_eq!(store.start(), 2);
        assert_eq!(store.total_count(), 4);
        assert_eq!(store.get(1), None);
        assert_eq!(store.get(3), Some(&Edge::new(1, 2, 1)));
        assert_eq!(store.get(4), None);
    }
}
