#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use timely::communication::allocator::Generic;
use timely::worker::Worker;

use outer_triangles::Edge;

/// Runs `logic` on `workers` workers, each handed a strided share of `edges`.
pub fn on_workers<T, F>(workers: usize, edges: Vec<Edge>, logic: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(&mut Worker<Generic>, Vec<Edge>) -> T + Send + Sync + 'static,
{
    timely::execute(timely::Config::process(workers), move |worker| {
        let (index, peers) = (worker.index(), worker.peers());
        let share = edges
            .iter()
            .enumerate()
            .filter(|&(position, _)| position % peers == index)
            .map(|(_, &edge)| edge)
            .collect();
        logic(worker, share)
    })
    .unwrap()
    .join()
    .into_iter()
    .map(|result| result.unwrap())
    .collect()
}

/// Both arcs of each undirected edge, with unit weight.
pub fn symmetric(pairs: &[(u32, u32)]) -> Vec<Edge> {
    pairs
        .iter()
        .flat_map(|&(a, b)| vec![Edge::new(a, b, 1), Edge::new(b, a, 1)])
        .collect()
}

pub fn three_cycle() -> Vec<Edge> {
    symmetric(&[(0, 1), (1, 2), (0, 2)])
}

/// Dense product of two sparse matrices, keeping every key some pair of entries reached.
pub fn naive_product(left: &[Edge], right: &[Edge]) -> Vec<Edge> {
    let mut product = BTreeMap::new();
    for l in left {
        for r in right.iter().filter(|r| r.row == l.col) {
            *product.entry((l.row, r.col)).or_insert(0) += l.value * r.value;
        }
    }
    product.into_iter().map(|((row, col), value)| Edge::new(row, col, value)).collect()
}

/// Triangles of an undirected graph, by checking every triple of nodes.
pub fn brute_force_triangles(arcs: &[Edge]) -> i64 {
    let set: BTreeSet<(u32, u32)> = arcs.iter().map(|e| (e.row, e.col)).collect();
    let nodes: BTreeSet<u32> = arcs.iter().flat_map(|e| vec![e.row, e.col]).collect();
    let nodes: Vec<u32> = nodes.into_iter().collect();
    let mut count = 0;
    for (i, &a) in nodes.iter().enumerate() {
        for (j, &b) in nodes.iter().enumerate().skip(i + 1) {
            if !set.contains(&(a, b)) {
                continue;
            }
            for &c in nodes.iter().skip(j + 1) {
                if set.contains(&(b, c)) && set.contains(&(a, c)) {
                    count += 1;
                }
            }
        }
    }
    count
}
