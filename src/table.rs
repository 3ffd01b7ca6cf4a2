//! Sharded accumulation of partial products.
//!
//! Each `(row, col)` key is owned by one worker, chosen by a deterministic hash of the key.
//! Contributions are routed to the owner and applied there, and only there; workers never
//! touch entries they do not own.

use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use fnv::{FnvHashMap, FnvHasher};

use timely::dataflow::channels::pact::Exchange;
use timely::dataflow::{Scope, Stream};

use crate::error::Error;
use crate::runtime::{Barrier, Faults};
use crate::Edge;

/// Key of a partial product: `(row, col)`.
pub type Key = (u32, u32);

/// Routing value for a key, identical on every worker.
#[inline]
pub fn shard_of(key: &Key) -> u64 {
    let mut hasher = FnvHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

/// This worker's shard of a partial-product table.
#[derive(Clone, Debug, Default)]
pub struct PartialProducts {
    entries: FnvHashMap<Key, i64>,
}

impl PartialProducts {
    pub fn new() -> PartialProducts {
        PartialProducts::default()
    }

    /// Creates an entry for `key` holding `initial`, unless one exists already.
    pub fn insert_if_absent(&mut self, key: Key, initial: i64) {
        self.entries.entry(key).or_insert(initial);
    }

    /// Applies `logic` to the entry for `key`, creating it at zero if absent.
    pub fn visit<F: FnOnce(&mut i64)>(&mut self, key: Key, logic: F) {
        logic(self.entries.entry(key).or_insert(0));
    }

    /// Applies `logic` to the entry for `key` if there is one.
    pub fn visit_if_present<F: FnOnce(&mut i64)>(&mut self, key: Key, logic: F) {
        if let Some(value) = self.entries.get_mut(&key) {
            logic(value);
        }
    }

    /// Visits every entry of this shard, in no particular order.
    pub fn for_each<F: FnMut(Key, i64)>(&self, mut logic: F) {
        for (&key, &value) in self.entries.iter() {
            logic(key, value);
        }
    }

    pub fn get(&self, key: Key) -> Option<i64> {
        self.entries.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of entries with `row == col`.
    pub fn diagonal_sum(&self) -> Result<i64, Error> {
        let mut sum = 0i64;
        for (&(row, col), &value) in self.entries.iter() {
            if row == col {
                sum = sum.checked_add(value).ok_or(Error::Overflow { row, col })?;
            }
        }
        Ok(sum)
    }

    /// Re-materializes the shard as edges, to drive a further multiplication.
    pub fn to_edges(&self) -> Vec<Edge> {
        let mut edges = Vec::with_capacity(self.len());
        self.for_each(|(row, col), value| edges.push(Edge::new(row, col, value)));
        edges
    }

    /// The shard's entries, sorted by key.
    pub fn sorted(&self) -> Vec<Edge> {
        let mut edges = self.to_edges();
        edges.sort_unstable();
        edges
    }
}

/// Applies contributions to the shards that own their keys.
///
/// Each contribution is routed to the owner of its key, which first ensures an entry exists
/// and then adds into it. Both steps travel in the one record, so the add always finds the
/// entry. An add that would overflow leaves the entry as it was, and is recorded in `faults`.
/// The barrier holds until every contribution has been applied.
pub fn accumulate<G: Scope>(
    contributions: &Stream<G, (Key, i64)>,
    table: &Rc<RefCell<PartialProducts>>,
    faults: &Faults,
    barrier: &Barrier,
) {
    let table = table.clone();
    let faults = faults.clone();
    let exchange = Exchange::new(|&(key, _): &(Key, i64)| shard_of(&key));
    barrier.attach(contributions, exchange, move |(key, amount)| {
        let mut table = table.borrow_mut();
        table.insert_if_absent(key, 0);
        table.visit(key, |total| match total.checked_add(amount) {
            Some(sum) => *total = sum,
            None => faults.record(Error::Overflow { row: key.0, col: key.1 }),
        });
    });
}
