//! Outer-product multiplication of a local driver against an indexed, sorted target.
//!
//! Each worker iterates only the driver entries it holds. For a driver entry `(i, k, x)` the
//! target's row index names the offsets of row `k`; each such offset is visited where it is
//! stored, and the stored entry `(k, j, y)` contributes `x * y` to key `(i, j)` at the worker
//! owning that key.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use timely::communication::Allocate;
use timely::dataflow::channels::pact::Pipeline;
use timely::dataflow::operators::{Operator, ToStream};
use timely::worker::Worker;

use tracing::debug;

use crate::config::Accumulation;
use crate::error::Error;
use crate::index::RowIndex;
use crate::runtime::{run_phase, Faults};
use crate::store::SortedStore;
use crate::table::{accumulate, PartialProducts};
use crate::Edge;

/// Computes `driver · target`, and returns this worker's shard of the product.
///
/// `driver` is this worker's portion of the left operand, in any order. `target` and `index`
/// describe the right operand. Every worker must call this; if any worker finds the index
/// inconsistent with the target, or a product or sum overflows, every worker returns an error.
pub fn multiply<A: Allocate>(
    worker: &mut Worker<A>,
    driver: Vec<Edge>,
    target: &SortedStore,
    index: &RowIndex,
    accumulation: Accumulation,
) -> Result<PartialProducts, Error> {
    let timer = Instant::now();
    let local = driver.len();

    let faults = Faults::default();
    let table = Rc::new(RefCell::new(PartialProducts::new()));
    {
        let faults = faults.clone();
        let table = table.clone();
        let target = target.clone();
        let index = index.clone();
        run_phase(worker, move |scope, barrier| {
            let total = target.total_count();
            let issued = faults.clone();

            // one request per target offset in the row matching each driver column.
            let requests = driver.into_iter().map(Edge::into_tuple).to_stream(scope).unary(
                Pipeline,
                "Issue",
                move |_capability, _info| {
                    let mut vector = Vec::new();
                    move |input, output| {
                        input.for_each(|time, data| {
                            data.swap(&mut vector);
                            let mut session = output.session(&time);
                            for (row, col, value) in vector.drain(..) {
                                if let Some(entry) = index.lookup(col) {
                                    let offsets = entry.offsets();
                                    if offsets.end > total {
                                        issued.record(Error::OffsetOutOfBounds {
                                            row: entry.row,
                                            offset: offsets.end - 1,
                                            total,
                                        });
                                        continue;
                                    }
                                    for offset in offsets {
                                        session.give((offset, (row, value)));
                                    }
                                }
                            }
                        });
                    }
                },
            );

            // every match yields a record, so that its key exists even when it adds nothing.
            let overflowed = faults.clone();
            let contributions = target.visit(&requests, &faults, move |edge, (row, value): (u32, i64)| {
                match accumulation.contribution(value, edge.value) {
                    Some(amount) => Some(((row, edge.col), amount)),
                    None => {
                        overflowed.record(Error::Overflow { row, col: edge.col });
                        None
                    }
                }
            });

            accumulate(&contributions, &table, &faults, barrier);
        });
    }
    faults.settle(worker, "multiply")?;

    let table = table.take();
    debug!(
        worker = worker.index(),
        driver = local,
        entries = table.len(),
        elapsed = ?timer.elapsed(),
        "multiplied"
    );
    Ok(table)
}
