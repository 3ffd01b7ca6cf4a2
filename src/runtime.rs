//! Phases, barriers, and collective operations over timely workers.
//!
//! Every worker runs the same sequence of phases. A phase is a dataflow fed from data the
//! worker already holds; records move between workers only through parallelization
//! contracts, and are applied by the operator at the receiving worker. A worker leaves a
//! phase once each terminal operator of the phase has seen its input frontier empty, which
//! timely only reports when no record of the phase is queued or in flight on any worker.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use timely::communication::Allocate;
use timely::dataflow::channels::pact::{ParallelizationContract, Pipeline};
use timely::dataflow::operators::{Broadcast, Operator, ToStream};
use timely::dataflow::scopes::Child;
use timely::dataflow::{Scope, Stream};
use timely::worker::Worker;
use timely::{Data, ExchangeData};

use tracing::error;

use crate::error::Error;

/// The worker that merges gathered records and reports results.
pub const COORDINATOR: usize = 0;

/// Completion tracking for the terminal operators of one phase.
#[derive(Clone, Default)]
pub struct Barrier {
    pending: Rc<Cell<usize>>,
}

impl Barrier {
    /// True once every attached operator has drained its input.
    pub fn is_released(&self) -> bool {
        self.pending.get() == 0
    }

    /// Applies `logic` to each record that `pact` routes to this worker.
    ///
    /// The barrier is held until the operator's input frontier is empty, at which point every
    /// record sent to any instance of the operator, by any worker, has been applied.
    pub fn attach<G, D, P, L>(&self, stream: &Stream<G, D>, pact: P, mut logic: L)
    where
        G: Scope,
        D: Data,
        P: ParallelizationContract<G::Timestamp, D>,
        L: FnMut(D) + 'static,
    {
        let pending = self.pending.clone();
        pending.set(pending.get() + 1);

        let mut held = true;
        let mut vector = Vec::new();
        stream.sink(pact, "Barrier", move |input| {
            input.for_each(|_time, data| {
                data.swap(&mut vector);
                for datum in vector.drain(..) {
                    logic(datum);
                }
            });
            if held && input.frontier().frontier().is_empty() {
                held = false;
                pending.set(pending.get() - 1);
            }
        });
    }
}

/// Builds one phase as a dataflow, then steps the worker until the phase's barrier releases.
///
/// `build` must attach at least one terminal operator to the barrier; a phase with none is
/// considered complete as soon as it is built.
pub fn run_phase<A, F>(worker: &mut Worker<A>, build: F)
where
    A: Allocate,
    F: FnOnce(&mut Child<Worker<A>, u64>, &Barrier),
{
    let barrier = Barrier::default();
    worker.dataflow::<u64, _, _>(|scope| build(scope, &barrier));
    while !barrier.is_released() {
        worker.step();
    }
}

/// Delivers every worker's records to every worker.
///
/// The result is ordered by originating worker, and then by position in that worker's `local`.
pub fn all_gather<A, D>(worker: &mut Worker<A>, local: Vec<D>) -> Vec<D>
where
    A: Allocate,
    D: ExchangeData,
{
    let origin = worker.index();
    let gathered = Rc::new(RefCell::new(Vec::new()));
    let sink = gathered.clone();

    run_phase(worker, move |scope, barrier| {
        let records = local
            .into_iter()
            .enumerate()
            .map(move |(seq, datum)| (origin, seq, datum))
            .to_stream(scope)
            .broadcast();
        barrier.attach(&records, Pipeline, move |record| sink.borrow_mut().push(record));
    });

    let mut gathered = gathered.take();
    gathered.sort_by_key(|&(origin, seq, _)| (origin, seq));
    gathered.into_iter().map(|(_, _, datum)| datum).collect()
}

/// Sums one value from each worker, and returns the total to every worker.
pub fn all_reduce_sum<A: Allocate>(worker: &mut Worker<A>, local: i64) -> i64 {
    all_gather(worker, vec![local]).into_iter().sum()
}

/// Replaces every worker's copy of `payload` with the copy held by `origin`.
pub fn broadcast<A, D>(worker: &mut Worker<A>, origin: usize, payload: Vec<D>) -> Vec<D>
where
    A: Allocate,
    D: ExchangeData,
{
    let local = if worker.index() == origin { payload } else { Vec::new() };
    all_gather(worker, local)
}

/// Faults raised by operators on this worker during the current phase.
#[derive(Clone, Default)]
pub struct Faults {
    list: Rc<RefCell<Vec<Error>>>,
}

impl Faults {
    pub fn record(&self, error: Error) {
        self.list.borrow_mut().push(error);
    }

    /// Agrees with all other workers on whether `phase` completed cleanly.
    ///
    /// Every worker must call this after the same phase. If any worker recorded a fault, every
    /// worker returns an error: its own first fault if it has one, and `Error::Aborted`
    /// otherwise.
    pub fn settle<A: Allocate>(&self, worker: &mut Worker<A>, phase: &'static str) -> Result<(), Error> {
        let local = self.list.take();
        let total = all_reduce_sum(worker, local.len() as i64);
        if total == 0 {
            return Ok(());
        }

        let index = worker.index();
        for fault in local.iter() {
            error!(worker = index, phase, "{}", fault);
        }
        let faults = total as u64;
        Err(local.into_iter().next().unwrap_or(Error::Aborted { phase, faults }))
    }
}
