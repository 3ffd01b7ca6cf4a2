//! The triangle pipeline: `A·A`, then `(A·A)·A`, then a sixth of the trace.

use std::path::Path;
use std::time::Instant;

use timely::communication::Allocate;
use timely::worker::Worker;

use tracing::{debug, info, warn};

use crate::config::{Accumulation, Config};
use crate::error::Error;
use crate::index::RowIndex;
use crate::input::{self, Header, Source};
use crate::multiply::multiply;
use crate::runtime::{all_gather, all_reduce_sum, broadcast, Faults, COORDINATOR};
use crate::store::SortedStore;
use crate::Edge;

/// Global figures of one run, identical on every worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Report {
    /// Entries of `A`.
    pub entries: u64,
    /// Rows of `A` with at least one entry.
    pub rows: usize,
    /// Entries of `A·A`.
    pub squared: u64,
    /// Entries of `A·A·A`.
    pub cubed: u64,
    /// Sum of the diagonal of `A·A·A`.
    pub trace: i64,
    pub triangles: i64,
}

/// Counts the triangles of the matrix whose entries are spread across workers as `edges`.
///
/// Every worker must call this with its own portion of the entries. Each returns the same
/// report, or each returns an error.
pub fn count_triangles<A: Allocate>(
    worker: &mut Worker<A>,
    edges: Vec<Edge>,
    accumulation: Accumulation,
    inspect: bool,
) -> Result<Report, Error> {
    let timer = Instant::now();
    let index = worker.index();

    let edges = edges
        .into_iter()
        .map(|edge| Edge::new(edge.row, edge.col, accumulation.normalize(edge.value)))
        .collect();
    let store = SortedStore::sort(worker, edges);
    let rows = RowIndex::build(worker, &store)?;
    if inspect {
        log_layout(index, &store, &rows);
    }

    let squared = multiply(worker, store.local().to_vec(), &store, &rows, accumulation)?;
    let squared_entries = all_reduce_sum(worker, squared.len() as i64) as u64;
    debug!(worker = index, held = squared.len(), elapsed = ?timer.elapsed(), "A·A complete");

    let cubed = multiply(worker, squared.to_edges(), &store, &rows, accumulation)?;
    drop(squared);
    let cubed_entries = all_reduce_sum(worker, cubed.len() as i64) as u64;
    debug!(worker = index, held = cubed.len(), elapsed = ?timer.elapsed(), "A·A·A complete");

    let faults = Faults::default();
    let local_trace = cubed.diagonal_sum().unwrap_or_else(|error| {
        faults.record(error);
        0
    });
    faults.settle(worker, "trace")?;
    let trace = all_gather(worker, vec![local_trace])
        .into_iter()
        .try_fold(0i64, |sum, part| sum.checked_add(part))
        .ok_or(Error::TraceOverflow)?;
    let report = Report {
        entries: store.total_count(),
        rows: rows.len(),
        squared: squared_entries,
        cubed: cubed_entries,
        trace,
        triangles: trace / 6,
    };

    if index == COORDINATOR {
        if trace % 6 != 0 {
            warn!(trace, "trace is not a multiple of six; is the matrix symmetric with an empty diagonal?");
        }
        info!(
            entries = report.entries,
            rows = report.rows,
            squared = report.squared,
            cubed = report.cubed,
            trace = report.trace,
            triangles = report.triangles,
            elapsed = ?timer.elapsed(),
            "counted triangles"
        );
    }
    Ok(report)
}

fn log_layout(index: usize, store: &SortedStore, rows: &RowIndex) {
    if index == COORDINATOR {
        for entry in rows.entries() {
            info!(row = entry.row, first_offset = entry.first_offset, count = entry.count, "row index");
        }
    }
    info!(
        worker = index,
        range = ?store.partition().range(index),
        total = store.total_count(),
        "shard"
    );
}

/// Reads the header on the coordinator, and publishes it to every worker.
fn read_header<A: Allocate>(worker: &mut Worker<A>, path: &Path) -> Result<Header, Error> {
    let faults = Faults::default();
    let mut local = Vec::new();
    if worker.index() == COORDINATOR {
        match input::read_header(path) {
            Ok(header) => local.push(header.into_tuple()),
            Err(error) => faults.record(error),
        }
    }
    faults.settle(worker, "header")?;

    broadcast(worker, COORDINATOR, local)
        .into_iter()
        .next()
        .map(Header::from)
        .ok_or_else(|| Error::Dataflow("header was not published".to_owned()))
}

/// Runs one worker from loading its input to its report.
fn run_worker<A: Allocate>(worker: &mut Worker<A>, config: &Config) -> Result<Report, Error> {
    let timer = Instant::now();
    let index = worker.index();
    let peers = worker.peers();

    let faults = Faults::default();
    let edges = match input::load(&config.source, index, peers) {
        Ok(edges) => edges,
        Err(error) => {
            faults.record(error);
            Vec::new()
        }
    };
    faults.settle(worker, "load")?;
    debug!(worker = index, loaded = edges.len(), elapsed = ?timer.elapsed(), "loaded");

    if let Source::File { header: Some(path), .. } = &config.source {
        let header = read_header(worker, path)?;
        let loaded = all_reduce_sum(worker, edges.len() as i64) as u64;
        if header.entries != loaded {
            return Err(Error::EntryCount { declared: header.entries, loaded });
        }
        if index == COORDINATOR {
            info!(rows = header.rows, columns = header.columns, entries = header.entries, "header");
        }
    }

    count_triangles(worker, edges, config.accumulation, config.inspect)
}

/// Counts triangles with `config.workers` workers in this process.
///
/// When several workers fail, the error returned is the first one raised as a fault, rather
/// than one merely reporting that another worker aborted.
pub fn run(config: Config) -> Result<Report, Error> {
    let workers = config.workers;
    let guards = timely::execute(timely::Config::process(workers), move |worker| run_worker(worker, &config))
        .map_err(Error::Dataflow)?;

    let mut report = None;
    let mut echo = None;
    for (index, result) in guards.join().into_iter().enumerate() {
        match result.map_err(Error::Dataflow).and_then(|result| result) {
            Ok(worker_report) => {
                if index == COORDINATOR {
                    report = Some(worker_report);
                }
            }
            Err(error) if error.is_echo() => {
                echo.get_or_insert(error);
            }
            Err(error) => return Err(error),
        }
    }

    if let Some(error) = echo {
        return Err(error);
    }
    report.ok_or_else(|| Error::Dataflow("coordinator returned no report".to_owned()))
}
