//! Errors raised while loading a matrix or running a phase.

use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("input file not found: {}", path.display())]
    MissingInput { path: PathBuf },

    #[error("header file not found: {}", path.display())]
    MissingHeader { path: PathBuf },

    #[error("no input: supply an edge list or --nodes/--edges")]
    NoInput,

    #[error("at least one worker is required")]
    InvalidWorkers,

    #[error("could not read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: byte {offset}: {message}", path.display())]
    Parse {
        path: PathBuf,
        offset: u64,
        message: String,
    },

    #[error("{}: malformed header: {message}", path.display())]
    BadHeader { path: PathBuf, message: String },

    #[error("header declares {declared} entries but {loaded} were loaded")]
    EntryCount { declared: u64, loaded: u64 },

    #[error("row {row}: offset {offset} lies outside the matrix ({total} entries); row index is inconsistent with its store")]
    OffsetOutOfBounds { row: u32, offset: u64, total: u64 },

    #[error("offset {offset} was routed to worker {worker}, which holds [{start}, {end})")]
    NotHeld {
        offset: u64,
        worker: usize,
        start: u64,
        end: u64,
    },

    #[error("row {row}: partial records are not contiguous (expected offset {expected}, found {found})")]
    NonContiguousRow { row: u32, expected: u64, found: u64 },

    #[error("entry ({row}, {col}) overflows a 64-bit value")]
    Overflow { row: u32, col: u32 },

    #[error("trace overflows a 64-bit value")]
    TraceOverflow,

    #[error("{phase} aborted: {faults} fault(s) reported by other workers")]
    Aborted { phase: &'static str, faults: u64 },

    #[error("dataflow failed: {0}")]
    Dataflow(String),
}

impl Error {
    /// Exit codes:
    /// - 1: dataflow failure
    /// - 2: configuration error
    /// - 3: unreadable or malformed input
    /// - 4: row index inconsistent with its store, or arithmetic overflow
    /// - 5: aborted because another worker faulted
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Dataflow(_) => ExitCode::from(1),
            Self::MissingInput { .. }
            | Self::MissingHeader { .. }
            | Self::NoInput
            | Self::InvalidWorkers => ExitCode::from(2),
            Self::Unreadable { .. }
            | Self::Parse { .. }
            | Self::BadHeader { .. }
            | Self::EntryCount { .. } => ExitCode::from(3),
            Self::OffsetOutOfBounds { .. }
            | Self::NotHeld { .. }
            | Self::NonContiguousRow { .. }
            | Self::Overflow { .. }
            | Self::TraceOverflow => ExitCode::from(4),
            Self::Aborted { .. } => ExitCode::from(5),
        }
    }

    /// True for errors that only echo a fault raised on another worker.
    pub fn is_echo(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}
