//! Command line arguments and the validated configuration derived from them.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::error::Error;
use crate::input::Source;

/// How contributions to a partial product combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Accumulation {
    /// Positive entries are arcs of weight one, and each matched walk adds one; other
    /// matches add zero.
    #[default]
    Walks,
    /// Entries keep their values, and every product is added.
    Sum,
}

impl Accumulation {
    /// The value an input entry is stored with.
    #[inline]
    pub fn normalize(self, value: i64) -> i64 {
        match self {
            Accumulation::Walks => (value > 0) as i64,
            Accumulation::Sum => value,
        }
    }

    /// What a driver entry and a target entry add to their product's key.
    ///
    /// `None` if the product does not fit in an `i64`.
    #[inline]
    pub fn contribution(self, driver: i64, target: i64) -> Option<i64> {
        let product = driver.checked_mul(target)?;
        match self {
            Accumulation::Walks => Some(product.max(0)),
            Accumulation::Sum => Some(product),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "triangles", about = "Counts triangles in a graph by cubing its sparse adjacency matrix")]
pub struct Args {
    /// Edge list, one `row,col[,value]` entry per line.
    pub input: Option<PathBuf>,

    /// File whose first line is `rows,columns,entries` for the input.
    #[arg(long, requires = "input")]
    pub header: Option<PathBuf>,

    /// Number of timely workers.
    #[arg(short, long, default_value_t = 1)]
    pub workers: usize,

    /// How partial products accumulate.
    #[arg(long, value_enum, default_value_t = Accumulation::Walks)]
    pub accumulation: Accumulation,

    /// Generate a random undirected graph on this many nodes instead of reading input.
    #[arg(long, conflicts_with = "input", requires = "edges")]
    pub nodes: Option<u32>,

    /// Number of undirected edges in the generated graph.
    #[arg(long, requires = "nodes")]
    pub edges: Option<usize>,

    /// Seed for the generated graph.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Log the row index and each worker's share of the sorted matrix.
    #[arg(long)]
    pub inspect: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub source: Source,
    pub workers: usize,
    pub accumulation: Accumulation,
    pub inspect: bool,
}

impl Args {
    /// Checks the arguments and resolves them into a `Config`.
    pub fn into_config(self) -> Result<Config, Error> {
        if self.workers == 0 {
            return Err(Error::InvalidWorkers);
        }

        let source = match (self.input, self.nodes, self.edges) {
            (Some(path), _, _) => {
                if !path.is_file() {
                    return Err(Error::MissingInput { path });
                }
                if let Some(header) = self.header.as_ref() {
                    if !header.is_file() {
                        return Err(Error::MissingHeader { path: header.clone() });
                    }
                }
                Source::File { path, header: self.header }
            }
            (None, Some(nodes), Some(edges)) => Source::Random { nodes, edges, seed: self.seed },
            _ => return Err(Error::NoInput),
        };

        Ok(Config {
            source,
            workers: self.workers,
            accumulation: self.accumulation,
            inspect: self.inspect,
        })
    }
}
