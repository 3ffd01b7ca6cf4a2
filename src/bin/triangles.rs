//! Counts triangles in a graph given as an edge list, or in a generated random graph.
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default `info`); the count goes to stdout.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use outer_triangles::config::Args;
use outer_triangles::run;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let result = Args::parse().into_config().and_then(run);
    match result {
        Ok(report) => {
            println!("triangles: {}", report.triangles);
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!("{}", error);
            error.exit_code()
        }
    }
}
