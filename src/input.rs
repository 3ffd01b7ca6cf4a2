//! Loading a worker's share of the input matrix.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Error;
use crate::Edge;

/// Where the input matrix comes from.
#[derive(Clone, Debug)]
pub enum Source {
    /// A delimited edge list, with an optional `rows,columns,entries` header file.
    File { path: PathBuf, header: Option<PathBuf> },
    /// A random undirected simple graph.
    Random { nodes: u32, edges: usize, seed: u64 },
}

/// Dimensions declared by a header file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub rows: u64,
    pub columns: u64,
    pub entries: u64,
}

impl Header {
    pub fn into_tuple(self) -> (u64, u64, u64) {
        (self.rows, self.columns, self.entries)
    }
}

impl From<(u64, u64, u64)> for Header {
    fn from((rows, columns, entries): (u64, u64, u64)) -> Header {
        Header { rows, columns, entries }
    }
}

/// Loads worker `index` of `peers`' share of `source`.
pub fn load(source: &Source, index: usize, peers: usize) -> Result<Vec<Edge>, Error> {
    match source {
        Source::File { path, .. } => read_partition(path, index, peers),
        Source::Random { nodes, edges, seed } => Ok(random_graph(*nodes, *edges, *seed)
            .into_iter()
            .enumerate()
            .filter(|&(position, _)| position % peers == index)
            .map(|(_, edge)| edge)
            .collect()),
    }
}

/// Parses one line of an edge list.
///
/// Fields are separated by commas or whitespace; a missing value defaults to one. Blank lines
/// and lines starting with `#` or `%` are skipped.
pub fn parse_line(line: &str) -> Result<Option<Edge>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('%') {
        return Ok(None);
    }

    let mut fields = line.split(|c: char| c == ',' || c.is_whitespace()).filter(|f| !f.is_empty());
    let row = match fields.next() {
        Some(field) => field.parse::<u32>().map_err(|e| format!("row {:?}: {}", field, e))?,
        None => return Err("missing row".to_owned()),
    };
    let col = match fields.next() {
        Some(field) => field.parse::<u32>().map_err(|e| format!("column {:?}: {}", field, e))?,
        None => return Err("missing column".to_owned()),
    };
    let value = match fields.next() {
        Some(field) => field.parse::<i64>().map_err(|e| format!("value {:?}: {}", field, e))?,
        None => 1,
    };
    if let Some(extra) = fields.next() {
        return Err(format!("unexpected field {:?}", extra));
    }

    Ok(Some(Edge::new(row, col, value)))
}

/// Reads the lines of `path` that belong to worker `index` of `peers`.
///
/// The file is cut into `peers` byte ranges of near equal size, and a line belongs to the
/// worker whose range holds its first byte.
pub fn read_partition(path: &Path, index: usize, peers: usize) -> Result<Vec<Edge>, Error> {
    let unreadable = |source| Error::Unreadable { path: path.to_owned(), source };

    let file = File::open(path).map_err(unreadable)?;
    let length = file.metadata().map_err(unreadable)?.len();
    let start = ((length as u128 * index as u128) / peers as u128) as u64;
    let end = ((length as u128 * (index + 1) as u128) / peers as u128) as u64;

    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut position = start;

    // finish the line straddling `start`, which belongs to the previous range.
    if start > 0 {
        reader.seek(SeekFrom::Start(start - 1)).map_err(unreadable)?;
        let mut skipped = Vec::new();
        position = start - 1 + reader.read_until(b'\n', &mut skipped).map_err(unreadable)? as u64;
    }

    let mut edges = Vec::new();
    while position < end {
        line.clear();
        let read = reader.read_line(&mut line).map_err(unreadable)?;
        if read == 0 {
            break;
        }
        match parse_line(&line) {
            Ok(Some(edge)) => edges.push(edge),
            Ok(None) => {}
            Err(message) => {
                return Err(Error::Parse { path: path.to_owned(), offset: position, message });
            }
        }
        position += read as u64;
    }

    Ok(edges)
}

/// Reads a `rows,columns,entries` header from the first line of `path`.
pub fn read_header(path: &Path) -> Result<Header, Error> {
    let bad = |message: String| Error::BadHeader { path: path.to_owned(), message };

    let file = File::open(path).map_err(|source| Error::Unreadable { path: path.to_owned(), source })?;
    let mut first = String::new();
    BufReader::new(file)
        .read_line(&mut first)
        .map_err(|source| Error::Unreadable { path: path.to_owned(), source })?;

    let fields = first
        .trim()
        .split(',')
        .map(|field| field.trim().parse::<u64>().map_err(|e| bad(format!("{:?}: {}", field, e))))
        .collect::<Result<Vec<_>, _>>()?;
    match fields[..] {
        [rows, columns, entries] => Ok(Header { rows, columns, entries }),
        _ => Err(bad(format!("expected 3 fields, found {}", fields.len()))),
    }
}

/// A random undirected simple graph, as a symmetric list of unit-weight arcs.
///
/// Draws `edges` distinct unordered pairs of distinct nodes (fewer if the graph would be
/// complete), and emits both directions of each. The same seed gives the same list.
pub fn random_graph(nodes: u32, edges: usize, seed: u64) -> Vec<Edge> {
    let possible = (nodes as u64 * (nodes as u64).saturating_sub(1) / 2) as usize;
    let target = edges.min(possible);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut pairs = BTreeSet::new();
    while pairs.len() < target {
        let a = rng.gen_range(0..nodes);
        let b = rng.gen_range(0..nodes);
        if a != b {
            pairs.insert((a.min(b), a.max(b)));
        }
    }

    let mut arcs = Vec::with_capacity(2 * pairs.len());
    for (a, b) in pairs {
        arcs.push(Edge::new(a, b, 1));
        arcs.push(Edge::new(b, a, 1));
    }
    arcs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_accepts_commas_and_whitespace() {
        assert_eq!(parse_line("1,2,3\n"), Ok(Some(Edge::new(1, 2, 3))));
        assert_eq!(parse_line("4 5"), Ok(Some(Edge::new(4, 5, 1))));
        assert_eq!(parse_line(" 6,\t7 , -2 "), Ok(Some(Edge::new(6, 7, -2))));
    }

    #[test]
    fn parse_skips_comments_and_blanks() {
        assert_eq!(parse_line(""), Ok(None));
        assert_eq!(parse_line("   \n"), Ok(None));
        assert_eq!(parse_line("% matrix market"), Ok(None));
        assert_eq!(parse_line("# src dst"), Ok(None));
    }

    #[test]
    fn parse_rejects_bad_lines() {
        assert!(parse_line("1").is_err());
        assert!(parse_line("-1,2,1").is_err());
        assert!(parse_line("a,b").is_err());
        assert!(parse_line("1,2,3,4").is_err());
    }

    #[test]
    fn partitions_cover_every_line_once() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut expected = Vec::new();
        for i in 0..50u32 {
            writeln!(file, "{},{},{}", i, (i * 7) % 13, i as i64 - 20).unwrap();
            expected.push(Edge::new(i, (i * 7) % 13, i as i64 - 20));
        }
        writeln!(file, "# trailing comment").unwrap();
        file.flush().unwrap();

        for peers in 1..6 {
            let mut loaded = Vec::new();
            for index in 0..peers {
                loaded.extend(read_partition(file.path(), index, peers).unwrap());
            }
            assert_eq!(loaded, expected, "peers = {}", peers);
        }
    }

    #[test]
    fn partition_reports_parse_offset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "0,1\n1,x\n").unwrap();
        file.flush().unwrap();
        match read_partition(file.path(), 0, 1) {
            Err(Error::Parse { offset, .. }) => assert_eq!(offset, 4),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn header_parses_three_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "26475,26475,106762").unwrap();
        file.flush().unwrap();
        assert_eq!(
            read_header(file.path()).unwrap(),
            Header { rows: 26475, columns: 26475, entries: 106762 }
        );

        let mut short = tempfile::NamedTempFile::new().unwrap();
        writeln!(short, "3,3").unwrap();
        short.flush().unwrap();
        assert!(matches!(read_header(short.path()), Err(Error::BadHeader { .. })));
    }

    #[test]
    fn random_graph_is_symmetric_and_simple() {
        let arcs = random_graph(20, 40, 7);
        assert_eq!(arcs.len(), 80);
        assert!(arcs.iter().all(|e| e.row != e.col && e.value == 1));
        let set: BTreeSet<_> = arcs.iter().map(|e| (e.row, e.col)).collect();
        assert_eq!(set.len(), arcs.len());
        assert!(arcs.iter().all(|e| set.contains(&(e.col, e.row))));
        assert_eq!(arcs, random_graph(20, 40, 7));
    }

    #[test]
    fn random_graph_caps_at_complete() {
        assert_eq!(random_graph(4, 100, 1).len(), 12);
        assert!(random_graph(1, 5, 1).is_empty());
        assert!(random_graph(0, 5, 1).is_empty());
    }

    #[test]
    fn random_load_partitions_the_graph() {
        let source = Source::Random { nodes: 30, edges: 50, seed: 2 };
        let mut loaded = Vec::new();
        for index in 0..3 {
            loaded.extend(load(&source, index, 3).unwrap());
        }
        loaded.sort();
        let mut expected = random_graph(30, 50, 2);
        expected.sort();
        assert_eq!(loaded, expected);
    }
}
