//! Utilities related to reading pre-aligned fragment ("hit") files.
//!
//! Hit files are JSON-lines: one JSON object per fragment, for example
//!
//! ```text
//! {"reference": "chr1", "left": 11873, "right": 12227, "transcript_id": "NR_046018"}
//! {"reference": "chr1", "left": 12612, "right": 12721, "mass": 0.5}
//! ```
//!
//! Both plain and gzipped (`.gz`) files are accepted.

use std::io::BufRead;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::bundles::ReadHit;

/// Reads every hit in a JSON-lines file. Blank lines are skipped.
pub fn read_hits<P>(src: P) -> anyhow::Result<Vec<ReadHit>>
where
    P: AsRef<Path>,
{
    let path = src.as_ref();
    debug!("reading hits from {}", path.display());

    let reader = super::open_maybe_gzipped(path)
        .with_context(|| format!("opening hits file: {}", path.display()))?;
    parse_hits(reader).with_context(|| format!("parsing hits file: {}", path.display()))
}

/// Parses hits from any buffered reader.
pub fn parse_hits<R>(reader: R) -> anyhow::Result<Vec<ReadHit>>
where
    R: BufRead,
{
    let mut hits = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", i + 1))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let hit: ReadHit =
            serde_json::from_str(line).with_context(|| format!("parsing line {}", i + 1))?;
        hits.push(hit);
    }

    Ok(hits)
}
