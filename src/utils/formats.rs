//! Utilities related to the file formats read by `rnadiff`.

pub mod gtf;
pub mod hits;

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use flate2::read::MultiGzDecoder;

/// Opens a file for buffered reading, transparently decompressing it if the
/// file name ends in `.gz`.
pub fn open_maybe_gzipped<P>(src: P) -> std::io::Result<Box<dyn BufRead>>
where
    P: AsRef<Path>,
{
    let path = src.as_ref();
    let file = File::open(path)?;

    match path.extension().and_then(|x| x.to_str()) {
        Some("gz") => Ok(Box::new(BufReader::new(MultiGzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}
