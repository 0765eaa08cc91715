//! Utilities related to opening and manipulating GTF files.

use std::io::BufRead;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use noodles::gtf;

//============================//
// Gene Transfer Format Files //
//============================//

/// Attempts to open a GTF file from a given source. Both plain (`.gtf`) and
/// gzipped (`.gtf.gz`) files are supported.
pub fn open<P>(src: P) -> anyhow::Result<gtf::Reader<Box<dyn BufRead>>>
where
    P: AsRef<Path>,
{
    let path = src.as_ref();
    let name = path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or_default()
        .to_lowercase();

    if !(name.ends_with(".gtf") || name.ends_with(".gtf.gz")) {
        bail!("Unknown extension for GTF file: {}", path.display());
    }

    let reader = super::open_maybe_gzipped(path)
        .with_context(|| format!("opening GTF file: {}", path.display()))?;
    Ok(gtf::Reader::new(reader))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_unknown_extension_is_rejected() {
        match open("annotation.gff3") {
            Ok(_) => panic!("a GFF3 file was opened as GTF"),
            Err(err) => assert!(err.to_string().contains("Unknown extension")),
        }
    }
}
