//! Loading reference transcript models from a GTF file.
//!
//! Only `exon` records are considered. Exons are grouped into transcripts by
//! their `transcript_id` attribute, in the order transcripts are first seen.
//! The following attributes are read:
//!
//! * `transcript_id` (required)
//! * `gene_id` (required)
//! * `gene_name`
//! * `tss_id`
//! * `p_id`
//! * `class_code` (defaults to `-`)
//! * `nearest_ref`
//!
//! GTF coordinates are one-based and inclusive; they are converted to the
//! zero-based, half-open intervals used everywhere else.

use std::io::BufRead;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use indexmap::IndexMap;
use noodles::gtf;
use num_format::Locale;
use num_format::ToFormattedString;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::bundles::RefSequenceTable;
use crate::bundles::Scaffold;
use crate::bundles::Strand;

/// Reads every transcript of a GTF file, adding the reference sequences it
/// mentions to `ref_table`.
pub fn load<P>(src: P, ref_table: &mut RefSequenceTable) -> anyhow::Result<Vec<Scaffold>>
where
    P: AsRef<Path>,
{
    let src = src.as_ref();
    info!("Reading transcripts from {}.", src.display());

    let mut reader = crate::utils::formats::gtf::open(src)?;
    let scaffolds = read_scaffolds(&mut reader, ref_table)
        .with_context(|| format!("reading transcripts from {}", src.display()))?;

    info!(
        "Read {} transcripts on {} reference sequences.",
        scaffolds.len().to_formatted_string(&Locale::en),
        ref_table.len()
    );
    Ok(scaffolds)
}

/// Reads every transcript from an open GTF reader.
pub fn read_scaffolds<R>(
    reader: &mut gtf::Reader<R>,
    ref_table: &mut RefSequenceTable,
) -> anyhow::Result<Vec<Scaffold>>
where
    R: BufRead,
{
    let mut transcripts: IndexMap<String, Scaffold> = IndexMap::new();
    let mut skipped = 0usize;

    for (i, result) in reader.lines().enumerate() {
        let line_no = i + 1;
        let record = match result.with_context(|| format!("parsing line {}", line_no))? {
            gtf::Line::Record(r) => r,
            _ => continue,
        };

        if record.ty() != "exon" {
            continue;
        }

        let mut attributes: IndexMap<&str, &str> = IndexMap::new();
        for entry in record.attributes().iter() {
            attributes.insert(entry.key(), entry.value());
        }

        let transcript_id = match attributes.get("transcript_id") {
            Some(id) => id.to_string(),
            None => {
                skipped += 1;
                continue;
            }
        };

        let gene_id = match attributes.get("gene_id") {
            Some(id) => id.to_string(),
            None => bail!(
                "line {}: exon of transcript {} has no gene_id attribute",
                line_no,
                transcript_id
            ),
        };

        let reference_id = ref_table.get_or_insert(record.reference_sequence_name());
        let start = usize::from(record.start()) as u64 - 1;
        let end = usize::from(record.end()) as u64;

        let strand = match record.strand() {
            Some(gtf::record::Strand::Forward) => Strand::Forward,
            Some(gtf::record::Strand::Reverse) => Strand::Reverse,
            _ => Strand::Unknown,
        };

        let optional = |key: &str| attributes.get(key).map(|v| v.to_string());

        let scaffold = transcripts
            .entry(transcript_id.clone())
            .or_insert_with(|| Scaffold {
                transcript_id: transcript_id.clone(),
                reference_id,
                strand,
                exons: Vec::new(),
                gene_id: gene_id.clone(),
                gene_name: optional("gene_name"),
                tss_id: optional("tss_id"),
                protein_id: optional("p_id"),
                class_code: attributes
                    .get("class_code")
                    .and_then(|c| c.chars().next())
                    .unwrap_or('-'),
                nearest_ref: optional("nearest_ref"),
            });

        if scaffold.reference_id != reference_id {
            bail!(
                "line {}: transcript {} has exons on more than one reference sequence",
                line_no,
                transcript_id
            );
        }

        scaffold.exons.push((start, end));
    }

    if skipped > 0 {
        warn!(
            "{} exon records had no transcript_id attribute and were ignored.",
            skipped
        );
    }

    let mut scaffolds: Vec<Scaffold> = transcripts.into_values().collect();
    for scaffold in scaffolds.iter_mut() {
        normalize_exons(&mut scaffold.exons);
    }

    debug!("grouped exons into {} transcripts", scaffolds.len());
    Ok(scaffolds)
}

/// Sorts exons and merges the ones that overlap or touch.
fn normalize_exons(exons: &mut Vec<(u64, u64)>) {
    exons.sort_unstable();

    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(exons.len());
    for (start, end) in exons.drain(..) {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    *exons = merged;
}

#[cfg(test)]
mod tests {
    use super::*;

    const GTF: &str = "\
chr1\ttest\texon\t101\t200\t.\t+\t.\tgene_id \"g1\"; transcript_id \"t1\"; gene_name \"ABC\"; tss_id \"TSS1\"; p_id \"P1\"; class_code \"=\"; nearest_ref \"ENST1\";
chr1\ttest\texon\t301\t400\t.\t+\t.\tgene_id \"g1\"; transcript_id \"t1\";
chr1\ttest\ttranscript\t101\t400\t.\t+\t.\tgene_id \"g1\"; transcript_id \"t1\";
chr2\ttest\texon\t11\t20\t.\t-\t.\tgene_id \"g2\"; transcript_id \"t2\";
chr1\ttest\texon\t1\t50\t.\t+\t.\tgene_id \"g3\"; transcript_id \"t3\";
";

    fn read(contents: &str) -> anyhow::Result<(Vec<Scaffold>, RefSequenceTable)> {
        let mut table = RefSequenceTable::default();
        let mut reader = gtf::Reader::new(contents.as_bytes());
        let scaffolds = read_scaffolds(&mut reader, &mut table)?;
        Ok((scaffolds, table))
    }

    #[test]
    pub fn test_read_scaffolds() {
        let (scaffolds, table) = read(GTF).unwrap();
        assert_eq!(scaffolds.len(), 3);
        assert_eq!(table.len(), 2);

        let t1 = &scaffolds[0];
        assert_eq!(t1.transcript_id, "t1");
        assert_eq!(t1.exons, vec![(100, 200), (300, 400)]);
        assert_eq!(t1.length(), 200);
        assert_eq!(t1.strand, Strand::Forward);
        assert_eq!(t1.gene_name.as_deref(), Some("ABC"));
        assert_eq!(t1.tss_id.as_deref(), Some("TSS1"));
        assert_eq!(t1.protein_id.as_deref(), Some("P1"));
        assert_eq!(t1.class_code, '=');
        assert_eq!(t1.nearest_ref.as_deref(), Some("ENST1"));

        let t2 = &scaffolds[1];
        assert_eq!(t2.reference_id, 1);
        assert_eq!(t2.strand, Strand::Reverse);
        assert_eq!(t2.class_code, '-');
        assert_eq!(t2.gene_name, None);
    }

    #[test]
    pub fn test_missing_gene_id_is_an_error() {
        let gtf = "chr1\ttest\texon\t1\t50\t.\t+\t.\ttranscript_id \"t1\";\n";
        assert!(read(gtf).is_err());
    }

    #[test]
    pub fn test_normalize_exons() {
        let mut exons = vec![(50, 60), (0, 10), (10, 20), (55, 70)];
        normalize_exons(&mut exons);
        assert_eq!(exons, vec![(0, 20), (50, 70)]);
    }

    #[test]
    pub fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotation.gtf");
        std::fs::write(&path, GTF).unwrap();

        let mut table = RefSequenceTable::default();
        let scaffolds = load(&path, &mut table).unwrap();
        assert_eq!(scaffolds.len(), 3);
    }
}
