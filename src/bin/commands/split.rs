use crate::commands::command::Command;
use crate::commands::common::{
    MatchingArgs, OutputArgs, check_inputs_exist, close_outputs, progress_logger, read_fastq,
    report, report_constraint_errors,
};
use anyhow::Result;
use clap::Parser;
use fqsplit_lib::barcode_spec::{BarcodeSpec, SpecOptions};
use fqsplit_lib::demux::Demultiplexer;
use fqsplit_lib::layout::bucket_paths;
use log::{debug, info};
use std::path::PathBuf;
use std::time::Instant;

/// Splits FASTQs by in-line barcodes found at fixed positions in each read.
///
/// Each line of the barcode table names a sample followed by one or more barcode/position
/// pairs, where the position is the 1-based start of the barcode in the read:
///
/// ```
/// S1  ACGTACGT  1  TTGCA  41
/// S2  GGATCCAA  1  CCATG  41
/// ```
///
/// Each barcode marks the start of a slot that runs up to the next barcode, or to the end of
/// the read for the last barcode.  When the first barcode does not start at position 1, the
/// bases ahead of it form an extra unnamed slot.  A read belongs to the first sample, in table
/// order, whose every barcode matches with at most `--mismatch` substitutions.  Reads that
/// match no sample are counted but not written.
///
/// For a matched read, each slot is written as its own record to
/// `<output>/<sample>_b<slot>_<split>.fq.gz`, with the header annotated with the barcode and
/// the 1-based range written, e.g. `@read1 barcode:TTGCA,part:1,pos:41-150`.
///
/// An optional positions table replaces the default range of any slot with one or more
/// explicit 1-based ranges, one group of comma-separated ranges per slot (counting any unnamed
/// leading slot).  An end that is omitted, 0 or negative runs to the end of the read:
///
/// ```
/// S1  1-8  9-20,21-40  41-45,46-
/// ```
///
/// Slots split into more than one range write each range to
/// `<sample>_b<slot>_p<range>_<split>.fq.gz`.  Output files that receive no records are
/// removed at the end of the run, and per-sample counts are written to `demux_metrics.tsv`.
#[derive(Parser, Debug)]
#[command(version)]
#[clap(verbatim_doc_comment)]
pub(crate) struct Split {
    /// One or more input FASTQ files, plain or gzipped, read in the order given.
    #[clap(long, short = 'i', required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,

    /// The barcode table of samples, barcodes and barcode positions.
    #[clap(long, short = 'b', required = true)]
    barcodes: PathBuf,

    /// An optional table of per-slot output ranges.
    #[clap(long, short = 'p')]
    positions: Option<PathBuf>,

    /// Bases to remove from the start of the first slot's output.
    #[clap(long, default_value = "0")]
    trim_left: usize,

    /// Bases to remove from the end of the last slot's output.
    #[clap(long, default_value = "0")]
    trim_right: usize,

    #[clap(flatten)]
    matching: MatchingArgs,

    #[clap(flatten)]
    output: OutputArgs,
}

impl Split {
    /// Checks that the inputs exist and the output options are usable.
    fn validate_inputs(&self) -> Result<()> {
        let mut constraint_errors = vec![];
        check_inputs_exist(&self.inputs, &mut constraint_errors);
        if !self.barcodes.exists() {
            constraint_errors
                .push(format!("Barcode table {:#?} doesn't exist", self.barcodes));
        }
        if let Some(positions) = &self.positions {
            if !positions.exists() {
                constraint_errors.push(format!("Positions table {positions:#?} doesn't exist"));
            }
        }
        self.output.validate(&mut constraint_errors)?;
        report_constraint_errors(constraint_errors)
    }

    fn spec_options(&self) -> SpecOptions {
        SpecOptions {
            drup: self.matching.drup,
            trim_left: self.trim_left,
            trim_right: self.trim_right,
            reverse_complement_first: self.matching.rc_bc1,
            reverse_complement_second: self.matching.rc_bc2,
        }
    }
}

impl Command for Split {
    fn execute(&self) -> Result<()> {
        let start = Instant::now();
        self.validate_inputs()?;

        let spec =
            BarcodeSpec::from_files(&self.barcodes, self.positions.as_ref(), &self.spec_options())?;
        info!("Loaded {} samples with {} output buckets.", spec.samples.len(), spec.num_buckets());
        debug!("{spec}");

        let paths =
            bucket_paths(&self.output.output, &spec, self.output.splitn, !self.output.no_gzip);
        let (router, pool) = self.output.open_outputs(paths)?;
        let mut demux = Demultiplexer::new(&spec, self.matching.mismatch, router)?;

        let logger = progress_logger("records");
        for input in &self.inputs {
            info!("Reading {input:?}");
            for record in read_fastq(input)? {
                demux.process(&record?)?;
                logger.record();
            }
        }
        info!("Finished reading input FASTQs.");

        let (stats, router) = demux.finish();
        for (bucket, key) in spec.buckets().enumerate() {
            debug!(
                "Sample {} slot {} part {}: {} records",
                spec.samples[key.sample].name,
                key.slot + 1,
                key.part + 1,
                stats.emitted(bucket)
            );
        }
        let written = close_outputs(router, pool)?;
        info!("Wrote {} non-empty output files.", written.len());

        report(&self.output.output, &stats.summary(&spec.sample_names()), start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::common::METRICS_FILE_NAME;
    use fgoxide::io::{DelimFile, Io};
    use fqsplit_lib::stats::SampleMetric;
    use seq_io::fastq::{Reader as FastqReader, Record};
    use tempfile::TempDir;

    /// Writes a FASTQ named `{name}.fq` holding one record per entry of `seqs`, named
    /// `{name}_{i}`, and returns its path.
    fn fastq_file(tmpdir: &TempDir, name: &str, seqs: &[&str]) -> PathBuf {
        write_fastq(tmpdir, name, "fq", seqs)
    }

    /// Writes the FASTQ to `{name}.{extension}`, gzipped if the extension ends in `.gz`.
    fn write_fastq(tmpdir: &TempDir, name: &str, extension: &str, seqs: &[&str]) -> PathBuf {
        let path = tmpdir.path().join(format!("{name}.{extension}"));
        let mut lines = Vec::with_capacity(seqs.len() * 4);
        for (i, &seq) in seqs.iter().enumerate() {
            lines.push(format!("@{name}_{i}"));
            lines.push(seq.to_owned());
            lines.push("+".to_owned());
            lines.push(";".repeat(seq.len()));
        }
        Io::default().write_lines(&path, lines).unwrap();
        path
    }

    fn table_file(tmpdir: &TempDir, name: &str, lines: &[&str]) -> PathBuf {
        let path = tmpdir.path().join(name);
        Io::default().write_lines(&path, lines).unwrap();
        path
    }

    /// Reads the (header, sequence) of every record in a FASTQ, plain or gzipped.
    fn read_records(path: &PathBuf) -> Vec<(String, String)> {
        let reader = FastqReader::new(Io::default().new_reader(path).unwrap());
        reader
            .into_records()
            .map(|r| {
                let r = r.unwrap();
                (
                    String::from_utf8(r.head().to_vec()).unwrap(),
                    String::from_utf8(r.seq().to_vec()).unwrap(),
                )
            })
            .collect()
    }

    fn split(tmpdir: &TempDir, inputs: Vec<PathBuf>, barcodes: PathBuf) -> Split {
        Split {
            inputs,
            barcodes,
            positions: None,
            trim_left: 0,
            trim_right: 0,
            matching: MatchingArgs { mismatch: 0, drup: false, rc_bc1: false, rc_bc2: false },
            output: OutputArgs {
                output: tmpdir.path().join("out"),
                splitn: 1,
                no_gzip: true,
                threads: 2,
                compression_level: 5,
            },
        }
    }

    #[test]
    fn test_split_end_to_end() {
        let tmpdir = TempDir::new().unwrap();
        let inputs = vec![
            fastq_file(&tmpdir, "a", &["NNNNACGTAAAA", "TTTTTTTTTTTT"]),
            fastq_file(&tmpdir, "b", &["CCCCGGGGCCCC", "NNNNACGTCCCC"]),
        ];
        let barcodes = table_file(&tmpdir, "barcodes.txt", &["S1 ACGT 5", "S2 GGGG 5"]);
        let mut cmd = split(&tmpdir, inputs, barcodes);
        cmd.matching.drup = true;
        cmd.execute().unwrap();

        let out = tmpdir.path().join("out");
        assert_eq!(
            read_records(&out.join("S1_b2_00001.fq")),
            vec![
                ("a_0 barcode:ACGT,part:1,pos:9-12".to_owned(), "AAAA".to_owned()),
                ("b_1 barcode:ACGT,part:1,pos:9-12".to_owned(), "CCCC".to_owned()),
            ]
        );
        assert_eq!(
            read_records(&out.join("S1_b1_00001.fq")),
            vec![
                ("a_0 barcode:,part:1,pos:1-4".to_owned(), "NNNN".to_owned()),
                ("b_1 barcode:,part:1,pos:1-4".to_owned(), "NNNN".to_owned()),
            ]
        );
        assert_eq!(
            read_records(&out.join("S2_b2_00001.fq")),
            vec![("b_0 barcode:GGGG,part:1,pos:9-12".to_owned(), "CCCC".to_owned())]
        );

        let metrics: Vec<SampleMetric> =
            DelimFile::default().read_tsv(&out.join(METRICS_FILE_NAME)).unwrap();
        let counts = metrics.iter().map(|m| (m.sample.as_str(), m.records)).collect::<Vec<_>>();
        assert_eq!(counts, vec![("S1", 2), ("S2", 1), ("Unknown", 1)]);
        assert!((metrics[0].percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_split_gzipped_and_plain_inputs() {
        let tmpdir = TempDir::new().unwrap();
        let inputs = vec![
            write_fastq(&tmpdir, "a", "fq.gz", &["ACGTAAAA", "GGGGCCCC", "ACGTTTTT"]),
            fastq_file(&tmpdir, "b", &["ACGTCCCC"]),
        ];
        let barcodes = table_file(&tmpdir, "barcodes.txt", &["S1 ACGT 1"]);
        split(&tmpdir, inputs, barcodes).execute().unwrap();

        let out = tmpdir.path().join("out");
        assert_eq!(
            read_records(&out.join("S1_b1_00001.fq")),
            vec![
                ("a_0 barcode:ACGT,part:1,pos:1-8".to_owned(), "ACGTAAAA".to_owned()),
                ("a_2 barcode:ACGT,part:1,pos:1-8".to_owned(), "ACGTTTTT".to_owned()),
                ("b_0 barcode:ACGT,part:1,pos:1-8".to_owned(), "ACGTCCCC".to_owned()),
            ]
        );

        let metrics: Vec<SampleMetric> =
            DelimFile::default().read_tsv(&out.join(METRICS_FILE_NAME)).unwrap();
        let counts = metrics.iter().map(|m| (m.sample.as_str(), m.records)).collect::<Vec<_>>();
        assert_eq!(counts, vec![("S1", 3), ("Unknown", 1)]);
    }

    #[test]
    fn test_empty_outputs_are_removed() {
        let tmpdir = TempDir::new().unwrap();
        let inputs = vec![fastq_file(&tmpdir, "a", &["ACGTAAAA", "ACGTCCCC", "ACGTGGGG"])];
        let barcodes = table_file(&tmpdir, "barcodes.txt", &["S1 ACGT 1", "S2 TTTT 1"]);
        let mut cmd = split(&tmpdir, inputs, barcodes);
        cmd.output.splitn = 4;
        cmd.execute().unwrap();

        let out = tmpdir.path().join("out");
        for shard in 1..=3 {
            assert!(out.join(format!("S1_b1_{shard:05}.fq")).exists());
        }
        assert!(!out.join("S1_b1_00004.fq").exists());
        for shard in 1..=4 {
            assert!(!out.join(format!("S2_b1_{shard:05}.fq")).exists());
        }
        assert_eq!(read_records(&out.join("S1_b1_00002.fq"))[0].1, "ACGTCCCC");
    }

    #[test]
    fn test_positions_and_gzipped_output() {
        let tmpdir = TempDir::new().unwrap();
        let inputs = vec![fastq_file(&tmpdir, "a", &["AACCGGTTACGT"])];
        let barcodes = table_file(&tmpdir, "barcodes.txt", &["S1 AACC 1 ACGT 9"]);
        let positions = table_file(&tmpdir, "positions.txt", &["S1 1-2,5-8"]);
        let mut cmd = split(&tmpdir, inputs, barcodes);
        cmd.positions = Some(positions);
        cmd.output.no_gzip = false;
        cmd.execute().unwrap();

        let out = tmpdir.path().join("out");
        assert_eq!(
            read_records(&out.join("S1_b1_p1_00001.fq.gz")),
            vec![("a_0 barcode:AACC,part:1,pos:1-2".to_owned(), "AA".to_owned())]
        );
        assert_eq!(
            read_records(&out.join("S1_b1_p2_00001.fq.gz")),
            vec![("a_0 barcode:AACC,part:2,pos:5-8".to_owned(), "GGTT".to_owned())]
        );
        assert_eq!(
            read_records(&out.join("S1_b2_00001.fq.gz")),
            vec![("a_0 barcode:ACGT,part:1,pos:9-12".to_owned(), "ACGT".to_owned())]
        );
    }

    #[test]
    fn test_out_of_bounds_positions_fail_before_outputs_are_created() {
        let tmpdir = TempDir::new().unwrap();
        let inputs = vec![fastq_file(&tmpdir, "a", &["AACCGGTTACGT"])];
        let barcodes = table_file(&tmpdir, "barcodes.txt", &["S1 AACC 1 ACGT 9"]);
        let positions = table_file(&tmpdir, "positions.txt", &["S1 1-9"]);
        let mut cmd = split(&tmpdir, inputs, barcodes);
        cmd.positions = Some(positions);

        let err = cmd.execute().unwrap_err();
        assert!(err.to_string().contains("lies outside the barcode's slot 1-8"), "{err}");
        let out = tmpdir.path().join("out");
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    #[should_panic(expected = "doesn't exist")]
    fn test_missing_input_fails() {
        let tmpdir = TempDir::new().unwrap();
        let barcodes = table_file(&tmpdir, "barcodes.txt", &["S1 ACGT 1"]);
        let cmd = split(&tmpdir, vec![tmpdir.path().join("missing.fq")], barcodes);
        cmd.execute().unwrap();
    }

    #[test]
    #[should_panic(expected = "The number of output splits must be at least 1")]
    fn test_zero_splits_fails() {
        let tmpdir = TempDir::new().unwrap();
        let inputs = vec![fastq_file(&tmpdir, "a", &["ACGT"])];
        let barcodes = table_file(&tmpdir, "barcodes.txt", &["S1 ACGT 1"]);
        let mut cmd = split(&tmpdir, inputs, barcodes);
        cmd.output.splitn = 0;
        cmd.execute().unwrap();
    }

    #[test]
    #[should_panic(expected = "declared more than once")]
    fn test_bad_barcode_table_fails() {
        let tmpdir = TempDir::new().unwrap();
        let inputs = vec![fastq_file(&tmpdir, "a", &["ACGT"])];
        let barcodes = table_file(&tmpdir, "barcodes.txt", &["S1 ACGT 1", "S1 TTTT 1"]);
        split(&tmpdir, inputs, barcodes).execute().unwrap();
    }
}
