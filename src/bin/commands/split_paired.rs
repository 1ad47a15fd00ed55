use crate::commands::command::Command;
use crate::commands::common::{
    MatchingArgs, OutputArgs, check_inputs_exist, close_outputs, progress_logger, read_fastq,
    report, report_constraint_errors,
};
use anyhow::{Result, bail};
use clap::Parser;
use fqsplit_lib::barcode_spec::SpecOptions;
use fqsplit_lib::layout::paired_paths;
use fqsplit_lib::paired::{PairedBarcodeTable, PairedDemultiplexer};
use log::{debug, info};
use std::path::PathBuf;
use std::time::Instant;

/// Splits paired FASTQs by barcodes at the start of both reads.
///
/// Each line of the barcode table names a sample and one or two barcodes:
///
/// ```
/// S1  ACGTACGT  TTGCATGC
/// S2  GGATCCAA
/// ```
///
/// A pair belongs to the first sample, in table order, with a barcode matching the start of
/// read one, provided read two also starts with one of that sample's barcodes.  Both reads
/// are written with their headers unchanged to `<output>/<sample>.R1.fq.gz` and
/// `<output>/<sample>.R2.fq.gz`, with a `_<split>` suffix added when `--splitn` is above 1.
///
/// Read one and read two inputs are paired up in the order given and must hold the same
/// number of records.
#[derive(Parser, Debug)]
#[command(version)]
#[clap(verbatim_doc_comment)]
pub(crate) struct SplitPaired {
    /// One or more read one FASTQ files, plain or gzipped.
    #[clap(long, short = 'i', required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,

    /// The read two FASTQ files, one per read one file and in the same order.
    #[clap(long = "Input", short = 'I', required = true, num_args = 1..)]
    second_inputs: Vec<PathBuf>,

    /// The barcode table of samples and their barcodes.
    #[clap(long, short = 'b', required = true)]
    barcodes: PathBuf,

    #[clap(flatten)]
    matching: MatchingArgs,

    #[clap(flatten)]
    output: OutputArgs,
}

impl SplitPaired {
    /// Checks that the inputs exist and pair up and that the output options are usable.
    fn validate_inputs(&self) -> Result<()> {
        let mut constraint_errors = vec![];
        if self.inputs.len() != self.second_inputs.len() {
            constraint_errors.push(format!(
                "The same number of read one and read two FASTQs should be given: {} read one \
                 and {} read two FASTQs provided",
                self.inputs.len(),
                self.second_inputs.len()
            ));
        }
        check_inputs_exist(&self.inputs, &mut constraint_errors);
        check_inputs_exist(&self.second_inputs, &mut constraint_errors);
        if !self.barcodes.exists() {
            constraint_errors
                .push(format!("Barcode table {:#?} doesn't exist", self.barcodes));
        }
        self.output.validate(&mut constraint_errors)?;
        report_constraint_errors(constraint_errors)
    }
}

impl Command for SplitPaired {
    fn execute(&self) -> Result<()> {
        let start = Instant::now();
        self.validate_inputs()?;

        let options = SpecOptions {
            reverse_complement_first: self.matching.rc_bc1,
            reverse_complement_second: self.matching.rc_bc2,
            ..SpecOptions::default()
        };
        let table = PairedBarcodeTable::from_file(&self.barcodes, &options)?;
        let names = table.sample_names();
        info!("Loaded {} samples.", names.len());

        let compress = !self.output.no_gzip;
        let paths = paired_paths(&self.output.output, &names, self.output.splitn, compress);
        let (router, pool) = self.output.open_outputs(paths)?;
        let mut demux =
            PairedDemultiplexer::new(&table, self.matching.mismatch, self.matching.drup, router)?;

        let logger = progress_logger("read pairs");
        for (first_path, second_path) in self.inputs.iter().zip(self.second_inputs.iter()) {
            info!("Reading {first_path:?} and {second_path:?}");
            let mut firsts = read_fastq(first_path)?;
            let mut seconds = read_fastq(second_path)?;
            loop {
                match (firsts.next(), seconds.next()) {
                    (Some(first), Some(second)) => {
                        demux.process(&first?, &second?)?;
                        logger.record();
                    }
                    (None, None) => break,
                    _ => bail!(
                        "FASTQ sources out of sync: {first_path:?} and {second_path:?} hold \
                         different numbers of records"
                    ),
                }
            }
        }
        info!("Finished reading input FASTQs.");

        let (stats, router) = demux.finish();
        for (sample, name) in names.iter().enumerate() {
            debug!(
                "Sample {name}: {} read one and {} read two records",
                stats.emitted(2 * sample),
                stats.emitted(2 * sample + 1)
            );
        }
        let written = close_outputs(router, pool)?;
        info!("Wrote {} non-empty output files.", written.len());

        report(&self.output.output, &stats.summary(&names), start.elapsed())
    }
}
