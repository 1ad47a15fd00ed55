use anyhow::{Context, Result, anyhow};
use clap::Args;
use fgoxide::io::{DelimFile, Io};
use fgoxide::iter::IntoChunkedReadAheadIterator;
use fqsplit_lib::cleanup::remove_empty_outputs;
use fqsplit_lib::router::{Router, ShardSummary};
use fqsplit_lib::stats::Summary;
use log::info;
use pooled_writer::{Pool, PoolBuilder, PooledWriter, bgzf::BgzfCompressor};
use proglog::{CountFormatterKind, ProgLog, ProgLogBuilder};
use seq_io::fastq::OwnedRecord;
use seq_io::fastq::Reader as FastqReader;
use std::fs::{self, File};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Buffer size used when opening BufReads for input files
const BUFFER_SIZE: usize = 64 * 1024;

/// Name of the per-sample metrics file written into the output directory
pub(crate) const METRICS_FILE_NAME: &str = "demux_metrics.tsv";

/// Options controlling how reads are matched to samples.
#[derive(Args, Debug, Clone)]
pub(crate) struct MatchingArgs {
    /// Maximum mismatches allowed in each barcode for a read to match a sample.
    #[clap(long, short = 'm', default_value = "0")]
    pub(crate) mismatch: usize,

    /// Remove the matched barcode bases from the output reads.
    #[clap(long, short = 'd')]
    pub(crate) drup: bool,

    /// Reverse complement the first barcode of every sample before matching.
    #[clap(long)]
    pub(crate) rc_bc1: bool,

    /// Reverse complement the second barcode of every sample before matching.
    #[clap(long)]
    pub(crate) rc_bc2: bool,
}

/// Options controlling where and how output FASTQs are written.
#[derive(Args, Debug, Clone)]
pub(crate) struct OutputArgs {
    /// The output directory, created if it does not exist.
    #[clap(long, short = 'o', required = true)]
    pub(crate) output: PathBuf,

    /// The number of output files each bucket's records are spread over, round-robin.
    #[clap(long, short = 's', default_value = "1")]
    pub(crate) splitn: usize,

    /// Write plain rather than block-gzipped FASTQ.
    #[clap(long, short = 'n')]
    pub(crate) no_gzip: bool,

    /// The number of threads to use for compressing output.
    #[clap(long, short = 't', default_value = "4")]
    pub(crate) threads: usize,

    /// The level of compression to use to compress outputs.
    #[clap(long, short = 'c', default_value = "5")]
    pub(crate) compression_level: u8,
}

/// Adds an error to `constraint_errors` for every input that does not exist.
pub(crate) fn check_inputs_exist(inputs: &[PathBuf], constraint_errors: &mut Vec<String>) {
    for input in inputs {
        if !input.exists() {
            constraint_errors.push(format!("Provided input file {input:#?} doesn't exist"));
        }
    }
}

/// Fails with every collected constraint error, or succeeds if there are none.
pub(crate) fn report_constraint_errors(constraint_errors: Vec<String>) -> Result<()> {
    if constraint_errors.is_empty() {
        return Ok(());
    }
    let mut details = "Inputs failed validation!\n".to_owned();
    for error_reason in constraint_errors {
        details.push_str(&format!("    - {error_reason}\n"));
    }
    Err(anyhow!("The following errors with the input(s) were detected:\n{details}"))
}

/// Opens a FASTQ at `path`, which may be plain or gzipped, and returns a read-ahead iterator
/// over its records.
pub(crate) fn read_fastq(
    path: &Path,
) -> Result<impl Iterator<Item = Result<OwnedRecord, seq_io::fastq::Error>>> {
    let fgio = Io::new(5, BUFFER_SIZE);
    let reader: Box<dyn BufRead + Send> = fgio
        .new_reader(&path)
        .with_context(|| format!("Could not open {path:?} for reading"))?;
    Ok(FastqReader::with_capacity(reader, BUFFER_SIZE).into_records().read_ahead(128, 48))
}

/// A progress logger reporting every five million records.
pub(crate) fn progress_logger(noun: &'static str) -> ProgLog {
    ProgLogBuilder::new()
        .name("fqsplit")
        .noun(noun)
        .verb("read")
        .unit(5_000_000)
        .count_formatter(CountFormatterKind::Comma)
        .level(log::Level::Info)
        .build()
}

/// An output FASTQ, either block-gzipped through the writer pool or written as plain text.
pub(crate) enum FastqWriter {
    Bgzf(PooledWriter),
    Plain(BufWriter<File>),
}

impl FastqWriter {
    /// Flushes and closes the writer.
    fn close(self) -> io::Result<()> {
        match self {
            FastqWriter::Bgzf(writer) => writer.close(),
            FastqWriter::Plain(mut writer) => writer.flush(),
        }
    }
}

impl Write for FastqWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FastqWriter::Bgzf(writer) => writer.write(buf),
            FastqWriter::Plain(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FastqWriter::Bgzf(writer) => writer.flush(),
            FastqWriter::Plain(writer) => writer.flush(),
        }
    }
}

impl OutputArgs {
    /// Adds any problems with the output options to `constraint_errors`, creating the output
    /// directory if needed.
    pub(crate) fn validate(&self, constraint_errors: &mut Vec<String>) -> Result<()> {
        if self.splitn == 0 {
            constraint_errors.push("The number of output splits must be at least 1".to_owned());
        }
        if !self.no_gzip && self.threads == 0 {
            constraint_errors.push("At least one thread is needed to compress output".to_owned());
        }

        if !self.output.exists() {
            info!("Output directory {:#?} didn't exist, creating it.", self.output);
            fs::create_dir_all(&self.output)?;
        }
        if self.output.metadata()?.permissions().readonly() {
            constraint_errors
                .push(format!("Output directory {:#?} cannot be read-only", self.output));
        }
        Ok(())
    }

    /// Creates every output file up front and wraps them in a [`Router`].  When compressing,
    /// the files are exchanged into a block-gzip writer pool, which is returned alongside.
    pub(crate) fn open_outputs(
        &self,
        paths: Vec<Vec<PathBuf>>,
    ) -> Result<(Router<FastqWriter>, Option<Pool>)> {
        let create = |path: &Path| -> Result<BufWriter<File>> {
            let file = File::create(path)
                .with_context(|| format!("Could not create output file {path:?}"))?;
            Ok(BufWriter::new(file))
        };

        if self.no_gzip {
            let router = Router::open(paths, |p| Ok(FastqWriter::Plain(create(p)?)))?;
            return Ok((router, None));
        }

        let mut pool_builder = PoolBuilder::<_, BgzfCompressor>::new()
            .threads(self.threads)
            .queue_size(self.threads * 50)
            .compression_level(self.compression_level)?;
        let router =
            Router::open(paths, |p| Ok(FastqWriter::Bgzf(pool_builder.exchange(create(p)?))))?;
        let pool = pool_builder.build()?;
        Ok((router, Some(pool)))
    }
}

/// Closes every output, shuts down the pool and removes outputs that received no records.
/// Returns the files that remain.
pub(crate) fn close_outputs(
    router: Router<FastqWriter>,
    pool: Option<Pool>,
) -> Result<Vec<ShardSummary>> {
    let summaries = router.close(FastqWriter::close)?;
    if let Some(mut pool) = pool {
        pool.stop_pool()?;
    }
    info!("Output FASTQ writing complete.");

    let removed = remove_empty_outputs(&summaries)?;
    info!("Removed {removed} output files that received no records.");
    Ok(summaries.into_iter().filter(|s| s.records > 0).collect())
}

/// Writes the metrics file and prints the summary and elapsed time to standard output.
pub(crate) fn report(output: &Path, summary: &Summary, elapsed: Duration) -> Result<()> {
    let metrics_path = output.join(METRICS_FILE_NAME);
    DelimFile::default().write_tsv(&metrics_path, &summary.rows)?;
    info!("Wrote per-sample metrics to {metrics_path:?}");

    println!();
    print!("{summary}");
    println!("\nElapsed time: {:.3} sec.", elapsed.as_secs_f64());
    Ok(())
}
