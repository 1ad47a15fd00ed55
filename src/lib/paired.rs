//! Demultiplexing of paired reads, where read one carries one of a sample's barcodes at its
//! start and read two carries one of the same sample's barcodes at its start.
//!
//! The barcode table has one line per sample:
//!
//! ```text
//! <sample> <barcode1> [<barcode2>]
//! ```

use crate::barcode_matching::count_mismatches_within;
use crate::barcode_spec::{
    BARCODE_TABLE, SpecError, SpecOptions, check_sample_name, content_lines, malformed,
};
use crate::router::Router;
use crate::stats::RunStats;
use crate::{is_valid_base, reverse_complement};
use ahash::HashSet as AHashSet;
use ahash::HashSetExt;
use anyhow::{Result, ensure};
use fgoxide::io::Io;
use seq_io::fastq::{OwnedRecord, Record};
use std::io::Write;
use std::path::Path;

/// A sample with the one or two barcodes its reads may start with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairedSample {
    pub name: String,
    /// Upper-cased barcodes in column order, after any reverse complementing.
    pub barcodes: Vec<Vec<u8>>,
}

/// The samples of a paired run in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairedBarcodeTable {
    pub samples: Vec<PairedSample>,
}

impl PairedBarcodeTable {
    /// Reads the barcode table from `path`.
    ///
    /// # Errors
    /// - If the file cannot be read or any line is malformed.
    pub fn from_file<P: AsRef<Path>>(path: &P, options: &SpecOptions) -> Result<Self, SpecError> {
        let lines = Io::default().read_lines(path).map_err(|source| SpecError::Unreadable {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Self::from_lines(&lines, options)
    }

    /// Builds the table from its lines, skipping blanks and `#` comments.  Only the reverse
    /// complement options are used from `options`.
    ///
    /// # Errors
    /// - If any line does not hold a sample and one or two barcodes, a barcode contains
    ///   anything but A, C, G, T or N, or a sample is declared twice.
    /// - If a sample name contains a path separator or `..`.
    pub fn from_lines(lines: &[String], options: &SpecOptions) -> Result<Self, SpecError> {
        let mut seen = AHashSet::new();
        let mut samples = Vec::new();
        for (line, text) in content_lines(lines) {
            let fields: Vec<&str> = text.split_whitespace().collect();
            if !(2..=3).contains(&fields.len()) {
                return Err(malformed(
                    BARCODE_TABLE,
                    line,
                    format!("expected '<sample> <barcode1> [<barcode2>]' but found '{text}'"),
                ));
            }

            let name = fields[0].to_owned();
            check_sample_name(BARCODE_TABLE, line, &name)?;
            if !seen.insert(name.clone()) {
                return Err(malformed(
                    BARCODE_TABLE,
                    line,
                    format!("sample '{name}' is declared more than once"),
                ));
            }

            let mut barcodes = Vec::with_capacity(2);
            for (column, barcode) in fields[1..].iter().enumerate() {
                if barcode.is_empty() || !barcode.bytes().all(is_valid_base) {
                    return Err(malformed(
                        BARCODE_TABLE,
                        line,
                        format!("barcode '{barcode}' must contain only A, C, G, T or N"),
                    ));
                }
                let bases = barcode.to_ascii_uppercase().into_bytes();
                let flip = match column {
                    0 => options.reverse_complement_first,
                    _ => options.reverse_complement_second,
                };
                barcodes.push(if flip { reverse_complement(&bases) } else { bases });
            }
            samples.push(PairedSample { name, barcodes });
        }

        if samples.is_empty() {
            return Err(SpecError::Empty);
        }
        Ok(Self { samples })
    }

    #[must_use]
    pub fn sample_names(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.name.clone()).collect()
    }

    /// Two output buckets per sample: read one at `2 * sample`, read two right after.
    #[must_use]
    pub fn num_buckets(&self) -> usize {
        self.samples.len() * 2
    }
}

/// The result of matching a pair: the sample, and the barcodes read one and read two matched.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PairedMatch<'a> {
    pub sample: usize,
    pub first: &'a [u8],
    pub second: &'a [u8],
}

/// Matches pairs of reads against a [`PairedBarcodeTable`].
#[derive(Clone, Debug)]
pub struct PairedMatcher<'a> {
    table: &'a PairedBarcodeTable,
    max_mismatches: usize,
}

impl<'a> PairedMatcher<'a> {
    #[must_use]
    pub fn new(table: &'a PairedBarcodeTable, max_mismatches: usize) -> Self {
        Self { table, max_mismatches }
    }

    fn first_match<'b>(&self, barcodes: &'b [Vec<u8>], bases: &[u8]) -> Option<&'b [u8]> {
        barcodes
            .iter()
            .find(|bc| count_mismatches_within(bases, 0, bc, self.max_mismatches).is_some())
            .map(Vec::as_slice)
    }

    /// Finds the first sample with a barcode matching the start of read one, then requires
    /// read two to start with one of that same sample's barcodes.  Later samples are not
    /// tried when read two fails.
    #[must_use]
    pub fn assign(&self, first_bases: &[u8], second_bases: &[u8]) -> Option<PairedMatch<'a>> {
        let table = self.table;
        let (sample, first) = table.samples.iter().enumerate().find_map(|(i, s)| {
            self.first_match(&s.barcodes, first_bases).map(|bc| (i, bc))
        })?;
        let second = self.first_match(&table.samples[sample].barcodes, second_bases)?;
        Some(PairedMatch { sample, first, second })
    }
}

/// Copies `record`, dropping the first `drop` bases (or all of them, for a shorter read).
fn drop_prefix<R: Record>(record: &R, drop: usize) -> OwnedRecord {
    let drop = drop.min(record.seq().len());
    OwnedRecord {
        head: record.head().to_vec(),
        seq: record.seq()[drop..].to_vec(),
        qual: record.qual()[drop..].to_vec(),
    }
}

/// Drives matching and routing for a stream of read pairs.
pub struct PairedDemultiplexer<'a, W: Write> {
    matcher: PairedMatcher<'a>,
    drup: bool,
    router: Router<W>,
    stats: RunStats,
}

impl<'a, W: Write> PairedDemultiplexer<'a, W> {
    /// # Errors
    /// - If the router does not have two buckets per sample.
    pub fn new(
        table: &'a PairedBarcodeTable,
        max_mismatches: usize,
        drup: bool,
        router: Router<W>,
    ) -> Result<Self> {
        ensure!(
            router.num_buckets() == table.num_buckets(),
            "Router has {} output buckets but {} samples need {}",
            router.num_buckets(),
            table.samples.len(),
            table.num_buckets()
        );
        Ok(Self {
            matcher: PairedMatcher::new(table, max_mismatches),
            drup,
            router,
            stats: RunStats::new(table.samples.len(), table.num_buckets()),
        })
    }

    /// Matches a pair and, on success, writes both reads to the matched sample's outputs with
    /// headers unchanged.  Returns the matched sample's index.
    ///
    /// # Errors
    /// - If writing either read fails.
    pub fn process<R: Record>(&mut self, first: &R, second: &R) -> Result<Option<usize>> {
        self.stats.record_read();
        let Some(found) = self.matcher.assign(first.seq(), second.seq()) else {
            return Ok(None);
        };

        let (drop1, drop2) =
            if self.drup { (found.first.len(), found.second.len()) } else { (0, 0) };
        self.stats.record_match(found.sample);
        for (mate, record) in [drop_prefix(first, drop1), drop_prefix(second, drop2)]
            .into_iter()
            .enumerate()
        {
            let bucket = found.sample * 2 + mate;
            self.router.route(bucket, &record)?;
            self.stats.record_emitted(bucket);
        }
        Ok(Some(found.sample))
    }

    #[must_use]
    pub fn finish(self) -> (RunStats, Router<W>) {
        (self.stats, self.router)
    }
}
