//! Loading of the barcode table and the optional position-override table.
//!
//! A barcode table line has the form:
//!
//! ```text
//! <sample> <barcode1> <pos1> [<barcode2> <pos2> ...]
//! ```
//!
//! where each `pos` is the 1-based read position at which that barcode's segment begins.  A
//! segment extends up to the next barcode's position, and the final segment runs to the end of
//! the read.  When the first barcode does not begin at position 1 an unnamed leading segment
//! covering the skipped bases is added ahead of it.
//!
//! An override table line has the form:
//!
//! ```text
//! <sample> <ranges-for-slot1> <ranges-for-slot2> ...
//! ```
//!
//! where each group is a comma-separated list of 1-based inclusive `start-end` ranges, and an
//! end that is omitted, zero or negative means "to the end of the read".  Groups are assigned
//! to the sample's slots in order, counting any unnamed leading slot.
//!
//! Both tables ignore blank lines and lines starting with `#`.

use crate::is_valid_base;
use crate::reverse_complement;
use crate::span::Span;
use ahash::HashMap as AHashMap;
use ahash::HashMapExt;
use bstr::ByteSlice;
use fgoxide::io::Io;
use itertools::Itertools;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading the barcode and override tables.  All are fatal.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Could not read {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: fgoxide::FgError,
    },

    #[error("{table} line {line}: {message}")]
    Malformed { table: &'static str, line: usize, message: String },

    #[error(
        "Override range {range} for sample '{sample}', barcode '{barcode}' lies outside the \
         barcode's slot {slot}"
    )]
    OutOfBounds { sample: String, barcode: String, range: Span, slot: Span },

    #[error("No samples found in the barcode table")]
    Empty,
}

/// Options that alter how declared positions are turned into output regions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SpecOptions {
    /// Remove each matched barcode from the emitted sequence.
    pub drup: bool,
    /// Bases removed from the start of the first slot's output.
    pub trim_left: usize,
    /// Bases removed from the end of the last slot's output.
    pub trim_right: usize,
    /// Reverse complement the first declared barcode of every sample.
    pub reverse_complement_first: bool,
    /// Reverse complement the second declared barcode of every sample.
    pub reverse_complement_second: bool,
}

/// One region of a read belonging to a sample, expected to hold a barcode or, when the
/// barcode is empty, bases that are skipped during matching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarcodeSlot {
    /// The upper-cased barcode literal; empty for an unnamed skipped region.
    pub barcode: Vec<u8>,
    /// The slot's bounds in the read.  Matching starts at `bounds.start()`.
    pub bounds: Span,
    /// The region emitted by default, after drup and trimming are applied.
    pub output: Span,
    /// The regions emitted for this slot, one derived record per part.
    pub parts: Vec<Span>,
    /// Index of the output bucket used by this slot's first part.  Part `i` uses
    /// `first_bucket + i`.
    pub first_bucket: usize,
}

impl BarcodeSlot {
    /// The barcode as a string, for naming and logging.
    #[must_use]
    pub fn barcode_str(&self) -> String {
        self.barcode.to_str_lossy().into_owned()
    }
}

/// A sample and its ordered barcode slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    /// The unique name of the sample.
    pub name: String,
    /// Declaration order of the sample within the barcode table.
    pub ordinal: usize,
    /// The slots in read order.
    pub slots: Vec<BarcodeSlot>,
}

impl Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self
            .slots
            .iter()
            .map(|s| format!("{}@{}", s.barcode_str(), s.bounds))
            .join(" ");
        write!(f, "Sample({:04}) - {{ name: {}\tslots: {} }}", self.ordinal, self.name, slots)
    }
}

/// Identifies an output bucket: one part of one slot of one sample.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub sample: usize,
    pub slot: usize,
    pub part: usize,
}

/// The immutable barcode specification for a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarcodeSpec {
    /// Samples in declaration order.  Matching relies on this order.
    pub samples: Vec<Sample>,
    num_buckets: usize,
}

impl Display for BarcodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BarcodeSpec {{")?;
        for sample in &self.samples {
            writeln!(f, "    {sample}")?;
        }
        writeln!(f, "}}")
    }
}

/// A barcode table line after parsing but before slots are derived.
struct DeclaredSample {
    line: usize,
    name: String,
    /// (barcode, 1-based position) pairs in declaration order
    barcodes: Vec<(Vec<u8>, usize)>,
}

pub(crate) const BARCODE_TABLE: &str = "Barcode table";
const OVERRIDE_TABLE: &str = "Override table";

/// Yields (1-based line number, trimmed line) for every line that is not blank or a comment.
pub(crate) fn content_lines(lines: &[String]) -> impl Iterator<Item = (usize, &str)> {
    lines
        .iter()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
}

pub(crate) fn malformed(table: &'static str, line: usize, message: String) -> SpecError {
    SpecError::Malformed { table, line, message }
}

/// Sample names become output file names, so they must not leave the output directory.
pub(crate) fn check_sample_name(
    table: &'static str,
    line: usize,
    name: &str,
) -> Result<(), SpecError> {
    if name == "." || name.contains("..") || name.contains(['/', '\\']) {
        return Err(malformed(
            table,
            line,
            format!("sample name '{name}' must not contain path separators or '..'"),
        ));
    }
    Ok(())
}

impl BarcodeSpec {
    /// Reads the barcode table and, if given, the override table, and builds the spec.
    ///
    /// # Errors
    /// - If either file cannot be read.
    /// - If any line in either table is malformed, or an override lies outside its slot.
    pub fn from_files<P: AsRef<Path>>(
        barcodes: &P,
        overrides: Option<&P>,
        options: &SpecOptions,
    ) -> Result<Self, SpecError> {
        let io = Io::default();
        let read = |p: &P| {
            io.read_lines(p)
                .map_err(|source| SpecError::Unreadable { path: p.as_ref().to_path_buf(), source })
        };
        let barcode_lines = read(barcodes)?;
        let override_lines = overrides.map(read).transpose()?;
        Self::from_lines(&barcode_lines, override_lines.as_deref(), options)
    }

    /// Builds the spec from the lines of the barcode table and optional override table.
    ///
    /// # Errors
    /// - If any line in either table is malformed, or an override lies outside its slot.
    pub fn from_lines(
        barcode_lines: &[String],
        override_lines: Option<&[String]>,
        options: &SpecOptions,
    ) -> Result<Self, SpecError> {
        let declared = content_lines(barcode_lines)
            .map(|(line, text)| Self::parse_barcode_line(line, text))
            .collect::<Result<Vec<_>, _>>()?;

        if declared.is_empty() {
            return Err(SpecError::Empty);
        }

        let mut ordinals: AHashMap<&str, usize> = AHashMap::with_capacity(declared.len());
        for (ordinal, d) in declared.iter().enumerate() {
            if ordinals.insert(d.name.as_str(), ordinal).is_some() {
                return Err(malformed(
                    BARCODE_TABLE,
                    d.line,
                    format!("sample '{}' is declared more than once", d.name),
                ));
            }
        }

        let mut overrides: Vec<Option<Vec<Vec<Span>>>> = vec![None; declared.len()];
        for (line, text) in content_lines(override_lines.unwrap_or_default()) {
            let (name, groups) = Self::parse_override_line(line, text)?;
            let Some(&ordinal) = ordinals.get(name) else {
                return Err(malformed(
                    OVERRIDE_TABLE,
                    line,
                    format!("sample '{name}' is not in the barcode table"),
                ));
            };
            if overrides[ordinal].replace(groups).is_some() {
                return Err(malformed(
                    OVERRIDE_TABLE,
                    line,
                    format!("sample '{name}' has more than one override line"),
                ));
            }
        }

        let mut next_bucket = 0;
        let mut samples = Vec::with_capacity(declared.len());
        for (ordinal, (d, groups)) in declared.into_iter().zip(overrides).enumerate() {
            let sample = Self::build_sample(ordinal, d, groups, options, &mut next_bucket)?;
            samples.push(sample);
        }

        Ok(Self { samples, num_buckets: next_bucket })
    }

    /// Parses one barcode table line into a sample name and its (barcode, position) pairs.
    fn parse_barcode_line(line: usize, text: &str) -> Result<DeclaredSample, SpecError> {
        let mut fields = text.split_whitespace();
        let name = fields.next().unwrap_or_default().to_owned();
        check_sample_name(BARCODE_TABLE, line, &name)?;
        let rest = fields.collect_vec();

        if rest.is_empty() || rest.len() % 2 != 0 {
            return Err(malformed(
                BARCODE_TABLE,
                line,
                format!("expected '<sample> <barcode> <position> ...' but found '{text}'"),
            ));
        }

        let mut barcodes = Vec::with_capacity(rest.len() / 2);
        for (barcode, pos) in rest.into_iter().tuples() {
            if !barcode.bytes().all(is_valid_base) {
                return Err(malformed(
                    BARCODE_TABLE,
                    line,
                    format!("barcode '{barcode}' must contain only A, C, G, T or N"),
                ));
            }
            let pos: usize = pos.parse().map_err(|_| {
                malformed(BARCODE_TABLE, line, format!("position '{pos}' is not a number"))
            })?;
            if pos == 0 {
                return Err(malformed(
                    BARCODE_TABLE,
                    line,
                    format!("position for barcode '{barcode}' must be 1 or greater"),
                ));
            }
            barcodes.push((barcode.to_ascii_uppercase().into_bytes(), pos));
        }

        if barcodes.iter().tuple_windows().any(|((_, a), (_, b))| b < a) {
            return Err(malformed(
                BARCODE_TABLE,
                line,
                format!("barcode positions for sample '{name}' must not decrease"),
            ));
        }

        Ok(DeclaredSample { line, name, barcodes })
    }

    /// Parses one override table line into a sample name and one group of spans per slot.
    fn parse_override_line(line: usize, text: &str) -> Result<(&str, Vec<Vec<Span>>), SpecError> {
        let mut fields = text.split_whitespace();
        let name = fields.next().unwrap_or_default();
        let groups = fields
            .map(|group| {
                group
                    .split(',')
                    .map(|range| {
                        parse_range(range).ok_or_else(|| {
                            malformed(OVERRIDE_TABLE, line, format!("invalid range '{range}'"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        if groups.is_empty() {
            return Err(malformed(
                OVERRIDE_TABLE,
                line,
                format!("expected '<sample> <ranges> ...' but found '{text}'"),
            ));
        }
        Ok((name, groups))
    }

    /// Derives the slots of one sample, applying options and any overrides.
    fn build_sample(
        ordinal: usize,
        declared: DeclaredSample,
        overrides: Option<Vec<Vec<Span>>>,
        options: &SpecOptions,
        next_bucket: &mut usize,
    ) -> Result<Sample, SpecError> {
        let DeclaredSample { line, name, barcodes } = declared;

        let mut slots: Vec<(Vec<u8>, Span)> = Vec::with_capacity(barcodes.len() + 1);
        let first_start = barcodes[0].1 - 1;
        if first_start > 0 {
            slots.push((Vec::new(), Span::Bounded { start: 0, end: first_start }));
        }
        for (i, (barcode, pos)) in barcodes.iter().enumerate() {
            let start = pos - 1;
            let bounds = match barcodes.get(i + 1) {
                Some((_, next)) => Span::Bounded { start, end: next - 1 },
                None => Span::ToEnd { start, trim: 0 },
            };
            let barcode = match i {
                0 if options.reverse_complement_first => reverse_complement(barcode),
                1 if options.reverse_complement_second => reverse_complement(barcode),
                _ => barcode.clone(),
            };
            slots.push((barcode, bounds));
        }

        let mut groups = overrides.unwrap_or_default();
        if groups.len() > slots.len() {
            return Err(malformed(
                OVERRIDE_TABLE,
                line,
                format!(
                    "sample '{name}' has {} override groups but only {} barcode slots",
                    groups.len(),
                    slots.len()
                ),
            ));
        }
        groups.resize(slots.len(), Vec::new());

        let last = slots.len() - 1;
        let mut built = Vec::with_capacity(slots.len());
        for (index, ((barcode, bounds), group)) in slots.into_iter().zip(groups).enumerate() {
            let mut output = bounds;
            if options.drup {
                output = output.shift_start(barcode.len());
            }
            if index == 0 {
                output = output.shift_start(options.trim_left);
            }
            if index == last {
                output = output.trim_end(options.trim_right);
            }

            if let Some(range) = group.iter().find(|r| !bounds.contains(r)) {
                return Err(SpecError::OutOfBounds {
                    sample: name,
                    barcode: barcode.to_str_lossy().into_owned(),
                    range: *range,
                    slot: bounds,
                });
            }
            let parts = if group.is_empty() { vec![output] } else { group };

            let first_bucket = *next_bucket;
            *next_bucket += parts.len();
            built.push(BarcodeSlot { barcode, bounds, output, parts, first_bucket });
        }

        Ok(Sample { name, ordinal, slots: built })
    }

    /// The total number of (sample, slot, part) output buckets.
    #[must_use]
    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    /// Iterates all output buckets in bucket-index order.
    pub fn buckets(&self) -> impl Iterator<Item = BucketKey> + '_ {
        self.samples.iter().enumerate().flat_map(|(sample, s)| {
            s.slots.iter().enumerate().flat_map(move |(slot, sl)| {
                (0..sl.parts.len()).map(move |part| BucketKey { sample, slot, part })
            })
        })
    }

    /// The names of the samples in declaration order.
    #[must_use]
    pub fn sample_names(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.name.clone()).collect()
    }
}

/// Parses a single 1-based inclusive range: `start-end`, `start-`, `start`, `start-0` or
/// `start--1`.  Returns `None` if the range is not well formed.
fn parse_range(text: &str) -> Option<Span> {
    let (start, end) = match text.split_once('-') {
        Some((start, end)) => (start, end),
        None => (text, ""),
    };
    let start: usize = start.trim().parse().ok()?;
    if start == 0 {
        return None;
    }
    let end: i64 = if end.trim().is_empty() { 0 } else { end.trim().parse().ok()? };

    if end <= 0 {
        Some(Span::ToEnd { start: start - 1, trim: 0 })
    } else {
        let end = usize::try_from(end).ok()?;
        if end < start {
            return None;
        }
        Some(Span::Bounded { start: start - 1, end })
    }
}
