use crate::barcode_matching::BarcodeMatcher;
use crate::barcode_spec::BarcodeSpec;
use crate::extract::extract;
use crate::router::Router;
use crate::stats::RunStats;
use anyhow::{Result, ensure};
use seq_io::fastq::Record;
use std::io::Write;

/// Drives matching, extraction and routing for a stream of single-read records.
///
/// Records are processed one at a time, in the order given.  The barcode spec is only read; the
/// router's rotation counters and the run statistics are the only state that changes.
pub struct Demultiplexer<'a, W: Write> {
    spec: &'a BarcodeSpec,
    matcher: BarcodeMatcher<'a>,
    router: Router<W>,
    stats: RunStats,
}

impl<'a, W: Write> Demultiplexer<'a, W> {
    /// Creates a demultiplexer writing to `router`, which must have one bucket per
    /// (sample, slot, part) of `spec`.
    ///
    /// # Errors
    /// - If the router's bucket count differs from the spec's.
    pub fn new(spec: &'a BarcodeSpec, max_mismatches: usize, router: Router<W>) -> Result<Self> {
        ensure!(
            router.num_buckets() == spec.num_buckets(),
            "Router has {} output buckets but the barcode spec needs {}",
            router.num_buckets(),
            spec.num_buckets()
        );
        Ok(Self {
            spec,
            matcher: BarcodeMatcher::new(spec, max_mismatches),
            router,
            stats: RunStats::new(spec.samples.len(), spec.num_buckets()),
        })
    }

    /// Matches `record` to a sample and, if one matches, writes a derived record for every
    /// part of every slot of that sample.  Returns the matched sample's index.
    ///
    /// # Errors
    /// - If writing any derived record fails.
    pub fn process<R: Record>(&mut self, record: &R) -> Result<Option<usize>> {
        self.stats.record_read();
        let Some(sample) = self.matcher.assign(record.seq()) else {
            return Ok(None);
        };

        self.stats.record_match(sample);
        for derived in extract(&self.spec.samples[sample], record) {
            self.router.route(derived.bucket, &derived.record)?;
            self.stats.record_emitted(derived.bucket);
        }
        Ok(Some(sample))
    }

    /// Ends the run, handing back the statistics and the router for closing.
    #[must_use]
    pub fn finish(self) -> (RunStats, Router<W>) {
        (self.stats, self.router)
    }
}
