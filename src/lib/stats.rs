use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Name used in summaries for reads that matched no sample.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Counters accumulated over a run.
///
/// Every record read increments `total`.  A record that matches a sample increments that
/// sample's counter once, and each derived record written increments its bucket's counter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    total: u64,
    per_sample: Vec<u64>,
    per_bucket: Vec<u64>,
}

impl RunStats {
    #[must_use]
    pub fn new(num_samples: usize, num_buckets: usize) -> Self {
        Self { total: 0, per_sample: vec![0; num_samples], per_bucket: vec![0; num_buckets] }
    }

    /// Counts one record read, whether or not it matched.
    pub fn record_read(&mut self) {
        self.total += 1;
    }

    /// Counts one record matched to `sample`.
    pub fn record_match(&mut self, sample: usize) {
        self.per_sample[sample] += 1;
    }

    /// Counts one derived record written to `bucket`.
    pub fn record_emitted(&mut self, bucket: usize) {
        self.per_bucket[bucket] += 1;
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// The number of records matched to `sample`.
    #[must_use]
    pub fn matched(&self, sample: usize) -> u64 {
        self.per_sample[sample]
    }

    /// The number of derived records written to `bucket`.
    #[must_use]
    pub fn emitted(&self, bucket: usize) -> u64 {
        self.per_bucket[bucket]
    }

    /// The number of records that matched no sample.
    #[must_use]
    pub fn unknown(&self) -> u64 {
        self.total - self.per_sample.iter().sum::<u64>()
    }

    /// Builds the per-sample summary, in the order of `names`, followed by the unknown row.
    ///
    /// # Panics
    /// - If `names` does not have one entry per sample.
    #[must_use]
    pub fn summary(&self, names: &[String]) -> Summary {
        assert_eq!(names.len(), self.per_sample.len(), "Expected one name per sample");
        let mut rows: Vec<SampleMetric> = names
            .iter()
            .zip(self.per_sample.iter())
            .map(|(name, &records)| SampleMetric::new(name, records, self.total))
            .collect();
        rows.push(SampleMetric::new(UNKNOWN_NAME, self.unknown(), self.total));
        Summary { rows }
    }
}

/// The number and percentage of records assigned to one sample, or to the unknown bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleMetric {
    /// Name of the sample
    pub sample: String,
    /// Records matched to the sample
    pub records: u64,
    /// Percentage of all records that matched the sample
    pub percent: f64,
}

impl SampleMetric {
    fn new(sample: &str, records: u64, total: u64) -> Self {
        let percent = if total == 0 { 0.0 } else { records as f64 / total as f64 * 100.0 };
        Self { sample: sample.to_owned(), records, percent }
    }
}

/// The end-of-run summary, one row per sample with the unknown row last.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    pub rows: Vec<SampleMetric>,
}

impl Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            writeln!(f, "{}: {}({:.2}%)", row.sample, row.records, row.percent)?;
        }
        Ok(())
    }
}
