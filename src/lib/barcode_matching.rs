use crate::barcode_spec::{BarcodeSpec, Sample};

/// Counts the mismatches between `expected` and the bases of `observed` at `offset`, stopping
/// as soon as the count exceeds `max_mismatches`.  Expected bases that fall past the end of
/// `observed` count as mismatches.  Comparison ignores case.
///
/// Returns the number of mismatches, or `None` once more than `max_mismatches` are found.
#[must_use]
pub fn count_mismatches_within(
    observed: &[u8],
    offset: usize,
    expected: &[u8],
    max_mismatches: usize,
) -> Option<usize> {
    let mut count = 0;
    for (i, &exp) in expected.iter().enumerate() {
        let matched = observed.get(offset + i).is_some_and(|obs| obs.eq_ignore_ascii_case(&exp));
        if !matched {
            count += 1;
            if count > max_mismatches {
                return None;
            }
        }
    }
    Some(count)
}

/// Assigns reads to the first sample, in declaration order, whose barcodes all match.
#[derive(Clone, Debug)]
pub struct BarcodeMatcher<'a> {
    /// The barcode spec whose samples are matched against
    spec: &'a BarcodeSpec,
    /// The maximum mismatches tolerated in any one barcode
    max_mismatches: usize,
}

impl<'a> BarcodeMatcher<'a> {
    #[must_use]
    pub fn new(spec: &'a BarcodeSpec, max_mismatches: usize) -> Self {
        Self { spec, max_mismatches }
    }

    /// True if every non-empty slot of `sample` is within `max_mismatches` of the read.  A
    /// sample with no barcodes never matches.
    fn sample_matches(&self, sample: &Sample, read_bases: &[u8]) -> bool {
        let mut barcodes = sample.slots.iter().filter(|s| !s.barcode.is_empty()).peekable();
        barcodes.peek().is_some()
            && barcodes.all(|slot| {
                count_mismatches_within(
                    read_bases,
                    slot.bounds.start(),
                    &slot.barcode,
                    self.max_mismatches,
                )
                .is_some()
            })
    }

    /// Returns the index of the first sample that matches `read_bases`, or `None` if the read
    /// belongs to no sample.
    #[must_use]
    pub fn assign(&self, read_bases: &[u8]) -> Option<usize> {
        self.spec.samples.iter().position(|s| self.sample_matches(s, read_bases))
    }
}
