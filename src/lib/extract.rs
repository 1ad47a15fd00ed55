use crate::barcode_spec::Sample;
use bstr::ByteSlice;
use seq_io::fastq::{OwnedRecord, Record};

/// A record cut from one part of one barcode slot, along with the output bucket it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedRecord {
    /// Index of the (sample, slot, part) bucket the record is routed to.
    pub bucket: usize,
    /// The derived FASTQ record.
    pub record: OwnedRecord,
}

/// Builds the header of a derived record: the original header with trailing whitespace removed,
/// followed by the barcode, the 1-based part index and the 1-based inclusive position range.
fn annotated_header(head: &[u8], barcode: &[u8], part: usize, start: usize, end: usize) -> Vec<u8> {
    let head = head.trim_end();
    let mut annotated = Vec::with_capacity(head.len() + barcode.len() + 32);
    annotated.extend_from_slice(head);
    annotated.extend_from_slice(b" barcode:");
    annotated.extend_from_slice(barcode);
    annotated.extend_from_slice(format!(",part:{},pos:{}-{}", part + 1, start + 1, end).as_bytes());
    annotated
}

/// Cuts one derived record per slot part of `sample` out of `record`, in slot then part order.
///
/// Bounded parts that are empty for this read, or start past its end, produce nothing.  The
/// quality string is sliced alongside the sequence.
pub fn extract<R: Record>(sample: &Sample, record: &R) -> Vec<DerivedRecord> {
    let seq = record.seq();
    let qual = record.qual();
    let mut derived = Vec::with_capacity(sample.slots.iter().map(|s| s.parts.len()).sum());

    for slot in &sample.slots {
        for (index, part) in slot.parts.iter().enumerate() {
            let Some(range) = part.resolve(seq.len()) else {
                continue;
            };
            derived.push(DerivedRecord {
                bucket: slot.first_bucket + index,
                record: OwnedRecord {
                    head: annotated_header(
                        record.head(),
                        &slot.barcode,
                        index,
                        range.start,
                        range.end,
                    ),
                    seq: seq[range.clone()].to_vec(),
                    qual: qual[range].to_vec(),
                },
            });
        }
    }

    derived
}
