//! Names of the per-bucket output files.

use crate::barcode_spec::BarcodeSpec;
use std::path::{Path, PathBuf};

/// The extension of output FASTQs, with `.gz` appended when compressing.
fn extension(compress: bool) -> &'static str {
    if compress { "fq.gz" } else { "fq" }
}

/// Builds the shard paths for every bucket of `spec`, indexed by bucket.
///
/// Files are named `<sample>_b<slot>_<shard>.fq[.gz]`, with slots and shards numbered from 1,
/// the shard zero-padded to five digits, and `_p<part>` added after the slot for slots that
/// are split into more than one part.
#[must_use]
pub fn bucket_paths(
    dir: &Path,
    spec: &BarcodeSpec,
    shards: usize,
    compress: bool,
) -> Vec<Vec<PathBuf>> {
    let ext = extension(compress);
    spec.buckets()
        .map(|key| {
            let sample = &spec.samples[key.sample];
            let slot = &sample.slots[key.slot];
            let stem = if slot.parts.len() > 1 {
                format!("{}_b{}_p{}", sample.name, key.slot + 1, key.part + 1)
            } else {
                format!("{}_b{}", sample.name, key.slot + 1)
            };
            (1..=shards).map(|shard| dir.join(format!("{stem}_{shard:05}.{ext}"))).collect()
        })
        .collect()
}

/// Builds the shard paths for paired output, two buckets per sample (read one then read two).
///
/// Files are named `<sample>.R1.fq[.gz]` and `<sample>.R2.fq[.gz]`; when more than one shard
/// is requested the zero-padded shard number is added, e.g. `<sample>.R1_00002.fq.gz`.
#[must_use]
pub fn paired_paths(
    dir: &Path,
    samples: &[String],
    shards: usize,
    compress: bool,
) -> Vec<Vec<PathBuf>> {
    let ext = extension(compress);
    samples
        .iter()
        .flat_map(|name| [1, 2].map(|read| (name, read)))
        .map(|(name, read)| {
            if shards == 1 {
                vec![dir.join(format!("{name}.R{read}.{ext}"))]
            } else {
                (1..=shards)
                    .map(|shard| dir.join(format!("{name}.R{read}_{shard:05}.{ext}")))
                    .collect()
            }
        })
        .collect()
}
