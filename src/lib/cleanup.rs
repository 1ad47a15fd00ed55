use crate::router::ShardSummary;
use anyhow::{Context, Result};
use log::debug;
use std::fs;
use std::io::ErrorKind;

/// Deletes every output file that received no records, returning how many were removed.
///
/// Emptiness is judged by the record count rather than the file size, since an empty
/// compressed file still holds a few bytes of framing.  Files that are already gone are
/// skipped.
///
/// # Errors
/// - If an empty file exists but cannot be removed.
pub fn remove_empty_outputs(shards: &[ShardSummary]) -> Result<usize> {
    let mut removed = 0;
    for shard in shards.iter().filter(|s| s.records == 0) {
        match fs::remove_file(&shard.path) {
            Ok(()) => {
                debug!("Removed empty output {:?}", shard.path);
                removed += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => (),
            Err(e) => {
                return Err(e).with_context(|| format!("Could not remove {:?}", shard.path));
            }
        }
    }
    Ok(removed)
}
