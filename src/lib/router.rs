use anyhow::{Result, ensure};
use seq_io::fastq::{OwnedRecord, Record};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A single output file and the number of records written to it.
struct OutputShard<W: Write> {
    path: PathBuf,
    writer: W,
    records: u64,
}

/// The path of an output file and the number of records it received, reported once the
/// writer has been closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardSummary {
    pub path: PathBuf,
    pub records: u64,
}

/// The fixed set of output shards for one bucket, written to in rotation.
struct ShardSet<W: Write> {
    shards: Vec<OutputShard<W>>,
    /// Number of records routed to this bucket so far; selects the next shard.
    emitted: u64,
}

impl<W: Write> ShardSet<W> {
    /// Writes `record` to the next shard in rotation and returns that shard's index.
    fn write(&mut self, record: &OwnedRecord) -> Result<usize> {
        let index = (self.emitted % self.shards.len() as u64) as usize;
        let shard = &mut self.shards[index];
        record.write(&mut shard.writer)?;
        shard.records += 1;
        self.emitted += 1;
        Ok(index)
    }
}

/// Owns every output handle for the run and fans records out to them.
///
/// Each bucket holds the same number of shards, opened up front and never resized.  Records
/// routed to a bucket go to its shards round-robin: the `j`th record routed to a bucket (from
/// 0) goes to shard `j mod N`, regardless of what is routed to other buckets.
pub struct Router<W: Write> {
    buckets: Vec<ShardSet<W>>,
}

impl<W: Write> Router<W> {
    /// Opens one writer per path, with `paths[b]` holding the shard paths for bucket `b`.
    ///
    /// # Errors
    /// - If any bucket has no shard paths, or the buckets have differing shard counts.
    /// - If `open` fails for any path.
    pub fn open<F>(paths: Vec<Vec<PathBuf>>, mut open: F) -> Result<Self>
    where
        F: FnMut(&Path) -> Result<W>,
    {
        let shard_count = paths.first().map_or(0, Vec::len);
        ensure!(shard_count > 0, "Each output bucket must have at least one shard.");
        ensure!(
            paths.iter().all(|p| p.len() == shard_count),
            "Every output bucket must have {shard_count} shards."
        );

        let mut buckets = Vec::with_capacity(paths.len());
        for bucket_paths in paths {
            let mut shards = Vec::with_capacity(bucket_paths.len());
            for path in bucket_paths {
                let writer = open(&path)?;
                shards.push(OutputShard { path, writer, records: 0 });
            }
            buckets.push(ShardSet { shards, emitted: 0 });
        }
        Ok(Self { buckets })
    }

    /// The number of buckets this router writes to.
    #[must_use]
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Writes `record` to the next shard of `bucket`, returning the shard index used.
    ///
    /// # Errors
    /// - If writing to the selected shard fails.
    pub fn route(&mut self, bucket: usize, record: &OwnedRecord) -> Result<usize> {
        self.buckets[bucket].write(record)
    }

    /// Closes every writer with `close`, in bucket then shard order, and reports how many
    /// records each file received.
    ///
    /// # Errors
    /// - If closing any writer fails.  Remaining writers are dropped without `close`.
    pub fn close<F>(self, mut close: F) -> Result<Vec<ShardSummary>>
    where
        F: FnMut(W) -> io::Result<()>,
    {
        let mut summaries = Vec::new();
        for bucket in self.buckets {
            for OutputShard { path, writer, records } in bucket.shards {
                close(writer)?;
                summaries.push(ShardSummary { path, records });
            }
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record(i: usize) -> OwnedRecord {
        OwnedRecord {
            head: format!("r{i}").into_bytes(),
            seq: b"ACGT".to_vec(),
            qual: b"IIII".to_vec(),
        }
    }

    fn paths(buckets: usize, shards: usize) -> Vec<Vec<PathBuf>> {
        (0..buckets)
            .map(|b| (0..shards).map(|s| PathBuf::from(format!("b{b}_s{s}.fq"))).collect())
            .collect()
    }

    fn router(buckets: usize, shards: usize) -> Router<Vec<u8>> {
        Router::open(paths(buckets, shards), |_| Ok(Vec::new())).unwrap()
    }

    /// Closes the router and returns each file's path, record count and contents.
    fn close(router: Router<Vec<u8>>) -> Vec<(ShardSummary, String)> {
        let mut contents = Vec::new();
        let summaries = router
            .close(|w| {
                contents.push(String::from_utf8(w).unwrap());
                Ok(())
            })
            .unwrap();
        summaries.into_iter().zip(contents).collect()
    }

    #[test]
    fn test_seven_records_over_three_shards() {
        let mut router = router(1, 3);
        let shards = (0..7).map(|i| router.route(0, &record(i)).unwrap()).collect::<Vec<_>>();
        assert_eq!(shards, vec![0, 1, 2, 0, 1, 2, 0]);

        let closed = close(router);
        let counts = closed.iter().map(|(s, _)| s.records).collect::<Vec<_>>();
        assert_eq!(counts, vec![3, 2, 2]);
        assert_eq!(closed[0].1, "@r0\nACGT\n+\nIIII\n@r3\nACGT\n+\nIIII\n@r6\nACGT\n+\nIIII\n");
        assert_eq!(closed[2].1, "@r2\nACGT\n+\nIIII\n@r5\nACGT\n+\nIIII\n");
        assert_eq!(closed[1].0.path, PathBuf::from("b0_s1.fq"));
    }

    #[rstest]
    #[case(0, 4)]
    #[case(1, 4)]
    #[case(5, 4)]
    #[case(13, 4)]
    #[case(9, 1)]
    fn test_shard_counts_are_balanced(#[case] k: usize, #[case] n: usize) {
        let mut router = router(1, n);
        for i in 0..k {
            router.route(0, &record(i)).unwrap();
        }
        let closed = close(router);
        for (i, (summary, _)) in closed.iter().enumerate() {
            let expected = (k.saturating_sub(i)).div_ceil(n) as u64;
            assert_eq!(summary.records, expected, "shard {i} of {n} after {k} records");
        }
    }

    #[test]
    fn test_buckets_rotate_independently() {
        let mut router = router(2, 2);
        assert_eq!(router.route(0, &record(0)).unwrap(), 0);
        assert_eq!(router.route(1, &record(1)).unwrap(), 0);
        assert_eq!(router.route(1, &record(2)).unwrap(), 1);
        assert_eq!(router.route(0, &record(3)).unwrap(), 1);
        assert_eq!(router.route(1, &record(4)).unwrap(), 0);
        assert_eq!(router.num_buckets(), 2);

        let closed = close(router);
        let counts = closed.iter().map(|(s, _)| s.records).collect::<Vec<_>>();
        assert_eq!(counts, vec![1, 1, 2, 1]);
        assert_eq!(closed[2].1, "@r1\nACGT\n+\nIIII\n@r4\nACGT\n+\nIIII\n");
    }

    #[test]
    fn test_open_failure_is_propagated() {
        let result: Result<Router<Vec<u8>>> =
            Router::open(paths(2, 2), |p| Err(anyhow::anyhow!("cannot open {p:?}")));
        assert!(result.is_err());
    }

    /// A writer for a device that has run out of space.
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_propagated() {
        let mut router = Router::open(paths(1, 2), |_| Ok(FullDisk)).unwrap();
        let err = router.route(0, &record(0)).unwrap_err();
        assert!(err.to_string().contains("no space left on device"), "unexpected error: {err}");
    }

    #[test]
    #[should_panic(expected = "must have at least one shard")]
    fn test_zero_shards_is_rejected() {
        let _router: Router<Vec<u8>> = Router::open(paths(2, 0), |_| Ok(Vec::new())).unwrap();
    }
}
