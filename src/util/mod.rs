pub mod rand_kv;

use std::io::{self, Read};

use rand::{distr::Alphanumeric, Rng};

use crate::errors::{Errors, Result};

/// Unix seconds. Second granularity is what sstable records store, so two
/// writes landing in different sstables within the same second tie.
pub(crate) fn unix_timestamp() -> u64 {
  time::OffsetDateTime::now_utc().unix_timestamp() as u64
}

/// Random alphanumeric stem for sstable and temp file names.
pub(crate) fn random_file_stem(len: usize) -> String {
  rand::rng()
    .sample_iter(&Alphanumeric)
    .take(len)
    .map(char::from)
    .collect()
}

/// `read_exact` that reports a short read as a corrupt record instead of a
/// bare io error, since every fixed-length read in this crate is against a
/// length the on-disk format declared.
pub(crate) fn read_exact_or_corrupt<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
  R: Read,
{
  reader.read_exact(buf).map_err(|e| match e.kind() {
    io::ErrorKind::UnexpectedEof => Errors::CorruptRecord,
    _ => Errors::Io(e),
  })
}
