use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
  errors::{Errors, Result},
  util,
};

/// Reserved marker stored as the value of a deleted key. Never accepted as a
/// real key.
pub const TOMBSTONE: &[u8] = b"THOMB";

pub(crate) const U32_SIZE: usize = 4;
pub(crate) const U64_SIZE: usize = 8;

/// Number of bytes the sstable record spends on timestamp + value pointer.
pub(crate) const SSTABLE_ENTRY_TAIL: usize = U64_SIZE + U32_SIZE + U32_SIZE;

/// A full key/value record as stored in the vlog.
///
/// Wire format, big-endian:
/// `[key_len:u32][value_len:u32][key][value]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
  pub key: Bytes,
  pub value: Bytes,
}

impl TableEntry {
  pub fn new(key: Bytes, value: Bytes) -> Self {
    Self { key, value }
  }

  /// Builds a tombstone record for a deleted key.
  pub fn deleted(key: Bytes) -> Self {
    Self {
      key,
      value: Bytes::from_static(TOMBSTONE),
    }
  }

  pub fn is_tombstone(&self) -> bool {
    self.value == TOMBSTONE
  }

  pub fn encoded_len(&self) -> usize {
    U32_SIZE + U32_SIZE + self.key.len() + self.value.len()
  }

  pub fn encode(&self) -> Bytes {
    let mut buf = BytesMut::with_capacity(self.encoded_len());
    buf.put_u32(self.key.len() as u32);
    buf.put_u32(self.value.len() as u32);
    buf.put_slice(&self.key);
    buf.put_slice(&self.value);
    buf.freeze()
  }

  /// Decodes one record from a buffer that holds exactly one record.
  pub fn decode(buf: &[u8]) -> Result<Self> {
    let mut buf = buf;
    if buf.remaining() < U32_SIZE + U32_SIZE {
      return Err(Errors::CorruptRecord);
    }
    let key_len = buf.get_u32() as usize;
    let value_len = buf.get_u32() as usize;
    if buf.remaining() != key_len + value_len {
      return Err(Errors::CorruptRecord);
    }
    let key = buf.copy_to_bytes(key_len);
    let value = buf.copy_to_bytes(value_len);
    Ok(Self { key, value })
  }
}

/// Pointer to one serialized [`TableEntry`] inside the vlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueMeta {
  pub offset: u32,
  pub length: u32,
}

/// A key record inside an sstable. Carries the vlog pointer and the creation
/// timestamp (unix seconds) used to resolve conflicts across sstables, never
/// the value itself.
///
/// Wire format, big-endian:
/// `[key_len:u32][key][timestamp:u64][value_offset:u32][value_length:u32]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstableEntry {
  pub key: Bytes,
  pub timestamp: u64,
  pub meta: ValueMeta,
}

impl SstableEntry {
  /// A fresh record stamped with the current time.
  pub fn new(key: Bytes, meta: ValueMeta) -> Self {
    Self {
      key,
      timestamp: util::unix_timestamp(),
      meta,
    }
  }

  pub fn encoded_len(&self) -> usize {
    U32_SIZE + self.key.len() + SSTABLE_ENTRY_TAIL
  }

  pub fn encode(&self) -> Bytes {
    let mut buf = BytesMut::with_capacity(self.encoded_len());
    buf.put_u32(self.key.len() as u32);
    buf.put_slice(&self.key);
    buf.put_u64(self.timestamp);
    buf.put_u32(self.meta.offset);
    buf.put_u32(self.meta.length);
    buf.freeze()
  }

  /// Decodes one record from the front of `buf`, advancing it past the record.
  pub fn decode(buf: &mut &[u8]) -> Result<Self> {
    if buf.remaining() < U32_SIZE {
      return Err(Errors::CorruptRecord);
    }
    let key_len = buf.get_u32() as usize;
    if buf.remaining() < key_len + SSTABLE_ENTRY_TAIL {
      return Err(Errors::CorruptRecord);
    }
    let key = buf.copy_to_bytes(key_len);
    let timestamp = buf.get_u64();
    let offset = buf.get_u32();
    let length = buf.get_u32();
    Ok(Self {
      key,
      timestamp,
      meta: ValueMeta { offset, length },
    })
  }
}
