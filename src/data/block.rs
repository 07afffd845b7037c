use bytes::{Buf, BufMut, BytesMut};

use crate::errors::{Errors, Result};

/// Byte length of one serialized block index record.
pub(crate) const BLOCK_INDEX_SIZE: usize = 8;

/// Byte length of the sstable footer.
pub(crate) const FOOTER_SIZE: usize = 4;

/// Describes one contiguous run of sstable records inside a file.
///
/// Wire format, big-endian: `[block_length:u32][block_offset:u32]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIndex {
  pub offset: u32,
  pub block_length: u32,
}

impl BlockIndex {
  pub fn encode(&self) -> [u8; BLOCK_INDEX_SIZE] {
    let mut buf = [0u8; BLOCK_INDEX_SIZE];
    buf[..4].copy_from_slice(&self.block_length.to_be_bytes());
    buf[4..].copy_from_slice(&self.offset.to_be_bytes());
    buf
  }

  /// Parses the index section of an sstable into memory.
  pub fn decode_section(buf: &[u8]) -> Result<Vec<BlockIndex>> {
    if buf.len() % BLOCK_INDEX_SIZE != 0 {
      return Err(Errors::CorruptRecord);
    }
    let mut buf = buf;
    let mut indexes = Vec::with_capacity(buf.len() / BLOCK_INDEX_SIZE);
    while buf.has_remaining() {
      let block_length = buf.get_u32();
      let offset = buf.get_u32();
      indexes.push(BlockIndex {
        offset,
        block_length,
      });
    }
    Ok(indexes)
  }
}

/// Trailing fixed-size record giving the byte offset where the block index
/// begins. Always the last bytes of a finalized sstable file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
  pub index_offset: u32,
}

impl Footer {
  pub fn encode(&self) -> BytesMut {
    let mut buf = BytesMut::with_capacity(FOOTER_SIZE);
    buf.put_u32(self.index_offset);
    buf
  }

  pub fn decode(buf: &[u8]) -> Result<Self> {
    if buf.len() != FOOTER_SIZE {
      return Err(Errors::InvalidFooter);
    }
    let mut buf = buf;
    Ok(Self {
      index_offset: buf.get_u32(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_block_index_roundtrip() {
    let indexes = vec![
      BlockIndex {
        offset: 0,
        block_length: 40,
      },
      BlockIndex {
        offset: 40,
        block_length: 23,
      },
    ];
    let mut section = Vec::new();
    for index in &indexes {
      section.extend_from_slice(&index.encode());
    }
    assert_eq!(BlockIndex::decode_section(&section).unwrap(), indexes);
  }

  #[test]
  fn test_block_index_layout() {
    let index = BlockIndex {
      offset: 7,
      block_length: 21,
    };
    // block_length comes first on disk
    assert_eq!(index.encode(), [0, 0, 0, 21, 0, 0, 0, 7]);
  }

  #[test]
  fn test_block_index_ragged_section() {
    let res = BlockIndex::decode_section(&[0u8; 9]);
    assert!(matches!(res, Err(Errors::CorruptRecord)));
  }

  #[test]
  fn test_footer_roundtrip() {
    let footer = Footer { index_offset: 1234 };
    let encoded = footer.encode();
    assert_eq!(Footer::decode(&encoded).unwrap(), footer);
  }

  #[test]
  fn test_footer_rejects_wrong_size() {
    assert!(matches!(Footer::decode(&[0u8; 3]), Err(Errors::InvalidFooter)));
    assert!(matches!(Footer::decode(&[0u8; 5]), Err(Errors::InvalidFooter)));
  }
}
