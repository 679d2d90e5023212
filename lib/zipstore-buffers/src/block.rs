//! Block codec (C2): pack/unpack a sorted list of records into/from a
//! fixed-size data block.
//!
//! Layout: `u16 recordCount | u32 precedingRBN | u32 succeedingRBN |
//! (u32 len, bytes)* | 0xFF padding`. An [`AvailBlock`] occupies the same
//! physical slot with `recordCount = 0` and the remainder zeroed; it is
//! distinguished only by membership in the available list, tracked
//! externally by [`crate::sequence_set`].

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{BlockOverflowSnafu, CorruptBlockSnafu, Error};
use crate::record::ZipRecord;

/// Fixed header size of a data block: recordCount (2) + preceding (4) + succeeding (4).
pub const BLOCK_HEADER_LEN: usize = 10;

/// Byte used to pad the unused tail of a block.
pub const PADDING_BYTE: u8 = 0xFF;

/// An in-memory, owned view of one data block: its records in ascending
/// key order plus its doubly-linked-list neighbors.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    pub preceding_rbn: u32,
    pub succeeding_rbn: u32,
    pub records: Vec<ZipRecord>,
}

impl DataBlock {
    pub fn empty() -> Self {
        Self {
            preceding_rbn: 0,
            succeeding_rbn: 0,
            records: Vec::new(),
        }
    }

    /// Total occupied bytes: `10 + Σ(4 + len_i)` across the block's records.
    pub fn occupied(&self) -> usize {
        BLOCK_HEADER_LEN
            + self
                .records
                .iter()
                .map(|r| 4 + r.to_csv_line().len())
                .sum::<usize>()
    }

    pub fn last_key(&self) -> Option<u32> {
        self.records.last().map(|r| r.zip)
    }

    pub fn first_key(&self) -> Option<u32> {
        self.records.first().map(|r| r.zip)
    }

    /// Serializes this block into exactly `block_size` bytes.
    ///
    /// Fails with [`Error::BlockOverflow`] if the occupied size exceeds
    /// `block_size`; the caller (the sequence-set engine) is responsible
    /// for trying redistribution/split before ever calling this with an
    /// overflowing block.
    pub fn pack(&self, block_size: usize) -> Result<Vec<u8>, Error> {
        let occupied = self.occupied();
        if occupied > block_size {
            return BlockOverflowSnafu {
                occupied,
                record_len: 0usize,
                block_size,
            }
            .fail();
        }
        let mut buf = Vec::with_capacity(block_size);
        buf.write_u16::<LittleEndian>(self.records.len() as u16)
            .expect("writes to a Vec never fail");
        buf.write_u32::<LittleEndian>(self.preceding_rbn)
            .expect("writes to a Vec never fail");
        buf.write_u32::<LittleEndian>(self.succeeding_rbn)
            .expect("writes to a Vec never fail");
        for record in &self.records {
            let csv = record.to_csv_line();
            let bytes = csv.as_bytes();
            buf.write_u32::<LittleEndian>(bytes.len() as u32)
                .expect("writes to a Vec never fail");
            buf.extend_from_slice(bytes);
        }
        buf.resize(block_size, PADDING_BYTE);
        Ok(buf)
    }

    /// Deserializes a block from exactly `block_size` bytes.
    ///
    /// Stops reading records either at end-of-buffer or at the first
    /// 0xFF padding sentinel byte.
    pub fn unpack(bytes: &[u8], rbn: u32) -> Result<Self, Error> {
        if bytes.len() < BLOCK_HEADER_LEN {
            return CorruptBlockSnafu {
                rbn,
                reason: format!(
                    "block shorter than header ({} < {BLOCK_HEADER_LEN})",
                    bytes.len()
                ),
            }
            .fail();
        }
        let mut cursor = &bytes[..];
        let record_count = cursor
            .read_u16::<LittleEndian>()
            .expect("length already checked") as usize;
        let preceding_rbn = cursor
            .read_u32::<LittleEndian>()
            .expect("length already checked");
        let succeeding_rbn = cursor
            .read_u32::<LittleEndian>()
            .expect("length already checked");

        let mut records = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            if cursor.is_empty() || cursor[0] == PADDING_BYTE {
                return CorruptBlockSnafu {
                    rbn,
                    reason: format!(
                        "expected {record_count} records but buffer ended/padded after {}",
                        records.len()
                    ),
                }
                .fail();
            }
            let len = cursor.read_u32::<LittleEndian>().map_err(|_| {
                CorruptBlockSnafu {
                    rbn,
                    reason: "truncated length prefix".to_string(),
                }
                .build()
            })? as usize;
            if len == 0 {
                return CorruptBlockSnafu {
                    rbn,
                    reason: "zero-length record prefix".to_string(),
                }
                .fail();
            }
            if len > cursor.len() {
                return CorruptBlockSnafu {
                    rbn,
                    reason: format!("record length {len} exceeds remaining buffer {}", cursor.len()),
                }
                .fail();
            }
            let (payload, rest) = cursor.split_at(len);
            let line = std::str::from_utf8(payload).map_err(|_| {
                CorruptBlockSnafu {
                    rbn,
                    reason: "record payload is not valid UTF-8".to_string(),
                }
                .build()
            })?;
            let record = ZipRecord::parse_csv_line(line).map_err(|_| {
                CorruptBlockSnafu {
                    rbn,
                    reason: format!("record payload {line:?} failed to parse"),
                }
                .build()
            })?;
            records.push(record);
            cursor = rest;
        }
        Ok(Self {
            preceding_rbn,
            succeeding_rbn,
            records,
        })
    }
}

/// Writes an [`AvailBlock`]'s bytes: `recordCount=0`, `succeedingRBN`, zero remainder.
pub fn pack_avail_block(next_free_rbn: u32, block_size: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(block_size);
    buf.write_u16::<LittleEndian>(0)
        .expect("writes to a Vec never fail");
    buf.write_u32::<LittleEndian>(next_free_rbn)
        .expect("writes to a Vec never fail");
    buf.resize(block_size, 0);
    buf
}

/// Reads the `succeedingRBN` (next free block) out of an avail block's bytes.
pub fn unpack_avail_block(bytes: &[u8], rbn: u32) -> Result<u32, Error> {
    if bytes.len() < BLOCK_HEADER_LEN {
        return CorruptBlockSnafu {
            rbn,
            reason: "avail block shorter than header".to_string(),
        }
        .fail();
    }
    let mut cursor = &bytes[2..6];
    Ok(cursor.read_u32::<LittleEndian>().expect("length checked"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(zip: u32) -> ZipRecord {
        ZipRecord::new(zip, "City", "MN", "County", 44.0, -93.0).unwrap()
    }

    #[test]
    fn pack_unpack_round_trip() {
        let block = DataBlock {
            preceding_rbn: 3,
            succeeding_rbn: 5,
            records: vec![rec(100), rec(200), rec(300)],
        };
        let bytes = block.pack(1024).unwrap();
        assert_eq!(bytes.len(), 1024);
        let back = DataBlock::unpack(&bytes, 1).unwrap();
        assert_eq!(block, back);
    }

    #[test]
    fn pack_fails_on_overflow() {
        let records: Vec<_> = (0..50).map(|i| rec(1000 + i)).collect();
        let block = DataBlock {
            preceding_rbn: 0,
            succeeding_rbn: 0,
            records,
        };
        assert!(block.pack(64).is_err());
    }

    #[test]
    fn avail_block_round_trips_next_pointer() {
        let bytes = pack_avail_block(7, 1024);
        assert_eq!(unpack_avail_block(&bytes, 1).unwrap(), 7);
    }

    #[test]
    fn unpack_detects_truncated_length_prefix() {
        let mut bytes = vec![0u8; 1024];
        bytes[0] = 1; // recordCount = 1
        bytes[10] = 0xFF; // immediately padded, contradicting recordCount
        assert!(DataBlock::unpack(&bytes, 1).is_err());
    }
}
