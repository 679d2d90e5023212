//! Flat block index (C5): an ordered `(lastKey, rbn, prev, next)` list
//! over the sequence set's active blocks.
//!
//! This is the simple companion index used when no B+ tree (C7) is built;
//! `findRBNForKey` is a straightforward linear/binary scan since the list
//! fits comfortably in memory for the record counts this store targets.

use crate::error::Error;
use crate::sequence_set::{BlockResolver, SequenceSet};

/// One entry of the flat block index: the highest key in a block, that
/// block's RBN, and its neighbors in the active list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub last_key: u32,
    pub rbn: u32,
    pub prev_rbn: u32,
    pub next_rbn: u32,
}

/// The legacy on-disk "no match" sentinel: -1 cast to an unsigned RBN.
/// Preserved for interop with the original ZIP-search utility's call
/// sites; callers should prefer [`BlockIndex::find_rbn_for_key`]'s
/// `Option` return and only reach for this when emulating the legacy API.
pub const NO_MATCH_SENTINEL: u32 = u32::MAX;

/// In-memory flat block index, ordered ascending by `last_key`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockIndex {
    entries: Vec<BlockIndexEntry>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the index by walking the active list of a sequence set from
    /// its head, recording the last key of each block.
    pub fn build_from_sequence_set(seq: &mut SequenceSet) -> Result<Self, Error> {
        let mut entries = Vec::new();
        let mut rbn = seq.head_rbn();
        let mut prev_rbn = 0u32;
        while rbn != 0 {
            let block = seq.load_block(rbn)?;
            let last_key = block.last_key().unwrap_or(0);
            let next_rbn = block.succeeding_rbn;
            entries.push(BlockIndexEntry {
                last_key,
                rbn,
                prev_rbn,
                next_rbn,
            });
            prev_rbn = rbn;
            rbn = next_rbn;
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[BlockIndexEntry] {
        &self.entries
    }

    /// Returns the RBN of the first entry whose `last_key >= key`, i.e.
    /// the block that would contain `key` were it present. `None` if
    /// `key` exceeds every block's `last_key`.
    pub fn find_rbn_for_key(&self, key: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.last_key >= key)
            .map(|entry| entry.rbn)
    }

    /// Legacy-compatible lookup returning [`NO_MATCH_SENTINEL`] instead of `None`.
    pub fn find_rbn_for_key_legacy(&self, key: u32) -> u32 {
        self.find_rbn_for_key(key).unwrap_or(NO_MATCH_SENTINEL)
    }

    /// Replaces the `last_key` for the entry at `rbn` (called after an
    /// insert/split/merge changes a block's highest key).
    pub fn update_last_key(&mut self, rbn: u32, last_key: u32) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.rbn == rbn) {
            entry.last_key = last_key;
        }
    }

    pub fn rebuild(&mut self, seq: &mut SequenceSet) -> Result<(), Error> {
        *self = Self::build_from_sequence_set(seq)?;
        Ok(())
    }

    /// Persists the index as whitespace-separated ASCII, terminated by `|`.
    pub fn to_ascii(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format!(
                "{} {} {} {}\n",
                entry.last_key, entry.rbn, entry.prev_rbn, entry.next_rbn
            ));
        }
        out.push('|');
        out
    }

    /// Parses the whitespace-separated ASCII grammar terminated by `|`.
    pub fn from_ascii(text: &str) -> Result<Self, Error> {
        let body = text.split('|').next().unwrap_or("");
        let tokens: Vec<&str> = body.split_whitespace().collect();
        if tokens.len() % 4 != 0 {
            return Err(Error::CorruptBlock {
                rbn: 0,
                reason: format!(
                    "flat block index has {} tokens, not a multiple of 4",
                    tokens.len()
                ),
            });
        }
        let mut entries = Vec::with_capacity(tokens.len() / 4);
        for chunk in tokens.chunks_exact(4) {
            let parse = |s: &str| -> Result<u32, Error> {
                s.parse().map_err(|_| Error::CorruptBlock {
                    rbn: 0,
                    reason: format!("flat block index token {s:?} is not a u32"),
                })
            };
            entries.push(BlockIndexEntry {
                last_key: parse(chunk[0])?,
                rbn: parse(chunk[1])?,
                prev_rbn: parse(chunk[2])?,
                next_rbn: parse(chunk[3])?,
            });
        }
        Ok(Self { entries })
    }
}

impl BlockResolver for BlockIndex {
    fn resolve(&mut self, key: u32) -> Result<Option<u32>, Error> {
        Ok(self.find_rbn_for_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> BlockIndex {
        BlockIndex {
            entries: vec![
                BlockIndexEntry {
                    last_key: 30000,
                    rbn: 1,
                    prev_rbn: 0,
                    next_rbn: 2,
                },
                BlockIndexEntry {
                    last_key: 70000,
                    rbn: 2,
                    prev_rbn: 1,
                    next_rbn: 0,
                },
            ],
        }
    }

    #[test]
    fn finds_smallest_last_key_above_or_equal() {
        let idx = sample_index();
        assert_eq!(idx.find_rbn_for_key(10000), Some(1));
        assert_eq!(idx.find_rbn_for_key(30000), Some(1));
        assert_eq!(idx.find_rbn_for_key(30001), Some(2));
        assert_eq!(idx.find_rbn_for_key(70001), None);
    }

    #[test]
    fn legacy_lookup_uses_sentinel() {
        let idx = sample_index();
        assert_eq!(idx.find_rbn_for_key_legacy(70001), NO_MATCH_SENTINEL);
    }

    #[test]
    fn ascii_round_trips() {
        let idx = sample_index();
        let text = idx.to_ascii();
        assert!(text.ends_with('|'));
        let back = BlockIndex::from_ascii(&text).unwrap();
        assert_eq!(idx, back);
    }
}
