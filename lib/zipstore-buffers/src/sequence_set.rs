//! Sequence-set engine (C4): insert/remove/search a record in its target
//! data block; split, redistribute, merge, and free blocks.
//!
//! The engine never decides *which* block a key belongs to on its own —
//! that is the job of a [`BlockResolver`] (the flat block index of
//! [`crate::block_index`], or a B+ tree's `search`/`findInsertionBlock`).
//! The runtime flow is always: resolve key to RBN via an index, then
//! mutate the block the sequence-set engine owns.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace, warn};

use crate::block::{pack_avail_block, unpack_avail_block, DataBlock};
use crate::error::{DuplicateKeySnafu, Error, NotFoundSnafu};
use crate::header::SequenceSetHeader;
use crate::paged_file::PagedFile;
use crate::record::ZipRecord;

/// Resolves a key to the RBN of the data block that contains it, or that
/// would contain it if it were inserted. Implemented by [`crate::block_index::BlockIndex`]
/// and by [`crate::btree::BPlusTree`].
pub trait BlockResolver {
    fn resolve(&mut self, key: u32) -> Result<Option<u32>, Error>;
}

/// Outcome of [`SequenceSet::insert`]: which local rebalancing happened,
/// and which blocks a caller-owned index needs to refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub split_occurred: bool,
    /// `(rbn, last_key)` for every block whose last key changed or which
    /// is newly allocated.
    pub changed_blocks: Vec<(u32, u32)>,
}

/// Outcome of [`SequenceSet::remove`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub merge_occurred: bool,
    pub changed_blocks: Vec<(u32, u32)>,
    pub freed_blocks: Vec<u32>,
}

/// One entry of [`SequenceSet::dump_physical`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalEntry {
    pub rbn: u32,
    pub preceding_rbn: u32,
    pub succeeding_rbn: u32,
    pub zips: Vec<u32>,
}

/// Result of [`SequenceSet::dump_logical`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalDump {
    pub active_zips: Vec<u32>,
    pub available_rbns: Vec<u32>,
}

/// The blocked sequence set: a doubly linked list of data blocks forming
/// a sorted record stream, backed by a [`PagedFile`].
pub struct SequenceSet {
    file: PagedFile,
    header: SequenceSetHeader,
    path: PathBuf,
    tail_rbn: u32,
}

impl SequenceSet {
    /// Creates a brand-new sequence-set file with a single empty head block.
    pub fn create(
        path: impl AsRef<Path>,
        block_size: u32,
        min_block_size: u16,
        index_filename: impl Into<String>,
    ) -> Result<Self, Error> {
        let header = SequenceSetHeader::new(block_size, min_block_size, index_filename);
        let header_size = header.header_size();
        let mut file = PagedFile::create(path.as_ref(), header_size, block_size as usize)?;
        let mut header = header;
        header.block_count = 1;
        header.sequence_set_list_rbn = 1;
        file.write_at(0, &header.to_bytes())?;
        let empty = DataBlock::empty();
        file.write_block(1, &empty.pack(block_size as usize)?)?;
        Ok(Self {
            file,
            header,
            path: path.as_ref().to_path_buf(),
            tail_rbn: 1,
        })
    }

    /// Opens an existing sequence-set file, reading its header and
    /// locating the tail of the active list.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let prefix = {
            let mut probe = PagedFile::open(path.as_ref(), 0, 1)?;
            probe.read_at(0, 4096)?
        };
        let header = SequenceSetHeader::from_bytes(&prefix)?;
        let header_size = header.header_size();
        let file = PagedFile::open(path.as_ref(), header_size, header.block_size as usize)?;
        let mut this = Self {
            file,
            header,
            path: path.as_ref().to_path_buf(),
            tail_rbn: 0,
        };
        this.tail_rbn = this.find_tail()?;
        Ok(this)
    }

    fn find_tail(&mut self) -> Result<u32, Error> {
        let mut rbn = self.header.sequence_set_list_rbn;
        if rbn == 0 {
            return Ok(0);
        }
        loop {
            let block = self.load_block(rbn)?;
            if block.succeeding_rbn == 0 {
                return Ok(rbn);
            }
            rbn = block.succeeding_rbn;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> usize {
        self.header.block_size as usize
    }

    pub fn min_block_size(&self) -> usize {
        self.header.min_block_size as usize
    }

    pub fn head_rbn(&self) -> u32 {
        self.header.sequence_set_list_rbn
    }

    pub fn tail_rbn(&self) -> u32 {
        self.tail_rbn
    }

    pub fn record_count(&self) -> u32 {
        self.header.record_count
    }

    pub fn block_count(&self) -> u32 {
        self.header.block_count
    }

    pub fn stale(&self) -> bool {
        self.header.stale_flag
    }

    pub fn set_stale(&mut self, stale: bool) -> Result<(), Error> {
        self.header.stale_flag = stale;
        self.persist_header()
    }

    pub fn persist_header(&mut self) -> Result<(), Error> {
        self.file.write_at(0, &self.header.to_bytes())
    }

    pub fn load_block(&mut self, rbn: u32) -> Result<DataBlock, Error> {
        let bytes = self.file.read_block(rbn)?;
        DataBlock::unpack(&bytes, rbn)
    }

    pub fn write_block(&mut self, rbn: u32, block: &DataBlock) -> Result<(), Error> {
        let bytes = block.pack(self.block_size())?;
        self.file.write_block(rbn, &bytes)
    }

    /// Pops the available list's head, or grows `blockCount` if it's empty.
    fn allocate_block(&mut self) -> Result<u32, Error> {
        if self.header.available_list_rbn != 0 {
            let rbn = self.header.available_list_rbn;
            let bytes = self.file.read_block(rbn)?;
            let next_free = unpack_avail_block(&bytes, rbn)?;
            self.header.available_list_rbn = next_free;
            trace!(rbn, next_free, "popped block from available list");
            Ok(rbn)
        } else {
            self.header.block_count += 1;
            let rbn = self.header.block_count;
            trace!(rbn, "grew block count to allocate new block");
            Ok(rbn)
        }
    }

    /// Writes an avail-block marker at `rbn` and pushes it onto the available list.
    fn free_block(&mut self, rbn: u32) -> Result<(), Error> {
        let bytes = pack_avail_block(self.header.available_list_rbn, self.block_size());
        self.file.write_block(rbn, &bytes)?;
        self.header.available_list_rbn = rbn;
        debug!(rbn, "freed block onto available list");
        Ok(())
    }

    /// search(key): resolve key → RBN; read block; return the matching
    /// record or `NotFound`.
    #[instrument(level = "debug", skip(self, resolver))]
    pub fn search<R: BlockResolver>(&mut self, key: u32, resolver: &mut R) -> Result<ZipRecord, Error> {
        let rbn = resolver.resolve(key)?.unwrap_or(self.tail_rbn);
        if rbn == 0 {
            return NotFoundSnafu { key }.fail();
        }
        let block = self.load_block(rbn)?;
        block
            .records
            .into_iter()
            .find(|r| r.zip == key)
            .ok_or_else(|| Error::NotFound { key })
    }

    /// insert(record): resolve target block, try in-place insert, then
    /// left redistribution, then right redistribution, then split.
    #[instrument(level = "debug", skip(self, record, resolver))]
    pub fn insert<R: BlockResolver>(
        &mut self,
        record: ZipRecord,
        resolver: &mut R,
    ) -> Result<InsertOutcome, Error> {
        let rbn = resolver.resolve(record.zip)?.unwrap_or(self.tail_rbn);
        let mut block = self.load_block(rbn)?;

        if block.records.iter().any(|r| r.zip == record.zip) {
            return DuplicateKeySnafu { key: record.zip }.fail();
        }

        let mut candidate = block.clone();
        insert_sorted(&mut candidate.records, record.clone());
        if candidate.occupied() <= self.block_size() {
            self.write_block(rbn, &candidate)?;
            self.header.record_count += 1;
            self.persist_header()?;
            return Ok(InsertOutcome {
                split_occurred: false,
                changed_blocks: vec![(rbn, candidate.last_key().unwrap_or(0))],
            });
        }

        if let Some(outcome) = self.try_left_redistribute_for_insert(rbn, &block, record.clone())? {
            self.header.record_count += 1;
            self.persist_header()?;
            return Ok(outcome);
        }
        if let Some(outcome) = self.try_right_redistribute_for_insert(rbn, &block, record.clone())? {
            self.header.record_count += 1;
            self.persist_header()?;
            return Ok(outcome);
        }

        debug!(rbn, zip = record.zip, "splitting block to accommodate insert");
        let mut all = block.records.clone();
        insert_sorted(&mut all, record);
        let mid = all.len() / 2;
        let high = all.split_off(mid);
        let low = all;

        let new_rbn = self.allocate_block()?;
        let old_succeeding = block.succeeding_rbn;

        let low_block = DataBlock {
            preceding_rbn: block.preceding_rbn,
            succeeding_rbn: new_rbn,
            records: low,
        };
        let high_block = DataBlock {
            preceding_rbn: rbn,
            succeeding_rbn: old_succeeding,
            records: high,
        };

        self.write_block(rbn, &low_block)?;
        self.write_block(new_rbn, &high_block)?;

        if old_succeeding != 0 {
            let mut succ = self.load_block(old_succeeding)?;
            succ.preceding_rbn = new_rbn;
            self.write_block(old_succeeding, &succ)?;
        } else {
            self.tail_rbn = new_rbn;
        }

        self.header.record_count += 1;
        self.persist_header()?;

        Ok(InsertOutcome {
            split_occurred: true,
            changed_blocks: vec![
                (rbn, low_block.last_key().unwrap_or(0)),
                (new_rbn, high_block.last_key().unwrap_or(0)),
            ],
        })
    }

    fn try_left_redistribute_for_insert(
        &mut self,
        rbn: u32,
        block: &DataBlock,
        record: ZipRecord,
    ) -> Result<Option<InsertOutcome>, Error> {
        if block.preceding_rbn == 0 {
            return Ok(None);
        }
        let prev_rbn = block.preceding_rbn;
        let mut prev = self.load_block(prev_rbn)?;
        if prev.records.is_empty() {
            return Ok(None);
        }
        let mut current = block.clone();
        insert_sorted(&mut current.records, record);

        let moved = current.records.remove(0);
        let mut candidate_prev = prev.clone();
        candidate_prev.records.push(moved);

        let min = self.min_block_size();
        let max = self.block_size();
        if candidate_prev.occupied() <= max
            && candidate_prev.occupied() >= min
            && current.occupied() <= max
            && current.occupied() >= min
        {
            prev = candidate_prev;
            self.write_block(prev_rbn, &prev)?;
            self.write_block(rbn, &current)?;
            trace!(prev_rbn, rbn, "redistributed left to accommodate insert");
            return Ok(Some(InsertOutcome {
                split_occurred: false,
                changed_blocks: vec![
                    (prev_rbn, prev.last_key().unwrap_or(0)),
                    (rbn, current.last_key().unwrap_or(0)),
                ],
            }));
        }
        Ok(None)
    }

    fn try_right_redistribute_for_insert(
        &mut self,
        rbn: u32,
        block: &DataBlock,
        record: ZipRecord,
    ) -> Result<Option<InsertOutcome>, Error> {
        if block.succeeding_rbn == 0 {
            return Ok(None);
        }
        let next_rbn = block.succeeding_rbn;
        let mut next = self.load_block(next_rbn)?;
        if next.records.is_empty() {
            return Ok(None);
        }
        let mut current = block.clone();
        insert_sorted(&mut current.records, record);

        let moved = current.records.pop().expect("just inserted at least one record");
        let mut candidate_next = next.clone();
        candidate_next.records.insert(0, moved);

        let min = self.min_block_size();
        let max = self.block_size();
        if candidate_next.occupied() <= max
            && candidate_next.occupied() >= min
            && current.occupied() <= max
            && current.occupied() >= min
        {
            next = candidate_next;
            self.write_block(rbn, &current)?;
            self.write_block(next_rbn, &next)?;
            trace!(rbn, next_rbn, "redistributed right to accommodate insert");
            return Ok(Some(InsertOutcome {
                split_occurred: false,
                changed_blocks: vec![
                    (rbn, current.last_key().unwrap_or(0)),
                    (next_rbn, next.last_key().unwrap_or(0)),
                ],
            }));
        }
        Ok(None)
    }

    /// remove(key): resolve target block, delete the record, then merge
    /// with a neighbor, or borrow from one, if the block falls below
    /// `minBlockSize`.
    #[instrument(level = "debug", skip(self, resolver))]
    pub fn remove<R: BlockResolver>(&mut self, key: u32, resolver: &mut R) -> Result<RemoveOutcome, Error> {
        let rbn = resolver.resolve(key)?.unwrap_or(self.tail_rbn);
        if rbn == 0 {
            return NotFoundSnafu { key }.fail();
        }
        let mut block = self.load_block(rbn)?;
        let idx = block
            .records
            .iter()
            .position(|r| r.zip == key)
            .ok_or(Error::NotFound { key })?;
        block.records.remove(idx);

        let min = self.min_block_size();
        let is_sole_block = block.preceding_rbn == 0 && block.succeeding_rbn == 0;

        if block.occupied() >= min || is_sole_block {
            self.write_block(rbn, &block)?;
            self.header.record_count -= 1;
            self.persist_header()?;
            return Ok(RemoveOutcome {
                merge_occurred: false,
                changed_blocks: vec![(rbn, block.last_key().unwrap_or(0))],
                freed_blocks: vec![],
            });
        }

        if let Some(outcome) = self.try_merge_with_preceding(rbn, &block)? {
            self.header.record_count -= 1;
            self.persist_header()?;
            return Ok(outcome);
        }
        if let Some(outcome) = self.try_merge_with_succeeding(rbn, &block)? {
            self.header.record_count -= 1;
            self.persist_header()?;
            return Ok(outcome);
        }
        if let Some(outcome) = self.try_borrow_from_preceding(rbn, &mut block)? {
            self.header.record_count -= 1;
            self.persist_header()?;
            return Ok(outcome);
        }
        if let Some(outcome) = self.try_borrow_from_succeeding(rbn, &mut block)? {
            self.header.record_count -= 1;
            self.persist_header()?;
            return Ok(outcome);
        }

        warn!(rbn, "writing underfull block; no legal merge/borrow available");
        self.write_block(rbn, &block)?;
        self.header.record_count -= 1;
        self.persist_header()?;
        Ok(RemoveOutcome {
            merge_occurred: false,
            changed_blocks: vec![(rbn, block.last_key().unwrap_or(0))],
            freed_blocks: vec![],
        })
    }

    fn try_merge_with_preceding(
        &mut self,
        rbn: u32,
        block: &DataBlock,
    ) -> Result<Option<RemoveOutcome>, Error> {
        if block.preceding_rbn == 0 {
            return Ok(None);
        }
        let prev_rbn = block.preceding_rbn;
        let prev = self.load_block(prev_rbn)?;
        let combined_occupied = prev.occupied() + block.occupied() - 10;
        if combined_occupied > self.block_size() {
            return Ok(None);
        }
        let mut merged_records = prev.records.clone();
        merged_records.extend(block.records.clone());
        merged_records.sort_by_key(|r| r.zip);

        let succ_rbn = block.succeeding_rbn;
        let merged = DataBlock {
            preceding_rbn: prev.preceding_rbn,
            succeeding_rbn: succ_rbn,
            records: merged_records,
        };
        self.write_block(prev_rbn, &merged)?;
        if succ_rbn != 0 {
            let mut succ = self.load_block(succ_rbn)?;
            succ.preceding_rbn = prev_rbn;
            self.write_block(succ_rbn, &succ)?;
        } else {
            self.tail_rbn = prev_rbn;
        }
        self.free_block(rbn)?;
        debug!(prev_rbn, removed_rbn = rbn, "merged block into preceding neighbor");
        Ok(Some(RemoveOutcome {
            merge_occurred: true,
            changed_blocks: vec![(prev_rbn, merged.last_key().unwrap_or(0))],
            freed_blocks: vec![rbn],
        }))
    }

    fn try_merge_with_succeeding(
        &mut self,
        rbn: u32,
        block: &DataBlock,
    ) -> Result<Option<RemoveOutcome>, Error> {
        if block.succeeding_rbn == 0 {
            return Ok(None);
        }
        let next_rbn = block.succeeding_rbn;
        let next = self.load_block(next_rbn)?;
        let combined_occupied = block.occupied() + next.occupied() - 10;
        if combined_occupied > self.block_size() {
            return Ok(None);
        }
        let mut merged_records = block.records.clone();
        merged_records.extend(next.records.clone());
        merged_records.sort_by_key(|r| r.zip);

        let succ_succ = next.succeeding_rbn;
        let merged = DataBlock {
            preceding_rbn: block.preceding_rbn,
            succeeding_rbn: succ_succ,
            records: merged_records,
        };
        self.write_block(rbn, &merged)?;
        if succ_succ != 0 {
            let mut succ2 = self.load_block(succ_succ)?;
            succ2.preceding_rbn = rbn;
            self.write_block(succ_succ, &succ2)?;
        } else {
            self.tail_rbn = rbn;
        }
        self.free_block(next_rbn)?;
        debug!(rbn, removed_rbn = next_rbn, "merged succeeding block into this block");
        Ok(Some(RemoveOutcome {
            merge_occurred: true,
            changed_blocks: vec![(rbn, merged.last_key().unwrap_or(0))],
            freed_blocks: vec![next_rbn],
        }))
    }

    fn try_borrow_from_preceding(
        &mut self,
        rbn: u32,
        block: &mut DataBlock,
    ) -> Result<Option<RemoveOutcome>, Error> {
        if block.preceding_rbn == 0 {
            return Ok(None);
        }
        let prev_rbn = block.preceding_rbn;
        let mut prev = self.load_block(prev_rbn)?;
        let min = self.min_block_size();
        let max = self.block_size();
        let mut moved_any = false;

        while block.occupied() < min {
            let Some(last) = prev.records.last().cloned() else {
                break;
            };
            let mut candidate_prev = prev.clone();
            candidate_prev.records.pop();
            if candidate_prev.occupied() < min {
                break;
            }
            let mut candidate_cur = block.clone();
            candidate_cur.records.insert(0, last);
            if candidate_cur.occupied() > max {
                break;
            }
            prev = candidate_prev;
            *block = candidate_cur;
            moved_any = true;
        }

        if !moved_any {
            return Ok(None);
        }
        self.write_block(prev_rbn, &prev)?;
        self.write_block(rbn, block)?;
        trace!(prev_rbn, rbn, "borrowed records from preceding neighbor");
        Ok(Some(RemoveOutcome {
            merge_occurred: false,
            changed_blocks: vec![
                (prev_rbn, prev.last_key().unwrap_or(0)),
                (rbn, block.last_key().unwrap_or(0)),
            ],
            freed_blocks: vec![],
        }))
    }

    fn try_borrow_from_succeeding(
        &mut self,
        rbn: u32,
        block: &mut DataBlock,
    ) -> Result<Option<RemoveOutcome>, Error> {
        if block.succeeding_rbn == 0 {
            return Ok(None);
        }
        let next_rbn = block.succeeding_rbn;
        let mut next = self.load_block(next_rbn)?;
        let min = self.min_block_size();
        let max = self.block_size();
        let mut moved_any = false;

        while block.occupied() < min {
            if next.records.is_empty() {
                break;
            }
            let first = next.records[0].clone();
            let mut candidate_next = next.clone();
            candidate_next.records.remove(0);
            if candidate_next.occupied() < min {
                break;
            }
            let mut candidate_cur = block.clone();
            candidate_cur.records.push(first);
            if candidate_cur.occupied() > max {
                break;
            }
            next = candidate_next;
            *block = candidate_cur;
            moved_any = true;
        }

        if !moved_any {
            return Ok(None);
        }
        self.write_block(rbn, block)?;
        self.write_block(next_rbn, &next)?;
        trace!(rbn, next_rbn, "borrowed records from succeeding neighbor");
        Ok(Some(RemoveOutcome {
            merge_occurred: false,
            changed_blocks: vec![
                (rbn, block.last_key().unwrap_or(0)),
                (next_rbn, next.last_key().unwrap_or(0)),
            ],
            freed_blocks: vec![],
        }))
    }

    /// Lists every physical RBN with its links and the zips it holds,
    /// regardless of active/available membership.
    pub fn dump_physical(&mut self) -> Result<Vec<PhysicalEntry>, Error> {
        let mut out = Vec::with_capacity(self.header.block_count as usize);
        for rbn in 1..=self.header.block_count {
            let bytes = self.file.read_block(rbn)?;
            match DataBlock::unpack(&bytes, rbn) {
                Ok(block) => out.push(PhysicalEntry {
                    rbn,
                    preceding_rbn: block.preceding_rbn,
                    succeeding_rbn: block.succeeding_rbn,
                    zips: block.records.iter().map(|r| r.zip).collect(),
                }),
                Err(_) => {
                    let next_free = unpack_avail_block(&bytes, rbn).unwrap_or(0);
                    out.push(PhysicalEntry {
                        rbn,
                        preceding_rbn: 0,
                        succeeding_rbn: next_free,
                        zips: vec![],
                    });
                }
            }
        }
        Ok(out)
    }

    /// Walks the active list then the available list, in that order.
    pub fn dump_logical(&mut self) -> Result<LogicalDump, Error> {
        let mut active_zips = Vec::new();
        let mut rbn = self.header.sequence_set_list_rbn;
        while rbn != 0 {
            let block = self.load_block(rbn)?;
            active_zips.extend(block.records.iter().map(|r| r.zip));
            rbn = block.succeeding_rbn;
        }

        let mut available_rbns = Vec::new();
        let mut rbn = self.header.available_list_rbn;
        while rbn != 0 {
            available_rbns.push(rbn);
            let bytes = self.file.read_block(rbn)?;
            rbn = unpack_avail_block(&bytes, rbn)?;
        }

        Ok(LogicalDump {
            active_zips,
            available_rbns,
        })
    }

    /// Iterates every record in the active list, in ascending key order.
    pub fn iter_records(&mut self) -> Result<Vec<ZipRecord>, Error> {
        let mut out = Vec::with_capacity(self.header.record_count as usize);
        let mut rbn = self.header.sequence_set_list_rbn;
        while rbn != 0 {
            let block = self.load_block(rbn)?;
            rbn = block.succeeding_rbn;
            out.extend(block.records);
        }
        Ok(out)
    }
}

fn insert_sorted(records: &mut Vec<ZipRecord>, record: ZipRecord) {
    let pos = records.partition_point(|r| r.zip < record.zip);
    records.insert(pos, record);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_index::BlockIndex;
    use proptest::{collection::hash_set, prop_assert, prop_assert_eq, proptest};

    struct TailResolver;
    impl BlockResolver for TailResolver {
        fn resolve(&mut self, _key: u32) -> Result<Option<u32>, Error> {
            Ok(None)
        }
    }

    fn rec(zip: u32) -> ZipRecord {
        ZipRecord::new(zip, "City", "MN", "County", 44.0, -93.0).unwrap()
    }

    #[test]
    fn insert_search_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zip.zcb");
        let mut seq = SequenceSet::create(&path, 4096, 1024, "zip.idx").unwrap();
        let mut resolver = TailResolver;
        for zip in [50000, 30000, 70000] {
            seq.insert(rec(zip), &mut resolver).unwrap();
        }
        assert_eq!(seq.search(50000, &mut resolver).unwrap().zip, 50000);
        assert!(seq.search(99999, &mut resolver).is_err());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zip.zcb");
        let mut seq = SequenceSet::create(&path, 4096, 1024, "zip.idx").unwrap();
        let mut resolver = TailResolver;
        seq.insert(rec(50000), &mut resolver).unwrap();
        let err = seq.insert(rec(50000), &mut resolver).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }));
    }

    #[test]
    fn split_occurs_when_block_overflows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zip.zcb");
        let mut seq = SequenceSet::create(&path, 256, 64, "zip.idx").unwrap();
        let mut resolver = TailResolver;
        let mut split_seen = false;
        for i in 0..30 {
            let outcome = seq.insert(rec(1000 + i), &mut resolver).unwrap();
            if outcome.split_occurred {
                split_seen = true;
            }
        }
        assert!(split_seen);
        assert!(seq.block_count() > 1);

        let mut idx = BlockIndex::build_from_sequence_set(&mut seq).unwrap();
        let mut all_zips: Vec<u32> = Vec::new();
        let mut rbn = seq.head_rbn();
        while rbn != 0 {
            let block = seq.load_block(rbn).unwrap();
            all_zips.extend(block.records.iter().map(|r| r.zip));
            rbn = block.succeeding_rbn;
        }
        let mut sorted = all_zips.clone();
        sorted.sort_unstable();
        assert_eq!(all_zips, sorted, "active list must stay sorted after splits");
        idx.rebuild(&mut seq).unwrap();
    }

    #[test]
    fn merge_occurs_when_block_becomes_underfull() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zip.zcb");
        let mut seq = SequenceSet::create(&path, 256, 64, "zip.idx").unwrap();
        let mut resolver = TailResolver;
        for i in 0..30 {
            seq.insert(rec(1000 + i), &mut resolver).unwrap();
        }
        let before_blocks = seq.block_count();
        let mut idx = BlockIndex::build_from_sequence_set(&mut seq).unwrap();
        let mut merged_any = false;
        for i in 0..25 {
            let rbn = idx.find_rbn_for_key(1000 + i).unwrap();
            let outcome = seq.remove(1000 + i, &mut FixedResolver(rbn)).unwrap();
            if outcome.merge_occurred {
                merged_any = true;
            }
            idx.rebuild(&mut seq).unwrap();
        }
        assert!(merged_any);
        assert!(seq.block_count() <= before_blocks);
    }

    struct FixedResolver(u32);
    impl BlockResolver for FixedResolver {
        fn resolve(&mut self, _key: u32) -> Result<Option<u32>, Error> {
            Ok(Some(self.0))
        }
    }

    #[test]
    fn removing_last_record_of_sole_block_keeps_store_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zip.zcb");
        let mut seq = SequenceSet::create(&path, 4096, 1024, "zip.idx").unwrap();
        let mut resolver = TailResolver;
        seq.insert(rec(50000), &mut resolver).unwrap();
        seq.remove(50000, &mut resolver).unwrap();
        assert_eq!(seq.block_count(), 1);
        assert_eq!(seq.record_count(), 0);
        let dump = seq.dump_logical().unwrap();
        assert!(dump.available_rbns.is_empty());
    }

    /// Walks the active list from the head, returning each block's RBN
    /// alongside the block itself.
    fn active_blocks(seq: &mut SequenceSet) -> Vec<(u32, DataBlock)> {
        let mut out = Vec::new();
        let mut rbn = seq.head_rbn();
        while rbn != 0 {
            let block = seq.load_block(rbn).unwrap();
            let next = block.succeeding_rbn;
            out.push((rbn, block));
            rbn = next;
        }
        out
    }

    proptest! {
        /// P1, P2, P3, P4 after inserting an arbitrary set of distinct zips
        /// in arbitrary order, resolved through a rebuilt [`BlockIndex`]
        /// rather than always landing on the tail.
        #[test]
        fn arbitrary_inserts_preserve_block_invariants(
            zips in hash_set(1u32..60_000u32, 1..40)
        ) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("zip.zcb");
            let mut seq = SequenceSet::create(&path, 200, 64, "zip.idx").unwrap();
            let mut idx = BlockIndex::build_from_sequence_set(&mut seq).unwrap();

            for &zip in &zips {
                seq.insert(rec(zip), &mut idx).unwrap();
                idx.rebuild(&mut seq).unwrap();
            }

            let blocks = active_blocks(&mut seq);

            // P1: every active block fits within blockSize.
            for (_, block) in &blocks {
                prop_assert!(block.occupied() <= seq.block_size());
            }

            // P2: the concatenation across the active list is strictly ascending.
            let concatenated: Vec<u32> = blocks
                .iter()
                .flat_map(|(_, b)| b.records.iter().map(|r| r.zip))
                .collect();
            let mut expected: Vec<u32> = zips.iter().copied().collect();
            expected.sort_unstable();
            prop_assert_eq!(&concatenated, &expected);
            prop_assert!(concatenated.windows(2).all(|w| w[0] < w[1]));

            // P3: every non-sole active block clears the minimum fill.
            if blocks.len() > 1 {
                for (_, block) in &blocks {
                    prop_assert!(block.occupied() >= seq.min_block_size());
                }
            }

            // P4: active and available RBNs are disjoint and cover blockCount.
            let dump = seq.dump_logical().unwrap();
            let active_rbns: std::collections::HashSet<u32> =
                blocks.iter().map(|(rbn, _)| *rbn).collect();
            let available_rbns: std::collections::HashSet<u32> =
                dump.available_rbns.iter().copied().collect();
            prop_assert!(active_rbns.is_disjoint(&available_rbns));
            prop_assert_eq!(
                (active_rbns.len() + available_rbns.len()) as u32,
                seq.block_count()
            );
        }
    }
}
