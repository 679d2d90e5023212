//! B+ tree engine (C7): bulk build from the sequence set, point search,
//! range scan, and recursive insert/remove with split, borrow, and merge.
//!
//! The tree's parent/child relation is never walked backwards during
//! mutation: the parent RBN and child index are carried down the
//! recursion, so borrow/merge can patch the parent's separator without
//! re-reading upward through the file. Freed tree pages are never
//! reused: `allocateTreeBlock` only ever grows `indexBlockCount`.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace};

use crate::error::{DuplicateKeySnafu, Error, NotFoundSnafu, TreeInvariantSnafu};
use crate::header::TreeHeader;
use crate::paged_file::PagedFile;
use crate::sequence_set::{BlockResolver, SequenceSet};
use crate::tree_node::{self, InternalNode, LeafNode, TreeNode};

/// A bound on recursive/iterative descent depth: `height` plus a small
/// constant, guarding against on-disk corruption producing a cycle.
const DESCENT_SLACK: u32 = 4;

pub struct BPlusTree {
    file: PagedFile,
    header: TreeHeader,
    path: PathBuf,
}

impl BPlusTree {
    pub fn create(path: impl AsRef<Path>, data_filename: impl Into<String>, block_size: u32) -> Result<Self, Error> {
        let header = TreeHeader::new(data_filename, block_size);
        let header_size = header.header_size();
        let mut file = PagedFile::create(path.as_ref(), header_size, block_size as usize)?;
        file.write_at(0, &header.to_bytes())?;
        Ok(Self {
            file,
            header,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let prefix = {
            let mut probe = PagedFile::open(path.as_ref(), 0, 1)?;
            probe.read_at(0, 4096)?
        };
        let header = TreeHeader::from_bytes(&prefix)?;
        let header_size = header.header_size();
        let file = PagedFile::open(path.as_ref(), header_size, header.block_size as usize)?;
        Ok(Self {
            file,
            header,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn root_rbn(&self) -> u32 {
        self.header.root_index_rbn
    }

    fn page_size(&self) -> usize {
        self.header.block_size as usize
    }

    fn max_keys(&self, is_leaf: bool) -> usize {
        tree_node::max_keys(self.page_size(), is_leaf)
    }

    fn load_node(&mut self, rbn: u32) -> Result<TreeNode, Error> {
        let bytes = self.file.read_block(rbn)?;
        TreeNode::unpack(&bytes)
    }

    fn write_node(&mut self, rbn: u32, node: &TreeNode) -> Result<(), Error> {
        let bytes = node.pack(self.page_size())?;
        self.file.write_block(rbn, &bytes)
    }

    fn set_parent(&mut self, rbn: u32, parent_rbn: u32) -> Result<(), Error> {
        let mut node = self.load_node(rbn)?;
        node.set_parent_rbn(parent_rbn);
        self.write_node(rbn, &node)
    }

    /// `allocateTreeBlock`: monotonic allocation, never reuses freed pages.
    fn allocate_tree_block(&mut self) -> u32 {
        self.header.index_block_count += 1;
        self.header.index_block_count
    }

    fn persist_header(&mut self) -> Result<(), Error> {
        self.file.write_at(0, &self.header.to_bytes())
    }

    /// Bulk-builds the tree bottom-up from a sequence set's active list.
    #[instrument(level = "debug", skip(self, seq))]
    pub fn build_from_sequence_set(&mut self, seq: &mut SequenceSet) -> Result<(), Error> {
        let mut entries = Vec::new();
        let mut rbn = seq.head_rbn();
        while rbn != 0 {
            let block = seq.load_block(rbn)?;
            if let Some(last_key) = block.last_key() {
                entries.push((last_key, rbn));
            }
            rbn = block.succeeding_rbn;
        }

        if entries.is_empty() {
            self.header.height = 0;
            self.header.root_index_rbn = 0;
            self.persist_header()?;
            return Ok(());
        }

        let max_leaf = self.max_keys(true);
        let leaf_groups: Vec<Vec<(u32, u32)>> = entries.chunks(max_leaf).map(<[_]>::to_vec).collect();
        let leaf_rbns: Vec<u32> = leaf_groups.iter().map(|_| self.allocate_tree_block()).collect();

        let mut level: Vec<(u32, u32)> = Vec::with_capacity(leaf_groups.len());
        for (i, group) in leaf_groups.iter().enumerate() {
            let prev = if i > 0 { leaf_rbns[i - 1] } else { 0 };
            let next = if i + 1 < leaf_rbns.len() { leaf_rbns[i + 1] } else { 0 };
            let min_key = group[0].0;
            let leaf = LeafNode {
                parent_rbn: 0,
                prev_leaf_rbn: prev,
                next_leaf_rbn: next,
                entries: group.clone(),
            };
            self.write_node(leaf_rbns[i], &TreeNode::Leaf(leaf))?;
            level.push((leaf_rbns[i], min_key));
        }
        debug!(leaves = level.len(), "built leaf level");

        let mut height = 1;
        while level.len() > 1 {
            let max_internal = self.max_keys(false);
            let group_size = max_internal + 1;
            let groups: Vec<Vec<(u32, u32)>> = level.chunks(group_size).map(<[_]>::to_vec).collect();
            let mut next_level = Vec::with_capacity(groups.len());
            for group in &groups {
                let rbn = self.allocate_tree_block();
                let keys: Vec<u32> = group[1..].iter().map(|(_, min_key)| *min_key).collect();
                let children: Vec<u32> = group.iter().map(|(rbn, _)| *rbn).collect();
                let min_key = group[0].1;
                for (child_rbn, _) in group {
                    self.set_parent(*child_rbn, rbn)?;
                }
                let internal = InternalNode {
                    parent_rbn: 0,
                    keys,
                    children,
                };
                self.write_node(rbn, &TreeNode::Internal(internal))?;
                next_level.push((rbn, min_key));
            }
            level = next_level;
            height += 1;
        }

        self.header.root_index_rbn = level[0].0;
        self.header.height = height;
        self.persist_header()?;
        debug!(height, root = level[0].0, "finished bulk build");
        Ok(())
    }

    /// search(key) → value paired with the smallest key ≥ `key` within
    /// the leaf the descent reaches; `NotFound` if that key does not
    /// equal the search key or the tree is empty.
    #[instrument(level = "debug", skip(self))]
    pub fn search(&mut self, key: u32) -> Result<u32, Error> {
        let (_, leaf) = self.descend_to_leaf(key)?;
        leaf.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .ok_or(Error::NotFound { key })
    }

    /// Identical descent to `search`, but returns the value the leaf scan
    /// would land on even if `key` itself is absent — the RBN a caller
    /// should target to insert `key`.
    #[instrument(level = "debug", skip(self))]
    pub fn find_insertion_block(&mut self, key: u32) -> Result<u32, Error> {
        let (_, leaf) = self.descend_to_leaf(key)?;
        if let Some((_, value)) = leaf.entries.iter().find(|(k, _)| *k >= key) {
            return Ok(*value);
        }
        leaf.entries
            .last()
            .map(|(_, v)| *v)
            .ok_or(Error::NotFound { key })
    }

    fn descend_to_leaf(&mut self, key: u32) -> Result<(u32, LeafNode), Error> {
        if self.header.root_index_rbn == 0 {
            return NotFoundSnafu { key }.fail();
        }
        let bound = self.header.height + DESCENT_SLACK;
        let mut rbn = self.header.root_index_rbn;
        for _ in 0..=bound {
            match self.load_node(rbn)? {
                TreeNode::Internal(internal) => {
                    let idx = find_child_index(&internal.keys, key);
                    rbn = internal.children[idx];
                }
                TreeNode::Leaf(leaf) => return Ok((rbn, leaf)),
            }
        }
        TreeInvariantSnafu { bound, rbn }.fail()
    }

    /// searchRange(lo, hi): descend to the leaf containing `lo`, then walk
    /// `nextLeafRBN` collecting every value whose key lies in `[lo, hi]`.
    #[instrument(level = "debug", skip(self))]
    pub fn search_range(&mut self, lo: u32, hi: u32) -> Result<Vec<u32>, Error> {
        if self.header.root_index_rbn == 0 {
            return Ok(Vec::new());
        }
        let (mut rbn, mut leaf) = self.descend_to_leaf(lo)?;
        let mut out = Vec::new();
        loop {
            for (k, v) in &leaf.entries {
                if *k > hi {
                    return Ok(out);
                }
                if *k >= lo {
                    out.push(*v);
                }
            }
            if leaf.next_leaf_rbn == 0 {
                return Ok(out);
            }
            rbn = leaf.next_leaf_rbn;
            leaf = match self.load_node(rbn)? {
                TreeNode::Leaf(leaf) => leaf,
                TreeNode::Internal(_) => {
                    return TreeInvariantSnafu {
                        bound: self.header.height + DESCENT_SLACK,
                        rbn,
                    }
                    .fail()
                }
            };
        }
    }

    /// insert(key, value): descend recursively, splitting any node that
    /// overflows and promoting the separator, possibly growing the root.
    #[instrument(level = "debug", skip(self))]
    pub fn insert(&mut self, key: u32, value: u32) -> Result<(), Error> {
        if self.header.root_index_rbn == 0 {
            let rbn = self.allocate_tree_block();
            let leaf = LeafNode {
                parent_rbn: 0,
                prev_leaf_rbn: 0,
                next_leaf_rbn: 0,
                entries: vec![(key, value)],
            };
            self.write_node(rbn, &TreeNode::Leaf(leaf))?;
            self.header.root_index_rbn = rbn;
            self.header.height = 1;
            self.persist_header()?;
            return Ok(());
        }

        if let Split { promoted_key, new_rbn } =
            self.insert_recursive(self.header.root_index_rbn, key, value)?
        {
            let old_root = self.header.root_index_rbn;
            let new_root_rbn = self.allocate_tree_block();
            let new_root = InternalNode {
                parent_rbn: 0,
                keys: vec![promoted_key],
                children: vec![old_root, new_rbn],
            };
            self.write_node(new_root_rbn, &TreeNode::Internal(new_root))?;
            self.set_parent(old_root, new_root_rbn)?;
            self.set_parent(new_rbn, new_root_rbn)?;
            self.header.root_index_rbn = new_root_rbn;
            self.header.height += 1;
            debug!(new_root_rbn, height = self.header.height, "root split, height increased");
        }
        self.persist_header()?;
        Ok(())
    }

    fn insert_recursive(&mut self, rbn: u32, key: u32, value: u32) -> Result<MaybeSplit, Error> {
        match self.load_node(rbn)? {
            TreeNode::Leaf(mut leaf) => {
                if leaf.entries.iter().any(|(k, _)| *k == key) {
                    return DuplicateKeySnafu { key }.fail();
                }
                let pos = leaf.entries.partition_point(|(k, _)| *k < key);
                leaf.entries.insert(pos, (key, value));

                let max_leaf = self.max_keys(true);
                if leaf.entries.len() <= max_leaf {
                    self.write_node(rbn, &TreeNode::Leaf(leaf))?;
                    return Ok(MaybeSplit::none());
                }

                let split_point = (leaf.entries.len() + 1) / 2;
                let right_entries = leaf.entries.split_off(split_point);
                let promoted_key = right_entries[0].0;
                let new_rbn = self.allocate_tree_block();

                let old_next = leaf.next_leaf_rbn;
                let right = LeafNode {
                    parent_rbn: leaf.parent_rbn,
                    prev_leaf_rbn: rbn,
                    next_leaf_rbn: old_next,
                    entries: right_entries,
                };
                leaf.next_leaf_rbn = new_rbn;

                self.write_node(rbn, &TreeNode::Leaf(leaf))?;
                self.write_node(new_rbn, &TreeNode::Leaf(right))?;
                if old_next != 0 {
                    if let TreeNode::Leaf(mut next_leaf) = self.load_node(old_next)? {
                        next_leaf.prev_leaf_rbn = new_rbn;
                        self.write_node(old_next, &TreeNode::Leaf(next_leaf))?;
                    }
                }
                trace!(rbn, new_rbn, promoted_key, "leaf split");
                Ok(MaybeSplit::some(promoted_key, new_rbn))
            }
            TreeNode::Internal(mut internal) => {
                let idx = find_child_index(&internal.keys, key);
                let child_rbn = internal.children[idx];
                let split = self.insert_recursive(child_rbn, key, value)?;
                let Split { promoted_key, new_rbn } = split else {
                    return Ok(MaybeSplit::none());
                };

                internal.keys.insert(idx, promoted_key);
                internal.children.insert(idx + 1, new_rbn);
                self.set_parent(new_rbn, rbn)?;

                let max_internal = self.max_keys(false);
                if internal.keys.len() <= max_internal {
                    self.write_node(rbn, &TreeNode::Internal(internal))?;
                    return Ok(MaybeSplit::none());
                }

                let mid = internal.keys.len() / 2;
                let promoted = internal.keys[mid];
                let right_keys = internal.keys.split_off(mid + 1);
                internal.keys.pop(); // drop the promoted key itself
                let right_children = internal.children.split_off(mid + 1);

                let new_internal_rbn = self.allocate_tree_block();
                let right = InternalNode {
                    parent_rbn: internal.parent_rbn,
                    keys: right_keys,
                    children: right_children,
                };
                for &child in &right.children {
                    self.set_parent(child, new_internal_rbn)?;
                }
                self.write_node(rbn, &TreeNode::Internal(internal))?;
                self.write_node(new_internal_rbn, &TreeNode::Internal(right))?;
                trace!(rbn, new_internal_rbn, promoted, "internal split");
                Ok(MaybeSplit::some(promoted, new_internal_rbn))
            }
        }
    }

    /// remove(key): descend recursively carrying `(parentRBN, indexInParent)`,
    /// repairing underfull nodes via borrow then merge on the way back up.
    #[instrument(level = "debug", skip(self))]
    pub fn remove(&mut self, key: u32) -> Result<(), Error> {
        if self.header.root_index_rbn == 0 {
            return NotFoundSnafu { key }.fail();
        }
        self.remove_recursive(self.header.root_index_rbn, None, None, key, 0)?;
        self.persist_header()?;
        Ok(())
    }

    fn remove_recursive(
        &mut self,
        rbn: u32,
        parent_rbn: Option<u32>,
        idx_in_parent: Option<usize>,
        key: u32,
        depth: u32,
    ) -> Result<(), Error> {
        if depth > self.header.height + DESCENT_SLACK {
            return TreeInvariantSnafu {
                bound: self.header.height + DESCENT_SLACK,
                rbn,
            }
            .fail();
        }
        match self.load_node(rbn)? {
            TreeNode::Leaf(mut leaf) => {
                let pos = leaf
                    .entries
                    .iter()
                    .position(|(k, _)| *k == key)
                    .ok_or(Error::NotFound { key })?;
                leaf.entries.remove(pos);
                let new_first = leaf.entries.first().map(|(k, _)| *k);
                self.write_node(rbn, &TreeNode::Leaf(leaf))?;

                if pos == 0 {
                    if let (Some(pr), Some(idx)) = (parent_rbn, idx_in_parent) {
                        if idx > 0 {
                            if let Some(first_key) = new_first {
                                self.update_separator(pr, idx - 1, first_key)?;
                            }
                        }
                    }
                }
            }
            TreeNode::Internal(internal) => {
                let idx = find_child_index(&internal.keys, key);
                let child_rbn = internal.children[idx];
                self.remove_recursive(child_rbn, Some(rbn), Some(idx), key, depth + 1)?;
            }
        }

        self.repair_node(rbn, parent_rbn, idx_in_parent)
    }

    fn update_separator(&mut self, parent_rbn: u32, key_idx: usize, new_key: u32) -> Result<(), Error> {
        if let TreeNode::Internal(mut internal) = self.load_node(parent_rbn)? {
            internal.keys[key_idx] = new_key;
            self.write_node(parent_rbn, &TreeNode::Internal(internal))?;
        }
        Ok(())
    }

    fn repair_node(
        &mut self,
        rbn: u32,
        parent_rbn: Option<u32>,
        idx_in_parent: Option<usize>,
    ) -> Result<(), Error> {
        let node = self.load_node(rbn)?;
        let is_leaf = node.is_leaf();
        let max_keys = self.max_keys(is_leaf);
        // Leaf splits divide max_keys+1 entries (even when max_keys is odd), so
        // both sides reach the ceiling. Internal splits promote one of those
        // max_keys+1 keys away, leaving only max_keys to divide between the two
        // siblings, so only the floor is guaranteed when max_keys is odd.
        let min_keys = if is_leaf { max_keys.div_ceil(2) } else { max_keys / 2 };
        let key_count = node.key_count();
        let is_root = self.header.root_index_rbn == rbn;

        if is_root {
            if !is_leaf && key_count == 0 {
                let internal = node.as_internal().expect("checked is_leaf above");
                let new_root = internal.children[0];
                self.set_parent(new_root, 0)?;
                self.header.root_index_rbn = new_root;
                self.header.height -= 1;
                debug!(new_root, height = self.header.height, "root collapsed");
            }
            return Ok(());
        }

        if key_count >= min_keys {
            return Ok(());
        }
        let (parent_rbn, idx) = match (parent_rbn, idx_in_parent) {
            (Some(p), Some(i)) => (p, i),
            _ => return Ok(()),
        };
        let parent = match self.load_node(parent_rbn)? {
            TreeNode::Internal(internal) => internal,
            TreeNode::Leaf(_) => unreachable!("a node's parent is always internal"),
        };

        if idx + 1 < parent.children.len() {
            let right_rbn = parent.children[idx + 1];
            if self.try_borrow(rbn, right_rbn, parent_rbn, idx, is_leaf, min_keys, true)? {
                return Ok(());
            }
        }
        if idx > 0 {
            let left_rbn = parent.children[idx - 1];
            if self.try_borrow(rbn, left_rbn, parent_rbn, idx, is_leaf, min_keys, false)? {
                return Ok(());
            }
        }
        if idx + 1 < parent.children.len() {
            let right_rbn = parent.children[idx + 1];
            self.merge(rbn, right_rbn, parent_rbn, idx, is_leaf, true)?;
            return Ok(());
        }
        if idx > 0 {
            let left_rbn = parent.children[idx - 1];
            self.merge(rbn, left_rbn, parent_rbn, idx, is_leaf, false)?;
        }
        Ok(())
    }

    /// Tries to borrow one entry/child from a sibling (`from_right` picks
    /// which side); returns whether it happened.
    #[allow(clippy::too_many_arguments)]
    fn try_borrow(
        &mut self,
        rbn: u32,
        sibling_rbn: u32,
        parent_rbn: u32,
        idx: usize,
        is_leaf: bool,
        min_keys: usize,
        from_right: bool,
    ) -> Result<bool, Error> {
        if is_leaf {
            let mut node = self.load_leaf(rbn)?;
            let mut sibling = self.load_leaf(sibling_rbn)?;
            if sibling.entries.len() <= min_keys {
                return Ok(false);
            }
            if from_right {
                let moved = sibling.entries.remove(0);
                node.entries.push(moved);
                self.update_separator(parent_rbn, idx, sibling.entries[0].0)?;
            } else {
                let moved = sibling.entries.pop().expect("checked len > min_keys >= 0");
                node.entries.insert(0, moved);
                self.update_separator(parent_rbn, idx - 1, node.entries[0].0)?;
            }
            self.write_node(rbn, &TreeNode::Leaf(node))?;
            self.write_node(sibling_rbn, &TreeNode::Leaf(sibling))?;
            trace!(rbn, sibling_rbn, from_right, "leaf borrow");
            Ok(true)
        } else {
            let mut node = self.load_internal(rbn)?;
            let mut sibling = self.load_internal(sibling_rbn)?;
            if sibling.keys.len() <= min_keys {
                return Ok(false);
            }
            if from_right {
                let pulled = self.separator(parent_rbn, idx)?;
                node.keys.push(pulled);
                let moved_child = sibling.children.remove(0);
                let new_sep = sibling.keys.remove(0);
                node.children.push(moved_child);
                self.set_parent(moved_child, rbn)?;
                self.update_separator(parent_rbn, idx, new_sep)?;
            } else {
                let pulled = self.separator(parent_rbn, idx - 1)?;
                node.keys.insert(0, pulled);
                let moved_child = sibling.children.pop().expect("checked len > min_keys >= 0");
                let new_sep = sibling.keys.pop().expect("checked len > min_keys >= 0");
                node.children.insert(0, moved_child);
                self.set_parent(moved_child, rbn)?;
                self.update_separator(parent_rbn, idx - 1, new_sep)?;
            }
            self.write_node(rbn, &TreeNode::Internal(node))?;
            self.write_node(sibling_rbn, &TreeNode::Internal(sibling))?;
            trace!(rbn, sibling_rbn, from_right, "internal borrow");
            Ok(true)
        }
    }

    /// Merges `rbn` with a sibling (`with_right` picks which side),
    /// removing the now-dead separator and child slot from the parent.
    fn merge(
        &mut self,
        rbn: u32,
        sibling_rbn: u32,
        parent_rbn: u32,
        idx: usize,
        is_leaf: bool,
        with_right: bool,
    ) -> Result<(), Error> {
        if is_leaf {
            let mut node = self.load_leaf(rbn)?;
            let sibling = self.load_leaf(sibling_rbn)?;
            if with_right {
                node.entries.extend(sibling.entries);
                node.next_leaf_rbn = sibling.next_leaf_rbn;
                self.write_node(rbn, &TreeNode::Leaf(node))?;
                if let Some(next_rbn) = nonzero(self.load_node(rbn)?.as_leaf().unwrap().next_leaf_rbn) {
                    if let TreeNode::Leaf(mut next) = self.load_node(next_rbn)? {
                        next.prev_leaf_rbn = rbn;
                        self.write_node(next_rbn, &TreeNode::Leaf(next))?;
                    }
                }
                self.remove_parent_slot(parent_rbn, idx, idx + 1)?;
                debug!(rbn, dead_rbn = sibling_rbn, "leaf merged with right sibling");
            } else {
                let mut left = self.load_leaf(sibling_rbn)?;
                left.entries.extend(node.entries);
                left.next_leaf_rbn = node.next_leaf_rbn;
                self.write_node(sibling_rbn, &TreeNode::Leaf(left.clone()))?;
                if let Some(next_rbn) = nonzero(left.next_leaf_rbn) {
                    if let TreeNode::Leaf(mut next) = self.load_node(next_rbn)? {
                        next.prev_leaf_rbn = sibling_rbn;
                        self.write_node(next_rbn, &TreeNode::Leaf(next))?;
                    }
                }
                self.remove_parent_slot(parent_rbn, idx - 1, idx)?;
                debug!(rbn = sibling_rbn, dead_rbn = rbn, "leaf merged with left sibling");
            }
        } else {
            let node = self.load_internal(rbn)?;
            let sibling = self.load_internal(sibling_rbn)?;
            if with_right {
                let separator = self.separator(parent_rbn, idx)?;
                let mut merged = node;
                merged.keys.push(separator);
                merged.keys.extend(sibling.keys);
                merged.children.extend(sibling.children.clone());
                for &child in &sibling.children {
                    self.set_parent(child, rbn)?;
                }
                self.write_node(rbn, &TreeNode::Internal(merged))?;
                self.remove_parent_slot(parent_rbn, idx, idx + 1)?;
                debug!(rbn, dead_rbn = sibling_rbn, "internal merged with right sibling");
            } else {
                let separator = self.separator(parent_rbn, idx - 1)?;
                let mut merged = sibling;
                merged.keys.push(separator);
                merged.keys.extend(node.keys);
                merged.children.extend(node.children.clone());
                for &child in &node.children {
                    self.set_parent(child, sibling_rbn)?;
                }
                self.write_node(sibling_rbn, &TreeNode::Internal(merged))?;
                self.remove_parent_slot(parent_rbn, idx - 1, idx)?;
                debug!(rbn = sibling_rbn, dead_rbn = rbn, "internal merged with left sibling");
            }
        }
        Ok(())
    }

    fn remove_parent_slot(&mut self, parent_rbn: u32, key_idx: usize, child_idx: usize) -> Result<(), Error> {
        if let TreeNode::Internal(mut internal) = self.load_node(parent_rbn)? {
            internal.keys.remove(key_idx);
            internal.children.remove(child_idx);
            self.write_node(parent_rbn, &TreeNode::Internal(internal))?;
        }
        Ok(())
    }

    fn separator(&mut self, parent_rbn: u32, key_idx: usize) -> Result<u32, Error> {
        match self.load_node(parent_rbn)? {
            TreeNode::Internal(internal) => Ok(internal.keys[key_idx]),
            TreeNode::Leaf(_) => unreachable!("a node's parent is always internal"),
        }
    }

    fn load_leaf(&mut self, rbn: u32) -> Result<LeafNode, Error> {
        match self.load_node(rbn)? {
            TreeNode::Leaf(leaf) => Ok(leaf),
            TreeNode::Internal(_) => unreachable!("caller already checked is_leaf"),
        }
    }

    fn load_internal(&mut self, rbn: u32) -> Result<InternalNode, Error> {
        match self.load_node(rbn)? {
            TreeNode::Internal(internal) => Ok(internal),
            TreeNode::Leaf(_) => unreachable!("caller already checked is_leaf"),
        }
    }
}

fn nonzero(rbn: u32) -> Option<u32> {
    (rbn != 0).then_some(rbn)
}

/// `findChildIndex`: walk from the left, returning at the first `key <
/// keys[i]`; else return `keys.len()` (the rightmost child).
fn find_child_index(keys: &[u32], key: u32) -> usize {
    keys.iter().position(|&k| key < k).unwrap_or(keys.len())
}

enum MaybeSplit {
    None,
    Split { promoted_key: u32, new_rbn: u32 },
}
use MaybeSplit::Split;

impl MaybeSplit {
    fn none() -> Self {
        MaybeSplit::None
    }
    fn some(promoted_key: u32, new_rbn: u32) -> Self {
        MaybeSplit::Split { promoted_key, new_rbn }
    }
}

impl BlockResolver for BPlusTree {
    fn resolve(&mut self, key: u32) -> Result<Option<u32>, Error> {
        match self.find_insertion_block(key) {
            Ok(rbn) => Ok(Some(rbn)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ZipRecord;
    use proptest::{collection::btree_set, prop_assert, prop_assert_eq, proptest};

    fn rec(zip: u32) -> ZipRecord {
        ZipRecord::new(zip, "City", "MN", "County", 44.0, -93.0).unwrap()
    }

    fn build_sequence_set(dir: &std::path::Path, n: u32) -> SequenceSet {
        let path = dir.join("zip.zcb");
        let mut seq = SequenceSet::create(&path, 256, 64, "zip.idx").unwrap();
        struct Tail;
        impl BlockResolver for Tail {
            fn resolve(&mut self, _k: u32) -> Result<Option<u32>, Error> {
                Ok(None)
            }
        }
        let mut resolver = Tail;
        for i in 0..n {
            seq.insert(rec(1000 + i * 10), &mut resolver).unwrap();
        }
        seq
    }

    #[test]
    fn bulk_build_then_search_finds_every_block_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut seq = build_sequence_set(dir.path(), 80);
        let mut tree = BPlusTree::create(dir.path().join("zip.idx"), "zip.zcb", 256).unwrap();
        tree.build_from_sequence_set(&mut seq).unwrap();
        assert!(tree.height() >= 1);

        let mut idx = crate::block_index::BlockIndex::build_from_sequence_set(&mut seq).unwrap();
        for entry in idx.entries() {
            let found = tree.search(entry.last_key).unwrap();
            assert_eq!(found, entry.rbn);
        }
        assert!(tree.search(999_999).is_err());
        let _ = idx.rebuild(&mut seq);
    }

    #[test]
    fn insert_and_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = BPlusTree::create(dir.path().join("t.idx"), "t.zcb", 128).unwrap();
        for i in 0..60u32 {
            tree.insert(i * 7, i).unwrap();
        }
        for i in 0..60u32 {
            assert_eq!(tree.search(i * 7).unwrap(), i);
        }
        for i in (0..60u32).step_by(2) {
            tree.remove(i * 7).unwrap();
        }
        for i in (0..60u32).step_by(2) {
            assert!(tree.search(i * 7).is_err());
        }
        for i in (1..60u32).step_by(2) {
            assert_eq!(tree.search(i * 7).unwrap(), i);
        }
    }

    #[test]
    fn duplicate_insert_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = BPlusTree::create(dir.path().join("t.idx"), "t.zcb", 128).unwrap();
        tree.insert(5, 1).unwrap();
        assert!(matches!(tree.insert(5, 2), Err(Error::DuplicateKey { .. })));
    }

    #[test]
    fn range_search_returns_values_within_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = BPlusTree::create(dir.path().join("t.idx"), "t.zcb", 128).unwrap();
        for i in 0..40u32 {
            tree.insert(i * 10, i).unwrap();
        }
        let values = tree.search_range(100, 200).unwrap();
        assert_eq!(values, (10..=20).collect::<Vec<_>>());
    }

    #[test]
    fn root_collapses_after_removing_almost_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = BPlusTree::create(dir.path().join("t.idx"), "t.zcb", 96).unwrap();
        for i in 0..80u32 {
            tree.insert(i, i).unwrap();
        }
        let max_height = tree.height();
        for i in 0..79u32 {
            tree.remove(i).unwrap();
            let (_, _, depth) = validate_tree(&mut tree);
            assert_eq!(depth, tree.height());
        }
        assert!(tree.height() <= max_height);
        assert_eq!(tree.search(79).unwrap(), 79);
    }

    #[test]
    fn odd_internal_fanout_stays_balanced_under_the_floor_bound() {
        // block_size=133 gives max_keys(_, false) == 15, an odd internal
        // fanout where the promoted-key split can only guarantee floor(15/2)
        // == 7 on the short side, not the ceiling of 8.
        let dir = tempfile::tempdir().unwrap();
        let mut tree = BPlusTree::create(dir.path().join("t.idx"), "t.zcb", 133).unwrap();
        assert_eq!(tree.max_keys(false), 15);
        for i in 0..500u32 {
            tree.insert(i, i * 2).unwrap();
        }
        let (_, _, depth) = validate_tree(&mut tree);
        assert_eq!(depth, tree.height());
        assert!(tree.height() >= 2, "500 keys at this page size must force an internal split");
        for i in 0..500u32 {
            assert_eq!(tree.search(i).unwrap(), i * 2);
        }
    }

    /// Recursively checks separator ordering, uniform leaf depth, and
    /// non-root key-count bounds against every node in the tree, returning
    /// the whole tree's `(min_key, max_key, depth)`.
    fn validate_tree(tree: &mut BPlusTree) -> (u32, u32, u32) {
        fn go(tree: &mut BPlusTree, rbn: u32, is_root: bool) -> (u32, u32, u32) {
            let node = tree.load_node(rbn).unwrap();
            match node {
                TreeNode::Leaf(leaf) => {
                    assert!(!leaf.entries.is_empty());
                    assert!(leaf.entries.windows(2).all(|w| w[0].0 < w[1].0));
                    if !is_root {
                        let max_keys = tree.max_keys(true);
                        assert!(leaf.entries.len() >= max_keys.div_ceil(2));
                        assert!(leaf.entries.len() <= max_keys);
                    }
                    (leaf.entries[0].0, leaf.entries[leaf.entries.len() - 1].0, 1)
                }
                TreeNode::Internal(internal) => {
                    assert_eq!(internal.children.len(), internal.keys.len() + 1);
                    if !is_root {
                        let max_keys = tree.max_keys(false);
                        // An internal split promotes one of max_keys+1 keys away,
                        // leaving max_keys to divide between the two siblings, so
                        // only the floor bound is guaranteed when max_keys is odd.
                        assert!(internal.keys.len() >= max_keys / 2);
                        assert!(internal.keys.len() <= max_keys);
                    }
                    let mut ranges = Vec::with_capacity(internal.children.len());
                    let mut child_depth = None;
                    for &child_rbn in &internal.children {
                        let (lo, hi, depth) = go(tree, child_rbn, false);
                        if let Some(d) = child_depth {
                            assert_eq!(d, depth, "every leaf must sit at the same depth");
                        }
                        child_depth = Some(depth);
                        ranges.push((lo, hi));
                    }
                    for (i, &key) in internal.keys.iter().enumerate() {
                        assert!(ranges[i].1 < key, "separator must exceed the left subtree's max key");
                        assert!(key <= ranges[i + 1].0, "separator must not exceed the right subtree's min key");
                    }
                    (ranges[0].0, ranges[ranges.len() - 1].1, child_depth.unwrap() + 1)
                }
            }
        }
        go(tree, tree.root_rbn(), true)
    }

    /// Walks from the root down the leftmost (or rightmost) child to find
    /// the first (or last) leaf in key order.
    fn edge_leaf(tree: &mut BPlusTree, leftmost: bool) -> LeafNode {
        let mut rbn = tree.root_rbn();
        loop {
            match tree.load_node(rbn).unwrap() {
                TreeNode::Leaf(leaf) => return leaf,
                TreeNode::Internal(internal) => {
                    rbn = if leftmost {
                        internal.children[0]
                    } else {
                        *internal.children.last().unwrap()
                    };
                }
            }
        }
    }

    proptest! {
        /// P5 after a bulk build from a sequence set (seed scenario 4).
        #[test]
        fn bulk_built_tree_satisfies_order_and_balance(
            zips in btree_set(1u32..1_000_000u32, 60..200)
        ) {
            let dir = tempfile::tempdir().unwrap();
            let mut seq = SequenceSet::create(dir.path().join("zip.zcb"), 256, 64, "zip.idx").unwrap();
            struct Tail;
            impl BlockResolver for Tail {
                fn resolve(&mut self, _k: u32) -> Result<Option<u32>, Error> {
                    Ok(None)
                }
            }
            let mut resolver = Tail;
            for &zip in &zips {
                seq.insert(rec(zip), &mut resolver).unwrap();
            }

            let mut tree = BPlusTree::create(dir.path().join("zip.idx2"), "zip.zcb", 256).unwrap();
            tree.build_from_sequence_set(&mut seq).unwrap();

            let (_, _, depth) = validate_tree(&mut tree);
            prop_assert_eq!(depth, tree.height());
            prop_assert!(tree.height() >= 1);
        }

        /// P5 and P6 after individual inserts drive leaf splits (seed
        /// scenario 5): the leaf chain still visits every key exactly once
        /// in order, both forwards via `nextLeafRBN` and backwards via
        /// `prevLeafRBN`.
        #[test]
        fn inserted_tree_satisfies_balance_and_leaf_chain(
            keys in btree_set(0u32..2_000u32, 40..150)
        ) {
            let dir = tempfile::tempdir().unwrap();
            let mut tree = BPlusTree::create(dir.path().join("t.idx"), "t.zcb", 128).unwrap();
            for &key in &keys {
                tree.insert(key, key).unwrap();
            }

            let (_, _, depth) = validate_tree(&mut tree);
            prop_assert_eq!(depth, tree.height());

            let expected: Vec<u32> = keys.iter().copied().collect();

            let mut forward = Vec::with_capacity(expected.len());
            let mut leaf = edge_leaf(&mut tree, true);
            loop {
                forward.extend(leaf.entries.iter().map(|(k, _)| *k));
                if leaf.next_leaf_rbn == 0 {
                    break;
                }
                leaf = tree.load_node(leaf.next_leaf_rbn).unwrap().as_leaf().unwrap().clone();
            }
            prop_assert_eq!(&forward, &expected);

            let mut backward = Vec::with_capacity(expected.len());
            let mut leaf = edge_leaf(&mut tree, false);
            loop {
                backward.splice(0..0, leaf.entries.iter().map(|(k, _)| *k));
                if leaf.prev_leaf_rbn == 0 {
                    break;
                }
                leaf = tree.load_node(leaf.prev_leaf_rbn).unwrap().as_leaf().unwrap().clone();
            }
            prop_assert_eq!(&backward, &expected);
        }
    }
}
