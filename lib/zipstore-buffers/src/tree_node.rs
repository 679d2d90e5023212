//! Tree node codec (C6): pack/unpack a B+ tree index or leaf node into a
//! fixed-size page.
//!
//! Every node shares a 9-byte header (`isLeaf`, `keyCount`, `parentRBN`).
//! Leaves add two more pointers (`prevLeafRBN`, `nextLeafRBN`) before
//! their `(key, value)` pairs; internal nodes store `keyCount` keys
//! followed by `keyCount + 1` child pointers.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{BadNodeKindSnafu, Error, ShortPageSnafu};

/// Fixed overhead before the first leaf entry: isLeaf(1) + keyCount(4) +
/// parentRBN(4) + prevLeafRBN(4) + nextLeafRBN(4) = 17.
pub const LEAF_FIXED_OVERHEAD: usize = 17;

/// Fixed overhead before an internal node's keys: isLeaf(1) + keyCount(4)
/// + parentRBN(4) + one extra child word(4) = 13.
pub const INTERNAL_FIXED_OVERHEAD: usize = 13;

/// Per-entry width: one `u32` key plus one `u32` value/child = 8 bytes.
pub const ENTRY_WIDTH: usize = 8;

/// Maximum number of keys a node of page size `page_size` can hold.
pub fn max_keys(page_size: usize, is_leaf: bool) -> usize {
    let fixed = if is_leaf {
        LEAF_FIXED_OVERHEAD
    } else {
        INTERNAL_FIXED_OVERHEAD
    };
    page_size.saturating_sub(fixed) / ENTRY_WIDTH
}

/// A B+ tree node, fully materialized in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    Leaf(LeafNode),
    Internal(InternalNode),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeafNode {
    pub parent_rbn: u32,
    pub prev_leaf_rbn: u32,
    pub next_leaf_rbn: u32,
    /// `(key, value)` pairs in ascending key order; `value` is a
    /// sequence-set RBN.
    pub entries: Vec<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InternalNode {
    pub parent_rbn: u32,
    pub keys: Vec<u32>,
    /// Always `keys.len() + 1` entries.
    pub children: Vec<u32>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf(_))
    }

    pub fn key_count(&self) -> usize {
        match self {
            TreeNode::Leaf(leaf) => leaf.entries.len(),
            TreeNode::Internal(internal) => internal.keys.len(),
        }
    }

    pub fn parent_rbn(&self) -> u32 {
        match self {
            TreeNode::Leaf(leaf) => leaf.parent_rbn,
            TreeNode::Internal(internal) => internal.parent_rbn,
        }
    }

    pub fn set_parent_rbn(&mut self, rbn: u32) {
        match self {
            TreeNode::Leaf(leaf) => leaf.parent_rbn = rbn,
            TreeNode::Internal(internal) => internal.parent_rbn = rbn,
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            TreeNode::Leaf(leaf) => Some(leaf),
            TreeNode::Internal(_) => None,
        }
    }

    pub fn as_leaf_mut(&mut self) -> Option<&mut LeafNode> {
        match self {
            TreeNode::Leaf(leaf) => Some(leaf),
            TreeNode::Internal(_) => None,
        }
    }

    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            TreeNode::Internal(internal) => Some(internal),
            TreeNode::Leaf(_) => None,
        }
    }

    pub fn as_internal_mut(&mut self) -> Option<&mut InternalNode> {
        match self {
            TreeNode::Internal(internal) => Some(internal),
            TreeNode::Leaf(_) => None,
        }
    }

    pub fn pack(&self, page_size: usize) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::with_capacity(page_size);
        match self {
            TreeNode::Leaf(leaf) => {
                buf.write_u8(1).unwrap();
                buf.write_u32::<LittleEndian>(leaf.entries.len() as u32)
                    .unwrap();
                buf.write_u32::<LittleEndian>(leaf.parent_rbn).unwrap();
                buf.write_u32::<LittleEndian>(leaf.prev_leaf_rbn).unwrap();
                buf.write_u32::<LittleEndian>(leaf.next_leaf_rbn).unwrap();
                for (key, value) in &leaf.entries {
                    buf.write_u32::<LittleEndian>(*key).unwrap();
                    buf.write_u32::<LittleEndian>(*value).unwrap();
                }
            }
            TreeNode::Internal(internal) => {
                buf.write_u8(0).unwrap();
                buf.write_u32::<LittleEndian>(internal.keys.len() as u32)
                    .unwrap();
                buf.write_u32::<LittleEndian>(internal.parent_rbn).unwrap();
                for key in &internal.keys {
                    buf.write_u32::<LittleEndian>(*key).unwrap();
                }
                for child in &internal.children {
                    buf.write_u32::<LittleEndian>(*child).unwrap();
                }
            }
        }
        if buf.len() > page_size {
            return ShortPageSnafu {
                expected: page_size,
                actual: buf.len(),
            }
            .fail();
        }
        buf.resize(page_size, 0);
        Ok(buf)
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < 9 {
            return ShortPageSnafu {
                expected: 9usize,
                actual: bytes.len(),
            }
            .fail();
        }
        let mut cursor = bytes;
        let is_leaf_byte = cursor.read_u8().unwrap();
        let key_count = cursor.read_u32::<LittleEndian>().unwrap() as usize;
        let parent_rbn = cursor.read_u32::<LittleEndian>().unwrap();

        match is_leaf_byte {
            1 => {
                if cursor.len() < 8 + key_count * ENTRY_WIDTH {
                    return ShortPageSnafu {
                        expected: 8 + key_count * ENTRY_WIDTH,
                        actual: cursor.len(),
                    }
                    .fail();
                }
                let prev_leaf_rbn = cursor.read_u32::<LittleEndian>().unwrap();
                let next_leaf_rbn = cursor.read_u32::<LittleEndian>().unwrap();
                let mut entries = Vec::with_capacity(key_count);
                for _ in 0..key_count {
                    let key = cursor.read_u32::<LittleEndian>().unwrap();
                    let value = cursor.read_u32::<LittleEndian>().unwrap();
                    entries.push((key, value));
                }
                Ok(TreeNode::Leaf(LeafNode {
                    parent_rbn,
                    prev_leaf_rbn,
                    next_leaf_rbn,
                    entries,
                }))
            }
            0 => {
                let child_count = key_count + 1;
                if cursor.len() < key_count * 4 + child_count * 4 {
                    return ShortPageSnafu {
                        expected: key_count * 4 + child_count * 4,
                        actual: cursor.len(),
                    }
                    .fail();
                }
                let mut keys = Vec::with_capacity(key_count);
                for _ in 0..key_count {
                    keys.push(cursor.read_u32::<LittleEndian>().unwrap());
                }
                let mut children = Vec::with_capacity(child_count);
                for _ in 0..child_count {
                    children.push(cursor.read_u32::<LittleEndian>().unwrap());
                }
                Ok(TreeNode::Internal(InternalNode {
                    parent_rbn,
                    keys,
                    children,
                }))
            }
            byte => BadNodeKindSnafu { byte }.fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_round_trips() {
        let leaf = TreeNode::Leaf(LeafNode {
            parent_rbn: 2,
            prev_leaf_rbn: 0,
            next_leaf_rbn: 3,
            entries: vec![(100, 1), (200, 2), (300, 3)],
        });
        let bytes = leaf.pack(256).unwrap();
        assert_eq!(bytes.len(), 256);
        let back = TreeNode::unpack(&bytes).unwrap();
        assert_eq!(leaf, back);
    }

    #[test]
    fn internal_round_trips() {
        let internal = TreeNode::Internal(InternalNode {
            parent_rbn: 0,
            keys: vec![200, 400],
            children: vec![1, 2, 3],
        });
        let bytes = internal.pack(256).unwrap();
        let back = TreeNode::unpack(&bytes).unwrap();
        assert_eq!(internal, back);
    }

    #[test]
    fn max_keys_matches_fixed_overhead_formula() {
        assert_eq!(max_keys(4096, true), (4096 - 17) / 8);
        assert_eq!(max_keys(4096, false), (4096 - 13) / 8);
    }
}
