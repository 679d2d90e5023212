//! The zipstore storage engine.
//!
//! This library implements a blocked sequence set (a doubly-linked chain
//! of fixed-size, variable-fill data blocks holding sorted ZIP-code
//! records) plus a B+ tree index over it, both addressed through relative
//! block numbers in flat files with no buffering beyond what the OS gives
//! for free.

#![allow(clippy::module_name_repetitions)]

#[macro_use]
extern crate tracing;

mod block;
pub use block::{DataBlock, BLOCK_HEADER_LEN, PADDING_BYTE};

mod block_index;
pub use block_index::{BlockIndex, BlockIndexEntry, NO_MATCH_SENTINEL};

mod btree;
pub use btree::BPlusTree;

mod error;
pub use error::{Error, Result};

mod extremes;
pub use extremes::ExtremesReducer;

mod header;
pub use header::{FieldDescriptor, SequenceSetHeader, TreeHeader};

mod paged_file;
pub use paged_file::PagedFile;

mod record;
pub use record::ZipRecord;

mod sequence_set;
pub use sequence_set::{
    BlockResolver, InsertOutcome, LogicalDump, PhysicalEntry, RemoveOutcome, SequenceSet,
};

mod tree_node;
pub use tree_node::{InternalNode, LeafNode, TreeNode};
