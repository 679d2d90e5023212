//! File headers (C8): the sequence-set file header and the B+ tree file
//! header.
//!
//! Length-prefixed strings throughout this module use a `u16` byte-length
//! prefix followed by UTF-8 bytes, adopted uniformly for the index
//! filename / schema string / companion data-file name (ample for
//! filenames and schema text, and consistent with the `u16` widths
//! already used elsewhere in the header, e.g. `minBlockSize`/`fieldCount`).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{BadMagicSnafu, BadVersionSnafu, Error, ShortHeaderSnafu};

pub const SEQUENCE_SET_MAGIC: [u8; 4] = *b"ZIPC";
pub const SEQUENCE_SET_VERSION: u16 = 1;

/// One declared field of the sequence-set schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub type_tag: u8,
}

/// The sequence-set file's header record.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceSetHeader {
    pub version: u16,
    pub size_format_type: u8,
    pub block_size: u32,
    pub min_block_size: u16,
    pub index_filename: String,
    pub schema: String,
    pub record_count: u32,
    pub block_count: u32,
    pub fields: Vec<FieldDescriptor>,
    pub primary_key_field: u8,
    pub available_list_rbn: u32,
    pub sequence_set_list_rbn: u32,
    pub stale_flag: bool,
}

impl SequenceSetHeader {
    pub fn new(block_size: u32, min_block_size: u16, index_filename: impl Into<String>) -> Self {
        Self {
            version: SEQUENCE_SET_VERSION,
            size_format_type: 0,
            block_size,
            min_block_size,
            index_filename: index_filename.into(),
            schema: "zip,location,state,county,lat,lon".to_string(),
            record_count: 0,
            block_count: 0,
            fields: default_fields(),
            primary_key_field: 0,
            available_list_rbn: 0,
            sequence_set_list_rbn: 1,
            stale_flag: false,
        }
    }

    /// Serializes the header, computing and patching `headerSize` in place.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&SEQUENCE_SET_MAGIC);
        body.write_u16::<LittleEndian>(self.version).unwrap();
        // headerSize placeholder, patched below.
        body.write_u32::<LittleEndian>(0).unwrap();
        body.write_u8(self.size_format_type).unwrap();
        body.write_u32::<LittleEndian>(self.block_size).unwrap();
        body.write_u16::<LittleEndian>(self.min_block_size).unwrap();
        write_string(&mut body, &self.index_filename);
        write_string(&mut body, &self.schema);
        body.write_u32::<LittleEndian>(self.record_count).unwrap();
        body.write_u32::<LittleEndian>(self.block_count).unwrap();
        body.write_u16::<LittleEndian>(self.fields.len() as u16)
            .unwrap();
        for field in &self.fields {
            write_string(&mut body, &field.name);
            body.write_u8(field.type_tag).unwrap();
        }
        body.write_u8(self.primary_key_field).unwrap();
        body.write_u32::<LittleEndian>(self.available_list_rbn)
            .unwrap();
        body.write_u32::<LittleEndian>(self.sequence_set_list_rbn)
            .unwrap();
        body.write_u8(self.stale_flag as u8).unwrap();

        let header_size = body.len() as u32;
        let size_bytes = header_size.to_le_bytes();
        body[6..10].copy_from_slice(&size_bytes);
        body
    }

    /// Deserializes a header from its full serialized byte run.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < 10 {
            return ShortHeaderSnafu {
                expected: 10usize,
                actual: bytes.len(),
            }
            .fail();
        }
        let mut cursor = bytes;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&cursor[..4]);
        cursor = &cursor[4..];
        if magic != SEQUENCE_SET_MAGIC {
            return BadMagicSnafu {
                expected: SEQUENCE_SET_MAGIC,
                actual: magic,
            }
            .fail();
        }
        let version = cursor.read_u16::<LittleEndian>().unwrap();
        if version != SEQUENCE_SET_VERSION {
            return BadVersionSnafu { version }.fail();
        }
        let header_size = cursor.read_u32::<LittleEndian>().unwrap();
        if (header_size as usize) > bytes.len() {
            return ShortHeaderSnafu {
                expected: header_size as usize,
                actual: bytes.len(),
            }
            .fail();
        }
        let size_format_type = cursor.read_u8().unwrap();
        let block_size = cursor.read_u32::<LittleEndian>().unwrap();
        let min_block_size = cursor.read_u16::<LittleEndian>().unwrap();
        let index_filename = read_string(&mut cursor)?;
        let schema = read_string(&mut cursor)?;
        let record_count = cursor.read_u32::<LittleEndian>().unwrap();
        let block_count = cursor.read_u32::<LittleEndian>().unwrap();
        let field_count = cursor.read_u16::<LittleEndian>().unwrap();
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let name = read_string(&mut cursor)?;
            let type_tag = cursor.read_u8().unwrap();
            fields.push(FieldDescriptor { name, type_tag });
        }
        let primary_key_field = cursor.read_u8().unwrap();
        let available_list_rbn = cursor.read_u32::<LittleEndian>().unwrap();
        let sequence_set_list_rbn = cursor.read_u32::<LittleEndian>().unwrap();
        let stale_flag = cursor.read_u8().unwrap() != 0;

        Ok(Self {
            version,
            size_format_type,
            block_size,
            min_block_size,
            index_filename,
            schema,
            record_count,
            block_count,
            fields,
            primary_key_field,
            available_list_rbn,
            sequence_set_list_rbn,
            stale_flag,
        })
    }

    pub fn header_size(&self) -> u64 {
        self.to_bytes().len() as u64
    }
}

fn default_fields() -> Vec<FieldDescriptor> {
    [("zip", 0u8), ("location", 1), ("state", 1), ("county", 1), ("lat", 2), ("lon", 2)]
        .into_iter()
        .map(|(name, type_tag)| FieldDescriptor {
            name: name.to_string(),
            type_tag,
        })
        .collect()
}

/// The B+ tree file's header record.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeHeader {
    pub data_filename: String,
    pub height: u32,
    pub root_index_rbn: u32,
    pub index_start_rbn: u32,
    pub index_block_count: u32,
    pub block_size: u32,
}

impl TreeHeader {
    pub fn new(data_filename: impl Into<String>, block_size: u32) -> Self {
        Self {
            data_filename: data_filename.into(),
            height: 0,
            root_index_rbn: 0,
            index_start_rbn: 1,
            index_block_count: 0,
            block_size,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        // headerSize placeholder, patched below.
        body.write_u32::<LittleEndian>(0).unwrap();
        write_string(&mut body, &self.data_filename);
        body.write_u32::<LittleEndian>(self.height).unwrap();
        body.write_u32::<LittleEndian>(self.root_index_rbn).unwrap();
        body.write_u32::<LittleEndian>(self.index_start_rbn).unwrap();
        body.write_u32::<LittleEndian>(self.index_block_count)
            .unwrap();
        body.write_u32::<LittleEndian>(self.block_size).unwrap();

        let header_size = body.len() as u32;
        body[0..4].copy_from_slice(&header_size.to_le_bytes());
        body
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < 4 {
            return ShortHeaderSnafu {
                expected: 4usize,
                actual: bytes.len(),
            }
            .fail();
        }
        let mut cursor = bytes;
        let header_size = cursor.read_u32::<LittleEndian>().unwrap();
        if (header_size as usize) > bytes.len() {
            return ShortHeaderSnafu {
                expected: header_size as usize,
                actual: bytes.len(),
            }
            .fail();
        }
        let data_filename = read_string(&mut cursor)?;
        let height = cursor.read_u32::<LittleEndian>().unwrap();
        let root_index_rbn = cursor.read_u32::<LittleEndian>().unwrap();
        let index_start_rbn = cursor.read_u32::<LittleEndian>().unwrap();
        let index_block_count = cursor.read_u32::<LittleEndian>().unwrap();
        let block_size = cursor.read_u32::<LittleEndian>().unwrap();
        Ok(Self {
            data_filename,
            height,
            root_index_rbn,
            index_start_rbn,
            index_block_count,
            block_size,
        })
    }

    pub fn header_size(&self) -> u64 {
        self.to_bytes().len() as u64
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.write_u16::<LittleEndian>(s.len() as u16).unwrap();
    buf.extend_from_slice(s.as_bytes());
}

fn read_string(cursor: &mut &[u8]) -> Result<String, Error> {
    let len = cursor.read_u16::<LittleEndian>().map_err(|_| {
        ShortHeaderSnafu {
            expected: 2usize,
            actual: cursor.len(),
        }
        .build()
    })? as usize;
    if cursor.len() < len {
        return ShortHeaderSnafu {
            expected: len,
            actual: cursor.len(),
        }
        .fail();
    }
    let (bytes, rest) = cursor.split_at(len);
    let s = std::str::from_utf8(bytes)
        .map_err(|_| {
            ShortHeaderSnafu {
                expected: len,
                actual: bytes.len(),
            }
            .build()
        })?
        .to_string();
    *cursor = rest;
    Ok(s)
}
