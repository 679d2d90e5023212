//! Legacy flat-file mode: a plain length-indicated record file plus a
//! sorted primary-key index, used by `convert`/`zcd-search`.
//!
//! This has none of the blocked sequence set's invariants: no block
//! structure, no split/merge/redistribute, no available list. It exists
//! only as a smaller, simpler on-disk shape for callers that don't need
//! the full engine, mirroring the original utility's flat
//! `DataManager`/`BlockIndexFile` pairing.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use snafu::ResultExt;
use zipstore_buffers::ZipRecord;

use crate::cli_error::{CliError, CliResult, CsvSnafu, IoSnafu};

const LEGACY_MAGIC: [u8; 4] = *b"ZCDL";

/// One entry of the legacy primary-key index: a zip and its byte offset
/// into the length-indicated data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyIndexEntry {
    pub zip: u32,
    pub offset: u64,
}

/// Sorted-by-zip in-memory index over a legacy data file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyIndex {
    entries: Vec<LegacyIndexEntry>,
}

impl LegacyIndex {
    pub fn find_offset(&self, zip: u32) -> Option<u64> {
        self.entries
            .binary_search_by_key(&zip, |e| e.zip)
            .ok()
            .map(|i| self.entries[i].offset)
    }

    /// Persisted as whitespace-separated ASCII `zip offset` pairs,
    /// terminated by `|`, matching the flat block index's grammar.
    pub fn to_ascii(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format!("{} {}\n", entry.zip, entry.offset));
        }
        out.push('|');
        out
    }

    pub fn from_ascii(text: &str) -> CliResult<Self> {
        let body = text.split('|').next().unwrap_or("");
        let tokens: Vec<&str> = body.split_whitespace().collect();
        if tokens.len() % 2 != 0 {
            return Err(CliError::Usage {
                message: "corrupt legacy index: token count is not even".to_string(),
            });
        }
        let mut entries = Vec::with_capacity(tokens.len() / 2);
        for chunk in tokens.chunks_exact(2) {
            let zip: u32 = chunk[0].parse().map_err(|_| CliError::Usage {
                message: format!("corrupt legacy index: {:?} is not a zip", chunk[0]),
            })?;
            let offset: u64 = chunk[1].parse().map_err(|_| CliError::Usage {
                message: format!("corrupt legacy index: {:?} is not an offset", chunk[1]),
            })?;
            entries.push(LegacyIndexEntry { zip, offset });
        }
        Ok(Self { entries })
    }
}

/// The path of the companion index for a legacy data file: `<zcd>.idx`.
pub fn companion_index_path(zcd_path: &Path) -> PathBuf {
    let mut name = zcd_path.as_os_str().to_owned();
    name.push(".idx");
    PathBuf::from(name)
}

/// Reads a CSV file into a sorted record list, using the `csv` crate for
/// tokenizing and `ZipRecord::new` for field validation.
pub fn read_csv_sorted(csv_path: &Path) -> CliResult<Vec<ZipRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(csv_path)
        .context(CsvSnafu)?;
    let mut records = Vec::new();
    for result in reader.records() {
        let row = result.context(CsvSnafu)?;
        if row.len() != 6 {
            return Err(CliError::Usage {
                message: format!("CSV row has {} fields, expected 6", row.len()),
            });
        }
        let zip: u32 = row[0].trim().parse().map_err(|_| CliError::Usage {
            message: format!("zip {:?} is not a valid integer", &row[0]),
        })?;
        let latitude: f64 = row[4].trim().parse().map_err(|_| CliError::Usage {
            message: format!("latitude {:?} is not a valid number", &row[4]),
        })?;
        let longitude: f64 = row[5].trim().parse().map_err(|_| CliError::Usage {
            message: format!("longitude {:?} is not a valid number", &row[5]),
        })?;
        let record = ZipRecord::new(
            zip,
            row[1].trim(),
            row[2].trim(),
            row[3].trim(),
            latitude,
            longitude,
        )?;
        records.push(record);
    }
    records.sort_by_key(|r| r.zip);
    Ok(records)
}

/// Writes a sorted record list as a length-indicated legacy file plus its
/// companion index, returning the number of records written.
pub fn write_legacy(zcd_path: &Path, records: &[ZipRecord]) -> CliResult<usize> {
    let mut body = Vec::new();
    let mut entries = Vec::with_capacity(records.len());
    let mut offset: u64 = 8; // magic(4) + recordCount(4)
    for record in records {
        entries.push(LegacyIndexEntry {
            zip: record.zip,
            offset,
        });
        let line = record.to_csv_line();
        body.write_u32::<LittleEndian>(line.len() as u32).unwrap();
        body.extend_from_slice(line.as_bytes());
        offset += 4 + line.len() as u64;
    }

    let mut file = File::create(zcd_path).context(IoSnafu {
        path: zcd_path.to_path_buf(),
    })?;
    file.write_all(&LEGACY_MAGIC).context(IoSnafu {
        path: zcd_path.to_path_buf(),
    })?;
    file.write_u32::<LittleEndian>(records.len() as u32)
        .context(IoSnafu {
            path: zcd_path.to_path_buf(),
        })?;
    file.write_all(&body).context(IoSnafu {
        path: zcd_path.to_path_buf(),
    })?;
    file.flush().context(IoSnafu {
        path: zcd_path.to_path_buf(),
    })?;

    let index = LegacyIndex { entries };
    let index_path = companion_index_path(zcd_path);
    std::fs::write(&index_path, index.to_ascii()).context(IoSnafu { path: index_path })?;

    Ok(records.len())
}

/// Reads every record from a legacy length-indicated file, in file order.
pub fn read_legacy(zcd_path: &Path, limit: Option<usize>) -> CliResult<Vec<ZipRecord>> {
    let mut file = File::open(zcd_path).context(IoSnafu {
        path: zcd_path.to_path_buf(),
    })?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).context(IoSnafu {
        path: zcd_path.to_path_buf(),
    })?;
    if bytes.len() < 8 || bytes[0..4] != LEGACY_MAGIC {
        return Err(CliError::Usage {
            message: format!("{} is not a legacy length-indicated file", zcd_path.display()),
        });
    }
    let mut cursor = &bytes[4..];
    let count = cursor.read_u32::<LittleEndian>().unwrap() as usize;
    let wanted = limit.unwrap_or(count).min(count);
    let mut records = Vec::with_capacity(wanted);
    for _ in 0..wanted {
        let len = cursor.read_u32::<LittleEndian>().unwrap() as usize;
        if cursor.len() < len {
            return Err(CliError::Usage {
                message: "legacy file truncated mid-record".to_string(),
            });
        }
        let (line_bytes, rest) = cursor.split_at(len);
        let line = std::str::from_utf8(line_bytes).map_err(|_| CliError::Usage {
            message: "legacy record is not valid UTF-8".to_string(),
        })?;
        records.push(ZipRecord::parse_csv_line(line)?);
        cursor = rest;
    }
    Ok(records)
}

/// Searches the legacy file for a zip via its companion index.
pub fn search_legacy(zcd_path: &Path, idx_path: &Path, zip: u32) -> CliResult<Option<ZipRecord>> {
    let index_text = std::fs::read_to_string(idx_path).context(IoSnafu {
        path: idx_path.to_path_buf(),
    })?;
    let index = LegacyIndex::from_ascii(&index_text)?;
    let Some(offset) = index.find_offset(zip) else {
        return Ok(None);
    };
    let mut file = File::open(zcd_path).context(IoSnafu {
        path: zcd_path.to_path_buf(),
    })?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).context(IoSnafu {
        path: zcd_path.to_path_buf(),
    })?;
    let mut cursor = &bytes[offset as usize..];
    let len = cursor.read_u32::<LittleEndian>().unwrap() as usize;
    let line = std::str::from_utf8(&cursor[..len]).map_err(|_| CliError::Usage {
        message: "legacy record is not valid UTF-8".to_string(),
    })?;
    Ok(Some(ZipRecord::parse_csv_line(line)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(zip: u32) -> ZipRecord {
        ZipRecord::new(zip, "City", "MN", "County", 44.0, -93.0).unwrap()
    }

    #[test]
    fn legacy_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let zcd_path = dir.path().join("zip.zcd");
        let records = vec![rec(30000), rec(50000), rec(70000)];
        write_legacy(&zcd_path, &records).unwrap();

        let back = read_legacy(&zcd_path, None).unwrap();
        assert_eq!(back, records);

        let idx_path = companion_index_path(&zcd_path);
        let found = search_legacy(&zcd_path, &idx_path, 50000).unwrap();
        assert_eq!(found, Some(rec(50000)));
        let missing = search_legacy(&zcd_path, &idx_path, 99999).unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn legacy_index_ascii_round_trips() {
        let index = LegacyIndex {
            entries: vec![
                LegacyIndexEntry { zip: 30000, offset: 8 },
                LegacyIndexEntry { zip: 50000, offset: 30 },
            ],
        };
        let text = index.to_ascii();
        assert!(text.ends_with('|'));
        let back = LegacyIndex::from_ascii(&text).unwrap();
        assert_eq!(index, back);
    }

    #[test]
    fn read_legacy_honors_count_limit() {
        let dir = tempfile::tempdir().unwrap();
        let zcd_path = dir.path().join("zip.zcd");
        let records = vec![rec(10), rec(20), rec(30)];
        write_legacy(&zcd_path, &records).unwrap();
        let first_two = read_legacy(&zcd_path, Some(2)).unwrap();
        assert_eq!(first_two, &records[..2]);
    }
}
