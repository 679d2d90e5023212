//! Extremes reducer (C9): per-state N/S/E/W ZIP extremes, used as the
//! verification oracle that a round-trip through the storage engine
//! preserves record content.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::Error;
use crate::record::ZipRecord;
use crate::sequence_set::SequenceSet;

/// The four current extremes tracked for one state: east/west by
/// longitude, north/south by latitude.
#[derive(Debug, Clone, Copy, PartialEq)]
struct StateExtremes {
    east_zip: u32,
    east_lon: f64,
    west_zip: u32,
    west_lon: f64,
    north_zip: u32,
    north_lat: f64,
    south_zip: u32,
    south_lat: f64,
}

impl StateExtremes {
    fn from_first(record: &ZipRecord) -> Self {
        Self {
            east_zip: record.zip,
            east_lon: record.longitude,
            west_zip: record.zip,
            west_lon: record.longitude,
            north_zip: record.zip,
            north_lat: record.latitude,
            south_zip: record.zip,
            south_lat: record.latitude,
        }
    }

    fn fold(&mut self, record: &ZipRecord) {
        if record.longitude > self.east_lon {
            self.east_lon = record.longitude;
            self.east_zip = record.zip;
        }
        if record.longitude < self.west_lon {
            self.west_lon = record.longitude;
            self.west_zip = record.zip;
        }
        if record.latitude > self.north_lat {
            self.north_lat = record.latitude;
            self.north_zip = record.zip;
        }
        if record.latitude < self.south_lat {
            self.south_lat = record.latitude;
            self.south_zip = record.zip;
        }
    }
}

/// Accumulates per-state extremes over a stream of records, in any order.
#[derive(Debug, Clone, Default)]
pub struct ExtremesReducer {
    by_state: BTreeMap<String, StateExtremes>,
}

impl ExtremesReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold(&mut self, record: &ZipRecord) {
        self.by_state
            .entry(record.state.clone())
            .and_modify(|extremes| extremes.fold(record))
            .or_insert_with(|| StateExtremes::from_first(record));
    }

    pub fn fold_all<'a>(&mut self, records: impl IntoIterator<Item = &'a ZipRecord>) {
        for record in records {
            self.fold(record);
        }
    }

    /// Builds a reducer by walking a sequence set's active list from its head.
    pub fn from_sequence_set(seq: &mut SequenceSet) -> Result<Self, Error> {
        let mut reducer = Self::new();
        let mut rbn = seq.head_rbn();
        while rbn != 0 {
            let block = seq.load_block(rbn)?;
            for record in &block.records {
                reducer.fold(record);
            }
            rbn = block.succeeding_rbn;
        }
        Ok(reducer)
    }

    /// The canonical text: `state:eZip|wZip|nZip|sZip` lines, one per
    /// state, sorted ascending by state code.
    pub fn signature(&self) -> String {
        let mut out = String::new();
        for (state, extremes) in &self.by_state {
            let _ = writeln!(
                out,
                "{state}:{}|{}|{}|{}",
                extremes.east_zip, extremes.west_zip, extremes.north_zip, extremes.south_zip
            );
        }
        out
    }
}
