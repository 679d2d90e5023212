//! Record codec (C1): the persisted form of a single ZIP-code record.
//!
//! A record serializes to an ASCII CSV line `zip,location,state,county,lat,lon`
//! with no embedded commas; on disk it is always preceded by a 4-byte
//! little-endian length prefix (see [`crate::block`]), but this module deals
//! only with the CSV payload itself.

use std::fmt;

use crate::error::{Error, InvalidRecordSnafu};

/// One ZIP-code record.
#[derive(Debug, Clone, PartialEq)]
pub struct ZipRecord {
    pub zip: u32,
    pub location: String,
    pub state: String,
    pub county: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl ZipRecord {
    /// Validates field constraints and constructs a record.
    pub fn new(
        zip: u32,
        location: impl Into<String>,
        state: impl Into<String>,
        county: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Result<Self, Error> {
        let location = location.into();
        let state = state.into();
        let county = county.into();
        validate_fields(zip, &location, &state, &county, latitude, longitude)?;
        Ok(Self {
            zip,
            location,
            state,
            county,
            latitude,
            longitude,
        })
    }

    /// Serializes this record to its CSV byte run (no length prefix).
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.zip, self.location, self.state, self.county, self.latitude, self.longitude
        )
    }

    /// Parses a CSV line (no length prefix, no trailing newline) into a record.
    pub fn parse_csv_line(line: &str) -> Result<Self, Error> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 6 {
            return InvalidRecordSnafu {
                reason: format!("expected 6 comma-separated fields, got {}", fields.len()),
            }
            .fail();
        }
        let zip: u32 = fields[0].trim().parse().map_err(|_| {
            InvalidRecordSnafu {
                reason: format!("zip {:?} is not a valid integer", fields[0]),
            }
            .build()
        })?;
        let location = fields[1].trim().to_string();
        let state = fields[2].trim().to_string();
        let county = fields[3].trim().to_string();
        let latitude: f64 = fields[4].trim().parse().map_err(|_| {
            InvalidRecordSnafu {
                reason: format!("latitude {:?} is not a valid number", fields[4]),
            }
            .build()
        })?;
        let longitude: f64 = fields[5].trim().parse().map_err(|_| {
            InvalidRecordSnafu {
                reason: format!("longitude {:?} is not a valid number", fields[5]),
            }
            .build()
        })?;
        validate_fields(zip, &location, &state, &county, latitude, longitude)?;
        Ok(Self {
            zip,
            location,
            state,
            county,
            latitude,
            longitude,
        })
    }

    /// Total on-disk size of this record: 4-byte length prefix + CSV byte length.
    pub fn record_size(&self) -> usize {
        4 + self.to_csv_line().len()
    }
}

fn validate_fields(
    zip: u32,
    location: &str,
    state: &str,
    county: &str,
    latitude: f64,
    longitude: f64,
) -> Result<(), Error> {
    if zip < 1 || zip > 99999 {
        return InvalidRecordSnafu {
            reason: format!("zip {zip} out of range [1, 99999]"),
        }
        .fail();
    }
    if location.is_empty() || location.len() > 99 || !location.is_ascii() {
        return InvalidRecordSnafu {
            reason: format!("location must be 1..99 ASCII bytes, got {} bytes", location.len()),
        }
        .fail();
    }
    if state.len() != 2 {
        return InvalidRecordSnafu {
            reason: format!("state must be exactly 2 bytes, got {}", state.len()),
        }
        .fail();
    }
    if county.is_empty() || county.len() > 49 || !county.is_ascii() {
        return InvalidRecordSnafu {
            reason: format!("county must be 1..49 ASCII bytes, got {} bytes", county.len()),
        }
        .fail();
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return InvalidRecordSnafu {
            reason: format!("latitude {latitude} out of range [-90, 90]"),
        }
        .fail();
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return InvalidRecordSnafu {
            reason: format!("longitude {longitude} out of range [-180, 180]"),
        }
        .fail();
    }
    if location.contains(',') || state.contains(',') || county.contains(',') {
        return InvalidRecordSnafu {
            reason: "fields must not contain embedded commas".to_string(),
        }
        .fail();
    }
    Ok(())
}

impl fmt::Display for ZipRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_csv_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ZipRecord {
        ZipRecord::new(50000, "Some City", "MN", "Some County", 44.5, -93.1).unwrap()
    }

    #[test]
    fn round_trips_through_csv() {
        let rec = sample();
        let line = rec.to_csv_line();
        let parsed = ZipRecord::parse_csv_line(&line).unwrap();
        assert_eq!(rec, parsed);
    }

    #[test]
    fn record_size_includes_length_prefix() {
        let rec = sample();
        assert_eq!(rec.record_size(), 4 + rec.to_csv_line().len());
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = ZipRecord::parse_csv_line("50000,City,MN").unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { .. }));
    }

    #[test]
    fn rejects_out_of_range_zip() {
        assert!(ZipRecord::new(0, "City", "MN", "County", 0.0, 0.0).is_err());
        assert!(ZipRecord::new(100000, "City", "MN", "County", 0.0, 0.0).is_err());
    }

    #[test]
    fn rejects_bad_state_length() {
        assert!(ZipRecord::new(50000, "City", "MNN", "County", 0.0, 0.0).is_err());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(ZipRecord::new(50000, "City", "MN", "County", 91.0, 0.0).is_err());
        assert!(ZipRecord::new(50000, "City", "MN", "County", 0.0, 181.0).is_err());
    }
}
