//! Instance-type price lookup
//!
//! A price table maps an instance type (e.g. `c3.large`) to its on-demand
//! price in USD per hour. It is loaded once at startup and never changes.
//!
//! ## Sources
//!
//! | Source | Format |
//! |--------|--------|
//! | in-memory map | `HashMap<String, f64>` |
//! | CSV | `name,...,$0.120 per Hour` (first field name, last field price) |
//! | JSON | `{"c3.large": 0.12, "m4.xlarge": 0.2}` |
//!
//! Where the bytes come from (local file, S3) is the caller's business; see
//! [`StaticPriceTable::from_bytes`].

use crate::error::{CostError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};

/// Characters stripped from both ends of a CSV price field
const PRICE_TRIM_CHARS: &[char] = &['$', ' ', 'p', 'e', 'r', 'H', 'o', 'u'];

/// Price lookup by instance type
pub trait PriceTable: Send + Sync {
    /// USD per hour for an instance type
    ///
    /// Fails with [`CostError::UnknownInstanceType`] when the type is absent.
    fn per_hour(&self, instance_type: &str) -> Result<f64>;

    /// Total spent on an instance created at `created`, as of `now`
    ///
    /// Every started hour is billed in full.
    fn total_spent(&self, instance_type: &str, created: DateTime<Utc>, now: DateTime<Utc>) -> Result<f64> {
        let per_hour = self.per_hour(instance_type)?;
        let age_hours = (now - created).num_milliseconds().max(0) as f64 / 3_600_000.0;
        Ok(per_hour * age_hours.ceil())
    }
}

/// Immutable price table backed by a hash map
#[derive(Debug, Clone, Default)]
pub struct StaticPriceTable {
    prices: HashMap<String, f64>,
}

impl StaticPriceTable {
    /// Build from an in-memory map
    pub fn from_map(prices: HashMap<String, f64>) -> Self {
        Self { prices }
    }

    /// Parse headerless CSV rows
    ///
    /// Fields may be double-quoted, with `""` standing for a literal quote, so
    /// a quoted name can contain commas. Blank lines are skipped. A row whose
    /// last field is not a price fails the whole load.
    pub fn from_csv_reader(reader: impl Read) -> Result<Self> {
        let mut prices = HashMap::new();

        for (lineno, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let fields = split_csv_row(&line);
            // a row always yields at least one field
            let name = fields[0].as_str();
            let raw_price = fields[fields.len() - 1].as_str();
            let price: f64 = raw_price
                .trim_matches(PRICE_TRIM_CHARS)
                .parse()
                .map_err(|e| {
                    CostError::price_source(format!(
                        "line {}: invalid price {:?} for {}: {}",
                        lineno + 1,
                        raw_price,
                        name,
                        e
                    ))
                })?;

            prices.insert(name.to_string(), price);
        }

        Ok(Self { prices })
    }

    /// Parse a flat JSON object of instance type to price
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let prices: HashMap<String, f64> = serde_json::from_slice(bytes)?;
        Ok(Self { prices })
    }

    /// Parse bytes, choosing CSV when `path_hint` ends in `.csv` and JSON otherwise
    pub fn from_bytes(path_hint: &str, bytes: &[u8]) -> Result<Self> {
        let table = if path_hint.to_ascii_lowercase().ends_with(".csv") {
            Self::from_csv_reader(bytes)?
        } else {
            Self::from_json_slice(bytes)?
        };

        if table.is_empty() {
            return Err(CostError::price_source(format!("no prices found in {}", path_hint)));
        }

        Ok(table)
    }

    /// Number of known instance types
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Split one CSV row into trimmed fields, honoring double quotes
fn split_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field).trim().to_string()),
            c => field.push(c),
        }
    }
    fields.push(field.trim().to_string());

    fields
}

impl PriceTable for StaticPriceTable {
    fn per_hour(&self, instance_type: &str) -> Result<f64> {
        self.prices
            .get(instance_type)
            .copied()
            .ok_or_else(|| CostError::UnknownInstanceType(instance_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn table() -> StaticPriceTable {
        StaticPriceTable::from_map(HashMap::from([("c3.large".to_string(), 0.120)]))
    }

    #[test]
    fn test_per_hour_known_type() {
        assert_eq!(table().per_hour("c3.large").unwrap(), 0.120);
    }

    #[test]
    fn test_per_hour_unknown_type() {
        let err = table().per_hour("x1.32xlarge").unwrap_err();
        assert!(matches!(err, CostError::UnknownInstanceType(t) if t == "x1.32xlarge"));
    }

    #[test]
    fn test_total_spent_rounds_up_to_whole_hours() {
        let now = Utc::now();
        let created = now - Duration::minutes(23 * 60 + 30);
        let spent = table().total_spent("c3.large", created, now).unwrap();
        assert!((spent - 24.0 * 0.120).abs() < 1e-9);
    }

    #[test]
    fn test_csv_price_strings() {
        let csv = "c3.large,Compute Optimized,2,$0.120 per Hour\n\nm4.xlarge,General,4,\"$0.215 per Hour\"\n";
        let table = StaticPriceTable::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.per_hour("c3.large").unwrap(), 0.120);
        assert_eq!(table.per_hour("m4.xlarge").unwrap(), 0.215);
    }

    #[test]
    fn test_csv_quoted_fields_keep_commas() {
        let csv = "\"m4.large, legacy\",\"General, \"\"burst\"\"\",2,\"$0.100 per Hour\"\n";
        let table = StaticPriceTable::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.per_hour("m4.large, legacy").unwrap(), 0.100);
    }

    #[test]
    fn test_csv_bad_price_fails_load() {
        let csv = "c3.large,$0.120 per Hour\nm4.xlarge,call us\n";
        let err = StaticPriceTable::from_csv_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, CostError::PriceSource(msg) if msg.contains("line 2")));
    }

    #[test]
    fn test_from_bytes_picks_format() {
        let json = br#"{"c3.large": 0.12, "m4.xlarge": 0.2}"#;
        let table = StaticPriceTable::from_bytes("s3://bucket/prices.json", json).unwrap();
        assert_eq!(table.per_hour("m4.xlarge").unwrap(), 0.2);

        let csv = b"c3.large,$0.120 per Hour\n";
        let table = StaticPriceTable::from_bytes("/etc/prices.CSV", csv).unwrap();
        assert_eq!(table.per_hour("c3.large").unwrap(), 0.120);
    }

    #[test]
    fn test_from_bytes_rejects_empty_table() {
        assert!(StaticPriceTable::from_bytes("prices.json", b"{}").is_err());
    }
}
