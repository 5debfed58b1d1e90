//! Repository archive statistics
//!
//! Walks every section of a CAR archive and counts records by their `$type`.
//! Commit objects and MST nodes carry no `$type` and only count as blocks.

use chrono::{DateTime, Utc};
use ciborium::Value;
use iroh_car::CarReader;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::RepoStats;

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("failed to parse CAR file: {0}")]
    Car(#[from] iroh_car::Error),
}

/// Value under a text key of a CBOR map
fn map_get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value
        .as_map()?
        .iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

/// Record tag of a DAG-CBOR block, if it is a record.
fn record_type(block: &[u8]) -> Option<String> {
    let value: Value = ciborium::de::from_reader(block).ok()?;
    map_get(&value, "$type")
        .and_then(Value::as_text)
        .map(str::to_string)
}

impl RepoStats {
    /// Summarize a repository archive.
    ///
    /// `created_at` is stamped into the result so it matches the backup
    /// record that embeds it.
    pub async fn from_car(car: &[u8], created_at: DateTime<Utc>) -> Result<Self, StatsError> {
        let mut reader = CarReader::new(car).await?;

        let mut total_blocks = 0u64;
        let mut total_size = 0u64;
        let mut record_types: BTreeMap<String, u64> = BTreeMap::new();
        let mut collections = BTreeSet::new();

        while let Some((_cid, block)) = reader.next_block().await? {
            total_blocks += 1;
            total_size += block.len() as u64;

            // not every block is a record; structural and raw blocks are skipped
            if let Some(tag) = record_type(&block) {
                *record_types.entry(tag.clone()).or_insert(0) += 1;
                collections.insert(tag);
            }
        }

        let record_count = record_types.values().sum();
        Ok(Self {
            total_blocks,
            total_size,
            record_count,
            record_types_by_tag: record_types,
            file_size_bytes: car.len() as u64,
            collection_tags: collections,
            created_at,
        })
    }
}
