//! Listing-source contract plus the snapshot-file source fed by the external scraper.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use foreclose_core::listing::normalize_county_id;
use foreclose_core::{ListingIdentity, ScrapedListing};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "foreclose-adapters";

/// Record keys that may carry the sheriff/case number, in lookup order.
pub const IDENTITY_KEYS: &[&str] =
    &["sheriff_number", "sheriff_id", "case_number", "docket_number"];

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("reading snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("snapshot {path} is for county `{found}`, expected `{expected}`")]
    CountyMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

/// One county's worth of scraped listings.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub county: String,
    pub listings: Vec<ScrapedListing>,
    /// Records dropped because they carried no sheriff/case number.
    pub skipped_without_id: usize,
}

#[async_trait]
pub trait ListingSource: Send + Sync {
    fn source_id(&self) -> &str;

    /// Missing data for a county is an empty batch, not an error.
    async fn fetch_listings(&self, county: &str) -> Result<SourceBatch, AdapterError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBundle {
    pub county: String,
    pub scraped_at: DateTime<Utc>,
    #[serde(default)]
    pub source_url: Option<String>,
    pub records: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Bundle(SnapshotBundle),
    Records(Vec<Map<String, Value>>),
}

/// Reads `<dir>/<county>.json`, written by the scraper after each pass.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    dir: PathBuf,
}

impl SnapshotSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, county: &str) -> PathBuf {
        self.dir.join(format!("{}.json", normalize_county_id(county)))
    }
}

#[async_trait]
impl ListingSource for SnapshotSource {
    fn source_id(&self) -> &str {
        "snapshot"
    }

    async fn fetch_listings(&self, county: &str) -> Result<SourceBatch, AdapterError> {
        let county = normalize_county_id(county);
        let path = self.path_for(&county);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(%county, path = %path.display(), "no snapshot for county");
                return Ok(SourceBatch {
                    county,
                    ..SourceBatch::default()
                });
            }
            Err(source) => return Err(AdapterError::Io { path, source }),
        };

        let parsed: SnapshotFile =
            serde_json::from_str(&text).map_err(|source| AdapterError::Parse {
                path: path.clone(),
                source,
            })?;
        let (scraped_at, records) = match parsed {
            SnapshotFile::Bundle(bundle) => {
                let found = normalize_county_id(&bundle.county);
                if found != county {
                    return Err(AdapterError::CountyMismatch {
                        path,
                        expected: county,
                        found,
                    });
                }
                (bundle.scraped_at, bundle.records)
            }
            SnapshotFile::Records(records) => (Utc::now(), records),
        };

        let batch = listings_from_records(&county, scraped_at, records);
        debug!(
            %county,
            listings = batch.listings.len(),
            skipped = batch.skipped_without_id,
            "snapshot loaded"
        );
        Ok(batch)
    }
}

/// Turns raw scraper records into listings, dropping records with no usable id.
pub fn listings_from_records(
    county: &str,
    scraped_at: DateTime<Utc>,
    records: Vec<Map<String, Value>>,
) -> SourceBatch {
    let mut batch = SourceBatch {
        county: normalize_county_id(county),
        ..SourceBatch::default()
    };
    for fields in records {
        let Some(sheriff_number) = identity_number(&fields) else {
            warn!(county = %batch.county, "skipping record without sheriff/case number");
            batch.skipped_without_id += 1;
            continue;
        };
        let scraped_at = fields
            .get("scraped_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or(scraped_at);
        batch.listings.push(ScrapedListing {
            identity: ListingIdentity::new(&batch.county, sheriff_number),
            scraped_at,
            fields,
        });
    }
    batch
}

fn identity_number(fields: &Map<String, Value>) -> Option<String> {
    IDENTITY_KEYS.iter().find_map(|key| {
        let raw = match fields.get(*key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!raw.is_empty()).then_some(raw)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn records(value: Value) -> Vec<Map<String, Value>> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn records_without_identity_are_skipped_and_counted() {
        let batch = listings_from_records(
            "Camden",
            Utc::now(),
            records(json!([
                {"sheriff_number": " F-1 ", "address": "1 Main St"},
                {"case_number": 20240017, "address": "2 Main St"},
                {"sheriff_number": "", "address": "3 Main St"},
                {"address": "4 Main St"},
            ])),
        );
        assert_eq!(batch.county, "camden");
        assert_eq!(batch.skipped_without_id, 2);
        let ids: Vec<_> = batch.listings.iter().map(|l| l.identity.key()).collect();
        assert_eq!(ids, vec!["camden:F-1", "camden:20240017"]);
    }

    #[tokio::test]
    async fn snapshot_bundle_loads_and_checks_county() {
        let dir = tempdir().unwrap();
        let body = json!({
            "county": "Cape May",
            "scraped_at": "2025-03-01T12:00:00Z",
            "records": [{"sheriff_number": "CM-9", "status": "Scheduled"}],
        });
        std::fs::write(dir.path().join("cape-may.json"), body.to_string()).unwrap();

        let source = SnapshotSource::new(dir.path());
        let batch = source.fetch_listings("cape may").await.unwrap();
        assert_eq!(batch.listings.len(), 1);
        assert_eq!(batch.listings[0].identity.county, "cape-may");
        assert_eq!(
            batch.listings[0].scraped_at.to_rfc3339(),
            "2025-03-01T12:00:00+00:00"
        );

        std::fs::copy(dir.path().join("cape-may.json"), dir.path().join("essex.json")).unwrap();
        let err = source.fetch_listings("essex").await.unwrap_err();
        assert!(matches!(err, AdapterError::CountyMismatch { .. }));
    }

    #[tokio::test]
    async fn missing_snapshot_is_an_empty_batch() {
        let dir = tempdir().unwrap();
        let batch = SnapshotSource::new(dir.path())
            .fetch_listings("bergen")
            .await
            .unwrap();
        assert!(batch.listings.is_empty());
        assert_eq!(batch.county, "bergen");
    }

    #[tokio::test]
    async fn bare_record_arrays_are_accepted() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("ocean.json"),
            json!([{"sheriff_id": "OC-3"}]).to_string(),
        )
        .unwrap();
        let batch = SnapshotSource::new(dir.path())
            .fetch_listings("ocean")
            .await
            .unwrap();
        assert_eq!(batch.listings[0].identity.sheriff_number, "OC-3");
    }
}
