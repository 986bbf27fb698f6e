//! Listing identity plus the scraped and persisted listing shapes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fingerprint::{ChangeStatus, ListingFingerprint};
use crate::flags::EnrichmentEndpoint;

/// (county, sheriff/case number): the key a physical listing keeps across scrape runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListingIdentity {
    pub county: String,
    pub sheriff_number: String,
}

impl ListingIdentity {
    pub fn new(county: impl AsRef<str>, sheriff_number: impl AsRef<str>) -> Self {
        Self {
            county: normalize_county_id(county.as_ref()),
            sheriff_number: sheriff_number.as_ref().trim().to_string(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.county, self.sheriff_number)
    }
}

impl fmt::Display for ListingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.county, self.sheriff_number)
    }
}

/// Lowercase, dash-separated county id ("Cape May" -> "cape-may").
pub fn normalize_county_id(input: &str) -> String {
    input
        .split_whitespace()
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Handoff contract from the external scraper into the sync pipeline.
///
/// `fields` carries every column the scraper produced; the change detector only
/// looks at the content fields and ignores the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedListing {
    pub identity: ListingIdentity,
    pub scraped_at: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

impl ScrapedListing {
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    Succeeded,
    Failed,
}

/// Result of one enrichment endpoint call. Endpoints fail independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointOutcome {
    pub endpoint: EnrichmentEndpoint,
    pub status: EndpointStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl EndpointOutcome {
    pub fn succeeded(endpoint: EnrichmentEndpoint, payload: Value, elapsed_ms: u64) -> Self {
        Self {
            endpoint,
            status: EndpointStatus::Succeeded,
            payload: Some(payload),
            error: None,
            elapsed_ms,
        }
    }

    pub fn failed(endpoint: EnrichmentEndpoint, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            endpoint,
            status: EndpointStatus::Failed,
            payload: None,
            error: Some(error.into()),
            elapsed_ms,
        }
    }
}

/// Persisted listing row: scraped content plus change-tracking and enrichment state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub identity: ListingIdentity,
    pub fields: Map<String, Value>,
    pub fingerprint: ListingFingerprint,
    pub change_status: ChangeStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
    #[serde(default)]
    pub enrichment: Vec<EndpointOutcome>,
}

impl ListingRecord {
    pub fn enrichment_failures(&self) -> usize {
        self.enrichment
            .iter()
            .filter(|o| o.status == EndpointStatus::Failed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_normalizes_county_and_trims_number() {
        let id = ListingIdentity::new("  Cape   May ", " F-24000123 ");
        assert_eq!(id.county, "cape-may");
        assert_eq!(id.sheriff_number, "F-24000123");
        assert_eq!(id.key(), "cape-may:F-24000123");
        assert_eq!(id.to_string(), id.key());
    }
}
