//! Content fingerprinting and new/changed/unchanged classification.
//!
//! Only the content fields below feed the digest. Values are normalized before
//! hashing so that formatting noise in the county pages (padding, city casing,
//! currency symbols, date styles) never registers as a change. Normalization is
//! hash-only: callers keep persisting the values exactly as scraped.

use std::fmt;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Bumped whenever the canonical byte layout changes.
pub const FINGERPRINT_VERSION: &str = "lfp1";

const FIELD_SEPARATOR: char = '\u{1f}';

// Two-digit years are tried before four-digit ones so "03/05/25" is not read as year 25.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    /// Compared case-insensitively (city, state).
    Place,
    /// Compared case-insensitively (status labels).
    Label,
    Money,
    Date,
}

/// The listing fields that count as content, in digest order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentField {
    Address,
    City,
    State,
    ZipCode,
    JudgmentAmount,
    UpsetAmount,
    OpeningBid,
    SalePrice,
    Status,
    SaleDate,
    FiledDate,
    Description,
    Notes,
}

impl ContentField {
    pub const ALL: [ContentField; 13] = [
        ContentField::Address,
        ContentField::City,
        ContentField::State,
        ContentField::ZipCode,
        ContentField::JudgmentAmount,
        ContentField::UpsetAmount,
        ContentField::OpeningBid,
        ContentField::SalePrice,
        ContentField::Status,
        ContentField::SaleDate,
        ContentField::FiledDate,
        ContentField::Description,
        ContentField::Notes,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ContentField::Address => "address",
            ContentField::City => "city",
            ContentField::State => "state",
            ContentField::ZipCode => "zip_code",
            ContentField::JudgmentAmount => "judgment_amount",
            ContentField::UpsetAmount => "upset_amount",
            ContentField::OpeningBid => "opening_bid",
            ContentField::SalePrice => "sale_price",
            ContentField::Status => "status",
            ContentField::SaleDate => "sale_date",
            ContentField::FiledDate => "filed_date",
            ContentField::Description => "description",
            ContentField::Notes => "notes",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    fn kind(self) -> FieldKind {
        match self {
            ContentField::City | ContentField::State => FieldKind::Place,
            ContentField::Status => FieldKind::Label,
            ContentField::JudgmentAmount
            | ContentField::UpsetAmount
            | ContentField::OpeningBid
            | ContentField::SalePrice => FieldKind::Money,
            ContentField::SaleDate | ContentField::FiledDate => FieldKind::Date,
            ContentField::Address
            | ContentField::ZipCode
            | ContentField::Description
            | ContentField::Notes => FieldKind::Text,
        }
    }
}

/// Lowercase hex SHA-256 over the canonical content of one listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingFingerprint(String);

impl ListingFingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListingFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    New,
    Changed,
    Unchanged,
}

impl ChangeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeStatus::New => "new",
            ChangeStatus::Changed => "changed",
            ChangeStatus::Unchanged => "unchanged",
        }
    }

    /// Whether downstream enrichment and persistence should run.
    pub fn needs_processing(self) -> bool {
        !matches!(self, ChangeStatus::Unchanged)
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content field whose value did not fit its expected type. It was hashed as
/// its normalized raw text instead of failing the listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAnomaly {
    pub field: ContentField,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub status: ChangeStatus,
    pub fingerprint: ListingFingerprint,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anomalies: Vec<DataAnomaly>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprinted {
    pub fingerprint: ListingFingerprint,
    pub anomalies: Vec<DataAnomaly>,
}

/// Stateless change detector. Safe to share across tasks.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    fields: &'static [ContentField],
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self {
            fields: &ContentField::ALL,
        }
    }
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_fields(&self) -> &'static [ContentField] {
        self.fields
    }

    pub fn fingerprint(&self, fields: &Map<String, Value>) -> Fingerprinted {
        let mut anomalies = Vec::new();
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_VERSION.as_bytes());

        for field in self.fields {
            let normalized = match normalize_field(*field, fields.get(field.key())) {
                Ok(value) => value,
                Err(raw) => {
                    anomalies.push(DataAnomaly {
                        field: *field,
                        raw: raw.clone(),
                    });
                    raw
                }
            };
            let mut segment = String::with_capacity(field.key().len() + normalized.len() + 2);
            segment.push(FIELD_SEPARATOR);
            segment.push_str(field.key());
            segment.push('=');
            segment.push_str(&escape(&normalized));
            hasher.update(segment.as_bytes());
        }

        Fingerprinted {
            fingerprint: ListingFingerprint(hex::encode(hasher.finalize())),
            anomalies,
        }
    }

    /// `prior` of `None` or an empty string means the listing was never stored.
    pub fn classify(&self, fields: &Map<String, Value>, prior: Option<&str>) -> Classification {
        let Fingerprinted {
            fingerprint,
            anomalies,
        } = self.fingerprint(fields);
        let status = match prior.map(str::trim).filter(|p| !p.is_empty()) {
            None => ChangeStatus::New,
            Some(prior) if prior == fingerprint.as_str() => ChangeStatus::Unchanged,
            Some(_) => ChangeStatus::Changed,
        };
        Classification {
            status,
            fingerprint,
            anomalies,
        }
    }
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(FIELD_SEPARATOR, "\\u001f")
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `Err` carries the raw text used in place of a value that did not parse.
fn normalize_field(field: ContentField, value: Option<&Value>) -> Result<String, String> {
    let value = match value {
        None | Some(Value::Null) => return Ok(String::new()),
        Some(value) => value,
    };

    match field.kind() {
        FieldKind::Text => normalize_text(value),
        FieldKind::Place => normalize_text(value).map(|s| s.to_uppercase()),
        FieldKind::Label => normalize_text(value).map(|s| s.to_lowercase()),
        FieldKind::Money => normalize_money(value),
        FieldKind::Date => normalize_date(value),
    }
}

fn normalize_text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(collapse_whitespace(s)),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(other.to_string()),
    }
}

fn normalize_money(value: &Value) -> Result<String, String> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(to_cents)
            .ok_or_else(|| n.to_string()),
        Value::String(s) => {
            let collapsed = collapse_whitespace(s);
            if collapsed.is_empty() {
                return Ok(String::new());
            }
            parse_money(&collapsed).and_then(to_cents).ok_or(collapsed)
        }
        other => Err(other.to_string()),
    }
}

fn parse_money(input: &str) -> Option<f64> {
    let upper = input.to_ascii_uppercase();
    let stripped = upper.trim().trim_end_matches("USD").trim();
    let cleaned: String = stripped
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn to_cents(amount: f64) -> Option<String> {
    if !amount.is_finite() {
        return None;
    }
    Some(((amount * 100.0).round() as i64).to_string())
}

fn normalize_date(value: &Value) -> Result<String, String> {
    let raw = match value {
        Value::String(s) => collapse_whitespace(s),
        other => return Err(other.to_string()),
    };
    if raw.is_empty() {
        return Ok(raw);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.date_naive().format("%Y-%m-%d").to_string());
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&raw, fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
        .ok_or(raw)
}
