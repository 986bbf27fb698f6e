use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{FlagRegistry, SettingsError};

/// One persisted settings row: column name -> JSON value.
pub type TierDocument = Map<String, Value>;

/// Columns a persisted row may carry that are not settings.
const BOOKKEEPING_COLUMNS: &[&str] = &[
    "id",
    "county_id",
    "user_id",
    "created_at",
    "updated_at",
    "updated_by",
];

/// Column in a user document naming the preset the user picked.
pub const PRESET_COLUMN: &str = "preset";

/// Ordered by override precedence: admin < county < user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierLevel {
    Admin,
    County,
    User,
}

impl TierLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TierLevel::Admin => "admin",
            TierLevel::County => "county",
            TierLevel::User => "user",
        }
    }

    pub fn can_lock(self) -> bool {
        !matches!(self, TierLevel::User)
    }
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Independent settings families, each with its own flag registry and tier rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsNamespace {
    Enrichment,
    Features,
    Investment,
}

impl SettingsNamespace {
    pub const ALL: [SettingsNamespace; 3] = [
        SettingsNamespace::Enrichment,
        SettingsNamespace::Features,
        SettingsNamespace::Investment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingsNamespace::Enrichment => "enrichment",
            SettingsNamespace::Features => "features",
            SettingsNamespace::Investment => "investment",
        }
    }
}

impl fmt::Display for SettingsNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingsNamespace {
    type Err = SettingsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ns| ns.as_str() == value.trim())
            .ok_or_else(|| SettingsError::UnknownNamespace(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Number,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Bool => f.write_str("boolean"),
            ValueKind::Number => f.write_str("number"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
}

impl SettingValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            SettingValue::Bool(_) => ValueKind::Bool,
            SettingValue::Number(_) => ValueKind::Number,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            SettingValue::Number(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            SettingValue::Bool(_) => None,
        }
    }

    /// Reads a stored JSON value as `kind`. Rows written by older tooling hold
    /// `"true"`, `1`, or `"12.5"`; those are accepted. `None` for null or
    /// anything that does not fit.
    pub fn coerce(kind: ValueKind, raw: &Value) -> Option<Self> {
        match (kind, raw) {
            (_, Value::Null) => None,
            (ValueKind::Bool, Value::Bool(b)) => Some(SettingValue::Bool(*b)),
            (ValueKind::Bool, Value::Number(n)) => match n.as_i64() {
                Some(0) => Some(SettingValue::Bool(false)),
                Some(1) => Some(SettingValue::Bool(true)),
                _ => None,
            },
            (ValueKind::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(SettingValue::Bool(true)),
                "false" | "0" | "no" | "off" => Some(SettingValue::Bool(false)),
                _ => None,
            },
            (ValueKind::Number, Value::Number(n)) => n.as_f64().map(SettingValue::Number),
            (ValueKind::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(SettingValue::Number),
            _ => None,
        }
    }

    pub fn to_json(self) -> Value {
        match self {
            SettingValue::Bool(b) => Value::Bool(b),
            SettingValue::Number(n) => serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Number(value)
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{b}"),
            SettingValue::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Typed view of one tier's row for registry `R`.
///
/// Values and locks are kept in separate maps; a lock without a value is legal
/// (the resolver falls through to the next tier up for the value).
#[derive(Debug, Clone)]
pub struct SettingsTier<R: FlagRegistry> {
    level: TierLevel,
    values: HashMap<R, SettingValue>,
    locks: HashSet<R>,
    preset: Option<String>,
}

impl<R: FlagRegistry> SettingsTier<R> {
    pub fn new(level: TierLevel) -> Self {
        Self {
            level,
            values: HashMap::new(),
            locks: HashSet::new(),
            preset: None,
        }
    }

    /// Stand-in for a missing admin row. Every flag resolves to its registry default.
    pub fn fallback_admin() -> Self {
        Self::new(TierLevel::Admin)
    }

    pub fn with_value(mut self, flag: R, value: impl Into<SettingValue>) -> Self {
        self.values.insert(flag, value.into());
        self
    }

    pub fn with_lock(mut self, flag: R) -> Self {
        if self.level.can_lock() {
            self.locks.insert(flag);
        }
        self
    }

    pub fn with_preset(mut self, name: impl Into<String>) -> Self {
        self.preset = Some(name.into());
        self
    }

    pub fn level(&self) -> TierLevel {
        self.level
    }

    pub fn value(&self, flag: R) -> Option<&SettingValue> {
        self.values.get(&flag)
    }

    pub fn is_locked(&self, flag: R) -> bool {
        self.level.can_lock() && self.locks.contains(&flag)
    }

    pub fn preset(&self) -> Option<&str> {
        self.preset.as_deref()
    }

    /// Lenient load used on the read path: bad cells are logged and treated as absent.
    pub fn from_document(level: TierLevel, doc: &TierDocument) -> Self {
        let mut tier = Self::new(level);
        for (column, raw) in doc {
            if level == TierLevel::User && column == PRESET_COLUMN {
                tier.preset = raw
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                continue;
            }
            if let Some(flag) = R::from_lock_column(column) {
                if !level.can_lock() {
                    warn!(namespace = %R::NAMESPACE, %column, "ignoring lock column in user tier");
                    continue;
                }
                match SettingValue::coerce(ValueKind::Bool, raw) {
                    Some(SettingValue::Bool(true)) => {
                        tier.locks.insert(flag);
                    }
                    Some(_) => {}
                    None if raw.is_null() => {}
                    None => {
                        warn!(
                            namespace = %R::NAMESPACE,
                            tier = %level,
                            %column,
                            "unreadable lock value, treating as unlocked"
                        );
                    }
                }
                continue;
            }
            if let Some(flag) = R::from_value_column(column) {
                if raw.is_null() {
                    continue;
                }
                match SettingValue::coerce(flag.kind(), raw) {
                    Some(value) => {
                        tier.values.insert(flag, value);
                    }
                    None => {
                        warn!(
                            namespace = %R::NAMESPACE,
                            tier = %level,
                            %column,
                            value = %raw,
                            "unreadable setting value, treating as unset"
                        );
                    }
                }
                continue;
            }
            debug!(
                namespace = %R::NAMESPACE,
                tier = %level,
                %column,
                "ignoring non-setting column"
            );
        }
        tier
    }

    /// Strict check used on the write path.
    pub fn validate_document(level: TierLevel, doc: &TierDocument) -> Result<(), SettingsError> {
        for (column, raw) in doc {
            if BOOKKEEPING_COLUMNS.contains(&column.as_str()) {
                continue;
            }
            if column == PRESET_COLUMN && level == TierLevel::User {
                if !(raw.is_null() || raw.is_string()) {
                    return Err(SettingsError::UnknownPreset {
                        namespace: R::NAMESPACE,
                        name: raw.to_string(),
                    });
                }
                continue;
            }
            if R::from_lock_column(column).is_some() {
                if !level.can_lock() {
                    return Err(SettingsError::LockNotAllowed {
                        tier: level,
                        column: column.clone(),
                    });
                }
                if !raw.is_null() && SettingValue::coerce(ValueKind::Bool, raw).is_none() {
                    return Err(SettingsError::InvalidValue {
                        namespace: R::NAMESPACE,
                        flag: column.clone(),
                        expected: ValueKind::Bool,
                    });
                }
                continue;
            }
            let flag = R::from_value_column(column).ok_or_else(|| SettingsError::UnknownFlag {
                namespace: R::NAMESPACE,
                name: column.clone(),
            })?;
            if !raw.is_null() && SettingValue::coerce(flag.kind(), raw).is_none() {
                return Err(SettingsError::InvalidValue {
                    namespace: R::NAMESPACE,
                    flag: flag.key().to_string(),
                    expected: flag.kind(),
                });
            }
        }
        Ok(())
    }

    /// Canonical row form, registry order.
    pub fn to_document(&self) -> TierDocument {
        let mut doc = TierDocument::new();
        for flag in R::all() {
            if let Some(value) = self.values.get(flag) {
                doc.insert(flag.value_column(), value.to_json());
            }
            if self.is_locked(*flag) {
                doc.insert(flag.lock_column(), Value::Bool(true));
            }
        }
        if let Some(preset) = &self.preset {
            doc.insert(PRESET_COLUMN.to_string(), Value::String(preset.clone()));
        }
        doc
    }
}
