use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use super::{Preset, SettingValue, SettingsError, SettingsNamespace, SettingsTier, ValueKind};

/// A statically declared set of flags sharing one namespace of tier rows.
///
/// Implemented by plain enums; `Ord` must follow declaration order because
/// resolved maps and enrichment call order iterate in that order.
pub trait FlagRegistry: Copy + Eq + Hash + Ord + fmt::Debug + Send + Sync + 'static {
    const NAMESPACE: SettingsNamespace;

    fn all() -> &'static [Self];

    fn key(self) -> &'static str;

    fn default_value(self) -> SettingValue;

    fn kind(self) -> ValueKind {
        ValueKind::Bool
    }

    fn value_column(self) -> String {
        self.key().to_string()
    }

    fn lock_column(self) -> String {
        format!("lock_{}", self.key())
    }

    fn builtin_presets() -> Vec<Preset<Self>> {
        Vec::new()
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::all().iter().copied().find(|flag| flag.key() == key)
    }

    fn from_value_column(column: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|flag| flag.value_column() == column)
    }

    fn from_lock_column(column: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|flag| flag.lock_column() == column)
    }

    /// Accepts either the bare key or the value column name.
    fn parse(name: &str) -> Result<Self, SettingsError> {
        let name = name.trim();
        Self::from_key(name)
            .or_else(|| Self::from_value_column(name))
            .ok_or_else(|| SettingsError::UnknownFlag {
                namespace: Self::NAMESPACE,
                name: name.to_string(),
            })
    }
}

/// Which tier supplied the winning value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingSource {
    Admin,
    AdminLocked,
    County,
    CountyLocked,
    Preset,
    User,
}

impl SettingSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SettingSource::Admin => "admin",
            SettingSource::AdminLocked => "admin_locked",
            SettingSource::County => "county",
            SettingSource::CountyLocked => "county_locked",
            SettingSource::Preset => "preset",
            SettingSource::User => "user",
        }
    }
}

impl fmt::Display for SettingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolved {
    pub value: SettingValue,
    pub source: SettingSource,
}

/// Resolves one flag. Step order is load-bearing:
///
/// 1. admin lock wins outright;
/// 2. county lock wins over everything below it, value falling back through admin;
/// 3. user value;
/// 4. preset value (never reached for locked flags);
/// 5. county value;
/// 6. admin value, then `default`.
pub fn resolve_flag<R: FlagRegistry>(
    flag: R,
    admin: &SettingsTier<R>,
    county: Option<&SettingsTier<R>>,
    user: Option<&SettingsTier<R>>,
    preset: Option<&Preset<R>>,
    default: SettingValue,
) -> Resolved {
    let admin_value = || admin.value(flag).copied().unwrap_or(default);

    if admin.is_locked(flag) {
        return Resolved {
            value: admin_value(),
            source: SettingSource::AdminLocked,
        };
    }

    if let Some(county) = county.filter(|c| c.is_locked(flag)) {
        return Resolved {
            value: county.value(flag).copied().unwrap_or_else(admin_value),
            source: SettingSource::CountyLocked,
        };
    }

    if let Some(value) = user.and_then(|u| u.value(flag)) {
        return Resolved {
            value: *value,
            source: SettingSource::User,
        };
    }

    if let Some(value) = preset.and_then(|p| p.value(flag)) {
        return Resolved {
            value: *value,
            source: SettingSource::Preset,
        };
    }

    if let Some(value) = county.and_then(|c| c.value(flag)) {
        return Resolved {
            value: *value,
            source: SettingSource::County,
        };
    }

    Resolved {
        value: admin_value(),
        source: SettingSource::Admin,
    }
}

/// Holds one pre-fetched snapshot of each tier. Never mutates them and keeps no
/// state between calls, so one instance can serve concurrent readers.
#[derive(Debug, Clone)]
pub struct ThreeTierResolver<R: FlagRegistry> {
    admin: SettingsTier<R>,
    county: Option<SettingsTier<R>>,
    user: Option<SettingsTier<R>>,
    preset: Option<Preset<R>>,
}

impl<R: FlagRegistry> ThreeTierResolver<R> {
    pub fn new(admin: SettingsTier<R>) -> Self {
        Self {
            admin,
            county: None,
            user: None,
            preset: None,
        }
    }

    pub fn with_county(mut self, county: Option<SettingsTier<R>>) -> Self {
        self.county = county;
        self
    }

    pub fn with_user(mut self, user: Option<SettingsTier<R>>) -> Self {
        self.user = user;
        self
    }

    pub fn with_preset(mut self, preset: Option<Preset<R>>) -> Self {
        self.preset = preset;
        self
    }

    pub fn user(&self) -> Option<&SettingsTier<R>> {
        self.user.as_ref()
    }

    pub fn resolve_flag(&self, flag: R) -> Resolved {
        resolve_flag(
            flag,
            &self.admin,
            self.county.as_ref(),
            self.user.as_ref(),
            self.preset.as_ref(),
            flag.default_value(),
        )
    }

    /// String entry point for API callers. Unknown names are a configuration
    /// error, never a silent default.
    pub fn resolve_named(&self, name: &str) -> Result<(R, Resolved), SettingsError> {
        let flag = R::parse(name)?;
        Ok((flag, self.resolve_flag(flag)))
    }

    pub fn resolve_flags(&self, flags: &[R]) -> ResolvedConfiguration<R> {
        let mut resolved = ResolvedConfiguration::empty();
        for flag in flags {
            let Resolved { value, source } = self.resolve_flag(*flag);
            resolved.values.insert(*flag, value);
            resolved.sources.insert(*flag, source);
        }
        resolved
    }

    pub fn resolve_all(&self) -> ResolvedConfiguration<R> {
        self.resolve_flags(R::all())
    }
}

/// Effective values plus per-flag provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfiguration<R: FlagRegistry> {
    values: BTreeMap<R, SettingValue>,
    sources: BTreeMap<R, SettingSource>,
}

impl<R: FlagRegistry> ResolvedConfiguration<R> {
    /// Resolves nothing; every `is_enabled` check answers false.
    pub fn empty() -> Self {
        Self {
            values: BTreeMap::new(),
            sources: BTreeMap::new(),
        }
    }

    pub fn get(&self, flag: R) -> Option<Resolved> {
        Some(Resolved {
            value: *self.values.get(&flag)?,
            source: *self.sources.get(&flag)?,
        })
    }

    pub fn value(&self, flag: R) -> Option<&SettingValue> {
        self.values.get(&flag)
    }

    pub fn source(&self, flag: R) -> Option<SettingSource> {
        self.sources.get(&flag).copied()
    }

    /// True only for a resolved boolean `true`.
    pub fn is_enabled(&self, flag: R) -> bool {
        self.values
            .get(&flag)
            .and_then(SettingValue::as_bool)
            .unwrap_or(false)
    }

    pub fn number(&self, flag: R) -> Option<f64> {
        self.values.get(&flag).and_then(SettingValue::as_f64)
    }

    /// Enabled flags in registry order.
    pub fn enabled(&self) -> Vec<R> {
        self.values
            .iter()
            .filter(|(_, v)| v.as_bool() == Some(true))
            .map(|(flag, _)| *flag)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<R: FlagRegistry> Serialize for ResolvedConfiguration<R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let values: BTreeMap<&'static str, &SettingValue> =
            self.values.iter().map(|(f, v)| (f.key(), v)).collect();
        let sources: BTreeMap<&'static str, &SettingSource> =
            self.sources.iter().map(|(f, s)| (f.key(), s)).collect();
        let mut state = serializer.serialize_struct("ResolvedConfiguration", 3)?;
        state.serialize_field("namespace", &R::NAMESPACE)?;
        state.serialize_field("values", &values)?;
        state.serialize_field("sources", &sources)?;
        state.end()
    }
}
