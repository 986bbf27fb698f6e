use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::{FlagRegistry, SettingValue, SettingsError};

/// Named bundle of values a user can opt into. Applied between the county and
/// user tiers; never applies to locked flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Preset<R: FlagRegistry> {
    pub name: String,
    pub description: Option<String>,
    values: HashMap<R, SettingValue>,
}

impl<R: FlagRegistry> Preset<R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            values: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_value(mut self, flag: R, value: impl Into<SettingValue>) -> Self {
        self.values.insert(flag, value.into());
        self
    }

    pub fn value(&self, flag: R) -> Option<&SettingValue> {
        self.values.get(&flag)
    }

    /// Flags the preset sets, registry order.
    pub fn flags(&self) -> Vec<R> {
        R::all()
            .iter()
            .copied()
            .filter(|flag| self.values.contains_key(flag))
            .collect()
    }

    /// Builds a preset from a YAML/JSON spec. Keys may be bare flag keys or value
    /// columns. Unknown keys and mistyped values are errors; presets are operator
    /// config and should fail loudly at load.
    pub fn from_spec(name: &str, spec: &PresetSpec) -> Result<Self, SettingsError> {
        let mut preset = Self::new(name);
        preset.description = spec.description.clone();
        for (key, raw) in &spec.values {
            let flag = R::parse(key)?;
            let value = SettingValue::coerce(flag.kind(), raw).ok_or_else(|| {
                SettingsError::InvalidValue {
                    namespace: R::NAMESPACE,
                    flag: flag.key().to_string(),
                    expected: flag.kind(),
                }
            })?;
            preset.values.insert(flag, value);
        }
        Ok(preset)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PresetSpec {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub values: Map<String, Value>,
}

/// All presets known for one registry.
#[derive(Debug, Clone)]
pub struct PresetCatalog<R: FlagRegistry> {
    presets: BTreeMap<String, Preset<R>>,
}

impl<R: FlagRegistry> Default for PresetCatalog<R> {
    fn default() -> Self {
        Self {
            presets: BTreeMap::new(),
        }
    }
}

impl<R: FlagRegistry> PresetCatalog<R> {
    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        for preset in R::builtin_presets() {
            catalog.insert(preset);
        }
        catalog
    }

    /// Builtins first, then `specs` layered over them by name.
    pub fn from_specs(specs: &BTreeMap<String, PresetSpec>) -> Result<Self, SettingsError> {
        let mut catalog = Self::builtin();
        for (name, spec) in specs {
            let preset = Preset::from_spec(name, spec)?;
            if catalog.presets.contains_key(name) {
                warn!(
                    namespace = %R::NAMESPACE,
                    preset = %name,
                    "configured preset replaces builtin"
                );
            }
            catalog.insert(preset);
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, preset: Preset<R>) {
        self.presets.insert(preset.name.clone(), preset);
    }

    pub fn get(&self, name: &str) -> Option<&Preset<R>> {
        self.presets.get(name.trim())
    }

    pub fn names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset<R>> {
        self.presets.values()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}
