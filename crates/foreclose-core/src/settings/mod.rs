//! Three-tier (admin -> county -> user) settings resolution with lock semantics.

mod preset;
mod resolver;
mod tier;

use thiserror::Error;

pub use preset::{Preset, PresetCatalog, PresetSpec};
pub use resolver::{
    resolve_flag, FlagRegistry, Resolved, ResolvedConfiguration, SettingSource, ThreeTierResolver,
};
pub use tier::{
    SettingValue, SettingsNamespace, SettingsTier, TierDocument, TierLevel, ValueKind,
    PRESET_COLUMN,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("unknown {namespace} flag `{name}`")]
    UnknownFlag {
        namespace: SettingsNamespace,
        name: String,
    },
    #[error("unknown settings namespace `{0}`")]
    UnknownNamespace(String),
    #[error("unknown {namespace} preset `{name}`")]
    UnknownPreset {
        namespace: SettingsNamespace,
        name: String,
    },
    #[error("value for {namespace} flag `{flag}` is not a valid {expected}")]
    InvalidValue {
        namespace: SettingsNamespace,
        flag: String,
        expected: ValueKind,
    },
    #[error("{tier} tier cannot carry lock column `{column}`")]
    LockNotAllowed { tier: TierLevel, column: String },
    #[error("{tier} tier document must be a JSON object")]
    NotAnObject { tier: TierLevel },
}
