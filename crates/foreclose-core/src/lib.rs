//! Core domain model, change detection, and tiered settings resolution for the
//! sheriff-sale foreclosure tracker.

pub mod fingerprint;
pub mod flags;
pub mod listing;
pub mod settings;

pub use fingerprint::{
    ChangeDetector, ChangeStatus, Classification, ContentField, DataAnomaly, ListingFingerprint,
};
pub use flags::{DealFeature, EnrichmentEndpoint, InvestmentParam};
pub use listing::{EndpointOutcome, EndpointStatus, ListingIdentity, ListingRecord, ScrapedListing};
pub use settings::{
    resolve_flag, FlagRegistry, Preset, PresetCatalog, PresetSpec, Resolved,
    ResolvedConfiguration, SettingSource, SettingValue, SettingsError, SettingsNamespace,
    SettingsTier, ThreeTierResolver, TierDocument, TierLevel, ValueKind,
};

pub const CRATE_NAME: &str = "foreclose-core";
