//! Loads tier rows once per resolution and runs them through the resolver.

use std::collections::BTreeMap;
use std::sync::Arc;

use foreclose_core::listing::normalize_county_id;
use foreclose_core::settings::PRESET_COLUMN;
use foreclose_core::{
    DealFeature, EnrichmentEndpoint, FlagRegistry, InvestmentParam, Preset, PresetCatalog,
    PresetSpec, Resolved, ResolvedConfiguration, SettingSource, SettingValue, SettingsError,
    SettingsNamespace, SettingsTier, ThreeTierResolver, TierDocument, TierLevel,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{SettingsStore, Store, StoreError, TierScope};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Configuration(#[from] SettingsError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// On-disk preset definitions, one section per namespace.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresetFile {
    #[serde(default)]
    pub enrichment: BTreeMap<String, PresetSpec>,
    #[serde(default)]
    pub features: BTreeMap<String, PresetSpec>,
    #[serde(default)]
    pub investment: BTreeMap<String, PresetSpec>,
}

#[derive(Debug, Clone)]
pub struct PresetCatalogs {
    pub enrichment: PresetCatalog<EnrichmentEndpoint>,
    pub features: PresetCatalog<DealFeature>,
    pub investment: PresetCatalog<InvestmentParam>,
}

impl Default for PresetCatalogs {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetCatalogs {
    pub fn builtin() -> Self {
        Self {
            enrichment: PresetCatalog::builtin(),
            features: PresetCatalog::builtin(),
            investment: PresetCatalog::builtin(),
        }
    }

    pub fn from_file(file: &PresetFile) -> Result<Self, SettingsError> {
        Ok(Self {
            enrichment: PresetCatalog::from_specs(&file.enrichment)?,
            features: PresetCatalog::from_specs(&file.features)?,
            investment: PresetCatalog::from_specs(&file.investment)?,
        })
    }

    pub fn summaries(&self, namespace: SettingsNamespace) -> Vec<PresetSummary> {
        match namespace {
            SettingsNamespace::Enrichment => summarize(&self.enrichment),
            SettingsNamespace::Features => summarize(&self.features),
            SettingsNamespace::Investment => summarize(&self.investment),
        }
    }
}

/// Picks the catalog matching a registry.
pub trait CatalogFor<R: FlagRegistry> {
    fn catalog(&self) -> &PresetCatalog<R>;
}

impl CatalogFor<EnrichmentEndpoint> for PresetCatalogs {
    fn catalog(&self) -> &PresetCatalog<EnrichmentEndpoint> {
        &self.enrichment
    }
}

impl CatalogFor<DealFeature> for PresetCatalogs {
    fn catalog(&self) -> &PresetCatalog<DealFeature> {
        &self.features
    }
}

impl CatalogFor<InvestmentParam> for PresetCatalogs {
    fn catalog(&self) -> &PresetCatalog<InvestmentParam> {
        &self.investment
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PresetSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub values: BTreeMap<String, SettingValue>,
}

fn summarize<R: FlagRegistry>(catalog: &PresetCatalog<R>) -> Vec<PresetSummary> {
    catalog
        .iter()
        .map(|preset| PresetSummary {
            name: preset.name.clone(),
            description: preset.description.clone(),
            values: preset
                .flags()
                .into_iter()
                .filter_map(|flag| Some((flag.key().to_string(), *preset.value(flag)?)))
                .collect(),
        })
        .collect()
}

/// Single-flag answer for string-keyed callers.
#[derive(Debug, Clone, Serialize)]
pub struct FlagResolution {
    pub namespace: SettingsNamespace,
    pub flag: String,
    pub value: SettingValue,
    pub source: SettingSource,
}

/// Fail-closed feature answer: `source` is `None` when resolution failed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureCheck {
    pub enabled: bool,
    pub source: Option<SettingSource>,
}

#[derive(Clone)]
pub struct SettingsService {
    store: Arc<dyn Store>,
    presets: Arc<PresetCatalogs>,
}

impl SettingsService {
    pub fn new(store: Arc<dyn Store>, presets: Arc<PresetCatalogs>) -> Self {
        Self { store, presets }
    }

    pub fn presets(&self) -> &PresetCatalogs {
        &self.presets
    }

    /// Fetches each tier exactly once and builds a resolver over the snapshot.
    ///
    /// `preset_override` is strict (unknown name is an error). A preset named in
    /// the user row is lenient and ignored with a warning when unknown.
    pub async fn resolver<R>(
        &self,
        county: Option<&str>,
        user: Option<&str>,
        preset_override: Option<&str>,
    ) -> Result<ThreeTierResolver<R>, ResolveError>
    where
        R: FlagRegistry,
        PresetCatalogs: CatalogFor<R>,
    {
        let namespace = R::NAMESPACE;
        let admin = match self.store.admin_tier(namespace).await? {
            Some(doc) => SettingsTier::from_document(TierLevel::Admin, &doc),
            None => {
                warn!(%namespace, "admin settings row missing; using registry defaults");
                SettingsTier::fallback_admin()
            }
        };

        let county_tier = match county.map(normalize_county_id).filter(|c| !c.is_empty()) {
            Some(county_id) => self
                .store
                .county_tier(namespace, &county_id)
                .await?
                .map(|doc| SettingsTier::from_document(TierLevel::County, &doc)),
            None => None,
        };

        let user_tier = match user.map(str::trim).filter(|u| !u.is_empty()) {
            Some(user_id) => self
                .store
                .user_tier(namespace, user_id)
                .await?
                .map(|doc| SettingsTier::<R>::from_document(TierLevel::User, &doc)),
            None => None,
        };

        let catalog = CatalogFor::<R>::catalog(self.presets.as_ref());
        let requested = preset_override.map(str::trim).filter(|p| !p.is_empty());
        let preset: Option<Preset<R>> = match requested {
            Some(name) => Some(
                catalog
                    .get(name)
                    .cloned()
                    .ok_or_else(|| SettingsError::UnknownPreset {
                        namespace,
                        name: name.to_string(),
                    })?,
            ),
            None => user_tier
                .as_ref()
                .and_then(SettingsTier::preset)
                .and_then(|name| match catalog.get(name) {
                    Some(preset) => Some(preset.clone()),
                    None => {
                        warn!(%namespace, preset = name, "user selected unknown preset; ignoring");
                        None
                    }
                }),
        };

        debug!(
            %namespace,
            county = county.unwrap_or(""),
            user = user.unwrap_or(""),
            preset = preset.as_ref().map(|p| p.name.as_str()).unwrap_or(""),
            "settings tiers loaded"
        );

        Ok(ThreeTierResolver::new(admin)
            .with_county(county_tier)
            .with_user(user_tier)
            .with_preset(preset))
    }

    pub async fn resolve_all<R>(
        &self,
        county: Option<&str>,
        user: Option<&str>,
        preset: Option<&str>,
    ) -> Result<ResolvedConfiguration<R>, ResolveError>
    where
        R: FlagRegistry,
        PresetCatalogs: CatalogFor<R>,
    {
        Ok(self.resolver::<R>(county, user, preset).await?.resolve_all())
    }

    pub async fn resolve_named<R>(
        &self,
        name: &str,
        county: Option<&str>,
        user: Option<&str>,
    ) -> Result<(R, Resolved), ResolveError>
    where
        R: FlagRegistry,
        PresetCatalogs: CatalogFor<R>,
    {
        // Unknown names fail before any store round trip.
        R::parse(name)?;
        Ok(self.resolver::<R>(county, user, None).await?.resolve_named(name)?)
    }

    /// Namespace-erased `resolve_all` for the API and CLI.
    pub async fn resolve_namespace(
        &self,
        namespace: SettingsNamespace,
        county: Option<&str>,
        user: Option<&str>,
        preset: Option<&str>,
    ) -> Result<Value, ResolveError> {
        let value = match namespace {
            SettingsNamespace::Enrichment => serde_json::to_value(
                self.resolve_all::<EnrichmentEndpoint>(county, user, preset).await?,
            ),
            SettingsNamespace::Features => {
                serde_json::to_value(self.resolve_all::<DealFeature>(county, user, preset).await?)
            }
            SettingsNamespace::Investment => serde_json::to_value(
                self.resolve_all::<InvestmentParam>(county, user, preset).await?,
            ),
        };
        value.map_err(|err| ResolveError::Store(StoreError::Serialization(err)))
    }

    pub async fn resolve_flag_in(
        &self,
        namespace: SettingsNamespace,
        name: &str,
        county: Option<&str>,
        user: Option<&str>,
    ) -> Result<FlagResolution, ResolveError> {
        let (flag, resolved) = match namespace {
            SettingsNamespace::Enrichment => {
                let (flag, r) = self.resolve_named::<EnrichmentEndpoint>(name, county, user).await?;
                (flag.key(), r)
            }
            SettingsNamespace::Features => {
                let (flag, r) = self.resolve_named::<DealFeature>(name, county, user).await?;
                (flag.key(), r)
            }
            SettingsNamespace::Investment => {
                let (flag, r) = self.resolve_named::<InvestmentParam>(name, county, user).await?;
                (flag.key(), r)
            }
        };
        Ok(FlagResolution {
            namespace,
            flag: flag.to_string(),
            value: resolved.value,
            source: resolved.source,
        })
    }

    /// Feature gate. Any failure answers "disabled".
    pub async fn feature_enabled(
        &self,
        feature: DealFeature,
        county: Option<&str>,
        user: Option<&str>,
    ) -> FeatureCheck {
        match self.resolver::<DealFeature>(county, user, None).await {
            Ok(resolver) => {
                let resolved = resolver.resolve_flag(feature);
                FeatureCheck {
                    enabled: resolved.value.as_bool().unwrap_or(false),
                    source: Some(resolved.source),
                }
            }
            Err(err) => {
                warn!(
                    feature = feature.key(),
                    error = %err,
                    "feature resolution failed; treating as disabled"
                );
                FeatureCheck {
                    enabled: false,
                    source: None,
                }
            }
        }
    }

    /// Validated write of one tier row.
    pub async fn put_tier(
        &self,
        namespace: SettingsNamespace,
        scope: TierScope,
        document: TierDocument,
    ) -> Result<(), ResolveError> {
        let level = scope.level();
        match namespace {
            SettingsNamespace::Enrichment => {
                self.validate::<EnrichmentEndpoint>(level, &document)?
            }
            SettingsNamespace::Features => self.validate::<DealFeature>(level, &document)?,
            SettingsNamespace::Investment => self.validate::<InvestmentParam>(level, &document)?,
        }
        let scope = match scope {
            TierScope::County(county) => TierScope::County(normalize_county_id(&county)),
            TierScope::User(user) => TierScope::User(user.trim().to_string()),
            TierScope::Admin => TierScope::Admin,
        };
        self.store.put_tier_document(namespace, &scope, document).await?;
        debug!(%namespace, %scope, "tier document written");
        Ok(())
    }

    fn validate<R>(&self, level: TierLevel, document: &TierDocument) -> Result<(), SettingsError>
    where
        R: FlagRegistry,
        PresetCatalogs: CatalogFor<R>,
    {
        SettingsTier::<R>::validate_document(level, document)?;
        if let Some(name) = document.get(PRESET_COLUMN).and_then(Value::as_str) {
            if CatalogFor::<R>::catalog(self.presets.as_ref()).get(name).is_none() {
                return Err(SettingsError::UnknownPreset {
                    namespace: R::NAMESPACE,
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }
}
