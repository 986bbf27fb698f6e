//! Persistence collaborators (fingerprints, settings tiers, listing records),
//! the tier loading service, and the retrying HTTP fetcher.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use foreclose_core::{
    ListingFingerprint, ListingIdentity, ListingRecord, SettingsNamespace, TierDocument, TierLevel,
};
use thiserror::Error;
use tracing::info;

pub mod http;
pub mod memory;
pub mod postgres;
pub mod settings;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, HttpClientConfig,
    HttpFetcher, RetryDisposition,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use settings::{
    FeatureCheck, FlagResolution, PresetCatalogs, PresetFile, PresetSummary, ResolveError,
    SettingsService,
};

pub const CRATE_NAME: &str = "foreclose-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("fingerprint for {identity} changed (expected {expected:?}, found {found:?})")]
    Conflict {
        identity: String,
        expected: Option<String>,
        found: Option<String>,
    },
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("applying migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("stored document is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Which persisted settings row a read or write targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TierScope {
    Admin,
    County(String),
    User(String),
}

impl TierScope {
    pub fn level(&self) -> TierLevel {
        match self {
            TierScope::Admin => TierLevel::Admin,
            TierScope::County(_) => TierLevel::County,
            TierScope::User(_) => TierLevel::User,
        }
    }

    /// Row key within the level; the admin singleton uses the empty string.
    pub fn scope_id(&self) -> &str {
        match self {
            TierScope::Admin => "",
            TierScope::County(id) | TierScope::User(id) => id,
        }
    }
}

impl fmt::Display for TierScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierScope::Admin => f.write_str("admin"),
            TierScope::County(id) => write!(f, "county:{id}"),
            TierScope::User(id) => write!(f, "user:{id}"),
        }
    }
}

#[async_trait]
pub trait FingerprintStore: Send + Sync {
    async fn prior_fingerprint(
        &self,
        identity: &ListingIdentity,
    ) -> Result<Option<ListingFingerprint>, StoreError>;

    /// Replaces the stored fingerprint only if it still equals `expected`
    /// (`None` meaning "no row yet"); otherwise `StoreError::Conflict`.
    async fn store_fingerprint(
        &self,
        identity: &ListingIdentity,
        expected: Option<&ListingFingerprint>,
        fingerprint: &ListingFingerprint,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn tier_document(
        &self,
        namespace: SettingsNamespace,
        scope: &TierScope,
    ) -> Result<Option<TierDocument>, StoreError>;

    async fn put_tier_document(
        &self,
        namespace: SettingsNamespace,
        scope: &TierScope,
        document: TierDocument,
    ) -> Result<(), StoreError>;

    async fn admin_tier(
        &self,
        namespace: SettingsNamespace,
    ) -> Result<Option<TierDocument>, StoreError> {
        self.tier_document(namespace, &TierScope::Admin).await
    }

    async fn county_tier(
        &self,
        namespace: SettingsNamespace,
        county_id: &str,
    ) -> Result<Option<TierDocument>, StoreError> {
        self.tier_document(namespace, &TierScope::County(county_id.to_string()))
            .await
    }

    async fn user_tier(
        &self,
        namespace: SettingsNamespace,
        user_id: &str,
    ) -> Result<Option<TierDocument>, StoreError> {
        self.tier_document(namespace, &TierScope::User(user_id.to_string()))
            .await
    }
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn upsert_listing(&self, record: &ListingRecord) -> Result<(), StoreError>;

    async fn get_listing(
        &self,
        identity: &ListingIdentity,
    ) -> Result<Option<ListingRecord>, StoreError>;
}

/// Everything the pipeline and the API need from persistence.
pub trait Store: FingerprintStore + SettingsStore + ListingStore {}

impl<T: FingerprintStore + SettingsStore + ListingStore> Store for T {}

/// Postgres when a database URL is configured, otherwise a process-local store.
pub async fn open_store(database_url: Option<&str>) -> anyhow::Result<Arc<dyn Store>> {
    match database_url.map(str::trim).filter(|url| !url.is_empty()) {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .context("connecting to settings/listing database")?;
            info!(backend = "postgres", "opened store");
            Ok(Arc::new(store))
        }
        None => {
            info!(backend = "memory", "DATABASE_URL not set; using in-memory store");
            Ok(Arc::new(MemoryStore::default()))
        }
    }
}

/// Applies `migrations/` from `workspace_root` to the database at `database_url`.
pub async fn migrate(database_url: &str, workspace_root: &Path) -> anyhow::Result<()> {
    let store = PgStore::connect(database_url)
        .await
        .context("connecting for migrations")?;
    let dir = workspace_root.join("migrations");
    store
        .migrate(&dir)
        .await
        .with_context(|| format!("applying migrations from {}", dir.display()))
}
