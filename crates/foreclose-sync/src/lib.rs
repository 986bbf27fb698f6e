//! Scrape-pass orchestration: change detection, endpoint resolution,
//! enrichment, persistence, and run reports.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use foreclose_adapters::{ListingSource, SnapshotSource};
use foreclose_core::{
    ChangeDetector, ChangeStatus, EnrichmentEndpoint, ListingFingerprint, ListingIdentity,
    ListingRecord, ResolvedConfiguration, ScrapedListing,
};
use foreclose_storage::{
    open_store, FingerprintStore, HttpClientConfig, ListingStore, PresetCatalogs, PresetFile,
    SettingsService, Store, StoreError,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod enrich;

pub use enrich::{
    EnrichmentClient, EnrichmentConfig, EnrichmentError, EnrichmentOrchestrator,
    HttpEnrichmentClient, NoopEnrichmentClient,
};

pub const CRATE_NAME: &str = "foreclose-sync";

#[derive(Debug, Clone, Deserialize)]
pub struct CountyRegistry {
    pub counties: Vec<CountyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountyConfig {
    pub county_id: String,
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub workspace_root: PathBuf,
    pub snapshot_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub sync_cron_1: String,
    pub sync_cron_2: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let workspace_root = std::env::var("FORECLOSE_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        Self {
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            snapshot_dir: std::env::var("FORECLOSE_SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| workspace_root.join("snapshots")),
            scheduler_enabled: std::env::var("FORECLOSE_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron_1: std::env::var("SYNC_CRON_1").unwrap_or_else(|_| "0 6 * * *".to_string()),
            sync_cron_2: std::env::var("SYNC_CRON_2").unwrap_or_else(|_| "0 18 * * *".to_string()),
            user_agent: std::env::var("FORECLOSE_USER_AGENT")
                .unwrap_or_else(|_| "foreclose-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("FORECLOSE_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            workspace_root,
        }
    }

    /// Local defaults rooted at `root`; used by tests and one-off tools.
    pub fn for_workspace(root: impl Into<PathBuf>) -> Self {
        let workspace_root = root.into();
        Self {
            database_url: None,
            snapshot_dir: workspace_root.join("snapshots"),
            scheduler_enabled: false,
            sync_cron_1: "0 6 * * *".to_string(),
            sync_cron_2: "0 18 * * *".to_string(),
            user_agent: "foreclose-bot/0.1".to_string(),
            http_timeout_secs: 20,
            workspace_root,
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }
}

pub async fn load_county_registry(workspace_root: &Path) -> Result<CountyRegistry> {
    let path = workspace_root.join("counties.yaml");
    let text = fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// `presets.yaml` layered over the built-ins; built-ins alone when the file is absent.
pub async fn load_preset_catalogs(workspace_root: &Path) -> Result<PresetCatalogs> {
    let path = workspace_root.join("presets.yaml");
    let text = match fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no presets file; using built-in presets");
            return Ok(PresetCatalogs::builtin());
        }
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    let file: PresetFile =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    PresetCatalogs::from_file(&file).with_context(|| format!("validating {}", path.display()))
}

/// What happened to one listing during a pass.
#[derive(Debug, Clone, Serialize)]
pub struct ListingChange {
    pub county: String,
    pub sheriff_number: String,
    pub status: ChangeStatus,
    pub fingerprint: ListingFingerprint,
    pub endpoints_called: usize,
    pub endpoint_failures: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub anomalies: Vec<String>,
    /// Another writer replaced the fingerprint first; this pass's write was dropped.
    pub conflict: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CountyRunSummary {
    pub county_id: String,
    pub listings_seen: usize,
    pub new_listings: usize,
    pub changed_listings: usize,
    pub unchanged_listings: usize,
    pub skipped_without_id: usize,
    pub endpoints_enabled: Vec<EnrichmentEndpoint>,
    pub resolution_failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counties: Vec<CountyRunSummary>,
    pub listings_seen: usize,
    pub new_listings: usize,
    pub changed_listings: usize,
    pub unchanged_listings: usize,
    pub skipped_without_id: usize,
    pub enrichment_calls: usize,
    pub enrichment_failures: usize,
    pub fingerprint_conflicts: usize,
    pub data_anomalies: usize,
    pub reports_dir: String,
}

/// Serializes read-classify-write per listing identity within this process.
#[derive(Debug, Default)]
pub struct IdentityLocks {
    inner: Mutex<HashMap<ListingIdentity, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    pub async fn acquire(&self, identity: &ListingIdentity) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(identity.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drops entries nobody holds.
    pub async fn prune(&self) {
        self.inner
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: Arc<dyn Store>,
    source: Arc<dyn ListingSource>,
    settings: SettingsService,
    enrichment: EnrichmentOrchestrator,
    detector: ChangeDetector,
    locks: IdentityLocks,
}

impl SyncPipeline {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn Store>,
        source: Arc<dyn ListingSource>,
        presets: Arc<PresetCatalogs>,
        client: Arc<dyn EnrichmentClient>,
    ) -> Self {
        Self {
            settings: SettingsService::new(store.clone(), presets),
            enrichment: EnrichmentOrchestrator::new(client),
            detector: ChangeDetector::new(),
            locks: IdentityLocks::default(),
            config,
            store,
            source,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let registry = load_county_registry(&self.config.workspace_root).await?;
        let enabled: Vec<_> = registry.counties.into_iter().filter(|c| c.enabled).collect();
        info!(%run_id, counties = enabled.len(), "sync run starting");

        let mut counties = Vec::with_capacity(enabled.len());
        let mut changes = Vec::new();
        for county in &enabled {
            let span = info_span!("county_sync", %run_id, county = %county.county_id);
            let summary = self
                .sync_county(county, &mut changes)
                .instrument(span)
                .await
                .with_context(|| format!("syncing county {}", county.county_id))?;
            counties.push(summary);
        }
        self.locks.prune().await;

        let finished_at = Utc::now();
        let reports_dir = self.config.workspace_root.join("reports").join(run_id.to_string());
        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at,
            listings_seen: counties.iter().map(|c| c.listings_seen).sum(),
            new_listings: counties.iter().map(|c| c.new_listings).sum(),
            changed_listings: counties.iter().map(|c| c.changed_listings).sum(),
            unchanged_listings: counties.iter().map(|c| c.unchanged_listings).sum(),
            skipped_without_id: counties.iter().map(|c| c.skipped_without_id).sum(),
            enrichment_calls: changes.iter().map(|c| c.endpoints_called).sum(),
            enrichment_failures: changes.iter().map(|c| c.endpoint_failures).sum(),
            fingerprint_conflicts: changes.iter().filter(|c| c.conflict).count(),
            data_anomalies: changes.iter().map(|c| c.anomalies.len()).sum(),
            counties,
            reports_dir: reports_dir.display().to_string(),
        };
        write_reports(&reports_dir, &summary, &changes).await?;
        info!(
            %run_id,
            new = summary.new_listings,
            changed = summary.changed_listings,
            unchanged = summary.unchanged_listings,
            "sync run finished"
        );
        Ok(summary)
    }

    async fn sync_county(
        &self,
        county: &CountyConfig,
        changes: &mut Vec<ListingChange>,
    ) -> Result<CountyRunSummary> {
        let mut summary = CountyRunSummary {
            county_id: county.county_id.clone(),
            ..CountyRunSummary::default()
        };

        let batch = match self.source.fetch_listings(&county.county_id).await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "listing source failed; skipping county");
                summary.source_error = Some(err.to_string());
                return Ok(summary);
            }
        };
        summary.listings_seen = batch.listings.len();
        summary.skipped_without_id = batch.skipped_without_id;
        if batch.listings.is_empty() {
            return Ok(summary);
        }

        let endpoints = self.county_endpoints(&batch.county).await;
        summary.resolution_failed = endpoints.is_none();
        let endpoints = endpoints.unwrap_or_else(ResolvedConfiguration::empty);
        summary.endpoints_enabled = endpoints.enabled();

        for listing in &batch.listings {
            let change = self.process_listing(listing, &endpoints).await?;
            match change.as_ref().map(|c| c.status) {
                Some(ChangeStatus::New) => summary.new_listings += 1,
                Some(ChangeStatus::Changed) => summary.changed_listings += 1,
                Some(ChangeStatus::Unchanged) | None => summary.unchanged_listings += 1,
            }
            changes.extend(change);
        }
        Ok(summary)
    }

    /// `None` when resolution failed; callers must then call no endpoints.
    async fn county_endpoints(
        &self,
        county: &str,
    ) -> Option<ResolvedConfiguration<EnrichmentEndpoint>> {
        match self
            .settings
            .resolve_all::<EnrichmentEndpoint>(Some(county), None, None)
            .await
        {
            Ok(resolved) => Some(resolved),
            Err(err) => {
                warn!(
                    %county,
                    error = %err,
                    "endpoint resolution failed; enrichment disabled for county"
                );
                None
            }
        }
    }

    /// Classify, and for new/changed listings enrich and persist. Returns
    /// `None` for unchanged listings, which are left untouched.
    pub async fn process_listing(
        &self,
        listing: &ScrapedListing,
        endpoints: &ResolvedConfiguration<EnrichmentEndpoint>,
    ) -> Result<Option<ListingChange>, StoreError> {
        let identity = &listing.identity;
        let _guard = self.locks.acquire(identity).await;

        let prior = self.store.prior_fingerprint(identity).await?;
        let classification = self
            .detector
            .classify(&listing.fields, prior.as_ref().map(ListingFingerprint::as_str));
        for anomaly in &classification.anomalies {
            warn!(
                listing = %identity,
                field = anomaly.field.key(),
                raw = %anomaly.raw,
                "content field kept as raw text"
            );
        }
        if !classification.status.needs_processing() {
            debug!(listing = %identity, "unchanged; skipping");
            return Ok(None);
        }

        let outcomes = self.enrichment.enrich(listing, endpoints).await;
        let first_seen_at = match self.store.get_listing(identity).await? {
            Some(existing) => existing.first_seen_at,
            None => listing.scraped_at,
        };
        let record = ListingRecord {
            identity: identity.clone(),
            fields: listing.fields.clone(),
            fingerprint: classification.fingerprint.clone(),
            change_status: classification.status,
            first_seen_at,
            last_changed_at: listing.scraped_at,
            enrichment: outcomes,
        };

        // The fingerprint claims the write; the record follows only if the claim holds.
        let conflict = match self
            .store
            .store_fingerprint(identity, prior.as_ref(), &record.fingerprint)
            .await
        {
            Ok(()) => {
                self.store.upsert_listing(&record).await?;
                info!(
                    listing = %identity,
                    status = record.change_status.as_str(),
                    endpoints = record.enrichment.len(),
                    failures = record.enrichment_failures(),
                    "listing persisted"
                );
                false
            }
            Err(StoreError::Conflict { found, .. }) => {
                warn!(
                    listing = %identity,
                    found = ?found,
                    "fingerprint replaced concurrently; leaving the other writer's record"
                );
                true
            }
            Err(err) => return Err(err),
        };

        Ok(Some(ListingChange {
            county: identity.county.clone(),
            sheriff_number: identity.sheriff_number.clone(),
            status: record.change_status,
            endpoints_called: record.enrichment.len(),
            endpoint_failures: record.enrichment_failures(),
            fingerprint: record.fingerprint,
            anomalies: classification
                .anomalies
                .iter()
                .map(|a| a.field.key().to_string())
                .collect(),
            conflict,
        }))
    }

    /// Cron jobs that run the pass on `SYNC_CRON_1` / `SYNC_CRON_2`.
    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        for cron in [&self.config.sync_cron_1, &self.config.sync_cron_2] {
            let pipeline = Arc::clone(self);
            let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
                let pipeline = Arc::clone(&pipeline);
                Box::pin(async move {
                    match pipeline.run_once().await {
                        Ok(summary) => info!(run_id = %summary.run_id, "scheduled sync finished"),
                        Err(err) => warn!(error = %format!("{err:#}"), "scheduled sync failed"),
                    }
                })
            })
            .with_context(|| format!("creating scheduler job for cron {cron}"))?;
            sched.add(job).await.context("adding scheduler job")?;
        }
        Ok(Some(sched))
    }
}

async fn write_reports(
    reports_dir: &Path,
    summary: &SyncRunSummary,
    changes: &[ListingChange],
) -> Result<()> {
    fs::create_dir_all(reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let body = serde_json::to_vec_pretty(&serde_json::json!({
        "summary": summary,
        "changes": changes,
    }))
    .context("serializing run summary")?;
    fs::write(reports_dir.join("run_summary.json"), body)
        .await
        .context("writing run_summary.json")?;

    fs::write(reports_dir.join("daily_brief.md"), daily_brief(summary, changes))
        .await
        .context("writing daily_brief.md")?;
    Ok(())
}

pub fn daily_brief(summary: &SyncRunSummary, changes: &[ListingChange]) -> String {
    let county_lines = summary
        .counties
        .iter()
        .map(|c| {
            let mut line = format!(
                "- {}: {} seen, {} new, {} changed, {} unchanged",
                c.county_id,
                c.listings_seen,
                c.new_listings,
                c.changed_listings,
                c.unchanged_listings
            );
            if c.resolution_failed {
                line.push_str(" (enrichment disabled: settings unavailable)");
            }
            if let Some(err) = &c.source_error {
                line.push_str(&format!(" (source error: {err})"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n");
    let change_lines = changes
        .iter()
        .map(|c| {
            format!(
                "- `{}:{}` {} ({} endpoints, {} failed)",
                c.county,
                c.sheriff_number,
                c.status.as_str(),
                c.endpoints_called,
                c.endpoint_failures
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "# Sheriff Sale Daily Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- New: {}\n- Changed: {}\n- Unchanged: {}\n- Skipped (no sheriff number): {}\n- Enrichment failures: {}\n\n## Counties\n{}\n\n## Changes\n{}\n",
        summary.run_id,
        summary.started_at,
        summary.finished_at,
        summary.new_listings,
        summary.changed_listings,
        summary.unchanged_listings,
        summary.skipped_without_id,
        summary.enrichment_failures,
        county_lines,
        if change_lines.is_empty() { "- none".to_string() } else { change_lines },
    )
}

/// Wires the pipeline from environment configuration.
pub async fn build_pipeline_from_env() -> Result<Arc<SyncPipeline>> {
    let config = SyncConfig::from_env();
    let store = open_store(config.database_url.as_deref()).await?;
    let presets = Arc::new(load_preset_catalogs(&config.workspace_root).await?);
    let source = Arc::new(SnapshotSource::new(config.snapshot_dir.clone()));
    let client =
        HttpEnrichmentClient::new(EnrichmentConfig::from_env(), config.http_client_config())?;
    Ok(Arc::new(SyncPipeline::new(
        config,
        store,
        source,
        presets,
        Arc::new(client),
    )))
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    build_pipeline_from_env().await?.run_once().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreclose_adapters::{AdapterError, SourceBatch};
    use foreclose_core::{EndpointStatus, SettingsNamespace};
    use foreclose_storage::{MemoryStore, SettingsStore, TierScope};
    use serde_json::{json, Map, Value};
    use tempfile::tempdir;

    struct FixedSource {
        listings: Vec<ScrapedListing>,
    }

    #[async_trait::async_trait]
    impl ListingSource for FixedSource {
        fn source_id(&self) -> &str {
            "fixed"
        }

        async fn fetch_listings(&self, county: &str) -> Result<SourceBatch, AdapterError> {
            Ok(SourceBatch {
                county: county.to_string(),
                listings: self.listings.clone(),
                skipped_without_id: 0,
            })
        }
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn listing(status: &str) -> ScrapedListing {
        ScrapedListing {
            identity: ListingIdentity::new("camden", "F-24000123"),
            scraped_at: Utc::now(),
            fields: fields(json!({
                "address": "118 Haddon Ave",
                "city": "Collingswood",
                "judgment_amount": "$245,310.77",
                "status": status,
                "sale_date": "2025-03-19",
            })),
        }
    }

    fn pipeline(store: Arc<MemoryStore>, root: &Path) -> SyncPipeline {
        SyncPipeline::new(
            SyncConfig::for_workspace(root),
            store,
            Arc::new(FixedSource { listings: vec![] }),
            Arc::new(PresetCatalogs::builtin()),
            Arc::new(NoopEnrichmentClient),
        )
    }

    #[tokio::test]
    async fn first_seen_then_unchanged_then_changed() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone(), dir.path());
        let endpoints = ResolvedConfiguration::empty();

        let first = pipeline
            .process_listing(&listing("Scheduled"), &endpoints)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.status, ChangeStatus::New);
        assert_eq!(
            store.prior_fingerprint(&listing("x").identity).await.unwrap(),
            Some(first.fingerprint.clone())
        );

        let again = pipeline
            .process_listing(&listing("Scheduled"), &endpoints)
            .await
            .unwrap();
        assert!(again.is_none());

        let changed = pipeline
            .process_listing(&listing("Adjourned"), &endpoints)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(changed.status, ChangeStatus::Changed);
        assert_ne!(changed.fingerprint, first.fingerprint);
        let stored = store.get_listing(&listing("x").identity).await.unwrap().unwrap();
        assert_eq!(stored.fingerprint, changed.fingerprint);
        assert_eq!(stored.change_status, ChangeStatus::Changed);
        assert_eq!(store.listing_count().await, 1);
    }

    /// Lets another writer land a fingerprint between our read and our write.
    struct RacingStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl FingerprintStore for RacingStore {
        async fn prior_fingerprint(
            &self,
            identity: &ListingIdentity,
        ) -> Result<Option<ListingFingerprint>, StoreError> {
            self.inner.prior_fingerprint(identity).await
        }

        async fn store_fingerprint(
            &self,
            identity: &ListingIdentity,
            expected: Option<&ListingFingerprint>,
            fingerprint: &ListingFingerprint,
        ) -> Result<(), StoreError> {
            let rival = ListingFingerprint::from_hex("ff");
            self.inner.store_fingerprint(identity, expected, &rival).await?;
            self.inner
                .upsert_listing(&ListingRecord {
                    identity: identity.clone(),
                    fields: Map::new(),
                    fingerprint: rival,
                    change_status: ChangeStatus::New,
                    first_seen_at: Utc::now(),
                    last_changed_at: Utc::now(),
                    enrichment: vec![],
                })
                .await?;
            self.inner.store_fingerprint(identity, expected, fingerprint).await
        }
    }

    #[async_trait::async_trait]
    impl SettingsStore for RacingStore {
        async fn tier_document(
            &self,
            namespace: SettingsNamespace,
            scope: &TierScope,
        ) -> Result<Option<foreclose_core::TierDocument>, StoreError> {
            self.inner.tier_document(namespace, scope).await
        }

        async fn put_tier_document(
            &self,
            namespace: SettingsNamespace,
            scope: &TierScope,
            document: foreclose_core::TierDocument,
        ) -> Result<(), StoreError> {
            self.inner.put_tier_document(namespace, scope, document).await
        }
    }

    #[async_trait::async_trait]
    impl ListingStore for RacingStore {
        async fn upsert_listing(&self, record: &ListingRecord) -> Result<(), StoreError> {
            self.inner.upsert_listing(record).await
        }

        async fn get_listing(
            &self,
            identity: &ListingIdentity,
        ) -> Result<Option<ListingRecord>, StoreError> {
            self.inner.get_listing(identity).await
        }
    }

    #[tokio::test]
    async fn concurrent_writer_is_reported_as_conflict() {
        let dir = tempdir().unwrap();
        let store = Arc::new(RacingStore {
            inner: MemoryStore::new(),
        });
        let pipeline = SyncPipeline::new(
            SyncConfig::for_workspace(dir.path()),
            store.clone(),
            Arc::new(FixedSource { listings: vec![] }),
            Arc::new(PresetCatalogs::builtin()),
            Arc::new(NoopEnrichmentClient),
        );

        let change = pipeline
            .process_listing(&listing("Scheduled"), &ResolvedConfiguration::empty())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.status, ChangeStatus::New);
        assert!(change.conflict);
        let id = listing("x").identity;
        let stored_fingerprint = store.prior_fingerprint(&id).await.unwrap();
        assert_eq!(stored_fingerprint, Some(ListingFingerprint::from_hex("ff")));
        let record = store.get_listing(&id).await.unwrap().unwrap();
        assert_eq!(Some(record.fingerprint), stored_fingerprint);
        assert!(record.fields.is_empty());
    }

    fn settings_row_error() -> StoreError {
        StoreError::Serialization(serde_json::from_str::<Value>("{").unwrap_err())
    }

    /// Listing and fingerprint storage work; every settings read fails.
    struct SettingsDownStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl FingerprintStore for SettingsDownStore {
        async fn prior_fingerprint(
            &self,
            identity: &ListingIdentity,
        ) -> Result<Option<ListingFingerprint>, StoreError> {
            self.inner.prior_fingerprint(identity).await
        }

        async fn store_fingerprint(
            &self,
            identity: &ListingIdentity,
            expected: Option<&ListingFingerprint>,
            fingerprint: &ListingFingerprint,
        ) -> Result<(), StoreError> {
            self.inner.store_fingerprint(identity, expected, fingerprint).await
        }
    }

    #[async_trait::async_trait]
    impl SettingsStore for SettingsDownStore {
        async fn tier_document(
            &self,
            _namespace: SettingsNamespace,
            _scope: &TierScope,
        ) -> Result<Option<foreclose_core::TierDocument>, StoreError> {
            Err(settings_row_error())
        }

        async fn put_tier_document(
            &self,
            _namespace: SettingsNamespace,
            _scope: &TierScope,
            _document: foreclose_core::TierDocument,
        ) -> Result<(), StoreError> {
            Err(settings_row_error())
        }
    }

    #[async_trait::async_trait]
    impl ListingStore for SettingsDownStore {
        async fn upsert_listing(&self, record: &ListingRecord) -> Result<(), StoreError> {
            self.inner.upsert_listing(record).await
        }

        async fn get_listing(
            &self,
            identity: &ListingIdentity,
        ) -> Result<Option<ListingRecord>, StoreError> {
            self.inner.get_listing(identity).await
        }
    }

    #[derive(Default)]
    struct RecordingClient {
        calls: std::sync::Mutex<Vec<EnrichmentEndpoint>>,
    }

    #[async_trait::async_trait]
    impl EnrichmentClient for RecordingClient {
        async fn call(
            &self,
            endpoint: EnrichmentEndpoint,
            _listing: &ScrapedListing,
        ) -> Result<Value, EnrichmentError> {
            self.calls.lock().unwrap().push(endpoint);
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn unreadable_settings_disable_every_endpoint() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("counties.yaml"),
            "counties:\n  - county_id: camden\n    display_name: Camden\n",
        )
        .unwrap();
        let store = Arc::new(SettingsDownStore {
            inner: MemoryStore::new(),
        });
        let client = Arc::new(RecordingClient::default());
        let pipeline = SyncPipeline::new(
            SyncConfig::for_workspace(dir.path()),
            store.clone(),
            Arc::new(FixedSource {
                listings: vec![listing("Scheduled")],
            }),
            Arc::new(PresetCatalogs::builtin()),
            client.clone(),
        );

        let summary = pipeline.run_once().await.unwrap();
        assert!(summary.counties[0].resolution_failed);
        assert!(summary.counties[0].endpoints_enabled.is_empty());
        assert_eq!(summary.new_listings, 1);
        assert_eq!(summary.enrichment_calls, 0);
        assert!(client.calls.lock().unwrap().is_empty());

        let stored = store.get_listing(&listing("x").identity).await.unwrap().unwrap();
        assert!(stored.enrichment.is_empty());
    }

    #[tokio::test]
    async fn admin_disabled_endpoints_are_not_called_during_run() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("counties.yaml"),
            "counties:\n  - county_id: camden\n    display_name: Camden\n",
        )
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .put_tier_document(
                SettingsNamespace::Enrichment,
                &TierScope::Admin,
                fields(json!({
                    "zillow_property": true, "lock_zillow_property": true,
                    "zillow_zestimate": false, "zillow_price_history": false,
                    "zillow_tax_history": false,
                })),
            )
            .await
            .unwrap();
        let pipeline = SyncPipeline::new(
            SyncConfig::for_workspace(dir.path()),
            store.clone(),
            Arc::new(FixedSource {
                listings: vec![listing("Scheduled")],
            }),
            Arc::new(PresetCatalogs::builtin()),
            Arc::new(NoopEnrichmentClient),
        );

        let summary = pipeline.run_once().await.unwrap();
        assert_eq!(summary.new_listings, 1);
        assert_eq!(
            summary.counties[0].endpoints_enabled,
            vec![EnrichmentEndpoint::ZillowProperty]
        );

        let stored = store.get_listing(&listing("x").identity).await.unwrap().unwrap();
        assert_eq!(stored.enrichment.len(), 1);
        assert_eq!(stored.enrichment[0].status, EndpointStatus::Succeeded);
        assert_eq!(stored.enrichment_failures(), 0);

        let reports = Path::new(&summary.reports_dir);
        assert!(reports.join("run_summary.json").exists());
        assert!(reports.join("daily_brief.md").exists());

        let second = pipeline.run_once().await.unwrap();
        assert_eq!(second.unchanged_listings, 1);
        assert_eq!(second.enrichment_calls, 0);
    }

    #[tokio::test]
    async fn identity_locks_are_pruned_after_release() {
        let locks = IdentityLocks::default();
        let id = ListingIdentity::new("camden", "F-1");
        {
            let _guard = locks.acquire(&id).await;
            locks.prune().await;
            assert_eq!(locks.len().await, 1);
        }
        locks.prune().await;
        assert_eq!(locks.len().await, 0);
    }

    #[tokio::test]
    async fn missing_presets_file_uses_builtins() {
        let dir = tempdir().unwrap();
        let catalogs = load_preset_catalogs(dir.path()).await.unwrap();
        assert!(catalogs.enrichment.get("full").is_some());
    }
}
