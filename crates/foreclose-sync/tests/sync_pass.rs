use std::path::Path;
use std::sync::Arc;

use foreclose_adapters::SnapshotSource;
use foreclose_core::{ChangeStatus, ListingIdentity, SettingSource, SettingsNamespace};
use foreclose_storage::{
    ListingStore, MemoryStore, PresetCatalogs, SettingsService, SettingsStore, TierScope,
};
use foreclose_sync::{NoopEnrichmentClient, SyncConfig, SyncPipeline};
use serde_json::{json, Value};
use tempfile::tempdir;

fn repo_root() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn write_counties(root: &Path) {
    std::fs::write(
        root.join("counties.yaml"),
        "counties:\n  - county_id: camden\n    display_name: Camden County\n",
    )
    .expect("counties.yaml");
}

#[tokio::test]
async fn repeated_passes_only_process_new_or_changed_listings() {
    let workspace = tempdir().expect("tempdir");
    write_counties(workspace.path());
    let snapshots = workspace.path().join("snapshots");
    std::fs::create_dir_all(&snapshots).expect("snapshot dir");
    std::fs::copy(
        repo_root().join("snapshots/camden.json"),
        snapshots.join("camden.json"),
    )
    .expect("copy snapshot");

    let store = Arc::new(MemoryStore::new());
    store
        .put_tier_document(
            SettingsNamespace::Enrichment,
            &TierScope::County("camden".into()),
            json!({"skip_trace": true}).as_object().cloned().unwrap(),
        )
        .await
        .expect("county tier");

    let mut config = SyncConfig::for_workspace(workspace.path());
    config.snapshot_dir = snapshots.clone();
    let presets = Arc::new(PresetCatalogs::builtin());
    let pipeline = SyncPipeline::new(
        config,
        store.clone(),
        Arc::new(SnapshotSource::new(&snapshots)),
        presets.clone(),
        Arc::new(NoopEnrichmentClient),
    );

    let first = pipeline.run_once().await.expect("first pass");
    assert_eq!(first.new_listings, 2);
    assert_eq!(first.skipped_without_id, 1);
    // four default Zillow endpoints plus the county's skip trace, per listing
    assert_eq!(first.enrichment_calls, 10);

    let second = pipeline.run_once().await.expect("second pass");
    assert_eq!(second.new_listings, 0);
    assert_eq!(second.unchanged_listings, 2);
    assert_eq!(second.enrichment_calls, 0);

    // Formatting-only differences do not count as a change; a status change does.
    let mut snapshot: Value =
        serde_json::from_str(&std::fs::read_to_string(snapshots.join("camden.json")).unwrap())
            .unwrap();
    snapshot["records"][0]["city"] = json!("  COLLINGSWOOD ");
    snapshot["records"][1]["status"] = json!("Sold");
    std::fs::write(snapshots.join("camden.json"), snapshot.to_string()).unwrap();

    let third = pipeline.run_once().await.expect("third pass");
    assert_eq!(third.changed_listings, 1);
    assert_eq!(third.unchanged_listings, 1);

    let sold = store
        .get_listing(&ListingIdentity::new("camden", "F-24000188"))
        .await
        .unwrap()
        .expect("stored listing");
    assert_eq!(sold.change_status, ChangeStatus::Changed);
    assert_eq!(sold.enrichment.len(), 5);

    let settings = SettingsService::new(store, presets);
    let resolved = settings
        .resolve_all::<foreclose_core::EnrichmentEndpoint>(Some("camden"), None, None)
        .await
        .unwrap();
    assert_eq!(
        resolved.source(foreclose_core::EnrichmentEndpoint::SkipTrace),
        Some(SettingSource::County)
    );
}
