use std::path::Path;

use foreclose_adapters::{ListingSource, SnapshotSource};

#[tokio::test]
async fn checked_in_camden_snapshot_loads() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let source = SnapshotSource::new(root.join("snapshots"));
    let batch = source.fetch_listings("Camden").await.expect("camden snapshot");

    assert_eq!(batch.listings.len(), 2);
    assert_eq!(batch.skipped_without_id, 1);
    assert_eq!(batch.listings[0].identity.key(), "camden:F-24000123");
    assert_eq!(batch.listings[0].field_str("city"), Some("Collingswood"));
}
