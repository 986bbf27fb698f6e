//! Process-local store used in tests and when no database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use foreclose_core::{
    ListingFingerprint, ListingIdentity, ListingRecord, SettingsNamespace, TierDocument,
};
use tokio::sync::RwLock;

use crate::{FingerprintStore, ListingStore, SettingsStore, StoreError, TierScope};

#[derive(Debug, Default)]
pub struct MemoryStore {
    settings: RwLock<HashMap<(SettingsNamespace, TierScope), TierDocument>>,
    fingerprints: RwLock<HashMap<ListingIdentity, ListingFingerprint>>,
    listings: RwLock<HashMap<ListingIdentity, ListingRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn listing_count(&self) -> usize {
        self.listings.read().await.len()
    }
}

#[async_trait]
impl FingerprintStore for MemoryStore {
    async fn prior_fingerprint(
        &self,
        identity: &ListingIdentity,
    ) -> Result<Option<ListingFingerprint>, StoreError> {
        Ok(self.fingerprints.read().await.get(identity).cloned())
    }

    async fn store_fingerprint(
        &self,
        identity: &ListingIdentity,
        expected: Option<&ListingFingerprint>,
        fingerprint: &ListingFingerprint,
    ) -> Result<(), StoreError> {
        let mut map = self.fingerprints.write().await;
        let current = map.get(identity);
        if current != expected {
            return Err(StoreError::Conflict {
                identity: identity.key(),
                expected: expected.map(|fp| fp.as_str().to_string()),
                found: current.map(|fp| fp.as_str().to_string()),
            });
        }
        map.insert(identity.clone(), fingerprint.clone());
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn tier_document(
        &self,
        namespace: SettingsNamespace,
        scope: &TierScope,
    ) -> Result<Option<TierDocument>, StoreError> {
        Ok(self
            .settings
            .read()
            .await
            .get(&(namespace, scope.clone()))
            .cloned())
    }

    async fn put_tier_document(
        &self,
        namespace: SettingsNamespace,
        scope: &TierScope,
        document: TierDocument,
    ) -> Result<(), StoreError> {
        self.settings
            .write()
            .await
            .insert((namespace, scope.clone()), document);
        Ok(())
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn upsert_listing(&self, record: &ListingRecord) -> Result<(), StoreError> {
        self.listings
            .write()
            .await
            .insert(record.identity.clone(), record.clone());
        Ok(())
    }

    async fn get_listing(
        &self,
        identity: &ListingIdentity,
    ) -> Result<Option<ListingRecord>, StoreError> {
        Ok(self.listings.read().await.get(identity).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fp(hex: &str) -> ListingFingerprint {
        ListingFingerprint::from_hex(hex)
    }

    #[tokio::test]
    async fn fingerprint_cas_rejects_stale_expectation() {
        let store = MemoryStore::new();
        let id = ListingIdentity::new("camden", "F-1");

        store.store_fingerprint(&id, None, &fp("aa")).await.unwrap();
        assert_eq!(store.prior_fingerprint(&id).await.unwrap(), Some(fp("aa")));

        let err = store.store_fingerprint(&id, None, &fp("bb")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        store
            .store_fingerprint(&id, Some(&fp("aa")), &fp("bb"))
            .await
            .unwrap();
        let err = store
            .store_fingerprint(&id, Some(&fp("aa")), &fp("cc"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { found: Some(ref f), .. } if f == "bb"));
    }

    #[tokio::test]
    async fn tier_documents_are_keyed_by_namespace_and_scope() {
        let store = MemoryStore::new();
        let doc = json!({"feature_ai_summaries": true}).as_object().cloned().unwrap();
        store
            .put_tier_document(
                SettingsNamespace::Features,
                &TierScope::County("camden".into()),
                doc,
            )
            .await
            .unwrap();

        assert!(store
            .county_tier(SettingsNamespace::Features, "camden")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .county_tier(SettingsNamespace::Enrichment, "camden")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .county_tier(SettingsNamespace::Features, "essex")
            .await
            .unwrap()
            .is_none());
    }
}
