//! Postgres-backed store. Tier rows and listing records are JSONB documents.

use std::path::Path;

use async_trait::async_trait;
use foreclose_core::{
    ListingFingerprint, ListingIdentity, ListingRecord, SettingsNamespace, TierDocument,
};
use serde_json::Value;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::{FingerprintStore, ListingStore, SettingsStore, StoreError, TierScope};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self, dir: &Path) -> Result<(), StoreError> {
        let migrator = Migrator::new(dir).await?;
        migrator.run(&self.pool).await?;
        info!(dir = %dir.display(), "migrations applied");
        Ok(())
    }

    async fn current_fingerprint(
        &self,
        identity: &ListingIdentity,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT fingerprint
              FROM listing_fingerprints
             WHERE county = $1 AND sheriff_number = $2
            "#,
        )
        .bind(&identity.county)
        .bind(&identity.sheriff_number)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.try_get::<String, _>("fingerprint"))
            .transpose()
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl FingerprintStore for PgStore {
    async fn prior_fingerprint(
        &self,
        identity: &ListingIdentity,
    ) -> Result<Option<ListingFingerprint>, StoreError> {
        Ok(self
            .current_fingerprint(identity)
            .await?
            .map(ListingFingerprint::from_hex))
    }

    async fn store_fingerprint(
        &self,
        identity: &ListingIdentity,
        expected: Option<&ListingFingerprint>,
        fingerprint: &ListingFingerprint,
    ) -> Result<(), StoreError> {
        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO listing_fingerprints
                        (county, sheriff_number, fingerprint, updated_at)
                    VALUES ($1, $2, $3, NOW())
                    ON CONFLICT (county, sheriff_number) DO NOTHING
                    "#,
                )
                .bind(&identity.county)
                .bind(&identity.sheriff_number)
                .bind(fingerprint.as_str())
                .execute(&self.pool)
                .await?
            }
            Some(prior) => {
                sqlx::query(
                    r#"
                    UPDATE listing_fingerprints
                       SET fingerprint = $3,
                           updated_at = NOW()
                     WHERE county = $1
                       AND sheriff_number = $2
                       AND fingerprint = $4
                    "#,
                )
                .bind(&identity.county)
                .bind(&identity.sheriff_number)
                .bind(fingerprint.as_str())
                .bind(prior.as_str())
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 1 {
            debug!(listing = %identity, fingerprint = %fingerprint, "fingerprint stored");
            return Ok(());
        }
        Err(StoreError::Conflict {
            identity: identity.key(),
            expected: expected.map(|fp| fp.as_str().to_string()),
            found: self.current_fingerprint(identity).await?,
        })
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn tier_document(
        &self,
        namespace: SettingsNamespace,
        scope: &TierScope,
    ) -> Result<Option<TierDocument>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT document
              FROM settings_documents
             WHERE namespace = $1 AND tier = $2 AND scope_id = $3
            "#,
        )
        .bind(namespace.as_str())
        .bind(scope.level().as_str())
        .bind(scope.scope_id())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        match row.try_get::<Value, _>("document")? {
            Value::Object(doc) => Ok(Some(doc)),
            Value::Null => Ok(None),
            other => Err(StoreError::Serialization(serde::de::Error::custom(format!(
                "{namespace} {scope} settings row is not an object: {other}"
            )))),
        }
    }

    async fn put_tier_document(
        &self,
        namespace: SettingsNamespace,
        scope: &TierScope,
        document: TierDocument,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO settings_documents (namespace, tier, scope_id, document, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (namespace, tier, scope_id)
            DO UPDATE SET document = EXCLUDED.document, updated_at = NOW()
            "#,
        )
        .bind(namespace.as_str())
        .bind(scope.level().as_str())
        .bind(scope.scope_id())
        .bind(Value::Object(document))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ListingStore for PgStore {
    async fn upsert_listing(&self, record: &ListingRecord) -> Result<(), StoreError> {
        let body = serde_json::to_value(record)?;
        sqlx::query(
            r#"
            INSERT INTO listings
                (county, sheriff_number, change_status, fingerprint, record,
                 first_seen_at, last_changed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (county, sheriff_number)
            DO UPDATE SET change_status = EXCLUDED.change_status,
                          fingerprint = EXCLUDED.fingerprint,
                          record = EXCLUDED.record,
                          last_changed_at = EXCLUDED.last_changed_at
            "#,
        )
        .bind(&record.identity.county)
        .bind(&record.identity.sheriff_number)
        .bind(record.change_status.as_str())
        .bind(record.fingerprint.as_str())
        .bind(body)
        .bind(record.first_seen_at)
        .bind(record.last_changed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_listing(
        &self,
        identity: &ListingIdentity,
    ) -> Result<Option<ListingRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT record
              FROM listings
             WHERE county = $1 AND sheriff_number = $2
            "#,
        )
        .bind(&identity.county)
        .bind(&identity.sheriff_number)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let body: Value = row.try_get("record")?;
                Ok(Some(serde_json::from_value(body)?))
            }
            None => Ok(None),
        }
    }
}
