//! Calls the enabled enrichment endpoints for one listing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use foreclose_core::{
    EndpointOutcome, EnrichmentEndpoint, FlagRegistry, ResolvedConfiguration, ScrapedListing,
};
use foreclose_storage::{FetchError, HttpClientConfig, HttpFetcher};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("listing has no address to look up")]
    MissingAddress,
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    async fn call(
        &self,
        endpoint: EnrichmentEndpoint,
        listing: &ScrapedListing,
    ) -> Result<Value, EnrichmentError>;
}

/// Succeeds every call with a null payload.
#[derive(Debug, Default)]
pub struct NoopEnrichmentClient;

#[async_trait]
impl EnrichmentClient for NoopEnrichmentClient {
    async fn call(
        &self,
        _endpoint: EnrichmentEndpoint,
        _listing: &ScrapedListing,
    ) -> Result<Value, EnrichmentError> {
        Ok(Value::Null)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrichmentConfig {
    pub zillow_api_base: Option<String>,
    pub rapidapi_key: Option<String>,
    pub skiptrace_api_base: Option<String>,
    pub skiptrace_api_key: Option<String>,
}

impl EnrichmentConfig {
    pub fn from_env() -> Self {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            zillow_api_base: var("ZILLOW_API_BASE"),
            rapidapi_key: var("RAPIDAPI_KEY"),
            skiptrace_api_base: var("SKIPTRACE_API_BASE"),
            skiptrace_api_key: var("SKIPTRACE_API_KEY"),
        }
    }
}

/// Zillow (via RapidAPI) and skip-trace lookups over the retrying fetcher.
/// AI extraction is delegated to `ai_extractor` when one is attached.
pub struct HttpEnrichmentClient {
    fetcher: HttpFetcher,
    config: EnrichmentConfig,
    ai_extractor: Option<Arc<dyn EnrichmentClient>>,
}

impl HttpEnrichmentClient {
    pub fn new(config: EnrichmentConfig, http: HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            fetcher: HttpFetcher::new(http)?,
            config,
            ai_extractor: None,
        })
    }

    pub fn with_ai_extractor(mut self, extractor: Arc<dyn EnrichmentClient>) -> Self {
        self.ai_extractor = Some(extractor);
        self
    }

    async fn zillow(
        &self,
        endpoint: EnrichmentEndpoint,
        listing: &ScrapedListing,
    ) -> Result<Value, EnrichmentError> {
        let (Some(base), Some(key)) = (&self.config.zillow_api_base, &self.config.rapidapi_key)
        else {
            return Err(EnrichmentError::NotConfigured(endpoint.key()));
        };
        let address = full_address(listing).ok_or(EnrichmentError::MissingAddress)?;
        let base = base.trim_end_matches('/');
        let url = format!("{base}/{}", zillow_path(endpoint));
        let host = host_of(base);
        let value = self
            .fetcher
            .get_json(
                host,
                &url,
                &[("address", address)],
                &[("x-rapidapi-key", key.clone()), ("x-rapidapi-host", host.to_string())],
            )
            .await?;
        Ok(value)
    }

    async fn skip_trace(&self, listing: &ScrapedListing) -> Result<Value, EnrichmentError> {
        let (Some(base), Some(key)) = (
            &self.config.skiptrace_api_base,
            &self.config.skiptrace_api_key,
        ) else {
            return Err(EnrichmentError::NotConfigured(EnrichmentEndpoint::SkipTrace.key()));
        };
        let street = listing
            .field_str("address")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(EnrichmentError::MissingAddress)?;
        let mut query = vec![("street", street.to_string())];
        for field in ["city", "state", "zip_code"] {
            if let Some(value) = listing.field_str(field) {
                query.push((field, value.trim().to_string()));
            }
        }
        let base = base.trim_end_matches('/');
        let value = self
            .fetcher
            .get_json(
                host_of(base),
                &format!("{base}/search"),
                &query,
                &[("x-api-key", key.clone())],
            )
            .await?;
        Ok(value)
    }
}

#[async_trait]
impl EnrichmentClient for HttpEnrichmentClient {
    async fn call(
        &self,
        endpoint: EnrichmentEndpoint,
        listing: &ScrapedListing,
    ) -> Result<Value, EnrichmentError> {
        match endpoint {
            EnrichmentEndpoint::SkipTrace => self.skip_trace(listing).await,
            EnrichmentEndpoint::AiExtraction => match &self.ai_extractor {
                Some(extractor) => extractor.call(endpoint, listing).await,
                None => Err(EnrichmentError::NotConfigured(endpoint.key())),
            },
            _ => self.zillow(endpoint, listing).await,
        }
    }
}

fn zillow_path(endpoint: EnrichmentEndpoint) -> &'static str {
    match endpoint {
        EnrichmentEndpoint::ZillowZestimate => "zestimate",
        EnrichmentEndpoint::ZillowPriceHistory => "priceHistory",
        EnrichmentEndpoint::ZillowTaxHistory => "taxHistory",
        EnrichmentEndpoint::ZillowComps => "propertyComps",
        EnrichmentEndpoint::ZillowRentEstimate => "rentEstimate",
        _ => "property",
    }
}

fn host_of(base: &str) -> &str {
    let without_scheme = base.split_once("://").map(|(_, rest)| rest).unwrap_or(base);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}

/// "street, city, state zip" from whatever address parts the scraper found.
pub fn full_address(listing: &ScrapedListing) -> Option<String> {
    let part = |key: &str| {
        listing
            .field_str(key)
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|s| !s.is_empty())
    };
    let street = part("address")?;
    let mut out = street;
    if let Some(city) = part("city") {
        out.push_str(", ");
        out.push_str(&city);
    }
    let tail: Vec<String> = ["state", "zip_code"].into_iter().filter_map(part).collect();
    if !tail.is_empty() {
        out.push_str(", ");
        out.push_str(&tail.join(" "));
    }
    Some(out)
}

/// Runs the endpoints a resolution enabled, in registry order. Each endpoint
/// succeeds or fails on its own; a partial result is normal.
#[derive(Clone)]
pub struct EnrichmentOrchestrator {
    client: Arc<dyn EnrichmentClient>,
}

impl EnrichmentOrchestrator {
    pub fn new(client: Arc<dyn EnrichmentClient>) -> Self {
        Self { client }
    }

    pub async fn enrich(
        &self,
        listing: &ScrapedListing,
        endpoints: &ResolvedConfiguration<EnrichmentEndpoint>,
    ) -> Vec<EndpointOutcome> {
        let mut outcomes = Vec::new();
        for endpoint in endpoints.enabled() {
            let started = Instant::now();
            let result = self.client.call(endpoint, listing).await;
            let elapsed_ms = millis(started.elapsed());
            match result {
                Ok(payload) => {
                    debug!(
                        listing = %listing.identity,
                        endpoint = endpoint.key(),
                        elapsed_ms,
                        "endpoint succeeded"
                    );
                    outcomes.push(EndpointOutcome::succeeded(endpoint, payload, elapsed_ms));
                }
                Err(err) => {
                    warn!(
                        listing = %listing.identity,
                        endpoint = endpoint.key(),
                        error = %err,
                        "endpoint failed"
                    );
                    outcomes.push(EndpointOutcome::failed(endpoint, err.to_string(), elapsed_ms));
                }
            }
        }
        outcomes
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foreclose_core::{
        EndpointStatus, ListingIdentity, SettingsTier, ThreeTierResolver, TierLevel,
    };
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<EnrichmentEndpoint>>,
    }

    #[async_trait]
    impl EnrichmentClient for RecordingClient {
        async fn call(
            &self,
            endpoint: EnrichmentEndpoint,
            _listing: &ScrapedListing,
        ) -> Result<Value, EnrichmentError> {
            self.calls.lock().unwrap().push(endpoint);
            if endpoint == EnrichmentEndpoint::ZillowComps {
                return Err(EnrichmentError::NotConfigured(endpoint.key()));
            }
            Ok(json!({"endpoint": endpoint.key()}))
        }
    }

    fn listing() -> ScrapedListing {
        ScrapedListing {
            identity: ListingIdentity::new("camden", "F-1"),
            scraped_at: Utc::now(),
            fields: json!({
                "address": " 1  Main St ",
                "city": "Camden",
                "state": "NJ",
                "zip_code": "08102",
            })
            .as_object()
            .cloned()
            .unwrap(),
        }
    }

    #[tokio::test]
    async fn calls_only_enabled_endpoints_in_registry_order() {
        let admin = SettingsTier::new(TierLevel::Admin)
            .with_value(EnrichmentEndpoint::SkipTrace, true)
            .with_value(EnrichmentEndpoint::ZillowComps, true)
            .with_value(EnrichmentEndpoint::ZillowZestimate, false);
        let endpoints = ThreeTierResolver::new(admin).resolve_all();

        let client = Arc::new(RecordingClient::default());
        let outcomes = EnrichmentOrchestrator::new(client.clone())
            .enrich(&listing(), &endpoints)
            .await;

        let called = client.calls.lock().unwrap().clone();
        assert_eq!(
            called,
            vec![
                EnrichmentEndpoint::ZillowProperty,
                EnrichmentEndpoint::ZillowPriceHistory,
                EnrichmentEndpoint::ZillowTaxHistory,
                EnrichmentEndpoint::ZillowComps,
                EnrichmentEndpoint::SkipTrace,
            ]
        );
        let failed: Vec<_> = outcomes
            .iter()
            .filter(|o| o.status == EndpointStatus::Failed)
            .map(|o| o.endpoint)
            .collect();
        assert_eq!(failed, vec![EnrichmentEndpoint::ZillowComps]);
    }

    #[tokio::test]
    async fn empty_resolution_calls_nothing() {
        let client = Arc::new(RecordingClient::default());
        let outcomes = EnrichmentOrchestrator::new(client.clone())
            .enrich(&listing(), &ResolvedConfiguration::empty())
            .await;
        assert!(outcomes.is_empty());
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unconfigured_http_client_reports_not_configured() {
        let client =
            HttpEnrichmentClient::new(EnrichmentConfig::default(), HttpClientConfig::default())
                .unwrap();
        let err = client
            .call(EnrichmentEndpoint::AiExtraction, &listing())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::NotConfigured("ai_extraction")));
        let err = client
            .call(EnrichmentEndpoint::ZillowProperty, &listing())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn attached_extractor_handles_ai_extraction() {
        let extractor = Arc::new(RecordingClient::default());
        let client =
            HttpEnrichmentClient::new(EnrichmentConfig::default(), HttpClientConfig::default())
                .unwrap()
                .with_ai_extractor(extractor.clone());
        let payload = client
            .call(EnrichmentEndpoint::AiExtraction, &listing())
            .await
            .unwrap();
        assert_eq!(payload, json!({"endpoint": "ai_extraction"}));
        assert_eq!(
            extractor.calls.lock().unwrap().clone(),
            vec![EnrichmentEndpoint::AiExtraction]
        );
    }

    #[test]
    fn address_is_assembled_and_collapsed() {
        assert_eq!(
            full_address(&listing()).as_deref(),
            Some("1 Main St, Camden, NJ 08102")
        );
        assert_eq!(host_of("https://zillow-com1.p.rapidapi.com/v1"), "zillow-com1.p.rapidapi.com");
    }
}
