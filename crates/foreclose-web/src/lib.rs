//! Axum JSON API over settings resolution, feature checks, and stored listings.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use foreclose_core::{
    ChangeDetector, Classification, DealFeature, FlagRegistry, ListingIdentity, SettingsError,
    SettingsNamespace,
};
use foreclose_storage::{
    open_store, FingerprintStore, ListingStore, PresetCatalogs, ResolveError, SettingsService,
    Store, TierScope,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "foreclose-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub settings: SettingsService,
    pub detector: ChangeDetector,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, presets: Arc<PresetCatalogs>) -> Self {
        Self {
            settings: SettingsService::new(store.clone(), presets),
            store,
            detector: ChangeDetector::new(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Configuration(err) => err.into(),
            ResolveError::Store(err) => {
                warn!(error = %err, "store error while serving request");
                ApiError::Unavailable(err.to_string())
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct ScopeQuery {
    pub county: Option<String>,
    pub user: Option<String>,
    pub preset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FingerprintRequest {
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub sheriff_number: Option<String>,
    /// Used when no identity is given.
    #[serde(default)]
    pub prior: Option<String>,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct FingerprintResponse {
    #[serde(flatten)]
    pub classification: Classification,
    pub prior: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/settings/{namespace}/resolved", get(resolved_handler))
        .route("/settings/{namespace}/resolved/{flag}", get(resolved_flag_handler))
        .route("/settings/{namespace}/admin", put(put_admin_handler))
        .route("/settings/{namespace}/counties/{county}", put(put_county_handler))
        .route("/settings/{namespace}/users/{user}", put(put_user_handler))
        .route("/settings/{namespace}/presets", get(presets_handler))
        .route("/features/{feature}", get(feature_handler))
        .route("/listings/{county}/{sheriff_number}", get(listing_handler))
        .route("/fingerprint", post(fingerprint_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving API");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("FORECLOSE_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let workspace_root = std::env::var("FORECLOSE_WORKSPACE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    let database_url = std::env::var("DATABASE_URL").ok();
    let store = open_store(database_url.as_deref()).await?;
    let presets = foreclose_sync::load_preset_catalogs(&workspace_root).await?;
    serve(AppState::new(store, Arc::new(presets)), port).await
}

fn namespace(raw: &str) -> ApiResult<SettingsNamespace> {
    Ok(raw.parse::<SettingsNamespace>()?)
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn resolved_handler(
    State(state): State<Arc<AppState>>,
    Path(ns): Path<String>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<Json<Value>> {
    let resolved = state
        .settings
        .resolve_namespace(
            namespace(&ns)?,
            scope.county.as_deref(),
            scope.user.as_deref(),
            scope.preset.as_deref(),
        )
        .await?;
    Ok(Json(resolved))
}

async fn resolved_flag_handler(
    State(state): State<Arc<AppState>>,
    Path((ns, flag)): Path<(String, String)>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<impl IntoResponse> {
    let resolution = state
        .settings
        .resolve_flag_in(
            namespace(&ns)?,
            &flag,
            scope.county.as_deref(),
            scope.user.as_deref(),
        )
        .await?;
    Ok(Json(resolution))
}

async fn put_tier(
    state: &AppState,
    ns: &str,
    scope: TierScope,
    body: Value,
) -> ApiResult<StatusCode> {
    let namespace = namespace(ns)?;
    let Value::Object(document) = body else {
        return Err(SettingsError::NotAnObject { tier: scope.level() }.into());
    };
    state.settings.put_tier(namespace, scope, document).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn put_admin_handler(
    State(state): State<Arc<AppState>>,
    Path(ns): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<StatusCode> {
    put_tier(&state, &ns, TierScope::Admin, body).await
}

async fn put_county_handler(
    State(state): State<Arc<AppState>>,
    Path((ns, county)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<StatusCode> {
    put_tier(&state, &ns, TierScope::County(county), body).await
}

async fn put_user_handler(
    State(state): State<Arc<AppState>>,
    Path((ns, user)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<StatusCode> {
    put_tier(&state, &ns, TierScope::User(user), body).await
}

async fn presets_handler(
    State(state): State<Arc<AppState>>,
    Path(ns): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let namespace = namespace(&ns)?;
    Ok(Json(state.settings.presets().summaries(namespace)))
}

/// Unknown feature names are a 400; any resolution failure answers disabled.
async fn feature_handler(
    State(state): State<Arc<AppState>>,
    Path(feature): Path<String>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<impl IntoResponse> {
    let feature = DealFeature::parse(&feature)?;
    let check = state
        .settings
        .feature_enabled(feature, scope.county.as_deref(), scope.user.as_deref())
        .await;
    Ok(Json(json!({
        "feature": feature.key(),
        "enabled": check.enabled,
        "source": check.source,
    })))
}

async fn listing_handler(
    State(state): State<Arc<AppState>>,
    Path((county, sheriff_number)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let identity = ListingIdentity::new(&county, &sheriff_number);
    match state.store.get_listing(&identity).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(ApiError::NotFound(format!("no listing {identity}"))),
        Err(err) => Err(ResolveError::Store(err).into()),
    }
}

/// Classifies a posted listing against the stored (or supplied) prior. Never writes.
async fn fingerprint_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FingerprintRequest>,
) -> ApiResult<Json<FingerprintResponse>> {
    let prior = match (&request.county, &request.sheriff_number) {
        (Some(county), Some(number)) => state
            .store
            .prior_fingerprint(&ListingIdentity::new(county, number))
            .await
            .map_err(ResolveError::Store)?
            .map(|fp| fp.as_str().to_string()),
        _ => request.prior.clone(),
    };
    let classification = state.detector.classify(&request.fields, prior.as_deref());
    Ok(Json(FingerprintResponse {
        classification,
        prior,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use foreclose_core::{ChangeStatus, ListingFingerprint};
    use foreclose_storage::MemoryStore;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), Arc::new(PresetCatalogs::builtin()));
        (app(state), store)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, value)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _) = test_app();
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn admin_lock_wins_over_user_through_the_api() {
        let (app, _) = test_app();
        let (status, _) = send(
            &app,
            json_request(
                "PUT",
                "/settings/features/admin",
                json!({"feature_watchlist_alerts": false, "feature_lock_watchlist_alerts": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        send(
            &app,
            json_request(
                "PUT",
                "/settings/features/users/u-1",
                json!({"feature_watchlist_alerts": true, "feature_deal_scoring": true}),
            ),
        )
        .await;

        let (status, body) = send(&app, get("/features/watchlist_alerts?user=u-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);
        assert_eq!(body["source"], "admin_locked");

        let (_, body) = send(&app, get("/settings/features/resolved?user=u-1")).await;
        assert_eq!(body["values"]["deal_scoring"], true);
        assert_eq!(body["sources"]["deal_scoring"], "user");
    }

    #[tokio::test]
    async fn unknown_names_are_bad_requests() {
        let (app, _) = test_app();
        let (status, _) = send(&app, get("/settings/enrichment/resolved/zillow_teleport")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, get("/settings/billing/resolved")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, get("/features/time_travel")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(
            &app,
            json_request(
                "PUT",
                "/settings/features/users/u-1",
                json!({"feature_lock_ai_summaries": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(
            &app,
            json_request("PUT", "/settings/features/admin", json!([1, 2])),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn single_flag_and_presets_resolve() {
        let (app, _) = test_app();
        let (status, body) = send(
            &app,
            get("/settings/investment/resolved/target_roi_pct?county=camden"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], 20.0);
        assert_eq!(body["source"], "admin");

        let (_, body) = send(&app, get("/settings/enrichment/presets")).await;
        let names: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["full", "minimal", "standard"]);

        let (_, body) = send(&app, get("/settings/enrichment/resolved?preset=full")).await;
        assert_eq!(body["sources"]["skip_trace"], "preset");
    }

    #[tokio::test]
    async fn fingerprint_endpoint_classifies_without_writing() {
        let (app, store) = test_app();
        let fields = json!({"address": "1 Main St", "status": "Scheduled"});
        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/fingerprint",
                json!({"county": "camden", "sheriff_number": "F-1", "fields": fields}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "new");
        let fp = body["fingerprint"].as_str().unwrap().to_string();

        let id = ListingIdentity::new("camden", "F-1");
        assert!(store.prior_fingerprint(&id).await.unwrap().is_none());
        store
            .store_fingerprint(&id, None, &ListingFingerprint::from_hex(fp.clone()))
            .await
            .unwrap();

        let (_, body) = send(
            &app,
            json_request(
                "POST",
                "/fingerprint",
                json!({
                    "county": "Camden",
                    "sheriff_number": "F-1",
                    "fields": {"status": "Scheduled", "address": " 1 Main  St "},
                }),
            ),
        )
        .await;
        assert_eq!(body["status"], ChangeStatus::Unchanged.as_str());
        assert_eq!(body["prior"], fp);
    }

    #[tokio::test]
    async fn missing_listing_is_not_found() {
        let (app, _) = test_app();
        let (status, body) = send(&app, get("/listings/camden/F-404")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("camden:F-404"));
    }
}
