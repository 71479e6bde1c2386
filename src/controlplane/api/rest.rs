//! REST API Handlers
//!
//! Implements the REST API endpoints for catalog queries, tenant discovery
//! and module lifecycle operations.

use crate::catalog::{ModuleDefinition, ModuleValidation};
use crate::controlplane::orchestrator::{
    DisableRequest, EnableRequest, LifecycleFailure, LifecycleOrchestrator, LifecycleReport,
    LifecycleRequest, Operation,
};
use crate::domain::{CleanupPolicy, ModuleStatus};
use crate::error::{Error, OperationError, Phase};
use axum::{
    extract::{DefaultBodyLimit, Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Catalog entry as listed by `GET /api/v1/modules`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSummary {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub category: String,
    pub dependencies: Vec<String>,
    pub conflicts: Vec<String>,
}

impl From<&ModuleDefinition> for ModuleSummary {
    fn from(def: &ModuleDefinition) -> Self {
        Self {
            name: def.name.clone(),
            display_name: def.display_name.clone(),
            description: def.description.clone(),
            version: def.version.clone(),
            category: def.category.clone(),
            dependencies: def.dependencies.iter().cloned().collect(),
            conflicts: def.conflicts_with.iter().cloned().collect(),
        }
    }
}

/// Filter for module listings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleListQuery {
    #[serde(default)]
    pub category: Option<String>,
}

/// Body of `POST /api/v1/modules/validate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateModulesRequest {
    pub modules: Vec<String>,
}

/// Result of validating a module selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateModulesResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub modules: Vec<ModuleValidation>,
}

/// Body of the per-module enable endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableModuleBody {
    pub environment: String,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub config_overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub reapply: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Body of the per-module disable endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisableModuleBody {
    pub environment: String,
    #[serde(default)]
    pub keep_data: bool,
    #[serde(default)]
    pub complete_cleanup: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub confirmed: bool,
}

/// Query of the per-module status endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct StatusQuery {
    pub environment: String,
}

/// API error response.
///
/// Lifecycle failures are sent as [`LifecycleFailure`]; this type reads the
/// error fields of either body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<ModuleStatus>,
}

impl ApiErrorResponse {
    fn from_error(e: &Error) -> Self {
        Self {
            error: e.code().into(),
            message: e.to_string(),
            phase: Some(e.phase()),
            last_status: None,
        }
    }
}

fn status_of(e: &Error) -> StatusCode {
    StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn error_response(e: Error) -> Response {
    if e.status_code() >= 500 {
        error!("Request failed: {}", e);
    } else {
        debug!("Request rejected: {}", e);
    }
    (status_of(&e), Json(ApiErrorResponse::from_error(&e))).into_response()
}

fn operation_error_response(operation: Option<Operation>, e: OperationError) -> Response {
    let status = status_of(&e.source);
    if status.is_server_error() {
        error!("Lifecycle operation failed: {}", e);
    }
    (status, Json(LifecycleFailure::new(operation, &e))).into_response()
}

fn report_response(report: LifecycleReport) -> Response {
    (StatusCode::OK, Json(report)).into_response()
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    orchestrator: Arc<LifecycleOrchestrator>,
    body_limit: Option<usize>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(orchestrator: Arc<LifecycleOrchestrator>) -> Self {
        Self {
            orchestrator,
            body_limit: None,
        }
    }

    /// Reject request bodies larger than `bytes`
    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = Some(bytes);
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            orchestrator: self.orchestrator,
        };

        let router = Router::new()
            // Catalog endpoints
            .route("/api/v1/modules", get(list_modules))
            .route("/api/v1/modules/definitions", get(list_definitions))
            .route("/api/v1/modules/validate", post(validate_modules))
            .route("/api/v1/modules/:module", get(get_module))
            .route("/api/v1/tiers", get(list_tiers))
            // Tenant endpoints
            .route("/api/v1/tenants", get(list_tenants))
            .route("/api/v1/tenants/:tenant/status", get(tenant_status))
            .route(
                "/api/v1/tenants/:tenant/modules/:module/enable",
                post(enable_module),
            )
            .route(
                "/api/v1/tenants/:tenant/modules/:module/disable",
                post(disable_module),
            )
            .route(
                "/api/v1/tenants/:tenant/modules/:module/status",
                get(module_status),
            )
            .route("/api/v1/lifecycle", post(lifecycle))
            // Health endpoint
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive());

        match self.body_limit {
            Some(bytes) => router.layer(DefaultBodyLimit::max(bytes)).with_state(state),
            None => router.with_state(state),
        }
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<LifecycleOrchestrator>,
}

// =============================================================================
// Catalog Handlers
// =============================================================================

/// List catalog modules
async fn list_modules(
    State(state): State<AppState>,
    Query(query): Query<ModuleListQuery>,
) -> impl IntoResponse {
    let snapshot = state.orchestrator.catalog().snapshot();
    let modules: Vec<ModuleSummary> = snapshot
        .modules()
        .filter(|m| query.category.as_deref().map_or(true, |c| m.category == c))
        .map(ModuleSummary::from)
        .collect();
    (StatusCode::OK, Json(modules))
}

/// Full module definitions
async fn list_definitions(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.orchestrator.catalog().snapshot();
    let definitions: Vec<ModuleDefinition> = snapshot.modules().cloned().collect();
    (StatusCode::OK, Json(definitions))
}

/// Get one module definition
async fn get_module(State(state): State<AppState>, Path(module): Path<String>) -> Response {
    let snapshot = state.orchestrator.catalog().snapshot();
    match snapshot.get(&module) {
        Ok(def) => (StatusCode::OK, Json(def.clone())).into_response(),
        Err(e) => error_response(e),
    }
}

/// Validate a module selection
async fn validate_modules(
    State(state): State<AppState>,
    Json(request): Json<ValidateModulesRequest>,
) -> impl IntoResponse {
    let snapshot = state.orchestrator.catalog().snapshot();
    let error = snapshot
        .validate_selection(request.modules.as_slice())
        .err()
        .map(|e| e.to_string());
    (
        StatusCode::OK,
        Json(ValidateModulesResponse {
            valid: error.is_none(),
            error,
            modules: snapshot.validation_report(request.modules.as_slice()),
        }),
    )
}

/// List resource tiers
async fn list_tiers(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.orchestrator.tiers()))
}

// =============================================================================
// Tenant Handlers
// =============================================================================

/// List tenants and their deployed modules
async fn list_tenants(State(state): State<AppState>) -> Response {
    match state.orchestrator.tenants().await {
        Ok(tenants) => (StatusCode::OK, Json(tenants)).into_response(),
        Err(e) => operation_error_response(None, e),
    }
}

/// Status of every module of a tenant
async fn tenant_status(State(state): State<AppState>, Path(tenant): Path<String>) -> Response {
    match state.orchestrator.tenant_status(&tenant).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => operation_error_response(None, e),
    }
}

/// Enable a module
async fn enable_module(
    State(state): State<AppState>,
    Path((tenant, module)): Path<(String, String)>,
    Json(body): Json<EnableModuleBody>,
) -> Response {
    info!("Enable {} for {}-{}", module, tenant, body.environment);
    let request = EnableRequest {
        tenant,
        environment: body.environment,
        module,
        tier: body.tier,
        config_overrides: body.config_overrides,
        reapply: body.reapply,
        timeout_secs: body.timeout_secs,
    };
    match state.orchestrator.enable(request).await {
        Ok(report) => report_response(report),
        Err(e) => operation_error_response(Some(Operation::Enable), e),
    }
}

/// Disable a module
async fn disable_module(
    State(state): State<AppState>,
    Path((tenant, module)): Path<(String, String)>,
    Json(body): Json<DisableModuleBody>,
) -> Response {
    info!("Disable {} for {}-{}", module, tenant, body.environment);
    let request = DisableRequest {
        tenant,
        environment: body.environment,
        module,
        cleanup: CleanupPolicy::new(body.keep_data, body.complete_cleanup),
        force: body.force,
        confirmed: body.confirmed,
    };
    match state.orchestrator.disable(request).await {
        Ok(report) => report_response(report),
        Err(e) => operation_error_response(Some(Operation::Disable), e),
    }
}

/// Live status of a module
async fn module_status(
    State(state): State<AppState>,
    Path((tenant, module)): Path<(String, String)>,
    Query(query): Query<StatusQuery>,
) -> Response {
    match state
        .orchestrator
        .status(&tenant, &query.environment, &module)
        .await
    {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => operation_error_response(Some(Operation::Status), e),
    }
}

/// Generic lifecycle request
async fn lifecycle(
    State(state): State<AppState>,
    Json(request): Json<LifecycleRequest>,
) -> Response {
    let operation = request.operation;
    match state.orchestrator.execute(request).await {
        Ok(report) => report_response(report),
        Err(e) => operation_error_response(Some(operation), e),
    }
}

// =============================================================================
// Health
// =============================================================================

/// Health check
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (helm, cluster) = state
        .orchestrator
        .health_check()
        .await
        .unwrap_or((false, false));
    let status = if cluster {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if cluster { "healthy" } else { "degraded" },
            "version": crate::VERSION,
            "helm": helm,
            "cluster": cluster,
            "modules": state.orchestrator.catalog().snapshot().len(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogSnapshot, CatalogStore};
    use crate::controlplane::backends::{
        BackendFactory, InMemoryCluster, InstallBehavior, SimulatedHelm,
    };
    use crate::domain::ResourceClass;
    use crate::controlplane::orchestrator::OrchestratorConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const CATALOG: &str = r#"
modules:
  - name: minio
    category: data-storage
    chart_path: minio
  - name: spark
    category: compute
    chart_path: spark
    dependencies: [minio]
"#;

    fn router() -> (Router, Arc<InMemoryCluster>, Arc<SimulatedHelm>) {
        let snapshot =
            CatalogSnapshot::from_yaml(CATALOG, "test", std::path::Path::new("/charts")).unwrap();
        let (backends, cluster, helm) = BackendFactory::standalone();
        let orchestrator = LifecycleOrchestrator::new(
            OrchestratorConfig::default(),
            CatalogStore::from_snapshot(snapshot),
            backends,
            None,
        );
        (RestRouter::new(orchestrator).build(), cluster, helm)
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[test]
    fn test_disable_body_defaults() {
        let body: DisableModuleBody = serde_json::from_str(r#"{"environment":"dev"}"#).unwrap();
        assert!(!body.keep_data && !body.complete_cleanup && !body.force && !body.confirmed);
        assert_eq!(
            CleanupPolicy::new(body.keep_data, body.complete_cleanup),
            CleanupPolicy::DEFAULT_REMOVE_DATA
        );
    }

    #[test]
    fn test_operation_error_body() {
        let err = OperationError::from(Error::UnknownTier {
            tier: "gold".into(),
        });
        let response = operation_error_response(Some(Operation::Enable), err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = ApiErrorResponse::from_error(&Error::ClusterUnreachable("refused".into()));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "cluster_unreachable");
        assert_eq!(json["phase"], "cluster-query");
        assert!(json.get("lastStatus").is_none());
    }

    #[tokio::test]
    async fn test_catalog_routes() {
        let (router, _, _) = router();

        let (status, json) = call(&router, "GET", "/api/v1/modules?category=compute", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["name"], "spark");
        assert_eq!(json[0]["dependencies"][0], "minio");

        let (status, json) = call(&router, "GET", "/api/v1/modules/kafka", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "module_not_found");

        let (status, json) = call(
            &router,
            "POST",
            "/api/v1/modules/validate",
            Some(serde_json::json!({ "modules": ["spark"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["valid"], false);
        assert_eq!(json["modules"][0]["missingDependencies"][0], "minio");

        let (_, json) = call(&router, "GET", "/api/v1/tiers", None).await;
        assert_eq!(json.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_enable_then_disable_routes() {
        let (router, _, _) = router();

        let (status, json) = call(
            &router,
            "POST",
            "/api/v1/tenants/acme/modules/spark/enable",
            Some(serde_json::json!({ "environment": "dev" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"], "dependency_unsatisfied");
        assert_eq!(json["phase"], "validation");

        let (status, json) = call(
            &router,
            "POST",
            "/api/v1/tenants/acme/modules/minio/enable",
            Some(serde_json::json!({ "environment": "dev", "tier": "standard" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["details"]["namespace"], "acme-dev");
        assert_eq!(json["details"]["releaseName"], "acme-minio");

        let (status, json) = call(
            &router,
            "GET",
            "/api/v1/tenants/acme/modules/minio/status?environment=dev",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["deployed"], true);

        let (status, json) = call(
            &router,
            "POST",
            "/api/v1/tenants/acme/modules/minio/disable",
            Some(serde_json::json!({ "environment": "dev" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["requiresConfirmation"], true);
        assert_eq!(json["success"], false);

        let (_, json) = call(
            &router,
            "POST",
            "/api/v1/tenants/acme/modules/minio/disable",
            Some(serde_json::json!({ "environment": "dev", "confirmed": true })),
        )
        .await;
        assert_eq!(json["success"], true);
        assert_eq!(json["state"], "Absent");
    }

    #[tokio::test]
    async fn test_failed_enable_uses_report_shape() {
        let (router, _, helm) = router();
        helm.set_behavior("minio", InstallBehavior::NeverReady { replicas: 3 });

        let (status, json) = call(
            &router,
            "POST",
            "/api/v1/lifecycle",
            Some(serde_json::json!({
                "operation": "enable",
                "tenant": "acme",
                "environment": "dev",
                "module": "minio",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json["success"], false);
        assert_eq!(json["state"], "Failed");
        assert_eq!(json["operation"], "enable");
        assert_eq!(json["details"]["namespace"], "acme-dev");
        assert_eq!(json["details"]["releaseName"], "acme-minio");
        assert_eq!(json["details"]["readyReplicas"], 0);
        assert_eq!(json["details"]["desiredReplicas"], 3);
        assert_eq!(json["error"], "timeout");
        assert_eq!(json["phase"], "deploy-wait");
        assert!(json["message"].as_str().unwrap().contains("acme-minio"));

        // rejected before any status query: details come from the request
        let (status, json) = call(
            &router,
            "POST",
            "/api/v1/tenants/acme/modules/spark/enable",
            Some(serde_json::json!({ "environment": "dev" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["state"], "Failed");
        assert_eq!(json["details"]["namespace"], "acme-dev");
        assert_eq!(json["details"]["releaseName"], "acme-spark");
        assert!(json.get("lastStatus").is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_accepts_policy_names() {
        let (router, cluster, _) = router();

        let (status, _) = call(
            &router,
            "POST",
            "/api/v1/tenants/acme/modules/minio/enable",
            Some(serde_json::json!({ "environment": "dev" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cluster.resource_count("acme-dev", ResourceClass::PersistentVolumeClaims), 1);

        let (status, json) = call(
            &router,
            "POST",
            "/api/v1/lifecycle",
            Some(serde_json::json!({
                "operation": "disable",
                "tenant": "acme",
                "environment": "dev",
                "module": "minio",
                "cleanupPolicy": "KeepData",
                "confirmed": true,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["state"], "Absent");
        assert_eq!(cluster.resource_count("acme-dev", ResourceClass::PersistentVolumeClaims), 1);

        let (status, _) = call(
            &router,
            "POST",
            "/api/v1/lifecycle",
            Some(serde_json::json!({
                "operation": "disable",
                "tenant": "acme",
                "environment": "dev",
                "module": "minio",
                "cleanupPolicy": "ScorchedEarth",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_unreachable_cluster_maps_to_503() {
        let (router, cluster, _) = router();
        cluster.set_reachable(false);

        let (status, json) = call(
            &router,
            "GET",
            "/api/v1/tenants/acme/modules/minio/status?environment=dev",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["phase"], "cluster-query");

        let (status, json) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["cluster"], false);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let snapshot =
            CatalogSnapshot::from_yaml(CATALOG, "test", std::path::Path::new("/charts")).unwrap();
        let (backends, _, _) = BackendFactory::standalone();
        let orchestrator = LifecycleOrchestrator::new(
            OrchestratorConfig::default(),
            CatalogStore::from_snapshot(snapshot),
            backends,
            None,
        );
        let router = RestRouter::new(orchestrator).with_body_limit(32).build();

        let modules: Vec<String> = (0..20).map(|i| format!("module-{}", i)).collect();
        let (status, _) = call(
            &router,
            "POST",
            "/api/v1/modules/validate",
            Some(serde_json::json!({ "modules": modules })),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
