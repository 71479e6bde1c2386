//! REST API Client
//!
//! Typed client for the lifecycle API, used by the CLI.

use super::rest::{
    ApiErrorResponse, DisableModuleBody, EnableModuleBody, ModuleSummary, ValidateModulesRequest,
    ValidateModulesResponse,
};
use crate::catalog::ModuleDefinition;
use crate::controlplane::orchestrator::{LifecycleReport, TenantStatus};
use crate::controlplane::reconciler::TenantSummary;
use crate::domain::{ModuleStatus, ResourceTier};
use crate::error::{Error, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Forwarded as a bearer token when set
    pub token: Option<String>,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout: Duration::from_secs(30),
            token: None,
        }
    }
}

/// Client for the lifecycle REST API
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: Client,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!("GET {}", path);
        let response = self.authorize(self.http.get(self.url(path))).send().await?;
        Self::decode(response).await
    }

    async fn post<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        debug!("POST {}", path);
        let response = self
            .authorize(self.http.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorResponse>(&text) {
            Ok(body) => match body.phase {
                Some(phase) => format!("{} (failed in {} phase)", body.message, phase),
                None => body.message,
            },
            Err(_) if text.is_empty() => status.to_string(),
            Err(_) => text,
        };
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Whether the backend answers its health endpoint
    pub async fn is_backend_running(&self) -> bool {
        match self.http.get(self.url("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        self.get("/health").await
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    pub async fn list_modules(&self, category: Option<&str>) -> Result<Vec<ModuleSummary>> {
        match category {
            Some(category) => {
                self.get(&format!(
                    "/api/v1/modules?category={}",
                    urlencoding::encode(category)
                ))
                .await
            }
            None => self.get("/api/v1/modules").await,
        }
    }

    pub async fn module_definitions(&self) -> Result<Vec<ModuleDefinition>> {
        self.get("/api/v1/modules/definitions").await
    }

    pub async fn module(&self, module: &str) -> Result<ModuleDefinition> {
        self.get(&format!("/api/v1/modules/{}", urlencoding::encode(module)))
            .await
    }

    pub async fn validate_modules(&self, modules: &[String]) -> Result<ValidateModulesResponse> {
        let body = ValidateModulesRequest {
            modules: modules.to_vec(),
        };
        self.post("/api/v1/modules/validate", &body).await
    }

    pub async fn tiers(&self) -> Result<Vec<ResourceTier>> {
        self.get("/api/v1/tiers").await
    }

    // =========================================================================
    // Tenants and lifecycle
    // =========================================================================

    pub async fn tenants(&self) -> Result<Vec<TenantSummary>> {
        self.get("/api/v1/tenants").await
    }

    pub async fn tenant_status(&self, tenant: &str) -> Result<TenantStatus> {
        self.get(&format!(
            "/api/v1/tenants/{}/status",
            urlencoding::encode(tenant)
        ))
        .await
    }

    pub async fn enable_module(
        &self,
        tenant: &str,
        module: &str,
        body: &EnableModuleBody,
    ) -> Result<LifecycleReport> {
        self.post(
            &format!(
                "/api/v1/tenants/{}/modules/{}/enable",
                urlencoding::encode(tenant),
                urlencoding::encode(module)
            ),
            body,
        )
        .await
    }

    pub async fn disable_module(
        &self,
        tenant: &str,
        module: &str,
        body: &DisableModuleBody,
    ) -> Result<LifecycleReport> {
        self.post(
            &format!(
                "/api/v1/tenants/{}/modules/{}/disable",
                urlencoding::encode(tenant),
                urlencoding::encode(module)
            ),
            body,
        )
        .await
    }

    pub async fn module_status(
        &self,
        tenant: &str,
        environment: &str,
        module: &str,
    ) -> Result<ModuleStatus> {
        self.get(&format!(
            "/api/v1/tenants/{}/modules/{}/status?environment={}",
            urlencoding::encode(tenant),
            urlencoding::encode(module),
            urlencoding::encode(environment)
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogSnapshot, CatalogStore};
    use crate::controlplane::api::server::serve;
    use crate::controlplane::api::RestRouter;
    use crate::controlplane::backends::BackendFactory;
    use crate::controlplane::orchestrator::{LifecycleOrchestrator, OrchestratorConfig};
    use crate::controlplane::orchestrator::LifecycleOutcome;
    use assert_matches::assert_matches;
    use std::path::Path;
    use tokio::sync::broadcast;

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

    async fn start() -> (ApiClient, broadcast::Sender<()>) {
        let snapshot = CatalogSnapshot::from_yaml(CATALOG, "test", Path::new("/charts")).unwrap();
        let (backends, _, _) = BackendFactory::standalone();
        let orchestrator = LifecycleOrchestrator::new(
            OrchestratorConfig::default(),
            CatalogStore::from_snapshot(snapshot),
            backends,
            None,
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(serve(listener, RestRouter::new(orchestrator).build(), shutdown_rx));

        let client = ApiClient::new(ApiClientConfig {
            base_url: format!("http://{}/", addr),
            token: Some("secret".into()),
            ..Default::default()
        })
        .unwrap();
        (client, shutdown_tx)
    }

    #[test]
    fn test_url_join() {
        let client = ApiClient::new(ApiClientConfig {
            base_url: "http://localhost:8000/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.url("/api/v1/tiers"), "http://localhost:8000/api/v1/tiers");
        assert_eq!(client.url("health"), "http://localhost:8000/health");
    }

    #[tokio::test]
    async fn test_catalog_endpoints() {
        let (client, _shutdown) = start().await;
        assert!(client.is_backend_running().await);

        let modules = client.list_modules(None).await.unwrap();
        assert_eq!(modules.len(), 2);
        let compute = client.list_modules(Some("compute")).await.unwrap();
        assert_eq!(compute[0].name, "spark");

        let spark = client.module("spark").await.unwrap();
        assert!(spark.dependencies.contains("minio"));

        let err = client.module("kafka").await.unwrap_err();
        assert_matches!(err, Error::Api { status: 404, .. });

        let report = client
            .validate_modules(&["spark".to_string()])
            .await
            .unwrap();
        assert!(!report.valid);
        assert_eq!(report.modules[0].missing_dependencies, vec!["minio"]);

        let tiers = client.tiers().await.unwrap();
        assert_eq!(tiers.len(), 3);
    }

    #[tokio::test]
    async fn test_lifecycle_over_http() {
        let (client, shutdown) = start().await;

        let enable = EnableModuleBody {
            environment: "dev".into(),
            tier: Some("bronze".into()),
            ..Default::default()
        };
        let report = client.enable_module("acme", "minio", &enable).await.unwrap();
        assert_eq!(report.outcome, LifecycleOutcome::Deployed);
        assert_eq!(report.details.namespace, "acme-dev");

        let status = client.module_status("acme", "dev", "minio").await.unwrap();
        assert!(status.deployed);

        let tenants = client.tenants().await.unwrap();
        assert_eq!(tenants[0].environments[0].modules, vec!["minio"]);

        let disable = DisableModuleBody {
            environment: "dev".into(),
            ..Default::default()
        };
        let report = client.disable_module("acme", "minio", &disable).await.unwrap();
        assert!(report.requires_confirmation);

        let confirmed = DisableModuleBody {
            confirmed: true,
            ..disable
        };
        let report = client.disable_module("acme", "minio", &confirmed).await.unwrap();
        assert_eq!(report.outcome, LifecycleOutcome::Undeployed);

        let err = client
            .enable_module("acme", "spark", &enable)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Api { status: 409, ref message } if message.ends_with("(failed in validation phase)")
        );

        let _ = shutdown.send(());
    }
}
