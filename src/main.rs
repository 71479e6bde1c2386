//! spandak8s
//!
//! Entry point for both the lifecycle API server (`serve`) and the client
//! commands that talk to it.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spandak8s::cli::{self, Cli, CliContext, Command, ServeArgs};
use spandak8s::controlplane::backends::HelmConfig;
use spandak8s::controlplane::backends::KubeClusterConfig;
use spandak8s::{
    ApiServer, ApiServerConfig, BackendConfig, BackendFactory, BackendKind, CatalogEvent,
    CatalogStore, CatalogStoreConfig, DriverConfig, Error, LifecycleMetrics,
    LifecycleOrchestrator, OrchestratorConfig, Result,
};

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Cli::parse();

    init_logging(&opts.log_level, opts.log_json);

    match opts.command {
        Command::Serve(ref args) => serve(args.clone()).await,
        _ => {
            let ctx = CliContext::load(&opts)?;
            cli::run(opts.command, ctx).await
        }
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    info!("Starting spandak8s lifecycle server");
    info!("  Version: {}", spandak8s::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Catalog: {}", args.catalog_path.display());
    info!("  Standalone mode: {}", args.standalone);

    let metrics = LifecycleMetrics::new()?;

    // Catalog
    let catalog = CatalogStore::open(CatalogStoreConfig {
        path: args.catalog_path.clone(),
        charts_root: args.charts_root.clone(),
        reload_interval: Duration::from_secs(args.catalog_reload_secs),
    })
    .with_context(|| format!("loading catalog {}", args.catalog_path.display()))?;
    metrics.record_catalog_reload(true, Some(catalog.snapshot().len()));
    info!("Catalog loaded with {} modules", catalog.snapshot().len());

    let shutdown = CancellationToken::new();
    spawn_catalog_metrics(&catalog, metrics.clone(), shutdown.clone());
    let watcher = catalog.spawn_watcher(shutdown.clone());

    // Backends
    let kind = if args.standalone {
        BackendKind::Standalone
    } else {
        BackendKind::Cluster
    };
    let backend_config = BackendConfig {
        helm: HelmConfig {
            binary: args.helm_bin.clone(),
            kube_context: args.kube_context.clone(),
            ..Default::default()
        },
        kube: KubeClusterConfig {
            api_timeout: Duration::from_secs(args.k8s_api_timeout_secs),
            ..Default::default()
        },
    };
    let backends = BackendFactory::create(kind, backend_config).await?;

    // Orchestrator
    let orchestrator = LifecycleOrchestrator::new(
        OrchestratorConfig {
            driver: DriverConfig {
                default_timeout: Duration::from_secs(args.deploy_timeout_secs),
                ..Default::default()
            },
            default_tier: args.default_tier.clone(),
            enforce_dependencies: !args.skip_dependency_gate,
        },
        catalog.clone(),
        backends,
        Some(metrics.clone()),
    );

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_orchestrator).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let server_metrics = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, server_metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Create and run API server
    let api_config = ApiServerConfig {
        rest_addr: args
            .api_addr
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid REST API address: {}", e)))?,
        ..Default::default()
    };
    let api_server = Arc::new(ApiServer::new(api_config, orchestrator));

    let signal_server = api_server.clone();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_shutdown.cancel();
            signal_server.shutdown();
        }
    });

    api_server.run().await?;

    shutdown.cancel();
    let _ = watcher.await;
    info!("Server shutdown complete");
    Ok(())
}

/// Mirror catalog reload events into metrics
fn spawn_catalog_metrics(
    catalog: &Arc<CatalogStore>,
    metrics: LifecycleMetrics,
    shutdown: CancellationToken,
) {
    let mut events = catalog.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(CatalogEvent::Reloaded { module_count, .. }) => {
                        metrics.record_catalog_reload(true, Some(module_count));
                    }
                    Ok(CatalogEvent::ReloadFailed { source, reason }) => {
                        warn!("Catalog reload from {} failed: {}", source, reason);
                        metrics.record_catalog_reload(false, None);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {} catalog events", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(log_level: &str, json: bool) {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "tower_http=info", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn plain_response(
    status: hyper::StatusCode,
    body: impl Into<hyper::Body>,
) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str, orchestrator: Arc<LifecycleOrchestrator>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let orchestrator = orchestrator.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let orchestrator = orchestrator.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => plain_response(StatusCode::OK, "ok"),
                        "/readyz" => match orchestrator.health_check().await {
                            Ok((_, true)) => plain_response(StatusCode::OK, "ok"),
                            _ => plain_response(
                                StatusCode::SERVICE_UNAVAILABLE,
                                "cluster unreachable",
                            ),
                        },
                        _ => plain_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid health server address: {}", e)))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: LifecycleMetrics) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{header, Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok((content_type, buffer)) => {
                                let mut response = plain_response(StatusCode::OK, buffer);
                                if let Ok(value) = header::HeaderValue::from_str(&content_type) {
                                    response.headers_mut().insert(header::CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => plain_response(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                e.to_string(),
                            ),
                        },
                        _ => plain_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
