//! Lifecycle metrics
//!
//! Prometheus collectors for lifecycle operations, Helm invocations and
//! catalog reloads, registered on a registry owned by [`LifecycleMetrics`].

use crate::error::{Error, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Lifecycle metrics
#[derive(Clone)]
pub struct LifecycleMetrics {
    registry: Registry,
    operations: IntCounterVec,
    operation_duration: HistogramVec,
    helm_invocations: IntCounterVec,
    catalog_modules: IntGauge,
    catalog_reloads: IntCounterVec,
}

impl LifecycleMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new(
                "spandak8s_lifecycle_operations_total",
                "Lifecycle operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )
        .map_err(metrics_error)?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "spandak8s_lifecycle_operation_duration_seconds",
                "Duration of lifecycle operations",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
            &["operation"],
        )
        .map_err(metrics_error)?;

        let helm_invocations = IntCounterVec::new(
            Opts::new(
                "spandak8s_helm_invocations_total",
                "Helm invocations by action and result",
            ),
            &["action", "result"],
        )
        .map_err(metrics_error)?;

        let catalog_modules = IntGauge::new(
            "spandak8s_catalog_modules",
            "Number of modules in the active catalog snapshot",
        )
        .map_err(metrics_error)?;

        let catalog_reloads = IntCounterVec::new(
            Opts::new("spandak8s_catalog_reloads_total", "Catalog reload attempts"),
            &["result"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(operation_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(helm_invocations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(catalog_modules.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(catalog_reloads.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            operations,
            operation_duration,
            helm_invocations,
            catalog_modules,
            catalog_reloads,
        })
    }

    pub fn record_operation(&self, operation: &str, outcome: &str, elapsed: Duration) {
        self.operations
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_helm(&self, action: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.helm_invocations
            .with_label_values(&[action, result])
            .inc();
    }

    pub fn record_catalog_reload(&self, success: bool, module_count: Option<usize>) {
        let result = if success { "success" } else { "failure" };
        self.catalog_reloads.with_label_values(&[result]).inc();
        if let Some(count) = module_count {
            self.catalog_modules.set(count as i64);
        }
    }

    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations
            .with_label_values(&[operation, outcome])
            .get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_encode() {
        let metrics = LifecycleMetrics::new().unwrap();
        metrics.record_operation("enable", "deployed", Duration::from_millis(1500));
        metrics.record_operation("enable", "deployed", Duration::from_millis(800));
        metrics.record_helm("upgrade", true);
        metrics.record_catalog_reload(true, Some(7));

        assert_eq!(metrics.operation_count("enable", "deployed"), 2);
        assert_eq!(metrics.operation_count("disable", "undeployed"), 0);

        let (content_type, body) = metrics.encode().unwrap();
        assert!(content_type.starts_with("text/plain"));
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("spandak8s_catalog_modules 7"));
        assert!(text.contains("spandak8s_helm_invocations_total"));
    }
}
