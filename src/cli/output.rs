//! Plain-text rendering for CLI output

use crate::controlplane::api::{ModuleSummary, ValidateModulesResponse};
use crate::controlplane::orchestrator::{LifecycleReport, TenantStatus};
use crate::controlplane::reconciler::TenantSummary;
use crate::domain::{ModuleStatus, ResourceTier};
use serde::Serialize;
use std::fmt::Write;

/// Output format selected with `--output`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Render `value` as pretty JSON
pub fn json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Left-aligned columns sized to their widest cell
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut out = String::new();
    render_row(&mut out, &widths, headers.iter().copied());
    for row in rows {
        render_row(&mut out, &widths, row.iter().map(String::as_str));
    }
    out
}

fn render_row<'a>(out: &mut String, widths: &[usize], cells: impl Iterator<Item = &'a str>) {
    let line: Vec<String> = cells
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect();
    let _ = writeln!(out, "{}", line.join("  ").trim_end());
}

pub fn modules(modules: &[ModuleSummary]) -> String {
    if modules.is_empty() {
        return "No modules in catalog\n".to_string();
    }
    let rows: Vec<Vec<String>> = modules
        .iter()
        .map(|m| {
            vec![
                m.name.clone(),
                m.category.clone(),
                m.version.clone(),
                m.dependencies.join(","),
                m.description.clone(),
            ]
        })
        .collect();
    table(&["NAME", "CATEGORY", "VERSION", "DEPENDS ON", "DESCRIPTION"], &rows)
}

pub fn tiers(tiers: &[ResourceTier]) -> String {
    let rows: Vec<Vec<String>> = tiers
        .iter()
        .map(|t| {
            vec![
                t.name.clone(),
                t.cpu_limit.clone(),
                t.memory_limit.clone(),
                t.storage_limit.clone(),
            ]
        })
        .collect();
    table(&["TIER", "CPU", "MEMORY", "STORAGE"], &rows)
}

pub fn tenants(tenants: &[TenantSummary]) -> String {
    if tenants.is_empty() {
        return "No tenants found\n".to_string();
    }
    let rows: Vec<Vec<String>> = tenants
        .iter()
        .flat_map(|t| {
            t.environments.iter().map(move |env| {
                vec![
                    t.tenant.clone(),
                    env.environment.clone(),
                    env.namespace.clone(),
                    env.modules.join(","),
                ]
            })
        })
        .collect();
    table(&["TENANT", "ENVIRONMENT", "NAMESPACE", "MODULES"], &rows)
}

pub fn status(status: &ModuleStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Module:     {}", status.module);
    let _ = writeln!(out, "Namespace:  {}", status.namespace);
    let _ = writeln!(out, "Release:    {}", status.release_name);
    let _ = writeln!(out, "Phase:      {}", status.phase);
    let _ = writeln!(
        out,
        "Replicas:   {}/{} ready",
        status.ready_replicas, status.desired_replicas
    );
    let _ = writeln!(
        out,
        "Pods:       {}/{} running",
        status.pods.running, status.pods.total
    );
    if let Some(revision) = status.release_revision {
        let _ = writeln!(out, "Revision:   {}", revision);
    }
    if !status.workloads.is_empty() {
        let rows: Vec<Vec<String>> = status
            .workloads
            .iter()
            .map(|w| {
                vec![
                    w.kind.to_string(),
                    w.name.clone(),
                    format!("{}/{}", w.ready_replicas, w.desired_replicas),
                ]
            })
            .collect();
        out.push('\n');
        out.push_str(&table(&["KIND", "NAME", "READY"], &rows));
    }
    out
}

pub fn tenant_status(status: &TenantStatus) -> String {
    let mut out = format!("Tenant: {}\n", status.tenant);
    if status.environments.is_empty() {
        out.push_str("No environments found\n");
        return out;
    }
    let rows: Vec<Vec<String>> = status
        .environments
        .iter()
        .flat_map(|env| {
            env.modules.iter().map(move |m| {
                vec![
                    env.environment.clone(),
                    m.module.clone(),
                    m.phase.to_string(),
                    format!("{}/{}", m.ready_replicas, m.desired_replicas),
                ]
            })
        })
        .collect();
    out.push_str(&table(&["ENVIRONMENT", "MODULE", "PHASE", "READY"], &rows));
    out
}

pub fn report(report: &LifecycleReport) -> String {
    let mut out = format!("{}\n", report.message);
    let _ = writeln!(out, "State:      {}", report.state);
    let _ = writeln!(out, "Namespace:  {}", report.details.namespace);
    let _ = writeln!(out, "Release:    {}", report.details.release_name);
    let _ = writeln!(
        out,
        "Replicas:   {}/{} ready",
        report.details.ready_replicas, report.details.desired_replicas
    );
    if let Some(failures) = &report.details.residual_cleanup_failures {
        out.push_str("Cleanup failures:\n");
        for failure in failures {
            let _ = writeln!(out, "  {}: {}", failure.class, failure.error);
        }
    }
    out
}

pub fn validation(response: &ValidateModulesResponse) -> String {
    let mut out = String::new();
    for module in &response.modules {
        let mark = if module.valid { "ok" } else { "invalid" };
        let _ = write!(out, "{:<24} {}", module.module, mark);
        if !module.missing_dependencies.is_empty() {
            let _ = write!(out, " (missing: {})", module.missing_dependencies.join(", "));
        }
        if let Some(error) = &module.error {
            let _ = write!(out, " ({})", error);
        }
        out.push('\n');
    }
    match &response.error {
        Some(error) => {
            let _ = writeln!(out, "Selection is invalid: {}", error);
        }
        None => out.push_str("Selection is valid\n"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_alignment() {
        let out = table(
            &["NAME", "TIER"],
            &[
                vec!["data-lake".into(), "bronze".into()],
                vec!["minio".into(), "premium".into()],
            ],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "NAME       TIER");
        assert_eq!(lines[1], "data-lake  bronze");
        assert_eq!(lines[2], "minio      premium");
    }

    #[test]
    fn test_tiers_output() {
        let tiers = vec![ResourceTier {
            name: "bronze".into(),
            cpu_limit: "10".into(),
            memory_limit: "20Gi".into(),
            storage_limit: "100Gi".into(),
        }];
        let out = super::tiers(&tiers);
        assert!(out.contains("bronze"));
        assert!(out.contains("100Gi"));
    }
}
