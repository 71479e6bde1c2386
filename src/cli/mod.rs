//! Command-line interface
//!
//! Argument definitions for the `spandak8s` binary and the handlers for every
//! subcommand except `serve`, which the binary runs itself. Handlers talk to
//! the API through [`ApiClient`]; `catalog` and `config` work locally.

pub mod output;

use crate::catalog::{document_schema, CatalogSnapshot};
use crate::config::CliConfig;
use crate::controlplane::api::{
    ApiClient, ApiClientConfig, DisableModuleBody, EnableModuleBody,
};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use output::OutputFormat;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Arguments
// =============================================================================

/// Tenant-scoped platform module lifecycle for Kubernetes
#[derive(Parser, Debug)]
#[command(name = "spandak8s", author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    pub log_json: bool,

    /// CLI configuration file (default ~/.spanda/config.yaml)
    #[arg(long, global = true, env = "SPANDA_CONFIG")]
    pub config: Option<PathBuf>,

    /// API base URL, overriding the configuration file
    #[arg(long, global = true, env = "SPANDA_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short = 'o', global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the lifecycle API server
    Serve(ServeArgs),
    /// Catalog modules and their lifecycle
    Modules {
        #[command(subcommand)]
        command: ModulesCommand,
    },
    /// List resource tiers
    Tiers,
    /// Tenant discovery
    Tenants {
        #[command(subcommand)]
        command: TenantsCommand,
    },
    /// Inspect a catalog file locally
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },
    /// Show or change the CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Settings for `serve`
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8000")]
    pub api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    pub health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: String,

    /// Module catalog file
    #[arg(long, env = "CATALOG_PATH", default_value = "config/modules.yaml")]
    pub catalog_path: PathBuf,

    /// Directory relative chart paths resolve against (default: the
    /// catalog file's directory)
    #[arg(long, env = "CHARTS_ROOT")]
    pub charts_root: Option<PathBuf>,

    /// Default wait-for-ready budget in seconds
    #[arg(long, env = "DEPLOY_TIMEOUT_SECS", default_value = "300")]
    pub deploy_timeout_secs: u64,

    /// Kubernetes API call timeout in seconds
    #[arg(long, env = "K8S_API_TIMEOUT_SECS", default_value = "30")]
    pub k8s_api_timeout_secs: u64,

    /// Catalog modification check interval in seconds
    #[arg(long, env = "CATALOG_RELOAD_SECS", default_value = "10")]
    pub catalog_reload_secs: u64,

    /// Run against an in-memory cluster and simulated Helm
    #[arg(long, env = "STANDALONE")]
    pub standalone: bool,

    /// Helm binary
    #[arg(long, env = "HELM_BIN", default_value = "helm")]
    pub helm_bin: PathBuf,

    /// kubeconfig context passed to Helm
    #[arg(long, env = "KUBE_CONTEXT")]
    pub kube_context: Option<String>,

    /// Tier used when a request names none
    #[arg(long, env = "DEFAULT_TIER", default_value = "bronze")]
    pub default_tier: String,

    /// Skip the deployed-dependency and conflict check on enable
    #[arg(long, env = "SKIP_DEPENDENCY_GATE")]
    pub skip_dependency_gate: bool,
}

#[derive(Subcommand, Debug)]
pub enum ModulesCommand {
    /// List catalog modules
    List {
        #[arg(long)]
        category: Option<String>,
    },
    /// Show a module definition
    Show { module: String },
    /// Enable a module for a tenant environment
    Enable {
        module: String,
        /// Environment, or `tenant-environment`
        #[arg(long, short = 'e')]
        env: Option<String>,
        /// Resource tier
        #[arg(long, short = 't')]
        tier: Option<String>,
        /// Extra Helm values as key=value
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
        /// Run Helm even if the module is already healthy
        #[arg(long)]
        reapply: bool,
        /// Wait-for-ready budget in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Disable a module for a tenant environment
    Disable {
        module: String,
        /// Environment, or `tenant-environment`
        #[arg(long, short = 'e')]
        env: Option<String>,
        /// Keep persistent volume claims
        #[arg(long)]
        keep_data: bool,
        /// Also remove secrets, service accounts, RBAC, network policies,
        /// ingresses, jobs and custom resources
        #[arg(long)]
        complete_cleanup: bool,
        /// Skip confirmation and clean up even if the release is gone
        #[arg(long, short = 'f')]
        force: bool,
        /// Skip confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Live status of a module
    Status {
        module: String,
        /// Environment, or `tenant-environment`
        #[arg(long, short = 'e')]
        env: Option<String>,
    },
    /// Validate a module selection against the catalog
    Validate {
        #[arg(required = true)]
        modules: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TenantsCommand {
    /// Tenants and the modules deployed for them
    List,
    /// Status of every module of a tenant
    Status {
        /// Tenant name (default: from configuration)
        tenant: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// Parse and validate a catalog file
    Check {
        path: PathBuf,
        #[arg(long)]
        charts_root: Option<PathBuf>,
    },
    /// Print the JSON schema of the catalog document
    Schema,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the configuration
    Show,
    /// Set a value, e.g. `tenant.name acme`
    Set { key: String, value: String },
}

// =============================================================================
// Context
// =============================================================================

/// Everything a handler needs
pub struct CliContext {
    pub config: CliConfig,
    pub config_path: PathBuf,
    pub output: OutputFormat,
}

impl CliContext {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let config_path = match &cli.config {
            Some(path) => path.clone(),
            None => CliConfig::default_path()?,
        };
        let mut config = CliConfig::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        if let Some(url) = &cli.api_url {
            config.api.base_url = url.clone();
        }
        Ok(Self {
            config,
            config_path,
            output: cli.output,
        })
    }

    fn client(&self) -> anyhow::Result<ApiClient> {
        Ok(ApiClient::new(ApiClientConfig {
            base_url: self.config.api.base_url.clone(),
            timeout: Duration::from_secs(self.config.api.timeout_secs),
            token: self.config.auth.token.clone(),
        })?)
    }

    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T) -> String) -> anyhow::Result<()> {
        match self.output {
            OutputFormat::Json => println!("{}", output::json(value)?),
            OutputFormat::Text => print!("{}", text(value)),
        }
        Ok(())
    }

    /// Tenant and environment for `--env`: `tenant-environment` splits on the
    /// first hyphen, anything else is an environment of the configured tenant
    pub fn resolve_env(&self, env: Option<&str>) -> (String, String) {
        match env {
            Some(env) => match env.split_once('-') {
                Some((tenant, environment)) => (tenant.to_string(), environment.to_string()),
                None => (self.config.tenant.name.clone(), env.to_string()),
            },
            None => (
                self.config.tenant.name.clone(),
                self.config.defaults.environment.clone(),
            ),
        }
    }
}

/// Parse `key=value` pairs
pub fn parse_set_values(values: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    values
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => bail!("expected KEY=VALUE, got {:?}", pair),
        })
        .collect()
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N]: ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

// =============================================================================
// Handlers
// =============================================================================

/// Run a client-side command
pub async fn run(command: Command, mut ctx: CliContext) -> anyhow::Result<()> {
    match command {
        Command::Serve(_) => bail!("serve is handled by the binary"),
        Command::Modules { command } => modules(command, &ctx).await,
        Command::Tiers => {
            let tiers = ctx.client()?.tiers().await?;
            ctx.emit(&tiers, |t| output::tiers(t))
        }
        Command::Tenants { command } => tenants(command, &ctx).await,
        Command::Catalog { command } => catalog(command, &ctx),
        Command::Config { command } => config(command, &mut ctx),
    }
}

async fn modules(command: ModulesCommand, ctx: &CliContext) -> anyhow::Result<()> {
    let client = ctx.client()?;
    match command {
        ModulesCommand::List { category } => {
            let modules = client.list_modules(category.as_deref()).await?;
            ctx.emit(&modules, |m| output::modules(m))
        }
        ModulesCommand::Show { module } => {
            let definition = client.module(&module).await?;
            ctx.emit(&definition, |d| {
                format!("{}\n", serde_yaml::to_string(d).unwrap_or_default())
            })
        }
        ModulesCommand::Enable {
            module,
            env,
            tier,
            set,
            reapply,
            timeout_secs,
        } => {
            let (tenant, environment) = ctx.resolve_env(env.as_deref());
            let body = EnableModuleBody {
                environment,
                tier: Some(tier.unwrap_or_else(|| ctx.config.defaults.tier.clone())),
                config_overrides: parse_set_values(&set)?,
                reapply,
                timeout_secs,
            };
            let report = client
                .enable_module(&tenant, &module, &body)
                .await
                .with_context(|| format!("enabling {} for {}", module, tenant))?;
            ctx.emit(&report, |r| output::report(r))
        }
        ModulesCommand::Disable {
            module,
            env,
            keep_data,
            complete_cleanup,
            force,
            yes,
        } => {
            let (tenant, environment) = ctx.resolve_env(env.as_deref());
            let mut body = DisableModuleBody {
                environment,
                keep_data,
                complete_cleanup,
                force,
                confirmed: yes,
            };

            let mut report = client.disable_module(&tenant, &module, &body).await?;
            if report.requires_confirmation {
                println!("{}", report.message);
                if !confirm(&format!("Disable {} in {}?", module, report.details.namespace))? {
                    println!("Cancelled");
                    return Ok(());
                }
                body.confirmed = true;
                report = client.disable_module(&tenant, &module, &body).await?;
            }
            ctx.emit(&report, |r| output::report(r))
        }
        ModulesCommand::Status { module, env } => {
            let (tenant, environment) = ctx.resolve_env(env.as_deref());
            let status = client.module_status(&tenant, &environment, &module).await?;
            ctx.emit(&status, |s| output::status(s))
        }
        ModulesCommand::Validate { modules } => {
            let response = client.validate_modules(&modules).await?;
            ctx.emit(&response, |r| output::validation(r))?;
            if !response.valid {
                bail!("module selection is invalid");
            }
            Ok(())
        }
    }
}

async fn tenants(command: TenantsCommand, ctx: &CliContext) -> anyhow::Result<()> {
    let client = ctx.client()?;
    match command {
        TenantsCommand::List => {
            let tenants = client.tenants().await?;
            ctx.emit(&tenants, |t| output::tenants(t))
        }
        TenantsCommand::Status { tenant } => {
            let tenant = tenant.unwrap_or_else(|| ctx.config.tenant.name.clone());
            let status = client.tenant_status(&tenant).await?;
            ctx.emit(&status, |s| output::tenant_status(s))
        }
    }
}

fn catalog(command: CatalogCommand, ctx: &CliContext) -> anyhow::Result<()> {
    match command {
        CatalogCommand::Check { path, charts_root } => {
            let snapshot = CatalogSnapshot::load(&path, charts_root.as_deref())
                .with_context(|| format!("checking {}", path.display()))?;
            let names: Vec<String> = snapshot.modules().map(|m| m.name.clone()).collect();
            let report = snapshot.validation_report(names.as_slice());
            ctx.emit(&report, |r| {
                let mut out = format!(
                    "{}: {} modules, {} tiers\n",
                    path.display(),
                    snapshot.len(),
                    snapshot.resource_tiers().len()
                );
                for v in r {
                    out.push_str(&format!("  {:<24} {}\n", v.module, if v.valid { "ok" } else { "invalid" }));
                }
                out
            })
        }
        CatalogCommand::Schema => {
            println!("{}", serde_json::to_string_pretty(&document_schema())?);
            Ok(())
        }
    }
}

fn config(command: ConfigCommand, ctx: &mut CliContext) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Show => {
            let mut shown = ctx.config.clone();
            if shown.auth.token.is_some() {
                shown.auth.token = Some("********".to_string());
            }
            ctx.emit(&shown, |c| serde_yaml::to_string(c).unwrap_or_default())
        }
        ConfigCommand::Set { key, value } => {
            ctx.config.set(&key, &value)?;
            ctx.config.save(&ctx.config_path)?;
            println!("Set {} in {}", key, ctx.config_path.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> CliContext {
        let mut config = CliConfig::default();
        config.tenant.name = "acme".into();
        CliContext {
            config,
            config_path: PathBuf::from("/tmp/unused.yaml"),
            output: OutputFormat::Text,
        }
    }

    #[test]
    fn test_resolve_env() {
        let ctx = context();
        assert_eq!(ctx.resolve_env(None), ("acme".into(), "dev".into()));
        assert_eq!(ctx.resolve_env(Some("prod")), ("acme".into(), "prod".into()));
        assert_eq!(
            ctx.resolve_env(Some("globex-staging")),
            ("globex".into(), "staging".into())
        );
        // first hyphen only
        assert_eq!(
            ctx.resolve_env(Some("globex-eu-west")),
            ("globex".into(), "eu-west".into())
        );
    }

    #[test]
    fn test_parse_set_values() {
        let values = parse_set_values(&["replicas=3".into(), "image.tag=a=b".into()]).unwrap();
        assert_eq!(values["replicas"], "3");
        assert_eq!(values["image.tag"], "a=b");
        assert!(parse_set_values(&["novalue".into()]).is_err());
        assert!(parse_set_values(&["=x".into()]).is_err());
    }

    #[test]
    fn test_argument_parsing() {
        let cli = Cli::try_parse_from([
            "spandak8s",
            "modules",
            "disable",
            "data-lake",
            "--env",
            "acme-dev",
            "--keep-data",
            "-y",
        ])
        .unwrap();
        match cli.command {
            Command::Modules {
                command:
                    ModulesCommand::Disable {
                        module,
                        env,
                        keep_data,
                        complete_cleanup,
                        yes,
                        force,
                    },
            } => {
                assert_eq!(module, "data-lake");
                assert_eq!(env.as_deref(), Some("acme-dev"));
                assert!(keep_data && yes);
                assert!(!complete_cleanup && !force);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cli = Cli::try_parse_from(["spandak8s", "serve", "--standalone"]).unwrap();
        assert!(matches!(cli.command, Command::Serve(ServeArgs { standalone: true, .. })));
    }

    #[test]
    fn test_config_set_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context();
        ctx.config_path = dir.path().join("config.yaml");

        config(
            ConfigCommand::Set {
                key: "defaults.tier".into(),
                value: "premium".into(),
            },
            &mut ctx,
        )
        .unwrap();
        assert_eq!(CliConfig::load(&ctx.config_path).unwrap().defaults.tier, "premium");
    }
}
