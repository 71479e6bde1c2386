//! CLI configuration
//!
//! Operator settings kept in `~/.spanda/config.yaml`: where the API lives,
//! the bearer token to forward, and the default tenant, environment and tier.
//! A missing file yields the defaults; the file is only written by
//! [`CliConfig::save`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file location relative to the home directory
pub const CONFIG_RELATIVE_PATH: &str = ".spanda/config.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Credentials are issued elsewhere; the token is only forwarded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub token: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantSection {
    pub name: String,
}

impl Default for TenantSection {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsSection {
    pub environment: String,
    pub tier: String,
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            tier: "bronze".to_string(),
        }
    }
}

/// CLI configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub api: ApiSection,
    pub auth: AuthSection,
    pub tenant: TenantSection,
    pub defaults: DefaultsSection,
}

impl CliConfig {
    /// `$HOME/.spanda/config.yaml`
    pub fn default_path() -> Result<PathBuf> {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(CONFIG_RELATIVE_PATH))
            .ok_or_else(|| Error::Configuration("HOME is not set".to_string()))
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => Ok(Self::default()),
            Ok(text) => serde_yaml::from_str(&text).map_err(|e| {
                Error::Configuration(format!("invalid config {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Read a value by dotted key, e.g. `api.base_url`
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = match key {
            "api.base_url" => Some(self.api.base_url.clone()),
            "api.timeout_secs" => Some(self.api.timeout_secs.to_string()),
            "auth.token" => self.auth.token.clone(),
            "auth.username" => self.auth.username.clone(),
            "tenant.name" => Some(self.tenant.name.clone()),
            "defaults.environment" => Some(self.defaults.environment.clone()),
            "defaults.tier" => Some(self.defaults.tier.clone()),
            _ => return Err(unknown_key(key)),
        };
        Ok(value)
    }

    /// Set a value by dotted key. An empty value clears optional fields.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |v: &str| (!v.is_empty()).then(|| v.to_string());
        match key {
            "api.base_url" => self.api.base_url = value.to_string(),
            "api.timeout_secs" => {
                self.api.timeout_secs = value.parse().map_err(|_| {
                    Error::Configuration(format!("api.timeout_secs must be an integer: {}", value))
                })?
            }
            "auth.token" => self.auth.token = optional(value),
            "auth.username" => self.auth.username = optional(value),
            "tenant.name" => self.tenant.name = value.to_string(),
            "defaults.environment" => self.defaults.environment = value.to_string(),
            "defaults.tier" => self.defaults.tier = value.to_string(),
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }
}

fn unknown_key(key: &str) -> Error {
    Error::Configuration(format!("unknown config key: {}", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load(&dir.path().join("config.yaml")).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.defaults.tier, "bronze");
        assert_eq!(config.defaults.environment, "dev");
        assert!(config.auth.token.is_none());
    }

    #[test]
    fn test_partial_file_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "tenant:\n  name: acme\n").unwrap();

        let mut config = CliConfig::load(&path).unwrap();
        assert_eq!(config.tenant.name, "acme");
        assert_eq!(config.api.timeout_secs, 30);

        config.set("auth.token", "abc").unwrap();
        config.set("defaults.tier", "premium").unwrap();
        config.save(&path).unwrap();

        let reloaded = CliConfig::load(&path).unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(reloaded.get("auth.token").unwrap().as_deref(), Some("abc"));

        let mut cleared = reloaded;
        cleared.set("auth.token", "").unwrap();
        assert_eq!(cleared.get("auth.token").unwrap(), None);
    }

    #[test]
    fn test_invalid_keys_and_values() {
        let mut config = CliConfig::default();
        assert_matches!(config.set("kubernetes.context", "x"), Err(Error::Configuration(_)));
        assert_matches!(config.set("api.timeout_secs", "soon"), Err(Error::Configuration(_)));
        assert_matches!(config.get("nope"), Err(Error::Configuration(_)));
    }
}
