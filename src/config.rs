//! Configuration management for grafana-fetch
//!
//! Configuration comes from a YAML file, overlaid with command-line flags
//! and `GF_FETCH_*` environment variables. Requests never read the file
//! directly: they take an immutable snapshot from a [`ConfigHandle`], and a
//! reload swaps in a whole new snapshot.

use crate::error::{FetchError, Result};
use crate::fetch_client::TlsPolicy;
use crate::models::{DashboardSpec, ResolvedDashboard};
use crate::options::DEFAULT_THEME;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;
use url::Url;

/// Name of the config file looked up in the home directory
pub const DEFAULT_CONFIG_FILE: &str = "grafana-fetch.yaml";

/// Organisation id used when neither the dashboard nor the globals set one
pub const DEFAULT_ORG: i64 = 1;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listen address; `:8080` means all interfaces (default: ":8080")
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Base URL of the Grafana instance (default: "http://grafana:3000")
    #[serde(default = "default_url")]
    pub url: String,

    /// Cache directory; caching is disabled when unset or empty
    #[serde(default)]
    pub cache: Option<PathBuf>,

    /// Global cache TTL in seconds
    #[serde(default)]
    pub ttl: Option<i64>,

    /// Global organisation id
    #[serde(default)]
    pub org: Option<i64>,

    /// Global theme
    #[serde(default)]
    pub theme: Option<String>,

    /// Global bearer token for upstream requests
    #[serde(default)]
    pub token: Option<String>,

    /// Skip upstream TLS certificate verification
    #[serde(default)]
    pub insecure: bool,

    /// Extra CA certificates (PEM) trusted for upstream requests
    #[serde(default)]
    pub cafile: Option<PathBuf>,

    /// Address of the optional metrics listener
    #[serde(default)]
    pub metrics_listen: Option<String>,

    /// How often the config file is checked for changes, 0 disables (default: 5)
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,

    /// Dashboards by name, decoded on lookup
    #[serde(default)]
    pub dashboards: BTreeMap<String, serde_yaml::Value>,
}

fn default_listen() -> String {
    ":8080".to_string()
}

fn default_url() -> String {
    "http://grafana:3000".to_string()
}

fn default_reload_interval() -> u64 {
    5
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            listen: default_listen(),
            url: default_url(),
            cache: None,
            ttl: None,
            org: None,
            theme: None,
            token: None,
            insecure: false,
            cafile: None,
            metrics_listen: None,
            reload_interval_secs: default_reload_interval(),
            dashboards: BTreeMap::new(),
        }
    }
}

/// Where the config file comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Given with `--config`; it must exist
    Explicit(PathBuf),
    /// `$HOME/grafana-fetch.yaml`; defaults are used if it is missing
    Default(PathBuf),
}

impl ConfigSource {
    /// Resolve the source from an optional `--config` value
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        match explicit {
            Some(path) => Ok(ConfigSource::Explicit(path)),
            None => Ok(ConfigSource::Default(default_config_path()?)),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::Explicit(path) | ConfigSource::Default(path) => path,
        }
    }
}

/// `$HOME/grafana-fetch.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .ok_or_else(|| FetchError::ConfigError("could not determine home directory".to_string()))?;
    Ok(PathBuf::from(home).join(DEFAULT_CONFIG_FILE))
}

/// Settings given on the command line or through the environment
///
/// These win over the config file and are re-applied on every reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub listen: Option<String>,
    pub url: Option<String>,
    pub cache: Option<PathBuf>,
    pub ttl: Option<i64>,
    pub org: Option<i64>,
    pub theme: Option<String>,
    pub token: Option<String>,
    pub insecure: bool,
    pub cafile: Option<PathBuf>,
    pub metrics_listen: Option<String>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut GatewayConfig) {
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(cache) = &self.cache {
            config.cache = Some(cache.clone());
        }
        if self.ttl.is_some() {
            config.ttl = self.ttl;
        }
        if self.org.is_some() {
            config.org = self.org;
        }
        if let Some(theme) = &self.theme {
            config.theme = Some(theme.clone());
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if self.insecure {
            config.insecure = true;
        }
        if let Some(cafile) = &self.cafile {
            config.cafile = Some(cafile.clone());
        }
        if let Some(metrics_listen) = &self.metrics_listen {
            config.metrics_listen = Some(metrics_listen.clone());
        }
    }
}

impl GatewayConfig {
    /// Parse configuration from YAML text without validating it
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(GatewayConfig::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| FetchError::ConfigError(format!("Failed to parse config file: {}", e)))
    }

    /// Load and validate configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(GatewayConfig)` if loading and validation succeed
    /// * `Err(FetchError)` if the file cannot be read or the config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::read_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            FetchError::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Load from `source`, apply `overrides` and validate
    ///
    /// A missing default config file is not an error: defaults are used and a
    /// warning is logged. A missing explicit file is an error.
    pub fn load(source: &ConfigSource, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = match source {
            ConfigSource::Explicit(path) => Self::read_file(path)?,
            ConfigSource::Default(path) => match fs::read_to_string(path) {
                Ok(content) => Self::from_yaml_str(&content)?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "no config file loaded");
                    GatewayConfig::default()
                }
                Err(e) => {
                    return Err(FetchError::ConfigError(format!(
                        "Failed to read config file {}: {}",
                        path.display(),
                        e
                    )))
                }
            },
        };

        overrides.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - `url` must be an absolute http or https URL
    /// - `listen` must be `host:port` or `:port` with a literal IP host
    /// - `metrics_listen`, if set, follows the same rule as `listen`
    ///
    /// Dashboard entries are not checked here; a broken entry only fails
    /// the requests that use it.
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        self.listen_addr()?;
        self.metrics_addr()?;
        Ok(())
    }

    /// Parsed base URL of the render service
    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)
            .map_err(|e| FetchError::ConfigError(format!("invalid url '{}': {}", self.url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(FetchError::ConfigError(format!(
                "url '{}' must use http or https, got '{}'",
                self.url, other
            ))),
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_listen(&self.listen)
    }

    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>> {
        match self.metrics_listen.as_deref() {
            Some(addr) if !addr.is_empty() => parse_listen(addr).map(Some),
            _ => Ok(None),
        }
    }

    /// Cache directory, if caching is enabled
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache
            .as_deref()
            .filter(|dir| !dir.as_os_str().is_empty())
    }

    pub fn tls_policy(&self) -> TlsPolicy {
        TlsPolicy {
            insecure: self.insecure,
            ca_file: self.cafile.clone(),
        }
    }

    /// Whether a dashboard is configured under `name`, ignoring case
    pub fn has_dashboard(&self, name: &str) -> bool {
        self.dashboard_entry(name).is_some()
    }

    fn dashboard_entry(&self, name: &str) -> Option<&serde_yaml::Value> {
        if let Some(value) = self.dashboards.get(name) {
            return Some(value);
        }
        let wanted = name.to_lowercase();
        self.dashboards
            .iter()
            .find(|(key, _)| key.to_lowercase() == wanted)
            .map(|(_, value)| value)
    }

    /// Decode the settings of one dashboard
    ///
    /// Names and field keys match regardless of case.
    ///
    /// # Returns
    /// * `Err(FetchError::DashboardNotFound)` if no entry has this name
    /// * `Err(FetchError::DashboardConfigInvalid)` if the entry does not decode
    pub fn dashboard_spec(&self, name: &str) -> Result<DashboardSpec> {
        let value = self
            .dashboard_entry(name)
            .ok_or_else(|| FetchError::DashboardNotFound(name.to_string()))?;

        serde_yaml::from_value(lowercase_keys(value))
            .map_err(|e| FetchError::dashboard_config_invalid(name, e.to_string()))
    }

    /// Decode a dashboard and fill unset fields from the globals
    ///
    /// The resolved name is `name` as requested, not the configured key, so
    /// cache keys follow the request path.
    /// Zero numbers and empty strings on the dashboard count as unset.
    /// Global values are used as given, even zero or empty.
    pub fn resolve_dashboard(&self, name: &str) -> Result<ResolvedDashboard> {
        let spec = self.dashboard_spec(name)?;

        let org_id = if spec.org_id != 0 {
            spec.org_id
        } else {
            self.org.unwrap_or(DEFAULT_ORG)
        };

        let theme = if !spec.theme.is_empty() {
            spec.theme
        } else {
            self.theme.clone().unwrap_or_else(|| DEFAULT_THEME.to_string())
        };

        let ttl_seconds = if spec.ttl_seconds != 0 {
            spec.ttl_seconds
        } else {
            self.ttl.unwrap_or(0)
        };

        let auth_token = if !spec.auth_token.is_empty() {
            Some(spec.auth_token)
        } else {
            self.token.clone().filter(|t| !t.is_empty())
        };

        Ok(ResolvedDashboard {
            name: name.to_string(),
            path_template: spec.path_template,
            ttl_seconds,
            auth_token,
            org_id,
            theme,
        })
    }
}

/// Copy a mapping with its string keys lowercased
fn lowercase_keys(value: &serde_yaml::Value) -> serde_yaml::Value {
    match value {
        serde_yaml::Value::Mapping(mapping) => serde_yaml::Value::Mapping(
            mapping
                .iter()
                .map(|(key, value)| {
                    let key = match key {
                        serde_yaml::Value::String(key) => serde_yaml::Value::String(key.to_lowercase()),
                        other => other.clone(),
                    };
                    (key, value.clone())
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Parse `host:port`, accepting Go-style `:port` for all interfaces
pub fn parse_listen(addr: &str) -> Result<SocketAddr> {
    let normalized = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    normalized
        .parse()
        .map_err(|e| FetchError::ConfigError(format!("invalid listen address '{}': {}", addr, e)))
}

/// Description of configuration changes after a reload
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigChanges {
    pub listen_changed: bool,
    pub url_changed: bool,
    pub cache_changed: bool,
    pub ttl_changed: bool,
    pub org_changed: bool,
    pub theme_changed: bool,
    pub token_changed: bool,
    pub insecure_changed: bool,
    pub cafile_changed: bool,
    pub metrics_listen_changed: bool,
    pub reload_interval_changed: bool,
    pub dashboards_changed: bool,
}

impl ConfigChanges {
    /// Compare two configurations field by field
    pub fn between(old: &GatewayConfig, new: &GatewayConfig) -> Self {
        ConfigChanges {
            listen_changed: old.listen != new.listen,
            url_changed: old.url != new.url,
            cache_changed: old.cache != new.cache,
            ttl_changed: old.ttl != new.ttl,
            org_changed: old.org != new.org,
            theme_changed: old.theme != new.theme,
            token_changed: old.token != new.token,
            insecure_changed: old.insecure != new.insecure,
            cafile_changed: old.cafile != new.cafile,
            metrics_listen_changed: old.metrics_listen != new.metrics_listen,
            reload_interval_changed: old.reload_interval_secs != new.reload_interval_secs,
            dashboards_changed: old.dashboards != new.dashboards,
        }
    }

    /// Check if any changes were made
    pub fn has_changes(&self) -> bool {
        !self.summary().is_empty()
    }

    /// Changes that only take effect after a restart
    ///
    /// Listeners are bound and the upstream TLS setup is built once at
    /// startup.
    pub fn requires_restart(&self) -> bool {
        self.listen_changed
            || self.insecure_changed
            || self.cafile_changed
            || self.metrics_listen_changed
    }

    /// Names of the changed settings
    pub fn summary(&self) -> Vec<&'static str> {
        let flags = [
            (self.listen_changed, "listen"),
            (self.url_changed, "url"),
            (self.cache_changed, "cache"),
            (self.ttl_changed, "ttl"),
            (self.org_changed, "org"),
            (self.theme_changed, "theme"),
            (self.token_changed, "token"),
            (self.insecure_changed, "insecure"),
            (self.cafile_changed, "cafile"),
            (self.metrics_listen_changed, "metrics_listen"),
            (self.reload_interval_changed, "reload_interval_secs"),
            (self.dashboards_changed, "dashboards"),
        ];
        flags
            .into_iter()
            .filter_map(|(changed, name)| changed.then_some(name))
            .collect()
    }
}

/// Shared, swappable configuration snapshot
///
/// The lock is only held to clone or replace the `Arc`, never across I/O.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<GatewayConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: GatewayConfig) -> Self {
        ConfigHandle {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// The configuration to use for the rest of a request
    pub fn snapshot(&self) -> Arc<GatewayConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and install a new configuration
    ///
    /// Requests already in flight keep the snapshot they started with.
    pub fn replace(&self, config: GatewayConfig) -> Result<ConfigChanges> {
        config.validate()?;
        let config = Arc::new(config);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let changes = ConfigChanges::between(&current, &config);
        *current = config;
        Ok(changes)
    }
}
