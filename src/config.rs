use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::actors::broker::{BrokerConfig, DEFAULT_DELIVERY_BUFFER};

/// Static shape of the monitored tree plus collaborator settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub applications: BTreeMap<String, ApplicationConfig>,

    /// Metric export (optional - disabled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opentsdb: Option<OpenTsdbConfig>,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub broker: BrokerSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub services: BTreeMap<String, ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Addresses probed for this service; `host:port` or an http(s) URL
    pub instances: Vec<String>,

    /// Number of failed instances tolerated before the service counts as failed
    #[serde(default)]
    pub max_failures: usize,

    #[serde(default)]
    pub check: CheckConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    TcpConnect,
    HttpStatus,
}

impl CheckType {
    fn infer(address: &str) -> Self {
        if address.starts_with("http://") || address.starts_with("https://") {
            CheckType::HttpStatus
        } else {
            CheckType::TcpConnect
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Inferred from the instance address when absent
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CheckType>,

    /// Seconds between two checks
    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default)]
    pub http: HttpCheckConfig,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            kind: None,
            interval: default_interval(),
            http: HttpCheckConfig::default(),
        }
    }
}

fn default_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpCheckConfig {
    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default)]
    pub skip_tls_verify: bool,

    /// PEM file with additional trusted root certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<PathBuf>,

    /// PEM files of the client certificate and its key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,
}

/// Everything a probe needs to check one instance
#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub kind: CheckType,
    pub interval: Duration,
    pub http: HttpCheckConfig,
}

impl CheckConfig {
    /// Resolve the check for one instance address.
    pub fn resolve(&self, address: &str) -> CheckOptions {
        CheckOptions {
            kind: self.kind.unwrap_or_else(|| CheckType::infer(address)),
            interval: Duration::from_secs(self.interval),
            http: self.http.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTsdbConfig {
    /// Base URL of the OpenTSDB HTTP API
    pub address: String,

    /// Value of the `host` tag; taken from the environment when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Seconds between two flushes
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_flush_interval() -> u64 {
    3
}

fn default_batch_size() -> usize {
    256
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(rename = "bind", default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Seconds a point-in-time read waits for a node's first status
    #[serde(default = "default_status_timeout")]
    pub status_timeout: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            enable_cors: true,
            status_timeout: default_status_timeout(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_true() -> bool {
    true
}

fn default_status_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    #[serde(default = "default_delivery_buffer")]
    pub delivery_buffer: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            delivery_buffer: default_delivery_buffer(),
        }
    }
}

impl From<&BrokerSettings> for BrokerConfig {
    fn from(settings: &BrokerSettings) -> Self {
        BrokerConfig {
            delivery_buffer: settings.delivery_buffer,
        }
    }
}

fn default_delivery_buffer() -> usize {
    DEFAULT_DELIVERY_BUFFER
}

impl Config {
    /// Reject trees with empty branches or unusable settings.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.applications.is_empty() {
            anyhow::bail!("no applications configured");
        }
        for (app, application) in &self.applications {
            if application.services.is_empty() {
                anyhow::bail!("application '{app}' has no services");
            }
            for (svc, service) in &application.services {
                if service.instances.is_empty() {
                    anyhow::bail!("service '{app}/{svc}' has no instances");
                }
                let mut seen = std::collections::BTreeSet::new();
                if let Some(duplicate) = service.instances.iter().find(|i| !seen.insert(*i)) {
                    anyhow::bail!("service '{app}/{svc}' lists instance {duplicate} twice");
                }
                if service.check.interval == 0 {
                    anyhow::bail!("service '{app}/{svc}' has a zero check interval");
                }
                let http = &service.check.http;
                if http.client_cert.is_some() != http.client_key.is_some() {
                    anyhow::bail!("service '{app}/{svc}' needs both client_cert and client_key");
                }
            }
        }
        if self.broker.delivery_buffer == 0 {
            anyhow::bail!("broker.delivery_buffer must be at least 1");
        }
        Ok(())
    }
}

/// Parse a configuration document; TOML for `.toml` paths, JSON otherwise.
pub fn parse_config(content: &str, path: Option<&Path>) -> anyhow::Result<Config> {
    let is_toml = path
        .and_then(Path::extension)
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let config: Config = if is_toml {
        toml::from_str(content).context("invalid TOML configuration")?
    } else {
        serde_json::from_str(content).context("invalid JSON configuration")?
    };

    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    parse_config(&file_content, Some(path))
}

/// Inline JSON from the environment wins over the configuration file.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(inline) = crate::util::get_config_from_env() {
        return parse_config(&inline, None);
    }
    match path {
        Some(path) => read_config_file(path),
        None => anyhow::bail!("no configuration file given and UPTREE_CONFIG_JSON is not set"),
    }
}
