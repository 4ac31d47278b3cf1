use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use secrecy::Secret;
use serde::{Deserialize, Deserializer};

use crate::retry::{Backoff, RetryPolicy};

/// ClickHouse connection and layout settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClickHouseConfig {
    pub user: String,
    #[serde(deserialize_with = "deserialize_secret")]
    pub password: Secret<String>,
    pub http_port: u16,
    /// Principal whose grants `grantcheck` lists.
    pub viewer_principal: String,
    pub log_dir: String,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            user: "default".to_string(),
            password: Secret::new(String::new()),
            http_port: 8123,
            viewer_principal: "viewer".to_string(),
            log_dir: "/var/log/clickhouse-server".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub user: String,
    pub database: String,
    pub log_dir: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            database: "postgres".to_string(),
            log_dir: "/var/lib/postgresql/data/log".to_string(),
        }
    }
}

/// Connectivity retry settings, turned into a [`RetryPolicy`].
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff: Backoff,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 2_000,
            backoff: Backoff::Fixed,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            delay: Duration::from_millis(self.delay_ms),
            backoff: self.backoff,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Utilities `install-tools` puts into a pod.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub packages: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            packages: vec!["less".to_string(), "vim".to_string()],
        }
    }
}

/// Top-level configuration, scoped to one invocation.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Kubeconfig context; the current context is used when unset.
    pub context: Option<String>,
    /// Append-only run log. Disabled when unset.
    pub run_log: Option<PathBuf>,
    pub pager: String,
    pub clickhouse: ClickHouseConfig,
    pub postgres: PostgresConfig,
    pub retry: RetryConfig,
    pub tools: ToolsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            context: None,
            run_log: None,
            pager: "less -R".to_string(),
            clickhouse: ClickHouseConfig::default(),
            postgres: PostgresConfig::default(),
            retry: RetryConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Secret<String>, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(Secret::new)
}

impl Config {
    /// Apply environment overrides. `lookup` is `std::env::var(..).ok()` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("POD_ADMIN_CONTEXT") {
            self.context = Some(v);
        }
        if let Some(v) = lookup("CLICKHOUSE_USER") {
            self.clickhouse.user = v;
        }
        if let Some(v) = lookup("CLICKHOUSE_PASSWORD") {
            self.clickhouse.password = Secret::new(v);
        }
        if let Some(v) = lookup("PGUSER") {
            self.postgres.user = v;
        }
        if let Some(v) = lookup("PGDATABASE") {
            self.postgres.database = v;
        }
        if let Some(v) = lookup("PAGER").filter(|p| !p.trim().is_empty()) {
            self.pager = v;
        }
    }

    /// Reject values that would break the remote command lines they are spliced into.
    pub fn validate(&self) -> anyhow::Result<()> {
        let ident = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid regex");
        if !ident.is_match(&self.clickhouse.viewer_principal) {
            anyhow::bail!(
                "clickhouse.viewer_principal '{}' must be a plain identifier",
                self.clickhouse.viewer_principal
            );
        }
        if self.tools.packages.is_empty() {
            anyhow::bail!("tools.packages must name at least one package");
        }
        let package = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.+_-]*$").expect("Invalid regex");
        if let Some(bad) = self.tools.packages.iter().find(|p| !package.is_match(p)) {
            anyhow::bail!("tools.packages entry '{bad}' is not a valid package name");
        }
        if self.pager.trim().is_empty() {
            anyhow::bail!("pager must not be empty");
        }
        Ok(())
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))?;
    Ok(config)
}

/// Load the explicit config path, or the default one if it exists, or built-in defaults.
pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<Config> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let path = default_config_path();
            if path.exists() {
                load_config(&path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

/// Returns the default path to `config/pod-admin.toml` relative to the current directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("config/pod-admin.toml")
}
