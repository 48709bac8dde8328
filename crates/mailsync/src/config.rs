//! Run configuration
//!
//! Loaded from `conf.yml` (explicit path, working directory, or the shared
//! config directory), with credentials overridable from the environment:
//! - `MAILSYNC_USER_KEY`
//! - `MAILSYNC_SECRET_KEY`
//! - `MAILSYNC_CUSTOMER_ID`

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rackspace::RackspaceClient;
use crate::transport::{RateLimits, RetryPolicy};

/// Default configuration filename
pub const CONFIG_FILE: &str = "conf.yml";

/// Default directory holding one document per domain
pub const CONFIG_DIR: &str = "conf.d";

/// Credentials, endpoint and limits for a run
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub user_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub customer_id: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Directory of `<domain>.yml` documents, relative to the config file
    #[serde(default = "default_conf_dir")]
    pub conf_dir: PathBuf,
    /// Domains to manage; empty means every document in `conf_dir`
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Published API request ceilings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub read_limit: usize,
    pub write_limit: usize,
    pub burst_threshold: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let limits = RateLimits::default();
        Self {
            window_secs: limits.window.as_secs(),
            read_limit: limits.read_limit,
            write_limit: limits.write_limit,
            burst_threshold: limits.burst_threshold,
        }
    }
}

impl RateLimitConfig {
    pub fn to_limits(&self) -> RateLimits {
        RateLimits {
            window: Duration::from_secs(self.window_secs),
            read_limit: self.read_limit,
            write_limit: self.write_limit,
            burst_threshold: self.burst_threshold,
        }
    }
}

/// Retry bounds, in milliseconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub transport_attempts: u32,
    pub transport_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter_ms: policy.jitter.as_millis() as u64,
            transport_attempts: policy.transport_attempts,
            transport_delay_ms: policy.transport_delay.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            transport_attempts: self.transport_attempts.max(1),
            transport_delay: Duration::from_millis(self.transport_delay_ms),
        }
    }
}

fn default_api_url() -> String {
    RackspaceClient::API_URL.to_string()
}

fn default_user_agent() -> String {
    format!("mailsync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_conf_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR)
}

fn default_timeout_secs() -> u64 {
    30
}

/// Customer numbers are often written unquoted in YAML
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

impl SyncConfig {
    /// Load the configuration
    ///
    /// Uses `path` when given, otherwise `conf.yml` from the working
    /// directory or the shared config directory. Environment overrides are
    /// applied and credentials validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = config::resolve(path.unwrap_or(Path::new(CONFIG_FILE)));
        let mut cfg = Self::from_file(&path)?;
        cfg.apply_overrides(|name| std::env::var(name).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a configuration file without overrides or validation
    ///
    /// A relative `conf_dir` is anchored at the file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut cfg: Self = config::load_yaml_file(path)?;
        if cfg.conf_dir.is_relative()
            && let Some(parent) = path.parent()
        {
            cfg.conf_dir = parent.join(&cfg.conf_dir);
        }
        Ok(cfg)
    }

    /// Replace credentials with values from `lookup` where present
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(value) = non_empty("MAILSYNC_USER_KEY") {
            self.user_key = value;
        }
        if let Some(value) = non_empty("MAILSYNC_SECRET_KEY") {
            self.secret_key = value;
        }
        if let Some(value) = non_empty("MAILSYNC_CUSTOMER_ID") {
            self.customer_id = value;
        }
    }

    /// Check that credentials are present
    pub fn validate(&self) -> Result<()> {
        if self.user_key.is_empty() {
            anyhow::bail!("user_key is not set (config file or MAILSYNC_USER_KEY)");
        }
        if self.secret_key.is_empty() {
            anyhow::bail!("secret_key is not set (config file or MAILSYNC_SECRET_KEY)");
        }
        if self.customer_id.is_empty() {
            anyhow::bail!("customer_id is not set (config file or MAILSYNC_CUSTOMER_ID)");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Domain names paired with their document paths
    pub fn domain_files(&self) -> Result<Vec<(String, PathBuf)>> {
        if !self.domains.is_empty() {
            return Ok(self
                .domains
                .iter()
                .map(|domain| {
                    let domain = domain.trim().to_lowercase();
                    let path = self.conf_dir.join(format!("{}.yml", domain));
                    (domain, path)
                })
                .collect());
        }

        let files = config::list_yaml_files(&self.conf_dir)
            .with_context(|| format!("Failed to list domains in {}", self.conf_dir.display()))?;
        Ok(files
            .into_iter()
            .filter_map(|path| {
                let domain = path.file_stem()?.to_str()?.to_lowercase();
                Some((domain, path))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults_applied() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "conf.yml",
            "user_key: abc\nsecret_key: def\ncustomer_id: 123456\n",
        );

        let cfg = SyncConfig::from_file(&path).unwrap();
        assert_eq!(cfg.customer_id, "123456");
        assert_eq!(cfg.api_url, RackspaceClient::API_URL);
        assert_eq!(cfg.conf_dir, dir.path().join("conf.d"));
        assert_eq!(cfg.timeout(), Duration::from_secs(30));

        let limits = cfg.rate_limits.to_limits();
        assert_eq!(limits.read_limit, 120);
        assert_eq!(limits.write_limit, 90);
        assert_eq!(limits.window, Duration::from_secs(60));

        let policy = cfg.retry.to_policy();
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.base_delay, Duration::from_secs(5));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "conf.yml",
            "user_key: abc\nrate_limits:\n  write_limit: 30\nretry:\n  max_attempts: 2\n",
        );

        let cfg = SyncConfig::from_file(&path).unwrap();
        assert_eq!(cfg.rate_limits.write_limit, 30);
        assert_eq!(cfg.rate_limits.read_limit, 120);
        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.retry.transport_attempts, 3);
    }

    #[test]
    fn test_env_overrides_credentials() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "conf.yml", "user_key: file-key\n");

        let mut cfg = SyncConfig::from_file(&path).unwrap();
        assert!(cfg.validate().is_err());

        let env: HashMap<&str, &str> = HashMap::from([
            ("MAILSYNC_SECRET_KEY", "env-secret"),
            ("MAILSYNC_CUSTOMER_ID", "42"),
            ("MAILSYNC_USER_KEY", " "),
        ]);
        cfg.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(cfg.user_key, "file-key");
        assert_eq!(cfg.secret_key, "env-secret");
        assert_eq!(cfg.customer_id, "42");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_domain_files_from_directory() {
        let dir = TempDir::new().unwrap();
        let conf_d = dir.path().join("conf.d");
        std::fs::create_dir(&conf_d).unwrap();
        write(&conf_d, "b.org.yml", "accounts: {}\n");
        write(&conf_d, "a.com.yml", "accounts: {}\n");
        write(&conf_d, "notes.txt", "");
        let path = write(dir.path(), "conf.yml", "user_key: k\n");

        let cfg = SyncConfig::from_file(&path).unwrap();
        let domains: Vec<String> = cfg.domain_files().unwrap().into_iter().map(|(d, _)| d).collect();
        assert_eq!(domains, vec!["a.com", "b.org"]);
    }

    #[test]
    fn test_listed_domains_win() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "conf.yml", "domains:\n  - Example.com\n");

        let cfg = SyncConfig::from_file(&path).unwrap();
        let files = cfg.domain_files().unwrap();
        assert_eq!(files, vec![("example.com".to_string(), dir.path().join("conf.d/example.com.yml"))]);
    }
}
