//! Service configuration.
//!
//! Settings come from a TOML file or from the environment (the variable
//! names the deployment already uses: `CTFD_URL`, `CONTAINER_IMAGE`, ...).
//! All values are read once at startup and are immutable for the process
//! lifetime; the lifecycle manager receives a digested copy at construction.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Longest accepted container TTL, one year in hours. Values past this
/// would overflow the expiry timestamp arithmetic.
const MAX_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the CTFd instance used for token validation.
    pub ctfd_url: String,

    /// Public base URL webshells are reachable under; the reverse proxy
    /// routes `<base>/<team>` to the team's container.
    pub webshell_base_url: String,

    /// Shared secret for the admin endpoints (`X-API-Secret` header).
    pub api_secret: String,

    /// Dedicated bridge network every webshell container joins.
    #[serde(default = "default_network_name")]
    pub network_name: String,

    /// Image every webshell container runs.
    #[serde(default = "default_image")]
    pub image: String,

    /// Memory limit in docker notation (`512m`, `1g`, plain bytes).
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    /// CPU limit as a fraction of one core.
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,

    /// Hours until a container becomes eligible for reclamation.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,

    /// HTTP listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Minutes between automatic expiry sweeps; 0 disables the background
    /// sweep (cleanup then only runs via the admin endpoint).
    #[serde(default)]
    pub cleanup_interval_minutes: u64,
}

fn default_network_name() -> String {
    "webshell-network".to_string()
}

fn default_image() -> String {
    "webshell-instance:latest".to_string()
}

fn default_memory_limit() -> String {
    "512m".to_string()
}

fn default_cpu_limit() -> f64 {
    0.5
}

fn default_ttl_hours() -> i64 {
    24
}

fn default_port() -> u16 {
    5000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            ctfd_url: String::new(),
            webshell_base_url: String::new(),
            api_secret: String::new(),
            network_name: default_network_name(),
            image: default_image(),
            memory_limit: default_memory_limit(),
            cpu_limit: default_cpu_limit(),
            ttl_hours: default_ttl_hours(),
            port: default_port(),
            cleanup_interval_minutes: 0,
        }
    }
}

impl ServiceConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("CTFD_URL") {
            config.ctfd_url = url;
        }
        if let Ok(url) = std::env::var("WEBSHELL_BASE_URL") {
            config.webshell_base_url = url;
        }
        if let Ok(secret) = std::env::var("API_SECRET") {
            config.api_secret = secret;
        }
        if let Ok(network) = std::env::var("CONTAINER_NETWORK") {
            config.network_name = network;
        }
        if let Ok(image) = std::env::var("CONTAINER_IMAGE") {
            config.image = image;
        }
        if let Ok(limit) = std::env::var("CONTAINER_MEMORY_LIMIT") {
            config.memory_limit = limit;
        }
        if let Ok(limit) = std::env::var("CONTAINER_CPU_LIMIT") {
            config.cpu_limit = limit.parse()?;
        }
        if let Ok(hours) = std::env::var("CONTAINER_TIMEOUT_HOURS") {
            config.ttl_hours = hours.parse()?;
        }
        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse()?;
        }
        if let Ok(minutes) = std::env::var("CLEANUP_INTERVAL_MINUTES") {
            config.cleanup_interval_minutes = minutes.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ctfd_url.trim().is_empty() {
            anyhow::bail!("ctfd_url is required; set CTFD_URL");
        }
        if self.webshell_base_url.trim().is_empty() {
            anyhow::bail!("webshell_base_url is required; set WEBSHELL_BASE_URL");
        }
        if self.api_secret.trim().is_empty() {
            anyhow::bail!("api_secret is required; set API_SECRET");
        }
        if !(self.cpu_limit > 0.0) || self.cpu_limit > 16.0 {
            anyhow::bail!("cpu_limit must be within (0, 16], got {}", self.cpu_limit);
        }
        if self.ttl_hours < 1 || self.ttl_hours > MAX_TTL_HOURS {
            anyhow::bail!(
                "ttl_hours must be within [1, {}], got {}",
                MAX_TTL_HOURS,
                self.ttl_hours
            );
        }
        if parse_memory_limit(&self.memory_limit).is_none() {
            anyhow::bail!("memory_limit `{}` is not a valid size", self.memory_limit);
        }
        Ok(())
    }

    /// Memory limit in bytes. `None` only before validation has run.
    pub fn memory_limit_bytes(&self) -> Option<i64> {
        parse_memory_limit(&self.memory_limit)
    }

    /// CFS quota matching the configured CPU fraction over a 100ms period.
    pub fn cpu_quota(&self) -> i64 {
        (self.cpu_limit * 100_000.0) as i64
    }

    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours)
    }

    /// Background sweep interval, or `None` when disabled.
    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_minutes > 0)
            .then(|| Duration::from_secs(self.cleanup_interval_minutes * 60))
    }
}

/// Parse a docker-style memory size (`512m`, `1g`, `256k`, `1048576`,
/// optionally with a trailing `b`). Returns bytes, or `None` when the
/// value is malformed or not positive.
pub fn parse_memory_limit(value: &str) -> Option<i64> {
    let lowered = value.trim().to_ascii_lowercase();
    let v = lowered.strip_suffix('b').unwrap_or(&lowered);
    let (digits, multiplier) = match v.chars().last()? {
        'k' => (&v[..v.len() - 1], 1024i64),
        'm' => (&v[..v.len() - 1], 1024 * 1024),
        'g' => (&v[..v.len() - 1], 1024 * 1024 * 1024),
        c if c.is_ascii_digit() => (v, 1),
        _ => return None,
    };
    let amount: i64 = digits.parse().ok()?;
    if amount <= 0 {
        return None;
    }
    amount.checked_mul(multiplier)
}
