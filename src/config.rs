//! Configuration management for the bouncer.
//!
//! Values come from an optional YAML file, then environment variables
//! override them, then the result is validated once and treated as
//! immutable for the rest of the process.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::Level;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::validation::{parse_interval, validate_endpoint};

/// Secure string type that zeroizes memory on drop
/// Used for sensitive data like API keys and passwords
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Firewall controller settings
    pub unifi: UnifiConfig,

    /// Decision stream settings
    pub crowdsec: CrowdsecConfig,

    /// Quiet period after the last decision before reconciling
    pub debounce: String,

    /// Delay before the first reconciliation after startup
    pub startup_delay: String,

    /// Delay before retrying a reconciliation pass that had failures
    pub retry_interval: String,

    /// Capacity of the decision channel between stream and event loop
    pub channel_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unifi: UnifiConfig::default(),
            crowdsec: CrowdsecConfig::default(),
            debounce: "1s".to_string(),
            startup_delay: "10s".to_string(),
            retry_interval: "30s".to_string(),
            channel_capacity: 16,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnifiConfig {
    pub host: String,
    pub username: String,
    /// Password can be set directly or via UNIFI_PASS env var
    pub password: SecureString,
    /// API key can be set directly or via UNIFI_API_KEY env var
    pub api_key: SecureString,
    pub site: String,
    pub skip_tls_verify: bool,
    /// Maximum number of addresses per firewall group
    pub max_group_size: usize,
    /// Handle IPv6 decisions
    pub ipv6: bool,
    /// Source zones for zone-based policies
    pub zone_src: Vec<String>,
    /// Destination zones for zone-based policies
    pub zone_dst: Vec<String>,
    pub ipv4_start_rule_index: u32,
    pub ipv6_start_rule_index: u32,
    /// Enable logging on created rules and policies
    pub logging: bool,
}

impl Default for UnifiConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password: SecureString::default(),
            api_key: SecureString::default(),
            site: "default".to_string(),
            skip_tls_verify: false,
            max_group_size: 10000,
            ipv6: true,
            zone_src: vec!["External".to_string()],
            zone_dst: vec![
                "Internal".to_string(),
                "Vpn".to_string(),
                "Hotspot".to_string(),
            ],
            ipv4_start_rule_index: 22000,
            ipv6_start_rule_index: 27000,
            logging: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrowdsecConfig {
    pub url: String,
    /// Bouncer API key, usually provided via CROWDSEC_BOUNCER_API_KEY
    pub api_key: SecureString,
    pub update_interval: String,
    /// Only accept decisions from these origins (empty = all)
    pub origins: Vec<String>,
}

impl Default for CrowdsecConfig {
    fn default() -> Self {
        Self {
            url: "http://crowdsec:8080/".to_string(),
            api_key: SecureString::default(),
            update_interval: "5s".to_string(),
            origins: Vec::new(),
        }
    }
}

/// Immutable engine parameters derived from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub max_group_size: usize,
    pub use_ipv6: bool,
    pub zone_src: Vec<String>,
    pub zone_dst: Vec<String>,
    pub ipv4_start_rule_index: u32,
    pub ipv6_start_rule_index: u32,
    pub logging: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        UnifiConfig::default().engine_settings()
    }
}

impl UnifiConfig {
    fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_group_size: self.max_group_size,
            use_ipv6: self.ipv6,
            zone_src: self.zone_src.clone(),
            zone_dst: self.zone_dst.clone(),
            ipv4_start_rule_index: self.ipv4_start_rule_index,
            ipv6_start_rule_index: self.ipv6_start_rule_index,
            logging: self.logging,
        }
    }
}

/// Timing values parsed from the interval strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub debounce: Duration,
    pub startup_delay: Duration,
    pub retry_interval: Duration,
    pub update_interval: Duration,
}

impl Config {
    /// Load configuration from an optional YAML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML file without environment overlay or validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))
    }

    /// Override values with environment variables looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("UNIFI_HOST") {
            self.unifi.host = v;
        }
        if let Some(v) = lookup("UNIFI_USER") {
            self.unifi.username = v;
        }
        if let Some(v) = lookup("UNIFI_PASS") {
            self.unifi.password = SecureString::new(v);
        }
        if let Some(v) = lookup("UNIFI_API_KEY") {
            self.unifi.api_key = SecureString::new(v);
        }
        if let Some(v) = lookup("UNIFI_SITE") {
            self.unifi.site = v;
        }
        if let Some(v) = lookup("UNIFI_SKIP_TLS_VERIFY") {
            self.unifi.skip_tls_verify = parse_bool("UNIFI_SKIP_TLS_VERIFY", &v)?;
        }
        if let Some(v) = lookup("UNIFI_MAX_GROUP_SIZE") {
            self.unifi.max_group_size = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid UNIFI_MAX_GROUP_SIZE: {}", v))?;
        }
        if let Some(v) = lookup("UNIFI_IPV6") {
            self.unifi.ipv6 = parse_bool("UNIFI_IPV6", &v)?;
        }
        if let Some(v) = lookup("UNIFI_ZONE_SRC") {
            self.unifi.zone_src = parse_list(&v);
        }
        if let Some(v) = lookup("UNIFI_ZONE_DST") {
            self.unifi.zone_dst = parse_list(&v);
        }
        if let Some(v) = lookup("UNIFI_IPV4_START_RULE_INDEX") {
            self.unifi.ipv4_start_rule_index = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid UNIFI_IPV4_START_RULE_INDEX: {}", v))?;
        }
        if let Some(v) = lookup("UNIFI_IPV6_START_RULE_INDEX") {
            self.unifi.ipv6_start_rule_index = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid UNIFI_IPV6_START_RULE_INDEX: {}", v))?;
        }
        if let Some(v) = lookup("UNIFI_LOGGING") {
            self.unifi.logging = parse_bool("UNIFI_LOGGING", &v)?;
        }
        if let Some(v) = lookup("CROWDSEC_URL") {
            self.crowdsec.url = v;
        }
        if let Some(v) = lookup("CROWDSEC_BOUNCER_API_KEY") {
            self.crowdsec.api_key = SecureString::new(v);
        }
        if let Some(v) = lookup("CROWDSEC_UPDATE_INTERVAL") {
            self.crowdsec.update_interval = v;
        }
        if let Some(v) = lookup("CROWDSEC_ORIGINS") {
            self.crowdsec.origins = parse_list(&v);
        }
        if let Some(v) = lookup("BOUNCER_DEBOUNCE") {
            self.debounce = v;
        }
        if let Some(v) = lookup("BOUNCER_STARTUP_DELAY") {
            self.startup_delay = v;
        }
        if let Some(v) = lookup("BOUNCER_RETRY_INTERVAL") {
            self.retry_interval = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        validate_endpoint("unifi.host", &self.unifi.host)?;
        validate_endpoint("crowdsec.url", &self.crowdsec.url)?;

        if self.unifi.api_key.is_empty()
            && (self.unifi.username.is_empty() || self.unifi.password.is_empty())
        {
            bail!("Either unifi.api_key or unifi.username and unifi.password must be set");
        }

        if self.crowdsec.api_key.is_empty() {
            bail!("crowdsec.api_key (CROWDSEC_BOUNCER_API_KEY) must be set");
        }

        if self.unifi.max_group_size == 0 {
            bail!("unifi.max_group_size must be a positive integer");
        }

        if self.unifi.site.is_empty() {
            bail!("unifi.site cannot be empty");
        }

        if self.channel_capacity == 0 {
            bail!("channel_capacity must be a positive integer");
        }

        self.timings()?;
        self.tracing_level()?;
        Ok(())
    }

    /// Parsed `log_level`.
    pub fn tracing_level(&self) -> Result<Level> {
        self.log_level
            .parse()
            .with_context(|| format!("Invalid log_level: {}", self.log_level))
    }

    /// Parse all interval settings.
    pub fn timings(&self) -> Result<Timings> {
        Ok(Timings {
            debounce: parse_interval(&self.debounce).context("debounce")?,
            startup_delay: parse_interval(&self.startup_delay).context("startup_delay")?,
            retry_interval: parse_interval(&self.retry_interval).context("retry_interval")?,
            update_interval: parse_interval(&self.crowdsec.update_interval)
                .context("crowdsec.update_interval")?,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        self.unifi.engine_settings()
    }

    /// Render the configuration as YAML with secrets redacted.
    pub fn redacted_yaml(&self) -> Result<String> {
        let mut copy = self.clone();
        for secret in [
            &mut copy.unifi.password,
            &mut copy.unifi.api_key,
            &mut copy.crowdsec.api_key,
        ] {
            if !secret.is_empty() {
                *secret = SecureString::from("[REDACTED]");
            }
        }
        serde_yaml::to_string(&copy).context("Failed to serialize config")
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("Invalid boolean for {}: {}", key, other),
    }
}

/// Split a space or comma separated list, dropping empty items.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
