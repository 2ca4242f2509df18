use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

// ─── Gateway ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway port (default: 8080)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 127.0.0.1 — production sits behind a proxy)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Allowed CORS origins (empty: no CORS layer)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            cors_origins: Vec::new(),
        }
    }
}

// ─── Webhook intake ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared HMAC secret. Serving refuses to start without it.
    #[serde(default)]
    pub secret: Option<String>,
    /// Allowed clock skew between `X-Timestamp` and receipt time
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: i64,
    /// Maximum accepted request body (default: 1 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// How long an accepted webhook id blocks duplicate deliveries
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: i64,
    /// Scheduling delay for high-priority events (conversation lifecycle)
    #[serde(default = "default_high_priority_delay_secs")]
    pub high_priority_delay_secs: i64,
    /// Scheduling delay for normal-priority events (messages), allows batching
    #[serde(default = "default_normal_priority_delay_secs")]
    pub normal_priority_delay_secs: i64,
}

fn default_tolerance_secs() -> i64 {
    300
}

fn default_max_body_bytes() -> usize {
    1_048_576
}

fn default_idempotency_ttl_secs() -> i64 {
    86_400
}

fn default_high_priority_delay_secs() -> i64 {
    1
}

fn default_normal_priority_delay_secs() -> i64 {
    5
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            tolerance_secs: default_tolerance_secs(),
            max_body_bytes: default_max_body_bytes(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            high_priority_delay_secs: default_high_priority_delay_secs(),
            normal_priority_delay_secs: default_normal_priority_delay_secs(),
        }
    }
}

// ─── Queue / executor ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Total attempts before a transiently-failing job is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff schedule in seconds, indexed by attempt; the last entry repeats
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<i64>,
    /// Concurrent executor workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Worker poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-attempt timeout; expiry counts as a transient failure
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Maximum pending jobs per queue before intake refuses new work
    #[serde(default = "default_pending_cap")]
    pub pending_cap: usize,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_secs() -> Vec<i64> {
    vec![60, 120, 300, 600, 1800]
}

fn default_workers() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_attempt_timeout_secs() -> u64 {
    90
}

fn default_pending_cap() -> usize {
    10_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            pending_cap: default_pending_cap(),
        }
    }
}

// ─── Security / anomaly detection ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Duration of a temporary IP block after critical escalation
    #[serde(default = "default_block_secs")]
    pub block_secs: i64,
}

fn default_block_secs() -> i64 {
    3600
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            block_secs: default_block_secs(),
        }
    }
}

// ─── Collaborators ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    pub base_url: String,
    pub api_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_token: String,
}

// ─── Top-level config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub crm: Option<CrmConfig>,
    #[serde(default)]
    pub chat: Option<ChatConfig>,

    /// Where runtime state (the dead-letter db) lives. Not read from the file.
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Config {
    /// Load the config file, creating a default one on first run.
    pub fn load_or_init(path: Option<&Path>) -> Result<Self> {
        let (config_path, workspace_dir) = resolve_paths(path)?;

        if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)
                .with_context(|| format!("read config: {}", config_path.display()))?;
            let mut config: Self = toml::from_str(&raw)
                .with_context(|| format!("parse config: {}", config_path.display()))?;
            config.config_path = config_path;
            config.workspace_dir = workspace_dir;
            return Ok(config);
        }

        let config = Self {
            config_path: config_path.clone(),
            workspace_dir,
            ..Self::default()
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create config directory: {}", parent.display()))?;
        }
        let rendered = toml::to_string_pretty(&config).context("serialize default config")?;
        std::fs::write(&config_path, rendered)
            .with_context(|| format!("write default config: {}", config_path.display()))?;
        tracing::info!(path = %config_path.display(), "wrote default config");

        Ok(config)
    }

    /// Serving requires a webhook secret and both collaborator endpoints.
    /// Misconfiguration is surfaced here, loudly, never per-request.
    pub fn validate_for_serve(&self) -> std::result::Result<(), ConfigError> {
        let secret_ok = self
            .webhook
            .secret
            .as_deref()
            .is_some_and(|secret| !secret.trim().is_empty());
        if !secret_ok {
            return Err(ConfigError::Validation(
                "webhook.secret is required — refusing to accept unsigned deliveries".into(),
            ));
        }
        if self.crm.is_none() {
            return Err(ConfigError::Validation(
                "crm.base_url / crm.api_token are required to serve".into(),
            ));
        }
        if self.chat.is_none() {
            return Err(ConfigError::Validation(
                "chat.base_url / chat.api_token are required to serve".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_paths(explicit: Option<&Path>) -> Result<(PathBuf, PathBuf)> {
    if let Some(path) = explicit {
        let workspace = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        return Ok((path.to_path_buf(), workspace));
    }

    let dirs = directories::ProjectDirs::from("", "", "crmbridge")
        .context("resolve platform config directory")?;
    Ok((
        dirs.config_dir().join("config.toml"),
        dirs.data_dir().to_path_buf(),
    ))
}
