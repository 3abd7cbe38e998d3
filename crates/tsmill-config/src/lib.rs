//! Configuration management for tsmill
//!
//! Configuration is layered with figment, lowest priority first:
//!
//! 1. Built-in defaults ([`AppConfig::default`])
//! 2. `<project root>/.tsmill/config.toml`
//! 3. Environment variables prefixed `TSMILL_`, nested keys split on `__`
//!    (e.g. `TSMILL_READINESS__TIMEOUT_MS=10000`)

pub mod logging;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tsmill_foundation::{TsMillError, TsMillResult};

/// Relative location of the project-level config file
pub const CONFIG_FILE: &str = ".tsmill/config.toml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "TSMILL_";

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub tsserver: TsServerConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How to launch and talk to tsserver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsServerConfig {
    /// Command and arguments used to spawn tsserver
    pub command: Vec<String>,
    /// Hard timeout for a single request
    pub request_timeout_ms: u64,
    /// User preferences sent with the initial `configure` request
    pub preferences: serde_json::Value,
    /// Format options sent with the initial `configure` request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_options: Option<serde_json::Value>,
}

impl Default for TsServerConfig {
    fn default() -> Self {
        Self {
            command: vec!["npx".to_string(), "tsserver".to_string()],
            request_timeout_ms: 30_000,
            preferences: serde_json::json!({
                "providePrefixAndSuffixTextForRename": true,
                "allowRenameOfImportPath": true,
                "includePackageJsonAutoImports": "auto"
            }),
            format_options: None,
        }
    }
}

impl TsServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Bounds for the readiness wait before semantic requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            poll_interval_ms: 100,
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Bounds and filters for dependent-file discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Attempts at asking tsserver for referencing files before falling back
    pub max_reference_attempts: u32,
    pub attempt_interval_ms: u64,
    /// Wall-clock limit for the fallback filesystem walk
    pub scan_timeout_ms: u64,
    /// Directory names never descended into
    pub skip_dirs: Vec<String>,
    /// Source file extensions considered by the walk
    pub extensions: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_reference_attempts: 30,
            attempt_interval_ms: 100,
            scan_timeout_ms: 5_000,
            skip_dirs: ["node_modules", "dist", "build", "out", "coverage"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extensions: ["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DiscoveryConfig {
    pub fn attempt_interval(&self) -> Duration {
        Duration::from_millis(self.attempt_interval_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format for development
    #[default]
    Pretty,
    /// Structured JSON format for production
    Json,
}

impl AppConfig {
    /// Load configuration for a project rooted at `project_root`
    pub fn load(project_root: &Path) -> TsMillResult<Self> {
        Self::figment(project_root)
            .extract::<AppConfig>()
            .map_err(|e| TsMillError::config(e.to_string()))
            .and_then(|config| {
                config.validate()?;
                Ok(config)
            })
    }

    /// The layered figment used by [`AppConfig::load`]
    pub fn figment(project_root: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(Self::config_path(project_root)))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(CONFIG_FILE)
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> TsMillResult<()> {
        if self.tsserver.command.is_empty() {
            return Err(TsMillError::config("tsserver.command cannot be empty"));
        }
        if self.tsserver.request_timeout_ms == 0 {
            return Err(TsMillError::config(
                "tsserver.request_timeout_ms must be greater than zero",
            ));
        }
        if self.readiness.poll_interval_ms == 0 {
            return Err(TsMillError::config(
                "readiness.poll_interval_ms must be greater than zero",
            ));
        }
        if self.discovery.scan_timeout_ms == 0 {
            return Err(TsMillError::config(
                "discovery.scan_timeout_ms must be greater than zero",
            ));
        }
        Ok(())
    }
}
