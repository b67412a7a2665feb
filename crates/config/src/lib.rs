use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_tool_iterations: u32,
    pub max_wallclock_seconds: u64,
    pub max_depth: u32,
    pub workspace_root: String,
    pub tool_output_max_bytes: usize,
    pub webfetch_max_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 6,
            max_wallclock_seconds: 120,
            max_depth: 2,
            workspace_root: "/work".to_string(),
            tool_output_max_bytes: 16384,
            webfetch_max_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthKeyConfig {
    pub key: String,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_tenant() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_keys: Vec<AuthKeyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { enabled: false, requests_per_minute: 120, burst: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub request_timeout_seconds: f64,
    pub max_retries: u32,
    pub backoff_seconds: f64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self { request_timeout_seconds: 120.0, max_retries: 2, backoff_seconds: 0.5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlmRuntimeConfig {
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

fn default_environment() -> String {
    "docker".to_string()
}
fn default_max_iterations() -> u32 {
    10
}
fn default_max_depth() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpointConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

fn default_provider() -> String {
    "ollama".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub generator: ModelEndpointConfig,
    pub tool_compiler: ModelEndpointConfig,
    #[serde(default)]
    pub code_interpreter: Option<ModelEndpointConfig>,
    #[serde(default)]
    pub vision: Option<ModelEndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlmConfig {
    pub rants_one: RlmRuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { db_path: "/work/rants.redb".to_string() }
    }
}

/// Top-level application configuration, loaded from YAML with `RANTS_`
/// environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    pub rlm: RlmConfig,
    pub models: ModelCatalog,
    #[serde(default)]
    pub state: StateConfig,
}

const ENV_PREFIX: &str = "RANTS_";
const NESTED_DELIMITER: &str = "__";

impl AppConfig {
    /// Load from a YAML file at `path`, then apply `RANTS_`-prefixed
    /// environment variable overrides (nested keys joined by `__`, e.g.
    /// `RANTS_STATE__DB_PATH`).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut value: serde_yaml::Value =
            serde_yaml::from_str(&raw).context("parsing config YAML")?;
        apply_env_overrides(&mut value, ENV_PREFIX, NESTED_DELIMITER);
        serde_yaml::from_value(value).context("validating config against schema")
    }
}

/// Walk `env::vars()` for names starting with `prefix`, split the remainder
/// on `delimiter`, and set the corresponding nested path inside `value`
/// (creating intermediate mappings as needed). Leaf values are parsed as YAML
/// scalars so booleans/numbers round-trip, falling back to a plain string.
fn apply_env_overrides(value: &mut serde_yaml::Value, prefix: &str, delimiter: &str) {
    if !value.is_mapping() {
        *value = serde_yaml::Value::Mapping(Default::default());
    }
    let overrides: BTreeMap<String, String> = std::env::vars()
        .filter(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k[prefix.len()..].to_string(), v))
        .collect();

    for (key, raw) in overrides {
        let path: Vec<String> = key.split(delimiter).map(|s| s.to_lowercase()).collect();
        if path.is_empty() {
            continue;
        }
        set_nested(value, &path, raw);
    }
}

fn set_nested(root: &mut serde_yaml::Value, path: &[String], raw: String) {
    let serde_yaml::Value::Mapping(map) = root else { return };
    let key = serde_yaml::Value::String(path[0].clone());
    if path.len() == 1 {
        let parsed = serde_yaml::from_str(&raw).unwrap_or(serde_yaml::Value::String(raw));
        map.insert(key, parsed);
        return;
    }
    let entry = map
        .entry(key)
        .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
    if !entry.is_mapping() {
        *entry = serde_yaml::Value::Mapping(Default::default());
    }
    set_nested(entry, &path[1..], raw);
}
