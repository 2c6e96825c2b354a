// Config: YAML base file plus optional local override, `${VAR:-default}` expansion.
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const CONFIG_PATH_ENV: &str = "SANDCASTLE_CONFIG_PATH";
pub const CONFIG_OVERRIDE_PATH_ENV: &str = "SANDCASTLE_CONFIG_OVERRIDE_PATH";
const DEFAULT_CONFIG_PATH: &str = "config/sandcastle.yaml";
const DEFAULT_OVERRIDE_PATH: &str = "data/config/sandcastle.override.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Returns the configured default model, falling back to the first entry by name.
    pub fn default_llm_model(&self) -> Option<(String, LlmModelConfig)> {
        let preferred = self.llm.default.trim();
        if !preferred.is_empty() {
            if let Some(model) = self.llm.models.get(preferred) {
                return Some((preferred.to_string(), model.clone()));
            }
            warn!("default llm model {preferred} is not configured");
        }
        let mut names = self.llm.models.keys().cloned().collect::<Vec<_>>();
        names.sort();
        let name = names.into_iter().next()?;
        let model = self.llm.models.get(&name)?.clone();
        Some((name, model))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    #[serde(deserialize_with = "deserialize_u16_from_any")]
    pub port: u16,
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            api_prefix: default_api_prefix(),
        }
    }
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    pub allow_origins: Option<Vec<String>>,
    pub allow_methods: Option<Vec<String>>,
    pub allow_headers: Option<Vec<String>>,
    pub allow_credentials: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub models: HashMap<String, LlmModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmModelConfig {
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub timeout_s: Option<u64>,
    #[serde(default)]
    pub max_output: Option<u32>,
    #[serde(default)]
    pub stream_include_usage: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// `remote` talks to the hosted sandbox service, `memory` keeps files in process.
    pub mode: String,
    pub api_url: String,
    pub api_key: String,
    pub domain: String,
    pub template: String,
    pub envd_port: u16,
    pub preview_port: u16,
    pub project_root: String,
    pub user: String,
    pub list_depth: u32,
    pub ignore_dirs: Vec<String>,
    pub timeout_s: u64,
    pub sandbox_timeout_s: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: "remote".to_string(),
            api_url: "https://api.e2b.dev".to_string(),
            api_key: String::new(),
            domain: "e2b.app".to_string(),
            template: "nextjs-app".to_string(),
            envd_port: 49983,
            preview_port: 3000,
            project_root: "/home/user".to_string(),
            user: "user".to_string(),
            list_depth: 99,
            ignore_dirs: ["node_modules", ".next", ".npm", ".config", "public"]
                .iter()
                .map(|item| item.to_string())
                .collect(),
            timeout_s: 30,
            sandbox_timeout_s: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_steps: usize,
    pub lease_ttl_s: f64,
    pub lease_heartbeat_s: f64,
    pub title_max_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            lease_ttl_s: 120.0,
            lease_heartbeat_s: 30.0,
            title_max_chars: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_level: String,
    /// `text` (default) or `json`.
    #[serde(default)]
    pub log_format: String,
}

fn deserialize_u16_from_any<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    struct U16Visitor;

    impl<'de> Visitor<'de> for U16Visitor {
        type Value = u16;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("u16 or numeric string")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u16::try_from(value).map_err(|_| E::custom("u16 out of range"))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if value < 0 {
                return Err(E::custom("u16 must be non-negative"));
            }
            self.visit_u64(value as u64)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(E::custom("u16 string is empty"));
            }
            trimmed
                .parse::<u16>()
                .map_err(|_| E::custom("invalid u16 string"))
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            self.visit_str(&value)
        }
    }

    deserializer.deserialize_any(U16Visitor)
}

pub fn config_path() -> String {
    env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

pub fn override_path() -> String {
    env::var(CONFIG_OVERRIDE_PATH_ENV).unwrap_or_else(|_| DEFAULT_OVERRIDE_PATH.to_string())
}

pub fn load_config() -> Config {
    load_config_from(&config_path(), &override_path())
}

pub fn load_config_from(base_path: &str, override_path: &str) -> Config {
    let mut merged = read_yaml(base_path);
    if Path::new(override_path).exists() {
        let override_value = read_yaml(override_path);
        // Null leaves keep the base value.
        merge_yaml(&mut merged, override_value);
    }

    expand_yaml_env(&mut merged);

    if merged.is_null() {
        return Config::default();
    }
    serde_yaml::from_value::<Config>(merged).unwrap_or_else(|err| {
        warn!("config parse failed, falling back to defaults: {err}");
        Config::default()
    })
}

fn read_yaml(path: &str) -> Value {
    // A missing file is allowed on first start.
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!("read config failed: {path}, {err}");
            return Value::Null;
        }
    };
    serde_yaml::from_str(&content).unwrap_or_else(|err| {
        warn!("parse yaml failed: {path}, {err}");
        Value::Null
    })
}

fn merge_yaml(base: &mut Value, override_value: Value) {
    match (base, override_value) {
        (Value::Mapping(base_map), Value::Mapping(override_map)) => {
            for (key, value) in override_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, override_value) => {
            if !override_value.is_null() {
                *base_slot = override_value;
            }
        }
    }
}

fn expand_yaml_env(value: &mut Value) {
    match value {
        Value::String(text) => {
            *text = expand_env_placeholders(text);
        }
        Value::Sequence(items) => {
            for item in items {
                expand_yaml_env(item);
            }
        }
        Value::Mapping(map) => {
            for (_, value) in map.iter_mut() {
                expand_yaml_env(value);
            }
        }
        _ => {}
    }
}

fn expand_env_placeholders(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        rest = &rest[start + 2..];
        let Some(end) = rest.find('}') else {
            output.push_str("${");
            output.push_str(rest);
            return output;
        };
        let inner = &rest[..end];
        rest = &rest[end + 1..];
        let (name, default_value) = match inner.split_once(":-") {
            Some((name, default_value)) => (name.trim(), Some(default_value)),
            None => (inner.trim(), None),
        };
        if name.is_empty() {
            output.push_str("${");
            output.push_str(inner);
            output.push('}');
            continue;
        }
        let resolved = env::var(name).ok().filter(|value| !value.is_empty());
        match (resolved, default_value) {
            (Some(value), _) => output.push_str(&value),
            (None, Some(default_value)) => output.push_str(default_value),
            (None, None) => {}
        }
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_placeholders_with_defaults() {
        std::env::remove_var("SANDCASTLE_TEST_PLACEHOLDER");
        assert_eq!(
            expand_env_placeholders("${SANDCASTLE_TEST_PLACEHOLDER:-default}"),
            "default"
        );
        assert_eq!(
            expand_env_placeholders("key-${SANDCASTLE_TEST_PLACEHOLDER:-d}-tail"),
            "key-d-tail"
        );

        std::env::set_var("SANDCASTLE_TEST_PLACEHOLDER", "value");
        assert_eq!(
            expand_env_placeholders("${SANDCASTLE_TEST_PLACEHOLDER:-default}"),
            "value"
        );

        std::env::remove_var("SANDCASTLE_TEST_PLACEHOLDER");
        assert_eq!(expand_env_placeholders("${SANDCASTLE_TEST_PLACEHOLDER}"), "");
        assert_eq!(expand_env_placeholders("${unterminated"), "${unterminated");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config_from("/nonexistent/sandcastle.yaml", "/nonexistent/o.yaml");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.api_prefix, "/api");
        assert_eq!(config.generation.max_steps, 10);
        assert_eq!(config.sandbox.preview_port, 3000);
        assert_eq!(config.sandbox.template, "nextjs-app");
    }

    #[test]
    fn override_file_merges_over_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path().join("base.yaml");
        let overlay = dir.path().join("override.yaml");
        fs::write(
            &base,
            "server:\n  host: 127.0.0.1\n  port: \"9000\"\nsandbox:\n  mode: memory\n  preview_port: 4000\n",
        )
        .expect("write base");
        fs::write(&overlay, "sandbox:\n  preview_port: 5173\n").expect("write override");

        let config = load_config_from(
            base.to_str().unwrap_or_default(),
            overlay.to_str().unwrap_or_default(),
        );
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.sandbox.mode, "memory");
        assert_eq!(config.sandbox.preview_port, 5173);
        assert_eq!(config.sandbox.domain, "e2b.app");
    }

    #[test]
    fn default_model_prefers_named_entry() {
        let mut config = Config::default();
        config.llm.models.insert(
            "b".to_string(),
            LlmModelConfig {
                model: Some("b-model".to_string()),
                ..Default::default()
            },
        );
        config.llm.models.insert(
            "a".to_string(),
            LlmModelConfig {
                model: Some("a-model".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(config.default_llm_model().map(|(name, _)| name), Some("a".to_string()));
        config.llm.default = "b".to_string();
        assert_eq!(config.default_llm_model().map(|(name, _)| name), Some("b".to_string()));
    }
}
