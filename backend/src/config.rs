use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const CONFIG_FILE_VAR: &str = "NEUROSCAN_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub demo_mode: bool,
    pub demo_latency_ms: u64,
    pub model_path: PathBuf,
    pub converted_model_path: PathBuf,
    pub openrouter_api_key: Option<String>,
    pub chat_api_url: String,
    pub chat_model: String,
    pub chat_timeout_secs: u64,
    pub max_payload_bytes: usize,
    pub static_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            demo_mode: false,
            demo_latency_ms: 500,
            model_path: PathBuf::from("model.h5"),
            converted_model_path: PathBuf::from("model_converted.pt"),
            openrouter_api_key: None,
            chat_api_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            chat_model: "nvidia/nemotron-nano-9b-v2:free".to_string(),
            chat_timeout_secs: 30,
            max_payload_bytes: 16 * 1024 * 1024,
            static_dir: None,
        }
    }
}

impl Settings {
    /// Defaults, then the YAML file named by `NEUROSCAN_CONFIG`, then the
    /// process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = match lookup(CONFIG_FILE_VAR) {
            Some(path) if !path.trim().is_empty() => Self::from_yaml_file(&path)?,
            _ => Self::default(),
        };
        base.with_overrides(lookup)
    }

    pub fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.port = parse_var("PORT", v)?;
        }
        if let Some(v) = lookup("DEMO_MODE") {
            self.demo_mode = v.trim().eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("DEMO_LATENCY_MS") {
            self.demo_latency_ms = parse_var("DEMO_LATENCY_MS", v)?;
        }
        if let Some(v) = lookup("MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CONVERTED_MODEL_PATH") {
            self.converted_model_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("OPENROUTER_API_KEY") {
            self.openrouter_api_key = Some(v);
        }
        if let Some(v) = lookup("OPENROUTER_API_URL") {
            self.chat_api_url = v;
        }
        if let Some(v) = lookup("OPENROUTER_MODEL") {
            self.chat_model = v;
        }
        if let Some(v) = lookup("CHAT_TIMEOUT_SECS") {
            self.chat_timeout_secs = parse_var("CHAT_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("MAX_PAYLOAD_BYTES") {
            self.max_payload_bytes = parse_var("MAX_PAYLOAD_BYTES", v)?;
        }
        if let Some(v) = lookup("STATIC_DIR") {
            self.static_dir = Some(PathBuf::from(v));
        }

        // An empty key counts as unset.
        self.openrouter_api_key = self
            .openrouter_api_key
            .filter(|key| !key.trim().is_empty());

        Ok(self)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn demo_latency(&self) -> Duration {
        Duration::from_millis(self.demo_latency_ms)
    }

    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_secs)
    }

    pub fn chatbot_configured(&self) -> bool {
        self.openrouter_api_key.is_some()
    }
}

fn parse_var<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}
