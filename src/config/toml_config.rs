use crate::utils::error::{FetchError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchKitConfig {
    pub client: ClientConfig,
    pub retry: RetryConfig,
    pub debounce: DebounceConfig,
    pub throttle: ThrottleConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub timeout_ms: u64,
    pub user_agent: String,
    pub idempotency_header: String,
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 10_000,
            user_agent: format!("fetchkit/{}", env!("CARGO_PKG_VERSION")),
            idempotency_header: DEFAULT_IDEMPOTENCY_HEADER.to_string(),
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub delay_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { delay_ms: 300 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { interval_ms: 1_000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbose: bool,
    pub json: bool,
}

impl FetchKitConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(FetchError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// Parses the document, then replaces `${VAR}` placeholders inside string
    /// values with environment values. Comments and keys are left alone.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table =
            toml::from_str(content).map_err(|e| FetchError::ConfigValidationError {
                field: "toml_parsing".to_string(),
                message: format!("TOML parsing error: {}", e),
            })?;

        let mut document = toml::Value::Table(table);
        Self::substitute_env_vars(&mut document)?;

        document
            .try_into()
            .map_err(|e| FetchError::ConfigValidationError {
                field: "toml_parsing".to_string(),
                message: format!("TOML parsing error: {}", e),
            })
    }

    fn substitute_env_vars(document: &mut toml::Value) -> Result<()> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").map_err(|e| {
            FetchError::ConfigError {
                message: format!("invalid placeholder pattern: {}", e),
            }
        })?;

        let mut missing = Vec::new();
        substitute_in_value(document, &re, &mut missing);

        if !missing.is_empty() {
            return Err(FetchError::ConfigValidationError {
                field: "environment".to_string(),
                message: format!("unset environment variables: {}", missing.join(", ")),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.client.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry.delay_ms)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce.delay_ms)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle.interval_ms)
    }

    /// Joins `path` onto `client.base_url`. Absolute URLs pass through.
    pub fn resolve_url(&self, path: &str) -> Result<String> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_string());
        }

        let base = self
            .client
            .base_url
            .as_deref()
            .ok_or_else(|| FetchError::MissingConfigError {
                field: "client.base_url".to_string(),
            })?;

        let base = url::Url::parse(base).map_err(|e| FetchError::InvalidConfigValueError {
            field: "client.base_url".to_string(),
            value: base.to_string(),
            reason: format!("Invalid URL format: {}", e),
        })?;

        base.join(path)
            .map(String::from)
            .map_err(|e| FetchError::InvalidConfigValueError {
                field: "url".to_string(),
                value: path.to_string(),
                reason: e.to_string(),
            })
    }
}

fn substitute_in_value(value: &mut toml::Value, re: &regex::Regex, missing: &mut Vec<String>) {
    match value {
        toml::Value::String(text) => {
            let replaced = re
                .replace_all(text, |caps: &regex::Captures| {
                    let var_name = &caps[1];
                    std::env::var(var_name).unwrap_or_else(|_| {
                        missing.push(var_name.to_string());
                        String::new()
                    })
                })
                .into_owned();
            *text = replaced;
        }
        toml::Value::Array(items) => {
            for item in items {
                substitute_in_value(item, re, missing);
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                substitute_in_value(item, re, missing);
            }
        }
        _ => {}
    }
}

impl Validate for FetchKitConfig {
    fn validate(&self) -> Result<()> {
        if let Some(base_url) = &self.client.base_url {
            validation::validate_url("client.base_url", base_url)?;
        }
        validation::validate_range("client.timeout_ms", self.client.timeout_ms, 1, 600_000)?;
        validation::validate_non_empty_string("client.user_agent", &self.client.user_agent)?;
        validation::validate_header_name(
            "client.idempotency_header",
            &self.client.idempotency_header,
        )?;
        for name in self.client.headers.keys() {
            validation::validate_header_name("client.headers", name)?;
        }
        validation::validate_range("retry.attempts", self.retry.attempts, 0, 10)?;
        validation::validate_range("retry.delay_ms", self.retry.delay_ms, 0, 60_000)?;
        Ok(())
    }
}
