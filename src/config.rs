//! Process configuration read from the environment.
//!
//! Required:
//! - `ADMIN_API_URL`: state store gateway endpoint
//! - `ADMIN_API_SECRET`: bearer secret for the gateway
//! - `CLAUDE_API_KEY`: LLM API key
//!
//! Optional (defaults in parentheses): `CLAUDE_MODEL`, `PROMPTS_DIR` (`prompts`),
//! `LEARNINGS_DIR` (`memory/learnings`), `MAX_TOOL_CALLS` (100),
//! `MAX_OUTPUT_TOKENS` (8192), `UNIT_CONCURRENCY` (1), `LLM_TIMEOUT_SECS` (300),
//! `STORE_TIMEOUT_SECS` (30), `QUALITY_THRESHOLD` (0.80).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(String),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: String, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub admin_api_url: String,
    pub admin_api_secret: String,
    pub claude_api_key: String,
    pub default_model: String,
    pub prompts_dir: PathBuf,
    pub learnings_dir: PathBuf,
    pub max_tool_calls: u32,
    pub max_output_tokens: u32,
    pub unit_concurrency: usize,
    pub llm_timeout: Duration,
    pub store_timeout: Duration,
    pub quality_threshold: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);
        let config = Self {
            admin_api_url: vars.required("ADMIN_API_URL")?,
            admin_api_secret: vars.required("ADMIN_API_SECRET")?,
            claude_api_key: vars.required("CLAUDE_API_KEY")?,
            default_model: vars.get("CLAUDE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            prompts_dir: prompts_dir_from(&lookup),
            learnings_dir: vars
                .get("LEARNINGS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("memory/learnings")),
            max_tool_calls: vars.parsed("MAX_TOOL_CALLS", 100)?,
            max_output_tokens: vars.parsed("MAX_OUTPUT_TOKENS", 8192)?,
            unit_concurrency: vars.parsed("UNIT_CONCURRENCY", 1)?,
            llm_timeout: Duration::from_secs(vars.parsed("LLM_TIMEOUT_SECS", 300)?),
            store_timeout: Duration::from_secs(vars.parsed("STORE_TIMEOUT_SECS", 30)?),
            quality_threshold: vars.parsed("QUALITY_THRESHOLD", 0.80)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tool_calls == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_TOOL_CALLS".into(),
                value: "0".into(),
            });
        }
        if self.unit_concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "UNIT_CONCURRENCY".into(),
                value: "0".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(ConfigError::Invalid {
                name: "QUALITY_THRESHOLD".into(),
                value: self.quality_threshold.to_string(),
            });
        }
        Ok(())
    }
}

/// `PROMPTS_DIR` alone, for commands that need no credentials.
pub fn prompts_dir() -> PathBuf {
    prompts_dir_from(&|name: &str| std::env::var(name).ok())
}

fn prompts_dir_from(lookup: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    lookup("PROMPTS_DIR")
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("prompts"))
}

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    /// Set and non-blank.
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::Missing(name.to_string()))
    }

    fn parsed<T: FromStr>(&self, name: &str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: name.to_string(),
                value,
            }),
        }
    }
}
