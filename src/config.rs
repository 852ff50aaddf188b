//! TOML configuration.
//!
//! Only `[db]` is required; every other table falls back to defaults.
//! Secrets are never stored in the file: the config names the environment
//! variables that hold them.
//!
//! ```toml
//! [db]
//! path = "./data/repospec.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:3000"
//! public_url = "http://localhost:3000"
//!
//! [github]
//! api_base = "https://api.github.com"
//! token_env = "GITHUB_TOKEN"
//!
//! [llm]
//! provider = "anthropic"          # anthropic | openai | disabled
//! model = "claude-sonnet-4-5"
//!
//! [cache]
//! freshness_hours = 24
//!
//! [pipeline]
//! stage_timeout_secs = 120
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Base URL used to build share links (`{public_url}/spec/{shareId}`).
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: default_public_url(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_github_api")]
    pub api_base: String,
    /// Environment variable holding an API token. Unauthenticated requests
    /// are used when it is unset.
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: default_github_api(),
            token_env: default_github_token_env(),
            user_agent: default_user_agent(),
            timeout_secs: default_github_timeout(),
        }
    }
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}
fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_user_agent() -> String {
    format!("repospec/{}", env!("CARGO_PKG_VERSION"))
}
fn default_github_timeout() -> u64 {
    30
}

impl GithubConfig {
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Override the provider's API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Override the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Retries on 429/5xx and transport errors before a response starts.
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            base_url: None,
            api_key_env: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
        }
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_max_tokens() -> u32 {
    8000
}
fn default_llm_timeout() -> u64 {
    300
}
fn default_llm_retries() -> u32 {
    2
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Environment variable holding the provider's API key.
    pub fn key_env(&self) -> &str {
        match (&self.api_key_env, self.provider.as_str()) {
            (Some(name), _) => name,
            (None, "anthropic") => "ANTHROPIC_API_KEY",
            (None, _) => "OPENAI_API_KEY",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_freshness_hours")]
    pub freshness_hours: i64,
    #[serde(default = "default_share_id_length")]
    pub share_id_length: usize,
    #[serde(default = "default_max_share_id_attempts")]
    pub max_share_id_attempts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness_hours: default_freshness_hours(),
            share_id_length: default_share_id_length(),
            max_share_id_attempts: default_max_share_id_attempts(),
        }
    }
}

fn default_freshness_hours() -> i64 {
    24
}
fn default_share_id_length() -> usize {
    10
}
fn default_max_share_id_attempts() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Upper bound on validation, analysis and generation, each.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
    /// Capacity of the per-stream event channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_stage_timeout() -> u64 {
    300
}
fn default_channel_capacity() -> usize {
    64
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check value ranges and cross-field requirements.
pub fn validate(config: &Config) -> Result<()> {
    if config.cache.freshness_hours < 0 {
        anyhow::bail!("cache.freshness_hours must be >= 0");
    }

    if !(4..=32).contains(&config.cache.share_id_length) {
        anyhow::bail!("cache.share_id_length must be in [4, 32]");
    }

    if config.cache.max_share_id_attempts == 0 {
        anyhow::bail!("cache.max_share_id_attempts must be > 0");
    }

    if config.pipeline.stage_timeout_secs == 0 {
        anyhow::bail!("pipeline.stage_timeout_secs must be > 0");
    }

    if config.pipeline.channel_capacity == 0 {
        anyhow::bail!("pipeline.channel_capacity must be > 0");
    }

    if config.server.public_url.ends_with('/') {
        anyhow::bail!("server.public_url must not end with '/'");
    }

    match config.llm.provider.as_str() {
        "disabled" => {}
        "anthropic" | "openai" => {
            if config.llm.model.is_none() {
                anyhow::bail!(
                    "llm.model must be specified when provider is '{}'",
                    config.llm.provider
                );
            }
            if config.llm.max_tokens == 0 {
                anyhow::bail!("llm.max_tokens must be > 0");
            }
        }
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, anthropic, or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse("[db]\npath = \"./data/x.sqlite\"\n").unwrap();
        assert_eq!(cfg.cache.freshness_hours, 24);
        assert_eq!(cfg.cache.share_id_length, 10);
        assert_eq!(cfg.cache.max_share_id_attempts, 5);
        assert_eq!(cfg.llm.provider, "disabled");
        assert_eq!(cfg.github.api_base, "https://api.github.com");
        assert_eq!(cfg.server.bind, "127.0.0.1:3000");
    }

    #[test]
    fn enabled_provider_requires_model() {
        let err = parse("[db]\npath = \"x\"\n[llm]\nprovider = \"anthropic\"\n").unwrap_err();
        assert!(err.to_string().contains("llm.model"));

        let cfg = parse(
            "[db]\npath = \"x\"\n[llm]\nprovider = \"openai\"\nmodel = \"gpt-4o\"\n",
        )
        .unwrap();
        assert_eq!(cfg.llm.key_env(), "OPENAI_API_KEY");
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = parse("[db]\npath = \"x\"\n[llm]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn share_id_length_bounds() {
        let err = parse("[db]\npath = \"x\"\n[cache]\nshare_id_length = 2\n").unwrap_err();
        assert!(err.to_string().contains("share_id_length"));
    }

    #[test]
    fn trailing_slash_on_public_url_rejected() {
        let err = parse("[db]\npath = \"x\"\n[server]\npublic_url = \"https://a.test/\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("public_url"));
    }

    #[test]
    fn anthropic_key_env_default_and_override() {
        let cfg = parse(
            "[db]\npath = \"x\"\n[llm]\nprovider = \"anthropic\"\nmodel = \"m\"\n",
        )
        .unwrap();
        assert_eq!(cfg.llm.key_env(), "ANTHROPIC_API_KEY");

        let cfg = parse(
            "[db]\npath = \"x\"\n[llm]\nprovider = \"openai\"\nmodel = \"m\"\napi_key_env = \"MY_KEY\"\n",
        )
        .unwrap();
        assert_eq!(cfg.llm.key_env(), "MY_KEY");
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/repospec.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
