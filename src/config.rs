use crate::error::{ProxyError, Result};
use crate::providers::UpstreamPreset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prepended to multi-turn conversations that carry no system message.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an immersive roleplay partner. \
Stay in character at all times, speak and act only as your character, and keep \
the story moving with vivid, consistent detail. Never mention that you are an AI \
or break the fourth wall. If you reason about your reply before writing it, put \
all of that reasoning inside <think></think> tags and write the in-character \
reply after the closing tag.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    /// Bearer credential, read from `upstream.api_key_env` once at startup.
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Upstream model ids, tried in order until one succeeds.
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,
    /// Model id reported to consumers in every response.
    #[serde(default = "default_advertised")]
    pub advertised: String,
    /// Extra ids listed by `/v1/models`.
    #[serde(default = "default_aliases")]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_true")]
    pub reasoning_display: bool,
    #[serde(default)]
    pub thinking_mode: bool,
    #[serde(default = "default_true")]
    pub system_prompt_injection: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default)]
    pub extra_base_urls: Vec<String>,
}

fn default_port() -> u16 {
    3000
}

fn default_api_key_env() -> String {
    "UPSTREAM_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_candidates() -> Vec<String> {
    vec!["deepseek-ai/deepseek-r1".to_string()]
}

fn default_advertised() -> String {
    "gpt-4".to_string()
}

fn default_aliases() -> Vec<String> {
    vec!["gpt-4-turbo".to_string(), "gpt-3.5-turbo".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            upstream: UpstreamConfig::default(),
            models: ModelsConfig::default(),
            features: FeaturesConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            api_key: None,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            preset: None,
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            advertised: default_advertised(),
            aliases: default_aliases(),
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            reasoning_display: true,
            thinking_mode: false,
            system_prompt_injection: true,
            system_prompt: None,
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file, falling back to defaults.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults and environment");
        Ok(Self::default())
    }

    /// Apply `PORT` / `UPSTREAM_BASE_URL` overrides and read the credential.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Same as [`apply_env`](Self::apply_env) with an injectable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ProxyError::config(format!("PORT is not a valid port: {port}")))?;
        }
        if let Some(url) = lookup("UPSTREAM_BASE_URL").filter(|u| !u.trim().is_empty()) {
            self.upstream.base_url = Some(url.trim().to_string());
        }
        self.api_key = lookup(&self.upstream.api_key_env).filter(|k| !k.is_empty());
        Ok(())
    }

    /// Switch to a named preset, adopting its key variable.
    pub fn use_preset(&mut self, name: &str) -> Result<()> {
        let preset = UpstreamPreset::from_name(name).ok_or_else(|| {
            ProxyError::config(format!(
                "Unknown preset '{}'. Known presets: {}",
                name,
                UpstreamPreset::names().join(", ")
            ))
        })?;
        self.upstream.preset = Some(preset.name.to_string());
        self.upstream.base_url = None;
        self.upstream.api_key_env = preset.default_api_key_env.to_string();
        Ok(())
    }

    /// Resolve the effective base URL (explicit override or preset default)
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.upstream.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        let name = self.upstream.preset.as_deref().ok_or_else(|| {
            ProxyError::config(
                "No upstream configured. Set UPSTREAM_BASE_URL, upstream.base_url or upstream.preset",
            )
        })?;

        UpstreamPreset::from_name(name)
            .map(|p| p.base_url.to_string())
            .ok_or_else(|| {
                ProxyError::config(format!(
                    "Unknown preset '{}' and no base_url configured. Known presets: {}",
                    name,
                    UpstreamPreset::names().join(", ")
                ))
            })
    }

    pub fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            ProxyError::config(format!(
                "Environment variable '{}' not set. Set it with your upstream API key.",
                self.upstream.api_key_env
            ))
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }

    pub fn system_prompt(&self) -> &str {
        self.features
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    /// Base URLs probed by `/diagnose`, configured one first, without duplicates.
    pub fn diagnostic_base_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        let configured = self.effective_base_url().ok().into_iter();
        let extras = self
            .diagnostics
            .extra_base_urls
            .iter()
            .map(|u| u.trim_end_matches('/').to_string());
        for url in configured.chain(extras) {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls
    }

    /// Check everything the proxy needs before it starts serving.
    pub fn validate(&self) -> Result<()> {
        if self.models.candidates.is_empty() {
            return Err(ProxyError::config("models.candidates must not be empty"));
        }
        if self.models.candidates.iter().any(|m| m.trim().is_empty()) {
            return Err(ProxyError::config("models.candidates contains a blank model id"));
        }
        if self.models.advertised.trim().is_empty() {
            return Err(ProxyError::config("models.advertised must not be blank"));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ProxyError::config("upstream.timeout_secs must be positive"));
        }
        self.effective_base_url()?;
        self.api_key()?;
        Ok(())
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("think-proxy.toml")];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("think-proxy").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("think-proxy").join("config.toml"));
        paths.push(home.join(".think-proxy.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
