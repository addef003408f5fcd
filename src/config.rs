use crate::backends::{BackendPreset, WireProtocol};
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub backend: BackendConfig,
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub params: ParamsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// "chat" or "responses"; defaults to the preset's protocol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsConfig {
    /// Top-level request fields stripped before dispatch to the backend.
    #[serde(default = "default_drop_params")]
    pub drop: Vec<String>,
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            drop: default_drop_params(),
        }
    }
}

/// Built-in defaults, used when no config file exists anywhere: the openai
/// preset on the stock port, no model mappings. `--backend` then swaps the
/// preset without needing a file.
impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            backend: BackendConfig::default(),
            models: HashMap::new(),
            params: ParamsConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: "openai".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            protocol: None,
        }
    }
}

fn default_port() -> u16 {
    4333
}

fn default_api_key_env() -> String {
    "API_KEY".to_string()
}

fn default_drop_params() -> Vec<String> {
    vec![
        "betas".to_string(),
        "anthropic_beta".to_string(),
        "anthropic-beta".to_string(),
        "context_management".to_string(),
        "mcp_servers".to_string(),
    ]
}

impl GatewayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults.
    /// A config file is optional; only an explicit path that fails to load
    /// is an error.
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

        tracing::info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Resolve the effective base URL (config override or backend preset default)
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.backend.base_url {
            return Ok(url.clone());
        }

        let preset = BackendPreset::from_name(&self.backend.name).ok_or_else(|| {
            GatewayError::config(format!(
                "Unknown backend '{}' and no base_url configured. Known backends: {}",
                self.backend.name,
                BackendPreset::all()
                    .iter()
                    .map(|p| p.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    /// Resolve the API key from the configured environment variable
    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.backend.api_key_env).map_err(|_| {
            GatewayError::config(format!(
                "Environment variable '{}' not set. Set it with your backend API key.",
                self.backend.api_key_env
            ))
        })
    }

    /// Which wire protocol to speak upstream (config override or preset default).
    pub fn wire_protocol(&self) -> Result<WireProtocol> {
        if let Some(ref proto) = self.backend.protocol {
            return proto.parse().map_err(GatewayError::config);
        }

        BackendPreset::from_name(&self.backend.name)
            .map(|p| p.protocol)
            .ok_or_else(|| {
                GatewayError::config(format!(
                    "Unknown backend '{}' and no protocol configured (set protocol = \"chat\" \
                     or \"responses\")",
                    self.backend.name
                ))
            })
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("switchboard.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("switchboard")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("switchboard").join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join("switchboard").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = home_dir() {
        paths.push(home.join(".switchboard.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
