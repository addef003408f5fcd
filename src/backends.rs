//! Built-in backend presets for common LLM API providers.
//!
//! Each preset names the base URL, the wire protocol the backend speaks, and the default
//! environment variable holding its API key. Users pick a backend by name in the config
//! and the preset fills in the rest.

use std::fmt;
use std::str::FromStr;

/// Which upstream wire protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    /// Chat-completion style: `/chat/completions`, choice deltas in SSE chunks.
    Chat,
    /// Item-lifecycle style: `/responses`, output items with added/delta/done events.
    Responses,
}

impl fmt::Display for WireProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireProtocol::Chat => write!(f, "chat"),
            WireProtocol::Responses => write!(f, "responses"),
        }
    }
}

impl FromStr for WireProtocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chat" | "openai" | "chat_completions" => Ok(WireProtocol::Chat),
            "responses" | "items" => Ok(WireProtocol::Responses),
            other => Err(format!(
                "Unknown wire protocol '{other}' (expected \"chat\" or \"responses\")"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub protocol: WireProtocol,
    pub default_api_key_env: &'static str,
}

const PRESETS: &[BackendPreset] = &[
    BackendPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        protocol: WireProtocol::Chat,
        default_api_key_env: "OPENAI_API_KEY",
    },
    BackendPreset {
        name: "openai-responses",
        base_url: "https://api.openai.com/v1",
        protocol: WireProtocol::Responses,
        default_api_key_env: "OPENAI_API_KEY",
    },
    BackendPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        protocol: WireProtocol::Chat,
        default_api_key_env: "OPENROUTER_API_KEY",
    },
    BackendPreset {
        name: "fireworks",
        base_url: "https://api.fireworks.ai/inference/v1",
        protocol: WireProtocol::Chat,
        default_api_key_env: "FIREWORKS_API_KEY",
    },
    BackendPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        protocol: WireProtocol::Chat,
        default_api_key_env: "GROQ_API_KEY",
    },
    BackendPreset {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        protocol: WireProtocol::Chat,
        default_api_key_env: "TOGETHER_API_KEY",
    },
    BackendPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        protocol: WireProtocol::Chat,
        default_api_key_env: "DEEPSEEK_API_KEY",
    },
    BackendPreset {
        name: "xai",
        base_url: "https://api.x.ai/v1",
        protocol: WireProtocol::Chat,
        default_api_key_env: "XAI_API_KEY",
    },
    BackendPreset {
        name: "lmstudio",
        base_url: "http://localhost:1234/v1",
        protocol: WireProtocol::Responses,
        default_api_key_env: "LMSTUDIO_API_KEY",
    },
];

impl BackendPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static BackendPreset> {
        PRESETS.iter().find(|p| p.name == name.to_lowercase())
    }

    #[must_use]
    pub fn all() -> &'static [BackendPreset] {
        PRESETS
    }
}
