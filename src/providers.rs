//! Built-in upstream presets for common OpenAI-compatible inference APIs.
//!
//! A preset names a base URL and the environment variable that conventionally
//! holds its key, so a config only has to say `preset = "nvidia"`.

#[derive(Debug, Clone)]
pub struct UpstreamPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub default_api_key_env: &'static str,
}

const PRESETS: &[UpstreamPreset] = &[
    UpstreamPreset {
        name: "nvidia",
        base_url: "https://integrate.api.nvidia.com/v1",
        default_api_key_env: "NIM_API_KEY",
    },
    UpstreamPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        default_api_key_env: "OPENAI_API_KEY",
    },
    UpstreamPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        default_api_key_env: "OPENROUTER_API_KEY",
    },
    UpstreamPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        default_api_key_env: "DEEPSEEK_API_KEY",
    },
    UpstreamPreset {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        default_api_key_env: "TOGETHER_API_KEY",
    },
    UpstreamPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        default_api_key_env: "GROQ_API_KEY",
    },
];

impl UpstreamPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static UpstreamPreset> {
        let name = name.to_lowercase();
        PRESETS.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn names() -> Vec<&'static str> {
        PRESETS.iter().map(|p| p.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert!(UpstreamPreset::from_name("NVIDIA").is_some());
        assert!(UpstreamPreset::from_name("openrouter").is_some());
        assert!(UpstreamPreset::from_name("nonexistent").is_none());
    }

    #[test]
    fn test_preset_urls_have_no_trailing_slash() {
        for name in UpstreamPreset::names() {
            let preset = UpstreamPreset::from_name(name).unwrap();
            assert!(!preset.base_url.ends_with('/'), "{name}");
        }
    }
}
