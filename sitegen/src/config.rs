use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

/// Environment variables consulted for the credential, in order.
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Effective settings for every generation call.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

impl GenerationConfig {
    /// The credential, if present and not blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// First non-blank credential found in the process environment.
pub fn credential_from_env() -> Option<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.trim().is_empty())
}

/// Stored configuration at ~/.sitegen/config.json. Every field is optional;
/// missing fields fall back to built-in defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SitegenConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl SitegenConfig {
    /// ~/.sitegen (or ./.sitegen without a home directory).
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sitegen")
    }

    fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load from ~/.sitegen/config.json.
    pub fn load() -> Option<Self> {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&data) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Save to ~/.sitegen/config.json (mode 0o600).
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, &data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Delete the whole ~/.sitegen directory (config and logs).
    pub fn clear() -> Result<(), ConfigError> {
        let dir = Self::dir();
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Overlay stored values onto `base`.
    pub fn apply(&self, base: &mut GenerationConfig) {
        if let Some(key) = &self.api_key {
            base.api_key = Some(key.clone());
        }
        if let Some(model) = &self.model {
            base.model = model.clone();
        }
        if let Some(url) = &self.base_url {
            base.base_url = url.clone();
        }
        if let Some(t) = self.temperature {
            base.temperature = t;
        }
        if let Some(n) = self.max_output_tokens {
            base.max_output_tokens = n;
        }
    }

    /// Snapshot of effective settings, for `--save-config`.
    pub fn from_effective(config: &GenerationConfig) -> Self {
        Self {
            api_key: config.credential().map(str::to_string),
            model: Some(config.model.clone()),
            base_url: Some(config.base_url.clone()),
            temperature: Some(config.temperature),
            max_output_tokens: Some(config.max_output_tokens),
        }
    }
}
