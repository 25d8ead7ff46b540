//! TOML configuration file loading
//!
//! Supports `~/.config/voice-chatter/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ChatterConfigFile {
    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Google Cloud project settings
    #[serde(default)]
    pub google: GoogleFileConfig,

    /// Service backend selection
    #[serde(default)]
    pub services: ServicesFileConfig,

    /// Recognition and synthesis voice settings
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Device client settings
    #[serde(default)]
    pub client: ClientFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Shared secret presented by devices
    pub api_token: Option<String>,

    /// Seconds of inbound silence before a streaming session is abandoned
    pub stream_idle_timeout_secs: Option<u64>,

    /// Global request budget (unset = unlimited)
    pub requests_per_minute: Option<u32>,
}

/// Google Cloud configuration
#[derive(Debug, Default, Deserialize)]
pub struct GoogleFileConfig {
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub credentials_file: Option<String>,

    /// Vertex AI model (e.g. "gemini-1.5-flash")
    pub model: Option<String>,
}

/// Service backend selection
#[derive(Debug, Default, Deserialize)]
pub struct ServicesFileConfig {
    /// "google" or "offline"
    pub backend: Option<String>,

    /// "abort" or "apologize"
    pub on_generation_failure: Option<String>,
}

/// Speech settings
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// BCP-47 language code (e.g. "ja-JP")
    pub language: Option<String>,

    /// Synthesis voice name (e.g. "ja-JP-Wavenet-D")
    pub voice: Option<String>,

    pub speaking_rate: Option<f64>,
    pub pitch: Option<f64>,
}

/// Device client settings
#[derive(Debug, Default, Deserialize)]
pub struct ClientFileConfig {
    pub backend_ws_url: Option<String>,
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub record_seconds: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ChatterConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ChatterConfigFile {
    let Some(path) = config_file_path() else {
        return ChatterConfigFile::default();
    };

    if !path.exists() {
        return ChatterConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ChatterConfigFile::default()
        }
    }
}

/// Load an explicitly requested config file
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn read_config_file(path: &Path) -> Result<ChatterConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/voice-chatter/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-chatter").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let config: ChatterConfigFile = toml::from_str(
            r#"
            [server]
            port = 9000

            [speech]
            voice = "ja-JP-Neural2-B"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, Some(9000));
        assert_eq!(config.speech.voice.as_deref(), Some("ja-JP-Neural2-B"));
        assert!(config.google.project_id.is_none());
        assert!(config.client.backend_ws_url.is_none());
    }

    #[test]
    fn explicit_file_errors_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(read_config_file(&path).is_err());
        assert!(read_config_file(&dir.path().join("missing.toml")).is_err());
    }
}
