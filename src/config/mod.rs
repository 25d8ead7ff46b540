//! Configuration management for voice-chatter
//!
//! Precedence is env > TOML file > default. Configuration is resolved once at
//! process start and handed to component constructors; nothing reads the
//! environment after that.

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::services::{RecognitionConfig, VoiceParams};
use crate::session::GenerationFailurePolicy;
use crate::voice::{CHUNK_MS, SAMPLE_RATE};
use crate::{Error, Result};

pub use file::ChatterConfigFile;

/// Default Vertex AI model
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Default recognition/synthesis language
pub const DEFAULT_LANGUAGE: &str = "ja-JP";

/// Default synthesis voice
pub const DEFAULT_VOICE: &str = "ja-JP-Wavenet-D";

/// Which implementation backs the recognition/generation/synthesis capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Google Cloud Speech-to-Text, Vertex AI and Text-to-Speech
    Google,
    /// Local fallbacks that need no credentials
    Offline,
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" | "gcp" => Ok(Self::Google),
            "offline" | "fallback" => Ok(Self::Offline),
            other => Err(Error::Config(format!("unknown service backend: {other}"))),
        }
    }
}

/// Google Cloud project settings
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub project_id: String,
    pub location: String,
    pub credentials_file: PathBuf,
    pub model: String,
}

/// Recognition and synthesis voice settings
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub language: String,
    pub voice: String,
    pub sample_rate: u32,
    pub speaking_rate: f64,
    pub pitch: f64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            sample_rate: SAMPLE_RATE,
            speaking_rate: 1.1,
            pitch: 2.0,
        }
    }
}

impl SpeechConfig {
    /// Per-session recognition engine configuration
    #[must_use]
    pub fn recognition(&self) -> RecognitionConfig {
        RecognitionConfig::new(&self.language, self.sample_rate)
    }

    /// Synthesis voice parameters
    #[must_use]
    pub fn voice_params(&self) -> VoiceParams {
        VoiceParams {
            language: self.language.clone(),
            name: self.voice.clone(),
            sample_rate: self.sample_rate,
            speaking_rate: self.speaking_rate,
            pitch: self.pitch,
        }
    }
}

/// Backend server configuration
#[derive(Debug)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Shared secret devices must present
    pub api_token: SecretString,

    /// Service implementation selection
    pub backend: Backend,

    /// Present when `backend` is `Google`
    pub google: Option<GoogleConfig>,

    pub speech: SpeechConfig,

    /// What to do when reply generation fails
    pub on_generation_failure: GenerationFailurePolicy,

    /// Inbound silence allowed while streaming
    pub stream_idle_timeout: Duration,

    /// Global request budget per minute
    pub requests_per_minute: Option<u32>,
}

impl ServerConfig {
    /// Load from the process environment and the TOML file
    ///
    /// # Errors
    ///
    /// Returns error if a required setting is missing or invalid
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = match config_path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };
        Self::resolve(&process_env, fc)
    }

    /// Resolve from an env lookup and a parsed config file
    ///
    /// # Errors
    ///
    /// Returns error if a required setting is missing or invalid
    pub fn resolve(env: &dyn Fn(&str) -> Option<String>, fc: ChatterConfigFile) -> Result<Self> {
        let mut missing = Vec::new();

        let api_token = token_setting(env, fc.server.api_token);
        if api_token.is_none() {
            missing.push("API_TOKEN");
        }

        let backend = env("CHATTER_BACKEND")
            .or(fc.services.backend)
            .map_or(Ok(Backend::Google), |s| s.parse())?;

        let google = if backend == Backend::Google {
            let project_id = env("GCP_PROJECT_ID").or(fc.google.project_id);
            let location = env("GCP_LOCATION").or(fc.google.location);
            let credentials_file = env("GOOGLE_APPLICATION_CREDENTIALS")
                .or(fc.google.credentials_file)
                .map(PathBuf::from);
            let model = env("CHATTER_LLM_MODEL")
                .or(fc.google.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string());

            if project_id.is_none() {
                missing.push("GCP_PROJECT_ID");
            }
            if location.is_none() {
                missing.push("GCP_LOCATION");
            }
            if credentials_file.is_none() {
                missing.push("GOOGLE_APPLICATION_CREDENTIALS");
            }

            match (project_id, location, credentials_file) {
                (Some(project_id), Some(location), Some(credentials_file)) => {
                    if !credentials_file.is_file() {
                        return Err(Error::Config(format!(
                            "credentials file not found: {}",
                            credentials_file.display()
                        )));
                    }
                    Some(GoogleConfig {
                        project_id,
                        location,
                        credentials_file,
                        model,
                    })
                }
                _ => None,
            }
        } else {
            None
        };

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        let on_generation_failure = env("CHATTER_ON_GENERATION_FAILURE")
            .or(fc.services.on_generation_failure)
            .map_or(Ok(GenerationFailurePolicy::default()), |s| s.parse())?;

        let defaults = SpeechConfig::default();
        let speech = SpeechConfig {
            language: fc.speech.language.unwrap_or(defaults.language),
            voice: fc.speech.voice.unwrap_or(defaults.voice),
            sample_rate: defaults.sample_rate,
            speaking_rate: fc.speech.speaking_rate.unwrap_or(defaults.speaking_rate),
            pitch: fc.speech.pitch.unwrap_or(defaults.pitch),
        };

        let port = env("PORT")
            .and_then(|s| s.parse().ok())
            .or(fc.server.port)
            .unwrap_or(8080);

        Ok(Self {
            port,
            api_token: SecretString::from(api_token.unwrap_or_default()),
            backend,
            google,
            speech,
            on_generation_failure,
            stream_idle_timeout: Duration::from_secs(
                fc.server.stream_idle_timeout_secs.unwrap_or(30),
            ),
            requests_per_minute: fc.server.requests_per_minute,
        })
    }
}

/// Device client configuration
#[derive(Debug)]
pub struct ClientConfig {
    /// Streaming endpoint, e.g. `wss://host/ws/voice`
    pub backend_ws_url: Option<String>,

    /// HTTP endpoint, e.g. `https://host/process-audio`
    pub api_url: Option<String>,

    pub api_token: SecretString,

    /// Fixed recording length for the HTTP transport
    pub record_seconds: u64,

    pub sample_rate: u32,

    /// Capture frame duration
    pub chunk_ms: u32,
}

impl ClientConfig {
    /// Load from an optional dotenv file, the process environment and the TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the dotenv file cannot be read or `API_TOKEN` is missing
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        match env_file {
            Some(path) => {
                dotenv::from_path(path).map_err(|e| {
                    Error::Config(format!("failed to load {}: {e}", path.display()))
                })?;
            }
            None => {
                dotenv::dotenv().ok();
            }
        }
        Self::resolve(&process_env, file::load_config_file())
    }

    /// Resolve from an env lookup and a parsed config file
    ///
    /// # Errors
    ///
    /// Returns error if `API_TOKEN` is missing or a numeric setting is invalid
    pub fn resolve(env: &dyn Fn(&str) -> Option<String>, fc: ChatterConfigFile) -> Result<Self> {
        let api_token = token_setting(env, fc.client.api_token)
            .ok_or_else(|| Error::Config("missing required settings: API_TOKEN".to_string()))?;

        let record_seconds = parse_env(env, "RECORD_SECONDS")?
            .or(fc.client.record_seconds)
            .unwrap_or(4);
        let sample_rate = parse_env(env, "SAMPLE_RATE")?.unwrap_or(SAMPLE_RATE);
        let chunk_ms = parse_env(env, "CHUNK_MS")?.unwrap_or(CHUNK_MS);

        if chunk_ms == 0 || sample_rate == 0 {
            return Err(Error::Config(
                "SAMPLE_RATE and CHUNK_MS must be positive".to_string(),
            ));
        }

        Ok(Self {
            backend_ws_url: env("BACKEND_WS_URL").or(fc.client.backend_ws_url),
            api_url: env("API_URL").or(fc.client.api_url),
            api_token: SecretString::from(api_token),
            record_seconds,
            sample_rate,
            chunk_ms,
        })
    }

    /// Streaming endpoint, required by `talk`
    ///
    /// # Errors
    ///
    /// Returns error if `BACKEND_WS_URL` is not configured
    pub fn ws_url(&self) -> Result<&str> {
        self.backend_ws_url
            .as_deref()
            .ok_or_else(|| Error::Config("missing required settings: BACKEND_WS_URL".to_string()))
    }

    /// HTTP endpoint, required by `record`
    ///
    /// # Errors
    ///
    /// Returns error if `API_URL` is not configured
    pub fn http_url(&self) -> Result<&str> {
        self.api_url
            .as_deref()
            .ok_or_else(|| Error::Config("missing required settings: API_URL".to_string()))
    }
}

/// Process environment lookup; empty values count as unset
#[must_use]
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// `API_TOKEN` from env, then file; blank values count as unset
fn token_setting(env: &dyn Fn(&str) -> Option<String>, file: Option<String>) -> Option<String> {
    env("API_TOKEN")
        .filter(|v| !v.trim().is_empty())
        .or(file.filter(|v| !v.trim().is_empty()))
}

fn parse_env<T: FromStr>(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key} has invalid value: {raw}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn offline_server_needs_only_token() {
        let env = env_of(&[("API_TOKEN", "secret"), ("CHATTER_BACKEND", "offline")]);
        let config = ServerConfig::resolve(&env, ChatterConfigFile::default()).unwrap();

        assert_eq!(config.backend, Backend::Offline);
        assert!(config.google.is_none());
        assert_eq!(config.api_token.expose_secret(), "secret");
        assert_eq!(config.port, 8080);
        assert_eq!(config.speech.language, "ja-JP");
        assert_eq!(config.on_generation_failure, GenerationFailurePolicy::Abort);
        assert_eq!(config.stream_idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn google_backend_reports_every_missing_setting() {
        let env = env_of(&[]);
        let err = ServerConfig::resolve(&env, ChatterConfigFile::default()).unwrap_err();
        let message = err.to_string();

        for key in [
            "API_TOKEN",
            "GCP_PROJECT_ID",
            "GCP_LOCATION",
            "GOOGLE_APPLICATION_CREDENTIALS",
        ] {
            assert!(message.contains(key), "{message} should mention {key}");
        }
    }

    #[test]
    fn google_backend_requires_existing_credentials_file() {
        let env = env_of(&[
            ("API_TOKEN", "t"),
            ("GCP_PROJECT_ID", "proj"),
            ("GCP_LOCATION", "asia-northeast1"),
            ("GOOGLE_APPLICATION_CREDENTIALS", "/nonexistent/key.json"),
        ]);
        let err = ServerConfig::resolve(&env, ChatterConfigFile::default()).unwrap_err();
        assert!(err.to_string().contains("credentials file not found"));
    }

    #[test]
    fn google_backend_resolves_with_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key.json");
        std::fs::write(&key, "{}").unwrap();
        let key_str = key.to_string_lossy().to_string();

        let vars = [
            ("API_TOKEN", "t"),
            ("GCP_PROJECT_ID", "proj"),
            ("GCP_LOCATION", "asia-northeast1"),
            ("GOOGLE_APPLICATION_CREDENTIALS", key_str.as_str()),
            ("PORT", "9999"),
        ];
        let env = env_of(&vars);
        let config = ServerConfig::resolve(&env, ChatterConfigFile::default()).unwrap();
        let google = config.google.unwrap();

        assert_eq!(google.project_id, "proj");
        assert_eq!(google.model, DEFAULT_MODEL);
        assert_eq!(config.port, 9999);
    }

    #[test]
    fn env_overrides_file() {
        let fc: ChatterConfigFile = toml::from_str(
            r#"
            [server]
            api_token = "from-file"
            port = 7000

            [services]
            backend = "offline"
            on_generation_failure = "apologize"

            [speech]
            speaking_rate = 0.9
            "#,
        )
        .unwrap();
        let env = env_of(&[("API_TOKEN", "from-env")]);
        let config = ServerConfig::resolve(&env, fc).unwrap();

        assert_eq!(config.api_token.expose_secret(), "from-env");
        assert_eq!(config.port, 7000);
        assert_eq!(
            config.on_generation_failure,
            GenerationFailurePolicy::Apologize
        );
        assert!((config.speech.speaking_rate - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let env = env_of(&[("API_TOKEN", ""), ("CHATTER_BACKEND", "offline")]);
        let err = ServerConfig::resolve(&env, ChatterConfigFile::default()).unwrap_err();
        assert!(err.to_string().contains("API_TOKEN"));

        let blank_file = || -> ChatterConfigFile {
            toml::from_str(
                r#"
                [server]
                api_token = "   "
                [client]
                api_token = ""
                "#,
            )
            .unwrap()
        };
        let env = env_of(&[("CHATTER_BACKEND", "offline")]);
        assert!(ServerConfig::resolve(&env, blank_file()).is_err());
        assert!(ClientConfig::resolve(&env_of(&[("API_TOKEN", " ")]), blank_file()).is_err());
    }

    #[test]
    fn blank_env_token_falls_back_to_file() {
        let fc: ChatterConfigFile = toml::from_str(
            r#"
            [server]
            api_token = "from-file"
            "#,
        )
        .unwrap();
        let env = env_of(&[("API_TOKEN", "  "), ("CHATTER_BACKEND", "offline")]);
        let config = ServerConfig::resolve(&env, fc).unwrap();
        assert_eq!(config.api_token.expose_secret(), "from-file");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let env = env_of(&[("API_TOKEN", "t"), ("CHATTER_BACKEND", "azure")]);
        assert!(ServerConfig::resolve(&env, ChatterConfigFile::default()).is_err());
    }

    #[test]
    fn client_requires_token_and_defaults_rest() {
        let err = ClientConfig::resolve(&env_of(&[]), ChatterConfigFile::default()).unwrap_err();
        assert!(err.to_string().contains("API_TOKEN"));

        let env = env_of(&[("API_TOKEN", "t"), ("BACKEND_WS_URL", "ws://pi.local/ws/voice")]);
        let config = ClientConfig::resolve(&env, ChatterConfigFile::default()).unwrap();
        assert_eq!(config.ws_url().unwrap(), "ws://pi.local/ws/voice");
        assert!(config.http_url().is_err());
        assert_eq!(config.record_seconds, 4);
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.chunk_ms, 100);
    }

    #[test]
    fn client_rejects_garbage_numbers() {
        let env = env_of(&[("API_TOKEN", "t"), ("RECORD_SECONDS", "four")]);
        assert!(ClientConfig::resolve(&env, ChatterConfigFile::default()).is_err());
    }
}
