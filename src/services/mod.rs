//! External capability seams: recognition, generation and synthesis
//!
//! Each capability is a trait with a Google Cloud implementation and an
//! offline fallback. The implementation set is chosen once at startup and
//! shared by every session.

pub mod google;
mod offline;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Backend, ServerConfig};
use crate::persona::Prompt;
use crate::voice::{AUDIO_ENCODING, AudioFrame};
use crate::{Error, Result};

pub use offline::{CannedGenerator, SilenceSynthesizer, SilentRecognizer};

/// Per-session recognition engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionConfig {
    pub encoding: &'static str,
    pub sample_rate: u32,
    pub language: String,
    pub automatic_punctuation: bool,
    /// Stop after the first complete utterance
    pub single_utterance: bool,
    /// Ask the engine for partial hypotheses
    pub interim_results: bool,
}

impl RecognitionConfig {
    #[must_use]
    pub fn new(language: &str, sample_rate: u32) -> Self {
        Self {
            encoding: AUDIO_ENCODING,
            sample_rate,
            language: language.to_string(),
            automatic_punctuation: true,
            single_utterance: true,
            interim_results: true,
        }
    }
}

/// One hypothesis delivered by a recognition engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub transcript: String,
    pub is_final: bool,
}

impl RecognitionResult {
    pub fn interim(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: false,
        }
    }

    pub fn final_result(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: true,
        }
    }
}

/// Frames pulled lazily by the engine
pub type FrameSource<'a> = Box<dyn Iterator<Item = AudioFrame> + Send + 'a>;

/// Results yielded by the engine in delivery order
pub type ResultStream<'a> = Box<dyn Iterator<Item = Result<RecognitionResult>> + Send + 'a>;

/// Streaming speech recognition
///
/// Runs on a blocking worker thread. The engine pulls frames from `frames`
/// on demand and may stop pulling early once it has heard a full utterance.
pub trait Recognizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a recognition stream over `frames`
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be opened
    fn streaming_recognize<'a>(
        &'a self,
        config: RecognitionConfig,
        frames: FrameSource<'a>,
    ) -> Result<ResultStream<'a>>;
}

/// Persona-flavored text generation
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce a reply for `prompt`
    ///
    /// # Errors
    ///
    /// Returns error if the service fails or returns no text
    async fn generate(&self, prompt: &Prompt) -> Result<String>;
}

/// Synthesis voice parameters
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    pub language: String,
    pub name: String,
    pub sample_rate: u32,
    pub speaking_rate: f64,
    pub pitch: f64,
}

/// Text-to-speech
#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Synthesize `text`, returning bare 16-bit mono PCM at `voice.sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the service fails
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>>;
}

/// The capability set shared by every session
#[derive(Clone)]
pub struct Services {
    pub recognizer: Arc<dyn Recognizer>,
    pub generator: Arc<dyn Generator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Services {
    /// Build the configured backend
    ///
    /// # Errors
    ///
    /// Returns error if Google credentials cannot be loaded
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        match config.backend {
            Backend::Offline => Ok(Self::offline()),
            Backend::Google => {
                let google = config.google.as_ref().ok_or_else(|| {
                    Error::Config("google backend selected without project settings".to_string())
                })?;
                google::services(google)
            }
        }
    }

    /// Credential-free fallbacks
    #[must_use]
    pub fn offline() -> Self {
        Self {
            recognizer: Arc::new(SilentRecognizer),
            generator: Arc::new(CannedGenerator),
            synthesizer: Arc::new(SilenceSynthesizer),
        }
    }

    /// Summary for startup logging
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "stt={} llm={} tts={}",
            self.recognizer.name(),
            self.generator.name(),
            self.synthesizer.name()
        )
    }
}
