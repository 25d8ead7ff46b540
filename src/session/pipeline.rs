//! Transcript to spoken reply: generation then synthesis

use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use super::Failure;
use crate::persona::{APOLOGY_REPLY, Prompt};
use crate::services::{Generator, Services, Synthesizer, VoiceParams};
use crate::{Error, Result};

/// What to do when reply generation fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationFailurePolicy {
    /// End the session with a `generation_failed` error
    #[default]
    Abort,
    /// Speak a fixed apology instead
    Apologize,
}

impl FromStr for GenerationFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "apologize" | "apologise" => Ok(Self::Apologize),
            other => Err(Error::Config(format!(
                "unknown generation failure policy: {other}"
            ))),
        }
    }
}

/// Generated reply text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyText {
    pub text: String,
    /// True when the apology was substituted for a failed generation
    pub apologized: bool,
}

/// A complete spoken reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub audio: Vec<u8>,
    pub sample_rate: u32,
    pub apologized: bool,
}

/// Shared, stateless generation + synthesis stage
#[derive(Clone)]
pub struct ResponsePipeline {
    generator: Arc<dyn Generator>,
    synthesizer: Arc<dyn Synthesizer>,
    voice: VoiceParams,
    policy: GenerationFailurePolicy,
}

impl ResponsePipeline {
    #[must_use]
    pub fn new(services: &Services, voice: VoiceParams, policy: GenerationFailurePolicy) -> Self {
        Self {
            generator: Arc::clone(&services.generator),
            synthesizer: Arc::clone(&services.synthesizer),
            voice,
            policy,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> GenerationFailurePolicy {
        self.policy
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.voice.sample_rate
    }

    /// Ask the generator for a reply to `transcript`
    ///
    /// # Errors
    ///
    /// Returns `Failure::GenerationFailed` under the abort policy
    pub async fn generate(&self, transcript: &str) -> std::result::Result<ReplyText, Failure> {
        let prompt = Prompt::for_transcript(transcript);
        match self.generator.generate(&prompt).await {
            Ok(text) => {
                tracing::debug!(chars = text.chars().count(), "reply generated");
                Ok(ReplyText {
                    text,
                    apologized: false,
                })
            }
            Err(e) => match self.policy {
                GenerationFailurePolicy::Abort => Err(Failure::GenerationFailed(e.to_string())),
                GenerationFailurePolicy::Apologize => {
                    tracing::warn!(error = %e, "generation failed, substituting apology");
                    Ok(ReplyText {
                        text: APOLOGY_REPLY.to_string(),
                        apologized: true,
                    })
                }
            },
        }
    }

    /// Speak `text`
    ///
    /// # Errors
    ///
    /// Returns `Failure::SynthesisFailed` if the synthesizer fails
    pub async fn synthesize(&self, text: &str) -> std::result::Result<Vec<u8>, Failure> {
        let audio = self
            .synthesizer
            .synthesize(text, &self.voice)
            .await
            .map_err(|e| Failure::SynthesisFailed(e.to_string()))?;
        if audio.len() % crate::voice::SAMPLE_WIDTH != 0 {
            return Err(Failure::SynthesisFailed(format!(
                "synthesizer returned {} bytes, not 16-bit aligned",
                audio.len()
            )));
        }
        Ok(audio)
    }

    /// Generate then synthesize
    ///
    /// # Errors
    ///
    /// Returns the first failing step
    pub async fn respond(&self, transcript: &str) -> std::result::Result<Reply, Failure> {
        let reply = self.generate(transcript).await?;
        let audio = self.synthesize(&reply.text).await?;
        Ok(Reply {
            text: reply.text,
            audio,
            sample_rate: self.voice.sample_rate,
            apologized: reply.apologized,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::services::SilentRecognizer;

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn generate(&self, _prompt: &Prompt) -> Result<String> {
            Err(Error::Llm("quota exceeded".into()))
        }
    }

    #[derive(Default)]
    struct CountingSynthesizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Synthesizer for CountingSynthesizer {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn synthesize(&self, _text: &str, _voice: &VoiceParams) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0; 8])
        }
    }

    fn voice() -> VoiceParams {
        VoiceParams {
            language: "ja-JP".into(),
            name: "ja-JP-Wavenet-D".into(),
            sample_rate: 16000,
            speaking_rate: 1.1,
            pitch: 2.0,
        }
    }

    fn pipeline(policy: GenerationFailurePolicy) -> (ResponsePipeline, Arc<CountingSynthesizer>) {
        let synth = Arc::new(CountingSynthesizer::default());
        let services = Services {
            recognizer: Arc::new(SilentRecognizer),
            generator: Arc::new(FailingGenerator),
            synthesizer: synth.clone(),
        };
        (ResponsePipeline::new(&services, voice(), policy), synth)
    }

    #[test]
    fn policy_parses() {
        assert_eq!(
            "Apologize".parse::<GenerationFailurePolicy>().unwrap(),
            GenerationFailurePolicy::Apologize
        );
        assert_eq!(
            GenerationFailurePolicy::default(),
            GenerationFailurePolicy::Abort
        );
        assert!("retry".parse::<GenerationFailurePolicy>().is_err());
    }

    #[tokio::test]
    async fn abort_policy_never_synthesizes() {
        let (pipeline, synth) = pipeline(GenerationFailurePolicy::Abort);
        let err = pipeline.respond("こんにちは").await.unwrap_err();

        assert_eq!(err.reason(), "generation_failed");
        assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn apologize_policy_speaks_apology() {
        let (pipeline, synth) = pipeline(GenerationFailurePolicy::Apologize);
        let reply = pipeline.respond("こんにちは").await.unwrap();

        assert!(reply.apologized);
        assert_eq!(reply.text, APOLOGY_REPLY);
        assert_eq!(reply.audio.len(), 8);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn offline_services_produce_a_reply() {
        let pipeline = ResponsePipeline::new(
            &Services::offline(),
            voice(),
            GenerationFailurePolicy::Abort,
        );
        let reply = pipeline.respond("いぬ").await.unwrap();
        assert!(reply.text.contains("いぬ"));
        assert_eq!(reply.audio.len(), 3200);
        assert_eq!(reply.sample_rate, 16000);
    }
}
