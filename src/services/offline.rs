//! Credential-free service fallbacks

use async_trait::async_trait;

use super::{
    FrameSource, Generator, RecognitionConfig, RecognitionResult, Recognizer, ResultStream,
    Synthesizer, VoiceParams,
};
use crate::Result;
use crate::persona::{Prompt, canned_reply};
use crate::voice::silence;

/// Duration of the silent synthesis fallback
const SILENCE_MS: u32 = 100;

/// Drains the audio and never hears anything
pub struct SilentRecognizer;

impl Recognizer for SilentRecognizer {
    fn name(&self) -> &'static str {
        "silent"
    }

    fn streaming_recognize<'a>(
        &'a self,
        _config: RecognitionConfig,
        frames: FrameSource<'a>,
    ) -> Result<ResultStream<'a>> {
        Ok(Box::new(std::iter::once_with(move || {
            let frames = frames.count();
            tracing::debug!(frames, "silent recognizer drained stream");
            Ok::<_, crate::Error>(RecognitionResult::final_result(String::new()))
        })))
    }
}

/// Echoes the utterance back in a fixed cheerful reply
pub struct CannedGenerator;

#[async_trait]
impl Generator for CannedGenerator {
    fn name(&self) -> &'static str {
        "canned"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        Ok(canned_reply(prompt.transcript()))
    }
}

/// Returns a short stretch of silence
pub struct SilenceSynthesizer;

#[async_trait]
impl Synthesizer for SilenceSynthesizer {
    fn name(&self) -> &'static str {
        "silence"
    }

    async fn synthesize(&self, _text: &str, voice: &VoiceParams) -> Result<Vec<u8>> {
        Ok(silence(voice.sample_rate, SILENCE_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::AudioFrame;

    #[test]
    fn silent_recognizer_consumes_all_frames() {
        let frames = vec![AudioFrame::from_samples(&[0; 8]); 5];
        let results: Vec<_> = SilentRecognizer
            .streaming_recognize(
                RecognitionConfig::new("ja-JP", 16000),
                Box::new(frames.into_iter()),
            )
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(results, vec![RecognitionResult::final_result("")]);
    }

    #[tokio::test]
    async fn canned_generator_echoes() {
        let reply = CannedGenerator
            .generate(&Prompt::for_transcript("ねこ"))
            .await
            .unwrap();
        assert!(reply.contains("ねこって言ったんだね"));
    }

    #[tokio::test]
    async fn silence_is_100ms() {
        let voice = VoiceParams {
            language: "ja-JP".into(),
            name: "x".into(),
            sample_rate: 16000,
            speaking_rate: 1.0,
            pitch: 0.0,
        };
        let pcm = SilenceSynthesizer.synthesize("hi", &voice).await.unwrap();
        assert_eq!(pcm.len(), 3200);
        assert!(pcm.iter().all(|&b| b == 0));
    }
}
