//! Google Cloud Text-to-Speech synthesis

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::auth::ServiceAccountAuth;
use crate::services::{Synthesizer, VoiceParams};
use crate::voice::{AUDIO_ENCODING, strip_wav_header};
use crate::{Error, Result};

const TTS_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

#[derive(Debug, Serialize)]
struct SynthesisInput<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelection<'a> {
    language_code: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig {
    audio_encoding: &'static str,
    sample_rate_hertz: u32,
    speaking_rate: f64,
    pitch: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    input: SynthesisInput<'a>,
    voice: VoiceSelection<'a>,
    audio_config: AudioConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

/// Synthesizer backed by `text:synthesize`
pub struct GoogleSynthesizer {
    client: reqwest::Client,
    auth: Arc<ServiceAccountAuth>,
}

impl GoogleSynthesizer {
    #[must_use]
    pub const fn new(client: reqwest::Client, auth: Arc<ServiceAccountAuth>) -> Self {
        Self { client, auth }
    }
}

fn request<'a>(text: &'a str, voice: &'a VoiceParams) -> SynthesizeRequest<'a> {
    SynthesizeRequest {
        input: SynthesisInput { text },
        voice: VoiceSelection {
            language_code: &voice.language,
            name: &voice.name,
        },
        audio_config: AudioConfig {
            audio_encoding: AUDIO_ENCODING,
            sample_rate_hertz: voice.sample_rate,
            speaking_rate: voice.speaking_rate,
            pitch: voice.pitch,
        },
    }
}

/// Decode the base64 payload; LINEAR16 responses carry a WAV header
fn decode_audio(audio_content: &str) -> Result<Vec<u8>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(audio_content)
        .map_err(|e| Error::Tts(format!("invalid audio payload: {e}")))?;
    strip_wav_header(&bytes)
}

#[async_trait]
impl Synthesizer for GoogleSynthesizer {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>> {
        let token = self.auth.access_token().await?;

        let response = self
            .client
            .post(TTS_URL)
            .bearer_auth(token)
            .json(&request(text, voice))
            .send()
            .await
            .map_err(|e| Error::Tts(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("API error ({status}): {body}")));
        }

        let parsed: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| Error::Tts(format!("failed to parse response: {e}")))?;

        let pcm = decode_audio(&parsed.audio_content)?;
        tracing::debug!(bytes = pcm.len(), voice = %voice.name, "synthesis complete");
        Ok(pcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{pcm_to_wav, samples_to_pcm};

    fn voice() -> VoiceParams {
        VoiceParams {
            language: "ja-JP".into(),
            name: "ja-JP-Wavenet-D".into(),
            sample_rate: 16000,
            speaking_rate: 1.1,
            pitch: 2.0,
        }
    }

    #[test]
    fn request_carries_voice_settings() {
        let voice = voice();
        let json = serde_json::to_value(request("やあ", &voice)).unwrap();
        assert_eq!(json["voice"]["name"], "ja-JP-Wavenet-D");
        assert_eq!(json["audioConfig"]["audioEncoding"], "LINEAR16");
        assert_eq!(json["audioConfig"]["sampleRateHertz"], 16000);
        assert_eq!(json["audioConfig"]["pitch"], 2.0);
    }

    #[test]
    fn wav_payload_is_stripped_to_pcm() {
        let pcm = samples_to_pcm(&[10, -10, 20]);
        let wav = pcm_to_wav(&pcm, 16000).unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(wav);
        assert_eq!(decode_audio(&encoded).unwrap(), pcm);
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(decode_audio("***").is_err());
    }
}
