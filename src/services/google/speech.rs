//! Google Cloud Speech-to-Text recognizer

use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};

use super::auth::ServiceAccountAuth;
use crate::services::{
    FrameSource, RecognitionConfig, RecognitionResult, Recognizer, ResultStream,
};
use crate::{Error, Result};

const SPEECH_URL: &str = "https://speech.googleapis.com/v1p1beta1/speech:recognize";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeConfig<'a> {
    encoding: &'a str,
    sample_rate_hertz: u32,
    language_code: &'a str,
    enable_automatic_punctuation: bool,
}

#[derive(Debug, Serialize)]
struct RecognizeAudio {
    content: String,
}

#[derive(Debug, Serialize)]
struct RecognizeRequest<'a> {
    config: RecognizeConfig<'a>,
    audio: RecognizeAudio,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

#[derive(Debug, Deserialize)]
struct SpeechResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Default, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<SpeechResult>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Recognizer backed by `speech:recognize`
///
/// The REST endpoint is not incremental: the stream pulls every frame when
/// first polled, then yields each returned segment as its own final result.
/// It never produces interim results, and the transcript policy is left to
/// the consumer.
pub struct GoogleRecognizer {
    client: reqwest::Client,
    auth: Arc<ServiceAccountAuth>,
    url: String,
}

impl GoogleRecognizer {
    #[must_use]
    pub fn new(client: reqwest::Client, auth: Arc<ServiceAccountAuth>) -> Self {
        Self {
            client,
            auth,
            url: SPEECH_URL.to_string(),
        }
    }

    async fn recognize(
        &self,
        config: &RecognitionConfig,
        pcm: Vec<u8>,
    ) -> Result<Vec<RecognitionResult>> {
        let token = self.auth.access_token().await?;
        let body = RecognizeRequest {
            config: RecognizeConfig {
                encoding: config.encoding,
                sample_rate_hertz: config.sample_rate,
                language_code: &config.language,
                enable_automatic_punctuation: config.automatic_punctuation,
            },
            audio: RecognizeAudio {
                content: base64::engine::general_purpose::STANDARD.encode(&pcm),
            },
        };

        tracing::debug!(bytes = pcm.len(), language = %config.language, "speech request");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Stt(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Stt(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or(text);
            return Err(Error::Stt(format!("API error ({status}): {message}")));
        }

        let parsed: RecognizeResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Stt(format!("failed to parse response: {e}")))?;

        Ok(final_results(&parsed))
    }
}

/// One final result per segment, best alternative only, in response order
fn final_results(response: &RecognizeResponse) -> Vec<RecognitionResult> {
    response
        .results
        .iter()
        .filter_map(|r| r.alternatives.first())
        .map(|a| RecognitionResult::final_result(a.transcript.trim()))
        .collect()
}

impl Recognizer for GoogleRecognizer {
    fn name(&self) -> &'static str {
        "google"
    }

    fn streaming_recognize<'a>(
        &'a self,
        config: RecognitionConfig,
        frames: FrameSource<'a>,
    ) -> Result<ResultStream<'a>> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Stt(format!("no async runtime for recognition: {e}")))?;

        let batch = std::iter::once_with(move || {
            let pcm: Vec<u8> = frames.flat_map(crate::voice::AudioFrame::into_bytes).collect();
            if pcm.is_empty() {
                return Ok(Vec::new());
            }
            handle.block_on(self.recognize(&config, pcm))
        });

        Ok(Box::new(batch.flat_map(|batch: Result<Vec<RecognitionResult>>| {
            match batch {
                Ok(results) => results.into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            }
        })))
    }
}
