//! Fixed-duration record, upload and play over `/process-audio`

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::api::Detail;
use crate::config::ClientConfig;
use crate::voice::{WavAudio, wav_to_pcm};
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Uploads whole recordings and returns the spoken reply
pub struct HttpVoiceClient {
    url: String,
    token: SecretString,
    client: reqwest::Client,
}

impl HttpVoiceClient {
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, token: SecretString) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            url: url.into(),
            token,
            client,
        })
    }

    /// Build from client configuration
    ///
    /// # Errors
    ///
    /// Returns error if `API_URL` is not configured
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(
            config.http_url()?,
            SecretString::from(config.api_token.expose_secret().to_owned()),
        )
    }

    /// Upload a WAV recording and decode the WAV reply
    ///
    /// # Errors
    ///
    /// Returns `Error::Auth` for 401/403 and `Error::Transport` for any other failure
    pub async fn process(&self, wav: Vec<u8>) -> Result<WavAudio> {
        let bytes = wav.len();
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new().part("audio", part);

        tracing::debug!(url = %self.url, bytes, "uploading recording");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.token.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("upload failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Detail>(&body)
                .map(|d| d.detail)
                .unwrap_or(body);
            return Err(match status.as_u16() {
                401 | 403 => Error::Auth(message),
                _ => Error::Transport(format!("{status}: {message}")),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("failed to read reply: {e}")))?;
        wav_to_pcm(&body)
    }
}
