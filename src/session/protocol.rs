//! Session wire protocol
//!
//! Binary frames carry raw PCM. Text frames carry JSON control events tagged
//! by `event`.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Close code sent when the device token is rejected
pub const UNAUTHORIZED_CLOSE_CODE: u16 = 4401;

/// Device to backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// End of utterance
    End,
}

/// Backend to device; exactly one per session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Error {
        #[serde(default)]
        reason: String,
        message: String,
    },
    Result {
        transcript: String,
        response_text: String,
        audio_format: String,
        sample_rate: u32,
        audio_base64: String,
    },
}

impl ServerEvent {
    /// Build a result event, base64-encoding `pcm`
    #[must_use]
    pub fn result(transcript: &str, response_text: &str, pcm: &[u8], sample_rate: u32) -> Self {
        Self::Result {
            transcript: transcript.to_string(),
            response_text: response_text.to_string(),
            audio_format: crate::voice::AUDIO_ENCODING.to_string(),
            sample_rate,
            audio_base64: encode_audio(pcm),
        }
    }

    /// Serialize as a text frame payload
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse a client text frame
///
/// # Errors
///
/// Returns `Error::Protocol` for anything other than a known event
pub fn parse_client_event(text: &str) -> Result<ClientEvent> {
    serde_json::from_str(text).map_err(|e| Error::Protocol(format!("unknown client event: {e}")))
}

/// Standard alphabet, padded
#[must_use]
pub fn encode_audio(pcm: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm)
}

/// Decode an `audio_base64` field
///
/// # Errors
///
/// Returns `Error::Protocol` if the payload is not valid base64
pub fn decode_audio(encoded: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::Protocol(format!("invalid audio_base64: {e}")))
}
