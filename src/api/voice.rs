//! One-shot HTTP voice endpoint
//!
//! Accepts a complete WAV recording and answers with a WAV reply, running the
//! same recognition consumer and response pipeline as the streaming session.

use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::post,
};

use super::{ApiState, auth, detail};
use crate::session::Failure;
use crate::stream::{RecognitionConsumer, chunk_queue};
use crate::voice::{CHUNK_MS, frame_len, pcm_to_wav, split_frames, wav_to_pcm};

/// Upload ceiling (about five minutes of 16 kHz mono)
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Build voice router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/process-audio", post(process_audio))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Recognize, generate and synthesize in one request
async fn process_audio(
    State(state): State<Arc<ApiState>>,
    mut multipart: Multipart,
) -> Result<Response, VoiceError> {
    let wav = read_audio_field(&mut multipart).await?;
    let audio = wav_to_pcm(&wav).map_err(|e| VoiceError::BadRequest(e.to_string()))?;
    if audio.pcm.is_empty() {
        return Err(VoiceError::BadRequest("Empty audio data".to_string()));
    }

    let frames = split_frames(&audio.pcm, frame_len(audio.sample_rate, CHUNK_MS))
        .map_err(|e| VoiceError::BadRequest(e.to_string()))?;
    let (queue, receiver) = chunk_queue();
    for frame in frames {
        queue.push(frame);
    }
    queue.close();

    let mut config = state.recognition.clone();
    config.sample_rate = audio.sample_rate;

    let outcome = RecognitionConsumer::new(Arc::clone(&state.services.recognizer), config)
        .run(receiver)
        .await?;
    let reply = state.pipeline.respond(&outcome.transcript).await?;

    let body = pcm_to_wav(&reply.audio, reply.sample_rate)
        .map_err(|e| VoiceError::Failed(Failure::SynthesisFailed(e.to_string())))?;

    tracing::info!(
        transcript = %outcome.transcript,
        apologized = reply.apologized,
        bytes = body.len(),
        "processed audio upload"
    );

    Ok(([(header::CONTENT_TYPE, "audio/wav")], body).into_response())
}

async fn read_audio_field(multipart: &mut Multipart) -> Result<Vec<u8>, VoiceError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| VoiceError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("audio") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| VoiceError::BadRequest(format!("failed to read audio: {e}")))?;
            return Ok(bytes.to_vec());
        }
    }
    Err(VoiceError::BadRequest("missing audio field".to_string()))
}

/// Voice API errors
#[derive(Debug)]
pub enum VoiceError {
    BadRequest(String),
    Failed(Failure),
}

impl From<Failure> for VoiceError {
    fn from(failure: Failure) -> Self {
        Self::Failed(failure)
    }
}

impl IntoResponse for VoiceError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                tracing::debug!(%message, "rejected audio upload");
                detail(StatusCode::BAD_REQUEST, message)
            }
            Self::Failed(failure) => {
                let status = match failure {
                    Failure::Unauthorized(_) => StatusCode::FORBIDDEN,
                    Failure::RecognitionEmpty => StatusCode::UNPROCESSABLE_ENTITY,
                    Failure::GenerationFailed(_) | Failure::SynthesisFailed(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                    Failure::RecognitionFailed(_) | Failure::Transport(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                tracing::warn!(reason = failure.reason(), detail = %failure, "audio upload failed");
                detail(status, failure.user_message())
            }
        }
    }
}
