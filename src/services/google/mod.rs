//! Google Cloud backend: Speech-to-Text, Vertex AI Gemini, Text-to-Speech

mod auth;
mod speech;
mod tts;
mod vertex;

use std::sync::Arc;
use std::time::Duration;

pub use auth::ServiceAccountAuth;
pub use speech::GoogleRecognizer;
pub use tts::GoogleSynthesizer;
pub use vertex::VertexGenerator;

use super::Services;
use crate::Result;
use crate::config::GoogleConfig;

/// Per-request ceiling for every Google API call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build all three Google services over one HTTP client and token cache
///
/// # Errors
///
/// Returns error if the HTTP client or service-account credentials fail to load
pub fn services(config: &GoogleConfig) -> Result<Services> {
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?;
    let auth = Arc::new(ServiceAccountAuth::from_file(
        &config.credentials_file,
        client.clone(),
    )?);

    tracing::info!(
        project = %config.project_id,
        location = %config.location,
        model = %config.model,
        "google services configured"
    );

    Ok(Services {
        recognizer: Arc::new(GoogleRecognizer::new(client.clone(), Arc::clone(&auth))),
        generator: Arc::new(VertexGenerator::new(client.clone(), Arc::clone(&auth), config)),
        synthesizer: Arc::new(GoogleSynthesizer::new(client, auth)),
    })
}
