//! Vertex AI Gemini reply generation

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::auth::ServiceAccountAuth;
use crate::config::GoogleConfig;
use crate::persona::Prompt;
use crate::services::Generator;
use crate::{Error, Result};

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Generator backed by `generateContent`
pub struct VertexGenerator {
    client: reqwest::Client,
    auth: Arc<ServiceAccountAuth>,
    endpoint: String,
}

impl VertexGenerator {
    #[must_use]
    pub fn new(client: reqwest::Client, auth: Arc<ServiceAccountAuth>, config: &GoogleConfig) -> Self {
        Self {
            client,
            auth,
            endpoint: endpoint(config),
        }
    }
}

fn endpoint(config: &GoogleConfig) -> String {
    format!(
        "https://{loc}-aiplatform.googleapis.com/v1/projects/{project}/locations/{loc}/publishers/google/models/{model}:generateContent",
        loc = config.location,
        project = config.project_id,
        model = config.model,
    )
}

fn request(prompt: &Prompt) -> GenerateRequest<'_> {
    GenerateRequest {
        contents: vec![Content {
            role: "user",
            parts: prompt.parts().into_iter().map(|text| Part { text }).collect(),
        }],
    }
}

/// First candidate's first text part
fn first_text(response: GenerateResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .next()?
        .text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl Generator for VertexGenerator {
    fn name(&self) -> &'static str {
        "vertex"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let token = self.auth.access_token().await?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&request(prompt))
            .send()
            .await
            .map_err(|e| Error::Llm(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("API error ({status}): {body}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("failed to parse response: {e}")))?;

        first_text(parsed).ok_or_else(|| Error::Llm("response contained no text".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn endpoint_embeds_project_and_model() {
        let config = GoogleConfig {
            project_id: "kids-bot".into(),
            location: "asia-northeast1".into(),
            credentials_file: PathBuf::from("/tmp/sa.json"),
            model: "gemini-1.5-flash".into(),
        };
        assert_eq!(
            endpoint(&config),
            "https://asia-northeast1-aiplatform.googleapis.com/v1/projects/kids-bot/locations/asia-northeast1/publishers/google/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn request_parts_keep_prompt_order() {
        let prompt = Prompt::for_transcript("おはよう");
        let json = serde_json::to_value(request(&prompt)).unwrap();
        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1]["text"], "利用者の発話: おはよう");
    }

    #[test]
    fn first_candidate_text_is_the_reply() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[
                {"content":{"parts":[{"text":" やあ！ "},{"text":"ignored"}]}},
                {"content":{"parts":[{"text":"second"}]}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(first_text(response).as_deref(), Some("やあ！"));
    }

    #[test]
    fn missing_candidates_yield_nothing() {
        let response: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(first_text(response).is_none());

        let blocked: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert!(first_text(blocked).is_none());
    }
}
