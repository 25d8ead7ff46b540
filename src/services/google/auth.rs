//! Service-account OAuth for Google Cloud APIs

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{Error, Result};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const TOKEN_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Refresh this many seconds before the token actually expires
const EXPIRY_MARGIN_SECS: u64 = 300;

/// Cached token info
struct TokenInfo {
    access_token: String,
    expires_at: u64,
}

/// Service account JSON structure
#[derive(Debug, Deserialize)]
struct ServiceAccount {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

/// JWT claims for Google OAuth
#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    exp: u64,
    iat: u64,
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Exchanges a signed service-account JWT for bearer tokens, caching the result
pub struct ServiceAccountAuth {
    account: ServiceAccount,
    key: jsonwebtoken::EncodingKey,
    client: reqwest::Client,
    token: Mutex<Option<TokenInfo>>,
}

impl ServiceAccountAuth {
    /// Load and validate a service-account key file
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable or the private key is invalid
    pub fn from_file(path: &Path, client: reqwest::Client) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read service account {}: {e}",
                path.display()
            ))
        })?;
        let account: ServiceAccount = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse service account: {e}")))?;
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .map_err(|e| Error::Config(format!("invalid private key: {e}")))?;

        tracing::debug!(account = %account.client_email, "loaded service account");

        Ok(Self {
            account,
            key,
            client,
            token: Mutex::new(None),
        })
    }

    fn token_url(&self) -> &str {
        self.account.token_uri.as_deref().unwrap_or(GOOGLE_TOKEN_URL)
    }

    fn create_jwt(&self, now: u64) -> Result<String> {
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        let claims = JwtClaims {
            iss: &self.account.client_email,
            scope: TOKEN_SCOPE,
            aud: self.token_url(),
            exp: now + 3600,
            iat: now,
        };

        jsonwebtoken::encode(&header, &claims, &self.key)
            .map_err(|e| Error::Auth(format!("JWT encoding failed: {e}")))
    }

    /// Get or refresh an access token
    ///
    /// # Errors
    ///
    /// Returns error if the token exchange fails
    pub async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        let now = unix_now();

        if let Some(ref info) = *guard {
            if info.expires_at > now + EXPIRY_MARGIN_SECS {
                return Ok(info.access_token.clone());
            }
        }

        let jwt = self.create_jwt(now)?;
        let response = self
            .client
            .post(self.token_url())
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await
            .map_err(|e| Error::Auth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("token request failed: {status} - {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("token parse error: {e}")))?;

        tracing::debug!(expires_in = token.expires_in, "refreshed access token");

        let access_token = token.access_token.clone();
        *guard = Some(TokenInfo {
            access_token: token.access_token,
            expires_at: now + token.expires_in,
        });

        Ok(access_token)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_config_error() {
        let err = ServiceAccountAuth::from_file(
            Path::new("/nonexistent/sa.json"),
            reqwest::Client::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn bad_private_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sa.json");
        std::fs::write(
            &path,
            r#"{"client_email":"bot@example.iam.gserviceaccount.com","private_key":"not a key"}"#,
        )
        .unwrap();

        let err = ServiceAccountAuth::from_file(&path, reqwest::Client::new())
            .err()
            .unwrap();
        assert!(err.to_string().contains("invalid private key"));
    }
}
