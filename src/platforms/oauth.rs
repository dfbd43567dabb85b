//! OAuth web flow shared by GitHub and GitLab
//!
//! Step 1 builds the authorize URL, step 2 exchanges the returned code for a
//! token. Profile verification with the token is done by the adapter.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{ExternalApiError, ExternalErrorKind, Result};
use crate::platforms::AdapterConfig;

#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorize_url: String,
    pub token_url: String,
}

impl OAuthEndpoints {
    pub fn github(config: &AdapterConfig) -> Self {
        let base = config.oauth_base_url.trim_end_matches('/');
        Self {
            authorize_url: format!("{}/login/oauth/authorize", base),
            token_url: format!("{}/login/oauth/access_token", base),
        }
    }

    pub fn gitlab(config: &AdapterConfig) -> Self {
        let base = config.oauth_base_url.trim_end_matches('/');
        Self {
            authorize_url: format!("{}/oauth/authorize", base),
            token_url: format!("{}/oauth/token", base),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenResponse {
    Success {
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        expires_in: Option<i64>,
        #[serde(default)]
        scope: Option<String>,
    },
    Failure {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    },
}

/// Opaque `state` parameter bound to the requesting user
pub fn new_state(user_id: &str) -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(nonce);
    hex::encode(&hasher.finalize()[..16])
}

pub fn authorize_url(endpoints: &OAuthEndpoints, config: &AdapterConfig, state: &str) -> String {
    let mut url = format!(
        "{}?client_id={}&response_type=code&state={}",
        endpoints.authorize_url,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(state)
    );
    if !config.scopes.is_empty() {
        let scopes = config.scopes.join(" ");
        url.push_str(&format!("&scope={}", urlencoding::encode(&scopes)));
    }
    if let Some(redirect) = &config.redirect_uri {
        url.push_str(&format!("&redirect_uri={}", urlencoding::encode(redirect)));
    }
    url
}

/// Exchange an authorization code. Every failure is `TokenExchange`.
pub async fn exchange_code(
    platform: &str,
    http: &reqwest::Client,
    endpoints: &OAuthEndpoints,
    config: &AdapterConfig,
    code: &str,
) -> Result<TokenGrant> {
    debug!("Exchanging {} OAuth code", platform);

    let mut form = vec![
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("code", code),
        ("grant_type", "authorization_code"),
    ];
    if let Some(redirect) = &config.redirect_uri {
        form.push(("redirect_uri", redirect.as_str()));
    }

    let exchange_error =
        |msg: String| ExternalApiError::new(platform, ExternalErrorKind::TokenExchange, msg);

    let response = http
        .post(&endpoints.token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
        .map_err(|e| exchange_error(format!("token request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        warn!("{} token exchange failed ({}): {}", platform, status, text);
        return Err(exchange_error(format!("token endpoint returned {}", status)).into());
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| exchange_error(format!("invalid token response: {}", e)))?;

    grant_from_response(token, &config.scopes).map_err(|msg| exchange_error(msg).into())
}

fn grant_from_response(
    token: TokenResponse,
    requested_scopes: &[String],
) -> std::result::Result<TokenGrant, String> {
    match token {
        TokenResponse::Success {
            access_token,
            refresh_token,
            expires_in,
            scope,
        } => {
            let scopes = match scope {
                Some(s) if !s.is_empty() => s
                    .split(|c: char| c == ',' || c == ' ')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                _ => requested_scopes.to_vec(),
            };
            Ok(TokenGrant {
                access_token,
                refresh_token,
                expires_at: expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
                scopes,
            })
        }
        TokenResponse::Failure {
            error,
            error_description,
        } => Err(match error_description {
            Some(desc) => format!("{}: {}", error, desc),
            None => error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::DEFAULT_TIMEOUT;

    fn config() -> AdapterConfig {
        AdapterConfig {
            client_id: "abc 123".into(),
            client_secret: "s".into(),
            base_url: "https://api.github.com".into(),
            oauth_base_url: "https://github.com/".into(),
            redirect_uri: Some("https://app.example.com/callback".into()),
            scopes: vec!["read:user".into(), "public_repo".into()],
            timeout: DEFAULT_TIMEOUT,
            api_token: None,
        }
    }

    #[test]
    fn test_authorize_url() {
        let config = config();
        let url = authorize_url(&OAuthEndpoints::github(&config), &config, "xyz");
        assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(url.contains("client_id=abc%20123"));
        assert!(url.contains("state=xyz"));
        assert!(url.contains("scope=read%3Auser%20public_repo"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example.com%2Fcallback"));
    }

    #[test]
    fn test_state_is_unique() {
        let a = new_state("user-1");
        let b = new_state("user-1");
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_grant_parsing() {
        let ok: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "gho_x",
            "token_type": "bearer",
            "scope": "read:user,public_repo"
        }))
        .unwrap();
        let grant = grant_from_response(ok, &[]).unwrap();
        assert_eq!(grant.scopes, vec!["read:user", "public_repo"]);
        assert!(grant.expires_at.is_none());

        let failed: TokenResponse = serde_json::from_value(serde_json::json!({
            "error": "bad_verification_code",
            "error_description": "The code passed is incorrect or expired."
        }))
        .unwrap();
        assert!(grant_from_response(failed, &[])
            .unwrap_err()
            .starts_with("bad_verification_code"));
    }
}
